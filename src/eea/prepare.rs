//! Daily air quality index per region from station measurements.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use log::debug;

use super::{Pollutant, StationMeasurement};
use crate::{
    catalog::EEA_VARIABLES,
    stats::{self, rolling},
    table::{AggregatedRecord, AggregatedTable},
};

/// Level from which a day counts as "poor".
const POOR: f64 = 3.0;

/// Day-count windows and the prefix of the columns they fill.
const DAY_COUNTS: [(i64, &str); 3] = [(7, "ndyprw"), (30, "ndyprm"), (365, "ndypry")];

/// Measurements that start and end on the same day and carry a concentration.
fn is_usable(m: &StationMeasurement) -> bool {
    m.concentration.is_some() && m.begin.date_naive() == (m.end - Duration::seconds(1)).date_naive()
}

/// Daily concentration per region and pollutant.
///
/// The 99th percentile of each station's measurements of the day, then the
/// maximum over the region's stations. Unknown pollutants are ignored.
pub fn daily_concentrations(
    measurements: &[StationMeasurement],
) -> BTreeMap<(String, NaiveDate), BTreeMap<Pollutant, f64>> {
    let mut per_station: BTreeMap<(&str, &str, Pollutant, NaiveDate), Vec<f64>> = BTreeMap::new();
    let mut dropped = 0usize;
    for m in measurements {
        let (Some(pollutant), Some(concentration), true) =
            (Pollutant::from_notation(&m.pollutant), m.concentration, is_usable(m))
        else {
            dropped += 1;
            continue;
        };
        per_station
            .entry((m.region.as_str(), m.station.as_str(), pollutant, m.begin.date_naive()))
            .or_default()
            .push(concentration);
    }
    debug!("{dropped} of {} measurements not used", measurements.len());

    let mut per_region: BTreeMap<(String, NaiveDate), BTreeMap<Pollutant, f64>> = BTreeMap::new();
    for ((region, _, pollutant, date), values) in per_station {
        let Some(p99) = stats::quantile(&values, 0.99) else {
            continue;
        };
        per_region
            .entry((region.to_string(), date))
            .or_default()
            .entry(pollutant)
            .and_modify(|v| *v = v.max(p99))
            .or_insert(p99);
    }
    per_region
}

/// Index variables for the date-sorted daily concentrations of one region.
pub fn index_variables(
    region: &str,
    days: &BTreeMap<NaiveDate, BTreeMap<Pollutant, f64>>,
) -> Vec<AggregatedRecord> {
    let dates: Vec<NaiveDate> = days.keys().copied().collect();
    let mut columns: BTreeMap<String, Vec<Option<f64>>> = BTreeMap::new();

    let mut levels: Vec<(&str, Vec<Option<f64>>)> = Pollutant::ALL
        .iter()
        .map(|p| {
            let values = days
                .values()
                .map(|day| day.get(p).and_then(|c| p.level(*c)).map(f64::from))
                .collect();
            (p.suffix(), values)
        })
        .collect();
    let worst: Vec<Option<f64>> = (0..dates.len())
        .map(|i| levels.iter().filter_map(|(_, v)| v[i]).reduce(f64::max))
        .collect();
    levels.push(("", worst));

    for (suffix, values) in &levels {
        columns.insert(format!("aqiwd{suffix}"), values.clone());
        columns.insert(format!("aqiw2d{suffix}"), rolling(&dates, values, 2, 1, stats::max));

        let poor: Vec<Option<f64>> = values
            .iter()
            .map(|v| Some(if v.is_some_and(|l| l >= POOR) { 1.0 } else { 0.0 }))
            .collect();
        for (days, prefix) in DAY_COUNTS {
            columns.insert(
                format!("{prefix}{suffix}"),
                rolling(&dates, &poor, days, days as usize, stats::sum),
            );
        }
    }

    dates
        .iter()
        .enumerate()
        .map(|(i, date)| AggregatedRecord {
            region: region.to_string(),
            date: *date,
            values: EEA_VARIABLES
                .iter()
                .map(|(name, _, _)| columns.get(*name).and_then(|c| c[i]))
                .collect(),
        })
        .collect()
}

/// Station measurements to the region/day index table, sorted by region and date.
pub fn prepare(measurements: &[StationMeasurement]) -> AggregatedTable {
    let mut by_region: BTreeMap<String, BTreeMap<NaiveDate, BTreeMap<Pollutant, f64>>> =
        BTreeMap::new();
    for ((region, date), pollutants) in daily_concentrations(measurements) {
        by_region.entry(region).or_default().insert(date, pollutants);
    }

    let mut table = AggregatedTable::from_catalog(EEA_VARIABLES);
    for (region, days) in &by_region {
        debug!("{region}: {} days with measurements", days.len());
        table.records.extend(index_variables(region, days));
    }
    table
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::eea::api::parse_timestamp;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn measurement(
        station: &str,
        pollutant: &str,
        begin: &str,
        end: &str,
        value: Option<f64>,
    ) -> StationMeasurement {
        StationMeasurement {
            region: "AT13".to_string(),
            station: station.to_string(),
            pollutant: pollutant.to_string(),
            begin: parse_timestamp("DatetimeBegin", begin).unwrap(),
            end: parse_timestamp("DatetimeEnd", end).unwrap(),
            concentration: value,
        }
    }

    fn hourly(
        station: &str,
        pollutant: &str,
        day: u32,
        hour: u32,
        value: f64,
    ) -> StationMeasurement {
        measurement(
            station,
            pollutant,
            &format!("2019-01-{day:02} {hour:02}:00:00 +01:00"),
            &format!("2019-01-{day:02} {:02}:00:00 +01:00", hour + 1),
            Some(value),
        )
    }

    fn value(records: &[AggregatedRecord], i: usize, name: &str) -> Option<f64> {
        let column = EEA_VARIABLES.iter().position(|(n, _, _)| *n == name).unwrap();
        records[i].values[column]
    }

    #[test]
    fn should_drop_multi_day_and_missing_measurements() {
        let measurements = vec![
            measurement(
                "S1",
                "PM10",
                "2019-01-01 00:00:00 +01:00",
                "2019-01-02 00:00:00 +01:00",
                Some(30.0),
            ),
            measurement(
                "S1",
                "PM10",
                "2019-01-02 00:00:00 +01:00",
                "2019-01-03 01:00:00 +01:00",
                Some(500.0),
            ),
            measurement(
                "S1",
                "PM10",
                "2019-01-02 05:00:00 +01:00",
                "2019-01-02 06:00:00 +01:00",
                None,
            ),
            measurement(
                "S1",
                "CO",
                "2019-01-02 05:00:00 +01:00",
                "2019-01-02 06:00:00 +01:00",
                Some(1.0),
            ),
        ];

        let daily = daily_concentrations(&measurements);

        assert_eq!(daily.len(), 1);
        assert_eq!(daily[&("AT13".to_string(), date(2019, 1, 1))][&Pollutant::Pm10], 30.0);
    }

    #[test]
    fn should_take_station_percentile_then_region_maximum() {
        let mut measurements: Vec<_> = (0..23)
            .map(|h| hourly("S1", "NO2", 1, h, f64::from(h)))
            .collect();
        measurements.push(hourly("S2", "NO2", 1, 0, 10.0));

        let daily = daily_concentrations(&measurements);
        let no2 = daily[&("AT13".to_string(), date(2019, 1, 1))][&Pollutant::No2];

        // 99th percentile of 0..=22 is 21.78
        assert!((no2 - 21.78).abs() < 1e-9);
    }

    #[test]
    fn should_derive_index_levels() {
        let days: BTreeMap<NaiveDate, BTreeMap<Pollutant, f64>> = [
            (date(2019, 1, 1), [(Pollutant::Pm10, 45.0), (Pollutant::O3, 120.0)]),
            (date(2019, 1, 2), [(Pollutant::Pm10, 10.0), (Pollutant::O3, 260.0)]),
            (date(2019, 1, 4), [(Pollutant::Pm10, 0.0), (Pollutant::O3, 40.0)]),
        ]
        .into_iter()
        .map(|(d, values)| (d, values.into_iter().collect()))
        .collect();

        let out = index_variables("AT13", &days);

        assert_eq!(out.len(), 3);
        assert_eq!(value(&out, 0, "aqiwdpm10"), Some(2.0));
        assert_eq!(value(&out, 0, "aqiwdo3"), Some(2.0));
        assert_eq!(value(&out, 0, "aqiwdno2"), None);
        assert_eq!(value(&out, 0, "aqiwd"), Some(2.0));
        assert_eq!(value(&out, 1, "aqiwd"), Some(4.0));
        assert_eq!(value(&out, 1, "aqiw2dpm10"), Some(2.0));
        assert_eq!(value(&out, 2, "aqiwdpm10"), None);
        // the two-day window of 01-04 does not reach 01-02
        assert_eq!(value(&out, 2, "aqiw2d"), Some(0.0));
    }

    #[test]
    fn should_count_poor_days_over_complete_windows() {
        let days: BTreeMap<NaiveDate, BTreeMap<Pollutant, f64>> = (1..=8)
            .map(|d| {
                let pm10 = if d % 2 == 0 { 120.0 } else { 30.0 };
                (date(2019, 1, d), [(Pollutant::Pm10, pm10)].into_iter().collect())
            })
            .collect();

        let out = index_variables("AT13", &days);

        assert_eq!(value(&out, 5, "ndyprwpm10"), None);
        assert_eq!(value(&out, 6, "ndyprwpm10"), Some(3.0));
        assert_eq!(value(&out, 7, "ndyprwpm10"), Some(4.0));
        assert_eq!(value(&out, 7, "ndyprw"), Some(4.0));
        assert_eq!(value(&out, 7, "ndyprwno2"), Some(0.0));
        assert_eq!(value(&out, 7, "ndyprmpm10"), None);
    }

    #[test]
    fn should_prepare_sorted_table() {
        let mut measurements = vec![
            hourly("S1", "PM10", 2, 3, 30.0),
            hourly("S1", "PM10", 1, 3, 60.0),
        ];
        let mut other = hourly("S9", "PM10", 1, 3, 5.0);
        other.region = "AT12".to_string();
        measurements.push(other);

        let table = prepare(&measurements);

        let keys: Vec<_> = table.records.iter().map(|r| (r.region.as_str(), r.date)).collect();
        assert_eq!(
            keys,
            vec![("AT12", date(2019, 1, 1)), ("AT13", date(2019, 1, 1)), ("AT13", date(2019, 1, 2))]
        );
        assert_eq!(table.variables.len(), EEA_VARIABLES.len());
    }
}
