//! Aggregation of hourly ERA5 grid records to one row per region and day.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;

use super::grid::{coordinate_key, GridRecord};
use crate::{
    catalog::ERA5_VARIABLES,
    stats::{self, rolling},
    table::AggregatedRecord,
};

/// Window length in days and the temperature, precipitation and gust columns it fills.
const WINDOWS: [(i64, &str, &str, &str); 4] = [
    (7, "tmpdcaw", "pacctaw", "iwg10mxaw"),
    (30, "tmpdcam", "pacctam", "iwg10mxam"),
    (90, "tmpdca3m", "paccta3m", "iwg10mxa3m"),
    (365, "tmpdcay", "pacctay", "iwg10mxay"),
];

/// Date of `time` on the region's wall clock.
pub fn local_date(time: DateTime<Utc>, timezone: Tz) -> NaiveDate {
    time.with_timezone(&timezone).date_naive()
}

pub fn kelvin_to_celsius(kelvin: f64) -> f64 {
    kelvin - 273.15
}

/// Metres of water to millimetres, rounded to two decimals.
pub fn metres_to_millimetres(metres: f64) -> f64 {
    (metres * 1000.0 * 100.0).round() / 100.0
}

/// Daily statistics of one grid cell.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyCell {
    pub cell: usize,
    pub date: NaiveDate,
    pub values: DailyValues,
}

/// The five daily quantities, in °C, mm and m/s.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DailyValues {
    pub tmpdca: Option<f64>,
    pub tmpdcmx: Option<f64>,
    pub tmpdcmn: Option<f64>,
    pub paccta: Option<f64>,
    pub iwg10mx: Option<f64>,
}

impl DailyValues {
    const LEN: usize = 5;

    fn to_array(self) -> [Option<f64>; Self::LEN] {
        [self.tmpdca, self.tmpdcmx, self.tmpdcmn, self.paccta, self.iwg10mx]
    }

    fn from_array(values: [Option<f64>; Self::LEN]) -> Self {
        let [tmpdca, tmpdcmx, tmpdcmn, paccta, iwg10mx] = values;
        DailyValues {
            tmpdca,
            tmpdcmx,
            tmpdcmn,
            paccta,
            iwg10mx,
        }
    }
}

/// Running count, sum and extremes of one hourly quantity.
#[derive(Debug, Clone, Copy, Default)]
struct Running {
    count: usize,
    sum: f64,
    min: f64,
    max: f64,
}

impl Running {
    fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    fn present(&self) -> bool {
        self.count > 0
    }

    fn mean(&self) -> Option<f64> {
        self.present().then(|| self.sum / self.count as f64)
    }

    fn sum(&self) -> Option<f64> {
        self.present().then_some(self.sum)
    }

    fn min(&self) -> Option<f64> {
        self.present().then_some(self.min)
    }

    fn max(&self) -> Option<f64> {
        self.present().then_some(self.max)
    }
}

#[derive(Debug, Default)]
struct Hourly {
    temperature: Running,
    precipitation: Running,
    gust: Running,
}

/// Daily statistics per grid cell, fed with hourly records one batch at a time.
///
/// A local day may span two monthly downloads, so groups stay open until
/// [`DailyCells::finish`]. Cells are numbered in the order they are first seen.
#[derive(Debug)]
pub struct DailyCells {
    timezone: Tz,
    cells: HashMap<(i64, i64), usize>,
    centres: Vec<(f64, f64)>,
    groups: BTreeMap<(usize, NaiveDate), Hourly>,
}

impl DailyCells {
    pub fn new(timezone: Tz) -> Self {
        DailyCells {
            timezone,
            cells: HashMap::new(),
            centres: Vec::new(),
            groups: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, records: &[GridRecord]) {
        for record in records {
            let key = (coordinate_key(record.longitude), coordinate_key(record.latitude));
            let next = self.centres.len();
            let cell = *self.cells.entry(key).or_insert(next);
            if cell == next {
                self.centres.push((record.longitude, record.latitude));
            }

            let hourly = self
                .groups
                .entry((cell, local_date(record.time, self.timezone)))
                .or_default();
            if let Some(t) = record.tmpdc {
                hourly.temperature.add(kelvin_to_celsius(t));
            }
            if let Some(p) = record.pac {
                hourly.precipitation.add(metres_to_millimetres(p));
            }
            if let Some(g) = record.iwg10 {
                hourly.gust.add(g);
            }
        }
    }

    /// `(longitude, latitude)` of every cell seen so far, indexed by cell.
    pub fn centres(&self) -> &[(f64, f64)] {
        &self.centres
    }

    pub fn finish(self) -> Vec<DailyCell> {
        self.groups
            .into_iter()
            .map(|((cell, date), hourly)| DailyCell {
                cell,
                date,
                values: DailyValues {
                    tmpdca: hourly.temperature.mean(),
                    tmpdcmx: hourly.temperature.max(),
                    tmpdcmn: hourly.temperature.min(),
                    paccta: hourly.precipitation.sum(),
                    iwg10mx: hourly.gust.max(),
                },
            })
            .collect()
    }
}

/// Population-weighted average of the daily cell values, one entry per date.
///
/// `weights` is indexed by cell. Missing cell values are skipped.
pub fn collapse(daily: &[DailyCell], weights: &[f64]) -> BTreeMap<NaiveDate, DailyValues> {
    let mut by_date: BTreeMap<NaiveDate, Vec<&DailyCell>> = BTreeMap::new();
    for day in daily {
        by_date.entry(day.date).or_default().push(day);
    }

    by_date
        .into_iter()
        .map(|(date, cells)| {
            let mut out = [None; DailyValues::LEN];
            for (i, slot) in out.iter_mut().enumerate() {
                let pairs: Vec<(f64, f64)> = cells
                    .iter()
                    .filter_map(|c| {
                        let value = c.values.to_array()[i]?;
                        Some((value, weights.get(c.cell).copied().unwrap_or(0.0)))
                    })
                    .collect();
                *slot = stats::weighted_mean(&pairs);
            }
            (date, DailyValues::from_array(out))
        })
        .collect()
}

/// Per calendar month means over the baseline years.
fn baseline_by_month<F>(
    dates: &[NaiveDate],
    values: &[Option<f64>],
    baseline: (i32, i32),
    agg: F,
) -> BTreeMap<u32, f64>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    let mut months: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for (date, value) in dates.iter().zip(values) {
        if let (Some(v), true) = (value, (baseline.0..=baseline.1).contains(&date.year())) {
            months.entry(date.month()).or_default().push(*v);
        }
    }
    months
        .into_iter()
        .filter_map(|(month, values)| Some((month, agg(&values)?)))
        .collect()
}

/// Per year-month aggregate, repeated on every day of the month.
fn per_year_month<F>(dates: &[NaiveDate], values: &[Option<f64>], agg: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    let mut groups: BTreeMap<(i32, u32), Vec<f64>> = BTreeMap::new();
    for (date, value) in dates.iter().zip(values) {
        let entry = groups.entry((date.year(), date.month())).or_default();
        if let Some(v) = value {
            entry.push(*v);
        }
    }
    let results: BTreeMap<(i32, u32), Option<f64>> = groups
        .into_iter()
        .map(|(key, values)| (key, agg(&values)))
        .collect();
    dates
        .iter()
        .map(|d| results.get(&(d.year(), d.month())).copied().flatten())
        .collect()
}

fn lookup_month(table: &BTreeMap<u32, f64>, dates: &[NaiveDate]) -> Vec<Option<f64>> {
    dates.iter().map(|d| table.get(&d.month()).copied()).collect()
}

fn combine<F>(a: &[Option<f64>], b: &[Option<f64>], f: F) -> Vec<Option<f64>>
where
    F: Fn(f64, f64) -> Option<f64>,
{
    a.iter()
        .zip(b)
        .map(|(a, b)| match (a, b) {
            (Some(a), Some(b)) => f(*a, *b),
            _ => None,
        })
        .collect()
}

/// Adds the moving windows and calendar-month statistics to a region's daily
/// series and lays the values out in catalogue order.
pub fn derive(
    region: &str,
    daily: &BTreeMap<NaiveDate, DailyValues>,
    baseline: (i32, i32),
) -> Vec<AggregatedRecord> {
    let dates: Vec<NaiveDate> = daily.keys().copied().collect();
    let column = |f: fn(&DailyValues) -> Option<f64>| daily.values().map(f).collect::<Vec<_>>();

    let tmpdca = column(|v| v.tmpdca);
    let paccta = column(|v| v.paccta);
    let iwg10mx = column(|v| v.iwg10mx);

    let mut columns: BTreeMap<&str, Vec<Option<f64>>> = BTreeMap::new();

    for (days, tmp, pac, iwg) in WINDOWS {
        columns.insert(tmp, rolling(&dates, &tmpdca, days, 1, stats::mean));
        columns.insert(pac, rolling(&dates, &paccta, days, 1, stats::sum));
        columns.insert(iwg, rolling(&dates, &iwg10mx, days, 1, stats::mean));
    }

    let tmpdcamb = lookup_month(
        &baseline_by_month(&dates, &tmpdca, baseline, stats::mean),
        &dates,
    );
    let tmp95pacmb = lookup_month(
        &baseline_by_month(&dates, &tmpdca, baseline, |v| stats::quantile(v, 0.95)),
        &dates,
    );
    let tmpanod = combine(&tmpdca, &tmpdcamb, |a, b| Some(a - b));
    let tmpdcacm = per_year_month(&dates, &tmpdca, stats::mean);
    let tmpanocm = combine(&tmpdcacm, &tmpdcamb, |a, b| Some(a - b));

    // A month without any precipitation value totals zero.
    let pacctcm = per_year_month(&dates, &paccta, |v| Some(v.iter().sum()));
    let pacctmb = lookup_month(
        &baseline_by_month(&dates, &pacctcm, baseline, stats::mean),
        &dates,
    );
    let paccdcm = combine(&pacctcm, &pacctmb, |a, b| (b != 0.0).then(|| a / b * 100.0));

    let iwg10mxamb = lookup_month(
        &baseline_by_month(&dates, &iwg10mx, baseline, stats::mean),
        &dates,
    );

    columns.insert("tmpdca", tmpdca);
    columns.insert("tmpdcmx", column(|v| v.tmpdcmx));
    columns.insert("tmpdcmn", column(|v| v.tmpdcmn));
    columns.insert("tmpdcacm", tmpdcacm);
    columns.insert("tmpdcamb", tmpdcamb);
    columns.insert("tmp95pacmb", tmp95pacmb);
    columns.insert("tmpanod", tmpanod);
    columns.insert("tmpanocm", tmpanocm);
    columns.insert("paccta", paccta);
    columns.insert("pacctcm", pacctcm);
    columns.insert("pacctmb", pacctmb);
    columns.insert("paccdcm", paccdcm);
    columns.insert("iwg10mx", iwg10mx);
    columns.insert("iwg10mxamb", iwg10mxamb);

    dates
        .iter()
        .enumerate()
        .map(|(i, date)| AggregatedRecord {
            region: region.to_string(),
            date: *date,
            values: ERA5_VARIABLES
                .iter()
                .map(|(name, _, _)| columns.get(name).and_then(|c| c[i]))
                .collect(),
        })
        .collect()
}

/// Daily cell values of one region to its aggregated records.
pub fn aggregate(
    region: &str,
    daily: &[DailyCell],
    weights: &[f64],
    baseline: (i32, i32),
) -> Vec<AggregatedRecord> {
    derive(region, &collapse(daily, weights), baseline)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn hour(lon: f64, h: u32, kelvin: f64, precipitation: f64) -> GridRecord {
        GridRecord {
            time: Utc.with_ymd_and_hms(2016, 6, 1, h, 0, 0).unwrap(),
            longitude: lon,
            latitude: 48.2,
            tmpdc: Some(kelvin),
            pac: Some(precipitation),
            iwg10: Some(f64::from(h)),
        }
    }

    fn value(records: &[AggregatedRecord], i: usize, name: &str) -> Option<f64> {
        let column = ERA5_VARIABLES.iter().position(|(n, _, _)| *n == name).unwrap();
        records[i].values[column]
    }

    fn prepare(batches: &[&[GridRecord]], weights: &[f64]) -> Vec<AggregatedRecord> {
        let mut daily = DailyCells::new(chrono_tz::Europe::Vienna);
        for batch in batches {
            daily.add(batch);
        }
        aggregate("AT13", &daily.finish(), weights, (1991, 2020))
    }

    fn series(days: &[(NaiveDate, f64, f64)]) -> BTreeMap<NaiveDate, DailyValues> {
        days.iter()
            .map(|(d, t, p)| {
                (
                    *d,
                    DailyValues {
                        tmpdca: Some(*t),
                        tmpdcmx: Some(*t),
                        tmpdcmn: Some(*t),
                        paccta: Some(*p),
                        iwg10mx: Some(*t),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn should_use_the_regions_wall_clock_date() {
        let late = Utc.with_ymd_and_hms(2016, 6, 30, 22, 30, 0).unwrap();
        assert_eq!(local_date(late, chrono_tz::Europe::Vienna), date(2016, 7, 1));
        assert_eq!(local_date(late, chrono_tz::Europe::London), date(2016, 6, 30));
    }

    #[test]
    fn should_convert_units() {
        assert!((kelvin_to_celsius(293.15) - 20.0).abs() < 1e-9);
        assert_eq!(metres_to_millimetres(0.0012345), 1.23);
    }

    #[test]
    fn should_number_cells_in_order_of_appearance() {
        let mut daily = DailyCells::new(chrono_tz::Europe::Vienna);
        daily.add(&[hour(16.3, 8, 280.0, 0.0), hour(16.4, 8, 280.0, 0.0)]);
        daily.add(&[hour(16.4, 9, 280.0, 0.0), hour(16.5, 9, 280.0, 0.0)]);

        assert_eq!(daily.centres(), &[(16.3, 48.2), (16.4, 48.2), (16.5, 48.2)]);
    }

    #[test]
    fn should_average_cells_weighted_by_population() {
        let records = [
            hour(16.3, 8, 283.15, 0.001),
            hour(16.4, 8, 293.15, 0.0),
            hour(16.3, 9, 285.15, 0.002),
            hour(16.4, 9, 293.15, 0.0),
        ];

        let out = prepare(&[&records[..]], &[1.0, 3.0]);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].date, date(2016, 6, 1));
        // cell means 11 °C and 20 °C, weighted 1:3
        assert!((value(&out, 0, "tmpdca").unwrap() - 17.75).abs() < 1e-9);
        // cell maxima 12 °C and 20 °C
        assert!((value(&out, 0, "tmpdcmx").unwrap() - 18.0).abs() < 1e-9);
        // daily sums 3 mm and 0 mm
        assert!((value(&out, 0, "paccta").unwrap() - 0.75).abs() < 1e-9);
        assert_eq!(value(&out, 0, "iwg10mx"), Some(9.0));
        // no baseline data for 2016
        assert_eq!(value(&out, 0, "tmpdcamb"), None);
    }

    #[test]
    fn should_fall_back_to_plain_mean_without_population() {
        let records = [hour(16.3, 8, 283.15, 0.0), hour(16.4, 8, 293.15, 0.0)];

        let out = prepare(&[&records[..]], &[0.0, 0.0]);

        assert!((value(&out, 0, "tmpdca").unwrap() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn should_join_a_day_split_across_batches() {
        let first = [hour(16.3, 8, 283.15, 0.001)];
        let second = [hour(16.3, 9, 285.15, 0.002)];

        let out = prepare(&[&first[..], &second[..]], &[1.0]);

        assert_eq!(out.len(), 1);
        assert!((value(&out, 0, "tmpdca").unwrap() - 11.0).abs() < 1e-9);
        assert!((value(&out, 0, "paccta").unwrap() - 3.0).abs() < 1e-9);
        assert!((value(&out, 0, "tmpdcmn").unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn should_compute_moving_windows_and_baselines() {
        let daily = series(&[
            (date(1991, 1, 1), 1.0, 1.0),
            (date(1991, 1, 2), 3.0, 2.0),
            (date(1991, 2, 1), 10.0, 4.0),
            (date(2016, 1, 1), 5.0, 6.0),
        ]);

        let out = derive("AT13", &daily, (1991, 2020));

        assert_eq!(out.len(), 4);
        assert_eq!(value(&out, 1, "tmpdcaw"), Some(2.0));
        assert_eq!(value(&out, 1, "pacctaw"), Some(3.0));
        assert_eq!(value(&out, 2, "tmpdcaw"), Some(10.0));
        // (01-02, 02-01] leaves out 01-02
        assert_eq!(value(&out, 2, "tmpdcam"), Some(10.0));
        assert_eq!(value(&out, 2, "tmpdcay"), Some(14.0 / 3.0));

        assert_eq!(value(&out, 3, "tmpdcamb"), Some(2.0));
        assert_eq!(value(&out, 3, "tmpanod"), Some(3.0));
        assert_eq!(value(&out, 3, "tmpdcacm"), Some(5.0));
        assert_eq!(value(&out, 3, "tmpanocm"), Some(3.0));
        assert!((value(&out, 0, "tmp95pacmb").unwrap() - 2.9).abs() < 1e-9);

        assert_eq!(value(&out, 0, "pacctcm"), Some(3.0));
        assert_eq!(value(&out, 3, "pacctmb"), Some(3.0));
        assert_eq!(value(&out, 3, "paccdcm"), Some(200.0));
        assert_eq!(value(&out, 2, "iwg10mxamb"), Some(10.0));
    }

    #[test]
    fn should_be_deterministic() {
        let records: Vec<GridRecord> = (0..24)
            .flat_map(|h| {
                [hour(16.3, h, 280.0 + f64::from(h), 0.0001), hour(16.4, h, 290.0, 0.0)]
            })
            .collect();
        let run = || prepare(&[&records[..]], &[2.0, 5.0]);

        assert_eq!(run(), run());
    }

    #[test]
    fn should_cover_every_local_date() {
        let records = [hour(16.3, 21, 280.0, 0.0), hour(16.3, 23, 281.0, 0.0)];

        let out = prepare(&[&records[..]], &[1.0]);

        let dates: Vec<_> = out.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![date(2016, 6, 1), date(2016, 6, 2)]);
    }

    #[test]
    fn should_move_the_last_utc_hour_of_the_year_into_the_next_local_year() {
        let new_year = Utc.with_ymd_and_hms(2016, 12, 31, 23, 0, 0).unwrap();
        assert_eq!(local_date(new_year, chrono_tz::Europe::Vienna), date(2017, 1, 1));

        let mut daily = DailyCells::new(chrono_tz::Europe::Vienna);
        daily.add(&[
            GridRecord {
                time: new_year - chrono::Duration::hours(2),
                ..hour(16.3, 0, 270.0, 0.0)
            },
            GridRecord {
                time: new_year,
                ..hour(16.3, 0, 275.0, 0.0)
            },
        ]);
        let days = daily.finish();

        let dates: Vec<_> = days.iter().map(|d| d.date).collect();
        assert_eq!(dates, vec![date(2016, 12, 31), date(2017, 1, 1)]);
        assert!((days[1].values.tmpdca.unwrap() - 1.85).abs() < 1e-9);
    }

    #[test]
    fn should_total_a_month_without_precipitation_values_as_zero() {
        let mut daily = series(&[(date(2016, 1, 1), 5.0, 2.0), (date(2016, 2, 1), 4.0, 0.0)]);
        if let Some(values) = daily.get_mut(&date(2016, 2, 1)) {
            values.paccta = None;
        }

        let out = derive("AT13", &daily, (1991, 2020));

        assert_eq!(value(&out, 0, "pacctcm"), Some(2.0));
        assert_eq!(value(&out, 1, "pacctcm"), Some(0.0));
        assert_eq!(value(&out, 1, "paccta"), None);
    }
}
