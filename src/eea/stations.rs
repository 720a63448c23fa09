//! The EEA station metadata table.

use std::{collections::HashMap, path::Path};

use log::debug;
use serde::Deserialize;

use crate::{error::Result, region::RegionGeometry};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Station {
    #[serde(rename = "Countrycode")]
    pub country_code: String,
    #[serde(rename = "AirQualityStation")]
    pub id: String,
    #[serde(rename = "AirQualityStationType", default)]
    pub station_type: String,
    #[serde(rename = "Longitude", default)]
    pub longitude: Option<f64>,
    #[serde(rename = "Latitude", default)]
    pub latitude: Option<f64>,
}

impl Station {
    /// Fills the fields still missing from a later row of the same station.
    fn fill_from(&mut self, other: Station) {
        if self.country_code.is_empty() {
            self.country_code = other.country_code;
        }
        if self.station_type.is_empty() {
            self.station_type = other.station_type;
        }
        self.longitude = self.longitude.or(other.longitude);
        self.latitude = self.latitude.or(other.latitude);
    }
}

/// Parses the tab separated metadata into one entry per station, taking each
/// field from the first row that has it, and keeps stations of `station_type`.
pub fn parse_stations(reader: impl std::io::Read, station_type: &str) -> Result<Vec<Station>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(reader);

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut stations: Vec<Station> = Vec::new();
    for row in reader.deserialize() {
        let station: Station = row?;
        match index.get(&station.id) {
            Some(&i) => stations[i].fill_from(station),
            None => {
                index.insert(station.id.clone(), stations.len());
                stations.push(station);
            }
        }
    }
    stations.retain(|s| s.station_type == station_type);
    Ok(stations)
}

pub fn read_stations(path: &Path, station_type: &str) -> Result<Vec<Station>> {
    let stations = parse_stations(std::fs::File::open(path)?, station_type)?;
    debug!("{} {station_type} stations in {}", stations.len(), path.display());
    Ok(stations)
}

/// Stations of the region's country that lie inside its boundary.
pub fn region_stations<'a>(stations: &'a [Station], region: &RegionGeometry) -> Vec<&'a Station> {
    let country = region.region.country_code();
    stations
        .iter()
        .filter(|s| s.country_code == country)
        .filter(|s| match (s.longitude, s.latitude) {
            (Some(lon), Some(lat)) => region.contains(lon, lat),
            _ => false,
        })
        .collect()
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::RegionConfig,
        region::{read_boundary, test::square_geojson, Region},
    };
    use tempfile::TempDir;

    const METADATA: &str = "Countrycode\tTimezone\tAirQualityStation\tSamplingPoint\tAirPollutantCode\tLongitude\tLatitude\tAirQualityStationType\n\
        AT\tUTC+01\tSTA.AT90001\tSPO.1\t5\t16.35\t48.2\tbackground\n\
        AT\tUTC+01\tSTA.AT90001\tSPO.2\t8\t0\t0\ttraffic\n\
        AT\tUTC+01\tSTA.AT90002\tSPO.3\t5\t16.4\t48.25\ttraffic\n\
        AT\tUTC+01\tSTA.AT90003\tSPO.4\t7\t15.0\t47.0\tbackground\n\
        CZ\tUTC+01\tSTA.CZ0001\tSPO.5\t7\t16.4\t48.2\tbackground\n\
        AT\tUTC+01\tSTA.AT90004\tSPO.6\t7\t\t\tbackground\n";

    fn vienna() -> RegionGeometry {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nuts.geojson");
        std::fs::write(&path, square_geojson("AT13", 16.2, 48.1, 16.6, 48.3)).unwrap();
        RegionGeometry {
            region: Region::from_config(&RegionConfig {
                id: "AT13".to_string(),
                timezone: "Europe/Vienna".to_string(),
                nuts_year: 2016,
            })
            .unwrap(),
            boundary: read_boundary(&path, "AT13").unwrap(),
        }
    }

    #[test]
    fn should_keep_first_row_per_station_of_type() {
        let stations = parse_stations(METADATA.as_bytes(), "background").unwrap();
        let ids: Vec<_> = stations.iter().map(|s| s.id.as_str()).collect();

        assert_eq!(ids, vec!["STA.AT90001", "STA.AT90003", "STA.CZ0001", "STA.AT90004"]);
        assert_eq!(stations[0].longitude, Some(16.35));
        assert_eq!(stations[3].latitude, None);
    }

    #[test]
    fn should_fill_missing_fields_from_later_rows() {
        let metadata = "Countrycode\tAirQualityStation\tLongitude\tLatitude\tAirQualityStationType\n\
            AT\tSTA.AT90005\t\t\t\n\
            AT\tSTA.AT90005\t16.37\t\tbackground\n\
            AT\tSTA.AT90005\t16.5\t48.21\ttraffic\n";

        let stations = parse_stations(metadata.as_bytes(), "background").unwrap();

        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].longitude, Some(16.37));
        assert_eq!(stations[0].latitude, Some(48.21));
        let selected = region_stations(&stations, &vienna());
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn should_select_stations_inside_region_and_country() {
        let stations = parse_stations(METADATA.as_bytes(), "background").unwrap();
        let selected = region_stations(&stations, &vienna());
        let ids: Vec<_> = selected.iter().map(|s| s.id.as_str()).collect();

        assert_eq!(ids, vec!["STA.AT90001"]);
    }
}
