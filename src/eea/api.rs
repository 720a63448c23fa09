//! The EEA air quality download service and its raw CSV files.

use std::path::Path;

use chrono::{DateTime, FixedOffset};
use log::debug;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::{Pollutant, StationMeasurement};
use crate::error::{Error, Result};

/// One station and pollutant over a range of years.
#[derive(Debug, Clone)]
pub struct ExtractQuery<'a> {
    pub pollutant: Pollutant,
    pub country_code: &'a str,
    pub station: &'a str,
    pub year_from: i32,
    pub year_to: i32,
}

impl ExtractQuery<'_> {
    fn params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Pollutant", self.pollutant.code().to_string()),
            ("CountryCode", self.country_code.to_string()),
            ("Station", self.station.to_string()),
            ("Year_from", self.year_from.to_string()),
            ("Year_to", self.year_to.to_string()),
            ("Source", "All".to_string()),
            ("Output", "TEXT".to_string()),
            ("TimeCoverage", "Year".to_string()),
        ]
    }
}

/// Asks the service which CSV files hold the data for `query`.
///
/// A `204 No Content` answer means there is no data.
pub async fn list_csv_urls(
    client: &Client,
    extract_url: &str,
    query: &ExtractQuery<'_>,
) -> Result<Vec<String>> {
    let response = client.get(extract_url).query(&query.params()).send().await?;
    let status = response.status();
    debug!("{} -> {status}", response.url());

    if status == StatusCode::NO_CONTENT {
        return Ok(Vec::new());
    }
    if !status.is_success() {
        return Err(Error::HttpStatus {
            url: response.url().to_string(),
            status: status.as_u16(),
        });
    }

    let body = response.text().await?;
    Ok(parse_url_list(&body))
}

/// One URL per line, ignoring a byte order mark and blank lines.
pub fn parse_url_list(body: &str) -> Vec<String> {
    body.trim_start_matches('\u{feff}')
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(rename = "AirQualityStation")]
    station: String,
    #[serde(rename = "AirPollutant")]
    pollutant: String,
    #[serde(rename = "Concentration", default)]
    concentration: Option<f64>,
    #[serde(rename = "DatetimeBegin")]
    begin: String,
    #[serde(rename = "DatetimeEnd")]
    end: String,
}

/// Parses EEA timestamps such as `2019-01-01 00:00:00 +01:00`.
pub fn parse_timestamp(column: &str, text: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S %:z")
        .or_else(|_| DateTime::parse_from_rfc3339(text))
        .map_err(|_| Error::InvalidValue {
            column: column.to_string(),
            value: text.to_string(),
        })
}

/// Reads the relevant columns of one raw EEA CSV file, tagging rows with `region`.
pub fn read_measurements(
    reader: impl std::io::Read,
    region: &str,
) -> Result<Vec<StationMeasurement>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut measurements = Vec::new();
    for row in reader.deserialize() {
        let row: RawRow = row?;
        measurements.push(StationMeasurement {
            region: region.to_string(),
            station: row.station,
            pollutant: row.pollutant,
            begin: parse_timestamp("DatetimeBegin", &row.begin)?,
            end: parse_timestamp("DatetimeEnd", &row.end)?,
            concentration: row.concentration,
        });
    }
    Ok(measurements)
}

pub fn read_measurement_file(path: &Path, region: &str) -> Result<Vec<StationMeasurement>> {
    read_measurements(std::fs::File::open(path)?, region)
}

// -- Tests -------------------------------------------------------------------
