//! EEA air quality: station lookup, measurement download and the daily index.

pub mod api;
pub mod prepare;
pub mod stations;

use chrono::{DateTime, FixedOffset};

/// The pollutants the index covers, in output column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Pollutant {
    Pm10,
    Pm2_5,
    So2,
    No2,
    O3,
}

impl Pollutant {
    pub const ALL: [Pollutant; 5] = [
        Pollutant::Pm10,
        Pollutant::Pm2_5,
        Pollutant::So2,
        Pollutant::No2,
        Pollutant::O3,
    ];

    /// Code of the pollutant in the EEA download service.
    pub fn code(self) -> u32 {
        match self {
            Pollutant::Pm10 => 5,
            Pollutant::Pm2_5 => 6001,
            Pollutant::So2 => 1,
            Pollutant::No2 => 8,
            Pollutant::O3 => 7,
        }
    }

    /// Notation used in the `AirPollutant` column.
    pub fn notation(self) -> &'static str {
        match self {
            Pollutant::Pm10 => "PM10",
            Pollutant::Pm2_5 => "PM2.5",
            Pollutant::So2 => "SO2",
            Pollutant::No2 => "NO2",
            Pollutant::O3 => "O3",
        }
    }

    pub fn from_notation(notation: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.notation() == notation)
    }

    /// Suffix of the derived variable names, e.g. `aqiwdpm2_5`.
    pub fn suffix(self) -> &'static str {
        match self {
            Pollutant::Pm10 => "pm10",
            Pollutant::Pm2_5 => "pm2_5",
            Pollutant::So2 => "so2",
            Pollutant::No2 => "no2",
            Pollutant::O3 => "o3",
        }
    }

    /// Upper edges of the index bands in µg/m³, starting from 0.
    pub fn bins(self) -> [f64; 7] {
        match self {
            Pollutant::Pm10 => [0.0, 20.0, 40.0, 50.0, 100.0, 150.0, 1200.0],
            Pollutant::Pm2_5 => [0.0, 10.0, 20.0, 25.0, 50.0, 75.0, 800.0],
            Pollutant::So2 => [0.0, 100.0, 200.0, 350.0, 500.0, 750.0, 1250.0],
            Pollutant::No2 => [0.0, 40.0, 90.0, 120.0, 230.0, 340.0, 1000.0],
            Pollutant::O3 => [0.0, 50.0, 100.0, 130.0, 240.0, 380.0, 800.0],
        }
    }

    /// Index level 0 (good) to 5 (extremely poor).
    ///
    /// Bands are closed on the right. Concentrations at or below zero, or above
    /// the last edge, have no level.
    pub fn level(self, concentration: f64) -> Option<u8> {
        let bins = self.bins();
        bins.windows(2)
            .position(|edges| concentration > edges[0] && concentration <= edges[1])
            .map(|i| i as u8)
    }
}

/// One measurement of a station, as collated from the raw EEA files.
#[derive(Debug, Clone, PartialEq)]
pub struct StationMeasurement {
    pub region: String,
    pub station: String,
    /// `AirPollutant` notation, e.g. `PM2.5`.
    pub pollutant: String,
    pub begin: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub concentration: Option<f64>,
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn should_bin_closed_on_the_right() {
        let pm10 = Pollutant::Pm10;
        assert_eq!(pm10.level(0.0), None);
        assert_eq!(pm10.level(0.1), Some(0));
        assert_eq!(pm10.level(20.0), Some(0));
        assert_eq!(pm10.level(20.5), Some(1));
        assert_eq!(pm10.level(50.0), Some(2));
        assert_eq!(pm10.level(100.0), Some(3));
        assert_eq!(pm10.level(1200.0), Some(5));
        assert_eq!(pm10.level(1200.5), None);
        assert_eq!(pm10.level(f64::NAN), None);
    }

    #[test]
    fn should_map_notations_and_codes() {
        assert_eq!(Pollutant::from_notation("PM2.5"), Some(Pollutant::Pm2_5));
        assert_eq!(Pollutant::from_notation("CO"), None);
        assert_eq!(Pollutant::Pm2_5.code(), 6001);
        assert_eq!(Pollutant::O3.suffix(), "o3");
    }
}
