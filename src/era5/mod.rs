//! ERA5 hourly reanalysis: download through the CDS and aggregation to region/day.

pub mod cds;
pub mod grid;
pub mod population;
pub mod prepare;

use std::path::{Path, PathBuf};

pub const DATASET: &str = "reanalysis-era5-single-levels";

/// The hourly ERA5 variables the study uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Era5Variable {
    Temperature,
    Precipitation,
    WindGust,
}

impl Era5Variable {
    pub const ALL: [Era5Variable; 3] = [
        Era5Variable::Temperature,
        Era5Variable::Precipitation,
        Era5Variable::WindGust,
    ];

    /// Prefix of the derived variable names.
    pub fn id(self) -> &'static str {
        match self {
            Era5Variable::Temperature => "tmpdc",
            Era5Variable::Precipitation => "pac",
            Era5Variable::WindGust => "iwg10",
        }
    }

    /// Name in CDS requests.
    pub fn cds_name(self) -> &'static str {
        match self {
            Era5Variable::Temperature => "2m_temperature",
            Era5Variable::Precipitation => "total_precipitation",
            Era5Variable::WindGust => "instantaneous_10m_wind_gust",
        }
    }

    /// Variable name inside the downloaded netCDF file.
    pub fn netcdf_name(self) -> &'static str {
        match self {
            Era5Variable::Temperature => "t2m",
            Era5Variable::Precipitation => "tp",
            Era5Variable::WindGust => "i10fg",
        }
    }
}

/// Location of one raw monthly file, e.g. `raw/tmpdcAT13y2016m01.nc`.
pub fn raw_file_path(
    era5_folder: &Path,
    variable: Era5Variable,
    region_id: &str,
    year: i32,
    month: u32,
) -> PathBuf {
    era5_folder
        .join("raw")
        .join(format!("{}{}y{}m{:02}.nc", variable.id(), region_id, year, month))
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn should_make_raw_file_path() {
        let path = raw_file_path(Path::new("/data/era5"), Era5Variable::WindGust, "UKI", 2019, 3);
        assert_eq!(path, PathBuf::from("/data/era5/raw/iwg10UKIy2019m03.nc"));
    }
}
