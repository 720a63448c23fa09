//! Local paths, credentials and study parameters, read from a TOML file.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub paths: Paths,
    pub cds: CdsConfig,
    pub era5: Era5Config,
    pub eea: EeaConfig,
    /// First year kept in the files handed to the merge step.
    pub output_from_year: i32,
    pub regions: Vec<RegionConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Paths {
    pub eea: PathBuf,
    pub era5: PathBuf,
    pub nuts: PathBuf,
    /// Local copy of the GHS-POP GeoTIFF (Mollweide). Must exist before `era5-prepare`.
    pub population: PathBuf,
    pub output: PathBuf,
    pub ess_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CdsConfig {
    pub url: String,
    pub key: String,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Era5Config {
    pub first_year: i32,
    pub last_year: i32,
    pub grid_step: f64,
    pub baseline_first: i32,
    pub baseline_last: i32,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EeaConfig {
    pub first_year: i32,
    pub last_year: i32,
    pub station_type: String,
    pub metadata_url: String,
    pub extract_url: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RegionConfig {
    /// NUTS id, also the ESS `region` code.
    pub id: String,
    /// IANA zone used to turn UTC timestamps into local dates.
    pub timezone: String,
    #[serde(default = "default_nuts_year")]
    pub nuts_year: u16,
}

fn default_nuts_year() -> u16 {
    2016
}

impl Default for Config {
    fn default() -> Self {
        Config {
            paths: Paths::default(),
            cds: CdsConfig::default(),
            era5: Era5Config::default(),
            eea: EeaConfig::default(),
            output_from_year: 2016,
            regions: default_regions(),
        }
    }
}

impl Default for Paths {
    fn default() -> Self {
        let root = PathBuf::from("data");
        Paths {
            eea: root.join("eea"),
            era5: root.join("era5"),
            nuts: root.join("nuts"),
            population: root.join("GHS_POP_E2015_GLOBE_R2019A_54009_1K_V1_0.tif"),
            output: root.join("merged"),
            ess_files: vec![
                PathBuf::from("ESS8e02_2.sav"),
                PathBuf::from("ESS9e03_1.sav"),
                PathBuf::from("ESS10.sav"),
                PathBuf::from("ESS10SC.sav"),
            ],
        }
    }
}

impl Default for CdsConfig {
    fn default() -> Self {
        CdsConfig {
            url: "https://cds.climate.copernicus.eu/api".to_string(),
            key: String::new(),
            poll_interval_secs: 10,
        }
    }
}

impl Default for Era5Config {
    fn default() -> Self {
        Era5Config {
            first_year: 1990,
            last_year: 2022,
            grid_step: 0.1,
            baseline_first: 1991,
            baseline_last: 2020,
        }
    }
}

impl Default for EeaConfig {
    fn default() -> Self {
        EeaConfig {
            first_year: 1991,
            last_year: 2022,
            station_type: "background".to_string(),
            metadata_url: "https://discomap.eea.europa.eu/map/fme/metadata/PanEuropean_metadata.csv"
                .to_string(),
            extract_url:
                "https://fme.discomap.eea.europa.eu/fmedatastreaming/AirQualityDownload/AQData_Extract.fmw"
                    .to_string(),
        }
    }
}

fn default_regions() -> Vec<RegionConfig> {
    [
        ("AT13", "Europe/Vienna", 2016),
        ("BE10", "Europe/Brussels", 2016),
        ("CZ010", "Europe/Prague", 2016),
        ("DE3", "Europe/Berlin", 2016),
        ("ES30", "Europe/Madrid", 2016),
        ("FR10", "Europe/Paris", 2016),
        // Dropped from the 2016 vintage
        ("HU101", "Europe/Budapest", 2013),
        ("HU110", "Europe/Budapest", 2016),
        ("NO01", "Europe/Oslo", 2016),
        ("SE11", "Europe/Stockholm", 2016),
        ("SE110", "Europe/Stockholm", 2016),
        ("UKI", "Europe/London", 2016),
    ]
    .into_iter()
    .map(|(id, timezone, nuts_year)| RegionConfig {
        id: id.to_string(),
        timezone: timezone.to_string(),
        nuts_year,
    })
    .collect()
}

impl Config {
    /// Reads the config from `path`, or from the user config directory when no path is given.
    ///
    /// A missing file at the default location yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let Some(default_path) = default_config_path() else {
                    return Ok(Config::default());
                };
                match fs::read_to_string(&default_path) {
                    Ok(contents) => Self::from_toml(&contents)
                        .with_context(|| format!("Invalid config in {}", default_path.display())),
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(Config::default()),
                    Err(e) => Err(e).with_context(|| {
                        format!("Failed to read config {}", default_path.display())
                    }),
                }
            }
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config in {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ess-eosc").join("config.toml"))
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn should_default_missing_sections() {
        let config = Config::from_toml("output_from_year = 2018").unwrap();

        assert_eq!(config.output_from_year, 2018);
        assert_eq!(config.era5, Era5Config::default());
        assert_eq!(config.regions.len(), 12);
        assert_eq!(config.cds.url, "https://cds.climate.copernicus.eu/api");
    }

    #[test]
    fn should_read_regions_and_credentials() {
        let toml = r#"
            [cds]
            key = "abc-123"

            [paths]
            population = "/data/pop.tif"

            [[regions]]
            id = "HU101"
            timezone = "Europe/Budapest"
            nuts_year = 2013

            [[regions]]
            id = "UKI"
            timezone = "Europe/London"
        "#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.cds.key, "abc-123");
        assert_eq!(config.cds.poll_interval_secs, 10);
        assert_eq!(config.paths.population, PathBuf::from("/data/pop.tif"));
        assert_eq!(config.paths.eea, PathBuf::from("data/eea"));
        assert_eq!(config.regions.len(), 2);
        assert_eq!(config.regions[0].nuts_year, 2013);
        assert_eq!(config.regions[1].nuts_year, 2016);
    }

    #[test]
    fn should_reject_invalid_toml() {
        assert!(Config::from_toml("regions = 3").is_err());
    }

    #[test]
    fn should_fail_on_missing_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nope.toml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
