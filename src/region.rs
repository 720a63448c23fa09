//! Study regions and their NUTS boundaries.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use chrono_tz::Tz;
use geo::{BoundingRect, Contains, MultiPolygon, Point};
use geojson::GeoJson;
use log::{debug, info};
use reqwest::Client;

use crate::{
    config::RegionConfig,
    download::maybe_download,
    error::{Error, Result},
};

const NUTS_BASE_URL: &str = "https://gisco-services.ec.europa.eu/distribution/v2/nuts/geojson";

#[derive(Debug, Clone)]
pub struct Region {
    pub id: String,
    pub timezone: Tz,
    pub nuts_year: u16,
}

impl Region {
    pub fn from_config(config: &RegionConfig) -> Result<Self> {
        let timezone =
            Tz::from_str(&config.timezone).map_err(|_| Error::TimeZone(config.timezone.clone()))?;
        Ok(Region {
            id: config.id.clone(),
            timezone,
            nuts_year: config.nuts_year,
        })
    }

    /// NUTS level, derived from the length of the id (`DE3` is level 1, `CZ010` level 3).
    pub fn level(&self) -> usize {
        self.id.len().saturating_sub(2)
    }

    /// ISO country code as used by the EEA, where the United Kingdom is `GB`.
    pub fn country_code(&self) -> String {
        let code = &self.id[..2.min(self.id.len())];
        match code {
            "UK" => "GB".to_string(),
            "EL" => "GR".to_string(),
            _ => code.to_string(),
        }
    }

    pub fn nuts_url(&self) -> String {
        format!(
            "{}/NUTS_RG_01M_{}_4326_LEVL_{}.geojson",
            NUTS_BASE_URL,
            self.nuts_year,
            self.level()
        )
    }
}

pub fn regions_from_config(configs: &[RegionConfig]) -> Result<Vec<Region>> {
    configs.iter().map(Region::from_config).collect()
}

/// A region with its boundary in WGS84 longitude/latitude.
#[derive(Debug, Clone)]
pub struct RegionGeometry {
    pub region: Region,
    pub boundary: MultiPolygon<f64>,
}

impl RegionGeometry {
    pub fn contains(&self, longitude: f64, latitude: f64) -> bool {
        self.boundary.contains(&Point::new(longitude, latitude))
    }

    /// Bounding box as `[north, west, south, east]`, the order the CDS expects for `area`.
    pub fn area(&self) -> Result<[f64; 4]> {
        let rect = self.boundary.bounding_rect().ok_or_else(|| Error::Geometry {
            region: self.region.id.clone(),
            reason: "empty boundary".to_string(),
        })?;
        Ok([rect.max().y, rect.min().x, rect.min().y, rect.max().x])
    }
}

/// Downloads (once) the NUTS files the regions need and extracts each region's boundary.
pub async fn load_region_geometries(
    client: &Client,
    regions: &[Region],
    nuts_folder: &Path,
) -> Result<Vec<RegionGeometry>> {
    let mut files: HashMap<String, PathBuf> = HashMap::new();
    let mut geometries = Vec::with_capacity(regions.len());

    for region in regions {
        let url = region.nuts_url();
        let path = match files.get(&url) {
            Some(path) => path.clone(),
            None => {
                info!("Loading NUTS boundaries from {url}");
                let path = maybe_download(client, &url, nuts_folder).await?;
                files.insert(url, path.clone());
                path
            }
        };
        let boundary = read_boundary(&path, &region.id)?;
        debug!("Boundary for {} has {} polygons", region.id, boundary.0.len());
        geometries.push(RegionGeometry {
            region: region.clone(),
            boundary,
        });
    }

    Ok(geometries)
}

/// Reads the feature whose `NUTS_ID` is `region_id` from a GISCO GeoJSON file.
pub fn read_boundary(path: &Path, region_id: &str) -> Result<MultiPolygon<f64>> {
    let contents = fs::read_to_string(path)?;
    let geojson = GeoJson::from_str(&contents)?;
    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(Error::Geometry {
            region: region_id.to_string(),
            reason: format!("{} is not a feature collection", path.display()),
        });
    };

    let feature = collection
        .features
        .into_iter()
        .find(|f| {
            f.property("NUTS_ID")
                .and_then(|v| v.as_str())
                .is_some_and(|id| id == region_id)
        })
        .ok_or_else(|| Error::RegionNotFound {
            region: region_id.to_string(),
            path: path.to_path_buf(),
        })?;

    let geometry = feature.geometry.ok_or_else(|| Error::Geometry {
        region: region_id.to_string(),
        reason: "feature has no geometry".to_string(),
    })?;

    match geo::Geometry::<f64>::try_from(geometry.value)? {
        geo::Geometry::Polygon(polygon) => Ok(MultiPolygon::new(vec![polygon])),
        geo::Geometry::MultiPolygon(multi) => Ok(multi),
        other => Err(Error::Geometry {
            region: region_id.to_string(),
            reason: format!("expected a polygon, got {other:?}"),
        }),
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn square_geojson(id: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> String {
        format!(
            r#"{{"type":"FeatureCollection","features":[
                {{"type":"Feature","id":"{id}","properties":{{"NUTS_ID":"{id}","LEVL_CODE":1,"CNTR_CODE":"XX"}},
                  "geometry":{{"type":"Polygon","coordinates":[[[{x0},{y0}],[{x1},{y0}],[{x1},{y1}],[{x0},{y1}],[{x0},{y0}]]]}}}},
                {{"type":"Feature","id":"OTHER","properties":{{"NUTS_ID":"OTHER"}},
                  "geometry":{{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}}}}
            ]}}"#
        )
    }

    fn region(id: &str) -> Region {
        Region::from_config(&RegionConfig {
            id: id.to_string(),
            timezone: "Europe/Vienna".to_string(),
            nuts_year: 2016,
        })
        .unwrap()
    }

    #[test]
    fn should_derive_level_and_country() {
        assert_eq!(region("AT13").level(), 2);
        assert_eq!(region("DE3").level(), 1);
        assert_eq!(region("CZ010").level(), 3);
        assert_eq!(region("UKI").country_code(), "GB");
        assert_eq!(region("SE110").country_code(), "SE");
    }

    #[test]
    fn should_build_nuts_url() {
        assert_eq!(
            region("HU110").nuts_url(),
            "https://gisco-services.ec.europa.eu/distribution/v2/nuts/geojson/NUTS_RG_01M_2016_4326_LEVL_3.geojson"
        );
    }

    #[test]
    fn should_reject_unknown_timezone() {
        let result = Region::from_config(&RegionConfig {
            id: "AT13".to_string(),
            timezone: "Europe/Atlantis".to_string(),
            nuts_year: 2016,
        });
        assert!(matches!(result, Err(Error::TimeZone(_))));
    }

    #[test]
    fn should_read_boundary_and_area() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nuts.geojson");
        fs::write(&path, square_geojson("AT13", 16.2, 48.1, 16.6, 48.3)).unwrap();

        let boundary = read_boundary(&path, "AT13").unwrap();
        let geometry = RegionGeometry {
            region: region("AT13"),
            boundary,
        };

        assert!(geometry.contains(16.4, 48.2));
        assert!(!geometry.contains(15.0, 48.2));
        assert_eq!(geometry.area().unwrap(), [48.3, 16.2, 48.1, 16.6]);
    }

    #[test]
    fn should_report_missing_region() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nuts.geojson");
        fs::write(&path, square_geojson("AT13", 16.2, 48.1, 16.6, 48.3)).unwrap();

        let result = read_boundary(&path, "BE10");
        assert!(matches!(result, Err(Error::RegionNotFound { .. })));
    }
}
