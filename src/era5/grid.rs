//! Reading hourly ERA5 grids out of the downloaded netCDF files.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use log::debug;
use netcdf::AttributeValue;

use super::Era5Variable;
use crate::error::{Error, Result};

/// One hourly value set for one grid cell.
#[derive(Debug, Clone, PartialEq)]
pub struct GridRecord {
    pub time: DateTime<Utc>,
    pub longitude: f64,
    pub latitude: f64,
    /// 2 m temperature in K
    pub tmpdc: Option<f64>,
    /// Total precipitation in m
    pub pac: Option<f64>,
    /// Instantaneous 10 m wind gust in m/s
    pub iwg10: Option<f64>,
}

impl GridRecord {
    fn empty(time: DateTime<Utc>, longitude: f64, latitude: f64) -> Self {
        GridRecord {
            time,
            longitude,
            latitude,
            tmpdc: None,
            pac: None,
            iwg10: None,
        }
    }

    fn set(&mut self, variable: Era5Variable, value: Option<f64>) {
        let slot = match variable {
            Era5Variable::Temperature => &mut self.tmpdc,
            Era5Variable::Precipitation => &mut self.pac,
            Era5Variable::WindGust => &mut self.iwg10,
        };
        if slot.is_none() {
            *slot = value;
        }
    }
}

/// One value of a single variable, as laid out in a file.
#[derive(Debug, Clone, PartialEq)]
pub struct GridValue {
    pub time: DateTime<Utc>,
    pub longitude: f64,
    pub latitude: f64,
    pub value: Option<f64>,
}

/// Packing attributes of a netCDF variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Packing {
    pub scale_factor: f64,
    pub add_offset: f64,
    pub fill_values: Vec<f64>,
}

impl Default for Packing {
    fn default() -> Self {
        Packing {
            scale_factor: 1.0,
            add_offset: 0.0,
            fill_values: Vec::new(),
        }
    }
}

impl Packing {
    pub fn unpack(&self, raw: f64) -> Option<f64> {
        if raw.is_nan() || self.fill_values.iter().any(|f| *f == raw) {
            return None;
        }
        Some(raw * self.scale_factor + self.add_offset)
    }
}

/// Decodes CF time offsets such as `hours since 1900-01-01 00:00:00.0`.
pub fn decode_times(units: &str, offsets: &[f64]) -> Result<Vec<DateTime<Utc>>> {
    let invalid = || Error::InvalidValue {
        column: "time units".to_string(),
        value: units.to_string(),
    };

    let (unit, base) = units.split_once(" since ").ok_or_else(invalid)?;
    let seconds_per_unit = match unit.trim() {
        "seconds" | "second" | "s" => 1.0,
        "minutes" | "minute" => 60.0,
        "hours" | "hour" | "h" => 3600.0,
        "days" | "day" | "d" => 86400.0,
        _ => return Err(invalid()),
    };
    let base = parse_base(base).ok_or_else(invalid)?;

    Ok(offsets
        .iter()
        .map(|offset| {
            let millis = (offset * seconds_per_unit * 1000.0).round() as i64;
            base + Duration::milliseconds(millis)
        })
        .collect())
}

fn parse_base(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim().trim_end_matches('Z').trim_end_matches(" UTC");
    for format in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Axes of a gridded variable, by dimension name.
pub struct Axes<'a> {
    pub times: &'a [DateTime<Utc>],
    pub latitudes: &'a [f64],
    pub longitudes: &'a [f64],
}

/// Walks a row-major array with the given dimensions and pairs each value
/// with its time and coordinates. Extra dimensions are flattened away.
pub fn flatten(
    dimensions: &[(String, usize)],
    data: &[f64],
    axes: &Axes,
    packing: &Packing,
) -> Result<Vec<GridValue>> {
    let position = |candidates: &[&str]| {
        dimensions
            .iter()
            .position(|(name, _)| candidates.contains(&name.as_str()))
    };
    let missing = |name: &str| Error::InvalidValue {
        column: "dimensions".to_string(),
        value: format!("no {name} dimension"),
    };
    let t = position(&["time", "valid_time"]).ok_or_else(|| missing("time"))?;
    let y = position(&["latitude", "lat"]).ok_or_else(|| missing("latitude"))?;
    let x = position(&["longitude", "lon"]).ok_or_else(|| missing("longitude"))?;

    let mut strides = vec![1; dimensions.len()];
    for i in (0..dimensions.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dimensions[i + 1].1;
    }
    let index = |flat: usize, dim: usize| (flat / strides[dim]) % dimensions[dim].1;

    data.iter()
        .enumerate()
        .map(|(flat, raw)| {
            let (ti, yi, xi) = (index(flat, t), index(flat, y), index(flat, x));
            match (axes.times.get(ti), axes.latitudes.get(yi), axes.longitudes.get(xi)) {
                (Some(time), Some(latitude), Some(longitude)) => Ok(GridValue {
                    time: *time,
                    longitude: *longitude,
                    latitude: *latitude,
                    value: packing.unpack(*raw),
                }),
                _ => Err(Error::InvalidValue {
                    column: "dimensions".to_string(),
                    value: "axis shorter than its dimension".to_string(),
                }),
            }
        })
        .collect()
}

/// Reads one variable from one raw file.
pub fn read_variable(path: &Path, variable: Era5Variable) -> Result<Vec<GridValue>> {
    let nc_error = |reason: String| Error::Netcdf {
        path: path.to_path_buf(),
        reason,
    };

    let file = netcdf::open(path).map_err(|e| nc_error(e.to_string()))?;
    let name = variable.netcdf_name();
    let var = file
        .variable(name)
        .ok_or_else(|| nc_error(format!("variable `{name}` not found")))?;

    let time_name = ["valid_time", "time"]
        .into_iter()
        .find(|n| file.variable(n).is_some())
        .ok_or_else(|| nc_error("no time variable".to_string()))?;
    let time_var = file
        .variable(time_name)
        .ok_or_else(|| nc_error("no time variable".to_string()))?;
    let units = match time_var.attribute_value("units") {
        Some(Ok(AttributeValue::Str(units))) => units,
        _ => return Err(nc_error(format!("`{time_name}` has no units"))),
    };
    let offsets = time_var
        .get_values::<f64, _>(..)
        .map_err(|e| nc_error(e.to_string()))?;
    let times = decode_times(&units, &offsets)?;

    let read_axis = |names: [&str; 2]| -> Result<Vec<f64>> {
        let axis = names
            .into_iter()
            .find_map(|n| file.variable(n))
            .ok_or_else(|| nc_error(format!("variable `{}` not found", names[0])))?;
        axis.get_values::<f64, _>(..)
            .map_err(|e| nc_error(e.to_string()))
    };
    let latitudes = read_axis(["latitude", "lat"])?;
    let longitudes = read_axis(["longitude", "lon"])?;

    let packing = Packing {
        scale_factor: number_attribute(&var, "scale_factor").unwrap_or(1.0),
        add_offset: number_attribute(&var, "add_offset").unwrap_or(0.0),
        fill_values: ["_FillValue", "missing_value"]
            .into_iter()
            .filter_map(|a| number_attribute(&var, a))
            .collect(),
    };
    let dimensions: Vec<(String, usize)> = var
        .dimensions()
        .iter()
        .map(|d| (d.name(), d.len()))
        .collect();
    let data = var
        .get_values::<f64, _>(..)
        .map_err(|e| nc_error(e.to_string()))?;

    debug!("{}: {} values of {name}", path.display(), data.len());

    let axes = Axes {
        times: &times,
        latitudes: &latitudes,
        longitudes: &longitudes,
    };
    flatten(&dimensions, &data, &axes, &packing)
}

fn number_attribute(var: &netcdf::Variable, name: &str) -> Option<f64> {
    match var.attribute_value(name)?.ok()? {
        AttributeValue::Double(v) => Some(v),
        AttributeValue::Float(v) => Some(f64::from(v)),
        AttributeValue::Short(v) => Some(f64::from(v)),
        AttributeValue::Int(v) => Some(f64::from(v)),
        AttributeValue::Longlong(v) => Some(v as f64),
        AttributeValue::Schar(v) => Some(f64::from(v)),
        AttributeValue::Uchar(v) => Some(f64::from(v)),
        AttributeValue::Ushort(v) => Some(f64::from(v)),
        AttributeValue::Uint(v) => Some(f64::from(v)),
        _ => None,
    }
}

/// Combines per-variable values into one record per (time, cell).
///
/// Records come out sorted by time, then longitude and latitude.
pub fn combine(
    values: impl IntoIterator<Item = (Era5Variable, Vec<GridValue>)>,
) -> Vec<GridRecord> {
    let mut records: BTreeMap<(i64, i64, i64), GridRecord> = BTreeMap::new();
    for (variable, values) in values {
        for v in values {
            let key = (
                v.time.timestamp(),
                coordinate_key(v.longitude),
                coordinate_key(v.latitude),
            );
            records
                .entry(key)
                .or_insert_with(|| GridRecord::empty(v.time, v.longitude, v.latitude))
                .set(variable, v.value);
        }
    }
    records.into_values().collect()
}

/// Coordinates as integer micro-degrees, so equal grid points compare equal.
pub fn coordinate_key(degrees: f64) -> i64 {
    (degrees * 1e6).round() as i64
}

/// Reads every listed file and combines them into grid records.
pub fn read_files(files: &[(Era5Variable, PathBuf)]) -> Result<Vec<GridRecord>> {
    let mut values = Vec::with_capacity(files.len());
    for (variable, path) in files {
        values.push((*variable, read_variable(path, *variable)?));
    }
    Ok(combine(values))
}

// -- Tests -------------------------------------------------------------------
