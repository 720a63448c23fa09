//! Population weights for ERA5 grid cells from the GHS-POP raster.
//!
//! The raster is a GeoTIFF in the World Mollweide projection (ESRI:54009).
//! Each pixel centre is projected back to longitude/latitude and its count is
//! added to the grid cell it falls in, provided it also lies in the region.

use std::{
    collections::HashMap,
    f64::consts::{FRAC_PI_2, PI, SQRT_2},
    fs::File,
    io::BufReader,
    path::Path,
};

use log::debug;
use tiff::{
    decoder::{Decoder, DecodingResult, Limits},
    tags::Tag,
};

use crate::{
    error::{Error, Result},
    region::RegionGeometry,
};

/// Semi-major axis of WGS84, used as the sphere radius.
const RADIUS: f64 = 6_378_137.0;

/// Projects longitude/latitude in degrees to Mollweide metres.
pub fn mollweide_forward(lon: f64, lat: f64) -> (f64, f64) {
    let phi = lat.to_radians();
    let theta = if (phi.abs() - FRAC_PI_2).abs() < 1e-12 {
        phi
    } else {
        // Newton iterations on 2θ + sin 2θ = π sin φ
        let target = PI * phi.sin();
        let mut theta = phi;
        for _ in 0..50 {
            let delta =
                (2.0 * theta + (2.0 * theta).sin() - target) / (2.0 + 2.0 * (2.0 * theta).cos());
            theta -= delta;
            if delta.abs() < 1e-14 {
                break;
            }
        }
        theta
    };
    let x = 2.0 * SQRT_2 / PI * RADIUS * lon.to_radians() * theta.cos();
    let y = SQRT_2 * RADIUS * theta.sin();
    (x, y)
}

/// Inverse Mollweide: metres to longitude/latitude in degrees.
pub fn mollweide_inverse(x: f64, y: f64) -> Option<(f64, f64)> {
    let s = y / (SQRT_2 * RADIUS);
    if s.abs() > 1.0 {
        return None;
    }
    let theta = s.asin();
    let lat = ((2.0 * theta + (2.0 * theta).sin()) / PI).clamp(-1.0, 1.0).asin();
    let cos_theta = theta.cos();
    if cos_theta.abs() < 1e-12 {
        return Some((0.0, lat.to_degrees()));
    }
    let lon = PI * x / (2.0 * SQRT_2 * RADIUS * cos_theta);
    if lon.abs() > PI {
        return None;
    }
    Some((lon.to_degrees(), lat.to_degrees()))
}

/// Affine placement of the raster: pixel centres at
/// `(origin_x + (col + 0.5) * pixel_width, origin_y - (row + 0.5) * pixel_height)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl Placement {
    fn centre(&self, col: u32, row: u32) -> (f64, f64) {
        (
            self.origin_x + (f64::from(col) + 0.5) * self.pixel_width,
            self.origin_y - (f64::from(row) + 0.5) * self.pixel_height,
        )
    }

    /// Column/row range covering the projected extent, clamped to the raster.
    fn window(
        &self,
        extent: (f64, f64, f64, f64),
        width: u32,
        height: u32,
    ) -> (u32, u32, u32, u32) {
        let (min_x, min_y, max_x, max_y) = extent;
        let clamp = |v: f64, limit: u32| v.floor().clamp(0.0, f64::from(limit)) as u32;
        (
            clamp((min_x - self.origin_x) / self.pixel_width - 1.0, width),
            clamp((self.origin_y - max_y) / self.pixel_height - 1.0, height),
            clamp((max_x - self.origin_x) / self.pixel_width + 2.0, width),
            clamp((self.origin_y - min_y) / self.pixel_height + 2.0, height),
        )
    }
}

/// Grid cells of one region keyed by their integer position on the ERA5 grid.
pub struct CellIndex {
    step: f64,
    cells: HashMap<(i64, i64), usize>,
}

impl CellIndex {
    /// `centres` are `(longitude, latitude)` of the cell centres.
    pub fn new(centres: &[(f64, f64)], step: f64) -> Self {
        let cells = centres
            .iter()
            .enumerate()
            .map(|(i, (lon, lat))| (((lon / step).round() as i64, (lat / step).round() as i64), i))
            .collect();
        CellIndex { step, cells }
    }

    /// Index of the cell whose `± step/2` box holds the point.
    pub fn locate(&self, lon: f64, lat: f64) -> Option<usize> {
        let key = ((lon / self.step).round() as i64, (lat / self.step).round() as i64);
        self.cells.get(&key).copied()
    }
}

/// Adds one pixel's population to `weights` when it counts for the region.
fn accumulate(
    weights: &mut [f64],
    cells: &CellIndex,
    region: &RegionGeometry,
    lon: f64,
    lat: f64,
    population: f64,
) {
    if !population.is_finite() || population <= 0.0 {
        return;
    }
    if let Some(cell) = cells.locate(lon, lat) {
        if region.contains(lon, lat) {
            weights[cell] += population;
        }
    }
}

/// Population weights computed from an in-memory raster window.
pub fn weights_from_pixels(
    pixels: impl IntoIterator<Item = (f64, f64, f64)>,
    centres: &[(f64, f64)],
    step: f64,
    region: &RegionGeometry,
) -> Vec<f64> {
    let cells = CellIndex::new(centres, step);
    let mut weights = vec![0.0; centres.len()];
    for (lon, lat, population) in pixels {
        accumulate(&mut weights, &cells, region, lon, lat, population);
    }
    weights
}

/// Sums the GHS-POP pixels inside both the region and each grid cell.
///
/// Returns one weight per entry of `centres`, in the same order.
pub fn grid_cell_weights(
    raster: &Path,
    region: &RegionGeometry,
    centres: &[(f64, f64)],
    step: f64,
) -> Result<Vec<f64>> {
    let pop_error = |reason: String| Error::Population {
        path: raster.to_path_buf(),
        reason,
    };
    let tiff_error = |e: tiff::TiffError| pop_error(e.to_string());

    let mut decoder = Decoder::new(BufReader::new(File::open(raster)?))
        .map_err(tiff_error)?
        .with_limits(Limits::unlimited());
    let (width, height) = decoder.dimensions().map_err(tiff_error)?;

    let scale = decoder
        .get_tag_f64_vec(Tag::ModelPixelScaleTag)
        .map_err(tiff_error)?;
    let tiepoint = decoder
        .get_tag_f64_vec(Tag::ModelTiepointTag)
        .map_err(tiff_error)?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(pop_error("incomplete georeferencing tags".to_string()));
    }
    let placement = Placement {
        origin_x: tiepoint[3] - tiepoint[0] * scale[0],
        origin_y: tiepoint[4] + tiepoint[1] * scale[1],
        pixel_width: scale[0],
        pixel_height: scale[1],
    };
    let nodata = decoder
        .find_tag(Tag::GdalNodata)
        .map_err(tiff_error)?
        .and_then(|v| v.into_string().ok())
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok());

    let [north, west, south, east] = region.area()?;
    let half = step / 2.0;
    let extent = projected_extent(west - half, south - half, east + half, north + half);
    let (col0, row0, col1, row1) = placement.window(extent, width, height);
    debug!(
        "{}: reading columns {col0}..{col1}, rows {row0}..{row1}",
        raster.display()
    );

    let cells = CellIndex::new(centres, step);
    let mut weights = vec![0.0; centres.len()];
    if col0 >= col1 || row0 >= row1 {
        return Ok(weights);
    }

    let (chunk_width, chunk_height) = decoder.chunk_dimensions();
    let chunks_across = width.div_ceil(chunk_width);
    let first_chunk_row = row0 / chunk_height;
    let last_chunk_row = row1.saturating_sub(1) / chunk_height;
    let first_chunk_col = col0 / chunk_width;
    let last_chunk_col = col1.saturating_sub(1) / chunk_width;

    for chunk_row in first_chunk_row..=last_chunk_row {
        for chunk_col in first_chunk_col..=last_chunk_col {
            let index = chunk_row * chunks_across + chunk_col;
            let (data_width, data_height) = decoder.chunk_data_dimensions(index);
            let values = to_f64(decoder.read_chunk(index).map_err(tiff_error)?);

            for r in 0..data_height {
                let row = chunk_row * chunk_height + r;
                if row < row0 || row >= row1 {
                    continue;
                }
                for c in 0..data_width {
                    let col = chunk_col * chunk_width + c;
                    if col < col0 || col >= col1 {
                        continue;
                    }
                    let Some(&population) = values.get((r * data_width + c) as usize) else {
                        continue;
                    };
                    if nodata == Some(population) {
                        continue;
                    }
                    let (x, y) = placement.centre(col, row);
                    if let Some((lon, lat)) = mollweide_inverse(x, y) {
                        accumulate(&mut weights, &cells, region, lon, lat, population);
                    }
                }
            }
        }
    }

    Ok(weights)
}

/// Mollweide bounds of a longitude/latitude box, sampled along its edges.
fn projected_extent(west: f64, south: f64, east: f64, north: f64) -> (f64, f64, f64, f64) {
    const SAMPLES: usize = 32;
    let mut extent = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    for i in 0..=SAMPLES {
        let f = i as f64 / SAMPLES as f64;
        let lon = west + f * (east - west);
        let lat = south + f * (north - south);
        for (lo, la) in [(lon, south), (lon, north), (west, lat), (east, lat)] {
            let (x, y) = mollweide_forward(lo, la);
            extent.0 = extent.0.min(x);
            extent.1 = extent.1.min(y);
            extent.2 = extent.2.max(x);
            extent.3 = extent.3.max(y);
        }
    }
    extent
}

fn to_f64(result: DecodingResult) -> Vec<f64> {
    match result {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
    }
}

// -- Tests -------------------------------------------------------------------
