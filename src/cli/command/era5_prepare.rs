//! Aggregate the raw ERA5 files to one row per region and day.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use reqwest::Client;

use super::{region_geometries, save_table_files};
use crate::{
    catalog::ERA5_VARIABLES,
    cli::create_progress_bar,
    config::{Config, Era5Config},
    era5::{
        grid::read_files,
        population::grid_cell_weights,
        prepare::{aggregate, DailyCells},
        raw_file_path, Era5Variable,
    },
    region::Region,
    table::AggregatedTable,
};

pub async fn era5_prepare(config: &Config) -> Result<Vec<PathBuf>> {
    let era5 = &config.era5;
    let client = Client::new();
    let geometries = region_geometries(&client, config).await?;

    let mut table = AggregatedTable::from_catalog(ERA5_VARIABLES);
    for geometry in &geometries {
        let region = &geometry.region;
        let daily = read_region(&config.paths.era5, region, era5)
            .with_context(|| format!("Failed to read ERA5 files of {}", region.id))?;

        let weights = grid_cell_weights(
            &config.paths.population,
            geometry,
            daily.centres(),
            era5.grid_step,
        )
        .with_context(|| format!("Failed to weight grid cells of {}", region.id))?;
        debug!(
            "{}: {} grid cells, population {:.0}",
            region.id,
            weights.len(),
            weights.iter().sum::<f64>()
        );

        let records = aggregate(
            &region.id,
            &daily.finish(),
            &weights,
            (era5.baseline_first, era5.baseline_last),
        );
        info!("{}: {} days", region.id, records.len());
        table.records.extend(records);
    }

    table.retain_years(era5.first_year + 1, era5.last_year);
    table.sort();
    let mut files = save_table_files(
        &table,
        &config.paths.era5,
        "era5-regions-full_timeseries",
        "ERA5 climate variables by region and date",
    )?;

    table.retain_years(config.output_from_year, i32::MAX);
    files.extend(save_table_files(
        &table,
        &config.paths.era5,
        "era5-regions",
        "ERA5 climate variables by region and date",
    )?);

    Ok(files)
}

/// Feeds the region's monthly files, one month at a time, into the daily accumulator.
fn read_region(era5_folder: &Path, region: &Region, era5: &Era5Config) -> Result<DailyCells> {
    let months: Vec<(i32, u32)> = (era5.first_year..=era5.last_year)
        .flat_map(|year| (1..=12).map(move |month| (year, month)))
        .collect();

    let pb = create_progress_bar(months.len() as u64, format!("Reading {}", region.id));
    let mut daily = DailyCells::new(region.timezone);
    for (year, month) in months {
        let files = month_files(era5_folder, &region.id, year, month)?;
        let records = read_files(&files)?;
        daily.add(&records);
        pb.inc(1);
    }
    pb.finish_with_message(format!("{} read", region.id));

    Ok(daily)
}

/// The three variable files of one month, all of which must exist.
fn month_files(
    era5_folder: &Path,
    region_id: &str,
    year: i32,
    month: u32,
) -> Result<Vec<(Era5Variable, PathBuf)>> {
    Era5Variable::ALL
        .into_iter()
        .map(|variable| {
            let path = raw_file_path(era5_folder, variable, region_id, year, month);
            if path.exists() {
                Ok((variable, path))
            } else {
                Err(anyhow!("Missing {}, run era5-download first", path.display()))
            }
        })
        .collect()
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn should_require_every_variable_of_a_month() {
        let dir = TempDir::new().unwrap();
        for variable in [Era5Variable::Temperature, Era5Variable::Precipitation] {
            let path = raw_file_path(dir.path(), variable, "UKI", 2019, 3);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"").unwrap();
        }

        let error = month_files(dir.path(), "UKI", 2019, 3).unwrap_err();
        assert!(error.to_string().contains("iwg10UKIy2019m03.nc"));

        let gust = raw_file_path(dir.path(), Era5Variable::WindGust, "UKI", 2019, 3);
        std::fs::write(gust, b"").unwrap();
        let files = month_files(dir.path(), "UKI", 2019, 3).unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(files[0].0, Era5Variable::Temperature);
    }
}
