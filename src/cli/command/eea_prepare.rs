//! Aggregate the EEA station measurements to air quality indices per region and day.

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::info;

use super::save_table_files;
use crate::{cli::create_spinner, config::Config, eea::prepare::prepare, parquet};

pub async fn eea_prepare(config: &Config) -> Result<Vec<PathBuf>> {
    let stations_file = config.paths.eea.join("eea-stations.parquet");

    let bar = create_spinner("Reading station measurements...".to_string());
    let measurements = parquet::load_measurements(&stations_file).with_context(|| {
        format!("Failed to read {}, run eea-download first", stations_file.display())
    })?;
    bar.finish_with_message(format!("{} measurements read", measurements.len()));

    let mut table = prepare(&measurements);
    table.retain_years(config.output_from_year, i32::MAX);
    for (region, days) in table.region_counts() {
        info!("{region}: {days} days");
    }

    save_table_files(
        &table,
        &config.paths.eea,
        "eea-regions",
        "EEA air quality indices by region and date",
    )
}
