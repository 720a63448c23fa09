pub mod eea_download;
pub mod eea_prepare;
pub mod era5_download;
pub mod era5_prepare;
pub mod merge;

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::info;
use reqwest::Client;

pub use eea_download::eea_download;
pub use eea_prepare::eea_prepare;
pub use era5_download::era5_download;
pub use era5_prepare::era5_prepare;
pub use merge::merge;

use crate::{
    config::Config,
    parquet,
    region::{load_region_geometries, regions_from_config, RegionGeometry},
    spss::{write_sav, WriteOptions},
    table::AggregatedTable,
};

/// `<folder>/<stem>.parquet` and `<folder>/<stem>.sav`.
pub fn make_output_file_names(folder: &Path, stem: &str) -> (PathBuf, PathBuf) {
    (
        folder.join(format!("{stem}.parquet")),
        folder.join(format!("{stem}.sav")),
    )
}

/// Writes `table` as parquet and as a labelled SPSS file.
pub fn save_table_files(
    table: &AggregatedTable,
    folder: &Path,
    stem: &str,
    file_label: &str,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(folder).with_context(|| format!("Failed to create {}", folder.display()))?;
    let (parquet_path, sav_path) = make_output_file_names(folder, stem);

    parquet::save_table(table, &parquet_path)
        .with_context(|| format!("Failed to write {}", parquet_path.display()))?;
    write_sav(&sav_path, &table.to_dataset(file_label), WriteOptions::default())
        .with_context(|| format!("Failed to write {}", sav_path.display()))?;

    info!("Wrote {} rows to {stem}", table.records.len());
    Ok(vec![parquet_path, sav_path])
}

/// Boundaries of every configured region, fetched from GISCO on first use.
pub async fn region_geometries(client: &Client, config: &Config) -> Result<Vec<RegionGeometry>> {
    let regions = regions_from_config(&config.regions).context("Invalid region in config")?;
    load_region_geometries(client, &regions, &config.paths.nuts)
        .await
        .context("Failed to load NUTS boundaries")
}

// -- Tests -------------------------------------------------------------------
