//! Download the EEA measurements of the background stations in every region.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use reqwest::Client;

use super::region_geometries;
use crate::{
    cli::{create_progress_bar, create_spinner},
    config::Config,
    download::maybe_download,
    eea::{
        api::{list_csv_urls, read_measurement_file, ExtractQuery},
        stations::{read_stations, region_stations, Station},
        Pollutant, StationMeasurement,
    },
    parquet,
};

pub async fn eea_download(config: &Config) -> Result<Vec<PathBuf>> {
    let eea = &config.eea;
    let client = Client::new();
    let geometries = region_geometries(&client, config).await?;

    let bar = create_spinner("Downloading station metadata...".to_string());
    let metadata = maybe_download(&client, &eea.metadata_url, &config.paths.eea)
        .await
        .context("Failed to download the EEA station metadata")?;
    let stations = read_stations(&metadata, &eea.station_type)
        .with_context(|| format!("Failed to read {}", metadata.display()))?;
    bar.finish_with_message(format!("{} {} stations", stations.len(), eea.station_type));

    let raw_folder = config.paths.eea.join("raw");
    let mut measurements = Vec::new();
    for geometry in &geometries {
        let region = &geometry.region.id;
        let in_region = region_stations(&stations, geometry);
        if in_region.is_empty() {
            warn!("No {} stations in {region}", eea.station_type);
            continue;
        }

        let found = download_region(&client, config, region, &in_region, &raw_folder)
            .await
            .with_context(|| format!("Failed to download EEA data of {region}"))?;
        info!("{region}: {} stations, {} measurements", in_region.len(), found.len());
        measurements.extend(found);
    }

    let file_path = config.paths.eea.join("eea-stations.parquet");
    parquet::save_measurements(&measurements, &file_path)
        .with_context(|| format!("Failed to write {}", file_path.display()))?;

    Ok(vec![file_path])
}

async fn download_region(
    client: &Client,
    config: &Config,
    region: &str,
    stations: &[&Station],
    raw_folder: &Path,
) -> Result<Vec<StationMeasurement>> {
    let pb = create_progress_bar(
        (stations.len() * Pollutant::ALL.len()) as u64,
        format!("Downloading {region}"),
    );
    let mut measurements = Vec::new();

    for station in stations {
        for pollutant in Pollutant::ALL {
            let query = ExtractQuery {
                pollutant,
                country_code: &station.country_code,
                station: &station.id,
                year_from: config.eea.first_year,
                year_to: config.eea.last_year,
            };
            for url in list_csv_urls(client, &config.eea.extract_url, &query).await? {
                let file = maybe_download(client, &url, raw_folder).await?;
                measurements.extend(read_measurement_file(&file, region)?);
            }
            pb.inc(1);
        }
    }

    pb.finish_with_message(format!("{region} downloaded"));
    Ok(measurements)
}
