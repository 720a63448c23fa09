//! Download the hourly ERA5 files of every region from the CDS.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use log::info;
use reqwest::Client;

use super::region_geometries;
use crate::{
    cli::create_progress_bar,
    config::{Config, Era5Config},
    era5::{
        cds::{CdsClient, Era5Request},
        raw_file_path, Era5Variable,
    },
};

pub async fn era5_download(config: &Config) -> Result<Vec<PathBuf>> {
    if config.cds.key.is_empty() {
        bail!("No CDS API key, set `key` in the [cds] section of the config");
    }

    let client = Client::new();
    let geometries = region_geometries(&client, config).await?;
    let cds = CdsClient::new(
        client,
        &config.cds.url,
        &config.cds.key,
        Duration::from_secs(config.cds.poll_interval_secs),
    );

    let mut requests = Vec::new();
    for geometry in &geometries {
        let area = geometry.area()?;
        requests.extend(pending_requests(
            &config.paths.era5,
            &geometry.region.id,
            area,
            &config.era5,
        ));
    }
    info!("{} monthly ERA5 files to download", requests.len());

    let pb = create_progress_bar(requests.len() as u64, "Downloading ERA5 files...".to_string());
    let mut files = Vec::with_capacity(requests.len());
    for (path, request) in requests {
        pb.set_message(path.display().to_string());
        cds.retrieve(&request, &path, Some(&pb))
            .await
            .with_context(|| format!("Failed to retrieve {}", path.display()))?;
        files.push(path);
        pb.inc(1);
    }
    pb.finish_with_message("ERA5 files downloaded");

    Ok(files)
}

/// Monthly requests of one region whose raw file does not exist yet.
fn pending_requests(
    era5_folder: &Path,
    region_id: &str,
    area: [f64; 4],
    era5: &Era5Config,
) -> Vec<(PathBuf, Era5Request)> {
    let mut requests = Vec::new();
    for year in era5.first_year..=era5.last_year {
        for month in 1..=12 {
            for variable in Era5Variable::ALL {
                let path = raw_file_path(era5_folder, variable, region_id, year, month);
                if path.exists() {
                    continue;
                }
                let request = Era5Request::month(variable, year, month, area, era5.grid_step);
                requests.push((path, request));
            }
        }
    }
    requests
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn should_skip_files_already_downloaded() {
        let dir = TempDir::new().unwrap();
        let era5 = Era5Config {
            first_year: 2016,
            last_year: 2016,
            ..Era5Config::default()
        };
        let existing = raw_file_path(dir.path(), Era5Variable::Temperature, "AT13", 2016, 1);
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, b"").unwrap();

        let requests = pending_requests(dir.path(), "AT13", [48.4, 16.1, 48.1, 16.6], &era5);

        assert_eq!(requests.len(), 12 * 3 - 1);
        assert!(requests.iter().all(|(path, _)| path != &existing));
        let (path, request) = &requests[0];
        assert_eq!(path, &raw_file_path(dir.path(), Era5Variable::Precipitation, "AT13", 2016, 1));
        assert_eq!(request.variable, vec!["total_precipitation".to_string()]);
        assert_eq!(request.grid, [0.1, 0.1]);
    }
}
