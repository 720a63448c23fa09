//! Merge the prepared environmental tables with every ESS survey file.

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};

use super::make_output_file_names;
use crate::{
    cli::create_spinner,
    config::Config,
    merge::{self, output_stem, MergeReport},
    parquet,
    spss::{read_sav, write_sav, WriteOptions},
};

pub async fn merge(config: &Config) -> Result<Vec<PathBuf>> {
    let eea_file = config.paths.eea.join("eea-regions.parquet");
    let era5_file = config.paths.era5.join("era5-regions.parquet");
    let eea = parquet::load_table(&eea_file).with_context(|| {
        format!("Failed to read {}, run eea-prepare first", eea_file.display())
    })?;
    let era5 = parquet::load_table(&era5_file).with_context(|| {
        format!("Failed to read {}, run era5-prepare first", era5_file.display())
    })?;

    let output = &config.paths.output;
    fs::create_dir_all(output).with_context(|| format!("Failed to create {}", output.display()))?;

    let mut files = Vec::new();
    for survey_path in &config.paths.ess_files {
        let bar = create_spinner(format!("Merging {}...", survey_path.display()));
        let survey = read_sav(survey_path)
            .with_context(|| format!("Failed to read {}", survey_path.display()))?;
        let (merged, report) = merge::merge(survey_path, &survey, &eea, &era5)
            .with_context(|| format!("Failed to merge {}", survey_path.display()))?;
        bar.finish_with_message(format!("{} merged", survey_path.display()));
        log_report(&output_stem(survey_path), &report);

        let (parquet_path, sav_path) = make_output_file_names(output, &output_stem(survey_path));
        parquet::save_dataset(&merged, &parquet_path)
            .with_context(|| format!("Failed to write {}", parquet_path.display()))?;
        write_sav(&sav_path, &merged, WriteOptions::default())
            .with_context(|| format!("Failed to write {}", sav_path.display()))?;
        files.extend([parquet_path, sav_path]);
    }

    Ok(files)
}

fn log_report(name: &str, report: &MergeReport) {
    info!("{name}: {} respondents", report.respondents);
    if report.without_date > 0 {
        warn!("{name}: {} respondents without an interview date", report.without_date);
    }
    for (region, gap) in report.regions_with_gaps() {
        warn!(
            "{name}: {region} has {} respondents, {} without EEA data, {} without ERA5 data",
            gap.respondents, gap.without_eea, gap.without_era5
        );
    }
}
