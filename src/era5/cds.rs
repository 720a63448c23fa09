//! Client for the Copernicus Climate Data Store retrieve API.

use std::{path::Path, time::Duration};

use indicatif::ProgressBar;
use log::{debug, info};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use super::{Era5Variable, DATASET};
use crate::{
    download::download_file,
    error::{Error, Result},
};

/// Request for one variable over one month of hourly ERA5 data.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Era5Request {
    pub product_type: Vec<String>,
    pub variable: Vec<String>,
    pub year: Vec<String>,
    pub month: Vec<String>,
    pub day: Vec<String>,
    pub time: Vec<String>,
    /// `[north, west, south, east]`
    pub area: [f64; 4],
    pub grid: [f64; 2],
    pub data_format: String,
    pub download_format: String,
}

impl Era5Request {
    pub fn month(variable: Era5Variable, year: i32, month: u32, area: [f64; 4], step: f64) -> Self {
        Era5Request {
            product_type: vec!["reanalysis".to_string()],
            variable: vec![variable.cds_name().to_string()],
            year: vec![year.to_string()],
            month: vec![format!("{month:02}")],
            day: (1..=31).map(|d| format!("{d:02}")).collect(),
            time: (0..24).map(|h| format!("{h:02}:00")).collect(),
            area,
            grid: [step, step],
            data_format: "netcdf".to_string(),
            download_format: "unarchived".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Execute<'a> {
    inputs: &'a Era5Request,
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    #[serde(rename = "jobID", default)]
    job_id: Option<String>,
    status: String,
}

#[derive(Debug, Deserialize)]
struct JobResults {
    asset: Asset,
}

#[derive(Debug, Deserialize)]
struct Asset {
    value: AssetValue,
}

#[derive(Debug, Deserialize)]
struct AssetValue {
    href: String,
}

pub struct CdsClient {
    client: Client,
    url: String,
    key: String,
    poll_interval: Duration,
}

impl CdsClient {
    pub fn new(client: Client, url: &str, key: &str, poll_interval: Duration) -> Self {
        CdsClient {
            client,
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            poll_interval,
        }
    }

    /// Submits `request`, waits for the job to finish and saves the result at `target`.
    pub async fn retrieve(
        &self,
        request: &Era5Request,
        target: &Path,
        progress_bar: Option<&ProgressBar>,
    ) -> Result<()> {
        let job_id = self.submit(request).await?;
        info!("CDS job {job_id} submitted for {}", target.display());

        self.wait(&job_id, progress_bar).await?;
        let href = self.result_href(&job_id).await?;

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        download_file(&self.client, &href, target, None).await
    }

    async fn submit(&self, request: &Era5Request) -> Result<String> {
        let url = format!("{}/retrieve/v1/processes/{DATASET}/execution", self.url);
        let response = self
            .client
            .post(&url)
            .header("PRIVATE-TOKEN", &self.key)
            .json(&Execute { inputs: request })
            .send()
            .await?;
        let status: JobStatus = check(response, &url).await?.json().await?;

        status.job_id.ok_or_else(|| Error::CdsResponse {
            reason: "submission response has no jobID".to_string(),
        })
    }

    async fn wait(&self, job_id: &str, progress_bar: Option<&ProgressBar>) -> Result<()> {
        let url = format!("{}/retrieve/v1/jobs/{job_id}", self.url);
        loop {
            let response = self
                .client
                .get(&url)
                .header("PRIVATE-TOKEN", &self.key)
                .send()
                .await?;
            let status: JobStatus = check(response, &url).await?.json().await?;
            debug!("CDS job {job_id}: {}", status.status);
            if let Some(pb) = progress_bar {
                pb.set_message(format!("CDS job {}", status.status));
            }

            match status.status.as_str() {
                "successful" => return Ok(()),
                "accepted" | "running" => tokio::time::sleep(self.poll_interval).await,
                other => {
                    return Err(Error::CdsJob {
                        job_id: job_id.to_string(),
                        status: other.to_string(),
                    })
                }
            }
        }
    }

    async fn result_href(&self, job_id: &str) -> Result<String> {
        let url = format!("{}/retrieve/v1/jobs/{job_id}/results", self.url);
        let response = self
            .client
            .get(&url)
            .header("PRIVATE-TOKEN", &self.key)
            .send()
            .await?;
        let results: JobResults = check(response, &url).await?.json().await?;
        Ok(results.asset.value.href)
    }
}

async fn check(response: Response, url: &str) -> Result<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(Error::HttpStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        })
    }
}

// -- Tests -------------------------------------------------------------------
