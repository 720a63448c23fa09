//! Error type shared by the readers, writers and remote clients.

use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("request to {url} failed with status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("CDS job {job_id} ended with status `{status}`")]
    CdsJob { job_id: String, status: String },

    #[error("unexpected CDS response: {reason}")]
    CdsResponse { reason: String },

    #[error("netcdf error in {}: {reason}", path.display())]
    Netcdf { path: PathBuf, reason: String },

    #[error("population grid error in {}: {reason}", path.display())]
    Population { path: PathBuf, reason: String },

    #[error("SPSS file error: {reason}")]
    Spss { reason: String },

    #[error("region `{region}` not found in {}", path.display())]
    RegionNotFound { region: String, path: PathBuf },

    #[error("invalid geometry for region `{region}`: {reason}")]
    Geometry { region: String, reason: String },

    #[error("column `{column}` missing or of the wrong type in {}", path.display())]
    Column { column: String, path: PathBuf },

    #[error("invalid value `{value}` in column `{column}`")]
    InvalidValue { column: String, value: String },

    #[error("unknown time zone `{0}`")]
    TimeZone(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Geojson(#[from] geojson::Error),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),
}

impl Error {
    pub fn spss(reason: impl Into<String>) -> Self {
        Error::Spss {
            reason: reason.into(),
        }
    }
}

// -- Tests -------------------------------------------------------------------
