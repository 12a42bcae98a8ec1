use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DashboardError>;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("invalid date range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("schema error for field `{field}`: {details}")]
    Schema { field: String, details: String },

    #[error(transparent)]
    DataSource(#[from] DataSourceError),
}

impl DashboardError {
    pub fn schema(field: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Schema {
            field: field.into(),
            details: details.into(),
        }
    }
}

/// Failures of the reporting store or the offline CSV export.
#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("database query failed: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("csv read failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("io failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not decode column `{column}`: {details}")]
    Decode { column: String, details: String },
}
