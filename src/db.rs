use std::fs::File;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row;

use crate::config::DatabaseConfig;
use crate::error::{DataSourceError, Result};
use crate::models::{Dataset, Field, Kind, Record, Value};

const DEALERSHIP_OVERVIEW_SQL: &str = r#"
WITH dealership_employees AS (
  SELECT d.id AS dealership_id,
         d.name AS dealership_name,
         d.created_at,
         d.lead_pipeline,
         COUNT(DISTINCT e.id) AS total_employees
  FROM dealerships d
  LEFT JOIN employees e ON d.id = e.dealership_id
  GROUP BY d.id, d.name, d.created_at, d.lead_pipeline
),
dealership_consumption AS (
  SELECT d.id AS dealership_id,
         COUNT(DISTINCT ed.employee_hash) AS dose_views,
         COUNT(DISTINCT esv.id) AS story_views,
         COUNT(DISTINCT ejgd.id) AS guide_views,
         COUNT(DISTINCT ecav.id) AS capstone_activity_views
  FROM dealerships d
  LEFT JOIN employees e ON d.id = e.dealership_id
  LEFT JOIN employee_doses ed ON e.hash = ed.employee_hash
  LEFT JOIN employee_stories es ON e.hash = es.employee_hash
  LEFT JOIN employee_story_views esv ON es.id = esv.employee_story_id
  LEFT JOIN employee_journeys ej ON e.hash = ej.employee_hash
  LEFT JOIN employee_journey_guide_details ejgd ON ej.id = ejgd.employee_journey_id
  LEFT JOIN employee_journey_capstone_responses ejcr ON ej.id = ejcr.employee_journey_id
  LEFT JOIN employee_capstone_activity_views ecav
         ON ejcr.id = ecav.employee_journey_capstone_responses_id
  GROUP BY d.id
)
SELECT de.dealership_id, de.dealership_name, de.total_employees, de.lead_pipeline,
       de.created_at, dc.dose_views, dc.story_views, dc.guide_views,
       dc.capstone_activity_views, sps.title
FROM dealership_employees de
INNER JOIN dealership_consumption dc ON de.dealership_id = dc.dealership_id
INNER JOIN sales_pipeline_status sps ON de.lead_pipeline = sps.id
"#;

const PARTNER_EXPERIENCE_SQL: &str = r#"
SELECT dealership_id, dealership_name, region, lead_pipeline_status, created_at,
       total_users, mau, dau, management_score, consistency_score, activity_score,
       total_score, guide_completed, daily_completed, capstone_completed, guide_shared
FROM partner_experience_report
"#;

const EMPLOYEE_GROWTH_SQL: &str = r#"
SELECT px.dealership_id, px.dealership_name, px.region, px.total_users, px.mau, px.dau,
       e.created_at AS created_at, e.hash
FROM partner_experience_report px
JOIN employees e ON px.dealership_id = e.dealership_id
"#;

/// A read-only reporting query with an optional lower bound on its date column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    pub name: &'static str,
    pub sql: String,
    pub schema: Vec<Field>,
    pub since: Option<NaiveDate>,
}

impl Query {
    /// Dealership-level content consumption joined with the pipeline title.
    pub fn dealership_overview(since: Option<NaiveDate>) -> Self {
        Self::build(
            "dealership_overview",
            DEALERSHIP_OVERVIEW_SQL,
            "de.created_at",
            vec![
                Field::DealershipId,
                Field::DealershipName,
                Field::TotalEmployees,
                Field::LeadPipeline,
                Field::CreatedAt,
                Field::DoseViews,
                Field::StoryViews,
                Field::GuideViews,
                Field::CapstoneActivityViews,
                Field::Title,
            ],
            since,
        )
    }

    pub fn partner_experience(since: Option<NaiveDate>) -> Self {
        Self::build(
            "partner_experience",
            PARTNER_EXPERIENCE_SQL,
            "created_at",
            vec![
                Field::DealershipId,
                Field::DealershipName,
                Field::Region,
                Field::LeadPipelineStatus,
                Field::CreatedAt,
                Field::TotalUsers,
                Field::Mau,
                Field::Dau,
                Field::ManagementScore,
                Field::ConsistencyScore,
                Field::ActivityScore,
                Field::TotalScore,
                Field::GuideCompleted,
                Field::DailyCompleted,
                Field::CapstoneCompleted,
                Field::GuideShared,
            ],
            since,
        )
    }

    /// Partner report rows repeated per employee, dated by employee sign-up.
    pub fn employee_growth(since: Option<NaiveDate>) -> Self {
        Self::build(
            "employee_growth",
            EMPLOYEE_GROWTH_SQL,
            "e.created_at",
            vec![
                Field::DealershipId,
                Field::DealershipName,
                Field::Region,
                Field::TotalUsers,
                Field::Mau,
                Field::Dau,
                Field::CreatedAt,
                Field::Hash,
            ],
            since,
        )
    }

    fn build(
        name: &'static str,
        select: &str,
        date_column: &str,
        schema: Vec<Field>,
        since: Option<NaiveDate>,
    ) -> Self {
        let mut sql = select.trim().to_string();
        if since.is_some() {
            sql.push_str(&format!("\nWHERE {date_column} >= ?"));
        }
        Self {
            name,
            sql,
            schema,
            since,
        }
    }

    /// Bound parameters in placeholder order.
    pub fn params(&self) -> Vec<String> {
        self.since.iter().map(|date| date.to_string()).collect()
    }
}

/// Anything that can materialize a reporting query.
pub trait DataSource {
    fn fetch(&self, query: &Query) -> impl Future<Output = Result<Dataset>>;
}

pub struct MySqlSource {
    pool: MySqlPool,
}

impl MySqlSource {
    pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let options = config.connect_options()?;
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await
            .context("failed to connect to the reporting database")?;
        Ok(Self { pool })
    }
}

impl DataSource for MySqlSource {
    async fn fetch(&self, query: &Query) -> Result<Dataset> {
        let mut statement = sqlx::query(&query.sql);
        if let Some(since) = query.since {
            statement = statement.bind(since);
        }

        let rows = statement
            .fetch_all(&self.pool)
            .await
            .map_err(DataSourceError::from)?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(decode_row(row, &query.schema)?);
        }

        tracing::info!(query = query.name, rows = records.len(), "fetched dataset from database");
        Ok(Dataset::new(query.schema.clone(), records))
    }
}

fn decode_row(row: &MySqlRow, schema: &[Field]) -> std::result::Result<Record, DataSourceError> {
    let mut values = Vec::with_capacity(schema.len());
    for field in schema {
        values.push((*field, decode_value(row, *field)?));
    }
    Ok(Record::new(values))
}

fn decode_value(row: &MySqlRow, field: Field) -> std::result::Result<Value, DataSourceError> {
    let column = field.name();
    let decoded = match field.kind() {
        Kind::Text => row
            .try_get::<Option<String>, _>(column)
            .map(|value| value.map(Value::Text)),
        Kind::Integer => row
            .try_get::<Option<i64>, _>(column)
            .map(|value| value.map(Value::Integer))
            .or_else(|_| {
                row.try_get::<Option<u64>, _>(column)
                    .map(|value| value.map(|n| Value::Integer(n as i64)))
            }),
        Kind::Float => row
            .try_get::<Option<f64>, _>(column)
            .map(|value| value.map(Value::Float))
            .or_else(|_| {
                row.try_get::<Option<f32>, _>(column)
                    .map(|value| value.map(|n| Value::Float(f64::from(n))))
            })
            .or_else(|_| {
                row.try_get::<Option<i64>, _>(column)
                    .map(|value| value.map(|n| Value::Float(n as f64)))
            }),
        Kind::Timestamp => row
            .try_get::<Option<NaiveDateTime>, _>(column)
            .map(|value| value.map(Value::Timestamp))
            .or_else(|_| {
                row.try_get::<Option<DateTime<Utc>>, _>(column)
                    .map(|value| value.map(|stamp| Value::Timestamp(stamp.naive_utc())))
            })
            .or_else(|_| {
                row.try_get::<Option<NaiveDate>, _>(column).map(|value| {
                    value
                        .and_then(|date| date.and_hms_opt(0, 0, 0))
                        .map(Value::Timestamp)
                })
            }),
    };

    decoded
        .map(|value| value.unwrap_or(Value::Null))
        .map_err(|err| DataSourceError::Decode {
            column: column.to_string(),
            details: err.to_string(),
        })
}

/// Reads `<dir>/<query name>.csv` exports with a header row of field names.
pub struct CsvSource {
    dir: PathBuf,
}

impl CsvSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, query: &Query) -> PathBuf {
        self.dir.join(format!("{}.csv", query.name))
    }
}

impl DataSource for CsvSource {
    async fn fetch(&self, query: &Query) -> Result<Dataset> {
        let path = self.path_for(query);
        let dataset = read_csv(&path, &query.schema, query.since)?;
        tracing::info!(
            query = query.name,
            path = %path.display(),
            rows = dataset.len(),
            "loaded dataset from csv export"
        );
        Ok(dataset)
    }
}

fn read_csv(path: &Path, schema: &[Field], since: Option<NaiveDate>) -> Result<Dataset> {
    let file = File::open(path).map_err(|source| DataSourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::Reader::from_reader(file);
    let headers = reader.headers().map_err(DataSourceError::from)?.clone();

    let mut columns = Vec::with_capacity(schema.len());
    for field in schema {
        let index = headers
            .iter()
            .position(|header| header.trim() == field.name())
            .ok_or_else(|| DataSourceError::Decode {
                column: field.name().to_string(),
                details: format!("missing from csv header of {}", path.display()),
            })?;
        columns.push((*field, index));
    }

    let mut records = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let row = result.map_err(DataSourceError::from)?;
        let mut values = Vec::with_capacity(columns.len());
        for (field, index) in &columns {
            let raw = row.get(*index).unwrap_or("");
            let value = Value::parse(field.kind(), raw).map_err(|details| DataSourceError::Decode {
                column: field.name().to_string(),
                details: format!("row {}: {details}", line + 1),
            })?;
            values.push((*field, value));
        }
        let record = Record::new(values);

        if let Some(since) = since {
            let in_bound = record
                .created_at()
                .is_some_and(|stamp| stamp.date() >= since);
            if !in_bound {
                continue;
            }
        }
        records.push(record);
    }

    Ok(Dataset::new(schema.to_vec(), records))
}

/// The configured reporting store.
pub enum Source {
    MySql(MySqlSource),
    Csv(CsvSource),
}

impl DataSource for Source {
    async fn fetch(&self, query: &Query) -> Result<Dataset> {
        match self {
            Source::MySql(source) => source.fetch(query).await,
            Source::Csv(source) => source.fetch(query).await,
        }
    }
}
