use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::error::{DashboardError, Result};

/// Storage kind of a reporting column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Text,
    Integer,
    Float,
    Timestamp,
}

impl Kind {
    pub fn label(self) -> &'static str {
        match self {
            Kind::Text => "text",
            Kind::Integer => "integer",
            Kind::Float => "float",
            Kind::Timestamp => "timestamp",
        }
    }
}

/// Every column the reporting queries can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    DealershipId,
    DealershipName,
    Region,
    Title,
    LeadPipeline,
    LeadPipelineStatus,
    Hash,
    CreatedAt,
    TotalUsers,
    Mau,
    Dau,
    TotalEmployees,
    DoseViews,
    StoryViews,
    GuideViews,
    CapstoneActivityViews,
    Lu,
    GuideCompleted,
    DailyCompleted,
    CapstoneCompleted,
    GuideShared,
    ManagementScore,
    ConsistencyScore,
    ActivityScore,
    TotalScore,
}

impl Field {
    pub const ALL: [Field; 25] = [
        Field::DealershipId,
        Field::DealershipName,
        Field::Region,
        Field::Title,
        Field::LeadPipeline,
        Field::LeadPipelineStatus,
        Field::Hash,
        Field::CreatedAt,
        Field::TotalUsers,
        Field::Mau,
        Field::Dau,
        Field::TotalEmployees,
        Field::DoseViews,
        Field::StoryViews,
        Field::GuideViews,
        Field::CapstoneActivityViews,
        Field::Lu,
        Field::GuideCompleted,
        Field::DailyCompleted,
        Field::CapstoneCompleted,
        Field::GuideShared,
        Field::ManagementScore,
        Field::ConsistencyScore,
        Field::ActivityScore,
        Field::TotalScore,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::DealershipId => "dealership_id",
            Field::DealershipName => "dealership_name",
            Field::Region => "region",
            Field::Title => "title",
            Field::LeadPipeline => "lead_pipeline",
            Field::LeadPipelineStatus => "lead_pipeline_status",
            Field::Hash => "hash",
            Field::CreatedAt => "created_at",
            Field::TotalUsers => "total_users",
            Field::Mau => "mau",
            Field::Dau => "dau",
            Field::TotalEmployees => "total_employees",
            Field::DoseViews => "dose_views",
            Field::StoryViews => "story_views",
            Field::GuideViews => "guide_views",
            Field::CapstoneActivityViews => "capstone_activity_views",
            Field::Lu => "lu",
            Field::GuideCompleted => "guide_completed",
            Field::DailyCompleted => "daily_completed",
            Field::CapstoneCompleted => "capstone_completed",
            Field::GuideShared => "guide_shared",
            Field::ManagementScore => "management_score",
            Field::ConsistencyScore => "consistency_score",
            Field::ActivityScore => "activity_score",
            Field::TotalScore => "total_score",
        }
    }

    pub fn kind(self) -> Kind {
        match self {
            Field::DealershipName
            | Field::Region
            | Field::Title
            | Field::LeadPipelineStatus
            | Field::Hash => Kind::Text,
            Field::CreatedAt => Kind::Timestamp,
            Field::ManagementScore
            | Field::ConsistencyScore
            | Field::ActivityScore
            | Field::TotalScore => Kind::Float,
            _ => Kind::Integer,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self.kind(), Kind::Integer | Kind::Float)
    }

    /// Human label used as a Markdown heading or table column.
    pub fn label(self) -> String {
        let name = self.name().replace('_', " ");
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Field {
    type Err = DashboardError;

    fn from_str(name: &str) -> Result<Self> {
        Field::ALL
            .iter()
            .copied()
            .find(|field| field.name() == name)
            .ok_or_else(|| DashboardError::schema(name, "unknown field"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Integer(i64),
    Float(f64),
    Timestamp(NaiveDateTime),
    Null,
}

static NULL: Value = Value::Null;

impl Value {
    /// Parses a raw export cell. Empty cells are NULL.
    pub fn parse(kind: Kind, raw: &str) -> std::result::Result<Value, String> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
            return Ok(Value::Null);
        }

        match kind {
            Kind::Text => Ok(Value::Text(raw.to_string())),
            Kind::Integer => raw
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|err| format!("`{raw}` is not an integer: {err}")),
            Kind::Float => raw
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|err| format!("`{raw}` is not a number: {err}")),
            Kind::Timestamp => parse_timestamp(raw).map(Value::Timestamp),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Key used for grouping and equality filtering.
    pub fn group_key(&self) -> Option<String> {
        match self {
            Value::Text(value) => Some(value.clone()),
            Value::Integer(value) => Some(value.to_string()),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(value) => f.write_str(value),
            Value::Integer(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value:.2}"),
            Value::Timestamp(value) => write!(f, "{}", value.format("%Y-%m-%d %H:%M:%S")),
            Value::Null => Ok(()),
        }
    }
}

fn parse_timestamp(raw: &str) -> std::result::Result<NaiveDateTime, String> {
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(value) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(value);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| format!("`{raw}` is not a timestamp"))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    values: BTreeMap<Field, Value>,
}

impl Record {
    pub fn new(values: impl IntoIterator<Item = (Field, Value)>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    /// Missing fields read as NULL.
    pub fn get(&self, field: Field) -> &Value {
        self.values.get(&field).unwrap_or(&NULL)
    }

    pub fn created_at(&self) -> Option<NaiveDateTime> {
        self.get(Field::CreatedAt).as_timestamp()
    }

    fn with(mut self, field: Field, value: Value) -> Self {
        self.values.insert(field, value);
        self
    }
}

/// An ordered, immutable result set sharing one schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    schema: Vec<Field>,
    records: Vec<Record>,
}

impl Dataset {
    pub fn new(schema: Vec<Field>, records: Vec<Record>) -> Self {
        Self { schema, records }
    }

    pub fn schema(&self) -> &[Field] {
        &self.schema
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_field(&self, field: Field) -> bool {
        self.schema.contains(&field)
    }

    pub fn require(&self, field: Field) -> Result<()> {
        if self.has_field(field) {
            Ok(())
        } else {
            Err(DashboardError::schema(
                field.name(),
                "not present in the dataset schema",
            ))
        }
    }

    pub fn require_numeric(&self, field: Field) -> Result<()> {
        self.require(field)?;
        if field.is_numeric() {
            Ok(())
        } else {
            Err(DashboardError::schema(
                field.name(),
                format!("is {}, expected a numeric column", field.kind().label()),
            ))
        }
    }

    pub fn require_groupable(&self, field: Field) -> Result<()> {
        self.require(field)?;
        match field.kind() {
            Kind::Text | Kind::Integer => Ok(()),
            other => Err(DashboardError::schema(
                field.name(),
                format!("cannot group by a {} column", other.label()),
            )),
        }
    }

    /// Same schema, different rows.
    pub fn with_records(&self, records: Vec<Record>) -> Dataset {
        Dataset::new(self.schema.clone(), records)
    }

    /// Appends `target` as the row-wise sum of `parts`; NULL when any part is NULL.
    pub fn derive_sum(&self, target: Field, parts: &[Field]) -> Result<Dataset> {
        for part in parts {
            self.require_numeric(*part)?;
        }
        if !target.is_numeric() {
            return Err(DashboardError::schema(
                target.name(),
                "derived sums need a numeric target",
            ));
        }

        let records = self
            .records
            .iter()
            .map(|record| {
                let total = parts
                    .iter()
                    .map(|part| record.get(*part).as_f64())
                    .sum::<Option<f64>>();
                let value = match (total, target.kind()) {
                    (None, _) => Value::Null,
                    (Some(total), Kind::Integer) => Value::Integer(total as i64),
                    (Some(total), _) => Value::Float(total),
                };
                record.clone().with(target, value)
            })
            .collect();

        let mut schema = self.schema.clone();
        if !schema.contains(&target) {
            schema.push(target);
        }
        Ok(Dataset::new(schema, records))
    }

    pub fn page(&self, page: usize, page_size: usize) -> Page {
        Page {
            page: page.max(1),
            page_size,
            columns: self.schema.clone(),
            total_records: self.records.len(),
            rows: page_slice(&self.records, page, page_size).to_vec(),
        }
    }
}

/// One page of raw records for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub page: usize,
    pub page_size: usize,
    pub columns: Vec<Field>,
    pub total_records: usize,
    pub rows: Vec<Record>,
}

/// 1-based page of `items`, clamped to the slice bounds. Page 0 reads as page 1.
pub fn page_slice<T>(items: &[T], page: usize, page_size: usize) -> &[T] {
    let start = (page.max(1) - 1).saturating_mul(page_size).min(items.len());
    let end = start.saturating_add(page_size).min(items.len());
    &items[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(count: i64) -> Dataset {
        let records = (0..count)
            .map(|n| Record::new([(Field::TotalUsers, Value::Integer(n))]))
            .collect();
        Dataset::new(vec![Field::TotalUsers], records)
    }

    #[test]
    fn field_names_round_trip() {
        for field in Field::ALL {
            assert_eq!(field.name().parse::<Field>().unwrap(), field);
        }
    }

    #[test]
    fn unknown_field_is_schema_error() {
        let err = "revenue".parse::<Field>().unwrap_err();
        assert!(matches!(err, DashboardError::Schema { ref field, .. } if field == "revenue"));
    }

    #[test]
    fn labels_are_capitalized() {
        assert_eq!(Field::ManagementScore.label(), "Management score");
        assert_eq!(Field::Lu.label(), "Lu");
    }

    #[test]
    fn parses_export_cells() {
        assert_eq!(Value::parse(Kind::Integer, "42").unwrap(), Value::Integer(42));
        assert_eq!(Value::parse(Kind::Float, "3.5").unwrap(), Value::Float(3.5));
        assert_eq!(Value::parse(Kind::Text, "").unwrap(), Value::Null);
        assert_eq!(Value::parse(Kind::Integer, "NULL").unwrap(), Value::Null);
        assert!(Value::parse(Kind::Integer, "forty").is_err());

        let stamp = Value::parse(Kind::Timestamp, "2024-01-15 08:30:00").unwrap();
        assert_eq!(stamp.as_timestamp().unwrap().to_string(), "2024-01-15 08:30:00");
        let fractional = Value::parse(Kind::Timestamp, "2024-01-15T08:30:00.250").unwrap();
        assert!(fractional.as_timestamp().is_some());
        let date_only = Value::parse(Kind::Timestamp, "2024-01-15").unwrap();
        assert_eq!(date_only.as_timestamp().unwrap().to_string(), "2024-01-15 00:00:00");
    }

    #[test]
    fn group_keys_cover_text_and_integers() {
        assert_eq!(Value::Text("East".into()).group_key().as_deref(), Some("East"));
        assert_eq!(Value::Integer(7).group_key().as_deref(), Some("7"));
        assert_eq!(Value::Float(1.0).group_key(), None);
        assert_eq!(Value::Null.group_key(), None);
    }

    #[test]
    fn missing_fields_read_as_null() {
        let record = Record::new([(Field::Mau, Value::Integer(3))]);
        assert!(record.get(Field::Dau).is_null());
        assert_eq!(record.created_at(), None);
    }

    #[test]
    fn schema_checks_reject_wrong_kinds() {
        let dataset = Dataset::new(vec![Field::Region, Field::ManagementScore], vec![]);
        assert!(dataset.require_numeric(Field::ManagementScore).is_ok());
        assert!(dataset.require_numeric(Field::Region).is_err());
        assert!(dataset.require_groupable(Field::ManagementScore).is_err());
        assert!(dataset.require(Field::Mau).is_err());
    }

    #[test]
    fn derive_sum_adds_column_and_propagates_null() {
        let dataset = Dataset::new(
            vec![Field::DoseViews, Field::StoryViews],
            vec![
                Record::new([
                    (Field::DoseViews, Value::Integer(2)),
                    (Field::StoryViews, Value::Integer(3)),
                ]),
                Record::new([
                    (Field::DoseViews, Value::Integer(2)),
                    (Field::StoryViews, Value::Null),
                ]),
            ],
        );

        let derived = dataset
            .derive_sum(Field::Lu, &[Field::DoseViews, Field::StoryViews])
            .unwrap();
        assert!(derived.has_field(Field::Lu));
        assert_eq!(derived.records()[0].get(Field::Lu), &Value::Integer(5));
        assert!(derived.records()[1].get(Field::Lu).is_null());
    }

    #[test]
    fn third_page_of_twenty_five_has_five_rows() {
        let dataset = numbered(25);
        let page = dataset.page(3, 10);
        assert_eq!(page.rows.len(), 5);
        assert_eq!(page.rows[0].get(Field::TotalUsers), &Value::Integer(20));
        assert_eq!(page.rows[4].get(Field::TotalUsers), &Value::Integer(24));
        assert_eq!(page.total_records, 25);
    }

    #[test]
    fn pages_past_the_end_are_empty() {
        let dataset = numbered(25);
        assert!(dataset.page(10, 10).rows.is_empty());
        assert!(page_slice(&[1, 2, 3], usize::MAX, 10).is_empty());
    }

    #[test]
    fn page_zero_reads_as_first_page() {
        let items: Vec<u32> = (0..15).collect();
        assert_eq!(page_slice(&items, 0, 10), page_slice(&items, 1, 10));
        assert!(page_slice(&items, 1, 0).is_empty());
    }
}
