use std::collections::{BTreeMap, HashSet};
use std::convert::Infallible;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Serialize, Serializer};

use crate::error::{DashboardError, Result};
use crate::models::{Dataset, Field, Record};

/// Dropdown sentinel meaning "no constraint on this field".
pub const ALL: &str = "All";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Only(String),
}

impl Selection {
    fn matches(&self, record: &Record, field: Field) -> bool {
        match self {
            Selection::All => true,
            Selection::Only(expected) => {
                record.get(field).group_key().as_deref() == Some(expected.as_str())
            }
        }
    }
}

impl Serialize for Selection {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Selection::All => serializer.serialize_str(ALL),
            Selection::Only(value) => serializer.serialize_str(value),
        }
    }
}

impl FromStr for Selection {
    type Err = Infallible;

    fn from_str(raw: &str) -> std::result::Result<Self, Infallible> {
        Ok(if raw == ALL {
            Selection::All
        } else {
            Selection::Only(raw.to_string())
        })
    }
}

impl From<Option<String>> for Selection {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(raw) => raw.parse().unwrap_or(Selection::All),
            None => Selection::All,
        }
    }
}

impl From<&str> for Selection {
    fn from(raw: &str) -> Self {
        raw.parse().unwrap_or(Selection::All)
    }
}

/// Inclusive calendar range over `created_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<()> {
        if self.start > self.end {
            return Err(DashboardError::InvalidRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Earliest to latest `created_at` date in the dataset.
    pub fn spanning(dataset: &Dataset) -> Option<Self> {
        let mut dates = dataset
            .records()
            .iter()
            .filter_map(|record| record.created_at().map(|stamp| stamp.date()));
        let first = dates.next()?;
        let (start, end) = dates.fold((first, first), |(start, end), date| {
            (start.min(date), end.max(date))
        });
        Some(Self { start, end })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterSpec {
    pub date_range: DateRange,
    pub equality_filters: BTreeMap<Field, Selection>,
}

impl FilterSpec {
    pub fn new(date_range: DateRange) -> Self {
        Self {
            date_range,
            equality_filters: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: Field, selection: impl Into<Selection>) -> Self {
        self.equality_filters.insert(field, selection.into());
        self
    }

    fn active_filters(&self) -> impl Iterator<Item = (Field, &Selection)> {
        self.equality_filters
            .iter()
            .filter(|(_, selection)| **selection != Selection::All)
            .map(|(field, selection)| (*field, selection))
    }
}

/// Keeps the records inside the date range that satisfy every non-`All` selection.
pub fn apply(dataset: &Dataset, spec: &FilterSpec) -> Result<Dataset> {
    spec.date_range.validate()?;
    dataset.require(Field::CreatedAt)?;
    for field in spec.equality_filters.keys() {
        dataset.require_groupable(*field)?;
    }

    let active: Vec<(Field, &Selection)> = spec.active_filters().collect();
    let records: Vec<Record> = dataset
        .records()
        .iter()
        .filter(|record| {
            record
                .created_at()
                .is_some_and(|stamp| spec.date_range.contains(stamp.date()))
        })
        .filter(|record| {
            active
                .iter()
                .all(|(field, selection)| selection.matches(record, *field))
        })
        .cloned()
        .collect();

    tracing::debug!(
        input = dataset.len(),
        output = records.len(),
        filters = active.len(),
        "applied filter spec"
    );
    Ok(dataset.with_records(records))
}

/// `All` followed by the distinct values of `field` in first-seen order.
pub fn filter_options(dataset: &Dataset, field: Field) -> Result<Vec<String>> {
    dataset.require_groupable(field)?;

    let mut seen = HashSet::new();
    let mut options = vec![ALL.to_string()];
    for record in dataset.records() {
        if let Some(key) = record.get(field).group_key() {
            if seen.insert(key.clone()) {
                options.push(key);
            }
        }
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;
    use chrono::NaiveDateTime;
    use proptest::prelude::*;

    fn date(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
    }

    fn stamp(raw: &str) -> NaiveDateTime {
        date(raw).and_hms_opt(12, 0, 0).unwrap()
    }

    fn record(name: &str, region: &str, created: &str) -> Record {
        Record::new([
            (Field::DealershipName, Value::Text(name.to_string())),
            (Field::Region, Value::Text(region.to_string())),
            (Field::CreatedAt, Value::Timestamp(stamp(created))),
        ])
    }

    fn dataset(records: Vec<Record>) -> Dataset {
        Dataset::new(
            vec![Field::DealershipName, Field::Region, Field::CreatedAt],
            records,
        )
    }

    fn january() -> DateRange {
        DateRange::new(date("2024-01-01"), date("2024-01-31")).unwrap()
    }

    #[test]
    fn january_east_keeps_two_of_five_in_order() {
        let data = dataset(vec![
            record("Alpha", "East", "2024-01-05"),
            record("Bravo", "West", "2024-01-06"),
            record("Charlie", "East", "2024-02-01"),
            record("Delta", "East", "2024-01-31"),
            record("Echo", "North", "2023-12-31"),
        ]);
        let spec = FilterSpec::new(january()).with(Field::Region, "East");

        let filtered = apply(&data, &spec).unwrap();
        let names: Vec<String> = filtered
            .records()
            .iter()
            .filter_map(|r| r.get(Field::DealershipName).group_key())
            .collect();
        assert_eq!(names, vec!["Alpha", "Delta"]);
    }

    #[test]
    fn all_selection_places_no_constraint() {
        let data = dataset(vec![
            record("Alpha", "East", "2024-01-05"),
            record("Bravo", "West", "2024-01-06"),
        ]);
        let spec = FilterSpec::new(january()).with(Field::Region, ALL);
        assert_eq!(apply(&data, &spec).unwrap().len(), 2);
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(matches!(
            DateRange::new(date("2024-02-01"), date("2024-01-01")),
            Err(DashboardError::InvalidRange { .. })
        ));

        let spec = FilterSpec::new(DateRange {
            start: date("2024-02-01"),
            end: date("2024-01-01"),
        });
        let err = apply(&dataset(vec![]), &spec).unwrap_err();
        assert!(matches!(err, DashboardError::InvalidRange { .. }));
    }

    #[test]
    fn filter_on_missing_field_is_schema_error() {
        let data = dataset(vec![record("Alpha", "East", "2024-01-05")]);
        let spec = FilterSpec::new(january()).with(Field::Title, "Manager");
        assert!(matches!(
            apply(&data, &spec),
            Err(DashboardError::Schema { .. })
        ));
    }

    #[test]
    fn empty_input_gives_empty_output() {
        let spec = FilterSpec::new(january()).with(Field::Region, "East");
        assert!(apply(&dataset(vec![]), &spec).unwrap().is_empty());
    }

    #[test]
    fn null_timestamps_never_match() {
        let data = dataset(vec![Record::new([
            (Field::DealershipName, Value::Text("Alpha".into())),
            (Field::Region, Value::Text("East".into())),
            (Field::CreatedAt, Value::Null),
        ])]);
        assert!(apply(&data, &FilterSpec::new(january())).unwrap().is_empty());
    }

    #[test]
    fn integer_fields_filter_by_decimal_text() {
        let data = Dataset::new(
            vec![Field::LeadPipeline, Field::CreatedAt],
            vec![
                Record::new([
                    (Field::LeadPipeline, Value::Integer(3)),
                    (Field::CreatedAt, Value::Timestamp(stamp("2024-01-02"))),
                ]),
                Record::new([
                    (Field::LeadPipeline, Value::Integer(4)),
                    (Field::CreatedAt, Value::Timestamp(stamp("2024-01-02"))),
                ]),
            ],
        );
        let spec = FilterSpec::new(january()).with(Field::LeadPipeline, "4");
        assert_eq!(apply(&data, &spec).unwrap().len(), 1);
    }

    #[test]
    fn spanning_covers_min_and_max_dates() {
        let data = dataset(vec![
            record("Alpha", "East", "2024-03-05"),
            record("Bravo", "West", "2024-01-06"),
            record("Charlie", "East", "2024-02-01"),
        ]);
        let range = DateRange::spanning(&data).unwrap();
        assert_eq!(range.start, date("2024-01-06"));
        assert_eq!(range.end, date("2024-03-05"));
        assert_eq!(DateRange::spanning(&dataset(vec![])), None);
    }

    #[test]
    fn options_start_with_all_in_first_seen_order() {
        let data = dataset(vec![
            record("Alpha", "West", "2024-01-05"),
            record("Bravo", "East", "2024-01-06"),
            record("Charlie", "West", "2024-01-07"),
        ]);
        assert_eq!(
            filter_options(&data, Field::Region).unwrap(),
            vec!["All", "West", "East"]
        );
        assert!(filter_options(&data, Field::CreatedAt).is_err());
    }

    #[test]
    fn selection_parses_sentinel() {
        assert_eq!("All".parse::<Selection>().unwrap(), Selection::All);
        assert_eq!(Selection::from(None::<String>), Selection::All);
        assert_eq!(
            Selection::from(Some("East".to_string())),
            Selection::Only("East".into())
        );
    }

    #[test]
    fn json_keeps_the_all_sentinel() {
        let spec = FilterSpec::new(january())
            .with(Field::Region, ALL)
            .with(Field::DealershipName, "Alpha");
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["equality_filters"]["region"], "All");
        assert_eq!(json["equality_filters"]["dealership_name"], "Alpha");
    }

    #[test]
    fn filter_on_ungroupable_field_is_schema_error() {
        let data = Dataset::new(
            vec![Field::ManagementScore, Field::CreatedAt],
            vec![Record::new([
                (Field::ManagementScore, Value::Float(4.5)),
                (Field::CreatedAt, Value::Timestamp(stamp("2024-01-02"))),
            ])],
        );
        let spec = FilterSpec::new(january()).with(Field::ManagementScore, "4.5");
        assert!(matches!(
            apply(&data, &spec),
            Err(DashboardError::Schema { .. })
        ));

        let by_timestamp = FilterSpec::new(january()).with(Field::CreatedAt, ALL);
        assert!(matches!(
            apply(&data, &by_timestamp),
            Err(DashboardError::Schema { .. })
        ));
    }

    fn arb_record() -> impl Strategy<Value = Record> {
        (
            prop::sample::select(vec!["Alpha", "Bravo", "Charlie"]),
            prop::sample::select(vec!["East", "West"]),
            0u32..90,
        )
            .prop_map(|(name, region, offset)| {
                let created = date("2024-01-01") + chrono::Duration::days(i64::from(offset));
                Record::new([
                    (Field::DealershipName, Value::Text(name.to_string())),
                    (Field::Region, Value::Text(region.to_string())),
                    (
                        Field::CreatedAt,
                        Value::Timestamp(created.and_hms_opt(9, 0, 0).unwrap()),
                    ),
                ])
            })
    }

    fn arb_spec() -> impl Strategy<Value = FilterSpec> {
        (
            0u32..90,
            0u32..90,
            prop::sample::select(vec!["All", "East", "West"]),
            prop::sample::select(vec!["All", "Alpha", "Bravo"]),
        )
            .prop_map(|(a, b, region, name)| {
                let start = date("2024-01-01") + chrono::Duration::days(i64::from(a.min(b)));
                let end = date("2024-01-01") + chrono::Duration::days(i64::from(a.max(b)));
                FilterSpec::new(DateRange { start, end })
                    .with(Field::Region, region)
                    .with(Field::DealershipName, name)
            })
    }

    proptest! {
        #[test]
        fn filtered_output_is_an_ordered_subset(
            records in prop::collection::vec(arb_record(), 0..40),
            spec in arb_spec(),
        ) {
            let data = dataset(records);
            let filtered = apply(&data, &spec).unwrap();

            let mut cursor = data.records().iter();
            for kept in filtered.records() {
                prop_assert!(cursor.any(|original| original == kept));
            }
        }

        #[test]
        fn filtering_is_idempotent(
            records in prop::collection::vec(arb_record(), 0..40),
            spec in arb_spec(),
        ) {
            let once = apply(&dataset(records), &spec).unwrap();
            let twice = apply(&once, &spec).unwrap();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn unconstrained_spec_over_full_span_is_identity(
            records in prop::collection::vec(arb_record(), 1..40),
        ) {
            let data = dataset(records);
            let range = DateRange::spanning(&data).unwrap();
            let spec = FilterSpec::new(range)
                .with(Field::Region, ALL)
                .with(Field::DealershipName, ALL);
            prop_assert_eq!(apply(&data, &spec).unwrap(), data);
        }
    }
}
