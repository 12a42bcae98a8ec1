//! Summary views derived from a filtered dataset.
//!
//! Every grouped view is keyed alphabetically by group key, so truncation and
//! tie-breaking are reproducible across runs.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::Result;
use crate::models::{Dataset, Field, Record};

pub type Totals = BTreeMap<Field, f64>;
pub type GroupedView = BTreeMap<String, BTreeMap<Field, f64>>;
pub type GrowthView = BTreeMap<String, Vec<GrowthPoint>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyPoint {
    pub month: String,
    pub values: BTreeMap<Field, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedGroup {
    pub key: String,
    pub value: f64,
}

/// Percent change against the previous month the group has data for.
/// `None` marks the first month and months following a zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrowthPoint {
    pub month_index: usize,
    pub month: String,
    pub values: BTreeMap<Field, Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Distribution {
    pub count: usize,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub fields: Vec<Field>,
    pub coefficients: Vec<Vec<Option<f64>>>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: Field, b: Field) -> Option<f64> {
        let row = self.fields.iter().position(|f| *f == a)?;
        let col = self.fields.iter().position(|f| *f == b)?;
        self.coefficients[row][col]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatCell {
    pub day: NaiveDate,
    pub key: String,
    pub value: f64,
}

fn month_label(record: &Record) -> Option<String> {
    record
        .created_at()
        .map(|stamp| stamp.format("%Y-%m").to_string())
}

fn require_values(dataset: &Dataset, fields: &[Field]) -> Result<()> {
    for field in fields {
        dataset.require_numeric(*field)?;
    }
    Ok(())
}

fn zeroed(fields: &[Field]) -> BTreeMap<Field, f64> {
    fields.iter().map(|field| (*field, 0.0)).collect()
}

fn accumulate(sums: &mut BTreeMap<Field, f64>, record: &Record, fields: &[Field]) {
    for field in fields {
        if let Some(value) = record.get(*field).as_f64() {
            *sums.entry(*field).or_insert(0.0) += value;
        }
    }
}

/// Sum of each field over the whole dataset; 0 for an empty dataset.
pub fn scalar_totals(dataset: &Dataset, fields: &[Field]) -> Result<Totals> {
    require_values(dataset, fields)?;

    let mut totals = zeroed(fields);
    for record in dataset.records() {
        accumulate(&mut totals, record, fields);
    }
    Ok(totals)
}

/// Per-month sums, ascending by `YYYY-MM`. Months without records are absent.
pub fn monthly_trend(dataset: &Dataset, fields: &[Field]) -> Result<Vec<MonthlyPoint>> {
    dataset.require(Field::CreatedAt)?;
    require_values(dataset, fields)?;

    let mut months: BTreeMap<String, BTreeMap<Field, f64>> = BTreeMap::new();
    for record in dataset.records() {
        let Some(month) = month_label(record) else {
            continue;
        };
        let sums = months.entry(month).or_insert_with(|| zeroed(fields));
        accumulate(sums, record, fields);
    }

    Ok(months
        .into_iter()
        .map(|(month, values)| MonthlyPoint { month, values })
        .collect())
}

pub fn group_sum(
    dataset: &Dataset,
    group_field: Field,
    value_fields: &[Field],
) -> Result<GroupedView> {
    dataset.require_groupable(group_field)?;
    require_values(dataset, value_fields)?;

    let mut groups: GroupedView = BTreeMap::new();
    for record in dataset.records() {
        let Some(key) = record.get(group_field).group_key() else {
            continue;
        };
        let sums = groups.entry(key).or_insert_with(|| zeroed(value_fields));
        accumulate(sums, record, value_fields);
    }
    Ok(groups)
}

/// Mean per group over non-null values. A group whose values are all NULL
/// for a field reports NaN for it.
pub fn group_mean(
    dataset: &Dataset,
    group_field: Field,
    value_fields: &[Field],
) -> Result<GroupedView> {
    dataset.require_groupable(group_field)?;
    require_values(dataset, value_fields)?;

    let mut groups: BTreeMap<String, BTreeMap<Field, (f64, usize)>> = BTreeMap::new();
    for record in dataset.records() {
        let Some(key) = record.get(group_field).group_key() else {
            continue;
        };
        let stats = groups.entry(key).or_insert_with(|| {
            value_fields.iter().map(|field| (*field, (0.0, 0))).collect()
        });
        for field in value_fields {
            if let Some(value) = record.get(*field).as_f64() {
                let entry = stats.entry(*field).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, stats)| {
            let means = stats
                .into_iter()
                .map(|(field, (total, count))| {
                    let mean = if count == 0 {
                        f64::NAN
                    } else {
                        total / count as f64
                    };
                    (field, mean)
                })
                .collect();
            (key, means)
        })
        .collect())
}

/// The `n` groups with the largest summed `rank_field`, descending.
pub fn top_n(
    dataset: &Dataset,
    group_field: Field,
    rank_field: Field,
    n: usize,
) -> Result<Vec<RankedGroup>> {
    let sums = group_sum(dataset, group_field, &[rank_field])?;

    let mut ranked: Vec<RankedGroup> = sums
        .into_iter()
        .map(|(key, values)| RankedGroup {
            value: values.get(&rank_field).copied().unwrap_or(0.0),
            key,
        })
        .collect();

    // stable sort keeps the alphabetical order among equal values
    ranked.sort_by(|a, b| b.value.total_cmp(&a.value));
    ranked.truncate(n);
    Ok(ranked)
}

pub fn month_over_month_growth(
    dataset: &Dataset,
    group_field: Field,
    value_fields: &[Field],
) -> Result<GrowthView> {
    dataset.require(Field::CreatedAt)?;
    dataset.require_groupable(group_field)?;
    require_values(dataset, value_fields)?;

    let mut monthly: BTreeMap<String, BTreeMap<String, BTreeMap<Field, f64>>> = BTreeMap::new();
    for record in dataset.records() {
        let (Some(key), Some(month)) = (record.get(group_field).group_key(), month_label(record))
        else {
            continue;
        };
        let sums = monthly
            .entry(key)
            .or_default()
            .entry(month)
            .or_insert_with(|| zeroed(value_fields));
        accumulate(sums, record, value_fields);
    }

    Ok(monthly
        .into_iter()
        .map(|(key, months)| {
            let mut previous: Option<BTreeMap<Field, f64>> = None;
            let points = months
                .into_iter()
                .enumerate()
                .map(|(month_index, (month, sums))| {
                    let values = value_fields
                        .iter()
                        .map(|field| {
                            let current = sums.get(field).copied().unwrap_or(0.0);
                            let change = previous
                                .as_ref()
                                .and_then(|prior| prior.get(field).copied())
                                .and_then(|prior| pct_change(prior, current));
                            (*field, change)
                        })
                        .collect();
                    previous = Some(sums);
                    GrowthPoint {
                        month_index,
                        month,
                        values,
                    }
                })
                .collect();
            (key, points)
        })
        .collect())
}

fn pct_change(prior: f64, current: f64) -> Option<f64> {
    if prior == 0.0 {
        None
    } else {
        Some((current - prior) / prior)
    }
}

pub fn distinct_count(dataset: &Dataset, field: Field) -> Result<usize> {
    dataset.require_groupable(field)?;

    Ok(dataset
        .records()
        .iter()
        .filter_map(|record| record.get(field).group_key())
        .collect::<HashSet<_>>()
        .len())
}

/// Five-number summary per field; `None` for a field with no values.
pub fn distribution(
    dataset: &Dataset,
    fields: &[Field],
) -> Result<BTreeMap<Field, Option<Distribution>>> {
    require_values(dataset, fields)?;

    Ok(fields
        .iter()
        .map(|field| {
            let mut values: Vec<f64> = dataset
                .records()
                .iter()
                .filter_map(|record| record.get(*field).as_f64())
                .collect();
            values.sort_by(f64::total_cmp);
            (*field, summarize(&values))
        })
        .collect())
}

fn summarize(sorted: &[f64]) -> Option<Distribution> {
    let (first, last) = (sorted.first()?, sorted.last()?);
    Some(Distribution {
        count: sorted.len(),
        min: *first,
        q1: quantile(sorted, 0.25),
        median: quantile(sorted, 0.5),
        q3: quantile(sorted, 0.75),
        max: *last,
    })
}

/// Linear interpolation between closest ranks; `sorted` must be non-empty.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let rank = q * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

/// Pearson correlation of every field pair over rows where both are non-null.
pub fn correlation_matrix(dataset: &Dataset, fields: &[Field]) -> Result<CorrelationMatrix> {
    require_values(dataset, fields)?;

    let coefficients = fields
        .iter()
        .map(|a| {
            fields
                .iter()
                .map(|b| {
                    let pairs: Vec<(f64, f64)> = dataset
                        .records()
                        .iter()
                        .filter_map(|record| {
                            Some((record.get(*a).as_f64()?, record.get(*b).as_f64()?))
                        })
                        .collect();
                    pearson(&pairs)
                })
                .collect()
        })
        .collect();

    Ok(CorrelationMatrix {
        fields: fields.to_vec(),
        coefficients,
    })
}

fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in pairs {
        let (dx, dy) = (x - mean_x, y - mean_y);
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

/// Sums of `value_field` per (day, group), ordered by day then group.
pub fn daily_by_group(
    dataset: &Dataset,
    group_field: Field,
    value_field: Field,
) -> Result<Vec<HeatCell>> {
    dataset.require(Field::CreatedAt)?;
    dataset.require_groupable(group_field)?;
    dataset.require_numeric(value_field)?;

    let mut cells: BTreeMap<(NaiveDate, String), f64> = BTreeMap::new();
    for record in dataset.records() {
        let (Some(stamp), Some(key)) = (record.created_at(), record.get(group_field).group_key())
        else {
            continue;
        };
        let total = cells.entry((stamp.date(), key)).or_insert(0.0);
        if let Some(value) = record.get(value_field).as_f64() {
            *total += value;
        }
    }

    Ok(cells
        .into_iter()
        .map(|((day, key), value)| HeatCell { day, key, value })
        .collect())
}
