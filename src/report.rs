use std::collections::BTreeMap;
use std::fmt::Write;

use clap::ValueEnum;
use serde::Serialize;

use crate::aggregate::{
    self, CorrelationMatrix, Distribution, GroupedView, GrowthView, HeatCell, MonthlyPoint,
    RankedGroup, Totals,
};
use crate::db::Query;
use crate::error::Result;
use crate::filter::{self, FilterSpec, Selection};
use crate::models::{Dataset, Field, Page};

pub const CONTENT_TYPES: [Field; 4] = [
    Field::DoseViews,
    Field::StoryViews,
    Field::GuideViews,
    Field::CapstoneActivityViews,
];

pub const ENGAGEMENT_SCORES: [Field; 4] = [
    Field::ManagementScore,
    Field::ConsistencyScore,
    Field::ActivityScore,
    Field::TotalScore,
];

pub const COMPLETIONS: [Field; 4] = [
    Field::GuideCompleted,
    Field::DailyCompleted,
    Field::CapstoneCompleted,
    Field::GuideShared,
];

pub const GROWTH_METRICS: [Field; 3] = [Field::TotalUsers, Field::Mau, Field::Dau];

const CORRELATED_METRICS: [Field; 11] = [
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
];

const ANALYTICS_KEY_METRICS: [Field; 5] = [
    Field::Mau,
    Field::Dau,
    Field::TotalUsers,
    Field::GuideCompleted,
    Field::CapstoneCompleted,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportPage {
    Dashboard,
    Analytics,
    Growth,
}

impl ReportPage {
    /// Fields offered as single-select filters on the page.
    pub fn filter_fields(self) -> &'static [Field] {
        match self {
            ReportPage::Dashboard => &[Field::DealershipName, Field::Title],
            ReportPage::Analytics => &[
                Field::DealershipName,
                Field::Region,
                Field::LeadPipelineStatus,
            ],
            ReportPage::Growth => &[Field::DealershipName],
        }
    }

    /// The query whose rows the page filters.
    pub fn primary_query(self, since: Option<chrono::NaiveDate>) -> Query {
        match self {
            ReportPage::Dashboard => Query::dealership_overview(since),
            ReportPage::Analytics | ReportPage::Growth => Query::partner_experience(since),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSettings {
    pub top_n: usize,
    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardReport {
    pub filters: FilterSpec,
    pub total_employees: f64,
    pub total_views: f64,
    pub total_dealerships: usize,
    pub avg_views_per_dealership: f64,
    pub monthly_views: Vec<MonthlyPoint>,
    pub top_dealerships: Vec<RankedGroup>,
    pub top_titles: Vec<RankedGroup>,
    pub views_by_dealership: GroupedView,
    pub employees_by_title: GroupedView,
    pub content_by_type: Totals,
    pub score_distribution: BTreeMap<Field, Option<Distribution>>,
    pub correlation: CorrelationMatrix,
    pub records: Page,
}

/// `overview` is the dealership consumption dataset, `partner` the
/// unfiltered partner-experience report used for scores and the raw page.
pub fn build_dashboard(
    overview: &Dataset,
    partner: &Dataset,
    spec: &FilterSpec,
    settings: &ReportSettings,
) -> Result<DashboardReport> {
    let overview = overview.derive_sum(Field::Lu, &CONTENT_TYPES)?;
    let filtered = filter::apply(&overview, spec)?;

    let totals = aggregate::scalar_totals(&filtered, &[Field::TotalEmployees, Field::Lu])?;
    let total_views = totals[&Field::Lu];
    let total_dealerships = aggregate::distinct_count(&filtered, Field::DealershipName)?;
    let avg_views_per_dealership = if total_dealerships == 0 {
        0.0
    } else {
        round2(total_views / total_dealerships as f64)
    };

    Ok(DashboardReport {
        filters: spec.clone(),
        total_employees: totals[&Field::TotalEmployees],
        total_views,
        total_dealerships,
        avg_views_per_dealership,
        monthly_views: aggregate::monthly_trend(&filtered, &[Field::Lu])?,
        top_dealerships: aggregate::top_n(
            &filtered,
            Field::DealershipName,
            Field::Lu,
            settings.top_n,
        )?,
        top_titles: aggregate::top_n(
            &filtered,
            Field::Title,
            Field::TotalEmployees,
            settings.top_n,
        )?,
        views_by_dealership: aggregate::group_sum(&filtered, Field::DealershipName, &[Field::Lu])?,
        employees_by_title: aggregate::group_sum(
            &filtered,
            Field::Title,
            &[Field::TotalEmployees],
        )?,
        content_by_type: aggregate::scalar_totals(&filtered, &CONTENT_TYPES)?,
        score_distribution: aggregate::distribution(partner, &ENGAGEMENT_SCORES)?,
        correlation: aggregate::correlation_matrix(partner, &CORRELATED_METRICS)?,
        records: partner.page(settings.page, settings.page_size),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsReport {
    pub filters: FilterSpec,
    pub key_metrics: Totals,
    pub activity_trend: Vec<MonthlyPoint>,
    pub scores_by_dealership: GroupedView,
    pub completions_by_dealership: GroupedView,
    pub top_dealerships: Vec<RankedGroup>,
    pub users_by_region: GroupedView,
    pub daily_activity: Vec<HeatCell>,
    pub scores_by_pipeline_status: GroupedView,
    pub completions_by_pipeline_status: GroupedView,
    pub records: Page,
}

pub fn build_analytics(
    partner: &Dataset,
    spec: &FilterSpec,
    settings: &ReportSettings,
) -> Result<AnalyticsReport> {
    let filtered = filter::apply(partner, spec)?;

    Ok(AnalyticsReport {
        filters: spec.clone(),
        key_metrics: aggregate::scalar_totals(&filtered, &ANALYTICS_KEY_METRICS)?,
        activity_trend: aggregate::monthly_trend(&filtered, &[Field::Mau, Field::Dau])?,
        scores_by_dealership: aggregate::group_mean(
            &filtered,
            Field::DealershipName,
            &ENGAGEMENT_SCORES,
        )?,
        completions_by_dealership: aggregate::group_sum(
            &filtered,
            Field::DealershipName,
            &COMPLETIONS,
        )?,
        top_dealerships: aggregate::top_n(
            &filtered,
            Field::DealershipName,
            Field::TotalUsers,
            settings.top_n,
        )?,
        users_by_region: aggregate::group_sum(&filtered, Field::Region, &[Field::TotalUsers])?,
        daily_activity: aggregate::daily_by_group(&filtered, Field::Region, Field::TotalUsers)?,
        scores_by_pipeline_status: aggregate::group_mean(
            &filtered,
            Field::LeadPipelineStatus,
            &ENGAGEMENT_SCORES,
        )?,
        completions_by_pipeline_status: aggregate::group_sum(
            &filtered,
            Field::LeadPipelineStatus,
            &COMPLETIONS,
        )?,
        records: partner.page(settings.page, settings.page_size),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct GrowthReport {
    pub filters: FilterSpec,
    pub metric: Field,
    pub growth: GrowthView,
    pub employees: Page,
}

pub fn build_growth(
    partner: &Dataset,
    employees: &Dataset,
    spec: &FilterSpec,
    metric: Field,
    settings: &ReportSettings,
) -> Result<GrowthReport> {
    let filtered = filter::apply(partner, spec)?;

    Ok(GrowthReport {
        filters: spec.clone(),
        metric,
        growth: aggregate::month_over_month_growth(
            &filtered,
            Field::DealershipName,
            &GROWTH_METRICS,
        )?,
        employees: employees.page(settings.page, settings.page_size),
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn number(value: f64) -> String {
    if value.is_nan() {
        "n/a".to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

fn percent(change: Option<f64>) -> String {
    match change {
        Some(change) => format!("{:+.1}%", change * 100.0),
        None => "n/a".to_string(),
    }
}

fn write_filters(output: &mut String, spec: &FilterSpec) {
    let mut parts = vec![format!(
        "{} to {}",
        spec.date_range.start, spec.date_range.end
    )];
    for (field, selection) in &spec.equality_filters {
        let shown = match selection {
            Selection::All => filter::ALL,
            Selection::Only(value) => value.as_str(),
        };
        parts.push(format!("{} = {}", field.label(), shown));
    }
    let _ = writeln!(output, "Filters: {}", parts.join("; "));
}

fn write_ranked(output: &mut String, heading: &str, ranked: &[RankedGroup]) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## {heading}");
    if ranked.is_empty() {
        let _ = writeln!(output, "No data for this selection.");
        return;
    }
    for (position, group) in ranked.iter().enumerate() {
        let _ = writeln!(output, "{}. {}: {}", position + 1, group.key, number(group.value));
    }
}

fn write_grouped(
    output: &mut String,
    heading: &str,
    group_field: Field,
    view: &GroupedView,
    fields: &[Field],
) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## {heading}");
    if view.is_empty() {
        let _ = writeln!(output, "No data for this selection.");
        return;
    }

    let header: Vec<String> = std::iter::once(group_field.label())
        .chain(fields.iter().map(|field| field.label()))
        .collect();
    let _ = writeln!(output, "| {} |", header.join(" | "));
    let _ = writeln!(output, "|{}", " --- |".repeat(header.len()));
    for (key, values) in view {
        let cells: Vec<String> = fields
            .iter()
            .map(|field| values.get(field).map_or_else(String::new, |v| number(*v)))
            .collect();
        let _ = writeln!(output, "| {} | {} |", key, cells.join(" | "));
    }
}

fn write_trend(output: &mut String, heading: &str, trend: &[MonthlyPoint], fields: &[Field]) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## {heading}");
    if trend.is_empty() {
        let _ = writeln!(output, "No data for this selection.");
        return;
    }
    for point in trend {
        let values: Vec<String> = fields
            .iter()
            .map(|field| {
                let value = point.values.get(field).copied().unwrap_or(0.0);
                format!("{} {}", field.label(), number(value))
            })
            .collect();
        let _ = writeln!(output, "- {}: {}", point.month, values.join(", "));
    }
}

fn write_totals(output: &mut String, totals: &Totals) {
    for (field, value) in totals {
        let _ = writeln!(output, "- {}: {}", field.label(), number(*value));
    }
}

fn write_page(output: &mut String, heading: &str, page: &Page) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## {heading}");
    let _ = writeln!(
        output,
        "Page {} ({} per page, {} records total)",
        page.page, page.page_size, page.total_records
    );
    if page.rows.is_empty() {
        let _ = writeln!(output, "No records on this page.");
        return;
    }

    let header: Vec<&str> = page.columns.iter().map(|field| field.name()).collect();
    let _ = writeln!(output, "| {} |", header.join(" | "));
    let _ = writeln!(output, "|{}", " --- |".repeat(header.len()));
    for row in &page.rows {
        let cells: Vec<String> = page
            .columns
            .iter()
            .map(|field| row.get(*field).to_string())
            .collect();
        let _ = writeln!(output, "| {} |", cells.join(" | "));
    }
}

impl DashboardReport {
    pub fn to_markdown(&self) -> String {
        let mut output = String::new();

        let _ = writeln!(output, "# Dealership Dashboard");
        write_filters(&mut output, &self.filters);
        let _ = writeln!(output);
        let _ = writeln!(output, "## Key Metrics");
        let _ = writeln!(output, "- Total employees: {}", number(self.total_employees));
        let _ = writeln!(output, "- Total views (lu): {}", number(self.total_views));
        let _ = writeln!(output, "- Total dealerships: {}", self.total_dealerships);
        let _ = writeln!(
            output,
            "- Avg. views per dealership: {}",
            number(self.avg_views_per_dealership)
        );

        write_trend(
            &mut output,
            "Month-on-Month Lu's Completed",
            &self.monthly_views,
            &[Field::Lu],
        );
        write_ranked(&mut output, "Top Dealerships by Total Views (lu)", &self.top_dealerships);
        write_ranked(&mut output, "Top Titles by Total Employees", &self.top_titles);
        write_grouped(
            &mut output,
            "Distribution of Views across Dealerships",
            Field::DealershipName,
            &self.views_by_dealership,
            &[Field::Lu],
        );
        write_grouped(
            &mut output,
            "Distribution of Employees across Titles",
            Field::Title,
            &self.employees_by_title,
            &[Field::TotalEmployees],
        );

        let _ = writeln!(output);
        let _ = writeln!(output, "## Content Consumption by Type");
        write_totals(&mut output, &self.content_by_type);

        let _ = writeln!(output);
        let _ = writeln!(output, "## Engagement Score Distribution");
        for (field, summary) in &self.score_distribution {
            match summary {
                Some(stats) => {
                    let _ = writeln!(
                        output,
                        "- {}: min {}, q1 {}, median {}, q3 {}, max {} ({} values)",
                        field.label(),
                        number(stats.min),
                        number(stats.q1),
                        number(stats.median),
                        number(stats.q3),
                        number(stats.max),
                        stats.count
                    );
                }
                None => {
                    let _ = writeln!(output, "- {}: no values", field.label());
                }
            }
        }

        let _ = writeln!(output);
        let _ = writeln!(output, "## Correlation Matrix");
        let header: Vec<&str> = self.correlation.fields.iter().map(|f| f.name()).collect();
        let _ = writeln!(output, "| metric | {} |", header.join(" | "));
        let _ = writeln!(output, "|{}", " --- |".repeat(header.len() + 1));
        for (field, row) in self.correlation.fields.iter().zip(&self.correlation.coefficients) {
            let cells: Vec<String> = row
                .iter()
                .map(|value| value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}")))
                .collect();
            let _ = writeln!(output, "| {} | {} |", field.name(), cells.join(" | "));
        }

        write_page(&mut output, "Partner Experience Records", &self.records);
        output
    }
}

impl AnalyticsReport {
    pub fn to_markdown(&self) -> String {
        let mut output = String::new();

        let _ = writeln!(output, "# User Analytics");
        write_filters(&mut output, &self.filters);
        let _ = writeln!(output);
        let _ = writeln!(output, "## Key Metrics");
        write_totals(&mut output, &self.key_metrics);

        write_trend(
            &mut output,
            "MAU and DAU Trend",
            &self.activity_trend,
            &[Field::Mau, Field::Dau],
        );
        write_grouped(
            &mut output,
            "Average Engagement Scores by Dealership",
            Field::DealershipName,
            &self.scores_by_dealership,
            &ENGAGEMENT_SCORES,
        );
        write_grouped(
            &mut output,
            "Content Consumption by Dealership",
            Field::DealershipName,
            &self.completions_by_dealership,
            &COMPLETIONS,
        );
        write_ranked(&mut output, "Top Dealerships by Total Users", &self.top_dealerships);
        write_grouped(
            &mut output,
            "User Distribution by Region",
            Field::Region,
            &self.users_by_region,
            &[Field::TotalUsers],
        );

        let _ = writeln!(output);
        let _ = writeln!(output, "## Daily Activity by Region");
        if self.daily_activity.is_empty() {
            let _ = writeln!(output, "No data for this selection.");
        }
        for cell in &self.daily_activity {
            let _ = writeln!(output, "- {} {}: {}", cell.day, cell.key, number(cell.value));
        }

        write_grouped(
            &mut output,
            "Engagement by Lead Pipeline Status",
            Field::LeadPipelineStatus,
            &self.scores_by_pipeline_status,
            &ENGAGEMENT_SCORES,
        );
        write_grouped(
            &mut output,
            "Content Consumption by Lead Pipeline Status",
            Field::LeadPipelineStatus,
            &self.completions_by_pipeline_status,
            &COMPLETIONS,
        );
        write_page(&mut output, "Explore the Data", &self.records);
        output
    }
}

impl GrowthReport {
    pub fn to_markdown(&self) -> String {
        let mut output = String::new();

        let _ = writeln!(output, "# Month-on-Month Growth Comparison");
        write_filters(&mut output, &self.filters);
        let _ = writeln!(output);
        let _ = writeln!(output, "## {} Growth by Dealership", self.metric.label());

        if self.growth.is_empty() {
            let _ = writeln!(output, "No data for this selection.");
        }
        for (dealership, points) in &self.growth {
            let steps: Vec<String> = points
                .iter()
                .map(|point| {
                    let change = point.values.get(&self.metric).copied().flatten();
                    format!("month {} ({}): {}", point.month_index, point.month, percent(change))
                })
                .collect();
            let _ = writeln!(output, "- {}: {}", dealership, steps.join("; "));
        }

        write_page(&mut output, "Employees by Dealership", &self.employees);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::DateRange;
    use crate::models::{Record, Value};
    use chrono::{NaiveDate, NaiveDateTime};

    fn stamp(raw: &str) -> Value {
        Value::Timestamp(NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").unwrap())
    }

    fn text(raw: &str) -> Value {
        Value::Text(raw.to_string())
    }

    fn range(start: &str, end: &str) -> DateRange {
        DateRange::new(
            NaiveDate::parse_from_str(start, "%Y-%m-%d").unwrap(),
            NaiveDate::parse_from_str(end, "%Y-%m-%d").unwrap(),
        )
        .unwrap()
    }

    fn settings() -> ReportSettings {
        ReportSettings {
            top_n: 10,
            page: 1,
            page_size: 10,
        }
    }

    fn overview_row(
        name: &str,
        title: &str,
        created: &str,
        employees: i64,
        views: [i64; 4],
    ) -> Record {
        Record::new([
            (Field::DealershipName, text(name)),
            (Field::Title, text(title)),
            (Field::CreatedAt, stamp(created)),
            (Field::TotalEmployees, Value::Integer(employees)),
            (Field::DoseViews, Value::Integer(views[0])),
            (Field::StoryViews, Value::Integer(views[1])),
            (Field::GuideViews, Value::Integer(views[2])),
            (Field::CapstoneActivityViews, Value::Integer(views[3])),
        ])
    }

    fn overview() -> Dataset {
        Dataset::new(
            vec![
                Field::DealershipName,
                Field::Title,
                Field::CreatedAt,
                Field::TotalEmployees,
                Field::DoseViews,
                Field::StoryViews,
                Field::GuideViews,
                Field::CapstoneActivityViews,
            ],
            vec![
                overview_row("Alpha", "Customer", "2024-01-10 09:00:00", 12, [5, 3, 2, 0]),
                overview_row("Bravo", "Prospect", "2024-01-20 09:00:00", 4, [1, 1, 1, 1]),
                overview_row("Charlie", "Customer", "2024-02-05 09:00:00", 7, [10, 0, 0, 0]),
            ],
        )
    }

    fn partner_row(
        name: &str,
        region: &str,
        status: &str,
        created: &str,
        users: i64,
        mau: i64,
        dau: i64,
        score: f64,
    ) -> Record {
        Record::new([
            (Field::DealershipName, text(name)),
            (Field::Region, text(region)),
            (Field::LeadPipelineStatus, text(status)),
            (Field::CreatedAt, stamp(created)),
            (Field::TotalUsers, Value::Integer(users)),
            (Field::Mau, Value::Integer(mau)),
            (Field::Dau, Value::Integer(dau)),
            (Field::ManagementScore, Value::Float(score)),
            (Field::ConsistencyScore, Value::Float(score / 2.0)),
            (Field::ActivityScore, Value::Float(score + 1.0)),
            (Field::TotalScore, Value::Float(score * 2.0)),
            (Field::GuideCompleted, Value::Integer(users / 2)),
            (Field::DailyCompleted, Value::Integer(users / 4)),
            (Field::CapstoneCompleted, Value::Integer(1)),
            (Field::GuideShared, Value::Integer(0)),
        ])
    }

    fn partner() -> Dataset {
        Dataset::new(
            vec![
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
            vec![
                partner_row("A", "East", "Active", "2024-01-10 08:00:00", 100, 60, 20, 4.0),
                partner_row("B", "West", "Trial", "2024-01-12 08:00:00", 50, 30, 10, 2.0),
                partner_row("A", "East", "Active", "2024-02-10 08:00:00", 120, 70, 25, 3.0),
                partner_row("B", "West", "Trial", "2024-02-12 08:00:00", 75, 40, 12, 1.0),
            ],
        )
    }

    fn employees() -> Dataset {
        Dataset::new(
            vec![Field::DealershipName, Field::CreatedAt, Field::Hash],
            (0..12)
                .map(|n| {
                    Record::new([
                        (Field::DealershipName, text("A")),
                        (Field::CreatedAt, stamp("2024-01-02 00:00:00")),
                        (Field::Hash, text(&format!("emp-{n}"))),
                    ])
                })
                .collect(),
        )
    }

    #[test]
    fn dashboard_derives_lu_and_ranks_dealerships() {
        let spec = FilterSpec::new(range("2024-01-01", "2024-02-29"));
        let report = build_dashboard(&overview(), &partner(), &spec, &settings()).unwrap();

        assert_eq!(report.total_employees, 23.0);
        assert_eq!(report.total_views, 24.0);
        assert_eq!(report.total_dealerships, 3);
        assert_eq!(report.avg_views_per_dealership, 8.0);
        assert_eq!(report.top_dealerships[0].key, "Alpha");
        assert_eq!(report.top_dealerships[1].key, "Charlie");
        assert_eq!(report.top_titles[0].key, "Customer");
        assert_eq!(report.top_titles[0].value, 19.0);
        assert_eq!(report.monthly_views.len(), 2);
        assert_eq!(report.content_by_type[&Field::DoseViews], 16.0);
        assert_eq!(report.records.rows.len(), 4);
        assert!(report.score_distribution[&Field::ManagementScore].is_some());
    }

    #[test]
    fn dashboard_filters_by_title() {
        let spec = FilterSpec::new(range("2024-01-01", "2024-02-29"))
            .with(Field::Title, "Prospect")
            .with(Field::DealershipName, filter::ALL);
        let report = build_dashboard(&overview(), &partner(), &spec, &settings()).unwrap();

        assert_eq!(report.total_dealerships, 1);
        assert_eq!(report.total_views, 4.0);
        assert_eq!(report.avg_views_per_dealership, 4.0);
    }

    #[test]
    fn empty_selection_reports_zero_average() {
        let spec = FilterSpec::new(range("2030-01-01", "2030-12-31"));
        let report = build_dashboard(&overview(), &partner(), &spec, &settings()).unwrap();
        assert_eq!(report.total_dealerships, 0);
        assert_eq!(report.avg_views_per_dealership, 0.0);
        assert!(report.to_markdown().contains("No data for this selection."));
    }

    #[test]
    fn analytics_groups_by_region_and_status() {
        let spec = FilterSpec::new(range("2024-01-01", "2024-02-29")).with(Field::Region, "East");
        let report = build_analytics(&partner(), &spec, &settings()).unwrap();

        assert_eq!(report.key_metrics[&Field::TotalUsers], 220.0);
        assert_eq!(report.users_by_region.len(), 1);
        assert_eq!(report.scores_by_dealership["A"][&Field::ManagementScore], 3.5);
        assert_eq!(report.completions_by_pipeline_status["Active"][&Field::GuideCompleted], 110.0);
        assert_eq!(report.daily_activity.len(), 2);
        assert_eq!(report.records.total_records, 4);
    }

    #[test]
    fn growth_uses_dealership_months() {
        let spec = FilterSpec::new(range("2024-01-01", "2024-02-29"));
        let report =
            build_growth(&partner(), &employees(), &spec, Field::TotalUsers, &settings()).unwrap();

        let a = &report.growth["A"];
        assert_eq!(a[0].values[&Field::TotalUsers], None);
        assert!((a[1].values[&Field::TotalUsers].unwrap() - 0.2).abs() < 1e-9);
        assert_eq!(report.growth["B"][1].values[&Field::TotalUsers], Some(0.5));
        assert_eq!(report.employees.rows.len(), 10);
        assert_eq!(report.employees.total_records, 12);

        let markdown = report.to_markdown();
        assert!(markdown.contains("## Total users Growth by Dealership"));
        assert!(markdown.contains("- B: month 0 (2024-01): n/a; month 1 (2024-02): +50.0%"));
    }

    #[test]
    fn markdown_lists_filters_and_sections() {
        let spec = FilterSpec::new(range("2024-01-01", "2024-01-31")).with(Field::Region, "East");
        let markdown = build_analytics(&partner(), &spec, &settings())
            .unwrap()
            .to_markdown();

        assert!(markdown.starts_with(
            "# User Analytics\nFilters: 2024-01-01 to 2024-01-31; Region = East"
        ));
        assert!(markdown.contains("## MAU and DAU Trend"));
        assert!(markdown.contains("- 2024-01: Mau 60, Dau 20"));
        assert!(markdown.contains("| Region | Total users |"));
        assert!(markdown.contains("Page 1 (10 per page, 4 records total)"));
    }

    #[test]
    fn page_filters_are_known_fields_of_their_query() {
        for page in [ReportPage::Dashboard, ReportPage::Analytics, ReportPage::Growth] {
            let query = page.primary_query(None);
            for field in page.filter_fields() {
                assert!(query.schema.contains(field), "{field} missing from {}", query.name);
            }
        }
    }

    #[test]
    fn numbers_drop_trailing_zero_decimals() {
        assert_eq!(number(220.0), "220");
        assert_eq!(number(2.345), "2.35");
        assert_eq!(number(f64::NAN), "n/a");
        assert_eq!(percent(Some(-0.25)), "-25.0%");
        assert_eq!(round2(10.0 / 3.0), 3.33);
    }
}
