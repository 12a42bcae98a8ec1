use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

use dealer_insights::auth;
use dealer_insights::cache::QueryCache;
use dealer_insights::config::Config;
use dealer_insights::db::{CsvSource, MySqlSource, Query, Source};
use dealer_insights::filter::{self, DateRange, FilterSpec, ALL};
use dealer_insights::models::{Dataset, Field};
use dealer_insights::report::{self, ReportPage, ReportSettings, GROWTH_METRICS};

#[derive(Parser)]
#[command(name = "dealer-insights")]
#[command(
    about = "Dealership training analytics: dashboard, user analytics and growth reports",
    long_about = None
)]
struct Cli {
    /// Config file; defaults to dealer-insights.toml when present
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Read `<query>.csv` exports from this directory instead of MySQL
    #[arg(long, global = true)]
    csv_dir: Option<PathBuf>,
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Markdown,
    Json,
}

#[derive(Args)]
struct ReportArgs {
    /// First day of the created_at range (defaults to the earliest record)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last day of the created_at range (defaults to the latest record)
    #[arg(long)]
    to: Option<NaiveDate>,
    /// 1-based page of the raw record table
    #[arg(long, default_value_t = 1)]
    page: usize,
    #[arg(long, value_enum, default_value_t = Format::Markdown)]
    format: Format,
    /// Write the report here instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Dealership consumption overview
    Dashboard {
        #[command(flatten)]
        args: ReportArgs,
        #[arg(long, default_value = ALL)]
        dealership: String,
        #[arg(long, default_value = ALL)]
        title: String,
    },
    /// User activity, engagement scores and completions
    Analytics {
        #[command(flatten)]
        args: ReportArgs,
        #[arg(long, default_value = ALL)]
        dealership: String,
        #[arg(long, default_value = ALL)]
        region: String,
        #[arg(long, default_value = ALL)]
        pipeline_status: String,
    },
    /// Month-on-month growth per dealership
    Growth {
        #[command(flatten)]
        args: ReportArgs,
        #[arg(long, default_value = ALL)]
        dealership: String,
        /// One of total_users, mau, dau
        #[arg(long, default_value = "total_users")]
        metric: Field,
    },
    /// List the accepted values of a page filter
    Options {
        #[arg(long, value_enum)]
        page: ReportPage,
        #[arg(long)]
        field: Field,
    },
    /// Start a session for a configured user
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "DASHBOARD_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Remove the stored session
    Logout,
    /// Print a password hash for the [auth.users] config section
    HashPassword {
        #[arg(long, env = "DASHBOARD_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Login { username, password } => {
            let session = auth::Gate::new(&config.auth).login(&username, &password, Utc::now())?;
            let path = config.auth.session_path();
            auth::save_session(&path, &session)?;
            println!("Logged in as {username} until {}.", session.expires_at);
        }
        Commands::Logout => {
            if auth::clear_session(&config.auth.session_path())? {
                println!("Logged out.");
            } else {
                println!("No active session.");
            }
        }
        Commands::HashPassword { password } => {
            println!("{}", auth::hash_password(&password)?);
        }
        Commands::Options { page, field } => {
            if !page.filter_fields().contains(&field) {
                bail!("`{field}` is not a filter on the {page:?} page");
            }
            auth::require_session(&config.auth)?;
            let mut cache = open_cache(&config, cli.csv_dir.as_deref()).await?;
            let dataset = cache.fetch(&page.primary_query(None)).await?;
            for option in filter::filter_options(&dataset, field)? {
                println!("{option}");
            }
        }
        Commands::Dashboard {
            args,
            dealership,
            title,
        } => {
            validate_range(&args)?;
            auth::require_session(&config.auth)?;
            let mut cache = open_cache(&config, cli.csv_dir.as_deref()).await?;

            let overview = cache.fetch(&ReportPage::Dashboard.primary_query(args.from)).await?;
            let partner = cache.fetch(&Query::partner_experience(None)).await?;
            let spec = FilterSpec::new(resolve_range(&args, &overview)?)
                .with(Field::DealershipName, dealership.as_str())
                .with(Field::Title, title.as_str());

            let page_settings = settings(&config, &args);
            let built = report::build_dashboard(&overview, &partner, &spec, &page_settings)?;
            render(&args, &built, || built.to_markdown())?;
        }
        Commands::Analytics {
            args,
            dealership,
            region,
            pipeline_status,
        } => {
            validate_range(&args)?;
            auth::require_session(&config.auth)?;
            let mut cache = open_cache(&config, cli.csv_dir.as_deref()).await?;

            // the raw table pages over the unfiltered report, so no pushdown here
            let partner = cache.fetch(&ReportPage::Analytics.primary_query(None)).await?;
            let spec = FilterSpec::new(resolve_range(&args, &partner)?)
                .with(Field::DealershipName, dealership.as_str())
                .with(Field::Region, region.as_str())
                .with(Field::LeadPipelineStatus, pipeline_status.as_str());

            let built = report::build_analytics(&partner, &spec, &settings(&config, &args))?;
            render(&args, &built, || built.to_markdown())?;
        }
        Commands::Growth {
            args,
            dealership,
            metric,
        } => {
            if !GROWTH_METRICS.contains(&metric) {
                bail!("growth metric must be one of total_users, mau, dau; got `{metric}`");
            }
            validate_range(&args)?;
            auth::require_session(&config.auth)?;
            let mut cache = open_cache(&config, cli.csv_dir.as_deref()).await?;

            let partner = cache.fetch(&ReportPage::Growth.primary_query(args.from)).await?;
            let employees = cache.fetch(&Query::employee_growth(None)).await?;
            let spec = FilterSpec::new(resolve_range(&args, &partner)?)
                .with(Field::DealershipName, dealership.as_str());

            let built = report::build_growth(
                &partner,
                &employees,
                &spec,
                metric,
                &settings(&config, &args),
            )?;
            render(&args, &built, || built.to_markdown())?;
        }
    }

    Ok(())
}

async fn open_cache(config: &Config, csv_dir: Option<&Path>) -> anyhow::Result<QueryCache<Source>> {
    let source = match csv_dir {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "reading CSV exports");
            Source::Csv(CsvSource::new(dir))
        }
        None => Source::MySql(MySqlSource::connect(&config.database).await?),
    };
    Ok(QueryCache::new(source, config.cache.ttl()))
}

fn validate_range(args: &ReportArgs) -> anyhow::Result<()> {
    if let (Some(from), Some(to)) = (args.from, args.to) {
        DateRange::new(from, to)?;
    }
    Ok(())
}

/// Fills missing bounds from the data; an empty dataset falls back to today.
fn resolve_range(args: &ReportArgs, dataset: &Dataset) -> anyhow::Result<DateRange> {
    let today = Utc::now().date_naive();
    let span = DateRange::spanning(dataset).unwrap_or(DateRange {
        start: today,
        end: today,
    });
    let start = args.from.unwrap_or_else(|| args.to.map_or(span.start, |to| span.start.min(to)));
    let end = args.to.unwrap_or_else(|| span.end.max(start));
    Ok(DateRange::new(start, end)?)
}

fn settings(config: &Config, args: &ReportArgs) -> ReportSettings {
    ReportSettings {
        top_n: config.report.top_n,
        page: args.page,
        page_size: config.report.page_size,
    }
}

fn render<T: Serialize>(
    args: &ReportArgs,
    report: &T,
    markdown: impl FnOnce() -> String,
) -> anyhow::Result<()> {
    let body = match args.format {
        Format::Markdown => markdown(),
        Format::Json => serde_json::to_string_pretty(report).context("failed to serialize report")?,
    };

    match &args.out {
        Some(out) => {
            std::fs::write(out, body)
                .with_context(|| format!("failed to write report to {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        None => println!("{body}"),
    }
    Ok(())
}
