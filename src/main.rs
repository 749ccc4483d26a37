//! CLI entry point for the dengue choropleth builder.
//!
//! Provides subcommands for building one month or every month, listing the
//! months in the case table, checking the district join and writing a
//! population template.

use std::ffi::OsStr;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use dengue_map::fetch::{BasicClient, load_source};
use dengue_map::output::{write_index, write_merged_csv, write_month};
use dengue_map::population::write_population_template;
use dengue_map::publish::upload_dir;
use dengue_map::reconcile::reconcile;
use dengue_map::{
    CaseDataset, ContextOptions, DuplicatePolicy, GeoDataset, MapContext, Metric,
    PopulationTable, RenderRequest, YearMonth,
};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "dengue_map")]
#[command(about = "Build monthly dengue choropleth data for Sri Lankan districts", long_about = None)]
struct Cli {
    #[command(flatten)]
    sources: Sources,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Sources {
    /// Monthly case table (path or URL, optionally .gz)
    #[arg(long, global = true, env = "DENGUE_CASES", default_value = "data/dengue_monthly.csv")]
    cases: String,

    /// District boundaries as a GeoJSON FeatureCollection (path or URL)
    #[arg(
        long,
        global = true,
        env = "DENGUE_GEO",
        default_value = "data/sri_lanka_districts.geojson"
    )]
    geo: String,

    /// Optional district,population table overriding the case table's populations
    #[arg(long, global = true, env = "DENGUE_POPULATION")]
    population: Option<String>,

    /// Directory the built files are written to
    #[arg(short = 'd', long, global = true, env = "DENGUE_OUTPUT_DIR", default_value = "docs")]
    output_dir: PathBuf,

    /// Percentile (0-1) used for the upper bound of every color scale
    #[arg(long, global = true, env = "DENGUE_SCALE_PERCENTILE", default_value_t = 0.95)]
    percentile: f64,

    /// What to do with several rows for one district in one month
    #[arg(long, global = true, value_enum, default_value_t = DuplicatePolicy::Reject)]
    duplicates: DuplicatePolicy,
}

#[derive(Args)]
struct RenderArgs {
    /// Metric mapped to color
    #[arg(long, value_enum, default_value_t = Metric::Incidence)]
    metric: Metric,

    /// Fixed upper bound for the color scale
    #[arg(long)]
    vmax: Option<f64>,

    /// Dim districts whose incidence per 100k is below this (0 disables)
    #[arg(long, default_value_t = 0.0)]
    threshold: f64,
}

impl RenderArgs {
    fn request(&self, year_month: YearMonth) -> RenderRequest {
        RenderRequest {
            year_month,
            metric: self.metric,
            max_override: self.vmax,
            threshold: self.threshold,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build the map data for one month
    Build {
        #[arg(long)]
        year: i32,

        #[arg(long)]
        month: u32,

        #[command(flatten)]
        render: RenderArgs,
    },
    /// Build every month in the case table and rebuild the index
    BuildAll {
        /// First month to build (YYYY-MM)
        #[arg(long, value_name = "YYYY-MM")]
        from: Option<YearMonth>,

        /// Last month to build (YYYY-MM)
        #[arg(long, value_name = "YYYY-MM")]
        to: Option<YearMonth>,

        #[command(flatten)]
        render: RenderArgs,

        /// Optional: S3 bucket to upload the output directory to
        #[arg(long, env = "DENGUE_S3_BUCKET")]
        s3_bucket: Option<String>,

        /// Optional: key prefix inside the bucket
        #[arg(long, env = "DENGUE_S3_PREFIX")]
        s3_prefix: Option<String>,
    },
    /// List the months present in the case table
    Months,
    /// Report districts that only one source knows about
    Check,
    /// Write a district,population template from the geo districts
    PopTemplate {
        /// File to write (stdout when omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Leave every population empty
        #[arg(long, default_value_t = false)]
        no_prefill: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/dengue_map.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("dengue_map.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let sources = &cli.sources;

    match cli.command {
        Commands::Build {
            year,
            month,
            render,
        } => {
            let year_month = YearMonth::new(year, month)
                .ok_or_else(|| anyhow!("month must be 1-12, got {month}"))?;
            let ctx = load_context(sources).await?;
            build_month(&ctx, &sources.output_dir, year_month, &render)?;
        }
        Commands::BuildAll {
            from,
            to,
            render,
            s3_bucket,
            s3_prefix,
        } => {
            let ctx = load_context(sources).await?;
            build_all(&ctx, &sources.output_dir, from, to, &render)?;

            if let Some(bucket) = s3_bucket {
                let config = aws_config::load_from_env().await;
                let client = aws_sdk_s3::Client::new(&config);
                info!(bucket = %bucket, "S3 upload enabled");
                upload_dir(&client, &bucket, s3_prefix.as_deref(), &sources.output_dir).await?;
            }
        }
        Commands::Months => {
            let ctx = load_context(sources).await?;
            let months = ctx.months();
            if let (Some(first), Some(last)) = (months.first(), months.last()) {
                for year_month in first.through(*last) {
                    let districts = ctx.cases().slice(year_month).keys().count();
                    if districts == 0 {
                        warn!(year_month = %year_month, "Month missing from case table");
                    } else {
                        info!(year_month = %year_month, label = %year_month.label(), districts, "Month");
                    }
                }
            }
            info!(
                months = months.len(),
                undated_rows = ctx.cases().undated_rows(),
                "Month list summary"
            );
        }
        Commands::Check => {
            let client = BasicClient::new();
            let geo = load_geo(&client, &sources.geo).await?;
            let cases = load_cases(&client, &sources.cases).await?;
            let report = reconcile(&geo, &cases);

            for key in &report.cases_without_geo {
                warn!(district_key = %key, "Case rows with no boundary");
            }
            for key in &report.duplicate_geo_keys {
                warn!(district_key = %key, "Several boundaries share this key");
            }
            for key in &report.geo_without_cases {
                info!(district_key = %key, "Boundary with no case rows");
            }
            info!(
                geo_without_cases = report.geo_without_cases.len(),
                cases_without_geo = report.cases_without_geo.len(),
                duplicate_geo_keys = report.duplicate_geo_keys.len(),
                undated_rows = report.undated_rows,
                "Reconciliation summary"
            );

            if !report.is_clean() {
                bail!(
                    "{} case district(s) and {} duplicate boundary key(s) cannot be joined",
                    report.cases_without_geo.len(),
                    report.duplicate_geo_keys.len()
                );
            }
        }
        Commands::PopTemplate { out, no_prefill } => {
            let geo = load_geo(&BasicClient::new(), &sources.geo).await?;
            let rows = match &out {
                Some(path) => {
                    let file = File::create(path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    write_population_template(file, &geo, !no_prefill)?
                }
                None => {
                    let stdout = io::stdout();
                    let mut handle = stdout.lock();
                    let rows = write_population_template(&mut handle, &geo, !no_prefill)?;
                    handle.flush()?;
                    rows
                }
            };
            info!(rows, prefill = !no_prefill, "Population template written");
        }
    }

    Ok(())
}

async fn load_geo(client: &BasicClient, source: &str) -> Result<GeoDataset> {
    let bytes = load_source(client, source).await?;
    GeoDataset::from_reader(bytes.as_slice()).with_context(|| format!("loading districts from {source}"))
}

async fn load_cases(client: &BasicClient, source: &str) -> Result<CaseDataset> {
    let bytes = load_source(client, source).await?;
    CaseDataset::from_reader(bytes.as_slice()).with_context(|| format!("loading cases from {source}"))
}

/// Loads every source and builds the shared context. Nothing is written
/// until this succeeds.
#[tracing::instrument(skip(sources), fields(cases = %sources.cases, geo = %sources.geo))]
async fn load_context(sources: &Sources) -> Result<MapContext> {
    let client = BasicClient::new();
    let geo = load_geo(&client, &sources.geo).await?;
    let cases = load_cases(&client, &sources.cases).await?;

    let population = match &sources.population {
        Some(source) => {
            let bytes = load_source(&client, source).await?;
            let table = PopulationTable::from_reader(bytes.as_slice())
                .with_context(|| format!("loading populations from {source}"))?;
            info!(districts = table.len(), "Population overrides loaded");
            Some(table)
        }
        None => None,
    };

    let options = ContextOptions {
        percentile: sources.percentile,
        duplicates: sources.duplicates,
    };
    Ok(MapContext::new(geo, cases, population.as_ref(), options)?)
}

#[tracing::instrument(skip(ctx, render, year_month), fields(year_month = %year_month))]
fn build_month(
    ctx: &MapContext,
    output_dir: &Path,
    year_month: YearMonth,
    render: &RenderArgs,
) -> Result<()> {
    if !ctx.months().contains(&year_month) {
        warn!("No case rows for this month, every district will show as no data");
    }

    let view = ctx.render(&render.request(year_month))?;
    info!(title = %view.title(), "Rendering");
    write_month(output_dir, &view)?;

    let scales = ctx.scales().with_scale(render.metric, view.style.scale);
    write_index(output_dir, render.metric, &scales)?;
    Ok(())
}

#[tracing::instrument(skip(ctx, render))]
fn build_all(
    ctx: &MapContext,
    output_dir: &Path,
    from: Option<YearMonth>,
    to: Option<YearMonth>,
    render: &RenderArgs,
) -> Result<()> {
    let months: Vec<YearMonth> = ctx
        .months()
        .into_iter()
        .filter(|ym| from.is_none_or(|f| *ym >= f) && to.is_none_or(|t| *ym <= t))
        .collect();

    if months.is_empty() {
        warn!("No months to build");
        return Ok(());
    }

    let views = months
        .iter()
        .map(|ym| ctx.render(&render.request(*ym)))
        .collect::<dengue_map::Result<Vec<_>>>()?;

    for view in &views {
        write_month(output_dir, view)?;
    }
    write_merged_csv(output_dir, &views)?;

    let scale = views[0].style.scale;
    let index = write_index(output_dir, render.metric, &ctx.scales().with_scale(render.metric, scale))?;

    info!(
        built = views.len(),
        indexed = index.months.len(),
        output_dir = %output_dir.display(),
        "Finished building all months"
    );
    Ok(())
}
