use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tickwatch_core::analysis::HttpAnalyzerClient;
use tickwatch_core::config::{IntradaySettings, Settings};
use tickwatch_core::filter::ResultFilter;
use tickwatch_core::ingest::HttpQuoteProvider;
use tickwatch_core::pipeline::{parse_watchlist, AnalysisPipeline};
use tickwatch_core::scheduler::TradingScheduler;
use tickwatch_core::storage::PgHistorySource;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod report;
mod task;

#[derive(Debug, Parser)]
#[command(name = "tickwatch_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze the watchlist once and print every result the filter lets through.
    Once {
        /// Comma-separated codes. Defaults to STOCK_LIST.
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
    },
    /// Arm the trading-day scheduler and run until Ctrl-C.
    Run {
        /// Comma-separated codes. Defaults to STOCK_LIST.
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let intraday = IntradaySettings::from_env()?;

    match args.command {
        Command::Once { symbols } => {
            let watchlist = resolve_watchlist(&symbols, &intraday)?;
            let pipeline = build_pipeline(&settings, &intraday).await?;
            run_once(&pipeline, &watchlist).await
        }
        Command::Run { symbols } => {
            let watchlist = resolve_watchlist(&symbols, &intraday)?;
            let pipeline = build_pipeline(&settings, &intraday).await?;
            run_scheduler(pipeline, watchlist, &intraday).await
        }
    }
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

fn resolve_watchlist(cli: &[String], intraday: &IntradaySettings) -> anyhow::Result<Vec<String>> {
    let watchlist = if cli.is_empty() {
        intraday.watchlist.clone()
    } else {
        parse_watchlist(&cli.join(","))
    };
    anyhow::ensure!(
        !watchlist.is_empty(),
        "no symbols to watch: pass --symbols or set STOCK_LIST"
    );
    Ok(watchlist)
}

async fn build_pipeline(
    settings: &Settings,
    intraday: &IntradaySettings,
) -> anyhow::Result<AnalysisPipeline> {
    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(intraday.max_workers.max(1) as u32 + 2)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    tickwatch_core::storage::migrate(&pool).await?;

    let quotes = HttpQuoteProvider::from_settings(settings)?;
    let analyzer = HttpAnalyzerClient::from_settings(settings)?;
    let filter = ResultFilter::new(intraday.filter_settings())?;

    AnalysisPipeline::new(
        Arc::new(quotes),
        Arc::new(PgHistorySource::new(pool)),
        Arc::new(analyzer),
        Arc::new(filter),
        intraday.pipeline_settings()?,
    )
}

async fn run_once(pipeline: &AnalysisPipeline, watchlist: &[String]) -> anyhow::Result<()> {
    let (accepted, summary) = pipeline.run_with_summary(watchlist).await;

    for result in &accepted {
        println!("{}\n", report::detail_block(result));
    }
    println!(
        "{} analyzed, {} skipped, {} failed, {} notified in {:.1}s",
        summary.succeeded,
        summary.skipped,
        summary.failed,
        summary.notified,
        summary.elapsed.as_secs_f64()
    );

    let stats = serde_json::to_string(&pipeline.filter().stats())?;
    tracing::debug!(%stats, "filter stats");
    Ok(())
}

async fn run_scheduler(
    pipeline: AnalysisPipeline,
    watchlist: Vec<String>,
    intraday: &IntradaySettings,
) -> anyhow::Result<()> {
    let offset = intraday.market_offset()?;
    let mut scheduler =
        TradingScheduler::new(intraday.calendar(), intraday.poll_interval(), offset)?;

    tracing::info!(symbols = watchlist.len(), "watchlist loaded");
    let task = Arc::new(task::SessionTask::new(Arc::new(pipeline), watchlist, offset)).into_task();
    scheduler.register_triggers(&intraday.time_points, task)?;

    let shutdown = scheduler.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("ctrl-c received; stopping after the current poll");
                shutdown.request();
            }
            Err(err) => tracing::error!(error = %err, "failed to listen for ctrl-c"),
        }
    });

    scheduler.run().await
}
