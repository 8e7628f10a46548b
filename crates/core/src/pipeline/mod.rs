pub mod pacing;

use crate::analysis::Analyzer;
use crate::domain::AnalysisResult;
use crate::filter::ResultFilter;
use crate::ingest::{HistorySource, QuoteSource};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

pub use pacing::DispatchPacing;

/// Fewer bars than this and MA20 / MACD / RSI are not stable enough to act on.
pub const MIN_HISTORY_BARS: usize = 20;
pub const DEFAULT_MAX_WORKERS: usize = 3;
pub const DEFAULT_HISTORY_LOOKBACK: usize = 60;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_workers: usize,
    pub pacing: DispatchPacing,
    pub history_lookback: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            pacing: DispatchPacing::default(),
            history_lookback: DEFAULT_HISTORY_LOOKBACK,
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.max_workers >= 1,
            "pipeline needs at least one worker (got {})",
            self.max_workers
        );
        anyhow::ensure!(
            self.history_lookback >= MIN_HISTORY_BARS,
            "history lookback must be >= {MIN_HISTORY_BARS} bars (got {})",
            self.history_lookback
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoQuote,
    NoHistory,
    InsufficientHistory { bars: usize },
}

/// What happened to one symbol in a batch.
#[derive(Debug)]
pub enum SymbolOutcome {
    Analyzed(AnalysisResult),
    Skipped { code: String, reason: SkipReason },
    Failed { code: String, error: anyhow::Error },
}

impl SymbolOutcome {
    pub fn code(&self) -> &str {
        match self {
            SymbolOutcome::Analyzed(r) => &r.code,
            SymbolOutcome::Skipped { code, .. } | SymbolOutcome::Failed { code, .. } => code,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub notified: usize,
    pub elapsed: Duration,
}

struct Units {
    quotes: Arc<dyn QuoteSource>,
    history: Arc<dyn HistorySource>,
    analyzer: Arc<dyn Analyzer>,
    history_lookback: usize,
}

impl Units {
    async fn analyze_one(&self, code: &str) -> SymbolOutcome {
        let quote = match self.quotes.realtime_quote(code).await {
            Ok(Some(quote)) => quote,
            Ok(None) => return skipped(code, SkipReason::NoQuote),
            Err(err) => return failed(code, err.context("quote retrieval failed")),
        };

        let bars = match self.history.daily_bars(code, self.history_lookback).await {
            Ok(Some(bars)) if bars.is_empty() => return skipped(code, SkipReason::NoHistory),
            Ok(Some(bars)) => bars,
            Ok(None) => return skipped(code, SkipReason::NoHistory),
            Err(err) => return failed(code, err.context("history retrieval failed")),
        };

        if bars.len() < MIN_HISTORY_BARS {
            return skipped(code, SkipReason::InsufficientHistory { bars: bars.len() });
        }

        let verdict = match self.analyzer.analyze(code, &bars).await {
            Ok(verdict) => verdict,
            Err(err) => return failed(code, err.context("analyzer failed")),
        };

        let result = AnalysisResult::assemble(code, quote, verdict, Utc::now());
        tracing::info!(
            code,
            name = %result.stock_name,
            price = result.current_price,
            change_pct = result.change_pct,
            signal = %result.buy_signal,
            score = result.signal_score,
            "symbol analyzed"
        );
        SymbolOutcome::Analyzed(result)
    }
}

fn skipped(code: &str, reason: SkipReason) -> SymbolOutcome {
    tracing::warn!(code, ?reason, "symbol skipped");
    SymbolOutcome::Skipped {
        code: code.to_string(),
        reason,
    }
}

fn failed(code: &str, error: anyhow::Error) -> SymbolOutcome {
    let detail = format!("{error:#}");
    tracing::warn!(code, error = %detail, "symbol analysis failed");
    SymbolOutcome::Failed {
        code: code.to_string(),
        error,
    }
}

/// Quote → history → analyzer → filter, across a watchlist.
///
/// Width and pacing are independent knobs: at most `max_workers` units are in flight,
/// and every unit sleeps a jittered delay before it starts fetching.
pub struct AnalysisPipeline {
    units: Arc<Units>,
    filter: Arc<ResultFilter>,
    settings: PipelineSettings,
}

impl AnalysisPipeline {
    pub fn new(
        quotes: Arc<dyn QuoteSource>,
        history: Arc<dyn HistorySource>,
        analyzer: Arc<dyn Analyzer>,
        filter: Arc<ResultFilter>,
        settings: PipelineSettings,
    ) -> anyhow::Result<Self> {
        settings.validate()?;

        tracing::info!(
            max_workers = settings.max_workers,
            sleep_min_ms = settings.pacing.min().as_millis() as u64,
            sleep_max_ms = settings.pacing.max().as_millis() as u64,
            quote_source = quotes.source_name(),
            "analysis pipeline initialized"
        );

        Ok(Self {
            units: Arc::new(Units {
                quotes,
                history,
                analyzer,
                history_lookback: settings.history_lookback,
            }),
            filter,
            settings,
        })
    }

    pub fn filter(&self) -> &Arc<ResultFilter> {
        &self.filter
    }

    /// Analyze one symbol without pacing or filtering.
    pub async fn analyze_one(&self, code: &str) -> SymbolOutcome {
        self.units.analyze_one(code).await
    }

    /// Filter-accepted results, in completion order. Never fails as a whole.
    pub async fn run(&self, symbols: &[String]) -> Vec<AnalysisResult> {
        self.run_with_summary(symbols).await.0
    }

    pub async fn run_with_summary(&self, symbols: &[String]) -> (Vec<AnalysisResult>, BatchSummary) {
        let run_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("intraday_run", %run_id);
        self.run_batch(symbols).instrument(span).await
    }

    async fn run_batch(&self, symbols: &[String]) -> (Vec<AnalysisResult>, BatchSummary) {
        let mut summary = BatchSummary {
            attempted: symbols.len(),
            ..Default::default()
        };
        if symbols.is_empty() {
            tracing::warn!("watchlist is empty; skipping intraday run");
            return (Vec::new(), summary);
        }

        tracing::info!(symbols = symbols.len(), "intraday run started");
        let started = Instant::now();

        let permits = Arc::new(Semaphore::new(self.settings.max_workers));
        let mut join_set = JoinSet::new();

        for code in symbols {
            let units = Arc::clone(&self.units);
            let permits = Arc::clone(&permits);
            let pacing = self.settings.pacing.clone();
            let code = code.clone();

            join_set.spawn(
                async move {
                    let _permit = match permits.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(err) => return failed(&code, anyhow::Error::new(err)),
                    };
                    pacing.pause().await;
                    units.analyze_one(&code).await
                }
                .in_current_span(),
            );
        }

        let mut accepted = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(err) => {
                    summary.failed += 1;
                    tracing::error!(error = %err, "analysis unit aborted");
                    continue;
                }
            };

            if let Some(result) = fold_outcome(&mut summary, outcome) {
                if self.filter.should_notify(&result) {
                    summary.notified += 1;
                    accepted.push(result);
                }
            }
        }

        summary.elapsed = started.elapsed();
        tracing::info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            notified = summary.notified,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "intraday run finished"
        );

        (accepted, summary)
    }
}

fn fold_outcome(summary: &mut BatchSummary, outcome: SymbolOutcome) -> Option<AnalysisResult> {
    match outcome {
        SymbolOutcome::Analyzed(result) => {
            summary.succeeded += 1;
            Some(result)
        }
        SymbolOutcome::Skipped { .. } => {
            summary.skipped += 1;
            None
        }
        SymbolOutcome::Failed { .. } => {
            summary.failed += 1;
            None
        }
    }
}

/// Splits a comma-separated watchlist, dropping blanks and repeated codes.
pub fn parse_watchlist(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in raw.split(',') {
        let code = part.trim();
        if code.is_empty() || out.iter().any(|c| c == code) {
            continue;
        }
        out.push(code.to_string());
    }
    out
}
