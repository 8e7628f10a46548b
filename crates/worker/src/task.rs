use chrono::{FixedOffset, NaiveDate, NaiveDateTime};
use futures::FutureExt;
use std::sync::{Arc, Mutex, PoisonError};
use tickwatch_core::domain::AnalysisResult;
use tickwatch_core::pipeline::AnalysisPipeline;
use tickwatch_core::scheduler::Task;
use tickwatch_core::time::market_now;

use crate::report;

/// The scheduled job: one pipeline pass over a fixed watchlist.
///
/// The first trigger on a new trading date starts a new session and empties the filter's
/// notification cache, so yesterday's notifications never suppress today's.
pub struct SessionTask {
    pipeline: Arc<AnalysisPipeline>,
    watchlist: Vec<String>,
    offset: FixedOffset,
    session: Mutex<Option<NaiveDate>>,
}

impl SessionTask {
    pub fn new(pipeline: Arc<AnalysisPipeline>, watchlist: Vec<String>, offset: FixedOffset) -> Self {
        Self {
            pipeline,
            watchlist,
            offset,
            session: Mutex::new(None),
        }
    }

    /// Returns true when `date` starts a new session.
    fn begin_session(&self, date: NaiveDate) -> bool {
        let mut current = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == Some(date) {
            return false;
        }
        let previous = current.replace(date);
        tracing::info!(%date, previous = ?previous, "new trading session");
        self.pipeline.filter().clear_cache();
        true
    }

    pub async fn run_at(&self, fired_at: NaiveDateTime) -> anyhow::Result<Vec<AnalysisResult>> {
        self.begin_session(fired_at.date());

        let (accepted, summary) = self.pipeline.run_with_summary(&self.watchlist).await;
        for result in &accepted {
            tracing::info!(
                code = %result.code,
                signal = %result.buy_signal,
                score = result.signal_score,
                "{}",
                report::summary_line(result)
            );
        }

        anyhow::ensure!(
            summary.attempted == 0 || summary.failed < summary.attempted,
            "every symbol failed analysis ({} of {})",
            summary.failed,
            summary.attempted
        );
        Ok(accepted)
    }

    pub fn into_task(self: Arc<Self>) -> Task {
        Arc::new(move || {
            let this = Arc::clone(&self);
            async move {
                match this.run_at(market_now(this.offset)).await {
                    Ok(_) => Ok(()),
                    Err(err) => {
                        sentry_anyhow::capture_anyhow(&err);
                        Err(err)
                    }
                }
            }
            .boxed()
        })
    }
}
