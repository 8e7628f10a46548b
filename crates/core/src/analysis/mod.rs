pub mod http;

use crate::domain::{DailyBar, TrendVerdict};

pub use http::HttpAnalyzerClient;

/// Technical analysis over a daily bar series (oldest first).
#[async_trait::async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, code: &str, bars: &[DailyBar]) -> anyhow::Result<TrendVerdict>;
}
