pub mod analysis;
pub mod signal;

pub use analysis::{AnalysisResult, DailyBar, RealtimeQuote, TrendVerdict};
pub use signal::{BuySignal, MacdStatus, TrendStatus};
