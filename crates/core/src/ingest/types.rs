use crate::domain::RealtimeQuote;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteResponse {
    pub as_of: DateTime<Utc>,
    pub quote: RealtimeQuote,
}
