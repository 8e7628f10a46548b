use crate::domain::DailyBar;
use crate::ingest::HistorySource;
use anyhow::Context;
use chrono::NaiveDate;

type BarRow = (NaiveDate, f64, f64, f64, f64, f64, Option<f64>);

/// Bar history read from the `daily_bars` table. Rows are written by the
/// end-of-day ingestion job, never by this crate.
#[derive(Debug, Clone)]
pub struct PgHistorySource {
    pool: sqlx::PgPool,
}

impl PgHistorySource {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl HistorySource for PgHistorySource {
    async fn daily_bars(&self, code: &str, limit: usize) -> anyhow::Result<Option<Vec<DailyBar>>> {
        anyhow::ensure!(limit >= 1, "history limit must be >= 1");

        let rows = sqlx::query_as::<_, BarRow>(
            "SELECT trade_date, open, high, low, close, volume, amount \
             FROM daily_bars \
             WHERE code = $1 \
             ORDER BY trade_date DESC \
             LIMIT $2",
        )
        .persistent(false)
        .bind(code)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("select daily_bars failed for {code}"))?;

        if rows.is_empty() {
            return Ok(None);
        }

        Ok(Some(rows_to_bars(rows)))
    }
}

fn rows_to_bars(rows: Vec<BarRow>) -> Vec<DailyBar> {
    // Newest first from the query; analyzers expect oldest first.
    rows.into_iter()
        .rev()
        .map(|(date, open, high, low, close, volume, amount)| DailyBar {
            date,
            open,
            high,
            low,
            close,
            volume,
            amount,
        })
        .collect()
}
