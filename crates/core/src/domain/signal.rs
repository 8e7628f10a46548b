use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuySignal {
    StrongBuy,
    Buy,
    Hold,
    Wait,
    Sell,
    StrongSell,
}

impl BuySignal {
    pub const ALL: [BuySignal; 6] = [
        BuySignal::StrongBuy,
        BuySignal::Buy,
        BuySignal::Hold,
        BuySignal::Wait,
        BuySignal::Sell,
        BuySignal::StrongSell,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BuySignal::StrongBuy => "STRONG_BUY",
            BuySignal::Buy => "BUY",
            BuySignal::Hold => "HOLD",
            BuySignal::Wait => "WAIT",
            BuySignal::Sell => "SELL",
            BuySignal::StrongSell => "STRONG_SELL",
        }
    }

    pub fn is_buy_family(self) -> bool {
        matches!(self, BuySignal::StrongBuy | BuySignal::Buy)
    }

    pub fn is_sell_family(self) -> bool {
        matches!(self, BuySignal::StrongSell | BuySignal::Sell)
    }

    pub fn is_neutral(self) -> bool {
        matches!(self, BuySignal::Hold | BuySignal::Wait)
    }

    /// Buy-family to sell-family or back. Neutral signals never reverse.
    pub fn is_reversal_of(self, previous: BuySignal) -> bool {
        (previous.is_buy_family() && self.is_sell_family())
            || (previous.is_sell_family() && self.is_buy_family())
    }
}

impl fmt::Display for BuySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuySignal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        BuySignal::ALL
            .into_iter()
            .find(|sig| sig.as_str() == wanted)
            .ok_or_else(|| anyhow::anyhow!("unknown signal type: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendStatus {
    StrongBull,
    Bull,
    WeakBull,
    Consolidation,
    WeakBear,
    Bear,
    StrongBear,
}

impl TrendStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TrendStatus::StrongBull => "STRONG_BULL",
            TrendStatus::Bull => "BULL",
            TrendStatus::WeakBull => "WEAK_BULL",
            TrendStatus::Consolidation => "CONSOLIDATION",
            TrendStatus::WeakBear => "WEAK_BEAR",
            TrendStatus::Bear => "BEAR",
            TrendStatus::StrongBear => "STRONG_BEAR",
        }
    }
}

impl fmt::Display for TrendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MacdStatus {
    GoldenCrossZero,
    GoldenCross,
    Bullish,
    CrossingUp,
    CrossingDown,
    Bearish,
    DeathCross,
}

impl MacdStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MacdStatus::GoldenCrossZero => "GOLDEN_CROSS_ZERO",
            MacdStatus::GoldenCross => "GOLDEN_CROSS",
            MacdStatus::Bullish => "BULLISH",
            MacdStatus::CrossingUp => "CROSSING_UP",
            MacdStatus::CrossingDown => "CROSSING_DOWN",
            MacdStatus::Bearish => "BEARISH",
            MacdStatus::DeathCross => "DEATH_CROSS",
        }
    }

    pub fn is_cross(self) -> bool {
        matches!(
            self,
            MacdStatus::GoldenCrossZero | MacdStatus::GoldenCross | MacdStatus::DeathCross
        )
    }
}

impl fmt::Display for MacdStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
