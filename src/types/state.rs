use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Bias, Side, StrategyId, StructureEvent, Timeframe, Trend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupertrendDirection {
    Long,
    Short,
    Neutral,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MaReading {
    pub value: Decimal,
    pub price_above: bool,
    pub price_below: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StrategySnapshot {
    pub supertrend_value: Decimal,
    pub supertrend_direction: SupertrendDirection,
    pub sma200: MaReading,
    pub ema1000: MaReading,
    pub structure_bias: Bias,
    pub trend: Trend,
    pub last_bos: Option<StructureEvent>,
    pub last_choch: Option<StructureEvent>,
    pub protected_level: Option<Decimal>,
    pub last_price: Decimal,
    pub dist_to_sma200_pct: Decimal,
    pub dist_to_ema1000_pct: Decimal,
    pub dist_to_supertrend_pct: Decimal,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct KeyLevels {
    pub protected_swing_high: Option<Decimal>,
    pub protected_swing_low: Option<Decimal>,
    pub last_swing_high: Option<Decimal>,
    pub last_swing_low: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyState {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub candle_close_time: DateTime<Utc>,
    pub bias: Bias,
    pub allow_long_entry: bool,
    pub allow_short_entry: bool,
    pub strategy_id: Option<StrategyId>,
    pub key_levels: KeyLevels,
    pub snapshot: StrategySnapshot,
}

impl StrategyState {
    /// Invariant 1 (spec 8): allowLongEntry ⇒ supertrendDir=LONG,
    /// allowShortEntry ⇒ supertrendDir=SHORT, strategyId=null ⇔ neither
    /// entry is allowed.
    #[cfg(test)]
    pub fn upholds_entry_invariant(&self) -> bool {
        let dir = self.snapshot.supertrend_direction;
        let long_ok = !self.allow_long_entry || dir == SupertrendDirection::Long;
        let short_ok = !self.allow_short_entry || dir == SupertrendDirection::Short;
        let strategy_ok =
            self.strategy_id.is_none() == (!self.allow_long_entry && !self.allow_short_entry);
        long_ok && short_ok && strategy_ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolState {
    Flat,
    InLong,
    InShort,
    Exiting,
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    StopLoss,
    Invalidation,
}

#[derive(Debug, Clone)]
pub struct StateMachineEntry {
    pub symbol: String,
    pub state: SymbolState,
    pub side: Option<Side>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub lock_reason: Option<LockReason>,
}

impl StateMachineEntry {
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            state: SymbolState::Flat,
            side: None,
            lock_expires_at: None,
            lock_reason: None,
        }
    }

    pub fn has_open_position(&self) -> bool {
        matches!(self.state, SymbolState::InLong | SymbolState::InShort)
    }
}
