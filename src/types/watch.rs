use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Side, SlRule, TrailMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchTrigger {
    CloserToSma200,
    CloserToEma1000,
    CloserToSupertrend,
    PriceAbove,
    PriceBelow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchMode {
    NotifyOnly,
    AutoEnter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchStatus {
    Active,
    Triggered,
    Expired,
    Cancelled,
}

/// The parameters an AUTO_ENTER watch resubmits as an intent once it fires.
/// Re-submission still passes through every orchestrator gate (spec 4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchPreset {
    pub risk_percent: Decimal,
    pub sl_rule: SlRule,
    pub trail_mode: TrailMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchRule {
    pub id: String,
    pub symbol: String,
    pub intended_side: Side,
    pub trigger_type: WatchTrigger,
    pub threshold_percent: Decimal,
    pub target_price: Option<Decimal>,
    pub mode: WatchMode,
    pub expiry_time: DateTime<Utc>,
    pub preset: WatchPreset,
    pub status: WatchStatus,
}

impl WatchRule {
    pub fn new(
        symbol: impl Into<String>,
        intended_side: Side,
        trigger_type: WatchTrigger,
        threshold_percent: Decimal,
        mode: WatchMode,
        expiry_time: DateTime<Utc>,
        preset: WatchPreset,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            intended_side,
            trigger_type,
            threshold_percent,
            target_price: None,
            mode,
            expiry_time,
            preset,
            status: WatchStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, WatchStatus::Active)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}
