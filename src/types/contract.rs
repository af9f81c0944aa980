use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlRule {
    Swing,
    Supertrend,
    Price,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TpRule {
    None,
    Rr,
    Price,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrailMode {
    Supertrend,
    Structure,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractStatus {
    Pending,
    Executed,
    Rejected,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentAction {
    EnterLong,
    EnterShort,
    Close,
    ClosePartial,
    MoveSl,
    Pause,
    Resume,
    WatchCreate,
    WatchCancel,
    Info,
    Opinion,
    Unknown,
}

/// A structured intent as produced by the (out-of-scope) natural-language
/// parser. Every field beyond `action`/`symbol` is optional; the contract
/// builder fills in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Intent {
    pub action: Option<IntentAction>,
    pub symbol: Option<String>,
    pub risk_percent: Option<Decimal>,
    pub leverage: Option<u32>,
    pub sl_rule: Option<SlRule>,
    pub sl_price: Option<Decimal>,
    pub tp_rule: Option<TpRule>,
    pub tp_price: Option<Decimal>,
    pub tp_rr: Option<Decimal>,
    pub trail_mode: Option<TrailMode>,
    pub close_percent: Option<Decimal>,
    pub new_sl_price: Option<Decimal>,
    pub confidence: Option<Decimal>,
    pub clarification: Option<String>,
}

impl Intent {
    pub fn enter(symbol: impl Into<String>, side: Side) -> Self {
        Self {
            action: Some(match side {
                Side::Long => IntentAction::EnterLong,
                Side::Short => IntentAction::EnterShort,
            }),
            symbol: Some(symbol.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeContract {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
    pub risk_percent: Decimal,
    pub leverage: u32,
    pub leverage_clamped: bool,
    pub sl_rule: SlRule,
    pub sl_price: Option<Decimal>,
    pub emergency_sl_percent: Decimal,
    pub tp_rule: TpRule,
    pub tp_price: Option<Decimal>,
    pub tp_rr: Option<Decimal>,
    pub trail_mode: TrailMode,
    pub status: ContractStatus,
    pub reject_reason: Option<String>,
    pub order_id: Option<String>,
    pub entry_price: Option<Decimal>,
    pub position_size: Option<Decimal>,
    pub actual_sl_price: Option<Decimal>,
    pub actual_tp_price: Option<Decimal>,
}

pub const MAX_LEVERAGE: u32 = 10;
pub const DEFAULT_LEVERAGE: u32 = 5;
pub const DEFAULT_RISK_PERCENT: Decimal = dec!(0.5);
pub const DEFAULT_EMERGENCY_SL_PERCENT: Decimal = dec!(4);

impl TradeContract {
    fn rejected(symbol: String, side: Side, reason: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            symbol,
            side,
            risk_percent: DEFAULT_RISK_PERCENT,
            leverage: DEFAULT_LEVERAGE,
            leverage_clamped: false,
            sl_rule: SlRule::Swing,
            sl_price: None,
            emergency_sl_percent: DEFAULT_EMERGENCY_SL_PERCENT,
            tp_rule: TpRule::None,
            tp_price: None,
            tp_rr: None,
            trail_mode: TrailMode::Supertrend,
            status: ContractStatus::Rejected,
            reject_reason: Some(reason.to_string()),
            order_id: None,
            entry_price: None,
            position_size: None,
            actual_sl_price: None,
            actual_tp_price: None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.status, ContractStatus::Rejected)
    }
}

/// Validates and defaults an intent into a `TradeContract`. Rejection is
/// terminal: the first violation found sets `status = Rejected` with a
/// single `reject_reason` and returns immediately.
pub fn create_trade_contract(intent: &Intent, side: Side) -> TradeContract {
    let symbol = match &intent.symbol {
        Some(s) if !s.is_empty() => s.clone(),
        _ => return TradeContract::rejected(String::new(), side, "missing symbol"),
    };

    let risk_percent = intent.risk_percent.unwrap_or(DEFAULT_RISK_PERCENT);
    if risk_percent <= Decimal::ZERO {
        return TradeContract::rejected(symbol, side, "riskPercent must be > 0");
    }

    let requested_leverage = intent.leverage.unwrap_or(DEFAULT_LEVERAGE);
    if requested_leverage == 0 {
        return TradeContract::rejected(symbol, side, "leverage must be >= 1");
    }
    let leverage_clamped = requested_leverage > MAX_LEVERAGE;
    let leverage = requested_leverage.min(MAX_LEVERAGE);

    let sl_rule = intent.sl_rule.unwrap_or(SlRule::Swing);
    if matches!(sl_rule, SlRule::Price) && intent.sl_price.is_none() {
        return TradeContract::rejected(symbol, side, "slRule=PRICE requires slPrice");
    }

    let tp_rule = intent.tp_rule.unwrap_or(TpRule::None);
    match tp_rule {
        TpRule::Price if intent.tp_price.is_none() => {
            return TradeContract::rejected(symbol, side, "tpRule=PRICE requires tpPrice");
        }
        TpRule::Rr if intent.tp_rr.is_none() => {
            return TradeContract::rejected(symbol, side, "tpRule=RR requires tpRR");
        }
        _ => {}
    }

    let emergency_sl_percent = DEFAULT_EMERGENCY_SL_PERCENT;
    let trail_mode = intent.trail_mode.unwrap_or(TrailMode::Supertrend);

    TradeContract {
        id: Uuid::new_v4().to_string(),
        created_at: Utc::now(),
        symbol,
        side,
        risk_percent,
        leverage,
        leverage_clamped,
        sl_rule,
        sl_price: intent.sl_price,
        emergency_sl_percent,
        tp_rule,
        tp_price: intent.tp_price,
        tp_rr: intent.tp_rr,
        trail_mode,
        status: ContractStatus::Pending,
        reject_reason: None,
        order_id: None,
        entry_price: None,
        position_size: None,
        actual_sl_price: None,
        actual_tp_price: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_when_intent_is_bare() {
        let intent = Intent::enter("BTCUSDT", Side::Long);
        let contract = create_trade_contract(&intent, Side::Long);
        assert_eq!(contract.status, ContractStatus::Pending);
        assert_eq!(contract.risk_percent, DEFAULT_RISK_PERCENT);
        assert_eq!(contract.leverage, DEFAULT_LEVERAGE);
        assert_eq!(contract.sl_rule, SlRule::Swing);
        assert_eq!(contract.tp_rule, TpRule::None);
        assert_eq!(contract.trail_mode, TrailMode::Supertrend);
        assert_eq!(contract.emergency_sl_percent, DEFAULT_EMERGENCY_SL_PERCENT);
    }

    #[test]
    fn leverage_above_cap_is_clamped_and_flagged() {
        let mut intent = Intent::enter("BTCUSDT", Side::Long);
        intent.leverage = Some(25);
        let contract = create_trade_contract(&intent, Side::Long);
        assert!(!contract.is_rejected());
        assert_eq!(contract.leverage, MAX_LEVERAGE);
        assert!(contract.leverage_clamped);
    }

    #[test]
    fn zero_risk_percent_is_rejected() {
        let mut intent = Intent::enter("BTCUSDT", Side::Long);
        intent.risk_percent = Some(Decimal::ZERO);
        let contract = create_trade_contract(&intent, Side::Long);
        assert!(contract.is_rejected());
    }

    #[test]
    fn price_sl_rule_requires_sl_price() {
        let mut intent = Intent::enter("BTCUSDT", Side::Long);
        intent.sl_rule = Some(SlRule::Price);
        let contract = create_trade_contract(&intent, Side::Long);
        assert!(contract.is_rejected());
        assert_eq!(contract.reject_reason.as_deref(), Some("slRule=PRICE requires slPrice"));
    }

    #[test]
    fn rr_tp_rule_requires_tp_rr() {
        let mut intent = Intent::enter("BTCUSDT", Side::Long);
        intent.tp_rule = Some(TpRule::Rr);
        let contract = create_trade_contract(&intent, Side::Long);
        assert!(contract.is_rejected());
    }
}
