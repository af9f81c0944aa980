use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::Timeframe;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolSettings {
    pub timeframe: Timeframe,
    pub supertrend_period: usize,
    pub supertrend_multiplier: Decimal,
    pub sma200_period: usize,
    pub ema1000_period: usize,
    pub swing_lookback: usize,
    pub enabled: bool,
}

impl Default for SymbolSettings {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::M5,
            supertrend_period: 5,
            supertrend_multiplier: dec!(8.0),
            sma200_period: 200,
            ema1000_period: 1000,
            swing_lookback: 5,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    pub max_leverage: u32,
    pub default_leverage: u32,
    pub default_risk_percent: Decimal,
    pub anti_rage_lock_duration_secs: u64,
    pub backfill_candle_count: usize,
    pub backfill_batch_size: usize,
    pub candle_flush_interval_secs: u64,
    pub watch_expiry_check_interval_secs: u64,
    pub watch_retention_secs: u64,
    /// Stand-in for the out-of-scope wallet/equity endpoint: the notional
    /// the risk-based position-size formula sizes against, since the
    /// exchange boundary (spec 6) exposes no balance query.
    pub risk_reference_notional: Decimal,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            max_leverage: 10,
            default_leverage: 5,
            default_risk_percent: dec!(0.5),
            anti_rage_lock_duration_secs: 900,
            backfill_candle_count: 1200,
            backfill_batch_size: 200,
            candle_flush_interval_secs: 5,
            watch_expiry_check_interval_secs: 60,
            watch_retention_secs: 86_400,
            risk_reference_notional: dec!(10_000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub symbols: HashMap<String, SymbolSettings>,
}

impl Settings {
    /// Collects every violation instead of failing fast, matching the
    /// startup-diagnostics style this configuration layer is for; this is
    /// distinct from `TradeContract` validation, which rejects on the
    /// first violation (spec 4.5).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.general.max_leverage == 0 {
            errors.push("general.max_leverage must be > 0".to_string());
        }
        if self.general.default_leverage == 0 || self.general.default_leverage > self.general.max_leverage {
            errors.push("general.default_leverage must be in 1..=max_leverage".to_string());
        }
        if self.general.default_risk_percent <= Decimal::ZERO {
            errors.push("general.default_risk_percent must be > 0".to_string());
        }
        if self.general.backfill_batch_size == 0 || self.general.backfill_batch_size > 200 {
            errors.push("general.backfill_batch_size must be in 1..=200".to_string());
        }
        if self.general.risk_reference_notional <= Decimal::ZERO {
            errors.push("general.risk_reference_notional must be > 0".to_string());
        }

        if self.symbols.is_empty() {
            errors.push("at least one symbol must be configured".to_string());
        }
        for (symbol, cfg) in &self.symbols {
            if cfg.ema1000_period == 0 {
                errors.push(format!("{symbol}: ema1000_period must be > 0"));
            }
            if cfg.sma200_period == 0 {
                errors.push(format!("{symbol}: sma200_period must be > 0"));
            }
            if cfg.swing_lookback == 0 {
                errors.push(format!("{symbol}: swing_lookback must be > 0"));
            }
            if cfg.supertrend_period == 0 {
                errors.push(format!("{symbol}: supertrend_period must be > 0"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn symbol(&self, symbol: &str) -> Option<&SymbolSettings> {
        self.symbols.get(symbol)
    }
}
