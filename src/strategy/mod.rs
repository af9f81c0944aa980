use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::SymbolSettings;
use crate::error::AppError;
use crate::events::{DomainEvent, EventBus};
use crate::indicators::swings::analyze_structure;
use crate::indicators::{Supertrend, EMA, SMA};
use crate::persistence::Persistence;
use crate::types::{
    Bias, Candle, KeyLevels, MaReading, StrategyId, StrategySnapshot, StrategyState,
    SupertrendDirection,
};

struct SymbolRuntime {
    supertrend: Supertrend,
    sma200: SMA,
    ema1000: EMA,
    candles_seen: usize,
    last_bias: Option<Bias>,
    last_supertrend_dir: Option<SupertrendDirection>,
}

impl SymbolRuntime {
    fn new(cfg: &SymbolSettings) -> Self {
        Self {
            supertrend: Supertrend::new(cfg.supertrend_period, cfg.supertrend_multiplier),
            sma200: SMA::new(cfg.sma200_period),
            ema1000: EMA::new(cfg.ema1000_period),
            candles_seen: 0,
            last_bias: None,
            last_supertrend_dir: None,
        }
    }
}

/// Recomputes derived state for a symbol on every matching-timeframe
/// candle close and selects the active strategy id (spec 4.3). Grounded on
/// the teacher's incremental per-candle indicator update loop, generalized
/// from the teacher's pluggable multi-strategy dispatch to the fixed
/// S101/S102/S103 priority rule.
pub struct StrategyEngine {
    runtimes: RwLock<HashMap<String, SymbolRuntime>>,
    symbol_settings: HashMap<String, SymbolSettings>,
    events: EventBus,
    persistence: Arc<dyn Persistence>,
}

impl StrategyEngine {
    pub fn new(
        symbol_settings: HashMap<String, SymbolSettings>,
        events: EventBus,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        Self {
            runtimes: RwLock::new(HashMap::new()),
            symbol_settings,
            events,
            persistence,
        }
    }

    /// Processes one closed candle. `history` must include the closing
    /// candle as its last element and enough prior candles to satisfy the
    /// symbol's swing lookback. Returns `None` when the configured
    /// timeframe doesn't match or fewer than `ema1000Period` candles have
    /// been buffered yet (spec 4.3).
    pub async fn on_candle_close(
        &self,
        candle: &Candle,
        history: &[Candle],
    ) -> Result<Option<StrategyState>, AppError> {
        let Some(cfg) = self.symbol_settings.get(&candle.symbol) else {
            return Ok(None);
        };
        if candle.timeframe != cfg.timeframe {
            return Ok(None);
        }

        let mut runtimes = self.runtimes.write().await;
        let runtime = runtimes
            .entry(candle.symbol.clone())
            .or_insert_with(|| SymbolRuntime::new(cfg));

        runtime.candles_seen += 1;
        let supertrend_reading = runtime.supertrend.update(candle.high, candle.low, candle.close);
        runtime.sma200.update(candle.close);
        runtime.ema1000.update(candle.close);

        if runtime.candles_seen <= cfg.ema1000_period {
            return Ok(None);
        }

        let Some(st) = supertrend_reading else {
            return Ok(None);
        };
        let sma200 = runtime
            .sma200
            .reading(candle.close)
            .unwrap_or(MaReading { value: Decimal::ZERO, price_above: false, price_below: false });
        let ema1000 = runtime
            .ema1000
            .reading(candle.close)
            .unwrap_or(MaReading { value: Decimal::ZERO, price_above: false, price_below: false });

        let structure = analyze_structure(history, cfg.swing_lookback);

        let strategy_id = select_strategy(st.direction, sma200.price_above, sma200.price_below, ema1000.price_above, ema1000.price_below);
        let allow_long_entry = st.direction == SupertrendDirection::Long;
        let allow_short_entry = st.direction == SupertrendDirection::Short;

        let protected_level = match structure.trend {
            crate::types::Trend::Uptrend => structure.key_levels.protected_swing_low,
            crate::types::Trend::Downtrend => structure.key_levels.protected_swing_high,
            crate::types::Trend::Ranging => None,
        };

        let snapshot = StrategySnapshot {
            supertrend_value: st.value,
            supertrend_direction: st.direction,
            sma200,
            ema1000,
            structure_bias: structure.bias,
            trend: structure.trend,
            last_bos: structure.last_bos,
            last_choch: structure.last_choch,
            protected_level,
            last_price: candle.close,
            dist_to_sma200_pct: signed_percent_distance(candle.close, sma200.value),
            dist_to_ema1000_pct: signed_percent_distance(candle.close, ema1000.value),
            dist_to_supertrend_pct: signed_percent_distance(candle.close, st.value),
        };

        let key_levels = KeyLevels {
            protected_swing_high: structure.key_levels.protected_swing_high,
            protected_swing_low: structure.key_levels.protected_swing_low,
            last_swing_high: structure.key_levels.last_swing_high,
            last_swing_low: structure.key_levels.last_swing_low,
        };

        let state = StrategyState {
            symbol: candle.symbol.clone(),
            timeframe: candle.timeframe,
            timestamp: Utc::now(),
            candle_close_time: candle.close_time,
            bias: structure.bias,
            allow_long_entry,
            allow_short_entry,
            strategy_id,
            key_levels,
            snapshot,
        };

        if runtime.last_bias != Some(structure.bias) {
            if let Some(from) = runtime.last_bias {
                self.events.publish(DomainEvent::BiasFlipped {
                    symbol: candle.symbol.clone(),
                    from,
                    to: structure.bias,
                });
            }
            runtime.last_bias = Some(structure.bias);
        }
        if runtime.last_supertrend_dir != Some(st.direction) {
            if let Some(from) = runtime.last_supertrend_dir {
                self.events.publish(DomainEvent::SupertrendFlipped {
                    symbol: candle.symbol.clone(),
                    from,
                    to: st.direction,
                });
            }
            runtime.last_supertrend_dir = Some(st.direction);
        }
        drop(runtimes);

        self.persistence.save_strategy_state(&state).await?;
        self.events.publish(DomainEvent::StateUpdated {
            state: Box::new(state.clone()),
        });

        debug!(symbol = %state.symbol, strategy_id = ?state.strategy_id, "state updated");
        Ok(Some(state))
    }
}

fn select_strategy(
    direction: SupertrendDirection,
    above_sma: bool,
    below_sma: bool,
    above_ema: bool,
    below_ema: bool,
) -> Option<StrategyId> {
    match direction {
        SupertrendDirection::Neutral => None,
        SupertrendDirection::Long => {
            if above_sma {
                Some(StrategyId::S101)
            } else if above_ema {
                Some(StrategyId::S102)
            } else {
                Some(StrategyId::S103)
            }
        }
        SupertrendDirection::Short => {
            if below_sma {
                Some(StrategyId::S101)
            } else if below_ema {
                Some(StrategyId::S102)
            } else {
                Some(StrategyId::S103)
            }
        }
    }
}

fn signed_percent_distance(price: Decimal, reference: Decimal) -> Decimal {
    if reference.is_zero() {
        return Decimal::ZERO;
    }
    ((price - reference) / reference) * Decimal::from(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timeframe;
    use rust_decimal_macros::dec;

    #[test]
    fn neutral_direction_has_no_strategy() {
        assert_eq!(select_strategy(SupertrendDirection::Neutral, true, false, true, false), None);
    }

    #[test]
    fn long_above_sma_is_s101() {
        assert_eq!(
            select_strategy(SupertrendDirection::Long, true, false, true, false),
            Some(StrategyId::S101)
        );
    }

    #[test]
    fn long_below_sma_but_above_ema_is_s102() {
        assert_eq!(
            select_strategy(SupertrendDirection::Long, false, true, true, false),
            Some(StrategyId::S102)
        );
    }

    #[test]
    fn long_with_no_ma_alignment_is_s103() {
        assert_eq!(
            select_strategy(SupertrendDirection::Long, false, true, false, true),
            Some(StrategyId::S103)
        );
    }

    fn candle(symbol: &str, tf: Timeframe, idx: i64, close: Decimal) -> Candle {
        let base = Utc::now() - chrono::Duration::minutes(1000 * 5 - idx * 5);
        Candle {
            symbol: symbol.into(),
            timeframe: tf,
            open_time: base,
            close_time: base + chrono::Duration::minutes(5),
            open: close,
            high: close + dec!(1),
            low: close - dec!(1),
            close,
            volume: dec!(10),
        }
    }

    #[tokio::test]
    async fn skips_emission_below_ema1000_period() {
        let mut settings = HashMap::new();
        settings.insert(
            "BTCUSDT".to_string(),
            SymbolSettings {
                timeframe: Timeframe::M5,
                supertrend_period: 3,
                supertrend_multiplier: dec!(3),
                sma200_period: 5,
                ema1000_period: 10,
                swing_lookback: 2,
                enabled: true,
            },
        );
        let engine = StrategyEngine::new(
            settings,
            EventBus::default(),
            Arc::new(crate::persistence::SledPersistence::open(
                &format!("/tmp/strategy_test_{}", uuid::Uuid::new_v4()),
            )
            .unwrap()),
        );

        let c = candle("BTCUSDT", Timeframe::M5, 0, dec!(100));
        let result = engine.on_candle_close(&c, &[c.clone()]).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn exactly_ema1000_period_candles_produces_no_state_one_more_does() {
        let mut settings = HashMap::new();
        settings.insert(
            "BTCUSDT".to_string(),
            SymbolSettings {
                timeframe: Timeframe::M5,
                supertrend_period: 3,
                supertrend_multiplier: dec!(3),
                sma200_period: 5,
                ema1000_period: 10,
                swing_lookback: 2,
                enabled: true,
            },
        );
        let engine = StrategyEngine::new(
            settings,
            EventBus::default(),
            Arc::new(crate::persistence::SledPersistence::open(
                &format!("/tmp/strategy_test_{}", uuid::Uuid::new_v4()),
            )
            .unwrap()),
        );

        let mut history = Vec::new();
        let mut last_result = None;
        for i in 0..10 {
            let c = candle("BTCUSDT", Timeframe::M5, i, dec!(100) + Decimal::from(i));
            history.push(c.clone());
            last_result = engine.on_candle_close(&c, &history).await.unwrap();
        }
        assert!(last_result.is_none());

        let c = candle("BTCUSDT", Timeframe::M5, 10, dec!(110));
        history.push(c.clone());
        let result = engine.on_candle_close(&c, &history).await.unwrap();
        assert!(result.is_some());
    }
}
