use std::collections::HashMap;

use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::events::{DomainEvent, EventBus};
use crate::execution::sl_manager::SlManager;
use crate::types::{TrailMode, Side};

/// Per-candle-close trailing of the strategic SL (spec 4.9). Ratchet rule
/// grounded directly on the teacher's `ATRTrailingStop`
/// (`current.max(new_stop)` for longs, `current.min(new_stop)` for
/// shorts): the candidate source changes (Supertrend value or protected
/// swing instead of an ATR-distance offset) but the monotonicity
/// invariant is identical.
pub struct TrailingManager {
    active: RwLock<HashMap<String, (TrailMode, Side)>>,
    events: EventBus,
}

impl TrailingManager {
    pub fn new(events: EventBus) -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub async fn activate(&self, symbol: &str, mode: TrailMode, side: Side) {
        if mode == TrailMode::None {
            return;
        }
        self.active.write().await.insert(symbol.to_string(), (mode, side));
    }

    pub async fn deactivate(&self, symbol: &str) {
        self.active.write().await.remove(symbol);
    }

    /// Advances the strategic SL iff `candidate` is strictly tighter than
    /// the current record; never loosens (spec 4.9, testable property 5).
    pub async fn advance(&self, symbol: &str, sl_manager: &SlManager, candidate: Decimal) {
        let Some((_, side)) = self.active.read().await.get(symbol).copied() else {
            return;
        };
        let Some(current) = sl_manager.strategic_sl(symbol).await else {
            sl_manager.arm(symbol, candidate).await;
            return;
        };

        let tighter = match side {
            Side::Long => candidate > current,
            Side::Short => candidate < current,
        };
        if tighter {
            sl_manager.set_strategic_sl(symbol, candidate).await;
            self.events.publish(DomainEvent::SlTrailed {
                symbol: symbol.to_string(),
                old: current,
                new: candidate,
            });
        }
    }

    pub async fn mode_of(&self, symbol: &str) -> Option<TrailMode> {
        self.active.read().await.get(symbol).map(|(mode, _)| *mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn long_strategic_sl_never_decreases() {
        let events = EventBus::default();
        let trailing = TrailingManager::new(events.clone());
        let sl_manager = SlManager::new(events);
        trailing.activate("BTCUSDT", TrailMode::Supertrend, Side::Long).await;

        trailing.advance("BTCUSDT", &sl_manager, dec!(100)).await;
        assert_eq!(sl_manager.strategic_sl("BTCUSDT").await, Some(dec!(100)));

        trailing.advance("BTCUSDT", &sl_manager, dec!(95)).await;
        assert_eq!(sl_manager.strategic_sl("BTCUSDT").await, Some(dec!(100)));

        trailing.advance("BTCUSDT", &sl_manager, dec!(105)).await;
        assert_eq!(sl_manager.strategic_sl("BTCUSDT").await, Some(dec!(105)));
    }

    #[tokio::test]
    async fn short_strategic_sl_never_increases() {
        let events = EventBus::default();
        let trailing = TrailingManager::new(events.clone());
        let sl_manager = SlManager::new(events);
        trailing.activate("ETHUSDT", TrailMode::Structure, Side::Short).await;

        trailing.advance("ETHUSDT", &sl_manager, dec!(100)).await;
        trailing.advance("ETHUSDT", &sl_manager, dec!(105)).await;
        assert_eq!(sl_manager.strategic_sl("ETHUSDT").await, Some(dec!(100)));

        trailing.advance("ETHUSDT", &sl_manager, dec!(98)).await;
        assert_eq!(sl_manager.strategic_sl("ETHUSDT").await, Some(dec!(98)));
    }
}
