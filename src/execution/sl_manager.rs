use std::collections::HashMap;

use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::events::{DomainEvent, EventBus};
use crate::types::Side;

/// Two-layer stop coordination (spec 4.8). The emergency SL is a plain
/// price computed once at entry and placed atomically as an exchange-side
/// bracket order (handled by the order manager, not this type); this type
/// owns only the local "strategic" SL record that trailing/invalidation
/// mutate and that is checked on every candle close. Distance-calc shape
/// grounded on the teacher's `ATR::calculate_stop_loss(entry, multiplier,
/// is_long)`, generalized from ATR-multiple to a flat percent.
#[derive(Default)]
pub struct SlManager {
    strategic_sl: RwLock<HashMap<String, Decimal>>,
    events: EventBus,
}

impl SlManager {
    pub fn new(events: EventBus) -> Self {
        Self {
            strategic_sl: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn emergency_sl_price(entry_price: Decimal, emergency_sl_percent: Decimal, side: Side) -> Decimal {
        let fraction = emergency_sl_percent / Decimal::from(100);
        match side {
            Side::Long => entry_price * (Decimal::ONE - fraction),
            Side::Short => entry_price * (Decimal::ONE + fraction),
        }
    }

    pub async fn arm(&self, symbol: &str, strategic_sl_price: Decimal) {
        self.strategic_sl.write().await.insert(symbol.to_string(), strategic_sl_price);
    }

    pub async fn disarm(&self, symbol: &str) {
        self.strategic_sl.write().await.remove(symbol);
    }

    pub async fn strategic_sl(&self, symbol: &str) -> Option<Decimal> {
        self.strategic_sl.read().await.get(symbol).copied()
    }

    pub async fn set_strategic_sl(&self, symbol: &str, price: Decimal) {
        self.strategic_sl.write().await.insert(symbol.to_string(), price);
    }

    /// Checked only on candle close, per spec 4.8: LONG triggers if
    /// `close < strategicSl`, SHORT if `close > strategicSl`.
    pub async fn check_candle_close(&self, symbol: &str, side: Side, close: Decimal) -> bool {
        let Some(sl) = self.strategic_sl(symbol).await else {
            return false;
        };
        let triggered = match side {
            Side::Long => close < sl,
            Side::Short => close > sl,
        };
        if triggered {
            self.events.publish(DomainEvent::StrategicSlTriggered {
                symbol: symbol.to_string(),
                side,
                sl_price: sl,
                close_price: close,
            });
        }
        triggered
    }
}
