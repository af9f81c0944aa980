use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;

/// Authoritative view of one open position. Exists only while `size > 0`;
/// the position tracker deletes the entry once size reaches zero rather
/// than representing a "closed" state in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedPosition {
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub avg_price: Decimal,
    pub leverage: u32,
    pub unrealized_pnl: Decimal,
    pub mark_price: Decimal,
    pub liq_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

impl TrackedPosition {
    pub fn position_value(&self) -> Decimal {
        self.avg_price * self.size
    }

    pub fn pnl_percentage(&self) -> Decimal {
        let value = self.position_value();
        if value.is_zero() {
            return Decimal::ZERO;
        }
        (self.unrealized_pnl / value) * Decimal::from(100)
    }

    /// Applies a mark price from the stream. `mark_price` must be strictly
    /// positive; exchanges are known to occasionally send 0 on a malformed
    /// frame, in which case the previous value is kept (spec 4.7).
    pub fn apply_mark_price(&mut self, mark_price: Decimal) {
        if mark_price > Decimal::ZERO {
            self.mark_price = mark_price;
        }
    }
}
