use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    /// Maps an exchange-reported status string onto the local enum, per
    /// spec 4.6.
    pub fn from_exchange_str(s: &str) -> Option<Self> {
        match s {
            "New" => Some(OrderStatus::Open),
            "PartiallyFilled" => Some(OrderStatus::PartiallyFilled),
            "Filled" => Some(OrderStatus::Filled),
            "Cancelled" | "Canceled" => Some(OrderStatus::Cancelled),
            "Rejected" => Some(OrderStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OrderFlags {
    pub reduce_only: bool,
    pub is_entry: bool,
    pub is_exit: bool,
    pub is_stop_loss: bool,
    pub is_take_profit: bool,
}

/// A request to place an order, optionally with brackets attached so the
/// exchange places the exit orders atomically with the entry (spec 4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub size: Decimal,
    pub price: Option<Decimal>,
    pub flags: OrderFlags,
    pub attached_stop_loss: Option<Decimal>,
    pub attached_take_profit: Option<Decimal>,
}

impl OrderRequest {
    pub fn market_entry(symbol: impl Into<String>, side: Side, size: Decimal) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            size,
            price: None,
            flags: OrderFlags {
                is_entry: true,
                ..Default::default()
            },
            attached_stop_loss: None,
            attached_take_profit: None,
        }
    }

    pub fn market_exit(symbol: impl Into<String>, side: Side, size: Decimal) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            size,
            price: None,
            flags: OrderFlags {
                is_exit: true,
                reduce_only: true,
                ..Default::default()
            },
            attached_stop_loss: None,
            attached_take_profit: None,
        }
    }

    pub fn with_brackets(mut self, stop_loss: Option<Decimal>, take_profit: Option<Decimal>) -> Self {
        self.attached_stop_loss = stop_loss;
        self.attached_take_profit = take_profit;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedOrder {
    pub id: String,
    pub exchange_order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub size: Decimal,
    pub filled_size: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub status: OrderStatus,
    pub flags: OrderFlags,
    pub trade_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ManagedOrder {
    pub fn from_request(request: &OrderRequest) -> Self {
        let now = Utc::now();
        Self {
            id: request.client_order_id.clone(),
            exchange_order_id: None,
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            price: request.price,
            size: request.size,
            filled_size: Decimal::ZERO,
            avg_fill_price: None,
            status: OrderStatus::Pending,
            flags: request.flags,
            trade_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fill tolerance: spec 4.6 treats an order as FILLED once cumulative
    /// executed size reaches 99.9% of ordered size (an exchange-rounding
    /// allowance, not a correctness knob — see 9. DESIGN NOTES).
    pub fn fill_tolerance_reached(&self) -> bool {
        if self.size.is_zero() {
            return false;
        }
        self.filled_size / self.size >= Decimal::new(999, 3)
    }

    /// Applies a cumulative executed size/value report from the exchange.
    /// Per 9. DESIGN NOTES, fill aggregation must use cumulative figures,
    /// not delta-summing, to avoid floating/rounding drift.
    pub fn apply_cumulative_fill(&mut self, cumulative_size: Decimal, cumulative_avg_price: Decimal) {
        if cumulative_size <= self.filled_size {
            return;
        }
        self.filled_size = cumulative_size;
        self.avg_fill_price = Some(cumulative_avg_price);
        self.status = if self.fill_tolerance_reached() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub exec_id: String,
    pub order_id: String,
    pub price: Decimal,
    pub size: Decimal,
    pub fee: Decimal,
    pub filled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn fill_tolerance_accepts_999_per_mille() {
        let req = OrderRequest::market_entry("BTCUSDT", Side::Long, dec!(1.0));
        let mut order = ManagedOrder::from_request(&req);
        order.apply_cumulative_fill(dec!(0.999), dec!(100));
        assert_eq!(order.status, OrderStatus::Filled);
    }

    #[test]
    fn cumulative_fill_below_tolerance_is_partial() {
        let req = OrderRequest::market_entry("BTCUSDT", Side::Long, dec!(1.0));
        let mut order = ManagedOrder::from_request(&req);
        order.apply_cumulative_fill(dec!(0.5), dec!(100));
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
    }

    #[test]
    fn replayed_cumulative_fill_does_not_regress_status() {
        let req = OrderRequest::market_entry("BTCUSDT", Side::Long, dec!(1.0));
        let mut order = ManagedOrder::from_request(&req);
        order.apply_cumulative_fill(dec!(1.0), dec!(100));
        assert_eq!(order.status, OrderStatus::Filled);
        // replay of an older, smaller cumulative figure must not regress status
        order.apply_cumulative_fill(dec!(0.5), dec!(100));
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_size, dec!(1.0));
    }
}
