use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::error::AppError;
use crate::events::{DomainEvent, EventBus};
use crate::exchange::{Exchange, PositionSnapshot};
use crate::types::TrackedPosition;
use tokio::sync::RwLock;

/// Authoritative open-position view, seeded from a REST snapshot and kept
/// current by the private position stream (spec 4.7). Grounded on
/// `types/position.rs`'s defensive mark-price guard; open/update/close
/// transitions are new, driven directly by the spec's size-based rule
/// (`0 -> >0` opens, `>0 -> >0` updates, `>0 -> 0` closes).
pub struct PositionTracker {
    positions: RwLock<HashMap<String, TrackedPosition>>,
    exchange: Arc<dyn Exchange>,
    events: EventBus,
}

impl PositionTracker {
    pub fn new(exchange: Arc<dyn Exchange>, events: EventBus) -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            exchange,
            events,
        }
    }

    pub async fn restore_from_rest(&self) -> Result<(), AppError> {
        let snapshots = self.exchange.get_all_positions().await?;
        let mut positions = self.positions.write().await;
        positions.clear();
        for snapshot in snapshots {
            positions.insert(snapshot.symbol.clone(), from_snapshot(snapshot));
        }
        Ok(())
    }

    /// Applies one `position` stream frame (spec 4.7).
    pub async fn on_stream_frame(&self, snapshot: PositionSnapshot) {
        let mut positions = self.positions.write().await;
        let prior_size = positions.get(&snapshot.symbol).map(|p| p.size).unwrap_or(Decimal::ZERO);
        let new_size = snapshot.size;

        if new_size.is_zero() {
            let realized_pnl = snapshot.realized_pnl;
            if let Some(closed) = positions.remove(&snapshot.symbol) {
                drop(positions);
                self.events.publish(DomainEvent::PositionClosed {
                    symbol: closed.symbol,
                    side: closed.side,
                    realized_pnl,
                });
            }
            return;
        }

        if prior_size.is_zero() {
            positions.insert(snapshot.symbol.clone(), from_snapshot(snapshot));
        } else if let Some(existing) = positions.get_mut(&snapshot.symbol) {
            existing.side = snapshot.side;
            existing.size = snapshot.size;
            existing.avg_price = snapshot.avg_price;
            existing.leverage = snapshot.leverage;
            existing.unrealized_pnl = snapshot.unrealized_pnl;
            existing.apply_mark_price(snapshot.mark_price);
            existing.updated_at = chrono::Utc::now();

            let pnl = existing.unrealized_pnl;
            let pnl_pct = existing.pnl_percentage();
            let symbol = existing.symbol.clone();
            drop(positions);

            self.events.publish(DomainEvent::PnlUpdated {
                symbol,
                pnl,
                pnl_percentage: pnl_pct,
            });
        }
    }

    pub async fn get(&self, symbol: &str) -> Option<TrackedPosition> {
        self.positions.read().await.get(symbol).cloned()
    }

    pub async fn has_open_position(&self, symbol: &str) -> bool {
        self.positions.read().await.contains_key(symbol)
    }

    pub async fn set_stop_loss(&self, symbol: &str, price: Decimal) {
        if let Some(position) = self.positions.write().await.get_mut(symbol) {
            position.stop_loss = Some(price);
        }
    }
}

fn from_snapshot(snapshot: PositionSnapshot) -> TrackedPosition {
    TrackedPosition {
        symbol: snapshot.symbol,
        side: snapshot.side,
        size: snapshot.size,
        avg_price: snapshot.avg_price,
        leverage: snapshot.leverage,
        unrealized_pnl: snapshot.unrealized_pnl,
        mark_price: snapshot.mark_price,
        liq_price: None,
        stop_loss: None,
        take_profit: None,
        updated_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeAck;
    use crate::types::{OrderRequest, OrderStatus, Side};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;

    struct StubExchange;

    #[async_trait]
    impl Exchange for StubExchange {
        async fn get_klines(
            &self,
            _symbol: &str,
            _timeframe: crate::types::Timeframe,
            _limit: usize,
            _end: Option<DateTime<Utc>>,
        ) -> Result<Vec<crate::types::Candle>, AppError> {
            Ok(vec![])
        }
        async fn place_market_order(&self, _request: OrderRequest) -> Result<ExchangeAck, AppError> {
            unreachable!()
        }
        async fn place_limit_order(&self, _request: OrderRequest) -> Result<ExchangeAck, AppError> {
            unreachable!()
        }
        async fn cancel_order(&self, _symbol: &str, _id: &str) -> Result<(), AppError> {
            Ok(())
        }
        async fn cancel_all_orders(&self, _symbol: &str) -> Result<(), AppError> {
            Ok(())
        }
        async fn get_position(&self, _symbol: &str) -> Result<Option<PositionSnapshot>, AppError> {
            Ok(None)
        }
        async fn get_all_positions(&self) -> Result<Vec<PositionSnapshot>, AppError> {
            Ok(vec![])
        }
    }

    fn snapshot(size: Decimal) -> PositionSnapshot {
        PositionSnapshot {
            symbol: "BTCUSDT".into(),
            side: Side::Long,
            size,
            avg_price: dec!(100),
            leverage: 5,
            mark_price: dec!(100),
            unrealized_pnl: dec!(0),
            realized_pnl: dec!(0),
        }
    }

    #[tokio::test]
    async fn opens_on_zero_to_positive_transition() {
        let tracker = PositionTracker::new(Arc::new(StubExchange), EventBus::default());
        tracker.on_stream_frame(snapshot(dec!(1))).await;
        assert!(tracker.has_open_position("BTCUSDT").await);
    }

    #[tokio::test]
    async fn closes_on_positive_to_zero_transition() {
        let tracker = PositionTracker::new(Arc::new(StubExchange), EventBus::default());
        tracker.on_stream_frame(snapshot(dec!(1))).await;
        tracker.on_stream_frame(snapshot(dec!(0))).await;
        assert!(!tracker.has_open_position("BTCUSDT").await);
    }

    #[tokio::test]
    async fn position_closed_event_carries_the_closing_frames_realized_pnl() {
        let events = EventBus::default();
        let tracker = PositionTracker::new(Arc::new(StubExchange), events.clone());
        let mut rx = events.subscribe();

        let mut open_frame = snapshot(dec!(1));
        open_frame.unrealized_pnl = dec!(50);
        tracker.on_stream_frame(open_frame).await;

        let mut close_frame = snapshot(dec!(0));
        close_frame.realized_pnl = dec!(12.5);
        tracker.on_stream_frame(close_frame).await;

        let mut saw_close = false;
        while let Ok(emitted) = rx.try_recv() {
            if let DomainEvent::PositionClosed { realized_pnl, .. } = emitted.event {
                assert_eq!(realized_pnl, dec!(12.5));
                saw_close = true;
            }
        }
        assert!(saw_close);
    }

    #[tokio::test]
    async fn zero_mark_price_frame_keeps_previous_mark() {
        let tracker = PositionTracker::new(Arc::new(StubExchange), EventBus::default());
        tracker.on_stream_frame(snapshot(dec!(1))).await;
        let mut bad_frame = snapshot(dec!(1));
        bad_frame.mark_price = Decimal::ZERO;
        tracker.on_stream_frame(bad_frame).await;
        let position = tracker.get("BTCUSDT").await.unwrap();
        assert_eq!(position.mark_price, dec!(100));
    }
}
