use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::error::AppError;
use crate::events::{DomainEvent, EventBus};
use crate::execution::order_manager::OrderManager;
use crate::execution::position_tracker::PositionTracker;
use crate::state_machine::StateMachine;
use crate::types::{KeyLevels, LockReason, OrderRequest, Side};

/// Hard-exit monitor for protected-swing breaks on an open position. Not
/// user-suppressible: unlike the strategic SL, there is no gate this path
/// goes through other than the exchange call itself. Retry-once-then-critical
/// shape grounded on the teacher's websocket reconnect loop (bounded retry,
/// then a hard failure an operator has to see).
pub struct InvalidationMonitor {
    order_manager: Arc<OrderManager>,
    position_tracker: Arc<PositionTracker>,
    state_machine: Arc<StateMachine>,
    events: EventBus,
}

impl InvalidationMonitor {
    pub fn new(
        order_manager: Arc<OrderManager>,
        position_tracker: Arc<PositionTracker>,
        state_machine: Arc<StateMachine>,
        events: EventBus,
    ) -> Self {
        Self {
            order_manager,
            position_tracker,
            state_machine,
            events,
        }
    }

    /// Checks one symbol's key levels against the last close on every
    /// `stateUpdate` (spec 4.10). No-op if the symbol has no open position.
    pub async fn check(&self, symbol: &str, last_price: Decimal, key_levels: KeyLevels) {
        let Some(position) = self.position_tracker.get(symbol).await else {
            return;
        };

        let broken_level = match position.side {
            Side::Long => key_levels
                .protected_swing_low
                .filter(|&low| last_price < low),
            Side::Short => key_levels
                .protected_swing_high
                .filter(|&high| last_price > high),
        };

        let Some(level) = broken_level else {
            return;
        };

        self.events.publish(DomainEvent::SwingBreak {
            symbol: symbol.to_string(),
            side: position.side,
            level,
        });

        self.hard_exit(symbol, position.side, position.size).await;
    }

    async fn hard_exit(&self, symbol: &str, side: Side, size: Decimal) {
        let exit_side = match side {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        };
        let request = OrderRequest::market_exit(symbol, exit_side, size);

        if self.order_manager.place_market(request.clone()).await.is_ok() {
            self.state_machine.exit_stopped(symbol, LockReason::Invalidation).await;
            return;
        }

        tokio::time::sleep(Duration::from_secs(1)).await;

        match self.order_manager.place_market(request).await {
            Ok(_) => {
                self.state_machine.exit_stopped(symbol, LockReason::Invalidation).await;
            }
            Err(e) => {
                self.events.publish(DomainEvent::InvalidationCriticalFailure {
                    symbol: symbol.to_string(),
                    detail: format!("hard exit failed twice: {e}"),
                });
            }
        }
    }
}

fn _assert_send_sync(_: &InvalidationMonitor) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{Exchange, ExchangeAck, PositionSnapshot};
    use crate::persistence::SledPersistence;
    use crate::types::{Candle, OrderStatus, Timeframe};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingExchange {
        attempts: AtomicUsize,
        fail_times: usize,
    }

    #[async_trait]
    impl Exchange for FailingExchange {
        async fn get_klines(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            _limit: usize,
            _end: Option<DateTime<Utc>>,
        ) -> Result<Vec<Candle>, AppError> {
            Ok(vec![])
        }
        async fn place_market_order(&self, request: OrderRequest) -> Result<ExchangeAck, AppError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_times {
                return Err(AppError::ExchangeRefused("simulated outage".into()));
            }
            Ok(ExchangeAck {
                order_link_id: request.client_order_id,
                exchange_order_id: "EX1".into(),
                status: OrderStatus::Open,
            })
        }
        async fn place_limit_order(&self, request: OrderRequest) -> Result<ExchangeAck, AppError> {
            self.place_market_order(request).await
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

    fn persistence() -> Arc<SledPersistence> {
        let path = format!("/tmp/invalidation_test_{}", uuid::Uuid::new_v4());
        Arc::new(SledPersistence::open(&path).unwrap())
    }

    fn snapshot(size: Decimal, side: Side) -> PositionSnapshot {
        PositionSnapshot {
            symbol: "BTCUSDT".into(),
            side,
            size,
            avg_price: dec!(100),
            leverage: 5,
            mark_price: dec!(100),
            unrealized_pnl: dec!(0),
            realized_pnl: dec!(0),
        }
    }

    #[tokio::test]
    async fn long_position_exits_on_swing_low_break() {
        let events = EventBus::default();
        let exchange = Arc::new(FailingExchange { attempts: AtomicUsize::new(0), fail_times: 0 });
        let order_manager = Arc::new(OrderManager::new(exchange.clone(), persistence(), events.clone()));
        let position_tracker = Arc::new(PositionTracker::new(exchange, events.clone()));
        let state_machine = Arc::new(StateMachine::new(900));
        state_machine.enter("BTCUSDT", Side::Long).await.unwrap();
        position_tracker.on_stream_frame(snapshot(dec!(1), Side::Long)).await;

        let monitor = InvalidationMonitor::new(order_manager, position_tracker, state_machine.clone(), events);
        let key_levels = KeyLevels {
            protected_swing_low: Some(dec!(95)),
            ..Default::default()
        };
        monitor.check("BTCUSDT", dec!(90), key_levels).await;

        assert_eq!(
            state_machine.state_of("BTCUSDT").await,
            crate::types::SymbolState::Locked
        );
    }

    #[tokio::test]
    async fn no_open_position_is_ignored() {
        let events = EventBus::default();
        let exchange = Arc::new(FailingExchange { attempts: AtomicUsize::new(0), fail_times: 0 });
        let order_manager = Arc::new(OrderManager::new(exchange.clone(), persistence(), events.clone()));
        let position_tracker = Arc::new(PositionTracker::new(exchange, events.clone()));
        let state_machine = Arc::new(StateMachine::new(900));

        let monitor = InvalidationMonitor::new(order_manager, position_tracker, state_machine.clone(), events);
        let key_levels = KeyLevels {
            protected_swing_low: Some(dec!(95)),
            ..Default::default()
        };
        monitor.check("BTCUSDT", dec!(90), key_levels).await;

        assert_eq!(
            state_machine.state_of("BTCUSDT").await,
            crate::types::SymbolState::Flat
        );
    }

    #[tokio::test]
    async fn retries_once_before_giving_up() {
        let events = EventBus::default();
        let exchange = Arc::new(FailingExchange { attempts: AtomicUsize::new(0), fail_times: 1 });
        let order_manager = Arc::new(OrderManager::new(exchange.clone(), persistence(), events.clone()));
        let position_tracker = Arc::new(PositionTracker::new(exchange, events.clone()));
        let state_machine = Arc::new(StateMachine::new(900));
        state_machine.enter("BTCUSDT", Side::Short).await.unwrap();
        position_tracker.on_stream_frame(snapshot(dec!(1), Side::Short)).await;

        let monitor = InvalidationMonitor::new(order_manager, position_tracker, state_machine.clone(), events);
        let key_levels = KeyLevels {
            protected_swing_high: Some(dec!(105)),
            ..Default::default()
        };
        monitor.check("BTCUSDT", dec!(110), key_levels).await;

        assert_eq!(
            state_machine.state_of("BTCUSDT").await,
            crate::types::SymbolState::Locked
        );
    }

    #[tokio::test]
    async fn emits_critical_failure_after_two_failed_attempts() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let exchange = Arc::new(FailingExchange { attempts: AtomicUsize::new(0), fail_times: 2 });
        let order_manager = Arc::new(OrderManager::new(exchange.clone(), persistence(), events.clone()));
        let position_tracker = Arc::new(PositionTracker::new(exchange, events.clone()));
        let state_machine = Arc::new(StateMachine::new(900));
        state_machine.enter("BTCUSDT", Side::Long).await.unwrap();
        position_tracker.on_stream_frame(snapshot(dec!(1), Side::Long)).await;

        let monitor = InvalidationMonitor::new(order_manager, position_tracker, state_machine.clone(), events);
        let key_levels = KeyLevels {
            protected_swing_low: Some(dec!(95)),
            ..Default::default()
        };
        monitor.check("BTCUSDT", dec!(90), key_levels).await;

        let mut saw_critical = false;
        while let Ok(emitted) = rx.try_recv() {
            if matches!(emitted.event, DomainEvent::InvalidationCriticalFailure { .. }) {
                saw_critical = true;
            }
        }
        assert!(saw_critical);
        assert_eq!(
            state_machine.state_of("BTCUSDT").await,
            crate::types::SymbolState::InLong
        );
    }
}
