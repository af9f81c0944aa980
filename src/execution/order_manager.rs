use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::error::AppError;
use crate::events::{DomainEvent, EventBus};
use crate::exchange::{Exchange, PrivateEvent};
use crate::persistence::Persistence;
use crate::types::{Fill, ManagedOrder, OrderRequest, OrderStatus};

/// Owns locally generated order IDs, the `id -> ManagedOrder` map, and an
/// `exchangeOrderId -> id` index (spec 4.6). Grounded on the teacher's
/// order-construction/status-mapping shape in `types/order.rs`, combined
/// with `engine/executor.rs`'s gate-then-act flow: placement always
/// persists before returning, so a crash between exchange ack and local
/// persistence cannot leak an unrecorded order.
pub struct OrderManager {
    orders: RwLock<HashMap<String, ManagedOrder>>,
    exchange_index: RwLock<HashMap<String, String>>,
    exchange: Arc<dyn Exchange>,
    persistence: Arc<dyn Persistence>,
    events: EventBus,
}

impl OrderManager {
    pub fn new(exchange: Arc<dyn Exchange>, persistence: Arc<dyn Persistence>, events: EventBus) -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            exchange_index: RwLock::new(HashMap::new()),
            exchange,
            persistence,
            events,
        }
    }

    pub async fn place_market(&self, request: OrderRequest) -> Result<ManagedOrder, AppError> {
        self.place(request, false).await
    }

    pub async fn place_limit(&self, request: OrderRequest) -> Result<ManagedOrder, AppError> {
        self.place(request, true).await
    }

    async fn place(&self, request: OrderRequest, limit: bool) -> Result<ManagedOrder, AppError> {
        let mut order = ManagedOrder::from_request(&request);

        let ack = if limit {
            self.exchange.place_limit_order(request).await
        } else {
            self.exchange.place_market_order(request).await
        };

        let ack = match ack {
            Ok(ack) => ack,
            Err(e) => {
                order.status = OrderStatus::Rejected;
                self.persistence.save_order(&order).await?;
                self.events.publish(DomainEvent::OrderRejected {
                    order_id: order.id.clone(),
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        order.exchange_order_id = Some(ack.exchange_order_id.clone());
        order.status = ack.status;

        self.orders.write().await.insert(order.id.clone(), order.clone());
        self.exchange_index
            .write()
            .await
            .insert(ack.exchange_order_id, order.id.clone());

        self.persistence.save_order(&order).await?;
        self.events.publish(DomainEvent::OrderPlaced {
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
        });

        Ok(order)
    }

    pub async fn cancel(&self, id: &str) -> Result<(), AppError> {
        let symbol = {
            let orders = self.orders.read().await;
            let order = orders
                .get(id)
                .ok_or_else(|| AppError::InvalidIntent(format!("unknown order id {id}")))?;
            if order.status.is_terminal() {
                return Ok(());
            }
            order.symbol.clone()
        };

        self.exchange.cancel_order(&symbol, id).await?;

        let mut orders = self.orders.write().await;
        if let Some(order) = orders.get_mut(id) {
            if !order.status.is_terminal() {
                order.status = OrderStatus::Cancelled;
                self.persistence.save_order(order).await?;
                self.events.publish(DomainEvent::OrderCancelled {
                    order_id: id.to_string(),
                });
            }
        }
        Ok(())
    }

    pub async fn cancel_all(&self, symbol: &str) -> Result<(), AppError> {
        self.exchange.cancel_all_orders(symbol).await?;
        let ids: Vec<String> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.symbol == symbol && !o.status.is_terminal())
            .map(|o| o.id.clone())
            .collect();

        let mut orders = self.orders.write().await;
        for id in ids {
            if let Some(order) = orders.get_mut(&id) {
                order.status = OrderStatus::Cancelled;
            }
        }
        Ok(())
    }

    /// Applies an `order`/`execution` private-stream frame. Uses cumulative
    /// executed size (never deltas) so replayed frames are idempotent
    /// (spec 5, 8 property 2).
    pub async fn on_private_event(&self, event: PrivateEvent) -> Result<(), AppError> {
        match event {
            PrivateEvent::Order {
                order_link_id,
                exchange_order_id,
                status_raw,
                ..
            } => {
                let Some(new_status) = OrderStatus::from_exchange_str(&status_raw) else {
                    return Ok(());
                };
                self.exchange_index
                    .write()
                    .await
                    .insert(exchange_order_id, order_link_id.clone());

                let mut orders = self.orders.write().await;
                if let Some(order) = orders.get_mut(&order_link_id) {
                    if order.status.is_terminal() {
                        return Ok(());
                    }
                    order.status = new_status;
                    self.persistence.save_order(order).await?;
                    if new_status == OrderStatus::Rejected {
                        self.events.publish(DomainEvent::OrderRejected {
                            order_id: order_link_id,
                            reason: "exchange rejected".to_string(),
                        });
                    }
                }
                Ok(())
            }
            PrivateEvent::Execution {
                exec_id,
                order_link_id,
                cumulative_size,
                cumulative_avg_price,
            } => {
                let mut orders = self.orders.write().await;
                let Some(order) = orders.get_mut(&order_link_id) else {
                    return Ok(());
                };
                let was_filled = order.status == OrderStatus::Filled;
                order.apply_cumulative_fill(cumulative_size, cumulative_avg_price);
                let order_snapshot = order.clone();
                drop(orders);

                self.persistence.save_order(&order_snapshot).await?;
                self.persistence
                    .save_fill(&Fill {
                        exec_id,
                        order_id: order_link_id.clone(),
                        price: cumulative_avg_price,
                        size: cumulative_size,
                        fee: Decimal::ZERO,
                        filled_at: chrono::Utc::now(),
                    })
                    .await?;

                if order_snapshot.status == OrderStatus::Filled && !was_filled {
                    self.events.publish(DomainEvent::OrderFilled {
                        order_id: order_link_id,
                        filled_size: order_snapshot.filled_size,
                        avg_price: order_snapshot.avg_fill_price.unwrap_or_default(),
                    });
                } else if order_snapshot.status == OrderStatus::PartiallyFilled {
                    self.events.publish(DomainEvent::OrderPartiallyFilled {
                        order_id: order_link_id,
                        filled_size: order_snapshot.filled_size,
                    });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub async fn get(&self, id: &str) -> Option<ManagedOrder> {
        self.orders.read().await.get(id).cloned()
    }

    pub async fn open_orders_for(&self, symbol: &str) -> Vec<ManagedOrder> {
        self.orders
            .read()
            .await
            .values()
            .filter(|o| o.symbol == symbol && !o.status.is_terminal())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeAck;
    use crate::types::Side;
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
        async fn place_market_order(&self, request: OrderRequest) -> Result<ExchangeAck, AppError> {
            Ok(ExchangeAck {
                order_link_id: request.client_order_id,
                exchange_order_id: "EX1".to_string(),
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
        async fn get_position(&self, _symbol: &str) -> Result<Option<crate::exchange::PositionSnapshot>, AppError> {
            Ok(None)
        }
        async fn get_all_positions(&self) -> Result<Vec<crate::exchange::PositionSnapshot>, AppError> {
            Ok(vec![])
        }
    }

    fn manager() -> OrderManager {
        let path = format!("/tmp/order_manager_test_{}", uuid::Uuid::new_v4());
        OrderManager::new(
            Arc::new(StubExchange),
            Arc::new(crate::persistence::SledPersistence::open(&path).unwrap()),
            EventBus::default(),
        )
    }

    #[tokio::test]
    async fn double_cancel_is_a_no_op() {
        let mgr = manager();
        let req = OrderRequest::market_entry("BTCUSDT", Side::Long, dec!(1));
        let order = mgr.place_market(req).await.unwrap();

        mgr.on_private_event(PrivateEvent::Execution {
            exec_id: "e1".into(),
            order_link_id: order.id.clone(),
            cumulative_size: dec!(1),
            cumulative_avg_price: dec!(100),
        })
        .await
        .unwrap();

        mgr.cancel(&order.id).await.unwrap();
        mgr.cancel(&order.id).await.unwrap();
        let fetched = mgr.get(&order.id).await.unwrap();
        assert_eq!(fetched.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn replayed_execution_frame_does_not_regress_status() {
        let mgr = manager();
        let req = OrderRequest::market_entry("BTCUSDT", Side::Long, dec!(2));
        let order = mgr.place_market(req).await.unwrap();

        mgr.on_private_event(PrivateEvent::Execution {
            exec_id: "e1".into(),
            order_link_id: order.id.clone(),
            cumulative_size: dec!(2),
            cumulative_avg_price: dec!(100),
        })
        .await
        .unwrap();
        mgr.on_private_event(PrivateEvent::Execution {
            exec_id: "e0-replayed".into(),
            order_link_id: order.id.clone(),
            cumulative_size: dec!(1),
            cumulative_avg_price: dec!(99),
        })
        .await
        .unwrap();

        let fetched = mgr.get(&order.id).await.unwrap();
        assert_eq!(fetched.status, OrderStatus::Filled);
        assert_eq!(fetched.filled_size, dec!(2));
    }
}
