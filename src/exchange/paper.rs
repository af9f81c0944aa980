use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::error::AppError;
use crate::exchange::{Exchange, ExchangeAck, PositionSnapshot, PrivateEvent, PrivateStream};
use crate::types::{Candle, OrderRequest, OrderStatus, Side, Timeframe};

const BINANCE_US_API: &str = "https://api.binance.us";

/// Instant-fill exchange adapter: real public klines, simulated order
/// placement and position bookkeeping. Grounded on the teacher's
/// `PaperTradingEngine` (fee/slippage-free instant fill against the last
/// known mark price), reshaped to satisfy the `Exchange`/`PrivateStream`
/// boundary so `OrderManager` and `PositionTracker` run the exact same
/// code path they would against a real venue.
pub struct PaperExchange {
    http: Client,
    base_url: String,
    positions: RwLock<HashMap<String, PositionSnapshot>>,
    stream_tx: mpsc::UnboundedSender<PrivateEvent>,
}

pub struct PaperPrivateStream {
    rx: mpsc::UnboundedReceiver<PrivateEvent>,
}

#[async_trait]
impl PrivateStream for PaperPrivateStream {
    async fn next_event(&mut self) -> Result<PrivateEvent, AppError> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| AppError::StreamError("paper exchange stream closed".to_string()))
    }
}

impl PaperExchange {
    pub fn new() -> (Self, PaperPrivateStream) {
        let (stream_tx, rx) = mpsc::unbounded_channel();
        let exchange = Self {
            http: Client::new(),
            base_url: BINANCE_US_API.to_string(),
            positions: RwLock::new(HashMap::new()),
            stream_tx,
        };
        (exchange, PaperPrivateStream { rx })
    }

    async fn last_price(&self, symbol: &str) -> Result<Decimal, AppError> {
        let url = format!("{}/api/v3/ticker/price?symbol={symbol}", self.base_url);
        let resp: TickerPriceResponse = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::ExchangeRefused(e.to_string()))?
            .json()
            .await
            .map_err(|e| AppError::ExchangeRefused(e.to_string()))?;
        Decimal::from_str(&resp.price).map_err(|e| AppError::ExchangeRefused(e.to_string()))
    }

    async fn fill(&self, request: OrderRequest) -> Result<ExchangeAck, AppError> {
        let fill_price = match request.price {
            Some(price) => price,
            None => self.last_price(&request.symbol).await?,
        };
        let exchange_order_id = Uuid::new_v4().to_string();

        let mut positions = self.positions.write().await;
        let prior = positions.get(&request.symbol).cloned();
        let new_snapshot = apply_fill(prior, &request, fill_price);

        if new_snapshot.size.is_zero() {
            positions.remove(&request.symbol);
        } else {
            positions.insert(request.symbol.clone(), new_snapshot.clone());
        }
        drop(positions);

        let _ = self.stream_tx.send(PrivateEvent::Order {
            order_link_id: request.client_order_id.clone(),
            exchange_order_id: exchange_order_id.clone(),
            symbol: request.symbol.clone(),
            status_raw: "New".to_string(),
        });
        let _ = self.stream_tx.send(PrivateEvent::Execution {
            exec_id: Uuid::new_v4().to_string(),
            order_link_id: request.client_order_id.clone(),
            cumulative_size: request.size,
            cumulative_avg_price: fill_price,
        });
        let _ = self.stream_tx.send(PrivateEvent::Position(new_snapshot));

        Ok(ExchangeAck {
            order_link_id: request.client_order_id,
            exchange_order_id,
            status: OrderStatus::Open,
        })
    }
}

fn apply_fill(prior: Option<PositionSnapshot>, request: &OrderRequest, fill_price: Decimal) -> PositionSnapshot {
    let signed_delta = match request.side {
        Side::Long => request.size,
        Side::Short => -request.size,
    };

    match prior {
        None => PositionSnapshot {
            symbol: request.symbol.clone(),
            side: request.side,
            size: request.size,
            avg_price: fill_price,
            leverage: 1,
            mark_price: fill_price,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
        },
        Some(mut existing) => {
            let existing_signed = match existing.side {
                Side::Long => existing.size,
                Side::Short => -existing.size,
            };
            let new_signed = existing_signed + signed_delta;

            if request.side != existing.side {
                let closed_size = existing.size.min(request.size);
                let direction = match existing.side {
                    Side::Long => Decimal::ONE,
                    Side::Short => -Decimal::ONE,
                };
                existing.realized_pnl += closed_size * (fill_price - existing.avg_price) * direction;
            }

            if new_signed.is_zero() {
                existing.size = Decimal::ZERO;
                existing
            } else {
                existing.side = if new_signed.is_sign_positive() { Side::Long } else { Side::Short };
                existing.size = new_signed.abs();
                existing.mark_price = fill_price;
                existing
            }
        }
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn get_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>, AppError> {
        let mut url = format!(
            "{}/api/v3/klines?symbol={symbol}&interval={}&limit={limit}",
            self.base_url,
            binance_interval(timeframe)
        );
        if let Some(end) = end {
            url.push_str(&format!("&endTime={}", end.timestamp_millis()));
        }

        let rows: Vec<Vec<serde_json::Value>> = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::ExchangeRefused(e.to_string()))?
            .json()
            .await
            .map_err(|e| AppError::ExchangeRefused(e.to_string()))?;

        rows.into_iter()
            .map(|row| parse_kline_row(symbol, timeframe, &row))
            .collect()
    }

    async fn place_market_order(&self, request: OrderRequest) -> Result<ExchangeAck, AppError> {
        self.fill(request).await
    }

    async fn place_limit_order(&self, request: OrderRequest) -> Result<ExchangeAck, AppError> {
        self.fill(request).await
    }

    async fn cancel_order(&self, _symbol: &str, _order_link_id: &str) -> Result<(), AppError> {
        Ok(())
    }

    async fn cancel_all_orders(&self, _symbol: &str) -> Result<(), AppError> {
        Ok(())
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<PositionSnapshot>, AppError> {
        Ok(self.positions.read().await.get(symbol).cloned())
    }

    async fn get_all_positions(&self) -> Result<Vec<PositionSnapshot>, AppError> {
        Ok(self.positions.read().await.values().cloned().collect())
    }
}

fn binance_interval(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "1m",
        Timeframe::M3 => "3m",
        Timeframe::M5 => "5m",
        Timeframe::M15 => "15m",
        Timeframe::M30 => "30m",
        Timeframe::H1 => "1h",
        Timeframe::H2 => "2h",
        Timeframe::H4 => "4h",
        Timeframe::H6 => "6h",
        Timeframe::H12 => "12h",
        Timeframe::D1 => "1d",
        Timeframe::W1 => "1w",
    }
}

fn parse_kline_row(symbol: &str, timeframe: Timeframe, row: &[serde_json::Value]) -> Result<Candle, AppError> {
    let err = || AppError::ExchangeRefused("malformed kline row".to_string());
    let as_str = |v: &serde_json::Value| v.as_str().map(str::to_string).ok_or_else(err);

    let open_time = row.first().and_then(|v| v.as_i64()).ok_or_else(err)?;
    let close_time = row.get(6).and_then(|v| v.as_i64()).ok_or_else(err)?;

    Ok(Candle {
        symbol: symbol.to_string(),
        timeframe,
        open_time: DateTime::from_timestamp_millis(open_time).ok_or_else(err)?,
        close_time: DateTime::from_timestamp_millis(close_time).ok_or_else(err)?,
        open: Decimal::from_str(&as_str(row.get(1).ok_or_else(err)?)?).map_err(|_| err())?,
        high: Decimal::from_str(&as_str(row.get(2).ok_or_else(err)?)?).map_err(|_| err())?,
        low: Decimal::from_str(&as_str(row.get(3).ok_or_else(err)?)?).map_err(|_| err())?,
        close: Decimal::from_str(&as_str(row.get(4).ok_or_else(err)?)?).map_err(|_| err())?,
        volume: Decimal::from_str(&as_str(row.get(5).ok_or_else(err)?)?).map_err(|_| err())?,
    })
}

#[derive(Deserialize)]
struct TickerPriceResponse {
    price: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(symbol: &str, side: Side, size: Decimal) -> OrderRequest {
        OrderRequest::market_entry(symbol, side, size).with_brackets(None, None)
    }

    #[test]
    fn opening_a_long_position_sets_side_and_size() {
        let snapshot = apply_fill(None, &entry("BTCUSDT", Side::Long, dec!(1)), dec!(100));
        assert_eq!(snapshot.side, Side::Long);
        assert_eq!(snapshot.size, dec!(1));
        assert_eq!(snapshot.avg_price, dec!(100));
    }

    #[test]
    fn fully_closing_a_position_zeroes_size() {
        let opened = apply_fill(None, &entry("BTCUSDT", Side::Long, dec!(1)), dec!(100));
        let closed = apply_fill(Some(opened), &entry("BTCUSDT", Side::Short, dec!(1)), dec!(110));
        assert!(closed.size.is_zero());
    }

    #[test]
    fn closing_a_long_at_a_profit_accumulates_realized_pnl() {
        let opened = apply_fill(None, &entry("BTCUSDT", Side::Long, dec!(1)), dec!(100));
        let closed = apply_fill(Some(opened), &entry("BTCUSDT", Side::Short, dec!(1)), dec!(110));
        assert_eq!(closed.realized_pnl, dec!(10));
    }

    #[test]
    fn opening_a_fresh_position_starts_realized_pnl_at_zero() {
        let snapshot = apply_fill(None, &entry("BTCUSDT", Side::Long, dec!(1)), dec!(100));
        assert_eq!(snapshot.realized_pnl, dec!(0));
    }

    #[test]
    fn partial_exit_reduces_size_without_flipping_side() {
        let opened = apply_fill(None, &entry("BTCUSDT", Side::Long, dec!(2)), dec!(100));
        let reduced = apply_fill(Some(opened), &entry("BTCUSDT", Side::Short, dec!(1)), dec!(105));
        assert_eq!(reduced.side, Side::Long);
        assert_eq!(reduced.size, dec!(1));
    }
}
