pub mod paper;

pub use paper::{PaperExchange, PaperPrivateStream};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::AppError;
use crate::types::{Candle, OrderRequest, OrderStatus, Timeframe};

/// REST surface this core consumes. Concrete wire parsing, signing, and
/// transport (Binance/Bybit/etc.) live outside this crate; this is the
/// boundary the candle manager, order manager, and position tracker code
/// against (spec 1, 6).
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn get_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>, AppError>;

    async fn place_market_order(&self, request: OrderRequest) -> Result<ExchangeAck, AppError>;
    async fn place_limit_order(&self, request: OrderRequest) -> Result<ExchangeAck, AppError>;
    async fn cancel_order(&self, symbol: &str, order_link_id: &str) -> Result<(), AppError>;
    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), AppError>;
    async fn get_position(&self, symbol: &str) -> Result<Option<PositionSnapshot>, AppError>;
    async fn get_all_positions(&self) -> Result<Vec<PositionSnapshot>, AppError>;
}

/// Acknowledgement returned synchronously from order placement; subsequent
/// state is learned from the private stream, not this return value.
#[derive(Debug, Clone)]
pub struct ExchangeAck {
    pub order_link_id: String,
    pub exchange_order_id: String,
    pub status: OrderStatus,
}

#[derive(Debug, Clone)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub side: crate::types::Side,
    pub size: Decimal,
    pub avg_price: Decimal,
    pub leverage: u32,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
}

/// The four topics the private stream multiplexes (spec 6). Wire framing is
/// the exchange client's concern; this crate only needs the decoded shape.
#[derive(Debug, Clone)]
pub enum PrivateEvent {
    Order {
        order_link_id: String,
        exchange_order_id: String,
        symbol: String,
        status_raw: String,
    },
    Execution {
        exec_id: String,
        order_link_id: String,
        cumulative_size: Decimal,
        cumulative_avg_price: Decimal,
    },
    Position(PositionSnapshot),
    Wallet,
    Resync,
}

/// Market-data stream event surfaced to the candle manager. Separate from
/// `PrivateEvent` because the two streams are independent connections with
/// independent reconnect/backoff loops.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    Kline(Candle),
    Disconnected,
    Error(String),
}

#[async_trait]
pub trait PrivateStream: Send + Sync {
    async fn next_event(&mut self) -> Result<PrivateEvent, AppError>;
}
