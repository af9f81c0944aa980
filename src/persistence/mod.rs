use async_trait::async_trait;

use crate::error::AppError;
use crate::events::Emitted;
use crate::types::{Candle, Fill, ManagedOrder, StrategyState, Timeframe};

/// Storage boundary for every entity the core persists (spec 3: Candle,
/// StrategyState, Order, Fill, Trade, Event). Kept as a trait, the way the
/// teacher's `Database` wraps a connection pool behind plain async methods,
/// so the execution core never depends on a concrete storage engine.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save_candle(&self, candle: &Candle) -> Result<(), AppError>;
    async fn flush_candles(&self, candles: &[Candle]) -> Result<(), AppError>;
    async fn save_strategy_state(&self, state: &StrategyState) -> Result<(), AppError>;
    async fn save_order(&self, order: &ManagedOrder) -> Result<(), AppError>;
    async fn save_fill(&self, fill: &Fill) -> Result<(), AppError>;
    async fn append_event(&self, event: &Emitted) -> Result<(), AppError>;
    async fn load_open_trades(&self) -> Result<Vec<ManagedOrder>, AppError>;
    async fn load_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, AppError>;
}

/// `sled`-backed implementation. Each entity kind lives in its own tree,
/// keyed so that range scans come back in a usable order (candles by
/// openTime, orders by id).
pub struct SledPersistence {
    db: sled::Db,
}

impl SledPersistence {
    pub fn open(path: &str) -> Result<Self, AppError> {
        let db = sled::open(path).map_err(|e| AppError::PersistenceError(e.to_string()))?;
        Ok(Self { db })
    }

    fn tree(&self, name: &str) -> Result<sled::Tree, AppError> {
        self.db
            .open_tree(name)
            .map_err(|e| AppError::PersistenceError(e.to_string()))
    }

    fn candle_key(symbol: &str, timeframe: Timeframe, open_time_millis: i64) -> String {
        format!("{symbol}:{}:{open_time_millis:020}", timeframe.as_str())
    }
}

#[async_trait]
impl Persistence for SledPersistence {
    async fn save_candle(&self, candle: &Candle) -> Result<(), AppError> {
        let tree = self.tree("candles")?;
        let key = Self::candle_key(&candle.symbol, candle.timeframe, candle.open_time.timestamp_millis());
        let value = serde_json::to_vec(candle).map_err(|e| AppError::PersistenceError(e.to_string()))?;
        tree.insert(key, value)
            .map_err(|e| AppError::PersistenceError(e.to_string()))?;
        Ok(())
    }

    async fn flush_candles(&self, candles: &[Candle]) -> Result<(), AppError> {
        for candle in candles {
            self.save_candle(candle).await?;
        }
        self.tree("candles")?
            .flush_async()
            .await
            .map_err(|e| AppError::PersistenceError(e.to_string()))?;
        Ok(())
    }

    async fn save_strategy_state(&self, state: &StrategyState) -> Result<(), AppError> {
        let tree = self.tree("strategy_state")?;
        let key = format!("{}:{}", state.symbol, state.candle_close_time.timestamp_millis());
        let value = serde_json::to_vec(state).map_err(|e| AppError::PersistenceError(e.to_string()))?;
        tree.insert(key, value)
            .map_err(|e| AppError::PersistenceError(e.to_string()))?;
        Ok(())
    }

    async fn save_order(&self, order: &ManagedOrder) -> Result<(), AppError> {
        let tree = self.tree("orders")?;
        let value = serde_json::to_vec(order).map_err(|e| AppError::PersistenceError(e.to_string()))?;
        tree.insert(order.id.as_bytes(), value)
            .map_err(|e| AppError::PersistenceError(e.to_string()))?;
        Ok(())
    }

    async fn save_fill(&self, fill: &Fill) -> Result<(), AppError> {
        let tree = self.tree("fills")?;
        let value = serde_json::to_vec(fill).map_err(|e| AppError::PersistenceError(e.to_string()))?;
        tree.insert(fill.exec_id.as_bytes(), value)
            .map_err(|e| AppError::PersistenceError(e.to_string()))?;
        Ok(())
    }

    async fn append_event(&self, event: &Emitted) -> Result<(), AppError> {
        let tree = self.tree("events")?;
        let value = serde_json::to_vec(event).map_err(|e| AppError::PersistenceError(e.to_string()))?;
        tree.insert(event.id.as_bytes(), value)
            .map_err(|e| AppError::PersistenceError(e.to_string()))?;
        Ok(())
    }

    async fn load_open_trades(&self) -> Result<Vec<ManagedOrder>, AppError> {
        let tree = self.tree("orders")?;
        let mut orders = Vec::new();
        for entry in tree.iter() {
            let (_, value) = entry.map_err(|e| AppError::PersistenceError(e.to_string()))?;
            let order: ManagedOrder =
                serde_json::from_slice(&value).map_err(|e| AppError::PersistenceError(e.to_string()))?;
            if !order.status.is_terminal() {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    async fn load_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, AppError> {
        let tree = self.tree("candles")?;
        let prefix = format!("{symbol}:{}:", timeframe.as_str());
        let mut candles = Vec::new();
        for entry in tree.scan_prefix(prefix.as_bytes()) {
            let (_, value) = entry.map_err(|e| AppError::PersistenceError(e.to_string()))?;
            let candle: Candle =
                serde_json::from_slice(&value).map_err(|e| AppError::PersistenceError(e.to_string()))?;
            candles.push(candle);
        }
        if candles.len() > limit {
            candles.drain(0..candles.len() - limit);
        }
        Ok(candles)
    }
}
