use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::GeneralSettings;
use crate::error::AppError;
use crate::events::{DomainEvent, EventBus};
use crate::exchange::Exchange;
use crate::persistence::Persistence;
use crate::types::{Candle, CandleBuffer, Timeframe};

const MAX_BATCH_SIZE: usize = 200;
const GAP_TOLERANCE_INTERVALS: i64 = 5;

/// Per-`(symbol, timeframe)` candle ring plus backfill/live-merge
/// machinery (spec 4.1). One instance is the process-wide singleton;
/// the reconnect/backoff shape is grounded on the teacher's WebSocket
/// client loop, generalized from raw stream parsing to merge-and-emit.
pub struct CandleManager {
    buffers: RwLock<HashMap<(String, Timeframe), CandleBuffer>>,
    exchange: Arc<dyn Exchange>,
    persistence: Arc<dyn Persistence>,
    events: EventBus,
    settings: GeneralSettings,
    batch_limiter: DefaultDirectRateLimiter,
}

impl CandleManager {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        persistence: Arc<dyn Persistence>,
        events: EventBus,
        settings: GeneralSettings,
    ) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(5).unwrap());
        Self {
            buffers: RwLock::new(HashMap::new()),
            exchange,
            persistence,
            events,
            settings,
            batch_limiter: RateLimiter::direct(quota),
        }
    }

    /// Pulls up to `count` historical candles in bounded batches and seeds
    /// the ring, then the caller joins the live stream. Batches page via
    /// oldest-candle `openTime - 1` per spec 4.1.
    pub async fn backfill(&self, symbol: &str, timeframe: Timeframe) -> Result<(), AppError> {
        let target = self.settings.backfill_candle_count;
        let batch_size = self.settings.backfill_batch_size.min(MAX_BATCH_SIZE);

        let mut collected: Vec<Candle> = Vec::with_capacity(target);
        let mut end = None;

        while collected.len() < target {
            self.batch_limiter.until_ready().await;
            let remaining = target - collected.len();
            let take = remaining.min(batch_size);
            let batch = self
                .exchange
                .get_klines(symbol, timeframe, take, end)
                .await?;
            if batch.is_empty() {
                break;
            }
            end = batch.first().map(|c| c.open_time - chrono::Duration::milliseconds(1));
            collected.extend(batch);
            tokio::task::yield_now().await;
        }

        collected.sort_by_key(|c| c.open_time);
        self.persistence.flush_candles(&collected).await?;

        let mut buffer = CandleBuffer::new(target.max(collected.len()));
        let now = Utc::now();
        for candle in collected {
            buffer.merge(candle, now);
        }

        self.buffers
            .write()
            .await
            .insert((symbol.to_string(), timeframe), buffer);

        info!(symbol, timeframe = timeframe.as_str(), "backfill complete");
        Ok(())
    }

    /// Applies one live kline tick. Returns the closed candle when this
    /// tick advanced `lastConfirmedOpenTime`, so the caller (the strategy
    /// engine) can react to exactly one `candleClose` per call.
    pub async fn ingest(&self, candle: Candle) -> Result<Option<Candle>, AppError> {
        let key = (candle.symbol.clone(), candle.timeframe);
        let now = Utc::now();

        let closed = {
            let mut buffers = self.buffers.write().await;
            let buffer = buffers
                .entry(key.clone())
                .or_insert_with(|| CandleBuffer::new(self.settings.backfill_candle_count));
            let candidate = candle.clone();
            let did_close = buffer.merge(candidate, now);
            did_close.then(|| candle.clone())
        };

        match &closed {
            Some(closed_candle) => {
                self.persistence.save_candle(closed_candle).await?;
                self.events.publish(DomainEvent::CandleClosed {
                    symbol: closed_candle.symbol.clone(),
                    timeframe: closed_candle.timeframe.as_str().to_string(),
                    close_time: closed_candle.close_time,
                });
            }
            None => {
                self.events.publish(DomainEvent::CandleUpdated {
                    symbol: candle.symbol.clone(),
                    timeframe: candle.timeframe.as_str().to_string(),
                });
            }
        }

        Ok(closed)
    }

    /// Called on stream (re)connect. If the locally confirmed open lags the
    /// expected current closed candle by more than the tolerance, triggers a
    /// bounded backfill to close the gap (spec 4.1).
    pub async fn reconcile_on_reconnect(&self, symbol: &str, timeframe: Timeframe) -> Result<(), AppError> {
        let interval_millis = timeframe.to_millis();
        let now_millis = Utc::now().timestamp_millis();
        let expected_last_closed_open = (now_millis / interval_millis) * interval_millis;

        let local_last_confirmed = self
            .buffers
            .read()
            .await
            .get(&(symbol.to_string(), timeframe))
            .and_then(|b| b.last_confirmed_open_time())
            .map(|t| t.timestamp_millis());

        let gap_threshold = expected_last_closed_open - GAP_TOLERANCE_INTERVALS * interval_millis;
        let needs_backfill = match local_last_confirmed {
            Some(last) => last < gap_threshold,
            None => true,
        };

        if needs_backfill {
            warn!(symbol, timeframe = timeframe.as_str(), "candle gap detected on reconnect, backfilling");
            self.backfill(symbol, timeframe).await?;
        }
        Ok(())
    }

    pub async fn snapshot(&self, symbol: &str, timeframe: Timeframe) -> Vec<Candle> {
        self.buffers
            .read()
            .await
            .get(&(symbol.to_string(), timeframe))
            .map(|b| b.candles.clone())
            .unwrap_or_default()
    }

    /// Flushes every buffered ring to persistence; invoked on the 5s timer
    /// and on graceful shutdown.
    pub async fn flush_all(&self) -> Result<(), AppError> {
        let buffers = self.buffers.read().await;
        for buffer in buffers.values() {
            self.persistence.flush_candles(&buffer.candles).await?;
        }
        Ok(())
    }
}
