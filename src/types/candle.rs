use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Timeframe;

/// Identity is `(symbol, timeframe, open_time)`. Mutable only while
/// `close_time > now`; once closed a candle is never mutated again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    pub fn is_closed(&self, now: DateTime<Utc>) -> bool {
        self.close_time <= now
    }

    pub fn body_size(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / Decimal::from(3)
    }

    pub fn hl2(&self) -> Decimal {
        (self.high + self.low) / Decimal::from(2)
    }

    pub fn change_percentage(&self) -> Decimal {
        if self.open.is_zero() {
            return Decimal::ZERO;
        }
        ((self.close - self.open) / self.open) * Decimal::from(100)
    }
}

/// Ordered ring of candles for one `(symbol, timeframe)`, keyed by
/// `open_time`. The in-progress (unclosed) candle, if any, is always the
/// last element and is the only one that may still be mutated in place.
#[derive(Debug, Clone, Default)]
pub struct CandleBuffer {
    pub candles: Vec<Candle>,
    pub max_size: usize,
}

impl CandleBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            candles: Vec::with_capacity(max_size),
            max_size,
        }
    }

    /// Merge an incoming tick. Returns `true` if this call closed a new
    /// candle (i.e. the caller should treat it as `candleClose`).
    ///
    /// - If the last buffered candle shares `open_time` with `candle` and is
    ///   still open, it is replaced in place (`candleUpdate`).
    /// - If `candle.open_time` is strictly greater than the last confirmed
    ///   open time and the candle is closed, it is appended and the ring is
    ///   trimmed to `max_size`.
    pub fn merge(&mut self, candle: Candle, now: DateTime<Utc>) -> bool {
        if let Some(last) = self.candles.last_mut() {
            if last.open_time == candle.open_time {
                *last = candle;
                return last.is_closed(now);
            }
            if candle.open_time <= last.open_time {
                // Stale or out-of-order tick for an already-confirmed candle: ignore.
                return false;
            }
        }
        let closed = candle.is_closed(now);
        self.candles.push(candle);
        if self.candles.len() > self.max_size && self.max_size > 0 {
            self.candles.remove(0);
        }
        closed
    }

    pub fn last_confirmed_open_time(&self) -> Option<DateTime<Utc>> {
        self.candles
            .iter()
            .rev()
            .find(|c| c.is_closed(Utc::now()))
            .map(|c| c.open_time)
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn last_n(&self, n: usize) -> &[Candle] {
        let len = self.candles.len();
        if n >= len {
            &self.candles[..]
        } else {
            &self.candles[len - n..]
        }
    }

    pub fn closes(&self) -> Vec<Decimal> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn highs(&self) -> Vec<Decimal> {
        self.candles.iter().map(|c| c.high).collect()
    }

    pub fn lows(&self) -> Vec<Decimal> {
        self.candles.iter().map(|c| c.low).collect()
    }
}
