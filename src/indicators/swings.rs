use rust_decimal::Decimal;

use crate::types::{Bias, Candle, KeyLevels, StructureEvent, Trend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwingKind {
    High,
    Low,
}

#[derive(Debug, Clone, Copy)]
pub struct SwingPoint {
    pub index: usize,
    pub price: Decimal,
    pub kind: SwingKind,
    /// False for the most recent would-be-swing within `lookback` of the
    /// series end, which lacks a full right-side confirmation window
    /// (spec 4.2).
    pub confirmed: bool,
}

/// Finds swing highs: `high[i]` strictly exceeds the high of every candle
/// within `lookback` on each side. Requires a full left-side window to be
/// considered at all; the right-side window may be partial near the series
/// end, in which case the point is reported unconfirmed.
pub fn find_swing_highs(candles: &[Candle], lookback: usize) -> Vec<SwingPoint> {
    find_swings(candles, lookback, SwingKind::High)
}

pub fn find_swing_lows(candles: &[Candle], lookback: usize) -> Vec<SwingPoint> {
    find_swings(candles, lookback, SwingKind::Low)
}

fn find_swings(candles: &[Candle], lookback: usize, kind: SwingKind) -> Vec<SwingPoint> {
    let len = candles.len();
    if lookback == 0 || len <= lookback {
        return Vec::new();
    }

    let mut swings = Vec::new();
    for i in lookback..len {
        let left = &candles[i - lookback..i];
        let right_end = (i + 1 + lookback).min(len);
        let right = &candles[i + 1..right_end];
        let confirmed = right.len() == lookback;

        let is_swing = match kind {
            SwingKind::High => {
                let p = candles[i].high;
                left.iter().all(|c| c.high < p) && right.iter().all(|c| c.high < p)
            }
            SwingKind::Low => {
                let p = candles[i].low;
                left.iter().all(|c| c.low > p) && right.iter().all(|c| c.low > p)
            }
        };

        if is_swing {
            let price = match kind {
                SwingKind::High => candles[i].high,
                SwingKind::Low => candles[i].low,
            };
            swings.push(SwingPoint {
                index: i,
                price,
                kind,
                confirmed,
            });
        }
    }
    swings
}

#[derive(Debug, Clone, Copy)]
pub struct StructureAnalysis {
    pub bias: Bias,
    pub trend: Trend,
    pub last_bos: Option<StructureEvent>,
    pub last_choch: Option<StructureEvent>,
    pub key_levels: KeyLevels,
}

/// Classifies market structure from confirmed swing highs/lows (spec 4.2).
/// Unconfirmed tail swings never participate in bias/BOS/CHoCH — only in
/// `key_levels.last_swing_*`, where a fresh unconfirmed extreme is still
/// useful context for the caller.
pub fn analyze_structure(candles: &[Candle], lookback: usize) -> StructureAnalysis {
    let highs = find_swing_highs(candles, lookback);
    let lows = find_swing_lows(candles, lookback);

    let confirmed_highs: Vec<&SwingPoint> = highs.iter().filter(|s| s.confirmed).collect();
    let confirmed_lows: Vec<&SwingPoint> = lows.iter().filter(|s| s.confirmed).collect();

    let bias = match (confirmed_highs.len() >= 2, confirmed_lows.len() >= 2) {
        (true, true) => {
            let h1 = confirmed_highs[confirmed_highs.len() - 2].price;
            let h2 = confirmed_highs[confirmed_highs.len() - 1].price;
            let l1 = confirmed_lows[confirmed_lows.len() - 2].price;
            let l2 = confirmed_lows[confirmed_lows.len() - 1].price;
            if h2 > h1 && l2 > l1 {
                Bias::Bullish
            } else if h2 < h1 && l2 < l1 {
                Bias::Bearish
            } else {
                Bias::Neutral
            }
        }
        _ => Bias::Neutral,
    };

    let trend = match bias {
        Bias::Bullish => Trend::Uptrend,
        Bias::Bearish => Trend::Downtrend,
        Bias::Neutral => Trend::Ranging,
    };

    let last_close = candles.last().map(|c| c.close);
    let (last_bos, last_choch) = match (trend, last_close) {
        (Trend::Uptrend, Some(close)) => {
            let last_high = confirmed_highs.last().map(|s| s.price);
            let last_low = confirmed_lows.last().map(|s| s.price);
            let bos = last_high.filter(|h| close > *h).map(|_| StructureEvent::Bos);
            let choch = last_low.filter(|l| close < *l).map(|_| StructureEvent::Choch);
            (bos, choch)
        }
        (Trend::Downtrend, Some(close)) => {
            let last_low = confirmed_lows.last().map(|s| s.price);
            let last_high = confirmed_highs.last().map(|s| s.price);
            let bos = last_low.filter(|l| close < *l).map(|_| StructureEvent::Bos);
            let choch = last_high.filter(|h| close > *h).map(|_| StructureEvent::Choch);
            (bos, choch)
        }
        _ => (None, None),
    };

    // Protected level: in UPTREND the last confirmed swing low, in
    // DOWNTREND the last confirmed swing high, else null (spec 4.2).
    let key_levels = KeyLevels {
        protected_swing_high: match trend {
            Trend::Downtrend => confirmed_highs.last().map(|s| s.price),
            _ => None,
        },
        protected_swing_low: match trend {
            Trend::Uptrend => confirmed_lows.last().map(|s| s.price),
            _ => None,
        },
        last_swing_high: highs.last().map(|s| s.price),
        last_swing_low: lows.last().map(|s| s.price),
    };

    StructureAnalysis {
        bias,
        trend,
        last_bos,
        last_choch,
        key_levels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;
    use crate::types::Timeframe;

    fn candle(high: Decimal, low: Decimal, close: Decimal, idx: i64) -> Candle {
        let now = Utc::now();
        Candle {
            symbol: "BTCUSDT".into(),
            timeframe: Timeframe::M5,
            open_time: now + Duration::minutes(idx * 5),
            close_time: now + Duration::minutes(idx * 5 + 5),
            open: close,
            high,
            low,
            close,
            volume: dec!(1),
        }
    }

    #[test]
    fn detects_a_simple_swing_high() {
        let candles = vec![
            candle(dec!(100), dec!(95), dec!(98), 0),
            candle(dec!(105), dec!(100), dec!(103), 1),
            candle(dec!(120), dec!(110), dec!(115), 2),
            candle(dec!(108), dec!(102), dec!(104), 3),
            candle(dec!(106), dec!(101), dec!(103), 4),
        ];
        let swings = find_swing_highs(&candles, 2);
        assert_eq!(swings.len(), 1);
        assert_eq!(swings[0].index, 2);
        assert_eq!(swings[0].price, dec!(120));
        assert!(swings[0].confirmed);
    }

    #[test]
    fn tail_swing_is_unconfirmed() {
        let candles = vec![
            candle(dec!(100), dec!(95), dec!(98), 0),
            candle(dec!(105), dec!(100), dec!(103), 1),
            candle(dec!(120), dec!(110), dec!(115), 2),
        ];
        let swings = find_swing_highs(&candles, 2);
        // index 2 has no right-side window at all -> unconfirmed if it qualifies
        assert!(swings.iter().all(|s| !s.confirmed || s.index < 2));
    }
}
