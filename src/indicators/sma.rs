use std::collections::VecDeque;

use rust_decimal::Decimal;

use super::Indicator;
use crate::types::MaReading;

/// Sliding-window simple moving average, updated incrementally one close
/// at a time (spec 4.2: "standard definitions; report {value, priceAbove,
/// priceBelow} using last close").
#[derive(Debug, Clone)]
pub struct SMA {
    period: usize,
    window: VecDeque<Decimal>,
    sum: Decimal,
}

impl SMA {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            window: VecDeque::with_capacity(period),
            sum: Decimal::ZERO,
        }
    }

    pub fn update(&mut self, price: Decimal) -> Option<Decimal> {
        self.window.push_back(price);
        self.sum += price;
        if self.window.len() > self.period {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
            }
        }
        self.value()
    }

    pub fn value(&self) -> Option<Decimal> {
        if self.window.len() < self.period {
            None
        } else {
            Some(self.sum / Decimal::from(self.period as u32))
        }
    }

    pub fn reading(&self, last_price: Decimal) -> Option<MaReading> {
        self.value().map(|value| MaReading {
            value,
            price_above: last_price > value,
            price_below: last_price < value,
        })
    }
}

impl Indicator for SMA {
    fn name(&self) -> &'static str {
        "SMA"
    }

    fn is_ready(&self) -> bool {
        self.value().is_some()
    }

    fn reset(&mut self) {
        self.window.clear();
        self.sum = Decimal::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sma_needs_full_window_before_reporting() {
        let mut sma = SMA::new(3);
        assert_eq!(sma.update(dec!(1)), None);
        assert_eq!(sma.update(dec!(2)), None);
        assert_eq!(sma.update(dec!(3)), Some(dec!(2)));
        assert_eq!(sma.update(dec!(6)), Some(dec!(11) / dec!(3)));
    }

    #[test]
    fn reading_reports_price_above_below() {
        let mut sma = SMA::new(2);
        sma.update(dec!(10));
        sma.update(dec!(20));
        let reading = sma.reading(dec!(25)).unwrap();
        assert_eq!(reading.value, dec!(15));
        assert!(reading.price_above);
        assert!(!reading.price_below);
    }
}
