use rust_decimal::Decimal;

use super::{Indicator, ATR};
use crate::types::SupertrendDirection;

#[derive(Debug, Clone, Copy)]
pub struct SupertrendReading {
    pub value: Decimal,
    pub direction: SupertrendDirection,
    pub upper_band: Decimal,
    pub lower_band: Decimal,
}

/// ATR-band trend-following indicator (spec 4.2). Basic bands are
/// `hl2 ± multiplier * ATR`; the final upper band only ratchets down
/// (never widens) unless the previous close broke through it, and the
/// final lower band is symmetric. Direction flips when close crosses the
/// currently active band.
#[derive(Debug, Clone)]
pub struct Supertrend {
    atr: ATR,
    multiplier: Decimal,
    prev_final_upper: Option<Decimal>,
    prev_final_lower: Option<Decimal>,
    prev_close: Option<Decimal>,
    direction: SupertrendDirection,
    value: Option<Decimal>,
}

impl Supertrend {
    pub fn new(period: usize, multiplier: Decimal) -> Self {
        Self {
            atr: ATR::new(period),
            multiplier,
            prev_final_upper: None,
            prev_final_lower: None,
            prev_close: None,
            direction: SupertrendDirection::Neutral,
            value: None,
        }
    }

    pub fn update(&mut self, high: Decimal, low: Decimal, close: Decimal) -> Option<SupertrendReading> {
        let atr = self.atr.update(high, low, close)?;
        let hl2 = (high + low) / Decimal::from(2);
        let basic_upper = hl2 + self.multiplier * atr;
        let basic_lower = hl2 - self.multiplier * atr;

        let final_upper = match (self.prev_final_upper, self.prev_close) {
            (Some(prev_fub), Some(prev_close)) => {
                if basic_upper < prev_fub || prev_close > prev_fub {
                    basic_upper
                } else {
                    prev_fub
                }
            }
            _ => basic_upper,
        };

        let final_lower = match (self.prev_final_lower, self.prev_close) {
            (Some(prev_flb), Some(prev_close)) => {
                if basic_lower > prev_flb || prev_close < prev_flb {
                    basic_lower
                } else {
                    prev_flb
                }
            }
            _ => basic_lower,
        };

        let direction = match self.direction {
            SupertrendDirection::Neutral => {
                if close > final_upper {
                    SupertrendDirection::Long
                } else {
                    SupertrendDirection::Short
                }
            }
            SupertrendDirection::Long => {
                if close < final_lower {
                    SupertrendDirection::Short
                } else {
                    SupertrendDirection::Long
                }
            }
            SupertrendDirection::Short => {
                if close > final_upper {
                    SupertrendDirection::Long
                } else {
                    SupertrendDirection::Short
                }
            }
        };

        let value = match direction {
            SupertrendDirection::Long | SupertrendDirection::Neutral => final_lower,
            SupertrendDirection::Short => final_upper,
        };

        self.prev_final_upper = Some(final_upper);
        self.prev_final_lower = Some(final_lower);
        self.prev_close = Some(close);
        self.direction = direction;
        self.value = Some(value);

        Some(SupertrendReading {
            value,
            direction,
            upper_band: final_upper,
            lower_band: final_lower,
        })
    }

    pub fn direction(&self) -> SupertrendDirection {
        self.direction
    }

    pub fn value(&self) -> Option<Decimal> {
        self.value
    }
}

impl Indicator for Supertrend {
    fn name(&self) -> &'static str {
        "Supertrend"
    }

    fn is_ready(&self) -> bool {
        self.value.is_some()
    }

    fn reset(&mut self) {
        self.atr.reset();
        self.prev_final_upper = None;
        self.prev_final_lower = None;
        self.prev_close = None;
        self.direction = SupertrendDirection::Neutral;
        self.value = None;
    }
}
