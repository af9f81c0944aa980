use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{
    Bias, Side, StrategyState, StructureEvent, SupertrendDirection, Trend,
};

/// Severity carried on every emitted event, matching the teacher's
/// three-tier notification model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// The closed set of domain events this core emits (spec 4.1-4.10, 6).
/// No component signals state changes by string name; every emission goes
/// through one of these variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DomainEvent {
    CandleClosed {
        symbol: String,
        timeframe: String,
        close_time: DateTime<Utc>,
    },
    CandleUpdated {
        symbol: String,
        timeframe: String,
    },
    StateUpdated {
        state: Box<StrategyState>,
    },
    BiasFlipped {
        symbol: String,
        from: Bias,
        to: Bias,
    },
    SupertrendFlipped {
        symbol: String,
        from: SupertrendDirection,
        to: SupertrendDirection,
    },
    OrderPlaced {
        order_id: String,
        symbol: String,
    },
    OrderPartiallyFilled {
        order_id: String,
        filled_size: Decimal,
    },
    OrderFilled {
        order_id: String,
        filled_size: Decimal,
        avg_price: Decimal,
    },
    OrderCancelled {
        order_id: String,
    },
    OrderRejected {
        order_id: String,
        reason: String,
    },
    PositionClosed {
        symbol: String,
        side: Side,
        realized_pnl: Decimal,
    },
    PnlUpdated {
        symbol: String,
        pnl: Decimal,
        pnl_percentage: Decimal,
    },
    StrategicSlTriggered {
        symbol: String,
        side: Side,
        sl_price: Decimal,
        close_price: Decimal,
    },
    SlTrailed {
        symbol: String,
        old: Decimal,
        new: Decimal,
    },
    SwingBreak {
        symbol: String,
        side: Side,
        level: Decimal,
    },
    LeverageClamped {
        symbol: String,
        requested: u32,
        clamped_to: u32,
    },
    WatchTriggered {
        watch_id: String,
        symbol: String,
    },
    WatchExpired {
        watch_id: String,
    },
    GateDenied {
        symbol: String,
        reason: String,
    },
    InvalidationCriticalFailure {
        symbol: String,
        detail: String,
    },
    TrendChanged {
        symbol: String,
        from: Trend,
        to: Trend,
    },
    StructureEventOccurred {
        symbol: String,
        event: StructureEvent,
    },
}

impl DomainEvent {
    pub fn severity(&self) -> Severity {
        match self {
            DomainEvent::InvalidationCriticalFailure { .. } => Severity::Critical,
            DomainEvent::StrategicSlTriggered { .. }
            | DomainEvent::SwingBreak { .. }
            | DomainEvent::GateDenied { .. }
            | DomainEvent::OrderRejected { .. } => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

/// A stamped, broadcastable wrapper around a [`DomainEvent`]; every consumer
/// (watch engine, persistence, an eventual UI surface) subscribes to the same
/// channel rather than being wired point-to-point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Emitted {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub event: DomainEvent,
}

impl Emitted {
    pub fn new(event: DomainEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            severity: event.severity(),
            event,
        }
    }
}

/// Fan-out bus. Cloning is cheap; every subscriber gets its own receiver and
/// lagging consumers drop the oldest events rather than blocking publishers.
#[derive(Clone)]
pub struct EventBus {
    sender: tokio::sync::broadcast::Sender<Emitted>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: DomainEvent) {
        let emitted = Emitted::new(event);
        match emitted.severity {
            Severity::Critical => tracing::error!(?emitted.event, "critical event"),
            Severity::Warning => tracing::warn!(?emitted.event, "warning event"),
            Severity::Info => tracing::debug!(?emitted.event, "event"),
        }
        // No subscribers is a normal startup-ordering case, not an error.
        let _ = self.sender.send(emitted);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Emitted> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
