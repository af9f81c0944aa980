use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::events::{DomainEvent, EventBus};
use crate::types::{Intent, StrategyState, WatchMode, WatchRule, WatchStatus, WatchTrigger};

/// Conditional alerts/entries evaluated on every strategy state update (spec
/// 4.11). Grounded on the teacher's `NotificationManager` (in-memory
/// collection, periodic cleanup, emit-on-condition), generalized from a flat
/// alert log to rule evaluation with an AUTO_ENTER re-submission path.
pub struct WatchManager {
    watches: RwLock<HashMap<String, WatchRule>>,
    terminal_since: RwLock<HashMap<String, DateTime<Utc>>>,
    events: EventBus,
    retention: Duration,
}

impl WatchManager {
    pub fn new(events: EventBus, retention_secs: u64) -> Self {
        Self {
            watches: RwLock::new(HashMap::new()),
            terminal_since: RwLock::new(HashMap::new()),
            events,
            retention: Duration::seconds(retention_secs as i64),
        }
    }

    pub async fn create(&self, rule: WatchRule) -> String {
        let id = rule.id.clone();
        self.watches.write().await.insert(id.clone(), rule);
        id
    }

    pub async fn cancel(&self, id: &str) {
        let mut watches = self.watches.write().await;
        if let Some(rule) = watches.get_mut(id) {
            if rule.is_active() {
                rule.status = WatchStatus::Cancelled;
                self.terminal_since.write().await.insert(id.to_string(), Utc::now());
            }
        }
    }

    pub async fn get(&self, id: &str) -> Option<WatchRule> {
        self.watches.read().await.get(id).cloned()
    }

    /// Evaluates all active watches for `state.symbol`. Publishes
    /// `watchTriggered` for every firing watch (both modes) and returns the
    /// re-submission intents for AUTO_ENTER watches, which still pass
    /// through every orchestrator gate (spec 4.11).
    pub async fn evaluate(&self, state: &StrategyState) -> Vec<Intent> {
        let mut intents = Vec::new();
        let mut watches = self.watches.write().await;
        let now = Utc::now();

        for rule in watches.values_mut() {
            if !rule.is_active() || rule.symbol != state.symbol {
                continue;
            }
            if !is_triggered(rule, state) {
                continue;
            }

            rule.status = WatchStatus::Triggered;
            self.events.publish(DomainEvent::WatchTriggered {
                watch_id: rule.id.clone(),
                symbol: rule.symbol.clone(),
            });
            self.terminal_since.write().await.insert(rule.id.clone(), now);

            if rule.mode == WatchMode::AutoEnter {
                let mut intent = Intent::enter(rule.symbol.clone(), rule.intended_side);
                intent.risk_percent = Some(rule.preset.risk_percent);
                intent.sl_rule = Some(rule.preset.sl_rule);
                intent.trail_mode = Some(rule.preset.trail_mode);
                intents.push(intent);
            }
        }
        intents
    }

    /// Minute-granularity expiry timer (spec 4.11).
    pub async fn expire_due(&self, now: DateTime<Utc>) {
        let mut watches = self.watches.write().await;
        let mut newly_terminal = Vec::new();
        for rule in watches.values_mut() {
            if rule.is_active() && now >= rule.expiry_time {
                rule.status = WatchStatus::Expired;
                newly_terminal.push(rule.id.clone());
                self.events.publish(DomainEvent::WatchExpired { watch_id: rule.id.clone() });
            }
        }
        drop(watches);
        if !newly_terminal.is_empty() {
            let mut terminal_since = self.terminal_since.write().await;
            for id in newly_terminal {
                terminal_since.insert(id, now);
            }
        }
    }

    /// Periodic cleanup: drops terminal watches older than the configured
    /// retention (spec 4.11).
    pub async fn cleanup(&self, now: DateTime<Utc>) {
        let mut watches = self.watches.write().await;
        let mut terminal_since = self.terminal_since.write().await;
        watches.retain(|id, rule| {
            if rule.is_active() {
                return true;
            }
            match terminal_since.get(id) {
                Some(since) => now - *since < self.retention,
                None => true,
            }
        });
        terminal_since.retain(|id, _| watches.contains_key(id));
    }

    pub async fn active_count(&self) -> usize {
        self.watches.read().await.values().filter(|w| w.is_active()).count()
    }
}

fn is_triggered(rule: &WatchRule, state: &StrategyState) -> bool {
    let snapshot = &state.snapshot;
    match rule.trigger_type {
        WatchTrigger::CloserToSma200 => snapshot.dist_to_sma200_pct.abs() <= rule.threshold_percent,
        WatchTrigger::CloserToEma1000 => snapshot.dist_to_ema1000_pct.abs() <= rule.threshold_percent,
        WatchTrigger::CloserToSupertrend => snapshot.dist_to_supertrend_pct.abs() <= rule.threshold_percent,
        WatchTrigger::PriceAbove => rule
            .target_price
            .map(|target| snapshot.last_price > target)
            .unwrap_or(false),
        WatchTrigger::PriceBelow => rule
            .target_price
            .map(|target| snapshot.last_price < target)
            .unwrap_or(false),
    }
}
