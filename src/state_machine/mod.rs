use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::AppError;
use crate::types::{LockReason, Side, StateMachineEntry, SymbolState};

/// Per-symbol lifecycle plus a global pause flag (spec 4.4). The global
/// flag is grounded directly on the teacher's `BotController` atomic-bool
/// pattern; the per-symbol table generalizes it from a single instance to
/// one entry per symbol, each carrying its own anti-rage lock expiry.
pub struct StateMachine {
    entries: RwLock<HashMap<String, StateMachineEntry>>,
    paused: AtomicBool,
    anti_rage_lock_duration: Duration,
}

impl StateMachine {
    pub fn new(anti_rage_lock_duration_secs: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            paused: AtomicBool::new(false),
            anti_rage_lock_duration: Duration::seconds(anti_rage_lock_duration_secs as i64),
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        info!("state machine paused: all entries blocked");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        info!("state machine resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// `canEnter` (spec 4.4): allowed iff not globally paused, the symbol's
    /// state is FLAT, or LOCKED with an expired TTL.
    pub async fn can_enter(&self, symbol: &str) -> Result<(), AppError> {
        if self.is_paused() {
            return Err(AppError::GateDenied(format!("PAUSED:{symbol}")));
        }

        let entries = self.entries.read().await;
        match entries.get(symbol) {
            None => Ok(()),
            Some(entry) => match entry.state {
                SymbolState::Flat => Ok(()),
                SymbolState::Locked => {
                    let expired = entry
                        .lock_expires_at
                        .map(|expiry| Utc::now() >= expiry)
                        .unwrap_or(true);
                    if expired {
                        Ok(())
                    } else {
                        Err(AppError::anti_rage_gate(symbol))
                    }
                }
                SymbolState::InLong | SymbolState::InShort | SymbolState::Exiting => {
                    Err(AppError::GateDenied(format!("ALREADY_ACTIVE:{symbol}")))
                }
            },
        }
    }

    pub async fn enter(&self, symbol: &str, side: Side) -> Result<(), AppError> {
        self.can_enter(symbol).await?;
        let mut entries = self.entries.write().await;
        entries.insert(
            symbol.to_string(),
            StateMachineEntry {
                symbol: symbol.to_string(),
                state: match side {
                    Side::Long => SymbolState::InLong,
                    Side::Short => SymbolState::InShort,
                },
                side: Some(side),
                lock_expires_at: None,
                lock_reason: None,
            },
        );
        Ok(())
    }

    pub async fn start_exit(&self, symbol: &str) -> Result<(), AppError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(symbol)
            .ok_or_else(|| AppError::GateDenied(format!("NOT_ACTIVE:{symbol}")))?;
        entry.state = SymbolState::Exiting;
        Ok(())
    }

    /// Clean exit (user-requested close, take-profit): returns to FLAT with
    /// no cooldown.
    pub async fn exit_clean(&self, symbol: &str) {
        let mut entries = self.entries.write().await;
        entries.insert(symbol.to_string(), StateMachineEntry::flat(symbol));
    }

    /// Stop-loss exit (strategic SL trigger or invalidation): transitions
    /// to LOCKED with the anti-rage TTL (spec 4.4, 4.8, 4.10).
    pub async fn exit_stopped(&self, symbol: &str, reason: LockReason) {
        let expires_at = Utc::now() + self.anti_rage_lock_duration;
        let mut entries = self.entries.write().await;
        entries.insert(
            symbol.to_string(),
            StateMachineEntry {
                symbol: symbol.to_string(),
                state: SymbolState::Locked,
                side: None,
                lock_expires_at: Some(expires_at),
                lock_reason: Some(reason),
            },
        );
    }

    pub async fn force_unlock(&self, symbol: &str) {
        let mut entries = self.entries.write().await;
        entries.insert(symbol.to_string(), StateMachineEntry::flat(symbol));
    }

    pub async fn state_of(&self, symbol: &str) -> SymbolState {
        self.entries
            .read()
            .await
            .get(symbol)
            .map(|e| e.state)
            .unwrap_or(SymbolState::Flat)
    }

    pub async fn has_open_position(&self, symbol: &str) -> bool {
        self.entries
            .read()
            .await
            .get(symbol)
            .map(|e| e.has_open_position())
            .unwrap_or(false)
    }

    /// Drops entries that are FLAT and have no further bookkeeping value;
    /// symbols not currently in any active/locked state are pruned.
    pub async fn prune_inactive(&self, active_symbols: &[String]) {
        let mut entries = self.entries.write().await;
        entries.retain(|symbol, entry| {
            active_symbols.contains(symbol) || entry.state != SymbolState::Flat
        });
    }

    pub async fn lock_expiry(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.entries.read().await.get(symbol).and_then(|e| e.lock_expires_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn post_stop_loss_lock_blocks_reentry_until_ttl() {
        let sm = StateMachine::new(900);
        sm.enter("BTCUSDT", Side::Long).await.unwrap();
        sm.start_exit("BTCUSDT").await.unwrap();
        sm.exit_stopped("BTCUSDT", LockReason::StopLoss).await;

        let result = sm.can_enter("BTCUSDT").await;
        assert!(result.is_err());
        assert_eq!(sm.state_of("BTCUSDT").await, SymbolState::Locked);
    }

    #[tokio::test]
    async fn expired_lock_allows_reentry() {
        let sm = StateMachine::new(0);
        sm.enter("ETHUSDT", Side::Short).await.unwrap();
        sm.exit_stopped("ETHUSDT", LockReason::Invalidation).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(sm.can_enter("ETHUSDT").await.is_ok());
    }

    #[tokio::test]
    async fn at_most_one_open_side_per_symbol() {
        let sm = StateMachine::new(900);
        sm.enter("BTCUSDT", Side::Long).await.unwrap();
        let second = sm.enter("BTCUSDT", Side::Short).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn global_pause_blocks_all_entries() {
        let sm = StateMachine::new(900);
        sm.pause();
        assert!(sm.can_enter("BTCUSDT").await.is_err());
        sm.resume();
        assert!(sm.can_enter("BTCUSDT").await.is_ok());
    }

    #[tokio::test]
    async fn clean_exit_has_no_cooldown() {
        let sm = StateMachine::new(900);
        sm.enter("BTCUSDT", Side::Long).await.unwrap();
        sm.start_exit("BTCUSDT").await.unwrap();
        sm.exit_clean("BTCUSDT").await;
        assert!(sm.can_enter("BTCUSDT").await.is_ok());
    }
}
