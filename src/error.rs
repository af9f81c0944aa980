use thiserror::Error;

/// Error taxonomy for the decision and execution core. Each variant maps
/// directly to one of the rejection/failure categories the orchestrator and
/// execution layers must distinguish (spec 7); `anyhow` is used only at the
/// binary boundary in `main.rs` to add call-site context.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid intent: {0}")]
    InvalidIntent(String),

    #[error("contract rejected: {0}")]
    ContractRejected(String),

    #[error("gate denied: {0}")]
    GateDenied(String),

    #[error("exchange refused request: {0}")]
    ExchangeRefused(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("persistence error: {0}")]
    PersistenceError(String),

    #[error("invalidation-critical failure: {0}")]
    InvalidationCritical(String),

    #[error("reconciliation mismatch: {0}")]
    Reconciliation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl AppError {
    /// Anti-rage and similar state-machine gates use this shorthand so the
    /// emitted `gateDenied` event carries a stable reason code instead of a
    /// free-form string (spec 4.4).
    pub fn anti_rage_gate(symbol: &str) -> Self {
        AppError::GateDenied(format!("ANTI_RAGE:{symbol}"))
    }
}
