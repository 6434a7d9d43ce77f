//! Error types for the wagering-round engine
//!
//! Request-validation failures are returned synchronously to the caller and
//! never retried; settlement failures are per-bet and non-fatal to the round.

use thiserror::Error;

/// Failures a bet placement can be rejected with.
///
/// Each variant maps to a stable machine code surfaced in acknowledgments so
/// clients can branch without parsing messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BetError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown outcome option: {0}")]
    UnknownOption(String),

    #[error("stake {amount} outside allowed range [{min}, {max}]")]
    StakeOutOfRange { amount: u64, min: u64, max: u64 },

    #[error("round not found")]
    RoundNotFound,

    #[error("betting for this round is closed")]
    RoundClosed,

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("account not found")]
    AccountNotFound,

    #[error("authentication required")]
    AuthenticationRequired,

    #[error("too many requests")]
    TooManyRequests,
}

impl BetError {
    /// Stable machine-readable code for acknowledgments.
    pub fn code(&self) -> &'static str {
        match self {
            BetError::InvalidRequest(_) => "INVALID_REQUEST",
            BetError::UnknownOption(_) => "UNKNOWN_OPTION",
            BetError::StakeOutOfRange { .. } => "STAKE_OUT_OF_RANGE",
            BetError::RoundNotFound => "ROUND_NOT_FOUND",
            BetError::RoundClosed => "ROUND_CLOSED",
            BetError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            BetError::AccountNotFound => "ACCOUNT_NOT_FOUND",
            BetError::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            BetError::TooManyRequests => "TOO_MANY_REQUESTS",
        }
    }
}

/// Ledger store failures outside the bet-placement path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("round not found")]
    RoundNotFound,

    #[error("bet not found")]
    BetNotFound,

    #[error("account not found")]
    AccountNotFound,

    #[error("bet outcome already recorded")]
    AlreadySettled,

    #[error("invalid round transition: {0}")]
    InvalidTransition(String),
}

/// Settlement engine failures that abort a whole settlement pass.
///
/// Per-bet credit failures are deliberately NOT here: they are caught inside
/// the pass, logged, and counted so the round still completes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettlementError {
    #[error("round not found")]
    RoundNotFound,

    #[error("round is still open for betting")]
    RoundStillOpen,

    #[error("round has no outcome options to draw from")]
    NoOutcomeOptions,

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Settings provider failures; the round loop retries these with backoff.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("game settings unavailable: {0}")]
    Unavailable(String),
}

/// Top-level engine error for wiring and the round loop.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Settlement(#[from] SettlementError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("server error: {0}")]
    Server(String),
}
