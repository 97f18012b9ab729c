// =============================================================================
// Error taxonomy for the Orion trading engine
// =============================================================================
//
// Every failure the engine can encounter maps to exactly one of these kinds.
// The retry layer keys off `is_transient`; everything else is surfaced to the
// caller and recorded on the decision that triggered it. The scheduler's top
// level converts anything unexpected to `Internal` and keeps running.
// =============================================================================

use thiserror::Error;

/// Engine-wide error type.
#[derive(Debug, Error)]
pub enum BotError {
    /// Configuration is unusable. Fatal at startup, the process exits.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Network-level failure (connect, timeout, 5xx, 429). Retried by the
    /// exchange adapter with exponential backoff before it ever reaches a
    /// caller.
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    /// The exchange returned a structured error body (e.g. -2021 "order would
    /// immediately trigger", -2019 "margin is insufficient"). Never retried.
    #[error("exchange error {code}: {message}")]
    ExchangeBusiness { code: i64, message: String },

    /// The reasoning endpoint could not be reached or returned a non-success
    /// status. The cycle yields zero decisions.
    #[error("LLM endpoint unavailable: {0}")]
    LlmUnavailable(String),

    /// The reasoning endpoint answered, but the body was not the expected
    /// chat-completion shape.
    #[error("LLM response malformed: {0}")]
    LlmMalformed(String),

    /// A caller violated a precondition (missing symbol, LIMIT without an
    /// entry price, non-positive quantity). Never retried.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// The pre-trade safety gate rejected the decision.
    #[error("safety check rejected: {0}")]
    SafetyRejected(String),

    /// A reduce/close action was requested for a symbol with no open position.
    #[error("no position to reduce for {0}")]
    NoPositionToReduce(String),

    /// A LIMIT entry expired unfilled (or was cancelled/rejected) within
    /// `max_wait_time`. There is no market fallback.
    #[error("order not filled: {0}")]
    OrderNotFilled(String),

    /// Anything unexpected. Recorded and skipped; never crashes the scheduler.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type BotResult<T> = Result<T, BotError>;

impl BotError {
    /// Whether the retry layer should re-attempt the operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }

    /// Short machine-readable tag used in audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigInvalid(_) => "config_invalid",
            Self::TransientNetwork(_) => "transient_network",
            Self::ExchangeBusiness { .. } => "exchange_business",
            Self::LlmUnavailable(_) => "llm_unavailable",
            Self::LlmMalformed(_) => "llm_malformed",
            Self::ValidationFailed(_) => "validation_failed",
            Self::SafetyRejected(_) => "safety_rejected",
            Self::NoPositionToReduce(_) => "no_position_to_reduce",
            Self::OrderNotFilled(_) => "order_not_filled",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<reqwest::Error> for BotError {
    fn from(e: reqwest::Error) -> Self {
        // Connect errors, timeouts, and body-read failures are all network
        // conditions worth retrying.
        Self::TransientNetwork(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(BotError::TransientNetwork("timeout".into()).is_transient());
        assert!(!BotError::ExchangeBusiness { code: -2021, message: "would trigger".into() }
            .is_transient());
        assert!(!BotError::ValidationFailed("bad".into()).is_transient());
    }

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(BotError::OrderNotFilled("x".into()).kind(), "order_not_filled");
        assert_eq!(
            BotError::ExchangeBusiness { code: -2010, message: "m".into() }.kind(),
            "exchange_business"
        );
    }
}
