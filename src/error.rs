// =============================================================================
// Exchange errors — typed failure kinds carried inside `anyhow::Error`
// =============================================================================
//
// Every public call returns `anyhow::Result`. When the failure has a kind a
// caller may want to branch on (unknown symbol, rejected order, exchange error
// code) the root cause is an `ExchangeError` and can be recovered with
// `err.downcast_ref::<ExchangeError>()`.
// =============================================================================

use thiserror::Error;

/// Failure kinds surfaced by the session and the futures client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    /// The symbol is not present in the loaded market metadata.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// The timeframe key is not one of the supported candle intervals.
    #[error("unsupported timeframe '{0}' (expected one of 1m, 5m, 15m, 30m, 1h, 2h, 4h, 1d)")]
    UnsupportedTimeframe(String),

    /// Order parameters were rejected locally before submission.
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// A private endpoint was called on a session built without credentials.
    #[error("endpoint {0} requires API credentials")]
    MissingCredentials(String),

    /// Bitget answered with a non-success business code.
    #[error("bitget error {code}: {msg}")]
    Api { code: String, msg: String },

    /// Transport-level failure with a body that is not a Bitget envelope.
    #[error("bitget returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
}

impl ExchangeError {
    /// Find an `ExchangeError` anywhere in an `anyhow` chain.
    pub fn find(err: &anyhow::Error) -> Option<&ExchangeError> {
        err.chain().find_map(|cause| cause.downcast_ref::<ExchangeError>())
    }
}
