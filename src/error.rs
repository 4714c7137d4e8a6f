use alloy::transports::{RpcError, TransportErrorKind};

/// Failure of a single RPC attempt. Transient by definition: the client
/// retries these in place until the attempt budget runs out.
#[derive(Debug, thiserror::Error)]
pub enum RpcFailure {
    #[error("attempt timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("node error response: {0}")]
    ErrorResp(String),
}

/// Error that aborts a download or listen run.
///
/// There is no partial-completion fallback: persistent failure after
/// in-budget retries signals a broken endpoint, not bad luck, so the run
/// stops at the first fatal error and the caller decides what to do next.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("{method} failed after {attempts} attempts: {last_error}")]
    RpcExhausted {
        method: &'static str,
        attempts: u32,
        last_error: RpcFailure,
    },

    #[error("block {number} not found")]
    BlockNotFound { number: u64 },

    #[error("block subscription closed")]
    SubscriptionClosed,

    #[error("failed to subscribe to new heads: {0}")]
    Subscribe(String),
}

impl From<RpcError<TransportErrorKind>> for RpcFailure {
    fn from(value: RpcError<TransportErrorKind>) -> Self {
        match value {
            RpcError::ErrorResp(ref resp) => Self::ErrorResp(resp.to_string()),
            RpcError::NullResp => Self::ErrorResp("unexpected empty RPC response".to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}
