//! RPC roles over the broker link.
//!
//! Payloads are JSON values; this layer does not define any controller's
//! method schema.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    /// No server is registered under the target identity.
    #[error("No RPC server registered as {0}")]
    UnknownTarget(String),

    /// The server does not expose the method.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// The server did not answer in time.
    #[error("RPC call timed out")]
    Timeout,

    /// The server handled the call and reported a failure.
    #[error("Remote error: {0}")]
    Remote(String),

    /// The link carrying the call is gone.
    #[error("RPC link closed")]
    Closed,
}

/// Outbound calls (the RPC-client role).
#[async_trait::async_trait]
pub trait RpcClient: Send + Sync {
    /// Call `method` on the server registered as `target`.
    async fn call(&self, target: &str, method: &str, args: Vec<Value>)
        -> Result<Value, RpcError>;
}

/// Inbound calls (the surface registered for the RPC-server role).
#[async_trait::async_trait]
pub trait RpcApi: Send + Sync {
    async fn handle(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            RpcError::UnknownTarget("conference-1".to_string()).to_string(),
            "No RPC server registered as conference-1"
        );
        assert_eq!(
            RpcError::MethodNotFound("publish".to_string()).to_string(),
            "Method not found: publish"
        );
        assert_eq!(RpcError::Timeout.to_string(), "RPC call timed out");
    }
}
