//! The shared backend that evaluates registered scripts atomically.

use async_trait::async_trait;
use thiserror::Error;

#[cfg(feature = "dashmap")]
#[cfg_attr(docsrs, doc(cfg(feature = "dashmap")))]
pub mod memory;

pub mod redis;

/// Failure modes of a [ScriptRunner] call.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The digest is not registered with the backend. This is the one
    /// recoverable condition: callers may register the script body and retry.
    #[error("script not registered with the backend")]
    UnknownScript,
    /// Transport failure or backend-side error.
    #[error("redis error: {0}")]
    Transport(
        #[source]
        #[from]
        ::redis::RedisError,
    ),
}

impl RunnerError {
    pub fn is_unknown_script(&self) -> bool {
        matches!(self, Self::UnknownScript)
    }
}

/// Executes registered scripts against a shared backend.
///
/// A runner is required to implement [Clone]; implementations wrap their
/// connection state in an [Arc](std::sync::Arc) (or use a connection manager
/// that already does so internally), making clones cheap handles onto the
/// same backend.
#[async_trait]
pub trait ScriptRunner: Clone + Send + Sync + 'static {
    /// Execute the script registered under `digest`.
    ///
    /// Returns [RunnerError::UnknownScript] when the backend does not know
    /// the digest, and [RunnerError::Transport] for every other failure.
    async fn eval_digest(
        &self,
        digest: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<::redis::Value, RunnerError>;

    /// Register a script body with the backend, returning its digest.
    async fn register(&self, body: &str) -> Result<String, RunnerError>;

    /// Backend address included in fail-closed error context.
    fn address(&self) -> String;
}
