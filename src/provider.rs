use crate::backend::redis::{ConnectError, RedisScriptRunner};
use crate::backend::ScriptRunner;
use crate::clock::{Clock, TokioClock};
use crate::config::ConfigSource;
use crate::executor::ScriptExecutor;
use crate::limiter::RateLimiter;
use std::sync::Arc;

/// Namespace for outbound mail-provider API calls.
pub const GMAIL_NAMESPACE: &str = "gmail";

/// Namespace for outbound LLM-provider API calls.
pub const OPENAI_NAMESPACE: &str = "openai";

/// Holds one [RateLimiter] per rate-limited external API.
///
/// The limiters share a single backend connection, script digest cache, and
/// clock; only their window policies differ. Building the limiters performs
/// no I/O; the decision script is registered lazily on first use.
pub struct Provider<R: ScriptRunner> {
    gmail: RateLimiter<R>,
    openai: RateLimiter<R>,
}

impl Provider<RedisScriptRunner> {
    /// Connect to the Redis backend at `url` and build limiters with the
    /// system clock.
    pub async fn connect(url: &str, config: &dyn ConfigSource) -> Result<Self, ConnectError> {
        let runner = RedisScriptRunner::connect(url).await?;
        Ok(Self::new(runner, Arc::new(TokioClock), config))
    }

    /// Like [Provider::connect], with the connection settings taken from the
    /// configuration source.
    pub async fn connect_from_config(config: &dyn ConfigSource) -> Result<Self, ConnectError> {
        let runner = RedisScriptRunner::connect_from_config(config).await?;
        Ok(Self::new(runner, Arc::new(TokioClock), config))
    }
}

impl<R: ScriptRunner> Provider<R> {
    /// Build limiters for every known namespace over a shared runner.
    pub fn new(runner: R, clock: Arc<dyn Clock>, config: &dyn ConfigSource) -> Self {
        let executor = ScriptExecutor::new(runner);
        Self {
            gmail: RateLimiter::new(
                executor.clone(),
                Arc::clone(&clock),
                GMAIL_NAMESPACE,
                config,
            ),
            openai: RateLimiter::new(executor, clock, OPENAI_NAMESPACE, config),
        }
    }

    /// Limiter for the mail-provider namespace.
    pub fn gmail(&self) -> &RateLimiter<R> {
        &self.gmail
    }

    /// Limiter for the LLM-provider namespace.
    pub fn openai(&self) -> &RateLimiter<R> {
        &self.openai
    }

    /// Limiter for a namespace, if it is one this provider knows.
    pub fn limiter_for(&self, namespace: &str) -> Option<&RateLimiter<R>> {
        match namespace {
            GMAIL_NAMESPACE => Some(&self.gmail),
            OPENAI_NAMESPACE => Some(&self.openai),
            _ => None,
        }
    }
}
