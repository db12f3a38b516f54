use crate::backend::{RunnerError, ScriptRunner};
use crate::clock::{unix_seconds, Clock};
use crate::config::{self, ConfigSource, Window};
use crate::executor::ScriptExecutor;
use crate::script::Script;
use redis::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Bucket shared by all callers of a namespace. The wire contract supports
/// per-key buckets, but every namespace currently shares one set of counters.
pub const DEFAULT_BUCKET: &str = "global";

#[derive(Debug, Error)]
pub enum Error {
    /// The backend could not produce a decision. The limiter fails closed:
    /// the caller's request does not proceed.
    #[error("rate limit backend unavailable (namespace={namespace}, addr={addr}): {source}")]
    BackendUnavailable {
        namespace: String,
        addr: String,
        #[source]
        source: RunnerError,
    },
    /// The backend replied with something other than the decision shape.
    /// Treated exactly like an unavailable backend.
    #[error("unexpected rate limit reply shape (namespace={namespace})")]
    MalformedResponse { namespace: String },
    /// The caller canceled while waiting for admission.
    #[error("rate limit wait canceled")]
    Canceled,
}

/// Outcome of one sliding-window evaluation.
///
/// When `allowed` is false the remaining fields describe the first violated
/// window in policy order; when true, the last evaluated window and its
/// post-increment count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub window_seconds: u64,
    pub limit: u64,
    pub current: u64,
}

/// Sliding-window rate limiter for one namespace.
///
/// All clones (and all processes pointed at the same backend) share the same
/// counters; admission is decided atomically by the backend, never locally.
pub struct RateLimiter<R: ScriptRunner> {
    executor: ScriptExecutor<R>,
    clock: Arc<dyn Clock>,
    namespace: String,
    bucket: String,
    windows: Vec<Window>,
    script: Script,
}

impl<R: ScriptRunner> Clone for RateLimiter<R> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            clock: Arc::clone(&self.clock),
            namespace: self.namespace.clone(),
            bucket: self.bucket.clone(),
            windows: self.windows.clone(),
            script: self.script.clone(),
        }
    }
}

impl<R: ScriptRunner> RateLimiter<R> {
    /// Create a limiter for `namespace`, resolving its window policy from
    /// `config` once; the windows are fixed for the lifetime of the limiter.
    pub fn new(
        executor: ScriptExecutor<R>,
        clock: Arc<dyn Clock>,
        namespace: impl Into<String>,
        config: &dyn ConfigSource,
    ) -> Self {
        let namespace = namespace.into();
        let windows = config::windows(&namespace, config);
        let script = Script::rate_limit(config);
        Self {
            executor,
            clock,
            namespace,
            bucket: DEFAULT_BUCKET.to_string(),
            windows,
            script,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    /// Block until the namespace admits the next request or `cancel` fires.
    ///
    /// Each denied decision is logged and then slept through for exactly the
    /// violated window's size before checking again; there is no internal
    /// bound on the number of cycles. A backend failure is returned
    /// immediately (fail closed), and cancellation interrupts a sleep without
    /// any further backend call.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), Error> {
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Canceled);
            }

            let decision = self.check().await?;
            if decision.allowed {
                return Ok(());
            }

            log::warn!(
                "rate limit exceeded: namespace={} bucket={} window_seconds={} limit={} current={} wait_seconds={}",
                self.namespace,
                self.bucket,
                decision.window_seconds,
                decision.limit,
                decision.current,
                decision.window_seconds,
            );

            let delay = Duration::from_secs(decision.window_seconds);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Canceled),
                _ = self.clock.sleep(delay) => {}
            }
        }
    }

    /// One decision at the clock's current time, without sleeping.
    pub(crate) async fn check(&self) -> Result<Decision, Error> {
        let now = unix_seconds(self.clock.now());
        let mut args = Vec::with_capacity(4 + self.windows.len() * 2);
        args.push(self.namespace.clone());
        args.push(self.bucket.clone());
        args.push(now.to_string());
        args.push(self.windows.len().to_string());
        for window in &self.windows {
            args.push(window.size_seconds.to_string());
            args.push(window.limit.to_string());
        }

        let value = self
            .executor
            .execute(&self.script, &[], &args)
            .await
            .map_err(|source| {
                let addr = self.executor.runner().address();
                log::error!(
                    "rate limit backend error: namespace={} addr={} error={}",
                    self.namespace,
                    addr,
                    source,
                );
                Error::BackendUnavailable {
                    namespace: self.namespace.clone(),
                    addr,
                    source,
                }
            })?;

        self.parse_decision(value)
    }

    fn parse_decision(&self, value: Value) -> Result<Decision, Error> {
        let malformed = || {
            log::error!(
                "unexpected rate limit reply shape: namespace={}",
                self.namespace
            );
            Error::MalformedResponse {
                namespace: self.namespace.clone(),
            }
        };

        let fields = match value {
            Value::Bulk(fields) if fields.len() >= 4 => fields,
            _ => return Err(malformed()),
        };
        let mut ints = fields.iter().map(int_field);
        let allowed = ints.next().flatten().ok_or_else(|| malformed())?;
        let window_seconds = ints.next().flatten().ok_or_else(|| malformed())?;
        let limit = ints.next().flatten().ok_or_else(|| malformed())?;
        let current = ints.next().flatten().ok_or_else(|| malformed())?;

        Ok(Decision {
            allowed: allowed == 1,
            window_seconds,
            limit,
            current,
        })
    }
}

/// Integer reply element, tolerating the string encodings some backends and
/// proxies produce.
fn int_field(value: &Value) -> Option<u64> {
    match value {
        Value::Int(i) => u64::try_from(*i).ok(),
        Value::Data(bytes) => std::str::from_utf8(bytes).ok()?.trim().parse().ok(),
        Value::Status(s) => s.trim().parse().ok(),
        _ => None,
    }
}
