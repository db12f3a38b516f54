//! Shared doubles for clock- and backend-dependent tests.

use crate::backend::{RunnerError, ScriptRunner};
use crate::clock::Clock;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// An empty configuration source.
pub(crate) fn empty_config() -> HashMap<String, String> {
    HashMap::new()
}

/// Manually controlled [Clock].
///
/// In advancing mode a sleep records its duration, advances the clock by it,
/// and completes immediately. In stalled mode the sleep still records but
/// never completes, which is how cancellation precedence is exercised.
#[derive(Clone)]
pub(crate) struct ManualClock {
    inner: Arc<ClockInner>,
}

struct ClockInner {
    now: Mutex<SystemTime>,
    sleeps: Mutex<Vec<Duration>>,
    auto_advance: bool,
}

impl ManualClock {
    pub fn advancing(start_unix: u64) -> Self {
        Self::build(start_unix, true)
    }

    pub fn stalled(start_unix: u64) -> Self {
        Self::build(start_unix, false)
    }

    fn build(start_unix: u64, auto_advance: bool) -> Self {
        Self {
            inner: Arc::new(ClockInner {
                now: Mutex::new(SystemTime::UNIX_EPOCH + Duration::from_secs(start_unix)),
                sleeps: Mutex::new(Vec::new()),
                auto_advance,
            }),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner.sleeps.lock().unwrap().clone()
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.inner.now.lock().unwrap();
        *now += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.inner.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.inner.sleeps.lock().unwrap().push(duration);
        if self.inner.auto_advance {
            self.advance(duration);
            futures::future::ready(()).boxed()
        } else {
            futures::future::pending().boxed()
        }
    }
}

/// [ScriptRunner] decorator counting backend calls.
#[derive(Clone)]
pub(crate) struct CountingRunner<R> {
    inner: R,
    evals: Arc<AtomicUsize>,
    registers: Arc<AtomicUsize>,
}

impl<R> CountingRunner<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            evals: Arc::new(AtomicUsize::new(0)),
            registers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn evals(&self) -> usize {
        self.evals.load(Ordering::SeqCst)
    }

    pub fn registers(&self) -> usize {
        self.registers.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R: ScriptRunner> ScriptRunner for CountingRunner<R> {
    async fn eval_digest(
        &self,
        digest: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<redis::Value, RunnerError> {
        self.evals.fetch_add(1, Ordering::SeqCst);
        self.inner.eval_digest(digest, keys, args).await
    }

    async fn register(&self, body: &str) -> Result<String, RunnerError> {
        self.registers.fetch_add(1, Ordering::SeqCst);
        self.inner.register(body).await
    }

    fn address(&self) -> String {
        self.inner.address()
    }
}
