use crate::backend::{RunnerError, ScriptRunner};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::{ErrorKind, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-process [ScriptRunner] implementing the sliding-window decision
/// contract of [Script::rate_limit](crate::script::Script::rate_limit).
///
/// Intended for tests and local development: it tracks true global state for
/// all clones, requires scripts to be registered before they can be
/// evaluated (so executor self-healing is exercised for real), and evaluates
/// each decision under a single lock, giving the same atomicity as Redis
/// script execution.
#[derive(Clone, Default)]
pub struct InMemoryRunner {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    scripts: DashMap<String, String>,
    state: Mutex<WindowState>,
}

#[derive(Default)]
struct WindowState {
    // (namespace, bucket, window size) -> accepted event times (unix seconds)
    events: HashMap<(String, String, u64), Vec<u64>>,
}

impl InMemoryRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accepted events currently recorded for a window.
    pub fn recorded(&self, namespace: &str, bucket: &str, size_seconds: u64) -> usize {
        let state = self.inner.state.lock().expect("window state poisoned");
        state
            .events
            .get(&(namespace.to_string(), bucket.to_string(), size_seconds))
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn decide(&self, args: &[String]) -> Result<Value, RunnerError> {
        let namespace = args.first().ok_or_else(bad_args)?.clone();
        let bucket = args.get(1).ok_or_else(bad_args)?.clone();
        let now: u64 = parse_arg(args.get(2))?;
        let window_count: usize = parse_arg(args.get(3))?;

        let mut windows = Vec::with_capacity(window_count);
        for i in 0..window_count {
            let size: u64 = parse_arg(args.get(4 + 2 * i))?;
            let limit: u64 = parse_arg(args.get(5 + 2 * i))?;
            windows.push((size, limit));
        }

        let mut state = self.inner.state.lock().expect("window state poisoned");

        // Check every window before mutating any of them.
        for &(size, limit) in &windows {
            let key = (namespace.clone(), bucket.clone(), size);
            let events = state.events.entry(key).or_default();
            events.retain(|&ts| ts + size > now);
            let current = events.len() as u64;
            if current + 1 > limit {
                return Ok(decision(0, size, limit, current));
            }
        }

        let mut last = (0, 0, 0);
        for &(size, limit) in &windows {
            let key = (namespace.clone(), bucket.clone(), size);
            let events = state.events.entry(key).or_default();
            events.push(now);
            last = (size, limit, events.len() as u64);
        }
        let (size, limit, current) = last;
        Ok(decision(1, size, limit, current))
    }
}

#[async_trait]
impl ScriptRunner for InMemoryRunner {
    async fn eval_digest(
        &self,
        digest: &str,
        _keys: &[String],
        args: &[String],
    ) -> Result<Value, RunnerError> {
        if !self.inner.scripts.contains_key(digest) {
            return Err(RunnerError::UnknownScript);
        }
        self.decide(args)
    }

    async fn register(&self, body: &str) -> Result<String, RunnerError> {
        let digest = sha1_smol::Sha1::from(body).hexdigest();
        self.inner.scripts.insert(digest.clone(), body.to_string());
        Ok(digest)
    }

    fn address(&self) -> String {
        "memory".to_string()
    }
}

fn decision(allowed: i64, size: u64, limit: u64, current: u64) -> Value {
    Value::Bulk(vec![
        Value::Int(allowed),
        Value::Int(size as i64),
        Value::Int(limit as i64),
        Value::Int(current as i64),
    ])
}

fn bad_args() -> RunnerError {
    RunnerError::Transport(redis::RedisError::from((
        ErrorKind::TypeError,
        "malformed rate limit arguments",
    )))
}

fn parse_arg<T: std::str::FromStr>(arg: Option<&String>) -> Result<T, RunnerError> {
    arg.and_then(|a| a.parse().ok()).ok_or_else(bad_args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Script;

    fn args(namespace: &str, now: u64, windows: &[(u64, u64)]) -> Vec<String> {
        let mut args = vec![
            namespace.to_string(),
            "global".to_string(),
            now.to_string(),
            windows.len().to_string(),
        ];
        for (size, limit) in windows {
            args.push(size.to_string());
            args.push(limit.to_string());
        }
        args
    }

    async fn registered_runner() -> (InMemoryRunner, String) {
        let runner = InMemoryRunner::new();
        let script = Script::rate_limit(&crate::test_util::empty_config());
        let digest = runner.register(script.body()).await.unwrap();
        (runner, digest)
    }

    #[tokio::test]
    async fn unregistered_digest_is_unknown() {
        let runner = InMemoryRunner::new();
        let err = runner
            .eval_digest("feed", &[], &args("ns", 100, &[(1, 3)]))
            .await
            .unwrap_err();
        assert!(err.is_unknown_script());
    }

    #[tokio::test]
    async fn counts_within_window() {
        let (runner, digest) = registered_runner().await;
        for current in 1..=3 {
            let value = runner
                .eval_digest(&digest, &[], &args("ns", 100, &[(1, 3)]))
                .await
                .unwrap();
            assert_eq!(value, decision(1, 1, 3, current));
        }
        let value = runner
            .eval_digest(&digest, &[], &args("ns", 100, &[(1, 3)]))
            .await
            .unwrap();
        assert_eq!(value, decision(0, 1, 3, 3));
    }

    #[tokio::test]
    async fn rejection_does_not_mutate_any_window() {
        let (runner, digest) = registered_runner().await;
        let windows = [(1, 1), (60, 100)];
        runner
            .eval_digest(&digest, &[], &args("ns", 100, &windows))
            .await
            .unwrap();
        // Second request violates the 1s window; the 60s window must be
        // left untouched.
        let value = runner
            .eval_digest(&digest, &[], &args("ns", 100, &windows))
            .await
            .unwrap();
        assert_eq!(value, decision(0, 1, 1, 1));
        assert_eq!(runner.recorded("ns", "global", 60), 1);
        // Repeating at the same logical time sees the same count.
        let value = runner
            .eval_digest(&digest, &[], &args("ns", 100, &windows))
            .await
            .unwrap();
        assert_eq!(value, decision(0, 1, 1, 1));
    }

    #[tokio::test]
    async fn events_fall_out_of_the_window() {
        let (runner, digest) = registered_runner().await;
        for _ in 0..3 {
            runner
                .eval_digest(&digest, &[], &args("ns", 100, &[(1, 3)]))
                .await
                .unwrap();
        }
        // One second later the events have aged out of the 1s window.
        let value = runner
            .eval_digest(&digest, &[], &args("ns", 101, &[(1, 3)]))
            .await
            .unwrap();
        assert_eq!(value, decision(1, 1, 3, 1));
    }

    #[tokio::test]
    async fn first_violated_window_in_policy_order_is_reported() {
        let (runner, digest) = registered_runner().await;
        let windows = [(10, 1), (60, 1)];
        runner
            .eval_digest(&digest, &[], &args("ns", 100, &windows))
            .await
            .unwrap();
        // Both windows are violated; the first declared one is reported.
        let value = runner
            .eval_digest(&digest, &[], &args("ns", 100, &windows))
            .await
            .unwrap();
        assert_eq!(value, decision(0, 10, 1, 1));
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let (runner, digest) = registered_runner().await;
        runner
            .eval_digest(&digest, &[], &args("gmail", 100, &[(1, 1)]))
            .await
            .unwrap();
        let value = runner
            .eval_digest(&digest, &[], &args("openai", 100, &[(1, 1)]))
            .await
            .unwrap();
        assert_eq!(value, decision(1, 1, 1, 1));
    }

    #[tokio::test]
    async fn malformed_arguments_are_a_transport_error() {
        let (runner, digest) = registered_runner().await;
        let err = runner
            .eval_digest(&digest, &[], &["ns".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Transport(_)));
    }
}
