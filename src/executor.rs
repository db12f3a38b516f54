use crate::backend::{RunnerError, ScriptRunner};
use crate::script::Script;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Executes named scripts against the backend, caching each script's
/// registered digest.
///
/// The first execution of a script uses its content digest; when the backend
/// reports the digest unknown, the executor registers the script body, caches
/// the digest the backend handed back, and retries exactly once. Subsequent
/// executions reuse the cached digest without touching the registration
/// path again. A backend that loses its script store (a restart or flush)
/// simply looks like another unknown-digest repair.
///
/// Clones share the digest cache, so all limiters over one executor heal a
/// missing script at most once per loss.
pub struct ScriptExecutor<R: ScriptRunner> {
    runner: R,
    digests: Arc<Mutex<HashMap<&'static str, String>>>,
}

impl<R: ScriptRunner> Clone for ScriptExecutor<R> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
            digests: Arc::clone(&self.digests),
        }
    }
}

impl<R: ScriptRunner> ScriptExecutor<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            digests: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Execute `script`, transparently registering it with the backend when
    /// the backend does not know it.
    ///
    /// Only [RunnerError::UnknownScript] triggers the register-and-retry
    /// path; every other error is returned as-is. Retry policy beyond the
    /// single reload belongs to the caller.
    pub async fn execute(
        &self,
        script: &Script,
        keys: &[String],
        args: &[String],
    ) -> Result<redis::Value, RunnerError> {
        let cached = {
            let digests = self.digests.lock().await;
            digests.get(script.name()).cloned()
        };
        let (digest, was_cached) = match cached {
            Some(digest) => (digest, true),
            None => (script.digest().to_string(), false),
        };

        match self.runner.eval_digest(&digest, keys, args).await {
            Ok(value) => {
                if !was_cached {
                    let mut digests = self.digests.lock().await;
                    digests.entry(script.name()).or_insert(digest);
                }
                Ok(value)
            }
            Err(RunnerError::UnknownScript) => self.repair_and_retry(script, keys, args).await,
            Err(other) => Err(other),
        }
    }

    /// The reload path for an unknown digest. Holds the cache lock for the
    /// whole sequence so that concurrent callers discovering the same miss
    /// produce at most one registration.
    async fn repair_and_retry(
        &self,
        script: &Script,
        keys: &[String],
        args: &[String],
    ) -> Result<redis::Value, RunnerError> {
        let mut digests = self.digests.lock().await;

        // Another caller may have registered the script while we waited on
        // the lock, in which case its cached digest works now; only a second
        // unknown-digest failure sends us to the registration below.
        if let Some(repaired) = digests.get(script.name()) {
            match self.runner.eval_digest(repaired, keys, args).await {
                Ok(value) => return Ok(value),
                Err(RunnerError::UnknownScript) => {}
                Err(other) => return Err(other),
            }
        }

        let digest = self.runner.register(script.body()).await?;
        digests.insert(script.name(), digest.clone());
        self.runner.eval_digest(&digest, keys, args).await
    }
}
