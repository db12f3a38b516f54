#![cfg_attr(docsrs, feature(doc_cfg))]

//! Rate limiting and retry for outbound calls to quota-limited APIs.
//!
//! The limiter enforces multiple sliding windows per namespace against a
//! shared Redis backend, so that independent processes observe the same
//! counters. [`RateLimiter::wait`](limiter::RateLimiter::wait) blocks until a
//! request is admitted or the caller cancels; [`retry()`] and [`retry_if()`]
//! wrap the actual API call with a bounded, predicate-controlled retry
//! schedule.

pub mod backend;
pub mod clock;
pub mod config;
pub mod limiter;
pub mod provider;
pub mod retry;
pub mod script;

mod executor;

pub use backend::{RunnerError, ScriptRunner};
pub use clock::{Clock, TokioClock};
pub use config::{ConfigSource, EnvConfig, Window};
pub use executor::ScriptExecutor;
pub use limiter::{Decision, Error, RateLimiter};
pub use provider::{Provider, GMAIL_NAMESPACE, OPENAI_NAMESPACE};
pub use retry::{retry, retry_if, RetryError, DEFAULT_BACKOFF};
pub use script::Script;

#[cfg(test)]
mod test_util;
