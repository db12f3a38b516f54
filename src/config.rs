use std::collections::HashMap;

/// Requests per second assumed when no override is configured.
pub const DEFAULT_BASE_RPS: u64 = 10;

/// Global override for the base requests-per-second value, applied to every
/// namespace.
pub const BASE_RPS_VAR: &str = "REDIS_RATE_LIMIT_RPS";

/// Literal window specification, e.g. `"1:10,10:50,60:300"`. Takes precedence
/// over any requests-per-second derivation.
pub const WINDOW_CONFIG_VAR: &str = "REDIS_RATE_LIMIT_WINDOW_CONFIG";

const GMAIL_RPS_VAR: &str = "GMAIL_API_REQUESTS_PER_SECOND";
const OPENAI_RPS_VAR: &str = "OPENAI_API_REQUESTS_PER_SECOND";

/// A single sliding window: at most `limit` accepted requests within any
/// trailing `size_seconds` interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Window size in seconds.
    pub size_seconds: u64,
    /// Maximum requests allowed in this window.
    pub limit: u64,
}

/// Source of named configuration values.
///
/// The process environment is the production source; tests supply a
/// `HashMap` instead of mutating global state.
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// [ConfigSource] reading from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfig;

impl ConfigSource for EnvConfig {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Resolve the window policy for a namespace.
///
/// An explicit window specification wins if it yields at least one valid
/// window; otherwise three windows are synthesized from the base
/// requests-per-second value: `(1s, rps)`, `(10s, rps*5)`, `(60s, rps*30)`.
pub fn windows(namespace: &str, config: &dyn ConfigSource) -> Vec<Window> {
    if let Some(spec) = config.get(WINDOW_CONFIG_VAR) {
        let parsed = parse_window_spec(&spec);
        if !parsed.is_empty() {
            return parsed;
        }
    }

    let rps = base_rps(namespace, config);
    vec![
        Window {
            size_seconds: 1,
            limit: rps,
        },
        Window {
            size_seconds: 10,
            limit: rps * 5,
        },
        Window {
            size_seconds: 60,
            limit: rps * 30,
        },
    ]
}

/// Base requests-per-second for a namespace: the global override, then the
/// namespace-specific override, then [DEFAULT_BASE_RPS].
pub fn base_rps(namespace: &str, config: &dyn ConfigSource) -> u64 {
    if let Some(rps) = positive_u64(config.get(BASE_RPS_VAR)) {
        return rps;
    }

    let namespace_var = match namespace {
        crate::provider::GMAIL_NAMESPACE => Some(GMAIL_RPS_VAR),
        crate::provider::OPENAI_NAMESPACE => Some(OPENAI_RPS_VAR),
        _ => None,
    };
    if let Some(rps) = namespace_var.and_then(|var| positive_u64(config.get(var))) {
        return rps;
    }

    DEFAULT_BASE_RPS
}

/// Parse a `"size:limit,size:limit,..."` specification.
///
/// Malformed entries (wrong shape, non-numeric, or non-positive values) are
/// skipped rather than failing the whole specification.
pub fn parse_window_spec(spec: &str) -> Vec<Window> {
    spec.split(',')
        .filter_map(|entry| {
            let (size, limit) = entry.trim().split_once(':')?;
            let size = size.trim().parse::<u64>().ok()?;
            let limit = limit.trim().parse::<u64>().ok()?;
            if size == 0 || limit == 0 {
                return None;
            }
            Some(Window {
                size_seconds: size,
                limit,
            })
        })
        .collect()
}

fn positive_u64(value: Option<String>) -> Option<u64> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|&v| v > 0)
}
