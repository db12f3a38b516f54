use crate::config::ConfigSource;
use once_cell::sync::Lazy;

/// Name of the sliding-window decision script.
pub const RATE_LIMIT_SCRIPT_NAME: &str = "rate_limit";

/// The sliding-window decision, evaluated atomically by Redis.
///
/// ARGV: `namespace, bucket, now_unix, window_count, size1, limit1, ...`
/// (sizes/limits in policy order). No KEYS. Reply:
/// `[allowed(0|1), window_seconds, limit, current]`: on rejection the first
/// violated window in policy order with its pre-increment count and no
/// mutation anywhere; on acceptance the last evaluated window with its
/// post-increment count. An event recorded at time `t` counts against a
/// window of size `s` until `now` exceeds `t + s`.
///
/// Time is supplied by the caller rather than read inside the script, so
/// every replica of the script sees the clock the limiter was built with.
const RATE_LIMIT_SCRIPT_BODY: &str = r#"
local namespace = ARGV[1]
local bucket = ARGV[2]
local now = tonumber(ARGV[3])
local window_count = tonumber(ARGV[4])

local prefix = "ratelimit:" .. namespace .. ":" .. bucket .. ":"

-- First pass: prune and check every window without recording anything.
for i = 1, window_count do
    local size = tonumber(ARGV[3 + 2 * i])
    local limit = tonumber(ARGV[4 + 2 * i])
    local key = prefix .. size

    redis.call("ZREMRANGEBYSCORE", key, "-inf", now - size)
    local current = redis.call("ZCARD", key)

    if current + 1 > limit then
        return {0, size, limit, current}
    end
end

-- Second pass: every window passed, record the event in all of them.
local seq = redis.call("INCR", prefix .. "seq")
local member = now .. "-" .. seq

local size = 0
local limit = 0
local current = 0
local max_size = 0

for i = 1, window_count do
    size = tonumber(ARGV[3 + 2 * i])
    limit = tonumber(ARGV[4 + 2 * i])
    local key = prefix .. size

    redis.call("ZADD", key, now, member)
    redis.call("EXPIRE", key, size)
    current = redis.call("ZCARD", key)

    if size > max_size then
        max_size = size
    end
end

redis.call("EXPIRE", prefix .. "seq", max_size)

return {1, size, limit, current}
"#;

static RATE_LIMIT_SCRIPT_DIGEST: Lazy<String> =
    Lazy::new(|| sha1_smol::Sha1::from(RATE_LIMIT_SCRIPT_BODY).hexdigest());

/// A named backend script together with the digest used to invoke it.
#[derive(Debug, Clone)]
pub struct Script {
    name: &'static str,
    body: &'static str,
    digest: String,
}

impl Script {
    /// Create a script handle, computing the digest from the body.
    pub fn new(name: &'static str, body: &'static str) -> Self {
        Self {
            name,
            body,
            digest: sha1_smol::Sha1::from(body).hexdigest(),
        }
    }

    /// The sliding-window decision script.
    ///
    /// The digest defaults to the SHA-1 of the body; a `SCRIPT_SHA_<name>`
    /// configuration value overrides it, for deployments that pre-register a
    /// patched script under a known digest.
    pub fn rate_limit(config: &dyn ConfigSource) -> Self {
        let mut script = Self {
            name: RATE_LIMIT_SCRIPT_NAME,
            body: RATE_LIMIT_SCRIPT_BODY,
            digest: RATE_LIMIT_SCRIPT_DIGEST.clone(),
        };
        if let Some(digest) = config.get(&format!("SCRIPT_SHA_{}", script.name)) {
            let digest = digest.trim();
            if !digest.is_empty() {
                script.digest = digest.to_string();
            }
        }
        script
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn body(&self) -> &'static str {
        self.body
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn digest_is_sha1_of_body() {
        let script = Script::new("test", "return 1");
        // sha1("return 1")
        assert_eq!(script.digest(), "e0e1f9fabfc9d4800c877a703b823ac0578ff8db");
    }

    #[test]
    fn rate_limit_digest_matches_body() {
        let script = Script::rate_limit(&crate::test_util::empty_config());
        assert_eq!(script.name(), RATE_LIMIT_SCRIPT_NAME);
        assert_eq!(
            script.digest(),
            sha1_smol::Sha1::from(script.body()).hexdigest()
        );
    }

    #[test]
    fn config_overrides_digest() {
        let mut cfg = HashMap::new();
        cfg.insert(
            "SCRIPT_SHA_rate_limit".to_string(),
            "  abc123  ".to_string(),
        );
        let script = Script::rate_limit(&cfg);
        assert_eq!(script.digest(), "abc123");
    }

    #[test]
    fn blank_override_is_ignored() {
        let mut cfg = HashMap::new();
        cfg.insert("SCRIPT_SHA_rate_limit".to_string(), "   ".to_string());
        let script = Script::rate_limit(&cfg);
        assert_eq!(script.digest(), &*RATE_LIMIT_SCRIPT_DIGEST);
    }
}
