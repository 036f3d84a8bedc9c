//! Environment overrides for engine tuning.
//!
//! Every knob reads a `VJOB_*` variable and falls back to its compiled-in
//! default when the variable is unset or does not parse:
//!
//! ```ignore
//! use vjob_core::env::{env_get, env_get_millis};
//!
//! let limit: usize = env_get("VJOB_CONCURRENCY_LIMIT", 10);
//! let poll = env_get_millis("VJOB_DRAIN_POLL_MS", 10);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Parsed value of `key`, `None` when unset or malformed.
pub fn env_get_opt<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    raw.trim().parse().ok()
}

/// Parsed value of `key`, or `default`.
#[inline]
pub fn env_get<T: FromStr>(key: &str, default: T) -> T {
    env_get_opt(key).unwrap_or(default)
}

/// Flag variable: `1`, `true`, `yes` and `on` (any case) are true, any
/// other value is false. Unset yields `default`.
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => {
            let raw = raw.trim();
            ["1", "true", "yes", "on"].iter().any(|t| raw.eq_ignore_ascii_case(t))
        }
        Err(_) => default,
    }
}

/// Millisecond variable as a `Duration`.
pub fn env_get_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_get(key, default_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNSET: &str = "__VJOB_TEST_UNSET__";

    #[test]
    fn test_unset_uses_default() {
        assert_eq!(env_get::<usize>(UNSET, 42), 42);
        assert_eq!(env_get_opt::<usize>(UNSET), None);
        assert!(env_get_bool(UNSET, true));
        assert_eq!(env_get_millis(UNSET, 250), Duration::from_millis(250));
    }

    #[test]
    fn test_parsed_and_malformed() {
        std::env::set_var("__VJOB_TEST_LIMIT__", " 16 ");
        assert_eq!(env_get::<usize>("__VJOB_TEST_LIMIT__", 0), 16);
        std::env::set_var("__VJOB_TEST_LIMIT__", "sixteen");
        assert_eq!(env_get::<usize>("__VJOB_TEST_LIMIT__", 10), 10);
        std::env::remove_var("__VJOB_TEST_LIMIT__");
    }

    #[test]
    fn test_bool_spellings() {
        for (raw, expected) in [("On", true), ("1", true), ("no", false), ("", false)] {
            std::env::set_var("__VJOB_TEST_FLAG__", raw);
            assert_eq!(env_get_bool("__VJOB_TEST_FLAG__", !expected), expected, "{raw:?}");
        }
        std::env::remove_var("__VJOB_TEST_FLAG__");
    }
}
