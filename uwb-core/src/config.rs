//! # config
//!
//! Adapter configuration: environment variables with hard-coded
//! fallbacks, no required config file. `persisted_toggle` and
//! `airplane_mode` are the two external inputs the adapter state machine
//! folds into `AdapterState`.

use std::env;

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Last user-set power toggle, as it would be read back from persisted
    /// settings at boot.
    pub persisted_toggle: bool,
    /// Airplane mode, read at boot; the adapter also needs this pushed to
    /// it live via `Adapter::set_airplane_mode`.
    pub airplane_mode: bool,
    /// Upper bound on concurrently open sessions, enforced by
    /// `SessionManager::open` (`Error::Resource` past this).
    pub max_concurrent_sessions: usize,
    /// Bound on the open/start/close-notify waits (spec §7 Timeout bucket).
    pub command_timeout_ms: u64,
}

impl AdapterConfig {
    pub fn from_env() -> Self {
        Self {
            persisted_toggle: env_bool("UWB_PERSISTED_TOGGLE", true),
            airplane_mode: env_bool("UWB_AIRPLANE_MODE", false),
            max_concurrent_sessions: env::var("UWB_MAX_SESSIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            command_timeout_ms: env::var("UWB_COMMAND_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2_000),
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            persisted_toggle: true,
            airplane_mode: false,
            max_concurrent_sessions: 5,
            command_timeout_ms: 2_000,
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_enabled_and_not_airplane() {
        let cfg = AdapterConfig::default();
        assert!(cfg.persisted_toggle);
        assert!(!cfg.airplane_mode);
        assert_eq!(cfg.max_concurrent_sessions, 5);
    }

    #[test]
    fn env_bool_parses_common_spellings() {
        std::env::set_var("UWB_TEST_BOOL_TRUE", "yes");
        std::env::set_var("UWB_TEST_BOOL_FALSE", "0");
        assert!(env_bool("UWB_TEST_BOOL_TRUE", false));
        assert!(!env_bool("UWB_TEST_BOOL_FALSE", true));
        std::env::remove_var("UWB_TEST_BOOL_TRUE");
        std::env::remove_var("UWB_TEST_BOOL_FALSE");
    }
}
