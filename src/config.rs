//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// What `start` does when the user already has a non-terminal run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPolicy {
    /// Fail with `AlreadyRunning` and leave the checkpoint untouched.
    #[default]
    Reject,
    /// Return the existing run's current result without mutating it.
    ResumeCurrent,
}

impl std::str::FromStr for StartPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "resume" | "resume_current" => Ok(Self::ResumeCurrent),
            other => Err(ConfigError::InvalidValue {
                key: "INBOX_START_POLICY".into(),
                message: format!("expected 'reject' or 'resume', got '{other}'"),
            }),
        }
    }
}

/// Workflow engine configuration.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Number of unread messages to fetch per run.
    pub fetch_limit: usize,
    /// Number of recent messages to pull from each unread message's thread.
    pub thread_depth: usize,
    /// Behaviour of `start` while a run is active.
    pub start_policy: StartPolicy,
    /// Age after which a parked approval is reported as stale.
    pub stale_after: Duration,
    /// Keep `Completed`/`Failed` checkpoints instead of clearing them.
    pub retain_finished: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            fetch_limit: 5,
            thread_depth: 4,
            start_policy: StartPolicy::Reject,
            stale_after: Duration::from_secs(3600), // 1 hour
            retain_finished: true,
        }
    }
}

impl WorkflowConfig {
    /// Load from `INBOX_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let start_policy = match std::env::var("INBOX_START_POLICY") {
            Ok(raw) => raw.parse::<StartPolicy>()?,
            Err(_) => defaults.start_policy,
        };

        let stale_after = env_parse::<u64>("INBOX_STALE_AFTER_MINUTES")?
            .map(|m| Duration::from_secs(m * 60))
            .unwrap_or(defaults.stale_after);

        Ok(Self {
            fetch_limit: env_parse("INBOX_FETCH_LIMIT")?.unwrap_or(defaults.fetch_limit),
            thread_depth: env_parse("INBOX_THREAD_DEPTH")?.unwrap_or(defaults.thread_depth),
            start_policy,
            stale_after,
            retain_finished: env_parse("INBOX_RETAIN_FINISHED")?
                .unwrap_or(defaults.retain_finished),
        })
    }
}

/// HTTP server and persistence configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// SQLite file for checkpoints; `None` selects the in-memory store.
    pub db_path: Option<PathBuf>,
    /// Directory for rolling log files, if file logging is enabled.
    pub log_dir: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = env_parse("INBOX_HTTP_PORT")?.unwrap_or(8080);

        let db_path = match std::env::var("INBOX_DB_PATH") {
            Ok(p) if p == ":memory:" => None,
            Ok(p) => Some(PathBuf::from(p)),
            Err(_) => Some(PathBuf::from("./data/inbox-assist.db")),
        };

        let log_dir = std::env::var("INBOX_LOG_DIR").ok().map(PathBuf::from);

        Ok(Self {
            port,
            db_path,
            log_dir,
        })
    }
}

/// Read a required environment variable.
pub fn require_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse an optional environment variable, rejecting malformed values.
fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_inbox_behaviour() {
        let config = WorkflowConfig::default();
        assert_eq!(config.fetch_limit, 5);
        assert_eq!(config.thread_depth, 4);
        assert_eq!(config.start_policy, StartPolicy::Reject);
        assert!(config.retain_finished);
    }

    #[test]
    fn start_policy_parses() {
        assert_eq!("reject".parse::<StartPolicy>().unwrap(), StartPolicy::Reject);
        assert_eq!(
            "Resume".parse::<StartPolicy>().unwrap(),
            StartPolicy::ResumeCurrent
        );
        assert!("sometimes".parse::<StartPolicy>().is_err());
    }

    #[test]
    fn env_parse_reads_and_rejects_values() {
        // SAFETY: keys are unique to this test.
        unsafe {
            std::env::set_var("INBOX_TEST_ENV_PARSE_OK", " 42 ");
            std::env::set_var("INBOX_TEST_ENV_PARSE_BAD", "many");
        }
        assert_eq!(env_parse::<u16>("INBOX_TEST_ENV_PARSE_OK").unwrap(), Some(42));
        assert_eq!(env_parse::<usize>("INBOX_TEST_ENV_PARSE_UNSET").unwrap(), None);
        assert!(matches!(
            env_parse::<usize>("INBOX_TEST_ENV_PARSE_BAD"),
            Err(ConfigError::InvalidValue { key, .. }) if key == "INBOX_TEST_ENV_PARSE_BAD"
        ));
    }

    #[test]
    fn require_env_reports_missing_key() {
        let err = require_env("INBOX_TEST_DEFINITELY_UNSET_KEY").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(k) if k == "INBOX_TEST_DEFINITELY_UNSET_KEY"));
    }
}
