//! Launch specifications and restart policy.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// When the supervisor restarts an application after it exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Never restart
    #[default]
    Never,
    /// Restart only after a crash
    OnCrash,
    /// Restart after any exit the core did not request
    Always,
}

/// Exponential backoff between restart attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BackoffSchedule {
    /// Delay before the first restart
    pub initial_ms: u64,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Upper bound for any single delay
    pub max_ms: u64,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            multiplier: 2.0,
            max_ms: 30_000,
        }
    }
}

impl BackoffSchedule {
    /// Delay before restart attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let raw = self.initial_ms as f64 * self.multiplier.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.max_ms as f64)
        } else {
            self.max_ms as f64
        };
        Duration::from_millis(capped as u64)
    }

    /// Validate the schedule values.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(crate::Error::Config(format!(
                "backoff multiplier must be >= 1 (got {})",
                self.multiplier
            )));
        }
        if self.initial_ms > self.max_ms {
            return Err(crate::Error::Config(format!(
                "backoff initial_ms ({}) exceeds max_ms ({})",
                self.initial_ms, self.max_ms
            )));
        }
        Ok(())
    }
}

/// Immutable description of how to start an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LaunchSpec {
    /// Executable (absolute path or a name resolved through PATH)
    pub command: String,
    /// Default arguments
    pub args: Vec<String>,
    /// Environment overrides
    pub env: BTreeMap<String, String>,
    /// Working directory
    pub working_dir: Option<PathBuf>,
    /// Window class used to correlate new windows to this application
    pub expected_window_class: Option<String>,
    /// Restart policy
    pub restart: RestartPolicy,
    /// Maximum number of automatic restarts
    pub max_restarts: u32,
    /// Delay schedule between restarts
    pub backoff: BackoffSchedule,
}

impl LaunchSpec {
    /// Spec running `command` with defaults for everything else.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            expected_window_class: None,
            restart: RestartPolicy::Never,
            max_restarts: 0,
            backoff: BackoffSchedule::default(),
        }
    }

    /// Set the expected window class.
    pub fn with_window_class(mut self, class: impl Into<String>) -> Self {
        self.expected_window_class = Some(class.into());
        self
    }

    /// Set restart policy and maximum restart count.
    pub fn with_restart(mut self, policy: RestartPolicy, max_restarts: u32) -> Self {
        self.restart = policy;
        self.max_restarts = max_restarts;
        self
    }

    /// Set the default arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// A request to start an application.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct LaunchRequest {
    /// Application identifier
    pub app_id: String,
    /// Argument overrides; replace the spec's arguments when non-empty
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides, merged over the spec's
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl LaunchRequest {
    /// Request to launch `app_id` with no overrides.
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            ..Self::default()
        }
    }

    /// Replace the argument overrides.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Effective arguments when launching `spec`.
    pub fn effective_args(&self, spec: &LaunchSpec) -> Vec<String> {
        if self.args.is_empty() {
            spec.args.clone()
        } else {
            self.args.clone()
        }
    }

    /// Effective environment overrides when launching `spec`.
    pub fn effective_env(&self, spec: &LaunchSpec) -> BTreeMap<String, String> {
        let mut env = spec.env.clone();
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let schedule = BackoffSchedule {
            initial_ms: 100,
            multiplier: 2.0,
            max_ms: 1000,
        };
        assert_eq!(schedule.delay_for(1), Duration::from_millis(100));
        assert_eq!(schedule.delay_for(2), Duration::from_millis(200));
        assert_eq!(schedule.delay_for(4), Duration::from_millis(800));
        assert_eq!(schedule.delay_for(5), Duration::from_millis(1000));
        assert_eq!(schedule.delay_for(200), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_attempt_zero_is_initial() {
        let schedule = BackoffSchedule::default();
        assert_eq!(schedule.delay_for(0), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_validation() {
        assert!(BackoffSchedule::default().validate().is_ok());
        let bad = BackoffSchedule {
            multiplier: 0.5,
            ..BackoffSchedule::default()
        };
        assert!(bad.validate().is_err());
        let bad = BackoffSchedule {
            initial_ms: 10_000,
            max_ms: 10,
            ..BackoffSchedule::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_restart_policy_names() {
        let policy: RestartPolicy = serde_yaml::from_str("on-crash").unwrap();
        assert_eq!(policy, RestartPolicy::OnCrash);
        assert_eq!(serde_json::to_string(&RestartPolicy::Always).unwrap(), "\"always\"");
    }

    #[test]
    fn test_request_overrides() {
        let mut spec = LaunchSpec::new("/usr/bin/xterm").with_args(["-fa", "Mono"]);
        spec.env.insert("TERM".into(), "xterm".into());
        spec.env.insert("LANG".into(), "C".into());

        let plain = LaunchRequest::new("term");
        assert_eq!(plain.effective_args(&spec), vec!["-fa", "Mono"]);

        let mut request = LaunchRequest::new("term").with_args(["-e", "htop"]);
        request.env.insert("LANG".into(), "en_US.UTF-8".into());
        assert_eq!(request.effective_args(&spec), vec!["-e", "htop"]);

        let env = request.effective_env(&spec);
        assert_eq!(env.get("TERM").map(String::as_str), Some("xterm"));
        assert_eq!(env.get("LANG").map(String::as_str), Some("en_US.UTF-8"));
    }
}
