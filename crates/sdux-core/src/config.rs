//! Configuration types for the SDUX session runtime.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::launch::{BackoffSchedule, LaunchSpec, RestartPolicy};
use crate::{Error, Result};

/// Shell configuration loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ShellConfig {
    /// Session lifecycle settings
    pub session: SessionSettings,
    /// Process supervisor settings
    pub supervisor: SupervisorSettings,
    /// Session bus settings
    pub bus: BusSettings,
    /// Windowing connection settings
    pub windowing: WindowingSettings,
    /// Unlock authentication settings
    pub auth: AuthSettings,
    /// Logging settings
    pub logging: LoggingSettings,
    /// Application ids launched when the session starts
    pub autostart: Vec<String>,
    /// Launcher registry definitions, keyed by application id
    pub applications: BTreeMap<String, ApplicationConfig>,
}

impl ShellConfig {
    /// Default config file location (`$XDG_CONFIG_HOME/sdux/config.yaml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sdux").join("config.yaml"))
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_yaml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ShellConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.session.terminate_timeout_ms == 0 || self.session.shutdown_timeout_ms == 0 {
            return Err(Error::Config("session timeouts must be > 0".to_string()));
        }

        if self.session.queue_capacity == 0 {
            return Err(Error::Config(
                "session.queue_capacity must be > 0".to_string(),
            ));
        }

        if self.supervisor.spawn_workers == 0 {
            return Err(Error::Config(
                "supervisor.spawn_workers must be > 0".to_string(),
            ));
        }

        if self.bus.request_timeout_ms == 0 {
            return Err(Error::Config("bus.request_timeout_ms must be > 0".to_string()));
        }
        self.bus.retry.validate()?;

        if self.auth.timeout_ms == 0 {
            return Err(Error::Config("auth.timeout_ms must be > 0".to_string()));
        }

        for (id, app) in &self.applications {
            app.validate(id)?;
        }

        for id in &self.autostart {
            let known = self
                .applications
                .keys()
                .any(|app| app.eq_ignore_ascii_case(id));
            if !known {
                return Err(Error::Config(format!(
                    "autostart entry '{id}' is not a configured application"
                )));
            }
        }

        Ok(())
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Grace period between SIGTERM and SIGKILL for one process
    pub terminate_timeout_ms: u64,
    /// Upper bound for the whole logout teardown
    pub shutdown_timeout_ms: u64,
    /// Capacity of each dispatcher input queue
    pub queue_capacity: usize,
    /// Capacity of the subscriber broadcast channel
    pub subscriber_capacity: usize,
    /// How many finished process entries stay visible in snapshots
    pub retain_terminal: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            terminate_timeout_ms: 5_000,
            shutdown_timeout_ms: 15_000,
            queue_capacity: 256,
            subscriber_capacity: 1024,
            retain_terminal: 32,
        }
    }
}

/// Process supervisor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Concurrent spawn operations allowed
    pub spawn_workers: usize,
    /// Disable every automatic restart
    pub safe_mode: bool,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            spawn_workers: 4,
            safe_mode: false,
        }
    }
}

/// Session bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Socket path (default: `$XDG_RUNTIME_DIR/sdux/session-bus.sock`)
    pub socket_path: Option<PathBuf>,
    /// Per-request timeout
    pub request_timeout_ms: u64,
    /// Backoff between bind attempts while the bus is unavailable
    pub retry: BackoffSchedule,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            socket_path: None,
            request_timeout_ms: 10_000,
            retry: BackoffSchedule {
                initial_ms: 1_000,
                multiplier: 2.0,
                max_ms: 60_000,
            },
        }
    }
}

impl BusSettings {
    /// Resolve the socket path, falling back to the runtime directory.
    pub fn resolved_socket_path(&self) -> PathBuf {
        if let Some(path) = &self.socket_path {
            return path.clone();
        }
        dirs::runtime_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("sdux")
            .join("session-bus.sock")
    }
}

/// Windowing connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WindowingSettings {
    /// Display name override (default: `DISPLAY`)
    pub display: Option<String>,
}

/// Unlock authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Helper program that receives the credential token on stdin and exits 0 to grant
    pub helper: Option<PathBuf>,
    /// The helper is killed and the unlock denied after this long
    pub timeout_ms: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            helper: None,
            timeout_ms: 10_000,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log filter (trace, debug, info, warn, error, or an EnvFilter directive)
    pub level: String,
    /// Optional log file
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// One launcher registry definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Executable
    pub command: String,
    /// Default arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Window class used for correlation
    #[serde(default)]
    pub expected_window_class: Option<String>,
    /// Restart policy
    #[serde(default)]
    pub restart: RestartPolicy,
    /// Maximum automatic restarts
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Restart backoff
    #[serde(default)]
    pub backoff: BackoffSchedule,
}

fn default_max_restarts() -> u32 {
    3
}

impl ApplicationConfig {
    /// Validate one application definition.
    pub fn validate(&self, id: &str) -> Result<()> {
        if id.trim().is_empty() {
            return Err(Error::Config("application id cannot be empty".to_string()));
        }
        if self.command.trim().is_empty() {
            return Err(Error::Config(format!(
                "application '{id}' command cannot be empty"
            )));
        }
        self.backoff
            .validate()
            .map_err(|e| Error::Config(format!("application '{id}': {e}")))
    }

    /// Build the immutable launch spec.
    pub fn to_spec(&self) -> LaunchSpec {
        LaunchSpec {
            command: self.command.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
            working_dir: self.working_dir.clone(),
            expected_window_class: self.expected_window_class.clone(),
            restart: self.restart,
            max_restarts: self.max_restarts,
            backoff: self.backoff,
        }
    }
}
