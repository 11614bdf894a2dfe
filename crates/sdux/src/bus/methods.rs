//! Session bus method types.
//!
//! Parameter and result types for every method of the `org.sdux.Session1`
//! interface, plus the request/response frames that carry them.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use sdux_core::{Error, LaunchRequest, ProcessId, StateDelta};
use sdux_session::LaunchReceipt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known service name.
pub const SERVICE_NAME: &str = "org.sdux.Session1";

/// Interface version reported by `Introspect`.
pub const INTERFACE_VERSION: u32 = 1;

// =============================================================================
// Frames
// =============================================================================

/// One request line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusRequest {
    /// Caller-chosen correlation id, echoed in the response
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: Value,
}

/// One response line; exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusResponse {
    /// Correlation id of the request
    pub id: Option<Value>,
    /// Method result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Named failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BusError>,
}

impl BusResponse {
    /// Successful response.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Failed response.
    pub fn failure(id: Option<Value>, error: BusError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Failure reported to a bus caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BusError {
    /// Stable failure name (`UnknownApplication`, `AuthDenied`, `NoSuchProcess`, `Timeout`, ...)
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl From<&Error> for BusError {
    fn from(error: &Error) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Line pushed to a subscribed connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    /// Published state change
    pub delta: StateDelta,
}

// =============================================================================
// Methods
// =============================================================================

/// Methods of the session interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusMethod {
    /// Start an application
    Launch,
    /// Stop a managed process
    Terminate,
    /// Lock the screen
    Lock,
    /// Unlock with a credential
    Unlock,
    /// End the session
    Logout,
    /// Snapshot of the session
    QueryState,
    /// Re-read the launcher configuration
    ReloadRegistry,
    /// Stream state deltas
    Subscribe,
    /// Describe the interface
    Introspect,
}

impl BusMethod {
    /// Every method, in interface order.
    pub const ALL: [BusMethod; 9] = [
        BusMethod::Launch,
        BusMethod::Terminate,
        BusMethod::Lock,
        BusMethod::Unlock,
        BusMethod::Logout,
        BusMethod::QueryState,
        BusMethod::ReloadRegistry,
        BusMethod::Subscribe,
        BusMethod::Introspect,
    ];

    /// Wire name.
    pub fn name(self) -> &'static str {
        match self {
            BusMethod::Launch => "Launch",
            BusMethod::Terminate => "Terminate",
            BusMethod::Lock => "Lock",
            BusMethod::Unlock => "Unlock",
            BusMethod::Logout => "Logout",
            BusMethod::QueryState => "QueryState",
            BusMethod::ReloadRegistry => "ReloadRegistry",
            BusMethod::Subscribe => "Subscribe",
            BusMethod::Introspect => "Introspect",
        }
    }

    /// Look a method up by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// One-line description for introspection.
    pub fn description(self) -> &'static str {
        match self {
            BusMethod::Launch => "Launch an application by id; returns once the OS started it",
            BusMethod::Terminate => "Stop a managed process, gracefully or by force",
            BusMethod::Lock => "Lock the session",
            BusMethod::Unlock => "Unlock the session with a credential token",
            BusMethod::Logout => "End the session",
            BusMethod::QueryState => "Snapshot of the session, managed processes and windows",
            BusMethod::ReloadRegistry => "Reload launcher definitions from the configuration file",
            BusMethod::Subscribe => "Switch this connection to a stream of state deltas",
            BusMethod::Introspect => "Describe this interface",
        }
    }
}

impl std::fmt::Display for BusMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters for methods without any.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct NoParams {}

/// Generic acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AckResponse {
    /// Always true
    pub ok: bool,
}

impl AckResponse {
    /// Positive acknowledgement.
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

/// Parameters for `Launch`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LaunchParams {
    /// Application identifier (case-insensitive)
    pub app_id: String,

    /// Argument overrides; replace the configured arguments when non-empty
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides, merged over the configured environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl From<LaunchParams> for LaunchRequest {
    fn from(params: LaunchParams) -> Self {
        LaunchRequest {
            app_id: params.app_id,
            args: params.args,
            env: params.env,
        }
    }
}

/// Response for `Launch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LaunchResponse {
    /// Managed process id, stable across restarts
    pub process_id: ProcessId,
    /// OS pid of the started process
    pub pid: u32,
    /// Canonical application id
    pub app_id: String,
}

impl From<LaunchReceipt> for LaunchResponse {
    fn from(receipt: LaunchReceipt) -> Self {
        Self {
            process_id: receipt.process_id,
            pid: receipt.pid,
            app_id: receipt.app_id,
        }
    }
}

/// Parameters for `Terminate`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TerminateParams {
    /// Managed process id
    pub process_id: ProcessId,

    /// Send SIGTERM and escalate after the timeout (default), or SIGKILL now
    #[serde(default = "default_graceful")]
    pub graceful: bool,
}

fn default_graceful() -> bool {
    true
}

/// Parameters for `Unlock`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UnlockParams {
    /// Credential handed to the authentication helper
    pub credential_token: String,
}

/// Parameters for `Logout`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct LogoutParams {
    /// Kill every process instead of stopping them gracefully
    #[serde(default)]
    pub force: bool,
}

/// Response for `ReloadRegistry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReloadRegistryResponse {
    /// Number of application definitions now loaded
    pub applications: usize,
}
