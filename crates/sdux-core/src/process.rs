//! Managed process model.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::event::Termination;
use crate::launch::LaunchSpec;

/// Supervisor-assigned identifier of a managed process entry.
///
/// Stays the same across restarts; the OS pid of the current incarnation is
/// tracked separately in [`ManagedProcess::pid`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct ProcessId(pub u64);

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "proc-{}", self.0)
    }
}

/// Lifecycle status of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "state", content = "detail")]
pub enum ProcessStatus {
    /// Spawn requested, OS has not confirmed yet
    Spawning,
    /// OS process is alive
    Running,
    /// Exited normally (or on request) with the given code
    Exited(i32),
    /// Exited abnormally
    Crashed(Termination),
    /// Waiting for the backoff delay before the next start
    Restarting,
}

impl ProcessStatus {
    /// Whether the entry belongs to the live set (may own windows).
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Spawning | ProcessStatus::Running | ProcessStatus::Restarting
        )
    }

    /// Whether the entry is finished and will not be started again.
    pub fn is_terminal(&self) -> bool {
        !self.is_live()
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Spawning => write!(f, "spawning"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Exited(code) => write!(f, "exited({code})"),
            ProcessStatus::Crashed(termination) => write!(f, "crashed({termination})"),
            ProcessStatus::Restarting => write!(f, "restarting"),
        }
    }
}

/// A process the supervisor spawned and is responsible for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ManagedProcess {
    /// Managed entry identifier
    pub id: ProcessId,
    /// OS pid of the current incarnation, once the OS returned it
    pub pid: Option<u32>,
    /// Application identifier the spec was resolved from
    pub app_id: String,
    /// Launch spec this entry runs
    pub spec: Arc<LaunchSpec>,
    /// Argument overrides supplied with the launch request
    pub args: Vec<String>,
    /// Current status
    pub status: ProcessStatus,
    /// Number of automatic restarts performed so far
    pub restart_count: u32,
    /// When the current incarnation was started
    pub last_start: DateTime<Utc>,
}

impl ManagedProcess {
    /// Whether the entry currently has a live OS process.
    pub fn is_running(&self) -> bool {
        self.status == ProcessStatus::Running
    }

    /// Whether this entry waits for a window of `class`.
    pub fn expects_class(&self, class: &str) -> bool {
        self.spec
            .expected_window_class
            .as_deref()
            .is_some_and(|expected| expected.eq_ignore_ascii_case(class))
    }
}

/// Read-only view of the process table used to correlate windows.
///
/// Lookups are synchronous reads of already-published process state.
pub trait ProcessDirectory {
    /// Live entry whose current incarnation has OS pid `pid`.
    fn live_by_pid(&self, pid: u32) -> Option<ProcessId>;

    /// `Spawning`/`Running` entries whose expected window class matches
    /// `class`, oldest first.
    fn awaiting_class(&self, class: &str) -> Vec<ProcessId>;
}

impl ProcessDirectory for [ManagedProcess] {
    fn live_by_pid(&self, pid: u32) -> Option<ProcessId> {
        self.iter()
            .find(|p| p.status.is_live() && p.pid == Some(pid))
            .map(|p| p.id)
    }

    fn awaiting_class(&self, class: &str) -> Vec<ProcessId> {
        let mut ids: Vec<ProcessId> = self
            .iter()
            .filter(|p| {
                matches!(p.status, ProcessStatus::Spawning | ProcessStatus::Running)
                    && p.expects_class(class)
            })
            .map(|p| p.id)
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_live_set() {
        assert!(ProcessStatus::Spawning.is_live());
        assert!(ProcessStatus::Running.is_live());
        assert!(ProcessStatus::Restarting.is_live());
        assert!(ProcessStatus::Exited(0).is_terminal());
        assert!(ProcessStatus::Crashed(Termination::Signal(9)).is_terminal());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ProcessStatus::Exited(0).to_string(), "exited(0)");
        assert_eq!(
            ProcessStatus::Crashed(Termination::Code(3)).to_string(),
            "crashed(exit code 3)"
        );
        assert_eq!(
            ProcessStatus::Crashed(Termination::Signal(11)).to_string(),
            "crashed(signal 11)"
        );
    }

    #[test]
    fn test_process_id_display() {
        assert_eq!(ProcessId(7).to_string(), "proc-7");
    }

    fn process(id: u64, pid: Option<u32>, status: ProcessStatus) -> ManagedProcess {
        ManagedProcess {
            id: ProcessId(id),
            pid,
            app_id: "term".to_string(),
            spec: Arc::new(LaunchSpec::new("/usr/bin/xterm").with_window_class("XTerm")),
            args: Vec::new(),
            status,
            restart_count: 0,
            last_start: Utc::now(),
        }
    }

    #[test]
    fn test_directory_lookup_by_pid() {
        let table = vec![
            process(1, Some(100), ProcessStatus::Exited(0)),
            process(2, Some(100), ProcessStatus::Running),
        ];
        assert_eq!(table.as_slice().live_by_pid(100), Some(ProcessId(2)));
        assert_eq!(table.as_slice().live_by_pid(5), None);
    }

    #[test]
    fn test_directory_class_candidates_oldest_first() {
        let table = vec![
            process(4, None, ProcessStatus::Spawning),
            process(2, Some(20), ProcessStatus::Running),
            process(3, None, ProcessStatus::Restarting),
            process(1, Some(10), ProcessStatus::Crashed(Termination::Signal(9))),
        ];
        assert_eq!(
            table.as_slice().awaiting_class("xterm"),
            vec![ProcessId(2), ProcessId(4)]
        );
        assert!(table.as_slice().awaiting_class("firefox").is_empty());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ProcessStatus::Exited(2)).unwrap();
        assert_eq!(json, r#"{"state":"Exited","detail":2}"#);
        let json = serde_json::to_string(&ProcessStatus::Running).unwrap();
        assert_eq!(json, r#"{"state":"Running"}"#);
    }
}
