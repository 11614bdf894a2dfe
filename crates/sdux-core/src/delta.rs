//! State deltas, notifications and snapshots published to subscribers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::process::{ManagedProcess, ProcessId};
use crate::session::{Session, SessionPhase};
use crate::window::{ManagedWindow, WindowHandle};

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    /// Informational
    Info,
    /// Something went wrong but the session carries on
    Warning,
    /// An application is permanently failed
    Critical,
}

/// A message for the shell's notification area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Notification {
    /// Sequence number
    pub id: u64,
    /// Severity
    pub level: NotificationLevel,
    /// Short title
    pub title: String,
    /// Body text
    pub body: String,
    /// Application the notification is about
    pub app_id: Option<String>,
    /// How long the shell should display it
    pub timeout_ms: u64,
}

impl Notification {
    /// Default display time for info and warning notifications.
    pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

    /// Build a notification; critical ones stay until dismissed (timeout 0).
    pub fn new(
        id: u64,
        level: NotificationLevel,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let timeout_ms = match level {
            NotificationLevel::Critical => 0,
            _ => Self::DEFAULT_TIMEOUT_MS,
        };
        Self {
            id,
            level,
            title: title.into(),
            body: body.into(),
            app_id: None,
            timeout_ms,
        }
    }

    /// Attach the application id.
    pub fn for_app(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }
}

/// A change to session state, published after the dispatcher applied it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "data")]
pub enum StateDelta {
    /// New managed process entry
    ProcessAdded(ManagedProcess),
    /// Status, pid or restart count changed
    ProcessChanged(ManagedProcess),
    /// Entry retired
    ProcessRemoved(ProcessId),
    /// New tracked window
    WindowAdded(ManagedWindow),
    /// Window mutated in place (including ownership changes)
    WindowChanged(ManagedWindow),
    /// Window destroyed
    WindowRemoved(WindowHandle),
    /// Session phase moved
    PhaseChanged {
        /// Previous phase
        from: SessionPhase,
        /// New phase
        to: SessionPhase,
    },
    /// User-facing notification
    Notification(Notification),
}

/// Point-in-time copy of the whole session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SessionSnapshot {
    /// Session record
    pub session: Session,
    /// Managed processes ordered by id
    pub processes: Vec<ManagedProcess>,
    /// Tracked windows ordered by handle
    pub windows: Vec<ManagedWindow>,
}

impl SessionSnapshot {
    /// Look up a process by id.
    pub fn process(&self, id: ProcessId) -> Option<&ManagedProcess> {
        self.processes.iter().find(|p| p.id == id)
    }

    /// Look up a window by handle.
    pub fn window(&self, handle: WindowHandle) -> Option<&ManagedWindow> {
        self.windows.iter().find(|w| w.handle == handle)
    }

    /// Windows owned by `id`.
    pub fn windows_of(&self, id: ProcessId) -> impl Iterator<Item = &ManagedWindow> {
        self.windows.iter().filter(move |w| w.owner == Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_timeouts() {
        let info = Notification::new(1, NotificationLevel::Info, "Restarting", "term");
        assert_eq!(info.timeout_ms, Notification::DEFAULT_TIMEOUT_MS);
        let critical = Notification::new(2, NotificationLevel::Critical, "Failed", "term")
            .for_app("term");
        assert_eq!(critical.timeout_ms, 0);
        assert_eq!(critical.app_id.as_deref(), Some("term"));
    }

    #[test]
    fn test_delta_serialization_tagged() {
        let delta = StateDelta::PhaseChanged {
            from: SessionPhase::Active,
            to: SessionPhase::Locked,
        };
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["kind"], "PhaseChanged");
        assert_eq!(json["data"]["to"], "Locked");

        let removed = serde_json::to_value(StateDelta::WindowRemoved(WindowHandle(9))).unwrap();
        assert_eq!(removed["data"], 9);
    }
}
