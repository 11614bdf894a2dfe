//! The session state aggregate.

use std::collections::BTreeSet;

use sdux_core::{
    Error, Notification, NotificationLevel, ProcessStatus, Result, Session, SessionPhase,
    SessionSnapshot, StateDelta, WindowEvent,
};
use sdux_supervisor::{LauncherRegistry, Supervisor};
use sdux_windows::WindowTracker;
use tracing::info;

/// Everything the dispatcher owns: session record, launcher registry,
/// process table and window set.
///
/// Only the dispatcher loop holds a `SessionState`; everyone else sees
/// [`SessionSnapshot`]s and [`StateDelta`]s.
#[derive(Debug)]
pub struct SessionState {
    session: Session,
    registry: LauncherRegistry,
    supervisor: Supervisor,
    windows: WindowTracker,
    notification_seq: u64,
}

impl SessionState {
    /// Assemble the aggregate for a session in `Starting`.
    pub fn new(session: Session, registry: LauncherRegistry, supervisor: Supervisor) -> Self {
        Self {
            session,
            registry,
            supervisor,
            windows: WindowTracker::new(),
            notification_seq: 0,
        }
    }

    /// Session record.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.session.phase
    }

    /// Launcher registry.
    pub fn registry(&self) -> &LauncherRegistry {
        &self.registry
    }

    /// Launcher registry, for reloads.
    pub fn registry_mut(&mut self) -> &mut LauncherRegistry {
        &mut self.registry
    }

    /// Process table.
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Process table, for the dispatcher.
    pub fn supervisor_mut(&mut self) -> &mut Supervisor {
        &mut self.supervisor
    }

    /// Window set.
    pub fn windows(&self) -> &WindowTracker {
        &self.windows
    }

    /// Move the session to `next`, returning the delta to publish.
    pub fn transition(&mut self, next: SessionPhase) -> Option<StateDelta> {
        let from = self.session.transition(next)?;
        info!("Session {} phase {} -> {}", self.session.id, from, next);
        Some(StateDelta::PhaseChanged { from, to: next })
    }

    /// Build the next notification.
    pub fn notification(
        &mut self,
        level: NotificationLevel,
        title: impl Into<String>,
        body: impl Into<String>,
        app_id: Option<&str>,
    ) -> Notification {
        self.notification_seq += 1;
        let notification = Notification::new(self.notification_seq, level, title, body);
        match app_id {
            Some(app_id) => notification.for_app(app_id),
            None => notification,
        }
    }

    /// Apply a windowing event, correlating against the current process table.
    pub fn apply_window_event(&mut self, event: WindowEvent) -> Vec<StateDelta> {
        self.windows.apply(event, &self.supervisor)
    }

    /// Window-side consequences of a published process delta.
    ///
    /// A process that reached a terminal status or was removed gives up its
    /// windows; a process that started running adopts unowned windows that
    /// reported its pid.
    pub fn follow_process_delta(&mut self, delta: &StateDelta) -> Vec<StateDelta> {
        match delta {
            StateDelta::ProcessChanged(process) if process.status.is_terminal() => {
                self.windows.disown(process.id)
            }
            StateDelta::ProcessChanged(process) if process.status == ProcessStatus::Running => {
                match process.pid {
                    Some(pid) => self.windows.adopt_pid(process.id, pid),
                    None => Vec::new(),
                }
            }
            StateDelta::ProcessRemoved(id) => self.windows.disown(*id),
            _ => Vec::new(),
        }
    }

    /// Point-in-time copy of the whole state.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session: self.session.clone(),
            processes: self.supervisor.snapshot(),
            windows: self.windows.snapshot(),
        }
    }

    /// Check the cross-component invariants.
    pub fn verify(&self) -> Result<()> {
        for window in self.windows.windows() {
            if let Some(owner) = window.owner {
                if !self.supervisor.is_live(owner) {
                    return Err(Error::InvariantViolation(format!(
                        "window {} owned by {} which is not live",
                        window.handle, owner
                    )));
                }
            }
        }

        let focused: Vec<_> = self.windows.windows().filter(|w| w.focused).collect();
        if focused.len() > 1 {
            return Err(Error::InvariantViolation(format!(
                "{} windows focused at once",
                focused.len()
            )));
        }
        if let Some(window) = focused.first() {
            if !window.is_mapped() {
                return Err(Error::InvariantViolation(format!(
                    "focused window {} is {:?}",
                    window.handle, window.visibility
                )));
            }
        }

        let mut pids = BTreeSet::new();
        for process in self.supervisor.processes() {
            if process.status == ProcessStatus::Running {
                if let Some(pid) = process.pid {
                    if !pids.insert(pid) {
                        return Err(Error::InvariantViolation(format!(
                            "pid {pid} is running for more than one entry"
                        )));
                    }
                }
            }
            if process.restart_count > process.spec.max_restarts {
                return Err(Error::InvariantViolation(format!(
                    "{} restarted {} times (max {})",
                    process.id, process.restart_count, process.spec.max_restarts
                )));
            }
        }
        Ok(())
    }
}
