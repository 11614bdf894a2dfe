//! Test support: a backend that records work instead of running processes.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use sdux_core::{ProcessEvent, ProcessId, Result, Termination};
use tokio::sync::mpsc;
use tracing::warn;

use crate::backend::ProcessBackend;
use crate::supervisor::{SpawnRequest, StopSignal};

#[derive(Default)]
struct Recorded {
    spawns: Vec<SpawnRequest>,
    signals: Vec<(u32, StopSignal)>,
    children: BTreeMap<u32, (ProcessId, mpsc::Sender<ProcessEvent>)>,
    failing: HashSet<String>,
    stubborn: HashSet<String>,
    app_of: BTreeMap<u32, String>,
    next_pid: u32,
}

/// In-memory [`ProcessBackend`].
///
/// Every spawn succeeds immediately with a fresh fake pid, unless the command
/// was marked with [`RecordingBackend::fail_command`]. Signalled children exit
/// right away with that signal, except SIGTERM sent to an app marked with
/// [`RecordingBackend::ignore_sigterm`].
#[derive(Clone, Default)]
pub struct RecordingBackend {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingBackend {
    /// Create a backend whose first pid is 1000.
    pub fn new() -> Self {
        let backend = Self::default();
        backend.lock().next_pid = 1000;
        backend
    }

    /// Make spawns of `command` fail.
    pub fn fail_command(&self, command: &str) {
        self.lock().failing.insert(command.to_string());
    }

    /// Make processes of `app_id` survive SIGTERM.
    pub fn ignore_sigterm(&self, app_id: &str) {
        self.lock().stubborn.insert(app_id.to_string());
    }

    /// Spawn requests seen so far.
    pub fn spawns(&self) -> Vec<SpawnRequest> {
        self.lock().spawns.clone()
    }

    /// Number of spawn requests for `app_id`.
    pub fn spawn_count(&self, app_id: &str) -> usize {
        self.lock()
            .spawns
            .iter()
            .filter(|s| s.app_id == app_id)
            .count()
    }

    /// Signals sent so far.
    pub fn signals(&self) -> Vec<(u32, StopSignal)> {
        self.lock().signals.clone()
    }

    /// Pids of children that have not exited.
    pub fn live_pids(&self) -> Vec<u32> {
        self.lock().children.keys().copied().collect()
    }

    /// Simulate the child `pid` ending on its own.
    pub fn exit(&self, pid: u32, termination: Termination) {
        let child = self.lock().children.remove(&pid);
        if let Some((id, events)) = child {
            send(
                &events,
                ProcessEvent::Exited {
                    id,
                    pid,
                    termination,
                },
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ProcessBackend for RecordingBackend {
    fn spawn(&self, request: SpawnRequest, events: mpsc::Sender<ProcessEvent>) {
        let mut recorded = self.lock();
        recorded.spawns.push(request.clone());

        if recorded.failing.contains(&request.spec.command) {
            send(
                &events,
                ProcessEvent::SpawnFailed {
                    id: request.id,
                    reason: "No such file or directory (os error 2)".to_string(),
                },
            );
            return;
        }

        let pid = recorded.next_pid;
        recorded.next_pid += 1;
        recorded.app_of.insert(pid, request.app_id.clone());
        recorded.children.insert(pid, (request.id, events.clone()));
        send(&events, ProcessEvent::Spawned { id: request.id, pid });
    }

    fn signal(&self, pid: u32, signal: StopSignal) -> Result<()> {
        let mut recorded = self.lock();
        recorded.signals.push((pid, signal));

        let stubborn = recorded
            .app_of
            .get(&pid)
            .is_some_and(|app| recorded.stubborn.contains(app));
        if signal == StopSignal::Terminate && stubborn {
            return Ok(());
        }

        if let Some((id, events)) = recorded.children.remove(&pid) {
            send(
                &events,
                ProcessEvent::Exited {
                    id,
                    pid,
                    termination: Termination::Signal(signal.as_raw()),
                },
            );
        }
        Ok(())
    }
}

fn send(events: &mpsc::Sender<ProcessEvent>, event: ProcessEvent) {
    if let Err(e) = events.try_send(event) {
        warn!("recording backend dropped event: {}", e);
    }
}
