//! Process supervisor state machine.
//!
//! The supervisor never touches the OS itself. Every operation updates the
//! process table and returns the [`SupervisorAction`]s the owner has to carry
//! out: spawn through a backend, send a signal, arm a timer, publish a delta.
//! Backend results and timer expiries come back in as [`ProcessEvent`]s.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sdux_core::{
    Error, LaunchRequest, LaunchSpec, ManagedProcess, NotificationLevel, ProcessDirectory,
    ProcessEvent, ProcessId, ProcessStatus, RestartPolicy, Result, ShellConfig, StateDelta,
    Termination,
};
use tracing::{debug, error, info, warn};

/// Exit code recorded when a restart attempt could not be spawned.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Signal used to stop a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopSignal {
    /// SIGTERM
    Terminate,
    /// SIGKILL
    Kill,
}

impl StopSignal {
    /// Raw signal number.
    pub fn as_raw(self) -> i32 {
        match self {
            StopSignal::Terminate => libc::SIGTERM,
            StopSignal::Kill => libc::SIGKILL,
        }
    }
}

/// Everything a backend needs to start one incarnation.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    /// Managed entry
    pub id: ProcessId,
    /// Application identifier
    pub app_id: String,
    /// Spec the entry was launched with
    pub spec: Arc<LaunchSpec>,
    /// Effective arguments
    pub args: Vec<String>,
    /// Effective environment overrides
    pub env: BTreeMap<String, String>,
}

/// Work the supervisor asks its owner to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorAction {
    /// Start a process
    Spawn(SpawnRequest),
    /// Signal a running incarnation
    Signal {
        /// Managed entry
        id: ProcessId,
        /// OS pid
        pid: u32,
        /// Signal to send
        signal: StopSignal,
    },
    /// Deliver [`ProcessEvent::RestartDue`] after `delay`
    ScheduleRestart {
        /// Managed entry
        id: ProcessId,
        /// Backoff delay
        delay: Duration,
    },
    /// Deliver [`ProcessEvent::EscalationDue`] after `delay`
    ScheduleEscalation {
        /// Managed entry
        id: ProcessId,
        /// Incarnation that received SIGTERM
        pid: u32,
        /// Grace period
        delay: Duration,
    },
    /// Publish a state delta
    Publish(StateDelta),
    /// Surface a notification to the user
    Notify {
        /// Severity
        level: NotificationLevel,
        /// Title
        title: String,
        /// Body
        body: String,
        /// Application concerned
        app_id: String,
    },
}

/// Supervisor tuning.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Disable every automatic restart
    pub safe_mode: bool,
    /// Grace period between SIGTERM and SIGKILL
    pub terminate_timeout: Duration,
    /// Finished entries kept visible
    pub retain_terminal: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            safe_mode: false,
            terminate_timeout: Duration::from_secs(5),
            retain_terminal: 32,
        }
    }
}

impl From<&ShellConfig> for SupervisorConfig {
    fn from(config: &ShellConfig) -> Self {
        Self {
            safe_mode: config.supervisor.safe_mode,
            terminate_timeout: Duration::from_millis(config.session.terminate_timeout_ms),
            retain_terminal: config.session.retain_terminal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopRequest {
    Graceful,
    Forced,
}

#[derive(Debug, Clone)]
struct Entry {
    process: ManagedProcess,
    env: BTreeMap<String, String>,
    stop: Option<StopRequest>,
    last_termination: Option<Termination>,
}

impl Entry {
    fn spawn_request(&self) -> SpawnRequest {
        SpawnRequest {
            id: self.process.id,
            app_id: self.process.app_id.clone(),
            spec: Arc::clone(&self.process.spec),
            args: self.process.args.clone(),
            env: self.env.clone(),
        }
    }
}

/// Owns the table of managed processes and applies restart policy.
#[derive(Debug)]
pub struct Supervisor {
    config: SupervisorConfig,
    entries: BTreeMap<ProcessId, Entry>,
    next_id: u64,
    terminal_order: VecDeque<ProcessId>,
}

impl Supervisor {
    /// Create a supervisor with an empty process table.
    pub fn new(config: SupervisorConfig) -> Self {
        if config.safe_mode {
            warn!("Safe mode: automatic restarts are disabled");
        }
        Self {
            config,
            entries: BTreeMap::new(),
            next_id: 1,
            terminal_order: VecDeque::new(),
        }
    }

    /// Whether automatic restarts are disabled.
    pub fn safe_mode(&self) -> bool {
        self.config.safe_mode
    }

    /// Register a new entry in `Spawning` and ask for it to be spawned.
    pub fn launch(
        &mut self,
        app_id: &str,
        spec: Arc<LaunchSpec>,
        request: &LaunchRequest,
    ) -> (ProcessId, Vec<SupervisorAction>) {
        let id = ProcessId(self.next_id);
        self.next_id += 1;

        let entry = Entry {
            env: request.effective_env(&spec),
            process: ManagedProcess {
                id,
                pid: None,
                app_id: app_id.to_string(),
                args: request.effective_args(&spec),
                spec,
                status: ProcessStatus::Spawning,
                restart_count: 0,
                last_start: Utc::now(),
            },
            stop: None,
            last_termination: None,
        };

        info!("Launching '{}' as {}", app_id, id);
        let actions = vec![
            SupervisorAction::Publish(StateDelta::ProcessAdded(entry.process.clone())),
            SupervisorAction::Spawn(entry.spawn_request()),
        ];
        self.entries.insert(id, entry);
        (id, actions)
    }

    /// Apply a backend result or timer expiry.
    pub fn handle_event(&mut self, event: ProcessEvent) -> Vec<SupervisorAction> {
        match event {
            ProcessEvent::Spawned { id, pid } => self.on_spawned(id, pid),
            ProcessEvent::SpawnFailed { id, reason } => self.on_spawn_failed(id, &reason),
            ProcessEvent::Exited {
                id,
                pid,
                termination,
            } => self.on_exited(id, pid, termination),
            ProcessEvent::RestartDue { id } => self.on_restart_due(id),
            ProcessEvent::EscalationDue { id, pid } => self.on_escalation_due(id, pid),
        }
    }

    /// Stop an entry.
    ///
    /// `graceful` sends SIGTERM and arms an escalation timer; otherwise SIGKILL
    /// is sent right away. Finished entries are left alone. An entry waiting
    /// to be restarted is finished without being started again.
    pub fn terminate(&mut self, id: ProcessId, graceful: bool) -> Result<Vec<SupervisorAction>> {
        let terminate_timeout = self.config.terminate_timeout;
        let entry = self.entries.get_mut(&id).ok_or(Error::NoSuchProcess(id))?;
        let requested = if graceful {
            StopRequest::Graceful
        } else {
            StopRequest::Forced
        };

        let mut actions = Vec::new();
        match entry.process.status {
            ProcessStatus::Exited(_) | ProcessStatus::Crashed(_) => {
                debug!("{} already finished, nothing to terminate", id);
            }
            ProcessStatus::Restarting => {
                let code = entry.last_termination.map_or(0, |t| t.exit_code());
                entry.stop = Some(requested);
                entry.process.status = ProcessStatus::Exited(code);
                info!("{} ({}) restart cancelled", id, entry.process.app_id);
                actions.push(SupervisorAction::Publish(StateDelta::ProcessChanged(
                    entry.process.clone(),
                )));
                self.retire(id, &mut actions);
            }
            ProcessStatus::Spawning => {
                // Signalled once the OS reports the pid.
                if entry.stop != Some(StopRequest::Forced) {
                    entry.stop = Some(requested);
                }
                debug!("{} stop deferred until spawn completes", id);
            }
            ProcessStatus::Running => {
                let Some(pid) = entry.process.pid else {
                    return Ok(actions);
                };
                match (entry.stop, requested) {
                    (Some(StopRequest::Forced), _)
                    | (Some(StopRequest::Graceful), StopRequest::Graceful) => {
                        debug!("{} already stopping", id);
                    }
                    (_, StopRequest::Forced) => {
                        entry.stop = Some(StopRequest::Forced);
                        info!("Killing {} (pid {})", id, pid);
                        actions.push(SupervisorAction::Signal {
                            id,
                            pid,
                            signal: StopSignal::Kill,
                        });
                    }
                    (None, StopRequest::Graceful) => {
                        entry.stop = Some(StopRequest::Graceful);
                        info!("Stopping {} (pid {})", id, pid);
                        actions.push(SupervisorAction::Signal {
                            id,
                            pid,
                            signal: StopSignal::Terminate,
                        });
                        actions.push(SupervisorAction::ScheduleEscalation {
                            id,
                            pid,
                            delay: terminate_timeout,
                        });
                    }
                }
            }
        }
        Ok(actions)
    }

    /// Stop every live entry (logout and fatal sweeps).
    pub fn stop_all(&mut self, force: bool) -> Vec<SupervisorAction> {
        let live: Vec<ProcessId> = self.live_ids();
        let mut actions = Vec::new();
        for id in live {
            if let Ok(more) = self.terminate(id, !force) {
                actions.extend(more);
            }
        }
        actions
    }

    /// Look up an entry.
    pub fn get(&self, id: ProcessId) -> Option<&ManagedProcess> {
        self.entries.get(&id).map(|entry| &entry.process)
    }

    /// All entries ordered by id.
    pub fn processes(&self) -> impl Iterator<Item = &ManagedProcess> {
        self.entries.values().map(|entry| &entry.process)
    }

    /// Copy of the process table.
    pub fn snapshot(&self) -> Vec<ManagedProcess> {
        self.processes().cloned().collect()
    }

    /// Ids of entries in the live set.
    pub fn live_ids(&self) -> Vec<ProcessId> {
        self.processes()
            .filter(|p| p.status.is_live())
            .map(|p| p.id)
            .collect()
    }

    /// Whether `id` is in the live set.
    pub fn is_live(&self, id: ProcessId) -> bool {
        self.get(id).is_some_and(|p| p.status.is_live())
    }

    /// Number of entries in the live set.
    pub fn live_count(&self) -> usize {
        self.processes().filter(|p| p.status.is_live()).count()
    }

    /// Number of entries with a live OS process.
    pub fn running_count(&self) -> usize {
        self.processes().filter(|p| p.is_running()).count()
    }

    /// Number of entries, finished ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn on_spawned(&mut self, id: ProcessId, pid: u32) -> Vec<SupervisorAction> {
        let terminate_timeout = self.config.terminate_timeout;
        let Some(entry) = self.entries.get_mut(&id) else {
            warn!("Spawn confirmation for unknown {} (pid {})", id, pid);
            return Vec::new();
        };
        if entry.process.status != ProcessStatus::Spawning {
            debug!(
                "Ignoring spawn confirmation for {} in state {}",
                id, entry.process.status
            );
            return Vec::new();
        }

        entry.process.pid = Some(pid);
        entry.process.status = ProcessStatus::Running;
        info!("{} ({}) running as pid {}", id, entry.process.app_id, pid);

        let mut actions = vec![SupervisorAction::Publish(StateDelta::ProcessChanged(
            entry.process.clone(),
        ))];
        match entry.stop {
            Some(StopRequest::Graceful) => {
                actions.push(SupervisorAction::Signal {
                    id,
                    pid,
                    signal: StopSignal::Terminate,
                });
                actions.push(SupervisorAction::ScheduleEscalation {
                    id,
                    pid,
                    delay: terminate_timeout,
                });
            }
            Some(StopRequest::Forced) => actions.push(SupervisorAction::Signal {
                id,
                pid,
                signal: StopSignal::Kill,
            }),
            None => {}
        }
        actions
    }

    fn on_spawn_failed(&mut self, id: ProcessId, reason: &str) -> Vec<SupervisorAction> {
        let Some(entry) = self.entries.get(&id) else {
            return Vec::new();
        };
        if entry.process.status != ProcessStatus::Spawning {
            return Vec::new();
        }

        if entry.process.restart_count > 0 {
            warn!(
                "Restart of {} ({}) failed to spawn: {}",
                id, entry.process.app_id, reason
            );
            return self.finish(id, Termination::Code(SPAWN_FAILURE_EXIT_CODE));
        }

        let app_id = entry.process.app_id.clone();
        self.entries.remove(&id);
        warn!("Failed to launch '{}': {}", app_id, reason);
        vec![
            SupervisorAction::Publish(StateDelta::ProcessRemoved(id)),
            SupervisorAction::Notify {
                level: NotificationLevel::Warning,
                title: format!("Could not start {app_id}"),
                body: reason.to_string(),
                app_id,
            },
        ]
    }

    fn on_exited(
        &mut self,
        id: ProcessId,
        pid: u32,
        termination: Termination,
    ) -> Vec<SupervisorAction> {
        let Some(entry) = self.entries.get(&id) else {
            debug!("Exit of unknown {} (pid {})", id, pid);
            return Vec::new();
        };
        if !entry.process.is_running() || entry.process.pid != Some(pid) {
            debug!("Ignoring stale exit of pid {} for {}", pid, id);
            return Vec::new();
        }
        self.finish(id, termination)
    }

    fn on_restart_due(&mut self, id: ProcessId) -> Vec<SupervisorAction> {
        let Some(entry) = self.entries.get_mut(&id) else {
            return Vec::new();
        };
        if entry.process.status != ProcessStatus::Restarting {
            debug!("Restart of {} no longer pending", id);
            return Vec::new();
        }

        entry.process.status = ProcessStatus::Spawning;
        entry.process.last_start = Utc::now();
        info!(
            "Restarting {} ({}), attempt {}",
            id, entry.process.app_id, entry.process.restart_count
        );
        vec![
            SupervisorAction::Publish(StateDelta::ProcessChanged(entry.process.clone())),
            SupervisorAction::Spawn(entry.spawn_request()),
        ]
    }

    fn on_escalation_due(&mut self, id: ProcessId, pid: u32) -> Vec<SupervisorAction> {
        match self.entries.get(&id) {
            Some(entry) if entry.process.is_running() && entry.process.pid == Some(pid) => {
                warn!("{} (pid {}) ignored SIGTERM, killing", id, pid);
                vec![SupervisorAction::Signal {
                    id,
                    pid,
                    signal: StopSignal::Kill,
                }]
            }
            _ => Vec::new(),
        }
    }

    /// Record the end of the current incarnation and apply restart policy.
    fn finish(&mut self, id: ProcessId, termination: Termination) -> Vec<SupervisorAction> {
        let safe_mode = self.config.safe_mode;
        let Some(entry) = self.entries.get_mut(&id) else {
            return Vec::new();
        };
        entry.last_termination = Some(termination);
        let mut actions = Vec::new();

        if entry.stop.is_some() {
            entry.process.status = ProcessStatus::Exited(termination.exit_code());
            info!("{} ({}) stopped ({})", id, entry.process.app_id, termination);
            actions.push(SupervisorAction::Publish(StateDelta::ProcessChanged(
                entry.process.clone(),
            )));
            self.retire(id, &mut actions);
            return actions;
        }

        let crashed = !termination.is_clean();
        let spec = Arc::clone(&entry.process.spec);
        let wants_restart = !safe_mode
            && match spec.restart {
                RestartPolicy::Never => false,
                RestartPolicy::OnCrash => crashed,
                RestartPolicy::Always => true,
            };

        if wants_restart && entry.process.restart_count < spec.max_restarts {
            entry.process.restart_count += 1;
            entry.process.status = ProcessStatus::Restarting;
            entry.process.pid = None;
            let attempt = entry.process.restart_count;
            let delay = spec.backoff.delay_for(attempt);
            warn!(
                "{} ({}) ended with {}; restart {}/{} in {:?}",
                id, entry.process.app_id, termination, attempt, spec.max_restarts, delay
            );
            actions.push(SupervisorAction::Publish(StateDelta::ProcessChanged(
                entry.process.clone(),
            )));
            actions.push(SupervisorAction::ScheduleRestart { id, delay });
            actions.push(SupervisorAction::Notify {
                level: NotificationLevel::Info,
                title: format!("Restarting {}", entry.process.app_id),
                body: format!(
                    "Ended with {termination}; attempt {attempt} of {}",
                    spec.max_restarts
                ),
                app_id: entry.process.app_id.clone(),
            });
            return actions;
        }

        // Reaching the restart cap is permanent failure, whatever the exit code.
        let exhausted = wants_restart;
        entry.process.status = if crashed || exhausted {
            ProcessStatus::Crashed(termination)
        } else {
            ProcessStatus::Exited(termination.exit_code())
        };
        info!("{} ({}) is {}", id, entry.process.app_id, entry.process.status);
        actions.push(SupervisorAction::Publish(StateDelta::ProcessChanged(
            entry.process.clone(),
        )));

        let app_id = entry.process.app_id.clone();
        if exhausted {
            error!(
                "{} ({}) ended after {} restarts, giving up",
                id, app_id, entry.process.restart_count
            );
            actions.push(SupervisorAction::Notify {
                level: NotificationLevel::Critical,
                title: format!("{app_id} failed"),
                body: format!(
                    "Ended {} times ({termination}); not restarting",
                    entry.process.restart_count + 1
                ),
                app_id,
            });
        } else if crashed {
            actions.push(SupervisorAction::Notify {
                level: NotificationLevel::Warning,
                title: format!("{app_id} quit unexpectedly"),
                body: termination.to_string(),
                app_id,
            });
        }

        self.retire(id, &mut actions);
        actions
    }

    /// Track a finished entry and prune the oldest beyond the retention limit.
    fn retire(&mut self, id: ProcessId, actions: &mut Vec<SupervisorAction>) {
        self.terminal_order.push_back(id);
        while self.terminal_order.len() > self.config.retain_terminal {
            let Some(oldest) = self.terminal_order.pop_front() else {
                break;
            };
            if self.entries.remove(&oldest).is_some() {
                debug!("Pruned finished entry {}", oldest);
                actions.push(SupervisorAction::Publish(StateDelta::ProcessRemoved(oldest)));
            }
        }
    }
}

impl ProcessDirectory for Supervisor {
    fn live_by_pid(&self, pid: u32) -> Option<ProcessId> {
        self.processes()
            .find(|p| p.status.is_live() && p.pid == Some(pid))
            .map(|p| p.id)
    }

    fn awaiting_class(&self, class: &str) -> Vec<ProcessId> {
        self.processes()
            .filter(|p| {
                matches!(p.status, ProcessStatus::Spawning | ProcessStatus::Running)
                    && p.expects_class(class)
            })
            .map(|p| p.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdux_core::BackoffSchedule;

    fn spec(policy: RestartPolicy, max_restarts: u32) -> Arc<LaunchSpec> {
        let mut spec = LaunchSpec::new("/usr/bin/xterm")
            .with_window_class("xterm")
            .with_restart(policy, max_restarts);
        spec.backoff = BackoffSchedule {
            initial_ms: 100,
            multiplier: 2.0,
            max_ms: 1_000,
        };
        Arc::new(spec)
    }

    fn launch_running(sup: &mut Supervisor, spec: Arc<LaunchSpec>, pid: u32) -> ProcessId {
        let (id, _) = sup.launch("term", spec, &LaunchRequest::new("term"));
        sup.handle_event(ProcessEvent::Spawned { id, pid });
        id
    }

    fn crash(sup: &mut Supervisor, id: ProcessId) -> Vec<SupervisorAction> {
        let pid = sup.get(id).and_then(|p| p.pid).unwrap();
        sup.handle_event(ProcessEvent::Exited {
            id,
            pid,
            termination: Termination::Signal(libc::SIGSEGV),
        })
    }

    fn has_spawn(actions: &[SupervisorAction]) -> bool {
        actions
            .iter()
            .any(|a| matches!(a, SupervisorAction::Spawn(_)))
    }

    fn notification_level(actions: &[SupervisorAction]) -> Option<NotificationLevel> {
        actions.iter().find_map(|a| match a {
            SupervisorAction::Notify { level, .. } => Some(*level),
            _ => None,
        })
    }

    #[test]
    fn test_launch_registers_spawning() {
        let mut sup = Supervisor::new(SupervisorConfig::default());
        let (id, actions) =
            sup.launch("term", spec(RestartPolicy::Never, 0), &LaunchRequest::new("term"));

        assert_eq!(sup.get(id).unwrap().status, ProcessStatus::Spawning);
        assert!(matches!(actions[0], SupervisorAction::Publish(StateDelta::ProcessAdded(_))));
        assert!(has_spawn(&actions));
    }

    #[test]
    fn test_spawned_becomes_running() {
        let mut sup = Supervisor::new(SupervisorConfig::default());
        let id = launch_running(&mut sup, spec(RestartPolicy::Never, 0), 4242);
        let process = sup.get(id).unwrap();
        assert_eq!(process.status, ProcessStatus::Running);
        assert_eq!(process.pid, Some(4242));
        assert_eq!(sup.running_count(), 1);
    }

    #[test]
    fn test_initial_spawn_failure_removes_entry() {
        let mut sup = Supervisor::new(SupervisorConfig::default());
        let (id, _) =
            sup.launch("term", spec(RestartPolicy::Always, 3), &LaunchRequest::new("term"));
        let actions = sup.handle_event(ProcessEvent::SpawnFailed {
            id,
            reason: "No such file or directory".into(),
        });

        assert!(sup.get(id).is_none());
        assert!(actions.contains(&SupervisorAction::Publish(StateDelta::ProcessRemoved(id))));
        assert_eq!(notification_level(&actions), Some(NotificationLevel::Warning));
    }

    #[test]
    fn test_clean_exit_with_never_policy() {
        let mut sup = Supervisor::new(SupervisorConfig::default());
        let id = launch_running(&mut sup, spec(RestartPolicy::Never, 0), 10);
        let actions = sup.handle_event(ProcessEvent::Exited {
            id,
            pid: 10,
            termination: Termination::Code(0),
        });
        assert_eq!(sup.get(id).unwrap().status, ProcessStatus::Exited(0));
        assert!(!has_spawn(&actions));
        assert_eq!(notification_level(&actions), None);
    }

    #[test]
    fn test_nonzero_exit_is_crash() {
        let mut sup = Supervisor::new(SupervisorConfig::default());
        let id = launch_running(&mut sup, spec(RestartPolicy::Never, 0), 10);
        sup.handle_event(ProcessEvent::Exited {
            id,
            pid: 10,
            termination: Termination::Code(1),
        });
        assert_eq!(
            sup.get(id).unwrap().status,
            ProcessStatus::Crashed(Termination::Code(1))
        );
    }

    #[test]
    fn test_on_crash_restarts_with_backoff() {
        let mut sup = Supervisor::new(SupervisorConfig::default());
        let id = launch_running(&mut sup, spec(RestartPolicy::OnCrash, 3), 10);

        let actions = crash(&mut sup, id);
        assert_eq!(sup.get(id).unwrap().status, ProcessStatus::Restarting);
        assert!(actions.contains(&SupervisorAction::ScheduleRestart {
            id,
            delay: Duration::from_millis(100),
        }));

        let actions = sup.handle_event(ProcessEvent::RestartDue { id });
        assert!(has_spawn(&actions));
        sup.handle_event(ProcessEvent::Spawned { id, pid: 11 });

        let actions = crash(&mut sup, id);
        assert!(actions.contains(&SupervisorAction::ScheduleRestart {
            id,
            delay: Duration::from_millis(200),
        }));
    }

    #[test]
    fn test_on_crash_does_not_restart_clean_exit() {
        let mut sup = Supervisor::new(SupervisorConfig::default());
        let id = launch_running(&mut sup, spec(RestartPolicy::OnCrash, 3), 10);
        sup.handle_event(ProcessEvent::Exited {
            id,
            pid: 10,
            termination: Termination::Code(0),
        });
        assert_eq!(sup.get(id).unwrap().status, ProcessStatus::Exited(0));
    }

    #[test]
    fn test_always_restarts_clean_exit() {
        let mut sup = Supervisor::new(SupervisorConfig::default());
        let id = launch_running(&mut sup, spec(RestartPolicy::Always, 1), 10);
        let actions = sup.handle_event(ProcessEvent::Exited {
            id,
            pid: 10,
            termination: Termination::Code(0),
        });
        assert_eq!(sup.get(id).unwrap().status, ProcessStatus::Restarting);
        assert_eq!(notification_level(&actions), Some(NotificationLevel::Info));
    }

    #[test]
    fn test_always_exhausted_by_clean_exits_is_failed() {
        let mut sup = Supervisor::new(SupervisorConfig::default());
        let id = launch_running(&mut sup, spec(RestartPolicy::Always, 1), 10);
        sup.handle_event(ProcessEvent::Exited {
            id,
            pid: 10,
            termination: Termination::Code(0),
        });
        sup.handle_event(ProcessEvent::RestartDue { id });
        sup.handle_event(ProcessEvent::Spawned { id, pid: 11 });

        let actions = sup.handle_event(ProcessEvent::Exited {
            id,
            pid: 11,
            termination: Termination::Code(0),
        });
        let process = sup.get(id).unwrap();
        assert_eq!(process.restart_count, 1);
        assert_eq!(process.status, ProcessStatus::Crashed(Termination::Code(0)));
        assert_eq!(notification_level(&actions), Some(NotificationLevel::Critical));
        assert!(!has_spawn(&actions));
        assert!(sup.handle_event(ProcessEvent::RestartDue { id }).is_empty());
    }

    #[test]
    fn test_four_crashes_three_restarts() {
        let mut sup = Supervisor::new(SupervisorConfig::default());
        let id = launch_running(&mut sup, spec(RestartPolicy::OnCrash, 3), 100);

        let mut spawns = 0;
        for n in 0..4u32 {
            let actions = crash(&mut sup, id);
            if n < 3 {
                let actions = sup.handle_event(ProcessEvent::RestartDue { id });
                assert!(has_spawn(&actions));
                spawns += 1;
                sup.handle_event(ProcessEvent::Spawned { id, pid: 101 + n });
            } else {
                assert_eq!(notification_level(&actions), Some(NotificationLevel::Critical));
                assert!(!actions
                    .iter()
                    .any(|a| matches!(a, SupervisorAction::ScheduleRestart { .. })));
            }
        }

        let process = sup.get(id).unwrap();
        assert_eq!(spawns, 3);
        assert_eq!(process.restart_count, 3);
        assert!(matches!(process.status, ProcessStatus::Crashed(_)));
        assert!(sup.handle_event(ProcessEvent::RestartDue { id }).is_empty());
    }

    #[test]
    fn test_safe_mode_disables_restart() {
        let mut sup = Supervisor::new(SupervisorConfig {
            safe_mode: true,
            ..SupervisorConfig::default()
        });
        let id = launch_running(&mut sup, spec(RestartPolicy::Always, 5), 10);
        let actions = crash(&mut sup, id);
        assert!(matches!(sup.get(id).unwrap().status, ProcessStatus::Crashed(_)));
        assert_eq!(notification_level(&actions), Some(NotificationLevel::Warning));
    }

    #[test]
    fn test_restart_spawn_failure_counts_as_crash() {
        let mut sup = Supervisor::new(SupervisorConfig::default());
        let id = launch_running(&mut sup, spec(RestartPolicy::OnCrash, 1), 10);
        crash(&mut sup, id);
        sup.handle_event(ProcessEvent::RestartDue { id });
        let actions = sup.handle_event(ProcessEvent::SpawnFailed {
            id,
            reason: "gone".into(),
        });
        assert_eq!(
            sup.get(id).unwrap().status,
            ProcessStatus::Crashed(Termination::Code(SPAWN_FAILURE_EXIT_CODE))
        );
        assert_eq!(notification_level(&actions), Some(NotificationLevel::Critical));
    }

    #[test]
    fn test_graceful_terminate_escalates() {
        let mut sup = Supervisor::new(SupervisorConfig::default());
        let id = launch_running(&mut sup, spec(RestartPolicy::Always, 3), 10);

        let actions = sup.terminate(id, true).unwrap();
        assert_eq!(
            actions,
            vec![
                SupervisorAction::Signal {
                    id,
                    pid: 10,
                    signal: StopSignal::Terminate
                },
                SupervisorAction::ScheduleEscalation {
                    id,
                    pid: 10,
                    delay: Duration::from_secs(5)
                },
            ]
        );

        // Second graceful request does not signal again.
        assert!(sup.terminate(id, true).unwrap().is_empty());

        let actions = sup.handle_event(ProcessEvent::EscalationDue { id, pid: 10 });
        assert_eq!(
            actions,
            vec![SupervisorAction::Signal {
                id,
                pid: 10,
                signal: StopSignal::Kill
            }]
        );
    }

    #[test]
    fn test_requested_stop_is_exited_and_not_restarted() {
        let mut sup = Supervisor::new(SupervisorConfig::default());
        let id = launch_running(&mut sup, spec(RestartPolicy::Always, 3), 10);
        sup.terminate(id, false).unwrap();
        let actions = sup.handle_event(ProcessEvent::Exited {
            id,
            pid: 10,
            termination: Termination::Signal(libc::SIGKILL),
        });
        assert_eq!(
            sup.get(id).unwrap().status,
            ProcessStatus::Exited(128 + libc::SIGKILL)
        );
        assert!(!has_spawn(&actions));
        assert!(sup
            .handle_event(ProcessEvent::EscalationDue { id, pid: 10 })
            .is_empty());
    }

    #[test]
    fn test_terminate_is_idempotent_when_finished() {
        let mut sup = Supervisor::new(SupervisorConfig::default());
        let id = launch_running(&mut sup, spec(RestartPolicy::Never, 0), 10);
        sup.handle_event(ProcessEvent::Exited {
            id,
            pid: 10,
            termination: Termination::Code(0),
        });
        assert!(sup.terminate(id, true).unwrap().is_empty());
        assert!(sup.terminate(id, false).unwrap().is_empty());
    }

    #[test]
    fn test_terminate_unknown() {
        let mut sup = Supervisor::new(SupervisorConfig::default());
        let err = sup.terminate(ProcessId(99), true).unwrap_err();
        assert!(matches!(err, Error::NoSuchProcess(ProcessId(99))));
    }

    #[test]
    fn test_terminate_restarting_cancels_restart() {
        let mut sup = Supervisor::new(SupervisorConfig::default());
        let id = launch_running(&mut sup, spec(RestartPolicy::OnCrash, 3), 10);
        crash(&mut sup, id);
        sup.terminate(id, true).unwrap();
        assert!(matches!(sup.get(id).unwrap().status, ProcessStatus::Exited(_)));
        assert!(sup.handle_event(ProcessEvent::RestartDue { id }).is_empty());
    }

    #[test]
    fn test_terminate_while_spawning_signals_on_spawn() {
        let mut sup = Supervisor::new(SupervisorConfig::default());
        let (id, _) =
            sup.launch("term", spec(RestartPolicy::Never, 0), &LaunchRequest::new("term"));
        assert!(sup.terminate(id, false).unwrap().is_empty());
        let actions = sup.handle_event(ProcessEvent::Spawned { id, pid: 77 });
        assert!(actions.contains(&SupervisorAction::Signal {
            id,
            pid: 77,
            signal: StopSignal::Kill
        }));
    }

    #[test]
    fn test_stale_exit_ignored() {
        let mut sup = Supervisor::new(SupervisorConfig::default());
        let id = launch_running(&mut sup, spec(RestartPolicy::Never, 0), 10);
        let actions = sup.handle_event(ProcessEvent::Exited {
            id,
            pid: 9,
            termination: Termination::Code(0),
        });
        assert!(actions.is_empty());
        assert!(sup.get(id).unwrap().is_running());
    }

    #[test]
    fn test_retention_prunes_oldest() {
        let mut sup = Supervisor::new(SupervisorConfig {
            retain_terminal: 2,
            ..SupervisorConfig::default()
        });
        let ids: Vec<ProcessId> = (0..3)
            .map(|n| launch_running(&mut sup, spec(RestartPolicy::Never, 0), 10 + n))
            .collect();

        let mut removed = Vec::new();
        for (n, id) in ids.iter().enumerate() {
            let actions = sup.handle_event(ProcessEvent::Exited {
                id: *id,
                pid: 10 + n as u32,
                termination: Termination::Code(0),
            });
            removed.extend(actions.into_iter().filter_map(|a| match a {
                SupervisorAction::Publish(StateDelta::ProcessRemoved(id)) => Some(id),
                _ => None,
            }));
        }
        assert_eq!(removed, vec![ids[0]]);
        assert_eq!(sup.len(), 2);
    }

    #[test]
    fn test_directory_for_correlation() {
        let mut sup = Supervisor::new(SupervisorConfig::default());
        let first = launch_running(&mut sup, spec(RestartPolicy::Never, 0), 10);
        let (second, _) =
            sup.launch("term", spec(RestartPolicy::Never, 0), &LaunchRequest::new("term"));

        assert_eq!(sup.live_by_pid(10), Some(first));
        assert_eq!(sup.awaiting_class("XTerm"), vec![first, second]);
    }

    #[test]
    fn test_stop_all_covers_live_entries() {
        let mut sup = Supervisor::new(SupervisorConfig::default());
        launch_running(&mut sup, spec(RestartPolicy::Never, 0), 10);
        launch_running(&mut sup, spec(RestartPolicy::Never, 0), 11);
        let actions = sup.stop_all(true);
        let kills = actions
            .iter()
            .filter(|a| matches!(a, SupervisorAction::Signal { signal: StopSignal::Kill, .. }))
            .count();
        assert_eq!(kills, 2);
        assert!(sup.stop_all(true).is_empty());
    }
}
