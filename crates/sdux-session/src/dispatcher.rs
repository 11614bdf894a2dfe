//! The event dispatcher loop.
//!
//! One task owns the [`SessionState`] and consumes three bounded queues:
//! process events (backend results and timer expiries), window events from
//! the windowing source, and commands from [`SessionHandle`]s. Every mutation
//! happens here, one event at a time, and the resulting [`StateDelta`]s are
//! broadcast to subscribers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sdux_core::{
    ApplicationConfig, Error, LaunchRequest, NotificationLevel, ProcessEvent, ProcessId, Result,
    SessionPhase, SessionSnapshot, ShellConfig, StateDelta, WindowHandle,
};
use sdux_supervisor::registry::normalize;
use sdux_supervisor::{ProcessBackend, SupervisorAction};
use sdux_windows::WindowSourceEvent;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::handle::SessionHandle;
use crate::state::SessionState;

/// Requests handled by the dispatcher, each carrying its reply channel.
#[derive(Debug)]
pub enum Command {
    /// Start an application; answered once the OS confirmed or refused the spawn
    Launch {
        /// What to launch
        request: LaunchRequest,
        /// Reply
        reply: oneshot::Sender<Result<LaunchReceipt>>,
    },
    /// Stop a managed process
    Terminate {
        /// Managed entry
        id: ProcessId,
        /// SIGTERM with escalation instead of SIGKILL
        graceful: bool,
        /// Reply
        reply: oneshot::Sender<Result<()>>,
    },
    /// Lock the screen
    Lock {
        /// Reply
        reply: oneshot::Sender<Result<()>>,
    },
    /// Unlock; the credential has already been accepted
    Unlock {
        /// Reply
        reply: oneshot::Sender<Result<()>>,
    },
    /// End the session
    Logout {
        /// SIGKILL everything instead of a graceful stop
        force: bool,
        /// Reply
        reply: oneshot::Sender<Result<()>>,
    },
    /// Snapshot of the whole state
    Query {
        /// Reply
        reply: oneshot::Sender<SessionSnapshot>,
    },
    /// Replace the launcher registry
    ReloadRegistry {
        /// New definitions
        applications: BTreeMap<String, ApplicationConfig>,
        /// Reply with the number of definitions loaded
        reply: oneshot::Sender<Result<usize>>,
    },
    /// Window switcher order
    CycleOrder {
        /// Reply
        reply: oneshot::Sender<Vec<WindowHandle>>,
    },
    /// Publish a notification raised outside the dispatcher
    Notify {
        /// Severity
        level: NotificationLevel,
        /// Title
        title: String,
        /// Body
        body: String,
    },
}

/// Answer to a successful launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchReceipt {
    /// Managed entry
    pub process_id: ProcessId,
    /// OS pid of the first incarnation
    pub pid: u32,
    /// Canonical application id
    pub app_id: String,
}

/// How the session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Logout completed
    LoggedOut,
    /// A fatal error tore the session down
    Fatal(String),
}

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Capacity of each inbound queue
    pub queue_capacity: usize,
    /// Deltas buffered per subscriber before the oldest are dropped
    pub subscriber_capacity: usize,
    /// Hard bound on logout
    pub shutdown_timeout: Duration,
    /// Applications launched at startup
    pub autostart: Vec<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            subscriber_capacity: 1024,
            shutdown_timeout: Duration::from_secs(15),
            autostart: Vec::new(),
        }
    }
}

impl From<&ShellConfig> for DispatcherConfig {
    fn from(config: &ShellConfig) -> Self {
        Self {
            queue_capacity: config.session.queue_capacity,
            subscriber_capacity: config.session.subscriber_capacity,
            shutdown_timeout: Duration::from_millis(config.session.shutdown_timeout_ms),
            autostart: config.autostart.clone(),
        }
    }
}

/// Single owner of the session state.
pub struct Dispatcher {
    state: SessionState,
    backend: Arc<dyn ProcessBackend>,
    config: DispatcherConfig,
    process_tx: mpsc::Sender<ProcessEvent>,
    process_rx: mpsc::Receiver<ProcessEvent>,
    window_rx: mpsc::Receiver<WindowSourceEvent>,
    command_rx: mpsc::Receiver<Command>,
    deltas: broadcast::Sender<StateDelta>,
    pending_launches: BTreeMap<ProcessId, oneshot::Sender<Result<LaunchReceipt>>>,
    outcome: Option<SessionOutcome>,
    deadline: Option<Instant>,
    deadline_passed: bool,
    window_closed: bool,
    commands_closed: bool,
}

impl Dispatcher {
    /// Build a dispatcher around `state`.
    ///
    /// Returns the dispatcher, a handle for commands and subscriptions, and
    /// the sender the windowing source feeds. Dropping every clone of the
    /// window sender counts as losing the windowing connection.
    pub fn new(
        state: SessionState,
        backend: Arc<dyn ProcessBackend>,
        config: DispatcherConfig,
    ) -> (Self, SessionHandle, mpsc::Sender<WindowSourceEvent>) {
        let capacity = config.queue_capacity.max(1);
        let (process_tx, process_rx) = mpsc::channel(capacity);
        let (window_tx, window_rx) = mpsc::channel(capacity);
        let (command_tx, command_rx) = mpsc::channel(capacity);
        let (deltas, _) = broadcast::channel(config.subscriber_capacity.max(1));

        let handle = SessionHandle::new(command_tx, deltas.clone());
        let dispatcher = Self {
            state,
            backend,
            config,
            process_tx,
            process_rx,
            window_rx,
            command_rx,
            deltas,
            pending_launches: BTreeMap::new(),
            outcome: None,
            deadline: None,
            deadline_passed: false,
            window_closed: false,
            commands_closed: false,
        };
        (dispatcher, handle, window_tx)
    }

    /// Run the session until logout or a fatal error.
    pub async fn run(mut self) -> SessionOutcome {
        self.startup();

        loop {
            let deadline = self.deadline;
            tokio::select! {
                biased;

                event = self.process_rx.recv() => {
                    if let Some(event) = event {
                        self.on_process_event(event);
                    }
                }
                source = self.window_rx.recv(), if !self.window_closed => {
                    self.on_window_source(source);
                }
                command = self.command_rx.recv(), if !self.commands_closed => match command {
                    Some(command) => self.on_command(command),
                    None => {
                        debug!("All session handles dropped");
                        self.commands_closed = true;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() && !self.deadline_passed => {
                    self.on_deadline();
                }
            }

            if !matches!(self.outcome, Some(SessionOutcome::Fatal(_))) {
                if let Err(e) = self.state.verify() {
                    error!("{}", e);
                    self.begin_teardown(SessionOutcome::Fatal(e.to_string()), true);
                }
            }

            if self.state.phase().is_ending()
                && (self.deadline_passed || self.state.supervisor().live_count() == 0)
            {
                return self.end();
            }
        }
    }

    fn startup(&mut self) {
        info!(
            "Session {} starting ({} applications registered)",
            self.state.session().id,
            self.state.registry().len()
        );

        for app_id in self.config.autostart.clone() {
            match self.begin_launch(LaunchRequest::new(app_id.as_str())) {
                Ok(id) => debug!("Autostart '{}' as {}", app_id, id),
                Err(e) => {
                    warn!("Autostart of '{}' failed: {}", app_id, e);
                    self.notify(
                        NotificationLevel::Warning,
                        format!("Could not start {app_id}"),
                        e.to_string(),
                        Some(&app_id),
                    );
                }
            }
        }

        if let Some(delta) = self.state.transition(SessionPhase::Active) {
            self.publish(delta);
        }
    }

    fn on_process_event(&mut self, event: ProcessEvent) {
        let id = event.process_id();
        let app_id = self
            .state
            .supervisor()
            .get(id)
            .map(|p| p.app_id.clone())
            .unwrap_or_default();
        let reply = match &event {
            ProcessEvent::Spawned { pid, .. } => Some(Ok(LaunchReceipt {
                process_id: id,
                pid: *pid,
                app_id: app_id.clone(),
            })),
            ProcessEvent::SpawnFailed { reason, .. } => Some(Err(Error::SpawnError {
                app_id: app_id.clone(),
                reason: reason.clone(),
            })),
            _ => None,
        };

        let actions = self.state.supervisor_mut().handle_event(event);
        self.execute(actions);

        if let Some(result) = reply {
            if let Some(waiter) = self.pending_launches.remove(&id) {
                let _ = waiter.send(result);
            }
        }
    }

    fn on_window_source(&mut self, source: Option<WindowSourceEvent>) {
        match source {
            Some(WindowSourceEvent::Event(event)) => {
                let deltas = self.state.apply_window_event(event);
                self.publish_all(deltas);
            }
            Some(WindowSourceEvent::ConnectionLost(reason)) => self.on_windowing_lost(reason),
            None => self.on_windowing_lost("window event queue closed".to_string()),
        }
    }

    fn on_windowing_lost(&mut self, reason: String) {
        self.window_closed = true;
        let err = Error::WindowingConnectionLost(reason);
        error!("{}; ending session", err);
        self.begin_teardown(SessionOutcome::Fatal(err.to_string()), true);
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Launch { request, reply } => match self.begin_launch(request) {
                // Answered when the spawn result comes back.
                Ok(id) => {
                    self.pending_launches.insert(id, reply);
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Terminate {
                id,
                graceful,
                reply,
            } => {
                let result = self.state.supervisor_mut().terminate(id, graceful);
                let _ = reply.send(result.map(|actions| self.execute(actions)));
            }
            Command::Lock { reply } => {
                let _ = reply.send(self.lock());
            }
            Command::Unlock { reply } => {
                let _ = reply.send(self.unlock());
            }
            Command::Logout { force, reply } => {
                if self.state.phase().is_ending() {
                    debug!("Logout already in progress");
                } else {
                    info!("Logout requested (force: {})", force);
                    self.begin_teardown(SessionOutcome::LoggedOut, force);
                }
                let _ = reply.send(Ok(()));
            }
            Command::Query { reply } => {
                let _ = reply.send(self.state.snapshot());
            }
            Command::ReloadRegistry {
                applications,
                reply,
            } => {
                let _ = reply.send(self.reload_registry(&applications));
            }
            Command::CycleOrder { reply } => {
                let _ = reply.send(self.state.windows().cycle_order());
            }
            Command::Notify { level, title, body } => self.notify(level, title, body, None),
        }
    }

    /// Resolve and register a launch; the spawn itself runs on the backend.
    fn begin_launch(&mut self, request: LaunchRequest) -> Result<ProcessId> {
        let phase = self.state.phase();
        if phase.is_ending() {
            return Err(Error::InvalidPhase {
                phase,
                operation: "launch",
            });
        }
        let spec = self.state.registry().resolve(&request.app_id)?;
        let app_id = normalize(&request.app_id);
        let (id, actions) = self.state.supervisor_mut().launch(&app_id, spec, &request);
        self.execute(actions);
        Ok(id)
    }

    fn lock(&mut self) -> Result<()> {
        match self.state.phase() {
            SessionPhase::Locked => Ok(()),
            SessionPhase::Active => {
                if let Some(delta) = self.state.transition(SessionPhase::Locked) {
                    self.publish(delta);
                }
                Ok(())
            }
            phase => Err(Error::InvalidPhase {
                phase,
                operation: "lock",
            }),
        }
    }

    fn unlock(&mut self) -> Result<()> {
        match self.state.phase() {
            SessionPhase::Locked => {
                if let Some(delta) = self.state.transition(SessionPhase::Active) {
                    self.publish(delta);
                }
                Ok(())
            }
            phase => Err(Error::InvalidPhase {
                phase,
                operation: "unlock",
            }),
        }
    }

    fn reload_registry(
        &mut self,
        applications: &BTreeMap<String, ApplicationConfig>,
    ) -> Result<usize> {
        for (id, app) in applications {
            app.validate(id)?;
        }
        Ok(self.state.registry_mut().reload(applications))
    }

    /// Move to `EndingRequested` and stop every live process.
    ///
    /// A fatal outcome replaces a pending logout and always forces the sweep.
    fn begin_teardown(&mut self, outcome: SessionOutcome, force: bool) {
        let fatal = matches!(outcome, SessionOutcome::Fatal(_));
        if self.outcome.is_none() || fatal {
            self.outcome = Some(outcome);
        }
        if let Some(delta) = self.state.transition(SessionPhase::EndingRequested) {
            self.publish(delta);
        } else if !fatal {
            return;
        }

        let actions = self.state.supervisor_mut().stop_all(force);
        self.execute(actions);
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.config.shutdown_timeout);
        }
    }

    fn on_deadline(&mut self) {
        self.deadline_passed = true;
        let remaining = self.state.supervisor().live_count();
        if remaining > 0 {
            warn!(
                "Shutdown deadline reached with {} processes left, killing",
                remaining
            );
            let actions = self.state.supervisor_mut().stop_all(true);
            self.execute(actions);
        }
    }

    fn end(mut self) -> SessionOutcome {
        if let Some(delta) = self.state.transition(SessionPhase::Ended) {
            self.publish(delta);
        }
        for (_, waiter) in std::mem::take(&mut self.pending_launches) {
            let _ = waiter.send(Err(Error::SessionClosed));
        }
        let outcome = self.outcome.take().unwrap_or(SessionOutcome::LoggedOut);
        info!("Session {} ended: {:?}", self.state.session().id, outcome);
        outcome
    }

    fn execute(&mut self, actions: Vec<SupervisorAction>) {
        for action in actions {
            match action {
                SupervisorAction::Spawn(request) => {
                    self.backend.spawn(request, self.process_tx.clone());
                }
                SupervisorAction::Signal { id, pid, signal } => {
                    if let Err(e) = self.backend.signal(pid, signal) {
                        warn!("Failed to signal {} (pid {}): {}", id, pid, e);
                    }
                }
                SupervisorAction::ScheduleRestart { id, delay } => {
                    self.schedule(delay, ProcessEvent::RestartDue { id });
                }
                SupervisorAction::ScheduleEscalation { id, pid, delay } => {
                    self.schedule(delay, ProcessEvent::EscalationDue { id, pid });
                }
                SupervisorAction::Publish(delta) => {
                    let follow = self.state.follow_process_delta(&delta);
                    self.publish(delta);
                    self.publish_all(follow);
                }
                SupervisorAction::Notify {
                    level,
                    title,
                    body,
                    app_id,
                } => self.notify(level, title, body, Some(&app_id)),
            }
        }
    }

    /// Feed `event` back into the process queue after `delay`.
    fn schedule(&self, delay: Duration, event: ProcessEvent) {
        let queue = self.process_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = queue.send(event).await;
        });
    }

    fn notify(
        &mut self,
        level: NotificationLevel,
        title: String,
        body: String,
        app_id: Option<&str>,
    ) {
        let notification = self.state.notification(level, title, body, app_id);
        self.publish(StateDelta::Notification(notification));
    }

    fn publish(&self, delta: StateDelta) {
        // No subscribers is fine.
        let _ = self.deltas.send(delta);
    }

    fn publish_all(&self, deltas: Vec<StateDelta>) {
        for delta in deltas {
            self.publish(delta);
        }
    }
}
