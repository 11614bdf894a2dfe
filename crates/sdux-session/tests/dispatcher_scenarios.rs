//! End-to-end dispatcher scenarios against the recording backend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sdux_core::{
    ApplicationConfig, Error, Geometry, LaunchRequest, LaunchSpec, NotificationLevel,
    ProcessStatus, RestartPolicy, Session, SessionId, SessionPhase, StateDelta, Termination,
    WindowEvent, WindowHandle,
};
use sdux_session::{
    Dispatcher, DispatcherConfig, HelperAuthenticator, SessionHandle, SessionOutcome, SessionState,
};
use sdux_supervisor::testing::RecordingBackend;
use sdux_supervisor::{LauncherRegistry, StopSignal, Supervisor, SupervisorConfig};
use sdux_windows::WindowSourceEvent;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

struct Harness {
    handle: SessionHandle,
    windows: mpsc::Sender<WindowSourceEvent>,
    backend: RecordingBackend,
    deltas: broadcast::Receiver<StateDelta>,
    task: JoinHandle<SessionOutcome>,
}

fn registry() -> LauncherRegistry {
    let mut registry = LauncherRegistry::new();
    registry.register(
        "term",
        LaunchSpec::new("/usr/bin/xterm").with_window_class("xterm"),
    );
    registry.register(
        "crashy",
        LaunchSpec::new("/usr/bin/crashy").with_restart(RestartPolicy::OnCrash, 3),
    );
    registry.register("stubborn", LaunchSpec::new("/usr/bin/stubborn"));
    registry.register("missing", LaunchSpec::new("/usr/bin/missing"));
    registry
}

fn start(config: DispatcherConfig) -> Harness {
    start_with(config, RecordingBackend::new())
}

fn start_with(config: DispatcherConfig, backend: RecordingBackend) -> Harness {
    let state = SessionState::new(
        Session::new(SessionId::new()),
        registry(),
        Supervisor::new(SupervisorConfig::default()),
    );
    let (dispatcher, handle, windows) = Dispatcher::new(state, Arc::new(backend.clone()), config);
    let deltas = handle.subscribe();
    let task = tokio::spawn(dispatcher.run());
    Harness {
        handle,
        windows,
        backend,
        deltas,
        task,
    }
}

fn drain(deltas: &mut broadcast::Receiver<StateDelta>) -> Vec<StateDelta> {
    let mut out = Vec::new();
    while let Ok(delta) = deltas.try_recv() {
        out.push(delta);
    }
    out
}

fn notifications(deltas: &[StateDelta]) -> Vec<(NotificationLevel, String)> {
    deltas
        .iter()
        .filter_map(|d| match d {
            StateDelta::Notification(n) => Some((n.level, n.title.clone())),
            _ => None,
        })
        .collect()
}

fn app(command: &str) -> ApplicationConfig {
    ApplicationConfig {
        command: command.to_string(),
        args: Vec::new(),
        env: BTreeMap::new(),
        working_dir: None,
        expected_window_class: None,
        restart: RestartPolicy::Never,
        max_restarts: 3,
        backoff: Default::default(),
    }
}

fn create(handle: u32, class: &str) -> WindowSourceEvent {
    WindowSourceEvent::Event(WindowEvent::Create {
        handle: WindowHandle(handle),
        pid: None,
        class: Some(class.to_string()),
        title: Some("shell".to_string()),
        geometry: Geometry::new(0, 0, 640, 480),
    })
}

#[tokio::test(start_paused = true)]
async fn test_launch_correlate_and_external_kill() {
    let mut h = start(DispatcherConfig::default());

    let receipt = h.handle.launch(LaunchRequest::new("Term")).await.unwrap();
    assert_eq!(receipt.app_id, "term");
    assert_eq!(receipt.pid, 1000);

    let snapshot = h.handle.query().await.unwrap();
    assert_eq!(snapshot.session.phase, SessionPhase::Active);
    let process = snapshot.process(receipt.process_id).unwrap();
    assert_eq!(process.status, ProcessStatus::Running);
    assert_eq!(process.pid, Some(1000));

    h.windows.send(create(7, "xterm")).await.unwrap();
    h.windows
        .send(WindowSourceEvent::Event(WindowEvent::Map(WindowHandle(7))))
        .await
        .unwrap();
    let snapshot = h.handle.query().await.unwrap();
    let window = snapshot.window(WindowHandle(7)).unwrap();
    assert_eq!(window.owner, Some(receipt.process_id));
    assert!(window.is_mapped());

    // Killed from outside the core.
    h.backend.exit(1000, Termination::Signal(9));
    tokio::time::sleep(Duration::from_secs(60)).await;

    let snapshot = h.handle.query().await.unwrap();
    let process = snapshot.process(receipt.process_id).unwrap();
    assert_eq!(process.status, ProcessStatus::Crashed(Termination::Signal(9)));
    let window = snapshot.window(WindowHandle(7)).unwrap();
    assert_eq!(window.owner, None);
    assert_eq!(h.backend.spawn_count("term"), 1);

    let deltas = drain(&mut h.deltas);
    assert!(deltas.iter().any(|d| matches!(
        d,
        StateDelta::WindowChanged(w) if w.handle == WindowHandle(7) && w.owner.is_none()
    )));
    assert!(!deltas
        .iter()
        .any(|d| matches!(d, StateDelta::WindowRemoved(_))));
}

#[tokio::test(start_paused = true)]
async fn test_crash_loop_stops_after_max_restarts() {
    let mut h = start(DispatcherConfig::default());
    let receipt = h.handle.launch(LaunchRequest::new("crashy")).await.unwrap();

    for _ in 0..4 {
        let pids = h.backend.live_pids();
        assert_eq!(pids.len(), 1);
        h.backend.exit(pids[0], Termination::Code(1));
        tokio::time::sleep(Duration::from_secs(120)).await;
    }

    assert_eq!(h.backend.spawn_count("crashy"), 4);
    assert!(h.backend.live_pids().is_empty());

    let snapshot = h.handle.query().await.unwrap();
    let process = snapshot.process(receipt.process_id).unwrap();
    assert_eq!(process.status, ProcessStatus::Crashed(Termination::Code(1)));
    assert_eq!(process.restart_count, 3);

    let levels = notifications(&drain(&mut h.deltas));
    let restarting = levels
        .iter()
        .filter(|(level, _)| *level == NotificationLevel::Info)
        .count();
    assert_eq!(restarting, 3);
    assert_eq!(
        levels.last().map(|(level, _)| *level),
        Some(NotificationLevel::Critical)
    );

    // Nothing else happens afterwards.
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.backend.spawn_count("crashy"), 4);
}

#[tokio::test(start_paused = true)]
async fn test_logout_is_idempotent_and_escalates() {
    let backend = RecordingBackend::new();
    backend.ignore_sigterm("stubborn");
    let mut h = start_with(DispatcherConfig::default(), backend);

    let term = h.handle.launch(LaunchRequest::new("term")).await.unwrap();
    let stubborn = h.handle.launch(LaunchRequest::new("stubborn")).await.unwrap();

    let started = tokio::time::Instant::now();
    h.handle.logout(false).await.unwrap();
    h.handle.logout(false).await.unwrap();
    h.handle.logout(true).await.unwrap();

    let outcome = h.task.await.unwrap();
    assert_eq!(outcome, SessionOutcome::LoggedOut);
    // Escalation after the 5s terminate timeout, well before the 15s deadline.
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(started.elapsed() < Duration::from_secs(15));

    let signals = h.backend.signals();
    let of = |pid: u32| -> Vec<StopSignal> {
        signals
            .iter()
            .filter(|(p, _)| *p == pid)
            .map(|(_, s)| *s)
            .collect()
    };
    assert_eq!(of(term.pid), vec![StopSignal::Terminate]);
    assert_eq!(
        of(stubborn.pid),
        vec![StopSignal::Terminate, StopSignal::Kill]
    );

    let phases: Vec<SessionPhase> = drain(&mut h.deltas)
        .into_iter()
        .filter_map(|d| match d {
            StateDelta::PhaseChanged { to, .. } => Some(to),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            SessionPhase::Active,
            SessionPhase::EndingRequested,
            SessionPhase::Ended
        ]
    );

    assert!(matches!(h.handle.query().await, Err(Error::SessionClosed)));
}

#[tokio::test(start_paused = true)]
async fn test_logout_deadline_forces_end() {
    let backend = RecordingBackend::new();
    backend.ignore_sigterm("stubborn");
    let h = start_with(
        DispatcherConfig {
            shutdown_timeout: Duration::from_secs(2),
            ..DispatcherConfig::default()
        },
        backend,
    );
    let stubborn = h.handle.launch(LaunchRequest::new("stubborn")).await.unwrap();

    let started = tokio::time::Instant::now();
    h.handle.logout(false).await.unwrap();
    assert_eq!(h.task.await.unwrap(), SessionOutcome::LoggedOut);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(h
        .backend
        .signals()
        .contains(&(stubborn.pid, StopSignal::Kill)));
}

#[tokio::test(start_paused = true)]
async fn test_windowing_lost_is_fatal() {
    let h = start(DispatcherConfig::default());
    let receipt = h.handle.launch(LaunchRequest::new("term")).await.unwrap();

    h.windows
        .send(WindowSourceEvent::ConnectionLost("broken pipe".into()))
        .await
        .unwrap();

    match h.task.await.unwrap() {
        SessionOutcome::Fatal(reason) => assert!(reason.contains("broken pipe")),
        other => panic!("expected fatal outcome, got {other:?}"),
    }
    assert_eq!(
        h.backend.signals(),
        vec![(receipt.pid, StopSignal::Kill)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_dropping_window_queue_is_fatal() {
    let h = start(DispatcherConfig::default());
    drop(h.windows);
    assert!(matches!(h.task.await.unwrap(), SessionOutcome::Fatal(_)));
}

#[tokio::test(start_paused = true)]
async fn test_lock_and_unlock_rules() {
    let backend = RecordingBackend::new();
    backend.ignore_sigterm("stubborn");
    let h = start_with(DispatcherConfig::default(), backend);

    assert!(matches!(
        h.handle.unlock_granted().await,
        Err(Error::InvalidPhase {
            phase: SessionPhase::Active,
            ..
        })
    ));

    h.handle.lock().await.unwrap();
    h.handle.lock().await.unwrap();
    assert_eq!(h.handle.query().await.unwrap().session.phase, SessionPhase::Locked);

    let denied = h
        .handle
        .unlock(Arc::new(HelperAuthenticator::new(None)), "hunter2".into())
        .await;
    assert!(matches!(denied, Err(Error::AuthDenied)));
    assert_eq!(h.handle.query().await.unwrap().session.phase, SessionPhase::Locked);

    h.handle.unlock_granted().await.unwrap();
    assert_eq!(h.handle.query().await.unwrap().session.phase, SessionPhase::Active);

    h.handle.launch(LaunchRequest::new("stubborn")).await.unwrap();
    h.handle.logout(false).await.unwrap();
    assert!(matches!(
        h.handle.lock().await,
        Err(Error::InvalidPhase {
            phase: SessionPhase::EndingRequested,
            ..
        })
    ));
    assert!(matches!(
        h.handle.launch(LaunchRequest::new("term")).await,
        Err(Error::InvalidPhase { .. })
    ));
    assert_eq!(h.task.await.unwrap(), SessionOutcome::LoggedOut);
}

#[tokio::test(start_paused = true)]
async fn test_launch_failures_are_local() {
    let backend = RecordingBackend::new();
    backend.fail_command("/usr/bin/missing");
    let mut h = start_with(DispatcherConfig::default(), backend);

    assert!(matches!(
        h.handle.launch(LaunchRequest::new("nope")).await,
        Err(Error::UnknownApplication(id)) if id == "nope"
    ));
    match h.handle.launch(LaunchRequest::new("missing")).await {
        Err(Error::SpawnError { app_id, .. }) => assert_eq!(app_id, "missing"),
        other => panic!("expected spawn error, got {other:?}"),
    }

    let snapshot = h.handle.query().await.unwrap();
    assert!(snapshot.processes.is_empty());
    assert_eq!(snapshot.session.phase, SessionPhase::Active);
    assert_eq!(
        notifications(&drain(&mut h.deltas)),
        vec![(NotificationLevel::Warning, "Could not start missing".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_autostart_launches_and_reports_unknown() {
    let mut h = start(DispatcherConfig {
        autostart: vec!["term".into(), "ghost".into()],
        ..DispatcherConfig::default()
    });

    let snapshot = h.handle.query().await.unwrap();
    assert_eq!(snapshot.session.phase, SessionPhase::Active);
    assert_eq!(snapshot.processes.len(), 1);
    assert_eq!(snapshot.processes[0].status, ProcessStatus::Running);

    let notes = notifications(&drain(&mut h.deltas));
    assert_eq!(
        notes,
        vec![(NotificationLevel::Warning, "Could not start ghost".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reload_registry_and_cycle_order() {
    let h = start(DispatcherConfig::default());

    let mut applications = BTreeMap::new();
    applications.insert("Editor".to_string(), app("/usr/bin/editor"));
    assert_eq!(h.handle.reload_registry(applications).await.unwrap(), 1);
    assert!(h.handle.launch(LaunchRequest::new("editor")).await.is_ok());
    assert!(matches!(
        h.handle.launch(LaunchRequest::new("term")).await,
        Err(Error::UnknownApplication(_))
    ));

    let mut invalid = BTreeMap::new();
    invalid.insert("broken".to_string(), app("  "));
    assert!(matches!(
        h.handle.reload_registry(invalid).await,
        Err(Error::Config(_))
    ));

    for handle in [1, 2] {
        h.windows.send(create(handle, "foreign")).await.unwrap();
        h.windows
            .send(WindowSourceEvent::Event(WindowEvent::Map(WindowHandle(handle))))
            .await
            .unwrap();
    }
    h.windows
        .send(WindowSourceEvent::Event(WindowEvent::FocusChange(Some(
            WindowHandle(1),
        ))))
        .await
        .unwrap();
    h.windows
        .send(WindowSourceEvent::Event(WindowEvent::FocusChange(Some(
            WindowHandle(2),
        ))))
        .await
        .unwrap();

    assert_eq!(
        h.handle.cycle_order().await.unwrap(),
        vec![WindowHandle(2), WindowHandle(1)]
    );
}
