//! Process backends: where supervisor actions meet the OS.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use sdux_core::{Error, ProcessEvent, Result, SessionId, Termination};
use tokio::process::Command;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::supervisor::{SpawnRequest, StopSignal};

/// Environment variable carrying the session id into children.
pub const ENV_SESSION_ID: &str = "SDUX_SESSION_ID";

/// Environment variable carrying the application id into children.
pub const ENV_APP_ID: &str = "SDUX_APP_ID";

/// Executes spawns and signals for the supervisor.
///
/// Implementations must not block the caller: spawning happens in the
/// background and every outcome is reported on the `events` queue, in order:
/// `Spawned` or `SpawnFailed`, then `Exited` once the child is reaped.
pub trait ProcessBackend: Send + Sync {
    /// Start a process in the background.
    fn spawn(&self, request: SpawnRequest, events: mpsc::Sender<ProcessEvent>);

    /// Send `signal` to `pid`. A process that is already gone is not an error.
    fn signal(&self, pid: u32, signal: StopSignal) -> Result<()>;
}

/// Backend that runs real OS processes with `tokio::process`.
pub struct OsProcessBackend {
    session_id: SessionId,
    workers: Arc<Semaphore>,
}

impl OsProcessBackend {
    /// Create a backend allowing `spawn_workers` concurrent spawns.
    pub fn new(session_id: SessionId, spawn_workers: usize) -> Self {
        Self {
            session_id,
            workers: Arc::new(Semaphore::new(spawn_workers.max(1))),
        }
    }

    fn command(&self, request: &SpawnRequest) -> Command {
        let mut command = Command::new(&request.spec.command);
        command
            .args(&request.args)
            .envs(&request.env)
            .env(ENV_SESSION_ID, self.session_id.to_string())
            .env(ENV_APP_ID, &request.app_id)
            .stdin(Stdio::null())
            .kill_on_drop(false);
        if let Some(dir) = &request.spec.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

impl ProcessBackend for OsProcessBackend {
    fn spawn(&self, request: SpawnRequest, events: mpsc::Sender<ProcessEvent>) {
        let workers = Arc::clone(&self.workers);
        let mut command = self.command(&request);
        let id = request.id;

        tokio::spawn(async move {
            let spawned = match workers.acquire_owned().await {
                Ok(_permit) => command.spawn(),
                Err(_) => {
                    let _ = events
                        .send(ProcessEvent::SpawnFailed {
                            id,
                            reason: "spawn pool closed".to_string(),
                        })
                        .await;
                    return;
                }
            };

            let mut child = match spawned {
                Ok(child) => child,
                Err(e) => {
                    debug!("spawn of {} ({}) failed: {}", id, request.spec.command, e);
                    let _ = events
                        .send(ProcessEvent::SpawnFailed {
                            id,
                            reason: e.to_string(),
                        })
                        .await;
                    return;
                }
            };

            let Some(pid) = child.id() else {
                let _ = events
                    .send(ProcessEvent::SpawnFailed {
                        id,
                        reason: "process exited before its pid was known".to_string(),
                    })
                    .await;
                return;
            };
            debug!("spawned {} as pid {}", request.spec.command, pid);

            if events
                .send(ProcessEvent::Spawned { id, pid })
                .await
                .is_err()
            {
                warn!("Process queue closed; pid {} is no longer supervised", pid);
                return;
            }

            // Reaper: one per child, until the OS reports the exit.
            let termination = match child.wait().await {
                Ok(status) => termination_of(status),
                Err(e) => {
                    error!("Failed to wait for pid {}: {}", pid, e);
                    Termination::Code(-1)
                }
            };
            let _ = events
                .send(ProcessEvent::Exited {
                    id,
                    pid,
                    termination,
                })
                .await;
        });
    }

    fn signal(&self, pid: u32, signal: StopSignal) -> Result<()> {
        let raw_pid = libc::pid_t::try_from(pid)
            .map_err(|_| Error::InvalidRequest(format!("pid {pid} out of range")))?;
        info!("Sending signal {} to pid {}", signal.as_raw(), pid);

        let rc = unsafe { libc::kill(raw_pid, signal.as_raw()) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            debug!("pid {} already gone", pid);
            Ok(())
        } else {
            Err(err.into())
        }
    }
}

/// Convert an OS exit status.
pub fn termination_of(status: ExitStatus) -> Termination {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => Termination::Code(code),
        (None, Some(signal)) => Termination::Signal(signal),
        (None, None) => Termination::Code(-1),
    }
}
