//! In-process API to the session dispatcher.

use std::collections::BTreeMap;
use std::sync::Arc;

use sdux_core::{
    ApplicationConfig, Error, LaunchRequest, NotificationLevel, ProcessId, Result,
    SessionSnapshot, StateDelta, WindowHandle,
};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::auth::Authenticator;
use crate::dispatcher::{Command, LaunchReceipt};

/// Cheap, cloneable handle used by the shell UI and the session bus.
///
/// Every call queues a [`Command`] and waits for the dispatcher's answer.
/// Once the dispatcher has stopped, calls fail with [`Error::SessionClosed`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    deltas: broadcast::Sender<StateDelta>,
}

impl SessionHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        deltas: broadcast::Sender<StateDelta>,
    ) -> Self {
        Self { commands, deltas }
    }

    /// Launch an application by id.
    ///
    /// Resolves once the OS has started the process (or refused to).
    pub async fn launch(&self, request: LaunchRequest) -> Result<LaunchReceipt> {
        self.request(|reply| Command::Launch { request, reply })
            .await?
    }

    /// Stop a managed process.
    pub async fn terminate(&self, id: ProcessId, graceful: bool) -> Result<()> {
        self.request(|reply| Command::Terminate {
            id,
            graceful,
            reply,
        })
        .await?
    }

    /// Lock the screen.
    pub async fn lock(&self) -> Result<()> {
        self.request(|reply| Command::Lock { reply }).await?
    }

    /// Unlock after the credential has been accepted elsewhere.
    pub async fn unlock_granted(&self) -> Result<()> {
        self.request(|reply| Command::Unlock { reply }).await?
    }

    /// Check `token` with `authenticator` on the blocking pool, then unlock.
    pub async fn unlock(&self, authenticator: Arc<dyn Authenticator>, token: String) -> Result<()> {
        tokio::task::spawn_blocking(move || authenticator.verify(&token))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;
        self.unlock_granted().await
    }

    /// End the session. Calling it again while a logout runs is a no-op.
    pub async fn logout(&self, force: bool) -> Result<()> {
        self.request(|reply| Command::Logout { force, reply })
            .await?
    }

    /// Snapshot of the session, processes and windows.
    pub async fn query(&self) -> Result<SessionSnapshot> {
        self.request(|reply| Command::Query { reply }).await
    }

    /// Replace the launcher registry. Returns the number of definitions.
    pub async fn reload_registry(
        &self,
        applications: BTreeMap<String, ApplicationConfig>,
    ) -> Result<usize> {
        self.request(|reply| Command::ReloadRegistry {
            applications,
            reply,
        })
        .await?
    }

    /// Mapped windows, most recently focused first.
    pub async fn cycle_order(&self) -> Result<Vec<WindowHandle>> {
        self.request(|reply| Command::CycleOrder { reply }).await
    }

    /// Publish a notification.
    pub async fn notify(
        &self,
        level: NotificationLevel,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<()> {
        self.commands
            .send(Command::Notify {
                level,
                title: title.into(),
                body: body.into(),
            })
            .await
            .map_err(|_| Error::SessionClosed)
    }

    /// Receive every delta published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StateDelta> {
        self.deltas.subscribe()
    }

    /// Whether the dispatcher has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Wait until the dispatcher has stopped.
    pub async fn closed(&self) {
        self.commands.closed().await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| Error::SessionClosed)?;
        response.await.map_err(|_| Error::SessionClosed)
    }
}
