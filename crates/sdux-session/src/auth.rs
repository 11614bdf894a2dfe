//! Unlock authentication.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use sdux_core::{AuthSettings, Error, Result};
use tracing::{debug, error, warn};

/// Checks the credential presented with an unlock request.
///
/// `verify` may block; callers run it on the blocking pool.
pub trait Authenticator: Send + Sync {
    /// `Ok(())` when `token` unlocks the session, [`Error::AuthDenied`] otherwise.
    fn verify(&self, token: &str) -> Result<()>;
}

/// Delegates the check to an external helper program.
///
/// The helper receives the token on stdin followed by a newline and grants
/// the unlock by exiting with status 0. Without a configured helper every
/// unlock is denied. A helper still running after the timeout is killed
/// and the unlock denied.
#[derive(Debug, Clone)]
pub struct HelperAuthenticator {
    helper: Option<PathBuf>,
    timeout: Duration,
}

/// How often a running helper is checked for exit.
const WAIT_INTERVAL: Duration = Duration::from_millis(20);

impl HelperAuthenticator {
    /// Authenticator using `helper` with the default timeout.
    pub fn new(helper: Option<PathBuf>) -> Self {
        if helper.is_none() {
            warn!("No unlock helper configured; unlock requests will be denied");
        }
        Self {
            helper,
            timeout: Duration::from_millis(AuthSettings::default().timeout_ms),
        }
    }

    /// Authenticator from the `auth` config section.
    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self::new(settings.helper.clone()).with_timeout(Duration::from_millis(settings.timeout_ms))
    }

    /// Set how long the helper may run.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for HelperAuthenticator {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Wait for `child` until `timeout` elapses. `None` means it was killed.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(WAIT_INTERVAL.min(deadline - now));
    }
    // The helper may exit between the last check and the kill.
    if let Err(e) = child.kill() {
        debug!("Killing unlock helper failed: {}", e);
    }
    child.wait()?;
    Ok(None)
}

impl Authenticator for HelperAuthenticator {
    fn verify(&self, token: &str) -> Result<()> {
        let Some(helper) = &self.helper else {
            return Err(Error::AuthDenied);
        };

        let mut child = Command::new(helper)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                error!("Failed to run unlock helper {}: {}", helper.display(), e);
                Error::AuthDenied
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = writeln!(stdin, "{token}") {
                debug!("Unlock helper closed stdin early: {}", e);
            }
        }

        let status = match wait_with_timeout(&mut child, self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                warn!(
                    "Unlock helper {} did not answer within {:?}, killed",
                    helper.display(),
                    self.timeout
                );
                return Err(Error::AuthDenied);
            }
            Err(e) => {
                error!("Failed to wait for unlock helper: {}", e);
                return Err(Error::AuthDenied);
            }
        };
        if status.success() {
            Ok(())
        } else {
            debug!("Unlock helper rejected credential ({})", status);
            Err(Error::AuthDenied)
        }
    }
}
