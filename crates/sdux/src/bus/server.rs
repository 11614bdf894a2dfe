//! Session bus server.
//!
//! Listens on a Unix-domain socket and speaks newline-delimited JSON: each
//! line is a [`BusRequest`], answered by one [`BusResponse`] line. A
//! `Subscribe` request turns the connection into a stream of [`BusEvent`]
//! lines. Every method is translated into a [`SessionHandle`] call.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sdux_core::{BusSettings, Error, NotificationLevel, Result, ShellConfig, StateDelta};
use sdux_session::{Authenticator, SessionHandle};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, instrument, warn};

use crate::bus::introspect;
use crate::bus::methods::*;

/// Longest accepted request line.
const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Session bus service.
#[derive(Clone)]
pub struct BusServer {
    handle: SessionHandle,
    authenticator: Arc<dyn Authenticator>,
    config_path: Option<PathBuf>,
    request_timeout: Duration,
}

impl BusServer {
    /// Create a server forwarding to `handle`.
    ///
    /// `config_path` is re-read by `ReloadRegistry`.
    pub fn new(
        handle: SessionHandle,
        authenticator: Arc<dyn Authenticator>,
        config_path: Option<PathBuf>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            handle,
            authenticator,
            config_path,
            request_timeout,
        }
    }

    /// Bind the socket, replacing a stale one.
    pub fn bind(path: &Path) -> Result<UnixListener> {
        let unavailable = |e: std::io::Error| {
            Error::MessageBusUnavailable(format!("{}: {}", path.display(), e))
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(unavailable)?;
        }
        if path.exists() {
            std::fs::remove_file(path).map_err(unavailable)?;
        }
        UnixListener::bind(path).map_err(unavailable)
    }

    /// Keep the bus up for the lifetime of the session.
    ///
    /// A bind failure puts the bus in degraded mode: it is logged, reported
    /// once as a notification, and retried with `settings.retry` backoff.
    /// Local [`SessionHandle`] use is unaffected. Returns once the session
    /// has ended.
    pub async fn run(self, settings: BusSettings) {
        let path = settings.resolved_socket_path();
        let mut attempt = 0u32;
        let mut reported = false;

        while !self.handle.is_closed() {
            match Self::bind(&path) {
                Ok(listener) => {
                    if reported {
                        info!("Session bus recovered");
                    }
                    info!("Session bus {} listening on {}", SERVICE_NAME, path.display());
                    attempt = 0;
                    reported = false;
                    self.serve(listener).await;
                    let _ = std::fs::remove_file(&path);
                }
                Err(e) => {
                    attempt += 1;
                    let delay = settings.retry.delay_for(attempt);
                    warn!("{}; degraded mode, retrying in {:?}", e, delay);
                    if !reported {
                        reported = true;
                        let _ = self
                            .handle
                            .notify(
                                NotificationLevel::Warning,
                                "Session bus unavailable",
                                format!("Remote control is disabled: {e}"),
                            )
                            .await;
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
        debug!("Session bus stopped");
    }

    /// Accept connections until the session ends or the listener fails.
    pub async fn serve(&self, listener: UnixListener) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let server = self.clone();
                        tokio::spawn(async move { server.handle_connection(stream).await });
                    }
                    Err(e) => {
                        error!("Session bus accept failed: {}", e);
                        return;
                    }
                },
                _ = self.handle.closed() => return,
            }
        }
    }

    async fn handle_connection(self, stream: UnixStream) {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        loop {
            let line = match read_request_line(&mut reader, MAX_REQUEST_BYTES).await {
                Ok(RequestLine::Line(line)) => line,
                Ok(RequestLine::Eof) => return,
                Ok(RequestLine::TooLong) => {
                    warn!("Bus request exceeds {} bytes, closing connection", MAX_REQUEST_BYTES);
                    let err =
                        Error::InvalidRequest(format!("request exceeds {MAX_REQUEST_BYTES} bytes"));
                    let response = BusResponse::failure(None, BusError::from(&err));
                    let _ = write_line(&mut writer, &response).await;
                    return;
                }
                Err(e) => {
                    debug!("Session bus read failed: {}", e);
                    return;
                }
            };
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let request: BusRequest = match serde_json::from_slice(&line) {
                Ok(request) => request,
                Err(e) => {
                    let err = Error::InvalidRequest(e.to_string());
                    if write_line(&mut writer, &BusResponse::failure(None, BusError::from(&err)))
                        .await
                        .is_err()
                    {
                        return;
                    }
                    continue;
                }
            };

            debug!("Bus request {} (id {:?})", request.method, request.id);
            // Subscribe before acknowledging so no delta after the ack is missed
            let deltas = (request.method == BusMethod::Subscribe.name())
                .then(|| self.handle.subscribe());
            let response = self.respond(request).await;
            let accepted = response.error.is_none();
            if write_line(&mut writer, &response).await.is_err() {
                return;
            }
            if let (Some(deltas), true) = (deltas, accepted) {
                self.stream_deltas(deltas, &mut writer).await;
                return;
            }
        }
    }

    /// Answer one request, bounded by the request timeout.
    pub async fn respond(&self, request: BusRequest) -> BusResponse {
        let id = request.id.clone();
        let timeout_ms = self.request_timeout.as_millis() as u64;
        let outcome = match tokio::time::timeout(self.request_timeout, self.dispatch(request)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Timeout(timeout_ms)),
        };
        match outcome {
            Ok(result) => BusResponse::success(id, result),
            Err(e) => {
                debug!("Bus request failed: {}", e);
                BusResponse::failure(id, BusError::from(&e))
            }
        }
    }

    async fn dispatch(&self, request: BusRequest) -> Result<Value> {
        let method = BusMethod::from_name(&request.method)
            .ok_or_else(|| Error::InvalidRequest(format!("unknown method '{}'", request.method)))?;
        let params = request.params;
        match method {
            BusMethod::Launch => to_value(self.launch(parse(params)?).await?),
            BusMethod::Terminate => to_value(self.terminate(parse(params)?).await?),
            BusMethod::Lock => to_value(self.lock().await?),
            BusMethod::Unlock => to_value(self.unlock(parse(params)?).await?),
            BusMethod::Logout => to_value(self.logout(parse(params)?).await?),
            BusMethod::QueryState => to_value(self.handle.query().await?),
            BusMethod::ReloadRegistry => to_value(self.reload_registry().await?),
            BusMethod::Subscribe => to_value(AckResponse::ok()),
            BusMethod::Introspect => to_value(introspect::describe()),
        }
    }

    #[instrument(skip_all)]
    async fn launch(&self, params: LaunchParams) -> Result<LaunchResponse> {
        info!("Bus launch of '{}'", params.app_id);
        let receipt = self.handle.launch(params.into()).await?;
        Ok(receipt.into())
    }

    #[instrument(skip_all)]
    async fn terminate(&self, params: TerminateParams) -> Result<AckResponse> {
        info!(
            "Bus terminate of {} (graceful: {})",
            params.process_id, params.graceful
        );
        self.handle
            .terminate(params.process_id, params.graceful)
            .await?;
        Ok(AckResponse::ok())
    }

    #[instrument(skip_all)]
    async fn lock(&self) -> Result<AckResponse> {
        self.handle.lock().await?;
        Ok(AckResponse::ok())
    }

    #[instrument(skip_all)]
    async fn unlock(&self, params: UnlockParams) -> Result<AckResponse> {
        self.handle
            .unlock(Arc::clone(&self.authenticator), params.credential_token)
            .await
            .map_err(|e| {
                if matches!(e, Error::AuthDenied) {
                    warn!("Unlock denied");
                }
                e
            })?;
        Ok(AckResponse::ok())
    }

    #[instrument(skip_all)]
    async fn logout(&self, params: LogoutParams) -> Result<AckResponse> {
        info!("Bus logout (force: {})", params.force);
        self.handle.logout(params.force).await?;
        Ok(AckResponse::ok())
    }

    #[instrument(skip_all)]
    async fn reload_registry(&self) -> Result<ReloadRegistryResponse> {
        let path = self
            .config_path
            .clone()
            .or_else(ShellConfig::default_path)
            .ok_or_else(|| Error::Config("no configuration path".to_string()))?;
        let config = ShellConfig::load_or_default(&path)?;
        let applications = self.handle.reload_registry(config.applications).await?;
        Ok(ReloadRegistryResponse { applications })
    }

    async fn stream_deltas<W: AsyncWrite + Unpin>(
        &self,
        mut deltas: broadcast::Receiver<StateDelta>,
        writer: &mut W,
    ) {
        loop {
            let received = tokio::select! {
                biased;
                received = deltas.recv() => received,
                _ = self.handle.closed() => return,
            };
            match received {
                Ok(delta) => {
                    if write_line(writer, &BusEvent { delta }).await.is_err() {
                        debug!("Subscriber went away");
                        return;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Bus subscriber lagged, {} deltas dropped", missed);
                }
                Err(RecvError::Closed) => return,
            }
        }
    }
}

/// One line read off a connection.
#[derive(Debug, PartialEq, Eq)]
enum RequestLine {
    /// Line without its terminator
    Line(Vec<u8>),
    /// More than the limit arrived without a newline
    TooLong,
    /// Peer closed the connection
    Eof,
}

/// Read one newline-terminated line, never buffering more than `max` bytes
/// of it.
async fn read_request_line<R>(reader: &mut R, max: usize) -> std::io::Result<RequestLine>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);
    let read = (&mut *reader).take(limit).read_until(b'\n', &mut line).await?;
    if read == 0 {
        return Ok(RequestLine::Eof);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    } else if line.len() > max {
        return Ok(RequestLine::TooLong);
    }
    Ok(RequestLine::Line(line))
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T> {
    let params = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| Error::InvalidRequest(e.to_string()))
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}
