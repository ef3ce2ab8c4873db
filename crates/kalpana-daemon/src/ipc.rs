use std::ffi::CString;
use std::fs;
use std::future::Future;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

use kalpana_core::config::Config;
use kalpana_core::error::FrameError;
use kalpana_core::ipc::AuthorityResponse;

use crate::authority::Authority;

const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub socket_path: PathBuf,
    pub max_connections: usize,
    pub frame_timeout: Duration,
    pub max_frame_bytes: usize,
    pub socket_mode: u32,
    pub socket_group: Option<String>,
}

impl ServerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            socket_path: config.socket_path(),
            max_connections: config.server.max_connections.max(1),
            frame_timeout: Duration::from_millis(config.server.frame_timeout_ms),
            max_frame_bytes: config.server.max_frame_bytes,
            socket_mode: config.server.socket_mode,
            socket_group: config.server.socket_group.clone(),
        }
    }
}

/// Replaces any stale socket at the configured path and starts listening.
/// Failure here is the one condition that stops the daemon.
pub fn bind(settings: &ServerSettings) -> Result<UnixListener> {
    let socket_path = &settings.socket_path;
    if let Some(parent) = socket_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create socket dir {}", parent.display()))?;
    }
    remove_socket(socket_path)?;

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("bind socket {}", socket_path.display()))?;
    fs::set_permissions(socket_path, fs::Permissions::from_mode(settings.socket_mode))
        .with_context(|| format!("set socket permissions {}", socket_path.display()))?;

    if let Some(group) = &settings.socket_group {
        if let Err(error) = chown_group(socket_path, group) {
            warn!(%group, error = %format!("{error:#}"), "socket group not applied");
        }
    }
    Ok(listener)
}

pub fn remove_socket(socket_path: &Path) -> Result<()> {
    match fs::remove_file(socket_path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error).with_context(|| format!("remove socket {}", socket_path.display())),
    }
}

fn chown_group(path: &Path, group: &str) -> Result<()> {
    let name = CString::new(group).context("group name contains a NUL byte")?;
    let entry = unsafe { libc::getgrnam(name.as_ptr()) };
    if entry.is_null() {
        return Err(anyhow::anyhow!("unknown group {group}"));
    }
    let gid = unsafe { (*entry).gr_gid };
    std::os::unix::fs::chown(path, None, Some(gid))
        .with_context(|| format!("chown {} to group {group}", path.display()))?;
    Ok(())
}

/// Accepts connections until `shutdown` resolves. Each connection runs in its
/// own task; at most `max_connections` are served at once and further clients
/// wait in the listen backlog.
pub async fn serve(
    listener: UnixListener,
    authority: Arc<Authority>,
    settings: Arc<ServerSettings>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let limiter = Arc::new(Semaphore::new(settings.max_connections));
    tokio::pin!(shutdown);
    let mut accept_failures: u32 = 0;

    loop {
        let permit = tokio::select! {
            _ = &mut shutdown => break,
            permit = limiter.clone().acquire_owned() => permit.context("connection limiter closed")?,
        };
        let accepted = tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => accepted,
        };
        let stream = match accepted {
            Ok((stream, _)) => {
                accept_failures = 0;
                stream
            }
            Err(error) => {
                accept_failures = accept_failures.saturating_add(1);
                let delay = accept_backoff(accept_failures);
                warn!(%error, retry_in_ms = delay.as_millis() as u64, "accept failed");
                drop(permit);
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(delay) => continue,
                }
            }
        };

        let authority = authority.clone();
        let settings = settings.clone();
        tokio::spawn(async move {
            handle_connection(stream, &authority, &settings).await;
            drop(permit);
        });
    }
    Ok(())
}

/// Delay before retrying after `failures` consecutive accept errors. Doubles
/// from 10ms and stops growing at one second.
fn accept_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(7);
    Duration::from_millis(10 << exponent).min(ACCEPT_BACKOFF_MAX)
}

/// Serves one client: frame in, frame out, until the peer hangs up or the
/// stream breaks. Errors never leave this connection.
pub async fn handle_connection(mut stream: UnixStream, authority: &Authority, settings: &ServerSettings) {
    match stream.peer_cred() {
        Ok(cred) => debug!(peer_pid = ?cred.pid(), peer_uid = cred.uid(), "client connected"),
        Err(error) => debug!(%error, "client connected, credentials unavailable"),
    }

    let (mut reader, mut writer) = stream.split();
    loop {
        let body = match read_frame(&mut reader, settings.max_frame_bytes, settings.frame_timeout).await {
            Ok(body) => body,
            Err(FrameError::Closed) => break,
            Err(error) => {
                warn!(%error, "dropping client connection");
                break;
            }
        };

        let response = authority.handle_frame(&body);
        let payload = encode_response(&response);
        if let Err(error) = write_frame(&mut writer, &payload, settings.frame_timeout).await {
            warn!(%error, "failed to answer client");
            break;
        }
    }
    debug!("client disconnected");
}

fn encode_response(response: &AuthorityResponse) -> Vec<u8> {
    serde_json::to_vec(response).unwrap_or_else(|error| {
        let fallback = AuthorityResponse::error(format!("failed to encode response: {error}"));
        serde_json::to_vec(&fallback).unwrap_or_else(|_| b"{}".to_vec())
    })
}

/// Waits indefinitely for the length prefix, then allows `deadline` for the body.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_len: usize,
    deadline: Duration,
) -> Result<Vec<u8>, FrameError> {
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(error) if error.kind() == ErrorKind::UnexpectedEof => return Err(FrameError::Closed),
        Err(error) => return Err(FrameError::Io(error)),
    };
    if len > max_len {
        return Err(FrameError::TooLarge { len, max: max_len });
    }

    let mut body = vec![0u8; len];
    match timeout(deadline, reader.read_exact(&mut body)).await {
        Err(_) => Err(FrameError::TimedOut),
        Ok(Err(error)) if error.kind() == ErrorKind::UnexpectedEof => Err(FrameError::Truncated(error)),
        Ok(Err(error)) => Err(FrameError::Io(error)),
        Ok(Ok(_)) => Ok(body),
    }
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
    deadline: Duration,
) -> Result<(), FrameError> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;
    let write = async {
        writer.write_u32(len).await?;
        writer.write_all(payload).await?;
        writer.flush().await
    };
    timeout(deadline, write).await.map_err(|_| FrameError::TimedOut)??;
    Ok(())
}
