//! Session with the remote execution host
//!
//! Two TCP connections to the same host: the command channel (`exec`,
//! container listing, emulation control) and the file-transfer channel
//! (`put`). Both must complete the `hello` handshake before a session
//! exists; there is no half-connected session.

use crate::config::RemoteConfig;
use crate::protocol::{ChannelKind, LineChannel, Reply, Request};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Cannot open {channel} channel: {reason}")]
    Connect { channel: ChannelKind, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Remote host closed the connection")]
    Disconnected,
    #[error("`{command}` exited with {code}: {output}")]
    CommandFailed {
        command: String,
        code: i32,
        output: String,
    },
    #[error("Remote host rejected the request: {0}")]
    Rejected(String),
    #[error("Remote emulation failed: {0}")]
    EmulationFailed(String),
    #[error("Expected {expected} reply, got {got}")]
    Unexpected { expected: &'static str, got: &'static str },
    #[error("Payload of {0} bytes is too large")]
    Oversized(u64),
}

impl RemoteError {
    fn unexpected(expected: &'static str, reply: &Reply) -> Self {
        RemoteError::Unexpected {
            expected,
            got: reply.status(),
        }
    }
}

pub struct RemoteSession {
    host: String,
    command: LineChannel,
    transfer: LineChannel,
}

impl RemoteSession {
    /// Open and authenticate both channels
    pub async fn connect(remote: &RemoteConfig) -> Result<Self, RemoteError> {
        let command = open_channel(remote, ChannelKind::Command, remote.command_port).await?;
        let transfer = open_channel(remote, ChannelKind::Transfer, remote.transfer_port).await?;
        info!("Connected to remote host {}", remote.host);
        Ok(Self {
            host: remote.host.clone(),
            command,
            transfer,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Run a shell command on the remote host, returning its output
    pub async fn exec(&mut self, command: &str) -> Result<String, RemoteError> {
        debug!("exec on {}: {}", self.host, command);
        self.command
            .send(&Request::Exec {
                command: command.to_string(),
            })
            .await?;
        match self.command.recv::<Reply>().await? {
            Reply::Done { code: 0, output } => Ok(output),
            Reply::Done { code, output } => Err(RemoteError::CommandFailed {
                command: command.to_string(),
                code,
                output,
            }),
            Reply::Error { reason } => Err(RemoteError::Rejected(reason)),
            other => Err(RemoteError::unexpected("done", &other)),
        }
    }

    /// Per-node container identifiers known to the daemon, in node order
    pub async fn list_containers(&mut self) -> Result<Vec<String>, RemoteError> {
        self.command.send(&Request::ListContainers).await?;
        match self.command.recv::<Reply>().await? {
            Reply::Containers { ids } => Ok(ids),
            Reply::Error { reason } => Err(RemoteError::Rejected(reason)),
            other => Err(RemoteError::unexpected("containers", &other)),
        }
    }

    /// Upload `bytes` to `remote_path` on the file-transfer channel
    pub async fn put(&mut self, remote_path: &str, bytes: &[u8]) -> Result<(), RemoteError> {
        self.transfer
            .send(&Request::Put {
                path: remote_path.to_string(),
                len: bytes.len() as u64,
            })
            .await?;
        self.transfer.send_raw(bytes).await?;
        match self.transfer.recv::<Reply>().await? {
            Reply::Ok => {
                debug!("Uploaded {} bytes to {}:{}", bytes.len(), self.host, remote_path);
                Ok(())
            }
            Reply::Error { reason } => Err(RemoteError::Rejected(reason)),
            other => Err(RemoteError::unexpected("ok", &other)),
        }
    }

    /// Start the emulation from an uploaded batch and wait until the daemon finishes
    pub async fn run_emulation(&mut self, batch_path: &str) -> Result<(), RemoteError> {
        self.command
            .send(&Request::RunEmulation {
                batch: batch_path.to_string(),
            })
            .await?;
        loop {
            match self.command.recv::<Reply>().await? {
                Reply::Progress { time } => info!("Emulation in second {}", time),
                Reply::Finished => return Ok(()),
                Reply::Failed { reason } => return Err(RemoteError::EmulationFailed(reason)),
                Reply::Error { reason } => return Err(RemoteError::Rejected(reason)),
                other => return Err(RemoteError::unexpected("progress", &other)),
            }
        }
    }

    /// Say goodbye, wait for the acknowledgement and shut down both streams
    pub async fn close(mut self) -> Result<(), RemoteError> {
        let bye = async {
            self.command.send(&Request::Bye).await?;
            self.command.recv::<Reply>().await
        };
        let acknowledged = bye.await;
        match acknowledged {
            Ok(Reply::Ok) => {}
            Ok(other) => warn!("{} answered bye with {}", self.host, other.status()),
            Err(e) => warn!("No bye acknowledgement from {}: {}", self.host, e),
        }
        let command = self.command.shutdown().await;
        let transfer = self.transfer.shutdown().await;
        info!("Closed session with {}", self.host);
        command.and(transfer)
    }
}

async fn open_channel(
    remote: &RemoteConfig,
    channel: ChannelKind,
    port: u16,
) -> Result<LineChannel, RemoteError> {
    let connect_err = |reason: String| RemoteError::Connect { channel, reason };
    let timeout = Duration::from_secs(remote.connect_timeout_s);

    let connect = TcpStream::connect((remote.host.as_str(), port));
    let stream = match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(connect_err(format!("{}:{}: {}", remote.host, port, e))),
        Err(_) => return Err(connect_err(format!("{}:{}: timed out", remote.host, port))),
    };

    let mut lines = LineChannel::new(stream);
    let hello = Request::Hello {
        channel,
        username: remote.username.clone(),
        password: remote.password.clone(),
    };
    let handshake = async {
        lines.send(&hello).await?;
        lines.recv::<Reply>().await
    };
    match tokio::time::timeout(timeout, handshake).await {
        Ok(Ok(Reply::Ok)) => {}
        Ok(Ok(Reply::Denied { reason })) => return Err(connect_err(reason)),
        Ok(Ok(other)) => return Err(connect_err(format!("unexpected {} reply", other.status()))),
        Ok(Err(e)) => return Err(connect_err(e.to_string())),
        Err(_) => return Err(connect_err("handshake timed out".to_string())),
    }
    debug!("{} channel open on {}:{}", channel, remote.host, port);
    Ok(lines)
}
