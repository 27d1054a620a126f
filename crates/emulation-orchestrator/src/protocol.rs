//! Wire protocol spoken with the remote emulation daemon
//!
//! Newline-delimited JSON over TCP. Requests are tagged by `op`, replies by
//! `status`:
//!
//! ```text
//! -> {"op":"hello","channel":"command","username":"emu","password":"..."}
//! <- {"status":"ok"}
//! -> {"op":"exec","command":"mkdir -p sim-data-x"}
//! <- {"status":"done","code":0,"output":""}
//! -> {"op":"put","path":"sim-data-x/emulation_batch.json","len":812}
//! -> <812 raw bytes>
//! <- {"status":"ok"}
//! ```

use crate::remote::RemoteError;
use orbital_topology::TimeStep;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Command,
    Transfer,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Command => write!(f, "command"),
            ChannelKind::Transfer => write!(f, "file-transfer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Hello {
        channel: ChannelKind,
        username: String,
        password: String,
    },
    Exec {
        command: String,
    },
    ListContainers,
    /// Followed on the wire by exactly `len` raw bytes
    Put {
        path: String,
        len: u64,
    },
    RunEmulation {
        batch: String,
    },
    Bye,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Ok,
    Denied { reason: String },
    Done { code: i32, output: String },
    Containers { ids: Vec<String> },
    Progress { time: TimeStep },
    Finished,
    Failed { reason: String },
    Error { reason: String },
}

impl Reply {
    /// Short name used in unexpected-reply errors
    pub fn status(&self) -> &'static str {
        match self {
            Reply::Ok => "ok",
            Reply::Denied { .. } => "denied",
            Reply::Done { .. } => "done",
            Reply::Containers { .. } => "containers",
            Reply::Progress { .. } => "progress",
            Reply::Finished => "finished",
            Reply::Failed { .. } => "failed",
            Reply::Error { .. } => "error",
        }
    }
}

/// One framed connection; used by the session and by daemon implementations
pub struct LineChannel<S = TcpStream> {
    stream: BufReader<S>,
}

impl<S> LineChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), RemoteError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.send_raw(&line).await
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), RemoteError> {
        let stream = self.stream.get_mut();
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Next message; `Disconnected` once the peer has closed the stream
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T, RemoteError> {
        let mut line = String::new();
        if self.stream.read_line(&mut line).await? == 0 {
            return Err(RemoteError::Disconnected);
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }

    /// Exactly `len` raw bytes, as sent after a `put` header
    pub async fn recv_raw(&mut self, len: u64) -> Result<Vec<u8>, RemoteError> {
        let len = usize::try_from(len).map_err(|_| RemoteError::Oversized(len))?;
        let mut buf = vec![0u8; len];
        match self.stream.read_exact(&mut buf).await {
            Ok(_) => Ok(buf),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(RemoteError::Disconnected)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn shutdown(&mut self) -> Result<(), RemoteError> {
        self.stream.get_mut().shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let line = serde_json::to_string(&Request::Exec {
            command: "mkdir -p run".into(),
        })
        .unwrap();
        assert_eq!(line, r#"{"op":"exec","command":"mkdir -p run"}"#);

        let bye = serde_json::to_string(&Request::Bye).unwrap();
        assert_eq!(bye, r#"{"op":"bye"}"#);

        let hello: Request = serde_json::from_str(
            r#"{"op":"hello","channel":"transfer","username":"u","password":"p"}"#,
        )
        .unwrap();
        assert!(matches!(
            hello,
            Request::Hello {
                channel: ChannelKind::Transfer,
                ..
            }
        ));
    }

    #[test]
    fn test_reply_wire_format() {
        let reply: Reply = serde_json::from_str(r#"{"status":"progress","time":4}"#).unwrap();
        assert_eq!(reply, Reply::Progress { time: 4 });
        assert_eq!(reply.status(), "progress");

        let done = serde_json::to_string(&Reply::Done {
            code: 1,
            output: "no".into(),
        })
        .unwrap();
        assert_eq!(done, r#"{"status":"done","code":1,"output":"no"}"#);
    }

    #[tokio::test]
    async fn test_framed_exchange_with_payload() {
        let (client, server) = tokio::io::duplex(1024);
        let mut client = LineChannel::new(client);
        let mut server = LineChannel::new(server);

        client
            .send(&Request::Put {
                path: "run/batch.json".into(),
                len: 5,
            })
            .await
            .unwrap();
        client.send_raw(b"hello").await.unwrap();
        client.send(&Request::Bye).await.unwrap();

        let header: Request = server.recv().await.unwrap();
        assert_eq!(
            header,
            Request::Put {
                path: "run/batch.json".into(),
                len: 5
            }
        );
        assert_eq!(server.recv_raw(5).await.unwrap(), b"hello");
        let bye: Request = server.recv().await.unwrap();
        assert_eq!(bye, Request::Bye);

        server.send(&Reply::Finished).await.unwrap();
        let reply: Reply = client.recv().await.unwrap();
        assert_eq!(reply, Reply::Finished);
    }

    #[tokio::test]
    async fn test_closed_peer_is_disconnected() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let mut client = LineChannel::new(client);
        let err = client.recv::<Reply>().await.unwrap_err();
        assert!(matches!(err, RemoteError::Disconnected));
    }
}
