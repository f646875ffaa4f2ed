//! Client side of the single-message exchange
//!
//! Connect, write the message, half-close, then read the reply until the
//! server closes the connection.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

use crate::server::{inspect, PathState};
use crate::Result;

/// Initial reply buffer size
const REPLY_CHUNK: usize = 1024;

/// Client bound to one server socket path
#[derive(Debug, Clone)]
pub struct Client {
    socket_path: PathBuf,
}

impl Client {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send a message and wait for the full reply
    pub async fn send(&self, message: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        send(&self.socket_path, message.as_ref()).await
    }

    /// Like [`Client::send`], decoding the reply as UTF-8 (lossy)
    pub async fn send_text(&self, message: impl AsRef<[u8]>) -> Result<String> {
        let reply = self.send(message).await?;
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }
}

/// One-shot exchange with the server at `socket_path`
pub async fn send(socket_path: &Path, message: &[u8]) -> Result<Vec<u8>> {
    let mut stream = UnixStream::connect(socket_path).await?;

    stream.write_all(message).await?;
    // Half-close: the server reads until it sees end-of-stream
    stream.shutdown().await?;

    let mut reply = BytesMut::with_capacity(REPLY_CHUNK);
    loop {
        match stream.read_buf(&mut reply).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    debug!(sent = message.len(), received = reply.len(), "Exchange complete");
    Ok(reply.to_vec())
}

/// Check if a server is accepting connections at `socket_path`
pub async fn is_listening(socket_path: &Path) -> bool {
    inspect(socket_path).await == PathState::Live
}
