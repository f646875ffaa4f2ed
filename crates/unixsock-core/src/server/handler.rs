//! Per-connection message handling
//!
//! A connection carries exactly one message in each direction. The handler
//! drains the stream until the peer half-closes, then hands the accumulated
//! bytes to the success callback together with a write-only reply handle.

use std::fmt;
use std::future::Future;
use std::io::{self, ErrorKind};
use std::pin::Pin;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, debug_span, warn, Instrument};
use uuid::Uuid;

use crate::Error;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Invoked with each complete message and a handle for the reply
pub type SuccessCallback = Arc<dyn Fn(Vec<u8>, ReplyWriter) -> BoxFuture + Send + Sync>;

/// Invoked when reading a connection fails
pub type FailureCallback = Arc<dyn Fn(Error) + Send + Sync>;

type WriteSlot = Arc<Mutex<Option<Box<dyn AsyncWrite + Send + Unpin>>>>;

/// Write-only handle onto an accepted connection
///
/// The connection is owned by its handler, which closes it once the success
/// callback returns. A handle kept past that point fails every write with
/// [`ErrorKind::NotConnected`].
pub struct ReplyWriter {
    slot: WriteSlot,
}

impl ReplyWriter {
    fn new(slot: WriteSlot) -> Self {
        Self { slot }
    }

    pub async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.slot.lock().await.as_mut() {
            Some(inner) => inner.write(buf).await,
            None => Err(closed()),
        }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self.slot.lock().await.as_mut() {
            Some(inner) => inner.write_all(buf).await,
            None => Err(closed()),
        }
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        match self.slot.lock().await.as_mut() {
            Some(inner) => inner.flush().await,
            None => Err(closed()),
        }
    }
}

impl fmt::Debug for ReplyWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyWriter").finish_non_exhaustive()
    }
}

fn closed() -> io::Error {
    io::Error::new(ErrorKind::NotConnected, "connection already closed by its handler")
}

#[derive(Clone)]
pub(crate) struct Callbacks {
    pub on_success: SuccessCallback,
    pub on_failure: FailureCallback,
}

pub(crate) async fn handle_connection(stream: UnixStream, callbacks: Callbacks, chunk_size: usize) {
    let span = debug_span!("conn", id = %Uuid::new_v4());
    async move {
        let (mut reader, writer) = stream.into_split();
        dispatch(&mut reader, writer, &callbacks, chunk_size).await;
        debug!("Connection closed");
    }
    .instrument(span)
    .await
}

/// Read one message from `reader` and route it to the matching callback
///
/// The write side is shut down before returning, whatever the callback did
/// with its reply handle.
pub(crate) async fn dispatch<R, W>(reader: &mut R, writer: W, callbacks: &Callbacks, chunk_size: usize)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let slot: WriteSlot = Arc::new(Mutex::new(Some(Box::new(writer))));

    match read_message(reader, chunk_size).await {
        Ok(message) if message.is_empty() => {
            debug!("Peer closed without sending data");
        }
        Ok(message) => {
            debug!(bytes = message.len(), "Received message");
            (callbacks.on_success)(message, ReplyWriter::new(slot.clone())).await;
        }
        Err(e) => {
            warn!("Failed to read message: {}", e);
            (callbacks.on_failure)(Error::Io(e));
        }
    }

    let writer = slot.lock().await.take();
    if let Some(mut writer) = writer {
        if let Err(e) = writer.shutdown().await {
            debug!("Failed to shut down reply stream: {}", e);
        }
    }
}

/// Read until end-of-stream, `chunk_size` bytes at a time
pub(crate) async fn read_message<R>(reader: &mut R, chunk_size: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut message = BytesMut::new();
    let mut chunk = vec![0u8; chunk_size.max(1)];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => return Ok(message.to_vec()),
            Ok(n) => message.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::ReadBuf;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    /// Yields some bytes, then fails the way a reset connection does
    struct ResetAfter {
        data: Option<&'static [u8]>,
    }

    impl AsyncRead for ResetAfter {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.data.take() {
                Some(data) => {
                    buf.put_slice(data);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Ready(Err(io::Error::from(ErrorKind::ConnectionReset))),
            }
        }
    }

    fn recording_callbacks(reply: &'static [u8]) -> (Callbacks, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let on_success: SuccessCallback = Arc::new(move |message: Vec<u8>, mut writer: ReplyWriter| -> BoxFuture {
            let tx = tx.clone();
            Box::pin(async move {
                tx.send(message).unwrap();
                writer.write_all(reply).await.unwrap();
            })
        });
        let on_failure: FailureCallback = Arc::new(|e: Error| panic!("unexpected failure: {e}"));
        (Callbacks { on_success, on_failure }, rx)
    }

    #[tokio::test]
    async fn test_read_message_spans_chunks() {
        let mut input: &[u8] = b"a message longer than one chunk";
        let message = read_message(&mut input, 4).await.unwrap();
        assert_eq!(message, b"a message longer than one chunk");
    }

    #[tokio::test]
    async fn test_read_message_empty_stream() {
        let mut input: &[u8] = b"";
        assert!(read_message(&mut input, 128).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_message_propagates_errors() {
        let mut reader = ResetAfter { data: Some(b"partial") };
        let err = read_message(&mut reader, 128).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn test_handler_replies_on_same_connection() {
        let (server_side, mut client_side) = UnixStream::pair().unwrap();
        let (callbacks, mut received) = recording_callbacks(b"pong");

        let handler = tokio::spawn(handle_connection(server_side, callbacks, 3));

        client_side.write_all(b"ping ping").await.unwrap();
        client_side.shutdown().await.unwrap();
        let mut reply = Vec::new();
        client_side.read_to_end(&mut reply).await.unwrap();

        handler.await.unwrap();
        assert_eq!(received.recv().await.unwrap(), b"ping ping");
        assert_eq!(reply, b"pong");
    }

    #[tokio::test]
    async fn test_empty_message_invokes_no_callback() {
        let (server_side, client_side) = UnixStream::pair().unwrap();
        let (callbacks, mut received) = recording_callbacks(b"unused");

        drop(client_side);
        handle_connection(server_side, callbacks, 128).await;

        assert!(received.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_read_error_invokes_failure_callback() {
        let (failures_tx, mut failures) = mpsc::unbounded_channel();
        let on_success: SuccessCallback = Arc::new(|_message: Vec<u8>, _writer: ReplyWriter| -> BoxFuture {
            panic!("success callback called for a broken connection")
        });
        let on_failure: FailureCallback = Arc::new(move |e: Error| failures_tx.send(e).unwrap());
        let callbacks = Callbacks { on_success, on_failure };

        let mut reader = ResetAfter { data: Some(b"partial") };
        dispatch(&mut reader, tokio::io::sink(), &callbacks, 4).await;

        let err = failures.try_recv().unwrap();
        assert!(matches!(err, Error::Io(e) if e.kind() == ErrorKind::ConnectionReset));
        assert!(failures.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connection_closed_when_callback_keeps_writer() {
        let (server_side, mut client_side) = UnixStream::pair().unwrap();
        let (late_tx, mut late_write) = mpsc::unbounded_channel();
        let on_success: SuccessCallback = Arc::new(move |_message: Vec<u8>, mut writer: ReplyWriter| -> BoxFuture {
            let late_tx = late_tx.clone();
            Box::pin(async move {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    late_tx.send(writer.write_all(b"too late").await).unwrap();
                });
            })
        });
        let on_failure: FailureCallback = Arc::new(|e: Error| panic!("unexpected failure: {e}"));
        let callbacks = Callbacks { on_success, on_failure };

        tokio::spawn(handle_connection(server_side, callbacks, 128));

        client_side.write_all(b"hi").await.unwrap();
        client_side.shutdown().await.unwrap();
        let mut reply = Vec::new();
        timeout(Duration::from_secs(1), client_side.read_to_end(&mut reply))
            .await
            .expect("connection still open after the handler returned")
            .unwrap();
        assert!(reply.is_empty());

        let late = timeout(Duration::from_secs(1), late_write.recv()).await.unwrap().unwrap();
        assert_eq!(late.unwrap_err().kind(), ErrorKind::NotConnected);
    }
}
