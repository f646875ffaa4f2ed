use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use super::accept::accept_loop;
use super::handler::{BoxFuture, Callbacks, FailureCallback, ReplyWriter, SuccessCallback};
use super::monitor::PathMonitor;
use super::{listener, resolver};
use crate::config::{AppConfig, ServerConfig};
use crate::{Error, Result};

struct Shared {
    socket_path: PathBuf,
    shutdown: watch::Sender<bool>,
    /// Set once this server has bound the path, so close never removes a
    /// socket owned by someone else
    bound: AtomicBool,
}

/// Cloneable handle for stopping a running [`Server`] from another task
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

impl ServerHandle {
    /// Request shutdown and remove the socket file
    ///
    /// Idempotent and non-blocking; [`Server::run`] returns shortly after.
    pub fn close(&self) {
        let already_closed = self.shared.shutdown.send_replace(true);
        if !already_closed {
            info!("Closing server at {}", self.shared.socket_path.display());
        }
        if self.shared.bound.load(Ordering::SeqCst) {
            let _ = std::fs::remove_file(&self.shared.socket_path);
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.shutdown.borrow()
    }

    pub fn socket_path(&self) -> &Path {
        &self.shared.socket_path
    }
}

/// Single-message Unix socket server
///
/// Built with [`Server::builder`]. A server runs at most once; after
/// [`Server::run`] returns, build a new one.
pub struct Server {
    handle: ServerHandle,
    callbacks: Callbacks,
    poll_interval: Duration,
    read_chunk_size: usize,
    started: AtomicBool,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Bind the socket path and serve until closed or a fatal monitor error
    ///
    /// Fails immediately with [`Error::AlreadyInUse`] if a live server or an
    /// unrelated file occupies the path, and with [`Error::Bind`] if the
    /// listener cannot be created.
    pub async fn run(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }

        let shared = &self.handle.shared;
        let path = &shared.socket_path;

        if *shared.shutdown.borrow() {
            debug!("Close requested before start");
            return Ok(());
        }

        resolver::resolve(path).await?;
        let listener = listener::bind(path)?;
        shared.bound.store(true, Ordering::SeqCst);

        if *shared.shutdown.borrow() {
            drop(listener);
            let _ = std::fs::remove_file(path);
            return Ok(());
        }

        info!("Server listening on: {}", path.display());

        let (rebound_tx, rebound_rx) = mpsc::channel(1);
        let accept = tokio::spawn(accept_loop(
            listener,
            rebound_rx,
            shared.shutdown.subscribe(),
            self.callbacks.clone(),
            self.read_chunk_size,
        ));
        let monitor = tokio::spawn(
            PathMonitor::new(
                path.clone(),
                self.poll_interval,
                shared.shutdown.subscribe(),
                rebound_tx,
            )
            .run(),
        );

        let outcome = match monitor.await {
            Ok(outcome) => outcome,
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        };

        // A monitor failure leaves the accept loop running otherwise
        shared.shutdown.send_replace(true);
        let _ = accept.await;

        match &outcome {
            Ok(()) => info!("Server stopped"),
            Err(e) => error!("Server terminated: {}", e),
        }
        outcome
    }

    pub fn close(&self) {
        self.handle.close();
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn socket_path(&self) -> &Path {
        self.handle.socket_path()
    }
}

/// Validated construction of a [`Server`]
pub struct ServerBuilder {
    socket_path: Option<PathBuf>,
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
    poll_interval: Duration,
    read_chunk_size: usize,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let defaults = ServerConfig::default();
        Self {
            socket_path: None,
            on_success: None,
            on_failure: None,
            poll_interval: defaults.poll_interval(),
            read_chunk_size: defaults.read_chunk_size,
        }
    }

    /// Start from the socket path and tuning values in `config`
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new()
            .socket_path(config.socket_path())
            .poll_interval(config.server.poll_interval())
            .read_chunk_size(config.server.read_chunk_size)
    }

    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    /// Called with every non-empty message and a write-only reply handle
    pub fn on_success<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(Vec<u8>, ReplyWriter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_success = Some(Arc::new(move |message: Vec<u8>, reply: ReplyWriter| -> BoxFuture {
            Box::pin(callback(message, reply))
        }));
        self
    }

    /// Called when reading a connection fails
    pub fn on_failure<F>(mut self, callback: F) -> Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Result<Server> {
        let on_failure = self
            .on_failure
            .ok_or_else(|| Error::Config("failure callback is not set".to_string()))?;
        let on_success = self
            .on_success
            .ok_or_else(|| Error::Config("success callback is not set".to_string()))?;
        let socket_path = self
            .socket_path
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| Error::Config("socket path is not set".to_string()))?;
        listener::validate_path(&socket_path)?;

        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be greater than zero".to_string()));
        }
        if self.read_chunk_size == 0 {
            return Err(Error::Config("read chunk size must be greater than zero".to_string()));
        }

        let (shutdown, _) = watch::channel(false);
        Ok(Server {
            handle: ServerHandle {
                shared: Arc::new(Shared {
                    socket_path,
                    shutdown,
                    bound: AtomicBool::new(false),
                }),
            },
            callbacks: Callbacks {
                on_success,
                on_failure,
            },
            poll_interval: self.poll_interval,
            read_chunk_size: self.read_chunk_size,
            started: AtomicBool::new(false),
        })
    }
}
