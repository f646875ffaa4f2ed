//! Socket path ownership checks
//!
//! Before binding, the path is probed as a client would probe it. A listener
//! that answers owns the path; an entry that refuses connections is either a
//! dead socket left behind by a crashed server, or some unrelated file that
//! must not be touched. Only socket files are ever opened or removed; a FIFO
//! would block a plain open until a writer shows up.

use std::fmt;
use std::io::ErrorKind;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

use serde::Serialize;
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// What currently occupies a socket path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PathState {
    /// Nothing there; safe to bind
    Vacant,
    /// A server accepted the probe connection
    Live,
    /// Refuses connections and is not a socket (regular file, FIFO, directory, ...)
    Foreign,
    /// A socket file nobody listens on
    Stale,
}

impl PathState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathState::Vacant => "vacant",
            PathState::Live => "live",
            PathState::Foreign => "foreign",
            PathState::Stale => "stale",
        }
    }
}

impl fmt::Display for PathState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify the entry at `path` without modifying the filesystem
pub async fn inspect(path: &Path) -> PathState {
    match UnixStream::connect(path).await {
        Ok(_conn) => PathState::Live,
        Err(e) if e.kind() == ErrorKind::ConnectionRefused => classify_refused(path).await,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "No listener at socket path");
            PathState::Vacant
        }
    }
}

/// Make `path` safe to bind, removing a dead socket if one is found
///
/// Fails with [`Error::AlreadyInUse`] when a live server or anything other
/// than a socket occupies the path. Non-socket entries are never deleted.
pub async fn resolve(path: &Path) -> Result<()> {
    match inspect(path).await {
        PathState::Vacant => Ok(()),
        PathState::Live | PathState::Foreign => Err(Error::AlreadyInUse(path.to_path_buf())),
        PathState::Stale => {
            match tokio::fs::remove_file(path).await {
                Ok(()) => info!("Removed stale socket: {}", path.display()),
                // Bind will report the real problem
                Err(e) => warn!("Failed to remove stale socket {}: {}", path.display(), e),
            }
            Ok(())
        }
    }
}

/// Decide what a refusing entry is from its metadata, without opening it
async fn classify_refused(path: &Path) -> PathState {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.file_type().is_socket() => PathState::Stale,
        Ok(_) => PathState::Foreign,
        Err(e) if e.kind() == ErrorKind::NotFound => PathState::Vacant,
        Err(e) => {
            // Unknown entries are left alone
            debug!(path = %path.display(), error = %e, "Cannot stat refusing socket path");
            PathState::Foreign
        }
    }
}
