use std::time::Duration;

use tokio::net::UnixListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::handler::{handle_connection, Callbacks};

/// Pause before retrying after a failed accept
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Accept connections until shutdown, switching to rebound listeners as they arrive
pub(crate) async fn accept_loop(
    mut listener: UnixListener,
    mut rebound: mpsc::Receiver<UnixListener>,
    mut shutdown: watch::Receiver<bool>,
    callbacks: Callbacks,
    read_chunk_size: usize,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            result = shutdown.changed() => {
                if result.is_err() {
                    break;
                }
            }
            Some(next) = rebound.recv() => {
                debug!("Accept loop switched to rebound listener");
                listener = next;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        tokio::spawn(handle_connection(stream, callbacks.clone(), read_chunk_size));
                    }
                    Err(e) => {
                        // Not fatal; the listener may be mid-replacement
                        warn!("Failed to accept connection: {}", e);
                        pause(ACCEPT_RETRY_DELAY, &mut shutdown).await;
                    }
                }
            }
        }
    }

    info!("Accept loop stopped");
}

/// Sleep for `delay`, waking early if shutdown is signalled
async fn pause(delay: Duration, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = shutdown.changed() => {}
    }
}
