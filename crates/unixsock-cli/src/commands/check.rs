use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;

use unixsock_core::server::{inspect, PathState};
use unixsock_core::AppConfig;

#[derive(Serialize)]
struct CheckReport {
    socket_path: PathBuf,
    state: PathState,
}

pub async fn run(config: &AppConfig, json: bool) -> Result<()> {
    let socket_path = config.socket_path();
    let state = inspect(&socket_path).await;

    if json {
        let report = CheckReport { socket_path, state };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let detail = match state {
        PathState::Vacant => "nothing there; a server can bind it",
        PathState::Live => "a server is accepting connections",
        PathState::Foreign => "occupied by a regular file; it will not be touched",
        PathState::Stale => "dead socket; the next server will remove it",
    };
    println!("{}: {} ({})", socket_path.display(), state, detail);
    Ok(())
}
