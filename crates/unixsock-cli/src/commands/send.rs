use anyhow::{Context, Result};

use unixsock_core::{AppConfig, Client};

pub async fn run(config: &AppConfig, message: &str) -> Result<()> {
    let client = Client::new(config.socket_path());
    let reply = client.send_text(message).await.with_context(|| {
        format!(
            "Failed to reach server at {}. Is it running?",
            client.socket_path().display()
        )
    })?;

    println!("{}", reply);
    Ok(())
}
