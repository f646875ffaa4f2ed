use anyhow::Result;
use tracing::{error, info};

use unixsock_core::{AppConfig, ServerBuilder};

pub async fn run(config: &AppConfig, reply: Option<String>) -> Result<()> {
    let server = ServerBuilder::from_config(config)
        .on_failure(|e| error!("Connection failed: {}", e))
        .on_success(move |message, mut writer| {
            let reply = reply.clone();
            async move {
                info!("Received: {}", String::from_utf8_lossy(&message));
                let body = match reply {
                    Some(text) => text.into_bytes(),
                    None => message,
                };
                if let Err(e) = writer.write_all(&body).await {
                    error!("Failed to send reply: {}", e);
                }
            }
        })
        .build()?;

    // Setup signal handler for graceful shutdown
    let handle = server.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            handle.close();
        }
    });

    println!(
        "Serving on {}. Press Ctrl+C to stop.",
        server.socket_path().display()
    );
    server.run().await?;
    println!("Server stopped.");

    Ok(())
}
