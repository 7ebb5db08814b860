//! Headless viewer example - connect, decode updates, log events.
//!
//! Usage:
//!   cargo run --example headless_connect -- localhost:5900

use rfb_client::{ServerEvent, ViewerSession};
use std::env;
use tokio::net::TcpStream;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let addr = env::args().nth(1).unwrap_or_else(|| {
        eprintln!("Usage: headless_connect <host>:<port>");
        std::process::exit(1);
    });

    let socket = TcpStream::connect(&addr).await?;
    let mut session = ViewerSession::connect(socket, true, None).await?;
    info!(
        name = session.name(),
        "connected, requesting updates"
    );

    // Tight, RRE and Raw, plus the pseudo-encodings we understand.
    session
        .set_encodings(&[7, 2, 0, -223, -239, -240, -232])
        .await?;
    session.request_update(false).await?;

    while let Some(event) = session.next_event().await? {
        match event {
            ServerEvent::FramebufferUpdated { rects } => {
                info!(count = rects.len(), "framebuffer updated");
                session.request_update(true).await?;
            }
            ServerEvent::DesktopResized { width, height } => {
                info!(width, height, "desktop resized");
            }
            ServerEvent::Bell => info!("bell"),
            ServerEvent::CutText(text) => info!(len = text.len(), "cut text"),
            other => info!(?other, "event"),
        }
    }
    info!("server closed the connection");
    Ok(())
}
