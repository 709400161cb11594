use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;

use crier::{AudioSink, ClientConfig, ClientState, LogSink};
#[cfg(feature = "rodio")]
use crier::RodioSink;

/// Real audio output when the device is usable, logging otherwise.
#[cfg(feature = "rodio")]
fn build_sink() -> Arc<dyn AudioSink> {
    match RodioSink::new() {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            eprintln!("Audio device unavailable ({e}), logging playback instead");
            Arc::new(LogSink)
        }
    }
}

#[cfg(not(feature = "rodio"))]
fn build_sink() -> Arc<dyn AudioSink> {
    Arc::new(LogSink)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Handle CLI arguments
    let mut args = env::args();
    let _ = args.next();
    let mut config_path: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow!("--config requires a file path"))?;
                config_path = Some(PathBuf::from(path));
            }
            other => {
                anyhow::bail!("Unknown option '{other}'. Use --config <file>");
            }
        }
    }

    // Load configuration
    let config = match &config_path {
        Some(path) => ClientConfig::from_file(path).map_err(|e| anyhow!(e.to_string()))?,
        None => ClientConfig::from_env().map_err(|e| anyhow!(e.to_string()))?,
    };
    println!("Starting crier against {}", config.base_url);

    // Create client state and connect
    let client = ClientState::new(config, build_sink()).await;
    let session_id = client.connect().await?;
    println!("Connected, session {session_id}");
    println!("Press Ctrl-C to stop");

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    println!("Shutting down");
    client.shutdown().await;

    Ok(())
}
