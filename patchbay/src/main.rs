use std::net::{IpAddr, SocketAddr};

use args::Args;
use clap::Parser;
use server::ServeConfig;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = config::Config::load(&args.config)?;
    logger::init(args.log.as_deref().unwrap_or(&config.log_level));

    let config_digest = digest_config_file(&args.config)?;
    let listen_address = match args.listen {
        Some(address) => address,
        None => {
            let host: IpAddr = config
                .host
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid host '{}': {e}", config.host))?;
            SocketAddr::new(host, config.port)
        }
    };

    let shutdown_signal = CancellationToken::new();

    {
        let shutdown_signal = shutdown_signal.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Received ctrl-c, shutting down...");
                shutdown_signal.cancel();
            }
        });
    }

    server::serve(ServeConfig {
        listen_address,
        config,
        config_digest,
        shutdown_signal,
        version: env!("CARGO_PKG_VERSION").to_string(),
        bound_addr_sender: None,
    })
    .await
}

/// First 12 hex characters of the SHA-256 of the config file contents,
/// reported on `GET /` so operators can tell which config is live.
fn digest_config_file(path: &std::path::Path) -> anyhow::Result<String> {
    let contents = std::fs::read(path)?;
    let digest = Sha256::digest(&contents);
    let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    Ok(hex[..12].to_string())
}
