//! Patchbay server library.
//!
//! Assembles the HTTP surface around the llm engine: CORS and OPTIONS
//! handling, the root/health/test-connection endpoints, the JSON 404
//! fallback, optional TLS, and graceful shutdown.

#![deny(missing_docs)]

mod info;

use std::{net::SocketAddr, sync::Arc};

use anyhow::anyhow;
use axum::{Router, routing::get};
use axum_server::tls_rustls::RustlsConfig;
use config::Config;
use llm::ProxyState;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

/// Configuration for serving patchbay.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to.
    pub listen_address: SocketAddr,
    /// The deserialized patchbay TOML configuration.
    pub config: Config,
    /// Digest of the loaded configuration file, reported on `GET /`.
    pub config_digest: String,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// The version string to log on startup.
    pub version: String,
    /// Optional oneshot sender for the bound address (useful with port 0).
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
}

/// Starts and runs the patchbay server with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        config_digest,
        shutdown_signal,
        version,
        bound_addr_sender,
    }: ServeConfig,
) -> anyhow::Result<()> {
    log::info!("Patchbay {version}");

    let tls = config.https_enabled.then(|| {
        (
            config.ssl_cert_file.clone(),
            config.ssl_key_file.clone(),
            config.ssl_ca_file.clone(),
        )
    });

    let state = Arc::new(ProxyState::new(config).map_err(|e| anyhow!("Failed to initialize the engine: {e}"))?);

    let app = Router::new()
        .merge(llm::router(state.clone()))
        .route("/", get(info::root))
        .route("/health", get(info::health))
        .route("/test-connection", get(info::test_connection))
        .fallback(info::fallback)
        // OPTIONS on a known path would otherwise answer 405.
        .method_not_allowed_fallback(info::fallback)
        .layer(axum::Extension(Arc::new(info::AppInfo {
            version,
            config_digest,
        })))
        .layer(axum::Extension(state))
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    if let Some(sender) = bound_addr_sender {
        sender
            .send(listener.local_addr()?)
            .map_err(|_| anyhow!("Failed to send back bound address"))?;
    }

    match tls {
        Some((cert_file, key_file, ca_file)) => {
            let cert_file = cert_file.ok_or_else(|| anyhow!("https_enabled requires ssl_cert_file"))?;
            let key_file = key_file.ok_or_else(|| anyhow!("https_enabled requires ssl_key_file"))?;

            if let Some(ca_file) = ca_file {
                log::info!("ssl_ca_file {} is accepted but not used for server TLS", ca_file.display());
            }

            let rustls_config = RustlsConfig::from_pem_file(&cert_file, &key_file)
                .await
                .map_err(|e| anyhow!("Failed to load TLS certificate and key: {e}"))?;

            log::info!("Anthropic endpoint: https://{listen_address}/v1/messages");
            log::info!("OpenAI endpoint: https://{listen_address}/v1/chat/completions");

            let server = axum_server::from_tcp_rustls(listener.into_std()?, rustls_config)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>());

            tokio::select! {
                result = server => {
                    result.map_err(|e| anyhow!("Failed to start HTTPS server: {e}"))?;
                }
                () = shutdown_signal.cancelled() => {
                    log::info!("Received shutdown signal, shutting down gracefully...");
                }
            }
        }
        None => {
            log::info!("Anthropic endpoint: http://{listen_address}/v1/messages");
            log::info!("OpenAI endpoint: http://{listen_address}/v1/chat/completions");

            tokio::select! {
                result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()) => {
                    result.map_err(|e| anyhow!("Failed to start HTTP server: {e}"))?;
                }
                () = shutdown_signal.cancelled() => {
                    log::info!("Received shutdown signal, shutting down gracefully...");
                }
            }
        }
    }

    Ok(())
}
