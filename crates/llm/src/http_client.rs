use std::{sync::OnceLock, time::Duration};

use reqwest::Client;

/// Common HTTP client to re-use the same upstream connections across
/// requests. Per-attempt deadlines are set on each request; the client
/// itself only carries connection tuning.
pub(crate) fn http_client() -> reqwest::Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            Client::builder()
                .pool_idle_timeout(Some(Duration::from_secs(5)))
                .tcp_nodelay(true)
                .tcp_keepalive(Some(Duration::from_secs(60)))
                .build()
                .expect("Failed to build default HTTP client")
        })
        .clone()
}
