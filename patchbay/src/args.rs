use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// An API-translating, capability-aware multiplexing proxy for LLM
/// backends.
#[derive(Debug, Parser)]
#[command(name = "patchbay", version)]
pub(crate) struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "PATCHBAY_CONFIG", default_value = "patchbay.toml")]
    pub(crate) config: PathBuf,

    /// Listen address override, e.g. 127.0.0.1:8000. Defaults to the
    /// configured host and port.
    #[arg(short, long, env = "PATCHBAY_LISTEN")]
    pub(crate) listen: Option<SocketAddr>,

    /// Log filter override, e.g. `info` or `llm=debug,server=info`.
    #[arg(long, env = "PATCHBAY_LOG")]
    pub(crate) log: Option<String>,
}
