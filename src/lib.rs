pub mod client;
pub mod config;
pub mod error;
pub mod node;

pub use client::{ClusterClient, UploadReceipt};
pub use config::{parse_peers, Config};
pub use error::{ClusterError, Result};
pub use node::{Node, RunningNode};

// Re-export key types from workspace crates
pub use api;
pub use consensus;
pub use network;
pub use storage;

/// Installs the `tracing` fmt subscriber, honoring `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
