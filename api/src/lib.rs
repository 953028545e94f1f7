//! Coordinator services (locks and replica placement), inbound request
//! dispatch and the admin HTTP surface.

mod error;
mod handlers;
mod locks;
mod replication;
mod server;

pub use error::{ApiError, ApiResult};
pub use handlers::RequestHandler;
pub use locks::{LockEntry, LockManager, LockOutcome, ReleaseOutcome};
pub use replication::{FileRecord, NodeClient, ReplicationCoordinator};
pub use server::{router, AdminServer, AdminState, HealthResponse};

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub lock_ttl_secs: u64,
    pub lock_sweep_interval_ms: u64,
    pub replication_factor: usize,
    pub replica_timeout_ms: u64,
}

impl Config {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn lock_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.lock_sweep_interval_ms)
    }

    pub fn replica_timeout(&self) -> Duration {
        Duration::from_millis(self.replica_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_ttl_secs: 30,
            lock_sweep_interval_ms: 5000,
            replication_factor: 2,
            replica_timeout_ms: 500,
        }
    }
}
