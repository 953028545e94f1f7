use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Granted,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    NotHolder,
}

#[derive(Debug, Clone)]
pub struct LockEntry {
    pub resource_key: String,
    pub holder_id: String,
    pub acquired_at: Instant,
    pub expires_at: Instant,
}

impl LockEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Default)]
struct LockTable {
    term: u64,
    entries: HashMap<String, LockEntry>,
}

impl LockTable {
    /// Drops every lock granted under a different coordinator term.
    fn align_term(&mut self, term: u64) {
        if self.term != term {
            if !self.entries.is_empty() {
                tracing::info!(
                    "Discarding {} locks from term {} (now term {})",
                    self.entries.len(),
                    self.term,
                    term
                );
            }
            self.entries.clear();
            self.term = term;
        }
    }
}

/// Exclusive per-resource locks with a hard expiry, served by the coordinator.
///
/// Every call names the leadership term it runs under: the epoch at which
/// this node took over as coordinator. A table built under another term is
/// discarded first, so locks never outlive a failover but do survive a
/// coordinator re-asserting itself at a later epoch.
pub struct LockManager {
    table: Mutex<LockTable>,
    ttl: Duration,
}

impl LockManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Grants the lock iff no live entry exists for `resource_key`. There is no
    /// re-entrant acquisition, not even by the current holder.
    pub async fn acquire(&self, term: u64, resource_key: &str, client_id: &str) -> LockOutcome {
        let now = Instant::now();
        let mut table = self.table.lock().await;
        table.align_term(term);

        if let Some(existing) = table.entries.get(resource_key) {
            if existing.is_live(now) {
                tracing::debug!(
                    "Lock on {} denied to {}: held by {}",
                    resource_key,
                    client_id,
                    existing.holder_id
                );
                return LockOutcome::Denied;
            }
        }

        table.entries.insert(
            resource_key.to_string(),
            LockEntry {
                resource_key: resource_key.to_string(),
                holder_id: client_id.to_string(),
                acquired_at: now,
                expires_at: now + self.ttl,
            },
        );
        tracing::info!("Lock on {} granted to {}", resource_key, client_id);
        LockOutcome::Granted
    }

    pub async fn release(&self, term: u64, resource_key: &str, client_id: &str) -> ReleaseOutcome {
        let now = Instant::now();
        let mut table = self.table.lock().await;
        table.align_term(term);

        match table.entries.get(resource_key) {
            Some(entry) if entry.is_live(now) && entry.holder_id == client_id => {
                table.entries.remove(resource_key);
                tracing::info!("Lock on {} released by {}", resource_key, client_id);
                ReleaseOutcome::Released
            }
            Some(entry) if !entry.is_live(now) => {
                table.entries.remove(resource_key);
                ReleaseOutcome::NotHolder
            }
            _ => ReleaseOutcome::NotHolder,
        }
    }

    /// Live entry for `resource_key`, if any.
    pub async fn holder(&self, resource_key: &str) -> Option<LockEntry> {
        let now = Instant::now();
        let table = self.table.lock().await;
        table
            .entries
            .get(resource_key)
            .filter(|entry| entry.is_live(now))
            .cloned()
    }

    /// Empties the table and binds it to `term`.
    pub async fn reset(&self, term: u64) {
        let mut table = self.table.lock().await;
        table.entries.clear();
        table.term = term;
    }

    /// Removes expired entries and returns how many were dropped.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut table = self.table.lock().await;
        let before = table.entries.len();
        table.entries.retain(|_, entry| entry.is_live(now));
        let removed = before - table.entries.len();
        if removed > 0 {
            tracing::debug!("Swept {} expired locks", removed);
        }
        removed
    }

    pub async fn run_sweeper(self: Arc<Self>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.sweep_expired().await;
        }
    }
}
