use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::error::{ClusterError, Result};

pub const DEFAULT_PEER_PORTS: [u16; 3] = [5000, 5001, 5002];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub peers: Vec<SocketAddr>,
    pub heartbeat_interval_ms: u64,
    pub missed_heartbeat_threshold: u32,
    pub election_answer_timeout_ms: u64,
    pub victory_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub replica_timeout_ms: u64,
    pub max_frame_bytes: usize,
    pub lock_ttl_secs: u64,
    pub lock_sweep_interval_ms: u64,
    pub replication_factor: usize,
    pub admin_port: Option<u16>,
}

impl Config {
    pub fn new(host: IpAddr, port: u16, peers: Vec<SocketAddr>) -> Self {
        Self {
            host,
            port,
            peers,
            heartbeat_interval_ms: 3000,
            missed_heartbeat_threshold: 2,
            election_answer_timeout_ms: 1500,
            victory_timeout_ms: 3000,
            request_timeout_ms: 2000,
            replica_timeout_ms: 500,
            max_frame_bytes: 64 * 1024 * 1024,
            lock_ttl_secs: 30,
            lock_sweep_interval_ms: 5000,
            replication_factor: 2,
            admin_port: None,
        }
    }

    /// Localhost node with the default three-node candidate list.
    pub fn local(port: u16) -> Self {
        let host = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let peers = DEFAULT_PEER_PORTS
            .iter()
            .map(|p| SocketAddr::new(host, *p))
            .collect();
        Self::new(host, port, peers)
    }

    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn admin_address(&self) -> Option<SocketAddr> {
        self.admin_port.map(|port| SocketAddr::new(self.host, port))
    }

    /// Checks the settings and makes sure the node itself is a member of its
    /// own candidate list.
    pub fn validate(mut self) -> Result<Self> {
        if self.port == 0 {
            return Err(ClusterError::InvalidConfig(
                "port must be non-zero; it is the node id".to_string(),
            ));
        }
        if self.replication_factor == 0 {
            return Err(ClusterError::InvalidConfig(
                "replication factor must be at least 1".to_string(),
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ClusterError::InvalidConfig(
                "heartbeat interval must be non-zero".to_string(),
            ));
        }
        if self.missed_heartbeat_threshold == 0 {
            return Err(ClusterError::InvalidConfig(
                "missed heartbeat threshold must be at least 1".to_string(),
            ));
        }
        // A download may try every replica in turn before answering the
        // client, all inside one client request.
        let replica_budget = self
            .replica_timeout_ms
            .saturating_mul(self.replication_factor as u64);
        if self.replica_timeout_ms == 0 || replica_budget >= self.request_timeout_ms {
            return Err(ClusterError::InvalidConfig(format!(
                "replica timeout {} ms x {} replicas must be non-zero and below \
                 the request timeout {} ms",
                self.replica_timeout_ms, self.replication_factor, self.request_timeout_ms
            )));
        }

        let own = self.address();
        if !self.peers.iter().any(|p| p.port() == own.port()) {
            self.peers.push(own);
        }
        self.peers.sort_by_key(|p| p.port());
        self.peers.dedup_by_key(|p| p.port());
        Ok(self)
    }
}

/// Parses a comma-separated peer list. Each entry is either a bare port
/// (resolved against `host`) or a full `ip:port`.
pub fn parse_peers(list: &str, host: IpAddr) -> Result<Vec<SocketAddr>> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            if let Ok(port) = entry.parse::<u16>() {
                return Ok(SocketAddr::new(host, port));
            }
            entry
                .parse::<SocketAddr>()
                .map_err(|e| ClusterError::InvalidConfig(format!("Invalid peer {}: {}", entry, e)))
        })
        .collect()
}

impl From<Config> for consensus::Config {
    fn from(config: Config) -> Self {
        let address = config.address();
        consensus::Config {
            address,
            peers: config.peers.into_iter().filter(|p| *p != address).collect(),
            heartbeat_interval_ms: config.heartbeat_interval_ms,
            missed_heartbeat_threshold: config.missed_heartbeat_threshold,
            election_answer_timeout_ms: config.election_answer_timeout_ms,
            victory_timeout_ms: config.victory_timeout_ms,
        }
    }
}

impl From<Config> for network::Config {
    fn from(config: Config) -> Self {
        network::Config {
            request_timeout_ms: config.request_timeout_ms,
            max_frame_bytes: config.max_frame_bytes,
        }
    }
}

impl From<Config> for api::Config {
    fn from(config: Config) -> Self {
        api::Config {
            lock_ttl_secs: config.lock_ttl_secs,
            lock_sweep_interval_ms: config.lock_sweep_interval_ms,
            replication_factor: config.replication_factor,
            replica_timeout_ms: config.replica_timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn parses_ports_and_addresses() {
        let peers = parse_peers("5000, 127.0.0.2:5001,", localhost()).unwrap();
        assert_eq!(
            peers,
            vec![
                SocketAddr::new(localhost(), 5000),
                "127.0.0.2:5001".parse().unwrap()
            ]
        );
        assert!(parse_peers("not-a-peer", localhost()).is_err());
    }

    #[test]
    fn validate_adds_self_to_peers() {
        let config = Config::new(localhost(), 5003, parse_peers("5000,5001", localhost()).unwrap())
            .validate()
            .unwrap();
        let ports: Vec<u16> = config.peers.iter().map(|p| p.port()).collect();
        assert_eq!(ports, vec![5000, 5001, 5003]);
    }

    #[test]
    fn replica_attempts_must_fit_in_one_request() {
        let mut config = Config::local(5000);
        config.replica_timeout_ms = 1000;
        assert!(matches!(config.clone().validate(), Err(ClusterError::InvalidConfig(_))));

        config.replica_timeout_ms = 900;
        let api_config: api::Config = config.validate().unwrap().into();
        assert_eq!(api_config.replica_timeout().as_millis(), 900);
    }

    #[test]
    fn validate_rejects_zero_replication() {
        let mut config = Config::local(5000);
        config.replication_factor = 0;
        assert!(matches!(config.validate(), Err(ClusterError::InvalidConfig(_))));
    }
}
