use clap::{Arg, ArgMatches, Command};
use dfs_cluster::{parse_peers, ClusterError, Config, Node};
use std::net::IpAddr;
use std::str::FromStr;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ClusterError> {
    dfs_cluster::init_tracing();

    let matches = Command::new("dfs-node")
        .version("0.1.0")
        .about("Storage node of a replicated file cluster with Bully leader election")
        .arg(
            Arg::new("port")
                .long("port")
                .help("Port to listen on; also the node's election priority")
                .required(true),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .help("Address to bind")
                .default_value("127.0.0.1"),
        )
        .arg(
            Arg::new("peers")
                .long("peers")
                .help("Comma-separated candidate list (ports or ip:port)")
                .default_value("5000,5001,5002"),
        )
        .arg(
            Arg::new("heartbeat-ms")
                .long("heartbeat-ms")
                .help("Heartbeat probe interval in milliseconds")
                .default_value("3000"),
        )
        .arg(
            Arg::new("missed-heartbeats")
                .long("missed-heartbeats")
                .help("Consecutive misses before a node is marked dead")
                .default_value("2"),
        )
        .arg(
            Arg::new("election-timeout-ms")
                .long("election-timeout-ms")
                .help("How long a candidate waits for an ANSWER")
                .default_value("1500"),
        )
        .arg(
            Arg::new("victory-timeout-ms")
                .long("victory-timeout-ms")
                .help("How long to wait for COORDINATOR after an ANSWER")
                .default_value("3000"),
        )
        .arg(
            Arg::new("request-timeout-ms")
                .long("request-timeout-ms")
                .help("Bound on every outbound request")
                .default_value("2000"),
        )
        .arg(
            Arg::new("replica-timeout-ms")
                .long("replica-timeout-ms")
                .help("Bound on each coordinator-to-replica request")
                .default_value("500"),
        )
        .arg(
            Arg::new("lock-ttl-secs")
                .long("lock-ttl-secs")
                .help("Safety-net expiry of file locks")
                .default_value("30"),
        )
        .arg(
            Arg::new("replication-factor")
                .long("replication-factor")
                .help("Replicas per uploaded file")
                .default_value("2"),
        )
        .arg(
            Arg::new("admin-port")
                .long("admin-port")
                .help("Port for the HTTP status endpoint (disabled when absent)"),
        )
        .get_matches();

    let config = build_config(&matches)?;
    info!("Node configuration: {:?}", config);

    let node = Node::bind(config).await?;
    let running = node.start().await?;
    running.wait_for_shutdown().await
}

fn build_config(matches: &ArgMatches) -> Result<Config, ClusterError> {
    let host_arg = string_arg(matches, "host")?;
    let host = IpAddr::from_str(&host_arg)
        .map_err(|e| ClusterError::InvalidConfig(format!("Invalid host {}: {}", host_arg, e)))?;
    let port: u16 = number_arg(matches, "port")?;
    let peers = parse_peers(&string_arg(matches, "peers")?, host)?;

    let mut config = Config::new(host, port, peers);
    config.heartbeat_interval_ms = number_arg(matches, "heartbeat-ms")?;
    config.missed_heartbeat_threshold = number_arg(matches, "missed-heartbeats")?;
    config.election_answer_timeout_ms = number_arg(matches, "election-timeout-ms")?;
    config.victory_timeout_ms = number_arg(matches, "victory-timeout-ms")?;
    config.request_timeout_ms = number_arg(matches, "request-timeout-ms")?;
    config.replica_timeout_ms = number_arg(matches, "replica-timeout-ms")?;
    config.lock_ttl_secs = number_arg(matches, "lock-ttl-secs")?;
    config.replication_factor = number_arg(matches, "replication-factor")?;
    if matches.contains_id("admin-port") {
        config.admin_port = Some(number_arg(matches, "admin-port")?);
    }

    config.validate()
}

fn string_arg(matches: &ArgMatches, name: &str) -> Result<String, ClusterError> {
    matches
        .get_one::<String>(name)
        .cloned()
        .ok_or_else(|| ClusterError::InvalidConfig(format!("Missing --{}", name)))
}

fn number_arg<T>(matches: &ArgMatches, name: &str) -> Result<T, ClusterError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    string_arg(matches, name)?
        .parse::<T>()
        .map_err(|e| ClusterError::InvalidConfig(format!("Invalid --{}: {}", name, e)))
}
