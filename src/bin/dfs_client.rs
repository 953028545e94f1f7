use bytes::Bytes;
use clap::{Arg, ArgMatches, Command};
use dfs_cluster::{parse_peers, ClusterClient, ClusterError};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

#[tokio::main]
async fn main() -> Result<(), ClusterError> {
    dfs_cluster::init_tracing();

    let matches = Command::new("dfs-client")
        .version("0.1.0")
        .about("Upload and download files through the cluster coordinator")
        .arg(
            Arg::new("peers")
                .long("peers")
                .help("Comma-separated coordinator candidates (ports or ip:port)")
                .default_value("5000,5001,5002")
                .global(true),
        )
        .arg(
            Arg::new("request-timeout-ms")
                .long("request-timeout-ms")
                .default_value("2000")
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("upload")
                .about("Upload a local file under its file name")
                .arg(Arg::new("path").required(true))
                .arg(Arg::new("name").long("name").help("Name to store the file under")),
        )
        .subcommand(
            Command::new("download")
                .about("Download a file by name")
                .arg(Arg::new("name").required(true))
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .help("Write to this path instead of stdout"),
                ),
        )
        .subcommand(
            Command::new("locate")
                .about("Show which nodes hold a file")
                .arg(Arg::new("name").required(true)),
        )
        .subcommand(Command::new("nodes").about("List cluster members"))
        .subcommand(Command::new("coordinator").about("Show the current coordinator"))
        .get_matches();

    let client = build_client(&matches)?;

    match matches.subcommand() {
        Some(("upload", sub)) => {
            let path = required(sub, "path")?;
            let name = match sub.get_one::<String>("name") {
                Some(name) => name.clone(),
                None => Path::new(&path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| {
                        ClusterError::InvalidConfig(format!("No file name in {}", path))
                    })?,
            };
            let data = tokio::fs::read(&path).await?;
            let receipt = client.upload(&name, Bytes::from(data)).await?;
            let replicas: Vec<String> = receipt.replicas.iter().map(|id| id.to_string()).collect();
            println!(
                "Uploaded {} (version {}) to nodes {}",
                name,
                receipt.version,
                replicas.join(", ")
            );
        }
        Some(("download", sub)) => {
            let name = required(sub, "name")?;
            let data = client.download(&name).await?;
            match sub.get_one::<String>("output") {
                Some(output) => {
                    tokio::fs::write(output, &data).await?;
                    println!("Downloaded {} ({} bytes) to {}", name, data.len(), output);
                }
                None => println!("{}", String::from_utf8_lossy(&data)),
            }
        }
        Some(("locate", sub)) => {
            let name = required(sub, "name")?;
            let replicas = client.locate(&name).await?;
            let replicas: Vec<String> = replicas.iter().map(|id| id.to_string()).collect();
            println!("{}: {}", name, replicas.join(", "));
        }
        Some(("nodes", _)) => {
            for node in client.list_nodes().await? {
                println!(
                    "{} {} {:?} alive={} missed={}",
                    node.id, node.address, node.role, node.alive, node.missed_heartbeats
                );
            }
        }
        Some(("coordinator", _)) => {
            let (id, address) = client.coordinator().await?;
            println!("Coordinator is node {} at {}", id, address);
        }
        _ => unreachable!("subcommand_required"),
    }

    Ok(())
}

fn build_client(matches: &ArgMatches) -> Result<ClusterClient, ClusterError> {
    let host = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let peers = parse_peers(&required(matches, "peers")?, host)?;
    let request_timeout_ms = required(matches, "request-timeout-ms")?
        .parse::<u64>()
        .map_err(|e| ClusterError::InvalidConfig(format!("Invalid --request-timeout-ms: {}", e)))?;

    let config = network::Config {
        request_timeout_ms,
        ..network::Config::default()
    };
    Ok(ClusterClient::new(peers, &config))
}

fn required(matches: &ArgMatches, name: &str) -> Result<String, ClusterError> {
    matches
        .get_one::<String>(name)
        .cloned()
        .ok_or_else(|| ClusterError::InvalidConfig(format!("Missing {}", name)))
}
