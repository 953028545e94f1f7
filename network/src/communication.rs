use async_trait::async_trait;
use consensus::{ConsensusError, ConsensusMessage, PeerTransport};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::{Config, NetworkError, NetworkMessage, NetworkResponse, Result};

/// Serves one inbound request and produces its response.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: NetworkMessage) -> NetworkResponse;
}

/// Connection-per-request TCP client. Connect, write and read are all
/// bounded together by a single per-call timeout; no retries.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    timeout: Duration,
    max_frame_bytes: usize,
}

impl TcpTransport {
    pub fn new(config: &Config) -> Self {
        Self {
            timeout: config.request_timeout(),
            max_frame_bytes: config.max_frame_bytes,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn request(
        &self,
        address: SocketAddr,
        message: &NetworkMessage,
    ) -> Result<NetworkResponse> {
        match tokio::time::timeout(self.timeout, self.exchange(address, message)).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout(address)),
        }
    }

    async fn exchange(
        &self,
        address: SocketAddr,
        message: &NetworkMessage,
    ) -> Result<NetworkResponse> {
        let mut stream = TcpStream::connect(address)
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", address, e)))?;
        stream.set_nodelay(true)?;

        write_frame(&mut stream, message).await?;
        read_frame(&mut stream, self.max_frame_bytes).await
    }
}

#[async_trait]
impl PeerTransport for TcpTransport {
    async fn send(
        &self,
        to: SocketAddr,
        message: ConsensusMessage,
    ) -> consensus::Result<ConsensusMessage> {
        match self.request(to, &NetworkMessage::Consensus(message)).await {
            Ok(NetworkResponse::Consensus(reply)) => Ok(reply),
            Ok(other) => Err(ConsensusError::InvalidMessage(format!(
                "{} replied {} to a consensus message",
                to,
                other.kind()
            ))),
            Err(e) => Err(ConsensusError::Network(e.to_string())),
        }
    }
}

/// Writes `value` as an 8-byte big-endian length followed by its bincode body.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = bincode::serialize(value)?;
    writer.write_u64(body.len() as u64).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R, T>(reader: &mut R, max_frame_bytes: usize) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = reader.read_u64().await?;
    if len > max_frame_bytes as u64 {
        return Err(NetworkError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(bincode::deserialize(&body)?)
}
