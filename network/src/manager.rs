use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

use crate::communication::{read_frame, write_frame, MessageHandler};
use crate::{Config, NetworkMessage, Result};

/// Accept loop for a node. Each inbound connection carries exactly one
/// request and is served on its own task.
pub struct NetworkManager {
    listener: TcpListener,
    local_addr: SocketAddr,
    max_frame_bytes: usize,
}

impl NetworkManager {
    pub async fn bind(address: SocketAddr, config: &Config) -> Result<Self> {
        let listener = TcpListener::bind(address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Listening for cluster traffic on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            max_frame_bytes: config.max_frame_bytes,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn serve(self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!("Failed to accept connection on {}: {}", self.local_addr, e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let handler = handler.clone();
            let max_frame_bytes = self.max_frame_bytes;
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, handler, max_frame_bytes).await {
                    tracing::debug!("Connection from {} ended with error: {}", peer, e);
                }
            });
        }
    }

    async fn handle_connection(
        mut stream: TcpStream,
        handler: Arc<dyn MessageHandler>,
        max_frame_bytes: usize,
    ) -> Result<()> {
        let message: NetworkMessage = read_frame(&mut stream, max_frame_bytes).await?;
        let response = handler.handle(message).await;
        write_frame(&mut stream, &response).await
    }
}
