//! Transport abstraction for the query protocol.
//!
//! The transport layer handles message serialization and delivery.
//! Implementations may use WebSockets, QUIC, or any other transport.

use async_trait::async_trait;

use crate::error::QueryError;
use crate::messages::{NodeId, SystemMessage};

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, QueryError>;

/// Transport trait for sending and receiving protocol messages.
///
/// Implementations must be thread-safe (Send + Sync). Delivery between a
/// pair of nodes must preserve send order.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to a specific peer.
    async fn send(&self, peer: &NodeId, message: SystemMessage) -> Result<()>;

    /// Receive the next message from any peer.
    ///
    /// Returns the sender's NodeId and the message.
    /// Blocks until a message is available or an error occurs.
    async fn recv(&self) -> Result<(NodeId, SystemMessage)>;

    /// Get the local node's identity.
    fn local_node_id(&self) -> NodeId;

    /// List currently connected peers.
    async fn connected_peers(&self) -> Result<Vec<NodeId>>;
}

/// A simple in-memory transport for testing.
///
/// Messages travel as CBOR bytes, so everything a real transport would
/// reject on encode or decode is rejected here too.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex, RwLock};

    #[derive(Debug)]
    struct Envelope {
        from: NodeId,
        bytes: Vec<u8>,
    }

    /// Shared state for the memory transport network.
    #[derive(Default)]
    pub struct MemoryNetwork {
        /// Sender channels for each node.
        senders: RwLock<HashMap<NodeId, mpsc::Sender<Envelope>>>,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a transport connected to this network.
        pub async fn create_transport(self: &Arc<Self>, node_id: NodeId) -> MemoryTransport {
            let (tx, rx) = mpsc::channel(1000);

            self.senders.write().await.insert(node_id, tx);

            MemoryTransport {
                node_id,
                network: Arc::clone(self),
                receiver: Mutex::new(rx),
            }
        }

        /// Remove a node; later sends to it fail.
        pub async fn disconnect(&self, node_id: &NodeId) {
            self.senders.write().await.remove(node_id);
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        node_id: NodeId,
        network: Arc<MemoryNetwork>,
        receiver: Mutex<mpsc::Receiver<Envelope>>,
    }

    fn decode(envelope: Envelope) -> Result<(NodeId, SystemMessage)> {
        Ok((envelope.from, SystemMessage::from_bytes(&envelope.bytes)?))
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, peer: &NodeId, message: SystemMessage) -> Result<()> {
            message
                .validate_limits()
                .map_err(|e| QueryError::InvalidMessage(e.into()))?;
            let bytes = message.to_bytes()?;

            let sender = self.network.senders.read().await.get(peer).cloned();
            let sender =
                sender.ok_or_else(|| QueryError::Transport(format!("peer {peer} not found")))?;
            sender
                .send(Envelope {
                    from: self.node_id,
                    bytes,
                })
                .await
                .map_err(|_| QueryError::Transport("peer disconnected".into()))
        }

        async fn recv(&self) -> Result<(NodeId, SystemMessage)> {
            let mut rx = self.receiver.lock().await;
            match rx.recv().await {
                Some(envelope) => decode(envelope),
                None => Err(QueryError::Transport("channel closed".into())),
            }
        }

        fn local_node_id(&self) -> NodeId {
            self.node_id
        }

        async fn connected_peers(&self) -> Result<Vec<NodeId>> {
            let senders = self.network.senders.read().await;
            let mut peers: Vec<NodeId> = senders
                .keys()
                .filter(|id| *id != &self.node_id)
                .copied()
                .collect();
            peers.sort();
            Ok(peers)
        }
    }
}
