//! The wire itself is an external capability (spec §1 Non-goals, §6);
//! this module only defines the contract the Fabric layers its canonical
//! message format on top of, plus one concrete in-process implementation
//! used for local testing and single-host deployments.

use async_trait::async_trait;
use fedcore_types::CoreResult;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// `send(peer_endpoint, bytes) -> ok|err`, `subscribe() -> stream<bytes>`
/// (spec §6). Message-oriented and boundary-preserving; TCP/UDP/WebRTC
/// framing is the transport's concern, not the Fabric's.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, peer_endpoint: &str, bytes: Vec<u8>) -> CoreResult<()>;
}

/// In-process transport backed by per-endpoint mpsc channels. Useful for
/// tests and for colocated instances; a real deployment supplies its own
/// `Transport` over TCP/QUIC/etc.
pub struct ChannelTransport {
    inboxes: Mutex<HashMap<String, mpsc::Sender<Vec<u8>>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self {
            inboxes: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `endpoint` as a deliverable destination and returns the
    /// receiving half callers should poll for inbound bytes.
    pub fn register_endpoint(&self, endpoint: impl Into<String>) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(256);
        self.inboxes.lock().unwrap().insert(endpoint.into(), tx);
        rx
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, peer_endpoint: &str, bytes: Vec<u8>) -> CoreResult<()> {
        let sender = {
            let inboxes = self.inboxes.lock().unwrap();
            inboxes.get(peer_endpoint).cloned()
        };
        match sender {
            Some(tx) => tx
                .send(bytes)
                .await
                .map_err(|_| fedcore_types::CoreError::TransportError(format!("endpoint {peer_endpoint} closed"))),
            None => Err(fedcore_types::CoreError::TransportError(format!(
                "unknown endpoint {peer_endpoint}"
            ))),
        }
    }
}
