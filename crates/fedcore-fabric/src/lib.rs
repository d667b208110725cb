//! Signed peer-to-peer messaging, discovery, heartbeats, and retries
//! (spec §4.E). The Fabric is the only component that mutates the peer
//! table; Consensus only ever reads a snapshot of it (spec §3).

pub mod peer;
pub mod transport;

pub use peer::PeerRecord;
pub use transport::{ChannelTransport, Transport};

use fedcore_types::crypto::{self, KeyPair};
use fedcore_types::{CoreError, CoreResult, FederationEvent, InstanceStatus, MessageType, NetworkMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub const HEARTBEAT_INTERVAL_MS: i64 = 30_000;
pub const PEER_INACTIVE_AFTER_MS: i64 = 90_000;
pub const PEER_REMOVE_AFTER_MS: i64 = 300_000;
pub const DISCOVERY_INTERVAL_MS: i64 = 60_000;
pub const MESSAGE_RETRY_TIMEOUT_MS: i64 = 10_000;
pub const MAX_RETRIES: u8 = 3;

struct PendingSend {
    peer_endpoint: String,
    message: NetworkMessage,
    retry_count: u8,
    next_attempt_ms: i64,
}

/// Outcome of dispatching one inbound message through [`Fabric::dispatch`].
#[derive(Debug)]
pub enum DispatchOutcome {
    Accepted(NetworkMessage),
    Dropped { reason: CoreError },
}

pub struct Fabric {
    instance_id: String,
    keypair: KeyPair,
    network_id: Option<String>,
    discovery_nodes: Vec<String>,
    peers: HashMap<String, PeerRecord>,
    transport: Arc<dyn Transport>,
    pending_retries: Vec<PendingSend>,
    failed_connections: u64,
    last_discovery_ms: i64,
    pending_events: Vec<FederationEvent>,
}

impl Fabric {
    pub fn new(instance_id: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            instance_id: instance_id.into(),
            keypair: KeyPair::generate(),
            network_id: None,
            discovery_nodes: Vec::new(),
            peers: HashMap::new(),
            transport,
            pending_retries: Vec::new(),
            failed_connections: 0,
            last_discovery_ms: i64::MIN,
            pending_events: Vec::new(),
        }
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.keypair.public_key_bytes()
    }

    pub fn peers(&self) -> &HashMap<String, PeerRecord> {
        &self.peers
    }

    pub fn failed_connections(&self) -> u64 {
        self.failed_connections
    }

    /// `register(network_id, discovery_nodes)` (spec §4.E).
    pub fn register(&mut self, network_id: impl Into<String>, discovery_nodes: Vec<String>) {
        self.network_id = Some(network_id.into());
        self.discovery_nodes = discovery_nodes;
    }

    fn sign(&self, mut message: NetworkMessage) -> NetworkMessage {
        let bytes = message.canonical_bytes();
        message.signature = self.keypair.sign(&bytes);
        message
    }

    fn build_message(&self, message_type: MessageType, payload: serde_json::Value, now_ms: i64, nonce: String) -> NetworkMessage {
        let unsigned = NetworkMessage {
            id: fedcore_types::ids::new_message_id(&self.instance_id),
            message_type,
            sender: self.instance_id.clone(),
            recipients: None,
            payload,
            timestamp: chrono::DateTime::from_timestamp_millis(now_ms).unwrap_or_else(chrono::Utc::now),
            nonce,
            signature: String::new(),
        };
        self.sign(unsigned)
    }

    /// `announce(capabilities, public_key)` (spec §4.E): broadcasts this
    /// instance's presence to its known discovery nodes.
    pub async fn announce(&mut self, capabilities: serde_json::Value, now_ms: i64) -> Vec<CoreResult<()>> {
        let payload = serde_json::json!({
            "public_key": crypto::sha256_hex(&self.keypair.public_key_bytes()),
            "capabilities": capabilities,
        });
        let message = self.build_message(MessageType::Announcement, payload, now_ms, format!("ann-{now_ms}"));
        let endpoints: Vec<String> = self.discovery_nodes.clone();
        let mut results = Vec::new();
        for endpoint in endpoints {
            results.push(self.send_raw(&endpoint, &message, now_ms).await);
        }
        results
    }

    /// `broadcast(message)` (spec §4.E): sign then deliver to every active
    /// peer.
    pub async fn broadcast(&mut self, message_type: MessageType, payload: serde_json::Value, now_ms: i64) -> Vec<CoreResult<()>> {
        let message = self.build_message(message_type, payload, now_ms, format!("bc-{now_ms}"));
        let endpoints: Vec<String> = self
            .peers
            .values()
            .filter(|p| p.status == InstanceStatus::Active)
            .map(|p| p.endpoint.clone())
            .collect();
        let mut results = Vec::new();
        for endpoint in endpoints {
            results.push(self.send_raw(&endpoint, &message, now_ms).await);
        }
        results
    }

    /// `send(peer, message)` (spec §4.E): sign then deliver to one peer.
    pub async fn send(&mut self, peer_id: &str, message_type: MessageType, payload: serde_json::Value, now_ms: i64) -> CoreResult<()> {
        let endpoint = self
            .peers
            .get(peer_id)
            .map(|p| p.endpoint.clone())
            .ok_or_else(|| CoreError::UnknownPeer { sender: peer_id.to_string() })?;
        let message = self.build_message(message_type, payload, now_ms, format!("uni-{now_ms}"));
        self.send_raw(&endpoint, &message, now_ms).await
    }

    /// Active peers, as `{instance_id, endpoint}` pairs, for discovery
    /// replies (spec §4.E).
    fn active_peer_list(&self, exclude: &str) -> serde_json::Value {
        let peers: Vec<serde_json::Value> = self
            .peers
            .values()
            .filter(|p| p.status == InstanceStatus::Active && p.instance_id != exclude)
            .map(|p| serde_json::json!({"instance_id": p.instance_id, "endpoint": p.endpoint}))
            .collect();
        serde_json::json!({ "peers": peers })
    }

    /// Broadcasts a discovery request to every active peer if
    /// `DISCOVERY_INTERVAL_MS` has elapsed since the last one (spec §4.E).
    async fn maybe_broadcast_discovery(&mut self, now_ms: i64) {
        if now_ms - self.last_discovery_ms < DISCOVERY_INTERVAL_MS {
            return;
        }
        self.last_discovery_ms = now_ms;
        let _ = self.broadcast(MessageType::Discovery, serde_json::json!({}), now_ms).await;
    }

    async fn send_raw(&mut self, endpoint: &str, message: &NetworkMessage, now_ms: i64) -> CoreResult<()> {
        let bytes = serde_json::to_vec(message).expect("network message always serializes");
        match self.transport.send(endpoint, bytes).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(endpoint, error = %err, "send failed, enqueuing retry");
                self.pending_retries.push(PendingSend {
                    peer_endpoint: endpoint.to_string(),
                    message: message.clone(),
                    retry_count: 0,
                    next_attempt_ms: now_ms + MESSAGE_RETRY_TIMEOUT_MS,
                });
                Err(err)
            }
        }
    }

    /// `on_message(handler)` materialized as a direct call: verifies the
    /// signature, drops unknown senders and malformed signatures, updates
    /// peer liveness, and answers discovery requests with a unicast reply
    /// (spec §4.E's security model, peer lifecycle, and discovery protocol).
    pub async fn dispatch(&mut self, raw_bytes: &[u8], now_ms: i64) -> DispatchOutcome {
        let message: NetworkMessage = match serde_json::from_slice(raw_bytes) {
            Ok(m) => m,
            Err(_) => {
                return DispatchOutcome::Dropped {
                    reason: CoreError::InvalidInput("malformed network message".into()),
                }
            }
        };

        if message.message_type == MessageType::Announcement {
            return self.handle_announcement(message, now_ms);
        }

        let Some(peer) = self.peers.get(&message.sender).cloned() else {
            warn!(sender = %message.sender, "dropping message from unknown peer");
            return DispatchOutcome::Dropped {
                reason: CoreError::UnknownPeer { sender: message.sender.clone() },
            };
        };

        let canonical = message.canonical_bytes();
        if crypto::verify(&canonical, &message.signature, &peer.public_key).is_err() {
            warn!(sender = %message.sender, "dropping message with invalid signature");
            return DispatchOutcome::Dropped {
                reason: CoreError::SignatureInvalid { sender: message.sender.clone() },
            };
        }

        if let Some(entry) = self.peers.get_mut(&message.sender) {
            entry.last_seen_ms = now_ms;
            entry.status = InstanceStatus::Active;
        }

        if message.message_type == MessageType::Heartbeat {
            info!(sender = %message.sender, "heartbeat received");
        }

        if message.message_type == MessageType::Discovery {
            self.handle_discovery(&message, now_ms).await;
        }

        DispatchOutcome::Accepted(message)
    }

    /// `peers: [...]` in the payload marks a discovery reply, merged into
    /// the peer table; otherwise the message is a discovery request,
    /// answered by a unicast reply carrying our active peer list
    /// (spec §4.E).
    async fn handle_discovery(&mut self, message: &NetworkMessage, now_ms: i64) {
        match message.payload.get("peers").and_then(|v| v.as_array()) {
            Some(entries) => {
                for entry in entries {
                    let (Some(instance_id), Some(endpoint)) = (
                        entry.get("instance_id").and_then(|v| v.as_str()),
                        entry.get("endpoint").and_then(|v| v.as_str()),
                    ) else {
                        continue;
                    };
                    if instance_id == self.instance_id || self.peers.contains_key(instance_id) {
                        continue;
                    }
                    self.peers.insert(
                        instance_id.to_string(),
                        PeerRecord::new(instance_id, endpoint, Vec::new(), now_ms),
                    );
                    info!(instance_id, "peer learned via discovery");
                    self.pending_events.push(FederationEvent::PeerJoined {
                        instance_id: instance_id.to_string(),
                    });
                }
            }
            None => {
                let endpoint = match self.peers.get(&message.sender) {
                    Some(peer) => peer.endpoint.clone(),
                    None => return,
                };
                let reply_payload = self.active_peer_list(&message.sender);
                let reply = self.build_message(MessageType::Discovery, reply_payload, now_ms, format!("disc-{now_ms}"));
                let _ = self.send_raw(&endpoint, &reply, now_ms).await;
            }
        }
    }

    fn handle_announcement(&mut self, message: NetworkMessage, now_ms: i64) -> DispatchOutcome {
        let departing = message
            .payload
            .get("departing")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
            || message
                .payload
                .get("opted_out")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

        if departing {
            if self.peers.remove(&message.sender).is_some() {
                info!(sender = %message.sender, "peer departed, removed immediately");
                self.pending_events.push(FederationEvent::PeerLeft {
                    instance_id: message.sender.clone(),
                });
            }
            return DispatchOutcome::Accepted(message);
        }

        let endpoint = message
            .payload
            .get("endpoint")
            .and_then(|v| v.as_str())
            .unwrap_or(&message.sender)
            .to_string();

        let is_new = !self.peers.contains_key(&message.sender);
        self.peers
            .entry(message.sender.clone())
            .and_modify(|p| {
                p.last_seen_ms = now_ms;
                p.status = InstanceStatus::Active;
            })
            .or_insert_with(|| PeerRecord::new(message.sender.clone(), endpoint, Vec::new(), now_ms));

        if is_new {
            self.pending_events.push(FederationEvent::PeerJoined {
                instance_id: message.sender.clone(),
            });
        }

        info!(sender = %message.sender, "peer announcement processed");
        DispatchOutcome::Accepted(message)
    }

    /// Registers a peer this instance already trusts out of band (e.g. a
    /// discovery-node bootstrap list), bypassing the on-wire announcement
    /// handshake.
    pub fn register_peer(&mut self, instance_id: impl Into<String>, endpoint: impl Into<String>, public_key: Vec<u8>, now_ms: i64) {
        let instance_id = instance_id.into();
        self.peers
            .insert(instance_id.clone(), PeerRecord::new(instance_id, endpoint, public_key, now_ms));
    }

    /// Advances peer lifecycle (inactive/removed), fires the periodic
    /// discovery broadcast, retries pending sends, and drains every peer
    /// event accumulated since the previous tick. Callers drive this from
    /// their own periodic loop, per the cooperative-iteration concurrency
    /// model (spec §5).
    pub async fn tick(&mut self, now_ms: i64) -> Vec<FederationEvent> {
        let mut events = std::mem::take(&mut self.pending_events);

        let mut to_remove = Vec::new();
        for peer in self.peers.values_mut() {
            let silent_for = now_ms - peer.last_seen_ms;
            match peer.status {
                InstanceStatus::Active if silent_for > PEER_INACTIVE_AFTER_MS => {
                    peer.status = InstanceStatus::Inactive;
                }
                InstanceStatus::Inactive if silent_for > PEER_REMOVE_AFTER_MS => {
                    to_remove.push(peer.instance_id.clone());
                }
                _ => {}
            }
        }
        for instance_id in to_remove {
            self.peers.remove(&instance_id);
            events.push(FederationEvent::PeerLeft { instance_id });
        }

        self.maybe_broadcast_discovery(now_ms).await;

        let due: Vec<usize> = self
            .pending_retries
            .iter()
            .enumerate()
            .filter(|(_, r)| r.next_attempt_ms <= now_ms)
            .map(|(i, _)| i)
            .collect();

        let mut still_pending = Vec::new();
        let retries = std::mem::take(&mut self.pending_retries);
        for (idx, mut retry) in retries.into_iter().enumerate() {
            if !due.contains(&idx) {
                still_pending.push(retry);
                continue;
            }
            let bytes = serde_json::to_vec(&retry.message).expect("network message always serializes");
            match self.transport.send(&retry.peer_endpoint, bytes).await {
                Ok(()) => {}
                Err(_) => {
                    retry.retry_count += 1;
                    if retry.retry_count >= MAX_RETRIES {
                        self.failed_connections += 1;
                        warn!(endpoint = %retry.peer_endpoint, "message dropped after max retries");
                    } else {
                        retry.next_attempt_ms = now_ms + MESSAGE_RETRY_TIMEOUT_MS;
                        still_pending.push(retry);
                    }
                }
            }
        }
        self.pending_retries = still_pending;

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn announcement_registers_unknown_peer() {
        let transport = Arc::new(ChannelTransport::new());
        let mut fabric = Fabric::new("inst-a", transport);

        let sender_keypair = KeyPair::generate();
        let payload = serde_json::json!({"endpoint": "inst-b-endpoint", "capabilities": []});
        let mut message = NetworkMessage {
            id: "m1".into(),
            message_type: MessageType::Announcement,
            sender: "inst-b".into(),
            recipients: None,
            payload,
            timestamp: chrono::Utc::now(),
            nonce: "n1".into(),
            signature: String::new(),
        };
        let bytes = message.canonical_bytes();
        message.signature = sender_keypair.sign(&bytes);

        let raw = serde_json::to_vec(&message).unwrap();
        let outcome = fabric.dispatch(&raw, 0).await;
        assert!(matches!(outcome, DispatchOutcome::Accepted(_)));
        assert!(fabric.peers().contains_key("inst-b"));

        let events = fabric.tick(0).await;
        assert!(matches!(events[0], FederationEvent::PeerJoined { .. }));
    }

    #[tokio::test]
    async fn message_from_unknown_peer_is_dropped() {
        let transport = Arc::new(ChannelTransport::new());
        let mut fabric = Fabric::new("inst-a", transport);

        let sender_keypair = KeyPair::generate();
        let mut message = NetworkMessage {
            id: "m2".into(),
            message_type: MessageType::Heartbeat,
            sender: "inst-ghost".into(),
            recipients: None,
            payload: serde_json::Value::Null,
            timestamp: chrono::Utc::now(),
            nonce: "n2".into(),
            signature: String::new(),
        };
        let bytes = message.canonical_bytes();
        message.signature = sender_keypair.sign(&bytes);

        let raw = serde_json::to_vec(&message).unwrap();
        let outcome = fabric.dispatch(&raw, 0).await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Dropped { reason: CoreError::UnknownPeer { .. } }
        ));
    }

    #[tokio::test]
    async fn peer_liveness_scenario_matches_spec() {
        let transport = Arc::new(ChannelTransport::new());
        let mut fabric = Fabric::new("inst-a", transport);
        fabric.register_peer("inst-x", "inst-x-endpoint", vec![], 0);

        let events = fabric.tick(91_000).await;
        assert!(events.is_empty());
        assert_eq!(fabric.peers().get("inst-x").unwrap().status, InstanceStatus::Inactive);

        let events = fabric.tick(301_000).await;
        assert!(matches!(events[0], FederationEvent::PeerLeft { .. }));
        assert!(!fabric.peers().contains_key("inst-x"));
    }

    #[tokio::test]
    async fn discovery_request_is_answered_with_active_peer_list() {
        let transport = Arc::new(ChannelTransport::new());
        let reply_inbox = transport.register_endpoint("inst-b-endpoint");
        let mut fabric = Fabric::new("inst-a", transport);
        fabric.register_peer("inst-b", "inst-b-endpoint", vec![], 0);
        fabric.register_peer("inst-c", "inst-c-endpoint", vec![], 0);

        let sender_keypair = KeyPair::generate();
        let mut request = NetworkMessage {
            id: "m3".into(),
            message_type: MessageType::Discovery,
            sender: "inst-b".into(),
            recipients: None,
            payload: serde_json::json!({}),
            timestamp: chrono::Utc::now(),
            nonce: "n3".into(),
            signature: String::new(),
        };
        let bytes = request.canonical_bytes();
        request.signature = sender_keypair.sign(&bytes);
        // the peer table trusts whatever key it was registered with; swap in the
        // sender's real key so signature verification succeeds.
        fabric.register_peer("inst-b", "inst-b-endpoint", sender_keypair.public_key_bytes(), 0);

        let raw = serde_json::to_vec(&request).unwrap();
        let outcome = fabric.dispatch(&raw, 0).await;
        assert!(matches!(outcome, DispatchOutcome::Accepted(_)));

        drop(fabric);
        let mut reply_inbox = reply_inbox;
        let reply_bytes = reply_inbox.try_recv().expect("reply should have been sent");
        let reply: NetworkMessage = serde_json::from_slice(&reply_bytes).unwrap();
        assert_eq!(reply.message_type, MessageType::Discovery);
        let peers = reply.payload.get("peers").and_then(|v| v.as_array()).unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].get("instance_id").and_then(|v| v.as_str()), Some("inst-c"));
    }

    #[tokio::test]
    async fn discovery_reply_learns_new_peers() {
        let transport = Arc::new(ChannelTransport::new());
        let mut fabric = Fabric::new("inst-a", transport);
        let sender_keypair = KeyPair::generate();
        fabric.register_peer("inst-b", "inst-b-endpoint", sender_keypair.public_key_bytes(), 0);

        let payload = serde_json::json!({"peers": [{"instance_id": "inst-d", "endpoint": "inst-d-endpoint"}]});
        let mut reply = NetworkMessage {
            id: "m4".into(),
            message_type: MessageType::Discovery,
            sender: "inst-b".into(),
            recipients: None,
            payload,
            timestamp: chrono::Utc::now(),
            nonce: "n4".into(),
            signature: String::new(),
        };
        let bytes = reply.canonical_bytes();
        reply.signature = sender_keypair.sign(&bytes);

        let raw = serde_json::to_vec(&reply).unwrap();
        let outcome = fabric.dispatch(&raw, 0).await;
        assert!(matches!(outcome, DispatchOutcome::Accepted(_)));
        assert!(fabric.peers().contains_key("inst-d"));

        let events = fabric.tick(0).await;
        assert!(events.iter().any(|e| matches!(e, FederationEvent::PeerJoined { instance_id } if instance_id == "inst-d")));
    }
}
