use fedcore_types::InstanceStatus;
use serde::{Deserialize, Serialize};

/// A peer as known to this instance's Fabric (spec §3's `Instance`,
/// restricted to what the fabric itself tracks).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub instance_id: String,
    pub endpoint: String,
    pub public_key: Vec<u8>,
    pub status: InstanceStatus,
    pub last_seen_ms: i64,
}

impl PeerRecord {
    pub fn new(instance_id: impl Into<String>, endpoint: impl Into<String>, public_key: Vec<u8>, now_ms: i64) -> Self {
        Self {
            instance_id: instance_id.into(),
            endpoint: endpoint.into(),
            public_key,
            status: InstanceStatus::Active,
            last_seen_ms: now_ms,
        }
    }
}
