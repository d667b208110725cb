use serde::{Deserialize, Serialize};

/// `(participant_id, layer_shares, commitment, proof)` (spec §3). Shares
/// carry the same layer shape as the tensor they split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureShare {
    pub participant_id: String,
    pub layer_shares: Vec<Vec<f64>>,
    pub commitment: String,
    pub proof: String,
}

impl SecureShare {
    /// Commitments and proofs are fixed 64-hex-character SHA-256 digests
    /// (spec §6); this checks structural well-formedness only, not that the
    /// digest matches the share's content.
    pub fn is_well_formed(&self) -> bool {
        let is_hex64 = |s: &str| s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit());
        is_hex64(&self.commitment) && is_hex64(&self.proof) && !self.layer_shares.is_empty()
    }
}
