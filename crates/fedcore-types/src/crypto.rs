use base64::{engine::general_purpose::STANDARD, Engine};
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};

/// ECDSA-P256 key pair owned by one instance (spec §4.E security model).
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut rand::rngs::OsRng);
        let verifying_key = VerifyingKey::from(&signing_key);
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Compressed SEC1 public key bytes, the wire representation carried on
    /// `Instance.public_key` and `announce()` payloads.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.verifying_key.to_encoded_point(true).as_bytes().to_vec()
    }

    /// Signs `canonical_bytes` and returns a standard-alphabet base64
    /// signature, per spec §6's wire format.
    pub fn sign(&self, canonical_bytes: &[u8]) -> String {
        let signature: Signature = self.signing_key.sign(canonical_bytes);
        STANDARD.encode(signature.to_der().as_bytes())
    }
}

/// Verifies `signature_b64` over `canonical_bytes` against a sender's known
/// public key bytes (spec §6, §8 invariant 6).
pub fn verify(
    canonical_bytes: &[u8],
    signature_b64: &str,
    public_key_bytes: &[u8],
) -> CoreResult<()> {
    let verifying_key = VerifyingKey::from_sec1_bytes(public_key_bytes)
        .map_err(|_| CoreError::InvalidInput("malformed public key".into()))?;
    let sig_bytes = STANDARD
        .decode(signature_b64)
        .map_err(|_| CoreError::InvalidInput("malformed signature encoding".into()))?;
    let signature = Signature::from_der(&sig_bytes)
        .map_err(|_| CoreError::InvalidInput("malformed signature".into()))?;
    verifying_key
        .verify(canonical_bytes, &signature)
        .map_err(|_| CoreError::SignatureInvalid {
            sender: String::new(),
        })
}

/// SHA-256 of `data` as a fixed 64-hex-character string (spec §6).
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let kp = KeyPair::generate();
        let msg = b"canonical payload";
        let sig = kp.sign(msg);
        assert!(verify(msg, &sig, &kp.public_key_bytes()).is_ok());
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"original");
        assert!(verify(b"tampered", &sig, &kp.public_key_bytes()).is_err());
    }

    #[test]
    fn sha256_hex_is_64_chars() {
        let hash = sha256_hex(b"hello world");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
