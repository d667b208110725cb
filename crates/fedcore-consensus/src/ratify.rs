//! Optional BLS threshold-signature ratification of approved proposals,
//! layered on top of the weighted vote itself. A proposal can finalize by
//! vote weight alone; a `Ratifier` additionally lets a quorum of voters
//! produce one combined signature attesting to the outcome, useful when a
//! downstream consumer (e.g. a broadcasted global model) wants a single
//! verifiable artifact instead of `t` separate ECDSA signatures.

use fedcore_types::{CoreError, CoreResult};
use threshold_crypto::{PublicKeySet, SecretKeySet, SecretKeyShare, Signature, SignatureShare};

pub struct Ratifier {
    public_key_set: PublicKeySet,
    threshold: usize,
}

impl Ratifier {
    /// `threshold` is the minimum number of signature shares required to
    /// combine a valid signature (`t-1` in `threshold_crypto`'s convention,
    /// i.e. `t` shares reconstruct).
    pub fn new(secret_key_set: &SecretKeySet, threshold: usize) -> Self {
        Self {
            public_key_set: secret_key_set.public_keys(),
            threshold,
        }
    }

    pub fn public_key_set(&self) -> &PublicKeySet {
        &self.public_key_set
    }

    pub fn sign_share(secret_share: &SecretKeyShare, message: &[u8]) -> SignatureShare {
        secret_share.sign(message)
    }

    pub fn verify_share(&self, voter_index: usize, share: &SignatureShare, message: &[u8]) -> bool {
        self.public_key_set
            .public_key_share(voter_index)
            .verify(share, message)
    }

    /// Combines at least `threshold` verified signature shares into one
    /// BLS signature over `message`.
    pub fn combine(
        &self,
        shares: &[(usize, SignatureShare)],
        message: &[u8],
    ) -> CoreResult<Signature> {
        if shares.len() < self.threshold {
            return Err(CoreError::QuorumShort {
                needed: self.threshold,
                had: shares.len(),
            });
        }
        let signature = self
            .public_key_set
            .combine_signatures(shares.iter().map(|(i, s)| (*i, s)))
            .map_err(|e| CoreError::InvalidInput(format!("could not combine signature shares: {e}")))?;
        if !self.public_key_set.public_key().verify(&signature, message) {
            return Err(CoreError::SignatureInvalid {
                sender: "combined".to_string(),
            });
        }
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand07::thread_rng;

    #[test]
    fn combined_signature_verifies_against_public_key() {
        let mut rng = thread_rng();
        let sks = SecretKeySet::random(2, &mut rng); // threshold degree 2 -> needs 3 shares
        let ratifier = Ratifier::new(&sks, 3);
        let message = b"round_7_global_model";

        let shares: Vec<(usize, SignatureShare)> = (0..3)
            .map(|i| (i, Ratifier::sign_share(&sks.secret_key_share(i), message)))
            .collect();

        let signature = ratifier.combine(&shares, message).unwrap();
        assert!(ratifier.public_key_set().public_key().verify(&signature, message));
    }

    #[test]
    fn combine_fails_below_threshold() {
        let mut rng = thread_rng();
        let sks = SecretKeySet::random(2, &mut rng);
        let ratifier = Ratifier::new(&sks, 3);
        let message = b"round_7_global_model";

        let shares: Vec<(usize, SignatureShare)> = (0..2)
            .map(|i| (i, Ratifier::sign_share(&sks.secret_key_share(i), message)))
            .collect();

        let result = ratifier.combine(&shares, message);
        assert!(matches!(result, Err(CoreError::QuorumShort { .. })));
    }
}
