//! Hash-based commit-then-open scheme
//!
//! `Commit(m) = SHA-256(domain || key || len(m) || m || witness)` with a
//! 32-byte random witness. The key is squeezed from the session transcript so
//! commitments from one session cannot be replayed into another.

use crate::transcript::Transcript;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const DOMAIN: &[u8] = b"dkls23-mpc/commitment/v1";

/// Binding digest of a committed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment(pub [u8; 32]);

/// Randomizer revealed together with the message when opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness(pub [u8; 32]);

#[derive(Debug, Clone)]
pub struct CommitmentScheme {
    key: [u8; 32],
}

impl CommitmentScheme {
    pub fn new(transcript: &mut Transcript) -> Self {
        Self {
            key: transcript.extract_array(b"commitment key"),
        }
    }

    pub fn commit<R: CryptoRngCore>(&self, message: &[u8], rng: &mut R) -> (Commitment, Witness) {
        let mut witness = [0u8; 32];
        rng.fill_bytes(&mut witness);
        let witness = Witness(witness);
        (self.digest(message, &witness), witness)
    }

    /// Constant-time check that `(message, witness)` opens `commitment`.
    pub fn verify(&self, commitment: &Commitment, message: &[u8], witness: &Witness) -> bool {
        let expected = self.digest(message, witness);
        bool::from(expected.0.ct_eq(&commitment.0))
    }

    fn digest(&self, message: &[u8], witness: &Witness) -> Commitment {
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN);
        hasher.update(self.key);
        hasher.update((message.len() as u64).to_be_bytes());
        hasher.update(message);
        hasher.update(witness.0);
        Commitment(hasher.finalize().into())
    }
}
