//! Random vector OLE from base OT
//!
//! Bob ends up with a random `chi`, Alice with operands `a_l`, and the two
//! hold additive shares `c_l + d_l = a_l * chi`.
//!
//! Bob's `BATCH_SIZE` base-OT choice bits are re-randomized with a correction
//! so `chi = <g, beta>` for fresh bits `beta` and a public gadget vector `g`
//! squeezed from the pair's transcript. Alice expands both OT keys of every
//! instance into pads `F0, F1` and sends `tau = F1 - F0 - a`; Bob unmasks
//! `F_beta - beta*tau = F0 + beta*a`. Summing against the gadget gives the
//! shares.

use super::base_ot::{self, OtKey, OtSender};
use crate::{
    curve::{serde_point, serde_points, serde_scalars, Curve},
    transcript::Transcript,
    Error, Result, ShareholderId,
};
use elliptic_curve::ff::Field;
use rand_chacha::ChaCha20Rng;
use rand_core::{CryptoRngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::{Choice, ConditionallySelectable};

#[cfg(feature = "multi-thread")]
use rayon::prelude::*;

/// Statistical security parameter for the gadget sum
pub const STATISTICAL_SECURITY: usize = 80;

/// Base OTs per multiplication
pub const BATCH_SIZE: usize = 256 + STATISTICAL_SECURITY;

/// Alice multiplies two operands at once, the nonce and the key share
pub const OPERANDS: usize = 2;

/// Alice -> Bob: base OT sender key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct OtSetupMessage<C: Curve> {
    #[serde(with = "serde_point")]
    pub sender_key: C::Point,
}

/// Bob -> Alice: base OT receiver points
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct OtChoiceMessage<C: Curve> {
    #[serde(with = "serde_points")]
    pub points: Vec<C::Point>,
}

/// Bob -> Alice: packed `beta XOR c`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionMessage {
    pub correction: Vec<u8>,
}

/// Alice -> Bob: `tau[k * OPERANDS + l]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct MultiplyMessage<C: Curve> {
    #[serde(with = "serde_scalars")]
    pub tau: Vec<C::Scalar>,
}

/// Public parameters both ends of one ordered pair derive identically.
struct PairParameters<C: Curve> {
    session: [u8; 32],
    gadget: Vec<C::Scalar>,
}

impl<C: Curve> PairParameters<C> {
    fn new(transcript: &Transcript, alice: ShareholderId, bob: ShareholderId) -> Self {
        let mut transcript = transcript.fork_pair(b"rvole", alice, bob);
        let session = transcript.extract_array(b"ot session");
        let mut stream = transcript.extract_rng(b"gadget");
        let gadget = (0..BATCH_SIZE)
            .map(|_| C::Scalar::random(&mut stream))
            .collect();
        Self { session, gadget }
    }
}

/// The operand holder of one ordered pair, and the base OT sender.
pub struct Alice<C: Curve> {
    bob: ShareholderId,
    parameters: PairParameters<C>,
    sender: OtSender<C>,
    keys: Option<Vec<[OtKey; 2]>>,
}

impl<C: Curve> Alice<C> {
    pub fn new<R: CryptoRngCore>(
        me: ShareholderId,
        bob: ShareholderId,
        transcript: &Transcript,
        rng: &mut R,
    ) -> Self {
        Self {
            bob,
            parameters: PairParameters::new(transcript, me, bob),
            sender: OtSender::new(rng),
            keys: None,
        }
    }

    pub fn setup_message(&self) -> OtSetupMessage<C> {
        OtSetupMessage {
            sender_key: self.sender.public_key(),
        }
    }

    pub fn receive_choices(&mut self, message: &OtChoiceMessage<C>) -> Result<()> {
        let keys = self.sender.derive_keys(
            &self.parameters.session,
            self.bob,
            &message.points,
            BATCH_SIZE,
        )?;
        self.keys = Some(keys);
        Ok(())
    }

    /// The message for Bob and Alice's shares `c`.
    pub fn multiply(
        &self,
        message: &CorrectionMessage,
        operands: &[C::Scalar; OPERANDS],
    ) -> Result<(MultiplyMessage<C>, [C::Scalar; OPERANDS])> {
        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| Error::InvariantViolation("multiply before OT keys".into()))?;
        let correction = unpack_bits(&message.correction, BATCH_SIZE)
            .ok_or_else(|| Error::abort(self.bob, "malformed OT correction"))?;
        let session = &self.parameters.session;

        let rows = indexed_map(BATCH_SIZE, |k| {
            let e = correction[k];
            let k0 = OtKey::conditional_select(&keys[k][0], &keys[k][1], e);
            let k1 = OtKey::conditional_select(&keys[k][1], &keys[k][0], e);
            let f0 = pads::<C>(session, k, &k0);
            let f1 = pads::<C>(session, k, &k1);
            let mut tau = [C::Scalar::ZERO; OPERANDS];
            for l in 0..OPERANDS {
                tau[l] = f1[l] - f0[l] - operands[l];
            }
            (f0, tau)
        });

        let mut shares = [C::Scalar::ZERO; OPERANDS];
        let mut tau = Vec::with_capacity(BATCH_SIZE * OPERANDS);
        for ((f0, row_tau), g) in rows.iter().zip(&self.parameters.gadget) {
            for l in 0..OPERANDS {
                shares[l] -= *g * f0[l];
            }
            tau.extend_from_slice(row_tau);
        }
        Ok((MultiplyMessage { tau }, shares))
    }
}

/// The random-input holder of one ordered pair, and the base OT receiver.
pub struct Bob<C: Curve> {
    alice: ShareholderId,
    parameters: PairParameters<C>,
    choices: Vec<Choice>,
    keys: Vec<OtKey>,
    bits: Vec<Choice>,
}

impl<C: Curve> Bob<C> {
    pub fn new(me: ShareholderId, alice: ShareholderId, transcript: &Transcript) -> Self {
        Self {
            alice,
            parameters: PairParameters::new(transcript, alice, me),
            choices: Vec::new(),
            keys: Vec::new(),
            bits: Vec::new(),
        }
    }

    pub fn choose<R: CryptoRngCore>(
        &mut self,
        message: &OtSetupMessage<C>,
        rng: &mut R,
    ) -> Result<OtChoiceMessage<C>> {
        let choices = random_bits(BATCH_SIZE, rng);
        let (points, keys) = base_ot::choose::<C, R>(
            &self.parameters.session,
            self.alice,
            &message.sender_key,
            &choices,
            rng,
        )?;
        self.choices = choices;
        self.keys = keys;
        Ok(OtChoiceMessage { points })
    }

    /// The correction for Alice and Bob's random input `chi`.
    pub fn correction<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
    ) -> Result<(CorrectionMessage, C::Scalar)> {
        if self.choices.len() != BATCH_SIZE {
            return Err(Error::InvariantViolation("correction before OT choice".into()));
        }
        let bits = random_bits(BATCH_SIZE, rng);
        let correction: Vec<Choice> = bits
            .iter()
            .zip(&self.choices)
            .map(|(beta, c)| *beta ^ *c)
            .collect();

        let mut chi = C::Scalar::ZERO;
        for (g, beta) in self.parameters.gadget.iter().zip(&bits) {
            chi += C::Scalar::conditional_select(&C::Scalar::ZERO, g, *beta);
        }
        self.bits = bits;

        Ok((
            CorrectionMessage {
                correction: pack_bits(&correction),
            },
            chi,
        ))
    }

    /// Bob's shares `d`.
    pub fn finalize(&self, message: &MultiplyMessage<C>) -> Result<[C::Scalar; OPERANDS]> {
        if self.bits.len() != BATCH_SIZE {
            return Err(Error::InvariantViolation("finalize before correction".into()));
        }
        if message.tau.len() != BATCH_SIZE * OPERANDS {
            return Err(Error::abort(
                self.alice,
                format!(
                    "expected {} multiplication masks, got {}",
                    BATCH_SIZE * OPERANDS,
                    message.tau.len()
                ),
            ));
        }
        let session = &self.parameters.session;

        let rows = indexed_map(BATCH_SIZE, |k| {
            let pad = pads::<C>(session, k, &self.keys[k]);
            let mut row = [C::Scalar::ZERO; OPERANDS];
            for l in 0..OPERANDS {
                let unmasked = pad[l] - message.tau[k * OPERANDS + l];
                row[l] = C::Scalar::conditional_select(&pad[l], &unmasked, self.bits[k]);
            }
            row
        });

        let mut shares = [C::Scalar::ZERO; OPERANDS];
        for (row, g) in rows.iter().zip(&self.parameters.gadget) {
            for l in 0..OPERANDS {
                shares[l] += *g * row[l];
            }
        }
        Ok(shares)
    }
}

fn pads<C: Curve>(session: &[u8; 32], index: usize, key: &OtKey) -> [C::Scalar; OPERANDS] {
    let seed: [u8; 32] = Sha256::new()
        .chain_update(b"dkls23-mpc/rvole/pad")
        .chain_update(session)
        .chain_update((index as u64).to_be_bytes())
        .chain_update(key)
        .finalize()
        .into();
    let mut stream = ChaCha20Rng::from_seed(seed);
    let mut pads = [C::Scalar::ZERO; OPERANDS];
    for pad in pads.iter_mut() {
        *pad = C::Scalar::random(&mut stream);
    }
    pads
}

fn random_bits<R: CryptoRngCore>(count: usize, rng: &mut R) -> Vec<Choice> {
    let mut bytes = vec![0u8; count.div_ceil(8)];
    rng.fill_bytes(&mut bytes);
    (0..count)
        .map(|k| Choice::from((bytes[k / 8] >> (k % 8)) & 1))
        .collect()
}

fn pack_bits(bits: &[Choice]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (k, bit) in bits.iter().enumerate() {
        bytes[k / 8] |= bit.unwrap_u8() << (k % 8);
    }
    bytes
}

fn unpack_bits(bytes: &[u8], count: usize) -> Option<Vec<Choice>> {
    if bytes.len() != count.div_ceil(8) {
        return None;
    }
    Some(
        (0..count)
            .map(|k| Choice::from((bytes[k / 8] >> (k % 8)) & 1))
            .collect(),
    )
}

#[cfg(feature = "multi-thread")]
fn indexed_map<T, F>(count: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Send + Sync,
{
    (0..count).into_par_iter().map(f).collect()
}

#[cfg(not(feature = "multi-thread"))]
fn indexed_map<T, F>(count: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Send + Sync,
{
    (0..count).map(f).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::{Secp256k1, P256};
    use rand::rngs::OsRng;

    fn run<C: Curve>(operands: [C::Scalar; OPERANDS]) -> ([C::Scalar; OPERANDS], [C::Scalar; OPERANDS], C::Scalar) {
        let transcript = Transcript::new(b"rvole test");
        let mut alice = Alice::<C>::new(1, 2, &transcript, &mut OsRng);
        let mut bob = Bob::<C>::new(2, 1, &transcript);

        let choice = bob.choose(&alice.setup_message(), &mut OsRng).unwrap();
        alice.receive_choices(&choice).unwrap();
        let (correction, chi) = bob.correction(&mut OsRng).unwrap();
        let (masks, c) = alice.multiply(&correction, &operands).unwrap();
        let d = bob.finalize(&masks).unwrap();
        (c, d, chi)
    }

    fn check_product<C: Curve>() {
        let operands = [C::Scalar::random(&mut OsRng), C::Scalar::random(&mut OsRng)];
        let (c, d, chi) = run::<C>(operands);
        for l in 0..OPERANDS {
            assert_eq!(c[l] + d[l], operands[l] * chi);
        }
    }

    #[test]
    fn test_shares_sum_to_product() {
        check_product::<Secp256k1>();
        check_product::<P256>();
    }

    #[test]
    fn test_bit_packing() {
        let bits = random_bits(BATCH_SIZE, &mut OsRng);
        let unpacked = unpack_bits(&pack_bits(&bits), BATCH_SIZE).unwrap();
        assert!(bits
            .iter()
            .zip(&unpacked)
            .all(|(a, b)| a.unwrap_u8() == b.unwrap_u8()));
        assert!(unpack_bits(&[0u8; 3], BATCH_SIZE).is_none());
    }

    #[test]
    fn test_malformed_messages_blame_sender() {
        let transcript = Transcript::new(b"rvole test");
        let mut alice = Alice::<Secp256k1>::new(1, 2, &transcript, &mut OsRng);
        let mut bob = Bob::<Secp256k1>::new(2, 1, &transcript);

        let mut choice = bob.choose(&alice.setup_message(), &mut OsRng).unwrap();
        choice.points.pop();
        assert_eq!(alice.receive_choices(&choice).unwrap_err().culprit(), Some(2));

        let short = CorrectionMessage { correction: vec![0u8; 2] };
        let mut alice = Alice::<Secp256k1>::new(1, 2, &transcript, &mut OsRng);
        let choice = bob.choose(&alice.setup_message(), &mut OsRng).unwrap();
        alice.receive_choices(&choice).unwrap();
        let operands = [k256::Scalar::ONE; OPERANDS];
        assert_eq!(alice.multiply(&short, &operands).unwrap_err().culprit(), Some(2));

        bob.correction(&mut OsRng).unwrap();
        let truncated = MultiplyMessage::<Secp256k1> { tau: vec![] };
        assert_eq!(bob.finalize(&truncated).unwrap_err().culprit(), Some(1));
    }

    #[test]
    fn test_steps_out_of_order() {
        let transcript = Transcript::new(b"rvole test");
        let alice = Alice::<Secp256k1>::new(1, 2, &transcript, &mut OsRng);
        let mut bob = Bob::<Secp256k1>::new(2, 1, &transcript);

        let correction = CorrectionMessage { correction: vec![0u8; BATCH_SIZE / 8] };
        let operands = [k256::Scalar::ONE; OPERANDS];
        assert!(matches!(
            alice.multiply(&correction, &operands),
            Err(Error::InvariantViolation(_))
        ));
        assert!(matches!(bob.correction(&mut OsRng), Err(Error::InvariantViolation(_))));
    }
}
