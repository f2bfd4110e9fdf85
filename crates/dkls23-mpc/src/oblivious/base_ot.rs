//! Batched base oblivious transfer
//!
//! "Simplest OT" (Chou and Orlandi, https://eprint.iacr.org/2015/267) over
//! any [`Curve`]:
//!
//! - sender: `A = a*G`
//! - receiver, choice `c_k`: `B_k = b_k*G + c_k*A`, key `H(k, b_k*A)`
//! - sender: keys `H(k, a*B_k)` and `H(k, a*(B_k - A))`
//!
//! The receiver's point is picked with a constant-time select so the choice
//! bit never drives a branch.

use crate::{
    curve::{point_to_bytes, Curve},
    Error, Result, ShareholderId,
};
use elliptic_curve::{
    ff::Field,
    group::Group,
    subtle::{Choice, ConditionallySelectable},
};
use rand_core::CryptoRngCore;
use sha2::{Digest, Sha256};

/// Symmetric key produced by one OT instance
pub type OtKey = [u8; 32];

/// Sender state between its two flows
pub struct OtSender<C: Curve> {
    secret: C::Scalar,
    public: C::Point,
}

impl<C: Curve> OtSender<C> {
    pub fn new<R: CryptoRngCore>(rng: &mut R) -> Self {
        let secret = C::Scalar::random(rng);
        Self {
            secret,
            public: C::base_mul(&secret),
        }
    }

    pub fn public_key(&self) -> C::Point {
        self.public
    }

    /// Both keys of every instance, `[k0, k1]`.
    pub fn derive_keys(
        &self,
        session: &[u8; 32],
        receiver: ShareholderId,
        points: &[C::Point],
        count: usize,
    ) -> Result<Vec<[OtKey; 2]>> {
        if points.len() != count {
            return Err(Error::abort(
                receiver,
                format!("expected {} OT points, got {}", count, points.len()),
            ));
        }
        points
            .iter()
            .enumerate()
            .map(|(k, point)| {
                if bool::from(point.is_identity()) {
                    return Err(Error::abort(receiver, "identity OT point"));
                }
                let k0 = key::<C>(session, k, &self.public, point, &(*point * self.secret));
                let k1 = key::<C>(
                    session,
                    k,
                    &self.public,
                    point,
                    &((*point - self.public) * self.secret),
                );
                Ok([k0, k1])
            })
            .collect()
    }
}

/// Receiver flow: the points to send back and the chosen keys.
pub fn choose<C: Curve, R: CryptoRngCore>(
    session: &[u8; 32],
    sender: ShareholderId,
    sender_public: &C::Point,
    choices: &[Choice],
    rng: &mut R,
) -> Result<(Vec<C::Point>, Vec<OtKey>)> {
    if bool::from(sender_public.is_identity()) {
        return Err(Error::abort(sender, "identity OT sender key"));
    }

    let mut points = Vec::with_capacity(choices.len());
    let mut keys = Vec::with_capacity(choices.len());
    for (k, choice) in choices.iter().enumerate() {
        let b = C::Scalar::random(&mut *rng);
        let base = C::base_mul(&b);
        let point = C::Point::conditional_select(&base, &(base + sender_public), *choice);
        keys.push(key::<C>(session, k, sender_public, &point, &(*sender_public * b)));
        points.push(point);
    }
    Ok((points, keys))
}

fn key<C: Curve>(
    session: &[u8; 32],
    index: usize,
    sender_public: &C::Point,
    receiver_point: &C::Point,
    shared: &C::Point,
) -> OtKey {
    let mut hasher = Sha256::new();
    hasher.update(b"dkls23-mpc/base-ot");
    hasher.update(session);
    hasher.update((index as u64).to_be_bytes());
    hasher.update(point_to_bytes(sender_public));
    hasher.update(point_to_bytes(receiver_point));
    hasher.update(point_to_bytes(shared));
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::Secp256k1;
    use rand::{rngs::OsRng, Rng};

    #[test]
    fn test_receiver_learns_chosen_key_only() {
        let session = [3u8; 32];
        let bits: Vec<u8> = (0..64).map(|_| OsRng.gen_range(0..2)).collect();
        let choices: Vec<Choice> = bits.iter().map(|b| Choice::from(*b)).collect();

        let sender = OtSender::<Secp256k1>::new(&mut OsRng);
        let (points, chosen) =
            choose::<Secp256k1, _>(&session, 1, &sender.public_key(), &choices, &mut OsRng).unwrap();
        let keys = sender.derive_keys(&session, 2, &points, 64).unwrap();

        for (k, bit) in bits.iter().enumerate() {
            assert_eq!(chosen[k], keys[k][*bit as usize]);
            assert_ne!(chosen[k], keys[k][1 - *bit as usize]);
        }
    }

    #[test]
    fn test_wrong_count_blames_receiver() {
        let sender = OtSender::<Secp256k1>::new(&mut OsRng);
        let err = sender.derive_keys(&[0u8; 32], 7, &[], 4).unwrap_err();
        assert_eq!(err.culprit(), Some(7));
    }

    #[test]
    fn test_identity_sender_key_rejected() {
        let identity = k256::ProjectivePoint::IDENTITY;
        let err = choose::<Secp256k1, _>(&[0u8; 32], 5, &identity, &[Choice::from(1)], &mut OsRng)
            .unwrap_err();
        assert_eq!(err.culprit(), Some(5));
    }
}
