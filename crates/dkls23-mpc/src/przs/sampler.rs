//! Communication-free zero-share sampling

use super::PairwiseSeeds;
use crate::{curve::Curve, Error, Quorum, Result, SessionId, ShareholderId};
use elliptic_curve::ff::Field;
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;
use std::collections::BTreeMap;
use std::marker::PhantomData;

const STREAM_CONTEXT: &str = "dkls23-mpc 2024 przs sampler stream";

/// Draws additive shares of zero for one session.
///
/// Each peer's stream is reseeded from the pairwise seed and the session id,
/// so two sessions never reuse a zero share.
pub struct Sampler<C: Curve> {
    me: ShareholderId,
    streams: BTreeMap<ShareholderId, ChaCha20Rng>,
    _curve: PhantomData<C>,
}

impl<C: Curve> Sampler<C> {
    pub fn new(
        me: ShareholderId,
        seeds: &PairwiseSeeds,
        quorum: &Quorum,
        session_id: &SessionId,
    ) -> Result<Self> {
        if !quorum.contains(me) {
            return Err(Error::InvalidArgument(format!(
                "party {} is not in {}",
                me, quorum
            )));
        }

        let mut streams = BTreeMap::new();
        for peer in quorum.others(me) {
            let seed = seeds.get(peer).ok_or_else(|| {
                Error::InvalidArgument(format!("no zero-sharing seed shared with party {}", peer))
            })?;
            let mut hasher = blake3::Hasher::new_derive_key(STREAM_CONTEXT);
            hasher.update(seed);
            hasher.update(session_id);
            streams.insert(peer, ChaCha20Rng::from_seed(*hasher.finalize().as_bytes()));
        }

        Ok(Self {
            me,
            streams,
            _curve: PhantomData,
        })
    }

    /// One share of zero. Summed over the quorum, the n-th samples cancel out.
    pub fn sample(&mut self) -> Result<C::Scalar> {
        let mut share = C::Scalar::ZERO;
        for (peer, stream) in self.streams.iter_mut() {
            let pad = C::Scalar::random(&mut *stream);
            if *peer > self.me {
                share += pad;
            } else {
                share -= pad;
            }
        }

        // a lone party cannot redraw without breaking the sum, so refuse instead
        if bool::from(share.is_zero()) {
            return Err(Error::InvariantViolation(
                "zero-sharing sample is exactly zero".into(),
            ));
        }
        Ok(share)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::{Secp256k1, P256};
    use crate::przs::setup::tests::run_setup;

    fn sum_of_samples<C: Curve>(quorum: &Quorum, seeds: &BTreeMap<ShareholderId, PairwiseSeeds>, session_id: &SessionId) -> C::Scalar {
        let mut samplers: Vec<Sampler<C>> = quorum
            .iter()
            .map(|id| Sampler::new(id, &seeds[&id], quorum, session_id).unwrap())
            .collect();
        let mut sum = C::Scalar::ZERO;
        for sampler in samplers.iter_mut() {
            let sample = sampler.sample().unwrap();
            assert!(!bool::from(sample.is_zero()));
            sum += sample;
        }
        sum
    }

    #[test]
    fn test_zero_sum_across_quorums() {
        for n in 2..=5 {
            let quorum = Quorum::first(n).unwrap();
            let seeds = run_setup(&quorum, [n as u8; 32]);
            assert_eq!(sum_of_samples::<Secp256k1>(&quorum, &seeds, &[1u8; 32]), k256::Scalar::ZERO);
            assert_eq!(sum_of_samples::<P256>(&quorum, &seeds, &[2u8; 32]), p256::Scalar::ZERO);
        }
    }

    #[test]
    fn test_sub_quorum_still_sums_to_zero() {
        let full = Quorum::first(4).unwrap();
        let seeds = run_setup(&full, [4u8; 32]);
        let signers = Quorum::new([1, 3, 4]).unwrap();
        assert_eq!(sum_of_samples::<Secp256k1>(&signers, &seeds, &[5u8; 32]), k256::Scalar::ZERO);
    }

    #[test]
    fn test_repeated_samples_differ_and_cancel() {
        let quorum = Quorum::first(3).unwrap();
        let seeds = run_setup(&quorum, [6u8; 32]);
        let mut samplers: Vec<Sampler<Secp256k1>> = quorum
            .iter()
            .map(|id| Sampler::new(id, &seeds[&id], &quorum, &[0u8; 32]).unwrap())
            .collect();

        let first: Vec<_> = samplers.iter_mut().map(|s| s.sample().unwrap()).collect();
        let second: Vec<_> = samplers.iter_mut().map(|s| s.sample().unwrap()).collect();
        assert_ne!(first, second);
        assert_eq!(second.into_iter().sum::<k256::Scalar>(), k256::Scalar::ZERO);
    }

    #[test]
    fn test_cancelling_pads_fail_closed() {
        // party 2 adds the pad shared with 3 and subtracts the one shared with 1
        let quorum = Quorum::first(3).unwrap();
        let mut seeds = BTreeMap::new();
        seeds.insert(1, [5u8; 32]);
        seeds.insert(3, [5u8; 32]);
        let seeds = PairwiseSeeds::new(seeds);

        let mut sampler = Sampler::<Secp256k1>::new(2, &seeds, &quorum, &[8u8; 32]).unwrap();
        let err = sampler.sample().unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
        assert_eq!(err.culprit(), None);
    }

    #[test]
    fn test_missing_seed_is_rejected() {
        let quorum = Quorum::first(3).unwrap();
        let result = Sampler::<Secp256k1>::new(1, &PairwiseSeeds::default(), &quorum, &[0u8; 32]);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
