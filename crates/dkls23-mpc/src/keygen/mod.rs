//! Distributed Key Generation (DKG) module
//!
//! Every shareholder deals a Feldman-verified Shamir sharing of a random
//! secret; the key is the sum of the dealt secrets. The pairwise zero-sharing
//! seeds are agreed in the same three rounds. Key refresh reuses the
//! participant with polynomials whose constant term is zero, which replaces
//! every share without moving the public key.

mod dkg;
mod key_refresh;
mod messages;

pub use dkg::run_dkg;
pub use key_refresh::run_key_refresh;
pub use messages::*;

use crate::{
    curve::Curve,
    network::{check_senders, OutgoingUnicasts, RoundMessages},
    przs::{self, PrzsRound1Message, PrzsRound2Message},
    sharing::{evaluate_commitments, verify_share, Polynomial},
    shard::Shard,
    transcript::Transcript,
    Error, Quorum, Result, SessionConfig, SessionId, ShareholderId,
};
use elliptic_curve::{ff::Field, group::Group};
use rand_core::CryptoRngCore;
use std::collections::BTreeMap;

/// DKG state machine
pub struct Participant<C: Curve> {
    round: u32,
    me: ShareholderId,
    threshold: u16,
    shareholders: Quorum,
    transcript: Transcript,
    previous: Option<Shard<C>>,
    polynomial: Option<Polynomial<C>>,
    przs: przs::Setup,
    commitments: BTreeMap<ShareholderId, Vec<C::Point>>,
    shares: BTreeMap<ShareholderId, C::Scalar>,
}

impl<C: Curve> Participant<C> {
    /// Fresh key generation
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let mut transcript =
            Transcript::for_session::<C>(b"dkls23-mpc/keygen", &config.session_id, &config.parties);
        transcript.append_u64(b"threshold", u64::from(config.threshold));
        Self::with_transcript(
            config.party_id,
            config.threshold,
            config.parties.clone(),
            config.session_id,
            transcript,
            None,
        )
    }

    /// Share refresh for every holder of `shard`'s key
    pub fn refresh(shard: &Shard<C>, session_id: SessionId) -> Result<Self> {
        shard.validate()?;
        let mut transcript = Transcript::for_session::<C>(
            b"dkls23-mpc/refresh",
            &session_id,
            shard.shareholders(),
        );
        transcript.append_u64(b"threshold", u64::from(shard.threshold()));
        transcript.append_point::<C>(b"public key", shard.public_key());
        Self::with_transcript(
            shard.id(),
            shard.threshold(),
            shard.shareholders().clone(),
            session_id,
            transcript,
            Some(shard.clone()),
        )
    }

    fn with_transcript(
        me: ShareholderId,
        threshold: u16,
        shareholders: Quorum,
        session_id: SessionId,
        transcript: Transcript,
        previous: Option<Shard<C>>,
    ) -> Result<Self> {
        if threshold < 2 || usize::from(threshold) > shareholders.len() {
            return Err(Error::InvalidArgument(format!(
                "invalid threshold {} for {} shareholders",
                threshold,
                shareholders.len()
            )));
        }
        let przs = przs::Setup::new(me, shareholders.clone(), session_id, &transcript)?;

        Ok(Self {
            round: 1,
            me,
            threshold,
            shareholders,
            transcript,
            previous,
            polynomial: None,
            przs,
            commitments: BTreeMap::new(),
            shares: BTreeMap::new(),
        })
    }

    /// Get current round
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Protocol transcript; equal across honest parties once round 2 is done
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    fn is_refresh(&self) -> bool {
        self.previous.is_some()
    }

    fn check_round(&self, expected: u32) -> Result<()> {
        if self.round != expected {
            return Err(Error::RoundMismatch {
                expected,
                actual: self.round,
            });
        }
        Ok(())
    }

    /// Deal a polynomial and start the zero-sharing setup.
    pub fn round1<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
    ) -> Result<(DkgRound1Broadcast<C>, OutgoingUnicasts<DkgRound1Unicast<C>>)> {
        self.check_round(1)?;

        let constant = if self.is_refresh() {
            C::Scalar::ZERO
        } else {
            C::Scalar::random(&mut *rng)
        };
        let polynomial = Polynomial::<C>::random(constant, self.threshold, rng);
        let commitments = polynomial.commitments();
        let mut przs_messages = self.przs.round1(rng)?;

        let mut unicasts = OutgoingUnicasts::new();
        for peer in self.shareholders.others(self.me) {
            let przs = przs_messages.remove(&peer).ok_or_else(|| {
                Error::InvariantViolation(format!("no zero-sharing message for {}", peer))
            })?;
            unicasts.insert(
                peer,
                DkgRound1Unicast {
                    share: polynomial.evaluate(peer),
                    przs,
                },
            );
        }

        self.shares.insert(self.me, polynomial.evaluate(self.me));
        self.commitments.insert(self.me, commitments.clone());
        self.polynomial = Some(polynomial);
        self.round += 1;
        Ok((DkgRound1Broadcast { commitments }, unicasts))
    }

    /// Verify every dealt share against its dealer's commitments.
    pub fn round2(
        &mut self,
        broadcasts: RoundMessages<DkgRound1Broadcast<C>>,
        unicasts: RoundMessages<DkgRound1Unicast<C>>,
    ) -> Result<OutgoingUnicasts<DkgRound2Unicast>> {
        self.check_round(2)?;
        check_senders(&broadcasts, self.shareholders.others(self.me))?;
        check_senders(&unicasts, self.shareholders.others(self.me))?;

        let mut przs_input: RoundMessages<PrzsRound1Message> = RoundMessages::new();
        for (dealer, unicast) in unicasts {
            let commitments = &broadcasts
                .get(&dealer)
                .ok_or(Error::MissingMessage { from: dealer })?
                .commitments;
            if commitments.len() != usize::from(self.threshold) {
                return Err(Error::abort(
                    dealer,
                    format!(
                        "expected {} commitments, got {}",
                        self.threshold,
                        commitments.len()
                    ),
                ));
            }
            if self.is_refresh() && !bool::from(commitments[0].is_identity()) {
                return Err(Error::abort(
                    dealer,
                    "refresh polynomial has a non-zero constant term",
                ));
            }
            if !verify_share::<C>(self.me, &unicast.share, commitments) {
                return Err(Error::abort(dealer, "share does not match commitments"));
            }
            self.shares.insert(dealer, unicast.share);
            przs_input.insert(dealer, unicast.przs);
        }
        for (dealer, broadcast) in broadcasts {
            self.commitments.insert(dealer, broadcast.commitments);
        }

        for (dealer, commitments) in &self.commitments {
            self.transcript.append_u64(b"dealer", u64::from(*dealer));
            for commitment in commitments {
                self.transcript.append_point::<C>(b"commitment", commitment);
            }
        }

        let przs_output = self.przs.round2(przs_input)?;
        let unicasts = przs_output
            .into_iter()
            .map(|(peer, przs)| (peer, DkgRound2Unicast { przs }))
            .collect();

        self.round += 1;
        Ok(unicasts)
    }

    /// Finish the zero-sharing setup and assemble the shard.
    pub fn round3(&mut self, unicasts: RoundMessages<DkgRound2Unicast>) -> Result<Shard<C>> {
        self.check_round(3)?;
        check_senders(&unicasts, self.shareholders.others(self.me))?;

        let przs_input: RoundMessages<PrzsRound2Message> = unicasts
            .into_iter()
            .map(|(peer, unicast)| (peer, unicast.przs))
            .collect();
        let zero_seeds = self.przs.round3(przs_input)?;

        let mut feldman_commitments = vec![C::Point::identity(); usize::from(self.threshold)];
        for commitments in self.commitments.values() {
            for (sum, commitment) in feldman_commitments.iter_mut().zip(commitments) {
                *sum += commitment;
            }
        }
        let mut secret_share: C::Scalar = self.shares.values().sum();

        let chain_code = match &self.previous {
            Some(previous) => {
                for (sum, commitment) in feldman_commitments
                    .iter_mut()
                    .zip(previous.feldman_commitments())
                {
                    *sum += commitment;
                }
                secret_share += previous.secret_share();
                *previous.chain_code()
            }
            None => self.transcript.extract_array(b"chain code"),
        };

        let public_key = feldman_commitments[0];
        if bool::from(public_key.is_identity()) {
            return Err(Error::TotalAbort("joint public key is the identity".into()));
        }
        if let Some(previous) = &self.previous {
            if public_key != *previous.public_key() {
                return Err(Error::TotalAbort("refresh moved the public key".into()));
            }
        }

        let partial_public_keys = self
            .shareholders
            .iter()
            .map(|id| (id, evaluate_commitments::<C>(&feldman_commitments, id)))
            .collect();

        let shard = Shard {
            id: self.me,
            threshold: self.threshold,
            shareholders: self.shareholders.clone(),
            secret_share,
            public_key,
            partial_public_keys,
            feldman_commitments,
            zero_seeds,
            chain_code,
        };
        shard
            .validate()
            .map_err(|e| Error::InvariantViolation(format!("assembled shard: {}", e)))?;

        self.polynomial = None;
        self.shares.clear();
        self.round += 1;
        Ok(shard)
    }
}
