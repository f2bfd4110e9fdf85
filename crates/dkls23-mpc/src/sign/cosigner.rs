//! One party's side of DKLs23 signing

use super::{messages::*, PartialSignature};
use crate::{
    commitment::{Commitment, CommitmentScheme, Witness},
    curve::{point_to_bytes, Curve},
    network::{check_senders, OutgoingUnicasts, RoundMessages},
    oblivious::{Alice, Bob},
    przs::Sampler,
    shard::Shard,
    transcript::Transcript,
    Error, Quorum, Result, SessionId, ShareholderId,
};
use elliptic_curve::{ff::Field, group::Group};
use rand_core::CryptoRngCore;
use std::collections::BTreeMap;
use tracing::debug;

/// Signing state machine for one session and one message.
///
/// Every ordered pair of quorum members runs one multiplication: the party
/// holds an [`Alice`] towards each peer, multiplying its nonce and key share,
/// and a [`Bob`] towards each peer, contributing the pair's random mask.
pub struct Cosigner<'a, C: Curve> {
    round: u32,
    me: ShareholderId,
    shard: &'a Shard<C>,
    quorum: Quorum,
    session_id: SessionId,
    message_hash: C::Scalar,
    transcript: Transcript,
    scheme: CommitmentScheme,
    alices: BTreeMap<ShareholderId, Alice<C>>,
    bobs: BTreeMap<ShareholderId, Bob<C>>,

    nonce: C::Scalar,
    phi: C::Scalar,
    big_r: C::Point,
    witness: Option<Witness>,
    commitments: BTreeMap<ShareholderId, Commitment>,
    key_share: C::Scalar,
    public_key_share: C::Point,
    chi: BTreeMap<ShareholderId, C::Scalar>,
    alice_shares: BTreeMap<ShareholderId, [C::Scalar; 2]>,
}

impl<'a, C: Curve> Cosigner<'a, C> {
    /// Cosigner for `message` over `quorum`, a qualified subset of the
    /// shard's shareholders.
    pub fn new(
        shard: &'a Shard<C>,
        quorum: Quorum,
        session_id: SessionId,
        message: &[u8],
    ) -> Result<Self> {
        let me = shard.id();
        if !quorum.contains(me) {
            return Err(Error::InvalidArgument(format!(
                "party {} is not in the signing quorum {}",
                me, quorum
            )));
        }
        if !quorum.is_subset(shard.shareholders()) {
            return Err(Error::InvalidArgument(format!(
                "{} is not a subset of the shareholders {}",
                quorum,
                shard.shareholders()
            )));
        }
        if quorum.len() < usize::from(shard.threshold()) {
            return Err(Error::InvalidArgument(format!(
                "quorum of {} is below the threshold {}",
                quorum.len(),
                shard.threshold()
            )));
        }
        if let Some(peer) = quorum.others(me).find(|peer| shard.zero_seeds().get(*peer).is_none()) {
            return Err(Error::InvalidArgument(format!(
                "no zero-sharing seed shared with party {}",
                peer
            )));
        }

        let mut transcript = Transcript::for_session::<C>(b"dkls23-mpc/sign", &session_id, &quorum);
        transcript.append_point::<C>(b"public key", shard.public_key());
        transcript.append_message(b"message", &C::digest(message));

        let mut fork = transcript.clone();
        fork.append_message(b"subprotocol", b"nonce commitment");
        let scheme = CommitmentScheme::new(&mut fork);

        let bobs = quorum
            .others(me)
            .map(|peer| (peer, Bob::new(me, peer, &transcript)))
            .collect();

        Ok(Self {
            round: 1,
            me,
            shard,
            quorum,
            session_id,
            message_hash: C::hash_to_scalar(message),
            transcript,
            scheme,
            alices: BTreeMap::new(),
            bobs,
            nonce: C::Scalar::ZERO,
            phi: C::Scalar::ZERO,
            big_r: C::Point::identity(),
            witness: None,
            commitments: BTreeMap::new(),
            key_share: C::Scalar::ZERO,
            public_key_share: C::Point::identity(),
            chi: BTreeMap::new(),
            alice_shares: BTreeMap::new(),
        })
    }

    /// Get current round
    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn quorum(&self) -> &Quorum {
        &self.quorum
    }

    /// Session transcript. Once round 5 succeeds it holds every opened nonce
    /// point and key share point, and is identical across the quorum.
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
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

    fn peers(&self) -> impl Iterator<Item = ShareholderId> + '_ {
        self.quorum.others(self.me)
    }

    fn nonce_payload(id: ShareholderId, big_r: &C::Point) -> Vec<u8> {
        let mut payload = id.to_be_bytes().to_vec();
        payload.extend_from_slice(&point_to_bytes(big_r));
        payload
    }

    /// Commit to a fresh nonce point and start base OT as Alice towards
    /// every peer.
    pub fn round1<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
    ) -> Result<(SignRound1Broadcast, OutgoingUnicasts<SignRound1Unicast<C>>)> {
        self.check_round(1)?;
        debug!(party_id = self.me, "DSG Round 1: Nonce commitment");

        self.nonce = C::Scalar::random(&mut *rng);
        self.big_r = C::base_mul(&self.nonce);
        let (commitment, witness) = self
            .scheme
            .commit(&Self::nonce_payload(self.me, &self.big_r), rng);
        self.witness = Some(witness);
        self.phi = C::Scalar::random(&mut *rng);

        let peers: Vec<ShareholderId> = self.peers().collect();
        let mut unicasts = OutgoingUnicasts::new();
        for peer in peers {
            let alice = Alice::new(self.me, peer, &self.transcript, rng);
            unicasts.insert(
                peer,
                SignRound1Unicast {
                    ot_setup: alice.setup_message(),
                },
            );
            self.alices.insert(peer, alice);
        }

        self.round += 1;
        Ok((SignRound1Broadcast { commitment }, unicasts))
    }

    /// Store the nonce commitments, answer base OT as Bob and rerandomize the
    /// key share with this session's zero share.
    pub fn round2<R: CryptoRngCore>(
        &mut self,
        broadcasts: RoundMessages<SignRound1Broadcast>,
        unicasts: RoundMessages<SignRound1Unicast<C>>,
        rng: &mut R,
    ) -> Result<OutgoingUnicasts<SignRound2Unicast<C>>> {
        self.check_round(2)?;
        check_senders(&broadcasts, self.peers())?;
        check_senders(&unicasts, self.peers())?;
        debug!(party_id = self.me, "DSG Round 2: Base OT choice");

        let mut outgoing = OutgoingUnicasts::new();
        for (peer, unicast) in &unicasts {
            let bob = self.bobs.get_mut(peer).ok_or_else(|| {
                Error::InvariantViolation(format!("no multiplication with party {}", peer))
            })?;
            let ot_choice = bob.choose(&unicast.ot_setup, rng)?;
            outgoing.insert(*peer, SignRound2Unicast { ot_choice });
        }
        self.commitments = broadcasts
            .into_iter()
            .map(|(peer, broadcast)| (peer, broadcast.commitment))
            .collect();

        let mut sampler = Sampler::<C>::new(
            self.me,
            self.shard.zero_seeds(),
            &self.quorum,
            &self.session_id,
        )?;
        let zeta = sampler.sample()?;
        self.key_share = self.shard.additive_share(&self.quorum)? + zeta;
        self.public_key_share = C::base_mul(&self.key_share);

        self.round += 1;
        Ok(outgoing)
    }

    /// Finish base OT as Alice and correct the choice bits as Bob.
    pub fn round3<R: CryptoRngCore>(
        &mut self,
        unicasts: RoundMessages<SignRound2Unicast<C>>,
        rng: &mut R,
    ) -> Result<OutgoingUnicasts<SignRound3Unicast>> {
        self.check_round(3)?;
        check_senders(&unicasts, self.peers())?;
        debug!(party_id = self.me, "DSG Round 3: OT correction");

        let mut outgoing = OutgoingUnicasts::new();
        for (peer, unicast) in &unicasts {
            let alice = self.alices.get_mut(peer).ok_or_else(|| {
                Error::InvariantViolation(format!("no multiplication with party {}", peer))
            })?;
            alice.receive_choices(&unicast.ot_choice)?;

            let bob = self.bobs.get_mut(peer).ok_or_else(|| {
                Error::InvariantViolation(format!("no multiplication with party {}", peer))
            })?;
            let (correction, chi) = bob.correction(rng)?;
            self.chi.insert(*peer, chi);
            outgoing.insert(*peer, SignRound3Unicast { correction });
        }

        self.round += 1;
        Ok(outgoing)
    }

    /// Multiply nonce and key share against every peer's mask and open the
    /// nonce commitment.
    pub fn round4(
        &mut self,
        unicasts: RoundMessages<SignRound3Unicast>,
    ) -> Result<(SignRound4Broadcast<C>, OutgoingUnicasts<SignRound4Unicast<C>>)> {
        self.check_round(4)?;
        check_senders(&unicasts, self.peers())?;
        debug!(party_id = self.me, "DSG Round 4: Multiplication");

        let witness = self
            .witness
            .ok_or_else(|| Error::InvariantViolation("nonce commitment not opened".into()))?;
        let operands = [self.nonce, self.key_share];

        let mut outgoing = OutgoingUnicasts::new();
        for (peer, unicast) in &unicasts {
            let alice = self.alices.get(peer).ok_or_else(|| {
                Error::InvariantViolation(format!("no multiplication with party {}", peer))
            })?;
            let chi = self.chi.get(peer).ok_or_else(|| {
                Error::InvariantViolation(format!("no mask shared with party {}", peer))
            })?;
            let (multiply, shares) = alice.multiply(&unicast.correction, &operands)?;
            outgoing.insert(
                *peer,
                SignRound4Unicast {
                    multiply,
                    gamma_u: C::base_mul(&shares[0]),
                    gamma_v: C::base_mul(&shares[1]),
                    psi: self.phi - chi,
                },
            );
            self.alice_shares.insert(*peer, shares);
        }

        let broadcast = SignRound4Broadcast {
            big_r: self.big_r,
            witness,
            public_key_share: self.public_key_share,
        };
        self.round += 1;
        Ok((broadcast, outgoing))
    }

    /// Check every peer's openings and multiplications, then fold the
    /// contributions into this party's partial signature.
    pub fn round5(
        &mut self,
        broadcasts: RoundMessages<SignRound4Broadcast<C>>,
        unicasts: RoundMessages<SignRound4Unicast<C>>,
    ) -> Result<PartialSignature<C>> {
        self.check_round(5)?;
        check_senders(&broadcasts, self.peers())?;
        check_senders(&unicasts, self.peers())?;
        debug!(party_id = self.me, "DSG Round 5: Consistency check");

        let mut big_r = self.big_r;
        let mut public_key = self.public_key_share;
        let mut psi = C::Scalar::ZERO;
        let mut cross_u = C::Scalar::ZERO;
        let mut cross_v = C::Scalar::ZERO;

        for (peer, unicast) in &unicasts {
            let opening = broadcasts.get(peer).ok_or(Error::MissingMessage { from: *peer })?;
            let commitment = self.commitments.get(peer).ok_or_else(|| {
                Error::InvariantViolation(format!("no nonce commitment from {}", peer))
            })?;
            if !self.scheme.verify(
                commitment,
                &Self::nonce_payload(*peer, &opening.big_r),
                &opening.witness,
            ) {
                return Err(Error::abort(*peer, "nonce commitment opening failed"));
            }
            if bool::from(opening.big_r.is_identity()) {
                return Err(Error::abort(*peer, "identity nonce point"));
            }

            let bob = self.bobs.get(peer).ok_or_else(|| {
                Error::InvariantViolation(format!("no multiplication with party {}", peer))
            })?;
            let chi = *self.chi.get(peer).ok_or_else(|| {
                Error::InvariantViolation(format!("no mask shared with party {}", peer))
            })?;
            let alice_shares = self.alice_shares.get(peer).ok_or_else(|| {
                Error::InvariantViolation(format!("no product shares with party {}", peer))
            })?;
            let bob_shares = bob.finalize(&unicast.multiply)?;

            if opening.big_r * chi - unicast.gamma_u != C::base_mul(&bob_shares[0]) {
                return Err(Error::abort(*peer, "nonce multiplication check failed"));
            }
            if opening.public_key_share * chi - unicast.gamma_v != C::base_mul(&bob_shares[1]) {
                return Err(Error::abort(*peer, "key share multiplication check failed"));
            }

            big_r += opening.big_r;
            public_key += opening.public_key_share;
            psi += unicast.psi;
            cross_u += alice_shares[0] + bob_shares[0];
            cross_v += alice_shares[1] + bob_shares[1];
        }

        if public_key != *self.shard.public_key() {
            return Err(Error::TotalAbort(
                "key share points do not sum to the public key".into(),
            ));
        }
        if bool::from(big_r.is_identity()) {
            return Err(Error::TotalAbort("combined nonce point is the identity".into()));
        }

        let r_x = C::affine_x(&big_r)?;
        let mut opened = Vec::with_capacity(self.quorum.len());
        for id in self.quorum.iter() {
            if id == self.me {
                opened.push((self.big_r, self.public_key_share));
            } else {
                let opening = broadcasts.get(&id).ok_or(Error::MissingMessage { from: id })?;
                opened.push((opening.big_r, opening.public_key_share));
            }
        }
        for (nonce_point, key_share_point) in &opened {
            self.transcript.append_point::<C>(b"nonce point", nonce_point);
            self.transcript.append_point::<C>(b"key share point", key_share_point);
        }
        self.transcript.append_point::<C>(b"combined nonce point", &big_r);
        self.transcript.append_scalar::<C>(b"nonce x", &r_x);

        let mask = self.phi + psi;
        let u = self.nonce * mask + cross_u;
        let v = self.key_share * mask + cross_v;
        let w = self.message_hash * self.phi + r_x * v;

        self.nonce = C::Scalar::ZERO;
        self.phi = C::Scalar::ZERO;
        self.key_share = C::Scalar::ZERO;
        self.alice_shares.clear();
        self.round += 1;

        Ok(PartialSignature { big_r, u, w })
    }
}
