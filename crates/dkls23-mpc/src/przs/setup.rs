//! Three-round commit/reveal agreement on pairwise seeds

use super::{PairwiseSeeds, Seed};
use crate::{
    commitment::{Commitment, CommitmentScheme, Witness},
    network::{check_senders, OutgoingUnicasts, RoundMessages},
    transcript::Transcript,
    Error, Quorum, Result, SessionId, ShareholderId,
};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use zeroize::Zeroize;

const SEED_CONTEXT: &str = "dkls23-mpc 2024 przs pairwise seed";

/// Commitment to the contribution destined for the recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrzsRound1Message {
    pub commitment: Commitment,
}

/// Opening of the round 1 commitment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrzsRound2Message {
    pub contribution: Seed,
    pub witness: Witness,
}

/// One party's side of the seed agreement.
#[derive(Debug)]
pub struct Setup {
    round: u32,
    me: ShareholderId,
    quorum: Quorum,
    session_id: SessionId,
    scheme: CommitmentScheme,
    contributions: BTreeMap<ShareholderId, (Seed, Witness)>,
    commitments: BTreeMap<ShareholderId, Commitment>,
}

impl Setup {
    pub fn new(
        me: ShareholderId,
        quorum: Quorum,
        session_id: SessionId,
        transcript: &Transcript,
    ) -> Result<Self> {
        if !quorum.contains(me) {
            return Err(Error::InvalidArgument(format!(
                "party {} is not in {}",
                me, quorum
            )));
        }
        let mut transcript = transcript.clone();
        transcript.append_message(b"subprotocol", b"przs setup");

        Ok(Self {
            round: 1,
            me,
            quorum,
            session_id,
            scheme: CommitmentScheme::new(&mut transcript),
            contributions: BTreeMap::new(),
            commitments: BTreeMap::new(),
        })
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

    /// Commit to a fresh contribution for every peer.
    pub fn round1<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
    ) -> Result<OutgoingUnicasts<PrzsRound1Message>> {
        self.check_round(1)?;
        debug!(party_id = self.me, "PRZS Round 1: Commit");

        let mut outgoing = OutgoingUnicasts::new();
        for peer in self.quorum.others(self.me) {
            let mut contribution = Seed::default();
            rng.fill_bytes(&mut contribution);
            let (commitment, witness) = self
                .scheme
                .commit(&commitment_payload(self.me, peer, &contribution), rng);
            self.contributions.insert(peer, (contribution, witness));
            outgoing.insert(peer, PrzsRound1Message { commitment });
        }

        self.round += 1;
        Ok(outgoing)
    }

    /// Store peer commitments and open ours.
    pub fn round2(
        &mut self,
        input: RoundMessages<PrzsRound1Message>,
    ) -> Result<OutgoingUnicasts<PrzsRound2Message>> {
        self.check_round(2)?;
        check_senders(&input, self.quorum.others(self.me))?;
        debug!(party_id = self.me, "PRZS Round 2: Open");

        let mut outgoing = OutgoingUnicasts::new();
        for (peer, (contribution, witness)) in &self.contributions {
            outgoing.insert(
                *peer,
                PrzsRound2Message {
                    contribution: *contribution,
                    witness: *witness,
                },
            );
        }
        self.commitments = input
            .into_iter()
            .map(|(peer, message)| (peer, message.commitment))
            .collect();

        self.round += 1;
        Ok(outgoing)
    }

    /// Verify the openings and fold both contributions of every pair into one seed.
    pub fn round3(&mut self, input: RoundMessages<PrzsRound2Message>) -> Result<PairwiseSeeds> {
        self.check_round(3)?;
        check_senders(&input, self.quorum.others(self.me))?;
        debug!(party_id = self.me, "PRZS Round 3: Combine");

        let mut seeds = BTreeMap::new();
        for (peer, opening) in &input {
            let commitment = self.commitments.get(peer).ok_or_else(|| {
                Error::InvariantViolation(format!("no stored commitment from {}", peer))
            })?;
            let payload = commitment_payload(*peer, self.me, &opening.contribution);
            if !self.scheme.verify(commitment, &payload, &opening.witness) {
                return Err(Error::abort(*peer, "zero-sharing seed does not open commitment"));
            }

            let (mine, _) = self.contributions.get(peer).ok_or_else(|| {
                Error::InvariantViolation(format!("no contribution for {}", peer))
            })?;
            seeds.insert(
                *peer,
                combine(&self.session_id, self.me, mine, *peer, &opening.contribution),
            );
        }

        for (contribution, _) in self.contributions.values_mut() {
            contribution.zeroize();
        }
        self.round += 1;
        Ok(PairwiseSeeds::new(seeds))
    }
}

fn commitment_payload(from: ShareholderId, to: ShareholderId, contribution: &Seed) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + contribution.len());
    payload.extend_from_slice(&from.to_be_bytes());
    payload.extend_from_slice(&to.to_be_bytes());
    payload.extend_from_slice(contribution);
    payload
}

/// The lower id's contribution always goes first, so both ends get the same seed.
fn combine(
    session_id: &SessionId,
    me: ShareholderId,
    mine: &Seed,
    peer: ShareholderId,
    theirs: &Seed,
) -> Seed {
    let (low, high) = if me < peer { (mine, theirs) } else { (theirs, mine) };
    let mut hasher = blake3::Hasher::new_derive_key(SEED_CONTEXT);
    hasher.update(session_id);
    hasher.update(&me.min(peer).to_be_bytes());
    hasher.update(&me.max(peer).to_be_bytes());
    hasher.update(low);
    hasher.update(high);
    *hasher.finalize().as_bytes()
}
