//! Pseudorandom zero sharing
//!
//! A one-time [`Setup`] lets every pair of parties agree on a symmetric seed.
//! From then on a [`Sampler`] turns the seeds into field elements that sum to
//! zero across the quorum without any further communication.

use crate::ShareholderId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use zeroize::Zeroize;

mod sampler;
mod setup;

pub use sampler::Sampler;
pub use setup::{PrzsRound1Message, PrzsRound2Message, Setup};

/// Width of a pairwise seed
pub const SEED_LENGTH: usize = 32;

pub type Seed = [u8; SEED_LENGTH];

/// The seeds this party shares with each of its peers
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairwiseSeeds(BTreeMap<ShareholderId, Seed>);

impl PairwiseSeeds {
    pub fn new(seeds: BTreeMap<ShareholderId, Seed>) -> Self {
        Self(seeds)
    }

    pub fn get(&self, peer: ShareholderId) -> Option<&Seed> {
        self.0.get(&peer)
    }

    pub fn peers(&self) -> impl Iterator<Item = ShareholderId> + '_ {
        self.0.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for PairwiseSeeds {
    fn drop(&mut self) {
        for seed in self.0.values_mut() {
            seed.zeroize();
        }
    }
}

impl std::fmt::Debug for PairwiseSeeds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairwiseSeeds")
            .field("peers", &self.0.keys().collect::<Vec<_>>())
            .finish()
    }
}
