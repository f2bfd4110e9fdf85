//! DKG message types

use crate::curve::{serde_points, serde_scalar, Curve};
use crate::przs::{PrzsRound1Message, PrzsRound2Message};
use serde::{Deserialize, Serialize};

/// Round 1 broadcast: Feldman commitments to the dealt polynomial
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct DkgRound1Broadcast<C: Curve> {
    #[serde(with = "serde_points")]
    pub commitments: Vec<C::Point>,
}

/// Round 1 unicast: the recipient's share and the first zero-sharing flow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct DkgRound1Unicast<C: Curve> {
    #[serde(with = "serde_scalar")]
    pub share: C::Scalar,
    pub przs: PrzsRound1Message,
}

/// Round 2 unicast: zero-sharing opening
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkgRound2Unicast {
    pub przs: PrzsRound2Message,
}
