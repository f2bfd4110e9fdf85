//! DSG message types

use crate::commitment::{Commitment, Witness};
use crate::curve::{serde_point, serde_scalar, Curve};
use crate::oblivious::{CorrectionMessage, MultiplyMessage, OtChoiceMessage, OtSetupMessage};
use serde::{Deserialize, Serialize};

/// Round 1 broadcast: commitment to the nonce point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRound1Broadcast {
    pub commitment: Commitment,
}

/// Round 1 unicast: base OT setup, with the sender as Alice
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SignRound1Unicast<C: Curve> {
    pub ot_setup: OtSetupMessage<C>,
}

/// Round 2 unicast: base OT choices, with the sender as Bob
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SignRound2Unicast<C: Curve> {
    pub ot_choice: OtChoiceMessage<C>,
}

/// Round 3 unicast: choice-bit correction, with the sender as Bob
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRound3Unicast {
    pub correction: CorrectionMessage,
}

/// Round 4 broadcast: opening of the nonce commitment and the key share point
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SignRound4Broadcast<C: Curve> {
    #[serde(with = "serde_point")]
    pub big_r: C::Point,
    pub witness: Witness,
    #[serde(with = "serde_point")]
    pub public_key_share: C::Point,
}

/// Round 4 unicast: multiplication masks and the consistency material
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SignRound4Unicast<C: Curve> {
    pub multiply: MultiplyMessage<C>,
    #[serde(with = "serde_point")]
    pub gamma_u: C::Point,
    #[serde(with = "serde_point")]
    pub gamma_v: C::Point,
    #[serde(with = "serde_scalar")]
    pub psi: C::Scalar,
}
