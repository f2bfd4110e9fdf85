//! Distributed Signature Generation (DSG) module
//!
//! Implements the five-round DKLs23 signing protocol. Each quorum member
//! runs a [`Cosigner`], the resulting partial signatures are exchanged, and
//! [`aggregate`] turns them into a verified ECDSA signature.

mod aggregate;
mod cosigner;
mod dsg;
mod messages;

pub use aggregate::aggregate;
pub use cosigner::Cosigner;
pub use dsg::run_dsg;
pub use messages::*;

use crate::curve::{serde_point, serde_scalar, Curve};
use serde::{Deserialize, Serialize};

/// Partial signature from one party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct PartialSignature<C: Curve> {
    /// Combined nonce point, equal across the quorum
    #[serde(with = "serde_point")]
    pub big_r: C::Point,
    /// Share of `r * phi`
    #[serde(with = "serde_scalar")]
    pub u: C::Scalar,
    /// Share of `phi * (m + r_x * sk)`
    #[serde(with = "serde_scalar")]
    pub w: C::Scalar,
}
