//! Core types shared by every protocol in the crate

use crate::{curve::Curve, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Unique identifier for a party within a session. Always positive.
pub type ShareholderId = u16;

/// Unique identifier for a session
pub type SessionId = [u8; 32];

/// An immutable, ordered set of parties taking part in a (sub-)session.
///
/// Iteration is always ascending, which is what every transcript and every
/// pairwise sign convention in the crate relies on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<ShareholderId>", into = "Vec<ShareholderId>")]
pub struct Quorum(BTreeSet<ShareholderId>);

impl Quorum {
    /// Smallest quorum any protocol accepts.
    pub const MIN_SIZE: usize = 2;

    /// Build a quorum, rejecting zero ids, duplicates and sets smaller than two.
    pub fn new(ids: impl IntoIterator<Item = ShareholderId>) -> Result<Self> {
        let mut members = BTreeSet::new();
        for id in ids {
            if id == 0 {
                return Err(Error::InvalidArgument(
                    "shareholder ids must be positive".into(),
                ));
            }
            if !members.insert(id) {
                return Err(Error::InvalidArgument(format!(
                    "duplicate shareholder id {}",
                    id
                )));
            }
        }
        if members.len() < Self::MIN_SIZE {
            return Err(Error::InvalidArgument(format!(
                "quorum needs at least {} members, got {}",
                Self::MIN_SIZE,
                members.len()
            )));
        }
        Ok(Self(members))
    }

    /// Parties `1..=n`.
    pub fn first(n: u16) -> Result<Self> {
        Self::new(1..=n)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: ShareholderId) -> bool {
        self.0.contains(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = ShareholderId> + '_ {
        self.0.iter().copied()
    }

    /// Every member except `me`, ascending.
    pub fn others(&self, me: ShareholderId) -> impl Iterator<Item = ShareholderId> + '_ {
        self.0.iter().copied().filter(move |id| *id != me)
    }

    pub fn is_subset(&self, other: &Quorum) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn members(&self) -> &BTreeSet<ShareholderId> {
        &self.0
    }
}

impl TryFrom<Vec<ShareholderId>> for Quorum {
    type Error = Error;

    fn try_from(ids: Vec<ShareholderId>) -> Result<Self> {
        Self::new(ids)
    }
}

impl From<Quorum> for Vec<ShareholderId> {
    fn from(quorum: Quorum) -> Self {
        quorum.0.into_iter().collect()
    }
}

impl fmt::Display for Quorum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.0.iter().map(|id| id.to_string()).collect();
        write!(f, "{{{}}}", ids.join(","))
    }
}

/// ECDSA signature (r, s)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// R component
    pub r: [u8; 32],
    /// S component, always low-S
    pub s: [u8; 32],
    /// Recovery ID: bit 0 is the parity of R.y, bit 1 is set when R.x overflowed the group order
    pub recovery_id: u8,
}

impl Signature {
    /// Create a new signature
    pub fn new(r: [u8; 32], s: [u8; 32], recovery_id: u8) -> Self {
        Self { r, s, recovery_id }
    }

    /// Convert to DER format
    pub fn to_der(&self) -> Result<Vec<u8>> {
        // DER only encodes the two integers, so any 32-byte curve goes through k256 here
        let sig = k256::ecdsa::Signature::from_scalars(self.r, self.s)
            .map_err(|_| Error::InvalidSignature)?;
        Ok(sig.to_der().as_bytes().to_vec())
    }

    /// Convert to bytes (r || s)
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        bytes
    }

    /// Verify against `public_key` using the curve's standard ECDSA verifier.
    pub fn verify<C: Curve>(&self, public_key: &C::Point, message: &[u8]) -> Result<()> {
        let r = crate::curve::scalar_from_bytes::<C::Scalar>(&self.r)?;
        let s = crate::curve::scalar_from_bytes::<C::Scalar>(&self.s)?;
        C::verify_prehash(public_key, &C::digest(message), &r, &s)
    }
}

/// Configuration for DKG sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session identifier
    pub session_id: SessionId,

    /// Threshold (t-of-n)
    pub threshold: u16,

    /// This party's ID
    pub party_id: ShareholderId,

    /// Participating parties
    pub parties: Quorum,
}

impl SessionConfig {
    /// Create a new session configuration with a random session id
    pub fn new(parties: Quorum, threshold: u16, party_id: ShareholderId) -> Result<Self> {
        Self::with_session_id(rand::random(), parties, threshold, party_id)
    }

    /// Create a session configuration for a session id agreed out of band
    pub fn with_session_id(
        session_id: SessionId,
        parties: Quorum,
        threshold: u16,
        party_id: ShareholderId,
    ) -> Result<Self> {
        if usize::from(threshold) > parties.len() {
            return Err(Error::InvalidArgument(
                "threshold cannot exceed number of parties".into(),
            ));
        }
        if threshold < 2 {
            return Err(Error::InvalidArgument(
                "threshold must be at least 2".into(),
            ));
        }
        if !parties.contains(party_id) {
            return Err(Error::InvalidArgument(format!(
                "party {} is not in {}",
                party_id, parties
            )));
        }

        Ok(Self {
            session_id,
            threshold,
            party_id,
            parties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quorum_validation() {
        assert!(Quorum::new([1]).is_err());
        assert!(Quorum::new([0, 1, 2]).is_err());
        assert!(Quorum::new([1, 2, 2]).is_err());

        let quorum = Quorum::new([3, 1, 2]).unwrap();
        assert_eq!(quorum.iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(quorum.others(2).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(quorum.to_string(), "{1,2,3}");
    }

    #[test]
    fn test_quorum_serde_validates() {
        let quorum: Quorum = serde_json::from_str("[2,1]").unwrap();
        assert_eq!(quorum, Quorum::first(2).unwrap());
        assert!(serde_json::from_str::<Quorum>("[1,1]").is_err());
    }

    #[test]
    fn test_session_config_validation() {
        let parties = Quorum::first(3).unwrap();
        assert!(SessionConfig::new(parties.clone(), 2, 1).is_ok());
        assert!(SessionConfig::new(parties.clone(), 4, 1).is_err());
        assert!(SessionConfig::new(parties.clone(), 1, 1).is_err());
        assert!(SessionConfig::new(parties, 2, 4).is_err());
    }

    #[test]
    fn test_signature_bytes() {
        let sig = Signature::new([1u8; 32], [2u8; 32], 1);
        let bytes = sig.to_bytes();
        assert_eq!(&bytes[..32], &[1u8; 32]);
        assert_eq!(&bytes[32..], &[2u8; 32]);
        assert!(!sig.to_der().unwrap().is_empty());
    }
}
