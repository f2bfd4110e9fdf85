//! Long-term key material of one party

use crate::{
    curve::{
        point_to_bytes, scalar_from_bytes, serde_point, serde_point_map, serde_points,
        serde_scalar, Curve,
    },
    przs::PairwiseSeeds,
    sharing::{evaluate_commitments, to_additive},
    Error, Quorum, Result, ShareholderId,
};
use derivation_path::{ChildIndex, DerivationPath};
use elliptic_curve::group::Group;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::collections::BTreeMap;
use std::fmt;
use zeroize::Zeroize;

/// Key share held by a party after DKG
#[derive(Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Shard<C: Curve> {
    /// This party's ID
    pub(crate) id: ShareholderId,

    /// Threshold
    pub(crate) threshold: u16,

    /// Every party holding a share of the key
    pub(crate) shareholders: Quorum,

    /// Shamir share `p(id)`
    #[serde(with = "serde_scalar")]
    pub(crate) secret_share: C::Scalar,

    #[serde(with = "serde_point")]
    pub(crate) public_key: C::Point,

    /// `p(j) * G` for every shareholder
    #[serde(with = "serde_point_map")]
    pub(crate) partial_public_keys: BTreeMap<ShareholderId, C::Point>,

    /// Feldman commitments to the combined polynomial
    #[serde(with = "serde_points")]
    pub(crate) feldman_commitments: Vec<C::Point>,

    /// Seeds shared with every other shareholder for zero sharing
    pub(crate) zero_seeds: PairwiseSeeds,

    /// Chain code for BIP32 derivation
    pub(crate) chain_code: [u8; 32],
}

impl<C: Curve> Shard<C> {
    pub fn id(&self) -> ShareholderId {
        self.id
    }

    pub fn threshold(&self) -> u16 {
        self.threshold
    }

    pub fn shareholders(&self) -> &Quorum {
        &self.shareholders
    }

    pub fn public_key(&self) -> &C::Point {
        &self.public_key
    }

    /// Compressed public key
    pub fn public_key_bytes(&self) -> Vec<u8> {
        point_to_bytes(&self.public_key)
    }

    pub fn partial_public_keys(&self) -> &BTreeMap<ShareholderId, C::Point> {
        &self.partial_public_keys
    }

    pub fn feldman_commitments(&self) -> &[C::Point] {
        &self.feldman_commitments
    }

    pub fn zero_seeds(&self) -> &PairwiseSeeds {
        &self.zero_seeds
    }

    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    /// The raw Shamir share. Only needed for backups and reconstruction tests.
    pub fn secret_share(&self) -> &C::Scalar {
        &self.secret_share
    }

    /// This party's additive share of the key over the signing quorum
    pub fn additive_share(&self, quorum: &Quorum) -> Result<C::Scalar> {
        if !quorum.is_subset(&self.shareholders) {
            return Err(Error::InvalidArgument(format!(
                "{} is not a subset of the shareholders {}",
                quorum, self.shareholders
            )));
        }
        to_additive::<C>(self.id, &self.secret_share, quorum.iter())
    }

    /// Check that every piece of public material is consistent with the rest.
    pub fn validate(&self) -> Result<()> {
        if !self.shareholders.contains(self.id) {
            return Err(Error::InvalidArgument(format!(
                "shard owner {} is not a shareholder",
                self.id
            )));
        }
        if self.threshold < 2 || usize::from(self.threshold) > self.shareholders.len() {
            return Err(Error::InvalidArgument(format!(
                "invalid threshold {} for {} shareholders",
                self.threshold,
                self.shareholders.len()
            )));
        }
        if self.feldman_commitments.len() != usize::from(self.threshold) {
            return Err(Error::InvalidArgument(
                "commitment count does not match threshold".into(),
            ));
        }
        if self.feldman_commitments[0] != self.public_key {
            return Err(Error::InvalidArgument(
                "public key is not the constant commitment".into(),
            ));
        }
        if bool::from(self.public_key.is_identity()) {
            return Err(Error::InvalidArgument("public key is the identity".into()));
        }
        if self.partial_public_keys.keys().copied().ne(self.shareholders.iter()) {
            return Err(Error::InvalidArgument(
                "partial public keys do not match shareholders".into(),
            ));
        }
        for (id, partial) in &self.partial_public_keys {
            if *partial != evaluate_commitments::<C>(&self.feldman_commitments, *id) {
                return Err(Error::InvalidArgument(format!(
                    "partial public key of {} is inconsistent",
                    id
                )));
            }
        }
        if self.partial_public_keys.get(&self.id) != Some(&C::base_mul(&self.secret_share)) {
            return Err(Error::InvalidArgument(
                "secret share does not match partial public key".into(),
            ));
        }
        if let Some(peer) = self
            .shareholders
            .others(self.id)
            .find(|peer| self.zero_seeds.get(*peer).is_none())
        {
            return Err(Error::InvalidArgument(format!(
                "no zero-sharing seed for party {}",
                peer
            )));
        }
        Ok(())
    }

    /// Non-hardened child shard at `index`.
    ///
    /// Every party derives the same tweak from public data, so a quorum of
    /// children signs for the child public key.
    pub fn derive(&self, index: u32) -> Result<Shard<C>> {
        if index >= 0x8000_0000 {
            return Err(Error::Derivation(
                "hardened derivation not supported in threshold setting".into(),
            ));
        }

        let mut hmac = Hmac::<Sha512>::new_from_slice(&self.chain_code)
            .map_err(|e| Error::Derivation(e.to_string()))?;
        hmac.update(&self.public_key_bytes());
        hmac.update(&index.to_be_bytes());
        let mut output = hmac.finalize().into_bytes();

        let tweak = tweak_from_bytes::<C>(&output[..32]);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&output[32..]);
        output.as_mut_slice().zeroize();
        let tweak = tweak.map_err(|_| {
            Error::Derivation(format!(
                "tweak for index {} is not below the group order, use the next index",
                index
            ))
        })?;

        let shift = C::base_mul(&tweak);
        let mut child = self.clone();
        child.secret_share += tweak;
        child.public_key += shift;
        if let Some(constant) = child.feldman_commitments.first_mut() {
            *constant += shift;
        }
        for partial in child.partial_public_keys.values_mut() {
            *partial += shift;
        }
        child.chain_code = chain_code;

        if bool::from(child.public_key.is_identity()) {
            return Err(Error::Derivation("derived public key is the identity".into()));
        }
        Ok(child)
    }

    /// Derive along a path such as `m/0/7`
    pub fn derive_path(&self, path: &str) -> Result<Shard<C>> {
        let path: DerivationPath = path
            .parse()
            .map_err(|e| Error::Derivation(format!("Invalid path: {}", e)))?;

        let mut current = self.clone();
        for child_index in &path {
            let index = match child_index {
                ChildIndex::Normal(index) => *index,
                ChildIndex::Hardened(_) => {
                    return Err(Error::Derivation(
                        "Hardened derivation not supported".into(),
                    ));
                }
            };
            current = current.derive(index)?;
        }
        Ok(current)
    }
}

/// Parse `I_L` as a canonical scalar. BIP32 skips the index instead of
/// reducing a value at or above the group order.
fn tweak_from_bytes<C: Curve>(bytes: &[u8]) -> Result<C::Scalar> {
    scalar_from_bytes(bytes)
}

impl<C: Curve> fmt::Debug for Shard<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shard")
            .field("curve", &C::NAME)
            .field("id", &self.id)
            .field("threshold", &self.threshold)
            .field("shareholders", &self.shareholders)
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish_non_exhaustive()
    }
}
