//! Elliptic curve abstraction
//!
//! The protocol code is generic over [`Curve`], which fixes a prime-order
//! group and its scalar field as associated types so every protocol type is
//! monomorphized per curve. Group and field arithmetic come from the `group`
//! and `ff` traits re-exported by `elliptic-curve`; the trait itself only adds
//! the handful of ECDSA-specific operations the engine needs.

use crate::{Error, Result};
use elliptic_curve::{
    ff::PrimeField,
    group::{Group, GroupEncoding},
    subtle::ConditionallySelectable,
};
use sha2::{Digest, Sha256};
use std::fmt::Debug;

/// A prime-order group together with the ECDSA plumbing around it.
pub trait Curve: 'static + Clone + Copy + Debug + Default + Send + Sync + PartialEq + Eq {
    /// Name bound into transcripts.
    const NAME: &'static str;

    /// Scalar field element.
    type Scalar: PrimeField;

    /// Group element.
    type Point: Group<Scalar = Self::Scalar> + GroupEncoding + ConditionallySelectable;

    /// Affine x-coordinate of `point`, reduced into the scalar field.
    fn affine_x(point: &Self::Point) -> Result<Self::Scalar>;

    /// Whether the affine y-coordinate of `point` is odd.
    fn y_is_odd(point: &Self::Point) -> bool;

    /// Whether the affine x-coordinate of `point` is not smaller than the group order.
    fn x_overflows(point: &Self::Point) -> bool;

    /// Whether `scalar` lies in the upper half of the field.
    fn is_high(scalar: &Self::Scalar) -> bool;

    /// Reduce a 32-byte message digest into a scalar.
    fn digest_to_scalar(digest: &[u8; 32]) -> Self::Scalar;

    /// Verify an ECDSA signature `(r, s)` over a pre-hashed message.
    fn verify_prehash(
        public_key: &Self::Point,
        digest: &[u8; 32],
        r: &Self::Scalar,
        s: &Self::Scalar,
    ) -> Result<()>;

    /// SHA-256 digest of `message`, the ECDSA message representative input.
    fn digest(message: &[u8]) -> [u8; 32] {
        Sha256::digest(message).into()
    }

    /// ECDSA message representative of `message`.
    fn hash_to_scalar(message: &[u8]) -> Self::Scalar {
        Self::digest_to_scalar(&Self::digest(message))
    }

    /// `k * G`.
    fn base_mul(k: &Self::Scalar) -> Self::Point {
        Self::Point::generator() * k
    }
}

macro_rules! impl_curve {
    ($curve:ident, $krate:ident, $name:literal) => {
        impl Curve for $curve {
            const NAME: &'static str = $name;

            type Scalar = $krate::Scalar;
            type Point = $krate::ProjectivePoint;

            fn affine_x(point: &Self::Point) -> Result<Self::Scalar> {
                use $krate::elliptic_curve::{bigint::U256, ops::Reduce, point::AffineCoordinates};

                if bool::from(point.is_identity()) {
                    return Err(Error::InvalidArgument(
                        "identity point has no affine coordinates".into(),
                    ));
                }
                let x = point.to_affine().x();
                Ok(<$krate::Scalar as Reduce<U256>>::reduce_bytes(&x))
            }

            fn y_is_odd(point: &Self::Point) -> bool {
                use $krate::elliptic_curve::point::AffineCoordinates;

                bool::from(point.to_affine().y_is_odd())
            }

            fn x_overflows(point: &Self::Point) -> bool {
                use $krate::elliptic_curve::{bigint::U256, ops::Reduce, point::AffineCoordinates};

                let x = point.to_affine().x();
                let reduced = <$krate::Scalar as Reduce<U256>>::reduce_bytes(&x);
                reduced.to_repr() != x
            }

            fn is_high(scalar: &Self::Scalar) -> bool {
                use $krate::elliptic_curve::scalar::IsHigh;

                bool::from(scalar.is_high())
            }

            fn digest_to_scalar(digest: &[u8; 32]) -> Self::Scalar {
                use $krate::elliptic_curve::{bigint::U256, ops::Reduce};

                <$krate::Scalar as Reduce<U256>>::reduce_bytes(&(*digest).into())
            }

            fn verify_prehash(
                public_key: &Self::Point,
                digest: &[u8; 32],
                r: &Self::Scalar,
                s: &Self::Scalar,
            ) -> Result<()> {
                use $krate::ecdsa::{signature::hazmat::PrehashVerifier, Signature, VerifyingKey};

                let verifying_key = VerifyingKey::from_affine(public_key.to_affine())
                    .map_err(|_| Error::InvalidSignature)?;
                let signature = Signature::from_scalars(r.to_repr(), s.to_repr())
                    .map_err(|_| Error::InvalidSignature)?;
                verifying_key
                    .verify_prehash(digest, &signature)
                    .map_err(|_| Error::InvalidSignature)
            }
        }
    };
}

/// secp256k1, the default curve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Secp256k1;

/// NIST P-256.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct P256;

impl_curve!(Secp256k1, k256, "secp256k1");
impl_curve!(P256, p256, "P-256");

/// Compressed encoding of a point.
pub fn point_to_bytes<P: GroupEncoding>(point: &P) -> Vec<u8> {
    point.to_bytes().as_ref().to_vec()
}

/// Decode a compressed point, rejecting anything that is not on the curve.
pub fn point_from_bytes<P: GroupEncoding>(bytes: &[u8]) -> Result<P> {
    let mut repr = P::Repr::default();
    if repr.as_ref().len() != bytes.len() {
        return Err(Error::Deserialization(format!(
            "invalid point length {}",
            bytes.len()
        )));
    }
    repr.as_mut().copy_from_slice(bytes);
    Option::<P>::from(P::from_bytes(&repr))
        .ok_or_else(|| Error::Deserialization("invalid point encoding".into()))
}

/// Canonical encoding of a scalar.
pub fn scalar_to_bytes<F: PrimeField>(scalar: &F) -> Vec<u8> {
    scalar.to_repr().as_ref().to_vec()
}

/// Decode a canonical scalar.
pub fn scalar_from_bytes<F: PrimeField>(bytes: &[u8]) -> Result<F> {
    let mut repr = F::Repr::default();
    if repr.as_ref().len() != bytes.len() {
        return Err(Error::Deserialization(format!(
            "invalid scalar length {}",
            bytes.len()
        )));
    }
    repr.as_mut().copy_from_slice(bytes);
    Option::<F>::from(F::from_repr(repr))
        .ok_or_else(|| Error::Deserialization("non-canonical scalar".into()))
}

fn decode_hex<E: serde::de::Error>(s: &str) -> std::result::Result<Vec<u8>, E> {
    hex::decode(s).map_err(E::custom)
}

/// Serde adapter for a single point, as hex.
pub mod serde_point {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<P: GroupEncoding, S: Serializer>(
        point: &P,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(point_to_bytes(point)))
    }

    pub fn deserialize<'de, P: GroupEncoding, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<P, D::Error> {
        let s = String::deserialize(deserializer)?;
        point_from_bytes(&decode_hex::<D::Error>(&s)?).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for a vector of points.
pub mod serde_points {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<P: GroupEncoding, S: Serializer>(
        points: &[P],
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(points.iter().map(|p| hex::encode(point_to_bytes(p))))
    }

    pub fn deserialize<'de, P: GroupEncoding, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Vec<P>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| point_from_bytes(&decode_hex::<D::Error>(s)?).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Serde adapter for a map from shareholder to point.
pub mod serde_point_map {
    use super::*;
    use crate::ShareholderId;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<P: GroupEncoding, S: Serializer>(
        points: &BTreeMap<ShareholderId, P>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(
            points
                .iter()
                .map(|(id, p)| (*id, hex::encode(point_to_bytes(p)))),
        )
    }

    pub fn deserialize<'de, P: GroupEncoding, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<BTreeMap<ShareholderId, P>, D::Error> {
        BTreeMap::<ShareholderId, String>::deserialize(deserializer)?
            .into_iter()
            .map(|(id, s)| {
                let point = point_from_bytes(&decode_hex::<D::Error>(&s)?)
                    .map_err(serde::de::Error::custom)?;
                Ok((id, point))
            })
            .collect()
    }
}

/// Serde adapter for a single scalar, as hex.
pub mod serde_scalar {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<F: PrimeField, S: Serializer>(
        scalar: &F,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(scalar_to_bytes(scalar)))
    }

    pub fn deserialize<'de, F: PrimeField, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<F, D::Error> {
        let s = String::deserialize(deserializer)?;
        scalar_from_bytes(&decode_hex::<D::Error>(&s)?).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for a vector of scalars.
pub mod serde_scalars {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<F: PrimeField, S: Serializer>(
        scalars: &[F],
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(scalars.iter().map(|s| hex::encode(scalar_to_bytes(s))))
    }

    pub fn deserialize<'de, F: PrimeField, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Vec<F>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| scalar_from_bytes(&decode_hex::<D::Error>(s)?).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elliptic_curve::ff::Field;
    use rand::rngs::OsRng;

    fn roundtrip_encodings<C: Curve>() {
        let k = C::Scalar::random(&mut OsRng);
        let point = C::base_mul(&k);

        let decoded: C::Point = point_from_bytes(&point_to_bytes(&point)).unwrap();
        assert_eq!(decoded, point);

        let decoded: C::Scalar = scalar_from_bytes(&scalar_to_bytes(&k)).unwrap();
        assert_eq!(decoded, k);
    }

    #[test]
    fn test_encodings() {
        roundtrip_encodings::<Secp256k1>();
        roundtrip_encodings::<P256>();
    }

    #[test]
    fn test_rejects_bad_lengths_and_points() {
        assert!(point_from_bytes::<k256::ProjectivePoint>(&[2u8; 10]).is_err());
        // 0x02 || 0xff..ff is not a valid x-coordinate on secp256k1
        let mut bytes = vec![0xffu8; 33];
        bytes[0] = 0x02;
        assert!(point_from_bytes::<k256::ProjectivePoint>(&bytes).is_err());
        assert!(scalar_from_bytes::<k256::Scalar>(&[0xffu8; 32]).is_err());
    }

    #[test]
    fn test_affine_x_of_identity_fails() {
        let identity = k256::ProjectivePoint::IDENTITY;
        assert!(Secp256k1::affine_x(&identity).is_err());
    }

    #[test]
    fn test_verify_prehash_accepts_standard_signature() {
        use k256::ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey};

        let signing_key = SigningKey::random(&mut OsRng);
        let digest = Secp256k1::digest(b"Hello World");
        let signature: Signature = signing_key.sign_prehash(&digest).unwrap();
        let public_key = k256::ProjectivePoint::from(*signing_key.verifying_key().as_affine());

        let (r, s) = signature.split_scalars();
        let (r, s) = (*r, *s);
        Secp256k1::verify_prehash(&public_key, &digest, &r, &s).unwrap();
        assert!(Secp256k1::verify_prehash(&public_key, &digest, &s, &r).is_err());
    }
}
