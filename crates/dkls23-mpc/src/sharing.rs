//! Shamir secret sharing with Feldman commitments

use crate::{curve::Curve, Error, Result, ShareholderId};
use elliptic_curve::{ff::Field, group::Group};
use rand_core::CryptoRngCore;
use std::collections::BTreeMap;

/// Secret polynomial of degree `threshold - 1`
pub struct Polynomial<C: Curve> {
    coefficients: Vec<C::Scalar>,
}

impl<C: Curve> Polynomial<C> {
    /// Random polynomial with the given constant term
    pub fn random<R: CryptoRngCore>(constant: C::Scalar, threshold: u16, rng: &mut R) -> Self {
        let mut coefficients = Vec::with_capacity(usize::from(threshold));
        coefficients.push(constant);
        for _ in 1..threshold {
            coefficients.push(C::Scalar::random(&mut *rng));
        }
        Self { coefficients }
    }

    pub fn constant(&self) -> C::Scalar {
        self.coefficients[0]
    }

    /// Share of party `id`, i.e. `p(id)`
    pub fn evaluate(&self, id: ShareholderId) -> C::Scalar {
        let x = scalar_of::<C>(id);
        self.coefficients
            .iter()
            .rev()
            .fold(C::Scalar::ZERO, |acc, coefficient| acc * x + coefficient)
    }

    /// `a_k * G` for every coefficient
    pub fn commitments(&self) -> Vec<C::Point> {
        self.coefficients.iter().map(C::base_mul).collect()
    }
}

pub(crate) fn scalar_of<C: Curve>(id: ShareholderId) -> C::Scalar {
    C::Scalar::from(u64::from(id))
}

/// `p(id) * G` from the Feldman commitments
pub fn evaluate_commitments<C: Curve>(commitments: &[C::Point], id: ShareholderId) -> C::Point {
    let x = scalar_of::<C>(id);
    commitments
        .iter()
        .rev()
        .fold(C::Point::identity(), |acc, commitment| acc * x + commitment)
}

/// Whether `share` is consistent with the dealer's commitments
pub fn verify_share<C: Curve>(
    id: ShareholderId,
    share: &C::Scalar,
    commitments: &[C::Point],
) -> bool {
    C::base_mul(share) == evaluate_commitments::<C>(commitments, id)
}

/// Lagrange coefficient of `id` for interpolating at zero over `ids`
pub fn lagrange_coefficient<C: Curve>(
    id: ShareholderId,
    ids: impl IntoIterator<Item = ShareholderId>,
) -> Result<C::Scalar> {
    let x_i = scalar_of::<C>(id);
    let mut numerator = C::Scalar::ONE;
    let mut denominator = C::Scalar::ONE;
    let mut found = false;
    for j in ids {
        if j == id {
            found = true;
            continue;
        }
        let x_j = scalar_of::<C>(j);
        numerator *= x_j;
        denominator *= x_j - x_i;
    }
    if !found {
        return Err(Error::InvalidArgument(format!(
            "party {} is not among the interpolation points",
            id
        )));
    }
    let inverse = Option::<C::Scalar>::from(denominator.invert())
        .ok_or_else(|| Error::InvalidArgument("duplicate interpolation points".into()))?;
    Ok(numerator * inverse)
}

/// Turn a Shamir share into an additive share of the same secret over `ids`
pub fn to_additive<C: Curve>(
    id: ShareholderId,
    share: &C::Scalar,
    ids: impl IntoIterator<Item = ShareholderId>,
) -> Result<C::Scalar> {
    Ok(lagrange_coefficient::<C>(id, ids)? * share)
}

/// Interpolate the secret from a qualified set of shares
pub fn reconstruct<C: Curve>(shares: &BTreeMap<ShareholderId, C::Scalar>) -> Result<C::Scalar> {
    let mut secret = C::Scalar::ZERO;
    for (id, share) in shares {
        secret += to_additive::<C>(*id, share, shares.keys().copied())?;
    }
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::Secp256k1;
    use rand::rngs::OsRng;

    type Scalar = k256::Scalar;

    #[test]
    fn test_any_threshold_subset_reconstructs() {
        let secret = Scalar::random(&mut OsRng);
        let polynomial = Polynomial::<Secp256k1>::random(secret, 3, &mut OsRng);
        let shares: BTreeMap<ShareholderId, Scalar> =
            (1..=5).map(|id| (id, polynomial.evaluate(id))).collect();

        for subset in [[1, 2, 3], [2, 4, 5], [1, 3, 5]] {
            let picked = subset.iter().map(|id| (*id, shares[id])).collect();
            assert_eq!(reconstruct::<Secp256k1>(&picked).unwrap(), secret);
        }

        let too_few = [1, 2].iter().map(|id| (*id, shares[id])).collect();
        assert_ne!(reconstruct::<Secp256k1>(&too_few).unwrap(), secret);
    }

    #[test]
    fn test_feldman_verification() {
        let polynomial = Polynomial::<Secp256k1>::random(Scalar::random(&mut OsRng), 2, &mut OsRng);
        let commitments = polynomial.commitments();
        assert_eq!(commitments[0], Secp256k1::base_mul(&polynomial.constant()));

        let share = polynomial.evaluate(4);
        assert!(verify_share::<Secp256k1>(4, &share, &commitments));
        assert!(!verify_share::<Secp256k1>(3, &share, &commitments));
        assert!(!verify_share::<Secp256k1>(4, &(share + Scalar::ONE), &commitments));
    }

    #[test]
    fn test_zero_constant_polynomial() {
        let polynomial = Polynomial::<Secp256k1>::random(Scalar::ZERO, 3, &mut OsRng);
        assert!(bool::from(polynomial.commitments()[0].is_identity()));
        let shares = (1..=3).map(|id| (id, polynomial.evaluate(id))).collect();
        assert_eq!(reconstruct::<Secp256k1>(&shares).unwrap(), Scalar::ZERO);
    }

    #[test]
    fn test_lagrange_rejects_outsider() {
        assert!(lagrange_coefficient::<Secp256k1>(4, [1, 2, 3]).is_err());
    }
}
