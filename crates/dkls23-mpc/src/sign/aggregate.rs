//! Combining partial signatures

use super::PartialSignature;
use crate::{
    curve::{scalar_to_bytes, Curve},
    Error, Result, Signature,
};
use elliptic_curve::{ff::Field, group::Group};

fn to_array<C: Curve>(scalar: &C::Scalar) -> Result<[u8; 32]> {
    scalar_to_bytes(scalar)
        .try_into()
        .map_err(|_| Error::InvariantViolation(format!("{} scalars are not 32 bytes", C::NAME)))
}

/// Combine every quorum member's partial signature into a low-S ECDSA
/// signature with recovery id, verified against `public_key` before it is
/// returned.
pub fn aggregate<C: Curve>(
    public_key: &C::Point,
    message: &[u8],
    partials: &[PartialSignature<C>],
) -> Result<Signature> {
    let first = partials
        .first()
        .ok_or_else(|| Error::InvalidArgument("no partial signatures".into()))?;
    let big_r = first.big_r;
    if partials.iter().any(|partial| partial.big_r != big_r) {
        return Err(Error::InvalidArgument(
            "partial signatures disagree on the nonce point".into(),
        ));
    }
    if bool::from(big_r.is_identity()) {
        return Err(Error::InvalidArgument("nonce point is the identity".into()));
    }

    let u: C::Scalar = partials.iter().map(|partial| partial.u).sum();
    let w: C::Scalar = partials.iter().map(|partial| partial.w).sum();
    if bool::from(w.is_zero()) {
        return Err(Error::TotalAbort("signature numerator is zero".into()));
    }
    let u_inverse = Option::<C::Scalar>::from(u.invert())
        .ok_or_else(|| Error::TotalAbort("signature denominator is zero".into()))?;

    let r = C::affine_x(&big_r)?;
    if bool::from(r.is_zero()) {
        return Err(Error::TotalAbort("nonce point has a zero x-coordinate".into()));
    }
    let mut s = w * u_inverse;
    let mut recovery_id = u8::from(C::y_is_odd(&big_r)) | (u8::from(C::x_overflows(&big_r)) << 1);
    if C::is_high(&s) {
        s = -s;
        recovery_id ^= 1;
    }

    C::verify_prehash(public_key, &C::digest(message), &r, &s)
        .map_err(|_| Error::InvalidSignature)?;

    Ok(Signature::new(
        to_array::<C>(&r)?,
        to_array::<C>(&s)?,
        recovery_id,
    ))
}
