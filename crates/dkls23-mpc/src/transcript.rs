//! Fiat-Shamir transcript
//!
//! A thin layer over [`merlin::Transcript`] that knows how to absorb curve
//! elements and squeeze out bytes or seeded streams. Cloning forks the
//! transcript: the copy carries the full history but diverges independently
//! afterwards, so sub-protocols can derive their own coins without touching
//! the parent.

use crate::{
    curve::{point_to_bytes, scalar_to_bytes, Curve},
    Quorum, SessionId,
};
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;
use std::fmt;

#[derive(Clone)]
pub struct Transcript {
    inner: merlin::Transcript,
}

impl Transcript {
    pub fn new(label: &'static [u8]) -> Self {
        Self {
            inner: merlin::Transcript::new(label),
        }
    }

    /// Transcript bound to one protocol execution.
    pub fn for_session<C: Curve>(
        label: &'static [u8],
        session_id: &SessionId,
        quorum: &Quorum,
    ) -> Self {
        let mut transcript = Self::new(label);
        transcript.append_message(b"curve", C::NAME.as_bytes());
        transcript.append_message(b"session id", session_id);
        transcript.append_quorum(quorum);
        transcript
    }

    pub fn append_message(&mut self, label: &'static [u8], message: &[u8]) {
        self.inner.append_message(label, message);
    }

    pub fn append_u64(&mut self, label: &'static [u8], value: u64) {
        self.inner.append_u64(label, value);
    }

    pub fn append_quorum(&mut self, quorum: &Quorum) {
        self.append_u64(b"quorum size", quorum.len() as u64);
        for id in quorum.iter() {
            self.append_u64(b"quorum member", u64::from(id));
        }
    }

    pub fn append_point<C: Curve>(&mut self, label: &'static [u8], point: &C::Point) {
        self.append_message(label, &point_to_bytes(point));
    }

    pub fn append_scalar<C: Curve>(&mut self, label: &'static [u8], scalar: &C::Scalar) {
        self.append_message(label, &scalar_to_bytes(scalar));
    }

    pub fn extract_bytes(&mut self, label: &'static [u8], dest: &mut [u8]) {
        self.inner.challenge_bytes(label, dest);
    }

    pub fn extract_array<const N: usize>(&mut self, label: &'static [u8]) -> [u8; N] {
        let mut out = [0u8; N];
        self.extract_bytes(label, &mut out);
        out
    }

    /// Seeded stream for deriving many public values at once.
    pub fn extract_rng(&mut self, label: &'static [u8]) -> ChaCha20Rng {
        ChaCha20Rng::from_seed(self.extract_array(label))
    }

    /// Fork bound to an ordered pair of parties.
    pub fn fork_pair(&self, label: &'static [u8], first: u16, second: u16) -> Self {
        let mut forked = self.clone();
        forked.append_message(b"fork", label);
        forked.append_u64(b"first", u64::from(first));
        forked.append_u64(b"second", u64::from(second));
        forked
    }
}

impl fmt::Debug for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transcript").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_history_extracts_identical_bytes() {
        let mut a = Transcript::new(b"test");
        let mut b = Transcript::new(b"test");
        for t in [&mut a, &mut b] {
            t.append_message(b"m", b"hello");
            t.append_u64(b"n", 7);
        }
        assert_eq!(a.extract_array::<32>(b"c"), b.extract_array::<32>(b"c"));
    }

    #[test]
    fn test_scalar_encoding_is_absorbed() {
        use crate::curve::Secp256k1;

        let mut a = Transcript::new(b"test");
        a.append_scalar::<Secp256k1>(b"s", &k256::Scalar::ONE);
        let mut b = Transcript::new(b"test");
        b.append_message(b"s", &scalar_to_bytes(&k256::Scalar::ONE));
        let mut c = Transcript::new(b"test");
        c.append_scalar::<Secp256k1>(b"s", &k256::Scalar::ZERO);

        let a = a.extract_array::<32>(b"c");
        assert_eq!(a, b.extract_array::<32>(b"c"));
        assert_ne!(a, c.extract_array::<32>(b"c"));
    }

    #[test]
    fn test_order_matters() {
        let mut a = Transcript::new(b"test");
        a.append_u64(b"x", 1);
        a.append_u64(b"x", 2);
        let mut b = Transcript::new(b"test");
        b.append_u64(b"x", 2);
        b.append_u64(b"x", 1);
        assert_ne!(a.extract_array::<32>(b"c"), b.extract_array::<32>(b"c"));
    }

    #[test]
    fn test_fork_does_not_touch_parent() {
        let mut parent = Transcript::new(b"test");
        parent.append_message(b"m", b"shared");
        let mut untouched = parent.clone();

        let mut child = parent.fork_pair(b"pair", 1, 2);
        child.append_message(b"m", b"child only");
        let _ = child.extract_array::<32>(b"c");

        assert_eq!(
            parent.extract_array::<32>(b"c"),
            untouched.extract_array::<32>(b"c")
        );
        assert_ne!(
            parent.fork_pair(b"pair", 1, 2).extract_array::<32>(b"c"),
            parent.fork_pair(b"pair", 2, 1).extract_array::<32>(b"c")
        );
    }
}
