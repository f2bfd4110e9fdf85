//! # DKLs23 MPC
//!
//! Round-based threshold ECDSA over a pluggable message router.
//!
//! This crate provides:
//! - A [`network::Router`] abstraction with unicast, broadcast and echo
//!   broadcast exchanges, plus an in-memory router
//! - Pseudorandom zero sharing ([`przs`]): a three-round seed agreement and a
//!   communication-free sampler of additive zero shares
//! - Distributed Key Generation and key refresh ([`keygen`])
//! - DKLs23 signing ([`sign`]): a five-round cosigner and the aggregation of
//!   partial signatures into a verified, low-S ECDSA signature
//!
//! Every protocol is a state machine whose round methods take the previous
//! round's messages and return this round's; the async runners drive them
//! over a [`network::Router`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use dkls23_mpc::{keygen, sign, network::MemoryNetwork, Quorum, SessionConfig, Secp256k1};
//!
//! let shard = keygen::run_dkg::<Secp256k1, _>(&config, &router, None).await?;
//! let signature = sign::run_dsg(&shard, &quorum, session_id, b"Hello World", &router, None).await?;
//! ```

pub mod commitment;
pub mod curve;
pub mod error;
pub mod keygen;
pub mod network;
pub mod oblivious;
pub mod przs;
pub mod sharing;
pub mod shard;
pub mod sign;
pub mod transcript;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use curve::{Curve, Secp256k1, P256};
pub use error::{Error, ErrorKind, Result};
pub use shard::Shard;
pub use sign::{aggregate, PartialSignature};
pub use types::{Quorum, SessionConfig, SessionId, ShareholderId, Signature};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default threshold for a 3-party setup
pub const DEFAULT_THRESHOLD: u16 = 2;

/// Default number of parties
pub const DEFAULT_PARTIES: u16 = 3;
