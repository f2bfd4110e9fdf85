//! Oblivious transfer based two-party multiplication
//!
//! This module provides the multiplication backend of the signing protocol:
//! - Batched base OT over the signing curve
//! - Random VOLE built on it, turning Alice's operands and Bob's random
//!   input into additive shares of their products

pub mod base_ot;
pub mod rvole;

pub use rvole::{
    Alice, Bob, CorrectionMessage, MultiplyMessage, OtChoiceMessage, OtSetupMessage, BATCH_SIZE,
    OPERANDS, STATISTICAL_SECURITY,
};
