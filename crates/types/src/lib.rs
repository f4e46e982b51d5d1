//! Core types for Accord consensus.
//!
//! This crate provides the foundational data model shared by the consensus
//! engine, wire messages, and governance:
//!
//! - [`Hash`]: 32-byte Blake3 hash
//! - [`Address`]: 20-byte validator address derived from a public key
//! - [`View`]: (height, round) pair identifying a point in the protocol
//! - [`RoundStep`]: phase within a round
//! - [`TimeoutInfo`]: a scheduled timeout and its total order
//! - [`KeyPair`] / [`PublicKey`] / [`Signature`]: ed25519 signing
//! - [`Block`] / [`BlockHeader`]: the unit of agreement
//! - [`ValidatorSet`]: ordered validator membership and proposer selection

mod block;
mod crypto;
mod hash;
mod identifiers;
pub mod signing;
mod step;
mod timeout;
mod validator_set;
mod view;

pub use block::{Block, BlockHeader, NONCE_AUTH, NONCE_DROP};
pub use crypto::{KeyPair, PublicKey, Signature};
pub use hash::{Hash, HexError};
pub use identifiers::Address;
pub use step::RoundStep;
pub use timeout::TimeoutInfo;
pub use validator_set::{ProposerPolicy, Validator, ValidatorSet};
pub use view::View;
