//! Validator-set governance through header votes.
//!
//! Membership changes are proposed in block headers: a proposer names a
//! candidate validator and a nonce-encoded authorize/drop flag, and every
//! sealed header counts as one vote from its proposer. A [`Snapshot`] folds a
//! run of headers into the resulting validator set, applying a change once a
//! strict majority of the current set voted for it.
//!
//! Snapshots are persisted per block hash so a restarting node resolves the
//! validator set for any chain position without replaying the whole chain.

mod snapshot;

pub use snapshot::{GovernanceError, GovernanceVote, Snapshot, TallyEntry};
