//! Production wiring for the consensus engine.
//!
//! The engine in `accord-consensus` is a synchronous state machine; this
//! crate gives it a life on a tokio runtime:
//!
//! - [`TimeoutTicker`]: a task owning the single consensus timer
//! - [`Runner`]: the event loop that feeds the engine and executes its
//!   actions through the [`Network`] and [`ChainSink`] seams
//!
//! ```text
//!   network ──┐
//!   timers  ──┼──▶ Runner ──▶ ConsensusState::handle() ──▶ Actions
//!   client  ──┘       ▲                                      │
//!                     └──────── internal events ◀────────────┘
//! ```

mod runner;
mod timers;

pub use runner::{ChainSink, Network, Runner};
pub use timers::TimeoutTicker;
