//! Crate root: a peer-to-peer mining pool's share chain core.
//!
//! Wires together the wire format ([`pack`], [`share`]), the forest of
//! shares a node keeps ([`tracker`]), the payout math that walks it
//! ([`weights`]), the head-selection algorithm that runs after every share
//! arrives ([`think`]), and the append-only on-disk log that survives a
//! restart ([`store`]). This crate has no network transport, no mining
//! loop and no block submission of its own (see SPEC_FULL.md §1) — it is
//! the core a pool daemon embeds and drives.

pub mod bits;
pub mod error;
pub mod hash;
pub mod hashlink;
pub mod merkle;
pub mod pack;
pub mod params;
pub mod script;
pub mod share;
pub mod store;
pub mod think;
pub mod tracker;
pub mod tx;
pub mod weights;
pub mod work;

pub use error::{Result, ShareChainError};
pub use hash::Hash256;
pub use params::Params;
pub use share::AnyShare;
pub use store::ShareStore;
pub use think::{think, ThinkOutcome, WantedShare};
pub use tracker::{Tracker, VerifiedTracker};
