//! Repair of follower/leader metadata differences.
//!
//! This crate provides:
//!
//! - [`decide`] — the pure classification of one difference into a
//!   [`RepairStrategy`].
//! - [`RepairRunner`] — consumes newline-delimited difference records,
//!   gathers blob readability and leader freshness facts, classifies each
//!   entry and writes the winning metadata back when the repair is safe.

pub mod error;
pub mod orchestrator;
pub mod strategy;

pub use error::RepairError;
pub use orchestrator::{RepairConfig, RepairCounters, RepairOutcome, RepairRunner};
pub use strategy::{LeaderState, RepairSource, RepairStatus, RepairStrategy, ReplicaState, decide};
