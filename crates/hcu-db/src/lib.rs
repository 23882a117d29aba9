//! # hcu store
//!
//! SQLite-backed relational model of members, providers, resources, tags,
//! services and incidents, plus the two algorithms that operate on it:
//! the junction [`links`] reconciler and the tag [`matching`] engine.

pub mod db;
pub mod entities;
pub mod links;
pub mod matching;

pub use db::Db;
pub use links::{Junction, LinkReport, TargetKind};
pub use matching::MatchPolicy;
