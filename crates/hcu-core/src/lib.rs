//! # hcu core
//!
//! Shared vocabulary for the hcu workspace: configuration, the error
//! taxonomy, the relational domain model and the provider plugin capability.
//!
//! ## Architecture
//! ```text
//! Scheduler (repeater chain)
//!   ├── worker.ResourceSync      ─┐
//!   └── worker.NotificationWatch ─┤→ ProviderPlugin (check/fetch)
//!                                 └→ Store: upsert → LinkReconciler
//! Read path: Service → tags → resources → incidents (TagMatcher)
//! ```

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::HcuConfig;
pub use error::{HcuError, Result};
