//! # hcu Sync
//!
//! Background orchestrators that pull provider data through plugins:
//! - [`ResourceSync`]: inventory, tags, users and provider links
//! - [`NotificationWatch`]: incidents and their affected resources
//!
//! Both are scheduler workers; [`account::register_provider`] triggers the
//! first resource sync of a new provider.

pub mod account;
pub mod notification_watch;
pub mod pass;
pub mod resource_sync;

#[cfg(test)]
pub(crate) mod testing;

pub use account::{NewProvider, register_provider};
pub use notification_watch::{NOTIFICATION_WATCH, NotificationWatch};
pub use pass::SyncReport;
pub use resource_sync::{RESOURCE_SYNC, ResourceSync};
