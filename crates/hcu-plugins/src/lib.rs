//! # hcu Plugins
//!
//! Provider plugins: registry lookup by `"<class>-<name>"`, HTTP plugins
//! described by manifests, and decoding of the normalized wire shapes.

pub mod http;
pub mod registry;
pub mod wire;

pub use http::{HttpPlugin, PluginManifest};
pub use registry::{PROVIDER_CLASS, PluginRegistry, plugin_key};
pub use wire::{RawNotification, RawResource};
