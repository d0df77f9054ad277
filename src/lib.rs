//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (e.g., `core-bulk`, `provider-google-ads`, `bridge-desktop`).
//! Host applications can depend on `adsync-workspace` and enable the documented
//! features without needing to wire each crate individually.

#[cfg(feature = "google-ads")]
pub use core_bulk;
#[cfg(feature = "google-ads")]
pub use provider_google_ads;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop;
