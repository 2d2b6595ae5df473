//! # Relay Configuration Module
//!
//! Holds the immutable settings block every relay component receives at
//! construction time. Nothing here is global: the binary builds one
//! [`RelaySettings`] from its CLI, environment and config-file layers and passes
//! it down by reference.
//!
//! ## Contained Modules:
//! - **`settings`**: endpoint, credentials, cadences and failure budgets.
//! - **`location`**: the operator-supplied reference location and its
//!   normalization rules.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Reference latitude/longitude validation.
pub mod location;
/// The immutable settings block and its defaults.
pub mod settings;

pub use location::ReceiverLocation;
pub use settings::{Credentials, FeedEndpoint, RelaySettings, SettingsError};
