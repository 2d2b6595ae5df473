//! # famup relay library
//!
//! Bridges a local Beast feed to a remote FlightAirMap collection endpoint. The
//! feed client hands raw bytes to an aggregation engine, the engine publishes a
//! serialized payload into the [`relay::sink::AggregateSink`], and the
//! [`relay::scheduler::TickScheduler`] POSTs every new payload version through
//! the [`retrieve::delivery::DeliveryClient`].

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Immutable relay settings and reference-location validation.
pub mod configs;
/// Sink, tick scheduler and lifecycle controller.
pub mod relay;
/// Framing-only aggregation engine and its plain-text output mirror.
pub mod engine;
/// Local Beast feed connection and frame splitting.
pub mod feed;
/// Authenticated HTTP delivery to the collection endpoint.
pub mod retrieve;

#[cfg(test)]
mod test_support;

// --- Public API Re-exports ---
pub use configs::{Credentials, FeedEndpoint, ReceiverLocation, RelaySettings, SettingsError};
pub use relay::{AggregateSink, Relay, RelayError, SetupError, StopReason, TickScheduler};
pub use engine::{BeastAggregator, OutputMirror};
pub use feed::{ConnectionGauge, FeedClient, FeedError};
pub use retrieve::{DeliveryClient, DeliveryError};
