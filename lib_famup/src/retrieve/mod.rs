//! # Delivery Module
//!
//! Outbound HTTP towards the FlightAirMap collection endpoint.
//!
//! ## Purpose:
//! The relay needs exactly two requests: an authentication probe at startup and
//! one form POST per new payload version. Both go through a single `reqwest`
//! client configured once from [`crate::configs::RelaySettings`], so cookies
//! set by the collector persist for the life of the process and are never
//! written to disk.
//!
//! ## Contained Modules:
//!
//! - **`delivery`**: the [`DeliveryClient`], its error type and the
//!   transport-failure budget that decides when the delivery path counts as
//!   lost.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Authenticated form delivery with a bounded transport-failure budget.
pub mod delivery;

pub use delivery::{DeliveryClient, DeliveryError, DeliveryReceipt};
