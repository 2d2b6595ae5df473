//! # Local Feed Module
//!
//! The relay's only inbound connection: a TCP client to a dump1090-style Beast
//! output port. This module owns the socket and reports whether it is still
//! open; what the bytes mean is left to whichever [`FeedConsumer`] is attached.
//!
//! ## Contained Modules:
//! - **`client`**: connects once (no retry), pumps bytes into the consumer and
//!   tracks the open-connection count through a [`ConnectionGauge`].
//! - **`beast`**: splits the Beast escape framing into opaque records.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Beast binary framing.
pub mod beast;
/// The TCP client and its connection gauge.
pub mod client;

pub use beast::{BeastDecoder, BeastFrame, FrameKind};
pub use client::{ConnectionGauge, ConnectionGuard, FeedClient, FeedConsumer, FeedError};
