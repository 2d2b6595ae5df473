//! # Aggregation Engine Module
//!
//! A framing-only stand-in for a full Mode S decoder. It turns feed bytes into
//! Beast records, buffers them, and on its own flush cadence serializes what
//! arrived into the payload the relay loop delivers.
//!
//! ## Contained Modules:
//! - **`aggregator`**: the [`BeastAggregator`], attached to the feed as its
//!   consumer and to the tick scheduler as its maintenance hook.
//! - **`mirror`**: the plain-text [`OutputMirror`] each flushed payload is also
//!   written to (stdout or nowhere).

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Frame buffering, window maintenance and payload serialization.
pub mod aggregator;
/// Line-oriented copy of every flushed payload.
pub mod mirror;

pub use aggregator::BeastAggregator;
pub use mirror::OutputMirror;
