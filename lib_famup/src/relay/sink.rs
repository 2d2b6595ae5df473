//! # Aggregate Sink
//!
//! Single-writer/single-reader cell holding the latest serialized aggregate and
//! its version. The engine writes with [`AggregateSink::publish`]; the relay
//! loop only reads. Version and payload live behind one lock so a reader can
//! never pair a new version with an old payload, or see half a payload.

use std::sync::{Arc, PoisonError, RwLock};

/// A consistent `(version, payload)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Bumped on every change of `payload`; never decreases.
    pub version: u64,
    /// Latest serialized aggregate; empty before the first publish.
    pub payload: Arc<str>,
}

/// # Aggregate Sink
#[derive(Debug)]
pub struct AggregateSink {
    current: RwLock<Snapshot>,
}

impl AggregateSink {
    /// An empty sink at version 0.
    pub fn new() -> Self {
        Self::with_initial(0, "")
    }

    /// Seeds the sink, e.g. for an engine that keeps its own counter.
    pub fn with_initial(version: u64, payload: impl Into<Arc<str>>) -> Self {
        Self {
            current: RwLock::new(Snapshot {
                version,
                payload: payload.into(),
            }),
        }
    }

    /// Version of the payload currently held.
    pub fn current_version(&self) -> u64 {
        self.read().version
    }

    /// The payload currently held. Cheap: shares the stored buffer.
    pub fn current_payload(&self) -> Arc<str> {
        Arc::clone(&self.read().payload)
    }

    /// Version and payload read together.
    pub fn snapshot(&self) -> Snapshot {
        self.read().clone()
    }

    /// Replaces the payload and returns the resulting version.
    ///
    /// Publishing the exact payload already held is not a change and leaves the
    /// version untouched.
    pub fn publish(&self, payload: impl Into<Arc<str>>) -> u64 {
        let payload = payload.into();
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.payload != payload {
            current.version += 1;
            current.payload = payload;
        }
        current.version
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Snapshot> {
        self.current.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for AggregateSink {
    fn default() -> Self {
        Self::new()
    }
}
