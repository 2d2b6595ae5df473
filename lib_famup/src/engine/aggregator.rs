//! # Beast Aggregator
//!
//! Sits on both sides of the relay: the feed reader pushes bytes into it, and
//! the tick scheduler calls its maintenance hook once per tick.
//!
//! The hook does two things. It first drops arrival records that have left the
//! one-minute rate window, then, if the flush interval has passed and frames
//! are waiting, it serializes them into a JSON document and publishes it to the
//! [`AggregateSink`]. Frames are carried as hex; nothing inside a Mode S
//! message is interpreted.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use crate::configs::RelaySettings;
use crate::engine::mirror::OutputMirror;
use crate::feed::{BeastDecoder, BeastFrame, ConnectionGauge, FeedConsumer, FrameKind};
use crate::relay::scheduler::MaintenanceHooks;
use crate::relay::sink::AggregateSink;

const RATE_WINDOW: Duration = Duration::from_secs(60);
const MAX_PENDING_FRAMES: usize = 2048;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Station {
    #[serde(skip_serializing_if = "Option::is_none")]
    lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lon: Option<f64>,
    max_range_nm: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FrameRecord {
    kind: FrameKind,
    mlat: u64,
    signal: u8,
    hex: String,
}

impl From<&BeastFrame> for FrameRecord {
    fn from(frame: &BeastFrame) -> Self {
        Self {
            kind: frame.kind,
            mlat: frame.timestamp,
            signal: frame.signal,
            hex: hex::encode(&frame.message),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Payload<'a> {
    /// Milliseconds since the Unix epoch.
    now: i64,
    station: &'a Station,
    messages: u64,
    messages_last_minute: u64,
    dropped_frames: u64,
    discarded_bytes: u64,
    frames: Vec<FrameRecord>,
}

/// # Beast Aggregator
pub struct BeastAggregator {
    decoder: BeastDecoder,
    sink: Arc<AggregateSink>,
    mirror: OutputMirror,
    station: Station,
    flush_interval: Duration,
    last_flush: Option<Instant>,
    pending: VecDeque<BeastFrame>,
    /// Arrival time and frame count of each chunk seen in the last minute.
    recent: VecDeque<(Instant, u64)>,
    messages: u64,
    dropped: u64,
}

impl BeastAggregator {
    /// Creates an engine publishing into `sink` and mirroring to `mirror`.
    pub fn new(sink: Arc<AggregateSink>, mirror: OutputMirror, settings: &RelaySettings) -> Self {
        let location = settings.location;
        let station = Station {
            lat: location.is_set().then(|| location.latitude()),
            lon: location.is_set().then(|| location.longitude()),
            max_range_nm: settings.max_range_nm(),
        };

        Self {
            decoder: BeastDecoder::new(),
            sink,
            mirror,
            station,
            flush_interval: settings.flush_interval,
            last_flush: None,
            pending: VecDeque::new(),
            recent: VecDeque::new(),
            messages: 0,
            dropped: 0,
        }
    }

    /// Connection count of the output mirror.
    pub fn output_gauge(&self) -> ConnectionGauge {
        self.mirror.gauge()
    }

    /// Frames received since the last flush.
    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }

    /// Frames received since startup.
    pub fn messages(&self) -> u64 {
        self.messages
    }

    /// Frames received within the rate window, as of the last maintenance pass.
    pub fn messages_last_minute(&self) -> u64 {
        self.recent.iter().map(|(_, n)| n).sum()
    }

    fn ingest(&mut self, bytes: &[u8], now: Instant) {
        let frames = self.decoder.decode(bytes);
        if frames.is_empty() {
            return;
        }

        let count = frames.len() as u64;
        self.messages += count;
        self.recent.push_back((now, count));

        self.pending.extend(frames);
        while self.pending.len() > MAX_PENDING_FRAMES {
            self.pending.pop_front();
            self.dropped += 1;
        }
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&(at, _)) = self.recent.front() {
            if now.saturating_duration_since(at) < RATE_WINDOW {
                break;
            }
            self.recent.pop_front();
        }
    }

    fn flush_due(&self, now: Instant) -> bool {
        !self.pending.is_empty()
            && self
                .last_flush
                .map_or(true, |last| now.saturating_duration_since(last) >= self.flush_interval)
    }

    fn flush(&mut self, now: Instant) {
        self.last_flush = Some(now);

        let frames: Vec<FrameRecord> = self.pending.drain(..).map(|f| FrameRecord::from(&f)).collect();
        let payload = Payload {
            now: Utc::now().timestamp_millis(),
            station: &self.station,
            messages: self.messages,
            messages_last_minute: self.messages_last_minute(),
            dropped_frames: self.dropped,
            discarded_bytes: self.decoder.discarded_bytes(),
            frames,
        };

        let text = match serde_json::to_string(&payload) {
            Ok(text) => text,
            Err(e) => {
                log::error!("Could not serialize aggregate: {}", e);
                return;
            }
        };

        self.mirror.write_line(&text);
        let version = self.sink.publish(text);
        log::trace!("Published aggregate version {}", version);
    }
}

impl FeedConsumer for BeastAggregator {
    fn consume(&mut self, bytes: &[u8]) {
        self.ingest(bytes, Instant::now());
    }
}

impl MaintenanceHooks for BeastAggregator {
    fn on_tick(&mut self, now: Instant) {
        self.expire(now);
        if self.flush_due(now) {
            self.flush(now);
        }
    }
}

impl fmt::Debug for BeastAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeastAggregator")
            .field("station", &self.station)
            .field("pending", &self.pending.len())
            .field("messages", &self.messages)
            .field("dropped", &self.dropped)
            .field("mirror", &self.mirror)
            .finish()
    }
}
