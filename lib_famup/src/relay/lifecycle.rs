//! # Lifecycle Controller
//!
//! Startup, run and teardown of one relay.
//!
//! [`Relay::start`] does every one-time step in a fixed order and fails fast:
//! settings check, feed connection, HTTP client, authentication probe, then
//! the feed reader is attached to the engine. Nothing is retried. Once started,
//! [`Relay::run`] drives the tick scheduler until it stops and closes the feed.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::configs::{RelaySettings, SettingsError};
use crate::engine::{BeastAggregator, OutputMirror};
use crate::feed::{ConnectionGauge, FeedClient, FeedError};
use crate::relay::scheduler::{StopReason, TickScheduler};
use crate::relay::sink::AggregateSink;
use crate::retrieve::{DeliveryClient, DeliveryError};

/// Unrecoverable failures before the tick loop starts.
#[derive(Debug, Error)]
pub enum SetupError {
    /// Settings failed validation.
    #[error("invalid settings: {0}")]
    Settings(#[from] SettingsError),

    /// The local feed could not be reached or started.
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// The HTTP client could not be built, or the probe failed or was refused.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Failures that end a running relay with an error rather than a clean stop.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The collection endpoint rejected the credentials mid-run.
    #[error("collection endpoint rejected the credentials")]
    Unauthorized(#[source] DeliveryError),
}

/// # Relay
///
/// A started relay: feed connected, credentials accepted, engine attached.
pub struct Relay {
    settings: RelaySettings,
    feed: FeedClient,
    delivery: DeliveryClient,
    engine: Arc<Mutex<BeastAggregator>>,
    sink: Arc<AggregateSink>,
    output: ConnectionGauge,
}

impl Relay {
    /// Starts a relay mirroring to stdout or nowhere, per `settings.mirror_stdout`.
    pub async fn start(settings: RelaySettings) -> Result<Self, SetupError> {
        let mirror = if settings.mirror_stdout {
            OutputMirror::stdout()
        } else {
            OutputMirror::discard()
        };
        Self::start_with_mirror(settings, mirror).await
    }

    /// Starts a relay with an explicit output mirror.
    ///
    /// # Errors
    /// Any [`SetupError`]; the process is expected to exit 1.
    pub async fn start_with_mirror(
        settings: RelaySettings,
        mirror: OutputMirror,
    ) -> Result<Self, SetupError> {
        settings.check()?;

        let mut feed = FeedClient::connect(&settings.feed).await?;

        let delivery = DeliveryClient::new(&settings)?;
        delivery.probe().await?;

        let sink = Arc::new(AggregateSink::new());
        let engine = BeastAggregator::new(Arc::clone(&sink), mirror, &settings);
        let output = engine.output_gauge();
        let engine = Arc::new(Mutex::new(engine));
        feed.start(Arc::clone(&engine))?;

        log::info!(
            "Relaying {} to {} every {} ms",
            settings.feed,
            settings.endpoint,
            settings.tick_interval.as_millis()
        );

        Ok(Self {
            settings,
            feed,
            delivery,
            engine,
            sink,
            output,
        })
    }

    /// The sink the engine publishes into.
    pub fn sink(&self) -> Arc<AggregateSink> {
        Arc::clone(&self.sink)
    }

    /// Open-connection count of the local feed.
    pub fn feed_gauge(&self) -> ConnectionGauge {
        self.feed.gauge()
    }

    /// Runs the tick loop until STOPPED, then closes the feed.
    ///
    /// Returns why the loop stopped. A mid-run 401 comes back as
    /// [`RelayError::Unauthorized`].
    pub async fn run(self, cancel: &CancellationToken) -> Result<StopReason, RelayError> {
        let Relay {
            settings,
            mut feed,
            delivery,
            engine,
            sink,
            output,
        } = self;

        let mut scheduler = TickScheduler::new(
            sink,
            engine,
            delivery,
            feed.gauge(),
            output,
            settings.tick_interval,
        );
        let outcome = scheduler.run(cancel).await;

        feed.shutdown().await;
        let stats = scheduler.stats();
        log::info!(
            "Relay shut down after {} ticks, {} deliveries ({} failed)",
            stats.ticks,
            stats.deliveries,
            stats.failed_deliveries
        );
        outcome
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("feed", &self.feed)
            .field("delivery", &self.delivery)
            .field("version", &self.sink.current_version())
            .finish()
    }
}
