//! # Tick Scheduler
//!
//! The relay's fixed-cadence loop. Every tick it:
//!
//! 1. runs the per-tick maintenance hooks, whether or not there is new data;
//! 2. compares the sink's version with the last one it observed and, on any
//!    difference, hands the payload to the delivery client exactly once. The
//!    version is recorded as observed whatever the delivery outcome, so a failed
//!    send is superseded by the next change rather than retried;
//! 3. stops for good once the feed connection, the output mirror or the
//!    delivery path is gone.
//!
//! Delivery is awaited inline, so a slow endpoint delays the next tick (and its
//! hooks) instead of overlapping with it.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::feed::ConnectionGauge;
use crate::relay::lifecycle::RelayError;
use crate::relay::sink::AggregateSink;
use crate::retrieve::{DeliveryError, DeliveryReceipt};

/// Side-effecting work the engine needs once per tick.
pub trait MaintenanceHooks {
    /// Called at the start of every tick. Must not fail.
    fn on_tick(&mut self, now: Instant);
}

impl<T: MaintenanceHooks> MaintenanceHooks for Arc<Mutex<T>> {
    fn on_tick(&mut self, now: Instant) {
        self.lock().unwrap_or_else(PoisonError::into_inner).on_tick(now);
    }
}

/// Something that can ship one payload to the collection endpoint.
#[allow(async_fn_in_trait)]
pub trait Deliver {
    /// Sends `payload` once. No retries.
    async fn deliver(&mut self, payload: &str) -> Result<DeliveryReceipt, DeliveryError>;

    /// Whether the delivery path is still considered usable.
    fn is_connected(&self) -> bool;
}

/// Why the loop reached STOPPED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The local feed connection closed.
    FeedLost,
    /// The plain-text output mirror could not be written.
    OutputLost,
    /// Too many consecutive transport failures towards the endpoint.
    DeliveryLost,
    /// The endpoint rejected the credentials.
    Unauthorized,
    /// Shutdown was requested from outside (signal).
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::FeedLost => "local feed connection lost",
            Self::OutputLost => "output mirror lost",
            Self::DeliveryLost => "delivery path lost",
            Self::Unauthorized => "endpoint rejected credentials",
            Self::Cancelled => "shutdown requested",
        };
        f.write_str(text)
    }
}

/// RUNNING until a stop condition is seen; STOPPED is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Ticking.
    Running,
    /// Terminal.
    Stopped(StopReason),
}

/// Running counters, mostly for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Ticks run so far.
    pub ticks: u64,
    /// Delivery attempts, one per observed version change.
    pub deliveries: u64,
    /// Attempts that ended in a logged, non-fatal error.
    pub failed_deliveries: u64,
}

/// # Tick Scheduler
pub struct TickScheduler<H, D> {
    sink: Arc<AggregateSink>,
    hooks: H,
    delivery: D,
    feed: ConnectionGauge,
    output: ConnectionGauge,
    period: Duration,
    last_observed: u64,
    state: SchedulerState,
    stats: TickStats,
}

impl<H, D> TickScheduler<H, D>
where
    H: MaintenanceHooks,
    D: Deliver,
{
    /// Creates a RUNNING scheduler. Whatever the sink holds right now counts as
    /// already observed.
    pub fn new(
        sink: Arc<AggregateSink>,
        hooks: H,
        delivery: D,
        feed: ConnectionGauge,
        output: ConnectionGauge,
        period: Duration,
    ) -> Self {
        let last_observed = sink.current_version();
        Self {
            sink,
            hooks,
            delivery,
            feed,
            output,
            period,
            last_observed,
            state: SchedulerState::Running,
            stats: TickStats::default(),
        }
    }

    /// RUNNING until a stop condition is met.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Counters since construction.
    pub fn stats(&self) -> TickStats {
        self.stats
    }

    /// Version recorded at the last delivery attempt.
    pub fn last_observed_version(&self) -> u64 {
        self.last_observed
    }

    /// The maintenance hooks run every tick.
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// The delivery side.
    pub fn delivery(&self) -> &D {
        &self.delivery
    }

    /// Runs one tick and returns the resulting state.
    ///
    /// # Errors
    /// [`RelayError::Unauthorized`] when the endpoint answers 401; the scheduler
    /// is STOPPED afterwards.
    pub async fn tick(&mut self) -> Result<SchedulerState, RelayError> {
        if self.state != SchedulerState::Running {
            return Ok(self.state);
        }
        self.stats.ticks += 1;

        self.hooks.on_tick(Instant::now());

        if self.sink.current_version() != self.last_observed {
            let snapshot = self.sink.snapshot();
            self.stats.deliveries += 1;
            let outcome = self.delivery.deliver(&snapshot.payload).await;
            self.last_observed = snapshot.version;

            match outcome {
                Ok(receipt) => {
                    log::debug!(
                        "Delivered version {} ({} bytes), HTTP {}",
                        snapshot.version,
                        snapshot.payload.len(),
                        receipt.status
                    );
                }
                Err(e @ DeliveryError::Unauthorized { .. }) => {
                    self.state = SchedulerState::Stopped(StopReason::Unauthorized);
                    return Err(RelayError::Unauthorized(e));
                }
                Err(e) => {
                    self.stats.failed_deliveries += 1;
                    log::warn!("Delivery of version {} failed: {}", snapshot.version, e);
                }
            }
        }

        if let Some(reason) = self.liveness_loss() {
            log::info!("Relay loop stopping: {}", reason);
            self.state = SchedulerState::Stopped(reason);
        }
        Ok(self.state)
    }

    /// Ticks every `period` until STOPPED or `cancel` fires.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<StopReason, RelayError> {
        loop {
            if cancel.is_cancelled() {
                self.state = SchedulerState::Stopped(StopReason::Cancelled);
            }
            if let SchedulerState::Stopped(reason) = self.tick().await? {
                return Ok(reason);
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.state = SchedulerState::Stopped(StopReason::Cancelled);
                    return Ok(StopReason::Cancelled);
                }
                _ = tokio::time::sleep(self.period) => {}
            }
        }
    }

    fn liveness_loss(&self) -> Option<StopReason> {
        if !self.feed.is_open() {
            Some(StopReason::FeedLost)
        } else if !self.output.is_open() {
            Some(StopReason::OutputLost)
        } else if !self.delivery.is_connected() {
            Some(StopReason::DeliveryLost)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use crate::feed::ConnectionGuard;

    #[derive(Default)]
    struct CountingHooks {
        calls: usize,
    }

    impl MaintenanceHooks for CountingHooks {
        fn on_tick(&mut self, _now: Instant) {
            self.calls += 1;
        }
    }

    /// Publishes one scripted payload per tick, standing in for the engine.
    struct ScriptedEngine {
        sink: Arc<AggregateSink>,
        script: VecDeque<Option<&'static str>>,
    }

    impl MaintenanceHooks for ScriptedEngine {
        fn on_tick(&mut self, _now: Instant) {
            if let Some(Some(payload)) = self.script.pop_front() {
                self.sink.publish(payload);
            }
        }
    }

    struct FakeDelivery {
        posted: Vec<String>,
        responses: VecDeque<Result<DeliveryReceipt, DeliveryError>>,
        connected: bool,
    }

    impl FakeDelivery {
        fn new() -> Self {
            Self {
                posted: Vec::new(),
                responses: VecDeque::new(),
                connected: true,
            }
        }
    }

    impl Deliver for FakeDelivery {
        async fn deliver(&mut self, payload: &str) -> Result<DeliveryReceipt, DeliveryError> {
            self.posted.push(payload.to_string());
            self.responses
                .pop_front()
                .unwrap_or(Ok(DeliveryReceipt { status: 200 }))
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    struct Links {
        feed: ConnectionGauge,
        output: ConnectionGauge,
        feed_guard: ConnectionGuard,
        output_guard: ConnectionGuard,
    }

    fn links() -> Links {
        let feed = ConnectionGauge::new();
        let output = ConnectionGauge::new();
        Links {
            feed_guard: feed.attach(),
            output_guard: output.attach(),
            feed,
            output,
        }
    }

    fn scheduler<H: MaintenanceHooks>(
        sink: &Arc<AggregateSink>,
        hooks: H,
        links: &Links,
    ) -> TickScheduler<H, FakeDelivery> {
        TickScheduler::new(
            Arc::clone(sink),
            hooks,
            FakeDelivery::new(),
            links.feed.clone(),
            links.output.clone(),
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_no_change_means_hooks_only() {
        let sink = Arc::new(AggregateSink::new());
        let links = links();
        let mut sched = scheduler(&sink, CountingHooks::default(), &links);

        for _ in 0..25 {
            assert_eq!(sched.tick().await.unwrap(), SchedulerState::Running);
        }

        assert_eq!(sched.hooks().calls, 25);
        assert!(sched.delivery().posted.is_empty());
        assert_eq!(sched.stats().ticks, 25);
        assert_eq!(sched.stats().deliveries, 0);
    }

    #[tokio::test]
    async fn test_one_delivery_per_version_change() {
        let sink = Arc::new(AggregateSink::new());
        let engine = ScriptedEngine {
            sink: Arc::clone(&sink),
            script: VecDeque::from(vec![
                Some("a"),
                None,
                Some("b"),
                Some("b"),
                None,
                Some("c"),
                None,
            ]),
        };
        let links = links();
        let mut sched = scheduler(&sink, engine, &links);

        for _ in 0..7 {
            sched.tick().await.unwrap();
        }

        assert_eq!(sched.delivery().posted, vec!["a", "b", "c"]);
        assert_eq!(sched.last_observed_version(), 3);
    }

    #[tokio::test]
    async fn test_single_post_for_version_100_to_101() {
        let sink = Arc::new(AggregateSink::with_initial(100, ""));
        let links = links();
        let mut sched = scheduler(&sink, CountingHooks::default(), &links);

        sched.tick().await.unwrap();
        assert!(sched.delivery().posted.is_empty());

        assert_eq!(sink.publish("AB1234,51.5,-0.12"), 101);
        for _ in 0..5 {
            sched.tick().await.unwrap();
        }

        assert_eq!(sched.delivery().posted, vec!["AB1234,51.5,-0.12"]);
        assert_eq!(sched.last_observed_version(), 101);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_not_retried() {
        let sink = Arc::new(AggregateSink::new());
        let links = links();
        let mut sched = scheduler(&sink, CountingHooks::default(), &links);
        sched.delivery.responses.push_back(Err(DeliveryError::Rejected {
            endpoint: "http://collector:1001/".into(),
            status: 503,
        }));

        sink.publish("first");
        sched.tick().await.unwrap();
        sched.tick().await.unwrap();
        sched.tick().await.unwrap();

        assert_eq!(sched.delivery().posted, vec!["first"]);
        assert_eq!(sched.stats().failed_deliveries, 1);
        assert_eq!(sched.state(), SchedulerState::Running);

        sink.publish("second");
        sched.tick().await.unwrap();
        assert_eq!(sched.delivery().posted, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_unauthorized_is_fatal() {
        let sink = Arc::new(AggregateSink::new());
        let links = links();
        let mut sched = scheduler(&sink, CountingHooks::default(), &links);
        sched.delivery.responses.push_back(Err(DeliveryError::Unauthorized {
            endpoint: "http://collector:1001/".into(),
        }));

        sink.publish("payload");
        let err = sched.tick().await.unwrap_err();
        assert!(matches!(err, RelayError::Unauthorized(_)));
        assert_eq!(sched.state(), SchedulerState::Stopped(StopReason::Unauthorized));

        // STOPPED is terminal: no more hooks, no more deliveries.
        sink.publish("later");
        sched.tick().await.unwrap();
        assert_eq!(sched.hooks().calls, 1);
        assert_eq!(sched.delivery().posted.len(), 1);
    }

    #[tokio::test]
    async fn test_feed_loss_stops_on_next_tick() {
        let sink = Arc::new(AggregateSink::new());
        let links = links();
        let mut sched = scheduler(&sink, CountingHooks::default(), &links);
        assert_eq!(sched.tick().await.unwrap(), SchedulerState::Running);

        drop(links.feed_guard);
        assert_eq!(
            sched.tick().await.unwrap(),
            SchedulerState::Stopped(StopReason::FeedLost)
        );
        drop(links.output_guard);
    }

    #[tokio::test]
    async fn test_output_and_delivery_loss_stop_the_loop() {
        let sink = Arc::new(AggregateSink::new());
        let links = links();
        let mut sched = scheduler(&sink, CountingHooks::default(), &links);
        drop(links.output_guard);
        assert_eq!(
            sched.tick().await.unwrap(),
            SchedulerState::Stopped(StopReason::OutputLost)
        );

        let links = self::links();
        let mut sched = scheduler(&sink, CountingHooks::default(), &links);
        sched.delivery.connected = false;
        assert_eq!(
            sched.tick().await.unwrap(),
            SchedulerState::Stopped(StopReason::DeliveryLost)
        );
    }

    #[tokio::test]
    async fn test_run_returns_when_feed_drops() {
        let sink = Arc::new(AggregateSink::new());
        let Links {
            feed,
            output,
            feed_guard,
            output_guard: _output_guard,
        } = links();
        let mut sched = TickScheduler::new(
            Arc::clone(&sink),
            CountingHooks::default(),
            FakeDelivery::new(),
            feed,
            output,
            Duration::from_millis(10),
        );

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            drop(feed_guard);
        });

        let cancel = CancellationToken::new();
        let reason = sched.run(&cancel).await.unwrap();
        assert_eq!(reason, StopReason::FeedLost);
        assert!(sched.hooks().calls >= 2);
    }

    #[tokio::test]
    async fn test_run_honours_cancellation() {
        let sink = Arc::new(AggregateSink::new());
        let links = links();
        let mut sched = scheduler(&sink, CountingHooks::default(), &links);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            trigger.cancel();
        });

        assert_eq!(sched.run(&cancel).await.unwrap(), StopReason::Cancelled);
        assert_eq!(sched.state(), SchedulerState::Stopped(StopReason::Cancelled));
    }
}
