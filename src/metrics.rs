//! Throughput metrics for the producer and the consumer.
//!
//! Each binary owns one metrics struct ([`ConsumerMetrics`] or
//! [`PublisherMetrics`]), shared by `Arc` between the worker loop and a
//! background emitter that logs a summary every `metrics_interval`.
//! Emission only reads the counters; the one value it writes is the time
//! of the last emission.
//!
//! Every counter is mirrored to the `metrics` facade, so when a Prometheus
//! exporter is installed (`METRICS_PORT` > 0) the same numbers are scraped
//! from `/metrics`. Without an exporter the facade calls are no-ops.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `weather_readings_received_total` - Deliveries handed to the consumer
//! - `weather_readings_persisted_total` - Readings committed and acked
//! - `weather_readings_rejected_total` - Deliveries dead-lettered (label: `class`)
//! - `weather_readings_published_total` - Readings published (label: `status`)
//!
//! ## Histograms
//! - `weather_processing_duration_seconds` - Decode, persist and settle time per delivery
//! - `weather_publish_duration_seconds` - Publish call latency

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const READINGS_RECEIVED_TOTAL: &str = "weather_readings_received_total";
    pub const READINGS_PERSISTED_TOTAL: &str = "weather_readings_persisted_total";
    pub const READINGS_REJECTED_TOTAL: &str = "weather_readings_rejected_total";
    pub const READINGS_PUBLISHED_TOTAL: &str = "weather_readings_published_total";
    pub const PROCESSING_DURATION_SECONDS: &str = "weather_processing_duration_seconds";
    pub const PUBLISH_DURATION_SECONDS: &str = "weather_publish_duration_seconds";
}

/// Rates are computed over at least this much elapsed time.
const MIN_ELAPSED: Duration = Duration::from_secs(1);

/// Initialize the Prometheus metrics exporter.
///
/// Starts an HTTP listener on `metrics_addr` and describes all metrics.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::READINGS_RECEIVED_TOTAL,
        "Total number of deliveries received by the consumer"
    );
    describe_counter!(
        names::READINGS_PERSISTED_TOTAL,
        "Total number of readings committed to the store"
    );
    describe_counter!(
        names::READINGS_REJECTED_TOTAL,
        "Total number of deliveries rejected to the dead-letter exchange"
    );
    describe_counter!(
        names::READINGS_PUBLISHED_TOTAL,
        "Total number of publish attempts by outcome"
    );
    describe_histogram!(
        names::PROCESSING_DURATION_SECONDS,
        "Per-delivery processing time in seconds"
    );
    describe_histogram!(
        names::PUBLISH_DURATION_SECONDS,
        "Publish call latency in seconds"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Tracks process start and the last summary emission.
#[derive(Debug)]
pub struct EmitClock {
    started: Instant,
    interval: Duration,
    /// Milliseconds after `started` of the last emission.
    last_emit_ms: AtomicU64,
}

impl EmitClock {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(Instant::now(), interval)
    }

    pub fn starting_at(started: Instant, interval: Duration) -> Self {
        Self {
            started,
            interval,
            last_emit_ms: AtomicU64::new(0),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Time since start, floored to one second.
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started).max(MIN_ELAPSED)
    }

    /// Claim the emission slot if `interval` has passed since the last one.
    fn try_claim(&self, now: Instant) -> bool {
        let now_ms = duration_ms(now.saturating_duration_since(self.started));
        let last = self.last_emit_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < duration_ms(self.interval) {
            return false;
        }
        self.last_emit_ms
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn duration_us(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    count as f64 / elapsed.max(MIN_ELAPSED).as_secs_f64()
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn average_ms(total: Duration, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total.as_secs_f64() * 1000.0 / count as f64
    }
}

/// Something that periodically logs a summary of its counters.
pub trait Emit: Send + Sync + 'static {
    fn clock(&self) -> &EmitClock;

    /// Log the current snapshot unconditionally.
    fn log_summary(&self, now: Instant);

    /// Log a summary if the emission interval has passed.
    ///
    /// Returns `true` when a summary was logged.
    fn maybe_emit(&self, now: Instant) -> bool {
        if self.clock().try_claim(now) {
            self.log_summary(now);
            true
        } else {
            false
        }
    }
}

/// Spawn the periodic emitter on `tracker`.
///
/// The task checks once per interval and logs a final summary when
/// `shutdown` is cancelled.
pub fn spawn_emitter<M: Emit>(metrics: Arc<M>, tracker: &TaskTracker, shutdown: CancellationToken) {
    let period = metrics.clock().interval();
    tracker.spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    metrics.log_summary(Instant::now());
                    break;
                }
                _ = ticker.tick() => {
                    metrics.maybe_emit(Instant::now());
                }
            }
        }
    });
}

// =============================================================================
// Consumer
// =============================================================================

/// Point-in-time copy of the consumer counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsumerSnapshot {
    pub received: u64,
    pub persisted: u64,
    pub persist_failures: u64,
    pub validation_failures: u64,
    pub total_processing: Duration,
    pub elapsed: Duration,
}

impl ConsumerSnapshot {
    /// Received messages per second since start.
    pub fn rate(&self) -> f64 {
        per_second(self.received, self.elapsed)
    }

    pub fn avg_processing_ms(&self) -> f64 {
        average_ms(self.total_processing, self.received)
    }
}

#[derive(Debug)]
pub struct ConsumerMetrics {
    received: AtomicU64,
    persisted: AtomicU64,
    persist_failures: AtomicU64,
    validation_failures: AtomicU64,
    processing_us: AtomicU64,
    clock: EmitClock,
}

impl ConsumerMetrics {
    pub fn new(interval: Duration) -> Self {
        Self::with_clock(EmitClock::new(interval))
    }

    pub fn with_clock(clock: EmitClock) -> Self {
        Self {
            received: AtomicU64::new(0),
            persisted: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            validation_failures: AtomicU64::new(0),
            processing_us: AtomicU64::new(0),
            clock,
        }
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        counter!(names::READINGS_RECEIVED_TOTAL).increment(1);
    }

    pub fn record_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
        counter!(names::READINGS_PERSISTED_TOTAL).increment(1);
    }

    /// Count a persistence failure; `class` labels the mirrored counter.
    pub fn record_persist_failure(&self, class: &'static str) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
        counter!(names::READINGS_REJECTED_TOTAL, "class" => class).increment(1);
    }

    /// Count a decode or validation failure.
    pub fn record_validation_failure(&self, class: &'static str) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
        counter!(names::READINGS_REJECTED_TOTAL, "class" => class).increment(1);
    }

    pub fn record_processing(&self, elapsed: Duration) {
        self.processing_us
            .fetch_add(duration_us(elapsed), Ordering::Relaxed);
        histogram!(names::PROCESSING_DURATION_SECONDS).record(elapsed.as_secs_f64());
    }

    pub fn snapshot(&self, now: Instant) -> ConsumerSnapshot {
        ConsumerSnapshot {
            received: self.received.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            total_processing: Duration::from_micros(self.processing_us.load(Ordering::Relaxed)),
            elapsed: self.clock.elapsed(now),
        }
    }
}

impl Emit for ConsumerMetrics {
    fn clock(&self) -> &EmitClock {
        &self.clock
    }

    fn log_summary(&self, now: Instant) {
        let s = self.snapshot(now);
        info!(
            received = s.received,
            persisted = s.persisted,
            persist_failures = s.persist_failures,
            validation_failures = s.validation_failures,
            msgs_per_sec = round3(s.rate()),
            avg_processing_ms = round3(s.avg_processing_ms()),
            elapsed_secs = s.elapsed.as_secs(),
            "Consumer metrics"
        );
    }
}

// =============================================================================
// Publisher
// =============================================================================

/// Point-in-time copy of the publisher counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublisherSnapshot {
    pub sent: u64,
    pub publish_failures: u64,
    pub skipped: u64,
    pub total_latency: Duration,
    pub elapsed: Duration,
}

impl PublisherSnapshot {
    /// Published messages per second since start.
    pub fn rate(&self) -> f64 {
        per_second(self.sent, self.elapsed)
    }

    pub fn avg_latency_ms(&self) -> f64 {
        average_ms(self.total_latency, self.sent)
    }
}

#[derive(Debug)]
pub struct PublisherMetrics {
    sent: AtomicU64,
    publish_failures: AtomicU64,
    skipped: AtomicU64,
    latency_us: AtomicU64,
    clock: EmitClock,
}

impl PublisherMetrics {
    pub fn new(interval: Duration) -> Self {
        Self::with_clock(EmitClock::new(interval))
    }

    pub fn with_clock(clock: EmitClock) -> Self {
        Self {
            sent: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            latency_us: AtomicU64::new(0),
            clock,
        }
    }

    pub fn record_sent(&self, latency: Duration) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.latency_us
            .fetch_add(duration_us(latency), Ordering::Relaxed);
        counter!(names::READINGS_PUBLISHED_TOTAL, "status" => "sent").increment(1);
        histogram!(names::PUBLISH_DURATION_SECONDS).record(latency.as_secs_f64());
    }

    pub fn record_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
        counter!(names::READINGS_PUBLISHED_TOTAL, "status" => "failed").increment(1);
    }

    /// Count a generated reading that was dropped before publishing.
    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        counter!(names::READINGS_PUBLISHED_TOTAL, "status" => "skipped").increment(1);
    }

    pub fn snapshot(&self, now: Instant) -> PublisherSnapshot {
        PublisherSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            total_latency: Duration::from_micros(self.latency_us.load(Ordering::Relaxed)),
            elapsed: self.clock.elapsed(now),
        }
    }
}

impl Emit for PublisherMetrics {
    fn clock(&self) -> &EmitClock {
        &self.clock
    }

    fn log_summary(&self, now: Instant) {
        let s = self.snapshot(now);
        info!(
            sent = s.sent,
            publish_failures = s.publish_failures,
            skipped = s.skipped,
            msgs_per_sec = round3(s.rate()),
            avg_latency_ms = round3(s.avg_latency_ms()),
            elapsed_secs = s.elapsed.as_secs(),
            "Publisher metrics"
        );
    }
}
