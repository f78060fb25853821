use std::time::Duration;

use scrapesync_proto::ScrapeInterval;
use time::OffsetDateTime;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    extract::{ExtractError, ScrapeDurationSample, ScrapeSource},
    metrics::ExporterMetrics,
    query::SystemSampler,
};

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Local metrics only; not an interval boundary.
    Idle,
    Synced,
    Failed,
}

/// Samples local metrics every second and refreshes the remote-derived
/// gauges on every wall-clock second that is a multiple of the current
/// scrape interval.
pub struct SyncLoop<S> {
    source: S,
    sampler: SystemSampler,
    metrics: ExporterMetrics,
    interval: ScrapeInterval,
    last_sync: Option<i64>,
}

impl<S: ScrapeSource> SyncLoop<S> {
    pub fn new(
        source: S,
        sampler: SystemSampler,
        metrics: ExporterMetrics,
        interval: ScrapeInterval,
    ) -> Self {
        metrics.scrape_interval.set(interval.as_secs() as f64);
        Self {
            source,
            sampler,
            metrics,
            interval,
            last_sync: None,
        }
    }

    /// Retries interval discovery every `retry` until it succeeds. Returns
    /// `None` only if `shutdown` fires first.
    pub async fn bootstrap(
        source: S,
        sampler: SystemSampler,
        metrics: ExporterMetrics,
        retry: Duration,
        shutdown: &CancellationToken,
    ) -> Option<Self> {
        let mut attempt: u64 = 0;
        let interval = loop {
            attempt += 1;
            info!(attempt, "trying to reach the monitoring system");
            match source.scrape_interval().await {
                Ok(interval) => break interval,
                Err(e) => warn!(attempt, "interval discovery failed: {e}"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = sleep(retry) => {}
            }
        };
        info!(%interval, attempt, "scrape interval discovered");

        Some(Self::new(source, sampler, metrics, interval))
    }

    /// One step of the steady state at wall-clock second `now`.
    pub async fn tick(&mut self, now: i64) -> TickOutcome {
        self.sampler.tick(&self.metrics);

        if !self.interval.is_boundary(now) || self.last_sync == Some(now) {
            return TickOutcome::Idle;
        }
        self.last_sync = Some(now);

        let summary = self.metrics.request_processing.clone();
        let _timer = summary.start_timer();
        match self.fetch_remote().await {
            Ok((sample, interval)) => {
                self.publish(sample, interval);
                debug!(
                    now,
                    duration = sample.seconds,
                    %interval,
                    healthy = sample.healthy,
                    "remote gauges refreshed"
                );
                TickOutcome::Synced
            }
            Err(e) => {
                warn!(now, "sync cycle failed: {e}");
                self.metrics.scraped_successfully.set(0.0);
                self.metrics.sync_failures.inc();
                TickOutcome::Failed
            }
        }
    }

    async fn fetch_remote(&self) -> Result<(ScrapeDurationSample, ScrapeInterval), ExtractError> {
        let sample = self.source.scrape_duration().await?;
        let interval = self.source.scrape_interval().await?;
        Ok((sample, interval))
    }

    fn publish(&mut self, sample: ScrapeDurationSample, interval: ScrapeInterval) {
        if interval != self.interval {
            info!(old = %self.interval, new = %interval, "scrape interval changed");
        }
        self.interval = interval;

        let secs = interval.as_secs() as f64;
        self.metrics.scrape_duration.set(sample.seconds);
        self.metrics.scrape_interval.set(secs);
        self.metrics
            .scrape_duration_percent
            .set(sample.seconds / secs * 100.0);
        self.metrics
            .scraped_successfully
            .set(if sample.healthy { 1.0 } else { 0.0 });
    }

    /// Runs until `shutdown` is cancelled, ticking on whole-second
    /// boundaries of the wall clock.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(interval = %self.interval, "entering steady state");
        loop {
            self.tick(OffsetDateTime::now_utc().unix_timestamp()).await;

            let into_second = Duration::from_nanos(OffsetDateTime::now_utc().nanosecond() as u64);
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("sync loop stopped");
                    return;
                }
                _ = sleep(TICK.saturating_sub(into_second)) => {}
            }
        }
    }
}
