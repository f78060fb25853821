use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use prometheus::{
    Counter, Gauge, Registry,
    core::{Atomic, AtomicF64, Collector, Desc},
    proto,
};

/// Every gauge the exporter publishes. Each value is replaced atomically,
/// so the exposition endpoint may read concurrently with the sync loop.
#[derive(Clone)]
pub struct ExporterMetrics {
    pub cpu_percent: Gauge,
    pub vmem_percent: Gauge,
    pub smem_percent: Gauge,
    pub scrape_duration: Gauge,
    pub scrape_interval: Gauge,
    pub scrape_duration_percent: Gauge,
    pub scraped_successfully: Gauge,
    pub request_processing: RequestSummary,
    pub sync_failures: Counter,
}

impl ExporterMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let cpu_percent = Gauge::new("cpu_percent", "CPU %")?;
        let vmem_percent = Gauge::new("vmem_percent", "Virtual memory %")?;
        let smem_percent = Gauge::new("smem_percent", "Swap memory %")?;
        let scrape_duration = Gauge::new("scrape_duration", "Scrape duration")?;
        let scrape_interval = Gauge::new("scrape_interval", "Scrape interval")?;
        let scrape_duration_percent =
            Gauge::new("scrape_duration_percent", "Scrape duration %")?;
        let scraped_successfully = Gauge::new(
            "prom_scraped_avalanche_successfully",
            "Prom scraped avalanche successfully",
        )?;
        let request_processing =
            RequestSummary::new("request_processing_seconds", "Time spent processing request")?;
        let sync_failures = Counter::new(
            "sync_cycle_failures_total",
            "Synchronization cycles that failed to refresh remote gauges",
        )?;

        registry.register(Box::new(cpu_percent.clone()))?;
        registry.register(Box::new(vmem_percent.clone()))?;
        registry.register(Box::new(smem_percent.clone()))?;
        registry.register(Box::new(scrape_duration.clone()))?;
        registry.register(Box::new(scrape_interval.clone()))?;
        registry.register(Box::new(scrape_duration_percent.clone()))?;
        registry.register(Box::new(scraped_successfully.clone()))?;
        registry.register(Box::new(request_processing.clone()))?;
        registry.register(Box::new(sync_failures.clone()))?;

        Ok(Self {
            cpu_percent,
            vmem_percent,
            smem_percent,
            scrape_duration,
            scrape_interval,
            scrape_duration_percent,
            scraped_successfully,
            request_processing,
            sync_failures,
        })
    }
}

/// A quantile-less summary: exposes `<name>_count` and `<name>_sum`.
/// Clones share the same counters.
#[derive(Clone)]
pub struct RequestSummary {
    desc: Desc,
    core: Arc<SummaryCore>,
}

struct SummaryCore {
    count: AtomicU64,
    sum: AtomicF64,
}

impl RequestSummary {
    pub fn new(name: &str, help: &str) -> prometheus::Result<Self> {
        Ok(Self {
            desc: Desc::new(name.to_owned(), help.to_owned(), Vec::new(), HashMap::new())?,
            core: Arc::new(SummaryCore {
                count: AtomicU64::new(0),
                sum: AtomicF64::new(0.0),
            }),
        })
    }

    pub fn observe(&self, seconds: f64) {
        self.core.sum.inc_by(seconds);
        self.core.count.fetch_add(1, Ordering::Release);
    }

    /// Observes the elapsed time when the returned guard is dropped.
    pub fn start_timer(&self) -> SummaryTimer<'_> {
        SummaryTimer {
            summary: self,
            start: Instant::now(),
        }
    }

    pub fn count(&self) -> u64 {
        self.core.count.load(Ordering::Acquire)
    }

    pub fn sum(&self) -> f64 {
        self.core.sum.get()
    }
}

impl Collector for RequestSummary {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.desc]
    }

    fn collect(&self) -> Vec<proto::MetricFamily> {
        let mut summary = proto::Summary::default();
        summary.set_sample_count(self.count());
        summary.set_sample_sum(self.sum());

        let mut metric = proto::Metric::default();
        metric.set_summary(summary);

        let mut family = proto::MetricFamily::default();
        family.set_name(self.desc.fq_name.clone());
        family.set_help(self.desc.help.clone());
        family.set_field_type(proto::MetricType::SUMMARY);
        family.set_metric(vec![metric].into());

        vec![family]
    }
}

#[must_use = "dropping the timer records the observation immediately"]
pub struct SummaryTimer<'a> {
    summary: &'a RequestSummary,
    start: Instant,
}

impl Drop for SummaryTimer<'_> {
    fn drop(&mut self) {
        self.summary.observe(self.start.elapsed().as_secs_f64());
    }
}
