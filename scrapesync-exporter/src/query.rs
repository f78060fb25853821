use std::{collections::VecDeque, time::Instant};

use tracing::trace;

use crate::metrics::ExporterMetrics;

/// Fixed-capacity FIFO of recent samples; the oldest sample is evicted
/// once the window is full.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Arithmetic mean of the current contents, `None` while empty.
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }
}

/// One instantaneous reading of the host counters. A `None` field means
/// the counter was unavailable for this tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemReading {
    pub cpu_percent: Option<f64>,
    pub vmem_percent: Option<f64>,
    pub smem_percent: Option<f64>,
}

#[derive(Debug)]
pub struct SystemSampler {
    system: sysinfo::System,
    cpu_window: RollingWindow,
    cpu_refreshed_at: Instant,
}

impl SystemSampler {
    pub fn new(cpu_window: usize) -> Self {
        let mut system = sysinfo::System::new();
        // primes the CPU delta so the first real reading is meaningful
        system.refresh_cpu_usage();
        Self {
            system,
            cpu_window: RollingWindow::new(cpu_window),
            cpu_refreshed_at: Instant::now(),
        }
    }

    /// `None` while less than `MINIMUM_CPU_UPDATE_INTERVAL` has passed since
    /// the previous refresh.
    fn query_cpu(&mut self) -> Option<f64> {
        if self.cpu_refreshed_at.elapsed() < sysinfo::MINIMUM_CPU_UPDATE_INTERVAL {
            return None;
        }
        self.system.refresh_cpu_usage();
        self.cpu_refreshed_at = Instant::now();
        Some(self.system.global_cpu_usage() as f64).filter(|v| v.is_finite())
    }

    fn query_memory(&mut self) -> (Option<f64>, Option<f64>) {
        self.system.refresh_memory();

        let total = self.system.total_memory();
        let vmem = (total > 0).then(|| {
            let used = total.saturating_sub(self.system.available_memory());
            used as f64 / total as f64 * 100.0
        });

        let swap_total = self.system.total_swap();
        let smem = if swap_total == 0 {
            Some(0.0)
        } else {
            Some(self.system.used_swap() as f64 / swap_total as f64 * 100.0)
        };

        (vmem, smem)
    }

    pub fn query(&mut self) -> SystemReading {
        let cpu_percent = self.query_cpu();
        let (vmem_percent, smem_percent) = self.query_memory();
        SystemReading {
            cpu_percent,
            vmem_percent,
            smem_percent,
        }
    }

    /// Folds one reading into the CPU window and publishes it.
    pub fn record(&mut self, reading: SystemReading, metrics: &ExporterMetrics) {
        if let Some(cpu) = reading.cpu_percent {
            self.cpu_window.push(cpu);
        }
        if let Some(mean) = self.cpu_window.mean() {
            metrics.cpu_percent.set(mean);
        }
        if let Some(vmem) = reading.vmem_percent {
            metrics.vmem_percent.set(vmem);
        }
        if let Some(smem) = reading.smem_percent {
            metrics.smem_percent.set(smem);
        }
        trace!(?reading, window = self.cpu_window.len(), "system metrics updated");
    }

    pub fn tick(&mut self, metrics: &ExporterMetrics) {
        let reading = self.query();
        self.record(reading, metrics);
    }

    #[cfg(test)]
    pub fn cpu_window(&self) -> &RollingWindow {
        &self.cpu_window
    }
}
