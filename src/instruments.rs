//! The six request-path instruments.
//!
//! | name | kind | unit |
//! |---|---|---|
//! | `memory.heap` | gauge | `By` |
//! | `request.per.second` | counter | `1` |
//! | `task.count` | gauge | `1` |
//! | `response.time` | histogram | `ms` |
//! | `memory.allocated` | histogram | `By` |
//! | `uptime` | gauge | `s` |
//!
//! Each instrument is registered on first use and reused afterwards.

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Bucket boundaries for `response.time`, in milliseconds.
pub const RESPONSE_TIME_BOUNDARIES_MS: [f64; 6] = [0.0, 100.0, 200.0, 300.0, 400.0, 500.0];

/// Bucket boundaries for `memory.allocated`, in bytes (16 MiB .. 1 GiB).
pub const MEMORY_ALLOCATED_BOUNDARIES: [f64; 7] = [
    16_777_216.0,
    33_554_432.0,
    67_108_864.0,
    134_217_728.0,
    268_435_456.0,
    536_870_912.0,
    1_073_741_824.0,
];

/// Lazily registered instruments recorded by the request handler.
pub struct RequestMetrics {
    meter: Meter,
    started: Instant,
    heap_usage: OnceLock<Gauge<u64>>,
    request_count: OnceLock<Counter<f64>>,
    task_count: OnceLock<Gauge<i64>>,
    response_time: OnceLock<Histogram<f64>>,
    memory_allocated: OnceLock<Histogram<f64>>,
    uptime: OnceLock<Gauge<f64>>,
}

impl RequestMetrics {
    /// Creates the instrument set. Uptime is measured from this call.
    pub fn new(meter: Meter) -> Self {
        Self {
            meter,
            started: Instant::now(),
            heap_usage: OnceLock::new(),
            request_count: OnceLock::new(),
            task_count: OnceLock::new(),
            response_time: OnceLock::new(),
            memory_allocated: OnceLock::new(),
            uptime: OnceLock::new(),
        }
    }

    /// Records the resident memory of the process.
    pub fn record_heap_usage(&self) {
        let gauge = self.heap_usage.get_or_init(|| {
            self.meter
                .u64_gauge("memory.heap")
                .with_description("Resident memory used by the process.")
                .with_unit("By")
                .build()
        });
        if let Some(stats) = memory_stats::memory_stats() {
            gauge.record(stats.physical_mem as u64, &[]);
        }
    }

    /// Counts one handled request.
    pub fn record_request(&self) {
        self.request_count
            .get_or_init(|| {
                self.meter
                    .f64_counter("request.per.second")
                    .with_description("The number of requests per second.")
                    .with_unit("1")
                    .build()
            })
            .add(1.0, &[]);
    }

    /// Records how many tokio tasks are alive on the current runtime.
    ///
    /// Outside a runtime nothing is recorded.
    pub fn record_task_count(&self) {
        let gauge = self.task_count.get_or_init(|| {
            self.meter
                .i64_gauge("task.count")
                .with_description("The number of tasks that currently exist.")
                .with_unit("1")
                .build()
        });
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let alive = handle.metrics().num_alive_tasks();
            gauge.record(i64::try_from(alive).unwrap_or(i64::MAX), &[]);
        }
    }

    /// Records one response-time observation.
    pub fn record_response_time(&self, elapsed: Duration) {
        self.response_time
            .get_or_init(|| {
                self.meter
                    .f64_histogram("response.time")
                    .with_description("The response time of the server.")
                    .with_unit("ms")
                    .with_boundaries(RESPONSE_TIME_BOUNDARIES_MS.to_vec())
                    .build()
            })
            .record(elapsed.as_secs_f64() * 1000.0, &[]);
    }

    /// Records the virtual memory mapped by the process.
    pub fn record_memory_allocated(&self) {
        let histogram = self.memory_allocated.get_or_init(|| {
            self.meter
                .f64_histogram("memory.allocated")
                .with_description("The amount of memory allocated.")
                .with_unit("By")
                .with_boundaries(MEMORY_ALLOCATED_BOUNDARIES.to_vec())
                .build()
        });
        if let Some(stats) = memory_stats::memory_stats() {
            histogram.record(stats.virtual_mem as f64, &[]);
        }
    }

    /// Records seconds elapsed since the instrument set was created.
    pub fn record_uptime(&self) {
        self.uptime
            .get_or_init(|| {
                self.meter
                    .f64_gauge("uptime")
                    .with_description("The time the server has been running.")
                    .with_unit("s")
                    .build()
            })
            .record(self.uptime_secs(), &[]);
    }

    /// Seconds since creation.
    pub fn uptime_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData};
    use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};

    /// A meter provider whose exports land in memory.
    pub(crate) fn in_memory_provider() -> (SdkMeterProvider, InMemoryMetricExporter) {
        let exporter = InMemoryMetricExporter::default();
        let provider = SdkMeterProvider::builder()
            .with_reader(PeriodicReader::builder(exporter.clone()).build())
            .build();
        (provider, exporter)
    }

    pub(crate) fn meter(provider: &SdkMeterProvider) -> opentelemetry::metrics::Meter {
        provider.meter("test")
    }

    /// Flushes, then applies `read` to the most recent export of `name`.
    fn latest<T>(
        provider: &SdkMeterProvider,
        exporter: &InMemoryMetricExporter,
        name: &str,
        read: impl Fn(&AggregatedMetrics) -> Option<T>,
    ) -> Option<T> {
        provider.force_flush().ok()?;
        let exported = exporter.get_finished_metrics().ok()?;
        exported
            .iter()
            .rev()
            .flat_map(|rm| rm.scope_metrics())
            .flat_map(|sm| sm.metrics())
            .find(|m| m.name() == name)
            .and_then(|m| read(m.data()))
    }

    /// Sum of an f64 counter.
    pub(crate) fn counter_value(
        provider: &SdkMeterProvider,
        exporter: &InMemoryMetricExporter,
        name: &str,
    ) -> Option<f64> {
        latest(provider, exporter, name, |data| match data {
            AggregatedMetrics::F64(MetricData::Sum(sum)) => {
                Some(sum.data_points().map(|dp| dp.value()).sum())
            }
            _ => None,
        })
    }

    /// Observation count of an f64 histogram.
    pub(crate) fn histogram_count(
        provider: &SdkMeterProvider,
        exporter: &InMemoryMetricExporter,
        name: &str,
    ) -> Option<u64> {
        latest(provider, exporter, name, |data| match data {
            AggregatedMetrics::F64(MetricData::Histogram(histogram)) => {
                Some(histogram.data_points().map(|dp| dp.count()).sum())
            }
            _ => None,
        })
    }

    /// Whether any instrument named `name` was exported.
    pub(crate) fn exported(
        provider: &SdkMeterProvider,
        exporter: &InMemoryMetricExporter,
        name: &str,
    ) -> bool {
        latest(provider, exporter, name, |_| Some(())).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn request_counter_counts_each_call_once() {
        let (provider, exporter) = in_memory_provider();
        let metrics = RequestMetrics::new(meter(&provider));

        metrics.record_request();
        assert_eq!(
            counter_value(&provider, &exporter, "request.per.second"),
            Some(1.0)
        );

        metrics.record_request();
        metrics.record_request();
        assert_eq!(
            counter_value(&provider, &exporter, "request.per.second"),
            Some(3.0)
        );
    }

    #[test]
    fn response_time_records_one_observation_per_call() {
        let (provider, exporter) = in_memory_provider();
        let metrics = RequestMetrics::new(meter(&provider));

        metrics.record_response_time(Duration::from_millis(42));
        assert_eq!(
            histogram_count(&provider, &exporter, "response.time"),
            Some(1)
        );
    }

    #[test]
    fn instruments_register_on_first_use() {
        let (provider, _exporter) = in_memory_provider();
        let metrics = RequestMetrics::new(meter(&provider));

        assert!(metrics.request_count.get().is_none());
        assert!(metrics.response_time.get().is_none());
        metrics.record_request();
        assert!(metrics.request_count.get().is_some());
        assert!(metrics.response_time.get().is_none());
    }

    #[test]
    fn gauges_and_memory_histogram_are_exported() {
        let (provider, exporter) = in_memory_provider();
        let metrics = RequestMetrics::new(meter(&provider));

        metrics.record_heap_usage();
        metrics.record_memory_allocated();
        metrics.record_uptime();

        assert!(exported(&provider, &exporter, "uptime"));
        if memory_stats::memory_stats().is_some() {
            assert!(exported(&provider, &exporter, "memory.heap"));
            assert!(exported(&provider, &exporter, "memory.allocated"));
        }
    }

    #[tokio::test]
    async fn task_count_is_recorded_inside_a_runtime() {
        let (provider, exporter) = in_memory_provider();
        let metrics = RequestMetrics::new(meter(&provider));

        metrics.record_task_count();
        assert!(exported(&provider, &exporter, "task.count"));
    }

    #[test]
    fn uptime_grows() {
        let (provider, _exporter) = in_memory_provider();
        let metrics = RequestMetrics::new(meter(&provider));
        let before = metrics.uptime_secs();
        std::thread::sleep(Duration::from_millis(5));
        assert!(metrics.uptime_secs() > before);
    }
}
