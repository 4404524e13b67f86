//! Prometheus metrics of the reconcilers

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

use crate::Error;

/// Counters and histograms shared by all controllers of one process
#[derive(Clone)]
pub struct ControllerMetrics {
    /// Finished operations by resource kind, operation and outcome
    pub operations_total: CounterVec,
    /// Gardener error codes reported in `lastError`
    pub errors_total: CounterVec,
    /// Run time of single flow tasks
    pub flow_task_duration_seconds: HistogramVec,
    pub registry: Arc<Registry>,
}

impl ControllerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations_total = CounterVec::new(
            Opts::new("azure_extension_operations_total", "Finished extension operations"),
            &["kind", "operation", "result"],
        )?;

        let errors_total = CounterVec::new(
            Opts::new("azure_extension_errors_total", "Error codes of failed operations"),
            &["kind", "code"],
        )?;

        let flow_task_duration_seconds = HistogramVec::new(
            HistogramOpts::new("azure_extension_flow_task_duration_seconds", "Flow task run time in seconds")
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0]),
            &["flow", "task", "result"],
        )?;

        registry.register(Box::new(operations_total.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;
        registry.register(Box::new(flow_task_duration_seconds.clone()))?;

        Ok(Self {
            operations_total,
            errors_total,
            flow_task_duration_seconds,
            registry,
        })
    }

    /// Count the outcome of one operation on a resource of `kind`
    pub fn observe_operation(&self, kind: &str, operation: &str, result: &Result<(), Error>) {
        let outcome = match result {
            Ok(()) => "succeeded",
            Err(Error::RequeueAfter { .. }) => "requeued",
            Err(e) if e.is_canceled() => "canceled",
            Err(_) => "failed",
        };
        self.operations_total
            .with_label_values(&[kind, operation, outcome])
            .inc();

        if let Err(e) = result {
            for code in e.codes() {
                self.errors_total.with_label_values(&[kind, code.as_str()]).inc();
            }
        }
    }

    pub fn observe_task(&self, flow: &str, task: &str, result: &str, elapsed: Duration) {
        self.flow_task_duration_seconds
            .with_label_values(&[flow, task, result])
            .observe(elapsed.as_secs_f64());
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> prometheus::Result<String> {
        let mut buffer = vec![];
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl fmt::Debug for ControllerMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerMetrics").finish_non_exhaustive()
    }
}
