//! Prometheus metrics of the admission webhook

use std::fmt;
use std::sync::Arc;

use prometheus::{CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

/// Admission counters behind one registry
#[derive(Clone)]
pub struct AdmissionMetrics {
    /// Reviews received, by admission operation
    pub requests_total: CounterVec,
    /// Reviews answered with `allowed: false`
    pub denials_total: CounterVec,
    /// Size of the returned JSON patches in bytes
    pub patch_size_bytes: Histogram,
    pub registry: Arc<Registry>,
}

impl AdmissionMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let requests_total = CounterVec::new(
            Opts::new("azure_admission_requests_total", "Shoot admission reviews received"),
            &["operation"],
        )?;

        let denials_total = CounterVec::new(
            Opts::new("azure_admission_denials_total", "Shoot admission reviews denied"),
            &["operation"],
        )?;

        let patch_size_bytes = Histogram::with_opts(
            HistogramOpts::new("azure_admission_patch_size_bytes", "Size of returned JSON patches in bytes")
                .buckets(prometheus::exponential_buckets(64.0, 4.0, 6)?),
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(denials_total.clone()))?;
        registry.register(Box::new(patch_size_bytes.clone()))?;

        Ok(Self {
            requests_total,
            denials_total,
            patch_size_bytes,
            registry,
        })
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> prometheus::Result<String> {
        let mut buffer = vec![];
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl fmt::Debug for AdmissionMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_text_format() {
        let metrics = AdmissionMetrics::new().unwrap();
        metrics.requests_total.with_label_values(&["CREATE"]).inc();
        metrics.patch_size_bytes.observe(300.0);

        let text = metrics.gather().unwrap();
        assert!(text.contains("# TYPE azure_admission_requests_total counter"));
        assert!(text.contains("azure_admission_patch_size_bytes_bucket{le=\"1024\"} 1"));
    }
}
