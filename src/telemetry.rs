use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

pub struct Metrics {
    request_counter: IntCounterVec,
    analysis_counter: IntCounterVec,
    inference_duration: HistogramVec,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let request_counter = IntCounterVec::new(
            Opts::new("requests_total", "Total number of requests"),
            &["route"],
        )?;
        let analysis_counter = IntCounterVec::new(
            Opts::new("analyses_total", "Total number of image analyses"),
            &["source", "outcome"],
        )?;
        let inference_duration = HistogramVec::new(
            HistogramOpts::new(
                "inference_duration_seconds",
                "Duration of detector calls in seconds",
            )
            .buckets(generate_boundaries((0.005, 0.05, 0.5, 5.0))),
            &["source"],
        )?;

        registry.register(Box::new(request_counter.clone()))?;
        registry.register(Box::new(analysis_counter.clone()))?;
        registry.register(Box::new(inference_duration.clone()))?;

        Ok(Metrics {
            request_counter,
            analysis_counter,
            inference_duration,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        self.request_counter.with_label_values(&[route]).inc();
    }

    pub fn record_analysis(&self, source: &str, outcome: &str) {
        self.analysis_counter
            .with_label_values(&[source, outcome])
            .inc();
    }

    pub fn record_inference_duration(&self, duration_ms: u64, source: &str) {
        self.inference_duration
            .with_label_values(&[source])
            .observe(duration_ms as f64 / 1000.0);
    }
}

/// Five evenly spaced buckets between each pair of consecutive bounds.
fn generate_boundaries(parts: (f64, f64, f64, f64)) -> Vec<f64> {
    let ranges = [(parts.0, parts.1), (parts.1, parts.2), (parts.2, parts.3)];
    let mut boundaries: Vec<f64> = ranges
        .iter()
        .flat_map(|&(start, end)| {
            let step = (end - start) / 5.0;
            (0..5).map(move |i| start + step * i as f64)
        })
        .collect();
    boundaries.push(parts.3);
    boundaries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_boundaries() {
        let get = generate_boundaries((1.0, 10.0, 100.0, 1000.0));
        let expected = vec![
            1.0, 2.8, 4.6, 6.4, 8.2, 10.0, 28.0, 46.0, 64.0, 82.0, 100.0, 280.0, 460.0, 640.0,
            820.0, 1000.0,
        ];

        assert_eq!(get.len(), expected.len());
        for (got, want) in get.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "{got} != {want}");
        }
    }

    #[test]
    fn test_metrics_are_exported() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request("analyze");
        metrics.record_analysis("upload", "detected");
        metrics.record_inference_duration(12, "upload");

        let names: Vec<String> = metrics
            .registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();

        assert!(names.contains(&"requests_total".to_string()));
        assert!(names.contains(&"analyses_total".to_string()));
        assert!(names.contains(&"inference_duration_seconds".to_string()));
    }
}
