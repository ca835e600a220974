//! Prometheus metrics for extension activation.

use prometheus::{Counter, Histogram, HistogramOpts, Registry};

use crate::error::Result;

/// Configuration for activation metrics.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Prefix for every metric name.
    pub prefix: String,
    /// Histogram buckets for activation duration, in seconds.
    pub buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prefix: "extension_runtime".to_string(),
            buckets: vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0],
        }
    }
}

impl MetricsConfig {
    /// Create a new metrics configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the metric prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Replace the activation duration buckets.
    pub fn with_buckets(mut self, buckets: Vec<f64>) -> Self {
        self.buckets = buckets;
        self
    }
}

/// Counters and timings for one runtime's activation run.
pub struct ActivationMetrics {
    config: MetricsConfig,
    registry: Registry,
    activated: Counter,
    skipped: Counter,
    failed: Counter,
    activation_duration: Histogram,
}

impl ActivationMetrics {
    /// Create the collectors and register them with a fresh registry.
    pub fn new(config: MetricsConfig) -> Result<Self> {
        let registry = Registry::new();

        let activated = Counter::new(
            format!("{}_activated_total", config.prefix),
            "Total number of extensions activated",
        )?;
        let skipped = Counter::new(
            format!("{}_skipped_total", config.prefix),
            "Total number of disabled extensions skipped",
        )?;
        let failed = Counter::new(
            format!("{}_failed_total", config.prefix),
            "Total number of failed extension activations",
        )?;
        let activation_duration = Histogram::with_opts(
            HistogramOpts::new(
                format!("{}_activation_duration_seconds", config.prefix),
                "Extension activation duration in seconds",
            )
            .buckets(config.buckets.clone()),
        )?;

        registry.register(Box::new(activated.clone()))?;
        registry.register(Box::new(skipped.clone()))?;
        registry.register(Box::new(failed.clone()))?;
        registry.register(Box::new(activation_duration.clone()))?;

        Ok(Self {
            config,
            registry,
            activated,
            skipped,
            failed,
            activation_duration,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Get the Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a completed activation.
    pub fn record_activation(&self, duration_secs: f64) {
        self.activated.inc();
        self.activation_duration.observe(duration_secs);
    }

    /// Record a disabled extension.
    pub fn record_skip(&self) {
        self.skipped.inc();
    }

    /// Record a failed activation.
    pub fn record_failure(&self) {
        self.failed.inc();
    }

    /// Extensions activated so far.
    pub fn activated_total(&self) -> u64 {
        self.activated.get() as u64
    }

    /// Extensions skipped so far.
    pub fn skipped_total(&self) -> u64 {
        self.skipped.get() as u64
    }

    /// Failed activations so far.
    pub fn failed_total(&self) -> u64 {
        self.failed.get() as u64
    }
}

impl std::fmt::Debug for ActivationMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationMetrics")
            .field("config", &self.config)
            .field("activated", &self.activated_total())
            .field("skipped", &self.skipped_total())
            .field("failed", &self.failed_total())
            .finish()
    }
}
