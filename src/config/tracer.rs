//! Tracer configuration.

/// Decides whether a new trace is reported.
///
/// The decision is made once, when a root span starts, and travels with the
/// trace context; downstream hops never re-sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sampler {
    /// Always (`true`) or never (`false`) sample.
    Const(bool),
    /// Sample each trace with the given probability in `[0.0, 1.0]`.
    Probabilistic(f64),
}

impl Default for Sampler {
    fn default() -> Self {
        Sampler::Const(true)
    }
}

impl Sampler {
    /// Draws a sampling decision for a new trace.
    pub fn should_sample(&self) -> bool {
        match *self {
            Sampler::Const(decision) => decision,
            Sampler::Probabilistic(rate) if rate >= 1.0 => true,
            Sampler::Probabilistic(rate) if rate <= 0.0 => false,
            Sampler::Probabilistic(rate) => fastrand::f64() < rate,
        }
    }
}

/// Configuration for a [`Tracer`](crate::tracing_support::Tracer).
///
/// ## Example
///
/// ```rust
/// use tracemux::config::{Sampler, TracerConfig};
///
/// let config = TracerConfig::builder()
///     .service_name("gateway")
///     .sampler(Sampler::Probabilistic(0.25))
///     .build();
///
/// assert_eq!(config.service_name, "gateway");
/// ```
#[derive(Debug, Clone, bon::Builder)]
pub struct TracerConfig {
    /// Name recorded on every span this tracer produces.
    #[builder(into)]
    pub service_name: String,

    /// Sampling strategy for root spans.
    #[builder(default)]
    pub sampler: Sampler,
}

impl TracerConfig {
    /// Creates a configuration that samples every trace.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self::builder().service_name(service_name).build()
    }

    /// Sets the sampling strategy.
    #[must_use]
    pub fn with_sampler(mut self, sampler: Sampler) -> Self {
        self.sampler = sampler;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_const_sampler() {
        assert!(Sampler::Const(true).should_sample());
        assert!(!Sampler::Const(false).should_sample());
    }

    #[test]
    fn test_probabilistic_sampler_bounds() {
        assert!(Sampler::Probabilistic(1.0).should_sample());
        assert!(!Sampler::Probabilistic(0.0).should_sample());
        assert!(!Sampler::Probabilistic(-3.0).should_sample());
    }

    #[test]
    fn test_probabilistic_sampler_rate() {
        let sampled = (0..10_000)
            .filter(|_| Sampler::Probabilistic(0.5).should_sample())
            .count();
        assert!((4_000..6_000).contains(&sampled), "sampled {sampled}");
    }

    #[test]
    fn test_defaults() {
        let config = TracerConfig::new("storage");
        assert_eq!(config.service_name, "storage");
        assert_eq!(config.sampler, Sampler::Const(true));

        let config = config.with_sampler(Sampler::Const(false));
        assert_eq!(config.sampler, Sampler::Const(false));
    }
}
