//! Capture configuration and process-wide defaults
//!
//! Defaults come from the environment, read once at first use into an
//! immutable record. New captures copy from that record at construction,
//! so changing the environment mid-process has no effect: the usual
//! "configured once by the environment" contract without a mutable
//! global.

use std::env;
use std::sync::OnceLock;

/// Gates whether [`Capture::from_env`] returns a live capture.
///
/// [`Capture::from_env`]: crate::capture::Capture::from_env
pub const ENV_CAPTURE: &str = "FIBER_PROFILER_CAPTURE";
/// Stall budget in seconds.
pub const ENV_STALL_THRESHOLD: &str = "FIBER_PROFILER_CAPTURE_STALL_THRESHOLD";
/// Call-elision cutoff in seconds.
pub const ENV_FILTER_THRESHOLD: &str = "FIBER_PROFILER_CAPTURE_FILTER_THRESHOLD";
/// Enables call/return tracking.
pub const ENV_TRACK_CALLS: &str = "FIBER_PROFILER_CAPTURE_TRACK_CALLS";
/// Per-interval capture probability.
pub const ENV_SAMPLE_RATE: &str = "FIBER_PROFILER_CAPTURE_SAMPLE_RATE";

const DEFAULT_STALL_THRESHOLD: f64 = 0.01;
const DEFAULT_SAMPLE_RATE: f64 = 1.0;

/// Fraction of the stall threshold used as the filter threshold when no
/// explicit filter threshold is configured.
pub const FILTER_THRESHOLD_FRACTION: f64 = 0.1;

/// Configuration of one capture, immutable for the capture's lifetime.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Intervals between task-switches longer than this are stalls.
    pub stall_threshold: f64,
    /// Call frames shorter than this are candidates for elision.
    pub filter_threshold: f64,
    /// When false, only task-switch events are observed and the frame
    /// arena stays empty.
    pub track_calls: bool,
    /// Probability in (0, 1] that an interval is captured.
    pub sample_rate: f64,
    /// Fixed sampler seed; `None` seeds from entropy. Set this in tests
    /// that assert on sampling outcomes.
    pub sample_seed: Option<u64>,
}

impl CaptureConfig {
    /// Configuration with the given stall budget and the derived filter
    /// threshold; everything else from the process defaults.
    pub fn with_stall_threshold(stall_threshold: f64) -> Self {
        CaptureConfig {
            stall_threshold,
            filter_threshold: stall_threshold * FILTER_THRESHOLD_FRACTION,
            ..CaptureConfig::default()
        }
    }

    /// Clamp fields to their documented domains.
    pub(crate) fn sanitized(mut self) -> Self {
        self.sample_rate = self.sample_rate.clamp(f64::MIN_POSITIVE, 1.0);
        self.stall_threshold = self.stall_threshold.max(0.0);
        self.filter_threshold = self.filter_threshold.max(0.0);
        self
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let defaults = defaults();
        CaptureConfig {
            stall_threshold: defaults.stall_threshold,
            filter_threshold: defaults
                .filter_threshold
                .unwrap_or(defaults.stall_threshold * FILTER_THRESHOLD_FRACTION),
            track_calls: defaults.track_calls,
            sample_rate: defaults.sample_rate,
            sample_seed: None,
        }
    }
}

/// Process-wide defaults as read from the environment.
#[derive(Debug, Clone)]
pub struct Defaults {
    pub capture_enabled: bool,
    pub stall_threshold: f64,
    /// Explicit filter threshold; `None` means derive it from the stall
    /// threshold.
    pub filter_threshold: Option<f64>,
    pub track_calls: bool,
    pub sample_rate: f64,
}

impl Defaults {
    fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Parse defaults from an arbitrary variable lookup. Unparseable
    /// values fall back to the default for that option.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Defaults {
            capture_enabled: parse_flag(lookup(ENV_CAPTURE).as_deref(), false),
            stall_threshold: parse_seconds(
                lookup(ENV_STALL_THRESHOLD).as_deref(),
                DEFAULT_STALL_THRESHOLD,
            ),
            filter_threshold: lookup(ENV_FILTER_THRESHOLD)
                .as_deref()
                .and_then(|value| value.parse::<f64>().ok())
                .filter(|secs| secs.is_finite() && *secs >= 0.0),
            track_calls: parse_flag(lookup(ENV_TRACK_CALLS).as_deref(), true),
            sample_rate: parse_seconds(lookup(ENV_SAMPLE_RATE).as_deref(), DEFAULT_SAMPLE_RATE)
                .clamp(f64::MIN_POSITIVE, 1.0),
        }
    }
}

/// The process-wide defaults record, read from the environment on first
/// use and immutable thereafter.
pub fn defaults() -> &'static Defaults {
    static DEFAULTS: OnceLock<Defaults> = OnceLock::new();
    DEFAULTS.get_or_init(Defaults::from_env)
}

fn parse_flag(value: Option<&str>, default: bool) -> bool {
    match value {
        Some("true") => true,
        Some("false") => false,
        _ => default,
    }
}

fn parse_seconds(value: Option<&str>, default: f64) -> f64 {
    value
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let defaults = Defaults::from_lookup(|_| None);
        assert!(!defaults.capture_enabled);
        assert_eq!(defaults.stall_threshold, DEFAULT_STALL_THRESHOLD);
        assert_eq!(defaults.filter_threshold, None);
        assert!(defaults.track_calls);
        assert_eq!(defaults.sample_rate, DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn defaults_from_environment_values() {
        let defaults = Defaults::from_lookup(lookup(&[
            (ENV_CAPTURE, "true"),
            (ENV_STALL_THRESHOLD, "0.25"),
            (ENV_FILTER_THRESHOLD, "0.002"),
            (ENV_TRACK_CALLS, "false"),
            (ENV_SAMPLE_RATE, "0.5"),
        ]));
        assert!(defaults.capture_enabled);
        assert_eq!(defaults.stall_threshold, 0.25);
        assert_eq!(defaults.filter_threshold, Some(0.002));
        assert!(!defaults.track_calls);
        assert_eq!(defaults.sample_rate, 0.5);
    }

    #[test]
    fn unparseable_values_fall_back() {
        let defaults = Defaults::from_lookup(lookup(&[
            (ENV_CAPTURE, "yes"),
            (ENV_STALL_THRESHOLD, "soon"),
            (ENV_FILTER_THRESHOLD, "-1"),
            (ENV_TRACK_CALLS, "1"),
            (ENV_SAMPLE_RATE, "NaN"),
        ]));
        assert!(!defaults.capture_enabled);
        assert_eq!(defaults.stall_threshold, DEFAULT_STALL_THRESHOLD);
        assert_eq!(defaults.filter_threshold, None);
        assert!(defaults.track_calls);
        assert_eq!(defaults.sample_rate, DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn sample_rate_is_clamped_into_unit_interval() {
        let defaults = Defaults::from_lookup(lookup(&[(ENV_SAMPLE_RATE, "7.5")]));
        assert_eq!(defaults.sample_rate, 1.0);

        let defaults = Defaults::from_lookup(lookup(&[(ENV_SAMPLE_RATE, "0.0")]));
        assert!(defaults.sample_rate > 0.0);
    }

    #[test]
    fn derived_filter_threshold() {
        let config = CaptureConfig::with_stall_threshold(0.2);
        assert_eq!(config.stall_threshold, 0.2);
        assert!((config.filter_threshold - 0.02).abs() < 1e-12);
    }

    #[test]
    fn sanitized_clamps_rates_and_thresholds() {
        let config = CaptureConfig {
            stall_threshold: -1.0,
            filter_threshold: -0.5,
            track_calls: true,
            sample_rate: 3.0,
            sample_seed: None,
        }
        .sanitized();
        assert_eq!(config.stall_threshold, 0.0);
        assert_eq!(config.filter_threshold, 0.0);
        assert_eq!(config.sample_rate, 1.0);
    }
}
