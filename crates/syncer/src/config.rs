//! Engine tunables read from `VSYNC_*` environment variables.

use std::time::Duration;

use vsync_store::ItemBackoff;

/// Upper bound for [`EngineConfig::gc_jitter`]; keeps every period positive.
pub const MAX_GC_JITTER: f64 = 0.9;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base period between garbage-collection passes.
    pub gc_period: Duration,
    /// Relative jitter applied to every period, `0.25` = ±25%.
    pub gc_jitter: f64,
    pub max_concurrent_reconciles: usize,
    pub backoff: ItemBackoff,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gc_period: Duration::from_secs(30),
            gc_jitter: 0.25,
            max_concurrent_reconciles: 1,
            backoff: ItemBackoff::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let gc_period = env_parse::<u64>("VSYNC_GC_PERIOD_SECS")
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(d.gc_period);
        let gc_jitter = env_parse::<f64>("VSYNC_GC_JITTER")
            .filter(|j| j.is_finite() && (0.0..=MAX_GC_JITTER).contains(j))
            .unwrap_or(d.gc_jitter);
        let max_concurrent_reconciles =
            env_parse::<usize>("VSYNC_MAX_CONCURRENT_RECONCILES").filter(|n| *n > 0).unwrap_or(d.max_concurrent_reconciles);
        let base = env_parse::<u64>("VSYNC_BACKOFF_BASE_MS").map(Duration::from_millis).unwrap_or(d.backoff.base);
        let max = env_parse::<u64>("VSYNC_BACKOFF_MAX_SECS").map(Duration::from_secs).unwrap_or(d.backoff.max);
        Self { gc_period, gc_jitter, max_concurrent_reconciles, backoff: ItemBackoff { base, max } }
    }

    pub fn with_gc_period(mut self, period: Duration) -> Self {
        self.gc_period = period;
        self
    }

    /// Period for the next pass: `gc_period` scaled by a random factor in `[1 - jitter, 1 + jitter]`.
    /// Jitter is clamped to `[0, MAX_GC_JITTER]`.
    pub fn jittered_gc_period(&self) -> Duration {
        use rand::Rng;
        let jitter = if self.gc_jitter.is_finite() { self.gc_jitter.clamp(0.0, MAX_GC_JITTER) } else { 0.0 };
        if jitter == 0.0 {
            return self.gc_period;
        }
        let f = rand::thread_rng().gen_range(-jitter..=jitter);
        self.gc_period.mul_f64(1.0 + f)
    }
}
