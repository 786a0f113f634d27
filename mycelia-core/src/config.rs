use std::time::Duration;

/// Overflow policy for a subsystem's bounded queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    DropNewest,
    DropOldest,
    Reject,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::Reject
    }
}

/// Process-wide defaults for queues, schedulers, the response manager
/// and the error store. A subsystem may override any field when it
/// registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    /// Default bounded-queue capacity (§4.4, default 1024).
    pub queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// Global scheduler time-slice duration per subsystem.
    pub time_slice: Duration,
    /// Max messages drained per time slice.
    pub time_slice_message_cap: usize,
    /// Default one-shot request timeout when the caller does not
    /// specify one.
    pub default_response_timeout: Duration,
    /// Per-subsystem error ring buffer capacity (default 100).
    pub error_store_capacity: usize,
    /// Bounded LRU cache size on the router's hot path.
    pub router_cache_capacity: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            queue_capacity: 1024,
            overflow_policy: OverflowPolicy::Reject,
            time_slice: Duration::from_millis(10),
            time_slice_message_cap: 32,
            default_response_timeout: Duration::from_secs(5),
            error_store_capacity: 100,
            router_cache_capacity: 512,
        }
    }
}

impl KernelConfig {
    /// Overlays environment-variable overrides onto the defaults.
    /// Unset or unparsable variables fall back silently to the current
    /// value; this mirrors a permissive, ambient configuration layer
    /// rather than a strict validating one.
    pub fn from_env() -> Self {
        let mut config = KernelConfig::default();
        if let Some(value) = env_usize("MYCELIA_QUEUE_CAPACITY") {
            config.queue_capacity = value;
        }
        if let Some(value) = env_overflow_policy("MYCELIA_OVERFLOW_POLICY") {
            config.overflow_policy = value;
        }
        if let Some(value) = env_millis("MYCELIA_TIME_SLICE_MS") {
            config.time_slice = value;
        }
        if let Some(value) = env_usize("MYCELIA_TIME_SLICE_MESSAGE_CAP") {
            config.time_slice_message_cap = value;
        }
        if let Some(value) = env_millis("MYCELIA_RESPONSE_TIMEOUT_MS") {
            config.default_response_timeout = value;
        }
        if let Some(value) = env_usize("MYCELIA_ERROR_STORE_CAPACITY") {
            config.error_store_capacity = value;
        }
        if let Some(value) = env_usize("MYCELIA_ROUTER_CACHE_CAPACITY") {
            config.router_cache_capacity = value;
        }
        config
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_millis(key: &str) -> Option<Duration> {
    env_usize(key).map(|ms| Duration::from_millis(ms as u64))
}

fn env_overflow_policy(key: &str) -> Option<OverflowPolicy> {
    match std::env::var(key).ok()?.as_str() {
        "drop-newest" => Some(OverflowPolicy::DropNewest),
        "drop-oldest" => Some(OverflowPolicy::DropOldest),
        "reject" => Some(OverflowPolicy::Reject),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let config = KernelConfig::default();
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.error_store_capacity, 100);
        assert_eq!(config.overflow_policy, OverflowPolicy::Reject);
    }
}
