//! Per-tool sliding-window rate limiting.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

/// Length of the sliding window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Default limit: calls per tool per window.
pub const DEFAULT_RATE_LIMIT: usize = 30;

/// Invocation timestamps of one tool inside the trailing window.
#[derive(Debug, Default)]
pub struct RateWindow {
    calls: VecDeque<Instant>,
}

fn expired(call: Instant, now: Instant) -> bool {
    now.saturating_duration_since(call) > RATE_WINDOW
}

impl RateWindow {
    /// Drop timestamps older than the window.
    pub fn evict(&mut self, now: Instant) {
        while self.calls.front().is_some_and(|&t| expired(t, now)) {
            self.calls.pop_front();
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.calls.push_back(now);
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Calls inside the window as of `now`, without evicting.
    pub fn recent(&self, now: Instant) -> usize {
        self.calls.iter().filter(|&&t| !expired(t, now)).count()
    }
}

/// One mutex-guarded [`RateWindow`] per tool name.
///
/// Admission for a tool is decided while holding that tool's window lock,
/// so concurrent calls to the same tool can never overshoot its limit.
/// Different tools do not contend.
#[derive(Debug)]
pub struct RateLimiter {
    default_limit: usize,
    limits: HashMap<String, usize>,
    windows: Mutex<HashMap<String, Arc<Mutex<RateWindow>>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT, HashMap::new())
    }
}

impl RateLimiter {
    pub fn new(default_limit: usize, limits: HashMap<String, usize>) -> Self {
        Self {
            default_limit,
            limits,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Calls per window allowed for `name`.
    pub fn limit_for(&self, name: &str) -> usize {
        self.limits.get(name).copied().unwrap_or(self.default_limit)
    }

    fn window(&self, name: &str) -> Arc<Mutex<RateWindow>> {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Run `f` with exclusive access to the window of `name` and its limit.
    pub fn with_window<R>(&self, name: &str, f: impl FnOnce(&mut RateWindow, usize) -> R) -> R {
        let window = self.window(name);
        let mut guard = window.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard, self.limit_for(name))
    }

    /// Names of the tools that own a window, sorted.
    pub fn tracked_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Calls inside the trailing window per tool, omitting tools with none.
    pub fn stats(&self, now: Instant) -> BTreeMap<String, usize> {
        let windows: Vec<(String, Arc<Mutex<RateWindow>>)> = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(name, window)| (name.clone(), window.clone()))
            .collect();

        windows
            .into_iter()
            .filter_map(|(name, window)| {
                let recent = window
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .recent(now);
                (recent > 0).then_some((name, recent))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_evicts_only_expired() {
        let start = Instant::now();
        let mut window = RateWindow::default();
        window.record(start);
        window.record(start + Duration::from_secs(30));

        window.evict(start + Duration::from_secs(60));
        assert_eq!(window.len(), 2);

        window.evict(start + Duration::from_secs(61));
        assert_eq!(window.len(), 1);
        assert_eq!(window.recent(start + Duration::from_secs(91)), 0);
    }

    #[test]
    fn test_limits_and_stats() {
        let limiter = RateLimiter::new(5, HashMap::from([("ping".to_string(), 2)]));
        assert_eq!(limiter.limit_for("ping"), 2);
        assert_eq!(limiter.limit_for("weather"), 5);

        let now = Instant::now();
        limiter.with_window("ping", |w, _| w.record(now));
        limiter.with_window("ping", |w, _| w.record(now));
        limiter.with_window("weather", |w, _| w.evict(now));

        let stats = limiter.stats(now);
        assert_eq!(stats.get("ping"), Some(&2));
        assert!(!stats.contains_key("weather"));
        assert_eq!(
            limiter.tracked_tools(),
            vec!["ping".to_string(), "weather".to_string()]
        );
    }
}
