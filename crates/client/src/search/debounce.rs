// Input debouncer for the search stream.
//
// Holds the latest input until it has been quiet for the window (default
// 500ms, range 100–2000ms). A newer input replaces the pending one and
// restarts the timer.

use std::time::Duration;

use tokio::time::Instant;

/// Default quiet interval.
const DEFAULT_DEBOUNCE_MS: u64 = 500;
/// Minimum allowed quiet interval.
const MIN_DEBOUNCE_MS: u64 = 100;
/// Maximum allowed quiet interval.
const MAX_DEBOUNCE_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchDebounceConfig {
    pub window: Duration,
}

impl Default for SearchDebounceConfig {
    fn default() -> Self {
        Self { window: Duration::from_millis(DEFAULT_DEBOUNCE_MS) }
    }
}

impl SearchDebounceConfig {
    /// Create a config with the given window in milliseconds, clamped to [100, 2000].
    pub fn with_millis(ms: u64) -> Self {
        let clamped = ms.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS);
        Self { window: Duration::from_millis(clamped) }
    }
}

struct PendingInput<T> {
    value: T,
    last_seen: Instant,
}

/// Last-value-wins debouncer.
///
/// Call `push()` for each input, then `take_ready()` once `next_deadline()`
/// has passed.
pub struct InputDebouncer<T> {
    config: SearchDebounceConfig,
    pending: Option<PendingInput<T>>,
}

impl<T> InputDebouncer<T> {
    pub fn new(config: SearchDebounceConfig) -> Self {
        Self { config, pending: None }
    }

    pub fn window(&self) -> Duration {
        self.config.window
    }

    pub fn push(&mut self, value: T) {
        self.push_at(value, Instant::now());
    }

    /// Like `push` but with a specific timestamp (for testing).
    fn push_at(&mut self, value: T, now: Instant) {
        self.pending = Some(PendingInput { value, last_seen: now });
    }

    /// Take the pending input if its quiet interval has elapsed.
    pub fn take_ready(&mut self) -> Option<T> {
        self.take_ready_at(Instant::now())
    }

    /// Like `take_ready` but with a specific timestamp (for testing).
    fn take_ready_at(&mut self, now: Instant) -> Option<T> {
        let ready = self
            .pending
            .as_ref()
            .is_some_and(|pending| now.duration_since(pending.last_seen) >= self.config.window);
        if ready {
            self.pending.take().map(|pending| pending.value)
        } else {
            None
        }
    }

    /// Drop the pending input. Returns whether there was one.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    pub fn pending(&self) -> Option<&T> {
        self.pending.as_ref().map(|pending| &pending.value)
    }

    /// When the pending input becomes ready, or None if nothing is pending.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|pending| pending.last_seen + self.config.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debouncer() -> InputDebouncer<&'static str> {
        InputDebouncer::new(SearchDebounceConfig::default())
    }

    // ── SearchDebounceConfig ───────────────────────────────────────

    #[test]
    fn default_config_is_500ms() {
        assert_eq!(SearchDebounceConfig::default().window, Duration::from_millis(500));
    }

    #[test]
    fn config_clamps_to_range() {
        assert_eq!(SearchDebounceConfig::with_millis(10).window, Duration::from_millis(100));
        assert_eq!(SearchDebounceConfig::with_millis(9000).window, Duration::from_millis(2000));
        assert_eq!(SearchDebounceConfig::with_millis(300).window, Duration::from_millis(300));
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    #[test]
    fn input_not_ready_before_window() {
        let mut debouncer = debouncer();
        let now = Instant::now();
        debouncer.push_at("cat", now);

        assert_eq!(debouncer.take_ready_at(now + Duration::from_millis(499)), None);
        assert_eq!(debouncer.pending(), Some(&"cat"));
    }

    #[test]
    fn input_ready_after_window() {
        let mut debouncer = debouncer();
        let now = Instant::now();
        debouncer.push_at("cat", now);

        assert_eq!(debouncer.take_ready_at(now + Duration::from_millis(500)), Some("cat"));
        assert!(debouncer.pending().is_none());
        assert_eq!(debouncer.take_ready_at(now + Duration::from_millis(900)), None);
    }

    #[test]
    fn newer_input_replaces_and_restarts_timer() {
        let mut debouncer = debouncer();
        let now = Instant::now();
        debouncer.push_at("c", now);
        debouncer.push_at("ca", now + Duration::from_millis(300));

        // 500ms after the first input, but only 200ms after the second.
        assert_eq!(debouncer.take_ready_at(now + Duration::from_millis(500)), None);
        assert_eq!(debouncer.take_ready_at(now + Duration::from_millis(800)), Some("ca"));
    }

    #[test]
    fn cancel_drops_pending_input() {
        let mut debouncer = debouncer();
        let now = Instant::now();
        debouncer.push_at("cat", now);

        assert!(debouncer.cancel());
        assert!(!debouncer.cancel());
        assert_eq!(debouncer.take_ready_at(now + Duration::from_secs(5)), None);
    }

    #[test]
    fn next_deadline_tracks_latest_input() {
        let mut debouncer = debouncer();
        assert!(debouncer.next_deadline().is_none());

        let now = Instant::now();
        debouncer.push_at("c", now);
        assert_eq!(debouncer.next_deadline(), Some(now + Duration::from_millis(500)));

        debouncer.push_at("ca", now + Duration::from_millis(100));
        assert_eq!(debouncer.next_deadline(), Some(now + Duration::from_millis(600)));
    }
}
