//! [`Watchdog`] – link liveness deadlines.
//!
//! The rover is only safe to drive while its inputs are fresh.  Each
//! monitored link (the camera feed, the serial gateway) is registered with a
//! deadline; the supervision loop reports every observed sign of life with
//! [`Watchdog::heartbeat_at`], and [`Watchdog::check_all`] lists the links
//! whose last sign of life is older than their deadline.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Health state reported for a single link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// A sign of life arrived within the deadline.
    Healthy,
    /// The link has been silent for longer than its deadline.
    TimedOut,
}

struct LinkEntry {
    last_seen: Instant,
    timeout: Duration,
}

impl LinkEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) > self.timeout
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Watchdog
// ────────────────────────────────────────────────────────────────────────────

/// Tracks the last sign of life of each registered link.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use rover_kernel::watchdog::{ComponentHealth, Watchdog};
///
/// let mut wd = Watchdog::new();
/// wd.register("camera", Duration::from_secs(2));
/// wd.heartbeat("camera");
///
/// assert_eq!(wd.health("camera"), ComponentHealth::Healthy);
/// ```
#[derive(Default)]
pub struct Watchdog {
    links: BTreeMap<String, LinkEntry>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `link` with a maximum silence of `timeout`.
    ///
    /// The deadline starts now, so a freshly registered link gets one full
    /// timeout of grace.  Re-registering resets the deadline.
    pub fn register(&mut self, link: &str, timeout: Duration) {
        self.links.insert(
            link.to_string(),
            LinkEntry {
                last_seen: Instant::now(),
                timeout,
            },
        );
    }

    /// Record a sign of life for `link` at the current instant.
    pub fn heartbeat(&mut self, link: &str) {
        self.heartbeat_at(link, Instant::now());
    }

    /// Record a sign of life observed at `seen`.
    ///
    /// Observations older than the one already recorded are ignored.
    /// Unregistered links are ignored.
    pub fn heartbeat_at(&mut self, link: &str, seen: Instant) {
        if let Some(entry) = self.links.get_mut(link) {
            if seen > entry.last_seen {
                entry.last_seen = seen;
            }
        }
    }

    /// Health of `link`; unknown links report [`ComponentHealth::TimedOut`].
    pub fn health(&self, link: &str) -> ComponentHealth {
        self.health_at(link, Instant::now())
    }

    pub fn health_at(&self, link: &str, now: Instant) -> ComponentHealth {
        match self.links.get(link) {
            Some(entry) if !entry.is_expired(now) => ComponentHealth::Healthy,
            _ => ComponentHealth::TimedOut,
        }
    }

    /// Names of every timed-out link, sorted.
    pub fn check_all(&self) -> Vec<String> {
        self.check_all_at(Instant::now())
    }

    pub fn check_all_at(&self, now: Instant) -> Vec<String> {
        self.links
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn is_registered(&self, link: &str) -> bool {
        self.links.contains_key(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_link_is_healthy() {
        let mut wd = Watchdog::new();
        wd.register("camera", Duration::from_secs(5));
        assert_eq!(wd.health("camera"), ComponentHealth::Healthy);
        assert!(wd.is_registered("camera"));
    }

    #[test]
    fn silent_link_times_out() {
        let mut wd = Watchdog::new();
        wd.register("gateway", Duration::from_millis(100));
        let later = Instant::now() + Duration::from_millis(500);
        assert_eq!(wd.health_at("gateway", later), ComponentHealth::TimedOut);
        assert_eq!(wd.check_all_at(later), vec!["gateway".to_string()]);
    }

    #[test]
    fn heartbeat_extends_deadline() {
        let mut wd = Watchdog::new();
        wd.register("camera", Duration::from_millis(100));
        let seen = Instant::now() + Duration::from_millis(400);
        wd.heartbeat_at("camera", seen);
        assert_eq!(
            wd.health_at("camera", seen + Duration::from_millis(50)),
            ComponentHealth::Healthy
        );
    }

    #[test]
    fn stale_observation_does_not_rewind() {
        let mut wd = Watchdog::new();
        wd.register("camera", Duration::from_millis(100));
        let start = Instant::now();
        wd.heartbeat_at("camera", start + Duration::from_millis(400));
        wd.heartbeat_at("camera", start);
        assert_eq!(
            wd.health_at("camera", start + Duration::from_millis(450)),
            ComponentHealth::Healthy
        );
    }

    #[test]
    fn check_all_is_sorted() {
        let mut wd = Watchdog::new();
        wd.register("gateway", Duration::from_millis(10));
        wd.register("camera", Duration::from_millis(10));
        wd.register("slow", Duration::from_secs(60));
        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(wd.check_all_at(later), vec!["camera", "gateway"]);
    }

    #[test]
    fn unknown_link_is_timed_out_and_heartbeat_is_noop() {
        let mut wd = Watchdog::new();
        wd.heartbeat("ghost");
        assert_eq!(wd.health("ghost"), ComponentHealth::TimedOut);
        assert!(wd.check_all().is_empty());
    }
}
