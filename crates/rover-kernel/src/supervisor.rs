//! [`SafetySupervisor`] – watchdog timeouts as SAFETY-tier stops.
//!
//! While any monitored link is silent past its deadline the supervisor holds
//! a SAFETY stop in the arbiter, naming the silent links.  Once every link
//! reports again the supervisor's stop is withdrawn.  A SAFETY command it
//! displaced (an operator emergency stop) is put back; otherwise lower tiers
//! resume.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rover_types::{CommandPriority, RoverCommand};
use tracing::{info, warn};

use crate::arbiter::CommandArbiter;
use crate::watchdog::Watchdog;

/// Source tag on every stop the supervisor submits.
pub const SUPERVISOR_SOURCE: &str = "watchdog";

#[derive(Default)]
struct Latch {
    /// Links that caused the currently held stop; empty when none is held.
    links: Vec<String>,
    /// Foreign SAFETY command our stop displaced, restored on recovery.
    displaced: Option<RoverCommand>,
}

pub struct SafetySupervisor {
    arbiter: Arc<CommandArbiter>,
    watchdog: Mutex<Watchdog>,
    latch: Mutex<Latch>,
}

impl SafetySupervisor {
    pub fn new(arbiter: Arc<CommandArbiter>) -> Self {
        Self {
            arbiter,
            watchdog: Mutex::new(Watchdog::new()),
            latch: Mutex::new(Latch::default()),
        }
    }

    /// Start monitoring `link`.
    pub fn register(&self, link: &str, timeout: Duration) {
        lock(&self.watchdog).register(link, timeout);
    }

    pub fn heartbeat(&self, link: &str) {
        lock(&self.watchdog).heartbeat(link);
    }

    /// Feed the most recent sign of life of `link`, if there has been one.
    pub fn observe(&self, link: &str, seen: Option<Instant>) {
        if let Some(seen) = seen {
            lock(&self.watchdog).heartbeat_at(link, seen);
        }
    }

    /// Evaluate every deadline now.  See [`check_at`][Self::check_at].
    pub fn check(&self) -> Vec<String> {
        self.check_at(Instant::now())
    }

    /// Evaluate every deadline at `now`, submitting or releasing the SAFETY
    /// stop as needed.  Returns the timed-out links.
    pub fn check_at(&self, now: Instant) -> Vec<String> {
        let frozen = lock(&self.watchdog).check_all_at(now);
        let mut latch = lock(&self.latch);

        if frozen.is_empty() {
            if !latch.links.is_empty() {
                info!(links = ?latch.links, "all links healthy, releasing safety stop");
                latch.links.clear();
                let previous = latch.displaced.take();
                self.arbiter
                    .restore_owned(CommandPriority::Safety, SUPERVISOR_SOURCE, previous);
            }
            return frozen;
        }

        if latch.links != frozen {
            warn!(links = ?frozen, "link timeout, holding safety stop");
            let displaced = self.arbiter.replace(RoverCommand::stop(
                CommandPriority::Safety,
                SUPERVISOR_SOURCE,
                format!("{} timed out", frozen.join(", ")),
            ));
            if let Some(cmd) = displaced
                && cmd.source != SUPERVISOR_SOURCE
            {
                latch.displaced = Some(cmd);
            }
            latch.links = frozen.clone();
        }
        frozen
    }

    /// `true` while a watchdog stop is being held.
    pub fn is_tripped(&self) -> bool {
        !lock(&self.latch).links.is_empty()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
