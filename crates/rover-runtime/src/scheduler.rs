//! [`AiScheduler`] – the dual-rate autonomy orchestrator.
//!
//! Two cooperative loops share one enable flag:
//!
//! 1. **Tactical** (~30 Hz) – runs the [`Detector`] on the newest raw frame.
//!    A stop verdict becomes a TACTICAL stop in the arbiter; a clear verdict
//!    actively releases the TACTICAL tier.
//! 2. **Strategic** (~0.5 Hz, paced by the navigator's cooldown) – runs the
//!    [`Navigator`] and turns its reply into a STRATEGIC command.  A missing
//!    reply leaves the current STRATEGIC command untouched.
//!
//! Both collaborators are loaded once, concurrently, when the scheduler
//! starts.  A collaborator that never becomes ready idles its own loop and
//! nothing else.
//!
//! Each loop iteration is exposed as a step method
//! ([`AiScheduler::tactical_step`], [`AiScheduler::strategic_step`]) so it
//! can be driven directly from tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rover_hal::FrameStore;
use rover_kernel::{CommandArbiter, MissionLog};
use rover_types::{CommandPriority, RateMeter, RoverCommand, SteeringCommand, StrategicResult};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::detector::Detector;
use crate::navigator::Navigator;

/// Source tag on tactical commands.
pub const TACTICAL_SOURCE: &str = "detector";
/// Source tag on strategic commands.
pub const STRATEGIC_SOURCE: &str = "navigator";
/// Stop reason used when the navigator flags a hazard.
pub const HAZARD_REASON: &str = "hazard detected";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Loop pacing and command shaping for [`AiScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Sleep between tactical iterations while active.
    pub tactical_period: Duration,
    /// Sleep while disabled or the detector is not ready.
    pub tactical_idle: Duration,
    /// Sleep between strategic iterations.
    pub strategic_period: Duration,
    /// Sleep while the navigator is not ready.
    pub strategic_unready: Duration,
    /// Forward speed (`0.0..=1.0`) for strategic steer commands.
    pub cruise_speed: f32,
    /// Take over the display frame with the detector's annotated output.
    pub annotate: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tactical_period: Duration::from_millis(33),
            tactical_idle: Duration::from_millis(100),
            strategic_period: Duration::from_millis(500),
            strategic_unready: Duration::from_secs(1),
            cruise_speed: 0.3,
            annotate: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Step outcomes and status
// ─────────────────────────────────────────────────────────────────────────────

/// What one tactical iteration did.
#[derive(Debug, Clone, PartialEq)]
pub enum TacticalStep {
    Disabled,
    NotReady,
    NoFrame,
    /// A TACTICAL stop with this reason was submitted.
    Stopped(String),
    /// The TACTICAL tier was released.
    Clear,
    /// The detector failed; the TACTICAL tier was released.
    Failed,
}

/// What one strategic iteration did.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategicStep {
    Disabled,
    NotReady,
    CoolingDown,
    NoFrame,
    /// The navigator produced nothing; STRATEGIC was left alone.
    NoResult,
    Submitted(RoverCommand),
}

/// Snapshot for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub running: bool,
    pub tactical_ready: bool,
    pub strategic_ready: bool,
    pub tactical_fps: f64,
    pub strategic_cooldown_secs: f64,
    pub tactical_detections: u64,
    pub strategic_decisions: u64,
    pub strategic_last_run: Option<DateTime<Utc>>,
    /// `true` while a tactical stop is held.
    pub hazard: bool,
}

/// Translate a navigator result into the STRATEGIC command to submit.
///
/// A flagged hazard always wins over the steering direction.
pub fn strategic_command(result: &StrategicResult, cruise_speed: f32) -> RoverCommand {
    let tier = CommandPriority::Strategic;
    if result.hazard {
        return RoverCommand::stop(tier, STRATEGIC_SOURCE, HAZARD_REASON);
    }
    match result.steering {
        SteeringCommand::Stop => {
            RoverCommand::stop(tier, STRATEGIC_SOURCE, result.reasoning.clone())
        }
        direction => RoverCommand::steer(tier, STRATEGIC_SOURCE, direction, cruise_speed),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Stats {
    tactical_rate: RateMeter,
    tactical_detections: u64,
    strategic_decisions: u64,
    strategic_last_run: Option<DateTime<Utc>>,
    /// Reason of the tactical stop currently held.
    held_stop: Option<String>,
}

struct Inner {
    store: Arc<FrameStore>,
    arbiter: Arc<CommandArbiter>,
    detector: Arc<dyn Detector>,
    navigator: Arc<dyn Navigator>,
    mission_log: MissionLog,
    config: SchedulerConfig,
    enabled: AtomicBool,
    running: AtomicBool,
    /// Held while toggling `enabled` and while submitting, so a disable can
    /// never be followed by a late submission from an in-flight iteration.
    stats: Mutex<Stats>,
}

/// Cloneable handle to the two autonomy loops.  Starts disabled.
#[derive(Clone)]
pub struct AiScheduler {
    inner: Arc<Inner>,
}

impl AiScheduler {
    pub fn new(
        store: Arc<FrameStore>,
        arbiter: Arc<CommandArbiter>,
        detector: Arc<dyn Detector>,
        navigator: Arc<dyn Navigator>,
        mission_log: MissionLog,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                arbiter,
                detector,
                navigator,
                mission_log,
                config,
                enabled: AtomicBool::new(false),
                running: AtomicBool::new(false),
                stats: Mutex::new(Stats::default()),
            }),
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Load both collaborators and spawn the two loops.
    ///
    /// Returns the loader and loop handles; empty if already running.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }
        info!("AI scheduler starting");

        let loader = {
            let this = self.clone();
            tokio::spawn(async move { this.load_collaborators().await })
        };
        let tactical = {
            let this = self.clone();
            tokio::spawn(async move { this.tactical_loop().await })
        };
        let strategic = {
            let this = self.clone();
            tokio::spawn(async move { this.strategic_loop().await })
        };
        vec![loader, tactical, strategic]
    }

    /// Ask both loops to exit after their current iteration.
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            info!("AI scheduler stopping");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn enable(&self) {
        let _gate = self.stats();
        if self.inner.enabled.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.inner.config.annotate {
            self.inner.store.set_active_ai(true);
        }
        self.inner.mission_log.append("ai", "autonomy enabled");
    }

    /// Turn autonomy off and release everything it holds in the arbiter.
    pub fn disable(&self) {
        let mut stats = self.stats();
        if !self.inner.enabled.swap(false, Ordering::SeqCst) {
            return;
        }
        stats.held_stop = None;
        self.inner
            .arbiter
            .release(&[CommandPriority::Tactical, CommandPriority::Strategic]);
        self.inner.store.set_active_ai(false);
        drop(stats);
        self.inner.mission_log.append("ai", "autonomy disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SchedulerStatus {
        let stats = self.stats();
        SchedulerStatus {
            enabled: self.is_enabled(),
            running: self.is_running(),
            tactical_ready: self.inner.detector.is_ready(),
            strategic_ready: self.inner.navigator.is_ready(),
            tactical_fps: (stats.tactical_rate.rate() * 10.0).round() / 10.0,
            strategic_cooldown_secs: (self.inner.navigator.cooldown_remaining().as_secs_f64()
                * 10.0)
                .round()
                / 10.0,
            tactical_detections: stats.tactical_detections,
            strategic_decisions: stats.strategic_decisions,
            strategic_last_run: stats.strategic_last_run,
            hazard: stats.held_stop.is_some(),
        }
    }

    // ── Iterations ──────────────────────────────────────────────────────────

    /// Run one tactical iteration.
    pub async fn tactical_step(&self) -> TacticalStep {
        let inner = &self.inner;
        if !self.is_enabled() {
            return TacticalStep::Disabled;
        }
        if !inner.detector.is_ready() {
            return TacticalStep::NotReady;
        }
        let Some(frame) = inner.store.get_raw_frame() else {
            return TacticalStep::NoFrame;
        };

        let outcome = inner.detector.detect(&frame).await;

        let mut stats = self.stats();
        if !self.is_enabled() {
            return TacticalStep::Disabled;
        }
        stats.tactical_rate.tick();

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!(detector = inner.detector.name(), error = %e, "detection failed");
                stats.held_stop = None;
                inner.arbiter.clear(CommandPriority::Tactical);
                return TacticalStep::Failed;
            }
        };

        stats.tactical_detections += result.detections.len() as u64;
        if inner.config.annotate
            && let Some(annotated) = result.annotated_frame
        {
            inner.store.set_display_frame(annotated);
        }

        if result.should_stop {
            let reason = result
                .stop_reason
                .unwrap_or_else(|| "obstacle detected".to_string());
            inner.arbiter.submit(RoverCommand::stop(
                CommandPriority::Tactical,
                TACTICAL_SOURCE,
                reason.clone(),
            ));
            if stats.held_stop.as_deref() != Some(reason.as_str()) {
                inner.mission_log.append("tactical", format!("stop: {reason}"));
                stats.held_stop = Some(reason.clone());
            }
            TacticalStep::Stopped(reason)
        } else {
            inner.arbiter.clear(CommandPriority::Tactical);
            if stats.held_stop.take().is_some() {
                inner.mission_log.append("tactical", "path clear");
            }
            TacticalStep::Clear
        }
    }

    /// Run one strategic iteration.
    pub async fn strategic_step(&self) -> StrategicStep {
        let inner = &self.inner;
        if !self.is_enabled() {
            return StrategicStep::Disabled;
        }
        if !inner.navigator.is_ready() {
            return StrategicStep::NotReady;
        }
        if !inner.navigator.can_run() {
            return StrategicStep::CoolingDown;
        }
        let Some(frame) = inner.store.get_raw_frame() else {
            return StrategicStep::NoFrame;
        };

        let Some(result) = inner.navigator.analyze(&frame).await else {
            debug!("navigator returned nothing this tick");
            return StrategicStep::NoResult;
        };

        let mut stats = self.stats();
        if !self.is_enabled() {
            return StrategicStep::Disabled;
        }
        let command = strategic_command(&result, inner.config.cruise_speed);
        inner.arbiter.submit(command.clone());
        stats.strategic_decisions += 1;
        stats.strategic_last_run = Some(Utc::now());
        drop(stats);

        inner.mission_log.append(
            "strategic",
            format!("{} - {}", result.steering.as_str(), result.reasoning),
        );
        info!(
            steering = result.steering.as_str(),
            hazard = result.hazard,
            inference_ms = result.inference_time_ms,
            "strategic decision"
        );
        StrategicStep::Submitted(command)
    }

    // ── Loops ───────────────────────────────────────────────────────────────

    async fn load_collaborators(&self) {
        let inner = &self.inner;
        let (detector, navigator) = tokio::join!(inner.detector.load(), inner.navigator.load());
        for (name, outcome) in [
            (inner.detector.name(), detector),
            (inner.navigator.name(), navigator),
        ] {
            match outcome {
                Ok(()) => inner.mission_log.append("ai", format!("{name} ready")),
                Err(e) => {
                    warn!(collaborator = name, error = %e, "collaborator failed to load");
                    inner
                        .mission_log
                        .append("ai", format!("{name} unavailable: {e}"));
                }
            }
        }
    }

    async fn tactical_loop(&self) {
        let config = &self.inner.config;
        while self.is_running() {
            let pause = match self.tactical_step().await {
                TacticalStep::Disabled | TacticalStep::NotReady => config.tactical_idle,
                _ => config.tactical_period,
            };
            sleep(pause).await;
        }
        debug!("tactical loop exited");
    }

    async fn strategic_loop(&self) {
        let config = &self.inner.config;
        while self.is_running() {
            let pause = match self.strategic_step().await {
                StrategicStep::NotReady => config.strategic_unready,
                _ => config.strategic_period,
            };
            sleep(pause).await;
        }
        debug!("strategic loop exited");
    }

    fn stats(&self) -> MutexGuard<'_, Stats> {
        self.inner
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_types::NavigationGoal;

    fn result(hazard: bool, steering: SteeringCommand, reasoning: &str) -> StrategicResult {
        StrategicResult {
            hazard,
            nav_goal: NavigationGoal::FollowPath,
            steering,
            reasoning: reasoning.to_string(),
            inference_time_ms: 120.0,
            raw_response: String::new(),
        }
    }

    #[test]
    fn hazard_overrides_steering() {
        let cmd = strategic_command(&result(true, SteeringCommand::Left, "obstacle"), 0.3);
        assert!(cmd.is_stop());
        assert_eq!(cmd.reason, HAZARD_REASON);
        assert_eq!(cmd.priority, CommandPriority::Strategic);
    }

    #[test]
    fn stop_steering_carries_model_reasoning() {
        let cmd = strategic_command(&result(false, SteeringCommand::Stop, "dead end"), 0.3);
        assert!(cmd.is_stop());
        assert_eq!(cmd.reason, "dead end");
    }

    #[test]
    fn directions_become_cruise_steers() {
        let left = strategic_command(&result(false, SteeringCommand::Left, "gap"), 0.3);
        let center = strategic_command(&result(false, SteeringCommand::Center, "path"), 0.3);
        assert!(left.x < center.x);
        assert!(center.y > rover_types::AXIS_CENTER);
        assert_eq!(left.y, center.y);
        assert_eq!(left.source, STRATEGIC_SOURCE);
        assert_eq!(center.reason, "center");
    }

    #[test]
    fn default_pacing() {
        let config = SchedulerConfig::default();
        assert_eq!(config.tactical_period, Duration::from_millis(33));
        assert_eq!(config.strategic_period, Duration::from_millis(500));
        assert!(!config.annotate);
    }
}
