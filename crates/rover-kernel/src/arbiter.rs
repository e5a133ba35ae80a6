//! [`CommandArbiter`] – priority-based command selection.
//!
//! Every command source (operator input, the strategic navigator, the
//! tactical detector, the safety supervisor) submits into one of five
//! priority slots.  After every mutation the arbiter scans the slots from
//! the highest tier down and hands the winner to its [`ActuationSink`] –
//! but only when the winner differs from the last emitted command, so a
//! detector re-submitting the same stop at 30 Hz produces a single write.
//!
//! # Approval gate
//!
//! While auto mode is off, STRATEGIC submissions are parked as the single
//! *pending* command instead of entering the slot table.  An operator must
//! [`approve_pending`][CommandArbiter::approve_pending] before the rover
//! acts on them.  Turning auto mode on discards whatever is parked.
//!
//! # Concurrency
//!
//! All state lives behind one [`Mutex`].  Submission, re-evaluation, and the
//! sink hand-off happen while that lock is held, so emissions are
//! linearizable: no two callers can race to emit for the same change.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rover_types::{CommandPriority, RoverCommand};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::mission_log::MissionLog;
use crate::sink::ActuationSink;

/// Maximum number of submissions retained in the command log.
pub const COMMAND_LOG_CAPACITY: usize = 100;

const TIER_COUNT: usize = CommandPriority::ALL.len();

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// One accepted submission, as kept in the bounded command log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandLogEntry {
    pub time: DateTime<Utc>,
    pub priority: CommandPriority,
    pub source: String,
    pub reason: String,
    pub x: u16,
    pub y: u16,
}

impl From<&RoverCommand> for CommandLogEntry {
    fn from(cmd: &RoverCommand) -> Self {
        Self {
            time: cmd.timestamp,
            priority: cmd.priority,
            source: cmd.source.clone(),
            reason: cmd.reason.clone(),
            x: cmd.x,
            y: cmd.y,
        }
    }
}

/// Compact description of a command for status payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSummary {
    pub priority: CommandPriority,
    pub source: String,
    pub reason: String,
    pub x: u16,
    pub y: u16,
}

impl From<&RoverCommand> for CommandSummary {
    fn from(cmd: &RoverCommand) -> Self {
        Self {
            priority: cmd.priority,
            source: cmd.source.clone(),
            reason: cmd.reason.clone(),
            x: cmd.x,
            y: cmd.y,
        }
    }
}

/// Snapshot of the arbiter for the external status surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbiterStatus {
    pub enabled: bool,
    pub auto_mode: bool,
    pub pending_command: Option<CommandSummary>,
    pub current_command: Option<CommandSummary>,
    /// Tiers currently holding a command, ascending.
    pub active_priorities: Vec<CommandPriority>,
}

// ────────────────────────────────────────────────────────────────────────────
// Internal state
// ────────────────────────────────────────────────────────────────────────────

struct ArbiterState {
    /// Latest command per tier, indexed by [`CommandPriority::ordinal`].
    slots: [Option<RoverCommand>; TIER_COUNT],
    last_emitted: Option<RoverCommand>,
    pending: Option<RoverCommand>,
    auto_mode: bool,
    enabled: bool,
    log: VecDeque<CommandLogEntry>,
}

impl ArbiterState {
    fn new() -> Self {
        Self {
            slots: Default::default(),
            last_emitted: None,
            pending: None,
            auto_mode: false,
            enabled: true,
            log: VecDeque::with_capacity(COMMAND_LOG_CAPACITY),
        }
    }

    fn winner(&self) -> Option<&RoverCommand> {
        self.slots.iter().rev().flatten().next()
    }

    fn record(&mut self, cmd: &RoverCommand) {
        if self.log.len() >= COMMAND_LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(CommandLogEntry::from(cmd));
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CommandArbiter
// ────────────────────────────────────────────────────────────────────────────

/// Resolves competing commands into a single emitted command.
///
/// # Example
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use rover_kernel::{CommandArbiter, FnSink};
/// use rover_types::{CommandPriority, RoverCommand};
///
/// let emitted = Arc::new(Mutex::new(Vec::new()));
/// let log = Arc::clone(&emitted);
/// let arbiter = CommandArbiter::new(FnSink(move |c: &RoverCommand| {
///     log.lock().unwrap().push(c.clone())
/// }));
///
/// arbiter.submit(RoverCommand::forward(CommandPriority::Manual, "operator", 0.5));
/// arbiter.submit(RoverCommand::stop(CommandPriority::Tactical, "detector", "person"));
///
/// let emitted = emitted.lock().unwrap();
/// assert_eq!(emitted.len(), 2);
/// assert_eq!(emitted[1].priority, CommandPriority::Tactical);
/// ```
pub struct CommandArbiter {
    state: Mutex<ArbiterState>,
    sink: Box<dyn ActuationSink>,
    neutral_on_idle: bool,
    mission_log: Option<MissionLog>,
}

impl CommandArbiter {
    /// Create an enabled arbiter with auto mode off.
    ///
    /// When the slot table empties after a command was emitted, the sink
    /// receives one IDLE-tier neutral stop; see
    /// [`with_neutral_on_idle`][Self::with_neutral_on_idle].
    pub fn new(sink: impl ActuationSink + 'static) -> Self {
        Self {
            state: Mutex::new(ArbiterState::new()),
            sink: Box::new(sink),
            neutral_on_idle: true,
            mission_log: None,
        }
    }

    /// Whether to emit a neutral stop when every slot becomes empty.
    pub fn with_neutral_on_idle(mut self, neutral: bool) -> Self {
        self.neutral_on_idle = neutral;
        self
    }

    /// Record approval-gate and mode changes into `log`.
    pub fn with_mission_log(mut self, log: MissionLog) -> Self {
        self.mission_log = Some(log);
        self
    }

    /// Initial auto-mode setting.
    pub fn with_auto_mode(self, auto_mode: bool) -> Self {
        self.lock().auto_mode = auto_mode;
        self
    }

    // ── Submission ──────────────────────────────────────────────────────────

    /// Offer a command.
    ///
    /// Ignored while the arbiter is disabled.  A STRATEGIC command with auto
    /// mode off replaces the pending command and does not reach the slot
    /// table.  Anything else replaces the command in its tier's slot and
    /// triggers re-evaluation.
    pub fn submit(&self, command: RoverCommand) {
        self.replace(command);
    }

    /// [`submit`][Self::submit], returning the command that previously held
    /// the slot.  Parked or dropped submissions displace nothing.
    pub fn replace(&self, command: RoverCommand) -> Option<RoverCommand> {
        let mut state = self.lock();
        if !state.enabled {
            debug!(
                priority = %command.priority,
                source = %command.source,
                "arbiter disabled, command dropped"
            );
            return None;
        }
        state.record(&command);

        if command.priority == CommandPriority::Strategic && !state.auto_mode {
            if state.pending.as_ref() != Some(&command) {
                self.note(
                    "arbiter",
                    format!("awaiting approval: {} ({})", command.reason, command.source),
                );
            }
            state.pending = Some(command);
            return None;
        }

        if command.priority == CommandPriority::Safety {
            self.note("safety", format!("{} stop: {}", command.source, command.reason));
        }
        let slot = command.priority.ordinal();
        let displaced = state.slots[slot].replace(command);
        self.evaluate(&mut state);
        displaced
    }

    /// Empty the slot for `priority` and re-evaluate.  Clearing an empty
    /// slot emits nothing.
    pub fn clear(&self, priority: CommandPriority) {
        let mut state = self.lock();
        if state.slots[priority.ordinal()].take().is_some() {
            debug!(%priority, "slot cleared");
            self.evaluate(&mut state);
        }
    }

    /// Empty every slot in `tiers` and re-evaluate once, so no tier being
    /// released is emitted on the way down.  Releasing STRATEGIC also drops
    /// the pending command.
    pub fn release(&self, tiers: &[CommandPriority]) {
        let mut state = self.lock();
        if tiers.contains(&CommandPriority::Strategic)
            && let Some(cmd) = state.pending.take()
        {
            self.note("arbiter", format!("rejected: {}", cmd.reason));
        }
        let mut changed = false;
        for tier in tiers {
            changed |= state.slots[tier.ordinal()].take().is_some();
        }
        if changed {
            debug!(?tiers, "tiers released");
            self.evaluate(&mut state);
        }
    }

    /// If `source` holds the slot for `priority`, put `previous` back in its
    /// place (or empty the slot) and re-evaluate.  Returns `false` when the
    /// slot belongs to someone else, who keeps it.
    pub fn restore_owned(
        &self,
        priority: CommandPriority,
        source: &str,
        previous: Option<RoverCommand>,
    ) -> bool {
        let mut state = self.lock();
        let slot = &mut state.slots[priority.ordinal()];
        if slot.as_ref().is_none_or(|held| held.source != source) {
            return false;
        }
        *slot = previous;
        self.evaluate(&mut state);
        true
    }

    /// Empty every slot, drop the pending command, and forget the last
    /// emission.  Nothing is emitted.
    pub fn clear_all(&self) {
        let mut state = self.lock();
        Self::reset(&mut state);
    }

    // ── Approval gate ───────────────────────────────────────────────────────

    /// Toggle auto mode.  Enabling it discards any pending command.
    pub fn set_auto_mode(&self, enabled: bool) {
        let mut state = self.lock();
        if state.auto_mode == enabled {
            return;
        }
        state.auto_mode = enabled;
        let discarded = if enabled { state.pending.take() } else { None };
        drop(state);

        self.note(
            "arbiter",
            format!("auto mode {}", if enabled { "on" } else { "off" }),
        );
        if let Some(cmd) = discarded {
            info!(reason = %cmd.reason, "pending command discarded by auto mode");
        }
    }

    /// Promote the pending command into the STRATEGIC slot.
    ///
    /// Returns `false` when nothing was pending.
    pub fn approve_pending(&self) -> bool {
        let mut state = self.lock();
        let Some(cmd) = state.pending.take() else {
            return false;
        };
        self.note("arbiter", format!("approved: {}", cmd.reason));
        state.slots[CommandPriority::Strategic.ordinal()] = Some(cmd);
        self.evaluate(&mut state);
        true
    }

    /// Drop the pending command and empty the STRATEGIC slot.
    pub fn reject_pending(&self) {
        let mut state = self.lock();
        if let Some(cmd) = state.pending.take() {
            self.note("arbiter", format!("rejected: {}", cmd.reason));
        }
        if state.slots[CommandPriority::Strategic.ordinal()]
            .take()
            .is_some()
        {
            self.evaluate(&mut state);
        }
    }

    // ── Enable / disable ────────────────────────────────────────────────────

    pub fn enable(&self) {
        let mut state = self.lock();
        if !state.enabled {
            state.enabled = true;
            self.note("arbiter", "enabled");
        }
    }

    /// Stop accepting submissions and clear everything.  Nothing is emitted.
    pub fn disable(&self) {
        let mut state = self.lock();
        state.enabled = false;
        Self::reset(&mut state);
        self.note("arbiter", "disabled");
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn is_auto_mode(&self) -> bool {
        self.lock().auto_mode
    }

    /// The command parked for approval, if any.
    pub fn pending_command(&self) -> Option<RoverCommand> {
        self.lock().pending.clone()
    }

    /// The command most recently handed to the sink.  `None` once the slot
    /// table has emptied, even if a neutral stop was emitted for it.
    pub fn current_command(&self) -> Option<RoverCommand> {
        self.lock().last_emitted.clone()
    }

    /// Tiers currently holding a command, ascending.
    pub fn active_priorities(&self) -> Vec<CommandPriority> {
        let state = self.lock();
        CommandPriority::ALL
            .into_iter()
            .filter(|p| state.slots[p.ordinal()].is_some())
            .collect()
    }

    /// The newest `count` accepted submissions, oldest first.
    pub fn recent_log(&self, count: usize) -> Vec<CommandLogEntry> {
        let state = self.lock();
        let skip = state.log.len().saturating_sub(count);
        state.log.iter().skip(skip).cloned().collect()
    }

    pub fn status(&self) -> ArbiterStatus {
        let state = self.lock();
        ArbiterStatus {
            enabled: state.enabled,
            auto_mode: state.auto_mode,
            pending_command: state.pending.as_ref().map(CommandSummary::from),
            current_command: state.last_emitted.as_ref().map(CommandSummary::from),
            active_priorities: CommandPriority::ALL
                .into_iter()
                .filter(|p| state.slots[p.ordinal()].is_some())
                .collect(),
        }
    }

    // ── Internals ───────────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, ArbiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset(state: &mut ArbiterState) {
        state.slots = Default::default();
        state.pending = None;
        state.last_emitted = None;
    }

    /// Emit the winner if it differs from the last emission.  Must be called
    /// with the state lock held.
    fn evaluate(&self, state: &mut ArbiterState) {
        match state.winner().cloned() {
            Some(winner) => {
                if state.last_emitted.as_ref() == Some(&winner) {
                    return;
                }
                debug!(
                    priority = %winner.priority,
                    source = %winner.source,
                    reason = %winner.reason,
                    x = winner.x,
                    y = winner.y,
                    "emitting command"
                );
                self.sink.emit(&winner);
                state.last_emitted = Some(winner);
            }
            None => {
                if state.last_emitted.take().is_some() && self.neutral_on_idle {
                    debug!("slot table empty, emitting neutral stop");
                    self.sink.emit(&RoverCommand::stop(
                        CommandPriority::Idle,
                        "arbiter",
                        "no active command",
                    ));
                }
            }
        }
    }

    fn note(&self, source: &str, message: impl Into<String>) {
        if let Some(log) = &self.mission_log {
            log.append(source, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::FnSink;
    use std::sync::Arc;

    fn recording() -> (CommandArbiter, Arc<Mutex<Vec<RoverCommand>>>) {
        let emitted = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&emitted);
        let arbiter = CommandArbiter::new(FnSink(move |c: &RoverCommand| {
            log.lock().unwrap().push(c.clone())
        }));
        (arbiter, emitted)
    }

    #[test]
    fn starts_enabled_without_auto_mode() {
        let (arbiter, _) = recording();
        assert!(arbiter.is_enabled());
        assert!(!arbiter.is_auto_mode());
        assert!(arbiter.current_command().is_none());
    }

    #[test]
    fn command_log_is_bounded() {
        let (arbiter, _) = recording();
        for i in 0..(COMMAND_LOG_CAPACITY as i32 + 20) {
            arbiter.submit(RoverCommand::new(CommandPriority::Manual, i, 2048, "operator", "jog"));
        }
        let log = arbiter.recent_log(usize::MAX);
        assert_eq!(log.len(), COMMAND_LOG_CAPACITY);
        assert_eq!(log[0].x, 20);
        assert_eq!(arbiter.recent_log(3).len(), 3);
    }

    #[test]
    fn status_reports_active_tiers_ascending() {
        let (arbiter, _) = recording();
        arbiter.submit(RoverCommand::stop(CommandPriority::Tactical, "detector", "dog"));
        arbiter.submit(RoverCommand::forward(CommandPriority::Manual, "operator", 0.5));
        let status = arbiter.status();
        assert_eq!(
            status.active_priorities,
            vec![CommandPriority::Manual, CommandPriority::Tactical]
        );
        assert_eq!(
            status.current_command.map(|c| c.priority),
            Some(CommandPriority::Tactical)
        );
        assert!(status.pending_command.is_none());
    }

    #[test]
    fn neutral_stop_can_be_suppressed() {
        let emitted = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&emitted);
        let arbiter =
            CommandArbiter::new(FnSink(move |c: &RoverCommand| log.lock().unwrap().push(c.clone())))
                .with_neutral_on_idle(false);

        arbiter.submit(RoverCommand::forward(CommandPriority::Manual, "operator", 0.5));
        arbiter.clear(CommandPriority::Manual);

        assert_eq!(emitted.lock().unwrap().len(), 1);
        assert!(arbiter.current_command().is_none());
    }

    #[test]
    fn mission_log_records_gate_decisions() {
        let mission = MissionLog::default();
        let (arbiter, _) = recording();
        let arbiter = arbiter.with_mission_log(mission.clone());

        arbiter.submit(RoverCommand::steer(
            CommandPriority::Strategic,
            "navigator",
            rover_types::SteeringCommand::Left,
            0.3,
        ));
        arbiter.approve_pending();
        arbiter.set_auto_mode(true);

        let messages: Vec<String> = mission.tail(10).into_iter().map(|e| e.message).collect();
        assert!(messages.iter().any(|m| m.starts_with("awaiting approval")));
        assert!(messages.iter().any(|m| m == "approved: left"));
        assert!(messages.iter().any(|m| m == "auto mode on"));
    }

    #[test]
    fn status_serializes_tier_names() {
        let (arbiter, _) = recording();
        arbiter.submit(RoverCommand::stop(CommandPriority::Safety, "watchdog", "camera"));
        let json = serde_json::to_value(arbiter.status()).unwrap();
        assert_eq!(json["current_command"]["priority"], "SAFETY");
        assert_eq!(json["active_priorities"][0], "SAFETY");
    }
}
