//! `rover-types` – shared vocabulary of the rover bridge.
//!
//! Every other crate in the workspace speaks in these types: the command
//! tiers the arbiter orders, the immutable [`RoverCommand`] value, the
//! structured results returned by the perception collaborators, and the
//! global [`RoverError`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod rate;

pub use rate::RateMeter;

/// Free-form telemetry map shared by the frame store, the gateway, and the
/// external status surface.
pub type Telemetry = serde_json::Map<String, serde_json::Value>;

// ─────────────────────────────────────────────────────────────────────────────
// Axis constants
// ─────────────────────────────────────────────────────────────────────────────

/// Lowest value of an actuation axis.
pub const AXIS_MIN: u16 = 0;
/// Highest value of an actuation axis (12-bit ADC range of the gateway joystick).
pub const AXIS_MAX: u16 = 4095;
/// Neutral / centred axis value.
pub const AXIS_CENTER: u16 = 2048;

/// Half-range used when converting a normalised speed into an axis offset.
const AXIS_SPAN: f32 = 2047.0;

// ─────────────────────────────────────────────────────────────────────────────
// CommandPriority
// ─────────────────────────────────────────────────────────────────────────────

/// Priority tier of a command source.  Higher tiers always preempt lower ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum CommandPriority {
    /// No command.
    Idle = 0,
    /// Operator joystick or key input.
    Manual = 10,
    /// Remote vision-language model navigation.
    Strategic = 20,
    /// Local object-detection stop decisions.
    Tactical = 30,
    /// Critical stop (watchdog, operator emergency stop).
    Safety = 100,
}

impl CommandPriority {
    /// Every tier in ascending order.  The index of a tier in this array is
    /// its [`ordinal`][Self::ordinal].
    pub const ALL: [CommandPriority; 5] = [
        CommandPriority::Idle,
        CommandPriority::Manual,
        CommandPriority::Strategic,
        CommandPriority::Tactical,
        CommandPriority::Safety,
    ];

    /// Numeric tier value (`0`, `10`, `20`, `30`, `100`).
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Dense index in `0..5`, ascending with priority.
    pub fn ordinal(self) -> usize {
        match self {
            CommandPriority::Idle => 0,
            CommandPriority::Manual => 1,
            CommandPriority::Strategic => 2,
            CommandPriority::Tactical => 3,
            CommandPriority::Safety => 4,
        }
    }

    /// Upper-case tier name as shown in logs and status payloads.
    pub fn name(self) -> &'static str {
        match self {
            CommandPriority::Idle => "IDLE",
            CommandPriority::Manual => "MANUAL",
            CommandPriority::Strategic => "STRATEGIC",
            CommandPriority::Tactical => "TACTICAL",
            CommandPriority::Safety => "SAFETY",
        }
    }
}

impl fmt::Display for CommandPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for CommandPriority {
    type Error = RoverError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        CommandPriority::ALL
            .into_iter()
            .find(|p| p.value() == value)
            .ok_or(RoverError::UnknownPriority(value.to_string()))
    }
}

impl FromStr for CommandPriority {
    type Err = RoverError;

    /// Accepts a tier name (case-insensitive) or its numeric value.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(n) = trimmed.parse::<u8>() {
            return CommandPriority::try_from(n);
        }
        CommandPriority::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| RoverError::UnknownPriority(trimmed.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RoverCommand
// ─────────────────────────────────────────────────────────────────────────────

/// A single actuation proposal.
///
/// `x` and `y` are joystick axes in `0..=4095` with `2048` as neutral.  Two
/// commands compare equal when every field except `timestamp` matches, which
/// is what lets the arbiter suppress redundant writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoverCommand {
    pub priority: CommandPriority,
    pub x: u16,
    pub y: u16,
    pub source: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl PartialEq for RoverCommand {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
            && self.x == other.x
            && self.y == other.y
            && self.source == other.source
            && self.reason == other.reason
    }
}

impl Eq for RoverCommand {}

impl RoverCommand {
    /// Build a command, clamping both axes into `0..=4095`.
    pub fn new(
        priority: CommandPriority,
        x: i32,
        y: i32,
        source: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            priority,
            x: clamp_axis(x),
            y: clamp_axis(y),
            source: source.into(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    /// Neutral stop at both axes.
    pub fn stop(
        priority: CommandPriority,
        source: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            priority,
            AXIS_CENTER as i32,
            AXIS_CENTER as i32,
            source,
            reason,
        )
    }

    /// Straight ahead at `speed` (`0.0..=1.0`; negative values reverse).
    pub fn forward(priority: CommandPriority, source: impl Into<String>, speed: f32) -> Self {
        Self::new(
            priority,
            AXIS_CENTER as i32,
            speed_to_axis(speed),
            source,
            "forward",
        )
    }

    /// Forward at `speed` while steering toward `direction`.
    ///
    /// Left and right use half deflection; [`SteeringCommand::Center`] keeps
    /// the x axis neutral.  A [`SteeringCommand::Stop`] direction yields a
    /// plain stop.
    pub fn steer(
        priority: CommandPriority,
        source: impl Into<String>,
        direction: SteeringCommand,
        speed: f32,
    ) -> Self {
        let x = match direction {
            SteeringCommand::Left => (AXIS_CENTER as f32 - 0.5 * AXIS_SPAN) as i32,
            SteeringCommand::Right => (AXIS_CENTER as f32 + 0.5 * AXIS_SPAN) as i32,
            SteeringCommand::Center => AXIS_CENTER as i32,
            SteeringCommand::Stop => return Self::stop(priority, source, direction.as_str()),
        };
        Self::new(priority, x, speed_to_axis(speed), source, direction.as_str())
    }

    /// Map an analog joystick position (`-1.0..=1.0` per axis) onto the
    /// gateway's `0..=4095` range.
    pub fn from_joystick(
        priority: CommandPriority,
        source: impl Into<String>,
        x: f32,
        y: f32,
    ) -> Self {
        let map = |v: f32| ((v.clamp(-1.0, 1.0) + 1.0) * 2047.5) as i32;
        Self::new(priority, map(x), map(y), source, "joystick")
    }

    /// Translate a single-key drive command (`F`, `B`, `L`, `R`, `S`,
    /// case-insensitive) into full-deflection axes.
    pub fn from_key(
        priority: CommandPriority,
        source: impl Into<String>,
        key: char,
    ) -> Option<Self> {
        let max = AXIS_MAX as i32;
        let mid = AXIS_CENTER as i32;
        let (x, y, reason) = match key.to_ascii_uppercase() {
            'F' => (mid, max, "forward"),
            'B' => (mid, 0, "backward"),
            'L' => (0, mid, "left"),
            'R' => (max, mid, "right"),
            'S' => (mid, mid, "stop"),
            _ => return None,
        };
        Some(Self::new(priority, x, y, source, reason))
    }

    /// `true` when both axes are neutral.
    pub fn is_stop(&self) -> bool {
        self.x == AXIS_CENTER && self.y == AXIS_CENTER
    }
}

fn clamp_axis(v: i32) -> u16 {
    v.clamp(AXIS_MIN as i32, AXIS_MAX as i32) as u16
}

fn speed_to_axis(speed: f32) -> i32 {
    (AXIS_CENTER as f32 + speed.clamp(-1.0, 1.0) * AXIS_SPAN) as i32
}

// ─────────────────────────────────────────────────────────────────────────────
// Perception vocabulary
// ─────────────────────────────────────────────────────────────────────────────

/// Steering guidance reported by the strategic navigator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SteeringCommand {
    Left,
    Right,
    Center,
    Stop,
}

impl SteeringCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            SteeringCommand::Left => "left",
            SteeringCommand::Right => "right",
            SteeringCommand::Center => "center",
            SteeringCommand::Stop => "stop",
        }
    }
}

impl FromStr for SteeringCommand {
    type Err = RoverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(SteeringCommand::Left),
            "right" => Ok(SteeringCommand::Right),
            "center" | "centre" => Ok(SteeringCommand::Center),
            "stop" => Ok(SteeringCommand::Stop),
            other => Err(RoverError::Perception(format!("unknown steering '{other}'"))),
        }
    }
}

/// High-level navigation goal reported alongside the steering decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NavigationGoal {
    OpenSpace,
    FollowPath,
    AvoidObstacle,
    TurnAround,
}

impl FromStr for NavigationGoal {
    type Err = RoverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open_space" => Ok(NavigationGoal::OpenSpace),
            "follow_path" => Ok(NavigationGoal::FollowPath),
            "avoid_obstacle" => Ok(NavigationGoal::AvoidObstacle),
            "turn_around" => Ok(NavigationGoal::TurnAround),
            other => Err(RoverError::Perception(format!("unknown nav goal '{other}'"))),
        }
    }
}

/// One object reported by the tactical detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f32,
    /// Normalised `[x1, y1, x2, y2]`.
    pub bbox: [f32; 4],
    /// Fraction of the frame covered by the bounding box.
    pub area_ratio: f32,
}

/// Outcome of one tactical detection pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TacticalResult {
    pub detections: Vec<Detection>,
    pub should_stop: bool,
    pub stop_reason: Option<String>,
    pub inference_time_ms: f64,
    /// JPEG copy of the input with detections drawn on it, when the detector
    /// produces one.
    #[serde(skip)]
    pub annotated_frame: Option<Vec<u8>>,
}

/// The structured JSON object the navigator model is asked to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NavigatorReply {
    /// `true` if the scene holds an immediate danger.
    pub hazard: bool,
    pub nav_goal: NavigationGoal,
    pub steering: SteeringCommand,
    /// Short explanation (at most ~20 words).
    pub reasoning: String,
}

/// Outcome of one strategic analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategicResult {
    pub hazard: bool,
    pub nav_goal: NavigationGoal,
    pub steering: SteeringCommand,
    pub reasoning: String,
    pub inference_time_ms: f64,
    pub raw_response: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Global error type spanning tier validation, frame ingestion, transport
/// links, perception collaborators, and configuration.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RoverError {
    #[error("Unknown command priority: {0}")]
    UnknownPriority(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Transport failure on {component}: {details}")]
    Transport { component: String, details: String },

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Model load failed for {component}: {details}")]
    ModelLoad { component: String, details: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priorities_are_totally_ordered() {
        let mut sorted = CommandPriority::ALL;
        sorted.sort();
        assert_eq!(sorted, CommandPriority::ALL);
        assert!(CommandPriority::Safety > CommandPriority::Tactical);
        assert!(CommandPriority::Tactical > CommandPriority::Strategic);
        assert!(CommandPriority::Strategic > CommandPriority::Manual);
        assert!(CommandPriority::Manual > CommandPriority::Idle);
    }

    #[test]
    fn ordinal_matches_position_in_all() {
        for (i, p) in CommandPriority::ALL.iter().enumerate() {
            assert_eq!(p.ordinal(), i);
        }
    }

    #[test]
    fn unknown_tier_is_rejected() {
        assert_eq!(CommandPriority::try_from(30).unwrap(), CommandPriority::Tactical);
        assert!(matches!(
            CommandPriority::try_from(42),
            Err(RoverError::UnknownPriority(_))
        ));
        assert_eq!("manual".parse::<CommandPriority>().unwrap(), CommandPriority::Manual);
        assert_eq!("100".parse::<CommandPriority>().unwrap(), CommandPriority::Safety);
        assert!("URGENT".parse::<CommandPriority>().is_err());
    }

    #[test]
    fn equality_ignores_timestamp() {
        let a = RoverCommand::stop(CommandPriority::Tactical, "detector", "person");
        let mut b = a.clone();
        b.timestamp = a.timestamp + chrono::Duration::seconds(5);
        assert_eq!(a, b);

        let c = RoverCommand::stop(CommandPriority::Tactical, "detector", "dog");
        assert_ne!(a, c);
    }

    #[test]
    fn stop_is_neutral() {
        let cmd = RoverCommand::stop(CommandPriority::Safety, "test", "Emergency");
        assert_eq!((cmd.x, cmd.y), (AXIS_CENTER, AXIS_CENTER));
        assert!(cmd.is_stop());
    }

    #[test]
    fn forward_raises_y_only() {
        let cmd = RoverCommand::forward(CommandPriority::Manual, "operator", 0.5);
        assert_eq!(cmd.x, AXIS_CENTER);
        assert_eq!(cmd.y, 3071);
    }

    #[test]
    fn steer_deflects_x_by_half() {
        let steer = |direction| {
            RoverCommand::steer(CommandPriority::Strategic, "navigator", direction, 0.3)
        };
        let left = steer(SteeringCommand::Left);
        let right = steer(SteeringCommand::Right);
        let center = steer(SteeringCommand::Center);
        assert_eq!(left.x, 1024);
        assert_eq!(right.x, 3071);
        assert_eq!(center.x, AXIS_CENTER);
        assert_eq!(left.y, 2662);
        assert_eq!(left.reason, "left");
    }

    #[test]
    fn axes_are_clamped() {
        let cmd = RoverCommand::new(CommandPriority::Manual, -50, 9000, "operator", "");
        assert_eq!((cmd.x, cmd.y), (AXIS_MIN, AXIS_MAX));
    }

    #[test]
    fn key_commands_use_full_deflection() {
        let f = RoverCommand::from_key(CommandPriority::Manual, "operator", 'f').unwrap();
        assert_eq!((f.x, f.y), (2048, 4095));
        let l = RoverCommand::from_key(CommandPriority::Manual, "operator", 'L').unwrap();
        assert_eq!((l.x, l.y), (0, 2048));
        assert!(RoverCommand::from_key(CommandPriority::Manual, "operator", 'Q').is_none());
    }

    #[test]
    fn joystick_extremes_map_to_axis_range() {
        let cmd = RoverCommand::from_joystick(CommandPriority::Manual, "operator", -1.0, 1.0);
        assert_eq!((cmd.x, cmd.y), (0, 4095));
    }

    #[test]
    fn detection_uses_class_key_on_the_wire() {
        let json = r#"{"class":"person","confidence":0.9,"bbox":[0.1,0.1,0.6,0.9],"area_ratio":0.45}"#;
        let det: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(det.class_name, "person");
    }

    #[test]
    fn steering_parses_case_insensitively() {
        assert_eq!("LEFT".parse::<SteeringCommand>().unwrap(), SteeringCommand::Left);
        assert!("sideways".parse::<SteeringCommand>().is_err());
    }

    #[test]
    fn rover_error_display() {
        let err = RoverError::Transport {
            component: "udp".to_string(),
            details: "bind failed".to_string(),
        };
        assert!(err.to_string().contains("udp"));
        assert!(RoverError::UnknownPriority("7".into()).to_string().contains("7"));
    }
}
