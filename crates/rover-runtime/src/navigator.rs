//! [`Navigator`] – the slow strategic perception collaborator.
//!
//! The navigator asks a remote vision-language model where the rover should
//! go.  Requests are rate-limited by a cooldown the navigator owns: a fresh
//! analysis is refused until the cooldown has elapsed since the previous
//! request *started*.
//!
//! The model answers in free text that should contain one JSON object shaped
//! like [`NavigatorReply`].  [`parse_reply`] digs that object out of bare
//! text or a fenced code block and falls back to a safe "keep going straight"
//! reply when nothing usable is found.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::multipart::Form;
use rover_types::{NavigationGoal, NavigatorReply, RoverError, SteeringCommand, StrategicResult};
use schemars::schema_for;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::remote::{RemoteError, frame_form};

/// Reasoning attached to the fallback reply.
pub const UNPARSED_REASONING: &str = "Could not parse navigator response";

/// Strategic perception collaborator.
///
/// `analyze` returns `None` when the cooldown has not elapsed or the call
/// failed; callers must not read `None` as "all clear".
#[async_trait]
pub trait Navigator: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self) -> Result<(), RoverError> {
        Ok(())
    }

    fn is_ready(&self) -> bool;

    /// Time left before another analysis may start.
    fn cooldown_remaining(&self) -> Duration;

    fn can_run(&self) -> bool {
        self.cooldown_remaining().is_zero()
    }

    async fn analyze(&self, frame: &[u8]) -> Option<StrategicResult>;
}

/// Connection and pacing settings for [`RemoteNavigator`].
#[derive(Clone)]
pub struct NavigatorConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub cooldown: Duration,
    pub prompt: String,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            timeout: Duration::from_secs(3),
            cooldown: Duration::from_secs(2),
            prompt: navigator_prompt(),
        }
    }
}

impl std::fmt::Debug for NavigatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavigatorConfig")
            .field("url", &self.url)
            .field(
                "api_key",
                &self.api_key.as_ref().map(|_| "<redacted>").unwrap_or("<not set>"),
            )
            .field("timeout", &self.timeout)
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

/// Instruction sent with every frame, with the reply schema embedded.
pub fn navigator_prompt() -> String {
    let schema = serde_json::to_value(schema_for!(NavigatorReply)).unwrap_or(Value::Null);
    format!(
        "You are a rover navigator guiding a rescue rover safely through the \
         environment. Analyse the spatial gaps and obstacles in this camera view. \
         Is there a walkable path at least 1 meter wide? Where should the rover steer? \
         Reply with ONLY a JSON object matching this schema:\n{schema}"
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Reply parsing
// ─────────────────────────────────────────────────────────────────────────────

/// The reply used when the model's text holds no usable JSON object.
pub fn fallback_reply() -> NavigatorReply {
    NavigatorReply {
        hazard: false,
        nav_goal: NavigationGoal::FollowPath,
        steering: SteeringCommand::Center,
        reasoning: UNPARSED_REASONING.to_string(),
    }
}

/// Extract a [`NavigatorReply`] from free model text.
///
/// Missing fields take safe values; unknown goal or steering strings map to
/// `follow_path` / `center`.
pub fn parse_reply(text: &str) -> NavigatorReply {
    let Some(object) = fenced_object(text).or_else(|| first_object(text)) else {
        return fallback_reply();
    };
    let field = |key: &str| object.get(key).and_then(Value::as_str);
    NavigatorReply {
        hazard: object.get("hazard").and_then(Value::as_bool).unwrap_or(false),
        nav_goal: field("nav_goal")
            .and_then(|s| s.parse().ok())
            .unwrap_or(NavigationGoal::FollowPath),
        steering: field("steering")
            .and_then(|s| s.parse().ok())
            .unwrap_or(SteeringCommand::Center),
        reasoning: field("reasoning").unwrap_or_default().to_string(),
    }
}

fn fenced_object(text: &str) -> Option<Value> {
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let close = after.find("```")?;
        if let Some(object) = first_object(&after[..close]) {
            return Some(object);
        }
        rest = &after[close + 3..];
    }
    None
}

/// First brace-balanced span that parses as a JSON object.
fn first_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    for (start, _) in text.match_indices('{') {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (offset, &b) in bytes[start..].iter().enumerate() {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        let candidate = &text[start..=start + offset];
                        if let Ok(value @ Value::Object(_)) = serde_json::from_str(candidate) {
                            return Some(value);
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
    }
    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Remote navigator
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP-backed [`Navigator`].
///
/// Posts the frame as multipart field `file` and expects
/// `{"result": "<model text>"}`.  Ready once a URL is configured and
/// [`Navigator::load`] has validated it.
pub struct RemoteNavigator {
    config: NavigatorConfig,
    client: reqwest::Client,
    ready: AtomicBool,
    last_request: Mutex<Option<Instant>>,
}

impl RemoteNavigator {
    pub fn new(config: NavigatorConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            config,
            client,
            ready: AtomicBool::new(false),
            last_request: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &NavigatorConfig {
        &self.config
    }

    /// Claim the cooldown slot, or `false` if it is still running.
    fn try_start(&self, now: Instant) -> bool {
        let mut last = self.last_request.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(prev) = *last
            && now.duration_since(prev) < self.config.cooldown
        {
            return false;
        }
        *last = Some(now);
        true
    }

    async fn request(&self, frame: &[u8]) -> Result<String, RemoteError> {
        let url = self.config.url.as_deref().ok_or(RemoteError::NotConfigured)?;
        let form: Form = frame_form(frame)?.text("prompt", self.config.prompt.clone());
        let mut req = self.client.post(url).multipart(form);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }
        let body: Value = req.send().await?.error_for_status()?.json().await?;
        extract_result(&body)
    }
}

/// Pull the model text out of a navigator response body.
pub fn extract_result(body: &Value) -> Result<String, RemoteError> {
    if let Some(text) = body.get("result").and_then(Value::as_str) {
        return Ok(text.to_string());
    }
    match body.get("error") {
        Some(err) => Err(RemoteError::BadResponse(format!("server error: {err}"))),
        None => Err(RemoteError::BadResponse("missing 'result' field".to_string())),
    }
}

#[async_trait]
impl Navigator for RemoteNavigator {
    fn name(&self) -> &str {
        "navigator"
    }

    async fn load(&self) -> Result<(), RoverError> {
        let load_err = |details: String| RoverError::ModelLoad {
            component: "navigator".to_string(),
            details,
        };
        let url = self
            .config
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| load_err("no navigator URL configured".to_string()))?;
        reqwest::Url::parse(url).map_err(|e| load_err(format!("invalid URL '{url}': {e}")))?;
        info!(%url, cooldown = ?self.config.cooldown, "remote navigator configured");
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn cooldown_remaining(&self) -> Duration {
        let last = self.last_request.lock().unwrap_or_else(PoisonError::into_inner);
        last.map_or(Duration::ZERO, |prev| {
            self.config.cooldown.saturating_sub(prev.elapsed())
        })
    }

    async fn analyze(&self, frame: &[u8]) -> Option<StrategicResult> {
        let started = Instant::now();
        if !self.try_start(started) {
            return None;
        }
        let text = match self.request(frame).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, timeout = e.is_timeout(), "navigator request failed");
                return None;
            }
        };
        let reply = parse_reply(&text);
        let inference_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        debug!(
            steering = reply.steering.as_str(),
            hazard = reply.hazard,
            inference_time_ms,
            "navigator reply"
        );
        Some(StrategicResult {
            hazard: reply.hazard,
            nav_goal: reply.nav_goal,
            steering: reply.steering,
            reasoning: reply.reasoning,
            inference_time_ms,
            raw_response: text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_bare_object_in_prose() {
        let reply = parse_reply(
            r#"Sure! {"hazard": false, "nav_goal": "open_space", "steering": "left", "reasoning": "gap on the left"} Hope that helps."#,
        );
        assert!(!reply.hazard);
        assert_eq!(reply.nav_goal, NavigationGoal::OpenSpace);
        assert_eq!(reply.steering, SteeringCommand::Left);
        assert_eq!(reply.reasoning, "gap on the left");
    }

    #[test]
    fn parses_fenced_block_before_stray_braces() {
        let text = "Note {not json}\n```json\n{\"hazard\": true, \"nav_goal\": \"turn_around\", \"steering\": \"stop\", \"reasoning\": \"wall {ahead}\"}\n```";
        let reply = parse_reply(text);
        assert!(reply.hazard);
        assert_eq!(reply.nav_goal, NavigationGoal::TurnAround);
        assert_eq!(reply.steering, SteeringCommand::Stop);
        assert_eq!(reply.reasoning, "wall {ahead}");
    }

    #[test]
    fn unparsable_text_yields_safe_default() {
        assert_eq!(parse_reply("I cannot see anything"), fallback_reply());
        assert_eq!(parse_reply("{broken"), fallback_reply());
        assert_eq!(parse_reply(""), fallback_reply());
    }

    #[test]
    fn unknown_enum_values_fall_back() {
        let reply = parse_reply(r#"{"hazard": "maybe", "nav_goal": "fly", "steering": "up"}"#);
        assert!(!reply.hazard);
        assert_eq!(reply.nav_goal, NavigationGoal::FollowPath);
        assert_eq!(reply.steering, SteeringCommand::Center);
        assert_eq!(reply.reasoning, "");
    }

    #[test]
    fn prompt_embeds_reply_schema() {
        let prompt = navigator_prompt();
        assert!(prompt.contains("nav_goal"));
        assert!(prompt.contains("steering"));
        assert!(prompt.contains("avoid_obstacle"));
    }

    #[test]
    fn result_extraction_handles_error_bodies() {
        assert_eq!(extract_result(&json!({"result": "ok"})).unwrap(), "ok");
        assert!(matches!(
            extract_result(&json!({"error": "CUDA OOM"})),
            Err(RemoteError::BadResponse(msg)) if msg.contains("CUDA OOM")
        ));
        assert!(extract_result(&json!({})).is_err());
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = NavigatorConfig {
            api_key: Some("sk-secret".into()),
            ..NavigatorConfig::default()
        };
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn cooldown_is_claimed_at_request_start() {
        let nav = RemoteNavigator::new(NavigatorConfig {
            cooldown: Duration::from_secs(60),
            ..NavigatorConfig::default()
        });
        assert!(nav.can_run());
        let now = Instant::now();
        assert!(nav.try_start(now));
        assert!(!nav.try_start(now + Duration::from_secs(1)));
        assert!(!nav.can_run());
        assert!(nav.cooldown_remaining() > Duration::from_secs(58));
    }

    #[tokio::test]
    async fn load_requires_a_valid_url() {
        let missing = RemoteNavigator::new(NavigatorConfig::default());
        assert!(missing.load().await.is_err());
        assert!(!missing.is_ready());

        let bad = RemoteNavigator::new(NavigatorConfig {
            url: Some("not a url".into()),
            ..NavigatorConfig::default()
        });
        assert!(bad.load().await.is_err());

        let good = RemoteNavigator::new(NavigatorConfig {
            url: Some("http://127.0.0.1:9/analyze".into()),
            ..NavigatorConfig::default()
        });
        assert!(good.load().await.is_ok());
        assert!(good.is_ready());
    }

    #[tokio::test]
    async fn transport_failure_returns_none_and_starts_cooldown() {
        let nav = RemoteNavigator::new(NavigatorConfig {
            url: Some("http://127.0.0.1:9/analyze".into()),
            timeout: Duration::from_millis(300),
            ..NavigatorConfig::default()
        });
        assert!(nav.analyze(&[0xFF, 0xD8, 0xFF, 0xD9]).await.is_none());
        assert!(!nav.can_run());
        assert!(nav.analyze(&[0xFF, 0xD8, 0xFF, 0xD9]).await.is_none());
    }
}
