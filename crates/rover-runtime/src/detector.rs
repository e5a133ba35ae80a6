//! [`Detector`] – the fast tactical perception collaborator.
//!
//! A detector turns one JPEG frame into a list of [`Detection`]s plus a
//! stop/no-stop verdict.  The verdict comes from a [`HazardPolicy`]: a
//! confident obstacle that fills enough of the frame means the rover must
//! stop now.
//!
//! [`RemoteDetector`] posts frames to an HTTP inference service and applies
//! the policy locally, so the service only has to return raw detections.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rover_types::{Detection, RoverError, TacticalResult};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::remote::{RemoteError, frame_form};

/// Tactical perception collaborator.
///
/// * `load` – one-shot warm-up at scheduler start; readiness flips to `true`
///   only when it succeeds.
/// * `detect` – analyse one frame.  Errors are transient: the scheduler
///   treats them as "no tactical command" for that tick.
#[async_trait]
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self) -> Result<(), RoverError> {
        Ok(())
    }

    fn is_ready(&self) -> bool;

    async fn detect(&self, frame: &[u8]) -> Result<TacticalResult, RoverError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Hazard policy
// ─────────────────────────────────────────────────────────────────────────────

/// Classes treated as obstacles unless configured otherwise.
pub const DEFAULT_OBSTACLE_CLASSES: [&str; 6] =
    ["person", "car", "bicycle", "motorcycle", "dog", "cat"];

/// Decides whether a set of detections is close enough to demand a stop.
#[derive(Debug, Clone, PartialEq)]
pub struct HazardPolicy {
    pub obstacle_classes: Vec<String>,
    /// Minimum fraction of the frame an obstacle must cover.
    pub stop_area_ratio: f32,
    pub min_confidence: f32,
}

impl Default for HazardPolicy {
    fn default() -> Self {
        Self {
            obstacle_classes: DEFAULT_OBSTACLE_CLASSES.iter().map(|c| c.to_string()).collect(),
            stop_area_ratio: 0.4,
            min_confidence: 0.5,
        }
    }
}

impl HazardPolicy {
    /// Stop reason for the largest qualifying obstacle, if any.
    pub fn evaluate(&self, detections: &[Detection]) -> Option<String> {
        detections
            .iter()
            .filter(|d| self.is_obstacle(d))
            .max_by(|a, b| a.area_ratio.total_cmp(&b.area_ratio))
            .map(|d| {
                format!(
                    "{} detected ({:.0}% of frame)",
                    d.class_name,
                    d.area_ratio * 100.0
                )
            })
    }

    /// Fill in `should_stop` / `stop_reason` from the policy.
    pub fn apply(&self, result: &mut TacticalResult) {
        result.stop_reason = self.evaluate(&result.detections);
        result.should_stop = result.stop_reason.is_some();
    }

    fn is_obstacle(&self, d: &Detection) -> bool {
        d.confidence >= self.min_confidence
            && d.area_ratio >= self.stop_area_ratio
            && self.obstacle_classes.iter().any(|c| c == &d.class_name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Remote detector
// ─────────────────────────────────────────────────────────────────────────────

/// Connection settings for [`RemoteDetector`].
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub url: Option<String>,
    pub timeout: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: Duration::from_secs(1),
        }
    }
}

/// Either a bare array or an object with a `detections` field.
#[derive(Deserialize)]
#[serde(untagged)]
enum DetectorReply {
    Wrapped { detections: Vec<Detection> },
    Bare(Vec<Detection>),
}

/// HTTP-backed [`Detector`].  Never ready without a URL.
pub struct RemoteDetector {
    config: DetectorConfig,
    policy: HazardPolicy,
    client: reqwest::Client,
    ready: AtomicBool,
}

impl RemoteDetector {
    pub fn new(config: DetectorConfig, policy: HazardPolicy) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            config,
            policy,
            client,
            ready: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> &HazardPolicy {
        &self.policy
    }

    async fn post_frame(&self, frame: &[u8]) -> Result<Vec<Detection>, RemoteError> {
        let url = self.config.url.as_deref().ok_or(RemoteError::NotConfigured)?;
        let body: Value = self
            .client
            .post(url)
            .multipart(frame_form(frame)?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_detections(body)
    }
}

/// Decode a detector response body.
pub fn parse_detections(body: Value) -> Result<Vec<Detection>, RemoteError> {
    match serde_json::from_value::<DetectorReply>(body) {
        Ok(DetectorReply::Wrapped { detections }) | Ok(DetectorReply::Bare(detections)) => {
            Ok(detections)
        }
        Err(e) => Err(RemoteError::BadResponse(e.to_string())),
    }
}

#[async_trait]
impl Detector for RemoteDetector {
    fn name(&self) -> &str {
        "detector"
    }

    async fn load(&self) -> Result<(), RoverError> {
        let Some(url) = self.config.url.as_deref() else {
            return Err(RoverError::ModelLoad {
                component: self.name().to_string(),
                details: "no detector URL configured".to_string(),
            });
        };
        info!(%url, "remote detector configured");
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn detect(&self, frame: &[u8]) -> Result<TacticalResult, RoverError> {
        let started = Instant::now();
        let detections = self
            .post_frame(frame)
            .await
            .map_err(|e| e.into_rover(self.name()))?;
        let mut result = TacticalResult {
            detections,
            inference_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            ..TacticalResult::default()
        };
        self.policy.apply(&mut result);
        debug!(
            detections = result.detections.len(),
            should_stop = result.should_stop,
            "tactical detection"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn det(class: &str, confidence: f32, area_ratio: f32) -> Detection {
        Detection {
            class_name: class.to_string(),
            confidence,
            bbox: [0.0, 0.0, 0.5, 0.5],
            area_ratio,
        }
    }

    #[test]
    fn large_obstacle_triggers_stop() {
        let policy = HazardPolicy::default();
        let reason = policy.evaluate(&[det("person", 0.9, 0.45)]);
        assert_eq!(reason.as_deref(), Some("person detected (45% of frame)"));
    }

    #[test]
    fn small_or_unlisted_or_unsure_detections_are_ignored() {
        let policy = HazardPolicy::default();
        assert!(policy.evaluate(&[det("person", 0.9, 0.2)]).is_none());
        assert!(policy.evaluate(&[det("chair", 0.9, 0.8)]).is_none());
        assert!(policy.evaluate(&[det("dog", 0.3, 0.8)]).is_none());
        assert!(policy.evaluate(&[]).is_none());
    }

    #[test]
    fn largest_qualifying_obstacle_names_the_stop() {
        let policy = HazardPolicy::default();
        let reason = policy.evaluate(&[
            det("dog", 0.8, 0.41),
            det("car", 0.7, 0.62),
            det("chair", 0.9, 0.9),
        ]);
        assert_eq!(reason.as_deref(), Some("car detected (62% of frame)"));
    }

    #[test]
    fn apply_sets_both_fields() {
        let mut result = TacticalResult {
            detections: vec![det("cat", 0.6, 0.5)],
            ..TacticalResult::default()
        };
        HazardPolicy::default().apply(&mut result);
        assert!(result.should_stop);
        assert!(result.stop_reason.is_some());

        result.detections.clear();
        HazardPolicy::default().apply(&mut result);
        assert!(!result.should_stop);
        assert!(result.stop_reason.is_none());
    }

    #[test]
    fn parses_wrapped_and_bare_replies() {
        let one = json!({"class": "person", "confidence": 0.9, "bbox": [0.1, 0.1, 0.6, 0.9], "area_ratio": 0.4});
        let wrapped = parse_detections(json!({"detections": [one.clone()]})).unwrap();
        let bare = parse_detections(json!([one])).unwrap();
        assert_eq!(wrapped, bare);
        assert_eq!(wrapped[0].class_name, "person");

        assert!(matches!(
            parse_detections(json!({"boxes": 3})),
            Err(RemoteError::BadResponse(_))
        ));
    }

    #[tokio::test]
    async fn detector_without_url_never_becomes_ready() {
        let detector = RemoteDetector::new(DetectorConfig::default(), HazardPolicy::default());
        assert!(!detector.is_ready());
        assert!(matches!(detector.load().await, Err(RoverError::ModelLoad { .. })));
        assert!(!detector.is_ready());
        assert!(detector.detect(&[0xFF, 0xD8, 0xFF, 0xD9]).await.is_err());
    }
}
