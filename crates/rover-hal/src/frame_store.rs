//! [`FrameStore`] – latest-frame buffer shared by producers and consumers.
//!
//! Ingestion producers push JPEG frames in at camera rate; the AI loops and
//! the status surface read them out at their own rates.  Only the newest
//! frame is kept.  Frames are stored as `Arc<[u8]>` so a read is a refcount
//! bump under the lock, never a copy.
//!
//! # Display ownership
//!
//! `display_frame` mirrors `raw_frame` until an annotating consumer calls
//! [`FrameStore::set_active_ai`] with `true`.  From then on only
//! [`FrameStore::set_display_frame`] updates it, while raw frames keep
//! flowing to the perception loops.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use rover_types::{RateMeter, RoverError, Telemetry};
use serde_json::Value;
use tracing::trace;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
/// Some encoders pad after the end-of-image marker.
const EOI_SEARCH_TAIL: usize = 32;

/// Telemetry key holding the last completed FPS window.
pub const FPS_KEY: &str = "fps";

struct StoreState {
    raw: Option<Arc<[u8]>>,
    display: Option<Arc<[u8]>>,
    telemetry: Telemetry,
    ai_active: bool,
    rate: RateMeter,
    last_frame_at: Option<Instant>,
    frames_total: u64,
}

/// Thread-safe holder of the latest raw frame, display frame, and telemetry.
///
/// # Example
///
/// ```
/// use rover_hal::FrameStore;
///
/// let store = FrameStore::new();
/// assert!(store.get_frame().is_none());
///
/// let jpeg = vec![0xFF, 0xD8, 0x00, 0x11, 0xFF, 0xD9];
/// store.feed_frame(jpeg.clone(), None).unwrap();
/// assert_eq!(store.get_raw_frame().as_deref(), Some(jpeg.as_slice()));
/// ```
pub struct FrameStore {
    inner: Mutex<StoreState>,
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreState {
                raw: None,
                display: None,
                telemetry: Telemetry::new(),
                ai_active: false,
                rate: RateMeter::new(),
                last_frame_at: None,
                frames_total: 0,
            }),
        }
    }

    // ── Producer side ───────────────────────────────────────────────────────

    /// Store a new frame and merge optional `telemetry` into the map.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::InvalidFrame`] for an empty or truncated JPEG.
    /// A rejected frame leaves the stored frames and telemetry untouched.
    pub fn feed_frame(
        &self,
        frame: impl Into<Arc<[u8]>>,
        telemetry: Option<Telemetry>,
    ) -> Result<(), RoverError> {
        let frame: Arc<[u8]> = frame.into();
        validate_jpeg(&frame)?;

        let now = Instant::now();
        let mut state = self.lock();
        if !state.ai_active {
            state.display = Some(Arc::clone(&frame));
        }
        state.raw = Some(frame);
        if let Some(update) = telemetry {
            state.telemetry.extend(update);
        }
        state.last_frame_at = Some(now);
        state.frames_total += 1;
        if let Some(fps) = state.rate.tick_at(now) {
            trace!(fps, "frame window closed");
            state.telemetry.insert(FPS_KEY.to_string(), round1(fps));
        }
        Ok(())
    }

    /// Overwrite the display frame with an annotated copy.
    pub fn set_display_frame(&self, frame: impl Into<Arc<[u8]>>) {
        self.lock().display = Some(frame.into());
    }

    /// Hand display ownership to (`true`) or back from (`false`) an
    /// annotating consumer.
    pub fn set_active_ai(&self, active: bool) {
        self.lock().ai_active = active;
    }

    /// Merge `update` into the telemetry map, overwriting existing keys.
    pub fn update_telemetry(&self, update: Telemetry) {
        self.lock().telemetry.extend(update);
    }

    /// Set a single telemetry key.
    pub fn set_telemetry_value(&self, key: &str, value: impl Into<Value>) {
        self.lock().telemetry.insert(key.to_string(), value.into());
    }

    // ── Consumer side ───────────────────────────────────────────────────────

    /// Latest display frame, or `None` before the first frame.
    pub fn get_frame(&self) -> Option<Arc<[u8]>> {
        self.lock().display.clone()
    }

    /// Latest raw frame, or `None` before the first frame.
    pub fn get_raw_frame(&self) -> Option<Arc<[u8]>> {
        self.lock().raw.clone()
    }

    /// Snapshot of the telemetry map.
    pub fn get_telemetry(&self) -> Telemetry {
        self.lock().telemetry.clone()
    }

    pub fn is_ai_active(&self) -> bool {
        self.lock().ai_active
    }

    /// Rate of the last completed one-second window.
    pub fn fps(&self) -> f64 {
        self.lock().rate.rate()
    }

    /// When the most recent accepted frame arrived.
    pub fn last_frame_at(&self) -> Option<Instant> {
        self.lock().last_frame_at
    }

    /// Number of frames accepted since creation.
    pub fn frames_total(&self) -> u64 {
        self.lock().frames_total
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cheap structural JPEG check: start-of-image marker up front and an
/// end-of-image marker near the tail.
pub fn validate_jpeg(frame: &[u8]) -> Result<(), RoverError> {
    if frame.is_empty() {
        return Err(RoverError::InvalidFrame("empty frame".into()));
    }
    if frame.len() < 4 || frame[..2] != JPEG_SOI {
        return Err(RoverError::InvalidFrame("missing JPEG start marker".into()));
    }
    let tail = &frame[frame.len().saturating_sub(EOI_SEARCH_TAIL).max(2)..];
    if !tail.windows(2).any(|w| w == JPEG_EOI) {
        return Err(RoverError::InvalidFrame(format!(
            "truncated JPEG ({} bytes, no end marker)",
            frame.len()
        )));
    }
    Ok(())
}

fn round1(v: f64) -> Value {
    Value::from((v * 10.0).round() / 10.0)
}
