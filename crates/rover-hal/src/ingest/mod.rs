//! Ingestion producers – background feeds that fill the [`FrameStore`].
//!
//! One producer runs per configured transport:
//!
//! | Source | Module | Transport |
//! |---|---|---|
//! | [`VideoSource::Udp`] | [`udp`] | one JPEG per datagram |
//! | [`VideoSource::Http`] | [`http`] | pulled MJPEG multipart stream |
//! | [`VideoSource::Device`] | [`device`] | local [`Camera`][crate::camera::Camera] driver |
//!
//! Every producer runs its own retry loop.  Connection loss and bad frames
//! are reported through the `state` telemetry key ([`LinkState`]) and
//! retried after [`IngestConfig::backoff`]; they never end the task.  The
//! loops exit once the shared `running` flag is cleared.

pub mod device;
pub mod http;
pub mod udp;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use rover_types::RoverError;
use tokio::task::JoinHandle;

use crate::camera::ReplayCamera;
use crate::frame_store::FrameStore;

/// Telemetry key carrying the producer's [`LinkState`].
pub const STATE_KEY: &str = "state";
/// Telemetry key naming the active producer.
pub const SOURCE_KEY: &str = "video_source";

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Which transport feeds the store.
#[derive(Debug, Clone, PartialEq)]
pub enum VideoSource {
    /// Listen for JPEG datagrams on `0.0.0.0:port`.
    Udp { port: u16 },
    /// Pull an MJPEG stream from `url`.
    Http { url: String },
    /// Replay a directory of JPEG files at `fps`.
    Device { dir: PathBuf, fps: f64 },
}

impl VideoSource {
    pub fn name(&self) -> &'static str {
        match self {
            VideoSource::Udp { .. } => "udp",
            VideoSource::Http { .. } => "http",
            VideoSource::Device { .. } => "device",
        }
    }
}

/// Timing shared by every producer.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Sleep between reconnection attempts.
    pub backoff: Duration,
    /// Silence after which the link is reported as [`LinkState::Waiting`].
    pub receive_timeout: Duration,
    /// Receive buffer size for datagram transports.
    pub max_datagram: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(2000),
            receive_timeout: Duration::from_millis(2000),
            max_datagram: 65_507,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Link state reporting
// ────────────────────────────────────────────────────────────────────────────

/// Connection marker published under [`STATE_KEY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Waiting,
    Error,
}

impl LinkState {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkState::Connected => "CONNECTED",
            LinkState::Waiting => "WAITING",
            LinkState::Error => "ERROR",
        }
    }
}

/// Writes [`LinkState`] transitions into the store's telemetry, skipping
/// writes when the state has not changed.
pub(crate) struct LinkReporter {
    store: Arc<FrameStore>,
    source: &'static str,
    last: Option<LinkState>,
}

impl LinkReporter {
    pub(crate) fn new(store: Arc<FrameStore>, source: &'static str) -> Self {
        store.set_telemetry_value(SOURCE_KEY, source);
        Self {
            store,
            source,
            last: None,
        }
    }

    pub(crate) fn report(&mut self, state: LinkState) {
        if self.last == Some(state) {
            return;
        }
        tracing::info!(source = self.source, state = state.as_str(), "video link state");
        self.store.set_telemetry_value(STATE_KEY, state.as_str());
        self.last = Some(state);
    }

    /// Store a received frame; a rejected frame is logged and dropped.
    pub(crate) fn accept(&mut self, frame: &[u8]) {
        match self.store.feed_frame(frame, None) {
            Ok(()) => self.report(LinkState::Connected),
            Err(e) => tracing::debug!(source = self.source, error = %e, "frame dropped"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Spawning
// ────────────────────────────────────────────────────────────────────────────

/// Start the producer for `source` on the current Tokio runtime.
///
/// # Errors
///
/// Returns [`RoverError::Config`] when a device source cannot be opened.
/// Network sources never fail here; their errors surface as link state.
pub fn spawn_ingest(
    source: VideoSource,
    store: Arc<FrameStore>,
    config: IngestConfig,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, RoverError> {
    let handle = match source {
        VideoSource::Udp { port } => {
            tokio::spawn(udp::run_udp(port, store, config, running))
        }
        VideoSource::Http { url } => {
            tokio::spawn(http::run_http(url, store, config, running))
        }
        VideoSource::Device { dir, fps } => {
            let camera = ReplayCamera::open("device", &dir)?;
            let period = frame_period(fps);
            tokio::task::spawn_blocking(move || {
                device::run_device(Box::new(camera), store, period, config, running)
            })
        }
    };
    Ok(handle)
}

fn frame_period(fps: f64) -> Duration {
    if fps.is_finite() && fps > 0.0 {
        Duration::from_secs_f64(1.0 / fps)
    } else {
        Duration::from_millis(50)
    }
}
