//! `rover-hal` – Hardware-facing I/O
//!
//! Everything that touches a camera, a socket, or the serial gateway lives
//! here.  The rest of the workspace only sees the [`FrameStore`] and the
//! [`ActuationSink`][rover_kernel::ActuationSink] implemented by
//! [`SerialGateway`].
//!
//! # Modules
//!
//! - [`frame_store`] – latest raw/display frame plus the telemetry map.
//! - [`ingest`] – UDP, HTTP MJPEG, and local-device producers.
//! - [`mjpeg`] – JPEG framing of a multipart byte stream.
//! - [`camera`] – the [`Camera`][camera::Camera] driver trait and a
//!   directory-replay camera.
//! - [`gateway`] – serial actuation sink and feedback parsing.
//! - [`telemetry`] – store and gateway telemetry merged for display.

pub mod camera;
pub mod frame_store;
pub mod gateway;
pub mod ingest;
pub mod mjpeg;
pub mod telemetry;

pub use frame_store::FrameStore;
pub use gateway::{GatewayConfig, SerialGateway};
pub use ingest::{IngestConfig, VideoSource, spawn_ingest};
pub use telemetry::merge_telemetry;
