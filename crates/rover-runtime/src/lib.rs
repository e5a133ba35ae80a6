//! `rover-runtime` – the autonomy layer.
//!
//! # Modules
//!
//! - [`scheduler`] – [`AiScheduler`][scheduler::AiScheduler]: the fast
//!   tactical loop and the slow, cooldown-paced strategic loop that feed the
//!   [`CommandArbiter`][rover_kernel::CommandArbiter].
//! - [`detector`] – the [`Detector`][detector::Detector] trait, the
//!   [`HazardPolicy`][detector::HazardPolicy] stop rule, and the HTTP-backed
//!   [`RemoteDetector`][detector::RemoteDetector].
//! - [`navigator`] – the [`Navigator`][navigator::Navigator] trait, lenient
//!   parsing of vision-language model replies, and the HTTP-backed
//!   [`RemoteNavigator`][navigator::RemoteNavigator].
//! - [`remote`] – multipart frame upload and the shared
//!   [`RemoteError`][remote::RemoteError].
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console logs
//!   plus optional OTLP span export (`OTEL_EXPORTER_OTLP_ENDPOINT`).

pub mod detector;
pub mod navigator;
pub mod remote;
pub mod scheduler;
pub mod telemetry;

pub use detector::{Detector, DetectorConfig, HazardPolicy, RemoteDetector};
pub use navigator::{Navigator, NavigatorConfig, RemoteNavigator, parse_reply};
pub use remote::RemoteError;
pub use scheduler::{AiScheduler, SchedulerConfig, SchedulerStatus, StrategicStep, TacticalStep};
pub use telemetry::{TracerProviderGuard, init_tracing};
