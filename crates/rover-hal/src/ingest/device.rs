//! Local-device producer: polls a [`Camera`] driver from a blocking thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::{IngestConfig, LinkReporter, LinkState};
use crate::camera::Camera;
use crate::frame_store::FrameStore;

/// Capture at most one frame per `period` until `running` is cleared.
pub fn run_device(
    mut camera: Box<dyn Camera>,
    store: Arc<FrameStore>,
    period: Duration,
    config: IngestConfig,
    running: Arc<AtomicBool>,
) {
    let mut link = LinkReporter::new(store, "device");
    info!(camera = camera.id(), ?period, "device ingestion started");

    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        match camera.capture() {
            Ok(frame) => link.accept(&frame.jpeg),
            Err(e) => {
                warn!(camera = camera.id(), error = %e, "capture failed");
                link.report(LinkState::Error);
                thread::sleep(config.backoff);
                continue;
            }
        }
        if let Some(rest) = period.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }
    info!(camera = camera.id(), "device ingestion stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraFrame;
    use rover_types::RoverError;

    struct FlakyCamera {
        calls: u64,
    }

    impl Camera for FlakyCamera {
        fn id(&self) -> &str {
            "flaky"
        }

        fn capture(&mut self) -> Result<CameraFrame, RoverError> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                return Err(RoverError::Transport {
                    component: "flaky".into(),
                    details: "unplugged".into(),
                });
            }
            Ok(CameraFrame {
                jpeg: vec![0xFF, 0xD8, self.calls as u8, 0xFF, 0xD9],
                sequence: self.calls,
            })
        }
    }

    #[test]
    fn capture_errors_back_off_without_stopping() {
        let store = Arc::new(FrameStore::new());
        let running = Arc::new(AtomicBool::new(true));
        let config = IngestConfig {
            backoff: Duration::from_millis(5),
            ..IngestConfig::default()
        };

        let worker = {
            let store = Arc::clone(&store);
            let running = Arc::clone(&running);
            thread::spawn(move || {
                run_device(
                    Box::new(FlakyCamera { calls: 0 }),
                    store,
                    Duration::from_millis(1),
                    config,
                    running,
                )
            })
        };

        let deadline = Instant::now() + Duration::from_secs(2);
        while store.frames_total() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        running.store(false, Ordering::SeqCst);
        worker.join().unwrap();

        assert!(store.frames_total() >= 3);
        assert_eq!(store.get_telemetry()["video_source"], "device");
    }
}
