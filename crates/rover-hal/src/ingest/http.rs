//! Pull producer: streams `multipart/x-mixed-replace` MJPEG over HTTP and
//! feeds each completed JPEG to the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use super::{IngestConfig, LinkReporter, LinkState};
use crate::frame_store::FrameStore;
use crate::mjpeg::MjpegSplitter;

/// Connect, stream, and reconnect until `running` is cleared.
pub async fn run_http(
    url: String,
    store: Arc<FrameStore>,
    config: IngestConfig,
    running: Arc<AtomicBool>,
) {
    let mut link = LinkReporter::new(store, "http");
    let client = match reqwest::Client::builder()
        .connect_timeout(config.receive_timeout)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "http client setup failed, using defaults");
            reqwest::Client::new()
        }
    };

    while running.load(Ordering::SeqCst) {
        let response = client
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        let mut response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!(%url, error = %e, "camera stream unavailable");
                link.report(LinkState::Error);
                sleep(config.backoff).await;
                continue;
            }
        };
        info!(%url, "camera stream opened");

        let mut splitter = MjpegSplitter::default();
        while running.load(Ordering::SeqCst) {
            match timeout(config.receive_timeout, response.chunk()).await {
                Ok(Ok(Some(chunk))) => {
                    for frame in splitter.push(&chunk) {
                        link.accept(&frame);
                    }
                }
                Ok(Ok(None)) => {
                    info!(%url, "camera stream ended");
                    link.report(LinkState::Waiting);
                    break;
                }
                Ok(Err(e)) => {
                    warn!(%url, error = %e, "camera stream broke");
                    link.report(LinkState::Error);
                    break;
                }
                Err(_) => {
                    warn!(%url, "camera stream stalled");
                    link.report(LinkState::Waiting);
                    break;
                }
            }
        }
        if running.load(Ordering::SeqCst) {
            sleep(config.backoff).await;
        }
    }
    info!(%url, "http ingestion stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn unreachable_camera_reports_error_and_keeps_retrying() {
        let store = Arc::new(FrameStore::new());
        let running = Arc::new(AtomicBool::new(true));
        let config = IngestConfig {
            backoff: Duration::from_millis(20),
            receive_timeout: Duration::from_millis(100),
            ..IngestConfig::default()
        };
        // Port 9 (discard) on localhost is expected to refuse connections.
        let task = tokio::spawn(run_http(
            "http://127.0.0.1:9/stream".to_string(),
            Arc::clone(&store),
            config,
            Arc::clone(&running),
        ));

        let mut state = None;
        for _ in 0..50 {
            state = store.get_telemetry().get("state").cloned();
            if state.is_some() {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(state.as_ref().and_then(|v| v.as_str()), Some("ERROR"));
        assert!(!task.is_finished());

        running.store(false, Ordering::SeqCst);
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }
}
