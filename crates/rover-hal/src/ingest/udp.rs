//! Datagram producer: the rover's camera sends one complete JPEG per UDP
//! datagram.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use super::{IngestConfig, LinkReporter, LinkState};
use crate::frame_store::FrameStore;

/// Receive loop for `0.0.0.0:port`.  Rebinds after socket errors.
pub async fn run_udp(
    port: u16,
    store: Arc<FrameStore>,
    config: IngestConfig,
    running: Arc<AtomicBool>,
) {
    let mut link = LinkReporter::new(store, "udp");
    let mut buf = vec![0u8; config.max_datagram];

    while running.load(Ordering::SeqCst) {
        let socket = match UdpSocket::bind(("0.0.0.0", port)).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!(port, error = %e, "camera socket bind failed");
                link.report(LinkState::Error);
                sleep(config.backoff).await;
                continue;
            }
        };
        info!(port, "listening for camera datagrams");
        link.report(LinkState::Waiting);

        while running.load(Ordering::SeqCst) {
            match timeout(config.receive_timeout, socket.recv_from(&mut buf)).await {
                Err(_) => link.report(LinkState::Waiting),
                Ok(Ok((len, _from))) => link.accept(&buf[..len]),
                Ok(Err(e)) => {
                    warn!(port, error = %e, "camera socket receive failed");
                    link.report(LinkState::Error);
                    sleep(config.backoff).await;
                    break;
                }
            }
        }
    }
    info!(port, "udp ingestion stopped");
}
