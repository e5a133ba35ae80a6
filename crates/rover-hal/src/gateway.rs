//! [`SerialGateway`] – the physical actuation link.
//!
//! The gateway microcontroller sits on a serial device and accepts one
//! joystick sample per line, `"x,y\n"`, with both axes in `0..=4095`.  It
//! answers with feedback lines in one of two formats:
//!
//! ```text
//! Pin: 12.5V | Dist: 150
//! TELE:12.5,150
//! ```
//!
//! Writes are queued on a channel and performed by a writer thread, so
//! [`ActuationSink::emit`] never blocks on I/O.  The same thread owns the
//! connection and reopens the device after failures.  A single reader thread
//! turns feedback into telemetry.  Without a device the gateway runs in demo mode
//! and only logs what it would send.
//!
//! The serial line settings (baud rate, raw mode) are expected to be
//! configured on the device node beforehand, e.g. with `stty`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use rover_kernel::ActuationSink;
use rover_types::{RoverCommand, Telemetry};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Device-name prefixes probed by [`auto_detect_port`], most specific first.
const PORT_PREFIXES: &[&str] = &[
    "cu.usbserial-",
    "cu.wchusbserial",
    "cu.SLAB_USBtoUART",
    "ttyUSB",
    "ttyACM",
];

const WRITER_POLL: Duration = Duration::from_millis(100);

// ────────────────────────────────────────────────────────────────────────────
// Configuration & status
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Serial device node.  `None` means auto-detect under `/dev`.
    pub port: Option<PathBuf>,
    /// Delay before reopening a failed device.
    pub reconnect_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: None,
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

/// Link status published under the `status` telemetry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Connected,
    Disconnected,
    Error,
    /// Demo mode: no device configured or found.
    NoDevice,
}

impl GatewayStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GatewayStatus::Connected => "CONNECTED",
            GatewayStatus::Disconnected => "DISCONNECTED",
            GatewayStatus::Error => "ERROR",
            GatewayStatus::NoDevice => "NO_DEVICE",
        }
    }
}

/// One parsed feedback line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feedback {
    pub voltage: f64,
    pub distance: i64,
}

/// Parse a gateway feedback line.  Returns `None` for anything else
/// (boot banners, debug prints).
pub fn parse_feedback_line(line: &str) -> Option<Feedback> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("TELE:") {
        let (voltage, distance) = rest.split_once(',')?;
        return Some(Feedback {
            voltage: voltage.trim().parse().ok()?,
            distance: distance.trim().parse().ok()?,
        });
    }
    let (pin, dist) = line.split_once('|')?;
    let voltage = pin.trim().strip_prefix("Pin:")?.trim().trim_end_matches('V');
    let distance = dist.trim().strip_prefix("Dist:")?.trim();
    Some(Feedback {
        voltage: voltage.trim().parse().ok()?,
        distance: distance.parse().ok()?,
    })
}

/// First serial device under `/dev` matching a known USB-serial bridge.
pub fn auto_detect_port() -> Option<PathBuf> {
    detect_port_in(Path::new("/dev"))
}

fn detect_port_in(dir: &Path) -> Option<PathBuf> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();
    PORT_PREFIXES.iter().find_map(|prefix| {
        names
            .iter()
            .find(|name| name.starts_with(prefix))
            .map(|name| dir.join(name))
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Shared state
// ────────────────────────────────────────────────────────────────────────────

struct GatewayShared {
    telemetry: Mutex<Telemetry>,
    last_feedback: Mutex<Option<Instant>>,
    running: AtomicBool,
    /// Cleared by the reader when the device stops answering.
    connected: AtomicBool,
}

impl GatewayShared {
    fn set_status(&self, status: GatewayStatus) {
        lock(&self.telemetry).insert("status".into(), status.as_str().into());
    }

    fn record_feedback(&self, feedback: Feedback) {
        let mut telemetry = lock(&self.telemetry);
        telemetry.insert("voltage".into(), feedback.voltage.into());
        telemetry.insert("distance".into(), feedback.distance.into());
        telemetry.insert(
            "last_update".into(),
            Value::from(Utc::now().timestamp_millis() as f64 / 1000.0),
        );
        drop(telemetry);
        *lock(&self.last_feedback) = Some(Instant::now());
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SerialGateway
// ────────────────────────────────────────────────────────────────────────────

/// Serial actuation sink with feedback telemetry.
pub struct SerialGateway {
    tx: Sender<(u16, u16)>,
    shared: Arc<GatewayShared>,
    port: Option<PathBuf>,
}

impl SerialGateway {
    /// Resolve the device (configured or auto-detected) and start the
    /// writer thread.  Falls back to demo mode when no device is found.
    pub fn start(config: GatewayConfig) -> Self {
        let port = config.port.clone().or_else(auto_detect_port);
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(GatewayShared {
            telemetry: Mutex::new(Telemetry::new()),
            last_feedback: Mutex::new(None),
            running: AtomicBool::new(true),
            connected: AtomicBool::new(false),
        });
        shared.set_status(GatewayStatus::Disconnected);

        let worker_shared = Arc::clone(&shared);
        match port.clone() {
            Some(path) => {
                info!(port = %path.display(), "gateway link starting");
                thread::spawn(move || {
                    write_loop(path, rx, worker_shared, config.reconnect_delay)
                });
            }
            None => {
                warn!("no gateway device found, running in demo mode");
                shared.set_status(GatewayStatus::NoDevice);
                thread::spawn(move || demo_loop(rx, worker_shared));
            }
        }

        Self { tx, shared, port }
    }

    /// Device node in use, `None` in demo mode.
    pub fn port(&self) -> Option<&Path> {
        self.port.as_deref()
    }

    pub fn is_demo(&self) -> bool {
        self.port.is_none()
    }

    /// Snapshot of `{voltage, distance, status, last_update}`.
    pub fn telemetry(&self) -> Telemetry {
        lock(&self.shared.telemetry).clone()
    }

    /// When the last feedback line was parsed.
    pub fn last_feedback_at(&self) -> Option<Instant> {
        *lock(&self.shared.last_feedback)
    }

    /// Stop the worker threads after their current poll.
    pub fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }
}

impl ActuationSink for SerialGateway {
    fn emit(&self, command: &RoverCommand) {
        if self.tx.send((command.x, command.y)).is_err() {
            warn!("gateway writer gone, command dropped");
        }
    }
}

impl Drop for SerialGateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Wire encoding of one joystick sample.
pub fn encode_axes(x: u16, y: u16) -> String {
    format!("{x},{y}\n")
}

// ────────────────────────────────────────────────────────────────────────────
// Worker threads
// ────────────────────────────────────────────────────────────────────────────

fn open_device(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}

/// Feedback reader thread bound to one opened device.
struct FeedbackReader {
    /// Cleared when the writer abandons the device this reader reads from.
    alive: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// The writer thread's single reader.  A retired reader may still be
/// blocked on an abandoned descriptor; its replacement only starts once it
/// has exited, so reconnects never stack reader threads.
#[derive(Default)]
struct ReaderSlot(Option<FeedbackReader>);

impl ReaderSlot {
    fn retire(&self) {
        if let Some(reader) = &self.0 {
            reader.alive.store(false, Ordering::SeqCst);
        }
    }

    fn needs_reader(&mut self) -> bool {
        let Some(reader) = &self.0 else {
            return true;
        };
        if reader.alive.load(Ordering::SeqCst) || !reader.handle.is_finished() {
            return false;
        }
        if let Some(reader) = self.0.take()
            && reader.handle.join().is_err()
        {
            warn!("gateway reader panicked");
        }
        true
    }

    fn start<R: Read + Send + 'static>(&mut self, source: R, shared: Arc<GatewayShared>) {
        let alive = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&alive);
        let handle = thread::spawn(move || read_loop(source, shared, flag));
        self.0 = Some(FeedbackReader { alive, handle });
    }
}

fn write_loop(
    path: PathBuf,
    rx: Receiver<(u16, u16)>,
    shared: Arc<GatewayShared>,
    reconnect_delay: Duration,
) {
    let mut device: Option<File> = None;
    let mut reader = ReaderSlot::default();

    while shared.running.load(Ordering::SeqCst) {
        if device.is_none() || !shared.connected.load(Ordering::SeqCst) {
            reader.retire();
            device = None;
            match open_device(&path) {
                Ok(file) => {
                    info!(port = %path.display(), "gateway connected");
                    shared.connected.store(true, Ordering::SeqCst);
                    shared.set_status(GatewayStatus::Connected);
                    device = Some(file);
                }
                Err(e) => {
                    warn!(port = %path.display(), error = %e, "gateway open failed");
                    shared.set_status(GatewayStatus::Error);
                    thread::sleep(reconnect_delay);
                    continue;
                }
            }
        }

        if let Some(file) = &device
            && reader.needs_reader()
        {
            match file.try_clone() {
                Ok(source) => reader.start(source, Arc::clone(&shared)),
                Err(e) => warn!(error = %e, "gateway reader could not be started"),
            }
        }

        match rx.recv_timeout(WRITER_POLL) {
            Ok((x, y)) => {
                let Some(file) = device.as_mut() else { continue };
                if let Err(e) = file
                    .write_all(encode_axes(x, y).as_bytes())
                    .and_then(|()| file.flush())
                {
                    warn!(error = %e, "gateway write failed");
                    shared.connected.store(false, Ordering::SeqCst);
                    shared.set_status(GatewayStatus::Error);
                    thread::sleep(reconnect_delay);
                } else {
                    debug!(x, y, "gateway write");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    reader.retire();
    shared.connected.store(false, Ordering::SeqCst);
    info!("gateway writer stopped");
}

fn read_loop<R: Read>(source: R, shared: Arc<GatewayShared>, alive: Arc<AtomicBool>) {
    let reader = BufReader::new(source);
    for line in reader.lines() {
        if !shared.running.load(Ordering::SeqCst) || !alive.load(Ordering::SeqCst) {
            return;
        }
        match line {
            Ok(line) => {
                if let Some(feedback) = parse_feedback_line(&line) {
                    shared.record_feedback(feedback);
                }
            }
            // Non-UTF-8 noise on the line.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => continue,
            Err(e) => {
                warn!(error = %e, "gateway read failed");
                break;
            }
        }
    }
    // A retired reader must not tear down the connection that replaced it.
    if alive.load(Ordering::SeqCst) && shared.connected.swap(false, Ordering::SeqCst) {
        shared.set_status(GatewayStatus::Disconnected);
    }
}

fn demo_loop(rx: Receiver<(u16, u16)>, shared: Arc<GatewayShared>) {
    while shared.running.load(Ordering::SeqCst) {
        match rx.recv_timeout(WRITER_POLL) {
            Ok((x, y)) => info!(x, y, "demo gateway: {}", encode_axes(x, y).trim_end()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
