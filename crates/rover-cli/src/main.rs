//! `rover-cli` – rover teleoperation bridge.
//!
//! This binary wires the whole bridge together and hands the terminal to the
//! operator.  It:
//!
//! 1. Loads `~/.rover/config.toml`, writing the defaults on first run.
//! 2. Probes the navigator endpoint and reports whether it answers.
//! 3. Starts the serial gateway, the command arbiter, the safety supervisor,
//!    the camera ingestion producer, and the autonomy scheduler.
//! 4. Drops the operator into the REPL (drive keys plus slash-commands).
//! 5. Intercepts **Ctrl-C** to latch a SAFETY stop and shut down.

mod config;
mod probe;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use rover_hal::{FrameStore, SerialGateway, spawn_ingest};
use rover_kernel::{CommandArbiter, MissionLog, SafetySupervisor};
use rover_runtime::{AiScheduler, RemoteDetector, RemoteNavigator};
use rover_types::{CommandPriority, RoverCommand};

/// How often link deadlines are evaluated.
const SUPERVISION_PERIOD: Duration = Duration::from_millis(250);
/// Time given to the gateway writer to flush the final stop.
const FINAL_STOP_GRACE: Duration = Duration::from_millis(200);

fn main() {
    let _tracing = rover_runtime::init_tracing("rover");

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };
    info!(config = ?cfg, "configuration resolved");

    // ── Navigator discovery ───────────────────────────────────────────────
    if cfg.navigator_url.trim().is_empty() {
        println!(
            "  Navigator: {} (set {} to enable the strategic layer)",
            "not configured".yellow(),
            "navigator_url".bold()
        );
    } else {
        print!("  Probing navigator at {} … ", cfg.navigator_url.dimmed());
        std::io::Write::flush(&mut std::io::stdout()).ok();
        match probe::probe(&cfg.navigator_url, probe::PROBE_TIMEOUT) {
            Ok(status) => println!("{} (HTTP {})", "online".green(), status),
            Err(e) => {
                println!("{}", "offline".yellow());
                println!("  {}", e.dimmed());
            }
        }
    }

    // ── Runtime ───────────────────────────────────────────────────────────
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Failed to start async runtime".red(), e);
            return;
        }
    };

    // ── Actuation path ────────────────────────────────────────────────────
    let mission_log = MissionLog::default();
    let gateway = Arc::new(SerialGateway::start(cfg.gateway_config()));
    match gateway.port() {
        Some(port) => println!("  Gateway: {}", port.display().to_string().bold()),
        None => println!(
            "  Gateway: {} – commands are logged only",
            "demo mode".yellow()
        ),
    }
    let arbiter = Arc::new(
        CommandArbiter::new(Arc::clone(&gateway))
            .with_mission_log(mission_log.clone())
            .with_auto_mode(cfg.auto_mode),
    );

    let supervisor = Arc::new(SafetySupervisor::new(Arc::clone(&arbiter)));
    if let Some(timeout) = cfg.camera_timeout() {
        supervisor.register("camera", timeout);
    }
    if let Some(timeout) = cfg.gateway_timeout() {
        supervisor.register("gateway", timeout);
    }

    // ── Perception and ingestion ──────────────────────────────────────────
    let store = Arc::new(FrameStore::new());
    let detector = Arc::new(RemoteDetector::new(cfg.detector_config(), cfg.hazard_policy()));
    let navigator = Arc::new(RemoteNavigator::new(cfg.navigator_config()));
    let scheduler = AiScheduler::new(
        Arc::clone(&store),
        Arc::clone(&arbiter),
        detector,
        navigator,
        mission_log.clone(),
        cfg.scheduler_config(),
    );

    let running = Arc::new(AtomicBool::new(true));
    {
        let _ctx = runtime.enter();

        let source = cfg.video_source();
        match spawn_ingest(
            source.clone(),
            Arc::clone(&store),
            cfg.ingest_config(),
            Arc::clone(&running),
        ) {
            Ok(_) => println!("  Video: {} ingestion started", source.name().bold()),
            Err(e) => println!("{}: {}", "Video ingestion failed".red(), e),
        }

        scheduler.start();

        let supervisor = Arc::clone(&supervisor);
        let store = Arc::clone(&store);
        let gateway = Arc::clone(&gateway);
        let running = Arc::clone(&running);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SUPERVISION_PERIOD);
            while running.load(Ordering::SeqCst) {
                tick.tick().await;
                supervisor.observe("camera", store.last_frame_at());
                supervisor.observe("gateway", gateway.last_feedback_at());
                let frozen = supervisor.check();
                if !frozen.is_empty() {
                    tracing::debug!(?frozen, "links silent");
                }
            }
        });
    }

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        let arbiter = Arc::clone(&arbiter);
        if let Err(e) = ctrlc::set_handler(move || {
            println!();
            println!(
                "{}",
                "⚠  Ctrl-C received – stopping the rover …".yellow().bold()
            );
            arbiter.submit(RoverCommand::stop(
                CommandPriority::Safety,
                repl::OPERATOR,
                "operator interrupt",
            ));
            println!("{}", "  ✓ SAFETY stop latched.".green());
            shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!(error = %e, "Failed to install Ctrl-C handler; use /quit to stop the rover");
        }
    }

    println!();
    println!(
        "  Type {} for a list of commands.\n",
        "/help".bold().cyan()
    );

    // ── Interactive REPL ──────────────────────────────────────────────────
    let session = repl::Session {
        arbiter: Arc::clone(&arbiter),
        scheduler: scheduler.clone(),
        supervisor,
        store,
        gateway: Some(Arc::clone(&gateway)),
        mission_log,
    };
    repl::run(&session, shutdown);

    // ── Shutdown ──────────────────────────────────────────────────────────
    scheduler.stop();
    running.store(false, Ordering::SeqCst);
    arbiter.submit(RoverCommand::stop(
        CommandPriority::Safety,
        repl::OPERATOR,
        "bridge shutdown",
    ));
    std::thread::sleep(FINAL_STOP_GRACE);
    gateway.shutdown();
    runtime.shutdown_timeout(Duration::from_secs(2));
    println!("{}", "  ✓ Rover bridge stopped.".green());
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"    ____                        "#.bold().cyan());
    println!("{}", r#"   / __ \____ _   _____  _____  "#.bold().cyan());
    println!("{}", r#"  / /_/ / __ \ | / / _ \/ ___/  "#.bold().cyan());
    println!("{}", r#" / _, _/ /_/ / |/ /  __/ /      "#.bold().cyan());
    println!("{}", r#"/_/ |_|\____/|___/\___/_/       "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Rover".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Teleoperation and autonomy bridge");
    println!();
}
