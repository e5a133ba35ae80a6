//! REPL – the operator console.
//!
//! Drive keys (one letter, case-insensitive) submit MANUAL commands:
//!   f b l r s     – forward, backward, left, right, stop
//!
//! Slash-commands:
//!   /auto on|off    – let strategic commands through without approval
//!   /approve        – promote the pending strategic command
//!   /reject         – drop the pending strategic command
//!   /ai on|off      – start or pause autonomy
//!   /arbiter on|off – accept or drop every submission
//!   /estop          – latch an operator SAFETY stop
//!   /release        – release the operator SAFETY stop
//!   /status         – arbiter and autonomy snapshot
//!   /telemetry      – merged camera and gateway telemetry
//!   /log [n]        – newest mission log entries
//!   /commands [n]   – newest arbitrated commands
//!   /help           – show this list
//!   /quit | /exit   – stop the rover and exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rover_hal::{FrameStore, SerialGateway, merge_telemetry};
use rover_kernel::{CommandArbiter, MissionLog, SafetySupervisor};
use rover_runtime::AiScheduler;
use rover_types::{CommandPriority, RoverCommand, Telemetry};

/// Source tag on everything typed at the console.
pub const OPERATOR: &str = "operator";

const DEFAULT_TAIL: usize = 20;

/// Handles the console acts on.
pub struct Session {
    pub arbiter: Arc<CommandArbiter>,
    pub scheduler: AiScheduler,
    pub supervisor: Arc<SafetySupervisor>,
    pub store: Arc<FrameStore>,
    /// `None` when no gateway is wired (tests).
    pub gateway: Option<Arc<SerialGateway>>,
    pub mission_log: MissionLog,
}

/// Whether the loop keeps going after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Entry point for the interactive REPL.
///
/// Stdin is read on a helper thread so `shutdown` (set by Ctrl-C) is
/// noticed even while no line is being typed.
pub fn run(session: &Session, shutdown: Arc<AtomicBool>) {
    let (tx, rx) = mpsc::channel::<io::Result<String>>();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut prompt = true;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        if prompt {
            print!("{} ", "rover>".bold().cyan());
            io::stdout().flush().ok();
            prompt = false;
        }

        let line = match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break, // EOF
        };
        prompt = true;

        if dispatch(session, line.trim()) == Flow::Quit {
            println!("{}", "Goodbye.".green());
            shutdown.store(true, Ordering::SeqCst);
            break;
        }
    }
}

/// Execute one console line.
pub fn dispatch(session: &Session, line: &str) -> Flow {
    if line.is_empty() {
        return Flow::Continue;
    }
    let mut words = line.split_whitespace();
    let cmd = words.next().unwrap_or_default();
    let arg = words.next();

    match cmd {
        "/help" => cmd_help(),
        "/auto" => match parse_switch(arg) {
            Some(on) => {
                session.arbiter.set_auto_mode(on);
                println!("  auto mode {}", on_off(on));
            }
            None => usage("/auto on|off"),
        },
        "/approve" => {
            if session.arbiter.approve_pending() {
                println!("{}", "  ✓ pending command approved".green());
            } else {
                println!("{}", "  nothing pending".dimmed());
            }
        }
        "/reject" => {
            session.arbiter.reject_pending();
            println!("{}", "  ✓ pending command rejected".green());
        }
        "/ai" => match parse_switch(arg) {
            Some(true) => {
                session.scheduler.enable();
                println!("  autonomy {}", on_off(true));
            }
            Some(false) => {
                session.scheduler.disable();
                println!("  autonomy {}", on_off(false));
            }
            None => usage("/ai on|off"),
        },
        "/arbiter" => match parse_switch(arg) {
            Some(true) => {
                session.arbiter.enable();
                println!("  arbiter {}", on_off(true));
            }
            Some(false) => {
                session.arbiter.disable();
                println!("  arbiter {} – all commands are dropped", on_off(false));
            }
            None => usage("/arbiter on|off"),
        },
        "/estop" => {
            session.arbiter.submit(RoverCommand::stop(
                CommandPriority::Safety,
                OPERATOR,
                "operator emergency stop",
            ));
            println!("{}", "  ⚠  emergency stop latched".yellow().bold());
        }
        "/release" => cmd_release(session),
        "/status" => cmd_status(session),
        "/telemetry" => cmd_telemetry(session),
        "/log" => {
            for entry in session.mission_log.tail(parse_count(arg)) {
                println!("  {}", entry);
            }
        }
        "/commands" => {
            for entry in session.arbiter.recent_log(parse_count(arg)) {
                println!(
                    "  {} {:<9} {:<10} ({:>4},{:>4}) {}",
                    entry.time.format("%H:%M:%S"),
                    entry.priority.to_string().bold(),
                    entry.source,
                    entry.x,
                    entry.y,
                    entry.reason.dimmed()
                );
            }
        }
        "/quit" | "/exit" => return Flow::Quit,
        key if key.chars().count() == 1 => cmd_drive(session, key),
        other => {
            println!(
                "{} '{}'. Type {} for available commands.",
                "Unknown command:".red(),
                other.yellow(),
                "/help".bold()
            );
        }
    }
    Flow::Continue
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Rover Commands".bold().underline());
    println!("  {}        – forward, backward, left, right, stop", "f b l r s".bold().cyan());
    println!("  {}     – strategic commands without approval", "/auto on|off".bold().cyan());
    println!(
        "  {}  – approve or drop the pending strategic command",
        "/approve /reject".bold().cyan()
    );
    println!("  {}       – start or pause autonomy", "/ai on|off".bold().cyan());
    println!("  {}  – accept or drop every command", "/arbiter on|off".bold().cyan());
    println!("  {}   – latch or release an emergency stop", "/estop /release".bold().cyan());
    println!("  {} – snapshots", "/status /telemetry".bold().cyan());
    println!("  {} – mission log and command history", "/log [n] /commands [n]".bold().cyan());
    println!("  {}     – stop the rover and exit", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_drive(session: &Session, key: &str) {
    let Some(command) = key
        .chars()
        .next()
        .and_then(|c| RoverCommand::from_key(CommandPriority::Manual, OPERATOR, c))
    else {
        println!("{} '{}' (use f b l r s)", "Unknown drive key".red(), key.yellow());
        return;
    };
    let reason = command.reason.clone();
    session.arbiter.submit(command);
    session.mission_log.append(OPERATOR, format!("drive: {reason}"));

    match session.arbiter.current_command() {
        Some(active) if active.priority > CommandPriority::Manual => println!(
            "  {} {} held by {} ({})",
            reason.bold(),
            "queued –".yellow(),
            active.priority.to_string().yellow(),
            active.reason
        ),
        _ => println!("  → {}", reason.green()),
    }
}

fn cmd_release(session: &Session) {
    if session.supervisor.is_tripped() {
        println!(
            "{}",
            "  ✗ a link watchdog holds the stop; restore the link first".red()
        );
        return;
    }
    session.arbiter.clear(CommandPriority::Safety);
    println!("{}", "  ✓ emergency stop released".green());
}

fn cmd_status(session: &Session) {
    let arbiter = session.arbiter.status();
    let ai = session.scheduler.status();

    println!("{}", "Arbiter".bold().underline());
    println!("  enabled    : {}", on_off(arbiter.enabled));
    println!("  auto mode  : {}", on_off(arbiter.auto_mode));
    match &arbiter.current_command {
        Some(c) => println!(
            "  active     : {} {} ({},{}) {}",
            c.priority.to_string().bold(),
            c.source,
            c.x,
            c.y,
            c.reason.dimmed()
        ),
        None => println!("  active     : {}", "idle".dimmed()),
    }
    if let Some(p) = &arbiter.pending_command {
        println!("  pending    : {} {}", p.reason.yellow(), "(/approve or /reject)".dimmed());
    }
    let tiers: Vec<String> = arbiter
        .active_priorities
        .iter()
        .map(|p| p.to_string())
        .collect();
    println!("  tiers      : [{}]", tiers.join(", "));

    println!("{}", "Autonomy".bold().underline());
    println!("  enabled    : {}", on_off(ai.enabled));
    println!("  detector   : {}", ready(ai.tactical_ready));
    println!("  navigator  : {}", ready(ai.strategic_ready));
    println!("  tactical   : {:.1} fps, {} detections", ai.tactical_fps, ai.tactical_detections);
    println!(
        "  strategic  : {} decisions, cooldown {:.1}s",
        ai.strategic_decisions, ai.strategic_cooldown_secs
    );
    if ai.hazard {
        println!("  {}", "tactical stop held".red().bold());
    }
    if session.supervisor.is_tripped() {
        println!("  {}", "link watchdog tripped".red().bold());
    }
}

fn cmd_telemetry(session: &Session) {
    let gateway = session
        .gateway
        .as_ref()
        .map(|g| g.telemetry())
        .unwrap_or_default();
    let mut merged: Telemetry = merge_telemetry(&session.store.get_telemetry(), &gateway);
    merged.insert("hazard".into(), session.scheduler.status().hazard.into());

    println!("{}", "Telemetry".bold().underline());
    let mut keys: Vec<&String> = merged.keys().collect();
    keys.sort();
    for key in keys {
        println!("  {:<14}: {}", key, merged[key]);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn parse_switch(arg: Option<&str>) -> Option<bool> {
    match arg?.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn parse_count(arg: Option<&str>) -> usize {
    arg.and_then(|a| a.parse().ok()).unwrap_or(DEFAULT_TAIL)
}

fn on_off(on: bool) -> colored::ColoredString {
    if on { "on".green() } else { "off".red() }
}

fn ready(is_ready: bool) -> colored::ColoredString {
    if is_ready { "ready".green() } else { "not ready".yellow() }
}

fn usage(text: &str) {
    println!("  {} {}", "usage:".yellow(), text);
}
