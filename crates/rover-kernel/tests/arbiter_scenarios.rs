//! End-to-end arbitration behaviour observed through the actuation sink.

use std::sync::{Arc, Mutex};
use std::thread;

use rover_kernel::{CommandArbiter, FnSink};
use rover_types::{CommandPriority, RoverCommand, SteeringCommand};

type Emitted = Arc<Mutex<Vec<RoverCommand>>>;

fn arbiter() -> (CommandArbiter, Emitted) {
    let emitted: Emitted = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&emitted);
    let arbiter =
        CommandArbiter::new(FnSink(move |c: &RoverCommand| log.lock().unwrap().push(c.clone())));
    (arbiter, emitted)
}

fn manual_forward() -> RoverCommand {
    RoverCommand::forward(CommandPriority::Manual, "operator", 0.5)
}

fn strategic_left() -> RoverCommand {
    RoverCommand::steer(CommandPriority::Strategic, "navigator", SteeringCommand::Left, 0.3)
}

#[test]
fn higher_tier_wins_regardless_of_order() {
    let (arb, emitted) = arbiter();
    arb.submit(RoverCommand::stop(CommandPriority::Tactical, "detector", "person detected"));
    arb.submit(manual_forward());

    assert_eq!(arb.current_command().unwrap().priority, CommandPriority::Tactical);
    assert_eq!(emitted.lock().unwrap().len(), 1);
}

#[test]
fn same_tier_last_submission_wins() {
    let (arb, _) = arbiter();
    arb.submit(manual_forward());
    arb.submit(RoverCommand::from_key(CommandPriority::Manual, "operator", 'L').unwrap());
    assert_eq!(arb.current_command().unwrap().reason, "left");
    assert_eq!(arb.active_priorities(), vec![CommandPriority::Manual]);
}

#[test]
fn identical_submission_emits_once() {
    let (arb, emitted) = arbiter();
    for _ in 0..30 {
        arb.submit(RoverCommand::stop(CommandPriority::Tactical, "detector", "dog detected"));
    }
    assert_eq!(emitted.lock().unwrap().len(), 1);
}

#[test]
fn clearing_empty_tier_is_noop() {
    let (arb, emitted) = arbiter();
    arb.submit(manual_forward());
    let before = arb.current_command();

    arb.clear(CommandPriority::Tactical);

    assert_eq!(arb.current_command(), before);
    assert_eq!(emitted.lock().unwrap().len(), 1);
}

#[test]
fn manual_resumes_after_tactical_stop_clears() {
    let (arb, emitted) = arbiter();
    arb.submit(manual_forward());
    arb.submit(RoverCommand::stop(CommandPriority::Tactical, "detector", "person detected"));
    arb.clear(CommandPriority::Tactical);

    let emitted = emitted.lock().unwrap();
    assert_eq!(emitted.len(), 3);
    assert_eq!(emitted[0], manual_forward());
    assert_eq!(emitted[1].reason, "person detected");
    assert!(emitted[1].is_stop());
    assert_eq!(emitted[2], manual_forward());
}

#[test]
fn strategic_waits_for_approval() {
    let (arb, emitted) = arbiter();
    arb.submit(manual_forward());
    arb.submit(strategic_left());

    assert_eq!(arb.current_command(), Some(manual_forward()));
    assert_eq!(arb.pending_command(), Some(strategic_left()));
    assert_eq!(emitted.lock().unwrap().len(), 1);

    assert!(arb.approve_pending());
    assert_eq!(arb.current_command(), Some(strategic_left()));
    assert!(arb.pending_command().is_none());
    assert!(!arb.approve_pending());
}

#[test]
fn reject_discards_pending_and_running_strategic() {
    let (arb, emitted) = arbiter();
    arb.submit(manual_forward());
    arb.submit(strategic_left());
    arb.approve_pending();
    arb.submit(RoverCommand::steer(
        CommandPriority::Strategic,
        "navigator",
        SteeringCommand::Right,
        0.3,
    ));

    arb.reject_pending();

    assert!(arb.pending_command().is_none());
    assert!(!arb.active_priorities().contains(&CommandPriority::Strategic));
    assert_eq!(emitted.lock().unwrap().last(), Some(&manual_forward()));
}

#[test]
fn auto_mode_bypasses_gate_and_discards_pending() {
    let (arb, _) = arbiter();
    arb.submit(strategic_left());
    arb.set_auto_mode(true);
    assert!(arb.pending_command().is_none());
    assert!(arb.current_command().is_none());

    arb.submit(strategic_left());
    assert_eq!(arb.current_command(), Some(strategic_left()));
}

#[test]
fn tactical_and_safety_are_never_gated() {
    let (arb, _) = arbiter();
    arb.submit(RoverCommand::stop(CommandPriority::Safety, "operator", "emergency"));
    assert_eq!(arb.current_command().unwrap().priority, CommandPriority::Safety);
    arb.clear(CommandPriority::Safety);
    arb.submit(RoverCommand::stop(CommandPriority::Tactical, "detector", "cat detected"));
    assert_eq!(arb.current_command().unwrap().priority, CommandPriority::Tactical);
    assert!(arb.pending_command().is_none());
}

#[test]
fn disable_clears_everything_and_blocks_submissions() {
    let (arb, emitted) = arbiter();
    arb.submit(manual_forward());
    arb.submit(strategic_left());
    arb.disable();

    let status = arb.status();
    assert!(!status.enabled);
    assert!(status.active_priorities.is_empty());
    assert!(status.pending_command.is_none());
    assert!(status.current_command.is_none());

    arb.submit(manual_forward());
    assert!(arb.current_command().is_none());
    assert_eq!(emitted.lock().unwrap().len(), 1);

    arb.enable();
    assert!(arb.current_command().is_none());
    arb.submit(manual_forward());
    assert_eq!(arb.current_command(), Some(manual_forward()));
    assert_eq!(emitted.lock().unwrap().len(), 2);
}

#[test]
fn emptying_the_table_emits_one_neutral_stop() {
    let (arb, emitted) = arbiter();
    arb.submit(manual_forward());
    arb.clear(CommandPriority::Manual);
    arb.clear(CommandPriority::Manual);

    let emitted = emitted.lock().unwrap();
    assert_eq!(emitted.len(), 2);
    assert_eq!(emitted[1].priority, CommandPriority::Idle);
    assert!(emitted[1].is_stop());
    assert!(arb.current_command().is_none());
}

#[test]
fn concurrent_submitters_emit_each_distinct_winner_once() {
    let (arb, emitted) = arbiter();
    let arb = Arc::new(arb);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let arb = Arc::clone(&arb);
            thread::spawn(move || {
                for _ in 0..100 {
                    arb.submit(RoverCommand::stop(CommandPriority::Tactical, "detector", "person"));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(emitted.lock().unwrap().len(), 1);
    assert_eq!(arb.recent_log(1000).len(), 100);
}

fn emitted_since(emitted: &Emitted, from: usize) -> Vec<(CommandPriority, String)> {
    emitted.lock().unwrap()[from..]
        .iter()
        .map(|c| (c.priority, c.reason.clone()))
        .collect()
}

#[test]
fn releasing_autonomy_tiers_falls_straight_to_manual() {
    let (arb, emitted) = arbiter();
    arb.set_auto_mode(true);
    arb.submit(manual_forward());
    arb.submit(strategic_left());
    arb.submit(RoverCommand::stop(CommandPriority::Tactical, "detector", "car detected"));
    let before = emitted.lock().unwrap().len();

    arb.release(&[CommandPriority::Tactical, CommandPriority::Strategic]);

    assert_eq!(
        emitted_since(&emitted, before),
        vec![(CommandPriority::Manual, "forward".to_string())]
    );
    assert_eq!(arb.active_priorities(), vec![CommandPriority::Manual]);
}

#[test]
fn releasing_strategic_drops_the_pending_command() {
    let (arb, emitted) = arbiter();
    arb.submit(manual_forward());
    arb.submit(strategic_left());
    assert!(arb.pending_command().is_some());

    arb.release(&[CommandPriority::Tactical, CommandPriority::Strategic]);

    assert!(arb.pending_command().is_none());
    assert!(!arb.approve_pending());
    // Nothing held by either tier, so nothing to re-emit.
    assert_eq!(emitted.lock().unwrap().len(), 1);
}

#[test]
fn releasing_every_held_tier_emits_one_neutral_stop() {
    let (arb, emitted) = arbiter();
    arb.set_auto_mode(true);
    arb.submit(strategic_left());
    arb.submit(RoverCommand::stop(CommandPriority::Tactical, "detector", "dog detected"));
    let before = emitted.lock().unwrap().len();

    arb.release(&[CommandPriority::Tactical, CommandPriority::Strategic]);

    assert_eq!(
        emitted_since(&emitted, before),
        vec![(CommandPriority::Idle, "no active command".to_string())]
    );
    assert!(arb.current_command().is_none());
}

#[test]
fn replace_hands_back_the_displaced_command() {
    let (arb, _) = arbiter();
    let estop = RoverCommand::stop(CommandPriority::Safety, "operator", "emergency stop");
    assert_eq!(arb.replace(estop.clone()), None);

    let displaced = arb.replace(RoverCommand::stop(
        CommandPriority::Safety,
        "watchdog",
        "camera timed out",
    ));
    assert_eq!(displaced, Some(estop));
    // Parked submissions displace nothing.
    assert_eq!(arb.replace(strategic_left()), None);
}

#[test]
fn restore_owned_only_touches_the_owners_entry() {
    let (arb, emitted) = arbiter();
    arb.submit(manual_forward());
    let estop = RoverCommand::stop(CommandPriority::Safety, "operator", "emergency stop");
    arb.submit(estop.clone());
    arb.submit(RoverCommand::stop(CommandPriority::Safety, "watchdog", "camera timed out"));

    assert!(!arb.restore_owned(CommandPriority::Safety, "detector", None));
    assert!(arb.restore_owned(CommandPriority::Safety, "watchdog", Some(estop.clone())));
    assert_eq!(arb.current_command(), Some(estop));

    // Someone else holds it now.
    assert!(!arb.restore_owned(CommandPriority::Safety, "watchdog", None));
    let before = emitted.lock().unwrap().len();
    arb.clear(CommandPriority::Safety);
    assert_eq!(
        emitted_since(&emitted, before),
        vec![(CommandPriority::Manual, "forward".to_string())]
    );
}
