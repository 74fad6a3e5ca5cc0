//! Homing scenarios: endstop-terminated moves, the two-pass search and
//! the position pinning that follows.

use cadence_core::pins::{DriverEnable, NoPin};
use cadence_core::{Axis, AxisConfig, AxisHomer, MachineConfig, MotionCore};
use cadence_sim::{EndstopRule, SimMachine};

fn homing_config() -> MachineConfig {
    let mut cfg = MachineConfig::default();
    cfg.acceleration = 1_000;
    cfg.deceleration = 1_000;
    cfg.axes[Axis::X.index()] = AxisConfig {
        steps_per_mm: 80,
        max_feedrate: 6_000,
        search_feedrate: Some(100),
        endstop_clearance: Some(5_000),
        min_um: Some(0),
        endstop_min: true,
        ..AxisConfig::default()
    };
    cfg
}

/// Drive the homer and the interrupt side together until it reports
/// done.
fn home_x(
    machine: &mut SimMachine,
    ctl: &mut cadence_core::MotionController<'_, cadence_sim::SimTimer, NoPin>,
    step: &mut cadence_core::StepHandler<'_, cadence_sim::SimTimer, cadence_sim::SimPins>,
    tick: &mut cadence_core::TickHandler<'_, cadence_sim::SimTimer>,
) {
    let mut homer = AxisHomer::new(ctl.config(), Axis::X, false).unwrap();
    homer.start(ctl).unwrap();
    let mut guard = 0u32;
    loop {
        guard += 1;
        assert!(guard < 5_000_000, "homing did not converge");
        if homer.poll(ctl).unwrap() {
            break;
        }
        if machine.timer.step_irq_enabled() {
            machine.fire_next(step, tick);
        }
    }
}

#[test]
fn test_two_pass_homing_x_min() {
    let cfg = homing_config();
    let mut machine = SimMachine::new();
    // X min switch closes 20 mm below the starting point.
    machine.pins.add_endstop_rule(EndstopRule {
        slot: 0,
        axis: Axis::X,
        min_side: true,
        threshold_steps: -1_600,
    });
    let mut core = MotionCore::new(cfg).unwrap();
    let (mut ctl, mut step, mut tick) = core.split(
        machine.timer.clone(),
        machine.timer.clone(),
        machine.timer.clone(),
        machine.pins.clone(),
        None::<DriverEnable<NoPin>>,
    );
    tick.start();

    home_x(&mut machine, &mut ctl, &mut step, &mut tick);

    // Two passes: toward the switch, then away from it.
    let x_dirs: Vec<bool> = machine
        .pins
        .dir_log()
        .into_iter()
        .filter(|(_, a, _)| *a == Axis::X)
        .map(|(_, _, p)| p)
        .collect();
    assert_eq!(x_dirs, vec![false, true]);

    // The machine physically sits just off the released switch.
    let steps = machine.pins.steps(Axis::X);
    assert!(
        (-1_600..=-1_590).contains(&steps),
        "stopped at {steps} steps"
    );

    // The coordinate system was pinned to the configured minimum.
    assert!(ctl.is_idle());
    assert_eq!(ctl.position().get(Axis::X), 0);
    assert_eq!(ctl.startpoint().get(Axis::X), 0);

    // Fast approach reached the clearance-derived feedrate
    // (6000 mm/min = 8000 steps/s = 2000 ticks between steps) and the
    // back-off crawled at the search feedrate (100 mm/min = 133 steps/s).
    let flip_at = machine
        .pins
        .dir_log()
        .into_iter()
        .find(|(_, a, p)| *a == Axis::X && *p)
        .map(|(at, _, _)| at)
        .unwrap();
    let times = machine.pins.pulse_times(Axis::X);
    let seek_min = times
        .windows(2)
        .filter(|w| w[1] < flip_at)
        .map(|w| w[1] - w[0])
        .min()
        .unwrap();
    assert_eq!(seek_min, 2_000, "fast approach cruise interval");
    let backoff_min = times
        .windows(2)
        .filter(|w| w[0] > flip_at)
        .map(|w| w[1] - w[0])
        .min();
    if let Some(d) = backoff_min {
        assert!(d >= 100_000, "back-off interval {d} too fast");
    }
}

#[test]
fn test_single_pass_when_clearance_is_tight() {
    let mut cfg = homing_config();
    // With almost no clearance the fast approach would be slower than
    // the search feedrate, so only the slow pass runs.
    cfg.axes[Axis::X.index()].endstop_clearance = Some(1);
    let mut machine = SimMachine::new();
    machine.pins.add_endstop_rule(EndstopRule {
        slot: 0,
        axis: Axis::X,
        min_side: true,
        threshold_steps: -40,
    });
    let mut core = MotionCore::new(cfg).unwrap();
    let (mut ctl, mut step, mut tick) = core.split(
        machine.timer.clone(),
        machine.timer.clone(),
        machine.timer.clone(),
        machine.pins.clone(),
        None::<DriverEnable<NoPin>>,
    );
    tick.start();

    home_x(&mut machine, &mut ctl, &mut step, &mut tick);

    // One pass: the direction never flips.
    let x_dirs: Vec<bool> = machine
        .pins
        .dir_log()
        .into_iter()
        .filter(|(_, a, _)| *a == Axis::X)
        .map(|(_, _, p)| p)
        .collect();
    assert_eq!(x_dirs, vec![false]);
    assert_eq!(ctl.position().get(Axis::X), 0);
}

#[test]
fn test_homing_to_max_pins_max_coordinate() {
    let mut cfg = homing_config();
    cfg.axes[Axis::X.index()].endstop_min = false;
    cfg.axes[Axis::X.index()].endstop_max = true;
    cfg.axes[Axis::X.index()].max_um = Some(200_000);
    let mut machine = SimMachine::new();
    // X max switch closes 10 mm above the starting point, slot 1.
    machine.pins.add_endstop_rule(EndstopRule {
        slot: 1,
        axis: Axis::X,
        min_side: false,
        threshold_steps: 800,
    });
    let mut core = MotionCore::new(cfg).unwrap();
    let (mut ctl, mut step, mut tick) = core.split(
        machine.timer.clone(),
        machine.timer.clone(),
        machine.timer.clone(),
        machine.pins.clone(),
        None::<DriverEnable<NoPin>>,
    );
    tick.start();

    let mut homer = AxisHomer::new(ctl.config(), Axis::X, true).unwrap();
    homer.start(&mut ctl).unwrap();
    let mut guard = 0u32;
    loop {
        guard += 1;
        assert!(guard < 5_000_000, "homing did not converge");
        if homer.poll(&mut ctl).unwrap() {
            break;
        }
        if machine.timer.step_irq_enabled() {
            machine.fire_next(&mut step, &mut tick);
        }
    }

    assert_eq!(ctl.position().get(Axis::X), 200_000);
    // Approach ran positive, back-off negative.
    let x_dirs: Vec<bool> = machine
        .pins
        .dir_log()
        .into_iter()
        .filter(|(_, a, _)| *a == Axis::X)
        .map(|(_, _, p)| p)
        .collect();
    assert_eq!(x_dirs, vec![true, false]);
}
