//! Move preparation
//!
//! A [`Move`] is an immutable descriptor of one linear segment together
//! with its velocity plan. Everything expensive (step deltas, phase
//! boundaries, the initial interval) is computed once here, in the
//! foreground; the step interrupt only consumes the result.

use fixed::types::extra::U24;
use fixed::FixedU32;
use fixed_sqrt::FixedSqrt;

use crate::config::MachineConfig;
use crate::motion::{Axis, DirMask, EndstopMask, Position, NUM_AXES};

/// A prepared move. Immutable once enqueued; `Copy` so the step
/// interrupt can lift it out of its queue slot by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Move {
    /// Unsigned step count per axis.
    pub delta: [u32; NUM_AXES],
    /// Per-axis travel direction.
    pub dirs: DirMask,
    /// `max(delta)`, the DDA master step count.
    pub total_steps: u32,
    /// Requested cruise rate of the master axis, steps/s.
    pub nominal_rate: u32,
    /// Inter-step interval at cruise, counter ticks.
    pub cruise_interval: u32,
    /// Inter-step interval of the first step from rest, counter ticks.
    pub c0: u32,
    /// Master-axis acceleration, steps/s^2. Zero means constant rate.
    pub accel_rate: u32,
    /// Master-axis deceleration, steps/s^2.
    pub decel_rate: u32,
    /// Master step index where acceleration ends.
    pub accel_until: u32,
    /// Master step index where deceleration begins.
    pub decel_from: u32,
    /// Endstops the step interrupt samples during this move.
    pub endstops: EndstopMask,
    /// With a non-empty mask: stop when a selected switch reads
    /// triggered (homing approach) or, when false, once every selected
    /// switch reads released (homing back-off).
    pub stop_on_trigger: bool,
}

impl Move {
    /// True when this move terminates on an endstop sample instead of
    /// its step count.
    #[inline]
    pub fn watches_endstops(&self) -> bool {
        !self.endstops.is_empty()
    }
}

/// Move preparation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlanError {
    /// Start and target land on the same step grid point on every axis.
    ZeroLength,
    /// Feedrate of zero.
    BadFeedrate,
}

/// Convert a micrometer coordinate to the step grid, rounding to
/// nearest.
#[inline]
pub fn um_to_steps(um: i32, steps_per_mm: u32) -> i32 {
    let scaled = um as i64 * steps_per_mm as i64;
    let half = if scaled >= 0 { 500 } else { -500 };
    ((scaled + half) / 1_000) as i32
}

/// Convert a step-grid coordinate back to micrometers, rounding to
/// nearest.
#[inline]
pub fn steps_to_um(steps: i32, steps_per_mm: u32) -> i32 {
    let scaled = steps as i64 * 1_000;
    let half = if scaled >= 0 {
        steps_per_mm as i64 / 2
    } else {
        -(steps_per_mm as i64 / 2)
    };
    ((scaled + half) / steps_per_mm as i64) as i32
}

/// Interval of the first step when accelerating from rest:
/// `0.676 * sqrt(2 / a) * cpu_freq` ticks, computed in fixed point.
/// The 0.676 factor corrects the first term of the Taylor series the
/// per-step recurrence is built on.
pub fn first_interval(cpu_freq: u32, accel_steps_s2: u32) -> u32 {
    debug_assert!(accel_steps_s2 > 0);
    let ratio = FixedU32::<U24>::from_num(2u32) / accel_steps_s2;
    let root = ratio.sqrt();
    let ticks = root.to_bits() as u64 * cpu_freq as u64 * 676 / 1_000;
    (ticks >> 24) as u32
}

/// Prepare a move from `start` (step grid) to `target` (micrometers).
///
/// Returns the move plus the step-grid point it ends on, which becomes
/// the planning startpoint for the next move.
pub fn plan(
    cfg: &MachineConfig,
    start: &[i32; NUM_AXES],
    target: Position,
    feedrate_mm_min: u32,
    endstops: EndstopMask,
    stop_on_trigger: bool,
) -> Result<(Move, [i32; NUM_AXES]), PlanError> {
    if feedrate_mm_min == 0 {
        return Err(PlanError::BadFeedrate);
    }

    let mut end = [0i32; NUM_AXES];
    let mut delta = [0u32; NUM_AXES];
    let mut dirs = DirMask::all_positive();
    let mut total_steps = 0u32;
    let mut master = Axis::X;
    for axis in Axis::ALL {
        let i = axis.index();
        end[i] = um_to_steps(target.um[i], cfg.axes[i].steps_per_mm);
        let d = end[i] - start[i];
        dirs.set(axis, d >= 0);
        delta[i] = d.unsigned_abs();
        if delta[i] > total_steps {
            total_steps = delta[i];
            master = axis;
        }
    }
    if total_steps == 0 {
        return Err(PlanError::ZeroLength);
    }

    let spm = cfg.axis(master).steps_per_mm;
    let feed = feedrate_mm_min.min(cfg.axis(master).max_feedrate);
    let nominal_rate = (feed as u64 * spm as u64 / 60).max(1) as u32;
    let cruise_interval = cfg.cpu_freq / nominal_rate;

    let accel_rate = cfg.acceleration.saturating_mul(spm);
    let decel_rate = cfg.deceleration.saturating_mul(spm);

    // A zero rate disables that ramp alone; the other side still runs.
    let (c0, accel_until, decel_from) = if accel_rate == 0 && decel_rate == 0 {
        (cruise_interval, 0, total_steps)
    } else {
        let v2 = nominal_rate as u64 * nominal_rate as u64;
        let n_acc = if accel_rate == 0 {
            0
        } else {
            v2 / (2 * accel_rate as u64)
        };
        let n_dec = if decel_rate == 0 {
            0
        } else {
            v2 / (2 * decel_rate as u64)
        };
        let (until, from) = if accel_rate == 0 {
            // No ramp-in: start at cruise, only ramp out.
            (0, total_steps.saturating_sub(n_dec as u32))
        } else if decel_rate == 0 {
            // No ramp-out: hold cruise to the very last step.
            ((n_acc as u32).min(total_steps), total_steps)
        } else if n_acc + n_dec >= total_steps as u64 {
            // Triangular profile: peak where the ramps meet.
            let until = (total_steps as u64 * decel_rate as u64)
                / (accel_rate as u64 + decel_rate as u64);
            (until as u32, until as u32)
        } else {
            (n_acc as u32, total_steps - n_dec as u32)
        };
        let c0 = if accel_rate == 0 {
            cruise_interval
        } else {
            first_interval(cfg.cpu_freq, accel_rate).max(cruise_interval)
        };
        (c0, until, from)
    };

    let mv = Move {
        delta,
        dirs,
        total_steps,
        nominal_rate,
        cruise_interval,
        c0,
        accel_rate,
        decel_rate,
        accel_until,
        decel_from,
        endstops,
        stop_on_trigger,
    };
    Ok((mv, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> MachineConfig {
        MachineConfig::default()
    }

    #[test]
    fn test_um_to_steps_rounds_to_nearest() {
        assert_eq!(um_to_steps(10_000, 80), 800);
        assert_eq!(um_to_steps(6, 80), 0); // 0.48 steps
        assert_eq!(um_to_steps(7, 80), 1); // 0.56 steps
        assert_eq!(um_to_steps(-10_000, 80), -800);
        assert_eq!(um_to_steps(-7, 80), -1);
    }

    #[test]
    fn test_steps_to_um_roundtrip() {
        for um in [0, 7, 1_000, 9_993, -9_993, 250_000] {
            let steps = um_to_steps(um, 80);
            let back = steps_to_um(steps, 80);
            assert!((back - um).abs() <= 7, "um {um} -> {steps} -> {back}");
        }
        assert_eq!(steps_to_um(800, 80), 10_000);
        assert_eq!(steps_to_um(-800, 80), -10_000);
    }

    #[test]
    fn test_plan_pure_x() {
        let start = [0; NUM_AXES];
        let target = Position::ZERO.with(Axis::X, 10_000);
        let (mv, end) =
            plan(&cfg(), &start, target, 600, EndstopMask::NONE, false).unwrap();
        assert_eq!(mv.delta, [800, 0, 0, 0]);
        assert_eq!(mv.total_steps, 800);
        assert!(mv.dirs.is_positive(Axis::X));
        // 600 mm/min * 80 steps/mm / 60 = 800 steps/s
        assert_eq!(mv.nominal_rate, 800);
        assert_eq!(mv.cruise_interval, 16_000_000 / 800);
        assert_eq!(end[Axis::X.index()], 800);
    }

    #[test]
    fn test_plan_zero_acceleration_is_all_cruise() {
        let mut c = cfg();
        c.acceleration = 0;
        c.deceleration = 0;
        let target = Position::ZERO.with(Axis::X, 10_000);
        let (mv, _) =
            plan(&c, &[0; NUM_AXES], target, 600, EndstopMask::NONE, false).unwrap();
        assert_eq!(mv.accel_until, 0);
        assert_eq!(mv.decel_from, mv.total_steps);
        assert_eq!(mv.c0, mv.cruise_interval);
    }

    #[test]
    fn test_plan_accel_only_when_decel_is_zero() {
        let mut c = cfg();
        c.deceleration = 0;
        let target = Position::ZERO.with(Axis::X, 100_000); // 8000 steps
        let (mv, _) =
            plan(&c, &[0; NUM_AXES], target, 600, EndstopMask::NONE, false).unwrap();
        // The ramp-in still runs: 800 steps/s at 80_000 steps/s^2 takes
        // 4 steps to reach.
        assert_eq!(mv.accel_until, 4);
        assert!(mv.c0 > mv.cruise_interval);
        // No ramp-out: cruise holds to the last step.
        assert_eq!(mv.decel_from, mv.total_steps);
    }

    #[test]
    fn test_plan_decel_only_when_accel_is_zero() {
        let mut c = cfg();
        c.acceleration = 0;
        let target = Position::ZERO.with(Axis::X, 100_000); // 8000 steps
        let (mv, _) =
            plan(&c, &[0; NUM_AXES], target, 600, EndstopMask::NONE, false).unwrap();
        // No ramp-in: the move starts at cruise.
        assert_eq!(mv.accel_until, 0);
        assert_eq!(mv.c0, mv.cruise_interval);
        // The ramp-out still runs over the last 4 steps.
        assert_eq!(mv.decel_from, mv.total_steps - 4);
    }

    #[test]
    fn test_plan_triangular_midpoint() {
        // Short move at a high feedrate never reaches cruise; with equal
        // accel and decel the peak sits at the middle step.
        let target = Position::ZERO.with(Axis::X, 2_000); // 160 steps
        let (mv, _) =
            plan(&cfg(), &[0; NUM_AXES], target, 6_000, EndstopMask::NONE, false)
                .unwrap();
        assert_eq!(mv.accel_until, mv.decel_from);
        let mid = mv.total_steps / 2;
        assert!(mv.accel_until.abs_diff(mid) <= 1);
    }

    #[test]
    fn test_plan_feedrate_clamped_to_axis_limit() {
        let target = Position::ZERO.with(Axis::X, 100_000);
        let (mv, _) =
            plan(&cfg(), &[0; NUM_AXES], target, 1_000_000, EndstopMask::NONE, false)
                .unwrap();
        // Clamped to 6000 mm/min * 80 / 60 = 8000 steps/s.
        assert_eq!(mv.nominal_rate, 8_000);
    }

    #[test]
    fn test_plan_zero_length_rejected() {
        let r = plan(
            &cfg(),
            &[0; NUM_AXES],
            Position::ZERO,
            600,
            EndstopMask::NONE,
            false,
        );
        assert_eq!(r.unwrap_err(), PlanError::ZeroLength);
    }

    #[test]
    fn test_first_interval_magnitude() {
        // a = 80_000 steps/s^2 at 16 MHz: 0.676 * sqrt(2/a) * f ~ 54_000.
        let c0 = first_interval(16_000_000, 80_000);
        assert!((53_000..55_500).contains(&c0), "c0 = {c0}");
    }

    #[test]
    fn test_plan_master_is_dominant_axis() {
        let target = Position::ZERO.with(Axis::X, 3_000).with(Axis::Y, -4_000);
        let (mv, _) =
            plan(&cfg(), &[0; NUM_AXES], target, 600, EndstopMask::NONE, false).unwrap();
        assert_eq!(mv.total_steps, 320); // Y dominates
        assert_eq!(mv.delta[Axis::X.index()], 240);
        assert!(!mv.dirs.is_positive(Axis::Y));
    }
}
