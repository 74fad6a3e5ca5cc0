//! Velocity profiles
//!
//! Two interchangeable engines produce the ticks-until-next-step value
//! the scheduler consumes:
//!
//! - [`Trapezoid`]: ramps by step count using the integer recurrence
//!   `c' = c - 2c / (4n + 1)`, the Taylor form of constant-acceleration
//!   stepping. Entirely per-step, no floating point, no divisions beyond
//!   one per step.
//! - [`TemporalRamp`]: ramps the commanded step rate at the system-tick
//!   cadence instead, which keeps velocity changes smooth when no single
//!   axis dominates the step rhythm. Owned by the tick handler; the step
//!   interrupt only reads the derived interval.
//!
//! Intervals carry 8 fractional bits internally so rounding error does
//! not accumulate over a ramp.

use fixed::types::extra::U8;
use fixed::FixedU32;

use crate::moves::Move;

/// Ramp phase of the live move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    Accel,
    Cruise,
    Decel,
}

type Ticks = FixedU32<U8>;

/// Step-count trapezoid state for one move.
#[derive(Debug, Clone, Copy)]
pub struct Trapezoid {
    interval: Ticks,
    ramp_steps: u32,
}

impl Trapezoid {
    /// State positioned before the first step; the first inter-step
    /// interval is the move's `c0`.
    pub fn start(mv: &Move) -> Self {
        Self {
            interval: Ticks::saturating_from_num(mv.c0),
            ramp_steps: 1,
        }
    }

    /// Phase the move is in after `step_no` emitted steps.
    pub fn phase(mv: &Move, step_no: u32) -> Phase {
        if step_no >= mv.decel_from {
            Phase::Decel
        } else if step_no < mv.accel_until {
            Phase::Accel
        } else {
            Phase::Cruise
        }
    }

    /// Ticks until the next step, after `step_no` steps have been
    /// emitted. Callers stop asking once the move completes.
    pub fn next_interval(&mut self, mv: &Move, step_no: u32, min_step_ticks: u32) -> u32 {
        let cruise = Ticks::saturating_from_num(mv.cruise_interval.max(min_step_ticks));
        match Self::phase(mv, step_no) {
            Phase::Accel => {
                let denom = (4 * self.ramp_steps + 1) as u64;
                let bits = self.interval.to_bits() as u64;
                self.interval = Ticks::from_bits((bits - 2 * bits / denom) as u32);
                self.ramp_steps += 1;
                if self.interval < cruise {
                    self.interval = cruise;
                }
            }
            Phase::Cruise => {
                self.interval = cruise;
            }
            Phase::Decel => {
                // Mirror the ramp over the steps remaining to stop.
                let remaining = mv.total_steps - step_no;
                let denom = (4 * remaining.max(1) - 1) as u64;
                let bits = self.interval.to_bits() as u64;
                let grown = (bits + 2 * bits / denom).min(u32::MAX as u64);
                self.interval = Ticks::from_bits(grown as u32);
            }
        }
        let ticks: u32 = self.interval.to_num();
        ticks.max(min_step_ticks)
    }
}

/// Tick-driven rate ramp for the temporal mode. Rates are carried with
/// 16 fractional bits so sub-unit per-tick increments do not stall.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemporalRamp {
    rate_x16: u64,
}

impl TemporalRamp {
    /// Forget the current rate (queue went idle).
    pub fn reset(&mut self) {
        self.rate_x16 = 0;
    }

    /// Advance one system tick toward `goal_rate` (steps/s). `floor`
    /// seeds the ramp from rest and is the slowest rate the ramp will
    /// command. `accel_x16`/`decel_x16` are the per-tick rate deltas in
    /// 16.16. Returns the commanded rate, or `None` while idle.
    pub fn tick(
        &mut self,
        goal_rate: u32,
        floor: u32,
        accel_x16: u64,
        decel_x16: u64,
    ) -> Option<u32> {
        if goal_rate == 0 {
            self.reset();
            return None;
        }
        let floor_x16 = (floor.max(1) as u64) << 16;
        if self.rate_x16 < floor_x16 {
            self.rate_x16 = floor_x16;
        }
        let goal_x16 = (goal_rate as u64) << 16;
        if self.rate_x16 < goal_x16 {
            self.rate_x16 = (self.rate_x16 + accel_x16).min(goal_x16);
        } else if self.rate_x16 > goal_x16 {
            self.rate_x16 = self.rate_x16.saturating_sub(decel_x16).max(goal_x16);
        }
        // Never ramp below the floor even when the goal asks for it.
        if self.rate_x16 < floor_x16 {
            self.rate_x16 = floor_x16;
        }
        Some((self.rate_x16 >> 16) as u32)
    }
}

/// Steps needed to decelerate from `rate` (steps/s) to rest.
pub fn steps_to_stop(rate: u32, decel_steps_s2: u32) -> u32 {
    if decel_steps_s2 == 0 {
        return 0;
    }
    (rate as u64 * rate as u64 / (2 * decel_steps_s2 as u64)) as u32
}
