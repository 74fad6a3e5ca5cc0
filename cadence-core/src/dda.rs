//! The DDA step engine
//!
//! Per-move Bresenham state: the master axis steps every event, the
//! others accumulate error against `total_steps` and pulse on overflow.
//! One call to [`DdaState::step`] emits exactly one master step, holds
//! the STEP lines for the configured pulse width, samples the watched
//! endstops and reports completion.
//!
//! The runtime state here is owned exclusively by the step interrupt
//! while a move is live; the [`Move`] itself is never mutated.

use cadence_hal::timer::StepTimer;

use crate::motion::{Axis, NUM_AXES, NUM_ENDSTOPS};
use crate::moves::Move;
use crate::pins::MotionPins;

/// Mutable per-move execution state.
#[derive(Debug, Clone, Copy)]
pub struct DdaState {
    /// Master steps already emitted, 0..=total_steps.
    pub step_no: u32,
    /// Bresenham error accumulators, seeded at `total_steps / 2`.
    bres: [u32; NUM_AXES],
    /// Pulses actually emitted per axis; the exact position delta even
    /// when an endstop truncates the move.
    emitted: [u32; NUM_AXES],
    /// Set when an endstop sample ended the move early.
    truncated: bool,
}

impl DdaState {
    pub fn begin(mv: &Move) -> Self {
        Self {
            step_no: 0,
            bres: [mv.total_steps / 2; NUM_AXES],
            emitted: [0; NUM_AXES],
            truncated: false,
        }
    }

    /// Pulses emitted on one axis so far.
    #[inline]
    pub fn emitted(&self, axis: Axis) -> u32 {
        self.emitted[axis.index()]
    }

    /// Whether an endstop cut the move short.
    #[inline]
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Emit one step event. Returns `true` when the move is complete,
    /// either by step count or by the endstop condition.
    pub fn step<P: MotionPins, T: StepTimer>(
        &mut self,
        mv: &Move,
        pins: &mut P,
        timer: &T,
        pulse_ticks: u32,
    ) -> bool {
        debug_assert!(self.step_no < mv.total_steps);

        // Bresenham: raise every overflowing axis first so the pulses
        // share one hold window.
        let mut raised = [false; NUM_AXES];
        for axis in Axis::ALL {
            let i = axis.index();
            self.bres[i] += mv.delta[i];
            if self.bres[i] >= mv.total_steps {
                self.bres[i] -= mv.total_steps;
                pins.step_high(axis);
                raised[i] = true;
                self.emitted[i] += 1;
            }
        }

        timer.spin_ticks(pulse_ticks as u16);
        for axis in Axis::ALL {
            if raised[axis.index()] {
                pins.step_low(axis);
            }
        }

        if mv.watches_endstops() && self.endstop_condition_met(mv, pins) {
            self.truncated = true;
            self.step_no = mv.total_steps;
            return true;
        }

        self.step_no += 1;
        self.step_no >= mv.total_steps
    }

    /// Approach moves finish when any watched switch triggers; back-off
    /// moves finish once every watched switch has released.
    fn endstop_condition_met<P: MotionPins>(&self, mv: &Move, pins: &mut P) -> bool {
        if mv.stop_on_trigger {
            for slot in 0..NUM_ENDSTOPS {
                if mv.endstops.contains(slot) && pins.endstop_triggered(slot) {
                    return true;
                }
            }
            false
        } else {
            for slot in 0..NUM_ENDSTOPS {
                if mv.endstops.contains(slot) && pins.endstop_triggered(slot) {
                    return false;
                }
            }
            true
        }
    }
}
