//! Endstop homing
//!
//! One parameterized two-pass search per axis, replacing the original's
//! eight near-identical per-axis routines. The fast approach runs at
//! the highest feedrate the configured clearance can absorb: the move
//! must still decelerate to rest inside the physical gap behind the
//! switch. The slow back-off then releases the switch at the configured
//! search feedrate, and the axis coordinate is pinned to its configured
//! endstop position.
//!
//! The driver is a poll-based state machine so it can run from a main
//! loop (or the simulator) without blocking; [`AxisHomer::run`] offers
//! the blocking form for firmware that wants it.

use core::hint::spin_loop;

use fixed::types::extra::U16;
use fixed::FixedU64;
use fixed_sqrt::FixedSqrt;

use cadence_hal::gpio::OutputPin;
use cadence_hal::timer::StepTimer;

use crate::config::MachineConfig;
use crate::control::{EnqueueError, MotionController};
use crate::motion::{Axis, EndstopMask};

/// Travel beyond any physical axis length, so an endstop search runs
/// until the switch answers. Micrometers, as in the original.
const SEARCH_SPAN_UM: i32 = 1_000_000;

/// Homing setup failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HomingError {
    /// The axis has no switch on the requested side.
    NoEndstop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum HomePhase {
    Idle,
    Seek,
    BackOff,
    Done,
}

/// Two-pass homing sequence for one axis.
#[derive(Debug)]
pub struct AxisHomer {
    axis: Axis,
    toward_max: bool,
    mask: EndstopMask,
    phase: HomePhase,
    /// Approach feedrate, mm/min.
    fast: u32,
    /// Back-off feedrate, mm/min.
    slow: u32,
    /// Whether a separate back-off pass runs at all.
    two_pass: bool,
}

impl AxisHomer {
    /// Prepare homing toward the minimum or maximum switch of `axis`.
    pub fn new(
        cfg: &MachineConfig,
        axis: Axis,
        toward_max: bool,
    ) -> Result<Self, HomingError> {
        let a = cfg.axis(axis);
        let (wired, mask) = if toward_max {
            (a.endstop_max, EndstopMask::max(axis))
        } else {
            (a.endstop_min, EndstopMask::min(axis))
        };
        let Some(mask) = mask.filter(|_| wired) else {
            return Err(HomingError::NoEndstop);
        };

        // Config validation guarantees these once a switch is wired.
        let slow = a.search_feedrate.unwrap_or(0).max(1);
        let clearance = a.endstop_clearance.unwrap_or(0);
        let fast = search_fast_feedrate(cfg.acceleration, clearance);
        let two_pass = fast > slow;

        Ok(Self {
            axis,
            toward_max,
            mask,
            phase: HomePhase::Idle,
            fast: if two_pass { fast } else { slow },
            slow,
            two_pass,
        })
    }

    /// Enqueue the approach move.
    pub fn start<T: StepTimer, E: OutputPin>(
        &mut self,
        ctl: &mut MotionController<'_, T, E>,
    ) -> Result<(), EnqueueError> {
        let span = if self.toward_max {
            SEARCH_SPAN_UM
        } else {
            -SEARCH_SPAN_UM
        };
        let target = ctl.startpoint().with(self.axis, span);
        ctl.enqueue_home(target, self.mask, true, self.fast)?;
        self.phase = HomePhase::Seek;
        Ok(())
    }

    /// Advance the sequence; call repeatedly. Returns `true` once the
    /// axis is homed and its position pinned.
    pub fn poll<T: StepTimer, E: OutputPin>(
        &mut self,
        ctl: &mut MotionController<'_, T, E>,
    ) -> Result<bool, EnqueueError> {
        if ctl.estop_active() {
            return Err(EnqueueError::EstopActive);
        }
        match self.phase {
            HomePhase::Idle => Ok(false),
            HomePhase::Seek => {
                if ctl.is_idle() {
                    if self.two_pass {
                        // Back off until the switch releases.
                        let span = if self.toward_max {
                            -SEARCH_SPAN_UM
                        } else {
                            SEARCH_SPAN_UM
                        };
                        let target = ctl.startpoint().with(self.axis, span);
                        ctl.enqueue_home(target, self.mask, false, self.slow)?;
                        self.phase = HomePhase::BackOff;
                    } else {
                        self.pin_position(ctl)?;
                    }
                }
                Ok(self.phase == HomePhase::Done)
            }
            HomePhase::BackOff => {
                if ctl.is_idle() {
                    self.pin_position(ctl)?;
                }
                Ok(self.phase == HomePhase::Done)
            }
            HomePhase::Done => Ok(true),
        }
    }

    /// Blocking form: start, then poll until done. Interrupts drain the
    /// queue meanwhile.
    pub fn run<T: StepTimer, E: OutputPin>(
        &mut self,
        ctl: &mut MotionController<'_, T, E>,
    ) -> Result<(), EnqueueError> {
        self.start(ctl)?;
        while !self.poll(ctl)? {
            spin_loop();
        }
        Ok(())
    }

    fn pin_position<T: StepTimer, E: OutputPin>(
        &mut self,
        ctl: &mut MotionController<'_, T, E>,
    ) -> Result<(), EnqueueError> {
        let a = ctl.config().axis(self.axis);
        let coord = if self.toward_max {
            a.max_um.unwrap_or(0)
        } else {
            a.min_um.unwrap_or(0)
        };
        let pos = ctl.position().with(self.axis, coord);
        ctl.set_current_position(pos)?;
        self.phase = HomePhase::Done;
        Ok(())
    }
}

/// Highest approach feedrate that can still stop within the endstop
/// clearance: `60 * sqrt(2 * a * clearance / 1000)` mm/min, with the
/// acceleration in mm/s^2 and the clearance in micrometers.
pub fn search_fast_feedrate(accel_mm_s2: u32, clearance_um: u32) -> u32 {
    let v2 = 2 * accel_mm_s2 as u64 * clearance_um as u64 / 1_000;
    let root = FixedU64::<U16>::from_num(v2).sqrt();
    (root * FixedU64::<U16>::from_num(60)).to_num()
}
