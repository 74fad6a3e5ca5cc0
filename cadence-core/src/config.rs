//! Machine configuration
//!
//! The original firmware's per-axis `#define` forest is replaced by a
//! runtime table of axis descriptors. Construction-time validation plays
//! the role the preprocessor `#error` guards played: an axis that carries
//! an endstop must also carry the homing parameters for it, or the core
//! refuses to come up.

use crate::motion::{Axis, NUM_AXES};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How the velocity profiler derives inter-step intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum VelocityMode {
    /// Step-count trapezoid: ramp via the integer interval recurrence,
    /// phase boundaries fixed per move.
    #[default]
    Trapezoid,
    /// Temporal ramp: the system tick adjusts the commanded step rate at
    /// a fixed cadence, independent of step density.
    Temporal,
}

/// Static description of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AxisConfig {
    /// Full steps (after microstepping) per millimeter of travel.
    pub steps_per_mm: u32,
    /// Feedrate ceiling in mm/min.
    pub max_feedrate: u32,
    /// Slow homing feedrate in mm/min. Required when an endstop exists.
    pub search_feedrate: Option<u32>,
    /// Distance from endstop trigger point to the hard limit, in
    /// micrometers. Bounds the fast homing approach speed. Required when
    /// an endstop exists.
    pub endstop_clearance: Option<u32>,
    /// Coordinate of the minimum-side endstop, micrometers.
    pub min_um: Option<i32>,
    /// Coordinate of the maximum-side endstop, micrometers. Required
    /// when `endstop_max` is set.
    pub max_um: Option<i32>,
    /// A minimum-side endstop switch is wired.
    pub endstop_min: bool,
    /// A maximum-side endstop switch is wired.
    pub endstop_max: bool,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            steps_per_mm: 80,
            max_feedrate: 6_000,
            search_feedrate: None,
            endstop_clearance: None,
            min_um: None,
            max_um: None,
            endstop_min: false,
            endstop_max: false,
        }
    }
}

/// Whole-machine configuration. Immutable after [`validate`] passes.
///
/// [`validate`]: MachineConfig::validate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MachineConfig {
    /// Counter ticks per second; the step timer free-runs at CPU clock.
    pub cpu_freq: u32,
    /// System tick period in counter ticks. Must fit in the 16-bit
    /// counter with headroom.
    pub tick_ticks: u32,
    /// Acceleration applied to the dominant axis, mm/s^2. Zero disables
    /// the ramp-in alone: moves start at their cruise rate.
    pub acceleration: u32,
    /// Deceleration, mm/s^2. Usually equal to `acceleration`. Zero
    /// disables the ramp-out alone: moves cruise to their last step.
    /// With both rates zero every interval is the cruise interval.
    pub deceleration: u32,
    /// Minimum inter-step interval in ticks: the profiled time needed to
    /// complete one step interrupt before the next may fire.
    pub min_step_ticks: u32,
    /// Direction setup: ticks between a DIR edge and the next STEP edge.
    pub dir_setup_ticks: u32,
    /// STEP pulse hold width in ticks. Driver-datasheet dependent.
    pub pulse_ticks: u32,
    /// Headroom for the short-request check inside the step interrupt.
    pub safe_isr_ticks: u32,
    /// Velocity profile mode.
    pub velocity_mode: VelocityMode,
    /// Per-axis descriptors, indexed by [`Axis::index`].
    pub axes: [AxisConfig; NUM_AXES],
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            cpu_freq: 16_000_000,
            tick_ticks: 32_000, // 2 ms at 16 MHz
            acceleration: 1_000,
            deceleration: 1_000,
            min_step_ticks: 320,
            dir_setup_ticks: 8,
            pulse_ticks: 32, // 2 us at 16 MHz
            safe_isr_ticks: 200,
            velocity_mode: VelocityMode::Trapezoid,
            axes: [AxisConfig::default(); NUM_AXES],
        }
    }
}

/// Rejected configurations. The runtime analog of the original build
/// guards: a core is never constructed over an inconsistent table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// `cpu_freq` is zero.
    ZeroCpuFreq,
    /// `steps_per_mm` is zero on an axis.
    ZeroStepsPerMm(Axis),
    /// `max_feedrate` is zero on an axis.
    ZeroMaxFeedrate(Axis),
    /// Tick period does not fit the counter, or is shorter than the
    /// minimum step interval.
    BadTickPeriod,
    /// An endstop is wired but `search_feedrate` is missing.
    MissingSearchFeedrate(Axis),
    /// An endstop is wired but `endstop_clearance` is missing.
    MissingClearance(Axis),
    /// A maximum-side endstop is wired but `max_um` is missing.
    MissingMaxPosition(Axis),
    /// Pulse hold plus direction setup exceed the minimum step interval.
    PulseTooLong,
}

impl MachineConfig {
    /// Check the table for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cpu_freq == 0 {
            return Err(ConfigError::ZeroCpuFreq);
        }
        if self.tick_ticks == 0 || self.tick_ticks >= cadence_hal::timer::COUNTER_RANGE {
            return Err(ConfigError::BadTickPeriod);
        }
        if self.pulse_ticks + self.dir_setup_ticks >= self.min_step_ticks {
            return Err(ConfigError::PulseTooLong);
        }
        for axis in Axis::ALL {
            let a = &self.axes[axis.index()];
            if a.steps_per_mm == 0 {
                return Err(ConfigError::ZeroStepsPerMm(axis));
            }
            if a.max_feedrate == 0 {
                return Err(ConfigError::ZeroMaxFeedrate(axis));
            }
            if a.endstop_min || a.endstop_max {
                if a.search_feedrate.is_none() {
                    return Err(ConfigError::MissingSearchFeedrate(axis));
                }
                if a.endstop_clearance.is_none() {
                    return Err(ConfigError::MissingClearance(axis));
                }
            }
            if a.endstop_max && a.max_um.is_none() {
                return Err(ConfigError::MissingMaxPosition(axis));
            }
        }
        Ok(())
    }

    /// Axis descriptor lookup.
    #[inline]
    pub fn axis(&self, axis: Axis) -> &AxisConfig {
        &self.axes[axis.index()]
    }
}
