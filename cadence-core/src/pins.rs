//! Pin plumbing between the motion core and the HAL
//!
//! [`MotionPins`] is the bundle the step interrupt drives: step and
//! direction lines per axis plus the endstop inputs, addressed by the
//! mask slot layout of [`crate::motion::EndstopMask`]. Platforms compose
//! an implementation from the typed wrappers below; the simulator
//! implements it directly.

use cadence_hal::gpio::{InputPin, OutputPin};

use crate::motion::Axis;

/// Everything the step interrupt touches per step.
pub trait MotionPins {
    /// Latch the travel direction of one axis. Called at move start
    /// only, never between steps of one move.
    fn set_direction(&mut self, axis: Axis, positive: bool);

    /// Raise the STEP line of one axis.
    fn step_high(&mut self, axis: Axis);

    /// Lower the STEP line of one axis.
    fn step_low(&mut self, axis: Axis);

    /// Sample one endstop input slot (see
    /// [`EndstopMask`](crate::motion::EndstopMask) for the layout).
    /// Returns `true` when the switch reads triggered. Slots without a
    /// wired switch return `false`.
    fn endstop_triggered(&mut self, slot: usize) -> bool;
}

/// STEP/DIR output pair for one axis.
pub struct StepDir<S: OutputPin, D: OutputPin> {
    step: S,
    dir: D,
    /// Invert the DIR level for axes wired backwards.
    dir_invert: bool,
}

impl<S: OutputPin, D: OutputPin> StepDir<S, D> {
    pub fn new(step: S, dir: D, dir_invert: bool) -> Self {
        Self {
            step,
            dir,
            dir_invert,
        }
    }

    pub fn set_direction(&mut self, positive: bool) {
        self.dir.set_state(positive != self.dir_invert);
    }

    pub fn step_high(&mut self) {
        self.step.set_high();
    }

    pub fn step_low(&mut self) {
        self.step.set_low();
    }
}

/// Endstop input with level normalization and an optional
/// consecutive-sample debounce filter.
pub struct Endstop<I: InputPin> {
    pin: I,
    active_low: bool,
    /// Samples in agreement required before the reported state flips.
    /// 1 disables debouncing.
    threshold: u8,
    last_raw: bool,
    agree: u8,
    state: bool,
}

impl<I: InputPin> Endstop<I> {
    /// Most endstops are normally-open to ground with a pull-up, so
    /// `active_low = true` is the common wiring.
    pub fn new(pin: I, active_low: bool, debounce: u8) -> Self {
        Self {
            pin,
            active_low,
            threshold: debounce.max(1),
            last_raw: false,
            agree: 0,
            state: false,
        }
    }

    /// Sample the input and return the debounced, normalized state.
    pub fn sample(&mut self) -> bool {
        let raw = self.pin.is_high() != self.active_low;
        if raw == self.last_raw {
            self.agree = self.agree.saturating_add(1);
        } else {
            self.last_raw = raw;
            self.agree = 1;
        }
        if self.agree >= self.threshold {
            self.state = raw;
        }
        self.state
    }
}

/// Step driver enable output. Most drivers enable on a low level.
pub struct DriverEnable<P: OutputPin> {
    pin: P,
    active_low: bool,
}

impl<P: OutputPin> DriverEnable<P> {
    pub fn new(pin: P, active_low: bool) -> Self {
        Self { pin, active_low }
    }

    pub fn enable(&mut self) {
        self.pin.set_state(!self.active_low);
    }

    pub fn disable(&mut self) {
        self.pin.set_state(self.active_low);
    }
}

/// Placeholder output for boards without a given line.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPin;

impl OutputPin for NoPin {
    fn set_high(&mut self) {}
    fn set_low(&mut self) {}
    fn is_set_high(&self) -> bool {
        false
    }
}
