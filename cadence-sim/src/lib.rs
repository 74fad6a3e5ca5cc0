//! Host simulator for the motion core
//!
//! Replaces the hardware timer and the GPIO matrix with virtual-time
//! doubles so the whole core (scheduler discipline included) runs on
//! the host, event by event:
//!
//! - [`SimTimer`]: a free-running 16-bit counter over a shared virtual
//!   clock, with step and tick compare channels. Cloned handles see the
//!   same clock, mirroring memory-mapped timer registers.
//! - [`SimPins`]: records every direction latch and step pulse with its
//!   timestamp, and models endstop switches that close or open at step
//!   positions.
//! - [`SimMachine::fire_next`]: advances the clock to the earliest armed
//!   compare and invokes the matching handler; the step channel wins
//!   ties, like the hardware priority it models.

use std::cell::RefCell;
use std::rc::Rc;

use cadence_core::control::{StepHandler, TickHandler};
use cadence_core::motion::{Axis, NUM_AXES, NUM_ENDSTOPS};
use cadence_core::pins::MotionPins;
use cadence_hal::gpio::OutputPin;
use cadence_hal::timer::StepTimer;

#[derive(Debug, Default)]
struct TimerState {
    /// Absolute virtual time in ticks; the 16-bit counter is its low
    /// half.
    now: u64,
    step_compare: u16,
    step_irq: bool,
    tick_compare: u16,
    tick_irq: bool,
    stopped: bool,
    /// Every value written to the step compare, for anchor assertions.
    step_compares: Vec<u16>,
}

/// Handle to the shared virtual timer. Clone freely; all handles alias
/// one counter, as register handles do on hardware.
#[derive(Clone)]
pub struct SimTimer {
    state: Rc<RefCell<TimerState>>,
}

impl SimTimer {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(TimerState::default())),
        }
    }

    /// Absolute virtual time.
    pub fn now_ticks(&self) -> u64 {
        self.state.borrow().now
    }

    pub fn step_irq_enabled(&self) -> bool {
        self.state.borrow().step_irq
    }

    pub fn tick_irq_enabled(&self) -> bool {
        self.state.borrow().tick_irq
    }

    pub fn stopped(&self) -> bool {
        self.state.borrow().stopped
    }

    /// All step compare values programmed so far.
    pub fn step_compares(&self) -> Vec<u16> {
        self.state.borrow().step_compares.clone()
    }
}

impl Default for SimTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl StepTimer for SimTimer {
    fn now(&self) -> u16 {
        (self.state.borrow().now & 0xFFFF) as u16
    }

    fn set_step_compare(&mut self, compare: u16) {
        let mut s = self.state.borrow_mut();
        s.step_compare = compare;
        s.step_compares.push(compare);
    }

    fn enable_step_irq(&mut self) {
        self.state.borrow_mut().step_irq = true;
    }

    fn disable_step_irq(&mut self) {
        self.state.borrow_mut().step_irq = false;
    }

    fn set_tick_compare(&mut self, compare: u16) {
        let mut s = self.state.borrow_mut();
        s.tick_compare = compare;
        s.tick_irq = !s.stopped;
    }

    fn stop(&mut self) {
        let mut s = self.state.borrow_mut();
        s.step_irq = false;
        s.tick_irq = false;
        s.stopped = true;
    }

    fn spin_ticks(&self, ticks: u16) {
        self.state.borrow_mut().now += ticks as u64;
    }
}

/// One recorded step pulse (rising edge).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseEvent {
    pub at: u64,
    pub axis: Axis,
}

/// An endstop that answers from the simulated axis position.
#[derive(Debug, Clone, Copy)]
pub struct EndstopRule {
    /// Input slot in the mask layout.
    pub slot: usize,
    pub axis: Axis,
    /// Minimum-side switch: closed at or below the threshold. Maximum
    /// side: closed at or above.
    pub min_side: bool,
    /// Trigger position in whole steps.
    pub threshold_steps: i64,
}

#[derive(Debug, Default)]
struct PinState {
    dirs: [bool; NUM_AXES],
    steps: [i64; NUM_AXES],
    pulses: [u32; NUM_AXES],
    pulse_log: Vec<PulseEvent>,
    dir_log: Vec<(u64, Axis, bool)>,
    endstops: [bool; NUM_ENDSTOPS],
    rules: Vec<EndstopRule>,
}

/// Handle to the recorded pin matrix.
#[derive(Clone)]
pub struct SimPins {
    state: Rc<RefCell<PinState>>,
    clock: Rc<RefCell<TimerState>>,
}

impl SimPins {
    fn new(clock: Rc<RefCell<TimerState>>) -> Self {
        Self {
            state: Rc::new(RefCell::new(PinState::default())),
            clock,
        }
    }

    /// Install a position-triggered endstop.
    pub fn add_endstop_rule(&self, rule: EndstopRule) {
        self.state.borrow_mut().rules.push(rule);
    }

    /// Force an endstop level (for scripted tests without rules).
    pub fn set_endstop(&self, slot: usize, triggered: bool) {
        self.state.borrow_mut().endstops[slot] = triggered;
    }

    pub fn pulses(&self, axis: Axis) -> u32 {
        self.state.borrow().pulses[axis.index()]
    }

    /// Net signed position in steps.
    pub fn steps(&self, axis: Axis) -> i64 {
        self.state.borrow().steps[axis.index()]
    }

    pub fn pulse_log(&self) -> Vec<PulseEvent> {
        self.state.borrow().pulse_log.clone()
    }

    pub fn dir_log(&self) -> Vec<(u64, Axis, bool)> {
        self.state.borrow().dir_log.clone()
    }

    /// Timestamps of the pulses on one axis.
    pub fn pulse_times(&self, axis: Axis) -> Vec<u64> {
        self.state
            .borrow()
            .pulse_log
            .iter()
            .filter(|p| p.axis == axis)
            .map(|p| p.at)
            .collect()
    }
}

impl MotionPins for SimPins {
    fn set_direction(&mut self, axis: Axis, positive: bool) {
        let at = self.clock.borrow().now;
        let mut s = self.state.borrow_mut();
        s.dirs[axis.index()] = positive;
        s.dir_log.push((at, axis, positive));
    }

    fn step_high(&mut self, axis: Axis) {
        let at = self.clock.borrow().now;
        let mut s = self.state.borrow_mut();
        let i = axis.index();
        s.pulses[i] += 1;
        s.steps[i] += if s.dirs[i] { 1 } else { -1 };
        s.pulse_log.push(PulseEvent { at, axis });
    }

    fn step_low(&mut self, _axis: Axis) {}

    fn endstop_triggered(&mut self, slot: usize) -> bool {
        let mut s = self.state.borrow_mut();
        for r in 0..s.rules.len() {
            let rule = s.rules[r];
            let pos = s.steps[rule.axis.index()];
            let hit = if rule.min_side {
                pos <= rule.threshold_steps
            } else {
                pos >= rule.threshold_steps
            };
            s.endstops[rule.slot] = hit;
        }
        s.endstops[slot]
    }
}

/// Simple latched output, e.g. for the driver-enable line.
#[derive(Clone, Default)]
pub struct SimLevel {
    level: Rc<RefCell<bool>>,
}

impl SimLevel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_high(&self) -> bool {
        *self.level.borrow()
    }
}

impl OutputPin for SimLevel {
    fn set_high(&mut self) {
        *self.level.borrow_mut() = true;
    }
    fn set_low(&mut self) {
        *self.level.borrow_mut() = false;
    }
    fn is_set_high(&self) -> bool {
        *self.level.borrow()
    }
}

/// Which compare fired, with its virtual timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fired {
    Step(u64),
    Tick(u64),
}

/// The virtual machine: shared timer, pin matrix, and the event pump.
pub struct SimMachine {
    pub timer: SimTimer,
    pub pins: SimPins,
    /// Virtual ticks of interrupt latency added before each handler
    /// runs. Anchor-relative scheduling must cancel this out.
    pub isr_latency: u64,
}

impl SimMachine {
    pub fn new() -> Self {
        let timer = SimTimer::new();
        let pins = SimPins::new(timer.state.clone());
        Self {
            timer,
            pins,
            isr_latency: 0,
        }
    }

    /// Advance virtual time to the earliest armed compare and run its
    /// handler. Returns `None` when nothing is armed. On equal
    /// deadlines the step compare runs first.
    pub fn fire_next(
        &mut self,
        step: &mut StepHandler<'_, SimTimer, SimPins>,
        tick: &mut TickHandler<'_, SimTimer>,
    ) -> Option<Fired> {
        let (dt_step, dt_tick) = {
            let s = self.timer.state.borrow();
            let now16 = (s.now & 0xFFFF) as u16;
            let dt = |compare: u16| -> u64 {
                let d = compare.wrapping_sub(now16);
                if d == 0 {
                    65_536
                } else {
                    d as u64
                }
            };
            (
                s.step_irq.then(|| dt(s.step_compare)),
                s.tick_irq.then(|| dt(s.tick_compare)),
            )
        };

        let step_first = match (dt_step, dt_tick) {
            (None, None) => return None,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(s), Some(t)) => s <= t,
        };

        let dt = if step_first {
            dt_step.unwrap()
        } else {
            dt_tick.unwrap()
        };
        {
            let mut s = self.timer.state.borrow_mut();
            s.now += dt + self.isr_latency;
        }
        let at = self.timer.now_ticks();
        if step_first {
            step.on_step_compare();
            Some(Fired::Step(at))
        } else {
            tick.on_tick();
            Some(Fired::Tick(at))
        }
    }

    /// Pump events until the step channel disarms (queue drained) or
    /// the virtual-time budget runs out.
    pub fn run_until_idle(
        &mut self,
        step: &mut StepHandler<'_, SimTimer, SimPins>,
        tick: &mut TickHandler<'_, SimTimer>,
        budget_ticks: u64,
    ) -> Result<(), BudgetExceeded> {
        while self.timer.step_irq_enabled() {
            if self.timer.now_ticks() > budget_ticks {
                return Err(BudgetExceeded);
            }
            if self.fire_next(step, tick).is_none() {
                break;
            }
        }
        Ok(())
    }
}

impl Default for SimMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// The simulated run did not settle within its virtual-time budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetExceeded;
