//! Motion controller and interrupt handlers
//!
//! [`MotionCore`] owns the move ring and the cross-context atomics.
//! [`MotionCore::split`] hands out three endpoints, one per execution
//! context:
//!
//! - [`MotionController`]: foreground. Plans and enqueues moves, tracks
//!   the planning startpoint, owns emergency stop.
//! - [`StepHandler`]: the step compare interrupt. Owns the scheduler,
//!   the live DDA and the trapezoid state.
//! - [`TickHandler`]: the system tick interrupt. Reprograms its own
//!   compare and runs the temporal rate ramp.
//!
//! The endpoints share nothing but the SPSC ring and single-writer
//! atomics, so the handlers never lock and never block. The one
//! interrupt-masked window in the whole crate is the enqueue-from-idle
//! kick: deciding "the queue was idle, arm a wake-up compare" must not
//! race the step interrupt going idle, exactly the window the original
//! closed with `cli()`.

use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use cadence_hal::gpio::OutputPin;
use cadence_hal::timer::StepTimer;

use crate::config::{ConfigError, MachineConfig, VelocityMode};
use crate::dda::DdaState;
use crate::motion::{Axis, DirMask, EndstopMask, Position, NUM_AXES};
use crate::moves::{self, Move, PlanError};
use crate::pins::{DriverEnable, MotionPins};
use crate::profile::{self, TemporalRamp, Trapezoid};
use crate::queue::{MoveConsumer, MoveProducer, MoveQueue, QueueCounters};
use crate::sched::StepScheduler;

/// Sentinel for "no kick compare armed".
const NO_KICK: u32 = u32::MAX;

/// Distance ahead of now for the enqueue-from-idle kick compare. Far
/// enough that the compare is armed before the counter reaches it.
const KICK_DELAY_TICKS: u16 = 1_000;

/// Enqueue and position-setting failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EnqueueError {
    /// Ring is full (only from `try_enqueue`; `enqueue` waits instead).
    QueueFull,
    /// Start and target coincide on the step grid.
    ZeroLength,
    /// Feedrate of zero.
    BadFeedrate,
    /// Emergency stop latched; the core needs a re-init.
    EstopActive,
    /// Operation requires an idle queue.
    NotIdle,
}

impl From<PlanError> for EnqueueError {
    fn from(e: PlanError) -> Self {
        match e {
            PlanError::ZeroLength => EnqueueError::ZeroLength,
            PlanError::BadFeedrate => EnqueueError::BadFeedrate,
        }
    }
}

/// State shared between the three endpoints. Every atomic has exactly
/// one writing context.
struct Shared {
    counters: QueueCounters,
    /// A move is live in the step interrupt. Written by the step
    /// handler.
    live: AtomicBool,
    /// Emergency stop latched. Written by the foreground.
    estop: AtomicBool,
    /// Kick compare value, or [`NO_KICK`]. Written by the foreground
    /// under the kick critical section, consumed by the step handler.
    kick_at: AtomicU32,
    /// Actual machine position in whole steps. Written by the step
    /// handler on move completion; by the foreground only while idle.
    position: [AtomicI32; NUM_AXES],
    /// Temporal mode: goal rate of the live move, steps/s. Step handler
    /// writes, tick handler reads. Zero while idle.
    rate_goal: AtomicU32,
    /// Temporal mode: slowest commanded rate, steps/s.
    rate_floor: AtomicU32,
    /// Temporal mode: per-tick rate deltas, 16.16 steps/s.
    accel_x16: AtomicU32,
    decel_x16: AtomicU32,
    /// Temporal mode: commanded inter-step interval in ticks, derived by
    /// the tick handler. Zero until the first ramp tick of a move.
    interval_now: AtomicU32,
}

impl Shared {
    const fn new() -> Self {
        const ZERO: AtomicI32 = AtomicI32::new(0);
        Self {
            counters: QueueCounters::new(),
            live: AtomicBool::new(false),
            estop: AtomicBool::new(false),
            kick_at: AtomicU32::new(NO_KICK),
            position: [ZERO; NUM_AXES],
            rate_goal: AtomicU32::new(0),
            rate_floor: AtomicU32::new(0),
            accel_x16: AtomicU32::new(0),
            decel_x16: AtomicU32::new(0),
            interval_now: AtomicU32::new(0),
        }
    }
}

/// Owner of the queue storage and shared state. Create once (typically
/// in a `static`), validate the configuration, then [`split`] into the
/// per-context endpoints.
///
/// [`split`]: MotionCore::split
pub struct MotionCore {
    config: MachineConfig,
    queue: MoveQueue,
    shared: Shared,
}

impl MotionCore {
    pub fn new(config: MachineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            queue: MoveQueue::new(),
            shared: Shared::new(),
        })
    }

    /// Split into the foreground controller and the two interrupt
    /// handlers. Each endpoint gets its own handle to the (shared)
    /// hardware timer; register accesses are individually atomic.
    pub fn split<CT, ST, TT, P, E>(
        &mut self,
        ctl_timer: CT,
        step_timer: ST,
        tick_timer: TT,
        pins: P,
        drivers: Option<DriverEnable<E>>,
    ) -> (
        MotionController<'_, CT, E>,
        StepHandler<'_, ST, P>,
        TickHandler<'_, TT>,
    )
    where
        CT: StepTimer,
        ST: StepTimer,
        TT: StepTimer,
        P: MotionPins,
        E: OutputPin,
    {
        let config = &self.config;
        let shared = &self.shared;
        let (producer, consumer) = self.queue.split();
        let controller = MotionController {
            config,
            shared,
            producer,
            timer: ctl_timer,
            drivers,
            startpoint: [0; NUM_AXES],
        };
        let step = StepHandler {
            config,
            shared,
            consumer,
            timer: step_timer,
            pins,
            sched: StepScheduler::new(config.safe_isr_ticks),
            current: None,
            dir_latch: None,
            extra_time: 0,
        };
        let tick = TickHandler {
            config,
            shared,
            timer: tick_timer,
            compare: 0,
            latch: false,
            ramp: TemporalRamp::default(),
        };
        (controller, step, tick)
    }
}

/// Foreground endpoint: move ingestion and lifecycle control.
pub struct MotionController<'a, T: StepTimer, E: OutputPin> {
    config: &'a MachineConfig,
    shared: &'a Shared,
    producer: MoveProducer<'a>,
    timer: T,
    drivers: Option<DriverEnable<E>>,
    /// Planning startpoint in whole steps: where the machine will be
    /// once everything queued so far has run.
    startpoint: [i32; NUM_AXES],
}

impl<'a, T: StepTimer, E: OutputPin> MotionController<'a, T, E> {
    /// Plan and enqueue a linear move. Returns
    /// [`EnqueueError::QueueFull`] instead of waiting.
    pub fn try_enqueue(&mut self, target: Position, feedrate: u32) -> Result<(), EnqueueError> {
        let (mv, end) = moves::plan(
            self.config,
            &self.startpoint,
            target,
            feedrate,
            EndstopMask::NONE,
            false,
        )?;
        self.submit(mv, end)
    }

    /// Plan and enqueue a linear move, waiting for a free slot if the
    /// ring is full. Interrupts keep draining the queue meanwhile.
    pub fn enqueue(&mut self, target: Position, feedrate: u32) -> Result<(), EnqueueError> {
        loop {
            match self.try_enqueue(target, feedrate) {
                Err(EnqueueError::QueueFull) => spin_loop(),
                other => return other,
            }
        }
    }

    /// Enqueue a homing move: it terminates on the endstop condition,
    /// not on its step count. `stop_on_trigger` selects approach
    /// (finish when a watched switch closes) versus back-off (finish
    /// once every watched switch has opened).
    pub fn enqueue_home(
        &mut self,
        target: Position,
        endstops: EndstopMask,
        stop_on_trigger: bool,
        feedrate: u32,
    ) -> Result<(), EnqueueError> {
        loop {
            let planned = moves::plan(
                self.config,
                &self.startpoint,
                target,
                feedrate,
                endstops,
                stop_on_trigger,
            );
            let (mv, end) = planned?;
            match self.submit(mv, end) {
                Err(EnqueueError::QueueFull) => spin_loop(),
                other => return other,
            }
        }
    }

    fn submit(&mut self, mv: Move, end: [i32; NUM_AXES]) -> Result<(), EnqueueError> {
        if self.shared.estop.load(Ordering::Acquire) {
            return Err(EnqueueError::EstopActive);
        }
        if let Some(drivers) = self.drivers.as_mut() {
            drivers.enable();
        }
        self.producer
            .enqueue(mv)
            .map_err(|_| EnqueueError::QueueFull)?;
        self.shared.counters.note_push();
        self.startpoint = end;
        self.kick();
        Ok(())
    }

    /// Wake the step interrupt if the queue was idle. The check and the
    /// compare arming must be one unit against the step interrupt's own
    /// idle transition, hence the critical section.
    fn kick(&mut self) {
        critical_section::with(|_| {
            if self.shared.live.load(Ordering::Acquire) {
                return;
            }
            if self.shared.kick_at.load(Ordering::Acquire) != NO_KICK {
                return; // already armed by an earlier enqueue
            }
            let at = self.timer.now().wrapping_add(KICK_DELAY_TICKS);
            self.shared.kick_at.store(at as u32, Ordering::Release);
            self.timer.set_step_compare(at);
            self.timer.enable_step_irq();
        });
    }

    /// Block until the queue is empty and no move is live.
    pub fn wait_idle(&self) {
        while !self.is_idle() {
            spin_loop();
        }
    }

    pub fn is_idle(&self) -> bool {
        self.shared.estop.load(Ordering::Acquire)
            || (self.shared.counters.is_empty() && !self.shared.live.load(Ordering::Acquire))
    }

    /// Moves currently queued (the live move counts until it
    /// completes).
    pub fn queue_len(&self) -> usize {
        if self.shared.estop.load(Ordering::Acquire) {
            0
        } else {
            self.shared.counters.len()
        }
    }

    /// Emergency stop latched?
    pub fn estop_active(&self) -> bool {
        self.shared.estop.load(Ordering::Acquire)
    }

    /// Where the machine will be once everything queued so far has run;
    /// the base every new move is planned from.
    pub fn startpoint(&self) -> Position {
        let mut p = Position::ZERO;
        for axis in Axis::ALL {
            let i = axis.index();
            p.um[i] = moves::steps_to_um(self.startpoint[i], self.config.axes[i].steps_per_mm);
        }
        p
    }

    /// Actual machine position, from the step interrupt's accounting.
    pub fn position(&self) -> Position {
        let mut p = Position::ZERO;
        for axis in Axis::ALL {
            let i = axis.index();
            let steps = self.shared.position[i].load(Ordering::Acquire);
            p.um[i] = moves::steps_to_um(steps, self.config.axes[i].steps_per_mm);
        }
        p
    }

    /// Redefine the current position. Only legal while idle; the step
    /// interrupt owns the position while anything is queued.
    pub fn set_current_position(&mut self, pos: Position) -> Result<(), EnqueueError> {
        if !self.is_idle() {
            return Err(EnqueueError::NotIdle);
        }
        for axis in Axis::ALL {
            let i = axis.index();
            let steps = moves::um_to_steps(pos.um[i], self.config.axes[i].steps_per_mm);
            self.startpoint[i] = steps;
            self.shared.position[i].store(steps, Ordering::Release);
        }
        Ok(())
    }

    /// Synchronous, terminal stop: disarm both compare channels, latch
    /// the stop flag, cut the step drivers. Queued moves are abandoned;
    /// only a fresh [`MotionCore`] resumes motion.
    pub fn emergency_stop(&mut self) {
        self.timer.stop();
        self.shared.estop.store(true, Ordering::Release);
        if let Some(drivers) = self.drivers.as_mut() {
            drivers.disable();
        }
    }

    /// Machine configuration in effect.
    pub fn config(&self) -> &MachineConfig {
        self.config
    }
}

struct LiveMove {
    mv: Move,
    dda: DdaState,
    profile: Trapezoid,
}

/// Step compare interrupt endpoint.
pub struct StepHandler<'a, T: StepTimer, P: MotionPins> {
    config: &'a MachineConfig,
    shared: &'a Shared,
    consumer: MoveConsumer<'a>,
    timer: T,
    pins: P,
    sched: StepScheduler,
    current: Option<LiveMove>,
    /// Direction mask currently latched on the DIR pins.
    dir_latch: Option<DirMask>,
    /// Intervals consumed by immediate (too-short) steps, repaid on the
    /// next successful schedule so the anchor rhythm never drifts.
    extra_time: u32,
}

impl<'a, T: StepTimer, P: MotionPins> StepHandler<'a, T, P> {
    /// Entry point for the step compare interrupt.
    pub fn on_step_compare(&mut self) {
        if self.shared.estop.load(Ordering::Acquire) {
            self.timer.disable_step_irq();
            return;
        }
        if !self.shared.live.load(Ordering::Relaxed) {
            // Kick from the foreground: adopt its compare value as the
            // new anchor and start the queue.
            self.timer.disable_step_irq();
            let at = self.shared.kick_at.load(Ordering::Acquire);
            if at == NO_KICK {
                return;
            }
            self.shared.kick_at.store(NO_KICK, Ordering::Release);
            self.sched.adopt_anchor(at as u16);
            self.shared.live.store(true, Ordering::Release);
            self.run();
            return;
        }
        if !self.sched.on_fire(&mut self.timer) {
            return; // counter-wrap payment, no step due
        }
        self.run();
    }

    /// Drain work until an interval is scheduled or the queue is empty.
    /// Too-short intervals loop back into immediate steps.
    fn run(&mut self) {
        loop {
            if self.current.is_none() {
                let Some(&mv) = self.consumer.peek() else {
                    self.go_idle();
                    return;
                };
                let first = self.begin_move(mv);
                if self.schedule_or_carry(first) {
                    return;
                }
                // Fall through: the first step is already due.
            }

            let pulse_ticks = self.config.pulse_ticks;
            let Some(lm) = self.current.as_mut() else {
                return;
            };
            let done = lm
                .dda
                .step(&lm.mv, &mut self.pins, &self.timer, pulse_ticks);
            if done {
                self.finish_move();
                continue;
            }
            let interval = self.next_interval();
            if self.schedule_or_carry(interval) {
                return;
            }
        }
    }

    /// Latch directions, set up profile state, publish the temporal
    /// goals. Returns the delay until the first step.
    fn begin_move(&mut self, mv: Move) -> u32 {
        let needs_dir = self.dir_latch != Some(mv.dirs);
        if needs_dir {
            for axis in Axis::ALL {
                self.pins.set_direction(axis, mv.dirs.is_positive(axis));
            }
            self.dir_latch = Some(mv.dirs);
        }

        if self.config.velocity_mode == VelocityMode::Temporal {
            let floor = (self.config.cpu_freq / mv.c0.max(1)).max(1);
            self.shared.rate_floor.store(floor, Ordering::Release);
            self.shared
                .accel_x16
                .store(rate_delta_x16(self.config, mv.accel_rate), Ordering::Release);
            self.shared
                .decel_x16
                .store(rate_delta_x16(self.config, mv.decel_rate), Ordering::Release);
            self.shared
                .rate_goal
                .store(mv.nominal_rate, Ordering::Release);
        }

        let first = match self.config.velocity_mode {
            VelocityMode::Trapezoid => mv.c0,
            VelocityMode::Temporal => {
                let now = self.shared.interval_now.load(Ordering::Acquire);
                if now == 0 {
                    mv.c0
                } else {
                    now
                }
            }
        };
        let first = if needs_dir {
            first.max(self.config.dir_setup_ticks)
        } else {
            first
        };

        self.current = Some(LiveMove {
            dda: DdaState::begin(&mv),
            profile: Trapezoid::start(&mv),
            mv,
        });
        first
    }

    /// Ticks until the next step of the live move.
    fn next_interval(&mut self) -> u32 {
        let min_ticks = self.config.min_step_ticks;
        let Some(lm) = self.current.as_mut() else {
            return min_ticks;
        };
        match self.config.velocity_mode {
            VelocityMode::Trapezoid => {
                lm.profile
                    .next_interval(&lm.mv, lm.dda.step_no, min_ticks)
            }
            VelocityMode::Temporal => {
                let interval = match self.shared.interval_now.load(Ordering::Acquire) {
                    0 => lm.mv.c0,
                    t => t,
                };
                // Ask the ramp to come back down once the remaining
                // steps only just cover the stopping distance.
                let rate = self.config.cpu_freq / interval.max(1);
                let remaining = lm.mv.total_steps - lm.dda.step_no;
                if remaining <= profile::steps_to_stop(rate, lm.mv.decel_rate) {
                    let floor = self.shared.rate_floor.load(Ordering::Acquire);
                    self.shared.rate_goal.store(floor, Ordering::Release);
                }
                interval.max(min_ticks)
            }
        }
    }

    /// Schedule `delay` plus any carried debt. Returns `false` on a
    /// too-short request, with the debt updated; the caller then steps
    /// immediately.
    fn schedule_or_carry(&mut self, delay: u32) -> bool {
        let total = delay.max(self.config.min_step_ticks) + self.extra_time;
        match self.sched.schedule(&mut self.timer, total, true) {
            Ok(()) => {
                self.extra_time = 0;
                true
            }
            Err(_) => {
                self.extra_time = total;
                false
            }
        }
    }

    fn finish_move(&mut self) {
        let Some(lm) = self.current.take() else {
            return;
        };
        for axis in Axis::ALL {
            let i = axis.index();
            let d = lm.dda.emitted(axis) as i32;
            if d == 0 {
                continue;
            }
            let signed = if lm.mv.dirs.is_positive(axis) { d } else { -d };
            let steps = self.shared.position[i].load(Ordering::Relaxed) + signed;
            self.shared.position[i].store(steps, Ordering::Release);
        }
        let _ = self.consumer.dequeue();
        self.shared.counters.note_pop();
    }

    fn go_idle(&mut self) {
        self.extra_time = 0;
        self.shared.rate_goal.store(0, Ordering::Release);
        self.shared.live.store(false, Ordering::Release);
        self.timer.disable_step_irq();
    }
}

/// System tick interrupt endpoint. Fires every `tick_ticks`; lower
/// priority than the step compare.
pub struct TickHandler<'a, T: StepTimer> {
    config: &'a MachineConfig,
    shared: &'a Shared,
    timer: T,
    compare: u16,
    /// Re-entrancy latch: platforms re-enable the step interrupt during
    /// the ramp section, and a tick that lands while a previous tick
    /// body still runs must skip it.
    latch: bool,
    ramp: TemporalRamp,
}

impl<'a, T: StepTimer> TickHandler<'a, T> {
    /// Arm the first tick compare. Call once after `split`.
    pub fn start(&mut self) {
        self.compare = self
            .timer
            .now()
            .wrapping_add(self.config.tick_ticks as u16);
        self.timer.set_tick_compare(self.compare);
    }

    /// Entry point for the tick compare interrupt.
    pub fn on_tick(&mut self) {
        self.compare = self.compare.wrapping_add(self.config.tick_ticks as u16);
        self.timer.set_tick_compare(self.compare);

        if self.latch {
            return;
        }
        self.latch = true;
        if self.config.velocity_mode == VelocityMode::Temporal {
            let goal = self.shared.rate_goal.load(Ordering::Acquire);
            let floor = self.shared.rate_floor.load(Ordering::Acquire);
            let accel = self.shared.accel_x16.load(Ordering::Acquire) as u64;
            let decel = self.shared.decel_x16.load(Ordering::Acquire) as u64;
            match self.ramp.tick(goal, floor, accel, decel) {
                Some(rate) => {
                    let interval = self.config.cpu_freq / rate.max(1);
                    self.shared.interval_now.store(interval, Ordering::Release);
                }
                None => self.shared.interval_now.store(0, Ordering::Release),
            }
        }
        self.latch = false;
    }
}

/// Per-tick rate delta in 16.16 steps/s for a steps/s^2 ramp.
fn rate_delta_x16(cfg: &MachineConfig, rate_s2: u32) -> u32 {
    let x = rate_s2 as u64 * cfg.tick_ticks as u64;
    let x16 = (x << 16) / cfg.cpu_freq as u64;
    x16.min(u32::MAX as u64) as u32
}
