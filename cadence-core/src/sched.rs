//! Step timer scheduling discipline
//!
//! One free-running 16-bit counter serves two compare channels: the step
//! compare and the system tick. This module owns the software half of
//! the step channel.
//!
//! Delays are always measured from the previous step compare value, the
//! anchor, never from "now". The previous event is the true beat of the
//! step rhythm; measuring from now would fold the interrupt's variable
//! processing time into every period.
//!
//! Delays wider than the counter are handled by leaving the compare one
//! full wrap away and paying the delay down [`COUNTER_RANGE`] ticks per
//! spurious fire. A guard band keeps the final partial wrap from landing
//! within a few cycles of the current fire: remainders inside the band
//! are pushed back by [`COUNTER_GUARD`] and repaid on the next wrap.

use cadence_hal::timer::{StepTimer, COUNTER_RANGE};

/// Guard band for the degenerate near-wrap remainder, in ticks.
pub const COUNTER_GUARD: u32 = 10_000;

/// The requested delay is already due; the caller must execute the step
/// immediately and must not consider the anchor advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TooShort;

/// Software state of the step compare channel.
#[derive(Debug)]
pub struct StepScheduler {
    /// Last programmed compare value; the anchor for the next delay.
    compare: u16,
    /// Ticks still owed beyond the programmed compare, paid down one
    /// counter wrap at a time.
    remaining: u32,
    /// Headroom the short-request check demands, in ticks.
    safe_ticks: u32,
}

impl StepScheduler {
    pub fn new(safe_ticks: u32) -> Self {
        Self {
            compare: 0,
            remaining: 0,
            safe_ticks,
        }
    }

    /// Re-base the rhythm on an arbitrary compare value. Used when the
    /// queue starts from idle: the foreground's kick compare becomes the
    /// new anchor.
    pub fn adopt_anchor(&mut self, compare: u16) {
        self.compare = compare;
        self.remaining = 0;
    }

    /// The current anchor (last programmed step compare value).
    pub fn anchor(&self) -> u16 {
        self.compare
    }

    /// Arm the step compare to fire `delay` ticks after the previous
    /// step compare event.
    ///
    /// With `check_short` set (calls from inside the step interrupt),
    /// a delay that would land within [`safe_ticks`](Self::new) of now
    /// returns [`TooShort`] and arms nothing; the caller steps
    /// immediately and the anchor stays put.
    ///
    /// The compare interrupt is disabled on entry and enabled last, so a
    /// match that lands during this window is deferred past the return.
    pub fn schedule<T: StepTimer>(
        &mut self,
        timer: &mut T,
        delay: u32,
        check_short: bool,
    ) -> Result<(), TooShort> {
        timer.disable_step_irq();
        let anchor = self.compare;

        if check_short {
            let elapsed = timer.now().wrapping_sub(anchor) as u32;
            if elapsed + self.safe_ticks > delay {
                return Err(TooShort);
            }
        }

        self.remaining = delay;
        if delay < COUNTER_RANGE {
            self.compare = anchor.wrapping_add(delay as u16);
        } else if delay < COUNTER_RANGE + COUNTER_GUARD {
            // The final partial wrap would be tiny; borrow a guard band
            // now and repay it on the wrap fire.
            self.compare = anchor.wrapping_sub(COUNTER_GUARD as u16);
            self.remaining += COUNTER_GUARD;
        } else {
            // One or more full wraps away; leave the compare in place.
        }
        timer.set_step_compare(self.compare);
        timer.enable_step_irq();
        Ok(())
    }

    /// Handle a step compare fire. Returns `true` when the fire is a
    /// real step event (the step interrupt is then left disabled until
    /// the next [`schedule`](Self::schedule)); `false` when it was a
    /// counter-wrap payment with no work to do.
    pub fn on_fire<T: StepTimer>(&mut self, timer: &mut T) -> bool {
        if self.remaining < COUNTER_RANGE {
            timer.disable_step_irq();
            return true;
        }
        self.remaining -= COUNTER_RANGE;
        if self.remaining < COUNTER_RANGE {
            self.compare = self.compare.wrapping_add(self.remaining as u16);
            timer.set_step_compare(self.compare);
        } else if self.remaining < COUNTER_RANGE + COUNTER_GUARD {
            self.compare = self.compare.wrapping_sub(COUNTER_GUARD as u16);
            self.remaining += COUNTER_GUARD;
            timer.set_step_compare(self.compare);
        }
        // Otherwise leave the compare for another full wrap.
        false
    }

    /// Disarm both compare channels. Emergency stop.
    pub fn stop<T: StepTimer>(&mut self, timer: &mut T) {
        timer.stop();
        self.remaining = 0;
    }
}
