//! The move queue
//!
//! A bounded single-producer single-consumer ring of prepared moves.
//! The foreground pushes, the step interrupt pops; `heapless` provides
//! the acquire/release fences, so neither side ever masks interrupts to
//! touch the queue.
//!
//! Queue length is mirrored in a pair of single-writer counters so both
//! sides (and API callers) can read it without reaching into the ring.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::moves::Move;

/// Usable move slots. The ring reserves one extra slot internally.
pub const QUEUE_CAPACITY: usize = 8;

/// Ring slot count: `heapless` reserves one slot to tell full from
/// empty.
pub const QUEUE_SLOTS: usize = QUEUE_CAPACITY + 1;

/// The backing ring. Lives inside [`crate::control::MotionCore`]; split
/// once into the two endpoints at init.
pub type MoveQueue = heapless::spsc::Queue<Move, QUEUE_SLOTS>;
/// Foreground endpoint.
pub type MoveProducer<'a> = heapless::spsc::Producer<'a, Move, QUEUE_SLOTS>;
/// Step-interrupt endpoint.
pub type MoveConsumer<'a> = heapless::spsc::Consumer<'a, Move, QUEUE_SLOTS>;

/// Lamport-style occupancy counters: `pushed` is written only by the
/// producer, `popped` only by the consumer, so plain load/store ordering
/// suffices and no read-modify-write atomics are needed.
#[derive(Debug, Default)]
pub struct QueueCounters {
    pushed: AtomicU32,
    popped: AtomicU32,
}

impl QueueCounters {
    pub const fn new() -> Self {
        Self {
            pushed: AtomicU32::new(0),
            popped: AtomicU32::new(0),
        }
    }

    /// Producer side: record one successful push.
    pub fn note_push(&self) {
        let n = self.pushed.load(Ordering::Relaxed);
        self.pushed.store(n.wrapping_add(1), Ordering::Release);
    }

    /// Consumer side: record one completed pop.
    pub fn note_pop(&self) {
        let n = self.popped.load(Ordering::Relaxed);
        self.popped.store(n.wrapping_add(1), Ordering::Release);
    }

    /// Moves currently queued.
    pub fn len(&self) -> usize {
        let pushed = self.pushed.load(Ordering::Acquire);
        let popped = self.popped.load(Ordering::Acquire);
        pushed.wrapping_sub(popped) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
