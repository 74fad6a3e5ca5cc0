//! Hardware-agnostic motion control core
//!
//! This crate turns queued Cartesian moves into precisely timed stepper
//! pulses driven from a hardware timer interrupt. It contains no chip
//! code; everything hardware-facing goes through the traits in
//! `cadence-hal`:
//!
//! - Move preparation and the bounded SPSC move queue
//! - The DDA (Bresenham) multi-axis step engine
//! - Trapezoidal and temporal velocity profiles
//! - The dual-compare step timer scheduling discipline
//! - The foreground motion controller and the interrupt-side handlers
//! - Endstop homing
//!
//! Ownership maps directly onto execution contexts: the foreground owns a
//! [`control::MotionController`], the step interrupt owns a
//! [`control::StepHandler`], the system tick owns a
//! [`control::TickHandler`]. The three communicate only through the
//! lock-free queue and single-writer atomics, so no handler ever blocks.

#![no_std]
#![deny(unsafe_code)]

pub mod config;
pub mod control;
pub mod dda;
pub mod homing;
pub mod motion;
pub mod moves;
pub mod pins;
pub mod profile;
pub mod queue;
pub mod sched;

pub use config::{AxisConfig, ConfigError, MachineConfig, VelocityMode};
pub use control::{EnqueueError, MotionController, MotionCore, StepHandler, TickHandler};
pub use homing::{AxisHomer, HomingError};
pub use motion::{Axis, DirMask, EndstopMask, Position, NUM_AXES};
pub use moves::Move;
pub use pins::MotionPins;
