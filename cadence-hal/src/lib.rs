//! Cadence hardware abstraction layer
//!
//! This crate defines the hardware traits the motion core is written
//! against. Chip-specific crates (or the host simulator) implement them:
//!
//! - [`gpio::OutputPin`], [`gpio::InputPin`] - digital I/O
//! - [`timer::StepTimer`] - one free-running 16-bit counter with two
//!   compare channels (step pulse + system tick)
//!
//! Keeping the traits in their own dependency-free crate lets the core
//! build and test on the host without any target HAL present.

#![no_std]
#![deny(unsafe_code)]

pub mod gpio;
pub mod timer;

pub use gpio::{InputPin, OutputPin};
pub use timer::StepTimer;
