//! TernOS shared kernel types.
//!
//! This crate provides the canonical definitions for the types and constants
//! shared between kernel subsystems: the tick type with its wrap-safe
//! comparison helpers, thread status bits consumed by the timer facility,
//! and the common object-name limit. Having a single source of truth keeps
//! the `mm`/`core` crates free of duplicate definitions and ABI drift.
//!
//! Everything here is plain data — no statics, no unsafe.

#![no_std]
#![forbid(unsafe_code)]

pub mod task;
pub mod tick;

/// Maximum length of a kernel object name, including NUL padding.
pub const OBJ_NAME_MAX: usize = 16;

pub use task::*;
pub use tick::*;
