//! Error type for the memory subsystem.
//!
//! Resource exhaustion on the hot allocation paths is reported through the
//! null-pointer return channel (callers in interrupt context cannot unwind
//! a `Result` through C-shaped call chains); this enum covers the setup and
//! maintenance paths where a typed error is useful.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    NoMemory,
    RegionTooSmall,
    NotInitialized,
    InvalidAddress,
    ChainCorrupt,
}

impl fmt::Display for MmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMemory => write!(f, "out of memory"),
            Self::RegionTooSmall => write!(f, "memory region too small for a heap"),
            Self::NotInitialized => write!(f, "heap not initialized"),
            Self::InvalidAddress => write!(f, "address outside the heap region"),
            Self::ChainCorrupt => write!(f, "heap block chain corrupt"),
        }
    }
}

/// Convenience result type for memory management operations.
pub type MmResult<T = ()> = Result<T, MmError>;
