//! Service lifecycle state machine

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Service lifecycle status
///
/// Moves strictly `Destroyed -> Created -> Started -> Stopped -> Destroyed`.
/// A pool torn down without ever running goes straight from `Created` back
/// to `Destroyed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ServiceStatus {
    Created = 0,
    Started = 1,
    Stopped = 2,
    Destroyed = 3,
}

impl ServiceStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Started,
            2 => Self::Stopped,
            _ => Self::Destroyed,
        }
    }

    /// Whether the status is at or past `Stopped`
    pub fn is_halted(self) -> bool {
        self >= Self::Stopped
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Started => "STARTED",
            Self::Stopped => "STOPPED",
            Self::Destroyed => "DESTROYED",
        };
        f.write_str(s)
    }
}

/// Atomic status holder with guarded transitions
#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn new(initial: ServiceStatus) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn get(&self) -> ServiceStatus {
        ServiceStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`; returns false if the current status differs
    pub fn transition(&self, from: ServiceStatus, to: ServiceStatus) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new(ServiceStatus::Destroyed)
    }
}
