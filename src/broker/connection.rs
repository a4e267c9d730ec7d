//! Connection state tracking for the supervisor.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

/// Lifecycle of a broker session.
///
/// ```text
/// Disconnected ──► Connecting ──► Ready
///      ▲                │           │
///      └────────────────┴───────────┘  (dial failure / channel error)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    Connecting,
    Ready,
}

impl SupervisorState {
    fn as_u8(self) -> u8 {
        match self {
            SupervisorState::Disconnected => 0,
            SupervisorState::Connecting => 1,
            SupervisorState::Ready => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => SupervisorState::Connecting,
            2 => SupervisorState::Ready,
            _ => SupervisorState::Disconnected,
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Disconnected => write!(f, "disconnected"),
            SupervisorState::Connecting => write!(f, "connecting"),
            SupervisorState::Ready => write!(f, "ready"),
        }
    }
}

/// Supervisor state plus the consecutive-failure counter.
///
/// # Memory Ordering
///
/// All atomic operations use `SeqCst` ordering. The state is read from other
/// tasks (metrics, shutdown logging) while the supervisor drives it, and the
/// cost is irrelevant at reconnect frequency.
pub struct ConnectionState {
    state: AtomicU8,
    /// Consecutive failures since the last stable session.
    retries: AtomicU32,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(SupervisorState::Disconnected.as_u8()),
            retries: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> SupervisorState {
        SupervisorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_connecting(&self) {
        self.state
            .store(SupervisorState::Connecting.as_u8(), Ordering::SeqCst);
    }

    /// Mark the session Ready. Does not touch the failure counter.
    pub fn set_ready(&self) {
        self.state
            .store(SupervisorState::Ready.as_u8(), Ordering::SeqCst);
    }

    /// Forget earlier failures once a session has proven stable.
    pub fn reset_failures(&self) {
        self.retries.store(0, Ordering::SeqCst);
    }

    /// Mark the session lost and return the updated failure count.
    pub fn record_failure(&self) -> u32 {
        self.state
            .store(SupervisorState::Disconnected.as_u8(), Ordering::SeqCst);
        self.retries.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn set_disconnected(&self) {
        self.state
            .store(SupervisorState::Disconnected.as_u8(), Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SupervisorState::Ready
    }

    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::SeqCst)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}
