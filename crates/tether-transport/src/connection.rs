//! Connection state tracking.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Connection state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Connection manager for tracking state and statistics
pub struct ConnectionManager {
    state: Mutex<ConnectionState>,
    connected_at: Mutex<Option<Instant>>,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    connects: AtomicU32,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            connected_at: Mutex::new(None),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            connects: AtomicU32::new(0),
        }
    }

    /// Transition to new state, returning the previous one.
    pub fn transition(&self, new_state: ConnectionState) -> ConnectionState {
        let mut state = self.state.lock();
        let old_state = *state;

        match new_state {
            ConnectionState::Connected => {
                *self.connected_at.lock() = Some(Instant::now());
                self.connects.fetch_add(1, Ordering::Relaxed);
            }
            ConnectionState::Disconnected => {
                *self.connected_at.lock() = None;
            }
            ConnectionState::Connecting => {}
        }

        *state = new_state;
        old_state
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Time since the current connection was established.
    pub fn duration(&self) -> Option<Duration> {
        self.connected_at.lock().map(|t| t.elapsed())
    }

    pub fn record_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            state: self.state(),
            duration: self.duration(),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection statistics
#[derive(Clone, Debug)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    pub duration: Option<Duration>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub connects: u32,
}
