use crate::application::listener::{BackendKind, Flags, RearmPolicy};
use crate::common::constants::{
    DEFAULT_ACCEPTING_SLOTS, DEFAULT_EVENT_CAPACITY, DEFAULT_MAX_REARM_ATTEMPTS,
    DEFAULT_REARM_BACKOFF_MS,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Events fetched from the poller per reactor turn
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Listener instances
    pub listeners: Vec<ListenerConfig>,
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

/// One listening socket
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    /// Address to bind; port 0 picks an ephemeral port
    pub address: SocketAddr,

    /// Listen backlog; negative means the default of 128
    #[serde(default = "default_backlog")]
    pub backlog: i32,

    #[serde(default)]
    pub backend: BackendKind,

    /// Concurrently posted accepts (completion backend only)
    #[serde(default = "default_slots")]
    pub slots: usize,

    #[serde(default)]
    pub close_on_free: bool,

    #[serde(default)]
    pub close_on_exec: bool,

    #[serde(default)]
    pub reuseable: bool,

    #[serde(default)]
    pub leave_sockets_blocking: bool,

    /// First retry delay for a slot that failed to post
    #[serde(default = "default_rearm_backoff_ms")]
    pub rearm_backoff_ms: u64,

    #[serde(default = "default_max_rearm_attempts")]
    pub max_rearm_attempts: u32,
}

fn default_backlog() -> i32 {
    -1
}

fn default_slots() -> usize {
    DEFAULT_ACCEPTING_SLOTS
}

fn default_rearm_backoff_ms() -> u64 {
    DEFAULT_REARM_BACKOFF_MS
}

fn default_max_rearm_attempts() -> u32 {
    DEFAULT_MAX_REARM_ATTEMPTS
}

impl ListenerConfig {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            backlog: default_backlog(),
            backend: BackendKind::default(),
            slots: default_slots(),
            close_on_free: false,
            close_on_exec: false,
            reuseable: false,
            leave_sockets_blocking: false,
            rearm_backoff_ms: default_rearm_backoff_ms(),
            max_rearm_attempts: default_max_rearm_attempts(),
        }
    }

    pub fn flags(&self) -> Flags {
        let mut flags = Flags::empty();
        flags.set(Flags::CLOSE_ON_FREE, self.close_on_free);
        flags.set(Flags::CLOSE_ON_EXEC, self.close_on_exec);
        flags.set(Flags::REUSEABLE, self.reuseable);
        flags.set(Flags::LEAVE_SOCKETS_BLOCKING, self.leave_sockets_blocking);
        flags
    }

    pub fn rearm_policy(&self) -> RearmPolicy {
        RearmPolicy {
            backoff: Duration::from_millis(self.rearm_backoff_ms),
            max_attempts: self.max_rearm_attempts,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            listeners: Vec::new(),
        }
    }
}
