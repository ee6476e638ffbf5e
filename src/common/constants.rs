/// Backlog used when the caller passes a negative backlog.
pub const DEFAULT_BACKLOG: i32 = 128;

/// Extra bytes reserved per address in a completion slot's scratch buffer.
pub const ADDRESS_PADDING: usize = 16;

/// Maximum events fetched from the poller per turn.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

pub const DEFAULT_ACCEPTING_SLOTS: usize = 1;
pub const MAX_ACCEPTING_SLOTS: usize = 1024;

pub const DEFAULT_REARM_BACKOFF_MS: u64 = 10;
pub const DEFAULT_MAX_REARM_ATTEMPTS: u32 = 5;
