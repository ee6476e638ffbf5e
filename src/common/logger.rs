use std::cell::RefCell;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Sink for diagnostics raised while a listener runs.
///
/// Steady-state accept failures never reach the accept callback; they are
/// reported here instead. A sink is handed to each listener when it is built.
pub trait Diagnostics {
    fn log(&self, level: Level, msg: &str);

    fn debug(&self, msg: &str) {
        self.log(Level::Debug, msg);
    }

    fn info(&self, msg: &str) {
        self.log(Level::Info, msg);
    }

    fn warn(&self, msg: &str) {
        self.log(Level::Warn, msg);
    }

    fn error(&self, msg: &str) {
        self.log(Level::Error, msg);
    }
}

/// Default sink, forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Logger;

impl Diagnostics for Logger {
    fn log(&self, level: Level, msg: &str) {
        match level {
            Level::Debug => tracing::debug!(target: "connlistener", "{}", msg),
            Level::Info => tracing::info!(target: "connlistener", "{}", msg),
            Level::Warn => tracing::warn!(target: "connlistener", "{}", msg),
            Level::Error => tracing::error!(target: "connlistener", "{}", msg),
        }
    }
}

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Does nothing if a subscriber is already set.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init();
}

/// Sink that keeps every entry in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: RefCell<Vec<(Level, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries.borrow().clone()
    }

    pub fn count(&self, level: Level) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|(l, _)| *l == level)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

impl Diagnostics for MemorySink {
    fn log(&self, level: Level, msg: &str) {
        self.entries.borrow_mut().push((level, msg.to_string()));
    }
}
