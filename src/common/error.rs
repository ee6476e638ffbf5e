use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Failed to create socket: {0}")]
    SocketCreate(#[source] io::Error),

    #[error("Failed to configure socket ({option}): {source}")]
    Configure {
        option: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to listen with backlog {backlog}: {source}")]
    Listen {
        backlog: i32,
        #[source]
        source: io::Error,
    },

    #[error("Invalid backlog: {0}")]
    InvalidBacklog(i32),

    #[error("Unsupported address family: {0}")]
    UnsupportedFamily(i32),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Reactor error: {0}")]
    Reactor(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ListenerError {
    pub(crate) fn configure(option: &'static str) -> Self {
        ListenerError::Configure {
            option,
            source: io::Error::last_os_error(),
        }
    }

    /// The OS error code behind this error, if there is one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            ListenerError::SocketCreate(e)
            | ListenerError::Configure { source: e, .. }
            | ListenerError::Bind { source: e, .. }
            | ListenerError::Listen { source: e, .. }
            | ListenerError::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ListenerError>;
