//! Stream connection listener over a single-threaded reactor.
//!
//! A [`Listener`] accepts connections on a listening socket and hands each
//! one to a callback, either by draining the socket whenever it turns
//! readable or by keeping accept requests posted on a
//! [`CompletionPort`](crate::core::iocp::CompletionPort).

pub mod application;
pub mod common;
pub mod core;

pub use crate::application::config::{Config, ConfigLoader, ListenerConfig};
pub use crate::application::listener::{
    AcceptCallback, BackendKind, Flags, Listener, ListenerBuilder, ListenerRef, RearmPolicy,
    SlotState,
};
pub use crate::common::error::{ListenerError, Result};
pub use crate::common::logger::{init_tracing, Diagnostics, Level, Logger, MemorySink};
pub use crate::core::event::Reactor;
pub use crate::core::iocp::{CompletionPort, PolledPort};
pub use crate::core::net::{setup_socket, SockAddr, Socket, SocketOptions};
