//! Connection listener: accepts stream connections on a listening socket and
//! hands each one to a callback.
//!
//! Two backends sit behind the same handle:
//!
//! * [`BackendKind::Readiness`] waits for the listening socket to become
//!   readable and then accepts until the backlog is empty.
//! * [`BackendKind::Completion`] keeps accept requests posted on a
//!   [`CompletionPort`](crate::core::iocp::CompletionPort), one per slot, and
//!   re-posts each slot after its request completes.
//!
//! Everything runs on the thread that owns the [`Reactor`]. Accepted sockets
//! belong to the callback; the listener never touches them after handing
//! them over.

pub mod builder;
pub mod completion;
pub mod flags;
pub mod readiness;

use crate::common::constants::{DEFAULT_MAX_REARM_ATTEMPTS, DEFAULT_REARM_BACKOFF_MS};
use crate::common::error::{ListenerError, Result};
use crate::common::logger::Diagnostics;
use crate::common::time::Backoff;
use crate::core::event::{EventHandler, Reactor};
use crate::core::net::socket::local_addr_of;
use crate::core::net::{SockAddr, Socket};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, OnceCell, RefCell};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::os::unix::io::{IntoRawFd, RawFd};
use std::rc::{Rc, Weak};
use std::time::Duration;

pub use builder::ListenerBuilder;
pub use completion::SlotState;
pub use flags::Flags;

use completion::CompletionBackend;
use readiness::ReadinessBackend;

/// Called once per accepted connection with the listener, the connection and
/// the peer's address.
pub type AcceptCallback = Box<dyn FnMut(&ListenerRef<'_>, Socket, SockAddr)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Completion-driven when a completion port is supplied, readiness-driven
    /// otherwise.
    #[default]
    Auto,
    Readiness,
    Completion,
}

/// How a completion slot that failed to post is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RearmPolicy {
    /// Delay before the first retry; doubles on each further retry.
    pub backoff: Duration,
    /// Total attempts, the failed one included, before the slot is abandoned.
    pub max_attempts: u32,
}

impl RearmPolicy {
    pub fn schedule(&self) -> Backoff {
        Backoff::new(self.backoff, self.max_attempts)
    }
}

impl Default for RearmPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(DEFAULT_REARM_BACKOFF_MS),
            max_attempts: DEFAULT_MAX_REARM_ATTEMPTS,
        }
    }
}

pub(crate) enum Backend {
    Readiness(ReadinessBackend),
    Completion(CompletionBackend),
}

impl Backend {
    fn enable(&self, core: &ListenerCore) -> Result<()> {
        match self {
            Backend::Readiness(b) => b.enable(),
            Backend::Completion(b) => b.enable(core),
        }
    }

    fn disable(&self) -> Result<()> {
        match self {
            Backend::Readiness(b) => b.disable(),
            Backend::Completion(b) => b.disable(),
        }
    }

    fn destroy(&self, core: &ListenerCore) -> Option<Socket> {
        match self {
            Backend::Readiness(b) => b.destroy(core),
            Backend::Completion(b) => b.destroy(),
        }
    }

    fn fd(&self) -> RawFd {
        match self {
            Backend::Readiness(b) => b.fd(),
            Backend::Completion(b) => b.fd(),
        }
    }

    fn is_enabled(&self) -> bool {
        match self {
            Backend::Readiness(b) => b.is_enabled(),
            Backend::Completion(b) => b.is_enabled(),
        }
    }

    fn kind(&self) -> BackendKind {
        match self {
            Backend::Readiness(_) => BackendKind::Readiness,
            Backend::Completion(_) => BackendKind::Completion,
        }
    }
}

/// State shared by a [`Listener`], its backend and the reactor.
pub(crate) struct ListenerCore {
    me: Weak<ListenerCore>,
    reactor: Rc<Reactor>,
    callback: RefCell<AcceptCallback>,
    flags: Flags,
    diagnostics: Rc<dyn Diagnostics>,
    backend: OnceCell<Backend>,
    destroyed: Cell<bool>,
    /// Accepted connections waiting for the callback, oldest first.
    parked: RefCell<VecDeque<(Socket, SockAddr)>>,
    flush_scheduled: Cell<bool>,
}

impl ListenerCore {
    pub(crate) fn new(
        reactor: &Rc<Reactor>,
        callback: AcceptCallback,
        flags: Flags,
        diagnostics: Rc<dyn Diagnostics>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            reactor: Rc::clone(reactor),
            callback: RefCell::new(callback),
            flags,
            diagnostics,
            backend: OnceCell::new(),
            destroyed: Cell::new(false),
            parked: RefCell::new(VecDeque::new()),
            flush_scheduled: Cell::new(false),
        })
    }

    /// Binds the backend. Happens exactly once, before the handle is
    /// returned to the caller.
    pub(crate) fn install(&self, backend: Backend) -> Result<()> {
        self.backend
            .set(backend)
            .map_err(|_| ListenerError::Backend("backend is already installed".to_string()))
    }

    fn backend(&self) -> Result<&Backend> {
        self.backend
            .get()
            .ok_or_else(|| ListenerError::Backend("no backend installed".to_string()))
    }

    pub(crate) fn completion(&self) -> Option<&CompletionBackend> {
        match self.backend.get() {
            Some(Backend::Completion(b)) => Some(b),
            _ => None,
        }
    }

    pub(crate) fn weak(&self) -> Weak<ListenerCore> {
        self.me.clone()
    }

    pub(crate) fn reactor(&self) -> &Rc<Reactor> {
        &self.reactor
    }

    pub(crate) fn flags(&self) -> Flags {
        self.flags
    }

    pub(crate) fn diagnostics(&self) -> &dyn Diagnostics {
        self.diagnostics.as_ref()
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    fn enable(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(ListenerError::Backend(
                "listener has been destroyed".to_string(),
            ));
        }
        self.backend()?.enable(self)?;
        if !self.parked.borrow().is_empty() {
            self.schedule_flush();
        }
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        if self.is_destroyed() {
            return Ok(());
        }
        self.backend()?.disable()
    }

    fn is_enabled(&self) -> bool {
        !self.is_destroyed() && self.backend.get().map_or(false, Backend::is_enabled)
    }

    fn fd(&self) -> RawFd {
        self.backend.get().map_or(-1, Backend::fd)
    }

    /// Tears the backend down. Returns the listening socket unless it was
    /// closed because of [`Flags::CLOSE_ON_FREE`]; repeated calls return
    /// `None`.
    fn destroy(&self) -> Option<Socket> {
        if self.destroyed.replace(true) {
            return None;
        }
        self.parked.borrow_mut().clear();
        let socket = self.backend.get().and_then(|b| b.destroy(self));
        match socket {
            Some(socket) if self.flags.contains(Flags::CLOSE_ON_FREE) => {
                drop(socket);
                None
            }
            other => other,
        }
    }

    /// Hands an accepted connection to the callback. If the callback is
    /// already running further up the stack the connection is parked and
    /// delivered from the reactor later, and only while the listener is
    /// enabled.
    pub(crate) fn dispatch(&self, socket: Socket, peer: SockAddr) {
        if self.is_destroyed() {
            return;
        }
        self.parked.borrow_mut().push_back((socket, peer));
        self.flush_parked();
    }

    fn flush_parked(&self) {
        loop {
            if self.is_destroyed() {
                self.parked.borrow_mut().clear();
                return;
            }
            if !self.is_enabled() {
                return;
            }
            let mut callback = match self.callback.try_borrow_mut() {
                Ok(callback) => callback,
                Err(_) => {
                    self.schedule_flush();
                    return;
                }
            };
            let next = self.parked.borrow_mut().pop_front();
            let (socket, peer) = match next {
                Some(next) => next,
                None => return,
            };
            let handle = ListenerRef { core: self };
            (*callback)(&handle, socket, peer);
        }
    }

    fn schedule_flush(&self) {
        if self.flush_scheduled.replace(true) {
            return;
        }
        let me = self.weak();
        self.reactor.defer(move || {
            if let Some(core) = me.upgrade() {
                core.flush_scheduled.set(false);
                core.flush_parked();
            }
        });
    }
}

impl EventHandler for ListenerCore {
    fn on_readable(&self, _fd: RawFd) {
        if let Some(Backend::Readiness(backend)) = self.backend.get() {
            backend.drain(self);
        }
    }
}

/// Owning handle to a listener. Dropping it destroys the listener.
pub struct Listener {
    core: Rc<ListenerCore>,
}

impl Listener {
    /// Starts listening on `socket` with `backlog` (negative means 128,
    /// zero is rejected) and begins accepting right away.
    ///
    /// The listener takes `socket` over even when construction fails: on
    /// any error, a failed `listen()` included, the descriptor is closed
    /// before this returns.
    pub fn new<F>(
        reactor: &Rc<Reactor>,
        on_accept: F,
        flags: Flags,
        backlog: i32,
        socket: Socket,
    ) -> Result<Self>
    where
        F: FnMut(&ListenerRef<'_>, Socket, SockAddr) + 'static,
    {
        ListenerBuilder::new(reactor)
            .flags(flags)
            .backlog(backlog)
            .build(socket, on_accept)
    }

    /// Creates a socket, binds it to `addr` and starts listening on it.
    /// Keepalive is always enabled; reuse and close-on-exec follow `flags`.
    pub fn bind<F>(
        reactor: &Rc<Reactor>,
        on_accept: F,
        flags: Flags,
        backlog: i32,
        addr: Option<SocketAddr>,
    ) -> Result<Self>
    where
        F: FnMut(&ListenerRef<'_>, Socket, SockAddr) + 'static,
    {
        ListenerBuilder::new(reactor)
            .flags(flags)
            .backlog(backlog)
            .bind(addr, on_accept)
    }

    pub fn builder(reactor: &Rc<Reactor>) -> ListenerBuilder {
        ListenerBuilder::new(reactor)
    }

    pub(crate) fn from_core(core: Rc<ListenerCore>) -> Self {
        Self { core }
    }

    pub fn enable(&self) -> Result<()> {
        self.core.enable()
    }

    pub fn disable(&self) -> Result<()> {
        self.core.disable()
    }

    /// Stops accepting and releases backend resources. The listening socket
    /// is closed if [`Flags::CLOSE_ON_FREE`] is set, otherwise it is
    /// returned to the caller.
    pub fn destroy(self) -> Option<Socket> {
        self.core.destroy()
    }

    pub fn fd(&self) -> RawFd {
        self.core.fd()
    }

    pub fn reactor(&self) -> &Rc<Reactor> {
        self.core.reactor()
    }

    pub fn flags(&self) -> Flags {
        self.core.flags()
    }

    pub fn is_enabled(&self) -> bool {
        self.core.is_enabled()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.core.backend.get().map_or(BackendKind::Auto, Backend::kind)
    }

    /// Live accepting slots of a completion-driven listener.
    pub fn capacity(&self) -> Option<usize> {
        self.core.completion().map(CompletionBackend::capacity)
    }

    pub fn slot_states(&self) -> Option<Vec<SlotState>> {
        self.core.completion().map(CompletionBackend::slot_states)
    }

    pub fn local_addr(&self) -> Result<SockAddr> {
        local_addr_of(self.fd())
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(socket) = self.core.destroy() {
            // Without CLOSE_ON_FREE the descriptor stays open for its owner.
            let _ = socket.into_raw_fd();
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("fd", &self.fd())
            .field("backend", &self.backend_kind())
            .field("flags", &self.flags())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Borrowed handle passed to the accept callback.
pub struct ListenerRef<'a> {
    core: &'a ListenerCore,
}

impl ListenerRef<'_> {
    pub fn enable(&self) -> Result<()> {
        self.core.enable()
    }

    /// Stops acceptance, including the rest of the current drain.
    pub fn disable(&self) -> Result<()> {
        self.core.disable()
    }

    /// Destroys the listener from inside its callback. This must be the last
    /// call made on it. Without [`Flags::CLOSE_ON_FREE`] the listening
    /// descriptor is left open.
    pub fn destroy(&self) {
        if let Some(socket) = self.core.destroy() {
            let _ = socket.into_raw_fd();
        }
    }

    pub fn fd(&self) -> RawFd {
        self.core.fd()
    }

    pub fn reactor(&self) -> &Rc<Reactor> {
        self.core.reactor()
    }

    pub fn flags(&self) -> Flags {
        self.core.flags()
    }

    pub fn is_enabled(&self) -> bool {
        self.core.is_enabled()
    }
}
