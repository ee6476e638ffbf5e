use crate::application::config::ListenerConfig;
use crate::application::listener::completion::CompletionBackend;
use crate::application::listener::readiness::ReadinessBackend;
use crate::application::listener::{
    Backend, BackendKind, Flags, Listener, ListenerCore, ListenerRef, RearmPolicy,
};
use crate::common::constants::{DEFAULT_ACCEPTING_SLOTS, DEFAULT_BACKLOG};
use crate::common::error::{ListenerError, Result};
use crate::common::logger::{Diagnostics, Logger};
use crate::core::event::Reactor;
use crate::core::iocp::{CompletionPort, PolledPort};
use crate::core::net::{setup_socket, SockAddr, Socket, SocketOptions};
use std::net::SocketAddr;
use std::rc::Rc;

/// Builds a [`Listener`].
///
/// ```no_run
/// use connlistener::{Flags, Listener, Reactor};
///
/// let reactor = Reactor::new()?;
/// let listener = Listener::builder(&reactor)
///     .flags(Flags::CLOSE_ON_FREE | Flags::REUSEABLE)
///     .backlog(64)
///     .bind(Some("127.0.0.1:8080".parse().unwrap()), |_lev, conn, peer| {
///         println!("connection {:?} from {}", conn, peer);
///     })?;
/// # Ok::<(), connlistener::ListenerError>(())
/// ```
pub struct ListenerBuilder {
    reactor: Rc<Reactor>,
    flags: Flags,
    backlog: i32,
    backend: BackendKind,
    slots: usize,
    port: Option<Rc<dyn CompletionPort>>,
    diagnostics: Rc<dyn Diagnostics>,
    rearm: RearmPolicy,
}

impl ListenerBuilder {
    pub fn new(reactor: &Rc<Reactor>) -> Self {
        Self {
            reactor: Rc::clone(reactor),
            flags: Flags::empty(),
            backlog: -1,
            backend: BackendKind::Auto,
            slots: DEFAULT_ACCEPTING_SLOTS,
            port: None,
            diagnostics: Rc::new(Logger),
            rearm: RearmPolicy::default(),
        }
    }

    /// Seeds every setting from one `[[listeners]]` entry.
    pub fn from_config(reactor: &Rc<Reactor>, config: &ListenerConfig) -> Self {
        Self::new(reactor)
            .flags(config.flags())
            .backlog(config.backlog)
            .backend(config.backend)
            .slots(config.slots)
            .rearm_policy(config.rearm_policy())
    }

    pub fn flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    /// Negative means the default of 128. Zero is rejected at build time.
    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Accepting slots for the completion backend.
    pub fn slots(mut self, slots: usize) -> Self {
        self.slots = slots;
        self
    }

    pub fn completion_port(mut self, port: Rc<dyn CompletionPort>) -> Self {
        self.port = Some(port);
        self
    }

    pub fn diagnostics(mut self, diagnostics: Rc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn rearm_policy(mut self, policy: RearmPolicy) -> Self {
        self.rearm = policy;
        self
    }

    fn effective_backlog(&self) -> Result<i32> {
        match self.backlog {
            0 => Err(ListenerError::InvalidBacklog(0)),
            b if b < 0 => Ok(DEFAULT_BACKLOG),
            b => Ok(b),
        }
    }

    fn resolved_backend(&self) -> BackendKind {
        match self.backend {
            BackendKind::Auto if self.port.is_some() => BackendKind::Completion,
            BackendKind::Auto => BackendKind::Readiness,
            other => other,
        }
    }

    /// Puts `socket` into the listening state and starts accepting on it.
    /// The socket is expected to be non-blocking already. On failure it is
    /// closed.
    pub fn build<F>(self, socket: Socket, on_accept: F) -> Result<Listener>
    where
        F: FnMut(&ListenerRef<'_>, Socket, SockAddr) + 'static,
    {
        let backlog = self.effective_backlog()?;
        socket.listen(backlog)?;

        let kind = self.resolved_backend();
        let fd = socket.as_raw_fd();
        let core = ListenerCore::new(
            &self.reactor,
            Box::new(on_accept),
            self.flags,
            Rc::clone(&self.diagnostics),
        );

        let backend = match kind {
            BackendKind::Completion => {
                let port: Rc<dyn CompletionPort> = match self.port {
                    Some(port) => port,
                    None => PolledPort::new(&self.reactor),
                };
                port.associate(fd, 0)
                    .map_err(|source| ListenerError::Configure {
                        option: "completion port",
                        source,
                    })?;
                Backend::Completion(CompletionBackend::new(
                    &core, socket, port, self.slots, self.rearm,
                )?)
            }
            _ => Backend::Readiness(ReadinessBackend::new(&core, socket)),
        };
        core.install(backend)?;

        let listener = Listener::from_core(core);
        if let Err(e) = listener.enable() {
            // Close the socket whatever the flags say; the caller never got it.
            drop(listener.destroy());
            return Err(e);
        }

        self.diagnostics.debug(&format!(
            "Listening on fd {} ({:?}, backlog {}, {:?})",
            fd, kind, backlog, self.flags
        ));
        Ok(listener)
    }

    /// Creates a socket for `addr`, binds it and starts accepting on it.
    /// Keepalive is always enabled. With no address the socket is an IPv4
    /// one bound by the kernel on `listen`.
    pub fn bind<F>(self, addr: Option<SocketAddr>, on_accept: F) -> Result<Listener>
    where
        F: FnMut(&ListenerRef<'_>, Socket, SockAddr) + 'static,
    {
        self.effective_backlog()?;

        let options = SocketOptions {
            close_on_exec: self.flags.contains(Flags::CLOSE_ON_EXEC),
            keepalive: true,
            reuse_address: self.flags.contains(Flags::REUSEABLE),
        };
        let socket = match addr {
            Some(addr) => setup_socket(libc::AF_UNSPEC, Some(&SockAddr::from(addr)), &options)?,
            None => setup_socket(libc::AF_INET, None, &options)?,
        };
        self.build(socket, on_accept)
    }
}

impl std::fmt::Debug for ListenerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerBuilder")
            .field("flags", &self.flags)
            .field("backlog", &self.backlog)
            .field("backend", &self.backend)
            .field("slots", &self.slots)
            .field("custom_port", &self.port.is_some())
            .field("rearm", &self.rearm)
            .finish()
    }
}
