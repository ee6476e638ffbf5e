// Readiness-driven backend: persistent readable interest, drain on wake-up.
use crate::application::listener::{Flags, ListenerCore};
use crate::common::error::Result;
use crate::core::event::{EventHandler, Registration};
use crate::core::net::socket::{accept, is_accept_retriable};
use crate::core::net::Socket;
use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};

pub(crate) struct ReadinessBackend {
    fd: RawFd,
    socket: RefCell<Option<Socket>>,
    registration: Registration,
}

impl ReadinessBackend {
    /// The registration starts out disabled.
    pub(crate) fn new(core: &Rc<ListenerCore>, socket: Socket) -> Self {
        let fd = socket.as_raw_fd();
        let handler: Weak<dyn EventHandler> = Rc::downgrade(core) as Weak<dyn EventHandler>;
        Self {
            fd,
            socket: RefCell::new(Some(socket)),
            registration: Registration::new(core.reactor(), fd, handler),
        }
    }

    pub(crate) fn enable(&self) -> Result<()> {
        self.registration.enable()
    }

    pub(crate) fn disable(&self) -> Result<()> {
        self.registration.disable()
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.registration.is_enabled()
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn destroy(&self, core: &ListenerCore) -> Option<Socket> {
        if let Err(e) = self.registration.disable() {
            core.diagnostics()
                .warn(&format!("Couldn't unregister listener fd {}: {}", self.fd, e));
        }
        self.socket.borrow_mut().take()
    }

    /// Accepts until the backlog is empty, the accept call fails, or the
    /// callback disables or destroys the listener. Returns how many
    /// connections were handed over.
    pub(crate) fn drain(&self, core: &ListenerCore) -> usize {
        let mut accepted = 0;
        while self.is_enabled() && !core.is_destroyed() {
            match accept(self.fd) {
                Ok((socket, peer)) => {
                    if !core.flags().contains(Flags::LEAVE_SOCKETS_BLOCKING) {
                        if let Err(e) = socket.set_non_blocking() {
                            core.diagnostics().warn(&format!(
                                "Couldn't make accepted socket {} non-blocking: {}",
                                socket.as_raw_fd(),
                                e
                            ));
                        }
                    }
                    accepted += 1;
                    core.dispatch(socket, peer);
                }
                Err(e) if is_accept_retriable(&e) => break,
                Err(e) => {
                    core.diagnostics()
                        .warn(&format!("Error from accept() call on fd {}: {}", self.fd, e));
                    break;
                }
            }
        }
        accepted
    }
}
