// Persistent readable interest that can be switched on and off.
use crate::common::error::Result;
use crate::core::event::event::Token;
use crate::core::event::event_loop::{EventHandler, Reactor};
use std::cell::Cell;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};

/// Created disabled. Enabling registers `fd` with the reactor, disabling
/// removes it again; neither touches the descriptor itself.
pub struct Registration {
    reactor: Rc<Reactor>,
    fd: RawFd,
    handler: Weak<dyn EventHandler>,
    token: Cell<Option<Token>>,
}

impl Registration {
    pub fn new(reactor: &Rc<Reactor>, fd: RawFd, handler: Weak<dyn EventHandler>) -> Self {
        Self {
            reactor: Rc::clone(reactor),
            fd,
            handler,
            token: Cell::new(None),
        }
    }

    pub fn enable(&self) -> Result<()> {
        if self.token.get().is_some() {
            return Ok(());
        }
        let token = self.reactor.register_read(self.fd, self.handler.clone())?;
        self.token.set(Some(token));
        Ok(())
    }

    pub fn disable(&self) -> Result<()> {
        match self.token.take() {
            Some(token) => self.reactor.unregister(token),
            None => Ok(()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.token.get().is_some()
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn reactor(&self) -> &Rc<Reactor> {
        &self.reactor
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let _ = self.disable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::net::FileDescriptor;

    struct Noop;

    impl EventHandler for Noop {
        fn on_readable(&self, _fd: RawFd) {}
    }

    #[test]
    fn test_enable_disable_are_idempotent() {
        let reactor = Reactor::new().unwrap();
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (r, _w) = (FileDescriptor::from_raw(fds[0]), FileDescriptor::from_raw(fds[1]));

        let handler = Rc::new(Noop);
        let weak: Weak<dyn EventHandler> = Rc::downgrade(&handler) as Weak<dyn EventHandler>;
        let reg = Registration::new(&reactor, r.as_raw_fd(), weak);
        assert!(!reg.is_enabled());

        reg.enable().unwrap();
        reg.enable().unwrap();
        assert!(reg.is_enabled());
        assert_eq!(reactor.registered_count(), 1);

        reg.disable().unwrap();
        reg.disable().unwrap();
        assert!(!reg.is_enabled());
        assert_eq!(reactor.registered_count(), 0);

        reg.enable().unwrap();
        drop(reg);
        assert_eq!(reactor.registered_count(), 0);
    }
}
