// Completion port for Unix, driven by readiness on the listening socket.
use crate::core::event::{EventHandler, Reactor, Token};
use crate::core::iocp::{
    read_address, write_address, AcceptCompletion, AcceptRequest, CompletionPort, Overlapped,
    PostResult,
};
use crate::core::net::fd::{cvt, FileDescriptor};
use crate::core::net::socket::{is_accept_retriable, local_addr_of};
use crate::core::net::SockAddr;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};

struct PendingAccept {
    candidate: RawFd,
    buffer: Vec<u8>,
    token: Rc<dyn Overlapped>,
}

struct ListenQueue {
    token: Token,
    pending: VecDeque<PendingAccept>,
}

/// Emulates completion-driven accepts on top of the reactor.
///
/// A posted accept completes immediately when a connection is already queued.
/// Otherwise it waits, in posting order, until the listening socket turns
/// readable. The accepted connection is moved onto the candidate descriptor
/// with `dup2`, so the caller's pre-created socket becomes the connection and
/// keeps its blocking mode.
pub struct PolledPort {
    reactor: Rc<Reactor>,
    me: Weak<PolledPort>,
    associated: RefCell<HashMap<RawFd, usize>>,
    contexts: RefCell<HashMap<RawFd, RawFd>>,
    queues: RefCell<HashMap<RawFd, ListenQueue>>,
}

impl PolledPort {
    pub fn new(reactor: &Rc<Reactor>) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            reactor: Rc::clone(reactor),
            me: me.clone(),
            associated: RefCell::new(HashMap::new()),
            contexts: RefCell::new(HashMap::new()),
            queues: RefCell::new(HashMap::new()),
        })
    }

    pub fn pending_count(&self, listener: RawFd) -> usize {
        self.queues
            .borrow()
            .get(&listener)
            .map_or(0, |q| q.pending.len())
    }

    pub fn is_associated(&self, socket: RawFd) -> bool {
        self.associated.borrow().contains_key(&socket)
    }

    fn enqueue(&self, listener: RawFd, pending: PendingAccept) -> io::Result<()> {
        let mut queues = self.queues.borrow_mut();
        if let Some(queue) = queues.get_mut(&listener) {
            queue.pending.push_back(pending);
            return Ok(());
        }

        let handler: Weak<dyn EventHandler> = self.me.clone();
        let token = self
            .reactor
            .register_read(listener, handler)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        let mut queue = ListenQueue {
            token,
            pending: VecDeque::new(),
        };
        queue.pending.push_back(pending);
        queues.insert(listener, queue);
        Ok(())
    }

    fn drop_queue(&self, listener: RawFd) -> Option<ListenQueue> {
        let queue = self.queues.borrow_mut().remove(&listener)?;
        let _ = self.reactor.unregister(queue.token);
        Some(queue)
    }

    /// Accepts one connection from `listener` into `candidate` and records
    /// both addresses in `buffer`.
    fn accept_into(listener: RawFd, candidate: RawFd, buffer: &mut [u8]) -> io::Result<()> {
        let mut remote = SockAddr::empty();
        let fd = cvt(unsafe { libc::accept(listener, remote.as_mut_ptr(), remote.len_mut()) })?;
        let accepted = FileDescriptor::from_raw(fd);

        let candidate_fd = FileDescriptor::new(candidate);
        let non_blocking = candidate_fd
            .is_non_blocking()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        loop {
            match cvt(unsafe { libc::dup2(accepted.as_raw_fd(), candidate) }) {
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        drop(accepted);

        candidate_fd
            .set_non_blocking_mode(non_blocking)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        let local = local_addr_of(candidate)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        let (first, second) = buffer.split_at_mut(buffer.len() / 2);
        write_address(first, &local)?;
        write_address(second, &remote)?;
        Ok(())
    }
}

impl CompletionPort for PolledPort {
    fn associate(&self, socket: RawFd, key: usize) -> io::Result<()> {
        self.associated.borrow_mut().insert(socket, key);
        Ok(())
    }

    fn update_accept_context(&self, candidate: RawFd, listener: RawFd) -> io::Result<()> {
        self.contexts.borrow_mut().insert(candidate, listener);
        Ok(())
    }

    fn post_accept(&self, mut request: AcceptRequest, token: Rc<dyn Overlapped>) -> PostResult {
        if !self.is_associated(request.candidate) {
            return PostResult::Failed(
                io::Error::new(io::ErrorKind::InvalidInput, "candidate socket is not associated"),
                request.buffer,
            );
        }
        if self.contexts.borrow().get(&request.candidate) != Some(&request.listener) {
            return PostResult::Failed(
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "candidate socket has no accept context for this listener",
                ),
                request.buffer,
            );
        }

        // Earlier requests get the earlier connections.
        if self.pending_count(request.listener) == 0 {
            match Self::accept_into(request.listener, request.candidate, &mut request.buffer) {
                Ok(()) => {
                    return PostResult::Completed(AcceptCompletion {
                        buffer: request.buffer,
                        result: Ok(()),
                    })
                }
                Err(e) if is_accept_retriable(&e) => {}
                Err(e) => return PostResult::Failed(e, request.buffer),
            }
        }

        let pending = PendingAccept {
            candidate: request.candidate,
            buffer: request.buffer,
            token,
        };
        let listener = request.listener;
        match self.enqueue(listener, pending) {
            Ok(()) => PostResult::Pending,
            Err(e) => PostResult::Failed(e, Vec::new()),
        }
    }

    fn cancel(&self, listener: RawFd) -> usize {
        let queue = match self.drop_queue(listener) {
            Some(queue) => queue,
            None => return 0,
        };
        let mut contexts = self.contexts.borrow_mut();
        for pending in &queue.pending {
            contexts.remove(&pending.candidate);
        }
        queue.pending.len()
    }

    fn split_addresses(&self, buffer: &[u8]) -> io::Result<(SockAddr, SockAddr)> {
        let (first, second) = buffer.split_at(buffer.len() / 2);
        Ok((read_address(first)?, read_address(second)?))
    }

    fn release(&self, candidate: RawFd) {
        self.associated.borrow_mut().remove(&candidate);
        self.contexts.borrow_mut().remove(&candidate);
    }
}

impl EventHandler for PolledPort {
    fn on_readable(&self, fd: RawFd) {
        // One request at a time: a completion may cancel or post on this
        // listener, so no borrow is held while it runs.
        loop {
            let next = {
                let mut queues = self.queues.borrow_mut();
                match queues.get_mut(&fd) {
                    Some(queue) => queue.pending.pop_front(),
                    None => return,
                }
            };
            let mut pending = match next {
                Some(pending) => pending,
                None => {
                    self.drop_queue(fd);
                    return;
                }
            };

            match Self::accept_into(fd, pending.candidate, &mut pending.buffer) {
                Ok(()) => pending.token.complete(AcceptCompletion {
                    buffer: pending.buffer,
                    result: Ok(()),
                }),
                Err(e) if is_accept_retriable(&e) => {
                    if let Some(queue) = self.queues.borrow_mut().get_mut(&fd) {
                        queue.pending.push_front(pending);
                    }
                    return;
                }
                Err(e) => pending.token.complete(AcceptCompletion {
                    buffer: pending.buffer,
                    result: Err(e),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::net::{setup_socket, Socket, SocketOptions};
    use std::cell::Cell;
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    #[derive(Default)]
    struct Collect {
        done: RefCell<Vec<AcceptCompletion>>,
    }

    impl Overlapped for Collect {
        fn complete(self: Rc<Self>, completion: AcceptCompletion) {
            self.done.borrow_mut().push(completion);
        }
    }

    fn listening() -> (Socket, SocketAddr) {
        let addr = SockAddr::from("127.0.0.1:0".parse::<SocketAddr>().unwrap());
        let socket = setup_socket(libc::AF_UNSPEC, Some(&addr), &SocketOptions::default()).unwrap();
        socket.listen(16).unwrap();
        let bound = socket.local_addr().unwrap().as_socket_addr().unwrap();
        (socket, bound)
    }

    fn candidate(port: &PolledPort, listener: RawFd) -> Socket {
        let socket = Socket::new(libc::AF_INET).unwrap();
        socket.set_non_blocking().unwrap();
        port.update_accept_context(socket.as_raw_fd(), listener).unwrap();
        port.associate(socket.as_raw_fd(), 0).unwrap();
        socket
    }

    fn request(listener: RawFd, candidate: &Socket) -> AcceptRequest {
        AcceptRequest {
            listener,
            candidate: candidate.as_raw_fd(),
            buffer: vec![0u8; (16 + 16) * 2],
        }
    }

    #[test]
    fn test_queued_connection_completes_immediately() {
        let reactor = Reactor::new().unwrap();
        let port = PolledPort::new(&reactor);
        let (listener, addr) = listening();
        let client = TcpStream::connect(addr).unwrap();

        let cand = candidate(&port, listener.as_raw_fd());
        let token = Rc::new(Collect::default());
        let result = port.post_accept(request(listener.as_raw_fd(), &cand), token.clone());

        let completion = match result {
            PostResult::Completed(c) => c,
            other => panic!("expected immediate completion, got {:?}", other),
        };
        assert!(completion.result.is_ok());
        let (local, remote) = port.split_addresses(&completion.buffer).unwrap();
        assert_eq!(local.as_socket_addr(), Some(addr));
        assert_eq!(remote.as_socket_addr(), Some(client.local_addr().unwrap()));

        // The candidate descriptor is now the connection and kept its mode.
        assert!(cand.is_non_blocking().unwrap());
        let stream = cand.into_tcp_stream();
        assert_eq!(stream.peer_addr().unwrap(), client.local_addr().unwrap());
    }

    #[test]
    fn test_pending_request_completes_on_readiness() {
        let reactor = Reactor::new().unwrap();
        let port = PolledPort::new(&reactor);
        let (listener, addr) = listening();

        let cand = candidate(&port, listener.as_raw_fd());
        let token = Rc::new(Collect::default());
        let result = port.post_accept(request(listener.as_raw_fd(), &cand), token.clone());
        assert!(matches!(result, PostResult::Pending));
        assert_eq!(port.pending_count(listener.as_raw_fd()), 1);

        let _client = TcpStream::connect(addr).unwrap();
        let done = reactor
            .run_until(|| !token.done.borrow().is_empty(), Duration::from_secs(2))
            .unwrap();
        assert!(done);
        assert!(token.done.borrow()[0].result.is_ok());
        assert_eq!(port.pending_count(listener.as_raw_fd()), 0);
        assert_eq!(reactor.registered_count(), 0);
    }

    #[test]
    fn test_cancel_drops_pending_requests() {
        let reactor = Reactor::new().unwrap();
        let port = PolledPort::new(&reactor);
        let (listener, addr) = listening();

        let cand = candidate(&port, listener.as_raw_fd());
        let token = Rc::new(Collect::default());
        port.post_accept(request(listener.as_raw_fd(), &cand), token.clone());
        assert_eq!(port.cancel(listener.as_raw_fd()), 1);
        assert_eq!(port.cancel(listener.as_raw_fd()), 0);

        let _client = TcpStream::connect(addr).unwrap();
        let turns = Cell::new(0);
        reactor
            .run_until(
                || {
                    turns.set(turns.get() + 1);
                    turns.get() > 3
                },
                Duration::from_secs(1),
            )
            .unwrap();
        assert!(token.done.borrow().is_empty());
    }

    #[test]
    fn test_unassociated_candidate_is_rejected() {
        let reactor = Reactor::new().unwrap();
        let port = PolledPort::new(&reactor);
        let (listener, _) = listening();
        let cand = Socket::new(libc::AF_INET).unwrap();
        let token = Rc::new(Collect::default());

        match port.post_accept(request(listener.as_raw_fd(), &cand), token) {
            PostResult::Failed(e, buffer) => {
                assert_eq!(e.kind(), io::ErrorKind::InvalidInput);
                assert_eq!(buffer.len(), 64);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_non_listening_socket_fails_post() {
        let reactor = Reactor::new().unwrap();
        let port = PolledPort::new(&reactor);
        let not_listening = Socket::new(libc::AF_INET).unwrap();
        let cand = candidate(&port, not_listening.as_raw_fd());
        let token = Rc::new(Collect::default());

        let result = port.post_accept(request(not_listening.as_raw_fd(), &cand), token);
        assert!(matches!(result, PostResult::Failed(..)));
    }
}
