// Common test utilities shared by the integration tests

use std::cell::RefCell;
use std::net::{SocketAddr, TcpStream};
use std::rc::Rc;
use std::time::Duration;

use connlistener::{Listener, ListenerRef, Reactor, SockAddr, Socket};

/// Connections handed to a recording callback, in delivery order
pub type Accepted = Rc<RefCell<Vec<(Socket, SockAddr)>>>;

/// Loopback address with a kernel-chosen port
#[allow(dead_code)]
pub fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Callback that keeps every accepted connection
#[allow(dead_code)]
pub fn recorder() -> (Accepted, impl FnMut(&ListenerRef<'_>, Socket, SockAddr) + 'static) {
    let accepted: Accepted = Rc::new(RefCell::new(Vec::new()));
    let sink = accepted.clone();
    let callback = move |_lev: &ListenerRef<'_>, conn: Socket, peer: SockAddr| {
        sink.borrow_mut().push((conn, peer));
    };
    (accepted, callback)
}

/// The address a listener actually bound to
#[allow(dead_code)]
pub fn bound_addr(listener: &Listener) -> SocketAddr {
    listener
        .local_addr()
        .unwrap()
        .as_socket_addr()
        .expect("listener has an inet address")
}

/// Connect `count` clients; the handshake completes in the kernel backlog
#[allow(dead_code)]
pub fn connect_clients(addr: SocketAddr, count: usize) -> Vec<TcpStream> {
    (0..count)
        .map(|_| TcpStream::connect(addr).expect("Failed to connect to listener"))
        .collect()
}

/// Turn the reactor until `accepted` holds `count` connections
#[allow(dead_code)]
pub fn drive_until(reactor: &Rc<Reactor>, accepted: &Accepted, count: usize) -> bool {
    reactor
        .run_until(|| accepted.borrow().len() >= count, Duration::from_secs(5))
        .unwrap()
}

/// Turn the reactor for roughly `time` regardless of progress
#[allow(dead_code)]
pub fn idle(reactor: &Rc<Reactor>, time: Duration) {
    reactor.run_until(|| false, time).unwrap();
}

/// Peer addresses as seen by the clients themselves
#[allow(dead_code)]
pub fn client_addrs(clients: &[TcpStream]) -> Vec<SocketAddr> {
    clients.iter().map(|c| c.local_addr().unwrap()).collect()
}

/// Peer addresses delivered to the callback
#[allow(dead_code)]
pub fn delivered_peers(accepted: &Accepted) -> Vec<SocketAddr> {
    accepted
        .borrow()
        .iter()
        .map(|(_, peer)| peer.as_socket_addr().unwrap())
        .collect()
}
