// Readiness-driven listener: end-to-end acceptance over loopback

use std::cell::Cell;
use std::io::ErrorKind;
use std::net::TcpStream;
use std::rc::Rc;
use std::time::Duration;

use connlistener::{
    setup_socket, BackendKind, Flags, Listener, ListenerError, ListenerRef, Reactor, SockAddr,
    Socket, SocketOptions,
};

mod common;
use common::{
    bound_addr, client_addrs, connect_clients, delivered_peers, drive_until, idle, loopback,
    recorder,
};

#[test]
fn test_three_clients_drained_in_one_wakeup() {
    let reactor = Reactor::new().unwrap();
    let (accepted, on_accept) = recorder();
    let listener =
        Listener::bind(&reactor, on_accept, Flags::REUSEABLE, 16, Some(loopback())).unwrap();
    assert_eq!(listener.backend_kind(), BackendKind::Readiness);

    let clients = connect_clients(bound_addr(&listener), 3);
    reactor.turn(Some(Duration::from_secs(2))).unwrap();

    // One readiness notification, whole backlog, kernel queue order.
    assert_eq!(accepted.borrow().len(), 3);
    assert_eq!(delivered_peers(&accepted), client_addrs(&clients));
}

#[test]
fn test_delivered_sockets_are_non_blocking() {
    let reactor = Reactor::new().unwrap();
    let (accepted, on_accept) = recorder();
    let listener = Listener::bind(&reactor, on_accept, Flags::empty(), 16, Some(loopback())).unwrap();

    let _clients = connect_clients(bound_addr(&listener), 2);
    assert!(drive_until(&reactor, &accepted, 2));
    for (conn, _) in accepted.borrow().iter() {
        assert!(conn.is_non_blocking().unwrap());
    }
}

// BSD accept() hands back the listener's O_NONBLOCK, so only Linux gives a
// blocking socket here.
#[cfg(target_os = "linux")]
#[test]
fn test_leave_sockets_blocking_keeps_accept_mode() {
    let reactor = Reactor::new().unwrap();
    let (accepted, on_accept) = recorder();
    let listener = Listener::bind(
        &reactor,
        on_accept,
        Flags::LEAVE_SOCKETS_BLOCKING,
        16,
        Some(loopback()),
    )
    .unwrap();

    let _clients = connect_clients(bound_addr(&listener), 1);
    assert!(drive_until(&reactor, &accepted, 1));
    assert!(!accepted.borrow()[0].0.is_non_blocking().unwrap());
}

#[test]
fn test_close_on_free_closes_listening_socket() {
    let reactor = Reactor::new().unwrap();
    let (_accepted, on_accept) = recorder();
    let listener =
        Listener::bind(&reactor, on_accept, Flags::CLOSE_ON_FREE, -1, Some(loopback())).unwrap();
    let addr = bound_addr(&listener);

    assert!(listener.destroy().is_none());
    let err = TcpStream::connect(addr).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
}

#[test]
fn test_socket_survives_destroy_without_close_on_free() {
    let reactor = Reactor::new().unwrap();
    let (accepted, on_accept) = recorder();
    let listener = Listener::bind(&reactor, on_accept, Flags::empty(), -1, Some(loopback())).unwrap();
    let addr = bound_addr(&listener);

    let socket = listener.destroy().expect("socket is handed back");
    let _client = TcpStream::connect(addr).unwrap();
    idle(&reactor, Duration::from_millis(50));
    assert!(accepted.borrow().is_empty());

    // Still listening, just no longer watched.
    assert!(socket.accept().is_ok());
}

#[test]
fn test_dropping_handle_without_close_on_free_leaves_fd_open() {
    let reactor = Reactor::new().unwrap();
    let socket = setup_socket(
        libc::AF_INET,
        Some(&SockAddr::from(loopback())),
        &SocketOptions::default(),
    )
    .unwrap();
    let (_accepted, on_accept) = recorder();
    let listener = Listener::new(&reactor, on_accept, Flags::empty(), 8, socket).unwrap();
    let fd = listener.fd();
    let addr = bound_addr(&listener);
    drop(listener);

    assert!(TcpStream::connect(addr).is_ok());
    unsafe { libc::close(fd) };
}

#[test]
fn test_disable_and_enable() {
    let reactor = Reactor::new().unwrap();
    let (accepted, on_accept) = recorder();
    let listener = Listener::bind(&reactor, on_accept, Flags::empty(), -1, Some(loopback())).unwrap();

    listener.disable().unwrap();
    assert!(!listener.is_enabled());
    let _clients = connect_clients(bound_addr(&listener), 1);
    idle(&reactor, Duration::from_millis(50));
    assert!(accepted.borrow().is_empty());

    listener.enable().unwrap();
    assert!(drive_until(&reactor, &accepted, 1));
}

#[test]
fn test_disable_from_callback_stops_the_drain() {
    let reactor = Reactor::new().unwrap();
    let seen = Rc::new(Cell::new(0));
    let counter = seen.clone();
    let listener = Listener::bind(
        &reactor,
        move |lev: &ListenerRef<'_>, _conn: Socket, _peer: SockAddr| {
            counter.set(counter.get() + 1);
            lev.disable().unwrap();
        },
        Flags::empty(),
        -1,
        Some(loopback()),
    )
    .unwrap();

    let _clients = connect_clients(bound_addr(&listener), 3);
    reactor.turn(Some(Duration::from_secs(2))).unwrap();
    assert_eq!(seen.get(), 1);
    assert!(!listener.is_enabled());

    listener.enable().unwrap();
    reactor.turn(Some(Duration::from_secs(2))).unwrap();
    assert_eq!(seen.get(), 2);
}

#[test]
fn test_destroy_from_callback() {
    let reactor = Reactor::new().unwrap();
    let seen = Rc::new(Cell::new(0));
    let counter = seen.clone();
    let listener = Listener::bind(
        &reactor,
        move |lev: &ListenerRef<'_>, _conn: Socket, _peer: SockAddr| {
            counter.set(counter.get() + 1);
            lev.destroy();
        },
        Flags::CLOSE_ON_FREE,
        -1,
        Some(loopback()),
    )
    .unwrap();
    let addr = bound_addr(&listener);

    let _clients = connect_clients(addr, 2);
    reactor.turn(Some(Duration::from_secs(2))).unwrap();
    assert_eq!(seen.get(), 1);
    assert!(!listener.is_enabled());
    assert_eq!(reactor.registered_count(), 0);
    assert!(listener.enable().is_err());

    drop(listener);
    assert!(TcpStream::connect(addr).is_err());
}

#[test]
fn test_zero_backlog_is_rejected() {
    let reactor = Reactor::new().unwrap();
    let (_accepted, on_accept) = recorder();
    let err = Listener::bind(&reactor, on_accept, Flags::empty(), 0, Some(loopback())).unwrap_err();
    assert!(matches!(err, ListenerError::InvalidBacklog(0)));

    let socket = setup_socket(
        libc::AF_INET,
        Some(&SockAddr::from(loopback())),
        &SocketOptions::default(),
    )
    .unwrap();
    let (_accepted, on_accept) = recorder();
    let err = Listener::new(&reactor, on_accept, Flags::empty(), 0, socket).unwrap_err();
    assert!(matches!(err, ListenerError::InvalidBacklog(0)));
}

#[test]
fn test_ipv6_loopback() {
    let reactor = Reactor::new().unwrap();
    let (accepted, on_accept) = recorder();
    let listener = match Listener::bind(
        &reactor,
        on_accept,
        Flags::CLOSE_ON_FREE,
        -1,
        Some("[::1]:0".parse().unwrap()),
    ) {
        Ok(l) => l,
        // Hosts without IPv6
        Err(_) => return,
    };

    let clients = connect_clients(bound_addr(&listener), 1);
    assert!(drive_until(&reactor, &accepted, 1));
    assert_eq!(delivered_peers(&accepted), client_addrs(&clients));
}
