use crate::common::error::{ListenerError, Result};
use crate::core::net::addr::SockAddr;
use crate::core::net::fd::{cvt, FileDescriptor};
use std::io;
use std::mem;
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

/// Options applied by [`setup_socket`] after the descriptor is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketOptions {
    pub close_on_exec: bool,
    pub keepalive: bool,
    pub reuse_address: bool,
}

/// Creates a non-blocking stream socket, applies `options` and binds it to
/// `addr` when one is given.
///
/// `family` may be `AF_UNSPEC`, in which case it is taken from `addr`. The
/// socket is not put into listening mode. On any failure after creation the
/// descriptor is closed before the error is returned.
pub fn setup_socket(
    family: libc::c_int,
    addr: Option<&SockAddr>,
    options: &SocketOptions,
) -> Result<Socket> {
    let family = match (family, addr) {
        (libc::AF_UNSPEC, Some(addr)) => addr.family(),
        (family, _) => family,
    };

    let socket = Socket::new(family)?;
    socket.set_non_blocking()?;

    if options.close_on_exec {
        socket.set_close_on_exec()?;
    }
    if options.keepalive {
        socket.set_keepalive(true)?;
    }
    if options.reuse_address {
        socket.set_reuse_address()?;
    }
    if let Some(addr) = addr {
        socket.bind(addr)?;
    }

    Ok(socket)
}

/// Returns true for accept errors that only mean "nothing to accept right now".
pub fn is_accept_retriable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
    )
}

/// Accepts one pending connection on `fd`. The accepted socket keeps whatever
/// blocking mode the platform gives it.
pub fn accept(fd: RawFd) -> io::Result<(Socket, SockAddr)> {
    let mut peer = SockAddr::empty();
    let new_fd = cvt(unsafe { libc::accept(fd, peer.as_mut_ptr(), peer.len_mut()) })?;
    Ok((Socket::from_fd(FileDescriptor::from_raw(new_fd)), peer))
}

pub(crate) fn local_addr_of(fd: RawFd) -> Result<SockAddr> {
    let mut addr = SockAddr::empty();
    cvt(unsafe { libc::getsockname(fd, addr.as_mut_ptr(), addr.len_mut()) })?;
    Ok(addr)
}

/// An owned stream socket descriptor. Closed on drop.
pub struct Socket {
    fd: FileDescriptor,
}

impl Socket {
    pub fn new(family: libc::c_int) -> Result<Self> {
        let fd = unsafe { libc::socket(family, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(ListenerError::SocketCreate(io::Error::last_os_error()));
        }
        Ok(Self::from_fd(FileDescriptor::from_raw(fd)))
    }

    fn from_fd(fd: FileDescriptor) -> Self {
        Self { fd }
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn set_non_blocking(&self) -> Result<()> {
        self.fd.set_non_blocking()
    }

    pub fn set_non_blocking_mode(&self, non_blocking: bool) -> Result<()> {
        self.fd.set_non_blocking_mode(non_blocking)
    }

    pub fn is_non_blocking(&self) -> Result<bool> {
        self.fd.is_non_blocking()
    }

    pub fn set_close_on_exec(&self) -> Result<()> {
        self.fd.set_close_on_exec()
    }

    pub fn is_close_on_exec(&self) -> Result<bool> {
        self.fd.is_close_on_exec()
    }

    pub fn set_keepalive(&self, on: bool) -> Result<()> {
        self.set_bool_option(libc::SO_KEEPALIVE, on, "SO_KEEPALIVE")
    }

    pub fn keepalive(&self) -> Result<bool> {
        self.bool_option(libc::SO_KEEPALIVE, "SO_KEEPALIVE")
    }

    pub fn set_reuse_address(&self) -> Result<()> {
        self.set_bool_option(libc::SO_REUSEADDR, true, "SO_REUSEADDR")
    }

    pub fn reuse_address(&self) -> Result<bool> {
        self.bool_option(libc::SO_REUSEADDR, "SO_REUSEADDR")
    }

    pub fn bind(&self, addr: &SockAddr) -> Result<()> {
        let ret = unsafe { libc::bind(self.as_raw_fd(), addr.as_ptr(), addr.socklen()) };
        if ret < 0 {
            return Err(ListenerError::Bind {
                addr: addr.to_string(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    pub fn listen(&self, backlog: i32) -> Result<()> {
        if unsafe { libc::listen(self.as_raw_fd(), backlog) } < 0 {
            return Err(ListenerError::Listen {
                backlog,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    pub fn accept(&self) -> io::Result<(Socket, SockAddr)> {
        accept(self.as_raw_fd())
    }

    pub fn local_addr(&self) -> Result<SockAddr> {
        local_addr_of(self.as_raw_fd())
    }

    pub fn into_tcp_stream(self) -> TcpStream {
        unsafe { TcpStream::from_raw_fd(self.into_raw_fd()) }
    }

    fn set_bool_option(&self, option: libc::c_int, on: bool, name: &'static str) -> Result<()> {
        let value: libc::c_int = on as libc::c_int;
        let ret = unsafe {
            libc::setsockopt(
                self.as_raw_fd(),
                libc::SOL_SOCKET,
                option,
                &value as *const _ as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(ListenerError::configure(name));
        }
        Ok(())
    }

    fn bool_option(&self, option: libc::c_int, name: &'static str) -> Result<bool> {
        let mut value: libc::c_int = 0;
        let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                self.as_raw_fd(),
                libc::SOL_SOCKET,
                option,
                &mut value as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if ret < 0 {
            return Err(ListenerError::configure(name));
        }
        Ok(value != 0)
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl IntoRawFd for Socket {
    fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}

impl FromRawFd for Socket {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Self::from_fd(FileDescriptor::from_raw(fd))
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket").field("fd", &self.as_raw_fd()).finish()
    }
}
