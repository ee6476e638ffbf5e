use crate::common::error::{ListenerError, Result};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

/// Checks the return value of a libc call that signals failure with `-1`.
pub(crate) fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

pub struct FileDescriptor {
    fd: RawFd,
    owned: bool,
}

impl FileDescriptor {
    /// Borrowed descriptor, never closed by this wrapper.
    pub fn new(fd: RawFd) -> Self {
        Self { fd, owned: false }
    }

    /// Owned descriptor, closed on drop.
    pub fn from_raw(fd: RawFd) -> Self {
        Self { fd, owned: true }
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Gives up ownership without closing.
    pub fn into_raw_fd(mut self) -> RawFd {
        self.owned = false;
        self.fd
    }

    pub fn set_non_blocking(&self) -> Result<()> {
        self.set_non_blocking_mode(true)
    }

    pub fn set_non_blocking_mode(&self, non_blocking: bool) -> Result<()> {
        unsafe {
            let flags = libc::fcntl(self.fd, libc::F_GETFL);
            if flags < 0 {
                return Err(ListenerError::configure("F_GETFL"));
            }

            let wanted = if non_blocking {
                flags | libc::O_NONBLOCK
            } else {
                flags & !libc::O_NONBLOCK
            };
            if wanted != flags && libc::fcntl(self.fd, libc::F_SETFL, wanted) < 0 {
                return Err(ListenerError::configure("O_NONBLOCK"));
            }
        }
        Ok(())
    }

    pub fn is_non_blocking(&self) -> Result<bool> {
        let flags = unsafe { libc::fcntl(self.fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(ListenerError::configure("F_GETFL"));
        }
        Ok(flags & libc::O_NONBLOCK != 0)
    }

    pub fn set_close_on_exec(&self) -> Result<()> {
        unsafe {
            let flags = libc::fcntl(self.fd, libc::F_GETFD);
            if flags < 0 {
                return Err(ListenerError::configure("F_GETFD"));
            }
            if libc::fcntl(self.fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) < 0 {
                return Err(ListenerError::configure("FD_CLOEXEC"));
            }
        }
        Ok(())
    }

    pub fn is_close_on_exec(&self) -> Result<bool> {
        let flags = unsafe { libc::fcntl(self.fd, libc::F_GETFD) };
        if flags < 0 {
            return Err(ListenerError::configure("F_GETFD"));
        }
        Ok(flags & libc::FD_CLOEXEC != 0)
    }
}

impl AsRawFd for FileDescriptor {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for FileDescriptor {
    fn drop(&mut self) {
        if self.owned && self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}
