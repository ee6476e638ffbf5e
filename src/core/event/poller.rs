use crate::common::error::{ListenerError, Result};
use crate::core::event::event::{Event, Token};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
compile_error!("the poller supports Linux (epoll) and macOS (kqueue) only");

/// Level-triggered readable-interest poller over `epoll` or `kqueue`.
pub struct Poller {
    #[cfg(target_os = "macos")]
    kq: RawFd,

    #[cfg(target_os = "linux")]
    epfd: RawFd,
}

#[cfg_attr(target_os = "macos", allow(dead_code))]
fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(t) => {
            // Round sub-millisecond waits up so they do not turn into busy polls.
            let ms = t.as_millis() + u128::from(t.subsec_nanos() % 1_000_000 != 0);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

impl Poller {
    pub fn new() -> Result<Self> {
        #[cfg(target_os = "macos")]
        {
            let kq = unsafe { libc::kqueue() };
            if kq < 0 {
                return Err(ListenerError::Reactor(format!(
                    "Failed to create kqueue: {}",
                    io::Error::last_os_error()
                )));
            }
            unsafe {
                libc::fcntl(kq, libc::F_SETFD, libc::FD_CLOEXEC);
            }
            Ok(Self { kq })
        }

        #[cfg(target_os = "linux")]
        {
            let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
            if epfd < 0 {
                return Err(ListenerError::Reactor(format!(
                    "Failed to create epoll instance: {}",
                    io::Error::last_os_error()
                )));
            }
            Ok(Self { epfd })
        }
    }

    pub fn register_read(&self, fd: RawFd, token: Token) -> Result<()> {
        #[cfg(target_os = "macos")]
        {
            self.kevent_change(fd, libc::EV_ADD | libc::EV_ENABLE, token.0)
                .map_err(|e| {
                    ListenerError::Reactor(format!("Failed to register fd {}: {}", fd, e))
                })
        }

        #[cfg(target_os = "linux")]
        {
            let mut ev = libc::epoll_event {
                events: libc::EPOLLIN as u32,
                u64: token.0 as u64,
            };
            unsafe {
                if libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut ev) < 0 {
                    let err = io::Error::last_os_error();
                    if err.raw_os_error() != Some(libc::EEXIST)
                        || libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, &mut ev) < 0
                    {
                        return Err(ListenerError::Reactor(format!(
                            "Failed to register fd {}: {}",
                            fd,
                            io::Error::last_os_error()
                        )));
                    }
                }
            }
            Ok(())
        }
    }

    pub fn unregister_read(&self, fd: RawFd) -> Result<()> {
        #[cfg(target_os = "macos")]
        let res = self.kevent_change(fd, libc::EV_DELETE, 0);

        #[cfg(target_os = "linux")]
        let res = {
            let ret = unsafe {
                libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
            };
            if ret < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        };

        match res {
            Ok(()) => Ok(()),
            // Already gone, e.g. the descriptor was closed first.
            Err(e) if matches!(e.raw_os_error(), Some(libc::ENOENT) | Some(libc::EBADF)) => Ok(()),
            Err(e) => Err(ListenerError::Reactor(format!(
                "Failed to unregister fd {}: {}",
                fd, e
            ))),
        }
    }

    #[cfg(target_os = "macos")]
    fn kevent_change(&self, fd: RawFd, flags: u16, token: usize) -> io::Result<()> {
        let kev = libc::kevent {
            ident: fd as libc::uintptr_t,
            filter: libc::EVFILT_READ,
            flags,
            fflags: 0,
            data: 0,
            udata: token as *mut libc::c_void,
        };
        let ret = unsafe {
            libc::kevent(
                self.kq,
                &kev,
                1,
                std::ptr::null_mut(),
                0,
                std::ptr::null(),
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Waits for readiness and appends up to `capacity` events to `events`.
    /// An interrupted wait returns zero events.
    pub fn wait(
        &self,
        events: &mut Vec<Event>,
        capacity: usize,
        timeout: Option<Duration>,
    ) -> Result<usize> {
        let capacity = capacity.max(1);

        #[cfg(target_os = "macos")]
        {
            let mut raw: Vec<libc::kevent> = vec![unsafe { std::mem::zeroed() }; capacity];
            let ts;
            let ts_ptr = match timeout {
                Some(t) => {
                    ts = libc::timespec {
                        tv_sec: t.as_secs() as libc::time_t,
                        tv_nsec: t.subsec_nanos() as libc::c_long,
                    };
                    &ts as *const libc::timespec
                }
                None => std::ptr::null(),
            };

            let n = unsafe {
                libc::kevent(
                    self.kq,
                    std::ptr::null(),
                    0,
                    raw.as_mut_ptr(),
                    capacity as libc::c_int,
                    ts_ptr,
                )
            };
            if n < 0 {
                return Self::wait_error();
            }

            for kev in &raw[..n as usize] {
                events.push(Event::new(
                    Token(kev.udata as usize),
                    kev.filter == libc::EVFILT_READ,
                    kev.flags & libc::EV_ERROR != 0,
                ));
            }
            Ok(n as usize)
        }

        #[cfg(target_os = "linux")]
        {
            let mut raw = vec![libc::epoll_event { events: 0, u64: 0 }; capacity];
            let n = unsafe {
                libc::epoll_wait(
                    self.epfd,
                    raw.as_mut_ptr(),
                    capacity as libc::c_int,
                    timeout_ms(timeout),
                )
            };
            if n < 0 {
                return Self::wait_error();
            }

            for ev in &raw[..n as usize] {
                let bits = ev.events;
                let token = ev.u64;
                let error = bits & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0;
                events.push(Event::new(
                    Token(token as usize),
                    bits & libc::EPOLLIN as u32 != 0 || error,
                    error,
                ));
            }
            Ok(n as usize)
        }
    }

    fn wait_error() -> Result<usize> {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(0);
        }
        Err(ListenerError::Reactor(format!(
            "Failed to wait for events: {}",
            err
        )))
    }

    pub fn as_raw_fd(&self) -> RawFd {
        #[cfg(target_os = "macos")]
        {
            self.kq
        }

        #[cfg(target_os = "linux")]
        {
            self.epfd
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.as_raw_fd());
        }
    }
}
