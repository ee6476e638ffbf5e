use std::fmt;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// A socket address in the platform's native `sockaddr` representation.
#[derive(Clone, Copy)]
pub struct SockAddr {
    storage: libc::sockaddr_storage,
    len: libc::socklen_t,
}

impl SockAddr {
    /// Zeroed storage sized for any family, ready to be filled by the OS.
    pub fn empty() -> Self {
        Self {
            storage: unsafe { mem::zeroed() },
            len: mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t,
        }
    }

    /// Copies a raw `sockaddr` out of `bytes`. Returns `None` if the slice
    /// cannot hold a family field or does not fit in `sockaddr_storage`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let min = mem::size_of::<libc::sa_family_t>();
        if bytes.len() < min || bytes.len() > mem::size_of::<libc::sockaddr_storage>() {
            return None;
        }
        let mut addr = Self::empty();
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                &mut addr.storage as *mut _ as *mut u8,
                bytes.len(),
            );
        }
        addr.len = bytes.len() as libc::socklen_t;
        Some(addr)
    }

    pub fn family(&self) -> libc::c_int {
        self.storage.ss_family as libc::c_int
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(&self.storage as *const _ as *const u8, self.len()) }
    }

    pub fn as_socket_addr(&self) -> Option<SocketAddr> {
        match self.family() {
            libc::AF_INET if self.len() >= mem::size_of::<libc::sockaddr_in>() => {
                let sin = unsafe { &*(self.as_ptr() as *const libc::sockaddr_in) };
                let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
                Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
            }
            libc::AF_INET6 if self.len() >= mem::size_of::<libc::sockaddr_in6>() => {
                let sin6 = unsafe { &*(self.as_ptr() as *const libc::sockaddr_in6) };
                Some(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                    u16::from_be(sin6.sin6_port),
                    sin6.sin6_flowinfo,
                    sin6.sin6_scope_id,
                )))
            }
            _ => None,
        }
    }

    pub(crate) fn as_ptr(&self) -> *const libc::sockaddr {
        &self.storage as *const _ as *const libc::sockaddr
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut libc::sockaddr {
        &mut self.storage as *mut _ as *mut libc::sockaddr
    }

    pub(crate) fn len_mut(&mut self) -> &mut libc::socklen_t {
        &mut self.len
    }

    pub(crate) fn socklen(&self) -> libc::socklen_t {
        self.len
    }
}

/// Size of the native address structure for `family`, for the families a
/// stream listener can accept on.
pub fn address_len(family: libc::c_int) -> Option<usize> {
    match family {
        libc::AF_INET => Some(mem::size_of::<libc::sockaddr_in>()),
        libc::AF_INET6 => Some(mem::size_of::<libc::sockaddr_in6>()),
        _ => None,
    }
}

impl From<SocketAddr> for SockAddr {
    fn from(addr: SocketAddr) -> Self {
        let mut out = Self::empty();
        match addr {
            SocketAddr::V4(a) => {
                let sin = unsafe { &mut *(out.as_mut_ptr() as *mut libc::sockaddr_in) };
                sin.sin_family = libc::AF_INET as libc::sa_family_t;
                sin.sin_port = a.port().to_be();
                sin.sin_addr = libc::in_addr {
                    s_addr: u32::from_ne_bytes(a.ip().octets()),
                };
                #[cfg(target_os = "macos")]
                {
                    sin.sin_len = mem::size_of::<libc::sockaddr_in>() as u8;
                }
                out.len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
            }
            SocketAddr::V6(a) => {
                let sin6 = unsafe { &mut *(out.as_mut_ptr() as *mut libc::sockaddr_in6) };
                sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                sin6.sin6_port = a.port().to_be();
                sin6.sin6_flowinfo = a.flowinfo();
                sin6.sin6_addr = libc::in6_addr {
                    s6_addr: a.ip().octets(),
                };
                sin6.sin6_scope_id = a.scope_id();
                #[cfg(target_os = "macos")]
                {
                    sin6.sin6_len = mem::size_of::<libc::sockaddr_in6>() as u8;
                }
                out.len = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
            }
        }
        out
    }
}

impl fmt::Debug for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_socket_addr() {
            Some(addr) => write!(f, "{}", addr),
            None => write!(f, "<family {}, {} bytes>", self.family(), self.len()),
        }
    }
}

impl fmt::Display for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl PartialEq for SockAddr {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for SockAddr {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_conversion() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let sa = SockAddr::from(addr);
        assert_eq!(sa.family(), libc::AF_INET);
        assert_eq!(sa.len(), mem::size_of::<libc::sockaddr_in>());
        assert_eq!(sa.as_socket_addr(), Some(addr));
    }

    #[test]
    fn test_ipv6_conversion() {
        let addr: SocketAddr = "[::1]:443".parse().unwrap();
        let sa = SockAddr::from(addr);
        assert_eq!(sa.family(), libc::AF_INET6);
        assert_eq!(sa.as_socket_addr(), Some(addr));
    }

    #[test]
    fn test_from_bytes_copies_native_layout() {
        let sa = SockAddr::from("10.1.2.3:99".parse::<SocketAddr>().unwrap());
        let copy = SockAddr::from_bytes(sa.as_bytes()).unwrap();
        assert_eq!(copy, sa);
        assert_eq!(copy.to_string(), "10.1.2.3:99");
    }

    #[test]
    fn test_from_bytes_rejects_bad_lengths() {
        assert!(SockAddr::from_bytes(&[]).is_none());
        assert!(SockAddr::from_bytes(&[0u8; 512]).is_none());
    }

    #[test]
    fn test_unknown_family_has_no_socket_addr() {
        let sa = SockAddr::empty();
        assert!(sa.as_socket_addr().is_none());
        assert!(format!("{:?}", sa).contains("family"));
    }

    #[test]
    fn test_address_len() {
        assert_eq!(address_len(libc::AF_INET), Some(16));
        assert_eq!(address_len(libc::AF_INET6), Some(28));
        assert_eq!(address_len(libc::AF_UNIX), None);
    }
}
