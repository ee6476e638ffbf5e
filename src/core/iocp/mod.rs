//! Completion-port abstraction used by the completion-driven listener.
//!
//! An accept is *posted* ahead of time together with a pre-created candidate
//! socket and an address buffer. The port either finishes it on the spot
//! ([`PostResult::Completed`]) or keeps it and later hands the result to the
//! request's [`Overlapped`] token.

pub mod polled;

use crate::core::net::SockAddr;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;

pub use polled::PolledPort;

/// One asynchronous accept. Ownership of `buffer` moves to the port until
/// the request completes, fails or is cancelled.
#[derive(Debug)]
pub struct AcceptRequest {
    pub listener: RawFd,
    pub candidate: RawFd,
    pub buffer: Vec<u8>,
}

/// Result of a finished accept; `buffer` is handed back to its owner.
#[derive(Debug)]
pub struct AcceptCompletion {
    pub buffer: Vec<u8>,
    pub result: io::Result<()>,
}

#[derive(Debug)]
pub enum PostResult {
    /// A connection was already queued and has been accepted into the
    /// candidate socket.
    Completed(AcceptCompletion),
    /// The port holds the request; the completion arrives through the token.
    Pending,
    /// The request was rejected.
    Failed(io::Error, Vec<u8>),
}

/// Completion token carried by each posted request.
pub trait Overlapped {
    fn complete(self: Rc<Self>, completion: AcceptCompletion);
}

pub trait CompletionPort {
    /// Associates a socket with the port. Requests on sockets that were
    /// never associated are rejected.
    fn associate(&self, socket: RawFd, key: usize) -> io::Result<()>;

    /// Ties a candidate socket to the listening socket it will accept from,
    /// so the accepted connection inherits the listener's context.
    fn update_accept_context(&self, candidate: RawFd, listener: RawFd) -> io::Result<()>;

    fn post_accept(&self, request: AcceptRequest, token: Rc<dyn Overlapped>) -> PostResult;

    /// Drops every outstanding request on `listener` without completing it.
    /// Returns how many were dropped.
    fn cancel(&self, listener: RawFd) -> usize;

    /// Extracts `(local, remote)` from a completed request's buffer.
    fn split_addresses(&self, buffer: &[u8]) -> io::Result<(SockAddr, SockAddr)>;

    /// Forgets a candidate socket that is about to be closed or handed off.
    fn release(&self, _candidate: RawFd) {}
}

const LEN_PREFIX: usize = 2;

/// Writes `addr` into one half of an address buffer as a little-endian
/// `u16` length followed by the native `sockaddr` bytes.
pub fn write_address(half: &mut [u8], addr: &SockAddr) -> io::Result<()> {
    let bytes = addr.as_bytes();
    if LEN_PREFIX + bytes.len() > half.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "address of {} bytes does not fit a {} byte slot",
                bytes.len(),
                half.len()
            ),
        ));
    }
    half[..LEN_PREFIX].copy_from_slice(&(bytes.len() as u16).to_le_bytes());
    half[LEN_PREFIX..LEN_PREFIX + bytes.len()].copy_from_slice(bytes);
    Ok(())
}

pub fn read_address(half: &[u8]) -> io::Result<SockAddr> {
    let invalid = || io::Error::new(io::ErrorKind::InvalidData, "malformed address slot");
    if half.len() < LEN_PREFIX {
        return Err(invalid());
    }
    let len = u16::from_le_bytes([half[0], half[1]]) as usize;
    let bytes = half
        .get(LEN_PREFIX..LEN_PREFIX + len)
        .ok_or_else(invalid)?;
    SockAddr::from_bytes(bytes).ok_or_else(invalid)
}
