//! STREAMS channels for TPI conformance testing.
//!
//! A [`Channel`] is one end of a message-oriented duplex stream: it keeps
//! message boundaries, carries a control part and a data part per message,
//! orders messages by priority band, and accepts stream head controls
//! (`I_PUSH`, `I_STR`, ...).
//!
//! Two implementations exist:
//!
//! - [`mem::pipe`]: an in-process pipe whose ends can have a simulated
//!   `timod` module pushed on them. Used by the thread backend and tests.
//! - `StreamsChannel` (feature `streams`): a real descriptor driven through
//!   `libstreams` `putpmsg`/`getpmsg`.

use std::io;
use std::os::fd::RawFd;

use bitflags::bitflags;
use bytes::Bytes;

pub mod mem;
pub mod stropts;
mod timod;

#[cfg(feature = "streams")]
mod streams;
#[cfg(feature = "streams")]
pub use streams::StreamsChannel;

// ============================================================================
// Flags
// ============================================================================

bitflags! {
    /// `putpmsg`/`getpmsg` priority selection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MsgFlags: i32 {
        const HIPRI = 0x01;
        const ANY = 0x02;
        const BAND = 0x04;
    }
}

bitflags! {
    /// `poll(2)` interest and readiness bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PollFlags: i16 {
        const IN = libc::POLLIN;
        const PRI = libc::POLLPRI;
        const OUT = libc::POLLOUT;
        const ERR = libc::POLLERR;
        const HUP = libc::POLLHUP;
        const NVAL = libc::POLLNVAL;
        const RDNORM = libc::POLLRDNORM;
        const RDBAND = libc::POLLRDBAND;
        const WRNORM = libc::POLLWRNORM;
        const WRBAND = libc::POLLWRBAND;
        const MSG = 0x400;
    }
}

impl PollFlags {
    /// Everything a reader waiting for the next message cares about.
    pub const READABLE: PollFlags = PollFlags::IN
        .union(PollFlags::PRI)
        .union(PollFlags::RDNORM)
        .union(PollFlags::RDBAND)
        .union(PollFlags::MSG)
        .union(PollFlags::ERR)
        .union(PollFlags::HUP);
}

// ============================================================================
// Messages and controls
// ============================================================================

/// One message taken off a stream head.
///
/// `None` means the part was absent (`len == -1`), which differs from a
/// present but empty part. A hangup reads as an empty data part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub ctrl: Option<Bytes>,
    pub data: Option<Bytes>,
    pub band: u8,
    pub hipri: bool,
}

/// `struct strioctl`, with the argument buffer owned.
///
/// `buf` holds `len` bytes going in and is replaced by the reply coming out.
#[derive(Debug, Clone, Default)]
pub struct StrIoctl {
    pub cmd: i32,
    /// Milliseconds; `-1` waits forever, `0` uses the stream default.
    pub timout: i32,
    pub len: i32,
    pub buf: Vec<u8>,
}

/// `struct strfdinsert`
#[derive(Debug, Clone)]
pub struct FdInsert<'a> {
    pub ctrl: &'a [u8],
    pub data: Option<&'a [u8]>,
    pub flags: MsgFlags,
    pub fd: RawFd,
    pub offset: usize,
}

/// Stream head controls used by the harness.
#[derive(Debug)]
pub enum Ioctl<'a> {
    Push(&'a str),
    Pop,
    SetReadOpt(i32),
    SetWriteOpt(i32),
    Str(&'a mut StrIoctl),
    FdInsert(FdInsert<'a>),
}

impl Ioctl<'_> {
    /// The `ioctl(2)` request number.
    pub fn cmd(&self) -> i32 {
        match self {
            Ioctl::Push(_) => stropts::I_PUSH,
            Ioctl::Pop => stropts::I_POP,
            Ioctl::SetReadOpt(_) => stropts::I_SRDOPT,
            Ioctl::SetWriteOpt(_) => stropts::I_SWROPT,
            Ioctl::Str(_) => stropts::I_STR,
            Ioctl::FdInsert(_) => stropts::I_FDINSERT,
        }
    }

    /// Transcript name; `I_STR` shows the wrapped command.
    pub fn name(&self) -> String {
        match self {
            Ioctl::Str(ic) => stropts::ioctl_name(ic.cmd).into_owned(),
            other => stropts::ioctl_name(other.cmd()).into_owned(),
        }
    }
}

// ============================================================================
// Channel
// ============================================================================

/// One end of a STREAMS channel.
///
/// Methods map one-to-one onto system calls; none of them retry. Wrap calls
/// in [`restart`] to absorb interrupted calls.
pub trait Channel: Send {
    /// `putpmsg(2)`. `flags` is `HIPRI` or `BAND`.
    fn putpmsg(
        &mut self,
        ctrl: Option<&[u8]>,
        data: Option<&[u8]>,
        band: u8,
        flags: MsgFlags,
    ) -> io::Result<()>;

    /// `getpmsg(2)` for any band. Fails with `EAGAIN` when nothing is queued
    /// on a non-blocking channel.
    fn getmsg(&mut self) -> io::Result<Message>;

    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn writev(&mut self, bufs: &[&[u8]]) -> io::Result<usize>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Returns the non-negative `ioctl(2)` result.
    fn ioctl(&mut self, op: Ioctl<'_>) -> io::Result<i32>;

    /// Waits up to `timeout_ms` (`-1` forever) and returns the ready bits,
    /// empty on timeout.
    fn poll(&mut self, events: PollFlags, timeout_ms: i32) -> io::Result<PollFlags>;

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()>;

    /// Another handle on the same stream end.
    fn try_clone(&self) -> io::Result<Box<dyn Channel>>;

    /// Descriptor (or stand-in token) for passing with `I_FDINSERT`.
    fn raw_fd(&self) -> RawFd;

    fn close(&mut self) -> io::Result<()>;
}

// ============================================================================
// Error helpers
// ============================================================================

/// True for `EINTR` and, on Linux, the kernel-internal `ERESTART`.
pub fn is_restart(err: &io::Error) -> bool {
    match err.raw_os_error() {
        Some(libc::EINTR) => true,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        Some(libc::ERESTART) => true,
        _ => err.kind() == io::ErrorKind::Interrupted,
    }
}

/// Reruns `f` while it fails with an interrupted-call error.
pub fn restart<T>(mut f: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match f() {
            Err(e) if is_restart(&e) => continue,
            other => return other,
        }
    }
}

/// The `errno` carried by `err`, `EIO` if it has none.
pub fn errno(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(libc::EIO)
}

pub(crate) fn os_error(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_retries_interrupts() {
        let mut calls = 0;
        let out = restart(|| {
            calls += 1;
            if calls < 3 {
                Err(os_error(libc::EINTR))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(out.unwrap(), 3);
    }

    #[test]
    fn test_restart_passes_other_errors() {
        let mut calls = 0;
        let out: io::Result<()> = restart(|| {
            calls += 1;
            Err(os_error(libc::EAGAIN))
        });
        assert_eq!(errno(&out.unwrap_err()), libc::EAGAIN);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_errno_defaults_to_eio() {
        let err = io::Error::other("synthetic");
        assert_eq!(errno(&err), libc::EIO);
    }

    #[test]
    fn test_readable_mask() {
        assert!(PollFlags::READABLE.contains(PollFlags::PRI | PollFlags::HUP));
        assert!(!PollFlags::READABLE.contains(PollFlags::OUT));
    }
}
