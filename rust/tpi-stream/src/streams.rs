//! Channels on real STREAMS descriptors.
//!
//! Message calls go through `libstreams` (`putpmsg`/`getpmsg`); stream head
//! controls go straight to `ioctl(2)`.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;

use bytes::Bytes;
use libc::{c_char, c_int};
use tracing::trace;

use crate::{Channel, Ioctl, Message, MsgFlags, PollFlags, os_error};

/// Control and data parts are read into buffers of this size.
const BUFSIZE: usize = 4096;

#[repr(C)]
struct StrBuf {
    maxlen: c_int,
    len: c_int,
    buf: *mut c_char,
}

impl StrBuf {
    fn absent() -> Self {
        StrBuf {
            maxlen: -1,
            len: -1,
            buf: std::ptr::null_mut(),
        }
    }

    /// Describes an outgoing part. The callee never writes through `buf`.
    fn outgoing(part: Option<&[u8]>) -> Self {
        match part {
            Some(bytes) => StrBuf {
                maxlen: bytes.len() as c_int,
                len: bytes.len() as c_int,
                buf: bytes.as_ptr() as *mut c_char,
            },
            None => StrBuf::absent(),
        }
    }

    fn incoming(space: &mut [u8]) -> Self {
        StrBuf {
            maxlen: space.len() as c_int,
            len: 0,
            buf: space.as_mut_ptr().cast(),
        }
    }
}

#[repr(C)]
struct RawStrIoctl {
    ic_cmd: c_int,
    ic_timout: c_int,
    ic_len: c_int,
    ic_dp: *mut c_char,
}

#[repr(C)]
struct RawFdInsert {
    ctlbuf: StrBuf,
    databuf: StrBuf,
    flags: u32,
    fildes: c_int,
    offset: c_int,
}

#[link(name = "streams")]
unsafe extern "C" {
    fn putpmsg(
        fd: c_int,
        ctlptr: *const StrBuf,
        dataptr: *const StrBuf,
        band: c_int,
        flags: c_int,
    ) -> c_int;

    fn getpmsg(
        fd: c_int,
        ctlptr: *mut StrBuf,
        dataptr: *mut StrBuf,
        bandp: *mut c_int,
        flagsp: *mut c_int,
    ) -> c_int;
}

fn check(ret: c_int) -> io::Result<c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// A STREAMS descriptor.
#[derive(Debug)]
pub struct StreamsChannel {
    fd: Option<OwnedFd>,
}

impl StreamsChannel {
    /// Opens a STREAMS device read-write and non-blocking.
    pub fn open(path: &Path) -> io::Result<Self> {
        let cpath = CString::new(path.as_os_str().as_encoded_bytes())
            .map_err(|_| os_error(libc::EINVAL))?;
        // SAFETY: cpath is a valid NUL-terminated string for the call.
        let fd = check(unsafe { libc::open(cpath.as_ptr(), libc::O_RDWR | libc::O_NONBLOCK) })?;
        // SAFETY: open returned a fresh descriptor we now own.
        Ok(Self::from_owned(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    /// A STREAMS-based pipe; returns `(fd0, fd1)`.
    pub fn pipe() -> io::Result<(Self, Self)> {
        let mut fds = [0 as c_int; 2];
        // SAFETY: fds has room for the two descriptors pipe writes.
        check(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
        // SAFETY: both descriptors were just created and are owned by us.
        let (a, b) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        Ok((Self::from_owned(a), Self::from_owned(b)))
    }

    fn from_owned(fd: OwnedFd) -> Self {
        StreamsChannel { fd: Some(fd) }
    }

    fn fd(&self) -> io::Result<c_int> {
        self.fd
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| os_error(libc::EBADF))
    }

    fn raw_ioctl<T>(&self, cmd: i32, arg: *mut T) -> io::Result<i32> {
        let fd = self.fd()?;
        // SAFETY: arg points at the structure (or string) the request expects
        // and stays alive for the duration of the call.
        check(unsafe { libc::ioctl(fd, cmd as _, arg) })
    }
}

impl Channel for StreamsChannel {
    fn putpmsg(
        &mut self,
        ctrl: Option<&[u8]>,
        data: Option<&[u8]>,
        band: u8,
        flags: MsgFlags,
    ) -> io::Result<()> {
        let fd = self.fd()?;
        let ctl = StrBuf::outgoing(ctrl);
        let dat = StrBuf::outgoing(data);
        // SAFETY: both strbufs reference live slices or are marked absent.
        check(unsafe { putpmsg(fd, &ctl, &dat, band as c_int, flags.bits()) })?;
        Ok(())
    }

    fn getmsg(&mut self) -> io::Result<Message> {
        let fd = self.fd()?;
        let mut cbuf = vec![0u8; BUFSIZE];
        let mut dbuf = vec![0u8; BUFSIZE];
        let mut ctl = StrBuf::incoming(&mut cbuf);
        let mut dat = StrBuf::incoming(&mut dbuf);
        let mut band: c_int = 0;
        let mut flags: c_int = MsgFlags::ANY.bits();
        // SAFETY: the strbufs point into cbuf/dbuf, which outlive the call.
        check(unsafe { getpmsg(fd, &mut ctl, &mut dat, &mut band, &mut flags) })?;
        let part = |buf: Vec<u8>, len: c_int| {
            usize::try_from(len).ok().map(|n| {
                let mut buf = buf;
                buf.truncate(n);
                Bytes::from(buf)
            })
        };
        let msg = Message {
            ctrl: part(cbuf, ctl.len),
            data: part(dbuf, dat.len),
            band: band as u8,
            hipri: flags & MsgFlags::HIPRI.bits() != 0,
        };
        trace!(fd, ctrl = ctl.len, data = dat.len, band, "getpmsg");
        Ok(msg)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let fd = self.fd()?;
        // SAFETY: buf is valid for reads of buf.len() bytes.
        let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn writev(&mut self, bufs: &[&[u8]]) -> io::Result<usize> {
        let fd = self.fd()?;
        let iov: Vec<libc::iovec> = bufs
            .iter()
            .map(|b| libc::iovec {
                iov_base: b.as_ptr() as *mut _,
                iov_len: b.len(),
            })
            .collect();
        // SAFETY: every iovec references a live slice; writev only reads.
        let n = unsafe { libc::writev(fd, iov.as_ptr(), iov.len() as c_int) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let fd = self.fd()?;
        // SAFETY: buf is valid for writes of buf.len() bytes.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn ioctl(&mut self, op: Ioctl<'_>) -> io::Result<i32> {
        let cmd = op.cmd();
        match op {
            Ioctl::Push(name) => {
                let module = CString::new(name).map_err(|_| os_error(libc::EINVAL))?;
                self.raw_ioctl(cmd, module.as_ptr().cast_mut())
            }
            Ioctl::Pop => self.raw_ioctl(cmd, std::ptr::null_mut::<c_char>()),
            Ioctl::SetReadOpt(v) | Ioctl::SetWriteOpt(v) => {
                let fd = self.fd()?;
                // SAFETY: I_SRDOPT and I_SWROPT take an integer argument.
                check(unsafe { libc::ioctl(fd, cmd as _, v as libc::c_long) })
            }
            Ioctl::Str(ic) => {
                let in_len = usize::try_from(ic.len).unwrap_or(0);
                if ic.buf.len() < BUFSIZE.max(in_len) {
                    ic.buf.resize(BUFSIZE.max(in_len), 0);
                }
                let mut raw = RawStrIoctl {
                    ic_cmd: ic.cmd,
                    ic_timout: ic.timout,
                    ic_len: ic.len,
                    ic_dp: ic.buf.as_mut_ptr().cast(),
                };
                let ret = self.raw_ioctl(cmd, &mut raw as *mut RawStrIoctl);
                ic.len = raw.ic_len;
                ic.buf.truncate(usize::try_from(raw.ic_len).unwrap_or(0));
                ret
            }
            Ioctl::FdInsert(ins) => {
                let mut raw = RawFdInsert {
                    ctlbuf: StrBuf::outgoing(Some(ins.ctrl)),
                    databuf: StrBuf::outgoing(ins.data),
                    flags: ins.flags.bits() as u32,
                    fildes: ins.fd,
                    offset: ins.offset as c_int,
                };
                self.raw_ioctl(cmd, &mut raw as *mut RawFdInsert)
            }
        }
    }

    fn poll(&mut self, events: PollFlags, timeout_ms: i32) -> io::Result<PollFlags> {
        let mut pfd = libc::pollfd {
            fd: self.fd()?,
            events: events.bits(),
            revents: 0,
        };
        // SAFETY: pfd is a single valid pollfd.
        let n = check(unsafe { libc::poll(&mut pfd, 1, timeout_ms) })?;
        if n == 0 {
            return Ok(PollFlags::empty());
        }
        Ok(PollFlags::from_bits_retain(pfd.revents))
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        let fd = self.fd()?;
        // SAFETY: F_GETFL/F_SETFL on an open descriptor.
        let flags = check(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        // SAFETY: as above.
        check(unsafe { libc::fcntl(fd, libc::F_SETFL, flags) })?;
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn Channel>> {
        let fd = self
            .fd
            .as_ref()
            .ok_or_else(|| os_error(libc::EBADF))?
            .try_clone()?;
        Ok(Box::new(Self::from_owned(fd)))
    }

    fn raw_fd(&self) -> RawFd {
        self.fd.as_ref().map(AsRawFd::as_raw_fd).unwrap_or(-1)
    }

    fn close(&mut self) -> io::Result<()> {
        match self.fd.take() {
            Some(fd) => {
                drop(fd);
                Ok(())
            }
            None => Err(os_error(libc::EBADF)),
        }
    }
}
