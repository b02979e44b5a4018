//! Stream calls as a role makes them.
//!
//! Every wrapper retries interrupted calls, records the failing `errno` in
//! the snapshot, and prints the call and its outcome on the role's
//! transcript column. A failed call is a [`Verdict::Failure`] step.

use std::io;
use std::os::fd::RawFd;

use tpi_stream::{FdInsert, Ioctl, MsgFlags, StrIoctl, errno, restart};
use tpi_wire::Primitive;
use tpi_wire::consts::terr::TSYSERR;
use tpi_wire::render::{errno_name, ioctl_name, t_errno_name};
use tracing::debug;

use crate::session::Session;
use crate::verdict::{Step, Verdict};

impl Session {
    /// Records a failed call and prints its `errno`.
    pub(crate) fn failed_call(&mut self, err: &io::Error) {
        let code = errno(err);
        self.snap.last_errno = code;
        self.trace
            .errno(self.col(), self.state, &errno_name(code));
        debug!(role = self.role.name(), errno = code, state = self.state, "call failed");
    }

    fn check<T>(&mut self, out: io::Result<T>) -> Result<T, Verdict> {
        match out {
            Ok(v) => {
                self.trace.success(self.col(), self.state);
                Ok(v)
            }
            Err(e) => {
                self.failed_call(&e);
                Err(Verdict::Failure)
            }
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> Step {
        let out = restart(|| self.chan.write(buf));
        self.check(out).map(drop)
    }

    pub fn writev(&mut self, bufs: &[bytes::Bytes]) -> Step {
        let iov: Vec<&[u8]> = bufs.iter().map(|b| b.as_ref()).collect();
        let out = restart(|| self.chan.writev(&iov));
        self.check(out).map(drop)
    }

    pub fn putpmsg(
        &mut self,
        ctrl: Option<&[u8]>,
        data: Option<&[u8]>,
        band: u8,
        flags: MsgFlags,
    ) -> Step {
        self.trace
            .dump(self.col(), "->", ctrl, data);
        let out = restart(|| self.chan.putpmsg(ctrl, data, band, flags));
        self.check(out)
    }

    /// `I_FDINSERT`, used to hand an accepting stream over with `T_CONN_RES`.
    pub fn fdinsert(&mut self, ctrl: &[u8], data: Option<&[u8]>, fd: RawFd, offset: usize) -> Step {
        self.trace.ioctl(self.col(), self.state, "I_FDINSERT");
        self.trace.dump(self.col(), "->", Some(ctrl), data);
        let out = restart(|| {
            self.chan.ioctl(Ioctl::FdInsert(FdInsert {
                ctrl,
                data,
                flags: MsgFlags::empty(),
                fd,
                offset,
            }))
        });
        self.check(out).map(drop)
    }

    pub fn push(&mut self, module: &str) -> Step {
        self.trace.ioctl(self.col(), self.state, "I_PUSH");
        let out = restart(|| self.chan.ioctl(Ioctl::Push(module)));
        self.check(out).map(drop)
    }

    pub fn pop(&mut self) -> Step {
        self.trace.ioctl(self.col(), self.state, "I_POP");
        let out = restart(|| self.chan.ioctl(Ioctl::Pop));
        self.check(out).map(drop)
    }

    pub fn nonblocking(&mut self, on: bool) -> Step {
        let out = self.chan.set_nonblocking(on);
        self.check(out)
    }

    /// Issues a `timod` control through `I_STR`.
    ///
    /// A call that fails outright leaves its `errno` in the snapshot. A
    /// positive return is a protocol error: the low byte is the TLI error
    /// and, for `TSYSERR`, the next byte is the system error. On success an
    /// acknowledgement handed back in `ic.buf` is absorbed into the snapshot.
    pub fn ti_ioctl(&mut self, ic: &mut StrIoctl) -> Step {
        self.trace
            .ti_ioctl(self.col(), self.state, &ioctl_name(ic.cmd));
        let out = restart(|| self.chan.ioctl(Ioctl::Str(ic)));
        let ret = match out {
            Ok(ret) => ret,
            Err(e) => {
                self.failed_call(&e);
                return Err(Verdict::Failure);
            }
        };
        self.snap.last_retval = ret;
        if ret == 0 {
            self.trace.success(self.col(), self.state);
            self.absorb_reply(ic);
            return Ok(());
        }
        self.snap.last_t_errno = ret & 0xff;
        self.snap.last_errno = if self.snap.last_t_errno == TSYSERR {
            (ret >> 8) & 0xff
        } else {
            0
        };
        self.trace.terror(
            self.col(),
            self.state,
            &t_errno_name(self.snap.last_t_errno, self.snap.last_errno),
        );
        Err(Verdict::Failure)
    }

    fn absorb_reply(&mut self, ic: &StrIoctl) {
        let len = usize::try_from(ic.len).unwrap_or(0).min(ic.buf.len());
        if len == 0 {
            return;
        }
        // State queries answer with a bare value, not a primitive.
        match Primitive::decode(&ic.buf[..len]) {
            Ok(prim) => self.snap.absorb(&prim),
            Err(e) => debug!(role = self.role.name(), error = %e, "control reply is not a primitive"),
        }
    }
}
