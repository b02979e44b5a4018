//! In-process STREAMS pipe.
//!
//! Both ends share one lock and one condition variable. Each end owns an
//! inbound queue ordered the way a stream head orders messages: high
//! priority first, then bands from high to low, then normal messages in
//! arrival order. Pushing `timod` on an end routes `I_STR` controls through
//! the simulated module in [`crate::timod`].

use std::collections::VecDeque;
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::trace;

use crate::stropts::{RMSGD, SNDZERO};
use crate::{Channel, Ioctl, Message, MsgFlags, PollFlags, os_error};

/// Modules `I_PUSH` accepts.
const MODULES: &[&str] = &["timod", "pipemod"];

/// Token handed out by `raw_fd`, per side.
const FD_TOKEN_BASE: RawFd = 1000;

#[derive(Debug, Default)]
pub(crate) struct Side {
    pub(crate) inbound: VecDeque<Message>,
    pub(crate) modules: Vec<String>,
    pub(crate) closed: bool,
    /// Peer end closed: reads drain then see end of file.
    pub(crate) hungup: bool,
    pub(crate) rdopt: i32,
    pub(crate) wropt: i32,
    /// A control operation is outstanding on this end.
    pub(crate) busy: bool,
}

#[derive(Debug, Default)]
pub(crate) struct PipeState {
    pub(crate) sides: [Side; 2],
}

#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) state: Mutex<PipeState>,
    pub(crate) cond: Condvar,
}

/// One end of an in-process pipe.
#[derive(Debug, Clone)]
pub struct MemEnd {
    pub(crate) shared: Arc<Shared>,
    pub(crate) side: usize,
    nonblocking: bool,
}

/// Creates a connected pair of ends.
pub fn pipe() -> (MemEnd, MemEnd) {
    let shared = Arc::new(Shared::default());
    (
        MemEnd {
            shared: shared.clone(),
            side: 0,
            nonblocking: true,
        },
        MemEnd {
            shared,
            side: 1,
            nonblocking: true,
        },
    )
}

/// Inserts behind every message that outranks (or ties with) `msg`.
pub(crate) fn enqueue(queue: &mut VecDeque<Message>, msg: Message) {
    let pos = if msg.hipri {
        queue.iter().take_while(|m| m.hipri).count()
    } else if msg.band > 0 {
        queue
            .iter()
            .take_while(|m| m.hipri || m.band >= msg.band)
            .count()
    } else {
        queue.len()
    };
    queue.insert(pos, msg);
}

fn readiness(side: &Side) -> PollFlags {
    let mut ready = PollFlags::empty();
    if let Some(head) = side.inbound.front() {
        if head.hipri {
            ready |= PollFlags::PRI;
        } else if head.band > 0 {
            ready |= PollFlags::IN | PollFlags::RDBAND;
        } else {
            ready |= PollFlags::IN | PollFlags::RDNORM;
        }
    }
    if side.hungup {
        ready |= PollFlags::HUP;
    } else {
        ready |= PollFlags::OUT | PollFlags::WRNORM | PollFlags::WRBAND;
    }
    if side.closed {
        ready |= PollFlags::NVAL;
    }
    ready
}

/// Converts a `timout`-style millisecond count into an absolute deadline.
pub(crate) fn deadline(timeout_ms: i32) -> Option<Instant> {
    (timeout_ms >= 0).then(|| Instant::now() + Duration::from_millis(timeout_ms as u64))
}

/// Waits on the pipe condition; returns false once `until` has passed.
pub(crate) fn wait(
    cond: &Condvar,
    guard: &mut MutexGuard<'_, PipeState>,
    until: Option<Instant>,
) -> bool {
    match until {
        None => {
            cond.wait(guard);
            true
        }
        Some(at) => !cond.wait_until(guard, at).timed_out(),
    }
}

impl MemEnd {
    pub(crate) fn peer(&self) -> usize {
        1 - self.side
    }

    fn check_open(&self, st: &PipeState) -> io::Result<()> {
        if st.sides[self.side].closed {
            return Err(os_error(libc::EBADF));
        }
        Ok(())
    }

    /// Queues a message at the peer's stream head.
    pub(crate) fn send_locked(&self, st: &mut PipeState, msg: Message) -> io::Result<()> {
        self.check_open(st)?;
        if st.sides[self.side].hungup || st.sides[self.peer()].closed {
            return Err(os_error(libc::ENXIO));
        }
        trace!(
            side = self.side,
            ctrl = msg.ctrl.as_ref().map(|c| c.len()),
            data = msg.data.as_ref().map(|d| d.len()),
            band = msg.band,
            hipri = msg.hipri,
            "mem pipe send"
        );
        enqueue(&mut st.sides[self.peer()].inbound, msg);
        self.shared.cond.notify_all();
        Ok(())
    }

    fn send(&self, msg: Message) -> io::Result<()> {
        let mut st = self.shared.state.lock();
        self.send_locked(&mut st, msg)
    }

    /// Blocks (unless non-blocking) until a message or hangup is at the head.
    fn take<T>(&self, mut f: impl FnMut(&mut Side) -> Option<io::Result<T>>) -> io::Result<T> {
        let mut st = self.shared.state.lock();
        loop {
            self.check_open(&st)?;
            if let Some(out) = f(&mut st.sides[self.side]) {
                return out;
            }
            if self.nonblocking {
                return Err(os_error(libc::EAGAIN));
            }
            wait(&self.shared.cond, &mut st, None);
        }
    }

    /// Modules currently pushed on this end, top first.
    pub fn modules(&self) -> Vec<String> {
        let st = self.shared.state.lock();
        st.sides[self.side].modules.iter().rev().cloned().collect()
    }
}

impl Channel for MemEnd {
    fn putpmsg(
        &mut self,
        ctrl: Option<&[u8]>,
        data: Option<&[u8]>,
        band: u8,
        flags: MsgFlags,
    ) -> io::Result<()> {
        let hipri = flags.contains(MsgFlags::HIPRI);
        if hipri && (ctrl.is_none() || band != 0) {
            return Err(os_error(libc::EINVAL));
        }
        if ctrl.is_none() && data.is_none() {
            return Ok(());
        }
        self.send(Message {
            ctrl: ctrl.map(Bytes::copy_from_slice),
            data: data.map(Bytes::copy_from_slice),
            band,
            hipri,
        })
    }

    fn getmsg(&mut self) -> io::Result<Message> {
        self.take(|side| {
            if let Some(msg) = side.inbound.pop_front() {
                return Some(Ok(msg));
            }
            side.hungup.then(|| {
                Ok(Message {
                    data: Some(Bytes::new()),
                    ..Message::default()
                })
            })
        })
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut st = self.shared.state.lock();
        if buf.is_empty() && st.sides[self.side].wropt & SNDZERO == 0 {
            return Ok(0);
        }
        self.send_locked(
            &mut st,
            Message {
                data: Some(Bytes::copy_from_slice(buf)),
                ..Message::default()
            },
        )?;
        Ok(buf.len())
    }

    fn writev(&mut self, bufs: &[&[u8]]) -> io::Result<usize> {
        let joined = bufs.concat();
        self.write(&joined)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.take(|side| {
            let Some(head) = side.inbound.front_mut() else {
                return side.hungup.then_some(Ok(0));
            };
            if head.ctrl.is_some() {
                return Some(Err(os_error(libc::EBADMSG)));
            }
            let data = head.data.clone().unwrap_or_default();
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            if n < data.len() && side.rdopt & RMSGD == 0 {
                head.data = Some(data.slice(n..));
            } else {
                side.inbound.pop_front();
            }
            Some(Ok(n))
        })
    }

    fn ioctl(&mut self, op: Ioctl<'_>) -> io::Result<i32> {
        let mut st = self.shared.state.lock();
        self.check_open(&st)?;
        match op {
            Ioctl::Push(name) => {
                if st.sides[self.side].hungup {
                    return Err(os_error(libc::ENXIO));
                }
                if !MODULES.contains(&name) {
                    return Err(os_error(libc::EINVAL));
                }
                st.sides[self.side].modules.push(name.to_string());
                Ok(0)
            }
            Ioctl::Pop => {
                let side = &mut st.sides[self.side];
                if side.hungup {
                    return Err(os_error(libc::ENXIO));
                }
                if side.modules.pop().is_none() {
                    return Err(os_error(libc::EINVAL));
                }
                Ok(0)
            }
            Ioctl::SetReadOpt(mode) => {
                st.sides[self.side].rdopt = mode;
                Ok(0)
            }
            Ioctl::SetWriteOpt(opt) => {
                st.sides[self.side].wropt = opt;
                Ok(0)
            }
            Ioctl::Str(ic) => {
                let top = st.sides[self.side].modules.last().map(String::as_str);
                if top == Some("timod") && crate::timod::handles(ic.cmd) {
                    crate::timod::control(self, st, ic)
                } else {
                    Err(os_error(libc::EINVAL))
                }
            }
            Ioctl::FdInsert(ins) => {
                let end = ins.offset.checked_add(4).ok_or_else(|| os_error(libc::EINVAL))?;
                if ins.offset % 4 != 0 || end > ins.ctrl.len() {
                    return Err(os_error(libc::EINVAL));
                }
                let mut ctrl = ins.ctrl.to_vec();
                ctrl[ins.offset..end].copy_from_slice(&ins.fd.to_ne_bytes());
                let msg = Message {
                    ctrl: Some(Bytes::from(ctrl)),
                    data: ins.data.map(Bytes::copy_from_slice),
                    band: 0,
                    hipri: ins.flags.contains(MsgFlags::HIPRI),
                };
                self.send_locked(&mut st, msg)?;
                Ok(0)
            }
        }
    }

    fn poll(&mut self, events: PollFlags, timeout_ms: i32) -> io::Result<PollFlags> {
        let until = deadline(timeout_ms);
        let mut st = self.shared.state.lock();
        loop {
            let ready = readiness(&st.sides[self.side])
                & (events | PollFlags::HUP | PollFlags::ERR | PollFlags::NVAL);
            if !ready.is_empty() {
                return Ok(ready);
            }
            if !wait(&self.shared.cond, &mut st, until) {
                return Ok(PollFlags::empty());
            }
        }
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        self.nonblocking = nonblocking;
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn Channel>> {
        Ok(Box::new(self.clone()))
    }

    fn raw_fd(&self) -> RawFd {
        FD_TOKEN_BASE + self.side as RawFd
    }

    fn close(&mut self) -> io::Result<()> {
        let mut st = self.shared.state.lock();
        self.check_open(&st)?;
        let peer = self.peer();
        st.sides[self.side].closed = true;
        st.sides[self.side].inbound.clear();
        st.sides[peer].hungup = true;
        self.shared.cond.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errno;

    fn msg(ctrl: &'static [u8], band: u8, hipri: bool) -> Message {
        Message {
            ctrl: Some(Bytes::from_static(ctrl)),
            data: None,
            band,
            hipri,
        }
    }

    #[test]
    fn test_queue_ordering() {
        let mut q = VecDeque::new();
        enqueue(&mut q, msg(b"n1", 0, false));
        enqueue(&mut q, msg(b"b1", 1, false));
        enqueue(&mut q, msg(b"hp", 0, true));
        enqueue(&mut q, msg(b"n2", 0, false));
        enqueue(&mut q, msg(b"b2", 2, false));
        let order: Vec<_> = q.iter().map(|m| m.ctrl.clone().unwrap()).collect();
        assert_eq!(order, [&b"hp"[..], b"b2", b"b1", b"n1", b"n2"]);
    }

    #[test]
    fn test_message_boundaries_and_priority() {
        let (mut a, mut b) = pipe();
        a.putpmsg(Some(b"ctrl"), Some(b"data"), 0, MsgFlags::BAND).unwrap();
        a.putpmsg(Some(b"urgent"), None, 0, MsgFlags::HIPRI).unwrap();
        assert_eq!(
            b.poll(PollFlags::READABLE, 0).unwrap(),
            PollFlags::PRI
        );
        let first = b.getmsg().unwrap();
        assert!(first.hipri);
        assert_eq!(first.data, None);
        let second = b.getmsg().unwrap();
        assert_eq!(second.ctrl.as_deref(), Some(&b"ctrl"[..]));
        assert_eq!(second.data.as_deref(), Some(&b"data"[..]));
        assert_eq!(errno(&b.getmsg().unwrap_err()), libc::EAGAIN);
    }

    #[test]
    fn test_hipri_needs_control_part() {
        let (mut a, _b) = pipe();
        let err = a.putpmsg(None, Some(b"x"), 0, MsgFlags::HIPRI).unwrap_err();
        assert_eq!(errno(&err), libc::EINVAL);
    }

    #[test]
    fn test_poll_times_out_empty() {
        let (_a, mut b) = pipe();
        assert!(b.poll(PollFlags::READABLE, 10).unwrap().is_empty());
    }

    #[test]
    fn test_close_hangs_up_peer() {
        let (mut a, mut b) = pipe();
        a.close().unwrap();
        assert!(b.poll(PollFlags::READABLE, 0).unwrap().contains(PollFlags::HUP));
        let eof = b.getmsg().unwrap();
        assert_eq!(eof.ctrl, None);
        assert_eq!(eof.data.as_deref(), Some(&b""[..]));
        assert_eq!(errno(&b.ioctl(Ioctl::Pop).unwrap_err()), libc::ENXIO);
        assert_eq!(errno(&b.write(b"late").unwrap_err()), libc::ENXIO);
    }

    #[test]
    fn test_push_pop() {
        let (mut a, _b) = pipe();
        a.ioctl(Ioctl::Push("timod")).unwrap();
        assert_eq!(a.modules(), ["timod"]);
        assert_eq!(errno(&a.ioctl(Ioctl::Push("nosuch")).unwrap_err()), libc::EINVAL);
        a.ioctl(Ioctl::Pop).unwrap();
        assert_eq!(errno(&a.ioctl(Ioctl::Pop).unwrap_err()), libc::EINVAL);
    }

    #[test]
    fn test_zero_length_write_needs_sndzero() {
        let (mut a, mut b) = pipe();
        assert_eq!(a.write(b"").unwrap(), 0);
        assert!(b.poll(PollFlags::READABLE, 0).unwrap().is_empty());
        a.ioctl(Ioctl::SetWriteOpt(SNDZERO)).unwrap();
        a.write(b"").unwrap();
        let m = b.getmsg().unwrap();
        assert_eq!(m.data.as_deref(), Some(&b""[..]));
    }

    #[test]
    fn test_read_rejects_control_messages() {
        let (mut a, mut b) = pipe();
        b.ioctl(Ioctl::SetReadOpt(RMSGD)).unwrap();
        a.writev(&[b"Writev ", b"data"]).unwrap();
        a.putpmsg(Some(b"proto"), None, 0, MsgFlags::BAND).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(b.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"Writ");
        assert_eq!(errno(&b.read(&mut buf).unwrap_err()), libc::EBADMSG);
    }

    #[test]
    fn test_fdinsert_writes_token() {
        let (mut a, mut b) = pipe();
        let token = b.raw_fd();
        let ctrl = [0u8; 8];
        a.ioctl(Ioctl::FdInsert(crate::FdInsert {
            ctrl: &ctrl,
            data: None,
            flags: MsgFlags::empty(),
            fd: token,
            offset: 4,
        }))
        .unwrap();
        let m = b.getmsg().unwrap();
        let ctrl = m.ctrl.unwrap();
        assert_eq!(&ctrl[4..8], &token.to_ne_bytes());
    }

    #[test]
    fn test_blocking_getmsg_wakes_on_send() {
        let (mut a, mut b) = pipe();
        b.set_nonblocking(false).unwrap();
        let reader = std::thread::spawn(move || b.getmsg().unwrap());
        std::thread::sleep(Duration::from_millis(20));
        a.write(b"wake").unwrap();
        let m = reader.join().unwrap();
        assert_eq!(m.data.as_deref(), Some(&b"wake"[..]));
    }
}
