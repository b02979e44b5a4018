//! Simulated `timod` for the in-process pipe.
//!
//! A TI_* control wraps a request primitive. The module sends the request
//! down to the peer, then waits on its own stream head for the matching
//! acknowledgement (or `T_ERROR_ACK`) and hands it back as the control
//! reply. Only one control runs per stream end; a second caller waits for
//! the first to finish, bounded by its own `ic_timout`.

use std::io;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::MutexGuard;
use tracing::debug;

use tpi_wire::consts::{prim::*, state::TS_UNBND, terr::TSYSERR, timod::*};
use tpi_wire::{InfoAck, Primitive, peek_prim};

use crate::mem::{MemEnd, PipeState, wait};
use crate::stropts::DEFAULT_IC_TIMOUT_SECS;
use crate::{Message, StrIoctl, os_error};

/// Whether `cmd` is a control the module interprets.
pub(crate) fn handles(cmd: i32) -> bool {
    (O_TI_GETINFO..=_O_TI_TLI_MODE).contains(&cmd) || (TI_GETINFO..=TI_CAPABILITY).contains(&cmd)
}

fn ack_for(request: i32) -> Option<i32> {
    let ack = match request {
        T_INFO_REQ => T_INFO_ACK,
        T_OPTMGMT_REQ => T_OPTMGMT_ACK,
        T_BIND_REQ => T_BIND_ACK,
        T_ADDR_REQ => T_ADDR_ACK,
        T_CAPABILITY_REQ => T_CAPABILITY_ACK,
        T_UNBIND_REQ | T_CONN_RES | T_CONN_REQ | T_DISCON_REQ => T_OK_ACK,
        _ => return None,
    };
    Some(ack)
}

fn ic_deadline(timout: i32) -> Option<Instant> {
    match timout {
        t if t < 0 => None,
        0 => Some(Instant::now() + Duration::from_secs(DEFAULT_IC_TIMOUT_SECS)),
        t => Some(Instant::now() + Duration::from_millis(t as u64)),
    }
}

/// Runs one control with the pipe lock held on entry.
pub(crate) fn control(
    end: &MemEnd,
    mut st: MutexGuard<'_, PipeState>,
    ic: &mut StrIoctl,
) -> io::Result<i32> {
    let until = ic_deadline(ic.timout);
    while st.sides[end.side].busy {
        if !wait(&end.shared.cond, &mut st, until) {
            return Err(os_error(libc::ETIME));
        }
    }
    st.sides[end.side].busy = true;
    let out = run(end, &mut st, ic, until);
    st.sides[end.side].busy = false;
    end.shared.cond.notify_all();
    out
}

fn run(
    end: &MemEnd,
    st: &mut MutexGuard<'_, PipeState>,
    ic: &mut StrIoctl,
    until: Option<Instant>,
) -> io::Result<i32> {
    match ic.cmd {
        _O_TI_XTI_HELLO | _O_TI_XTI_CLEAR_EVENT | _O_TI_XTI_MODE | _O_TI_TLI_MODE => {
            reply(ic, &[]);
            return Ok(0);
        }
        _O_TI_XTI_GET_STATE => {
            reply(ic, &TS_UNBND.to_ne_bytes());
            return Ok(0);
        }
        TI_SYNC => return sync(end, st, ic, until),
        _ => {}
    }

    let len = usize::try_from(ic.len)
        .ok()
        .filter(|&n| n <= ic.buf.len())
        .ok_or_else(|| os_error(libc::EINVAL))?;
    let arg = &ic.buf[..len];
    let request = Primitive::decode(arg).map_err(|_| os_error(libc::EINVAL))?;
    let ack = ack_for(request.prim()).ok_or_else(|| os_error(libc::EINVAL))?;

    // Bytes past the primitive and its regions travel as the data part.
    let ctrl = request.encode();
    let data = (arg.len() > ctrl.len()).then(|| Bytes::copy_from_slice(&arg[ctrl.len()..]));
    debug!(
        cmd = %tpi_wire::render::ioctl_name(ic.cmd),
        request = %tpi_wire::render::prim_name(request.prim()),
        "timod sends request"
    );
    end.send_locked(
        st,
        Message {
            ctrl: Some(ctrl),
            data,
            band: 0,
            hipri: false,
        },
    )?;

    let reply_ctrl = await_ack(end, st, ack, until)?;
    finish(ic, &reply_ctrl)
}

/// Removes the first `ack` or `T_ERROR_ACK` from this end's stream head.
fn await_ack(
    end: &MemEnd,
    st: &mut MutexGuard<'_, PipeState>,
    ack: i32,
    until: Option<Instant>,
) -> io::Result<Bytes> {
    loop {
        let side = &mut st.sides[end.side];
        let found = side.inbound.iter().position(|m| {
            m.ctrl
                .as_deref()
                .and_then(peek_prim)
                .is_some_and(|p| p == ack || p == T_ERROR_ACK)
        });
        if let Some(ctrl) = found
            .and_then(|at| side.inbound.remove(at))
            .and_then(|m| m.ctrl)
        {
            return Ok(ctrl);
        }
        if side.hungup {
            return Err(os_error(libc::ENXIO));
        }
        if !wait(&end.shared.cond, st, until) {
            return Err(os_error(libc::ETIME));
        }
    }
}

/// Turns the acknowledgement into the control's return value.
fn finish(ic: &mut StrIoctl, ack: &[u8]) -> io::Result<i32> {
    match Primitive::decode(ack) {
        Ok(Primitive::ErrorAck {
            tli_error,
            unix_error,
            ..
        }) => {
            reply(ic, &[]);
            if tli_error == TSYSERR {
                Ok(tli_error | ((unix_error & 0xff) << 8))
            } else {
                Ok(tli_error & 0xff)
            }
        }
        Ok(_) => {
            reply(ic, ack);
            Ok(0)
        }
        Err(_) => Err(os_error(libc::EPROTO)),
    }
}

fn reply(ic: &mut StrIoctl, bytes: &[u8]) {
    ic.buf.clear();
    ic.buf.extend_from_slice(bytes);
    ic.len = bytes.len() as i32;
}

/// `TI_SYNC`: refreshes the provider information block.
///
/// The reply is `struct ti_sync_ack`: the `T_INFO_ACK` fields followed by
/// `tsa_qlen` and `tsa_flags`.
fn sync(
    end: &MemEnd,
    st: &mut MutexGuard<'_, PipeState>,
    ic: &mut StrIoctl,
    until: Option<Instant>,
) -> io::Result<i32> {
    let flags = ic
        .buf
        .get(..4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(u32::from_ne_bytes)
        .ok_or_else(|| os_error(libc::EINVAL))?;
    let mut info = InfoAck::default();
    if flags & TSRF_INFO_REQ != 0 {
        end.send_locked(
            st,
            Message {
                ctrl: Some(Primitive::InfoReq.encode()),
                data: None,
                band: 0,
                hipri: true,
            },
        )?;
        let ack = await_ack(end, st, T_INFO_ACK, until)?;
        match Primitive::decode(&ack) {
            Ok(Primitive::InfoAck(got)) => info = got,
            Ok(Primitive::ErrorAck { .. }) => return finish(ic, &ack),
            _ => return Err(os_error(libc::EPROTO)),
        }
    }
    let mut out = Primitive::InfoAck(info).encode().to_vec();
    out.extend_from_slice(&0u32.to_ne_bytes());
    out.extend_from_slice(&0u32.to_ne_bytes());
    reply(ic, &out);
    Ok(0)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::mem::pipe;
    use crate::{Channel, Ioctl, MsgFlags, PollFlags, errno};

    fn str_ioctl(cmd: i32, prim: Primitive, timout: i32) -> StrIoctl {
        let buf = prim.encode().to_vec();
        StrIoctl {
            cmd,
            timout,
            len: buf.len() as i32,
            buf,
        }
    }

    fn answer(mut bottom: impl Channel, want: i32, reply: Primitive) -> Message {
        assert!(!bottom.poll(PollFlags::READABLE, 2000).unwrap().is_empty());
        let msg = bottom.getmsg().unwrap();
        assert_eq!(msg.ctrl.as_deref().and_then(peek_prim), Some(want));
        bottom
            .putpmsg(Some(&reply.encode()), None, 0, MsgFlags::HIPRI)
            .unwrap();
        msg
    }

    #[test]
    fn test_getinfo_round_trip() {
        let (mut top, bottom) = pipe();
        top.ioctl(Ioctl::Push("timod")).unwrap();
        let info = InfoAck {
            tsdu_size: 256,
            tidu_size: 256,
            ..InfoAck::default()
        };
        let peer = thread::spawn(move || answer(bottom, T_INFO_REQ, Primitive::InfoAck(info)));
        let mut ic = str_ioctl(TI_GETINFO, Primitive::InfoReq, 1000);
        assert_eq!(top.ioctl(Ioctl::Str(&mut ic)).unwrap(), 0);
        peer.join().unwrap();
        assert_eq!(
            Primitive::decode(&ic.buf[..ic.len as usize]).unwrap(),
            Primitive::InfoAck(info)
        );
    }

    #[test]
    fn test_error_ack_encodes_unix_error() {
        let (mut top, bottom) = pipe();
        top.ioctl(Ioctl::Push("timod")).unwrap();
        let nak = Primitive::ErrorAck {
            error_prim: T_UNBIND_REQ,
            tli_error: TSYSERR,
            unix_error: libc::EPROTO,
        };
        let peer = thread::spawn(move || answer(bottom, T_UNBIND_REQ, nak));
        let mut ic = str_ioctl(TI_UNBIND, Primitive::UnbindReq, 1000);
        let ret = top.ioctl(Ioctl::Str(&mut ic)).unwrap();
        peer.join().unwrap();
        assert_eq!(ret & 0xff, TSYSERR);
        assert_eq!((ret >> 8) & 0xff, libc::EPROTO);
    }

    #[test]
    fn test_trailing_bytes_become_data() {
        let (mut top, bottom) = pipe();
        top.ioctl(Ioctl::Push("timod")).unwrap();
        let peer = thread::spawn(move || {
            answer(bottom, T_CONN_RES, Primitive::OkAck { correct_prim: 0 })
        });
        let mut ic = str_ioctl(
            TI_SETMYNAME,
            Primitive::ConnRes {
                acceptor_id: 0,
                opt: Bytes::new(),
                seq: 1,
            },
            1000,
        );
        ic.buf.extend_from_slice(b"IO control test data.");
        ic.len = ic.buf.len() as i32;
        assert_eq!(top.ioctl(Ioctl::Str(&mut ic)).unwrap(), 0);
        let seen = peer.join().unwrap();
        assert_eq!(seen.ctrl.map(|c| c.len()), Some(20));
        assert_eq!(seen.data.as_deref(), Some(&b"IO control test data."[..]));
    }

    #[test]
    fn test_times_out_without_ack() {
        let (mut top, _bottom) = pipe();
        top.ioctl(Ioctl::Push("timod")).unwrap();
        let mut ic = str_ioctl(TI_GETINFO, Primitive::InfoReq, 20);
        let err = top.ioctl(Ioctl::Str(&mut ic)).unwrap_err();
        assert_eq!(errno(&err), libc::ETIME);
    }

    #[test]
    fn test_requires_timod() {
        let (mut top, _bottom) = pipe();
        let mut ic = str_ioctl(TI_GETINFO, Primitive::InfoReq, 20);
        assert_eq!(errno(&top.ioctl(Ioctl::Str(&mut ic)).unwrap_err()), libc::EINVAL);
    }

    #[test]
    fn test_controls_are_serialized() {
        let (mut top, mut bottom) = pipe();
        top.ioctl(Ioctl::Push("timod")).unwrap();
        let mut second = top.try_clone().unwrap();
        let first = thread::spawn(move || {
            let mut ic = str_ioctl(TI_GETINFO, Primitive::InfoReq, 2000);
            top.ioctl(Ioctl::Str(&mut ic))
        });
        let other = thread::spawn(move || {
            let mut ic = str_ioctl(TI_GETINFO, Primitive::InfoReq, 2000);
            second.ioctl(Ioctl::Str(&mut ic))
        });
        let info = Primitive::InfoAck(InfoAck::default()).encode();
        let nak = Primitive::ErrorAck {
            error_prim: T_INFO_REQ,
            tli_error: TSYSERR,
            unix_error: libc::EPROTO,
        }
        .encode();
        for reply in [info, nak] {
            assert!(!bottom.poll(PollFlags::READABLE, 2000).unwrap().is_empty());
            let req = bottom.getmsg().unwrap();
            assert_eq!(req.ctrl.as_deref().and_then(peek_prim), Some(T_INFO_REQ));
            // Nothing else is sent while the first control is outstanding.
            assert!(bottom.poll(PollFlags::READABLE, 20).unwrap().is_empty());
            bottom.putpmsg(Some(&reply), None, 0, MsgFlags::HIPRI).unwrap();
        }
        let mut results = [first.join().unwrap().unwrap(), other.join().unwrap().unwrap()];
        results.sort();
        assert_eq!(results[0], 0);
        assert_eq!(results[1] & 0xff, TSYSERR);
    }
}
