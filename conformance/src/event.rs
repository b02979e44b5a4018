//! Actions a role injects, events it observes, and the protocol state that
//! links the two.
//!
//! Encoding reads the [`Snapshot`] so that an acknowledgement echoes what
//! the other side just asked for; decoding writes it.

use std::borrow::Cow;
use std::os::fd::RawFd;

use bytes::{BufMut, Bytes, BytesMut};
use tpi_stream::{Message, MsgFlags, StrIoctl};
use tpi_wire::consts::cap::{TC1_ACCEPTOR_ID, TC1_INFO};
use tpi_wire::consts::mgmt::T_NEGOTIATE;
use tpi_wire::consts::odf::{T_ODF_EX, T_ODF_MORE};
use tpi_wire::consts::prov::{T_ORDRELDATA, T_SENDZERO, T_XPG4_1};
use tpi_wire::consts::serv::T_COTS_ORD;
use tpi_wire::consts::state::TS_UNBND;
use tpi_wire::consts::timod::*;
use tpi_wire::{InfoAck, PrimKind, Primitive, peek_prim};

/// Text carried by `write(2)`.
pub const WRITE_DATA: &str = "Write test data.";
/// Text carried by `putmsg(2)` with no control part.
pub const PUTMSG_DATA: &str = "Putmsg test data.";
/// Text carried by `putpmsg(2)` on band 1.
pub const PUTPMSG_DATA: &str = "Putpmsg band test data.";
/// Appended to the request of the `*_DATA` controls.
pub const IOCTL_DATA: &str = "IO control test data.";

// ============================================================================
// Events
// ============================================================================

/// What a role saw on its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A decoded primitive, possibly with a data part.
    Prim(PrimKind),
    /// A data-only message.
    Data,
    /// A zero-length message or hangup.
    Eof,
    /// Nothing arrived before the wait expired.
    NoMsg,
    /// The role's guard timer fired.
    Timeout,
    /// A well-formed primitive with a tag the harness does not model.
    Unknown(i32),
    /// A control part that is not a valid primitive.
    DecodeError,
    /// The stream itself failed.
    Failure,
}

impl Event {
    pub fn name(&self) -> Cow<'static, str> {
        match self {
            Event::Prim(kind) => Cow::Borrowed(kind.name()),
            Event::Data => Cow::Borrowed("DATA"),
            Event::Eof => Cow::Borrowed("END OF FILE"),
            Event::NoMsg => Cow::Borrowed("NO MESSAGE"),
            Event::Timeout => Cow::Borrowed("TIMEOUT"),
            Event::Unknown(prim) => Cow::Owned(format!("UNKNOWN [{prim}]")),
            Event::DecodeError => Cow::Borrowed("DECODE ERROR"),
            Event::Failure => Cow::Borrowed("FAILURE"),
        }
    }

    /// True for the primitive `kind`.
    pub fn is(&self, kind: PrimKind) -> bool {
        *self == Event::Prim(kind)
    }
}

// ============================================================================
// Protocol state
// ============================================================================

/// Per-role record of the most recent protocol exchange.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub last_prim: i32,
    pub last_event: Option<Event>,
    pub last_errno: i32,
    pub last_retval: i32,
    pub last_t_errno: i32,
    pub last_qlen: i32,
    pub last_sequence: i32,
    pub last_servtype: i32,
    pub last_provflag: i32,
    pub last_tstate: i32,
    pub last_info: InfoAck,
    /// The last message read was high priority.
    pub last_prio: bool,
    pub more_flag: i32,
    pub data_flag: i32,
}

impl Default for Snapshot {
    fn default() -> Self {
        Snapshot {
            last_prim: 0,
            last_event: None,
            last_errno: 0,
            last_retval: 0,
            last_t_errno: 0,
            last_qlen: 2,
            last_sequence: 1,
            last_servtype: T_COTS_ORD,
            last_provflag: T_SENDZERO | T_ORDRELDATA | T_XPG4_1,
            last_tstate: TS_UNBND,
            last_info: InfoAck::default(),
            last_prio: false,
            more_flag: 0,
            data_flag: T_ODF_EX | T_ODF_MORE,
        }
    }
}

impl Snapshot {
    /// Records the fields of `prim` that later encodes echo back.
    pub fn absorb(&mut self, prim: &Primitive) {
        self.last_prim = prim.prim();
        match prim {
            Primitive::DisconReq { seq } | Primitive::ConnInd { seq, .. } => {
                self.last_sequence = *seq;
            }
            Primitive::DataReq { more } | Primitive::ExdataReq { more } => {
                self.more_flag = *more;
            }
            Primitive::BindReq { conind, .. } | Primitive::BindAck { conind, .. } => {
                self.last_qlen = *conind;
            }
            Primitive::InfoAck(info) | Primitive::CapabilityAck { info, .. } => {
                self.last_info = *info;
            }
            Primitive::ErrorAck {
                tli_error,
                unix_error,
                ..
            } => {
                self.last_t_errno = *tli_error;
                self.last_errno = *unix_error;
            }
            _ => {}
        }
    }
}

/// Classifies one message read off a stream and updates `snap`.
pub fn classify(msg: &Message, snap: &mut Snapshot) -> Event {
    snap.last_prio = msg.hipri;
    let event = match (msg.ctrl.as_deref(), msg.data.as_deref()) {
        (Some(ctrl), _) if !ctrl.is_empty() => match Primitive::decode(ctrl) {
            Ok(prim) => {
                snap.absorb(&prim);
                prim.kind().map_or(Event::Unknown(prim.prim()), Event::Prim)
            }
            Err(_) => {
                if let Some(tag) = peek_prim(ctrl) {
                    snap.last_prim = tag;
                }
                Event::DecodeError
            }
        },
        (_, Some(data)) if !data.is_empty() => Event::Data,
        (_, Some(_)) => Event::Eof,
        _ => Event::NoMsg,
    };
    snap.last_event = Some(event);
    event
}

// ============================================================================
// Parameters
// ============================================================================

/// Values a test body can override before injecting.
#[derive(Debug, Clone)]
pub struct Params {
    pub bufsize: i32,
    pub tidu: i32,
    pub mgmtflags: i32,
    /// `ic_timout` for controls, in milliseconds.
    pub timout: i32,
    /// Send `T_CAPABILITY_REQ` high priority.
    pub prio: bool,
    /// Descriptor passed with `T_CONN_RES`.
    pub resfd: Option<RawFd>,
    pub addr: Option<Bytes>,
    pub opts: Option<Bytes>,
    pub data: Option<Bytes>,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            bufsize: 256,
            tidu: 256,
            mgmtflags: T_NEGOTIATE,
            timout: 200,
            prio: true,
            resfd: None,
            addr: None,
            opts: None,
            data: None,
        }
    }
}

// ============================================================================
// Controls
// ============================================================================

/// A `timod` control operation as issued through `I_STR`.
///
/// The `*Disc` variants are `TI_SETMYNAME`/`TI_SETPEERNAME` wrapping a
/// `T_DISCON_REQ`; the `*Data` variants append [`IOCTL_DATA`] to the
/// wrapped request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TiControl {
    OGetinfo,
    OOptmgmt,
    OBind,
    OUnbind,
    LegacyGetinfo,
    LegacyOptmgmt,
    LegacyBind,
    LegacyUnbind,
    LegacyGetmyname,
    LegacyGetpeername,
    XtiHello,
    XtiGetState,
    XtiClearEvent,
    XtiMode,
    TliMode,
    Getinfo,
    Optmgmt,
    Bind,
    Unbind,
    Getmyname,
    Getpeername,
    Setmyname,
    Setpeername,
    SetmynameDisc,
    SetpeernameDisc,
    SetmynameData,
    SetpeernameData,
    SetmynameDiscData,
    SetpeernameDiscData,
    Sync,
    Getaddrs,
    Capability,
}

impl TiControl {
    /// The `ic_cmd` value.
    pub fn cmd(self) -> i32 {
        use TiControl::*;
        match self {
            OGetinfo => O_TI_GETINFO,
            OOptmgmt => O_TI_OPTMGMT,
            OBind => O_TI_BIND,
            OUnbind => O_TI_UNBIND,
            LegacyGetinfo => _O_TI_GETINFO,
            LegacyOptmgmt => _O_TI_OPTMGMT,
            LegacyBind => _O_TI_BIND,
            LegacyUnbind => _O_TI_UNBIND,
            LegacyGetmyname => _O_TI_GETMYNAME,
            LegacyGetpeername => _O_TI_GETPEERNAME,
            XtiHello => _O_TI_XTI_HELLO,
            XtiGetState => _O_TI_XTI_GET_STATE,
            XtiClearEvent => _O_TI_XTI_CLEAR_EVENT,
            XtiMode => _O_TI_XTI_MODE,
            TliMode => _O_TI_TLI_MODE,
            Getinfo => TI_GETINFO,
            Optmgmt => TI_OPTMGMT,
            Bind => TI_BIND,
            Unbind => TI_UNBIND,
            Getmyname => TI_GETMYNAME,
            Getpeername => TI_GETPEERNAME,
            Setmyname | SetmynameDisc | SetmynameData | SetmynameDiscData => TI_SETMYNAME,
            Setpeername | SetpeernameDisc | SetpeernameData | SetpeernameDiscData => {
                TI_SETPEERNAME
            }
            Sync => TI_SYNC,
            Getaddrs => TI_GETADDRS,
            Capability => TI_CAPABILITY,
        }
    }

    /// Name used in test case titles, e.g. `TI_SETMYNAME (disconnect)`.
    pub fn title(self) -> String {
        let base = tpi_wire::render::ioctl_name(self.cmd());
        match self {
            TiControl::SetmynameDisc
            | TiControl::SetpeernameDisc
            | TiControl::SetmynameDiscData
            | TiControl::SetpeernameDiscData => format!("{base} (disconnect)"),
            _ => base.into_owned(),
        }
    }

    fn carries_data(self) -> bool {
        matches!(
            self,
            TiControl::SetmynameData
                | TiControl::SetpeernameData
                | TiControl::SetmynameDiscData
                | TiControl::SetpeernameDiscData
        )
    }

    /// The primitive the control wraps, if any.
    fn wrapped(self, snap: &Snapshot, params: &Params) -> Option<Primitive> {
        use TiControl::*;
        let empty = Bytes::new;
        let prim = match self {
            OGetinfo | LegacyGetinfo | Getinfo => Primitive::InfoReq,
            OOptmgmt | LegacyOptmgmt | Optmgmt => Primitive::OptmgmtReq {
                opt: params.opts.clone().unwrap_or_default(),
                flags: params.mgmtflags,
            },
            OBind | LegacyBind | Bind => Primitive::BindReq {
                addr: empty(),
                conind: snap.last_qlen,
            },
            OUnbind | LegacyUnbind | Unbind => Primitive::UnbindReq,
            LegacyGetmyname | LegacyGetpeername | Getmyname | Getpeername | Getaddrs => {
                Primitive::AddrReq
            }
            Setmyname | SetmynameData => Primitive::ConnRes {
                acceptor_id: 0,
                opt: empty(),
                seq: snap.last_sequence,
            },
            Setpeername | SetpeernameData => Primitive::ConnReq {
                dest: empty(),
                opt: empty(),
            },
            SetmynameDisc | SetpeernameDisc | SetmynameDiscData | SetpeernameDiscData => {
                Primitive::DisconReq {
                    seq: snap.last_sequence,
                }
            }
            Capability => Primitive::CapabilityReq {
                bits1: TC1_INFO | TC1_ACCEPTOR_ID,
            },
            Sync | XtiHello | XtiGetState | XtiClearEvent | XtiMode | TliMode => return None,
        };
        Some(prim)
    }

    /// Builds the `strioctl` block. `ic_len` covers exactly the request.
    pub fn request(self, snap: &Snapshot, params: &Params) -> StrIoctl {
        let mut buf = BytesMut::new();
        match self.wrapped(snap, params) {
            Some(prim) => {
                buf.extend_from_slice(&prim.encode());
                if self.carries_data() {
                    buf.extend_from_slice(IOCTL_DATA.as_bytes());
                }
            }
            None if self == TiControl::Sync => {
                buf.put_u32_ne(TSRF_INFO_REQ | TSRF_IS_EXP_IN_RCVBUF | TSRF_QLEN_REQ);
            }
            None => {}
        }
        StrIoctl {
            cmd: self.cmd(),
            timout: params.timout,
            len: buf.len() as i32,
            buf: buf.to_vec(),
        }
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Something a role can do to its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Write,
    Writev,
    Push,
    Pop,
    Nonblock,
    Block,
    PutmsgData,
    PutpmsgData,
    /// Send the primitive, filled in from the snapshot and parameters.
    Prim(PrimKind),
    /// Only the four-byte tag of the last primitive seen.
    PrimTooShort,
    /// Two bytes of that tag.
    PrimWayTooShort,
    Control(TiControl),
}

/// The wire operation an [`Action`] turns into.
#[derive(Debug, Clone)]
pub enum Outgoing {
    Write(Bytes),
    Writev(Vec<Bytes>),
    Push(&'static str),
    Pop,
    Nonblocking(bool),
    Message {
        ctrl: Option<Bytes>,
        data: Option<Bytes>,
        band: u8,
        flags: MsgFlags,
    },
    /// `I_FDINSERT`: `fd` lands at `offset` in the control part.
    Insert {
        ctrl: Bytes,
        data: Option<Bytes>,
        fd: RawFd,
        offset: usize,
    },
    Control(StrIoctl),
}

/// A primitive plus how it travels.
struct Shaped {
    prim: Primitive,
    with_data: bool,
    band: u8,
    hipri: bool,
}

fn shaped(prim: Primitive, with_data: bool, band: u8, hipri: bool) -> Shaped {
    Shaped {
        prim,
        with_data,
        band,
        hipri,
    }
}

/// The information block a provider reports from `snap` and `params`.
pub fn info_of(snap: &Snapshot, params: &Params) -> InfoAck {
    InfoAck {
        tsdu_size: params.bufsize,
        etsdu_size: params.bufsize,
        cdata_size: params.bufsize,
        ddata_size: params.bufsize,
        addr_size: params.bufsize,
        opt_size: params.bufsize,
        tidu_size: params.tidu,
        serv_type: snap.last_servtype,
        current_state: snap.last_tstate,
        provider_flag: snap.last_provflag,
    }
}

fn shape(kind: PrimKind, snap: &Snapshot, params: &Params) -> Shaped {
    use PrimKind as K;
    let empty = Bytes::new;
    let addr = params.addr.clone().unwrap_or_default();
    let opts = params.opts.clone().unwrap_or_default();
    let seq = snap.last_sequence;
    let more = snap.more_flag;
    match kind {
        K::ConnReq => shaped(Primitive::ConnReq { dest: addr, opt: opts }, true, 0, false),
        K::ConnInd => shaped(
            Primitive::ConnInd {
                src: empty(),
                opt: empty(),
                seq,
            },
            true,
            0,
            false,
        ),
        K::ConnRes => shaped(
            Primitive::ConnRes {
                acceptor_id: 0,
                opt: opts,
                seq,
            },
            true,
            0,
            false,
        ),
        K::ConnCon => shaped(
            Primitive::ConnCon {
                res: empty(),
                opt: empty(),
            },
            true,
            0,
            false,
        ),
        K::DisconReq => shaped(Primitive::DisconReq { seq }, true, 0, false),
        K::DisconInd => shaped(Primitive::DisconInd { reason: 0, seq }, true, 0, false),
        K::DataReq => shaped(Primitive::DataReq { more }, true, 0, false),
        K::DataInd => shaped(Primitive::DataInd { more }, true, 0, false),
        K::ExdataReq => shaped(Primitive::ExdataReq { more }, true, 1, false),
        K::ExdataInd => shaped(Primitive::ExdataInd { more }, true, 1, false),
        K::InfoReq => shaped(Primitive::InfoReq, false, 0, true),
        K::InfoAck => shaped(Primitive::InfoAck(info_of(snap, params)), false, 0, true),
        K::BindReq => shaped(
            Primitive::BindReq {
                addr,
                conind: snap.last_qlen,
            },
            false,
            0,
            false,
        ),
        K::BindAck => shaped(
            Primitive::BindAck {
                addr: empty(),
                conind: snap.last_qlen,
            },
            false,
            0,
            true,
        ),
        K::UnbindReq => shaped(Primitive::UnbindReq, false, 0, false),
        K::ErrorAck => shaped(
            Primitive::ErrorAck {
                error_prim: snap.last_prim,
                tli_error: snap.last_t_errno,
                unix_error: snap.last_errno,
            },
            false,
            0,
            true,
        ),
        K::OkAck => shaped(Primitive::OkAck { correct_prim: 0 }, false, 0, true),
        K::UnitdataReq => shaped(
            Primitive::UnitdataReq { dest: addr, opt: opts },
            true,
            0,
            false,
        ),
        K::UnitdataInd => shaped(
            Primitive::UnitdataInd {
                src: empty(),
                opt: empty(),
            },
            true,
            0,
            false,
        ),
        K::UderrorInd => shaped(
            Primitive::UderrorInd {
                dest: empty(),
                opt: empty(),
                error_type: 0,
            },
            false,
            0,
            false,
        ),
        K::OptmgmtReq => shaped(
            Primitive::OptmgmtReq {
                opt: opts,
                flags: params.mgmtflags,
            },
            false,
            0,
            false,
        ),
        K::OptmgmtAck => shaped(
            Primitive::OptmgmtAck {
                opt: empty(),
                flags: params.mgmtflags,
            },
            false,
            0,
            true,
        ),
        K::OrdrelReq => shaped(Primitive::OrdrelReq, true, 0, false),
        K::OrdrelInd => shaped(Primitive::OrdrelInd, true, 0, false),
        K::OptdataReq => {
            let band = u8::from(snap.data_flag & T_ODF_EX != 0);
            shaped(
                Primitive::OptdataReq {
                    flags: snap.data_flag,
                    opt: opts,
                },
                true,
                band,
                false,
            )
        }
        K::NrmOptdataInd => shaped(
            Primitive::OptdataInd {
                flags: 0,
                opt: empty(),
            },
            true,
            0,
            false,
        ),
        K::ExpOptdataInd => shaped(
            Primitive::OptdataInd {
                flags: T_ODF_EX,
                opt: empty(),
            },
            true,
            1,
            false,
        ),
        K::AddrReq => shaped(Primitive::AddrReq, false, 0, true),
        K::AddrAck => shaped(
            Primitive::AddrAck {
                local: empty(),
                remote: empty(),
            },
            false,
            0,
            true,
        ),
        K::CapabilityReq => shaped(
            Primitive::CapabilityReq {
                bits1: TC1_INFO | TC1_ACCEPTOR_ID,
            },
            false,
            0,
            params.prio,
        ),
        K::CapabilityAck => shaped(
            Primitive::CapabilityAck {
                bits1: TC1_INFO | TC1_ACCEPTOR_ID,
                info: info_of(snap, params),
                acceptor_id: 0,
            },
            false,
            0,
            true,
        ),
    }
}

fn flags_for(hipri: bool) -> MsgFlags {
    if hipri { MsgFlags::HIPRI } else { MsgFlags::BAND }
}

impl Action {
    /// Turns the action into the operation to perform.
    pub fn encode(self, snap: &Snapshot, params: &Params) -> Outgoing {
        match self {
            Action::Write => Outgoing::Write(Bytes::from_static(WRITE_DATA.as_bytes())),
            Action::Writev => Outgoing::Writev(
                (0..4)
                    .map(|n| Bytes::from(format!("Writev test datum for vector {n}.")))
                    .collect(),
            ),
            Action::Push => Outgoing::Push("timod"),
            Action::Pop => Outgoing::Pop,
            Action::Nonblock => Outgoing::Nonblocking(true),
            Action::Block => Outgoing::Nonblocking(false),
            Action::PutmsgData => Outgoing::Message {
                ctrl: None,
                data: Some(Bytes::from_static(PUTMSG_DATA.as_bytes())),
                band: 0,
                flags: MsgFlags::BAND,
            },
            Action::PutpmsgData => Outgoing::Message {
                ctrl: None,
                data: Some(Bytes::from_static(PUTPMSG_DATA.as_bytes())),
                band: 1,
                flags: MsgFlags::BAND,
            },
            Action::PrimTooShort | Action::PrimWayTooShort => {
                let tag = snap.last_prim.to_ne_bytes();
                let len = if self == Action::PrimTooShort { 4 } else { 2 };
                Outgoing::Message {
                    ctrl: Some(Bytes::copy_from_slice(&tag[..len])),
                    data: None,
                    band: 0,
                    flags: MsgFlags::BAND,
                }
            }
            Action::Control(ctl) => Outgoing::Control(ctl.request(snap, params)),
            Action::Prim(kind) => {
                let s = shape(kind, snap, params);
                let ctrl = s.prim.encode();
                let data = if s.with_data { params.data.clone() } else { None };
                match (kind, params.resfd) {
                    (PrimKind::ConnRes, Some(fd)) => Outgoing::Insert {
                        ctrl,
                        data,
                        fd,
                        offset: 4,
                    },
                    _ => Outgoing::Message {
                        ctrl: Some(ctrl),
                        data,
                        band: s.band,
                        flags: flags_for(s.hipri),
                    },
                }
            }
        }
    }

    /// Transcript label for a transmitted primitive.
    pub fn label(self, snap: &Snapshot) -> Cow<'static, str> {
        match self {
            Action::Prim(PrimKind::OptdataReq) => {
                let ex = snap.data_flag & T_ODF_EX != 0;
                let more = snap.data_flag & T_ODF_MORE != 0;
                Cow::Borrowed(match (ex, more) {
                    (true, true) => "T_OPTDATA_REQ!+ ",
                    (true, false) => "T_OPTDATA_REQ!  ",
                    (false, true) => "T_OPTDATA_REQ+  ",
                    (false, false) => "T_OPTDATA_REQ   ",
                })
            }
            Action::Prim(PrimKind::NrmOptdataInd) => Cow::Borrowed("T_OPTDATA_IND   "),
            Action::Prim(PrimKind::ExpOptdataInd) => Cow::Borrowed("T_OPTDATA_IND!  "),
            Action::Prim(kind) => tpi_wire::render::prim_name(kind.prim()),
            Action::Control(ctl) => tpi_wire::render::ioctl_name(ctl.cmd()),
            Action::Write => Cow::Borrowed("write(2)"),
            Action::Writev => Cow::Borrowed("writev(2)"),
            Action::Push => Cow::Borrowed("I_PUSH"),
            Action::Pop => Cow::Borrowed("I_POP"),
            Action::Nonblock => Cow::Borrowed("O_NONBLOCK"),
            Action::Block => Cow::Borrowed("~O_NONBLOCK"),
            Action::PutmsgData => Cow::Borrowed("putmsg(2)"),
            Action::PutpmsgData => Cow::Borrowed("putpmsg(2)"),
            Action::PrimTooShort | Action::PrimWayTooShort => {
                tpi_wire::render::prim_name(snap.last_prim)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpi_wire::consts::prim::*;
    use tpi_wire::consts::terr::TSYSERR;
    use tpi_wire::consts::xti::{XTI_GENERIC, XTI_SNDBUF};

    fn message(out: Outgoing) -> (Primitive, Option<Bytes>, u8, MsgFlags) {
        match out {
            Outgoing::Message {
                ctrl: Some(ctrl),
                data,
                band,
                flags,
            } => (Primitive::decode(&ctrl).unwrap(), data, band, flags),
            other => panic!("not a message: {other:?}"),
        }
    }

    #[test]
    fn test_info_ack_echoes_snapshot() {
        let snap = Snapshot::default();
        let params = Params::default();
        let (prim, data, _, flags) =
            message(Action::Prim(PrimKind::InfoAck).encode(&snap, &params));
        assert_eq!(flags, MsgFlags::HIPRI);
        assert!(data.is_none());
        let Primitive::InfoAck(info) = prim else {
            panic!("expected T_INFO_ACK");
        };
        assert_eq!(info.tsdu_size, 256);
        assert_eq!(info.tidu_size, 256);
        assert_eq!(info.serv_type, T_COTS_ORD);
        assert_eq!(info.current_state, TS_UNBND);
        assert_eq!(info.provider_flag, T_SENDZERO | T_ORDRELDATA | T_XPG4_1);
    }

    #[test]
    fn test_error_ack_uses_last_errors() {
        let mut snap = Snapshot::default();
        snap.last_prim = T_INFO_REQ;
        snap.last_t_errno = TSYSERR;
        snap.last_errno = libc::EPROTO;
        let (prim, ..) = message(Action::Prim(PrimKind::ErrorAck).encode(&snap, &Params::default()));
        assert_eq!(
            prim,
            Primitive::ErrorAck {
                error_prim: T_INFO_REQ,
                tli_error: TSYSERR,
                unix_error: libc::EPROTO,
            }
        );
    }

    #[test]
    fn test_data_part_follows_params() {
        let snap = Snapshot::default();
        let mut params = Params::default();
        let (_, data, ..) = message(Action::Prim(PrimKind::ConnReq).encode(&snap, &params));
        assert!(data.is_none());
        params.data = Some(Bytes::from_static(b"payload"));
        let (_, data, ..) = message(Action::Prim(PrimKind::ConnReq).encode(&snap, &params));
        assert_eq!(data.as_deref(), Some(&b"payload"[..]));
        // Acknowledgements never carry data.
        let (_, data, ..) = message(Action::Prim(PrimKind::OkAck).encode(&snap, &params));
        assert!(data.is_none());
    }

    #[test]
    fn test_expedited_goes_on_band_one() {
        let snap = Snapshot::default();
        let params = Params::default();
        let (_, _, band, flags) = message(Action::Prim(PrimKind::ExdataReq).encode(&snap, &params));
        assert_eq!((band, flags), (1, MsgFlags::BAND));
        // The default data flag is expedited.
        let (prim, _, band, _) = message(Action::Prim(PrimKind::OptdataReq).encode(&snap, &params));
        assert_eq!(band, 1);
        assert_eq!(
            prim,
            Primitive::OptdataReq {
                flags: T_ODF_EX | T_ODF_MORE,
                opt: Bytes::new(),
            }
        );
        assert_eq!(Action::Prim(PrimKind::OptdataReq).label(&snap), "T_OPTDATA_REQ!+ ");
    }

    #[test]
    fn test_capability_req_priority() {
        let snap = Snapshot::default();
        let mut params = Params::default();
        let (_, _, _, flags) =
            message(Action::Prim(PrimKind::CapabilityReq).encode(&snap, &params));
        assert_eq!(flags, MsgFlags::HIPRI);
        params.prio = false;
        let (_, _, _, flags) =
            message(Action::Prim(PrimKind::CapabilityReq).encode(&snap, &params));
        assert_eq!(flags, MsgFlags::BAND);
    }

    #[test]
    fn test_conn_res_passes_descriptor() {
        let snap = Snapshot::default();
        let params = Params {
            resfd: Some(7),
            ..Params::default()
        };
        match Action::Prim(PrimKind::ConnRes).encode(&snap, &params) {
            Outgoing::Insert { fd, offset, ctrl, .. } => {
                assert_eq!((fd, offset), (7, 4));
                assert_eq!(peek_prim(&ctrl), Some(T_CONN_RES));
            }
            other => panic!("expected I_FDINSERT, got {other:?}"),
        }
    }

    #[test]
    fn test_too_short_primitives() {
        let mut snap = Snapshot::default();
        snap.last_prim = T_BIND_REQ;
        let params = Params::default();
        for (action, len) in [(Action::PrimTooShort, 4), (Action::PrimWayTooShort, 2)] {
            match action.encode(&snap, &params) {
                Outgoing::Message { ctrl: Some(c), .. } => assert_eq!(c.len(), len),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_control_request_length() {
        let snap = Snapshot::default();
        let params = Params::default();
        let ic = TiControl::Getinfo.request(&snap, &params);
        assert_eq!(ic.cmd, TI_GETINFO);
        assert_eq!(ic.timout, 200);
        assert_eq!(ic.len, 4);
        assert_eq!(peek_prim(&ic.buf), Some(T_INFO_REQ));

        let ic = TiControl::SetpeernameData.request(&snap, &params);
        let conn_req = Primitive::ConnReq {
            dest: Bytes::new(),
            opt: Bytes::new(),
        }
        .encode();
        assert_eq!(ic.cmd, TI_SETPEERNAME);
        assert_eq!(ic.len as usize, conn_req.len() + IOCTL_DATA.len());
        assert_eq!(&ic.buf[conn_req.len()..], IOCTL_DATA.as_bytes());

        let ic = TiControl::XtiHello.request(&snap, &params);
        assert_eq!(ic.len, 0);
        let ic = TiControl::Sync.request(&snap, &params);
        assert_eq!(ic.len, 4);
    }

    #[test]
    fn test_disconnect_controls_wrap_discon_req() {
        let mut snap = Snapshot::default();
        snap.last_sequence = 9;
        let ic = TiControl::SetmynameDisc.request(&snap, &Params::default());
        assert_eq!(ic.cmd, TI_SETMYNAME);
        assert_eq!(
            Primitive::decode(&ic.buf).unwrap(),
            Primitive::DisconReq { seq: 9 }
        );
        assert_eq!(
            TiControl::SetpeernameDiscData.title(),
            "TI_SETPEERNAME (disconnect)"
        );
    }

    #[test]
    fn test_classify_updates_snapshot() {
        let mut snap = Snapshot::default();
        let msg = Message {
            ctrl: Some(
                Primitive::BindReq {
                    addr: Bytes::new(),
                    conind: 5,
                }
                .encode(),
            ),
            data: None,
            band: 0,
            hipri: false,
        };
        assert_eq!(classify(&msg, &mut snap), Event::Prim(PrimKind::BindReq));
        assert_eq!(snap.last_qlen, 5);
        assert_eq!(snap.last_prim, T_BIND_REQ);

        let msg = Message {
            ctrl: Some(
                Primitive::ErrorAck {
                    error_prim: T_BIND_REQ,
                    tli_error: TSYSERR,
                    unix_error: libc::EPROTO,
                }
                .encode(),
            ),
            data: None,
            band: 0,
            hipri: true,
        };
        assert_eq!(classify(&msg, &mut snap), Event::Prim(PrimKind::ErrorAck));
        assert_eq!((snap.last_t_errno, snap.last_errno), (TSYSERR, libc::EPROTO));
        assert!(snap.last_prio);
        assert_eq!(snap.last_event, Some(Event::Prim(PrimKind::ErrorAck)));
    }

    #[test]
    fn test_classify_data_eof_and_garbage() {
        let mut snap = Snapshot::default();
        let data = |d: &'static [u8]| Message {
            data: Some(Bytes::from_static(d)),
            ..Message::default()
        };
        assert_eq!(classify(&data(b"abc"), &mut snap), Event::Data);
        assert_eq!(classify(&data(b""), &mut snap), Event::Eof);
        assert_eq!(classify(&Message::default(), &mut snap), Event::NoMsg);

        let short = Message {
            ctrl: Some(Bytes::from_static(&[1, 2])),
            ..Message::default()
        };
        assert_eq!(classify(&short, &mut snap), Event::DecodeError);

        let unknown = Message {
            ctrl: Some(Bytes::copy_from_slice(&99i32.to_ne_bytes())),
            ..Message::default()
        };
        assert_eq!(classify(&unknown, &mut snap), Event::Unknown(99));
    }

    #[test]
    fn test_corrupt_option_list_is_a_decode_error() {
        let mut snap = Snapshot::default();
        let corrupt = Primitive::OptmgmtReq {
            opt: Bytes::copy_from_slice(
                &[8u32, 0, 0, 0]
                    .iter()
                    .flat_map(|w| w.to_ne_bytes())
                    .collect::<Vec<u8>>(),
            ),
            flags: T_NEGOTIATE,
        };
        let msg = Message {
            ctrl: Some(corrupt.encode()),
            ..Message::default()
        };
        assert_eq!(classify(&msg, &mut snap), Event::DecodeError);
        assert_eq!(snap.last_prim, T_OPTMGMT_REQ);

        let sound = Primitive::OptmgmtReq {
            opt: tpi_wire::OptBuilder::new()
                .scalar(XTI_GENERIC, XTI_SNDBUF, 0, 4096)
                .build(),
            flags: T_NEGOTIATE,
        };
        let msg = Message {
            ctrl: Some(sound.encode()),
            ..Message::default()
        };
        assert_eq!(classify(&msg, &mut snap), Event::Prim(PrimKind::OptmgmtReq));
    }

    #[test]
    fn test_optdata_ind_splits_on_expedited() {
        let mut snap = Snapshot::default();
        let params = Params::default();
        for (kind, want) in [
            (PrimKind::NrmOptdataInd, PrimKind::NrmOptdataInd),
            (PrimKind::ExpOptdataInd, PrimKind::ExpOptdataInd),
        ] {
            let Outgoing::Message { ctrl, band, .. } = Action::Prim(kind).encode(&snap, &params)
            else {
                panic!("expected a message");
            };
            let msg = Message {
                ctrl,
                data: None,
                band,
                hipri: false,
            };
            assert_eq!(classify(&msg, &mut snap), Event::Prim(want));
        }
    }
}
