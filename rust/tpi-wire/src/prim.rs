//! TPI primitive layout.
//!
//! Every primitive is a fixed header of native-endian 32-bit fields followed
//! by the variable regions (addresses, options) that header references with
//! `(length, offset)` pairs. Offsets are relative to the start of the
//! control buffer.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::consts::{odf, prim::*};
use crate::opt::{OptError, OptIter};

// ============================================================================
// Types
// ============================================================================

/// Body of `T_INFO_ACK`, also embedded in `T_CAPABILITY_ACK`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InfoAck {
    pub tsdu_size: i32,
    pub etsdu_size: i32,
    pub cdata_size: i32,
    pub ddata_size: i32,
    pub addr_size: i32,
    pub opt_size: i32,
    pub tidu_size: i32,
    pub serv_type: i32,
    pub current_state: i32,
    pub provider_flag: i32,
}

impl InfoAck {
    /// Encoded size without the leading `PRIM_type`.
    pub const LEN: usize = 40;

    fn put(&self, enc: &mut Encoder) {
        enc.int(self.tsdu_size);
        enc.int(self.etsdu_size);
        enc.int(self.cdata_size);
        enc.int(self.ddata_size);
        enc.int(self.addr_size);
        enc.int(self.opt_size);
        enc.int(self.tidu_size);
        enc.int(self.serv_type);
        enc.int(self.current_state);
        enc.int(self.provider_flag);
    }

    fn get(dec: &mut Decoder<'_>) -> Self {
        InfoAck {
            tsdu_size: dec.int(),
            etsdu_size: dec.int(),
            cdata_size: dec.int(),
            ddata_size: dec.int(),
            addr_size: dec.int(),
            opt_size: dec.int(),
            tidu_size: dec.int(),
            serv_type: dec.int(),
            current_state: dec.int(),
            provider_flag: dec.int(),
        }
    }
}

/// A decoded (or to-be-encoded) TPI primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Primitive {
    ConnReq { dest: Bytes, opt: Bytes },
    ConnRes { acceptor_id: i32, opt: Bytes, seq: i32 },
    DisconReq { seq: i32 },
    DataReq { more: i32 },
    ExdataReq { more: i32 },
    InfoReq,
    BindReq { addr: Bytes, conind: i32 },
    UnbindReq,
    UnitdataReq { dest: Bytes, opt: Bytes },
    OptmgmtReq { opt: Bytes, flags: i32 },
    OrdrelReq,
    OptdataReq { flags: i32, opt: Bytes },
    AddrReq,
    CapabilityReq { bits1: u32 },
    ConnInd { src: Bytes, opt: Bytes, seq: i32 },
    ConnCon { res: Bytes, opt: Bytes },
    DisconInd { reason: i32, seq: i32 },
    DataInd { more: i32 },
    ExdataInd { more: i32 },
    InfoAck(InfoAck),
    BindAck { addr: Bytes, conind: i32 },
    ErrorAck { error_prim: i32, tli_error: i32, unix_error: i32 },
    OkAck { correct_prim: i32 },
    UnitdataInd { src: Bytes, opt: Bytes },
    UderrorInd { dest: Bytes, opt: Bytes, error_type: i32 },
    OptmgmtAck { opt: Bytes, flags: i32 },
    OrdrelInd,
    OptdataInd { flags: i32, opt: Bytes },
    AddrAck { local: Bytes, remote: Bytes },
    CapabilityAck { bits1: u32, info: InfoAck, acceptor_id: i32 },
    /// A well-formed tag this codec does not model.
    Unknown { prim: i32 },
}

/// Classification of a primitive for matching in test scripts.
///
/// Mirrors [`Primitive`] except that `T_OPTDATA_IND` is split on its
/// expedited flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimKind {
    ConnReq,
    ConnRes,
    DisconReq,
    DataReq,
    ExdataReq,
    InfoReq,
    BindReq,
    UnbindReq,
    UnitdataReq,
    OptmgmtReq,
    OrdrelReq,
    OptdataReq,
    AddrReq,
    CapabilityReq,
    ConnInd,
    ConnCon,
    DisconInd,
    DataInd,
    ExdataInd,
    InfoAck,
    BindAck,
    ErrorAck,
    OkAck,
    UnitdataInd,
    UderrorInd,
    OptmgmtAck,
    OrdrelInd,
    NrmOptdataInd,
    ExpOptdataInd,
    AddrAck,
    CapabilityAck,
}

impl PrimKind {
    /// The wire tag for this kind.
    pub fn prim(self) -> i32 {
        match self {
            PrimKind::ConnReq => T_CONN_REQ,
            PrimKind::ConnRes => T_CONN_RES,
            PrimKind::DisconReq => T_DISCON_REQ,
            PrimKind::DataReq => T_DATA_REQ,
            PrimKind::ExdataReq => T_EXDATA_REQ,
            PrimKind::InfoReq => T_INFO_REQ,
            PrimKind::BindReq => T_BIND_REQ,
            PrimKind::UnbindReq => T_UNBIND_REQ,
            PrimKind::UnitdataReq => T_UNITDATA_REQ,
            PrimKind::OptmgmtReq => T_OPTMGMT_REQ,
            PrimKind::OrdrelReq => T_ORDREL_REQ,
            PrimKind::OptdataReq => T_OPTDATA_REQ,
            PrimKind::AddrReq => T_ADDR_REQ,
            PrimKind::CapabilityReq => T_CAPABILITY_REQ,
            PrimKind::ConnInd => T_CONN_IND,
            PrimKind::ConnCon => T_CONN_CON,
            PrimKind::DisconInd => T_DISCON_IND,
            PrimKind::DataInd => T_DATA_IND,
            PrimKind::ExdataInd => T_EXDATA_IND,
            PrimKind::InfoAck => T_INFO_ACK,
            PrimKind::BindAck => T_BIND_ACK,
            PrimKind::ErrorAck => T_ERROR_ACK,
            PrimKind::OkAck => T_OK_ACK,
            PrimKind::UnitdataInd => T_UNITDATA_IND,
            PrimKind::UderrorInd => T_UDERROR_IND,
            PrimKind::OptmgmtAck => T_OPTMGMT_ACK,
            PrimKind::OrdrelInd => T_ORDREL_IND,
            PrimKind::NrmOptdataInd | PrimKind::ExpOptdataInd => T_OPTDATA_IND,
            PrimKind::AddrAck => T_ADDR_ACK,
            PrimKind::CapabilityAck => T_CAPABILITY_ACK,
        }
    }

    /// Name used in diagnostics (`T_INFO_REQ`, `T_OPTDATA_IND(EX)`, ...).
    pub fn name(self) -> &'static str {
        match self {
            PrimKind::NrmOptdataInd => "T_OPTDATA_IND",
            PrimKind::ExpOptdataInd => "T_OPTDATA_IND(EX)",
            other => crate::render::prim_label(other.prim()).unwrap_or("T_????_???"),
        }
    }
}

impl fmt::Display for PrimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Control part that cannot be interpreted as a primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Shorter than the `PRIM_type` discriminant.
    TooShort { len: usize },
    /// Shorter than the fixed header for its tag.
    Truncated { prim: i32, need: usize, have: usize },
    /// A `(length, offset)` pair points outside the buffer.
    Region {
        prim: i32,
        length: i32,
        offset: i32,
        have: usize,
    },
    /// The options region holds a malformed `t_opthdr`.
    Option { prim: i32, source: OptError },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::TooShort { len } => {
                write!(f, "control part of {len} bytes has no primitive type")
            }
            DecodeError::Truncated { prim, need, have } => write!(
                f,
                "{} needs {need} bytes, got {have}",
                crate::render::prim_name(*prim).trim_end_matches('-')
            ),
            DecodeError::Region {
                prim,
                length,
                offset,
                have,
            } => write!(
                f,
                "{} region (len {length}, off {offset}) outside {have} byte buffer",
                crate::render::prim_name(*prim).trim_end_matches('-')
            ),
            DecodeError::Option { prim, source } => write!(
                f,
                "{} options: {source}",
                crate::render::prim_name(*prim).trim_end_matches('-')
            ),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Option { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Fixed header length for a tag, including `PRIM_type`.
pub fn header_len(prim: i32) -> Option<usize> {
    let len = match prim {
        T_INFO_REQ | T_UNBIND_REQ | T_ORDREL_REQ | T_ADDR_REQ | T_ORDREL_IND => 4,
        T_DISCON_REQ | T_DATA_REQ | T_EXDATA_REQ | T_CAPABILITY_REQ | T_DATA_IND
        | T_EXDATA_IND | T_OK_ACK => 8,
        T_DISCON_IND => 12,
        T_BIND_REQ | T_OPTMGMT_REQ | T_OPTDATA_REQ | T_BIND_ACK | T_ERROR_ACK
        | T_OPTMGMT_ACK | T_OPTDATA_IND => 16,
        T_CONN_REQ | T_CONN_RES | T_UNITDATA_REQ | T_CONN_CON | T_UNITDATA_IND | T_ADDR_ACK => 20,
        T_CONN_IND | T_UDERROR_IND => 24,
        T_INFO_ACK => 4 + InfoAck::LEN,
        T_CAPABILITY_ACK => 8 + InfoAck::LEN + 4,
        _ => return None,
    };
    Some(len)
}

struct Encoder {
    head: BytesMut,
    tail: BytesMut,
    hdr_len: usize,
}

impl Encoder {
    fn new(prim: i32) -> Self {
        let hdr_len = header_len(prim).unwrap_or(4);
        let mut head = BytesMut::with_capacity(hdr_len);
        head.put_i32_ne(prim);
        Encoder {
            head,
            tail: BytesMut::new(),
            hdr_len,
        }
    }

    fn int(&mut self, v: i32) {
        self.head.put_i32_ne(v);
    }

    fn uint(&mut self, v: u32) {
        self.head.put_u32_ne(v);
    }

    /// Emits `(length, offset)` and appends the bytes after the header.
    fn region(&mut self, bytes: &[u8]) {
        let offset = if bytes.is_empty() {
            0
        } else {
            self.hdr_len + self.tail.len()
        };
        self.head.put_i32_ne(bytes.len() as i32);
        self.head.put_i32_ne(offset as i32);
        self.tail.extend_from_slice(bytes);
    }

    fn finish(mut self) -> Bytes {
        debug_assert_eq!(self.head.len(), self.hdr_len);
        self.head.unsplit(self.tail);
        self.head.freeze()
    }
}

impl Primitive {
    /// The wire tag.
    pub fn prim(&self) -> i32 {
        match self {
            Primitive::OptdataInd { .. } => T_OPTDATA_IND,
            Primitive::Unknown { prim } => *prim,
            other => other.kind().map(PrimKind::prim).unwrap_or(-1),
        }
    }

    /// Script-level classification; `None` for [`Primitive::Unknown`].
    pub fn kind(&self) -> Option<PrimKind> {
        let kind = match self {
            Primitive::ConnReq { .. } => PrimKind::ConnReq,
            Primitive::ConnRes { .. } => PrimKind::ConnRes,
            Primitive::DisconReq { .. } => PrimKind::DisconReq,
            Primitive::DataReq { .. } => PrimKind::DataReq,
            Primitive::ExdataReq { .. } => PrimKind::ExdataReq,
            Primitive::InfoReq => PrimKind::InfoReq,
            Primitive::BindReq { .. } => PrimKind::BindReq,
            Primitive::UnbindReq => PrimKind::UnbindReq,
            Primitive::UnitdataReq { .. } => PrimKind::UnitdataReq,
            Primitive::OptmgmtReq { .. } => PrimKind::OptmgmtReq,
            Primitive::OrdrelReq => PrimKind::OrdrelReq,
            Primitive::OptdataReq { .. } => PrimKind::OptdataReq,
            Primitive::AddrReq => PrimKind::AddrReq,
            Primitive::CapabilityReq { .. } => PrimKind::CapabilityReq,
            Primitive::ConnInd { .. } => PrimKind::ConnInd,
            Primitive::ConnCon { .. } => PrimKind::ConnCon,
            Primitive::DisconInd { .. } => PrimKind::DisconInd,
            Primitive::DataInd { .. } => PrimKind::DataInd,
            Primitive::ExdataInd { .. } => PrimKind::ExdataInd,
            Primitive::InfoAck(_) => PrimKind::InfoAck,
            Primitive::BindAck { .. } => PrimKind::BindAck,
            Primitive::ErrorAck { .. } => PrimKind::ErrorAck,
            Primitive::OkAck { .. } => PrimKind::OkAck,
            Primitive::UnitdataInd { .. } => PrimKind::UnitdataInd,
            Primitive::UderrorInd { .. } => PrimKind::UderrorInd,
            Primitive::OptmgmtAck { .. } => PrimKind::OptmgmtAck,
            Primitive::OrdrelInd => PrimKind::OrdrelInd,
            Primitive::OptdataInd { flags, .. } if flags & odf::T_ODF_EX != 0 => {
                PrimKind::ExpOptdataInd
            }
            Primitive::OptdataInd { .. } => PrimKind::NrmOptdataInd,
            Primitive::AddrAck { .. } => PrimKind::AddrAck,
            Primitive::CapabilityAck { .. } => PrimKind::CapabilityAck,
            Primitive::Unknown { .. } => return None,
        };
        Some(kind)
    }

    /// Encodes the control part.
    pub fn encode(&self) -> Bytes {
        let mut enc = Encoder::new(self.prim());
        match self {
            Primitive::ConnReq { dest, opt } | Primitive::UnitdataReq { dest, opt } => {
                enc.region(dest);
                enc.region(opt);
            }
            Primitive::ConnRes {
                acceptor_id,
                opt,
                seq,
            } => {
                enc.int(*acceptor_id);
                enc.region(opt);
                enc.int(*seq);
            }
            Primitive::DisconReq { seq } => enc.int(*seq),
            Primitive::DataReq { more }
            | Primitive::ExdataReq { more }
            | Primitive::DataInd { more }
            | Primitive::ExdataInd { more } => enc.int(*more),
            Primitive::InfoReq
            | Primitive::UnbindReq
            | Primitive::OrdrelReq
            | Primitive::AddrReq
            | Primitive::OrdrelInd
            | Primitive::Unknown { .. } => {}
            Primitive::BindReq { addr, conind } | Primitive::BindAck { addr, conind } => {
                enc.region(addr);
                enc.int(*conind);
            }
            Primitive::OptmgmtReq { opt, flags } | Primitive::OptmgmtAck { opt, flags } => {
                enc.region(opt);
                enc.int(*flags);
            }
            Primitive::OptdataReq { flags, opt } | Primitive::OptdataInd { flags, opt } => {
                enc.int(*flags);
                enc.region(opt);
            }
            Primitive::CapabilityReq { bits1 } => enc.uint(*bits1),
            Primitive::ConnInd { src, opt, seq } => {
                enc.region(src);
                enc.region(opt);
                enc.int(*seq);
            }
            Primitive::ConnCon { res, opt } => {
                enc.region(res);
                enc.region(opt);
            }
            Primitive::DisconInd { reason, seq } => {
                enc.int(*reason);
                enc.int(*seq);
            }
            Primitive::InfoAck(info) => info.put(&mut enc),
            Primitive::ErrorAck {
                error_prim,
                tli_error,
                unix_error,
            } => {
                enc.int(*error_prim);
                enc.int(*tli_error);
                enc.int(*unix_error);
            }
            Primitive::OkAck { correct_prim } => enc.int(*correct_prim),
            Primitive::UnitdataInd { src, opt } => {
                enc.region(src);
                enc.region(opt);
            }
            Primitive::UderrorInd {
                dest,
                opt,
                error_type,
            } => {
                enc.region(dest);
                enc.region(opt);
                enc.int(*error_type);
            }
            Primitive::AddrAck { local, remote } => {
                enc.region(local);
                enc.region(remote);
            }
            Primitive::CapabilityAck {
                bits1,
                info,
                acceptor_id,
            } => {
                enc.uint(*bits1);
                info.put(&mut enc);
                enc.int(*acceptor_id);
            }
        }
        enc.finish()
    }
}

// ============================================================================
// Decoding
// ============================================================================

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    prim: i32,
}

impl Decoder<'_> {
    // Callers check the fixed header length before reading fields.
    fn int(&mut self) -> i32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        i32::from_ne_bytes(raw)
    }

    fn uint(&mut self) -> u32 {
        self.int() as u32
    }

    fn region(&mut self) -> Result<Bytes, DecodeError> {
        let length = self.int();
        let offset = self.int();
        if length == 0 {
            return Ok(Bytes::new());
        }
        let escapes = || DecodeError::Region {
            prim: self.prim,
            length,
            offset,
            have: self.buf.len(),
        };
        let start = usize::try_from(offset).map_err(|_| escapes())?;
        let len = usize::try_from(length).map_err(|_| escapes())?;
        let end = start.checked_add(len).ok_or_else(|| escapes())?;
        if end > self.buf.len() {
            return Err(escapes());
        }
        Ok(Bytes::copy_from_slice(&self.buf[start..end]))
    }

    /// An options region, rejected unless every header in it is well formed.
    fn options(&mut self) -> Result<Bytes, DecodeError> {
        let opt = self.region()?;
        if let Some(Err(source)) = OptIter::new(&opt).find(Result::is_err) {
            return Err(DecodeError::Option {
                prim: self.prim,
                source,
            });
        }
        Ok(opt)
    }
}

/// Reads the `PRIM_type` discriminant without validating the rest.
pub fn peek_prim(ctrl: &[u8]) -> Option<i32> {
    let raw: [u8; 4] = ctrl.get(..4)?.try_into().ok()?;
    Some(i32::from_ne_bytes(raw))
}

impl Primitive {
    /// Decodes a control part.
    pub fn decode(ctrl: &[u8]) -> Result<Primitive, DecodeError> {
        let prim = peek_prim(ctrl).ok_or(DecodeError::TooShort { len: ctrl.len() })?;
        let Some(need) = header_len(prim) else {
            return Ok(Primitive::Unknown { prim });
        };
        if ctrl.len() < need {
            return Err(DecodeError::Truncated {
                prim,
                need,
                have: ctrl.len(),
            });
        }
        let mut d = Decoder {
            buf: ctrl,
            pos: 4,
            prim,
        };
        let p = match prim {
            T_CONN_REQ => Primitive::ConnReq {
                dest: d.region()?,
                opt: d.options()?,
            },
            T_CONN_RES => Primitive::ConnRes {
                acceptor_id: d.int(),
                opt: d.options()?,
                seq: d.int(),
            },
            T_DISCON_REQ => Primitive::DisconReq { seq: d.int() },
            T_DATA_REQ => Primitive::DataReq { more: d.int() },
            T_EXDATA_REQ => Primitive::ExdataReq { more: d.int() },
            T_INFO_REQ => Primitive::InfoReq,
            T_BIND_REQ => Primitive::BindReq {
                addr: d.region()?,
                conind: d.int(),
            },
            T_UNBIND_REQ => Primitive::UnbindReq,
            T_UNITDATA_REQ => Primitive::UnitdataReq {
                dest: d.region()?,
                opt: d.options()?,
            },
            T_OPTMGMT_REQ => Primitive::OptmgmtReq {
                opt: d.options()?,
                flags: d.int(),
            },
            T_ORDREL_REQ => Primitive::OrdrelReq,
            T_OPTDATA_REQ => Primitive::OptdataReq {
                flags: d.int(),
                opt: d.options()?,
            },
            T_ADDR_REQ => Primitive::AddrReq,
            T_CAPABILITY_REQ => Primitive::CapabilityReq { bits1: d.uint() },
            T_CONN_IND => Primitive::ConnInd {
                src: d.region()?,
                opt: d.options()?,
                seq: d.int(),
            },
            T_CONN_CON => Primitive::ConnCon {
                res: d.region()?,
                opt: d.options()?,
            },
            T_DISCON_IND => Primitive::DisconInd {
                reason: d.int(),
                seq: d.int(),
            },
            T_DATA_IND => Primitive::DataInd { more: d.int() },
            T_EXDATA_IND => Primitive::ExdataInd { more: d.int() },
            T_INFO_ACK => Primitive::InfoAck(InfoAck::get(&mut d)),
            T_BIND_ACK => Primitive::BindAck {
                addr: d.region()?,
                conind: d.int(),
            },
            T_ERROR_ACK => Primitive::ErrorAck {
                error_prim: d.int(),
                tli_error: d.int(),
                unix_error: d.int(),
            },
            T_OK_ACK => Primitive::OkAck {
                correct_prim: d.int(),
            },
            T_UNITDATA_IND => Primitive::UnitdataInd {
                src: d.region()?,
                opt: d.options()?,
            },
            T_UDERROR_IND => Primitive::UderrorInd {
                dest: d.region()?,
                opt: d.options()?,
                error_type: d.int(),
            },
            T_OPTMGMT_ACK => Primitive::OptmgmtAck {
                opt: d.options()?,
                flags: d.int(),
            },
            T_ORDREL_IND => Primitive::OrdrelInd,
            T_OPTDATA_IND => Primitive::OptdataInd {
                flags: d.int(),
                opt: d.options()?,
            },
            T_ADDR_ACK => Primitive::AddrAck {
                local: d.region()?,
                remote: d.region()?,
            },
            T_CAPABILITY_ACK => Primitive::CapabilityAck {
                bits1: d.uint(),
                info: InfoAck::get(&mut d),
                acceptor_id: d.int(),
            },
            _ => Primitive::Unknown { prim },
        };
        Ok(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{cap, prov, serv, state, xti};
    use crate::opt::OptBuilder;

    fn ne(words: &[i32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_ne_bytes()).collect()
    }

    #[test]
    fn test_conn_req_layout() {
        let opt = OptBuilder::new()
            .scalar(xti::XTI_GENERIC, xti::XTI_SNDBUF, 0, 32767)
            .build();
        let p = Primitive::ConnReq {
            dest: Bytes::from_static(b"ADDR"),
            opt: opt.clone(),
        };
        let wire = p.encode();
        let mut want = ne(&[T_CONN_REQ, 4, 20, 20, 24]);
        want.extend_from_slice(b"ADDR");
        want.extend_from_slice(&opt);
        assert_eq!(&wire[..], &want[..]);
        assert_eq!(Primitive::decode(&wire).unwrap(), p);
    }

    #[test]
    fn test_empty_region_has_zero_offset() {
        let wire = Primitive::BindReq {
            addr: Bytes::new(),
            conind: 2,
        }
        .encode();
        assert_eq!(&wire[..], &ne(&[T_BIND_REQ, 0, 0, 2])[..]);
    }

    #[test]
    fn test_options_follow_empty_dest() {
        let wire = Primitive::UnitdataReq {
            dest: Bytes::new(),
            opt: Bytes::from_static(b"abcd"),
        }
        .encode();
        assert_eq!(&wire[..20], &ne(&[T_UNITDATA_REQ, 0, 0, 4, 20])[..]);
    }

    #[test]
    fn test_capability_ack_embeds_info() {
        let info = InfoAck {
            tsdu_size: 256,
            etsdu_size: 256,
            cdata_size: 256,
            ddata_size: 256,
            addr_size: 256,
            opt_size: 256,
            tidu_size: 256,
            serv_type: serv::T_COTS_ORD,
            current_state: state::TS_UNBND,
            provider_flag: prov::T_SENDZERO | prov::T_ORDRELDATA | prov::T_XPG4_1,
        };
        let p = Primitive::CapabilityAck {
            bits1: cap::TC1_INFO | cap::TC1_ACCEPTOR_ID,
            info,
            acceptor_id: 0,
        };
        let wire = p.encode();
        assert_eq!(wire.len(), 56);
        assert_eq!(Primitive::decode(&wire).unwrap(), p);
    }

    #[test]
    fn test_error_ack_fields() {
        let wire = ne(&[T_ERROR_ACK, T_INFO_REQ, 8, 71]);
        match Primitive::decode(&wire).unwrap() {
            Primitive::ErrorAck {
                error_prim,
                tli_error,
                unix_error,
            } => {
                assert_eq!(error_prim, T_INFO_REQ);
                assert_eq!(tli_error, 8);
                assert_eq!(unix_error, 71);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_too_short() {
        assert_eq!(
            Primitive::decode(&[1, 0]),
            Err(DecodeError::TooShort { len: 2 })
        );
        assert!(Primitive::decode(&[]).is_err());
    }

    #[test]
    fn test_truncated_header() {
        let wire = ne(&[T_BIND_REQ]);
        assert_eq!(
            Primitive::decode(&wire),
            Err(DecodeError::Truncated {
                prim: T_BIND_REQ,
                need: 16,
                have: 4
            })
        );
    }

    #[test]
    fn test_region_outside_buffer() {
        let wire = ne(&[T_BIND_ACK, 16, 12, 0]);
        assert!(matches!(
            Primitive::decode(&wire),
            Err(DecodeError::Region { length: 16, .. })
        ));
        let negative = ne(&[T_BIND_ACK, 4, -8, 0]);
        assert!(matches!(
            Primitive::decode(&negative),
            Err(DecodeError::Region { offset: -8, .. })
        ));
    }

    #[test]
    fn test_short_option_header_is_rejected() {
        let mut wire = ne(&[T_OPTMGMT_REQ, 16, 16, 0x4]);
        wire.extend_from_slice(&ne(&[8, 0, 0, 0]));
        assert_eq!(
            Primitive::decode(&wire),
            Err(DecodeError::Option {
                prim: T_OPTMGMT_REQ,
                source: OptError::ShortLength { at: 0, len: 8 },
            })
        );
    }

    #[test]
    fn test_option_overrun_is_rejected() {
        let good = OptBuilder::new()
            .scalar(xti::XTI_GENERIC, xti::XTI_RCVBUF, 0, 1)
            .build();
        let mut opt = good.to_vec();
        opt.extend_from_slice(&ne(&[64, xti::XTI_GENERIC as i32, 0, 0]));
        let mut wire = ne(&[T_UNITDATA_IND, 0, 0, opt.len() as i32, 20]);
        wire.extend_from_slice(&opt);
        let err = Primitive::decode(&wire).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Option {
                prim: T_UNITDATA_IND,
                source: OptError::Overrun { at: 20, len: 64, .. },
            }
        ));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_well_formed_options_decode() {
        let opt = OptBuilder::new()
            .scalar(xti::XTI_GENERIC, xti::XTI_SNDBUF, 0, 4096)
            .push(xti::XTI_GENERIC, xti::XTI_DEBUG, 0, b"abc")
            .build();
        let p = Primitive::OptmgmtAck {
            opt,
            flags: 0x20,
        };
        assert_eq!(Primitive::decode(&p.encode()).unwrap(), p);
    }

    #[test]
    fn test_unknown_tag() {
        let wire = ne(&[99, 1, 2, 3]);
        let p = Primitive::decode(&wire).unwrap();
        assert_eq!(p, Primitive::Unknown { prim: 99 });
        assert_eq!(p.kind(), None);
        assert_eq!(p.prim(), 99);
    }

    #[test]
    fn test_optdata_ind_kind() {
        let exp = Primitive::OptdataInd {
            flags: odf::T_ODF_EX,
            opt: Bytes::new(),
        };
        let nrm = Primitive::OptdataInd {
            flags: 0,
            opt: Bytes::new(),
        };
        assert_eq!(exp.kind(), Some(PrimKind::ExpOptdataInd));
        assert_eq!(nrm.kind(), Some(PrimKind::NrmOptdataInd));
        assert_eq!(exp.prim(), T_OPTDATA_IND);
    }

    #[test]
    fn test_header_len_matches_encoding() {
        let samples = [
            Primitive::InfoReq,
            Primitive::DisconReq { seq: 1 },
            Primitive::DisconInd { reason: 0, seq: 1 },
            Primitive::OkAck { correct_prim: 0 },
            Primitive::AddrAck {
                local: Bytes::new(),
                remote: Bytes::new(),
            },
            Primitive::InfoAck(InfoAck::default()),
        ];
        for p in samples {
            assert_eq!(Some(p.encode().len()), header_len(p.prim()), "{p:?}");
        }
    }
}
