//! Numeric constants from the XNS 5.2 `tihdr.h`, `xti.h` and `timod.h` headers.
//!
//! Values are the SVR4 numbering that Linux STREAMS implementations share,
//! so encoded primitives interoperate with a real `timod` module.

/// Primitive type tags (`PRIM_type`).
pub mod prim {
    pub const T_CONN_REQ: i32 = 0;
    pub const T_CONN_RES: i32 = 1;
    pub const T_DISCON_REQ: i32 = 2;
    pub const T_DATA_REQ: i32 = 3;
    pub const T_EXDATA_REQ: i32 = 4;
    pub const T_INFO_REQ: i32 = 5;
    pub const T_BIND_REQ: i32 = 6;
    pub const T_UNBIND_REQ: i32 = 7;
    pub const T_UNITDATA_REQ: i32 = 8;
    pub const T_OPTMGMT_REQ: i32 = 9;
    pub const T_ORDREL_REQ: i32 = 10;
    pub const T_CONN_IND: i32 = 11;
    pub const T_CONN_CON: i32 = 12;
    pub const T_DISCON_IND: i32 = 13;
    pub const T_DATA_IND: i32 = 14;
    pub const T_EXDATA_IND: i32 = 15;
    pub const T_INFO_ACK: i32 = 16;
    pub const T_BIND_ACK: i32 = 17;
    pub const T_ERROR_ACK: i32 = 18;
    pub const T_OK_ACK: i32 = 19;
    pub const T_UNITDATA_IND: i32 = 20;
    pub const T_UDERROR_IND: i32 = 21;
    pub const T_OPTMGMT_ACK: i32 = 22;
    pub const T_ORDREL_IND: i32 = 23;
    pub const T_OPTDATA_REQ: i32 = 24;
    pub const T_ADDR_REQ: i32 = 25;
    pub const T_OPTDATA_IND: i32 = 26;
    pub const T_ADDR_ACK: i32 = 27;
    pub const T_CAPABILITY_REQ: i32 = 28;
    pub const T_CAPABILITY_ACK: i32 = 29;
}

/// TLI/XTI error codes carried in `T_ERROR_ACK.TLI_error`.
pub mod terr {
    pub const TBADADDR: i32 = 1;
    pub const TBADOPT: i32 = 2;
    pub const TACCES: i32 = 3;
    pub const TBADF: i32 = 4;
    pub const TNOADDR: i32 = 5;
    pub const TOUTSTATE: i32 = 6;
    pub const TBADSEQ: i32 = 7;
    pub const TSYSERR: i32 = 8;
    pub const TLOOK: i32 = 9;
    pub const TBADDATA: i32 = 10;
    pub const TBUFOVFLW: i32 = 11;
    pub const TFLOW: i32 = 12;
    pub const TNODATA: i32 = 13;
    pub const TNODIS: i32 = 14;
    pub const TNOUDERR: i32 = 15;
    pub const TBADFLAG: i32 = 16;
    pub const TNOREL: i32 = 17;
    pub const TNOTSUPPORT: i32 = 18;
    pub const TSTATECHNG: i32 = 19;
    pub const TNOSTRUCTYPE: i32 = 20;
    pub const TBADNAME: i32 = 21;
    pub const TBADQLEN: i32 = 22;
    pub const TADDRBUSY: i32 = 23;
    pub const TINDOUT: i32 = 24;
    pub const TPROVMISMATCH: i32 = 25;
    pub const TRESQLEN: i32 = 26;
    pub const TRESADDR: i32 = 27;
    pub const TQFULL: i32 = 28;
    pub const TPROTO: i32 = 29;
}

/// Service types (`SERV_type`).
pub mod serv {
    pub const T_COTS: i32 = 1;
    pub const T_COTS_ORD: i32 = 2;
    pub const T_CLTS: i32 = 3;
}

/// Interface states (`CURRENT_state`).
pub mod state {
    pub const TS_UNBND: i32 = 0;
    pub const TS_WACK_BREQ: i32 = 1;
    pub const TS_WACK_UREQ: i32 = 2;
    pub const TS_IDLE: i32 = 3;
    pub const TS_WACK_OPTREQ: i32 = 4;
    pub const TS_WACK_CREQ: i32 = 5;
    pub const TS_WCON_CREQ: i32 = 6;
    pub const TS_WRES_CIND: i32 = 7;
    pub const TS_WACK_CRES: i32 = 8;
    pub const TS_DATA_XFER: i32 = 9;
    pub const TS_WIND_ORDREL: i32 = 10;
    pub const TS_WREQ_ORDREL: i32 = 11;
    pub const TS_WACK_DREQ6: i32 = 12;
    pub const TS_WACK_DREQ7: i32 = 13;
    pub const TS_WACK_DREQ9: i32 = 14;
    pub const TS_WACK_DREQ10: i32 = 15;
    pub const TS_WACK_DREQ11: i32 = 16;
    pub const TS_NOSTATES: i32 = 17;
}

/// Provider flags (`PROVIDER_flag`).
pub mod prov {
    pub const T_SENDZERO: i32 = 0x001;
    pub const T_EXPINLINE: i32 = 0x002;
    pub const T_XPG4_1: i32 = 0x004;
    pub const T_ORDRELDATA: i32 = 0x008;
}

/// Option management flags and per-option status values.
pub mod mgmt {
    pub const T_NEGOTIATE: i32 = 0x004;
    pub const T_CHECK: i32 = 0x008;
    pub const T_DEFAULT: i32 = 0x010;
    pub const T_SUCCESS: i32 = 0x020;
    pub const T_FAILURE: i32 = 0x040;
    pub const T_CURRENT: i32 = 0x080;
    pub const T_PARTSUCCESS: i32 = 0x100;
    pub const T_READONLY: i32 = 0x200;
    pub const T_NOTSUPPORT: i32 = 0x400;
}

/// `T_OPTDATA` data flags.
pub mod odf {
    pub const T_ODF_MORE: i32 = 0x001;
    pub const T_ODF_EX: i32 = 0x002;
}

/// `T_CAPABILITY_REQ` bits.
pub mod cap {
    pub const TC1_INFO: u32 = 1 << 0;
    pub const TC1_ACCEPTOR_ID: u32 = 1 << 1;
}

/// Option levels and names.
pub mod xti {
    pub const T_ALLLEVELS: u32 = u32::MAX;
    pub const T_ALLOPT: u32 = 0;
    pub const XTI_GENERIC: u32 = 0xffff;
    pub const XTI_DEBUG: u32 = 0x0001;
    pub const XTI_LINGER: u32 = 0x0080;
    pub const XTI_SNDBUF: u32 = 0x1001;
    pub const XTI_RCVBUF: u32 = 0x1002;
    pub const XTI_SNDLOWAT: u32 = 0x1003;
    pub const XTI_RCVLOWAT: u32 = 0x1004;
}

/// `timod` control operation codes.
pub mod timod {
    pub const TIMOD: i32 = (b'T' as i32) << 8;

    pub const O_TI_GETINFO: i32 = TIMOD | 100;
    pub const O_TI_OPTMGMT: i32 = TIMOD | 101;
    pub const O_TI_BIND: i32 = TIMOD | 102;
    pub const O_TI_UNBIND: i32 = TIMOD | 103;

    pub const _O_TI_GETINFO: i32 = TIMOD | 104;
    pub const _O_TI_OPTMGMT: i32 = TIMOD | 105;
    pub const _O_TI_BIND: i32 = TIMOD | 106;
    pub const _O_TI_UNBIND: i32 = TIMOD | 107;
    pub const _O_TI_GETMYNAME: i32 = TIMOD | 108;
    pub const _O_TI_GETPEERNAME: i32 = TIMOD | 109;
    pub const _O_TI_XTI_HELLO: i32 = TIMOD | 110;
    pub const _O_TI_XTI_GET_STATE: i32 = TIMOD | 111;
    pub const _O_TI_XTI_CLEAR_EVENT: i32 = TIMOD | 112;
    pub const _O_TI_XTI_MODE: i32 = TIMOD | 113;
    pub const _O_TI_TLI_MODE: i32 = TIMOD | 114;

    pub const TI_GETINFO: i32 = TIMOD | 140;
    pub const TI_OPTMGMT: i32 = TIMOD | 141;
    pub const TI_BIND: i32 = TIMOD | 142;
    pub const TI_UNBIND: i32 = TIMOD | 143;
    pub const TI_GETMYNAME: i32 = TIMOD | 144;
    pub const TI_GETPEERNAME: i32 = TIMOD | 145;
    pub const TI_SETMYNAME: i32 = TIMOD | 146;
    pub const TI_SETPEERNAME: i32 = TIMOD | 147;
    pub const TI_SYNC: i32 = TIMOD | 148;
    pub const TI_GETADDRS: i32 = TIMOD | 149;
    pub const TI_CAPABILITY: i32 = TIMOD | 150;

    /// `ti_sync_req.tsr_flags`
    pub const TSRF_INFO_REQ: u32 = 0x04;
    pub const TSRF_IS_EXP_IN_RCVBUF: u32 = 0x08;
    pub const TSRF_QLEN_REQ: u32 = 0x10;
}
