//! Code-to-token tables for transcripts.
//!
//! Every function is a pure lookup; unknown codes render as `[<n>]` so two
//! transcripts of the same run compare equal.

use std::borrow::Cow;

use crate::consts::{mgmt, prim::*, serv, state::*, terr::*, timod::*, xti::*};

fn unknown(code: i64) -> Cow<'static, str> {
    Cow::Owned(format!("[{code}]"))
}

/// Bare primitive name, `None` for an unknown tag.
pub fn prim_label(prim: i32) -> Option<&'static str> {
    let name = match prim {
        T_CONN_REQ => "T_CONN_REQ",
        T_CONN_RES => "T_CONN_RES",
        T_DISCON_REQ => "T_DISCON_REQ",
        T_DATA_REQ => "T_DATA_REQ",
        T_EXDATA_REQ => "T_EXDATA_REQ",
        T_INFO_REQ => "T_INFO_REQ",
        T_BIND_REQ => "T_BIND_REQ",
        T_UNBIND_REQ => "T_UNBIND_REQ",
        T_UNITDATA_REQ => "T_UNITDATA_REQ",
        T_OPTMGMT_REQ => "T_OPTMGMT_REQ",
        T_ORDREL_REQ => "T_ORDREL_REQ",
        T_CONN_IND => "T_CONN_IND",
        T_CONN_CON => "T_CONN_CON",
        T_DISCON_IND => "T_DISCON_IND",
        T_DATA_IND => "T_DATA_IND",
        T_EXDATA_IND => "T_EXDATA_IND",
        T_INFO_ACK => "T_INFO_ACK",
        T_BIND_ACK => "T_BIND_ACK",
        T_ERROR_ACK => "T_ERROR_ACK",
        T_OK_ACK => "T_OK_ACK",
        T_UNITDATA_IND => "T_UNITDATA_IND",
        T_UDERROR_IND => "T_UDERROR_IND",
        T_OPTMGMT_ACK => "T_OPTMGMT_ACK",
        T_ORDREL_IND => "T_ORDREL_IND",
        T_OPTDATA_REQ => "T_OPTDATA_REQ",
        T_ADDR_REQ => "T_ADDR_REQ",
        T_OPTDATA_IND => "T_OPTDATA_IND",
        T_ADDR_ACK => "T_ADDR_ACK",
        T_CAPABILITY_REQ => "T_CAPABILITY_REQ",
        T_CAPABILITY_ACK => "T_CAPABILITY_ACK",
        _ => return None,
    };
    Some(name)
}

/// Primitive name padded with dashes to the 16-column transcript field.
pub fn prim_name(prim: i32) -> Cow<'static, str> {
    match prim_label(prim) {
        Some(name) => Cow::Owned(format!("{name:-<16}")),
        None => unknown(prim.into()),
    }
}

/// Unix error number, `ok` for zero.
pub fn errno_name(err: i32) -> Cow<'static, str> {
    let name = match err {
        0 => return Cow::Borrowed("ok"),
        libc::EPERM => "[EPERM]",
        libc::ENOENT => "[ENOENT]",
        libc::ESRCH => "[ESRCH]",
        libc::EINTR => "[EINTR]",
        libc::EIO => "[EIO]",
        libc::ENXIO => "[ENXIO]",
        libc::E2BIG => "[E2BIG]",
        libc::EBADF => "[EBADF]",
        libc::ECHILD => "[ECHILD]",
        libc::EAGAIN => "[EAGAIN]",
        libc::ENOMEM => "[ENOMEM]",
        libc::EACCES => "[EACCES]",
        libc::EFAULT => "[EFAULT]",
        libc::EBUSY => "[EBUSY]",
        libc::EEXIST => "[EEXIST]",
        libc::ENODEV => "[ENODEV]",
        libc::EINVAL => "[EINVAL]",
        libc::ENOTTY => "[ENOTTY]",
        libc::EPIPE => "[EPIPE]",
        libc::ERANGE => "[ERANGE]",
        libc::ENOSTR => "[ENOSTR]",
        libc::ENODATA => "[ENODATA]",
        libc::ETIME => "[ETIME]",
        libc::ENOSR => "[ENOSR]",
        libc::EPROTO => "[EPROTO]",
        libc::EBADMSG => "[EBADMSG]",
        libc::EOVERFLOW => "[EOVERFLOW]",
        libc::EOPNOTSUPP => "[EOPNOTSUPP]",
        libc::ETIMEDOUT => "[ETIMEDOUT]",
        libc::ECONNREFUSED => "[ECONNREFUSED]",
        _ => return unknown(err.into()),
    };
    Cow::Borrowed(name)
}

/// TLI error; `TSYSERR` renders the wrapped Unix error instead.
pub fn t_errno_name(err: i32, syserr: i32) -> Cow<'static, str> {
    let name = match err {
        0 => "ok",
        TSYSERR => return errno_name(syserr),
        TBADADDR => "[TBADADDR]",
        TBADOPT => "[TBADOPT]",
        TACCES => "[TACCES]",
        TBADF => "[TBADF]",
        TNOADDR => "[TNOADDR]",
        TOUTSTATE => "[TOUTSTATE]",
        TBADSEQ => "[TBADSEQ]",
        TLOOK => "[TLOOK]",
        TBADDATA => "[TBADDATA]",
        TBUFOVFLW => "[TBUFOVFLW]",
        TFLOW => "[TFLOW]",
        TNODATA => "[TNODATA]",
        TNODIS => "[TNODIS]",
        TNOUDERR => "[TNOUDERR]",
        TBADFLAG => "[TBADFLAG]",
        TNOREL => "[TNOREL]",
        TNOTSUPPORT => "[TNOTSUPPORT]",
        TSTATECHNG => "[TSTATECHNG]",
        TNOSTRUCTYPE => "[TNOSTRUCTYPE]",
        TBADNAME => "[TBADNAME]",
        TBADQLEN => "[TBADQLEN]",
        TADDRBUSY => "[TADDRBUSY]",
        TINDOUT => "[TINDOUT]",
        TPROVMISMATCH => "[TPROVMISMATCH]",
        TRESQLEN => "[TRESQLEN]",
        TRESADDR => "[TRESADDR]",
        TQFULL => "[TQFULL]",
        TPROTO => "[TPROTO]",
        _ => return unknown(err.into()),
    };
    Cow::Borrowed(name)
}

pub fn service_name(serv_type: i32) -> Cow<'static, str> {
    match serv_type {
        serv::T_COTS => Cow::Borrowed("T_COTS"),
        serv::T_COTS_ORD => Cow::Borrowed("T_COTS_ORD"),
        serv::T_CLTS => Cow::Borrowed("T_CLTS"),
        other => unknown(other.into()),
    }
}

pub fn state_name(state: i32) -> Cow<'static, str> {
    let name = match state {
        TS_UNBND => "TS_UNBND",
        TS_WACK_BREQ => "TS_WACK_BREQ",
        TS_WACK_UREQ => "TS_WACK_UREQ",
        TS_IDLE => "TS_IDLE",
        TS_WACK_OPTREQ => "TS_WACK_OPTREQ",
        TS_WACK_CREQ => "TS_WACK_CREQ",
        TS_WCON_CREQ => "TS_WCON_CREQ",
        TS_WRES_CIND => "TS_WRES_CIND",
        TS_WACK_CRES => "TS_WACK_CRES",
        TS_DATA_XFER => "TS_DATA_XFER",
        TS_WIND_ORDREL => "TS_WIND_ORDREL",
        TS_WREQ_ORDREL => "TS_WREQ_ORDREL",
        TS_WACK_DREQ6 => "TS_WACK_DREQ6",
        TS_WACK_DREQ7 => "TS_WACK_DREQ7",
        TS_WACK_DREQ9 => "TS_WACK_DREQ9",
        TS_WACK_DREQ10 => "TS_WACK_DREQ10",
        TS_WACK_DREQ11 => "TS_WACK_DREQ11",
        _ => return unknown(state.into()),
    };
    Cow::Borrowed(name)
}

pub fn level_name(level: u32) -> Cow<'static, str> {
    match level {
        T_ALLLEVELS => Cow::Borrowed("T_ALLLEVELS"),
        XTI_GENERIC => Cow::Borrowed("XTI_GENERIC"),
        other => unknown(other.into()),
    }
}

pub fn opt_name(level: u32, name: u32) -> Cow<'static, str> {
    if name == T_ALLOPT {
        return Cow::Borrowed("T_ALLOPT");
    }
    let known = match (level, name) {
        (XTI_GENERIC, XTI_DEBUG) => "XTI_DEBUG",
        (XTI_GENERIC, XTI_LINGER) => "XTI_LINGER",
        (XTI_GENERIC, XTI_RCVBUF) => "XTI_RCVBUF",
        (XTI_GENERIC, XTI_RCVLOWAT) => "XTI_RCVLOWAT",
        (XTI_GENERIC, XTI_SNDBUF) => "XTI_SNDBUF",
        (XTI_GENERIC, XTI_SNDLOWAT) => "XTI_SNDLOWAT",
        _ => return unknown(name.into()),
    };
    Cow::Borrowed(known)
}

/// Per-option status; zero renders as an empty string.
pub fn status_name(status: u32) -> Cow<'static, str> {
    let name = match status as i32 {
        0 => "",
        mgmt::T_SUCCESS => "T_SUCCESS",
        mgmt::T_FAILURE => "T_FAILURE",
        mgmt::T_PARTSUCCESS => "T_PARTSUCCESS",
        mgmt::T_READONLY => "T_READONLY",
        mgmt::T_NOTSUPPORT => "T_NOTSUPPORT",
        _ => return unknown(status.into()),
    };
    Cow::Borrowed(name)
}

pub fn mgmt_flags_name(flags: i32) -> Cow<'static, str> {
    let name = match flags {
        mgmt::T_NEGOTIATE => "T_NEGOTIATE",
        mgmt::T_CHECK => "T_CHECK",
        mgmt::T_DEFAULT => "T_DEFAULT",
        mgmt::T_SUCCESS => "T_SUCCESS",
        mgmt::T_FAILURE => "T_FAILURE",
        mgmt::T_CURRENT => "T_CURRENT",
        mgmt::T_PARTSUCCESS => "T_PARTSUCCESS",
        mgmt::T_READONLY => "T_READONLY",
        mgmt::T_NOTSUPPORT => "T_NOTSUPPORT",
        _ => return unknown(flags.into()),
    };
    Cow::Borrowed(name)
}

/// `timod` control operation name.
pub fn ioctl_name(cmd: i32) -> Cow<'static, str> {
    let name = match cmd {
        O_TI_GETINFO => "O_TI_GETINFO",
        O_TI_OPTMGMT => "O_TI_OPTMGMT",
        O_TI_BIND => "O_TI_BIND",
        O_TI_UNBIND => "O_TI_UNBIND",
        _O_TI_GETINFO => "_O_TI_GETINFO",
        _O_TI_OPTMGMT => "_O_TI_OPTMGMT",
        _O_TI_BIND => "_O_TI_BIND",
        _O_TI_UNBIND => "_O_TI_UNBIND",
        _O_TI_GETMYNAME => "_O_TI_GETMYNAME",
        _O_TI_GETPEERNAME => "_O_TI_GETPEERNAME",
        _O_TI_XTI_HELLO => "_O_TI_XTI_HELLO",
        _O_TI_XTI_GET_STATE => "_O_TI_XTI_GET_STATE",
        _O_TI_XTI_CLEAR_EVENT => "_O_TI_XTI_CLEAR_EVENT",
        _O_TI_XTI_MODE => "_O_TI_XTI_MODE",
        _O_TI_TLI_MODE => "_O_TI_TLI_MODE",
        TI_GETINFO => "TI_GETINFO",
        TI_OPTMGMT => "TI_OPTMGMT",
        TI_BIND => "TI_BIND",
        TI_UNBIND => "TI_UNBIND",
        TI_GETMYNAME => "TI_GETMYNAME",
        TI_GETPEERNAME => "TI_GETPEERNAME",
        TI_SETMYNAME => "TI_SETMYNAME",
        TI_SETPEERNAME => "TI_SETPEERNAME",
        TI_SYNC => "TI_SYNC",
        TI_GETADDRS => "TI_GETADDRS",
        TI_CAPABILITY => "TI_CAPABILITY",
        _ => return unknown(cmd.into()),
    };
    Cow::Borrowed(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prim_name_padding() {
        assert_eq!(prim_name(T_CONN_REQ), "T_CONN_REQ------");
        assert_eq!(prim_name(T_CAPABILITY_ACK), "T_CAPABILITY_ACK");
        assert_eq!(prim_name(T_OK_ACK).len(), 16);
    }

    #[test]
    fn test_unknown_codes_are_stable() {
        assert_eq!(prim_name(99), "[99]");
        assert_eq!(prim_name(99), prim_name(99));
        assert_eq!(state_name(-3), "[-3]");
        assert_eq!(ioctl_name(0), "[0]");
        assert_eq!(level_name(7), "[7]");
    }

    #[test]
    fn test_tsyserr_renders_unix_error() {
        assert_eq!(t_errno_name(TSYSERR, libc::EPROTO), "[EPROTO]");
        assert_eq!(t_errno_name(TBADSEQ, libc::EPROTO), "[TBADSEQ]");
        assert_eq!(t_errno_name(0, 0), "ok");
    }

    #[test]
    fn test_option_names() {
        assert_eq!(opt_name(XTI_GENERIC, XTI_SNDBUF), "XTI_SNDBUF");
        assert_eq!(opt_name(XTI_GENERIC, T_ALLOPT), "T_ALLOPT");
        assert_eq!(status_name(0), "");
        assert_eq!(mgmt_flags_name(mgmt::T_NEGOTIATE), "T_NEGOTIATE");
    }
}
