//! SVR4 `stropts.h` numbering.

use std::borrow::Cow;

pub const STR: i32 = (b'S' as i32) << 8;

pub const I_NREAD: i32 = STR | 0o01;
pub const I_PUSH: i32 = STR | 0o02;
pub const I_POP: i32 = STR | 0o03;
pub const I_LOOK: i32 = STR | 0o04;
pub const I_FLUSH: i32 = STR | 0o05;
pub const I_SRDOPT: i32 = STR | 0o06;
pub const I_GRDOPT: i32 = STR | 0o07;
pub const I_STR: i32 = STR | 0o10;
pub const I_SETSIG: i32 = STR | 0o11;
pub const I_GETSIG: i32 = STR | 0o12;
pub const I_FIND: i32 = STR | 0o13;
pub const I_LINK: i32 = STR | 0o14;
pub const I_UNLINK: i32 = STR | 0o15;
pub const I_RECVFD: i32 = STR | 0o16;
pub const I_PEEK: i32 = STR | 0o17;
pub const I_FDINSERT: i32 = STR | 0o20;
pub const I_SENDFD: i32 = STR | 0o21;
pub const I_SWROPT: i32 = STR | 0o23;
pub const I_GWROPT: i32 = STR | 0o24;

/// `I_SRDOPT` read modes.
pub const RNORM: i32 = 0x000;
pub const RMSGD: i32 = 0x001;
pub const RMSGN: i32 = 0x002;

/// `I_SWROPT` write options.
pub const SNDZERO: i32 = 0x001;
pub const SNDPIPE: i32 = 0x002;

/// `getmsg` result flag.
pub const RS_HIPRI: i32 = 0x01;

/// Default `ic_timout` applied when the caller passes zero (seconds).
pub const DEFAULT_IC_TIMOUT_SECS: u64 = 15;

/// Stream head control name, falling back to the `timod` table.
pub fn ioctl_name(cmd: i32) -> Cow<'static, str> {
    let name = match cmd {
        I_NREAD => "I_NREAD",
        I_PUSH => "I_PUSH",
        I_POP => "I_POP",
        I_LOOK => "I_LOOK",
        I_FLUSH => "I_FLUSH",
        I_SRDOPT => "I_SRDOPT",
        I_GRDOPT => "I_GRDOPT",
        I_STR => "I_STR",
        I_SETSIG => "I_SETSIG",
        I_GETSIG => "I_GETSIG",
        I_FIND => "I_FIND",
        I_LINK => "I_LINK",
        I_UNLINK => "I_UNLINK",
        I_RECVFD => "I_RECVFD",
        I_PEEK => "I_PEEK",
        I_FDINSERT => "I_FDINSERT",
        I_SENDFD => "I_SENDFD",
        I_SWROPT => "I_SWROPT",
        I_GWROPT => "I_GWROPT",
        _ => return tpi_wire::render::ioctl_name(cmd),
    };
    Cow::Borrowed(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpi_wire::consts::timod::TI_GETINFO;

    #[test]
    fn test_ioctl_name_falls_back_to_timod() {
        assert_eq!(ioctl_name(I_STR), "I_STR");
        assert_eq!(I_STR & 0xff, 8);
        assert_eq!(ioctl_name(TI_GETINFO), "TI_GETINFO");
        assert_eq!(ioctl_name(STR | 0o77), format!("[{}]", STR | 0o77));
    }
}
