//! XTI option headers (`struct t_opthdr`).
//!
//! An option region is a run of headers, each followed by its value and
//! padded so the next header starts on a `t_uscalar_t` boundary.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

/// `sizeof(struct t_opthdr)`
pub const OPTHDR_LEN: usize = 16;

const ALIGN: usize = std::mem::size_of::<u32>();

/// Rounds `len` up to the option alignment (`T_ALIGN`).
pub fn t_align(len: usize) -> usize {
    (len + ALIGN - 1) & !(ALIGN - 1)
}

/// One option header and its value bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opt<'a> {
    pub level: u32,
    pub name: u32,
    pub status: u32,
    pub value: &'a [u8],
}

impl Opt<'_> {
    /// Value read as a native-endian `t_scalar_t`, when it is exactly one.
    pub fn scalar(&self) -> Option<i32> {
        let raw: [u8; 4] = self.value.try_into().ok()?;
        Some(i32::from_ne_bytes(raw))
    }
}

/// Malformed option header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptError {
    /// Header claims fewer bytes than the header itself.
    ShortLength { at: usize, len: u32 },
    /// Header or value runs past the end of the region.
    Overrun { at: usize, len: u32, have: usize },
}

impl fmt::Display for OptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptError::ShortLength { at, len } => {
                write!(f, "option header at {at} has length {len} < {OPTHDR_LEN}")
            }
            OptError::Overrun { at, len, have } => {
                write!(f, "option at {at} of length {len} overruns {have} bytes")
            }
        }
    }
}

impl std::error::Error for OptError {}

/// Forward cursor over an option region.
///
/// Yields at most one error, after which iteration stops.
#[derive(Debug, Clone)]
pub struct OptIter<'a> {
    buf: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> OptIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        OptIter {
            buf,
            pos: 0,
            done: false,
        }
    }
}

fn word(buf: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    u32::from_ne_bytes(raw)
}

impl<'a> Iterator for OptIter<'a> {
    type Item = Result<Opt<'a>, OptError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.buf.len() {
            return None;
        }
        let at = self.pos;
        let have = self.buf.len() - at;
        if have < OPTHDR_LEN {
            self.done = true;
            return Some(Err(OptError::Overrun {
                at,
                len: OPTHDR_LEN as u32,
                have,
            }));
        }
        let len = word(self.buf, at);
        if (len as usize) < OPTHDR_LEN {
            self.done = true;
            return Some(Err(OptError::ShortLength { at, len }));
        }
        if len as usize > have {
            self.done = true;
            return Some(Err(OptError::Overrun { at, len, have }));
        }
        let opt = Opt {
            level: word(self.buf, at + 4),
            name: word(self.buf, at + 8),
            status: word(self.buf, at + 12),
            value: &self.buf[at + OPTHDR_LEN..at + len as usize],
        };
        self.pos = at + t_align(len as usize);
        Some(Ok(opt))
    }
}

/// First option matching `(level, name)`, stopping at a malformed header.
pub fn find_option(buf: &[u8], level: u32, name: u32) -> Result<Option<Opt<'_>>, OptError> {
    for opt in OptIter::new(buf) {
        let opt = opt?;
        if opt.level == level && opt.name == name {
            return Ok(Some(opt));
        }
    }
    Ok(None)
}

/// Builds an option region.
#[derive(Debug, Default)]
pub struct OptBuilder {
    buf: BytesMut,
}

impl OptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, level: u32, name: u32, status: u32, value: &[u8]) -> Self {
        let len = OPTHDR_LEN + value.len();
        self.buf.put_u32_ne(len as u32);
        self.buf.put_u32_ne(level);
        self.buf.put_u32_ne(name);
        self.buf.put_u32_ne(status);
        self.buf.extend_from_slice(value);
        self.buf.put_bytes(0, t_align(len) - len);
        self
    }

    pub fn scalar(self, level: u32, name: u32, status: u32, value: i32) -> Self {
        self.push(level, name, status, &value.to_ne_bytes())
    }

    pub fn build(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{mgmt, xti};

    #[test]
    fn test_walk_two_options() {
        let buf = OptBuilder::new()
            .scalar(xti::XTI_GENERIC, xti::XTI_SNDBUF, mgmt::T_SUCCESS as u32, 32767)
            .push(xti::XTI_GENERIC, xti::XTI_DEBUG, 0, b"abc")
            .build();
        assert_eq!(buf.len(), 20 + 20);
        let opts: Vec<_> = OptIter::new(&buf).collect::<Result<_, _>>().unwrap();
        assert_eq!(opts.len(), 2);
        assert_eq!(opts[0].scalar(), Some(32767));
        assert_eq!(opts[1].value, b"abc");
        assert_eq!(opts[1].scalar(), None);
    }

    #[test]
    fn test_short_length_stops() {
        let mut raw = Vec::new();
        for w in [8u32, xti::XTI_GENERIC, xti::XTI_SNDBUF, 0] {
            raw.extend_from_slice(&w.to_ne_bytes());
        }
        let mut it = OptIter::new(&raw);
        assert_eq!(it.next(), Some(Err(OptError::ShortLength { at: 0, len: 8 })));
        assert_eq!(it.next(), None);
    }

    #[test]
    fn test_overrun_reported() {
        let mut raw = Vec::new();
        for w in [64u32, xti::XTI_GENERIC, xti::XTI_SNDBUF, 0] {
            raw.extend_from_slice(&w.to_ne_bytes());
        }
        assert!(matches!(
            find_option(&raw, xti::XTI_GENERIC, xti::XTI_SNDBUF),
            Err(OptError::Overrun { len: 64, .. })
        ));
    }

    #[test]
    fn test_find_option() {
        let buf = OptBuilder::new()
            .scalar(xti::XTI_GENERIC, xti::XTI_RCVBUF, 0, 1)
            .scalar(xti::XTI_GENERIC, xti::XTI_SNDBUF, 0, 2)
            .build();
        let opt = find_option(&buf, xti::XTI_GENERIC, xti::XTI_SNDBUF)
            .unwrap()
            .unwrap();
        assert_eq!(opt.scalar(), Some(2));
        assert!(find_option(&buf, xti::XTI_GENERIC, xti::XTI_LINGER)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_t_align() {
        assert_eq!(t_align(16), 16);
        assert_eq!(t_align(17), 20);
        assert_eq!(t_align(19), 20);
    }
}
