//! Transport Provider Interface wire format.
//!
//! This crate knows how TPI primitives, XTI option headers and `timod`
//! control codes look on the wire, and how to name them in a transcript.
//! It performs no I/O.
//!
//! - [`Primitive`]: tagged union with `encode`/`decode`
//! - [`OptIter`]/[`OptBuilder`]: option region cursor and builder
//! - [`render`]: stable code-to-token tables

#![deny(unsafe_code)]

pub mod consts;
pub mod opt;
pub mod prim;
pub mod render;

pub use opt::{Opt, OptBuilder, OptError, OptIter, find_option};
pub use prim::{DecodeError, InfoAck, PrimKind, Primitive, header_len, peek_prim};
