//! Conformance test suite for the `timod` STREAMS module.
//!
//! `timod` sits between a TLI/XTI library above and a TPI transport
//! provider below, turning `TI_*` control operations into TPI request
//! primitives and the provider's acknowledgements back into control
//! replies. Each test case drives a stream from both sides at once: a
//! *top* role pushes the module and issues controls or primitives, a *bot*
//! role plays the transport provider, and an optional *listener* shares
//! the upper stream.
//!
//! # Usage
//!
//! ```bash
//! test-timod                   # run every case
//! test-timod -l                # list the cases
//! test-timod -o 2.1.3 -v 3     # one case with a full transcript
//! test-timod -t 3.2 -f 10 -s   # a range, timers ten times faster, summary
//! ```
//!
//! Roles run as forked processes over a real STREAMS pipe when built with
//! the `streams` feature, or as threads over an in-process pipe with a
//! simulated `timod` otherwise (`--backend` picks explicitly).
//!
//! # Exit Codes
//!
//! For a single case:
//! - 0: passed, or not applicable
//! - 1: failed or inconclusive
//! - 77: skipped
//!
//! For several cases, 1 when `--exit` aborted the run and 0 otherwise.
//! Bad options, an empty selection or failed stream setup exit with 2.

pub mod catalog;
pub mod event;
mod io;
pub mod orchestrator;
pub mod runner;
pub mod script;
pub mod session;
pub mod timer;
pub mod trace;
pub mod verdict;

pub use catalog::{TestCase, catalog};
pub use orchestrator::{Backend, SetupError};
pub use runner::{RunConfig, SelectError, Suite};
pub use verdict::Verdict;
