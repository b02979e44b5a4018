//! Preambles and postambles shared by the test cases.
//!
//! A preamble brings a role's stream into the state its body expects; a
//! postamble tears it back down and checks nothing was left behind. Each
//! step advances the role's step counter so failures point at the step.

use std::sync::Arc;

use tpi_wire::PrimKind;

use crate::event::{Action, Event};
use crate::session::Session;
use crate::timer::{NORMAL_WAIT, TEST_DURATION};
use crate::verdict::{Step, Verdict};

/// One phase of one role's script.
pub type Phase = Arc<dyn Fn(&mut Session) -> Step + Send + Sync>;

pub fn phase(f: impl Fn(&mut Session) -> Step + Send + Sync + 'static) -> Phase {
    Arc::new(f)
}

/// Arms the role's guard timer.
pub fn preamble_0(s: &mut Session) -> Step {
    s.start_timer(TEST_DURATION as i64)
}

/// Reads until the stream goes quiet, then disarms the guard timer.
///
/// Anything other than silence, end of file, a disconnect request or the
/// timer is left over from the body and fails the postamble. The reported
/// step is the first one that went wrong.
pub fn postamble_0(s: &mut Session) -> Step {
    let mut failed = None;
    loop {
        match s.wait_event(NORMAL_WAIT) {
            Event::NoMsg
            | Event::Eof
            | Event::Timeout
            | Event::Failure
            | Event::Prim(PrimKind::DisconReq) => break,
            other => {
                if failed.is_none() {
                    s.note(format!("left over {}", other.name()));
                    failed = Some(s.state);
                }
                s.step();
            }
        }
    }
    s.step();
    if s.stop_timer().is_err() {
        failed.get_or_insert(s.state);
    }
    s.step();
    finish(s, failed)
}

/// [`preamble_0`], then pushes `timod`.
pub fn preamble_1_top(s: &mut Session) -> Step {
    preamble_0(s)?;
    s.step();
    s.inject(Action::Push)?;
    s.step();
    Ok(())
}

/// Pops `timod` and runs [`postamble_0`].
///
/// An `EIO` from the pop means the stream was already torn down and is
/// not held against the case.
pub fn postamble_1_top(s: &mut Session) -> Step {
    let mut failed = None;
    if s.inject(Action::Pop).is_err() && s.snap.last_errno != libc::EIO {
        failed = Some(s.state);
    }
    s.step();
    close_out(s, failed)
}

/// Like [`postamble_1_top`] for a stream whose peer has hung up: the pop
/// has to fail with `ENXIO`.
pub fn postamble_1b_top(s: &mut Session) -> Step {
    let mut failed = None;
    match s.inject(Action::Pop) {
        Err(_) if s.snap.last_errno == libc::ENXIO => {}
        Err(_) => failed = Some(s.state),
        Ok(()) => {
            s.note("I_POP succeeded on a hung up stream");
            failed = Some(s.state);
        }
    }
    s.step();
    close_out(s, failed)
}

fn close_out(s: &mut Session, mut failed: Option<u32>) -> Step {
    if postamble_0(s).is_err() {
        failed.get_or_insert(s.state);
    }
    s.step();
    finish(s, failed)
}

fn finish(s: &mut Session, failed: Option<u32>) -> Step {
    match failed {
        Some(state) => {
            s.state = state;
            Err(Verdict::Failure)
        }
        None => Ok(()),
    }
}

/// The stream must settle: the next event is a disconnect request or
/// nothing at all.
pub fn settle(s: &mut Session) -> Step {
    match s.wait_event(NORMAL_WAIT) {
        Event::Prim(PrimKind::DisconReq) | Event::NoMsg => Ok(()),
        other => {
            s.note(format!("stream did not settle: {}", other.name()));
            s.step();
            Err(Verdict::Failure)
        }
    }
}

#[cfg(test)]
mod tests {
    use tpi_stream::{Channel, mem};

    use crate::orchestrator::Backend;
    use crate::session::Role;
    use crate::timer::CancelToken;
    use crate::trace::Trace;

    use super::*;

    fn pair() -> (Session, Session, mem::MemEnd) {
        let (a, b) = mem::pipe();
        let observer = a.clone();
        let trace = Arc::new(Trace::silent());
        let cancel = CancelToken::new();
        let top = Session::new(
            Role::Top,
            Box::new(a),
            Backend::Thread,
            trace.clone(),
            cancel.clone(),
            10,
        );
        let bot = Session::new(Role::Bot, Box::new(b), Backend::Thread, trace, cancel, 10);
        (top, bot, observer)
    }

    #[test]
    fn test_push_and_pop_around_a_case() {
        let (mut top, mut bot, observer) = pair();
        preamble_1_top(&mut top).unwrap();
        preamble_0(&mut bot).unwrap();
        assert_eq!(observer.modules(), ["timod"]);
        postamble_1_top(&mut top).unwrap();
        postamble_0(&mut bot).unwrap();
        assert!(observer.modules().is_empty());
    }

    #[test]
    fn test_leftovers_fail_the_postamble() {
        let (mut top, mut bot, _observer) = pair();
        preamble_0(&mut bot).unwrap();
        top.inject(Action::Prim(PrimKind::BindReq)).unwrap();
        top.inject(Action::Prim(PrimKind::UnbindReq)).unwrap();
        bot.state = 7;
        assert_eq!(postamble_0(&mut bot), Err(Verdict::Failure));
        // Points at the first stray message.
        assert_eq!(bot.state, 7);
        assert!(bot.take_note().is_some());
    }

    #[test]
    fn test_disconnect_ends_the_postamble() {
        let (mut top, mut bot, _observer) = pair();
        top.inject(Action::Prim(PrimKind::DisconReq)).unwrap();
        postamble_0(&mut bot).unwrap();
    }

    #[test]
    fn test_hung_up_pop_wants_enxio() {
        let (mut top, mut bot, _observer) = pair();
        preamble_1_top(&mut top).unwrap();
        bot.chan.close().unwrap();
        postamble_1b_top(&mut top).unwrap();
    }

    #[test]
    fn test_pop_on_live_stream_fails_1b() {
        let (mut top, _bot, _observer) = pair();
        preamble_1_top(&mut top).unwrap();
        assert_eq!(postamble_1b_top(&mut top), Err(Verdict::Failure));
    }

    #[test]
    fn test_settle() {
        let (mut top, mut bot, _observer) = pair();
        settle(&mut bot).unwrap();
        top.inject(Action::Prim(PrimKind::InfoReq)).unwrap();
        assert_eq!(settle(&mut bot), Err(Verdict::Failure));
    }
}
