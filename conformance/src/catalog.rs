//! The test case catalog.
//!
//! Cases are produced by families registered with [`inventory`]; most
//! families expand a table of (control or primitive, request, answer)
//! rows into one case per row. [`catalog`] gathers every family and sorts
//! the cases by number.

use std::cmp::Ordering;

use tpi_wire::PrimKind;
use tpi_wire::consts::terr::TSYSERR;

use crate::event::{Action, Event, TiControl, info_of};
use crate::script::{
    Phase, phase, postamble_0, postamble_1_top, preamble_0, preamble_1_top, settle,
};
use crate::session::{Role, Session};
use crate::timer::{INFINITE_WAIT, LONG_WAIT, NORMAL_WAIT, SHORT_WAIT};
use crate::verdict::{Step, Verdict};

// ============================================================================
// Cases
// ============================================================================

/// The three phases one role runs.
#[derive(Clone)]
pub struct Stream {
    pub preamble: Phase,
    pub body: Phase,
    pub postamble: Phase,
}

impl Stream {
    pub fn new(preamble: Phase, body: Phase, postamble: Phase) -> Self {
        Stream {
            preamble,
            body,
            postamble,
        }
    }
}

pub struct TestCase {
    /// Dotted number, e.g. `2.1.7.1`.
    pub numb: String,
    pub tgrp: &'static str,
    pub sref: &'static str,
    pub name: String,
    pub desc: String,
    /// Indexed by [`Role::col`]. An absent role counts as a success.
    pub streams: [Option<Stream>; 3],
    /// Guard time in milliseconds; zero uses the suite default.
    pub duration: u64,
    /// The verdict that counts as a pass.
    pub expect: Verdict,
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCase")
            .field("numb", &self.numb)
            .field("name", &self.name)
            .field("duration", &self.duration)
            .field("expect", &self.expect)
            .finish_non_exhaustive()
    }
}

impl TestCase {
    pub fn stream(&self, role: Role) -> Option<&Stream> {
        self.streams[role.col()].as_ref()
    }
}

/// A generator of related test cases.
pub struct Family {
    pub build: fn() -> Vec<TestCase>,
}

inventory::collect!(Family);

/// Every registered case, in numeric order.
pub fn catalog() -> Vec<TestCase> {
    let mut cases: Vec<TestCase> = inventory::iter::<Family>
        .into_iter()
        .flat_map(|family| (family.build)())
        .collect();
    cases.sort_by(|a, b| compare_numbers(&a.numb, &b.numb));
    cases
}

/// Orders `2.1.10` after `2.1.9`.
pub fn compare_numbers(a: &str, b: &str) -> Ordering {
    let key = |s: &str| -> Vec<u32> { s.split('.').map(|p| p.parse().unwrap_or(0)).collect() };
    key(a).cmp(&key(b)).then_with(|| a.cmp(b))
}

fn case(
    numb: impl Into<String>,
    tgrp: &'static str,
    name: impl Into<String>,
    desc: impl Into<String>,
    top: Option<Stream>,
    bot: Option<Stream>,
) -> TestCase {
    TestCase {
        numb: numb.into(),
        tgrp,
        sref: "(none)",
        name: name.into(),
        desc: desc.into(),
        streams: [top, bot, None],
        duration: 0,
        expect: Verdict::Success,
    }
}

fn plain(body: Phase) -> Stream {
    Stream::new(phase(preamble_0), body, phase(postamble_0))
}

fn with_timod(body: Phase) -> Stream {
    Stream::new(phase(preamble_1_top), body, phase(postamble_1_top))
}

// ============================================================================
// 0 - Sanity checks
// ============================================================================

const SANITY: &str = "Sanity checks";

fn sanity() -> Vec<TestCase> {
    let sleeper = || plain(phase(|s: &mut Session| {
        s.sleep(40);
        Ok(())
    }));
    vec![TestCase {
        streams: [Some(sleeper()), Some(sleeper()), Some(sleeper())],
        duration: 5000,
        expect: Verdict::Inconclusive,
        ..case(
            "0.1",
            SANITY,
            "Check test case guard timer.",
            "Checks that the test case guard timer will fire and bring down the children.",
            None,
            None,
        )
    }]
}

inventory::submit!(Family { build: sanity });

// ============================================================================
// 1 - Pushing and popping
// ============================================================================

const PUSH_POP: &str = "Pushing and popping the timod module";

fn push_pop() -> Vec<TestCase> {
    let top = plain(phase(|s: &mut Session| {
        s.inject(Action::Push)?;
        s.step();
        s.inject(Action::Pop)?;
        s.step();
        Ok(())
    }));
    let bot = plain(phase(|s: &mut Session| {
        settle(s)?;
        s.step();
        Ok(())
    }));
    vec![case(
        "1.1",
        PUSH_POP,
        "Normal push and pop sequence",
        "This test case tests the simple pushing and popping of the timod module.  It\n\
         ensures that pushing the module on an empty stream has no effect, while\n\
         popping the module from the stream results in a T_DISCON_REQ being sent to the\n\
         transport peer.",
        Some(top),
        Some(bot),
    )]
}

inventory::submit!(Family { build: push_pop });

// ============================================================================
// 2 - Control operations
// ============================================================================

const CONTROLS: &str = "Performing IO controls on the timod module";
const MULTIPLE: &str = "Multiple process IO controls";
const WITH_DATA: &str = "IO controls with data";

/// Control operations, the request `timod` sends for them, and the
/// acknowledgement that completes them. `TI_SYNC` (x.9) is not run.
const CONTROL_TABLE: &[(&str, TiControl, PrimKind, PrimKind)] = &[
    ("1", TiControl::Getinfo, PrimKind::InfoReq, PrimKind::InfoAck),
    ("2", TiControl::Optmgmt, PrimKind::OptmgmtReq, PrimKind::OptmgmtAck),
    ("3", TiControl::Bind, PrimKind::BindReq, PrimKind::BindAck),
    ("4", TiControl::Unbind, PrimKind::UnbindReq, PrimKind::OkAck),
    ("5", TiControl::Getmyname, PrimKind::AddrReq, PrimKind::AddrAck),
    ("6", TiControl::Getpeername, PrimKind::AddrReq, PrimKind::AddrAck),
    ("7.1", TiControl::Setmyname, PrimKind::ConnRes, PrimKind::OkAck),
    ("7.2", TiControl::SetmynameDisc, PrimKind::DisconReq, PrimKind::OkAck),
    ("8.1", TiControl::Setpeername, PrimKind::ConnReq, PrimKind::OkAck),
    ("8.2", TiControl::SetpeernameDisc, PrimKind::DisconReq, PrimKind::OkAck),
    ("10", TiControl::Getaddrs, PrimKind::AddrReq, PrimKind::AddrAck),
    ("11", TiControl::Capability, PrimKind::CapabilityReq, PrimKind::CapabilityAck),
];

const DATA_TABLE: &[(&str, TiControl, PrimKind, PrimKind)] = &[
    ("1", TiControl::SetmynameData, PrimKind::ConnRes, PrimKind::OkAck),
    ("2", TiControl::SetpeernameData, PrimKind::ConnReq, PrimKind::OkAck),
    ("3", TiControl::SetmynameDiscData, PrimKind::DisconReq, PrimKind::OkAck),
    ("4", TiControl::SetpeernameDiscData, PrimKind::DisconReq, PrimKind::OkAck),
];

fn control_positive_top(ctl: TiControl, ack: PrimKind) -> Phase {
    phase(move |s: &mut Session| {
        s.inject(Action::Control(ctl))?;
        s.step();
        if matches!(ack, PrimKind::InfoAck | PrimKind::CapabilityAck) {
            check_info(s)?;
            s.step();
        }
        Ok(())
    })
}

/// The information block handed back matches what the peer was set up
/// to report.
fn check_info(s: &mut Session) -> Step {
    let want = info_of(&s.snap, &s.params);
    let got = s.snap.last_info;
    if got != want {
        s.note(format!(
            "wanted tsdu {} tidu {} serv {} state {}, got tsdu {} tidu {} serv {} state {}",
            want.tsdu_size,
            want.tidu_size,
            want.serv_type,
            want.current_state,
            got.tsdu_size,
            got.tidu_size,
            got.serv_type,
            got.current_state
        ));
        return Err(Verdict::Failure);
    }
    Ok(())
}

/// The control fails with a system error of `EPROTO`.
fn control_negative_top(ctl: TiControl) -> Phase {
    phase(move |s: &mut Session| {
        match s.inject(Action::Control(ctl)) {
            Err(_) if s.snap.last_errno == libc::EPROTO => {}
            Err(_) => {
                s.note(format!(
                    "wanted [EPROTO], got {}",
                    tpi_wire::render::errno_name(s.snap.last_errno)
                ));
                return Err(Verdict::Failure);
            }
            Ok(()) => {
                s.note("control succeeded");
                return Err(Verdict::Failure);
            }
        }
        s.step();
        Ok(())
    })
}

/// Answers the request the control sends down.
fn answer(s: &mut Session, req: PrimKind, ack: PrimKind) -> Step {
    s.expect(INFINITE_WAIT, Event::Prim(req))?;
    s.step();
    s.msleep(SHORT_WAIT as u64);
    s.inject(Action::Prim(ack))?;
    s.step();
    Ok(())
}

/// Rejects the request with `TSYSERR`/`EPROTO`.
fn reject(s: &mut Session, req: PrimKind) -> Step {
    s.expect(INFINITE_WAIT, Event::Prim(req))?;
    s.step();
    s.snap.last_t_errno = TSYSERR;
    s.snap.last_errno = libc::EPROTO;
    s.inject(Action::Prim(PrimKind::ErrorAck))?;
    s.step();
    Ok(())
}

fn control_positive_bot(req: PrimKind, ack: PrimKind) -> Phase {
    phase(move |s: &mut Session| {
        answer(s, req, ack)?;
        settle(s)
    })
}

fn control_negative_bot(req: PrimKind) -> Phase {
    phase(move |s: &mut Session| {
        reject(s, req)?;
        settle(s)
    })
}

fn controls() -> Vec<TestCase> {
    let mut cases = Vec::new();
    for &(n, ctl, req, ack) in CONTROL_TABLE {
        let title = ctl.title();
        cases.push(case(
            format!("2.1.{n}"),
            CONTROLS,
            format!("{title} IO control positive acknowledgement"),
            format!(
                "This test case test the execution of the {title} IO control with positive\n\
                 results on using the timod module."
            ),
            Some(with_timod(control_positive_top(ctl, ack))),
            Some(plain(control_positive_bot(req, ack))),
        ));
        cases.push(case(
            format!("2.2.{n}"),
            CONTROLS,
            format!("{title} IO control negative acknowledgement"),
            format!(
                "This test case test the execution of the {title} IO control with negative\n\
                 results on using the timod module."
            ),
            Some(with_timod(control_negative_top(ctl))),
            Some(plain(control_negative_bot(req))),
        ));
    }
    cases
}

inventory::submit!(Family { build: controls });

/// Two users of the upper stream issue `TI_GETINFO` at once. The module
/// runs them one after the other; the peer accepts the first and rejects
/// the second.
fn racing_controls() -> Vec<TestCase> {
    let top = with_timod(phase(|s: &mut Session| {
        s.params.timout = 2000;
        let sibling = s
            .fork_sibling(|t: &mut Session| {
                match t.inject(Action::Control(TiControl::Getinfo)) {
                    Ok(()) => Verdict::Success,
                    Err(_) if t.snap.last_errno != libc::EPROTO => Verdict::Inconclusive,
                    Err(v) => v,
                }
            })
            .map_err(|e| {
                s.note(format!("cannot start second user: {e}"));
                Verdict::Inconclusive
            })?;
        s.step();
        let mine = match s.inject(Action::Control(TiControl::Getinfo)) {
            Ok(()) => Verdict::Success,
            Err(_) if s.snap.last_errno != libc::EPROTO => Verdict::Inconclusive,
            Err(v) => v,
        };
        s.step();
        let theirs = s.join_sibling(sibling).map_err(|e| {
            s.note(format!("second user lost: {e}"));
            Verdict::Failure
        })?;
        s.step();
        if !one_of_each(mine, theirs) {
            s.note(format!("first user {mine}, second user {theirs}"));
            return Err(Verdict::Failure);
        }
        Ok(())
    }));
    let bot = plain(phase(|s: &mut Session| {
        answer(s, PrimKind::InfoReq, PrimKind::InfoAck)?;
        s.expect(INFINITE_WAIT, Event::Prim(PrimKind::InfoReq))?;
        s.step();
        s.msleep(SHORT_WAIT as u64);
        s.snap.last_t_errno = TSYSERR;
        s.snap.last_errno = libc::EPROTO;
        s.inject(Action::Prim(PrimKind::ErrorAck))?;
        s.step();
        s.msleep(NORMAL_WAIT as u64);
        s.step();
        Ok(())
    }));
    vec![case(
        "2.3",
        MULTIPLE,
        "Two child processes attempting same IO control",
        "This test case tests two child processes attempting the same IO control.  One\n\
         is given a positive acknowledgement and the other a negative acknowledgement.",
        Some(top),
        Some(bot),
    )]
}

inventory::submit!(Family { build: racing_controls });

/// Exactly one of the two users got the acknowledgement.
fn one_of_each(mine: Verdict, theirs: Verdict) -> bool {
    matches!(
        (mine, theirs),
        (Verdict::Success, Verdict::Failure) | (Verdict::Failure, Verdict::Success)
    )
}

fn controls_with_data() -> Vec<TestCase> {
    DATA_TABLE
        .iter()
        .map(|&(n, ctl, req, ack)| {
            let title = ctl.title();
            case(
                format!("2.4.{n}"),
                WITH_DATA,
                format!("{title} with data"),
                format!(
                    "Tests that IO controls with optional data parts can be sent with data.\n\
                     This test case tests the {title} IO control."
                ),
                Some(with_timod(control_positive_top(ctl, ack))),
                Some(plain(control_positive_bot(req, ack))),
            )
        })
        .collect()
}

inventory::submit!(Family { build: controls_with_data });

// ============================================================================
// 3 - Pass through
// ============================================================================

const PASS_THROUGH: &str = "Non-IO control pass through of TPI messages";

/// Requests sent straight down through `timod` and the answer the peer
/// gives.
const PASS_TABLE: &[(PrimKind, PrimKind)] = &[
    (PrimKind::InfoReq, PrimKind::InfoAck),
    (PrimKind::ConnReq, PrimKind::OkAck),
    (PrimKind::ConnRes, PrimKind::OkAck),
    (PrimKind::DisconReq, PrimKind::OkAck),
    (PrimKind::BindReq, PrimKind::BindAck),
    (PrimKind::UnbindReq, PrimKind::OkAck),
    (PrimKind::OptmgmtReq, PrimKind::OptmgmtAck),
    (PrimKind::AddrReq, PrimKind::AddrAck),
    (PrimKind::CapabilityReq, PrimKind::CapabilityAck),
];

fn pass_top(req: PrimKind, ack: PrimKind) -> Phase {
    phase(move |s: &mut Session| {
        s.inject(Action::Prim(req))?;
        s.step();
        s.expect(INFINITE_WAIT, Event::Prim(ack))?;
        s.step();
        Ok(())
    })
}

fn pass_bot(req: PrimKind, ack: PrimKind, linger: i32) -> Phase {
    phase(move |s: &mut Session| {
        s.expect(INFINITE_WAIT, Event::Prim(req))?;
        s.step();
        s.msleep(SHORT_WAIT as u64);
        s.inject(Action::Prim(ack))?;
        s.step();
        s.msleep(linger as u64);
        s.step();
        Ok(())
    })
}

fn pass_through() -> Vec<TestCase> {
    let mut cases = Vec::new();
    for (i, &(req, ack)) in PASS_TABLE.iter().enumerate() {
        let prim = req.name();
        cases.push(case(
            format!("3.1.{}", i + 1),
            PASS_THROUGH,
            format!("{prim} with positive acknowledgement"),
            format!("This test case test the pass through of {prim} with positive\nacknowledgement."),
            Some(with_timod(pass_top(req, ack))),
            Some(plain(pass_bot(req, ack, NORMAL_WAIT))),
        ));
    }
    for (i, &(req, _)) in PASS_TABLE.iter().enumerate() {
        let prim = req.name();
        cases.push(case(
            format!("3.2.{}", i + 1),
            PASS_THROUGH,
            format!("{prim} with negative acknowledgement"),
            format!("This test case test the pass through of {prim} with negative\nacknowledgement."),
            Some(with_timod(pass_top(req, PrimKind::ErrorAck))),
            Some(plain(pass_bot(req, PrimKind::ErrorAck, LONG_WAIT))),
        ));
    }
    cases
}

inventory::submit!(Family { build: pass_through });

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tpi_stream::mem;

    use super::*;
    use crate::orchestrator::Backend;
    use crate::timer::CancelToken;
    use crate::trace::Trace;

    fn pair() -> (Session, Session) {
        let (a, b) = mem::pipe();
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
        (top, bot)
    }

    #[test]
    fn test_getinfo_reply_must_match_parameters() {
        for (bufsize, want) in [(256, Ok(())), (512, Err(Verdict::Failure))] {
            let (mut top, mut bot) = pair();
            top.inject(Action::Push).unwrap();
            top.params.timout = 5000;
            let peer = std::thread::spawn(move || {
                bot.params.bufsize = bufsize;
                answer(&mut bot, PrimKind::InfoReq, PrimKind::InfoAck)
            });
            let body = control_positive_top(TiControl::Getinfo, PrimKind::InfoAck);
            assert_eq!(body(&mut top), want, "peer bufsize {bufsize}");
            assert_eq!(top.snap.last_info.tsdu_size, bufsize);
            peer.join().unwrap().unwrap();
        }
    }

    #[test]
    fn test_answer_counts_expect_and_reply() {
        let (mut top, mut bot) = pair();
        let peer = std::thread::spawn(move || {
            let before = bot.state;
            answer(&mut bot, PrimKind::InfoReq, PrimKind::InfoAck).map(|()| bot.state - before)
        });
        top.inject(Action::Prim(PrimKind::InfoReq)).unwrap();
        assert_eq!(peer.join().unwrap(), Ok(2));
    }

    #[test]
    fn test_race_needs_one_winner_and_one_loser() {
        assert!(one_of_each(Verdict::Success, Verdict::Failure));
        assert!(one_of_each(Verdict::Failure, Verdict::Success));
        assert!(!one_of_each(Verdict::Success, Verdict::Success));
        assert!(!one_of_each(Verdict::Success, Verdict::Inconclusive));
        assert!(!one_of_each(Verdict::Inconclusive, Verdict::Failure));
    }

    #[test]
    fn test_numbers_sort_numerically() {
        let mut v = vec!["2.1.10", "2.1.9", "2.1.7.2", "10.1", "2.1.7.1", "0.1"];
        v.sort_by(|a, b| compare_numbers(a, b));
        assert_eq!(v, ["0.1", "2.1.7.1", "2.1.7.2", "2.1.9", "2.1.10", "10.1"]);
    }

    #[test]
    fn test_catalog_is_complete_and_ordered() {
        let cases = catalog();
        let numbers: Vec<&str> = cases.iter().map(|c| c.numb.as_str()).collect();
        assert_eq!(numbers.len(), 1 + 1 + 12 + 12 + 1 + 4 + 9 + 9);
        assert_eq!(numbers[0], "0.1");
        assert_eq!(numbers[1], "1.1");
        assert_eq!(numbers[2], "2.1.1");
        assert!(numbers.contains(&"2.1.10"));
        assert!(!numbers.contains(&"2.1.9"));
        assert_eq!(*numbers.last().unwrap(), "3.2.9");
        let mut sorted = numbers.clone();
        sorted.dedup();
        assert_eq!(sorted.len(), numbers.len());
    }

    #[test]
    fn test_case_text() {
        let cases = catalog();
        let find = |n: &str| cases.iter().find(|c| c.numb == n).unwrap();

        let guard = find("0.1");
        assert_eq!(guard.expect, Verdict::Inconclusive);
        assert_eq!(guard.duration, 5000);
        assert!(guard.streams.iter().all(Option::is_some));

        let c = find("2.1.7.2");
        assert_eq!(c.name, "TI_SETMYNAME (disconnect) IO control positive acknowledgement");
        assert_eq!(c.sref, "(none)");
        assert!(c.stream(Role::Listener).is_none());

        let c = find("3.2.9");
        assert_eq!(c.name, "T_CAPABILITY_REQ with negative acknowledgement");
        assert_eq!(c.tgrp, PASS_THROUGH);

        let c = find("2.4.3");
        assert_eq!(c.name, "TI_SETMYNAME (disconnect) with data");
        assert!(c.desc.ends_with("tests the TI_SETMYNAME (disconnect) IO control."));

        let c = find("1.1");
        assert!(c.desc.contains("It\nensures"));
    }
}
