//! Per-role protocol session.
//!
//! A [`Session`] is everything one role needs while it runs a test case:
//! its end of the stream, the protocol snapshot that lets it answer what
//! the other side asked for, the test parameters, a step counter used only
//! to attribute failures, its guard timer and the shared transcript.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tpi_stream::{Channel, Message, PollFlags, errno, is_restart, restart};
use tpi_wire::{PrimKind, Primitive};
use tracing::{debug, trace, warn};

use crate::event::{Action, Event, Outgoing, Params, Snapshot, classify};
use crate::orchestrator::Backend;
use crate::timer::{
    CancelToken, DeadlineTimer, GuardTimer, INFINITE_WAIT, SignalTimer, scaled, scaled_wait,
};
use crate::trace::Trace;
use crate::verdict::{Step, Verdict};

/// Longest single poll, so cancellation and deadlines are noticed.
const POLL_SLICE_MS: i32 = 50;

// ============================================================================
// Roles
// ============================================================================

/// Which end of the module a role drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Above the module, issuing controls.
    Top,
    /// The transport peer below the module.
    Bot,
    /// A second user of the upper stream.
    Listener,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Top, Role::Bot, Role::Listener];

    /// Transcript column.
    pub fn col(self) -> usize {
        match self {
            Role::Top => 0,
            Role::Bot => 1,
            Role::Listener => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Role::Top => "top",
            Role::Bot => "bot",
            Role::Listener => "listener",
        }
    }
}

// ============================================================================
// Session
// ============================================================================

pub struct Session {
    pub(crate) role: Role,
    pub(crate) chan: Box<dyn Channel>,
    pub snap: Snapshot,
    pub params: Params,
    /// Step counter shown as `[role:step]`.
    pub state: u32,
    pub(crate) timer: Box<dyn GuardTimer>,
    pub(crate) cancel: CancelToken,
    pub(crate) trace: Arc<Trace>,
    pub(crate) scale: u64,
    pub(crate) backend: Backend,
    /// Detail printed under the next outcome banner.
    pub(crate) note: Option<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        role: Role,
        chan: Box<dyn Channel>,
        backend: Backend,
        trace: Arc<Trace>,
        cancel: CancelToken,
        scale: u64,
    ) -> Self {
        let timer: Box<dyn GuardTimer> = match backend {
            Backend::Process => Box::new(SignalTimer::new()),
            Backend::Thread => Box::new(DeadlineTimer::new()),
        };
        Session {
            role,
            chan,
            snap: Snapshot::default(),
            params: Params::default(),
            state: 0,
            timer,
            cancel,
            trace,
            scale: scale.max(1),
            backend,
            note: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub(crate) fn col(&self) -> usize {
        self.role.col()
    }

    /// Advances the step counter.
    pub fn step(&mut self) {
        self.state += 1;
    }

    /// Leaves a note for the outcome banner. The first note wins.
    pub fn note(&mut self, text: impl Into<String>) {
        if self.note.is_none() {
            self.note = Some(text.into());
        }
    }

    pub(crate) fn take_note(&mut self) -> Option<String> {
        self.note.take()
    }

    // ========================================================================
    // Guard timer
    // ========================================================================

    /// Arms the role's guard timer for `ms` (scaled); negative never fires.
    pub fn start_timer(&mut self, ms: i64) -> Step {
        if ms < 0 {
            return Ok(());
        }
        let ms = scaled(ms as u64, self.scale);
        self.timer.start(ms).map_err(|e| {
            warn!(role = self.role.name(), error = %e, "cannot arm guard timer");
            Verdict::Failure
        })
    }

    pub fn stop_timer(&mut self) -> Step {
        self.timer.stop().map_err(|e| {
            warn!(role = self.role.name(), error = %e, "cannot disarm guard timer");
            Verdict::Failure
        })
    }

    // ========================================================================
    // Sleeping
    // ========================================================================

    /// Sleeps `secs` seconds (scaled).
    pub fn sleep(&mut self, secs: u64) {
        self.trace.waiting(self.col(), self.state, secs);
        self.pause(scaled(secs * 1000, self.scale));
    }

    /// Sleeps `ms` milliseconds (scaled).
    pub fn msleep(&mut self, ms: u64) {
        let ms = scaled(ms, self.scale);
        self.trace.mwaiting(self.col(), self.state, ms);
        self.pause(ms);
    }

    /// Sleeps in slices and stops early when the role is cancelled.
    fn pause(&mut self, ms: u64) {
        let until = Instant::now() + Duration::from_millis(ms);
        loop {
            let now = Instant::now();
            if now >= until || self.cancel.is_cancelled() {
                return;
            }
            let left = until - now;
            std::thread::sleep(left.min(Duration::from_millis(POLL_SLICE_MS as u64)));
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Performs `action` on the stream.
    pub fn inject(&mut self, action: Action) -> Step {
        let label = action.label(&self.snap);
        debug!(role = self.role.name(), action = %label, state = self.state, "inject");
        let out = action.encode(&self.snap, &self.params);
        if let Action::Prim(kind) = action {
            self.snap.last_prim = kind.prim();
        }
        match out {
            Outgoing::Write(buf) => {
                self.trace.datcall(self.col(), self.state, &label, buf.len());
                self.write(&buf)
            }
            Outgoing::Writev(bufs) => {
                let total = bufs.iter().map(|b| b.len()).sum();
                self.trace.datcall(self.col(), self.state, &label, total);
                self.writev(&bufs)
            }
            Outgoing::Push(module) => self.push(module),
            Outgoing::Pop => self.pop(),
            Outgoing::Nonblocking(on) => self.nonblocking(on),
            Outgoing::Message {
                ctrl,
                data,
                band,
                flags,
            } => {
                match &ctrl {
                    Some(ctrl) => {
                        self.trace.tx_prim(self.col(), self.state, &label);
                        self.show_options(ctrl);
                    }
                    None => {
                        let len = data.as_ref().map_or(0, |d| d.len());
                        self.trace.datcall(self.col(), self.state, &label, len);
                    }
                }
                self.putpmsg(ctrl.as_deref(), data.as_deref(), band, flags)
            }
            Outgoing::Insert {
                ctrl,
                data,
                fd,
                offset,
            } => {
                self.trace.tx_prim(self.col(), self.state, &label);
                self.fdinsert(&ctrl, data.as_deref(), fd, offset)
            }
            Outgoing::Control(mut ic) => self.ti_ioctl(&mut ic),
        }
    }

    /// Waits up to `wait_ms` (scaled; negative waits forever) for the next
    /// message and classifies it.
    ///
    /// The guard timer is checked before anything else on every pass.
    pub fn wait_event(&mut self, wait_ms: i32) -> Event {
        let wait = scaled_wait(wait_ms, self.scale);
        let until = (wait >= 0).then(|| Instant::now() + Duration::from_millis(wait as u64));
        loop {
            if self.timer.fired() {
                self.timer.clear();
                self.trace.timeout(self.col(), self.state);
                self.snap.last_event = Some(Event::Timeout);
                return Event::Timeout;
            }
            if self.cancel.is_cancelled() {
                return Event::Failure;
            }
            let left = match until {
                None => INFINITE_WAIT,
                Some(at) => {
                    let ms = at.saturating_duration_since(Instant::now()).as_millis();
                    i32::try_from(ms).unwrap_or(i32::MAX)
                }
            };
            let slice = match self.timer.clamp(left) {
                t if t < 0 => POLL_SLICE_MS,
                t => t.min(POLL_SLICE_MS),
            };
            match self.chan.poll(PollFlags::READABLE, slice) {
                Err(e) if is_restart(&e) || errno(&e) == libc::EAGAIN => continue,
                Err(e) => {
                    self.failed_call(&e);
                    return Event::Failure;
                }
                Ok(ready) if ready.is_empty() => {
                    if until.is_some_and(|at| Instant::now() >= at) {
                        self.trace.nothing(self.col(), self.state);
                        self.snap.last_event = Some(Event::NoMsg);
                        return Event::NoMsg;
                    }
                    continue;
                }
                Ok(_) => {}
            }
            let msg = match restart(|| self.chan.getmsg()) {
                Ok(msg) => msg,
                Err(e) if errno(&e) == libc::EAGAIN => continue,
                Err(e) => {
                    self.failed_call(&e);
                    return Event::Failure;
                }
            };
            self.trace
                .dump(self.col(), "<-", msg.ctrl.as_deref(), msg.data.as_deref());
            let event = classify(&msg, &mut self.snap);
            if event == Event::NoMsg {
                continue;
            }
            trace!(role = self.role.name(), event = %event.name(), state = self.state, "received");
            self.show(event, &msg);
            return event;
        }
    }

    fn show(&self, event: Event, msg: &Message) {
        let (col, state) = (self.col(), self.state);
        match event {
            Event::Prim(kind) if is_ack(kind) => {
                self.trace.ack_prim(col, state, &pad(kind.name()));
                if let Some(ctrl) = &msg.ctrl {
                    self.show_options(ctrl);
                }
            }
            Event::Prim(kind) => {
                self.trace.rx_prim(col, state, &pad(kind.name()));
                if let Some(ctrl) = &msg.ctrl {
                    self.show_options(ctrl);
                }
                if let Some(data) = msg.data.as_ref().filter(|d| !d.is_empty()) {
                    self.trace.rx_data(col, state, "M_DATA----------", data.len());
                }
            }
            Event::Data => {
                let len = msg.data.as_ref().map_or(0, |d| d.len());
                self.trace.rx_data(col, state, "M_DATA----------", len);
            }
            Event::Eof => self.trace.rx_prim(col, state, "(EOF)-----------"),
            Event::Unknown(prim) => self.trace.no_prim(col, state, prim),
            Event::DecodeError => self.trace.no_prim(col, state, self.snap.last_prim),
            Event::NoMsg | Event::Timeout | Event::Failure => {}
        }
    }

    fn show_options(&self, ctrl: &[u8]) {
        if self.trace.verbose() < 4 {
            return;
        }
        if let Ok(prim) = Primitive::decode(ctrl) {
            self.trace.options(self.col(), &prim);
        }
    }

    /// Waits for one event and checks it is `want`.
    pub fn expect(&mut self, wait_ms: i32, want: Event) -> Step {
        let got = self.wait_event(wait_ms);
        if got == want {
            return Ok(());
        }
        self.trace.expect(self.col(), self.state, &want.name());
        self.note(format!("got {}, wanted {}", got.name(), want.name()));
        match got {
            Event::DecodeError => Err(Verdict::ScriptError),
            _ => Err(Verdict::Failure),
        }
    }

    // ========================================================================
    // Sibling roles
    // ========================================================================

    /// Runs `body` as a second role on the same stream end.
    ///
    /// The process backend forks; the thread backend clones the stream
    /// handle and the session state onto a new thread.
    pub fn fork_sibling<F>(&mut self, body: F) -> io::Result<Sibling>
    where
        F: FnOnce(&mut Session) -> Verdict + Send + 'static,
    {
        match self.backend {
            Backend::Process => {
                // SAFETY: the role process is single threaded, so the child
                // inherits a consistent address space. The child never
                // returns into the caller; it leaves through _exit.
                let pid = unsafe { libc::fork() };
                match pid {
                    -1 => Err(io::Error::last_os_error()),
                    0 => {
                        let verdict = body(self);
                        // SAFETY: _exit skips atexit handlers and stdio
                        // teardown that belong to the parent.
                        unsafe { libc::_exit(verdict.exit_status()) }
                    }
                    pid => Ok(Sibling::Process(pid)),
                }
            }
            Backend::Thread => {
                let mut twin = Session {
                    role: self.role,
                    chan: self.chan.try_clone()?,
                    snap: self.snap.clone(),
                    params: self.params.clone(),
                    state: self.state,
                    timer: Box::new(DeadlineTimer::new()),
                    cancel: self.cancel.clone(),
                    trace: self.trace.clone(),
                    scale: self.scale,
                    backend: self.backend,
                    note: None,
                };
                let handle = std::thread::Builder::new()
                    .name(format!("{}-sibling", self.role.name()))
                    .spawn(move || body(&mut twin))?;
                Ok(Sibling::Thread(handle))
            }
        }
    }

    /// Waits for a sibling and returns its verdict.
    pub fn join_sibling(&mut self, sibling: Sibling) -> io::Result<Verdict> {
        match sibling {
            Sibling::Process(pid) => {
                let mut status = 0;
                // SAFETY: pid is our own child; status is a valid out pointer.
                restart(|| match unsafe { libc::waitpid(pid, &mut status, libc::WUNTRACED) } {
                    -1 => Err(io::Error::last_os_error()),
                    _ => Ok(()),
                })?;
                if libc::WIFEXITED(status) {
                    Ok(Verdict::from_exit_status(libc::WEXITSTATUS(status)))
                } else {
                    if libc::WIFSTOPPED(status) {
                        // SAFETY: signalling our own stopped child.
                        unsafe { libc::kill(pid, libc::SIGKILL) };
                    }
                    Err(io::Error::other("sibling did not exit"))
                }
            }
            Sibling::Thread(handle) => handle
                .join()
                .map_err(|_| io::Error::other("sibling panicked")),
        }
    }
}

/// A second role started by [`Session::fork_sibling`].
#[derive(Debug)]
pub enum Sibling {
    Process(libc::pid_t),
    Thread(JoinHandle<Verdict>),
}

fn is_ack(kind: PrimKind) -> bool {
    matches!(
        kind,
        PrimKind::InfoAck
            | PrimKind::BindAck
            | PrimKind::ErrorAck
            | PrimKind::OkAck
            | PrimKind::OptmgmtAck
            | PrimKind::AddrAck
            | PrimKind::CapabilityAck
    )
}

/// Pads a primitive name with dashes to the 16-column field.
fn pad(name: &str) -> String {
    format!("{name:-<16}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TiControl;
    use tpi_stream::mem;
    use tpi_wire::consts::terr::TSYSERR;

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
    fn test_inject_then_expect() {
        let (mut top, mut bot) = pair();
        top.inject(Action::Prim(PrimKind::InfoReq)).unwrap();
        bot.expect(INFINITE_WAIT, Event::Prim(PrimKind::InfoReq))
            .unwrap();
        assert!(bot.snap.last_prio);
        bot.inject(Action::Prim(PrimKind::InfoAck)).unwrap();
        top.expect(100, Event::Prim(PrimKind::InfoAck)).unwrap();
        assert_eq!(top.snap.last_info.tsdu_size, 256);
    }

    #[test]
    fn test_quiet_stream_reports_no_message() {
        let (mut top, _bot) = pair();
        assert_eq!(top.wait_event(100), Event::NoMsg);
        assert_eq!(top.snap.last_event, Some(Event::NoMsg));
    }

    #[test]
    fn test_mismatch_fails_with_note() {
        let (mut top, mut bot) = pair();
        top.inject(Action::Prim(PrimKind::BindReq)).unwrap();
        assert_eq!(
            bot.expect(100, Event::Prim(PrimKind::InfoReq)),
            Err(Verdict::Failure)
        );
        assert!(bot.take_note().is_some());
    }

    #[test]
    fn test_garbage_is_a_script_error() {
        let (mut top, mut bot) = pair();
        top.inject(Action::PrimWayTooShort).unwrap();
        assert_eq!(
            bot.expect(100, Event::Prim(PrimKind::InfoReq)),
            Err(Verdict::ScriptError)
        );
    }

    #[test]
    fn test_timer_wins_over_traffic() {
        let (mut top, mut bot) = pair();
        top.inject(Action::Prim(PrimKind::InfoReq)).unwrap();
        bot.timer.start(0).unwrap();
        assert_eq!(bot.wait_event(100), Event::Timeout);
        // The message is still there once the timer is cleared.
        assert_eq!(bot.wait_event(100), Event::Prim(PrimKind::InfoReq));
    }

    #[test]
    fn test_cancelled_session_stops_waiting() {
        let (mut top, _bot) = pair();
        top.cancel.cancel();
        assert_eq!(top.wait_event(INFINITE_WAIT), Event::Failure);
    }

    #[test]
    fn test_control_round_trip() {
        let (mut top, mut bot) = pair();
        top.inject(Action::Push).unwrap();
        let peer = std::thread::spawn(move || {
            bot.expect(INFINITE_WAIT, Event::Prim(PrimKind::InfoReq))?;
            bot.snap.last_t_errno = TSYSERR;
            bot.snap.last_errno = libc::EPROTO;
            bot.inject(Action::Prim(PrimKind::ErrorAck))
        });
        top.params.timout = 5000;
        assert_eq!(
            top.inject(Action::Control(TiControl::Getinfo)),
            Err(Verdict::Failure)
        );
        assert_eq!(top.snap.last_t_errno, TSYSERR);
        assert_eq!(top.snap.last_errno, libc::EPROTO);
        peer.join().unwrap().unwrap();
    }

    #[test]
    fn test_thread_sibling_joins() {
        let (mut top, _bot) = pair();
        let sibling = top.fork_sibling(|s| {
            s.step();
            Verdict::Failure
        });
        let verdict = top.join_sibling(sibling.unwrap()).unwrap();
        assert_eq!(verdict, Verdict::Failure);
    }
}
