//! Runs one test case: a role per stream, each in its own process or
//! thread, under a case-wide guard timer.
//!
//! Both backends fail fast. As soon as one role reports anything other
//! than success its siblings are brought down, and a role brought down
//! that way counts as inconclusive.

use std::fmt;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use tpi_stream::stropts::{RMSGD, SNDZERO};
use tpi_stream::{Channel, Ioctl, restart};
use tracing::{debug, warn};

use crate::catalog::{Stream, TestCase};
use crate::session::{Role, Session};
use crate::timer::{CancelToken, GuardTimer, SignalTimer, scaled};
use crate::trace::{ALL, Trace};
use crate::verdict::Verdict;

// ============================================================================
// Backends
// ============================================================================

/// How roles are isolated from each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// A forked process per role over a real STREAMS pipe.
    Process,
    /// A thread per role over the in-process pipe.
    Thread,
}

impl Backend {
    /// `Process` when built with STREAMS support, else `Thread`.
    pub fn native() -> Backend {
        if cfg!(feature = "streams") {
            Backend::Process
        } else {
            Backend::Thread
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Backend::Process => "process",
            Backend::Thread => "thread",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Setup errors
// ============================================================================

/// The harness could not build or tear down a case's streams.
#[derive(Debug)]
pub enum SetupError {
    /// This build cannot run the backend.
    Unsupported(Backend),
    /// A stream call failed while preparing or releasing the streams.
    Io {
        step: &'static str,
        source: io::Error,
    },
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Unsupported(backend) => {
                write!(f, "the {backend} backend needs STREAMS support")
            }
            SetupError::Io { step, source } => write!(f, "{step} failed: {source}"),
        }
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SetupError::Io { source, .. } => Some(source),
            SetupError::Unsupported(_) => None,
        }
    }
}

fn setup<T>(step: &'static str, out: io::Result<T>) -> Result<T, SetupError> {
    out.map_err(|source| SetupError::Io { step, source })
}

// ============================================================================
// Streams
// ============================================================================

/// The pipe a case runs over.
///
/// The top role holds one end, the transport peer the other with
/// `pipemod` pushed on it. Both ends read in message-discard mode and
/// send zero-length writes.
pub struct Streams {
    top: Box<dyn Channel>,
    bot: Box<dyn Channel>,
}

impl Streams {
    pub fn open(backend: Backend) -> Result<Self, SetupError> {
        let (mut top, mut bot) = Self::pipe(backend)?;
        for end in [&mut top, &mut bot] {
            setup("I_SRDOPT", restart(|| end.ioctl(Ioctl::SetReadOpt(RMSGD))))?;
            setup("I_SWROPT", restart(|| end.ioctl(Ioctl::SetWriteOpt(SNDZERO))))?;
        }
        setup("I_PUSH", restart(|| bot.ioctl(Ioctl::Push("pipemod"))))?;
        debug!(backend = %backend, "streams open");
        Ok(Streams { top, bot })
    }

    #[cfg(feature = "streams")]
    fn pipe(backend: Backend) -> Result<(Box<dyn Channel>, Box<dyn Channel>), SetupError> {
        match backend {
            Backend::Process => {
                let (a, b) = setup("pipe", tpi_stream::StreamsChannel::pipe())?;
                Ok((Box::new(a), Box::new(b)))
            }
            Backend::Thread => {
                let (a, b) = tpi_stream::mem::pipe();
                Ok((Box::new(a), Box::new(b)))
            }
        }
    }

    #[cfg(not(feature = "streams"))]
    fn pipe(backend: Backend) -> Result<(Box<dyn Channel>, Box<dyn Channel>), SetupError> {
        match backend {
            Backend::Process => Err(SetupError::Unsupported(backend)),
            Backend::Thread => {
                let (a, b) = tpi_stream::mem::pipe();
                Ok((Box::new(a), Box::new(b)))
            }
        }
    }

    /// A handle for `role`. The listener shares the top end.
    pub fn channel(&self, role: Role) -> io::Result<Box<dyn Channel>> {
        match role {
            Role::Top | Role::Listener => self.top.try_clone(),
            Role::Bot => self.bot.try_clone(),
        }
    }

    pub fn close(mut self) -> Result<(), SetupError> {
        setup("I_POP", restart(|| self.bot.ioctl(Ioctl::Pop)))?;
        setup("close", self.top.close())?;
        setup("close", self.bot.close())?;
        debug!("streams closed");
        Ok(())
    }
}

// ============================================================================
// One role
// ============================================================================

/// Runs preamble, body and postamble for one role and reports the role's
/// verdict.
///
/// A failed preamble skips the body. A failed postamble makes an
/// otherwise successful body inconclusive.
pub fn run_stream(s: &mut Session, stream: &Stream) -> Verdict {
    let trace = s.trace.clone();
    let col = s.col();

    trace.preamble(col);
    s.state = 100;
    s.note = None;
    let pre = Verdict::of((stream.preamble)(s));
    let result = if !pre.is_success() {
        let note = s.take_note();
        match pre {
            Verdict::NotApplicable => {
                trace.not_applicable(col, s.state, note.as_deref());
                Verdict::NotApplicable
            }
            Verdict::Skipped => {
                trace.skipped(col, s.state, note.as_deref());
                Verdict::Skipped
            }
            _ => {
                trace.inconclusive(col, s.state, note.as_deref());
                Verdict::Inconclusive
            }
        }
    } else {
        trace.test(col);
        s.state = 200;
        let body = Verdict::of((stream.body)(s));
        let note = s.take_note();
        let (state, note) = (s.state, note.as_deref());
        let mut result = match body {
            Verdict::Success => {
                trace.passed(col, state, note);
                Verdict::Success
            }
            Verdict::Failure => {
                trace.failed(col, state, note);
                Verdict::Failure
            }
            Verdict::ScriptError => {
                trace.script_error(col, state, note);
                Verdict::ScriptError
            }
            Verdict::NotApplicable => {
                trace.not_applicable(col, state, note);
                Verdict::NotApplicable
            }
            Verdict::Skipped => {
                trace.skipped(col, state, note);
                Verdict::Skipped
            }
            Verdict::Inconclusive => {
                trace.inconclusive(col, state, note);
                Verdict::Inconclusive
            }
        };

        trace.postamble(col);
        s.state = 300;
        let post = Verdict::of((stream.postamble)(s));
        if !post.is_success() {
            let note = s.take_note();
            match post {
                Verdict::NotApplicable => {
                    trace.not_applicable(col, s.state, note.as_deref());
                    result = Verdict::NotApplicable;
                }
                Verdict::Skipped => {
                    trace.skipped(col, s.state, note.as_deref());
                    result = Verdict::Skipped;
                }
                _ => {
                    trace.inconclusive(col, s.state, note.as_deref());
                    if result == Verdict::Success {
                        result = Verdict::Inconclusive;
                    }
                }
            }
        }
        result
    };
    trace.test_end(col);
    debug!(role = s.role.name(), verdict = %result, "role finished");
    result
}

// ============================================================================
// One case
// ============================================================================

/// What every role of a case shares.
#[derive(Debug, Clone)]
pub struct Harness {
    pub backend: Backend,
    pub trace: Arc<Trace>,
    /// Divisor applied to every wait, sleep and guard time.
    pub scale: u64,
}

impl Harness {
    /// Runs every role of `case` and folds their verdicts.
    ///
    /// `duration` is the case guard time in milliseconds, `None` for no
    /// limit. Roles start listener first, top last.
    pub fn test_run(&self, case: &TestCase, streams: &Streams, duration: Option<u64>) -> Verdict {
        let duration = duration.map(|ms| scaled(ms, self.scale));
        let verdicts = match self.backend {
            Backend::Process => self.run_processes(case, streams, duration),
            Backend::Thread => self.run_threads(case, streams, duration),
        };
        debug!(case = %case.numb, ?verdicts, "roles finished");
        match verdicts {
            Some(v) => Verdict::aggregate(&v),
            None => Verdict::Inconclusive,
        }
    }

    fn session(&self, role: Role, chan: Box<dyn Channel>, cancel: CancelToken) -> Session {
        Session::new(
            role,
            chan,
            self.backend,
            self.trace.clone(),
            cancel,
            self.scale,
        )
    }

    fn run_processes(
        &self,
        case: &TestCase,
        streams: &Streams,
        duration: Option<u64>,
    ) -> Option<[Verdict; 3]> {
        let mut timer = SignalTimer::new();
        if let Some(ms) = duration
            && let Err(e) = timer.start(ms)
        {
            warn!(error = %e, "cannot arm case timer");
            return None;
        }
        let mut pids: [libc::pid_t; 3] = [0; 3];
        let mut verdicts = [Verdict::Success; 3];
        let mut stopped = [false; 3];

        for role in [Role::Listener, Role::Bot, Role::Top] {
            let Some(stream) = case.stream(role) else {
                continue;
            };
            let chan = match streams.channel(role) {
                Ok(chan) => chan,
                Err(e) => {
                    warn!(role = role.name(), error = %e, "cannot open role stream");
                    kill_all(&pids);
                    reap_all(&mut pids);
                    let _ = timer.stop();
                    return None;
                }
            };
            // SAFETY: the orchestrator is single threaded; the child only
            // runs its role and leaves through _exit.
            match unsafe { libc::fork() } {
                -1 => {
                    warn!(error = %io::Error::last_os_error(), "fork failed");
                    kill_all(&pids);
                    reap_all(&mut pids);
                    let _ = timer.stop();
                    return None;
                }
                0 => {
                    let mut s = self.session(role, chan, CancelToken::new());
                    let verdict = run_stream(&mut s, stream);
                    // SAFETY: leaves the child without running the parent's
                    // exit handlers.
                    unsafe { libc::_exit(verdict.exit_status()) }
                }
                pid => {
                    debug!(role = role.name(), pid, "role started");
                    pids[role.col()] = pid;
                }
            }
        }

        while pids.iter().any(|&p| p > 0) {
            let mut status = 0;
            // SAFETY: status is a valid out pointer.
            let pid = unsafe { libc::waitpid(-1, &mut status, libc::WUNTRACED) };
            if pid == -1 {
                let err = io::Error::last_os_error();
                if timer.fired() {
                    timer.clear();
                    self.trace.timeout(ALL, 0);
                    kill_all(&pids);
                    continue;
                }
                if tpi_stream::is_restart(&err) {
                    continue;
                }
                warn!(error = %err, "waitpid failed");
                break;
            }
            let Some(col) = pids.iter().position(|&p| p == pid) else {
                continue;
            };
            if libc::WIFEXITED(status) {
                pids[col] = 0;
                let verdict = Verdict::from_exit_status(libc::WEXITSTATUS(status));
                debug!(pid, verdict = %verdict, "role exited");
                if !stopped[col] {
                    verdicts[col] = verdict;
                }
                if !verdict.is_success() {
                    kill_all(&pids);
                }
            } else if libc::WIFSIGNALED(status) {
                pids[col] = 0;
                let signal = libc::WTERMSIG(status);
                self.trace.terminated(col, signal);
                kill_all(&pids);
                if !stopped[col] {
                    verdicts[col] = if signal == libc::SIGKILL {
                        Verdict::Inconclusive
                    } else {
                        Verdict::Failure
                    };
                }
            } else if libc::WIFSTOPPED(status) {
                self.trace.stopped(col, libc::WSTOPSIG(status));
                stopped[col] = true;
                verdicts[col] = Verdict::Failure;
                kill_all(&pids);
            }
        }

        if timer.stop().is_err() {
            return None;
        }
        Some(verdicts)
    }

    fn run_threads(
        &self,
        case: &TestCase,
        streams: &Streams,
        duration: Option<u64>,
    ) -> Option<[Verdict; 3]> {
        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel::<(usize, Option<Verdict>)>();
        let mut handles = Vec::new();
        let mut live = 0;

        for role in [Role::Listener, Role::Bot, Role::Top] {
            let Some(stream) = case.stream(role).cloned() else {
                continue;
            };
            let chan = match streams.channel(role) {
                Ok(chan) => chan,
                Err(e) => {
                    warn!(role = role.name(), error = %e, "cannot open role stream");
                    cancel.cancel();
                    break;
                }
            };
            let mut s = self.session(role, chan, cancel.clone());
            let tx = tx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("role-{}", role.name()))
                .spawn(move || {
                    let out = catch_unwind(AssertUnwindSafe(|| run_stream(&mut s, &stream)));
                    let _ = tx.send((role.col(), out.ok()));
                });
            match spawned {
                Ok(handle) => {
                    handles.push(handle);
                    live += 1;
                }
                Err(e) => {
                    warn!(role = role.name(), error = %e, "cannot start role thread");
                    cancel.cancel();
                    break;
                }
            }
        }
        drop(tx);

        let mut deadline = duration.map(|ms| Instant::now() + Duration::from_millis(ms));
        let mut verdicts = [Verdict::Success; 3];
        let mut failed_setup = cancel.is_cancelled();
        while live > 0 {
            let report = match deadline {
                Some(at) => rx.recv_timeout(at.saturating_duration_since(Instant::now())),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match report {
                Ok((col, outcome)) => {
                    live -= 1;
                    verdicts[col] = match outcome {
                        _ if cancel.is_cancelled() => Verdict::Inconclusive,
                        Some(verdict) => verdict,
                        None => {
                            self.trace.terminated(col, libc::SIGABRT);
                            Verdict::Failure
                        }
                    };
                    if !verdicts[col].is_success() {
                        cancel.cancel();
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.trace.timeout(ALL, 0);
                    cancel.cancel();
                    deadline = None;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    failed_setup = true;
                    break;
                }
            }
        }
        for handle in handles {
            let _ = handle.join();
        }
        (!failed_setup).then_some(verdicts)
    }
}

fn kill_all(pids: &[libc::pid_t; 3]) {
    for &pid in pids.iter().filter(|&&p| p > 0) {
        // SAFETY: pid is one of our live children.
        unsafe { libc::kill(pid, libc::SIGKILL) };
    }
}

fn reap_all(pids: &mut [libc::pid_t; 3]) {
    for pid in pids.iter_mut().filter(|p| **p > 0) {
        let mut status = 0;
        // SAFETY: pid is one of our children; status is a valid out pointer.
        let _ = restart(|| match unsafe { libc::waitpid(*pid, &mut status, 0) } {
            -1 => Err(io::Error::last_os_error()),
            _ => Ok(()),
        });
        *pid = 0;
    }
}
