//! Selecting, running and reporting test cases.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::catalog::{TestCase, catalog};
use crate::orchestrator::{Backend, Harness, Streams};
use crate::timer::TEST_DURATION;
use crate::trace::{ALL, Trace};
use crate::verdict::Verdict;

/// Standard the suite checks against.
pub const STD_NAME: &str = "XNS 5.2";
/// Short form used in case identifiers.
pub const STD_SHORT: &str = "XNS";
pub const PACKAGE: &str = "Transport Provider Interface";
pub const SHORT_NAME: &str = "TIMOD";
pub const DEFAULT_DEVICE: &str = "/dev/streams/clone/echo";

// ============================================================================
// Configuration
// ============================================================================

/// Everything the command line decides about a run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub device: String,
    pub backend: Backend,
    pub verbose: i32,
    /// Print a per-case result table at the end.
    pub summary: bool,
    /// Hex dump every message sent and received.
    pub messages: bool,
    pub repeat_on_success: bool,
    pub repeat_on_failure: bool,
    /// Rerun a failing case once at full verbosity.
    pub repeat_verbose: bool,
    pub exit_on_failure: bool,
    /// No suite-wide guard time.
    pub wait: bool,
    /// Divisor for every timer, 1 for real time.
    pub scale: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            device: DEFAULT_DEVICE.to_string(),
            backend: Backend::native(),
            verbose: 1,
            summary: false,
            messages: false,
            repeat_on_success: false,
            repeat_on_failure: false,
            repeat_verbose: false,
            exit_on_failure: false,
            wait: false,
            scale: 1,
        }
    }
}

// ============================================================================
// Selection errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectError {
    /// A `--onetest`, `--tests` or `--list` argument matched nothing.
    NoMatch(String),
    /// The selection is empty.
    NothingToRun,
    /// The listing could not be written out.
    Output(io::ErrorKind),
}

impl fmt::Display for SelectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectError::NoMatch(arg) => write!(f, "specification `{arg}' matched no test"),
            SelectError::NothingToRun => f.write_str("no tests to run"),
            SelectError::Output(kind) => write!(f, "cannot write test list: {kind}"),
        }
    }
}

impl std::error::Error for SelectError {}

// ============================================================================
// Listing
// ============================================================================

/// Identifier printed for a case, e.g. `XNS-TIMOD/2.1.1`.
pub fn case_id(case: &TestCase) -> String {
    format!("{STD_SHORT}-{SHORT_NAME}/{}", case.numb)
}

/// Prints the cases whose number starts with `range` (all of them when
/// `None`).
pub fn list(
    cases: &[TestCase],
    range: Option<&str>,
    verbose: i32,
    out: &mut dyn Write,
) -> Result<usize, SelectError> {
    let matching: Vec<&TestCase> = cases
        .iter()
        .filter(|c| range.is_none_or(|r| c.numb.starts_with(r)))
        .collect();
    if matching.is_empty()
        && let Some(range) = range
    {
        return Err(SelectError::NoMatch(range.to_string()));
    }
    let mut text = String::from("\n");
    for case in &matching {
        if verbose > 2 {
            text.push_str(&format!("Test Group: {}\n", case.tgrp));
        }
        text.push_str(&format!("Test Case {}: {}\n", case_id(case), case.name));
        if verbose > 2 {
            text.push_str(&format!("Test Reference: {}\n", case.sref));
        }
        if verbose > 1 {
            text.push_str(&format!("{}\n\n", case.desc));
        }
    }
    if verbose <= 1 {
        text.push('\n');
    }
    out.write_all(text.as_bytes())
        .and_then(|()| out.flush())
        .map_err(|e| {
            warn!(error = %e, "listing not written");
            SelectError::Output(e.kind())
        })?;
    Ok(matching.len())
}

// ============================================================================
// Suite
// ============================================================================

#[derive(Debug)]
struct Entry {
    case: TestCase,
    run: bool,
    result: Verdict,
}

/// Counts of outcomes over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub successes: u32,
    pub failures: u32,
    pub inconclusive: u32,
    pub not_applicable: u32,
    pub skipped: u32,
    pub not_selected: u32,
    pub aborted: bool,
}

impl Totals {
    pub fn total(&self) -> u32 {
        self.successes
            + self.failures
            + self.inconclusive
            + self.not_applicable
            + self.skipped
            + self.not_selected
    }

    /// Process exit status for a run of `selected` cases.
    ///
    /// A single case reports its own outcome (77 for skipped); a larger
    /// run only reports whether it was aborted.
    pub fn exit_code(&self, selected: usize) -> i32 {
        if selected == 1 {
            if self.successes > 0 {
                return 0;
            }
            if self.failures > 0 || self.inconclusive > 0 {
                return 1;
            }
            if self.not_applicable > 0 {
                return 0;
            }
            if self.skipped > 0 {
                return 77;
            }
        }
        i32::from(self.aborted)
    }
}

/// The catalog plus what was selected and how each case went.
#[derive(Debug)]
pub struct Suite {
    entries: Vec<Entry>,
    config: RunConfig,
}

impl Suite {
    pub fn new(config: RunConfig) -> Self {
        Self::with_cases(catalog(), config)
    }

    pub fn with_cases(cases: Vec<TestCase>, config: RunConfig) -> Self {
        let entries = cases
            .into_iter()
            .map(|case| Entry {
                case,
                run: true,
                result: Verdict::Inconclusive,
            })
            .collect();
        Suite { entries, config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn cases(&self) -> impl Iterator<Item = &TestCase> {
        self.entries.iter().map(|e| &e.case)
    }

    pub fn selected(&self) -> usize {
        self.entries.iter().filter(|e| e.run).count()
    }

    /// Result recorded for case `numb` by the last [`Suite::do_tests`].
    pub fn result(&self, numb: &str) -> Option<Verdict> {
        self.entries
            .iter()
            .find(|e| e.case.numb == numb)
            .map(|e| e.result)
    }

    /// Narrows the run to exact `onetest` numbers and `ranges` prefixes.
    ///
    /// With neither, every case runs. Each argument has to match at least
    /// one case.
    pub fn select(&mut self, onetest: &[String], ranges: &[String]) -> Result<usize, SelectError> {
        if onetest.is_empty() && ranges.is_empty() {
            return self.nonempty();
        }
        for entry in &mut self.entries {
            entry.run = false;
        }
        let exact = onetest.iter().map(|s| (s, true));
        let prefix = ranges.iter().map(|s| (s, false));
        for (arg, whole) in exact.chain(prefix) {
            let mut hits = 0;
            for entry in &mut self.entries {
                let numb = entry.case.numb.as_str();
                let hit = if whole {
                    numb == arg.as_str()
                } else {
                    numb.starts_with(arg.as_str())
                };
                if hit {
                    entry.run = true;
                    hits += 1;
                }
            }
            if hits == 0 {
                return Err(SelectError::NoMatch(arg.clone()));
            }
        }
        self.nonempty()
    }

    fn nonempty(&self) -> Result<usize, SelectError> {
        match self.selected() {
            0 => Err(SelectError::NothingToRun),
            n => Ok(n),
        }
    }

    fn harness(&self, verbose: i32) -> Harness {
        Harness {
            backend: self.config.backend,
            trace: Arc::new(Trace::new(verbose, self.config.messages)),
            scale: self.config.scale.max(1),
        }
    }

    /// Runs case `index` once and applies its expected outcome.
    fn run_case(&self, index: usize, harness: &Harness) -> Verdict {
        let case = &self.entries[index].case;
        let suite = (!self.config.wait).then_some(TEST_DURATION);
        if let Some(limit) = suite
            && case.duration >= limit
        {
            return Verdict::Skipped.against(case.expect);
        }
        let duration = match case.duration {
            0 => suite,
            ms => Some(ms),
        };
        let streams = match Streams::open(self.config.backend) {
            Ok(streams) => streams,
            Err(e) => {
                warn!(case = %case.numb, error = %e, "cannot start case");
                return Verdict::Inconclusive;
            }
        };
        let verdict = harness.test_run(case, &streams, duration);
        if let Err(e) = streams.close() {
            warn!(case = %case.numb, error = %e, "cannot stop case");
        }
        debug!(case = %case.numb, verdict = %verdict, "case finished");
        verdict.against(case.expect)
    }

    /// Runs one selected case by number, outside of the reporting loop.
    pub fn run_one(&self, numb: &str) -> Option<Verdict> {
        let index = self.entries.iter().position(|e| e.case.numb == numb)?;
        Some(self.run_case(index, &self.harness(self.config.verbose)))
    }

    fn say(trace: &Trace, text: &str) {
        if trace.verbose() > 0 {
            trace.emit(ALL, text);
        }
    }

    /// Runs every selected case and prints the report.
    ///
    /// Returns the process exit status: 2 when the streams cannot be set
    /// up at all, else [`Totals::exit_code`].
    pub fn do_tests(&mut self) -> i32 {
        let selected = self.selected();
        let base_verbose = self.config.verbose;
        let mut verbose = base_verbose;
        let mut harness = self.harness(verbose);

        Self::say(
            &harness.trace,
            &format!("\n{STD_NAME} - {PACKAGE} - {SHORT_NAME} - Conformance Test Suite"),
        );
        Self::say(
            &harness.trace,
            &format!("\nUsing device {}\n", self.config.device),
        );

        if selected != 1 {
            match Streams::open(self.config.backend).and_then(Streams::close) {
                Ok(()) => {}
                Err(e) => {
                    warn!(error = %e, "suite setup failed");
                    eprintln!("Test Suite setup failed!");
                    return 2;
                }
            }
        }

        let mut totals = Totals::default();
        let mut repeat = false;
        let mut i = 0;
        while i < self.entries.len() {
            if !self.entries[i].run {
                self.entries[i].result = Verdict::Inconclusive;
                totals.not_selected += 1;
                i += 1;
                continue;
            }
            if totals.aborted {
                self.entries[i].result = Verdict::Inconclusive;
                totals.inconclusive += 1;
                i += 1;
                continue;
            }

            let case = &self.entries[i].case;
            if verbose > 0 {
                let mut text = String::new();
                if verbose > 1 {
                    text.push_str(&format!("\nTest Group: {}", case.tgrp));
                }
                text.push_str(&format!("\nTest Case {}: {}\n", case_id(case), case.name));
                if verbose > 1 {
                    text.push_str(&format!("Test Reference: {}\n", case.sref));
                    text.push_str(&format!("{}\n", case.desc));
                }
                harness.trace.emit(ALL, &text);
            }

            let result = self.run_case(i, &harness);
            let counted = !self.config.repeat_verbose || repeat;
            let banner = match result {
                Verdict::Success => {
                    totals.successes += 1;
                    "\n*********\n********* Test Case SUCCESSFUL\n*********\n"
                }
                Verdict::Failure => {
                    if counted {
                        totals.failures += 1;
                    }
                    "\nXXXXXXXXX\nXXXXXXXXX Test Case FAILED\nXXXXXXXXX\n"
                }
                Verdict::NotApplicable => {
                    totals.not_applicable += 1;
                    "\nXXXXXXXXX\nXXXXXXXXX Test Case NOT APPLICABLE\nXXXXXXXXX\n"
                }
                Verdict::Skipped => {
                    totals.skipped += 1;
                    "\nXXXXXXXXX\nXXXXXXXXX Test Case SKIPPED\nXXXXXXXXX\n"
                }
                Verdict::Inconclusive | Verdict::ScriptError => {
                    if counted {
                        totals.inconclusive += 1;
                    }
                    "\n?????????\n????????? Test Case INCONCLUSIVE\n?????????\n"
                }
            };
            Self::say(&harness.trace, banner);

            let failing = matches!(
                result,
                Verdict::Failure | Verdict::Inconclusive | Verdict::ScriptError
            );
            if (self.config.repeat_on_failure && failing)
                || (self.config.repeat_on_success && result.is_success())
            {
                continue;
            }
            if repeat {
                repeat = false;
                verbose = base_verbose;
                harness = self.harness(verbose);
            } else if self.config.repeat_verbose && failing {
                repeat = true;
                verbose = 5;
                harness = self.harness(verbose);
                continue;
            }
            self.entries[i].result = result;
            if self.config.exit_on_failure && failing {
                totals.aborted = true;
            }
            i += 1;
        }

        if self.config.summary && verbose > 0 {
            let mut text = String::new();
            for entry in self.entries.iter().filter(|e| e.run) {
                let id = format!("{}-{}/{:<10}", STD_SHORT, SHORT_NAME, entry.case.numb);
                let name = match entry.result {
                    Verdict::ScriptError => Verdict::Inconclusive.name(),
                    other => other.name(),
                };
                text.push_str(&format!("\nTest Case {id} {name}"));
            }
            harness.trace.emit(ALL, &text);
        }

        if verbose > 0 && selected > 1 {
            let mut text = format!(
                "\n\
                 ========= {:3} successes     \n\
                 ========= {:3} failures      \n\
                 ========= {:3} inconclusive  \n\
                 ========= {:3} not applicable\n\
                 ========= {:3} skipped       \n\
                 ========= {:3} not selected  \n\
                 ============================\n\
                 ========= {:3} total         ",
                totals.successes,
                totals.failures,
                totals.inconclusive,
                totals.not_applicable,
                totals.skipped,
                totals.not_selected,
                totals.total(),
            );
            if !totals.aborted && totals.failures == 0 {
                text.push_str("\n\nDone.\n");
            }
            harness.trace.emit(ALL, &text);
        }

        let pad = if verbose > 0 { "\n" } else { "" };
        if totals.aborted {
            eprintln!("{pad}Test Suite aborted due to failure.{pad}");
        } else if totals.failures > 0 {
            eprintln!("{pad}Test Suite failed.{pad}");
        }
        totals.exit_code(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Stream;
    use crate::script::phase;

    fn quiet() -> RunConfig {
        RunConfig {
            verbose: 0,
            backend: Backend::Thread,
            scale: 10,
            ..RunConfig::default()
        }
    }

    fn fixed(numb: &str, verdict: Verdict) -> TestCase {
        let body = phase(move |_| match verdict {
            Verdict::Success => Ok(()),
            other => Err(other),
        });
        let ok = || phase(|_| Ok(()));
        TestCase {
            numb: numb.into(),
            tgrp: "test",
            sref: "(none)",
            name: format!("always {verdict}"),
            desc: String::new(),
            streams: [Some(Stream::new(ok(), body, ok())), None, None],
            duration: 0,
            expect: Verdict::Success,
        }
    }

    #[test]
    fn test_selection() {
        let mut suite = Suite::new(quiet());
        let all = suite.selected();
        assert_eq!(suite.select(&[], &[]), Ok(all));
        assert_eq!(suite.select(&["2.1.1".to_string()], &[]), Ok(1));
        assert_eq!(suite.select(&[], &["3.1".to_string()]), Ok(9));
        assert_eq!(
            suite.select(&["2.1.1".to_string()], &["2.4".to_string()]),
            Ok(5)
        );
        assert_eq!(
            suite.select(&["2.1".to_string()], &[]),
            Err(SelectError::NoMatch("2.1".into()))
        );
        assert_eq!(
            suite.select(&[], &["9".to_string()]).unwrap_err().to_string(),
            "specification `9' matched no test"
        );
    }

    #[test]
    fn test_listing() {
        let cases = catalog();
        let mut out = Vec::new();
        assert_eq!(list(&cases, Some("2.4"), 1, &mut out), Ok(4));
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Test Case XNS-TIMOD/2.4.1: TI_SETMYNAME with data\n"));
        assert!(!text.contains("Test Reference"));

        let mut out = Vec::new();
        list(&cases, Some("1.1"), 3, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Test Group: Pushing and popping the timod module\n"));
        assert!(text.contains("Test Reference: (none)\n"));

        let mut out = Vec::new();
        assert!(list(&cases, Some("7"), 1, &mut out).is_err());
    }

    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_listing_reports_write_failure() {
        let cases = catalog();
        let err = list(&cases, Some("2.4"), 1, &mut Closed).unwrap_err();
        assert_eq!(err, SelectError::Output(io::ErrorKind::BrokenPipe));
        assert!(err.to_string().starts_with("cannot write test list"));
    }

    #[test]
    fn test_single_case_exit_codes() {
        for (verdict, code) in [
            (Verdict::Success, 0),
            (Verdict::Failure, 1),
            (Verdict::Inconclusive, 1),
            (Verdict::NotApplicable, 0),
            (Verdict::Skipped, 77),
        ] {
            let mut suite = Suite::with_cases(vec![fixed("1.1", verdict)], quiet());
            assert_eq!(suite.do_tests(), code, "{verdict}");
            assert_eq!(suite.result("1.1"), Some(verdict));
        }
    }

    #[test]
    fn test_exit_on_failure_aborts_the_rest() {
        let cases = vec![
            fixed("1.1", Verdict::Success),
            fixed("1.2", Verdict::Failure),
            fixed("1.3", Verdict::Success),
        ];
        let config = RunConfig {
            exit_on_failure: true,
            ..quiet()
        };
        let mut suite = Suite::with_cases(cases, config);
        assert_eq!(suite.do_tests(), 1);
        assert_eq!(suite.result("1.3"), Some(Verdict::Inconclusive));
    }

    #[test]
    fn test_multi_case_run_reports_only_aborts() {
        let cases = vec![fixed("1.1", Verdict::Success), fixed("1.2", Verdict::Failure)];
        let mut suite = Suite::with_cases(cases, quiet());
        assert_eq!(suite.do_tests(), 0);
    }

    #[test]
    fn test_long_cases_are_skipped() {
        let mut case = fixed("1.1", Verdict::Success);
        case.duration = TEST_DURATION;
        let suite = Suite::with_cases(vec![case], quiet());
        assert_eq!(suite.run_one("1.1"), Some(Verdict::Skipped));
    }

    #[test]
    fn test_totals() {
        let totals = Totals {
            successes: 3,
            failures: 1,
            not_selected: 2,
            ..Totals::default()
        };
        assert_eq!(totals.total(), 6);
        assert_eq!(totals.exit_code(4), 0);
        assert_eq!(
            Totals {
                aborted: true,
                ..totals
            }
            .exit_code(4),
            1
        );
    }
}
