//! Test outcomes and how they combine.

use std::fmt;

/// Outcome of a step, a role, or a whole test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Success,
    Failure,
    Inconclusive,
    NotApplicable,
    Skipped,
    /// The harness's own model of the exchange was wrong (bad decode).
    ScriptError,
}

/// Result of one scripted step. `?` propagates the first failure.
pub type Step = Result<(), Verdict>;

impl Verdict {
    /// Numeric result code as the suite reports it.
    pub fn code(self) -> i32 {
        match self {
            Verdict::Success => 0,
            Verdict::Failure => 1,
            Verdict::Inconclusive => -1,
            Verdict::NotApplicable => 3,
            Verdict::Skipped => 77,
            Verdict::ScriptError => -2,
        }
    }

    /// Exit status a role process reports to the orchestrator.
    pub fn exit_status(self) -> i32 {
        self.code() & 0xff
    }

    /// Reverses [`Verdict::exit_status`]. Anything unrecognised is inconclusive.
    pub fn from_exit_status(status: i32) -> Verdict {
        match status & 0xff {
            0 => Verdict::Success,
            1 => Verdict::Failure,
            3 => Verdict::NotApplicable,
            77 => Verdict::Skipped,
            254 => Verdict::ScriptError,
            _ => Verdict::Inconclusive,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Verdict::Success => "SUCCESS",
            Verdict::Failure => "FAILURE",
            Verdict::Inconclusive => "INCONCLUSIVE",
            Verdict::NotApplicable => "NOT APPLICABLE",
            Verdict::Skipped => "SKIPPED",
            Verdict::ScriptError => "SCRIPT ERROR",
        }
    }

    pub fn is_success(self) -> bool {
        self == Verdict::Success
    }

    /// Folds a step result into a verdict.
    pub fn of(step: Step) -> Verdict {
        match step {
            Ok(()) => Verdict::Success,
            Err(v) => v,
        }
    }

    /// Combines the verdicts of every role of one test case.
    ///
    /// Not-applicable wins over skipped, which wins over failure. The case
    /// succeeds only when every role succeeded; any other mix is
    /// inconclusive.
    pub fn aggregate(roles: &[Verdict]) -> Verdict {
        if roles.contains(&Verdict::NotApplicable) {
            Verdict::NotApplicable
        } else if roles.contains(&Verdict::Skipped) {
            Verdict::Skipped
        } else if roles.contains(&Verdict::Failure) {
            Verdict::Failure
        } else if roles.iter().all(|v| v.is_success()) {
            Verdict::Success
        } else {
            Verdict::Inconclusive
        }
    }

    /// Applies a case's expected outcome: an expected failure or
    /// inconclusive result counts as a success.
    pub fn against(self, expected: Verdict) -> Verdict {
        match self {
            Verdict::Failure | Verdict::Inconclusive | Verdict::ScriptError if self == expected => {
                Verdict::Success
            }
            other => other,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Verdict::*;

    #[test]
    fn test_all_success() {
        assert_eq!(Verdict::aggregate(&[Success, Success, Success]), Success);
    }

    #[test]
    fn test_one_failure_fails() {
        assert_eq!(Verdict::aggregate(&[Success, Failure, Success]), Failure);
    }

    #[test]
    fn test_not_applicable_dominates() {
        assert_eq!(
            Verdict::aggregate(&[NotApplicable, Success, Success]),
            NotApplicable
        );
        assert_eq!(
            Verdict::aggregate(&[Failure, Skipped, NotApplicable]),
            NotApplicable
        );
    }

    #[test]
    fn test_skipped_over_failure() {
        // An absent role counts as a success.
        assert_eq!(Verdict::aggregate(&[Skipped, Success, Success]), Skipped);
        assert_eq!(Verdict::aggregate(&[Failure, Skipped, Success]), Skipped);
    }

    #[test]
    fn test_mixed_is_inconclusive() {
        assert_eq!(
            Verdict::aggregate(&[Success, Inconclusive, Success]),
            Inconclusive
        );
        assert_eq!(
            Verdict::aggregate(&[ScriptError, Success, Success]),
            Inconclusive
        );
    }

    #[test]
    fn test_exit_status_round_trip() {
        for v in [Success, Failure, Inconclusive, NotApplicable, Skipped, ScriptError] {
            assert_eq!(Verdict::from_exit_status(v.exit_status()), v);
        }
        assert_eq!(Verdict::from_exit_status(42), Inconclusive);
    }

    #[test]
    fn test_expected_failures_pass() {
        assert_eq!(Inconclusive.against(Inconclusive), Success);
        assert_eq!(Failure.against(Failure), Success);
        assert_eq!(Failure.against(Success), Failure);
        assert_eq!(Skipped.against(Skipped), Skipped);
    }
}
