//! Runs every catalog case against the simulated module.
//!
//! Each case becomes one trial on the thread backend with timers scaled
//! down, so the whole catalog finishes in seconds. A few more trials drive
//! the `test-timod` binary itself to check its exit codes.

use std::process::Command;

use libtest_mimic::{Arguments, Failed, Trial};

use timod_conformance::{Backend, RunConfig, Suite, Verdict, catalog};

const SCALE: u64 = 10;

fn config() -> RunConfig {
    RunConfig {
        backend: Backend::Thread,
        verbose: 0,
        scale: SCALE,
        ..RunConfig::default()
    }
}

fn run_case(numb: &str) -> Result<(), Failed> {
    let suite = Suite::new(config());
    match suite.run_one(numb) {
        Some(Verdict::Success) => Ok(()),
        Some(other) => Err(format!("case {numb} was {other}").into()),
        None => Err(format!("case {numb} is not in the catalog").into()),
    }
}

fn run_binary(args: &[&str]) -> Result<i32, Failed> {
    let bin = env!("CARGO_BIN_EXE_test-timod");
    let output = Command::new(bin)
        .args(args)
        .output()
        .map_err(|e| format!("failed to spawn test-timod: {e}"))?;
    output
        .status
        .code()
        .ok_or_else(|| Failed::from("test-timod was killed by a signal"))
}

fn expect_exit(args: &'static [&'static str], want: i32) -> Trial {
    Trial::test(format!("cli {}", args.join(" ")), move || {
        let got = run_binary(args)?;
        if got == want {
            Ok(())
        } else {
            Err(format!("exit status {got}, wanted {want}").into())
        }
    })
}

fn main() {
    let args = Arguments::from_args();

    let mut trials: Vec<Trial> = catalog()
        .into_iter()
        .map(|case| {
            let numb = case.numb.clone();
            Trial::test(format!("case.{numb}"), move || run_case(&numb))
        })
        .collect();

    trials.push(expect_exit(&["-l"], 0));
    trials.push(expect_exit(&["-l", "7"], 2));
    trials.push(expect_exit(&["-q", "-o", "9.9.9"], 2));
    trials.push(expect_exit(
        &["-q", "--backend", "thread", "-f", "10", "-o", "1.1"],
        0,
    ));

    libtest_mimic::run(&args, trials).exit();
}
