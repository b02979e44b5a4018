//! test-timod: runs the timod conformance suite.
//!
//! # Usage
//!
//! ```bash
//! test-timod [options]
//! RUST_LOG=timod_conformance=debug test-timod -o 2.3 -v 3
//! ```

use std::io::Write;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use timod_conformance::runner::{self, DEFAULT_DEVICE, PACKAGE, SHORT_NAME, STD_NAME};
use timod_conformance::timer::DEFAULT_SCALE;
use timod_conformance::{Backend, RunConfig, SelectError, Suite, catalog};

#[derive(Parser, Debug)]
#[command(name = "test-timod")]
#[command(about = "Conformance test suite for the timod STREAMS module")]
#[command(version)]
struct Args {
    /// Rerun failed cases once at full verbosity
    #[arg(short = 'a', long)]
    again: bool,

    /// Disable the suite-wide guard timer
    #[arg(short = 'w', long)]
    wait: bool,

    /// Repeat every case until interrupted
    #[arg(short = 'r', long)]
    repeat: bool,

    /// Repeat failing cases until they pass
    #[arg(short = 'R', long = "repeat-fail")]
    repeat_fail: bool,

    /// Device named in the report
    #[arg(short = 'd', long, default_value = DEFAULT_DEVICE)]
    device: String,

    /// Stop at the first failure
    #[arg(short = 'e', long)]
    exit: bool,

    /// List the cases matching RANGE and exit
    #[arg(short = 'l', long, value_name = "RANGE", num_args = 0..=1)]
    list: Option<Option<String>>,

    /// Divide every timer by SCALE
    #[arg(short = 'f', long, value_name = "SCALE", num_args = 0..=1)]
    fast: Option<Option<u64>>,

    /// Print a result table at the end
    #[arg(short = 's', long)]
    summary: bool,

    /// Run the case numbered TEST
    #[arg(short = 'o', long = "onetest", value_name = "TEST")]
    onetest: Vec<String>,

    /// Run the cases whose number starts with RANGE
    #[arg(short = 't', long = "tests", value_name = "RANGE")]
    tests: Vec<String>,

    /// Dump every message
    #[arg(short = 'm', long)]
    messages: bool,

    /// Print nothing but errors
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Raise verbosity by one, or set it to LEVEL
    #[arg(
        short = 'v',
        long,
        value_name = "LEVEL",
        num_args = 0..=1,
        default_missing_value = "+",
        action = clap::ArgAction::Append
    )]
    verbose: Vec<String>,

    /// How roles are run
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

    /// Print copying permissions
    #[arg(short = 'C', long)]
    copying: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Process,
    Thread,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Process => Backend::Process,
            BackendArg::Thread => Backend::Thread,
        }
    }
}

impl Args {
    fn verbosity(&self) -> Result<i32, String> {
        if self.quiet {
            return Ok(0);
        }
        let mut level = 1;
        for v in &self.verbose {
            if v == "+" {
                level += 1;
            } else {
                level = v
                    .parse::<i32>()
                    .ok()
                    .filter(|n| *n >= 0)
                    .ok_or_else(|| format!("invalid verbosity `{v}'"))?;
            }
        }
        Ok(level)
    }
}

fn print_header(verbose: i32) {
    if verbose > 0 {
        println!("\n{STD_NAME} - {PACKAGE} - {SHORT_NAME} - Conformance Test Suite");
    }
}

fn copying(verbose: i32) {
    if verbose <= 0 {
        return;
    }
    print_header(verbose);
    println!(
        "\n\
         This program is free software, licensed under either the MIT license or the\n\
         Apache License, Version 2.0, at your option.  It comes with NO WARRANTY, to\n\
         the extent permitted by law.\n"
    );
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let args = Args::parse();
    let verbose = match args.verbosity() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("test-timod: {e}");
            return ExitCode::from(2);
        }
    };

    if args.copying {
        copying(verbose);
        return ExitCode::SUCCESS;
    }

    let scale = match args.fast {
        None => 1,
        Some(scale) => {
            let scale = scale.unwrap_or(DEFAULT_SCALE).max(1);
            eprintln!("WARNING: timers are scaled by a factor of {scale}");
            scale
        }
    };

    if let Some(range) = &args.list {
        let mut out = std::io::stdout().lock();
        return match runner::list(&catalog(), range.as_deref(), verbose, &mut out) {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                let _ = out.flush();
                eprintln!("WARNING: {e}");
                ExitCode::from(2)
            }
        };
    }

    let config = RunConfig {
        device: args.device.clone(),
        backend: args.backend.map_or_else(Backend::native, Backend::from),
        verbose,
        summary: args.summary,
        messages: args.messages,
        repeat_on_success: args.repeat,
        repeat_on_failure: args.repeat || args.repeat_fail,
        repeat_verbose: args.again,
        exit_on_failure: args.exit,
        wait: args.wait,
        scale,
    };
    tracing::debug!(?config, "starting suite");

    let mut suite = Suite::new(config);
    let selected = match suite.select(&args.onetest, &args.tests) {
        Ok(n) => n,
        Err(SelectError::NothingToRun) => {
            if verbose > 0 {
                eprintln!("test-timod: error: no tests to run");
            }
            return ExitCode::from(2);
        }
        Err(e) => {
            eprintln!("WARNING: {e}");
            return ExitCode::from(2);
        }
    };
    if selected > 1 {
        copying(verbose);
    }

    let code = suite.do_tests();
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
