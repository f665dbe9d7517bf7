//! Sleeper sort on cooperative tasks
//!
//! Reads unsigned integers from stdin (stopping after the first 0) and spawns
//! one task per value. Task `v` recurses `v` levels deep, yielding once per
//! level, before printing `v`, so values come out in ascending order.
//!
//! Large values need a larger `--stack-size`; a task that runs off its stack
//! makes the scheduler abort with an error naming it.

use std::io::{self, Read};
use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use ralph_coop::{configure, run, spawn, yield_now, Config};

#[derive(Parser, Debug)]
#[command(version, about = "Sleeper sort on cooperative tasks")]
struct Args {
    /// Stack size per task in bytes
    #[arg(long)]
    stack_size: Option<usize>,

    /// Log scheduler activity to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn factorial(n: u64) -> u64 {
    if n <= 1 {
        return 1;
    }
    yield_now();
    n.wrapping_mul(factorial(n - 1))
}

/// Parse stdin up to and including the first 0
fn parse_values(input: &str) -> Result<Vec<u64>, String> {
    let mut values = Vec::new();
    for word in input.split_whitespace() {
        let value = word
            .parse::<u64>()
            .map_err(|err| format!("invalid number {word:?}: {err}"))?;
        values.push(value);
        if value == 0 {
            break;
        }
    }
    Ok(values)
}

fn sleeper_sort(values: Vec<u64>) -> Result<(), ralph_coop::Error> {
    for value in values {
        spawn("sleeper", move || {
            factorial(value + 1);
            println!("{value}");
        })?;
    }
    let stats = run()?;
    debug!(tasks = stats.tasks, switches = stats.switches, "sort complete");
    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .without_time()
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Some(size) = args.stack_size {
        if let Err(err) = configure(Config::default().with_stack_size(size)) {
            error!(%err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    }

    let mut input = String::new();
    if let Err(err) = io::stdin().read_to_string(&mut input) {
        error!(%err, "failed to read stdin");
        return ExitCode::FAILURE;
    }

    let values = match parse_values(&input) {
        Ok(values) => values,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    match sleeper_sort(values) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "scheduler failed");
            ExitCode::FAILURE
        }
    }
}
