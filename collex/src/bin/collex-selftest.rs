//! Multi-process self-test.
//!
//! Usage: `collex-selftest [world_size] [iterations]`
//!
//! Started without a launcher marker, the binary re-launches itself as
//! `world_size` ranks (default 2), waits for them and exits with their
//! combined status. Each rank joins a TCP group and runs the verification
//! suite; any failed check or failed Work ends that rank with a non-zero
//! exit code.

use collex::bootstrap::{Launch, LaunchInfo, ensure_launched};
use collex::selftest::{SuiteOptions, run_suite};
use collex::{GroupConfig, ProcessGroup};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_WORLD_SIZE: u32 = 2;
const DEFAULT_ITERATIONS: usize = 100;

fn positional<T: std::str::FromStr>(idx: usize, default: T) -> T {
    std::env::args()
        .nth(idx)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn run_participant(info: LaunchInfo, iterations: usize) -> ExitCode {
    let pg = match ProcessGroup::connect_tcp(info.rank, info.world_size, GroupConfig::from_env()) {
        Ok(pg) => pg,
        Err(e) => {
            error!(rank = info.rank, error = %e, "failed to join group");
            return ExitCode::FAILURE;
        }
    };
    info!(rank = pg.rank(), size = pg.size(), backend = pg.backend_name(), "joined group");

    let opts = SuiteOptions {
        iterations,
        expected_backend: Some("tcp".into()),
        ..SuiteOptions::default()
    };
    let outcome = run_suite(&pg, &opts);
    pg.shutdown();

    match outcome {
        Ok(report) => {
            info!(rank = info.rank, checks = report.checks.len(), "all checks passed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(rank = info.rank, error = %e, "self-test failed");
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_ids(true)
        .init();

    let world_size = positional(1, DEFAULT_WORLD_SIZE);
    let iterations = positional(2, DEFAULT_ITERATIONS);

    match ensure_launched(world_size) {
        Ok(Launch::Participant(info)) => run_participant(info, iterations),
        Ok(Launch::Coordinator { success: true }) => {
            info!(world_size, "Test successful");
            ExitCode::SUCCESS
        }
        Ok(Launch::Coordinator { success: false }) => {
            error!(world_size, "one or more ranks failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "launch failed");
            ExitCode::FAILURE
        }
    }
}
