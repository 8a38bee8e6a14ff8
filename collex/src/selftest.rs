//! End-to-end verification of a running group.
//!
//! Every check queues `iterations` operations of one kind, waits for all of
//! them with [`ProcessGroup::wait_all`], and compares the results against
//! the values every rank can compute locally. All ranks of the group must
//! call [`run_suite`] with the same options.

use crate::buffer::Buffer;
use crate::error::CollexError;
use crate::group::{ProcessGroup, Work};
use crate::types::{DEFAULT_TAG, DataType, Rank, ReduceOp};
use std::time::Instant;

/// A check saw results that do not match what the group should produce.
#[derive(Debug, thiserror::Error)]
pub enum SelftestError {
    #[error(transparent)]
    Collex(#[from] CollexError),

    #[error("{check}: iteration {iteration}, slot {slot}: expected every element to be {expected}")]
    Mismatch {
        check: &'static str,
        iteration: usize,
        slot: usize,
        expected: f32,
    },

    #[error("{check}: {detail}")]
    Unexpected { check: &'static str, detail: String },
}

#[derive(Debug, Clone)]
pub struct SuiteOptions {
    /// Operations queued per check before waiting.
    pub iterations: usize,
    /// Shape of every buffer.
    pub shape: Vec<usize>,
    /// Backend name the group must report, if any.
    pub expected_backend: Option<String>,
}

impl Default for SuiteOptions {
    fn default() -> Self {
        Self {
            iterations: 100,
            shape: vec![16, 16],
            expected_backend: None,
        }
    }
}

/// Checks run on this rank, in order.
#[derive(Debug, Default)]
pub struct SuiteReport {
    pub checks: Vec<&'static str>,
}

type CheckResult = std::result::Result<(), SelftestError>;

/// Run every check against `pg`. Stops at the first failure.
pub fn run_suite(pg: &ProcessGroup, opts: &SuiteOptions) -> Result<SuiteReport, SelftestError> {
    let checks: [(&'static str, fn(&ProcessGroup, &SuiteOptions) -> CheckResult); 10] = [
        ("allreduce", check_allreduce),
        ("broadcast", check_broadcast),
        ("reduce", check_reduce),
        ("allgather", check_allgather),
        ("gather", check_gather),
        ("scatter", check_scatter),
        ("send_recv", check_send_recv),
        ("recv_any_source", check_recv_any_source),
        ("barrier", check_barrier),
        ("backend_name", check_backend_name),
    ];

    let mut report = SuiteReport::default();
    for (name, check) in checks {
        let started = Instant::now();
        check(pg, opts)?;
        tracing::info!(
            rank = pg.rank(),
            check = name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "check passed"
        );
        report.checks.push(name);
    }
    Ok(report)
}

fn filled(opts: &SuiteOptions, value: f32) -> Buffer {
    Buffer::full(&opts.shape, value)
}

fn zeros(opts: &SuiteOptions) -> Buffer {
    Buffer::zeros(&opts.shape, DataType::F32)
}

fn expect_value(
    check: &'static str,
    iteration: usize,
    slot: usize,
    buf: &Buffer,
    expected: f32,
) -> CheckResult {
    if buf.all_eq(expected)? {
        Ok(())
    } else {
        Err(SelftestError::Mismatch {
            check,
            iteration,
            slot,
            expected,
        })
    }
}

fn expect_slots(check: &'static str, outputs: &[Vec<Buffer>], expected: usize) -> CheckResult {
    match outputs.iter().position(|o| o.len() != expected) {
        Some(i) => Err(SelftestError::Unexpected {
            check,
            detail: format!(
                "iteration {i} returned {} buffers, expected {expected}",
                outputs[i].len()
            ),
        }),
        None => Ok(()),
    }
}

fn issue_all(
    opts: &SuiteOptions,
    mut issue: impl FnMut(usize) -> crate::Result<Work>,
) -> crate::Result<Vec<Work>> {
    (0..opts.iterations).map(&mut issue).collect()
}

fn check_allreduce(pg: &ProcessGroup, opts: &SuiteOptions) -> CheckResult {
    let works = issue_all(opts, |i| pg.allreduce(filled(opts, i as f32), ReduceOp::Sum))?;
    let outputs = pg.wait_all(&works)?;
    expect_slots("allreduce", &outputs, 1)?;
    let size = pg.size() as f32;
    for (i, out) in outputs.iter().enumerate() {
        expect_value("allreduce", i, 0, &out[0], size * i as f32)?;
    }
    Ok(())
}

fn check_broadcast(pg: &ProcessGroup, opts: &SuiteOptions) -> CheckResult {
    let works = issue_all(opts, |i| {
        let buf = if pg.rank() == 0 {
            filled(opts, i as f32)
        } else {
            zeros(opts)
        };
        pg.broadcast(buf, 0)
    })?;
    let outputs = pg.wait_all(&works)?;
    expect_slots("broadcast", &outputs, 1)?;
    for (i, out) in outputs.iter().enumerate() {
        expect_value("broadcast", i, 0, &out[0], i as f32)?;
    }
    Ok(())
}

fn check_reduce(pg: &ProcessGroup, opts: &SuiteOptions) -> CheckResult {
    let works = issue_all(opts, |i| pg.reduce(filled(opts, i as f32), ReduceOp::Sum, 0))?;
    let outputs = pg.wait_all(&works)?;
    expect_slots("reduce", &outputs, 1)?;
    if pg.rank() == 0 {
        let size = pg.size() as f32;
        for (i, out) in outputs.iter().enumerate() {
            expect_value("reduce", i, 0, &out[0], size * i as f32)?;
        }
    }
    Ok(())
}

fn check_allgather(pg: &ProcessGroup, opts: &SuiteOptions) -> CheckResult {
    let rank = pg.rank() as f32;
    let works = issue_all(opts, |i| {
        let outputs = (0..pg.size()).map(|_| zeros(opts)).collect();
        pg.allgather(outputs, filled(opts, i as f32 * rank))
    })?;
    let outputs = pg.wait_all(&works)?;
    expect_slots("allgather", &outputs, pg.size() as usize)?;
    for (i, out) in outputs.iter().enumerate() {
        for (j, slot) in out.iter().enumerate() {
            expect_value("allgather", i, j, slot, (i * j) as f32)?;
        }
    }
    Ok(())
}

fn check_gather(pg: &ProcessGroup, opts: &SuiteOptions) -> CheckResult {
    let rank = pg.rank() as f32;
    let is_root = pg.rank() == 0;
    let works = issue_all(opts, |i| {
        let outputs = if is_root {
            (0..pg.size()).map(|_| zeros(opts)).collect()
        } else {
            Vec::new()
        };
        pg.gather(outputs, filled(opts, i as f32 * rank), 0)
    })?;
    let outputs = pg.wait_all(&works)?;
    if !is_root {
        return expect_slots("gather", &outputs, 0);
    }
    expect_slots("gather", &outputs, pg.size() as usize)?;
    for (i, out) in outputs.iter().enumerate() {
        for (j, slot) in out.iter().enumerate() {
            expect_value("gather", i, j, slot, (i * j) as f32)?;
        }
    }
    Ok(())
}

fn check_scatter(pg: &ProcessGroup, opts: &SuiteOptions) -> CheckResult {
    let works = issue_all(opts, |i| {
        let inputs = if pg.rank() == 0 {
            (0..pg.size())
                .map(|j| filled(opts, (i * j as usize) as f32))
                .collect()
        } else {
            Vec::new()
        };
        pg.scatter(zeros(opts), inputs, 0)
    })?;
    let outputs = pg.wait_all(&works)?;
    expect_slots("scatter", &outputs, 1)?;
    let rank = pg.rank() as usize;
    for (i, out) in outputs.iter().enumerate() {
        expect_value("scatter", i, 0, &out[0], (i * rank) as f32)?;
    }
    Ok(())
}

/// Rank 0 sends iteration `i` to rank 1. Other ranks sit this one out.
fn send_from_zero(pg: &ProcessGroup, opts: &SuiteOptions) -> crate::Result<()> {
    let works = issue_all(opts, |i| pg.send(filled(opts, i as f32), 1, DEFAULT_TAG))?;
    pg.wait_all(&works)?;
    Ok(())
}

fn check_send_recv(pg: &ProcessGroup, opts: &SuiteOptions) -> CheckResult {
    match pg.rank() {
        _ if pg.size() < 2 => Ok(()),
        0 => Ok(send_from_zero(pg, opts)?),
        1 => {
            let works = issue_all(opts, |_| pg.recv(zeros(opts), 0, DEFAULT_TAG))?;
            let outputs = pg.wait_all(&works)?;
            expect_slots("send_recv", &outputs, 1)?;
            for (i, out) in outputs.iter().enumerate() {
                expect_value("send_recv", i, 0, &out[0], i as f32)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn check_recv_any_source(pg: &ProcessGroup, opts: &SuiteOptions) -> CheckResult {
    match pg.rank() {
        _ if pg.size() < 2 => Ok(()),
        0 => Ok(send_from_zero(pg, opts)?),
        1 => {
            let works = issue_all(opts, |_| pg.recv_any_source(zeros(opts), DEFAULT_TAG))?;
            let outputs = pg.wait_all(&works)?;
            expect_slots("recv_any_source", &outputs, 1)?;
            for (i, (work, out)) in works.iter().zip(&outputs).enumerate() {
                let src: Rank = work.source_rank()?;
                if src != 0 {
                    return Err(SelftestError::Unexpected {
                        check: "recv_any_source",
                        detail: format!("iteration {i} resolved source rank {src}, expected 0"),
                    });
                }
                expect_value("recv_any_source", i, 0, &out[0], i as f32)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn check_barrier(pg: &ProcessGroup, opts: &SuiteOptions) -> CheckResult {
    let works = issue_all(opts, |_| pg.barrier())?;
    let outputs = pg.wait_all(&works)?;
    expect_slots("barrier", &outputs, 0)
}

fn check_backend_name(pg: &ProcessGroup, opts: &SuiteOptions) -> CheckResult {
    match &opts.expected_backend {
        Some(expected) if pg.backend_name() != expected => Err(SelftestError::Unexpected {
            check: "backend_name",
            detail: format!("got {:?}, expected {expected:?}", pg.backend_name()),
        }),
        _ => Ok(()),
    }
}
