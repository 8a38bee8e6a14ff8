//! Detect whether this process was started as one rank of a multi-process
//! run, and start the run ourselves if it was not.

use crate::error::{CollexError, Result};
use crate::types::Rank;
use std::ffi::OsString;
use std::process::{Child, Command};

/// Rank/size variable pairs checked in order. The first pair whose rank
/// variable is set wins.
const ENV_PAIRS: &[(&str, &str)] = &[
    ("COLLEX_RANK", "COLLEX_WORLD_SIZE"),
    ("OMPI_COMM_WORLD_RANK", "OMPI_COMM_WORLD_SIZE"),
    ("PMI_RANK", "PMI_SIZE"),
];

/// Command line used instead of spawning copies directly. `{n}` is replaced
/// by the participant count; the executable and its arguments are appended.
pub const LAUNCHER_ENV: &str = "COLLEX_LAUNCHER";

/// This process's identity as reported by the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchInfo {
    pub rank: Rank,
    pub world_size: u32,
}

impl LaunchInfo {
    /// Read the identity from the process environment.
    ///
    /// Returns `Ok(None)` when no launcher marker is present and an error when
    /// one is present but malformed.
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        for (rank_var, size_var) in ENV_PAIRS {
            let Some(rank) = lookup(rank_var) else {
                continue;
            };
            let size = lookup(size_var).ok_or_else(|| {
                CollexError::Bootstrap(format!("{rank_var} is set but {size_var} is not"))
            })?;
            let rank: Rank = parse_var(rank_var, &rank)?;
            let world_size: u32 = parse_var(size_var, &size)?;
            if world_size == 0 || rank >= world_size {
                return Err(CollexError::Bootstrap(format!(
                    "{rank_var}={rank} is outside a group of {size_var}={world_size}"
                )));
            }
            return Ok(Some(Self { rank, world_size }));
        }
        Ok(None)
    }
}

fn parse_var(name: &str, value: &str) -> Result<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| CollexError::Bootstrap(format!("{name}={value:?} is not a valid integer")))
}

/// What [`ensure_launched`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    /// Already running as one rank: go ahead and join the group.
    Participant(LaunchInfo),
    /// This process started the run and waited for it. `success` is true when
    /// every participant exited cleanly.
    Coordinator { success: bool },
}

/// Make sure the program runs as `world_size` cooperating processes.
///
/// If a launcher marker is present, returns the identity. Otherwise the
/// current executable is started again, `world_size` times with the
/// `COLLEX_RANK`/`COLLEX_WORLD_SIZE` markers set, or once through the
/// command in `COLLEX_LAUNCHER` (e.g. `mpiexec -np {n}`). The call returns
/// once every copy has exited.
pub fn ensure_launched(world_size: u32) -> Result<Launch> {
    if let Some(info) = LaunchInfo::from_env()? {
        return Ok(Launch::Participant(info));
    }
    if world_size == 0 {
        return Err(CollexError::Bootstrap("world size must be at least 1".into()));
    }

    let exe = std::env::current_exe()?;
    let args: Vec<OsString> = std::env::args_os().skip(1).collect();

    let launcher = std::env::var(LAUNCHER_ENV)
        .ok()
        .filter(|l| !l.trim().is_empty());
    let children = match launcher {
        Some(line) => {
            let mut parts = launcher_argv(&line, world_size).into_iter();
            let program = parts
                .next()
                .ok_or_else(|| CollexError::Bootstrap(format!("{LAUNCHER_ENV} is empty")))?;
            tracing::info!(launcher = %line, world_size, "re-launching through launcher");
            let child = Command::new(program)
                .args(parts)
                .arg(&exe)
                .args(&args)
                .spawn()
                .map_err(|e| CollexError::Bootstrap(format!("failed to start {line:?}: {e}")))?;
            vec![child]
        }
        None => {
            tracing::info!(world_size, exe = %exe.display(), "spawning ranks");
            let mut children = Vec::new();
            for rank in 0..world_size {
                let spawned = Command::new(&exe)
                    .args(&args)
                    .env(ENV_PAIRS[0].0, rank.to_string())
                    .env(ENV_PAIRS[0].1, world_size.to_string())
                    .spawn();
                match spawned {
                    Ok(child) => children.push(child),
                    Err(e) => {
                        kill_all(&mut children);
                        return Err(CollexError::Bootstrap(format!(
                            "failed to spawn rank {rank}: {e}"
                        )));
                    }
                }
            }
            children
        }
    };

    Ok(Launch::Coordinator {
        success: wait_all(children),
    })
}

fn launcher_argv(line: &str, world_size: u32) -> Vec<String> {
    let n = world_size.to_string();
    line.split_whitespace()
        .map(|part| part.replace("{n}", &n))
        .collect()
}

fn kill_all(children: &mut [Child]) {
    for child in children {
        let _ = child.kill();
        let _ = child.wait();
    }
}

fn wait_all(children: Vec<Child>) -> bool {
    let mut success = true;
    for (i, mut child) in children.into_iter().enumerate() {
        match child.wait() {
            Ok(status) if status.success() => {}
            Ok(status) => {
                tracing::error!(child = i, %status, "participant exited abnormally");
                success = false;
            }
            Err(e) => {
                tracing::error!(child = i, error = %e, "failed to wait for participant");
                success = false;
            }
        }
    }
    success
}
