//! Runtime-configurable parameters for process groups.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `COLLEX_`) or by constructing a custom `GroupConfig`.

use crate::error::{CollexError, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Tuning parameters for a process group and its transport.
#[derive(Debug, Clone)]
pub struct GroupConfig {
    /// Bound on each transport send/recv inside an operation. `None` blocks
    /// until the peer delivers or the group aborts.
    pub op_timeout: Option<Duration>,

    /// How long TCP mesh formation keeps retrying connects to peers.
    pub connect_timeout: Duration,

    /// Bound applied by [`ProcessGroup::wait_all`](crate::ProcessGroup::wait_all)
    /// to each handle. `None` waits indefinitely.
    pub wait_timeout: Option<Duration>,

    /// Address every rank of a TCP group listens on.
    pub master_addr: IpAddr,

    /// Rank `r` listens on `master_port + r`.
    pub master_port: u16,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            op_timeout: None,
            connect_timeout: Duration::from_secs(30),
            wait_timeout: None,
            master_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            master_port: 29500,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    lookup(name).and_then(|v| v.trim().parse::<T>().ok())
}

impl GroupConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `COLLEX_OP_TIMEOUT_SECS`
    /// - `COLLEX_CONNECT_TIMEOUT_SECS`
    /// - `COLLEX_WAIT_TIMEOUT_SECS`
    /// - `COLLEX_MASTER_ADDR`
    /// - `COLLEX_MASTER_PORT`
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(s) = parse_var::<u64>(&lookup, "COLLEX_OP_TIMEOUT_SECS") {
            cfg.op_timeout = Some(Duration::from_secs(s));
        }
        if let Some(s) = parse_var::<u64>(&lookup, "COLLEX_CONNECT_TIMEOUT_SECS") {
            cfg.connect_timeout = Duration::from_secs(s);
        }
        if let Some(s) = parse_var::<u64>(&lookup, "COLLEX_WAIT_TIMEOUT_SECS") {
            cfg.wait_timeout = Some(Duration::from_secs(s));
        }
        if let Some(addr) = parse_var::<IpAddr>(&lookup, "COLLEX_MASTER_ADDR") {
            cfg.master_addr = addr;
        }
        if let Some(port) = parse_var::<u16>(&lookup, "COLLEX_MASTER_PORT") {
            cfg.master_port = port;
        }

        cfg
    }

    /// Listen address of every rank in a TCP group of `world_size`.
    pub fn peer_addrs(&self, world_size: u32) -> Result<Vec<SocketAddr>> {
        (0..world_size)
            .map(|r| {
                u16::try_from(r)
                    .ok()
                    .and_then(|r| self.master_port.checked_add(r))
                    .map(|port| SocketAddr::new(self.master_addr, port))
                    .ok_or_else(|| {
                        CollexError::Bootstrap(format!(
                            "port {} + rank {r} overflows",
                            self.master_port
                        ))
                    })
            })
            .collect()
    }
}
