use crate::types::{DataType, OpKind, Rank};
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, CollexError>;

#[derive(Debug, thiserror::Error)]
pub enum CollexError {
    #[error("{operation}: {reason}")]
    InvalidArgument {
        operation: &'static str,
        reason: String,
    },

    #[error("{operation}: expected {expected} buffers, got {actual}")]
    BufferCount {
        operation: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{operation}: buffer layout mismatch: expected {expected}, got {actual}")]
    LayoutMismatch {
        operation: &'static str,
        expected: String,
        actual: String,
    },

    #[error("invalid rank {rank}: group size is {world_size}")]
    InvalidRank { rank: Rank, world_size: u32 },

    #[error("shape {shape:?} holds {expected} elements, got {actual}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("element type mismatch: buffer holds {actual}, requested {expected}")]
    DTypeMismatch {
        expected: DataType,
        actual: DataType,
    },

    #[error("work #{seq} ({operation}) has not completed")]
    WorkPending { seq: u64, operation: OpKind },

    #[error("work #{seq} ({operation}) has no resolved source rank")]
    NoSourceRank { seq: u64, operation: OpKind },

    #[error("process group is shut down")]
    ShutDown,

    #[error("process group aborted")]
    Aborted,

    #[error("peer {rank} disconnected unexpectedly")]
    PeerDisconnected { rank: Rank },

    #[error("rank {rank} not found in group of size {world_size}")]
    UnknownPeer { rank: Rank, world_size: u32 },

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("{operation} failed at rank {rank}: {reason}")]
    CollectiveFailed {
        operation: &'static str,
        rank: Rank,
        reason: String,
    },

    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("work #{seq} ({operation}) failed: {source}")]
    WorkFailed {
        seq: u64,
        operation: OpKind,
        #[source]
        source: Arc<CollexError>,
    },

    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollexError {
    /// Create a `Transport` error with just a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Transport` error with a message and a source error.
    pub fn transport_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn invalid(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            operation,
            reason: reason.into(),
        }
    }

    /// Misuse reported synchronously at the call site. Never affects group state.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. }
                | Self::BufferCount { .. }
                | Self::LayoutMismatch { .. }
                | Self::InvalidRank { .. }
                | Self::ShapeMismatch { .. }
                | Self::DTypeMismatch { .. }
                | Self::WorkPending { .. }
                | Self::NoSourceRank { .. }
                | Self::ShutDown
        )
    }

    /// Failure raised while an operation was executing against the transport.
    pub fn is_transport_failure(&self) -> bool {
        match self {
            Self::PeerDisconnected { .. }
            | Self::UnknownPeer { .. }
            | Self::BufferSizeMismatch { .. }
            | Self::CollectiveFailed { .. }
            | Self::Transport { .. }
            | Self::Timeout { .. }
            | Self::Io(_) => true,
            Self::WorkFailed { source, .. } => source.is_transport_failure(),
            _ => false,
        }
    }

    /// The error a failed operation captured, looking through `WorkFailed`.
    pub fn root_cause(&self) -> &CollexError {
        match self {
            Self::WorkFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = CollexError::UnknownPeer {
            rank: 7,
            world_size: 2,
        };
        assert_eq!(e.to_string(), "rank 7 not found in group of size 2");
    }

    #[test]
    fn test_collective_failed_display() {
        let e = CollexError::CollectiveFailed {
            operation: "allreduce",
            rank: 3,
            reason: "connection reset".into(),
        };
        assert_eq!(
            e.to_string(),
            "allreduce failed at rank 3: connection reset"
        );
    }

    #[test]
    fn test_work_failed_wraps_cause() {
        let cause = Arc::new(CollexError::PeerDisconnected { rank: 1 });
        let e = CollexError::WorkFailed {
            seq: 4,
            operation: OpKind::Send,
            source: cause,
        };
        assert_eq!(
            e.to_string(),
            "work #4 (send) failed: peer 1 disconnected unexpectedly"
        );
        assert!(e.is_transport_failure());
        assert!(matches!(
            e.root_cause(),
            CollexError::PeerDisconnected { rank: 1 }
        ));
    }

    #[test]
    fn test_taxonomy_is_disjoint() {
        let usage = CollexError::BufferCount {
            operation: "allgather",
            expected: 4,
            actual: 3,
        };
        assert!(usage.is_usage_error());
        assert!(!usage.is_transport_failure());

        let transport = CollexError::transport("conn reset");
        assert!(transport.is_transport_failure());
        assert!(!transport.is_usage_error());

        assert!(!CollexError::Aborted.is_usage_error());
        assert!(!CollexError::Aborted.is_transport_failure());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port busy");
        let err: CollexError = io_err.into();
        assert!(err.to_string().contains("port busy"));
    }

    #[test]
    fn test_all_variants_display() {
        let errors: Vec<CollexError> = vec![
            CollexError::invalid("send", "x"),
            CollexError::LayoutMismatch {
                operation: "gather",
                expected: "f32[2]".into(),
                actual: "f32[3]".into(),
            },
            CollexError::InvalidRank {
                rank: 5,
                world_size: 4,
            },
            CollexError::ShapeMismatch {
                shape: vec![2, 2],
                expected: 4,
                actual: 3,
            },
            CollexError::DTypeMismatch {
                expected: DataType::F32,
                actual: DataType::I64,
            },
            CollexError::WorkPending {
                seq: 1,
                operation: OpKind::Broadcast,
            },
            CollexError::NoSourceRank {
                seq: 1,
                operation: OpKind::Recv,
            },
            CollexError::ShutDown,
            CollexError::Aborted,
            CollexError::BufferSizeMismatch {
                expected: 8,
                actual: 4,
            },
            CollexError::Timeout {
                operation: "recv",
                timeout_ms: 10,
            },
            CollexError::Bootstrap("no launcher".into()),
            CollexError::PeerDisconnected { rank: 3 },
        ];
        for e in &errors {
            assert!(!e.to_string().is_empty(), "empty display for {e:?}");
        }
    }
}
