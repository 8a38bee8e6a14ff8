pub mod backend;
pub mod bootstrap;
pub mod buffer;
pub(crate) mod collective;
pub mod config;
pub mod error;
pub mod group;
pub(crate) mod reduce;
pub mod selftest;
pub mod transport;
pub mod types;

pub use backend::{LocalTransport, MeshTransport, TcpTransport, Transport};
pub use buffer::{Buffer, Element};
pub use config::GroupConfig;
pub use error::{CollexError, Result};
pub use group::{ProcessGroup, Work};
pub use transport::{Endpoint, LocalEndpoint, TcpEndpoint};
pub use types::{DEFAULT_TAG, DataType, OpKind, Rank, ReduceOp, Tag};
