pub mod config;
pub mod error;
pub mod types;

pub use error::{CoreError, Result};
pub use types::{NodeId, RecordId, Role, Timestamp, TreeId};
