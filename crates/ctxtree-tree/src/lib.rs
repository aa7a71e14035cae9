pub mod error;
pub mod forest;
pub mod node;

pub use error::{Result, TreeError};
pub use forest::Forest;
pub use node::{ContextType, FollowUp, Node};
