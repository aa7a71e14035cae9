pub mod buffer;
pub mod error;
pub mod summarizer;

pub use buffer::{BufferMessage, MessageBuffer};
pub use error::{BufferError, Result};
pub use summarizer::{should_summarize, summarize, SUMMARY_BATCH};
