//! Committing analysis rows to the output table.

pub mod retry;
mod writer;

pub use retry::RetryPolicy;
pub use writer::RetryingWriter;
