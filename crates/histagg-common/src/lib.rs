//! Histagg Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared ambient concerns for the histagg workspace:
//!
//! - **Error Handling**: the `AggError` taxonomy and `Result` alias
//! - **Logging**: tracing subscriber setup (console and/or rotating file)
//! - **Retry**: reusable attempt-bounded and deadline-bounded retry policies

pub mod error;
pub mod logging;
pub mod retry;

// Re-export commonly used types
pub use error::{AggError, Result};
