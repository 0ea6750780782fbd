//! Result type definition and extension traits for Railway-Oriented Programming.
//!
//! Some steps are best-effort, such as publishing a change notification: a
//! failure is logged and never propagated.

use std::fmt::Display;

use crate::error::Error;

/// The standard Result type for keel core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing logging combinators for any `Result`.
pub trait ResultExt<T> {
    /// Convert a Result to an Option, logging the error at `warn` if present.
    fn into_option_logged(self, context: &str) -> Option<T>;
}

impl<T, E: Display> ResultExt<T> for std::result::Result<T, E> {
    fn into_option_logged(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "{context}");
                None
            }
        }
    }
}
