//! Core types shared by every keel crate.
//!
//! - [`Error`] / [`Result`]: configuration and startup failures
//! - [`ResultExt`]: combinators for best-effort steps that log
//!   instead of propagating
//! - [`config`]: controller configuration (TOML file + environment overrides)

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

pub mod config;
pub mod error;
pub mod result;

pub use config::{ControllerConfig, ReconcilerSettings};
pub use error::Error;
pub use result::{Result, ResultExt};
