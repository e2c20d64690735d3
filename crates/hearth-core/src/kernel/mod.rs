//! # Hearth Core Kernel
//!
//! System-wide constants and the aggregate [`Error`] type.
pub mod constants;
pub mod error;

pub use error::{Error, Result};
