//! Shared types for the OAuth server workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::{Secret, constant_time_eq};
