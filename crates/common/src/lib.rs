//! Shared types for the Nimbus SDK workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
