//! Common utilities and types shared across exfig sync crates.
//!
//! This module provides the error type and the identifier newtypes used by
//! the remote collaborator and the sync engine.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ItemId, SourceId};
