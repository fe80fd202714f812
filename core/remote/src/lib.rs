//! Remote design-source abstraction for exfig.
//!
//! This module provides the trait-based interface the sync engine uses to
//! talk to the remote design source, the wire types it returns, and an
//! in-memory implementation for tests.
//!
//! # Design Principles
//! - Opaque collaborator: retry and rate limiting live behind the trait
//! - Async operations: all requests are async
//! - Unified error semantics: every failure surfaces as `Error::Remote`

pub mod client;
pub mod memory;

pub use client::{Bounds, Color, Paint, RemoteClient, RemoteDocument, VersionInfo};
pub use memory::{MemoryRemote, NodeRequest};
