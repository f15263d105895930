//! Shared types for the voxlane voice-agent runtime.
//!
//! This crate sits at the bottom of the workspace: configuration, the
//! shared error type, call-event definitions, service credentials, and
//! the JSON-schema subset used to validate tool inputs.

pub mod config;
pub mod error;
pub mod events;
pub mod schema;
pub mod token;

pub use error::{Error, Result};
