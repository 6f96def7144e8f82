//! Core types shared by the trellis workflow engine.
//!
//! This crate provides the strongly typed identifiers and the error
//! handling foundation used by the engine and its binaries.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{EventId, ParseIdError, SpanId, StateId, TraceId};
