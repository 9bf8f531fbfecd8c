//! Engine boundary
//!
//! The engine is the single-threaded git backend the pool serializes calls
//! into. This module defines the [`Engine`] trait the execution loop drives
//! and, behind the `mock-engine` feature, a [`ScriptedEngine`] that plays
//! back recorded responses.
//!
//! # Components
//!
//! - [`Engine`] - Boot / call / dispose interface
//! - [`EngineRequest`] / [`EngineChunk`] - What goes in and what comes out of a call
//! - [`ScriptedEngine`] - Scripted stand-in for tests and replays (feature-gated)

pub mod engine_trait;
#[cfg(feature = "mock-engine")]
pub mod mock_engine;

pub use engine_trait::{ChunkStream, Engine, EngineChunk, EngineRequest};

#[cfg(feature = "mock-engine")]
pub use mock_engine::{CallLog, EngineScript, Gate, ScriptStep, ScriptedEngine};
