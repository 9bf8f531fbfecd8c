//! # Explorer Pool: priority job scheduling for a single-threaded git engine
//!
//! A repository explorer reads git data through an engine that can serve one
//! request at a time. This crate puts a priority queue in front of it: UI
//! actions jump ahead of background streams, every result chunk is routed
//! back to the caller that asked for it, and callers can reprioritize, cancel
//! or walk away from work they queued.
//!
//! ## Architecture
//!
//! - **Engine**: the [`Engine`] trait the worker drives, plus a scripted mock
//! - **Pool**: queue, result router and execution loop behind the [`Pool`] façade
//! - **Origins**: [`Origin`] sinks that receive each job's chunks
//! - **Communication**: Crossbeam channels wake the worker and carry results
//!
//! ## Configuration
//!
//! [`PoolConfig`] is read from TOML, by default from
//! `explorer-pool/pool.toml` in the platform config directory.
//!
//! ## Example
//!
//! ```ignore
//! use explorer_pool::{EngineMethod, Pool, PoolConfig};
//! use std::time::Duration;
//!
//! let pool = Pool::new(Box::new(engine), PoolConfig::load_or_default());
//! pool.boot(&snapshot)?;
//!
//! let (handle, results) = pool.request(EngineMethod::GetBlame, vec![json!("src/lib.rs")])?;
//! handle.set_priority(50)?; // the file scrolled into view
//!
//! let outcome = results.collect(Duration::from_secs(5))?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod pool;
#[cfg(feature = "mock-engine")]
pub mod replay;
pub mod types;

// Re-export commonly used types
pub use config::PoolConfig;
pub use engine::{Engine, EngineChunk, EngineRequest};
pub use error::{EngineError, PoolError, Result};
pub use pool::{
    ChannelOrigin, JobHandle, JobResults, Lifecycle, LoopState, Origin, Pool, PoolMetrics,
    RecordingOrigin,
};
pub use types::{EngineMethod, Job, JobId, JobOutcome, QueueCommand, ResultChunk};
