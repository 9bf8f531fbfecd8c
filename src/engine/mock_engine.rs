//! Scripted Engine Implementation for Testing
//!
//! This module provides an engine that answers method calls from
//! pre-recorded scripts instead of reading a real repository. It is used by
//! the test suite and by the `pool-replay` binary.
//!
//! # Features
//!
//! - **Per-method scripts**: Each method name maps to a list of [`ScriptStep`]s
//! - **Gates**: Block a method's calls until the test releases them
//! - **Call log**: Record every request in dispatch order
//! - **Boot refusal**: Simulate an engine that cannot initialize
//!
//! # Example
//!
//! ```ignore
//! use explorer_pool::engine::{ScriptedEngine, ScriptStep};
//!
//! let mut engine = ScriptedEngine::new()
//!     .with_script("get_branches", vec![ScriptStep::last(json!(["main"]))]);
//! let gate = engine.gate("get_blame");
//! let log = engine.call_log();
//! ```
//!
//! # Enabling
//!
//! The scripted engine is part of the default `mock-engine` feature.

use crate::engine::engine_trait::{ChunkStream, Engine, EngineChunk, EngineRequest};
use crate::error::EngineError;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// One scripted action of an engine call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ScriptStep {
    /// Emit a non-final chunk
    Data { payload: Value },
    /// Emit the final chunk and end the call
    Final { payload: Value },
    /// Fail the call
    Fail { message: String },
    /// Fail with a fault that takes the engine down
    Fatal { message: String },
    /// Sleep before the next step
    Delay { millis: u64 },
}

impl ScriptStep {
    /// Non-final data step
    pub fn data(payload: Value) -> Self {
        ScriptStep::Data { payload }
    }

    /// Final data step
    pub fn last(payload: Value) -> Self {
        ScriptStep::Final { payload }
    }

    /// Per-call failure step
    pub fn fail(message: impl Into<String>) -> Self {
        ScriptStep::Fail {
            message: message.into(),
        }
    }

    /// Fatal fault step
    pub fn fatal(message: impl Into<String>) -> Self {
        ScriptStep::Fatal {
            message: message.into(),
        }
    }
}

/// Serializable description of a scripted engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineScript {
    /// When set, `boot` fails with this message
    #[serde(default)]
    pub refuse_boot: Option<String>,

    /// Steps played back for each method
    #[serde(default)]
    pub methods: HashMap<String, Vec<ScriptStep>>,
}

/// Shared record of the requests an engine has served
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<EngineRequest>>>,
}

impl CallLog {
    fn record(&self, request: &EngineRequest) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
    }

    /// All requests in call order
    pub fn requests(&self) -> Vec<EngineRequest> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Method names in call order
    pub fn methods(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.method).collect()
    }

    /// Number of calls served
    pub fn len(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no call has been served
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Test-side control of a gated method
///
/// Each call of the gated method signals `started` and then blocks until
/// one release token arrives (or the gate is dropped).
pub struct Gate {
    release_tx: Sender<()>,
    started_rx: Receiver<()>,
}

impl Gate {
    /// Let one blocked call proceed
    pub fn release(&self) {
        let _ = self.release_tx.send(());
    }

    /// Wait until a call of the gated method has started
    pub fn wait_started(&self, timeout: Duration) -> bool {
        self.started_rx.recv_timeout(timeout).is_ok()
    }
}

#[derive(Clone)]
struct GateEnd {
    release_rx: Receiver<()>,
    started_tx: Sender<()>,
}

/// Scripted engine for testing without a repository
pub struct ScriptedEngine {
    /// Steps per method
    scripts: HashMap<String, Vec<ScriptStep>>,
    /// Errors returned directly from `call` per method
    call_errors: HashMap<String, EngineError>,
    /// Gated methods
    gates: HashMap<String, GateEnd>,
    /// Record of served requests
    call_log: CallLog,
    /// Boot refusal message
    refuse_boot: Option<String>,
    /// Snapshot the engine was booted with
    snapshot: Vec<u8>,
    /// Whether the engine is booted
    booted: bool,
    /// Number of boots performed
    boots: u32,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEngine {
    /// Create an engine with no scripts
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            call_errors: HashMap::new(),
            gates: HashMap::new(),
            call_log: CallLog::default(),
            refuse_boot: None,
            snapshot: Vec::new(),
            booted: false,
            boots: 0,
        }
    }

    /// Build an engine from a serialized script
    pub fn from_script(script: EngineScript) -> Self {
        Self {
            scripts: script.methods,
            refuse_boot: script.refuse_boot,
            ..Self::new()
        }
    }

    /// Set the steps played for a method
    pub fn with_script(mut self, method: impl Into<String>, steps: Vec<ScriptStep>) -> Self {
        self.scripts.insert(method.into(), steps);
        self
    }

    /// Make `call` itself fail for a method
    pub fn with_call_error(mut self, method: impl Into<String>, error: EngineError) -> Self {
        self.call_errors.insert(method.into(), error);
        self
    }

    /// Make `boot` fail
    pub fn refusing_boot(mut self, message: impl Into<String>) -> Self {
        self.refuse_boot = Some(message.into());
        self
    }

    /// Allow `boot` to succeed again
    pub fn accept_boot(&mut self) {
        self.refuse_boot = None;
    }

    /// Gate a method; its calls block until released through the returned handle
    pub fn gate(&mut self, method: impl Into<String>) -> Gate {
        let (release_tx, release_rx) = unbounded();
        let (started_tx, started_rx) = bounded(64);
        self.gates.insert(
            method.into(),
            GateEnd {
                release_rx,
                started_tx,
            },
        );
        Gate {
            release_tx,
            started_rx,
        }
    }

    /// Handle to the request log, valid after the engine moves to the worker
    pub fn call_log(&self) -> CallLog {
        self.call_log.clone()
    }

    /// Snapshot passed to the last successful boot
    pub fn snapshot(&self) -> &[u8] {
        &self.snapshot
    }

    /// Number of successful boots
    pub fn boots(&self) -> u32 {
        self.boots
    }
}

impl Engine for ScriptedEngine {
    fn boot(&mut self, snapshot: &[u8]) -> Result<(), EngineError> {
        if let Some(ref message) = self.refuse_boot {
            return Err(EngineError::Boot(message.clone()));
        }
        self.snapshot = snapshot.to_vec();
        self.booted = true;
        self.boots += 1;
        tracing::debug!("Scripted engine booted ({} snapshot bytes)", snapshot.len());
        Ok(())
    }

    fn call(&mut self, request: &EngineRequest) -> Result<ChunkStream<'_>, EngineError> {
        if !self.booted {
            return Err(EngineError::Fatal("engine not booted".to_string()));
        }

        self.call_log.record(request);

        if let Some(error) = self.call_errors.get(&request.method) {
            return Err(error.clone());
        }

        let steps = self
            .scripts
            .get(&request.method)
            .cloned()
            .ok_or_else(|| EngineError::Call(format!("unknown method: {}", request.method)))?;

        let gate = self.gates.get(&request.method).cloned();
        if let Some(ref gate) = gate {
            let _ = gate.started_tx.try_send(());
        }

        Ok(Box::new(ScriptedCall {
            steps: steps.into(),
            gate,
        }))
    }

    fn dispose(&mut self) {
        self.booted = false;
        self.snapshot.clear();
    }

    fn is_booted(&self) -> bool {
        self.booted
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Playback of one scripted call
struct ScriptedCall {
    steps: VecDeque<ScriptStep>,
    gate: Option<GateEnd>,
}

impl Iterator for ScriptedCall {
    type Item = Result<EngineChunk, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(gate) = self.gate.take() {
            // A dropped gate releases every waiter
            let _ = gate.release_rx.recv();
        }

        while let Some(step) = self.steps.pop_front() {
            match step {
                ScriptStep::Delay { millis } => {
                    std::thread::sleep(Duration::from_millis(millis));
                }
                ScriptStep::Data { payload } => return Some(Ok(EngineChunk::partial(payload))),
                ScriptStep::Final { payload } => {
                    self.steps.clear();
                    return Some(Ok(EngineChunk::last(payload)));
                }
                ScriptStep::Fail { message } => {
                    self.steps.clear();
                    return Some(Err(EngineError::Call(message)));
                }
                ScriptStep::Fatal { message } => {
                    self.steps.clear();
                    return Some(Err(EngineError::Fatal(message)));
                }
            }
        }
        None
    }
}
