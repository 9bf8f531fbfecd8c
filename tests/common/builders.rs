//! Test data builders for scripted engines

use explorer_pool::engine::{CallLog, Gate, ScriptStep, ScriptedEngine};
use serde_json::Value;
use std::collections::HashMap;

/// A scripted engine plus the handles tests keep after it moves into a pool
pub struct TestEngine {
    pub engine: ScriptedEngine,
    pub gates: HashMap<String, Gate>,
    pub log: CallLog,
}

/// Builder for scripted engines
#[derive(Default)]
pub struct EngineBuilder {
    scripts: Vec<(String, Vec<ScriptStep>)>,
    gated: Vec<String>,
    refuse_boot: Option<String>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Method answering with a single final chunk
    pub fn answer(self, method: &str, payload: Value) -> Self {
        self.steps(method, vec![ScriptStep::last(payload)])
    }

    /// Method streaming `partials` before the final payload
    pub fn stream(self, method: &str, partials: Vec<Value>, last: Value) -> Self {
        let mut steps: Vec<ScriptStep> = partials.into_iter().map(ScriptStep::data).collect();
        steps.push(ScriptStep::last(last));
        self.steps(method, steps)
    }

    /// Method emitting `partials` and then failing
    pub fn failing(self, method: &str, partials: Vec<Value>, message: &str) -> Self {
        let mut steps: Vec<ScriptStep> = partials.into_iter().map(ScriptStep::data).collect();
        steps.push(ScriptStep::fail(message));
        self.steps(method, steps)
    }

    /// Method that takes the engine down
    pub fn fatal(self, method: &str, message: &str) -> Self {
        self.steps(method, vec![ScriptStep::fatal(message)])
    }

    /// Raw steps for a method
    pub fn steps(mut self, method: &str, steps: Vec<ScriptStep>) -> Self {
        self.scripts.push((method.to_string(), steps));
        self
    }

    /// Block the method's calls until the test releases them
    pub fn gate(mut self, method: &str) -> Self {
        self.gated.push(method.to_string());
        self
    }

    /// Make boot fail
    pub fn refuse_boot(mut self, message: &str) -> Self {
        self.refuse_boot = Some(message.to_string());
        self
    }

    pub fn build(self) -> TestEngine {
        let mut engine = ScriptedEngine::new();
        for (method, steps) in self.scripts {
            engine = engine.with_script(method, steps);
        }
        if let Some(message) = self.refuse_boot {
            engine = engine.refusing_boot(message);
        }

        let gates = self
            .gated
            .into_iter()
            .map(|method| {
                let gate = engine.gate(method.clone());
                (method, gate)
            })
            .collect();
        let log = engine.call_log();

        TestEngine { engine, gates, log }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_engine_builder() {
        let test = EngineBuilder::new()
            .answer("get_branches", json!(["main"]))
            .gate("get_branches")
            .build();

        assert!(test.gates.contains_key("get_branches"));
        assert!(test.log.is_empty());
    }
}
