//! A deterministic stand-in for a live editor host. Commands succeed with
//! a canned result, a `"fail"` param scripts a failure, and executing a
//! reload-causing command turns the host busy for a configured window,
//! the way a real editor goes dark while it recompiles. The demo binary
//! and the integration tests both run against this.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::host::{CommandExecutor, EditorProbe};
use crate::scheduler::classify;

/// One executor invocation, kept for inspection in tests.
#[derive(Debug, Clone)]
pub struct ExecutedCall {
    pub tool: String,
    pub params: Value,
}

#[derive(Debug)]
struct SimState {
    busy_until: Option<Instant>,
    calls: Vec<ExecutedCall>,
}

/// Implements both collaborator seams; share one instance between the
/// queue's probe and the pump's executor with an `Arc`.
#[derive(Debug)]
pub struct SimulatedHost {
    reload_busy: Duration,
    state: Mutex<SimState>,
}

impl SimulatedHost {
    /// `reload_busy` is how long the host reports busy after executing a
    /// reload-causing command.
    pub fn new(reload_busy: Duration) -> Self {
        Self {
            reload_busy,
            state: Mutex::new(SimState {
                busy_until: None,
                calls: Vec::new(),
            }),
        }
    }

    fn locked(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open the busy window manually, as if the editor had started
    /// compiling on its own.
    pub fn set_busy_for(&self, window: Duration) {
        self.locked().busy_until = Some(Instant::now() + window);
    }

    /// Every executor invocation so far, including scripted failures.
    pub fn calls(&self) -> Vec<ExecutedCall> {
        self.locked().calls.clone()
    }

    fn run(&self, tool: &str, params: &Value) -> Result<Value, String> {
        let mut state = self.locked();
        state.calls.push(ExecutedCall {
            tool: tool.to_string(),
            params: params.clone(),
        });
        if let Some(message) = params.get("fail").and_then(Value::as_str) {
            tracing::debug!(tool, "Simulated command failure");
            return Err(message.to_string());
        }
        if classify::causes_domain_reload(tool, params) {
            state.busy_until = Some(Instant::now() + self.reload_busy);
            tracing::debug!(
                tool,
                busy_ms = self.reload_busy.as_millis() as u64,
                "Simulated domain reload"
            );
        }
        Ok(json!({ "ok": true, "tool": tool }))
    }
}

impl EditorProbe for SimulatedHost {
    fn is_busy(&self) -> bool {
        self.locked()
            .busy_until
            .is_some_and(|until| Instant::now() < until)
    }
}

impl CommandExecutor for SimulatedHost {
    fn execute(&mut self, tool: &str, params: &Value) -> Result<Value, String> {
        self.run(tool, params)
    }
}

impl CommandExecutor for Arc<SimulatedHost> {
    fn execute(&mut self, tool: &str, params: &Value) -> Result<Value, String> {
        self.run(tool, params)
    }
}
