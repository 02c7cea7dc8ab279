//! Seams for the two host-supplied collaborators: the busy predicate and
//! the command executor. The queue only ever sees these traits; the real
//! editor integration and the simulated host both plug in here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

/// Reports whether the host is currently in a state (compiling, updating,
/// reloading) that makes disruptive work unsafe to start.
pub trait EditorProbe: Send + Sync {
    fn is_busy(&self) -> bool;
}

/// Performs the actual domain operation for one command. Opaque to the
/// queue: the success value is discarded, an `Err` becomes the failed
/// job's `error` field.
pub trait CommandExecutor {
    fn execute(&mut self, tool: &str, params: &Value) -> Result<Value, String>;
}

impl<F> CommandExecutor for F
where
    F: FnMut(&str, &Value) -> Result<Value, String>,
{
    fn execute(&mut self, tool: &str, params: &Value) -> Result<Value, String> {
        self(tool, params)
    }
}

impl EditorProbe for AtomicBool {
    fn is_busy(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

impl<T: EditorProbe + ?Sized> EditorProbe for Arc<T> {
    fn is_busy(&self) -> bool {
        (**self).is_busy()
    }
}
