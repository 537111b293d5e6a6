//! Frame dispatcher
//!
//! Entry point for running a prepared frame: consult the compilation gate and
//! either invoke the compiled artifact or run the interpreter loop.

use tracing::trace;

use super::value::Value;
use super::vm::{Frame, Interpreter, VmResult};
use crate::runtime::stats::Counters;
use crate::runtime::Session;

/// Evaluate `frame` in the context owned by `session`
///
/// When the unit has (or just obtained) a compiled artifact its result is
/// returned unchanged and the interpreter is not entered.
pub fn eval_frame(session: &mut Session<'_>, frame: &mut Frame) -> VmResult<Value> {
    let runtime = session.runtime();

    if let Some(artifact) = runtime.gate().resolve(&frame.unit) {
        Counters::bump(&runtime.counters().compiled_runs);
        trace!(target: "evalcore::dispatch", unit = frame.unit.name(), "compiled");
        return artifact.invoke(frame);
    }

    Counters::bump(&runtime.counters().interpreted_runs);
    trace!(target: "evalcore::dispatch", unit = frame.unit.name(), "interpreted");
    Interpreter::new(session, frame).run()
}
