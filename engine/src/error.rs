// error.rs — Engine error kinds.
//
// One enum covering every failure the engine can surface. Bind rejections
// and deadlocks are recoverable by the search driver (it tries another
// option); everything else indicates a broken invariant and bubbles to the
// caller with the offending context in the message.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

/// A semantic engine failure. See the variant docs for recoverability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// No processing unit can host a function. Recoverable: the driver tries
    /// another option. Carries each PU's rejection reason.
    BindRejected {
        function: String,
        reasons: Vec<String>,
    },
    /// A decision's placement precedes the model's `next_tick`, or clock
    /// arithmetic crossed incompatible branch tags. Fatal: engine bug.
    TimeWrap { detail: String },
    /// A decision does not lie within any offered option. Fatal.
    OptionViolation { detail: String },
    /// No options remain while functions are unbound or variables are not
    /// transferred. Recoverable iff a refactor option exists.
    DeadlockDetected { detail: String },
    /// Functional simulation cannot satisfy a variable at some cycle.
    SimulationFailure {
        cycle: usize,
        var: String,
        reason: String,
    },
    /// A refactor would exceed the buffer-repetition bound; the option is
    /// withheld rather than offered.
    RepetitionLimit { refactor: String, limit: usize },
    /// Two sub-PUs drive the same control signal with conflicting values at
    /// the same tick. Fatal.
    MicrocodeConflict { tick: i64, signal: usize },
    /// The algorithm input file could not be parsed or lowered.
    Parse(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::BindRejected { function, reasons } => {
                write!(f, "cannot bind '{function}': {}", reasons.join("; "))
            }
            EngineError::TimeWrap { detail } => write!(f, "time wrap: {detail}"),
            EngineError::OptionViolation { detail } => {
                write!(f, "decision outside offered options: {detail}")
            }
            EngineError::DeadlockDetected { detail } => write!(f, "deadlock: {detail}"),
            EngineError::SimulationFailure { cycle, var, reason } => {
                write!(f, "simulation failed at cycle {cycle} for '{var}': {reason}")
            }
            EngineError::RepetitionLimit { refactor, limit } => {
                write!(f, "refactor '{refactor}' exceeds repetition limit {limit}")
            }
            EngineError::MicrocodeConflict { tick, signal } => {
                write!(f, "conflicting microcode at tick {tick}, signal {signal}")
            }
            EngineError::Parse(msg) => write!(f, "parse error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_rejection_concatenates_reasons() {
        let e = EngineError::BindRejected {
            function: "c = a + b".to_string(),
            reasons: vec!["fram1: no free cell".to_string(), "mul: wrong kind".to_string()],
        };
        let msg = format!("{e}");
        assert!(msg.contains("fram1: no free cell"));
        assert!(msg.contains("mul: wrong kind"));
    }

    #[test]
    fn microcode_conflict_names_tick_and_signal() {
        let e = EngineError::MicrocodeConflict { tick: 7, signal: 3 };
        assert_eq!(format!("{e}"), "conflicting microcode at tick 7, signal 3");
    }
}
