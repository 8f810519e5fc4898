// score.rs — Option metrics and the combining function.
//
// Metrics are plain records with named fields; `combine` is the single
// pure function turning them into an integer priority. Policies tune
// search behavior by choosing among scored options, never by reaching
// into option enumeration.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use serde::Serialize;

use crate::time::Tick;

/// Counts of what the whole model currently offers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GlobalMetrics {
    pub bind_options: usize,
    pub dataflow_options: usize,
    pub refactor_options: usize,
}

/// Per-option inputs for a binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BindMetrics {
    /// The function must be placed early (loop-class reservations).
    pub critical: bool,
    /// How many PUs can host the function; 1 means forced.
    pub alternatives: usize,
    /// Pending transfers this binding unblocks.
    pub enablement: usize,
    /// Ticks until the PU's earliest endpoint becomes available.
    pub restlessness: Tick,
    /// Topological depth of the function from the algorithm inputs.
    pub wave: usize,
    /// Output variables produced.
    pub outputs: usize,
    /// Share of the function's inputs whose producers are already bound,
    /// in percent.
    pub percent_bound_inputs: u8,
    /// The target PU already produces one of the function's inputs or
    /// consumes one of its outputs; the bus cannot route a variable back
    /// into its own PU, so this binding will need a buffer later.
    pub possible_deadlock: bool,
}

/// Per-option inputs for a transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DataflowMetrics {
    /// Idle ticks between `next_tick` and the earliest common start.
    pub wait_time: Tick,
    /// Some participant's window closes (e.g. a rotten divider result).
    pub restricted_time: bool,
}

/// Per-option inputs for a refactor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefactorMetrics {
    pub base: i64,
    pub locks_broken: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpecificMetrics {
    Bind(BindMetrics),
    Dataflow(DataflowMetrics),
    Refactor(RefactorMetrics),
}

/// Refactor bases: low enough that productive binds and transfers win,
/// high enough to fire when nothing else can.
pub const BREAK_LOOP_BASE: i64 = 100;
pub const RESOLVE_DEADLOCK_BASE: i64 = 110;
pub const OPTIMIZE_ACCUM_BASE: i64 = 90;

/// Combine global and specific metrics into one priority.
pub fn combine(global: &GlobalMetrics, specific: &SpecificMetrics) -> i64 {
    match specific {
        SpecificMetrics::Bind(m) => {
            let base = if m.critical {
                2000
            } else if m.alternatives == 1 {
                500
            } else {
                200 + 10 * m.enablement as i64 - 2 * m.restlessness
            };
            if m.possible_deadlock {
                base - 1000
            } else {
                base
            }
        }
        SpecificMetrics::Dataflow(m) => {
            if global.dataflow_options >= 2 {
                10000 + 200 - m.wait_time
            } else if m.restricted_time {
                300
            } else {
                200 - m.wait_time
            }
        }
        SpecificMetrics::Refactor(m) => m.base + 10 * m.locks_broken as i64,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
