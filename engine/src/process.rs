// process.rs — The append-only process record.
//
// The record is the only witness of scheduling: every CAD note, endpoint
// action, microinstruction and realized function lands here as a step with
// a placement in time. Steps form a DAG through vertical relations (a high
// step abstracts a low one). `next_tick` is the smallest tick strictly
// greater than any scheduled activity and never decreases.
//
// Preconditions: callers only append; history is never rewritten or
//   patched.
// Postconditions: step ids are unique and allocated in insertion order.
// Failure modes: none; invalid placements are rejected before they reach
//   the record.
// Side effects: none beyond the record itself.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::endpoint::EndpointRole;
use crate::ir::{Var, F};
use crate::pu::Instr;
use crate::time::{Tick, TimeInterval};
use crate::value::Val;

pub type StepId = usize;

// ── Step ────────────────────────────────────────────────────────────────────

/// What a step records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StepInfo<T: Val> {
    /// CAD metadata, e.g. a binding note.
    Cad(String),
    /// The interval during which a function is realized.
    Function(F<T>),
    /// An endpoint action on the bus.
    Endpoint(EndpointRole),
    /// A PU microinstruction.
    Instruction(Instr),
    /// A sub-PU step imported into a parent timeline.
    Nested { pu: String, inner: Box<Step<T>> },
}

impl<T: Val> StepInfo<T> {
    pub fn kind(&self) -> &'static str {
        match self {
            StepInfo::Cad(_) => "CAD",
            StepInfo::Function(_) => "Function",
            StepInfo::Endpoint(_) => "Endpoint",
            StepInfo::Instruction(_) => "Instruction",
            StepInfo::Nested { .. } => "Nested",
        }
    }

    /// The innermost non-nested info.
    pub fn flat(&self) -> &StepInfo<T> {
        match self {
            StepInfo::Nested { inner, .. } => inner.info.flat(),
            other => other,
        }
    }
}

impl<T: Val> fmt::Display for StepInfo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepInfo::Cad(text) => write!(f, "{text}"),
            StepInfo::Function(func) => write!(f, "{func}"),
            StepInfo::Endpoint(role) => write!(f, "{role}"),
            StepInfo::Instruction(instr) => write!(f, "{instr}"),
            StepInfo::Nested { pu, inner } => write!(f, "{pu}/{}", inner.info),
        }
    }
}

/// One scheduling step: a unique id, a placement (single tick or closed
/// interval) and a description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step<T: Val> {
    pub id: StepId,
    pub time: TimeInterval,
    pub info: StepInfo<T>,
}

impl<T: Val> fmt::Display for Step<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} {}", self.id, self.time, self.info)
    }
}

// ── Relation ────────────────────────────────────────────────────────────────

/// Vertical relation: step `up` is an abstraction of step `down`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerticalRelation {
    pub up: StepId,
    pub down: StepId,
}

// ── Process ─────────────────────────────────────────────────────────────────

/// The append-only schedule history of one PU (or of the bus network).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Process<T: Val> {
    steps: Vec<Step<T>>,
    relations: Vec<VerticalRelation>,
    next_tick: Tick,
    next_uid: StepId,
}

impl<T: Val> Process<T> {
    pub fn new() -> Self {
        Process {
            steps: Vec::new(),
            relations: Vec::new(),
            next_tick: 0,
            next_uid: 0,
        }
    }

    pub fn steps(&self) -> &[Step<T>] {
        &self.steps
    }

    pub fn relations(&self) -> &[VerticalRelation] {
        &self.relations
    }

    pub fn next_tick(&self) -> Tick {
        self.next_tick
    }

    pub fn add_step(&mut self, time: TimeInterval, info: StepInfo<T>) -> StepId {
        let id = self.next_uid;
        self.next_uid += 1;
        self.steps.push(Step { id, time, info });
        id
    }

    /// Record a single-tick step.
    pub fn add_instant(&mut self, t: Tick, info: StepInfo<T>) -> StepId {
        self.add_step(TimeInterval::singleton(t), info)
    }

    pub fn add_relation(&mut self, up: StepId, down: StepId) {
        self.relations.push(VerticalRelation { up, down });
    }

    /// Import a sub-PU step under this process, preserving the inner step.
    pub fn nest_step(&mut self, pu: &str, inner: Step<T>) -> StepId {
        let time = inner.time;
        self.add_step(
            time,
            StepInfo::Nested {
                pu: pu.to_string(),
                inner: Box::new(inner),
            },
        )
    }

    /// Raise `next_tick`; lowering it is a no-op (monotone by construction).
    pub fn update_tick(&mut self, t: Tick) {
        if t > self.next_tick {
            self.next_tick = t;
        }
    }

    // ── Derived queries ─────────────────────────────────────────────────

    pub fn what_happens_at(&self, t: Tick) -> Vec<&Step<T>> {
        self.steps.iter().filter(|s| s.time.contains(t)).collect()
    }

    /// The instruction effective at tick `t`, if any.
    pub fn instruction_at(&self, t: Tick) -> Option<&Instr> {
        self.steps.iter().find_map(|s| match s.info.flat() {
            StepInfo::Instruction(i) if s.time.contains(t) => Some(i),
            _ => None,
        })
    }

    pub fn instructions_at(&self, t: Tick) -> Vec<&Instr> {
        self.steps
            .iter()
            .filter(|s| s.time.contains(t))
            .filter_map(|s| match s.info.flat() {
                StepInfo::Instruction(i) => Some(i),
                _ => None,
            })
            .collect()
    }

    pub fn endpoint_at(&self, t: Tick) -> Option<&EndpointRole> {
        self.steps.iter().find_map(|s| match s.info.flat() {
            StepInfo::Endpoint(role) if s.time.contains(t) => Some(role),
            _ => None,
        })
    }

    /// Variables carried by `Transport` instructions in this process.
    pub fn transferred_variables(&self) -> BTreeSet<Var> {
        self.transports().into_iter().map(|t| t.0).collect()
    }

    /// All transport steps: (variable, source PU, destination PU, interval).
    pub fn transports(&self) -> Vec<(Var, String, String, TimeInterval)> {
        self.steps
            .iter()
            .filter_map(|s| match s.info.flat() {
                StepInfo::Instruction(Instr::Transport { var, src, dst }) => {
                    Some((var.clone(), src.clone(), dst.clone(), s.time))
                }
                _ => None,
            })
            .collect()
    }

    /// Variables published by committed `Source` endpoints.
    pub fn source_variables(&self) -> BTreeSet<Var> {
        self.steps
            .iter()
            .filter_map(|s| match s.info.flat() {
                StepInfo::Endpoint(EndpointRole::Source(vs)) => Some(vs.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Int32;

    fn cad(p: &mut Process<Int32>, t: Tick, text: &str) -> StepId {
        p.add_instant(t, StepInfo::Cad(text.to_string()))
    }

    #[test]
    fn ids_are_insertion_ordered() {
        let mut p: Process<Int32> = Process::new();
        let a = cad(&mut p, 0, "first");
        let b = cad(&mut p, 0, "second");
        assert_eq!((a, b), (0, 1));
        assert_eq!(p.steps().len(), 2);
    }

    #[test]
    fn update_tick_is_monotone() {
        let mut p: Process<Int32> = Process::new();
        p.update_tick(5);
        p.update_tick(3);
        assert_eq!(p.next_tick(), 5);
        p.update_tick(9);
        assert_eq!(p.next_tick(), 9);
    }

    #[test]
    fn queries_follow_time_placement() {
        let mut p: Process<Int32> = Process::new();
        let id = p.add_step(
            TimeInterval::new(2, 4),
            StepInfo::Instruction(Instr::Transport {
                var: "v".to_string(),
                src: "fram1".to_string(),
                dst: "acc".to_string(),
            }),
        );
        assert!(p.instruction_at(1).is_none());
        assert!(p.instruction_at(3).is_some());
        assert_eq!(p.what_happens_at(4)[0].id, id);
        assert_eq!(
            p.transferred_variables(),
            BTreeSet::from(["v".to_string()])
        );
    }

    #[test]
    fn nested_steps_flatten() {
        let mut inner: Process<Int32> = Process::new();
        let iid = inner.add_instant(
            7,
            StepInfo::Endpoint(EndpointRole::Source(BTreeSet::from(["x".to_string()]))),
        );
        let inner_step = inner.steps()[iid].clone();

        let mut outer: Process<Int32> = Process::new();
        let oid = outer.nest_step("fram1", inner_step);
        assert_eq!(outer.steps()[oid].time, TimeInterval::singleton(7));
        assert!(matches!(
            outer.steps()[oid].info.flat(),
            StepInfo::Endpoint(EndpointRole::Source(_))
        ));
        assert_eq!(outer.source_variables(), BTreeSet::from(["x".to_string()]));
    }
}
