// problem.rs — The problem surface: option/decision pairs.
//
// A problem is a pair (options, decision). The bus network exports Bind,
// Dataflow, BreakLoop, OptimizeAccumulate and ResolveDeadlock; sub-PUs
// additionally export Endpoint. The driver treats all of them uniformly:
// collect, score, pick, apply.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::endpoint::{EndpointDecision, EndpointOption};
use crate::ir::{AccMerge, Var, F};
use crate::time::{Tick, TimeInterval};
use crate::value::Val;

// ── Bind ────────────────────────────────────────────────────────────────────

/// Place a function on a named sub-PU. Options and decisions share the
/// shape; a decision is an option the driver committed to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bind<T: Val> {
    pub function: F<T>,
    pub pu: String,
}

impl<T: Val> fmt::Display for Bind<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bind {} to {}", self.function, self.pu)
    }
}

// ── Dataflow ────────────────────────────────────────────────────────────────

/// A candidate transfer: one source PU broadcasting, each routed variable
/// latched by exactly one other PU.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataflowOption {
    pub source: (String, EndpointOption),
    /// variable → (destination PU, its target option)
    pub targets: BTreeMap<Var, (String, EndpointOption)>,
}

impl DataflowOption {
    /// Earliest start feasible for every participant, from `from`.
    pub fn earliest_start(&self, from: Tick) -> Tick {
        let mut est = from.max(self.source.1.at.available.inf());
        for (_, (_, opt)) in &self.targets {
            est = est.max(opt.at.available.inf());
        }
        est
    }

    /// Whether a common start exists within every participant's window.
    pub fn feasible(&self, from: Tick) -> bool {
        let est = self.earliest_start(from);
        let width = self.min_width();
        let fits = |opt: &EndpointOption| {
            let sup = opt.at.available.sup();
            sup == crate::time::UNBOUNDED || est + width - 1 <= sup
        };
        fits(&self.source.1) && self.targets.values().all(|(_, opt)| fits(opt))
    }

    /// Narrowest admissible transfer width across participants.
    pub fn min_width(&self) -> Tick {
        let mut width = self.source.1.at.duration.inf();
        for (_, (_, opt)) in &self.targets {
            width = width.max(opt.at.duration.inf());
        }
        width
    }

    /// Commit at the earliest feasible start. The source spans every
    /// target's latch; targets latch at their minimal width.
    pub fn decide_earliest(&self, from: Tick) -> DataflowDecision {
        let est = self.earliest_start(from);
        let mut targets = BTreeMap::new();
        let mut src_end = est + self.source.1.at.duration.inf() - 1;
        for (v, (pu, opt)) in &self.targets {
            let at = TimeInterval::new(est, est + opt.at.duration.inf() - 1);
            src_end = src_end.max(at.sup());
            targets.insert(
                v.clone(),
                (pu.clone(), EndpointDecision::new(opt.role.clone(), at)),
            );
        }
        let src_at = TimeInterval::new(est, src_end);
        let mut role = self.source.1.role.clone();
        if let crate::endpoint::EndpointRole::Source(vs) = &mut role {
            // only the routed variables leave the PU in this transfer
            *vs = targets.keys().cloned().collect::<BTreeSet<_>>();
        }
        DataflowDecision {
            source: (self.source.0.clone(), EndpointDecision::new(role, src_at)),
            targets,
        }
    }
}

impl fmt::Display for DataflowOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dataflow {} ->", self.source.0)?;
        for (v, (pu, _)) in &self.targets {
            write!(f, " {v}:{pu}")?;
        }
        Ok(())
    }
}

/// A committed transfer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataflowDecision {
    pub source: (String, EndpointDecision),
    pub targets: BTreeMap<Var, (String, EndpointDecision)>,
}

impl fmt::Display for DataflowDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dataflow {} at {} ->", self.source.0, self.source.1.at)?;
        for (v, (pu, d)) in &self.targets {
            write!(f, " {v}:{pu}@{}", d.at)?;
        }
        Ok(())
    }
}

// ── Refactors ───────────────────────────────────────────────────────────────

/// Split a bound loop into its begin/end pseudo-functions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakLoop<T: Val> {
    pub lp: F<T>,
    /// PU currently hosting the loop.
    pub pu: String,
}

/// Merge an add/sub chain into one accumulate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizeAccum<T: Val> {
    pub merge: AccMerge<T>,
}

/// Buffer variables that a PU both produces and consumes, so the send can
/// proceed through a fresh reg on another PU.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolveDeadlock {
    pub buffer: BTreeSet<Var>,
}

// ── The uniform surface ─────────────────────────────────────────────────────

/// Every move the synthesis driver can take from a model state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SynthesisOption<T: Val> {
    Bind(Bind<T>),
    Dataflow(DataflowOption),
    BreakLoop(BreakLoop<T>),
    OptimizeAccum(OptimizeAccum<T>),
    ResolveDeadlock(ResolveDeadlock),
}

impl<T: Val> SynthesisOption<T> {
    pub fn kind(&self) -> &'static str {
        match self {
            SynthesisOption::Bind(_) => "bind",
            SynthesisOption::Dataflow(_) => "dataflow",
            SynthesisOption::BreakLoop(_) => "break-loop",
            SynthesisOption::OptimizeAccum(_) => "optimize-accumulate",
            SynthesisOption::ResolveDeadlock(_) => "resolve-deadlock",
        }
    }
}

impl<T: Val> fmt::Display for SynthesisOption<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthesisOption::Bind(b) => write!(f, "{b}"),
            SynthesisOption::Dataflow(d) => write!(f, "{d}"),
            SynthesisOption::BreakLoop(b) => write!(f, "break loop {} on {}", b.lp, b.pu),
            SynthesisOption::OptimizeAccum(o) => {
                write!(f, "merge accumulate {}", o.merge.merged)
            }
            SynthesisOption::ResolveDeadlock(r) => {
                write!(f, "buffer")?;
                for v in &r.buffer {
                    write!(f, " {v}")?;
                }
                Ok(())
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointRole;
    use crate::time::{TimeConstraint, UNBOUNDED};

    fn opt(role: EndpointRole, from: Tick) -> EndpointOption {
        EndpointOption::new(
            role,
            TimeConstraint::new(
                TimeInterval::new(from, UNBOUNDED),
                TimeInterval::new(1, UNBOUNDED),
            ),
        )
    }

    fn dataflow() -> DataflowOption {
        DataflowOption {
            source: (
                "fram1".to_string(),
                opt(
                    EndpointRole::Source(["a".to_string(), "b".to_string()].into()),
                    3,
                ),
            ),
            targets: BTreeMap::from([(
                "a".to_string(),
                (
                    "accum".to_string(),
                    opt(EndpointRole::Target("a".to_string()), 5),
                ),
            )]),
        }
    }

    #[test]
    fn earliest_start_is_participant_max() {
        let df = dataflow();
        assert_eq!(df.earliest_start(0), 5);
        assert_eq!(df.earliest_start(9), 9);
        assert!(df.feasible(0));
    }

    #[test]
    fn decision_narrows_source_to_routed_vars() {
        let df = dataflow();
        let d = df.decide_earliest(0);
        assert_eq!(d.source.1.at, TimeInterval::singleton(5));
        assert_eq!(
            d.source.1.role,
            EndpointRole::Source(["a".to_string()].into())
        );
        let (pu, td) = &d.targets["a"];
        assert_eq!(pu, "accum");
        assert_eq!(td.at, TimeInterval::singleton(5));
    }
}
