// endpoint.rs — Endpoint roles, options, decisions.
//
// An endpoint is the moment a PU touches the bus: `Target(v)` latches a
// variable from it, `Source(vs)` publishes a non-empty subset of variables
// onto it. Options pair a role with a time constraint; decisions pair a
// role with a concrete closed interval.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none; admissibility is a query, violation handling lives
//   with the PU committing the decision.
// Side effects: none.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::ir::{Diff, Patch, Var};
use crate::time::{TimeConstraint, TimeInterval};

// ── Role ────────────────────────────────────────────────────────────────────

/// What the PU does on the bus at this endpoint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum EndpointRole {
    /// Receive one variable from the bus.
    Target(Var),
    /// Broadcast any non-empty subset of these variables onto the bus.
    Source(BTreeSet<Var>),
}

impl EndpointRole {
    pub fn variables(&self) -> BTreeSet<Var> {
        match self {
            EndpointRole::Target(v) => BTreeSet::from([v.clone()]),
            EndpointRole::Source(vs) => vs.clone(),
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(self, EndpointRole::Source(_))
    }

    pub fn is_target(&self) -> bool {
        matches!(self, EndpointRole::Target(_))
    }

    /// Whether a decision role is a legal instance of an offered role:
    /// the same target, or a non-empty source subset.
    pub fn admits(&self, decision: &EndpointRole) -> bool {
        match (self, decision) {
            (EndpointRole::Target(a), EndpointRole::Target(b)) => a == b,
            (EndpointRole::Source(offered), EndpointRole::Source(chosen)) => {
                !chosen.is_empty() && chosen.is_subset(offered)
            }
            _ => false,
        }
    }
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointRole::Target(v) => write!(f, "target {v}"),
            EndpointRole::Source(vs) => {
                write!(f, "source ")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                Ok(())
            }
        }
    }
}

/// A target is a consumer position, a source a producer position.
impl Patch for EndpointRole {
    fn patch(&self, diff: &Diff) -> Self {
        match self {
            EndpointRole::Target(v) => EndpointRole::Target(diff.rename_input(v)),
            EndpointRole::Source(vs) => {
                EndpointRole::Source(vs.iter().map(|v| diff.rename_output(v)).collect())
            }
        }
    }
}

// ── Option / decision ───────────────────────────────────────────────────────

/// An admissible endpoint action currently offered by a PU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointOption {
    pub role: EndpointRole,
    pub at: TimeConstraint,
}

impl EndpointOption {
    pub fn new(role: EndpointRole, at: TimeConstraint) -> Self {
        EndpointOption { role, at }
    }

    /// Whether `d` lies within this option: compatible role, admissible
    /// placement.
    pub fn admits(&self, d: &EndpointDecision) -> bool {
        self.role.admits(&d.role) && self.at.admits(&d.at)
    }
}

impl fmt::Display for EndpointOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{} at {}", self.role, self.at)
    }
}

impl Patch for EndpointOption {
    fn patch(&self, diff: &Diff) -> Self {
        EndpointOption {
            role: self.role.patch(diff),
            at: self.at,
        }
    }
}

/// A committed endpoint action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointDecision {
    pub role: EndpointRole,
    pub at: TimeInterval,
}

impl EndpointDecision {
    pub fn new(role: EndpointRole, at: TimeInterval) -> Self {
        EndpointDecision { role, at }
    }
}

impl fmt::Display for EndpointDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{} at {}", self.role, self.at)
    }
}

impl Patch for EndpointDecision {
    fn patch(&self, diff: &Diff) -> Self {
        EndpointDecision {
            role: self.role.patch(diff),
            at: self.at,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeConstraint;

    fn source(vs: &[&str]) -> EndpointRole {
        EndpointRole::Source(vs.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn source_subset_admission() {
        let offered = source(&["a", "b", "c"]);
        assert!(offered.admits(&source(&["a"])));
        assert!(offered.admits(&source(&["a", "c"])));
        assert!(!offered.admits(&source(&[])), "empty subset");
        assert!(!offered.admits(&source(&["a", "x"])), "x not offered");
        assert!(!offered.admits(&EndpointRole::Target("a".to_string())));
    }

    #[test]
    fn option_admits_decision() {
        let opt = EndpointOption::new(
            EndpointRole::Target("v".to_string()),
            TimeConstraint::new(TimeInterval::new(2, 10), TimeInterval::new(1, 1)),
        );
        let good = EndpointDecision::new(
            EndpointRole::Target("v".to_string()),
            TimeInterval::singleton(5),
        );
        let early = EndpointDecision::new(
            EndpointRole::Target("v".to_string()),
            TimeInterval::singleton(1),
        );
        assert!(opt.admits(&good));
        assert!(!opt.admits(&early));
    }

    #[test]
    fn patch_respects_sides() {
        let diff = Diff {
            i: [("v".to_string(), "v@buf".to_string())].into(),
            o: Default::default(),
        };
        let target = EndpointRole::Target("v".to_string());
        assert_eq!(target.patch(&diff), EndpointRole::Target("v@buf".to_string()));
        // a source publishing v is a producer position: untouched by i-side
        let src = source(&["v"]);
        assert_eq!(src.patch(&diff), src);
    }
}
