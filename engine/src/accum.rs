// accum.rs — Accumulator PU.
//
// Hosts add/sub and the merged accumulate chains. One function in flight:
// inputs are latched in declared order (the first load also clears the
// register), the sum is readable one tick after the last load.
//
// Preconditions: decisions come from the current option set.
// Postconditions: commits return fresh snapshots.
// Failure modes: bind rejections carry the reason; foreign decisions are
//   `OptionViolation`.
// Side effects: none.

use crate::endpoint::{EndpointDecision, EndpointOption, EndpointRole};
use crate::error::EngineError;
use crate::ir::{Diff, Lock, Patch, Sign, F};
use crate::process::{Process, StepInfo};
use crate::pu::{Instr, ProcessorUnit, SignalIdx};
use crate::serial::{finish, Job};
use crate::time::{Tick, TimeConstraint, TimeInterval, UNBOUNDED};
use crate::value::Val;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccumPorts {
    pub reset_acc: SignalIdx,
    pub load: SignalIdx,
    pub neg: SignalIdx,
    pub oe: SignalIdx,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Accum<T: Val> {
    ports: AccumPorts,
    remains: Vec<F<T>>,
    current: Option<Job<T>>,
    process: Process<T>,
}

/// Input endpoints in declared order, then the result.
fn pending_of<T: Val>(f: &F<T>) -> Option<Vec<EndpointRole>> {
    let mut roles: Vec<EndpointRole> = match f {
        F::Add { a, b, .. } | F::Sub { a, b, .. } => {
            vec![
                EndpointRole::Target(a.clone()),
                EndpointRole::Target(b.clone()),
            ]
        }
        F::Accumulate { terms, .. } => terms
            .iter()
            .map(|(_, v)| EndpointRole::Target(v.clone()))
            .collect(),
        _ => return None,
    };
    roles.push(EndpointRole::Source(f.outputs()));
    Some(roles)
}

/// Sign of the `taken`-th input of an accumulation-class function.
fn sign_of<T: Val>(f: &F<T>, taken: usize) -> Sign {
    match f {
        F::Sub { .. } if taken == 1 => Sign::Minus,
        F::Accumulate { terms, .. } => terms.get(taken).map(|(s, _)| *s).unwrap_or(Sign::Plus),
        _ => Sign::Plus,
    }
}

impl<T: Val> Accum<T> {
    pub fn new(ports: AccumPorts) -> Self {
        Accum {
            ports,
            remains: Vec::new(),
            current: None,
            process: Process::new(),
        }
    }

    fn target_option(&self, v: &str) -> EndpointOption {
        EndpointOption::new(
            EndpointRole::Target(v.to_string()),
            TimeConstraint::new(
                TimeInterval::new(self.process.next_tick(), UNBOUNDED),
                TimeInterval::new(1, UNBOUNDED),
            ),
        )
    }

    fn option_for(&self, job: &Job<T>, role: &EndpointRole) -> EndpointOption {
        let from = match role {
            EndpointRole::Target(_) => self.process.next_tick(),
            EndpointRole::Source(_) => self.process.next_tick().max(job.ready),
        };
        EndpointOption::new(
            role.clone(),
            TimeConstraint::new(
                TimeInterval::new(from, UNBOUNDED),
                TimeInterval::new(1, UNBOUNDED),
            ),
        )
    }
}

impl<T: Val> ProcessorUnit<T> for Accum<T> {
    fn try_bind(&self, f: &F<T>) -> Result<Self, String> {
        if pending_of(f).is_none() {
            return Err(format!("accumulator does not host {}", f.kind()));
        }
        let mut next = self.clone();
        next.remains.push(f.clone());
        Ok(next)
    }

    fn endpoint_options(&self) -> Vec<EndpointOption> {
        match &self.current {
            Some(job) => job
                .head()
                .map(|role| vec![self.option_for(job, role)])
                .unwrap_or_default(),
            None => self
                .remains
                .iter()
                .filter_map(|f| match pending_of(f)?.into_iter().next()? {
                    EndpointRole::Target(v) => Some(self.target_option(&v)),
                    EndpointRole::Source(_) => None,
                })
                .collect(),
        }
    }

    fn endpoint_decision(&self, d: &EndpointDecision) -> Result<Self, EngineError> {
        let mut next = self.clone();

        if next.current.is_none() {
            let pos = next
                .remains
                .iter()
                .position(|f| {
                    pending_of(f)
                        .and_then(|p| p.into_iter().next())
                        .map(|role| match &role {
                            EndpointRole::Target(v) => self.target_option(v).admits(d),
                            EndpointRole::Source(_) => false,
                        })
                        .unwrap_or(false)
                })
                .ok_or_else(|| EngineError::OptionViolation {
                    detail: format!("accumulator offers nothing admitting {d}"),
                })?;
            let f = next.remains.remove(pos);
            let pending = pending_of(&f).unwrap();
            next.current = Some(Job::new(f, pending));
        } else {
            let job = next.current.as_ref().unwrap();
            let admitted = job
                .head()
                .map(|role| self.option_for(job, role).admits(d))
                .unwrap_or(false);
            if !admitted {
                return Err(EngineError::OptionViolation {
                    detail: format!("accumulator in flight does not admit {d}"),
                });
            }
        }

        let job = next.current.as_mut().unwrap();
        let endpoint_step = next
            .process
            .add_step(d.at, StepInfo::Endpoint(d.role.clone()));
        let instr = match &d.role {
            EndpointRole::Target(_) => {
                let neg = sign_of(&job.function, job.taken) == Sign::Minus;
                if job.taken == 0 {
                    Instr::AccumResetLoad { neg }
                } else {
                    Instr::AccumLoad { neg }
                }
            }
            EndpointRole::Source(_) => Instr::AccumOut,
        };
        let instr_step = next.process.add_step(d.at, StepInfo::Instruction(instr));
        job.steps.push(endpoint_step);
        job.steps.push(instr_step);
        job.note_time(&d.at);
        job.commit_role(&d.role);
        if d.role.is_target() {
            job.ready = d.at.sup() + 1;
        }
        next.process.update_tick(d.at.sup() + 1);

        if next.current.as_ref().unwrap().is_done() {
            let job = next.current.take().unwrap();
            finish(&mut next.process, &job);
        }
        Ok(next)
    }

    fn process(&self) -> &Process<T> {
        &self.process
    }

    fn locks(&self) -> Vec<Lock> {
        let mut locks: Vec<Lock> = self.remains.iter().flat_map(|f| f.locks()).collect();
        if let Some(job) = &self.current {
            locks.extend(job.locks());
        }
        locks
    }

    fn signals_at(&self, t: Tick) -> Vec<(SignalIdx, bool)> {
        let p = &self.ports;
        match self.process.instruction_at(t) {
            Some(Instr::AccumResetLoad { neg }) => vec![
                (p.reset_acc, true),
                (p.load, true),
                (p.neg, *neg),
                (p.oe, false),
            ],
            Some(Instr::AccumLoad { neg }) => vec![
                (p.reset_acc, false),
                (p.load, true),
                (p.neg, *neg),
                (p.oe, false),
            ],
            Some(Instr::AccumOut) => vec![
                (p.reset_acc, false),
                (p.load, false),
                (p.neg, false),
                (p.oe, true),
            ],
            _ => vec![
                (p.reset_acc, false),
                (p.load, false),
                (p.neg, false),
                (p.oe, false),
            ],
        }
    }
}

impl<T: Val> Patch for Accum<T> {
    fn patch(&self, diff: &Diff) -> Self {
        Accum {
            ports: self.ports.clone(),
            remains: self.remains.patch(diff),
            current: self.current.as_ref().map(|j| j.patch(diff)),
            process: self.process.clone(),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Int32;
    use std::collections::BTreeSet;

    fn accum() -> Accum<Int32> {
        Accum::new(AccumPorts {
            reset_acc: 0,
            load: 1,
            neg: 2,
            oe: 3,
        })
    }

    fn add() -> F<Int32> {
        F::Add {
            a: "a".to_string(),
            b: "b".to_string(),
            outs: vec!["c".to_string()],
        }
    }

    fn target(v: &str, t: Tick) -> EndpointDecision {
        EndpointDecision::new(EndpointRole::Target(v.to_string()), TimeInterval::singleton(t))
    }

    fn source(vs: &[&str], t: Tick) -> EndpointDecision {
        EndpointDecision::new(
            EndpointRole::Source(vs.iter().map(|s| s.to_string()).collect()),
            TimeInterval::singleton(t),
        )
    }

    #[test]
    fn inputs_latch_in_declared_order() {
        let pu = accum().try_bind(&add()).unwrap();
        let opts = pu.endpoint_options();
        assert_eq!(opts.len(), 1);
        assert_eq!(opts[0].role, EndpointRole::Target("a".to_string()));

        let pu = pu.endpoint_decision(&target("a", 0)).unwrap();
        assert_eq!(
            pu.process().instruction_at(0),
            Some(&Instr::AccumResetLoad { neg: false })
        );
        let pu = pu.endpoint_decision(&target("b", 1)).unwrap();
        assert_eq!(
            pu.process().instruction_at(1),
            Some(&Instr::AccumLoad { neg: false })
        );

        // result readable from tick 2
        let opts = pu.endpoint_options();
        assert_eq!(opts.len(), 1);
        assert_eq!(opts[0].at.available.inf(), 2);

        let pu = pu.endpoint_decision(&source(&["c"], 2)).unwrap();
        assert_eq!(pu.process().instruction_at(2), Some(&Instr::AccumOut));
        assert!(pu
            .process()
            .steps()
            .iter()
            .any(|s| matches!(&s.info, StepInfo::Function(f) if f.kind() == "add")));
    }

    #[test]
    fn sub_negates_second_input() {
        let sub = F::Sub {
            a: "a".to_string(),
            b: "b".to_string(),
            outs: vec!["c".to_string()],
        };
        let pu = accum().try_bind(&sub).unwrap();
        let pu = pu.endpoint_decision(&target("a", 0)).unwrap();
        let pu = pu.endpoint_decision(&target("b", 1)).unwrap();
        assert_eq!(
            pu.process().instruction_at(1),
            Some(&Instr::AccumLoad { neg: true })
        );
    }

    #[test]
    fn accumulate_follows_term_signs() {
        let acc = F::Accumulate {
            terms: vec![
                (Sign::Plus, "a".to_string()),
                (Sign::Plus, "b".to_string()),
                (Sign::Minus, "c".to_string()),
            ],
            outs: vec!["d".to_string()],
        };
        let pu = accum().try_bind(&acc).unwrap();
        let pu = pu.endpoint_decision(&target("a", 0)).unwrap();
        let pu = pu.endpoint_decision(&target("b", 1)).unwrap();
        let pu = pu.endpoint_decision(&target("c", 2)).unwrap();
        assert_eq!(
            pu.process().instruction_at(2),
            Some(&Instr::AccumLoad { neg: true })
        );
    }

    #[test]
    fn one_function_in_flight() {
        let other = F::Add {
            a: "x".to_string(),
            b: "y".to_string(),
            outs: vec!["z".to_string()],
        };
        let pu = accum().try_bind(&add()).unwrap().try_bind(&other).unwrap();
        // both queued functions offer their first input
        assert_eq!(pu.endpoint_options().len(), 2);
        let pu = pu.endpoint_decision(&target("a", 0)).unwrap();
        // now only the in-flight function's next input is offered
        let opts = pu.endpoint_options();
        assert_eq!(opts.len(), 1);
        assert_eq!(opts[0].role, EndpointRole::Target("b".to_string()));
    }

    #[test]
    fn result_locked_by_waiting_inputs() {
        let pu = accum().try_bind(&add()).unwrap();
        let locks = pu.locks();
        assert!(locks.contains(&Lock {
            locked: "c".to_string(),
            by: "a".to_string()
        }));
        let pu = pu.endpoint_decision(&target("a", 0)).unwrap();
        let locks = pu.locks();
        assert!(locks.contains(&Lock {
            locked: "c".to_string(),
            by: "b".to_string()
        }));
        assert!(!locks.iter().any(|l| l.by == "a"));
    }

    #[test]
    fn rejects_foreign_function() {
        let m = F::Mul {
            a: "a".to_string(),
            b: "b".to_string(),
            outs: vec!["c".to_string()],
        };
        assert!(accum().try_bind(&m).is_err());
    }

    #[test]
    fn source_subset_spreads_over_ticks() {
        let wide = F::Add {
            a: "a".to_string(),
            b: "b".to_string(),
            outs: vec!["c".to_string(), "d".to_string()],
        };
        let pu = accum().try_bind(&wide).unwrap();
        let pu = pu.endpoint_decision(&target("a", 0)).unwrap();
        let pu = pu.endpoint_decision(&target("b", 1)).unwrap();
        let pu = pu.endpoint_decision(&source(&["c"], 2)).unwrap();
        // d still pending
        let opts = pu.endpoint_options();
        assert_eq!(opts.len(), 1);
        assert_eq!(
            opts[0].role,
            EndpointRole::Source(BTreeSet::from(["d".to_string()]))
        );
        let pu = pu.endpoint_decision(&source(&["d"], 3)).unwrap();
        assert!(pu.current.is_none());
    }
}
