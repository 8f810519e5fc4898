// multiplier.rs — Multiplier PU.
//
// Serial two-input multiplier: latch the first argument, latch the second,
// publish the product from the next tick.
//
// Preconditions: decisions come from the current option set.
// Postconditions: commits return fresh snapshots.
// Failure modes: bind rejections carry the reason; foreign decisions are
//   `OptionViolation`.
// Side effects: none.

use crate::endpoint::{EndpointDecision, EndpointOption, EndpointRole};
use crate::error::EngineError;
use crate::ir::{Diff, Lock, Patch, F};
use crate::process::{Process, StepInfo};
use crate::pu::{ArgSel, Instr, ProcessorUnit, SignalIdx};
use crate::serial::{finish, Job};
use crate::time::{Tick, TimeConstraint, TimeInterval, UNBOUNDED};
use crate::value::Val;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulPorts {
    pub wr: SignalIdx,
    pub sel: SignalIdx,
    pub oe: SignalIdx,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Multiplier<T: Val> {
    ports: MulPorts,
    remains: Vec<F<T>>,
    current: Option<Job<T>>,
    process: Process<T>,
}

fn pending_of<T: Val>(f: &F<T>) -> Option<Vec<EndpointRole>> {
    match f {
        F::Mul { a, b, outs } => Some(vec![
            EndpointRole::Target(a.clone()),
            EndpointRole::Target(b.clone()),
            EndpointRole::Source(outs.iter().cloned().collect()),
        ]),
        _ => None,
    }
}

impl<T: Val> Multiplier<T> {
    pub fn new(ports: MulPorts) -> Self {
        Multiplier {
            ports,
            remains: Vec::new(),
            current: None,
            process: Process::new(),
        }
    }

    fn option_for(&self, ready: Tick, role: &EndpointRole) -> EndpointOption {
        let from = match role {
            EndpointRole::Target(_) => self.process.next_tick(),
            EndpointRole::Source(_) => self.process.next_tick().max(ready),
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

impl<T: Val> ProcessorUnit<T> for Multiplier<T> {
    fn try_bind(&self, f: &F<T>) -> Result<Self, String> {
        if pending_of(f).is_none() {
            return Err(format!("multiplier does not host {}", f.kind()));
        }
        let mut next = self.clone();
        next.remains.push(f.clone());
        Ok(next)
    }

    fn endpoint_options(&self) -> Vec<EndpointOption> {
        match &self.current {
            Some(job) => job
                .head()
                .map(|role| vec![self.option_for(job.ready, role)])
                .unwrap_or_default(),
            None => self
                .remains
                .iter()
                .filter_map(|f| pending_of(f)?.into_iter().next())
                .map(|role| self.option_for(0, &role))
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
                        .map(|role| self.option_for(0, &role).admits(d))
                        .unwrap_or(false)
                })
                .ok_or_else(|| EngineError::OptionViolation {
                    detail: format!("multiplier offers nothing admitting {d}"),
                })?;
            let f = next.remains.remove(pos);
            let pending = pending_of(&f).unwrap();
            next.current = Some(Job::new(f, pending));
        } else {
            let job = next.current.as_ref().unwrap();
            let admitted = job
                .head()
                .map(|role| self.option_for(job.ready, role).admits(d))
                .unwrap_or(false);
            if !admitted {
                return Err(EngineError::OptionViolation {
                    detail: format!("multiplier in flight does not admit {d}"),
                });
            }
        }

        let job = next.current.as_mut().unwrap();
        let endpoint_step = next
            .process
            .add_step(d.at, StepInfo::Endpoint(d.role.clone()));
        let instr = match &d.role {
            EndpointRole::Target(_) => Instr::MulLoad {
                sel: if job.taken == 0 {
                    ArgSel::First
                } else {
                    ArgSel::Second
                },
            },
            EndpointRole::Source(_) => Instr::MulOut,
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
            Some(Instr::MulLoad { sel }) => vec![
                (p.wr, true),
                (p.sel, *sel == ArgSel::Second),
                (p.oe, false),
            ],
            Some(Instr::MulOut) => vec![(p.wr, false), (p.sel, false), (p.oe, true)],
            _ => vec![(p.wr, false), (p.sel, false), (p.oe, false)],
        }
    }
}

impl<T: Val> Patch for Multiplier<T> {
    fn patch(&self, diff: &Diff) -> Self {
        Multiplier {
            ports: self.ports.clone(),
            remains: self.remains.patch(diff),
            current: self.current.as_ref().map(|j| j.patch(diff)),
            process: self.process.clone(),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
