// shift.rs — Logical shift PU.
//
// Latches one input, then shifts one bit per tick in the declared
// direction; the result is readable once all steps have elapsed.
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
use crate::pu::{Instr, ProcessorUnit, ShiftDir, SignalIdx};
use crate::serial::{finish, Job};
use crate::time::{Tick, TimeConstraint, TimeInterval, UNBOUNDED};
use crate::value::Val;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftPorts {
    pub init: SignalIdx,
    pub work: SignalIdx,
    pub dir_right: SignalIdx,
    pub oe: SignalIdx,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shift<T: Val> {
    ports: ShiftPorts,
    remains: Vec<F<T>>,
    current: Option<Job<T>>,
    process: Process<T>,
}

fn shape_of<T: Val>(f: &F<T>) -> Option<(ShiftDir, u32, Vec<EndpointRole>)> {
    let (dir, steps, input, outs) = match f {
        F::ShiftL { steps, input, outs } => (ShiftDir::Left, *steps, input, outs),
        F::ShiftR { steps, input, outs } => (ShiftDir::Right, *steps, input, outs),
        _ => return None,
    };
    let pending = vec![
        EndpointRole::Target(input.clone()),
        EndpointRole::Source(outs.iter().cloned().collect()),
    ];
    Some((dir, steps, pending))
}

impl<T: Val> Shift<T> {
    pub fn new(ports: ShiftPorts) -> Self {
        Shift {
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

impl<T: Val> ProcessorUnit<T> for Shift<T> {
    fn try_bind(&self, f: &F<T>) -> Result<Self, String> {
        if shape_of(f).is_none() {
            return Err(format!("shift does not host {}", f.kind()));
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
                .filter_map(|f| shape_of(f).map(|(_, _, p)| p.into_iter().next().unwrap()))
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
                    shape_of(f)
                        .map(|(_, _, p)| self.option_for(0, &p[0]).admits(d))
                        .unwrap_or(false)
                })
                .ok_or_else(|| EngineError::OptionViolation {
                    detail: format!("shift offers nothing admitting {d}"),
                })?;
            let f = next.remains.remove(pos);
            let (_, _, pending) = shape_of(&f).unwrap();
            next.current = Some(Job::new(f, pending));
        } else {
            let job = next.current.as_ref().unwrap();
            let admitted = job
                .head()
                .map(|role| self.option_for(job.ready, role).admits(d))
                .unwrap_or(false);
            if !admitted {
                return Err(EngineError::OptionViolation {
                    detail: format!("shift in flight does not admit {d}"),
                });
            }
        }

        let job = next.current.as_mut().unwrap();
        let (dir, steps, _) = shape_of(&job.function).unwrap();
        let endpoint_step = next
            .process
            .add_step(d.at, StepInfo::Endpoint(d.role.clone()));
        job.steps.push(endpoint_step);

        match &d.role {
            EndpointRole::Target(_) => {
                let init_step = next
                    .process
                    .add_step(d.at, StepInfo::Instruction(Instr::ShiftInit));
                job.steps.push(init_step);
                if steps > 0 {
                    let work = TimeInterval::new(d.at.sup() + 1, d.at.sup() + steps as Tick);
                    let work_step = next
                        .process
                        .add_step(work, StepInfo::Instruction(Instr::ShiftWork { dir }));
                    job.steps.push(work_step);
                    job.note_time(&work);
                }
                job.ready = d.at.sup() + steps as Tick + 1;
            }
            EndpointRole::Source(_) => {
                let out_step = next
                    .process
                    .add_step(d.at, StepInfo::Instruction(Instr::ShiftOut));
                job.steps.push(out_step);
            }
        }
        job.note_time(&d.at);
        job.commit_role(&d.role);
        let horizon = job.end.unwrap_or(d.at.sup());
        next.process.update_tick(horizon.max(d.at.sup()) + 1);

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
            Some(Instr::ShiftInit) => vec![
                (p.init, true),
                (p.work, false),
                (p.dir_right, false),
                (p.oe, false),
            ],
            Some(Instr::ShiftWork { dir }) => vec![
                (p.init, false),
                (p.work, true),
                (p.dir_right, *dir == ShiftDir::Right),
                (p.oe, false),
            ],
            Some(Instr::ShiftOut) => vec![
                (p.init, false),
                (p.work, false),
                (p.dir_right, false),
                (p.oe, true),
            ],
            _ => vec![
                (p.init, false),
                (p.work, false),
                (p.dir_right, false),
                (p.oe, false),
            ],
        }
    }
}

impl<T: Val> Patch for Shift<T> {
    fn patch(&self, diff: &Diff) -> Self {
        Shift {
            ports: self.ports.clone(),
            remains: self.remains.patch(diff),
            current: self.current.as_ref().map(|j| j.patch(diff)),
            process: self.process.clone(),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
