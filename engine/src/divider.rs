// divider.rs — Pipelined divider PU.
//
// Serial two-input divider with a modeled pipeline depth and latency: a
// division started at tick `s` offers its quotient no earlier than
// `s + pipeline + latency`. Results stay valid for a fixed window; past it
// the data is rotten and the read is rejected, so a stale quotient can
// never silently reach the bus.
//
// Preconditions: decisions come from the current option set.
// Postconditions: commits return fresh snapshots.
// Failure modes: bind rejections carry the reason; foreign or rotten
//   decisions are `OptionViolation`.
// Side effects: none.

use crate::endpoint::{EndpointDecision, EndpointOption, EndpointRole};
use crate::error::EngineError;
use crate::ir::{Diff, Lock, Patch, F};
use crate::process::{Process, StepInfo};
use crate::pu::{ArgSel, DivSel, Instr, ProcessorUnit, SignalIdx};
use crate::serial::{finish, Job};
use crate::time::{Tick, TimeConstraint, TimeInterval, UNBOUNDED};
use crate::value::Val;

/// Ticks a finished result stays readable before it rots.
const ROTTEN_AFTER: Tick = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DivPorts {
    pub wr: SignalIdx,
    pub wr_sel: SignalIdx,
    pub oe: SignalIdx,
    pub oe_sel: SignalIdx,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Divider<T: Val> {
    ports: DivPorts,
    pipeline: Tick,
    latency: Tick,
    remains: Vec<F<T>>,
    current: Option<Job<T>>,
    process: Process<T>,
}

fn pending_of<T: Val>(f: &F<T>) -> Option<Vec<EndpointRole>> {
    match f {
        F::Div {
            numer,
            denom,
            quotient,
            remainder,
        } => {
            let mut roles = vec![
                EndpointRole::Target(numer.clone()),
                EndpointRole::Target(denom.clone()),
                EndpointRole::Source(quotient.iter().cloned().collect()),
            ];
            if !remainder.is_empty() {
                roles.push(EndpointRole::Source(remainder.iter().cloned().collect()));
            }
            Some(roles)
        }
        _ => None,
    }
}

impl<T: Val> Divider<T> {
    pub fn new(pipeline: Tick, latency: Tick, ports: DivPorts) -> Self {
        Divider {
            ports,
            pipeline,
            latency,
            remains: Vec::new(),
            current: None,
            process: Process::new(),
        }
    }

    fn option_for(&self, job: Option<&Job<T>>, role: &EndpointRole) -> EndpointOption {
        let at = match role {
            EndpointRole::Target(_) => TimeConstraint::new(
                TimeInterval::new(self.process.next_tick(), UNBOUNDED),
                TimeInterval::new(1, UNBOUNDED),
            ),
            EndpointRole::Source(_) => {
                let ready = job.map(|j| j.ready).unwrap_or(0);
                let from = self.process.next_tick().max(ready);
                TimeConstraint::new(
                    TimeInterval::new(from, ready + ROTTEN_AFTER),
                    TimeInterval::new(1, 1),
                )
            }
        };
        EndpointOption::new(role.clone(), at)
    }

    /// Which result port a source decision reads.
    fn out_sel(job: &Job<T>, d: &EndpointDecision) -> DivSel {
        if let (F::Div { quotient, .. }, EndpointRole::Source(vs)) = (&job.function, &d.role) {
            if vs.iter().all(|v| quotient.contains(v)) {
                return DivSel::Quotient;
            }
        }
        DivSel::Remainder
    }
}

impl<T: Val> ProcessorUnit<T> for Divider<T> {
    fn try_bind(&self, f: &F<T>) -> Result<Self, String> {
        if pending_of(f).is_none() {
            return Err(format!("divider does not host {}", f.kind()));
        }
        let mut next = self.clone();
        next.remains.push(f.clone());
        Ok(next)
    }

    fn endpoint_options(&self) -> Vec<EndpointOption> {
        match &self.current {
            Some(job) => job
                .head()
                .map(|role| vec![self.option_for(Some(job), role)])
                .unwrap_or_default(),
            None => self
                .remains
                .iter()
                .filter_map(|f| pending_of(f)?.into_iter().next())
                .map(|role| self.option_for(None, &role))
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
                        .map(|role| self.option_for(None, &role).admits(d))
                        .unwrap_or(false)
                })
                .ok_or_else(|| EngineError::OptionViolation {
                    detail: format!("divider offers nothing admitting {d}"),
                })?;
            let f = next.remains.remove(pos);
            let pending = pending_of(&f).unwrap();
            next.current = Some(Job::new(f, pending));
        } else {
            let job = next.current.as_ref().unwrap();
            let admitted = job
                .head()
                .map(|role| self.option_for(Some(job), role).admits(d))
                .unwrap_or(false);
            if !admitted {
                return Err(EngineError::OptionViolation {
                    detail: format!("divider in flight does not admit {d}"),
                });
            }
        }

        let job = next.current.as_mut().unwrap();
        let endpoint_step = next
            .process
            .add_step(d.at, StepInfo::Endpoint(d.role.clone()));
        let instr = match &d.role {
            EndpointRole::Target(_) => Instr::DivLoad {
                sel: if job.taken == 0 {
                    ArgSel::First
                } else {
                    ArgSel::Second
                },
            },
            EndpointRole::Source(_) => Instr::DivOut {
                sel: Self::out_sel(job, d),
            },
        };
        let instr_step = next.process.add_step(d.at, StepInfo::Instruction(instr));
        job.steps.push(endpoint_step);
        job.steps.push(instr_step);
        job.note_time(&d.at);
        job.commit_role(&d.role);
        if d.role.is_target() {
            // the division is started by its first latched argument
            let start = job.start.unwrap_or(d.at.inf());
            job.ready = start + self.pipeline + self.latency;
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
            Some(Instr::DivLoad { sel }) => vec![
                (p.wr, true),
                (p.wr_sel, *sel == ArgSel::Second),
                (p.oe, false),
                (p.oe_sel, false),
            ],
            Some(Instr::DivOut { sel }) => vec![
                (p.wr, false),
                (p.wr_sel, false),
                (p.oe, true),
                (p.oe_sel, *sel == DivSel::Remainder),
            ],
            _ => vec![
                (p.wr, false),
                (p.wr_sel, false),
                (p.oe, false),
                (p.oe_sel, false),
            ],
        }
    }
}

impl<T: Val> Patch for Divider<T> {
    fn patch(&self, diff: &Diff) -> Self {
        Divider {
            ports: self.ports.clone(),
            pipeline: self.pipeline,
            latency: self.latency,
            remains: self.remains.patch(diff),
            current: self.current.as_ref().map(|j| j.patch(diff)),
            process: self.process.clone(),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
