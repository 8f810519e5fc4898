// spi.rs — Half-duplex SPI PU.
//
// Carries the algorithm's `send`/`receive` functions over an external
// serial link. Transfers are scheduled in ring order: the oldest queued
// send and the oldest queued receive are the only ones offered. The
// synchronization mode selects whether the computational cycle gates on
// the ready flag or drops data.
//
// Preconditions: decisions come from the current option set.
// Postconditions: commits return fresh snapshots.
// Failure modes: bind rejections carry the reason; foreign decisions are
//   `OptionViolation`.
// Side effects: none.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::endpoint::{EndpointDecision, EndpointOption, EndpointRole};
use crate::error::EngineError;
use crate::ir::{Diff, Lock, Patch, F};
use crate::process::{Process, StepInfo};
use crate::pu::{Instr, ProcessorUnit, SignalIdx};
use crate::serial::{finish, Job};
use crate::time::{Tick, TimeConstraint, TimeInterval, UNBOUNDED};
use crate::value::Val;

/// How the computational cycle interacts with the external link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoSync {
    /// The cycle gates on the transfer-ready flag.
    Sync,
    /// Transfers run free; stale data may be dropped.
    Async,
    /// No external counterpart; the link is looped back on board.
    OnBoard,
}

impl Default for IoSync {
    fn default() -> Self {
        IoSync::Sync
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiPorts {
    pub wr: SignalIdx,
    pub oe: SignalIdx,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spi<T: Val> {
    ports: SpiPorts,
    mode: IoSync,
    sends: VecDeque<Job<T>>,
    receives: VecDeque<Job<T>>,
    process: Process<T>,
}

impl<T: Val> Spi<T> {
    pub fn new(mode: IoSync, ports: SpiPorts) -> Self {
        Spi {
            ports,
            mode,
            sends: VecDeque::new(),
            receives: VecDeque::new(),
            process: Process::new(),
        }
    }

    pub fn mode(&self) -> IoSync {
        self.mode
    }

    fn option_for(&self, role: &EndpointRole) -> EndpointOption {
        EndpointOption::new(
            role.clone(),
            TimeConstraint::new(
                TimeInterval::new(self.process.next_tick(), UNBOUNDED),
                TimeInterval::new(1, UNBOUNDED),
            ),
        )
    }
}

impl<T: Val> ProcessorUnit<T> for Spi<T> {
    fn try_bind(&self, f: &F<T>) -> Result<Self, String> {
        let mut next = self.clone();
        match f {
            F::Send { input } => next.sends.push_back(Job::new(
                f.clone(),
                vec![EndpointRole::Target(input.clone())],
            )),
            F::Receive { outs } => next.receives.push_back(Job::new(
                f.clone(),
                vec![EndpointRole::Source(outs.iter().cloned().collect())],
            )),
            other => return Err(format!("spi does not host {}", other.kind())),
        }
        Ok(next)
    }

    fn endpoint_options(&self) -> Vec<EndpointOption> {
        // ring order: only the heads of the two queues are reachable
        self.sends
            .front()
            .iter()
            .chain(self.receives.front().iter())
            .filter_map(|job| job.head().map(|role| self.option_for(role)))
            .collect()
    }

    fn endpoint_decision(&self, d: &EndpointDecision) -> Result<Self, EngineError> {
        let mut next = self.clone();

        let (queue_is_send, admitted) = match &d.role {
            EndpointRole::Target(_) => (
                true,
                next.sends
                    .front()
                    .and_then(|j| j.head())
                    .map(|role| self.option_for(role).admits(d))
                    .unwrap_or(false),
            ),
            EndpointRole::Source(_) => (
                false,
                next.receives
                    .front()
                    .and_then(|j| j.head())
                    .map(|role| self.option_for(role).admits(d))
                    .unwrap_or(false),
            ),
        };
        if !admitted {
            return Err(EngineError::OptionViolation {
                detail: format!("spi ring head does not admit {d}"),
            });
        }

        let endpoint_step = next
            .process
            .add_step(d.at, StepInfo::Endpoint(d.role.clone()));
        let instr = if queue_is_send {
            Instr::SpiSend
        } else {
            Instr::SpiReceive
        };
        let instr_step = next.process.add_step(d.at, StepInfo::Instruction(instr));

        let job = if queue_is_send {
            next.sends.front_mut().unwrap()
        } else {
            next.receives.front_mut().unwrap()
        };
        job.steps.push(endpoint_step);
        job.steps.push(instr_step);
        job.note_time(&d.at);
        job.commit_role(&d.role);
        let done = job.is_done();
        next.process.update_tick(d.at.sup() + 1);

        if done {
            let job = if queue_is_send {
                next.sends.pop_front().unwrap()
            } else {
                next.receives.pop_front().unwrap()
            };
            finish(&mut next.process, &job);
        }
        Ok(next)
    }

    fn process(&self) -> &Process<T> {
        &self.process
    }

    fn locks(&self) -> Vec<Lock> {
        // sends have no outputs and receives no inputs: nothing to order
        Vec::new()
    }

    fn signals_at(&self, t: Tick) -> Vec<(SignalIdx, bool)> {
        let p = &self.ports;
        match self.process.instruction_at(t) {
            Some(Instr::SpiSend) => vec![(p.wr, true), (p.oe, false)],
            Some(Instr::SpiReceive) => vec![(p.wr, false), (p.oe, true)],
            _ => vec![(p.wr, false), (p.oe, false)],
        }
    }
}

impl<T: Val> Patch for Spi<T> {
    fn patch(&self, diff: &Diff) -> Self {
        let mut next = self.clone();
        next.sends = next.sends.iter().map(|j| j.patch(diff)).collect();
        next.receives = next.receives.iter().map(|j| j.patch(diff)).collect();
        next
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Int32;

    fn spi() -> Spi<Int32> {
        Spi::new(IoSync::Sync, SpiPorts { wr: 0, oe: 1 })
    }

    fn send(v: &str) -> F<Int32> {
        F::Send {
            input: v.to_string(),
        }
    }

    fn target(v: &str, t: Tick) -> EndpointDecision {
        EndpointDecision::new(EndpointRole::Target(v.to_string()), TimeInterval::singleton(t))
    }

    #[test]
    fn sends_schedule_in_ring_order() {
        let pu = spi()
            .try_bind(&send("a"))
            .unwrap()
            .try_bind(&send("b"))
            .unwrap();
        // only the oldest send is offered
        let opts = pu.endpoint_options();
        assert_eq!(opts.len(), 1);
        assert_eq!(opts[0].role, EndpointRole::Target("a".to_string()));

        // committing the head exposes the next one
        let pu = pu.endpoint_decision(&target("a", 0)).unwrap();
        let opts = pu.endpoint_options();
        assert_eq!(opts[0].role, EndpointRole::Target("b".to_string()));
    }

    #[test]
    fn out_of_ring_decision_rejected() {
        let pu = spi()
            .try_bind(&send("a"))
            .unwrap()
            .try_bind(&send("b"))
            .unwrap();
        assert!(matches!(
            pu.endpoint_decision(&target("b", 0)),
            Err(EngineError::OptionViolation { .. })
        ));
    }

    #[test]
    fn receive_publishes_external_word() {
        let f = F::Receive {
            outs: vec!["x".to_string()],
        };
        let pu = spi().try_bind(&f).unwrap();
        let d = EndpointDecision::new(
            EndpointRole::Source(["x".to_string()].into()),
            TimeInterval::singleton(2),
        );
        let pu = pu.endpoint_decision(&d).unwrap();
        assert_eq!(pu.process().instruction_at(2), Some(&Instr::SpiReceive));
        assert!(pu
            .process()
            .steps()
            .iter()
            .any(|s| matches!(&s.info, StepInfo::Function(f) if f.kind() == "receive")));
    }

    #[test]
    fn send_and_receive_queues_are_independent() {
        let pu = spi()
            .try_bind(&send("a"))
            .unwrap()
            .try_bind(&F::Receive {
                outs: vec!["x".to_string()],
            })
            .unwrap();
        assert_eq!(pu.endpoint_options().len(), 2);
    }
}
