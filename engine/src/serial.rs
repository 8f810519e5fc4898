// serial.rs — Shared job bookkeeping for single-function-in-flight PUs.
//
// The accumulator, multiplier, divider, shift and SPI units all follow the
// same serial pattern: bound functions queue in `remains`; the first
// endpoint promotes one to `current`; input endpoints are consumed in the
// declared order; the last endpoint closes the job with a covering
// `Function` step related to every contributing step.
//
// Preconditions: `pending` roles are consumed strictly front to back.
// Postconditions: a finished job leaves a `Function` step spanning
//   [first endpoint start, last endpoint end].
// Failure modes: none here; admission and violations are the owning PU's
//   concern.
// Side effects: none.

use crate::endpoint::EndpointRole;
use crate::ir::{Diff, Lock, Patch, F};
use crate::process::{Process, StepId, StepInfo};
use crate::time::{Tick, TimeInterval};
use crate::value::Val;

/// One function in flight on a serial PU.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Job<T: Val> {
    pub function: F<T>,
    /// Endpoint actions not yet committed, front to back.
    pub pending: Vec<EndpointRole>,
    /// Start of the earliest committed endpoint.
    pub start: Option<Tick>,
    /// End of the latest committed endpoint.
    pub end: Option<Tick>,
    /// Earliest tick the next output endpoint may occupy.
    pub ready: Tick,
    /// Inputs already latched (position into the declared order).
    pub taken: usize,
    /// Steps contributed so far, for the covering relation.
    pub steps: Vec<StepId>,
}

impl<T: Val> Job<T> {
    pub fn new(function: F<T>, pending: Vec<EndpointRole>) -> Self {
        Job {
            function,
            pending,
            start: None,
            end: None,
            ready: 0,
            taken: 0,
            steps: Vec::new(),
        }
    }

    pub fn head(&self) -> Option<&EndpointRole> {
        self.pending.first()
    }

    pub fn is_done(&self) -> bool {
        self.pending.is_empty()
    }

    /// Note a committed endpoint placement.
    pub fn note_time(&mut self, at: &TimeInterval) {
        self.start = Some(self.start.map_or(at.inf(), |s| s.min(at.inf())));
        self.end = Some(self.end.map_or(at.sup(), |e| e.max(at.sup())));
    }

    /// Consume the committed part of the head role. A target pops; a source
    /// sheds the chosen subset and pops once empty.
    pub fn commit_role(&mut self, decided: &EndpointRole) {
        match (self.pending.first_mut(), decided) {
            (Some(EndpointRole::Target(_)), EndpointRole::Target(_)) => {
                self.pending.remove(0);
                self.taken += 1;
            }
            (Some(EndpointRole::Source(offered)), EndpointRole::Source(chosen)) => {
                for v in chosen {
                    offered.remove(v);
                }
                if offered.is_empty() {
                    self.pending.remove(0);
                }
            }
            _ => unreachable!("commit_role called with a role the head does not admit"),
        }
    }

    /// Pending source variables are locked by every pending target that
    /// precedes them in the declared order.
    pub fn locks(&self) -> Vec<Lock> {
        let mut locks = Vec::new();
        for (i, role) in self.pending.iter().enumerate() {
            if let EndpointRole::Source(vs) = role {
                for earlier in &self.pending[..i] {
                    if let EndpointRole::Target(by) = earlier {
                        for locked in vs {
                            locks.push(Lock {
                                locked: locked.clone(),
                                by: by.clone(),
                            });
                        }
                    }
                }
            }
        }
        locks
    }
}

impl<T: Val> Patch for Job<T> {
    fn patch(&self, diff: &Diff) -> Self {
        Job {
            function: self.function.patch(diff),
            pending: self.pending.patch(diff),
            ..self.clone()
        }
    }
}

/// Close a finished job: append the covering `Function` step and relate it
/// to every step the job contributed.
pub(crate) fn finish<T: Val>(process: &mut Process<T>, job: &Job<T>) {
    let (Some(start), Some(end)) = (job.start, job.end) else {
        return;
    };
    let fun_step = process.add_step(
        TimeInterval::new(start, end),
        StepInfo::Function(job.function.clone()),
    );
    for &low in &job.steps {
        process.add_relation(fun_step, low);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Int32;
    use std::collections::BTreeSet;

    fn job() -> Job<Int32> {
        let f = F::Add {
            a: "a".to_string(),
            b: "b".to_string(),
            outs: vec!["c".to_string()],
        };
        let pending = vec![
            EndpointRole::Target("a".to_string()),
            EndpointRole::Target("b".to_string()),
            EndpointRole::Source(BTreeSet::from(["c".to_string()])),
        ];
        Job::new(f, pending)
    }

    #[test]
    fn targets_pop_in_order() {
        let mut j = job();
        j.commit_role(&EndpointRole::Target("a".to_string()));
        assert_eq!(j.taken, 1);
        assert_eq!(j.head(), Some(&EndpointRole::Target("b".to_string())));
    }

    #[test]
    fn source_sheds_subsets() {
        let f = F::Receive {
            outs: vec!["x".to_string(), "y".to_string()],
        };
        let mut j: Job<Int32> = Job::new(
            f,
            vec![EndpointRole::Source(BTreeSet::from([
                "x".to_string(),
                "y".to_string(),
            ]))],
        );
        j.commit_role(&EndpointRole::Source(BTreeSet::from(["x".to_string()])));
        assert!(!j.is_done());
        j.commit_role(&EndpointRole::Source(BTreeSet::from(["y".to_string()])));
        assert!(j.is_done());
    }

    #[test]
    fn outputs_locked_by_waiting_inputs() {
        let j = job();
        let locks = j.locks();
        assert!(locks.contains(&Lock {
            locked: "c".to_string(),
            by: "a".to_string()
        }));
        assert!(locks.contains(&Lock {
            locked: "c".to_string(),
            by: "b".to_string()
        }));
    }

    #[test]
    fn covering_step_relates_contributions() {
        let mut p: Process<Int32> = Process::new();
        let mut j = job();
        j.steps.push(p.add_instant(0, StepInfo::Cad("t a".to_string())));
        j.steps.push(p.add_instant(2, StepInfo::Cad("t b".to_string())));
        j.note_time(&TimeInterval::singleton(0));
        j.note_time(&TimeInterval::singleton(2));
        finish(&mut p, &j);
        let fun = p.steps().last().unwrap();
        assert_eq!(fun.time, TimeInterval::new(0, 2));
        assert_eq!(p.relations().len(), 2);
    }
}
