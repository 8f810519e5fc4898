// fram.rs — Framed memory PU.
//
// A fixed array of cells, each with three reservation slots: `input`
// (externally written, read onto the bus), `current` (a register in
// flight) and `output` (written from the bus, externally visible). Loops
// and constants claim whole cells; regs are admitted against an accounting
// invariant and pick their cell at first-endpoint time.
//
// A `Source` endpoint emits `load(addr)` one tick before the endpoint
// (address setup) and clears the cell's `last_write`; a `Target` endpoint
// emits `save(addr)` during the endpoint and sets it. A set `last_write`
// marks an unread value (saved, or carried since reset for cells with an
// initial word): such a cell offers no target until a load takes the
// value out, so a save never clobbers unread data.
//
// Preconditions: decisions come from the current option set.
// Postconditions: every commit produces a fresh snapshot; the covering
//   `Function` step appears when the last endpoint of a function commits.
// Failure modes: bind rejections carry the reason; foreign decisions are
//   `OptionViolation`.
// Side effects: none.

use std::collections::BTreeMap;

use crate::endpoint::{EndpointDecision, EndpointOption, EndpointRole};
use crate::error::EngineError;
use crate::ir::{Diff, Lock, Patch, F};
use crate::process::{Process, StepId, StepInfo};
use crate::pu::{Instr, ProcessorUnit, SignalIdx};
use crate::serial::Job;
use crate::time::{Tick, TimeConstraint, TimeInterval, UNBOUNDED};
use crate::value::Val;

// ── Ports ───────────────────────────────────────────────────────────────────

/// Control-wire assignment on the shared bus. `addr[i]` carries address
/// bit `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramPorts {
    pub oe: SignalIdx,
    pub wr: SignalIdx,
    pub addr: Vec<SignalIdx>,
}

// ── Cells ───────────────────────────────────────────────────────────────────

/// Tick of the write that loads initial values: the reset no-op.
const RESET_WRITE: Tick = -1;

#[derive(Debug, Clone, PartialEq)]
enum Slot<T: Val> {
    NotUsed,
    For(Job<T>),
    UsedOrBlocked,
}

impl<T: Val> Slot<T> {
    fn is_free(&self) -> bool {
        matches!(self, Slot::NotUsed)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Cell<T: Val> {
    input: Slot<T>,
    current: Option<Job<T>>,
    output: Slot<T>,
    initial: Option<T>,
    /// Tick of the latest unread write; `None` once a load took it out.
    last_write: Option<Tick>,
}

impl<T: Val> Cell<T> {
    fn free() -> Self {
        Cell {
            input: Slot::NotUsed,
            current: None,
            output: Slot::NotUsed,
            initial: None,
            last_write: None,
        }
    }

    fn fully_free(&self) -> bool {
        self.input.is_free() && self.current.is_none() && self.output.is_free()
            && self.initial.is_none()
    }

    /// A reg can claim this cell: register path free, output not already
    /// used or blocked. The input slot is an independent reservation and
    /// does not affect admission.
    fn reg_allocatable(&self) -> bool {
        self.current.is_none() && self.output.is_free()
    }
}

// ── The PU ──────────────────────────────────────────────────────────────────

/// Record of a finished half of a two-slot (loop) function, waiting for
/// its partner before the covering step is emitted.
#[derive(Debug, Clone, PartialEq)]
struct HalfDone {
    steps: Vec<StepId>,
    start: Tick,
    end: Tick,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fram<T: Val> {
    ports: FramPorts,
    cells: Vec<Cell<T>>,
    remain_regs: Vec<Job<T>>,
    process: Process<T>,
    half_done: BTreeMap<String, HalfDone>,
}

impl<T: Val> Fram<T> {
    pub fn new(size: usize, ports: FramPorts) -> Self {
        Fram {
            ports,
            cells: (0..size).map(|_| Cell::free()).collect(),
            remain_regs: Vec::new(),
            process: Process::new(),
            half_done: BTreeMap::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.cells.len()
    }

    /// Initial cell values for simulation and testbench emission.
    pub fn initial_values(&self) -> Vec<Option<T>> {
        self.cells.iter().map(|c| c.initial).collect()
    }

    fn reg_capacity(&self) -> usize {
        self.cells.iter().filter(|c| c.reg_allocatable()).count()
    }

    /// First cell a waiting reg may claim right now: allocatable and
    /// write-ready (no unread value to clobber).
    fn reg_claim_cell(&self) -> Option<usize> {
        self.cells
            .iter()
            .position(|c| c.reg_allocatable() && c.last_write.is_none())
    }

    /// Whether a write may land. A cell whose `last_write` is set holds a
    /// value nothing has read yet (a committed save, or the value carried
    /// since reset); it refuses new targets until a load takes it out. A
    /// waiting reg (`addr` None) needs a write-ready cell to claim.
    fn write_ready(&self, addr: Option<usize>) -> bool {
        match addr {
            Some(addr) => self.cells[addr].last_write.is_none(),
            None => self.reg_claim_cell().is_some(),
        }
    }

    /// Earliest start for a target endpoint.
    fn target_from(&self) -> Tick {
        self.process.next_tick().max(0)
    }

    /// Earliest start for a source endpoint: `load` occupies the tick
    /// before it, which must not collide with scheduled activity.
    fn source_from(&self) -> Tick {
        (self.process.next_tick() + 1).max(1)
    }

    fn option_for(&self, role: &EndpointRole) -> EndpointOption {
        let from = match role {
            EndpointRole::Target(_) => self.target_from(),
            EndpointRole::Source(_) => self.source_from(),
        };
        EndpointOption::new(
            role.clone(),
            TimeConstraint::new(
                TimeInterval::new(from, UNBOUNDED),
                TimeInterval::new(1, UNBOUNDED),
            ),
        )
    }

    /// Split a bound loop into its begin/end pseudo-functions in place.
    /// Only possible while both halves are still unscheduled; a started
    /// loop keeps its identity so its covering step stays whole.
    pub fn break_loop(&self, lp: &F<T>) -> Option<Self> {
        let (begin, end) = crate::ir::break_loop_parts(lp)?;
        let mut next = self.clone();
        let mut split_input = false;
        let mut split_output = false;
        for cell in next.cells.iter_mut() {
            if let Slot::For(job) = &mut cell.input {
                if job.function == *lp && job.steps.is_empty() {
                    job.function = begin.clone();
                    split_input = true;
                }
            }
            if let Slot::For(job) = &mut cell.output {
                if job.function == *lp && job.steps.is_empty() {
                    job.function = end.clone();
                    split_output = true;
                }
            }
        }
        (split_input && split_output).then_some(next)
    }

    // ── Decision plumbing ───────────────────────────────────────────────

    /// All jobs currently able to act, with the cell they live in (`None`
    /// for still-unallocated regs), in deterministic scan order.
    fn active_jobs(&self) -> Vec<(Option<usize>, &Job<T>)> {
        let mut jobs = Vec::new();
        for (addr, cell) in self.cells.iter().enumerate() {
            if let Slot::For(job) = &cell.input {
                jobs.push((Some(addr), job));
            }
            if let Some(job) = &cell.current {
                jobs.push((Some(addr), job));
            }
            if let Slot::For(job) = &cell.output {
                jobs.push((Some(addr), job));
            }
        }
        for job in &self.remain_regs {
            jobs.push((None, job));
        }
        jobs
    }

    fn commit(
        &mut self,
        addr: usize,
        place: JobPlace,
        d: &EndpointDecision,
    ) -> Result<(), EngineError> {
        let endpoint_step = self
            .process
            .add_step(d.at, StepInfo::Endpoint(d.role.clone()));
        let instr_step = match &d.role {
            EndpointRole::Target(_) => {
                self.cells[addr].last_write = Some(d.at.sup());
                self.process
                    .add_step(d.at, StepInfo::Instruction(Instr::FramSave { addr }))
            }
            EndpointRole::Source(_) => {
                self.cells[addr].last_write = None;
                self.process.add_instant(
                    d.at.inf() - 1,
                    StepInfo::Instruction(Instr::FramLoad { addr }),
                )
            }
        };

        let job = match place {
            JobPlace::Input => match &mut self.cells[addr].input {
                Slot::For(job) => job,
                _ => unreachable!(),
            },
            JobPlace::Current => self.cells[addr].current.as_mut().unwrap(),
            JobPlace::Output => match &mut self.cells[addr].output {
                Slot::For(job) => job,
                _ => unreachable!(),
            },
        };
        job.steps.push(endpoint_step);
        job.steps.push(instr_step);
        job.note_time(&d.at);
        job.commit_role(&d.role);
        let done = job.is_done();
        self.process.update_tick(d.at.sup() + 1);

        if done {
            self.finish_job(addr, place);
        }
        Ok(())
    }

    fn finish_job(&mut self, addr: usize, place: JobPlace) {
        let job = match place {
            JobPlace::Input => match std::mem::replace(&mut self.cells[addr].input, Slot::UsedOrBlocked)
            {
                Slot::For(job) => job,
                _ => unreachable!(),
            },
            JobPlace::Current => self.cells[addr].current.take().unwrap(),
            JobPlace::Output => match std::mem::replace(&mut self.cells[addr].output, Slot::UsedOrBlocked)
            {
                Slot::For(job) => job,
                _ => unreachable!(),
            },
        };
        let (start, end) = (job.start.unwrap(), job.end.unwrap());

        // An unbroken loop completes only when both of its slots have; the
        // first finished half waits for the partner.
        if matches!(job.function, F::Loop { .. }) {
            let key = job.function.to_string();
            let partner_pending = {
                let cell = &self.cells[addr];
                match place {
                    JobPlace::Input => {
                        matches!(&cell.output, Slot::For(j) if j.function == job.function)
                    }
                    JobPlace::Output => {
                        matches!(&cell.input, Slot::For(j) if j.function == job.function)
                    }
                    JobPlace::Current => false,
                }
            };
            if partner_pending {
                self.half_done.insert(
                    key,
                    HalfDone {
                        steps: job.steps.clone(),
                        start,
                        end,
                    },
                );
                return;
            }
            if let Some(half) = self.half_done.remove(&key) {
                let fun_step = self.process.add_step(
                    TimeInterval::new(half.start.min(start), half.end.max(end)),
                    StepInfo::Function(job.function.clone()),
                );
                for &low in half.steps.iter().chain(job.steps.iter()) {
                    self.process.add_relation(fun_step, low);
                }
                return;
            }
        }

        let fun_step = self.process.add_step(
            TimeInterval::new(start, end),
            StepInfo::Function(job.function.clone()),
        );
        for &low in &job.steps {
            self.process.add_relation(fun_step, low);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobPlace {
    Input,
    Current,
    Output,
}

// ── Contract ────────────────────────────────────────────────────────────────

impl<T: Val> ProcessorUnit<T> for Fram<T> {
    fn try_bind(&self, f: &F<T>) -> Result<Self, String> {
        let mut next = self.clone();
        match f {
            F::FramInput { addr, outs } => {
                let cell = next
                    .cells
                    .get_mut(*addr)
                    .ok_or_else(|| format!("no cell {addr}"))?;
                if !cell.input.is_free() {
                    return Err(format!("cell {addr} input slot is taken"));
                }
                cell.last_write = Some(RESET_WRITE);
                cell.input = Slot::For(Job::new(
                    f.clone(),
                    vec![EndpointRole::Source(outs.iter().cloned().collect())],
                ));
            }
            F::FramOutput { addr, input } => {
                let cell = next
                    .cells
                    .get_mut(*addr)
                    .ok_or_else(|| format!("no cell {addr}"))?;
                if !cell.output.is_free() {
                    return Err(format!("cell {addr} output slot is taken"));
                }
                cell.output = Slot::For(Job::new(
                    f.clone(),
                    vec![EndpointRole::Target(input.clone())],
                ));
            }
            F::Reg { input, outs } => {
                if next.remain_regs.len() + 1 > next.reg_capacity() {
                    return Err("no cell left for another reg".to_string());
                }
                next.remain_regs.push(Job::new(
                    f.clone(),
                    vec![
                        EndpointRole::Target(input.clone()),
                        EndpointRole::Source(outs.iter().cloned().collect()),
                    ],
                ));
            }
            F::Loop { init, input, outs } => {
                let addr = next
                    .cells
                    .iter()
                    .position(|c| c.fully_free())
                    .ok_or_else(|| "no fully free cell for a loop".to_string())?;
                let cell = &mut next.cells[addr];
                cell.initial = Some(*init);
                cell.last_write = Some(RESET_WRITE);
                cell.input = Slot::For(Job::new(
                    f.clone(),
                    vec![EndpointRole::Source(outs.iter().cloned().collect())],
                ));
                cell.output = Slot::For(Job::new(
                    f.clone(),
                    vec![EndpointRole::Target(input.clone())],
                ));
            }
            F::Constant { value, outs } => {
                let addr = next
                    .cells
                    .iter()
                    .position(|c| c.fully_free())
                    .ok_or_else(|| "no fully free cell for a constant".to_string())?;
                let cell = &mut next.cells[addr];
                cell.initial = Some(*value);
                cell.last_write = Some(RESET_WRITE);
                cell.input = Slot::UsedOrBlocked;
                cell.output = Slot::UsedOrBlocked;
                cell.current = Some(Job::new(
                    f.clone(),
                    vec![EndpointRole::Source(outs.iter().cloned().collect())],
                ));
            }
            other => return Err(format!("framed memory does not host {}", other.kind())),
        }
        Ok(next)
    }

    fn endpoint_options(&self) -> Vec<EndpointOption> {
        self.active_jobs()
            .into_iter()
            .filter_map(|(addr, job)| {
                let role = job.head()?;
                if role.is_target() && !self.write_ready(addr) {
                    return None;
                }
                Some(self.option_for(role))
            })
            .collect()
    }

    fn endpoint_decision(&self, d: &EndpointDecision) -> Result<Self, EngineError> {
        let mut next = self.clone();

        // Locate the acting job: cells in address order, then waiting regs.
        for addr in 0..next.cells.len() {
            for place in [JobPlace::Input, JobPlace::Current, JobPlace::Output] {
                let job = match place {
                    JobPlace::Input => match &next.cells[addr].input {
                        Slot::For(job) => Some(job),
                        _ => None,
                    },
                    JobPlace::Current => next.cells[addr].current.as_ref(),
                    JobPlace::Output => match &next.cells[addr].output {
                        Slot::For(job) => Some(job),
                        _ => None,
                    },
                };
                let admitted = job
                    .and_then(|j| j.head())
                    .map(|role| {
                        let ready = !role.is_target() || self.write_ready(Some(addr));
                        ready && self.option_for(role).admits(d)
                    })
                    .unwrap_or(false);
                if admitted {
                    next.commit(addr, place, d)?;
                    return Ok(next);
                }
            }
        }

        // A waiting reg claims a write-ready cell on its first endpoint.
        let reg_pos = next.remain_regs.iter().position(|j| {
            j.head()
                .map(|role| self.option_for(role).admits(d))
                .unwrap_or(false)
        });
        if let (Some(pos), Some(addr)) = (reg_pos, next.reg_claim_cell()) {
            let job = next.remain_regs.remove(pos);
            if next.cells[addr].input.is_free() {
                next.cells[addr].input = Slot::UsedOrBlocked;
            }
            next.cells[addr].current = Some(job);
            next.commit(addr, JobPlace::Current, d)?;
            return Ok(next);
        }

        Err(EngineError::OptionViolation {
            detail: format!("framed memory offers nothing admitting {d}"),
        })
    }

    fn process(&self) -> &Process<T> {
        &self.process
    }

    fn locks(&self) -> Vec<Lock> {
        self.active_jobs()
            .into_iter()
            .flat_map(|(_, job)| job.locks())
            .collect()
    }

    fn signals_at(&self, t: Tick) -> Vec<(SignalIdx, bool)> {
        match self.process.instruction_at(t) {
            Some(Instr::FramLoad { addr }) => self.addr_word(*addr, true, false),
            Some(Instr::FramSave { addr }) => self.addr_word(*addr, false, true),
            _ => vec![(self.ports.oe, false), (self.ports.wr, false)],
        }
    }
}

impl<T: Val> Fram<T> {
    fn addr_word(&self, addr: usize, oe: bool, wr: bool) -> Vec<(SignalIdx, bool)> {
        let mut word = vec![(self.ports.oe, oe), (self.ports.wr, wr)];
        for (bit, &idx) in self.ports.addr.iter().enumerate() {
            word.push((idx, (addr >> bit) & 1 == 1));
        }
        word
    }
}

impl<T: Val> Patch for Fram<T> {
    fn patch(&self, diff: &Diff) -> Self {
        let mut next = self.clone();
        for cell in next.cells.iter_mut() {
            if let Slot::For(job) = &mut cell.input {
                *job = job.patch(diff);
            }
            if let Some(job) = &mut cell.current {
                *job = job.patch(diff);
            }
            if let Slot::For(job) = &mut cell.output {
                *job = job.patch(diff);
            }
        }
        next.remain_regs = next.remain_regs.patch(diff);
        next
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Int32;

    fn fram(size: usize) -> Fram<Int32> {
        Fram::new(
            size,
            FramPorts {
                oe: 0,
                wr: 1,
                addr: vec![2, 3],
            },
        )
    }

    fn lp(init: i64, input: &str, outs: &[&str]) -> F<Int32> {
        F::Loop {
            init: Int32::from_int(init),
            input: input.to_string(),
            outs: outs.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn source_of(vs: &[&str], at: TimeInterval) -> EndpointDecision {
        EndpointDecision::new(
            EndpointRole::Source(vs.iter().map(|s| s.to_string()).collect()),
            at,
        )
    }

    fn target_of(v: &str, at: TimeInterval) -> EndpointDecision {
        EndpointDecision::new(EndpointRole::Target(v.to_string()), at)
    }

    #[test]
    fn loop_claims_whole_cell() {
        let pu = fram(1).try_bind(&lp(0, "b", &["a"])).unwrap();
        // the single cell is now taken on both ends
        assert!(pu.try_bind(&lp(1, "d", &["c"])).is_err());
        assert_eq!(pu.initial_values(), vec![Some(Int32::from_int(0))]);
    }

    #[test]
    fn loop_offers_source_then_accepts_target() {
        let pu = fram(2).try_bind(&lp(0, "b", &["a"])).unwrap();
        // the initial value is unread: only the source side is offered
        let opts = pu.endpoint_options();
        assert_eq!(opts.len(), 1);
        assert!(opts[0].role.is_source());

        // publish a at [1,1]: load(0) lands on tick 0
        let pu = pu
            .endpoint_decision(&source_of(&["a"], TimeInterval::singleton(1)))
            .unwrap();
        assert_eq!(
            pu.process().instruction_at(0),
            Some(&Instr::FramLoad { addr: 0 })
        );
        assert_eq!(pu.process().next_tick(), 2);

        // the load opened the write side
        let opts = pu.endpoint_options();
        assert_eq!(opts.len(), 1);
        assert!(opts[0].role.is_target());

        // write b back at [3,3]
        let pu = pu
            .endpoint_decision(&target_of("b", TimeInterval::singleton(3)))
            .unwrap();
        assert_eq!(
            pu.process().instruction_at(3),
            Some(&Instr::FramSave { addr: 0 })
        );
        // both halves done: a covering Function step exists
        assert!(pu
            .process()
            .steps()
            .iter()
            .any(|s| matches!(&s.info, StepInfo::Function(f) if f.kind() == "loop")));
    }

    #[test]
    fn source_decision_must_lie_in_options() {
        let pu = fram(1).try_bind(&lp(0, "b", &["a"])).unwrap();
        // tick 0 is impossible for a source: load would land at −1
        let err = pu.endpoint_decision(&source_of(&["a"], TimeInterval::singleton(0)));
        assert!(matches!(err, Err(EngineError::OptionViolation { .. })));
    }

    #[test]
    fn reg_admission_is_capacity_gated() {
        let pu = fram(2);
        let reg = |i: usize| F::Reg {
            input: format!("x{i}"),
            outs: vec![format!("y{i}")],
        };
        let pu = pu.try_bind(&reg(0)).unwrap();
        let pu = pu.try_bind(&reg(1)).unwrap();
        assert!(pu.try_bind(&reg(2)).is_err(), "only two cells");
    }

    #[test]
    fn reg_claims_cell_on_first_endpoint() {
        let pu = fram(1)
            .try_bind(&F::Reg {
                input: "x".to_string(),
                outs: vec!["y".to_string()],
            })
            .unwrap();
        let pu = pu
            .endpoint_decision(&target_of("x", TimeInterval::singleton(0)))
            .unwrap();
        assert_eq!(
            pu.process().instruction_at(0),
            Some(&Instr::FramSave { addr: 0 })
        );
        // now the source side is offered
        let opts = pu.endpoint_options();
        assert_eq!(opts.len(), 1);
        assert!(opts[0].role.is_source());

        let pu = pu
            .endpoint_decision(&source_of(&["y"], TimeInterval::singleton(2)))
            .unwrap();
        assert!(pu
            .process()
            .steps()
            .iter()
            .any(|s| matches!(&s.info, StepInfo::Function(f) if f.kind() == "reg")));
    }

    #[test]
    fn constant_blocks_cell_ends() {
        let pu = fram(1)
            .try_bind(&F::Constant {
                value: Int32::from_int(42),
                outs: vec!["c".to_string()],
            })
            .unwrap();
        // input and output are blocked: no framInput/framOutput can land
        assert!(pu
            .try_bind(&F::FramInput {
                addr: 0,
                outs: vec!["z".to_string()]
            })
            .is_err());
        assert!(pu
            .try_bind(&F::FramOutput {
                addr: 0,
                input: "z".to_string()
            })
            .is_err());
        // but the constant is readable
        let opts = pu.endpoint_options();
        assert_eq!(opts.len(), 1);
        assert!(opts[0].role.is_source());
    }

    #[test]
    fn write_gated_until_initial_value_read() {
        let pu = fram(1).try_bind(&lp(0, "b", &["a"])).unwrap();
        // writing b first would clobber the initial value before a reads it
        let err = pu.endpoint_decision(&target_of("b", TimeInterval::singleton(0)));
        assert!(matches!(err, Err(EngineError::OptionViolation { .. })));

        let pu = pu
            .endpoint_decision(&source_of(&["a"], TimeInterval::singleton(1)))
            .unwrap();
        assert!(pu
            .endpoint_decision(&target_of("b", TimeInterval::singleton(2)))
            .is_ok());
    }

    #[test]
    fn reg_admission_ignores_pending_input_slot() {
        // a pending framInput occupies the input slot only; the cell still
        // counts toward reg capacity
        let pu = fram(1)
            .try_bind(&F::FramInput {
                addr: 0,
                outs: vec!["x".to_string()],
            })
            .unwrap();
        let pu = pu
            .try_bind(&F::Reg {
                input: "r".to_string(),
                outs: vec!["s".to_string()],
            })
            .unwrap();

        // but the reg cannot claim the cell while the external word is unread
        let err = pu.endpoint_decision(&target_of("r", TimeInterval::singleton(0)));
        assert!(matches!(err, Err(EngineError::OptionViolation { .. })));

        let pu = pu
            .endpoint_decision(&source_of(&["x"], TimeInterval::singleton(1)))
            .unwrap();
        let pu = pu
            .endpoint_decision(&target_of("r", TimeInterval::singleton(2)))
            .unwrap();
        assert_eq!(
            pu.process().instruction_at(2),
            Some(&Instr::FramSave { addr: 0 })
        );
    }

    #[test]
    fn last_write_set_and_cleared() {
        let pu = fram(1)
            .try_bind(&F::Reg {
                input: "x".to_string(),
                outs: vec!["y".to_string()],
            })
            .unwrap();
        let pu = pu
            .endpoint_decision(&target_of("x", TimeInterval::singleton(0)))
            .unwrap();
        assert_eq!(pu.cells[0].last_write, Some(0));
        let pu = pu
            .endpoint_decision(&source_of(&["y"], TimeInterval::singleton(2)))
            .unwrap();
        assert_eq!(pu.cells[0].last_write, None);
    }

    #[test]
    fn break_loop_splits_cell_jobs() {
        let the_loop = lp(0, "b", &["a"]);
        let pu = fram(1).try_bind(&the_loop).unwrap();
        let pu = pu.break_loop(&the_loop).unwrap();
        // the source half now belongs to loopBegin, the target to loopEnd
        let kinds: Vec<&str> = pu
            .active_jobs()
            .into_iter()
            .map(|(_, j)| j.function.kind())
            .collect();
        assert!(kinds.contains(&"loopBegin"));
        assert!(kinds.contains(&"loopEnd"));
    }

    #[test]
    fn microcode_projects_ports() {
        let pu = fram(2).try_bind(&lp(0, "b", &["a"])).unwrap();
        let pu = pu
            .endpoint_decision(&source_of(&["a"], TimeInterval::singleton(1)))
            .unwrap();
        // load(0) at tick 0: oe high, wr low, addr bits low
        let signals = pu.signals_at(0);
        assert!(signals.contains(&(0, true)), "oe");
        assert!(signals.contains(&(1, false)), "wr");
        // tick 5: no instruction, no-op word
        assert_eq!(pu.signals_at(5), vec![(0, false), (1, false)]);
    }
}
