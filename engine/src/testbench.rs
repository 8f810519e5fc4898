// testbench.rs — Schedule export, microcode dump, testbench vectors.
//
// Everything downstream consumers need from a finished synthesis: the
// process record as JSON, the merged control word per tick, per-cycle
// testbench vectors pairing transports with functionally simulated
// values, and a machine-checkable certificate over the schedule.
//
// Preconditions: the model completed synthesis (callers may also dump
//   partial schedules for debugging).
// Postconditions: serialization is deterministic for a given model.
// Failure modes: microcode conflicts surface with (tick, signal).
// Side effects: none.

use serde::Serialize;

use crate::bus::BusNetwork;
use crate::error::EngineError;
use crate::ir::Var;
use crate::process::Process;
use crate::pu::microcode_hex;
use crate::simulator::Cntx;
use crate::synthesis::ModelState;
use crate::time::Tick;
use crate::value::Val;

// ── Schedule serialization ──────────────────────────────────────────────────

/// One step of the schedule interchange form:
/// `{id, time, kind, payload, relations}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleStep {
    pub id: usize,
    pub time: (Tick, Tick),
    pub kind: String,
    pub payload: String,
    /// Steps this one abstracts (vertical relations downward).
    pub relations: Vec<usize>,
}

pub fn serialize_schedule<T: Val>(p: &Process<T>) -> Vec<ScheduleStep> {
    p.steps()
        .iter()
        .map(|s| ScheduleStep {
            id: s.id,
            time: (s.time.inf(), s.time.sup()),
            kind: s.info.kind().to_string(),
            payload: s.info.to_string(),
            relations: p
                .relations()
                .iter()
                .filter(|r| r.up == s.id)
                .map(|r| r.down)
                .collect(),
        })
        .collect()
}

pub fn schedule_json<T: Val>(p: &Process<T>) -> String {
    serde_json::to_string_pretty(&serialize_schedule(p)).expect("schedule serialization")
}

// ── Microcode dump ──────────────────────────────────────────────────────────

/// The merged control word for each tick in `[−1, next_tick]`, as hex
/// strings of the bus width. Tick −1 is the reset no-op.
pub fn microcode_dump<T: Val>(net: &BusNetwork<T>) -> Result<Vec<String>, EngineError> {
    let mut words = Vec::new();
    for t in -1..=net.next_tick() {
        let word = net.microcode_at(t)?;
        words.push(microcode_hex(&word));
    }
    Ok(words)
}

// ── Testbench vectors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransportExpectation {
    pub var: Var,
    pub src: String,
    pub dst: String,
    /// The functionally simulated value of the variable at this cycle.
    pub value: String,
}

/// One testbench row: what the bus must carry at (cycle, tick). A row
/// without a transport is a trace-only record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestbenchVector {
    pub cycle: usize,
    pub tick: Tick,
    pub transport: Option<TransportExpectation>,
}

pub fn testbench_vectors<T: Val>(
    net: &BusNetwork<T>,
    cntx: &Cntx<T>,
) -> Result<Vec<TestbenchVector>, EngineError> {
    let transports = net.process().transports();
    let mut rows = Vec::new();
    for cycle in 0..cntx.cycles.len() {
        for tick in 0..net.next_tick() {
            let transport = transports
                .iter()
                .find(|(_, _, _, at)| at.contains(tick))
                .map(|(var, src, dst, _)| {
                    let value = cntx.at(cycle, var).ok_or_else(|| {
                        EngineError::SimulationFailure {
                            cycle,
                            var: var.clone(),
                            reason: "no simulated value for a transported variable".to_string(),
                        }
                    })?;
                    Ok::<_, EngineError>(TransportExpectation {
                        var: var.clone(),
                        src: src.clone(),
                        dst: dst.clone(),
                        value: value.to_string(),
                    })
                })
                .transpose()?;
            rows.push(TestbenchVector {
                cycle,
                tick,
                transport,
            });
        }
    }
    Ok(rows)
}

// ── Schedule certificate ────────────────────────────────────────────────────

/// Machine-checkable evidence over a finished schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleCert {
    /// Transport intervals are pairwise disjoint (single-writer bus).
    pub bus_exclusive: bool,
    /// Every produced-and-consumed variable crossed the bus.
    pub transfers_covered: bool,
    /// The functional simulation yields a value for every transported
    /// variable at every cycle.
    pub values_defined: bool,
}

impl ScheduleCert {
    pub fn all_pass(&self) -> bool {
        self.bus_exclusive && self.transfers_covered && self.values_defined
    }

    pub fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("bus_exclusive", self.bus_exclusive),
            ("transfers_covered", self.transfers_covered),
            ("values_defined", self.values_defined),
        ]
    }
}

pub fn verify_schedule<T: Val>(model: &ModelState<T>, cntx: &Cntx<T>) -> ScheduleCert {
    let transports = model.network.process().transports();

    let mut bus_exclusive = true;
    for (i, (_, _, _, a)) in transports.iter().enumerate() {
        for (_, _, _, b) in transports.iter().skip(i + 1) {
            if a.intersects(b) {
                bus_exclusive = false;
            }
        }
    }

    let transferred = model.network.process().transferred_variables();
    let transfers_covered = model.algorithm_transfers().is_subset(&transferred);

    let values_defined = transports.iter().all(|(v, _, _, _)| {
        (0..cntx.cycles.len()).all(|c| cntx.at(c, v).is_some())
    });

    ScheduleCert {
        bus_exclusive,
        transfers_covered,
        values_defined,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
