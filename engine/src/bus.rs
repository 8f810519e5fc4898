// bus.rs — The bus network: a container PU multiplexing variable
// transfers among sub-PUs over one shared data bus.
//
// The network owns the bus timeline. It enumerates bind and dataflow
// options, applies decisions (producing fresh snapshots with untouched
// sub-PUs shared), delegates refactors to the hosting PU, merges sub-PU
// microcode into the bus control word, and aggregates sub-processes into
// the final schedule.
//
// Preconditions: sub-PU port maps do not overlap (checked at merge time).
// Postconditions: at most one transport spans any given tick; `next_tick`
//   never decreases across decisions.
// Failure modes: bind rejection, time wrap, option violation, microcode
//   conflict.
// Side effects: none beyond logging.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::debug;

use crate::accum::{Accum, AccumPorts};
use crate::divider::{DivPorts, Divider};
use crate::endpoint::{EndpointDecision, EndpointOption, EndpointRole};
use crate::error::EngineError;
use crate::fram::{Fram, FramPorts};
use crate::ir::{Diff, Lock, Patch, Var, F};
use crate::multiplier::{MulPorts, Multiplier};
use crate::problem::{Bind, BreakLoop, DataflowDecision, DataflowOption, ResolveDeadlock};
use crate::process::{Process, StepInfo};
use crate::pu::{AnyPu, Instr, ProcessorUnit};
use crate::shift::{Shift, ShiftPorts};
use crate::spi::{IoSync, Spi, SpiPorts};
use crate::time::{Tick, TimeInterval};
use crate::value::Val;

/// Maximum buffering depth of one variable before the repetition limit
/// withholds further resolve-deadlock options.
pub const BUFFER_REPETITION_LIMIT: usize = 2;

const BUFFER_SUFFIX: &str = "@buf";

// ── The network ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct BusNetwork<T: Val> {
    tag: String,
    remains: Vec<F<T>>,
    binded: BTreeMap<String, Vec<F<T>>>,
    pus: BTreeMap<String, Arc<AnyPu<T>>>,
    process: Process<T>,
    bus_width: usize,
    io_sync: IoSync,
}

impl<T: Val> BusNetwork<T> {
    pub fn new(tag: impl Into<String>, bus_width: usize, io_sync: IoSync) -> Self {
        BusNetwork {
            tag: tag.into(),
            remains: Vec::new(),
            binded: BTreeMap::new(),
            pus: BTreeMap::new(),
            process: Process::new(),
            bus_width,
            io_sync,
        }
    }

    pub fn with_pu(mut self, tag: impl Into<String>, pu: AnyPu<T>) -> Self {
        let tag = tag.into();
        self.binded.entry(tag.clone()).or_default();
        self.pus.insert(tag, Arc::new(pu));
        self
    }

    /// Hand the algorithm's functions to the network for binding.
    pub fn stage(mut self, functions: impl IntoIterator<Item = F<T>>) -> Self {
        self.remains.extend(functions);
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn bus_width(&self) -> usize {
        self.bus_width
    }

    pub fn io_sync(&self) -> IoSync {
        self.io_sync
    }

    pub fn remains(&self) -> &[F<T>] {
        &self.remains
    }

    pub fn binded(&self) -> &BTreeMap<String, Vec<F<T>>> {
        &self.binded
    }

    pub fn pus(&self) -> impl Iterator<Item = (&String, &AnyPu<T>)> {
        self.pus.iter().map(|(tag, pu)| (tag, pu.as_ref()))
    }

    pub fn pu(&self, tag: &str) -> Option<&AnyPu<T>> {
        self.pus.get(tag).map(|p| p.as_ref())
    }

    pub fn process(&self) -> &Process<T> {
        &self.process
    }

    pub fn next_tick(&self) -> Tick {
        self.process.next_tick()
    }

    /// All locks exported by the sub-PUs.
    pub fn locks(&self) -> Vec<Lock> {
        self.pus.values().flat_map(|pu| pu.locks()).collect()
    }

    // ── Binding ─────────────────────────────────────────────────────────

    pub fn bind_options(&self) -> Vec<Bind<T>> {
        let mut options = Vec::new();
        for f in &self.remains {
            for (tag, pu) in &self.pus {
                if pu.try_bind(f).is_ok() {
                    options.push(Bind {
                        function: f.clone(),
                        pu: tag.clone(),
                    });
                }
            }
        }
        options
    }

    pub fn apply_bind(&self, b: &Bind<T>) -> Result<Self, EngineError> {
        let pos = self
            .remains
            .iter()
            .position(|f| f == &b.function)
            .ok_or_else(|| EngineError::OptionViolation {
                detail: format!("'{}' is not waiting for binding", b.function),
            })?;
        let pu = self
            .pus
            .get(&b.pu)
            .ok_or_else(|| EngineError::OptionViolation {
                detail: format!("no PU '{}'", b.pu),
            })?;
        let bound = pu.try_bind(&b.function).map_err(|reason| {
            EngineError::BindRejected {
                function: b.function.to_string(),
                reasons: vec![format!("{}: {reason}", b.pu)],
            }
        })?;

        let mut next = self.clone();
        next.remains.remove(pos);
        next.binded
            .entry(b.pu.clone())
            .or_default()
            .push(b.function.clone());
        next.pus.insert(b.pu.clone(), Arc::new(bound));
        let t = next.process.next_tick();
        next.process.add_instant(t, StepInfo::Cad(b.to_string()));
        debug!("{b}");
        Ok(next)
    }

    // ── Dataflow ────────────────────────────────────────────────────────

    pub fn dataflow_options(&self) -> Vec<DataflowOption> {
        let per_pu: Vec<(&String, Vec<EndpointOption>)> = self
            .pus
            .iter()
            .map(|(tag, pu)| (tag, pu.endpoint_options()))
            .collect();

        let mut options = Vec::new();
        for (src_tag, src_opts) in &per_pu {
            for src in src_opts {
                let EndpointRole::Source(vs) = &src.role else {
                    continue;
                };
                // candidate targets per variable, excluding the source PU
                let vars: Vec<&Var> = vs.iter().collect();
                let candidates: Vec<Vec<(&String, &EndpointOption)>> = vars
                    .iter()
                    .map(|v| {
                        per_pu
                            .iter()
                            .filter(|(tag, _)| *tag != *src_tag)
                            .flat_map(|(tag, opts)| {
                                opts.iter()
                                    .filter(|o| {
                                        matches!(&o.role, EndpointRole::Target(tv) if tv == *v)
                                    })
                                    .map(move |o| (*tag, o))
                            })
                            .collect()
                    })
                    .collect();

                let mut assignment: Vec<Option<(&String, &EndpointOption)>> =
                    vec![None; vars.len()];
                collect_assignments(
                    &vars,
                    &candidates,
                    0,
                    &mut assignment,
                    &mut |assignment| {
                        let targets: BTreeMap<Var, (String, EndpointOption)> = vars
                            .iter()
                            .zip(assignment.iter())
                            .filter_map(|(v, a)| {
                                a.map(|(tag, opt)| ((**v).clone(), (tag.clone(), opt.clone())))
                            })
                            .collect();
                        if targets.is_empty() {
                            return;
                        }
                        let option = DataflowOption {
                            source: ((*src_tag).clone(), src.clone()),
                            targets,
                        };
                        if option.feasible(self.process.next_tick()) {
                            options.push(option);
                        }
                    },
                );
            }
        }
        options
    }

    pub fn apply_dataflow(&self, d: &DataflowDecision) -> Result<Self, EngineError> {
        let src_at = d.source.1.at;
        if src_at.inf() < self.process.next_tick() {
            return Err(EngineError::TimeWrap {
                detail: format!(
                    "transfer at {} precedes next tick {}",
                    src_at,
                    self.process.next_tick()
                ),
            });
        }

        let mut next = self.clone();
        next.apply_endpoint(&d.source.0, &d.source.1)?;
        for (v, (dst_tag, td)) in &d.targets {
            next.apply_endpoint(dst_tag, td)?;
            next.process.add_step(
                TimeInterval::new(src_at.inf(), src_at.sup()),
                StepInfo::Instruction(Instr::Transport {
                    var: v.clone(),
                    src: d.source.0.clone(),
                    dst: dst_tag.clone(),
                }),
            );
        }
        next.process.update_tick(src_at.sup() + 1);
        debug!("{d}");
        Ok(next)
    }

    fn apply_endpoint(&mut self, tag: &str, d: &EndpointDecision) -> Result<(), EngineError> {
        let pu = self
            .pus
            .get(tag)
            .ok_or_else(|| EngineError::OptionViolation {
                detail: format!("no PU '{tag}'"),
            })?;
        let committed = pu.endpoint_decision(d)?;
        self.pus.insert(tag.to_string(), Arc::new(committed));
        Ok(())
    }

    // ── Break-loop ──────────────────────────────────────────────────────

    pub fn break_loop_options(&self) -> Vec<BreakLoop<T>> {
        let mut options = Vec::new();
        for (tag, fs) in &self.binded {
            for f in fs {
                if !matches!(f, F::Loop { .. }) {
                    continue;
                }
                // only loops with both halves still unscheduled can split
                let splittable = self
                    .pus
                    .get(tag)
                    .map(|pu| pu.break_loop(f).is_some())
                    .unwrap_or(false);
                if splittable {
                    options.push(BreakLoop {
                        lp: f.clone(),
                        pu: tag.clone(),
                    });
                }
            }
        }
        options
    }

    pub fn apply_break_loop(&self, b: &BreakLoop<T>) -> Result<Self, EngineError> {
        let pu = self
            .pus
            .get(&b.pu)
            .ok_or_else(|| EngineError::OptionViolation {
                detail: format!("no PU '{}'", b.pu),
            })?;
        let split = pu.break_loop(&b.lp).ok_or_else(|| EngineError::OptionViolation {
            detail: format!("'{}' does not hold {}", b.pu, b.lp),
        })?;
        let (begin, end) =
            crate::ir::break_loop_parts(&b.lp).ok_or_else(|| EngineError::OptionViolation {
                detail: format!("{} is not a loop", b.lp),
            })?;

        let mut next = self.clone();
        next.pus.insert(b.pu.clone(), Arc::new(split));
        let fs = next.binded.entry(b.pu.clone()).or_default();
        fs.retain(|f| f != &b.lp);
        fs.push(begin);
        fs.push(end);
        let t = next.process.next_tick();
        next.process
            .add_instant(t, StepInfo::Cad(format!("break {} on {}", b.lp, b.pu)));
        Ok(next)
    }

    // ── Optimize-accumulate ─────────────────────────────────────────────

    /// Merges over functions still waiting for binding; bound functions
    /// are out of reach.
    pub fn optimize_accum_options(&self) -> Vec<crate::ir::AccMerge<T>> {
        crate::ir::accumulate_merges(&self.remains)
    }

    pub fn apply_optimize_accum(
        &self,
        merge: &crate::ir::AccMerge<T>,
    ) -> Result<Self, EngineError> {
        let mut next = self.clone();
        for f in &merge.chain {
            let pos = next.remains.iter().position(|g| g == f).ok_or_else(|| {
                EngineError::OptionViolation {
                    detail: format!("'{f}' is not waiting for binding"),
                }
            })?;
            next.remains.remove(pos);
        }
        next.remains.push(merge.merged.clone());
        let t = next.process.next_tick();
        next.process
            .add_instant(t, StepInfo::Cad(format!("merge into {}", merge.merged)));
        Ok(next)
    }

    // ── Resolve-deadlock ────────────────────────────────────────────────

    /// A PU that both produces and consumes a variable can never transfer
    /// it (the bus only routes between distinct PUs): offer to buffer it
    /// through a fresh reg on another PU.
    pub fn resolve_deadlock_options(&self) -> Vec<ResolveDeadlock> {
        let transferred = self.process.transferred_variables();
        let mut options = Vec::new();
        for fs in self.binded.values() {
            let produced: BTreeSet<Var> = fs.iter().flat_map(|f| f.outputs()).collect();
            let consumed: BTreeSet<Var> = fs.iter().flat_map(|f| f.inputs()).collect();
            for v in produced.intersection(&consumed) {
                if transferred.contains(v) {
                    continue;
                }
                if v.matches(BUFFER_SUFFIX).count() >= BUFFER_REPETITION_LIMIT {
                    continue;
                }
                options.push(ResolveDeadlock {
                    buffer: BTreeSet::from([v.clone()]),
                });
            }
        }
        options
    }

    /// Apply the buffering: rename every consumer of the variables, then
    /// hand the fresh reg back for binding. Returns the network, the diff
    /// (for patching the dataflow graph) and the inserted reg.
    pub fn apply_resolve_deadlock(
        &self,
        r: &ResolveDeadlock,
    ) -> Result<(Self, Diff, F<T>), EngineError> {
        let mut input = None;
        let mut outs = Vec::new();
        let mut diff = Diff::default();
        for v in &r.buffer {
            let renamed = format!("{v}{BUFFER_SUFFIX}");
            diff.i.insert(v.clone(), renamed.clone());
            input.get_or_insert_with(|| v.clone());
            outs.push(renamed);
        }
        let input = input.ok_or_else(|| EngineError::OptionViolation {
            detail: "empty buffer set".to_string(),
        })?;
        let reg = F::Reg { input, outs };

        let mut next = self.clone();
        for pu in next.pus.values_mut() {
            *pu = Arc::new(pu.patch(&diff));
        }
        for fs in next.binded.values_mut() {
            *fs = fs.patch(&diff);
        }
        next.remains = next.remains.patch(&diff);
        next.remains.push(reg.clone());
        let t = next.process.next_tick();
        next.process.add_instant(
            t,
            StepInfo::Cad(format!("resolve deadlock: insert {reg}")),
        );
        Ok((next, diff, reg))
    }

    // ── Completion ──────────────────────────────────────────────────────

    /// Endpoint options still open anywhere in the network.
    pub fn has_endpoint_options(&self) -> bool {
        self.pus.values().any(|pu| !pu.endpoint_options().is_empty())
    }

    /// Scheduling is complete when nothing waits for binding, no endpoint
    /// is still open, and every produced-and-consumed variable crossed the
    /// bus.
    pub fn is_complete(&self, algorithm_transfers: &BTreeSet<Var>) -> bool {
        self.remains.is_empty()
            && !self.has_endpoint_options()
            && algorithm_transfers.is_subset(&self.process.transferred_variables())
    }

    // ── Microcode ───────────────────────────────────────────────────────

    /// The merged control word at tick `t`.
    pub fn microcode_at(&self, t: Tick) -> Result<Vec<Option<bool>>, EngineError> {
        let mut assignments = Vec::new();
        for pu in self.pus.values() {
            assignments.extend(pu.signals_at(t));
        }
        crate::pu::merge_microcode(self.bus_width, t, &assignments)
    }

    // ── Aggregated process ──────────────────────────────────────────────

    /// The final schedule: the network's own steps plus every sub-PU step
    /// nested under its tag, with transport-to-endpoint and
    /// function-to-transport vertical relations rebuilt.
    pub fn aggregated_process(&self) -> Process<T> {
        let mut agg = self.process.clone();
        let transport_ids: Vec<(usize, Var)> = agg
            .steps()
            .iter()
            .filter_map(|s| match &s.info {
                StepInfo::Instruction(Instr::Transport { var, .. }) => {
                    Some((s.id, var.clone()))
                }
                _ => None,
            })
            .collect();

        for (tag, pu) in &self.pus {
            let inner = pu.process();
            let mut id_map = BTreeMap::new();
            for step in inner.steps() {
                let new_id = agg.nest_step(tag, step.clone());
                id_map.insert(step.id, new_id);

                match &step.info {
                    StepInfo::Endpoint(role) => {
                        // transport-to-endpoint
                        let vars = role.variables();
                        for (tid, var) in &transport_ids {
                            if vars.contains(var) {
                                agg.add_relation(*tid, new_id);
                            }
                        }
                    }
                    StepInfo::Function(f) => {
                        // function-to-transport
                        let outs = f.outputs();
                        for (tid, var) in &transport_ids {
                            if outs.contains(var) {
                                agg.add_relation(*tid, new_id);
                            }
                        }
                    }
                    _ => {}
                }
            }
            for rel in inner.relations() {
                if let (Some(&up), Some(&down)) = (id_map.get(&rel.up), id_map.get(&rel.down)) {
                    agg.add_relation(up, down);
                }
            }
        }
        agg
    }
}

/// Enumerate target assignments: each variable routed to one candidate or
/// held, destination PUs pairwise distinct.
fn collect_assignments<'a>(
    vars: &[&Var],
    candidates: &'a [Vec<(&'a String, &'a EndpointOption)>],
    depth: usize,
    assignment: &mut Vec<Option<(&'a String, &'a EndpointOption)>>,
    sink: &mut impl FnMut(&[Option<(&'a String, &'a EndpointOption)>]),
) {
    if depth == vars.len() {
        sink(assignment);
        return;
    }
    assignment[depth] = None;
    collect_assignments(vars, candidates, depth + 1, assignment, sink);
    for &(tag, opt) in &candidates[depth] {
        let taken = assignment[..depth]
            .iter()
            .any(|a| a.map(|(t, _)| t == tag).unwrap_or(false));
        if taken {
            continue;
        }
        assignment[depth] = Some((tag, opt));
        collect_assignments(vars, candidates, depth + 1, assignment, sink);
    }
    assignment[depth] = None;
}

// ── Default microarchitecture ───────────────────────────────────────────────

impl<T: Val> BusNetwork<T> {
    /// Two fram banks, an accumulator, a multiplier, a pipelined divider,
    /// a shifter and an SPI port, with a packed control-signal layout.
    pub fn default_march(io_sync: IoSync) -> Self {
        let mut s = 0usize;
        let mut take = |n: usize| {
            let base = s;
            s += n;
            base
        };

        let fram_ports = |base: usize| FramPorts {
            oe: base,
            wr: base + 1,
            addr: (base + 2..base + 6).collect(),
        };
        let f1 = fram_ports(take(6));
        let f2 = fram_ports(take(6));
        let accum = AccumPorts {
            reset_acc: take(1),
            load: take(1),
            neg: take(1),
            oe: take(1),
        };
        let mul = MulPorts {
            wr: take(1),
            sel: take(1),
            oe: take(1),
        };
        let div = DivPorts {
            wr: take(1),
            wr_sel: take(1),
            oe: take(1),
            oe_sel: take(1),
        };
        let shift = ShiftPorts {
            init: take(1),
            work: take(1),
            dir_right: take(1),
            oe: take(1),
        };
        let spi = SpiPorts {
            wr: take(1),
            oe: take(1),
        };

        BusNetwork::new("net", s, io_sync)
            .with_pu("fram1", AnyPu::Fram(Fram::new(16, f1)))
            .with_pu("fram2", AnyPu::Fram(Fram::new(16, f2)))
            .with_pu("accum", AnyPu::Accum(Accum::new(accum)))
            .with_pu("mul", AnyPu::Mul(Multiplier::new(mul)))
            .with_pu("div", AnyPu::Div(Divider::new(4, 1, div)))
            .with_pu("shift", AnyPu::Shift(Shift::new(shift)))
            .with_pu("spi", AnyPu::Spi(Spi::new(io_sync, spi)))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Int32;

    fn lp(init: i64, input: &str, outs: &[&str]) -> F<Int32> {
        F::Loop {
            init: Int32::from_int(init),
            input: input.to_string(),
            outs: outs.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn add(a: &str, b: &str, outs: &[&str]) -> F<Int32> {
        F::Add {
            a: a.to_string(),
            b: b.to_string(),
            outs: outs.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn fib_net() -> BusNetwork<Int32> {
        BusNetwork::default_march(IoSync::Sync).stage(vec![
            lp(0, "b2", &["a1"]),
            lp(1, "c", &["b1", "b2"]),
            add("a1", "b1", &["c"]),
        ])
    }

    #[test]
    fn bind_options_cover_admissible_pus() {
        let net = fib_net();
        let opts = net.bind_options();
        // each loop binds to either fram, the add to the accumulator
        let loop_opts: Vec<_> = opts
            .iter()
            .filter(|b| b.function.kind() == "loop")
            .collect();
        assert_eq!(loop_opts.len(), 4, "2 loops x 2 fram banks");
        let add_opts: Vec<_> = opts.iter().filter(|b| b.function.kind() == "add").collect();
        assert_eq!(add_opts.len(), 1);
        assert_eq!(add_opts[0].pu, "accum");
    }

    #[test]
    fn bind_moves_function_and_logs_cad() {
        let net = fib_net();
        let b = Bind {
            function: lp(0, "b2", &["a1"]),
            pu: "fram1".to_string(),
        };
        let net = net.apply_bind(&b).unwrap();
        assert_eq!(net.remains().len(), 2);
        assert_eq!(net.binded()["fram1"].len(), 1);
        assert!(matches!(
            &net.process().steps()[0].info,
            StepInfo::Cad(text) if text.contains("bind")
        ));
        // the same function cannot be bound twice
        assert!(net.apply_bind(&b).is_err());
    }

    #[test]
    fn dataflow_routes_source_to_target() {
        let net = fib_net();
        let net = net
            .apply_bind(&Bind {
                function: lp(0, "b2", &["a1"]),
                pu: "fram1".to_string(),
            })
            .unwrap();
        let net = net
            .apply_bind(&Bind {
                function: add("a1", "b1", &["c"]),
                pu: "accum".to_string(),
            })
            .unwrap();

        let opts = net.dataflow_options();
        // a1 can flow from fram1 to the accumulator
        let a1_opt = opts
            .iter()
            .find(|o| o.targets.contains_key("a1"))
            .expect("a1 transfer option");
        assert_eq!(a1_opt.source.0, "fram1");
        assert_eq!(a1_opt.targets["a1"].0, "accum");

        let d = a1_opt.decide_earliest(net.next_tick());
        let net = net.apply_dataflow(&d).unwrap();
        assert!(net
            .process()
            .transferred_variables()
            .contains("a1"));
        assert_eq!(net.next_tick(), d.source.1.at.sup() + 1);
    }

    #[test]
    fn transfer_before_next_tick_is_time_wrap() {
        let net = fib_net();
        let net = net
            .apply_bind(&Bind {
                function: lp(0, "b2", &["a1"]),
                pu: "fram1".to_string(),
            })
            .unwrap();
        let net = net
            .apply_bind(&Bind {
                function: add("a1", "b1", &["c"]),
                pu: "accum".to_string(),
            })
            .unwrap();
        let opts = net.dataflow_options();
        let opt = opts.iter().find(|o| o.targets.contains_key("a1")).unwrap();
        let mut d = opt.decide_earliest(net.next_tick());
        // force the transfer into the past
        let bad = TimeInterval::singleton(net.next_tick() - 1);
        d.source.1.at = bad;
        let r = net.apply_dataflow(&d);
        assert!(matches!(r, Err(EngineError::TimeWrap { .. })));
    }

    #[test]
    fn no_two_vars_share_a_destination() {
        // one source holding two variables, one consumer PU: a transfer
        // may route either variable, never both at once
        let net: BusNetwork<Int32> = BusNetwork::default_march(IoSync::Sync).stage(vec![
            lp(1, "c", &["b1", "b2"]),
            add("b1", "b2", &["c"]),
        ]);
        let net = net
            .apply_bind(&Bind {
                function: lp(1, "c", &["b1", "b2"]),
                pu: "fram1".to_string(),
            })
            .unwrap();
        let net = net
            .apply_bind(&Bind {
                function: add("b1", "b2", &["c"]),
                pu: "accum".to_string(),
            })
            .unwrap();
        for o in net.dataflow_options() {
            assert!(o.targets.len() <= 1, "accum latches one var per transfer");
        }
    }

    #[test]
    fn self_consumption_offers_deadlock_resolution() {
        // add and its consumer both on the accumulator: v never crosses
        let net: BusNetwork<Int32> = BusNetwork::default_march(IoSync::Sync).stage(vec![
            add("a", "b", &["v"]),
            add("v", "a", &["w"]),
        ]);
        let net = net
            .apply_bind(&Bind {
                function: add("a", "b", &["v"]),
                pu: "accum".to_string(),
            })
            .unwrap();
        let net = net
            .apply_bind(&Bind {
                function: add("v", "a", &["w"]),
                pu: "accum".to_string(),
            })
            .unwrap();

        let opts = net.resolve_deadlock_options();
        assert_eq!(opts.len(), 1);
        assert_eq!(opts[0].buffer, BTreeSet::from(["v".to_string()]));

        let (net, diff, reg) = net.apply_resolve_deadlock(&opts[0]).unwrap();
        assert_eq!(reg.to_string(), "v@buf = reg(v)");
        assert_eq!(diff.i["v"], "v@buf");
        // the downstream consumer now reads the buffered copy
        assert!(net.binded()["accum"]
            .iter()
            .any(|f| f.inputs().contains("v@buf")));
        // the reg waits for binding
        assert!(net.remains().iter().any(|f| f == &reg));
    }

    #[test]
    fn buffering_depth_is_limited() {
        let net: BusNetwork<Int32> = BusNetwork::default_march(IoSync::Sync).stage(vec![
            add("a", "b", &["v@buf@buf"]),
            add("v@buf@buf", "a", &["w"]),
        ]);
        let net = net
            .apply_bind(&Bind {
                function: add("a", "b", &["v@buf@buf"]),
                pu: "accum".to_string(),
            })
            .unwrap();
        let net = net
            .apply_bind(&Bind {
                function: add("v@buf@buf", "a", &["w"]),
                pu: "accum".to_string(),
            })
            .unwrap();
        assert!(net.resolve_deadlock_options().is_empty());
    }

    #[test]
    fn microcode_word_is_mergeable() {
        let net = fib_net();
        let word = net.microcode_at(-1).unwrap();
        assert_eq!(word.len(), net.bus_width());
        // at reset every driven wire is low
        assert!(word.iter().all(|b| *b != Some(true)));
    }

    #[test]
    fn aggregation_nests_and_relates() {
        let net = fib_net();
        let net = net
            .apply_bind(&Bind {
                function: lp(0, "b2", &["a1"]),
                pu: "fram1".to_string(),
            })
            .unwrap();
        let net = net
            .apply_bind(&Bind {
                function: add("a1", "b1", &["c"]),
                pu: "accum".to_string(),
            })
            .unwrap();
        let opts = net.dataflow_options();
        let opt = opts.iter().find(|o| o.targets.contains_key("a1")).unwrap();
        let d = opt.decide_earliest(net.next_tick());
        let net = net.apply_dataflow(&d).unwrap();

        let agg = net.aggregated_process();
        // nested endpoint steps exist for both participants
        let nested: Vec<_> = agg
            .steps()
            .iter()
            .filter(|s| matches!(&s.info, StepInfo::Nested { .. }))
            .collect();
        assert!(nested.len() >= 4, "endpoints and instructions on each side");
        // the transport step abstracts the endpoints that carried a1
        let transport_id = agg
            .steps()
            .iter()
            .find(|s| matches!(&s.info, StepInfo::Instruction(Instr::Transport { var, .. }) if var == "a1"))
            .unwrap()
            .id;
        assert!(agg.relations().iter().any(|r| r.up == transport_id));
    }
}
