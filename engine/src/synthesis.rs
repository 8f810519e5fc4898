// synthesis.rs — Model states, option scoring and the search driver.
//
// A model state is an immutable snapshot: the bus network plus the
// dataflow graph. Decisions are pure functions from (state, option) to a
// new state; the search explores the resulting tree under one of three
// policies. A thread-safe cache keyed by (state digest, decision index)
// deduplicates children across workers; metric ties break by decision
// index, which makes every policy deterministic.
//
// Preconditions: the staged algorithm passed front-end validation.
// Postconditions: a returned complete state satisfies the completion
//   predicate; on timeout the deepest in-progress state is returned.
// Failure modes: recoverable kinds (bind rejection, deadlock) make the
//   driver try the next option; everything else aborts the search.
// Side effects: logging.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info};
use sha2::{Digest, Sha256};

use crate::bus::BusNetwork;
use crate::endpoint::EndpointRole;
use crate::error::EngineError;
use crate::ir::{DataflowGraph, Var, F};
use crate::problem::{BreakLoop, OptimizeAccum, SynthesisOption};
use crate::pu::ProcessorUnit;
use crate::score::{
    combine, BindMetrics, DataflowMetrics, GlobalMetrics, RefactorMetrics, SpecificMetrics,
    BREAK_LOOP_BASE, OPTIMIZE_ACCUM_BASE, RESOLVE_DEADLOCK_BASE,
};
use crate::value::Val;

// ── Model state ─────────────────────────────────────────────────────────────

/// One immutable snapshot of the synthesis model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelState<T: Val> {
    pub network: BusNetwork<T>,
    pub dfg: DataflowGraph<T>,
}

impl<T: Val> ModelState<T> {
    pub fn new(network: BusNetwork<T>, functions: Vec<F<T>>) -> Self {
        ModelState {
            network: network.stage(functions.clone()),
            dfg: DataflowGraph::from_functions(functions),
        }
    }

    /// Variables that must cross the bus: produced by one function and
    /// consumed by another.
    pub fn algorithm_transfers(&self) -> BTreeSet<Var> {
        let fs = self.dfg.functions();
        let produced: BTreeSet<Var> = fs.iter().flat_map(|f| f.outputs()).collect();
        let consumed: BTreeSet<Var> = fs.iter().flat_map(|f| f.inputs()).collect();
        produced.intersection(&consumed).cloned().collect()
    }

    /// Transfers still outstanding.
    pub fn pending_transfers(&self) -> BTreeSet<Var> {
        let done = self.network.process().transferred_variables();
        self.algorithm_transfers()
            .difference(&done)
            .cloned()
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.network.is_complete(&self.algorithm_transfers())
    }

    /// A dead node offers nothing and is not complete; the search
    /// backtracks out of it.
    pub fn is_dead(&self) -> bool {
        !self.is_complete() && self.options().is_empty()
    }

    // ── The problem surface ─────────────────────────────────────────────

    /// Every option the model offers, in a fixed kind order; the position
    /// in this list is the option's decision index.
    pub fn options(&self) -> Vec<SynthesisOption<T>> {
        let mut opts: Vec<SynthesisOption<T>> = Vec::new();
        opts.extend(self.network.bind_options().into_iter().map(SynthesisOption::Bind));
        opts.extend(
            self.network
                .dataflow_options()
                .into_iter()
                .map(SynthesisOption::Dataflow),
        );
        opts.extend(
            self.network
                .break_loop_options()
                .into_iter()
                .map(SynthesisOption::BreakLoop),
        );
        opts.extend(
            self.network
                .optimize_accum_options()
                .into_iter()
                .map(|merge| SynthesisOption::OptimizeAccum(OptimizeAccum { merge })),
        );
        opts.extend(
            self.network
                .resolve_deadlock_options()
                .into_iter()
                .map(SynthesisOption::ResolveDeadlock),
        );
        opts
    }

    /// Apply a decision, producing the child state.
    pub fn apply(&self, opt: &SynthesisOption<T>) -> Result<Self, EngineError> {
        match opt {
            SynthesisOption::Bind(b) => Ok(ModelState {
                network: self.network.apply_bind(b)?,
                dfg: self.dfg.clone(),
            }),
            SynthesisOption::Dataflow(o) => {
                let d = o.decide_earliest(self.network.next_tick());
                Ok(ModelState {
                    network: self.network.apply_dataflow(&d)?,
                    dfg: self.dfg.clone(),
                })
            }
            SynthesisOption::BreakLoop(b) => {
                let network = self.network.apply_break_loop(b)?;
                let (begin, end) = crate::ir::break_loop_parts(&b.lp).ok_or_else(|| {
                    EngineError::OptionViolation {
                        detail: format!("{} is not a loop", b.lp),
                    }
                })?;
                let mut dfg = self.dfg.clone();
                dfg.replace(&b.lp, vec![begin, end]);
                Ok(ModelState { network, dfg })
            }
            SynthesisOption::OptimizeAccum(o) => {
                let network = self.network.apply_optimize_accum(&o.merge)?;
                let mut dfg = self.dfg.clone();
                let mut with = vec![o.merge.merged.clone()];
                for f in &o.merge.chain {
                    dfg.replace(f, std::mem::take(&mut with));
                }
                Ok(ModelState { network, dfg })
            }
            SynthesisOption::ResolveDeadlock(r) => {
                let (network, diff, reg) = self.network.apply_resolve_deadlock(r)?;
                let patched = crate::ir::Patch::patch(&self.dfg, &diff);
                let dfg = DataflowGraph::Cluster(vec![patched, DataflowGraph::Leaf(reg)]);
                Ok(ModelState { network, dfg })
            }
        }
    }

    // ── Scoring ─────────────────────────────────────────────────────────

    pub fn scored_options(&self) -> Vec<ScoredOption<T>> {
        let opts = self.options();
        let global = GlobalMetrics {
            bind_options: opts
                .iter()
                .filter(|o| matches!(o, SynthesisOption::Bind(_)))
                .count(),
            dataflow_options: opts
                .iter()
                .filter(|o| matches!(o, SynthesisOption::Dataflow(_)))
                .count(),
            refactor_options: opts
                .iter()
                .filter(|o| {
                    !matches!(o, SynthesisOption::Bind(_) | SynthesisOption::Dataflow(_))
                })
                .count(),
        };

        // shared inputs for bind metrics
        let mut alternatives: BTreeMap<String, usize> = BTreeMap::new();
        for o in &opts {
            if let SynthesisOption::Bind(b) = o {
                *alternatives.entry(b.function.to_string()).or_insert(0) += 1;
            }
        }
        let sourceable: BTreeSet<Var> = self
            .network
            .pus()
            .flat_map(|(_, pu)| pu.endpoint_options())
            .filter_map(|o| match o.role {
                EndpointRole::Source(vs) => Some(vs),
                _ => None,
            })
            .flatten()
            .collect();
        let fs = self.dfg.functions();
        let waves = wave_map(&fs);
        let bound: BTreeSet<String> = self
            .network
            .binded()
            .values()
            .flatten()
            .map(|f| f.to_string())
            .collect();
        let producer_of: BTreeMap<Var, String> = fs
            .iter()
            .flat_map(|f| f.outputs().into_iter().map(move |v| (v, f.to_string())))
            .collect();
        let all_locks = self.network.locks();

        let mut scored: Vec<ScoredOption<T>> = opts
            .into_iter()
            .enumerate()
            .map(|(index, option)| {
                let specific = match &option {
                    SynthesisOption::Bind(b) => {
                        let inputs = b.function.inputs();
                        let bound_inputs = inputs
                            .iter()
                            .filter(|v| {
                                producer_of.get(*v).map(|p| bound.contains(p)).unwrap_or(false)
                            })
                            .count();
                        let percent = if inputs.is_empty() {
                            100
                        } else {
                            (bound_inputs * 100 / inputs.len()) as u8
                        };
                        let restlessness = self
                            .network
                            .pu(&b.pu)
                            .and_then(|pu| pu.try_bind(&b.function).ok())
                            .and_then(|pu| {
                                pu.endpoint_options()
                                    .iter()
                                    .map(|o| o.at.available.inf())
                                    .min()
                            })
                            .map(|inf| (inf - self.network.next_tick()).max(0))
                            .unwrap_or(0);
                        let pu_fns = self
                            .network
                            .binded()
                            .get(&b.pu)
                            .map(|fs| fs.as_slice())
                            .unwrap_or(&[]);
                        let pu_outs: BTreeSet<Var> =
                            pu_fns.iter().flat_map(|f| f.outputs()).collect();
                        let pu_ins: BTreeSet<Var> =
                            pu_fns.iter().flat_map(|f| f.inputs()).collect();
                        let outputs = b.function.outputs();
                        let possible_deadlock = inputs.iter().any(|v| pu_outs.contains(v))
                            || outputs.iter().any(|v| pu_ins.contains(v));
                        SpecificMetrics::Bind(BindMetrics {
                            critical: b.function.breaks_evaluation_loop(),
                            alternatives: alternatives
                                .get(&b.function.to_string())
                                .copied()
                                .unwrap_or(1),
                            enablement: inputs.iter().filter(|v| sourceable.contains(*v)).count(),
                            restlessness,
                            wave: waves.get(&b.function.to_string()).copied().unwrap_or(0),
                            outputs: outputs.len(),
                            percent_bound_inputs: percent,
                            possible_deadlock,
                        })
                    }
                    SynthesisOption::Dataflow(o) => {
                        let from = self.network.next_tick();
                        let restricted = o.source.1.at.available.sup() != crate::time::UNBOUNDED
                            || o.targets.values().any(|(_, t)| {
                                t.at.available.sup() != crate::time::UNBOUNDED
                            });
                        SpecificMetrics::Dataflow(DataflowMetrics {
                            wait_time: o.earliest_start(from) - from,
                            restricted_time: restricted,
                        })
                    }
                    SynthesisOption::BreakLoop(BreakLoop { .. }) => {
                        SpecificMetrics::Refactor(RefactorMetrics {
                            base: BREAK_LOOP_BASE,
                            locks_broken: 0,
                        })
                    }
                    SynthesisOption::OptimizeAccum(_) => {
                        SpecificMetrics::Refactor(RefactorMetrics {
                            base: OPTIMIZE_ACCUM_BASE,
                            locks_broken: 0,
                        })
                    }
                    SynthesisOption::ResolveDeadlock(r) => {
                        let broken = all_locks
                            .iter()
                            .filter(|l| r.buffer.contains(&l.locked) || r.buffer.contains(&l.by))
                            .count();
                        SpecificMetrics::Refactor(RefactorMetrics {
                            base: RESOLVE_DEADLOCK_BASE,
                            locks_broken: broken,
                        })
                    }
                };
                ScoredOption {
                    index,
                    score: combine(&global, &specific),
                    specific,
                    option,
                }
            })
            .collect();
        scored.sort_by(|a, b| b.score.cmp(&a.score).then(a.index.cmp(&b.index)));
        scored
    }

    /// SHA-256 digest of the observable state, for the child cache.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for f in &self.dfg.functions() {
            hasher.update(f.to_string());
            hasher.update([0]);
        }
        for f in self.network.remains() {
            hasher.update(f.to_string());
            hasher.update([1]);
        }
        for (tag, fs) in self.network.binded() {
            hasher.update(tag);
            for f in fs {
                hasher.update(f.to_string());
            }
            hasher.update([2]);
        }
        for step in self.network.process().steps() {
            hasher.update(step.to_string());
            hasher.update([3]);
        }
        for (tag, pu) in self.network.pus() {
            hasher.update(tag);
            for step in pu.process().steps() {
                hasher.update(step.to_string());
            }
            hasher.update([4]);
        }
        hasher.update(self.network.next_tick().to_le_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Topological wave of each function: loop-class and input-free functions
/// are wave 0; everything else is one past its deepest producer.
fn wave_map<T: Val>(fs: &[F<T>]) -> BTreeMap<String, usize> {
    let producer_of: BTreeMap<Var, String> = fs
        .iter()
        .flat_map(|f| f.outputs().into_iter().map(move |v| (v, f.to_string())))
        .collect();
    let mut waves: BTreeMap<String, usize> = BTreeMap::new();
    for f in fs {
        if f.breaks_evaluation_loop() || f.inputs().is_empty() {
            waves.insert(f.to_string(), 0);
        }
    }
    // relaxation over a DAG of bounded depth
    for _ in 0..fs.len() {
        let mut changed = false;
        for f in fs {
            let key = f.to_string();
            if waves.contains_key(&key) {
                continue;
            }
            let deps: Option<Vec<usize>> = f
                .inputs()
                .iter()
                .map(|v| producer_of.get(v).and_then(|p| waves.get(p)).copied())
                .collect();
            if let Some(deps) = deps {
                waves.insert(key, 1 + deps.into_iter().max().unwrap_or(0));
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    waves
}

/// An option with its decision index and priority.
#[derive(Debug, Clone)]
pub struct ScoredOption<T: Val> {
    pub index: usize,
    pub option: SynthesisOption<T>,
    pub specific: SpecificMetrics,
    pub score: i64,
}

// ── Child cache ─────────────────────────────────────────────────────────────

/// Thread-safe cache of decision applications: (parent digest, decision
/// index) → child. The first worker to compute a child wins insertion;
/// identical children from other workers are discarded.
#[derive(Default)]
pub struct TreeCache<T: Val> {
    map: Mutex<HashMap<(String, usize), Arc<ModelState<T>>>>,
}

impl<T: Val> TreeCache<T> {
    pub fn new() -> Self {
        TreeCache {
            map: Mutex::new(HashMap::new()),
        }
    }

    pub fn child(
        &self,
        parent: &ModelState<T>,
        index: usize,
        option: &SynthesisOption<T>,
    ) -> Result<Arc<ModelState<T>>, EngineError> {
        let key = (parent.digest(), index);
        if let Some(hit) = self.map.lock().unwrap().get(&key) {
            return Ok(hit.clone());
        }
        let child = Arc::new(parent.apply(option)?);
        let mut map = self.map.lock().unwrap();
        Ok(map.entry(key).or_insert(child).clone())
    }
}

// ── Driver ──────────────────────────────────────────────────────────────────

/// Search policy. Every policy backtracks out of dead ends, so a
/// reachable completion is always found; they differ in exploration
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Best-first: take the top-scoring option at every node.
    Greedy,
    /// Apply forced bindings (single admissible PU) first, then
    /// best-first.
    ObviousBind,
    /// Expand the top-k options per node down to `depth`, best-first
    /// below; the first completion in decision order wins.
    AllThreads { k: usize, depth: usize },
}

#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    pub policy: Policy,
    pub timeout: Option<Duration>,
    /// Refactor buffer-repetition bound; see the dfs termination guard.
    pub repetition_limit: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        SynthesisConfig {
            policy: Policy::Greedy,
            timeout: None,
            repetition_limit: 2,
        }
    }
}

/// Search outcome: the final state and whether it is complete.
#[derive(Debug, Clone)]
pub struct Synthesized<T: Val> {
    pub model: Arc<ModelState<T>>,
    pub complete: bool,
    pub decisions: usize,
}

pub fn synthesize<T: Val>(
    initial: ModelState<T>,
    config: &SynthesisConfig,
) -> Result<Synthesized<T>, EngineError> {
    let cache = TreeCache::new();
    let deadline = config.timeout.map(|t| Instant::now() + t);
    let model = Arc::new(initial);

    let result = match config.policy {
        Policy::Greedy => {
            let mut history = VecDeque::new();
            dfs(model, &cache, config, deadline, 0, &mut history)?
        }
        Policy::ObviousBind => {
            let (model, applied) = obvious_prefix(model, &cache, deadline)?;
            let mut history = VecDeque::new();
            dfs(model, &cache, config, deadline, applied, &mut history)?
        }
        Policy::AllThreads { k, depth } => {
            all_threads(model, k, depth, &cache, config, deadline, 0)?
        }
    };
    info!(
        "synthesis {}: {} decisions, next tick {}",
        if result.complete { "complete" } else { "incomplete" },
        result.decisions,
        result.model.network.next_tick()
    );
    Ok(result)
}

fn out_of_time(deadline: Option<Instant>) -> bool {
    deadline.map(|d| Instant::now() >= d).unwrap_or(false)
}

fn is_refactor<T: Val>(opt: &SynthesisOption<T>) -> bool {
    matches!(
        opt,
        SynthesisOption::BreakLoop(_)
            | SynthesisOption::OptimizeAccum(_)
            | SynthesisOption::ResolveDeadlock(_)
    )
}

/// Score-ordered depth-first search: the top option is taken first, but a
/// dead end backtracks to the next candidate, which makes the driver
/// complete — any reachable schedule is eventually found. `history` holds
/// pending-transfer sets after recent refactors on the current path; a
/// refactor reproducing one of them makes no progress and is rejected.
fn dfs<T: Val>(
    model: Arc<ModelState<T>>,
    cache: &TreeCache<T>,
    config: &SynthesisConfig,
    deadline: Option<Instant>,
    decisions: usize,
    history: &mut VecDeque<BTreeSet<Var>>,
) -> Result<Synthesized<T>, EngineError> {
    if model.is_complete() {
        return Ok(Synthesized {
            model,
            complete: true,
            decisions,
        });
    }
    if out_of_time(deadline) {
        return Ok(Synthesized {
            model,
            complete: false,
            decisions,
        });
    }

    let scored = model.scored_options();
    let mut deepest: Option<Synthesized<T>> = None;
    for cand in &scored {
        let child = match cache.child(&model, cand.index, &cand.option) {
            Ok(child) => child,
            Err(EngineError::BindRejected { .. } | EngineError::DeadlockDetected { .. }) => {
                continue
            }
            Err(e) => return Err(e),
        };
        let popped = if is_refactor(&cand.option) {
            let pending = child.pending_transfers();
            if history.contains(&pending) {
                continue;
            }
            history.push_back(pending);
            while history.len() > config.repetition_limit {
                history.pop_front();
            }
            true
        } else {
            false
        };
        debug!("take [{}] {} (score {})", cand.index, cand.option, cand.score);

        let r = dfs(child, cache, config, deadline, decisions + 1, history)?;
        if popped {
            history.pop_back();
        }
        if r.complete {
            return Ok(r);
        }
        let deeper = deepest
            .as_ref()
            .map(|b| r.decisions > b.decisions)
            .unwrap_or(true);
        if deeper {
            deepest = Some(r);
        }
        if out_of_time(deadline) {
            break;
        }
    }

    Ok(deepest.unwrap_or(Synthesized {
        model,
        complete: false,
        decisions,
    }))
}

/// Apply forced bindings (exactly one admissible PU) while any exist.
fn obvious_prefix<T: Val>(
    mut model: Arc<ModelState<T>>,
    cache: &TreeCache<T>,
    deadline: Option<Instant>,
) -> Result<(Arc<ModelState<T>>, usize), EngineError> {
    let mut applied = 0;
    loop {
        if out_of_time(deadline) {
            return Ok((model, applied));
        }
        let scored = model.scored_options();
        let forced = scored.iter().find(|c| {
            matches!(
                c.specific,
                SpecificMetrics::Bind(BindMetrics { alternatives: 1, .. })
            )
        });
        match forced {
            Some(cand) => {
                model = cache.child(&model, cand.index, &cand.option)?;
                applied += 1;
            }
            None => return Ok((model, applied)),
        }
    }
}

fn all_threads<T: Val>(
    model: Arc<ModelState<T>>,
    k: usize,
    depth: usize,
    cache: &TreeCache<T>,
    config: &SynthesisConfig,
    deadline: Option<Instant>,
    decisions: usize,
) -> Result<Synthesized<T>, EngineError> {
    if model.is_complete() || depth == 0 || out_of_time(deadline) {
        let mut history = VecDeque::new();
        return dfs(model, cache, config, deadline, decisions, &mut history);
    }

    let scored = model.scored_options();
    if scored.is_empty() {
        return Ok(Synthesized {
            model,
            complete: false,
            decisions,
        });
    }

    let mut best: Option<Synthesized<T>> = None;
    for cand in scored.iter().take(k) {
        let child = match cache.child(&model, cand.index, &cand.option) {
            Ok(child) => child,
            Err(EngineError::BindRejected { .. } | EngineError::DeadlockDetected { .. }) => {
                continue
            }
            Err(e) => return Err(e),
        };
        let r = all_threads(child, k, depth - 1, cache, config, deadline, decisions + 1)?;
        if r.complete {
            return Ok(r);
        }
        let deeper = match &best {
            Some(b) => r.decisions > b.decisions,
            None => true,
        };
        if deeper {
            best = Some(r);
        }
    }
    Ok(best.unwrap_or(Synthesized {
        model,
        complete: false,
        decisions,
    }))
}

// ── Tests ───────────────────────────────────────────────────────────────────
