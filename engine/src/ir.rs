// ir.rs — Intermediate representation: functions, variables, diffs, locks.
//
// The function set is closed. Each function knows its input and output
// variables, its ordering constraints (locks), and how to rewrite itself
// under a variable-renaming diff. Equality is by external presentation, so
// structurally equivalent functions over different variables stay distinct.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none; malformed algorithms are caught by the front end and
//   the functional simulator, not here.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::value::Val;

/// An algorithm variable. Produced by exactly one function output, consumed
/// by zero or more function inputs.
pub type Var = String;

// ── Lock ────────────────────────────────────────────────────────────────────

/// Ordering constraint: `locked` cannot be transferred before `by`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Lock {
    pub locked: Var,
    pub by: Var,
}

// ── Diff / Patch ────────────────────────────────────────────────────────────

/// A variable-renaming diff: input-side and output-side maps, applied
/// uniformly to functions, endpoint roles, and binding lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diff {
    /// Renames applied to consumer (input) positions.
    pub i: BTreeMap<Var, Var>,
    /// Renames applied to producer (output) positions.
    pub o: BTreeMap<Var, Var>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.i.is_empty() && self.o.is_empty()
    }

    /// The inverse diff: applying `d` then `d.reverse()` is the identity.
    pub fn reverse(&self) -> Diff {
        Diff {
            i: self.i.iter().map(|(k, v)| (v.clone(), k.clone())).collect(),
            o: self.o.iter().map(|(k, v)| (v.clone(), k.clone())).collect(),
        }
    }

    pub fn rename_input(&self, v: &Var) -> Var {
        self.i.get(v).cloned().unwrap_or_else(|| v.clone())
    }

    pub fn rename_output(&self, v: &Var) -> Var {
        self.o.get(v).cloned().unwrap_or_else(|| v.clone())
    }
}

/// Uniform diff application. History (the process record) is never patched.
pub trait Patch {
    fn patch(&self, diff: &Diff) -> Self;
}

impl<P: Patch> Patch for Vec<P> {
    fn patch(&self, diff: &Diff) -> Self {
        self.iter().map(|p| p.patch(diff)).collect()
    }
}

// ── Function ────────────────────────────────────────────────────────────────

/// Sign of an accumulate term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Sign {
    Plus,
    Minus,
}

/// An algorithm function. The set is closed; `LoopBegin`/`LoopEnd` are the
/// pseudo-functions produced by the break-loop refactor and carry the whole
/// original loop so the halves stay correlated.
#[derive(Debug, Clone, Serialize)]
pub enum F<T: Val> {
    Constant { value: T, outs: Vec<Var> },
    Reg { input: Var, outs: Vec<Var> },
    Add { a: Var, b: Var, outs: Vec<Var> },
    Sub { a: Var, b: Var, outs: Vec<Var> },
    Mul { a: Var, b: Var, outs: Vec<Var> },
    Div {
        numer: Var,
        denom: Var,
        quotient: Vec<Var>,
        remainder: Vec<Var>,
    },
    ShiftL { steps: u32, input: Var, outs: Vec<Var> },
    ShiftR { steps: u32, input: Var, outs: Vec<Var> },
    Loop { init: T, input: Var, outs: Vec<Var> },
    /// Source half of a broken loop: publishes `outs` at cycle start.
    LoopBegin { init: T, input: Var, outs: Vec<Var> },
    /// Sink half of a broken loop: consumes `input` at cycle end.
    LoopEnd { init: T, input: Var, outs: Vec<Var> },
    Accumulate {
        terms: Vec<(Sign, Var)>,
        outs: Vec<Var>,
    },
    Send { input: Var },
    Receive { outs: Vec<Var> },
    FramInput { addr: usize, outs: Vec<Var> },
    FramOutput { addr: usize, input: Var },
}

impl<T: Val> F<T> {
    /// Short tag for CAD steps and serialized payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            F::Constant { .. } => "constant",
            F::Reg { .. } => "reg",
            F::Add { .. } => "add",
            F::Sub { .. } => "sub",
            F::Mul { .. } => "mul",
            F::Div { .. } => "div",
            F::ShiftL { .. } => "shiftL",
            F::ShiftR { .. } => "shiftR",
            F::Loop { .. } => "loop",
            F::LoopBegin { .. } => "loopBegin",
            F::LoopEnd { .. } => "loopEnd",
            F::Accumulate { .. } => "accumulate",
            F::Send { .. } => "send",
            F::Receive { .. } => "receive",
            F::FramInput { .. } => "framInput",
            F::FramOutput { .. } => "framOutput",
        }
    }

    pub fn inputs(&self) -> BTreeSet<Var> {
        let mut set = BTreeSet::new();
        match self {
            F::Constant { .. }
            | F::Receive { .. }
            | F::FramInput { .. }
            | F::LoopBegin { .. } => {}
            F::Reg { input, .. }
            | F::ShiftL { input, .. }
            | F::ShiftR { input, .. }
            | F::Loop { input, .. }
            | F::LoopEnd { input, .. }
            | F::Send { input }
            | F::FramOutput { input, .. } => {
                set.insert(input.clone());
            }
            F::Add { a, b, .. } | F::Sub { a, b, .. } | F::Mul { a, b, .. } => {
                set.insert(a.clone());
                set.insert(b.clone());
            }
            F::Div { numer, denom, .. } => {
                set.insert(numer.clone());
                set.insert(denom.clone());
            }
            F::Accumulate { terms, .. } => {
                set.extend(terms.iter().map(|(_, v)| v.clone()));
            }
        }
        set
    }

    pub fn outputs(&self) -> BTreeSet<Var> {
        match self {
            F::Send { .. } | F::FramOutput { .. } | F::LoopEnd { .. } => BTreeSet::new(),
            F::Constant { outs, .. }
            | F::Reg { outs, .. }
            | F::Add { outs, .. }
            | F::Sub { outs, .. }
            | F::Mul { outs, .. }
            | F::ShiftL { outs, .. }
            | F::ShiftR { outs, .. }
            | F::Loop { outs, .. }
            | F::LoopBegin { outs, .. }
            | F::Accumulate { outs, .. }
            | F::Receive { outs }
            | F::FramInput { outs, .. } => outs.iter().cloned().collect(),
            F::Div {
                quotient,
                remainder,
                ..
            } => quotient.iter().chain(remainder.iter()).cloned().collect(),
        }
    }

    pub fn variables(&self) -> BTreeSet<Var> {
        let mut set = self.inputs();
        set.extend(self.outputs());
        set
    }

    /// Loop-class functions publish their outputs at cycle start, without
    /// waiting for this cycle's input.
    pub fn breaks_evaluation_loop(&self) -> bool {
        matches!(self, F::Loop { .. } | F::LoopBegin { .. })
    }

    /// Whether scheduling this function on one PU can lock the PU between
    /// its own endpoints (multi-input serial evaluation).
    pub fn may_cause_internal_lock(&self) -> bool {
        matches!(
            self,
            F::Add { .. } | F::Sub { .. } | F::Mul { .. } | F::Div { .. } | F::Accumulate { .. }
        )
    }

    /// Ordering constraints exported to deadlock detection: every output
    /// waits on every input, except for loop-class functions.
    pub fn locks(&self) -> Vec<Lock> {
        if self.breaks_evaluation_loop() {
            return Vec::new();
        }
        let inputs = self.inputs();
        self.outputs()
            .into_iter()
            .flat_map(|locked| {
                inputs.iter().map(move |by| Lock {
                    locked: locked.clone(),
                    by: by.clone(),
                })
            })
            .collect()
    }
}

impl<T: Val> Patch for F<T> {
    fn patch(&self, diff: &Diff) -> Self {
        let ri = |v: &Var| diff.rename_input(v);
        let ro = |vs: &[Var]| vs.iter().map(|v| diff.rename_output(v)).collect::<Vec<_>>();
        match self {
            F::Constant { value, outs } => F::Constant {
                value: *value,
                outs: ro(outs),
            },
            F::Reg { input, outs } => F::Reg {
                input: ri(input),
                outs: ro(outs),
            },
            F::Add { a, b, outs } => F::Add {
                a: ri(a),
                b: ri(b),
                outs: ro(outs),
            },
            F::Sub { a, b, outs } => F::Sub {
                a: ri(a),
                b: ri(b),
                outs: ro(outs),
            },
            F::Mul { a, b, outs } => F::Mul {
                a: ri(a),
                b: ri(b),
                outs: ro(outs),
            },
            F::Div {
                numer,
                denom,
                quotient,
                remainder,
            } => F::Div {
                numer: ri(numer),
                denom: ri(denom),
                quotient: ro(quotient),
                remainder: ro(remainder),
            },
            F::ShiftL { steps, input, outs } => F::ShiftL {
                steps: *steps,
                input: ri(input),
                outs: ro(outs),
            },
            F::ShiftR { steps, input, outs } => F::ShiftR {
                steps: *steps,
                input: ri(input),
                outs: ro(outs),
            },
            F::Loop { init, input, outs } => F::Loop {
                init: *init,
                input: ri(input),
                outs: ro(outs),
            },
            F::LoopBegin { init, input, outs } => F::LoopBegin {
                init: *init,
                input: ri(input),
                outs: ro(outs),
            },
            F::LoopEnd { init, input, outs } => F::LoopEnd {
                init: *init,
                input: ri(input),
                outs: ro(outs),
            },
            F::Accumulate { terms, outs } => F::Accumulate {
                terms: terms.iter().map(|(s, v)| (*s, ri(v))).collect(),
                outs: ro(outs),
            },
            F::Send { input } => F::Send { input: ri(input) },
            F::Receive { outs } => F::Receive { outs: ro(outs) },
            F::FramInput { addr, outs } => F::FramInput {
                addr: *addr,
                outs: ro(outs),
            },
            F::FramOutput { addr, input } => F::FramOutput {
                addr: *addr,
                input: ri(input),
            },
        }
    }
}

/// Display: output variables joined by `=`, then the operation. This string
/// is the function's external presentation and its identity.
impl<T: Val> fmt::Display for F<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn outs(vs: &[Var]) -> String {
            vs.join(" = ")
        }
        match self {
            F::Constant { value, outs: o } => write!(f, "{} = const({value})", outs(o)),
            F::Reg { input, outs: o } => write!(f, "{} = reg({input})", outs(o)),
            F::Add { a, b, outs: o } => write!(f, "{} = {a} + {b}", outs(o)),
            F::Sub { a, b, outs: o } => write!(f, "{} = {a} - {b}", outs(o)),
            F::Mul { a, b, outs: o } => write!(f, "{} = {a} * {b}", outs(o)),
            F::Div {
                numer,
                denom,
                quotient,
                remainder,
            } => {
                write!(f, "{} = {numer} / {denom}", outs(quotient))?;
                if !remainder.is_empty() {
                    write!(f, "; {} = {numer} mod {denom}", outs(remainder))?;
                }
                Ok(())
            }
            F::ShiftL { steps, input, outs: o } => {
                write!(f, "{} = {input} << {steps}", outs(o))
            }
            F::ShiftR { steps, input, outs: o } => {
                write!(f, "{} = {input} >> {steps}", outs(o))
            }
            F::Loop { init, input, outs: o } => {
                write!(f, "{} = loop({init}, {input})", outs(o))
            }
            F::LoopBegin { init, outs: o, .. } => {
                write!(f, "{} = loopBegin({init})", outs(o))
            }
            F::LoopEnd { input, .. } => write!(f, "loopEnd({input})"),
            F::Accumulate { terms, outs: o } => {
                write!(f, "{} = acc(", outs(o))?;
                for (i, (sign, v)) in terms.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    match sign {
                        Sign::Plus => write!(f, "+{v}")?,
                        Sign::Minus => write!(f, "-{v}")?,
                    }
                }
                write!(f, ")")
            }
            F::Send { input } => write!(f, "send({input})"),
            F::Receive { outs: o } => write!(f, "{} = receive()", outs(o)),
            F::FramInput { addr, outs: o } => write!(f, "{} = framInput({addr})", outs(o)),
            F::FramOutput { addr, input } => write!(f, "framOutput({addr}, {input})"),
        }
    }
}

impl<T: Val> PartialEq for F<T> {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl<T: Val> Eq for F<T> {}

// ── Dataflow graph ──────────────────────────────────────────────────────────

/// The algorithm: a leaf per function or a cluster of sub-graphs. Semantics
/// are the flat union of leaves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DataflowGraph<T: Val> {
    Leaf(F<T>),
    Cluster(Vec<DataflowGraph<T>>),
}

impl<T: Val> DataflowGraph<T> {
    pub fn from_functions(fs: impl IntoIterator<Item = F<T>>) -> Self {
        DataflowGraph::Cluster(fs.into_iter().map(DataflowGraph::Leaf).collect())
    }

    pub fn functions(&self) -> Vec<F<T>> {
        match self {
            DataflowGraph::Leaf(f) => vec![f.clone()],
            DataflowGraph::Cluster(gs) => gs.iter().flat_map(|g| g.functions()).collect(),
        }
    }

    pub fn variables(&self) -> BTreeSet<Var> {
        self.functions().iter().flat_map(|f| f.variables()).collect()
    }

    /// Variables produced inside the algorithm (have a producing function).
    pub fn produced_variables(&self) -> BTreeSet<Var> {
        self.functions().iter().flat_map(|f| f.outputs()).collect()
    }

    /// Replace the leaf equal to `target` with the given replacements.
    /// Returns false when no such leaf exists.
    pub fn replace(&mut self, target: &F<T>, with: Vec<F<T>>) -> bool {
        match self {
            DataflowGraph::Leaf(f) if f == target => {
                *self = DataflowGraph::Cluster(with.into_iter().map(DataflowGraph::Leaf).collect());
                true
            }
            DataflowGraph::Leaf(_) => false,
            DataflowGraph::Cluster(gs) => {
                for g in gs.iter_mut() {
                    if g.replace(target, with.clone()) {
                        return true;
                    }
                }
                false
            }
        }
    }
}

impl<T: Val> Patch for DataflowGraph<T> {
    fn patch(&self, diff: &Diff) -> Self {
        match self {
            DataflowGraph::Leaf(f) => DataflowGraph::Leaf(f.patch(diff)),
            DataflowGraph::Cluster(gs) => {
                DataflowGraph::Cluster(gs.iter().map(|g| g.patch(diff)).collect())
            }
        }
    }
}

// ── Refactor rewrites ───────────────────────────────────────────────────────

/// Split a loop into its begin/end pseudo-functions.
pub fn break_loop_parts<T: Val>(lp: &F<T>) -> Option<(F<T>, F<T>)> {
    if let F::Loop { init, input, outs } = lp {
        let begin = F::LoopBegin {
            init: *init,
            input: input.clone(),
            outs: outs.clone(),
        };
        let end = F::LoopEnd {
            init: *init,
            input: input.clone(),
            outs: outs.clone(),
        };
        Some((begin, end))
    } else {
        None
    }
}

/// An optimize-accumulate opportunity: a connected add/sub chain whose
/// intermediate results have exactly one consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccMerge<T: Val> {
    /// Functions consumed by the merge, in chain order.
    pub chain: Vec<F<T>>,
    /// The replacement.
    pub merged: F<T>,
}

/// Enumerate accumulate merges over the flat function list. Only two-level
/// chains are considered per merge; repeated application folds deeper chains.
pub fn accumulate_merges<T: Val>(fs: &[F<T>]) -> Vec<AccMerge<T>> {
    let mut consumers: BTreeMap<Var, usize> = BTreeMap::new();
    for f in fs {
        for v in f.inputs() {
            *consumers.entry(v).or_insert(0) += 1;
        }
    }

    let as_terms = |f: &F<T>| -> Option<(Vec<(Sign, Var)>, Vec<Var>)> {
        match f {
            F::Add { a, b, outs } => Some((
                vec![(Sign::Plus, a.clone()), (Sign::Plus, b.clone())],
                outs.clone(),
            )),
            F::Sub { a, b, outs } => Some((
                vec![(Sign::Plus, a.clone()), (Sign::Minus, b.clone())],
                outs.clone(),
            )),
            F::Accumulate { terms, outs } => Some((terms.clone(), outs.clone())),
            _ => None,
        }
    };

    let mut merges = Vec::new();
    for upstream in fs {
        let Some((up_terms, up_outs)) = as_terms(upstream) else {
            continue;
        };
        // the intermediate must have a single output var with a single consumer
        if up_outs.len() != 1 || consumers.get(&up_outs[0]).copied().unwrap_or(0) != 1 {
            continue;
        }
        let mid = &up_outs[0];
        for downstream in fs {
            if downstream == upstream {
                continue;
            }
            let Some((down_terms, down_outs)) = as_terms(downstream) else {
                continue;
            };
            if !down_terms.iter().any(|(_, v)| v == mid) {
                continue;
            }
            let mut terms = Vec::new();
            for (sign, v) in &down_terms {
                if v == mid {
                    for (s, u) in &up_terms {
                        let folded = match (sign, s) {
                            (Sign::Plus, Sign::Plus) | (Sign::Minus, Sign::Minus) => Sign::Plus,
                            _ => Sign::Minus,
                        };
                        terms.push((folded, u.clone()));
                    }
                } else {
                    terms.push((*sign, v.clone()));
                }
            }
            merges.push(AccMerge {
                chain: vec![upstream.clone(), downstream.clone()],
                merged: F::Accumulate {
                    terms,
                    outs: down_outs.clone(),
                },
            });
        }
    }
    merges
}

// ── Tests ───────────────────────────────────────────────────────────────────
