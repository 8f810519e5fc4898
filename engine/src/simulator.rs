// simulator.rs — Cycle-accurate functional simulator.
//
// Evaluates the algorithm's functions cycle by cycle at the value level,
// independent of any schedule. Loop-class functions publish their state at
// cycle start and absorb their input at cycle end, which is what makes the
// evaluation order acyclic. The resulting trace is the reference for the
// `--fsim` dump, testbench vectors and schedule-replay checks.
//
// Preconditions: every consumed variable has a producer (or an external
//   queue entry for receive/framInput).
// Postconditions: `Cntx` holds one complete valuation per cycle.
// Failure modes: missing producers, empty receive queues with dropping
//   disabled, and division by zero surface as `SimulationFailure`.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::EngineError;
use crate::ir::{Sign, Var, F};
use crate::value::Val;

/// External input words, keyed by the first output variable of the
/// consuming `receive`/`framInput`.
pub type ExternalInputs<T> = BTreeMap<Var, Vec<T>>;

/// Simulation result: a full valuation per cycle, plus the values observed
/// at the algorithm's outward edges (`send`, `framOutput`).
#[derive(Debug, Clone, PartialEq)]
pub struct Cntx<T: Val> {
    pub cycles: Vec<BTreeMap<Var, T>>,
    pub observed: BTreeMap<Var, Vec<T>>,
}

impl<T: Val> Cntx<T> {
    /// Value of `v` at `cycle`, if the simulation reached it.
    pub fn at(&self, cycle: usize, v: &str) -> Option<T> {
        self.cycles.get(cycle).and_then(|m| m.get(v)).copied()
    }

    /// Tab-separated trace of the given variables, one row per cycle.
    pub fn trace(&self, vars: &[Var]) -> String {
        let mut out = String::new();
        out.push_str(&vars.join("\t"));
        out.push('\n');
        for cycle in &self.cycles {
            let row: Vec<String> = vars
                .iter()
                .map(|v| cycle.get(v).map(|x| x.to_string()).unwrap_or_default())
                .collect();
            out.push_str(&row.join("\t"));
            out.push('\n');
        }
        out
    }
}

/// Deterministic trace header: loop outputs first, then outward-facing
/// variables, each in presentation order.
pub fn traced_variables<T: Val>(fs: &[F<T>]) -> Vec<Var> {
    let mut vars = Vec::new();
    for f in fs {
        if f.breaks_evaluation_loop() {
            vars.extend(f.outputs());
        }
    }
    for f in fs {
        if matches!(f, F::Send { .. } | F::FramOutput { .. }) {
            vars.extend(f.inputs());
        }
    }
    vars.dedup();
    vars
}

// ── Simulation ──────────────────────────────────────────────────────────────

pub fn simulate<T: Val>(
    fs: &[F<T>],
    cycles: usize,
    external: &ExternalInputs<T>,
    drop_on_empty: bool,
) -> Result<Cntx<T>, EngineError> {
    let order = evaluation_order(fs)?;
    let mut queues: BTreeMap<Var, VecDeque<T>> = external
        .iter()
        .map(|(v, xs)| (v.clone(), xs.iter().copied().collect()))
        .collect();

    // loop-class state, keyed by the loop's output group
    let mut state: BTreeMap<String, T> = BTreeMap::new();
    for f in fs {
        match f {
            F::Loop { init, outs, .. } | F::LoopBegin { init, outs, .. } => {
                state.insert(outs.join(","), *init);
            }
            _ => {}
        }
    }

    let mut cntx = Cntx {
        cycles: Vec::with_capacity(cycles),
        observed: BTreeMap::new(),
    };
    // last word seen per external queue, for drop-on-empty
    let mut last: BTreeMap<Var, T> = BTreeMap::new();

    for cycle in 0..cycles {
        let mut values: BTreeMap<Var, T> = BTreeMap::new();

        // cycle start: loop-class outputs
        for f in fs {
            match f {
                F::Loop { outs, .. } | F::LoopBegin { outs, .. } => {
                    let x = state[&outs.join(",")];
                    for v in outs {
                        values.insert(v.clone(), x);
                    }
                }
                _ => {}
            }
        }

        // dependency order over the rest
        for f in &order {
            eval(
                f,
                cycle,
                &mut values,
                &mut queues,
                &mut last,
                drop_on_empty,
                &mut cntx,
            )?;
        }

        // cycle end: absorb loop inputs
        for f in fs {
            match f {
                F::Loop { input, outs, .. } | F::LoopEnd { input, outs, .. } => {
                    let x = *values
                        .get(input)
                        .ok_or_else(|| missing(cycle, input, "loop input never produced"))?;
                    state.insert(outs.join(","), x);
                }
                _ => {}
            }
        }

        cntx.cycles.push(values);
    }
    Ok(cntx)
}

fn missing(cycle: usize, var: &str, reason: &str) -> EngineError {
    EngineError::SimulationFailure {
        cycle,
        var: var.to_string(),
        reason: reason.to_string(),
    }
}

fn eval<T: Val>(
    f: &F<T>,
    cycle: usize,
    values: &mut BTreeMap<Var, T>,
    queues: &mut BTreeMap<Var, VecDeque<T>>,
    last: &mut BTreeMap<Var, T>,
    drop_on_empty: bool,
    cntx: &mut Cntx<T>,
) -> Result<(), EngineError> {
    let arg = |values: &BTreeMap<Var, T>, v: &Var| -> Result<T, EngineError> {
        values
            .get(v)
            .copied()
            .ok_or_else(|| missing(cycle, v, "no producer evaluated"))
    };
    let assign = |values: &mut BTreeMap<Var, T>, outs: &[Var], x: T| {
        for v in outs {
            values.insert(v.clone(), x);
        }
    };

    match f {
        F::Loop { .. } | F::LoopBegin { .. } | F::LoopEnd { .. } => {}
        F::Constant { value, outs } => assign(values, outs, *value),
        F::Reg { input, outs } => {
            let x = arg(values, input)?;
            assign(values, outs, x);
        }
        F::Add { a, b, outs } => {
            let x = arg(values, a)?.add(arg(values, b)?).value;
            assign(values, outs, x);
        }
        F::Sub { a, b, outs } => {
            let x = arg(values, a)?.sub(arg(values, b)?).value;
            assign(values, outs, x);
        }
        F::Mul { a, b, outs } => {
            let x = arg(values, a)?.mul(arg(values, b)?).value;
            assign(values, outs, x);
        }
        F::Div {
            numer,
            denom,
            quotient,
            remainder,
        } => {
            let (q, r) = arg(values, numer)?.div_rem(arg(values, denom)?);
            if q.invalid {
                return Err(missing(cycle, numer, "division by zero"));
            }
            assign(values, quotient, q.value);
            assign(values, remainder, r.value);
        }
        F::ShiftL { steps, input, outs } => {
            let x = arg(values, input)?.shl(*steps);
            assign(values, outs, x);
        }
        F::ShiftR { steps, input, outs } => {
            let x = arg(values, input)?.shr(*steps);
            assign(values, outs, x);
        }
        F::Accumulate { terms, outs } => {
            let mut acc = T::default();
            for (sign, v) in terms {
                let x = arg(values, v)?;
                acc = match sign {
                    Sign::Plus => acc.add(x).value,
                    Sign::Minus => acc.sub(x).value,
                };
            }
            assign(values, outs, acc);
        }
        F::Send { input } => {
            let x = arg(values, input)?;
            cntx.observed.entry(input.clone()).or_default().push(x);
        }
        F::FramOutput { input, .. } => {
            let x = arg(values, input)?;
            cntx.observed.entry(input.clone()).or_default().push(x);
        }
        F::Receive { outs } | F::FramInput { outs, .. } => {
            let key = outs.first().cloned().unwrap_or_default();
            let x = match queues.get_mut(&key).and_then(|q| q.pop_front()) {
                Some(x) => {
                    last.insert(key.clone(), x);
                    x
                }
                None if drop_on_empty => last.get(&key).copied().unwrap_or_default(),
                None => return Err(missing(cycle, &key, "external queue empty")),
            };
            assign(values, outs, x);
        }
    }
    Ok(())
}

/// Kahn's ordering over the non-loop functions; loop-class outputs count
/// as already available. A residue means a combinational cycle.
fn evaluation_order<T: Val>(fs: &[F<T>]) -> Result<Vec<F<T>>, EngineError> {
    let mut available: BTreeSet<Var> = BTreeSet::new();
    for f in fs {
        if f.breaks_evaluation_loop() {
            available.extend(f.outputs());
        }
    }

    let mut rest: Vec<&F<T>> = fs.iter().filter(|f| !f.breaks_evaluation_loop()).collect();
    // deterministic tie-break by presentation
    rest.sort_by_key(|f| f.to_string());

    let mut order = Vec::new();
    while !rest.is_empty() {
        let pos = rest
            .iter()
            .position(|f| f.inputs().iter().all(|v| available.contains(v)))
            .ok_or_else(|| EngineError::SimulationFailure {
                cycle: 0,
                var: rest[0].inputs().iter().next().cloned().unwrap_or_default(),
                reason: "combinational cycle without a loop".to_string(),
            })?;
        let f = rest.remove(pos);
        available.extend(f.outputs());
        order.push(f.clone());
    }
    Ok(order)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Fx24_32, Int32};

    fn fib() -> Vec<F<Int32>> {
        vec![
            F::Loop {
                init: Int32::from_int(0),
                input: "b2".to_string(),
                outs: vec!["a1".to_string()],
            },
            F::Loop {
                init: Int32::from_int(1),
                input: "c".to_string(),
                outs: vec!["b1".to_string(), "b2".to_string()],
            },
            F::Add {
                a: "a1".to_string(),
                b: "b1".to_string(),
                outs: vec!["c".to_string()],
            },
        ]
    }

    #[test]
    fn fibonacci_five_cycles() {
        let cntx = simulate(&fib(), 5, &BTreeMap::new(), false).unwrap();
        let a1: Vec<i64> = (0..5)
            .map(|c| cntx.at(c, "a1").unwrap().raw())
            .collect();
        assert_eq!(a1, vec![0, 1, 1, 2, 3]);
        let c: Vec<i64> = (0..5).map(|c| cntx.at(c, "c").unwrap().raw()).collect();
        assert_eq!(c, vec![1, 2, 3, 5, 8]);
    }

    #[test]
    fn broken_loop_simulates_like_the_loop() {
        let mut fs = fib();
        let lp = fs.remove(0);
        let (begin, end) = crate::ir::break_loop_parts(&lp).unwrap();
        fs.push(begin);
        fs.push(end);
        let cntx = simulate(&fs, 5, &BTreeMap::new(), false).unwrap();
        let a1: Vec<i64> = (0..5)
            .map(|c| cntx.at(c, "a1").unwrap().raw())
            .collect();
        assert_eq!(a1, vec![0, 1, 1, 2, 3]);
    }

    #[test]
    fn teacup_trace() {
        // Euler cooling from 180 toward ambient 70, tau = 10, dt = 0.125
        let k = Fx24_32::parse_literal("0.125").unwrap();
        let fs: Vec<F<Fx24_32>> = vec![
            F::Loop {
                init: Fx24_32::from_int(180),
                input: "temp_cup_2".to_string(),
                outs: vec!["temp_cup_1".to_string()],
            },
            F::Constant {
                value: Fx24_32::from_int(70),
                outs: vec!["ambient".to_string()],
            },
            F::Constant {
                value: Fx24_32::from_int(10),
                outs: vec!["tau".to_string()],
            },
            F::Constant {
                value: k,
                outs: vec!["dt".to_string()],
            },
            F::Sub {
                a: "temp_cup_1".to_string(),
                b: "ambient".to_string(),
                outs: vec!["diff".to_string()],
            },
            F::Div {
                numer: "diff".to_string(),
                denom: "tau".to_string(),
                quotient: vec!["rate".to_string()],
                remainder: vec![],
            },
            F::Mul {
                a: "rate".to_string(),
                b: "dt".to_string(),
                outs: vec!["delta".to_string()],
            },
            F::Sub {
                a: "temp_cup_1".to_string(),
                b: "delta".to_string(),
                outs: vec!["temp_cup_2".to_string()],
            },
        ];
        let cntx = simulate(&fs, 10, &BTreeMap::new(), false).unwrap();
        let temps: Vec<String> = (0..10)
            .map(|c| cntx.at(c, "temp_cup_1").unwrap().to_string())
            .collect();
        assert_eq!(
            temps,
            vec![
                "180.000", "178.625", "177.375", "176.125", "174.875", "173.625", "172.375",
                "171.125", "169.875", "168.750"
            ]
        );
    }

    #[test]
    fn receive_fails_on_empty_queue() {
        let fs: Vec<F<Int32>> = vec![
            F::Receive {
                outs: vec!["x".to_string()],
            },
            F::Send {
                input: "x".to_string(),
            },
        ];
        let mut external = BTreeMap::new();
        external.insert("x".to_string(), vec![Int32::from_int(7)]);
        let err = simulate(&fs, 2, &external, false).unwrap_err();
        assert!(matches!(err, EngineError::SimulationFailure { cycle: 1, .. }));

        // with dropping enabled the last value is reused
        let cntx = simulate(&fs, 2, &external, true).unwrap();
        assert_eq!(cntx.observed["x"], vec![Int32::from_int(7); 2]);
    }

    #[test]
    fn send_values_are_observed() {
        let mut fs = fib();
        fs.push(F::Send {
            input: "c".to_string(),
        });
        let cntx = simulate(&fs, 5, &BTreeMap::new(), false).unwrap();
        let sent: Vec<i64> = cntx.observed["c"].iter().map(|x| x.raw()).collect();
        assert_eq!(sent, vec![1, 2, 3, 5, 8]);
    }

    #[test]
    fn missing_producer_is_reported() {
        let fs: Vec<F<Int32>> = vec![F::Send {
            input: "ghost".to_string(),
        }];
        let err = simulate(&fs, 1, &BTreeMap::new(), false).unwrap_err();
        assert!(matches!(
            err,
            EngineError::SimulationFailure { var, .. } if var == "ghost"
        ));
    }

    #[test]
    fn trace_format_is_tabular() {
        let cntx = simulate(&fib(), 2, &BTreeMap::new(), false).unwrap();
        let trace = cntx.trace(&["a1".to_string(), "c".to_string()]);
        let lines: Vec<&str> = trace.lines().collect();
        assert_eq!(lines[0], "a1\tc");
        assert_eq!(lines[1], "0\t1");
        assert_eq!(lines[2], "1\t2");
    }
}
