// pu.rs — The processing-unit contract and the fixed PU variant set.
//
// Every PU is a self-contained stateful scheduler for one concern. The
// contract is uniform: admissibility check on bind, endpoint option
// enumeration, endpoint decision application, a process record, locks, and
// control signals at a given tick. `AnyPu` is the closed union; adding a PU
// kind means adding a variant and extending each dispatch arm.
//
// Preconditions: decisions passed to `endpoint_decision` were taken from
//   the PU's own current options (violations are rejected, not repaired).
// Postconditions: decision application returns a fresh snapshot; the
//   receiver is never mutated.
// Failure modes: `try_bind` returns a human-readable reason; decisions
//   outside any offered option return `OptionViolation`.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::accum::Accum;
use crate::divider::Divider;
use crate::endpoint::{EndpointDecision, EndpointOption};
use crate::error::EngineError;
use crate::fram::Fram;
use crate::ir::{Diff, Lock, Patch, Var, F};
use crate::multiplier::Multiplier;
use crate::process::Process;
use crate::shift::Shift;
use crate::spi::Spi;
use crate::time::Tick;
use crate::value::Val;

/// Index of a control wire on the shared bus.
pub type SignalIdx = usize;

// ── Instructions ────────────────────────────────────────────────────────────

/// Which argument port a two-input PU latches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArgSel {
    First,
    Second,
}

/// Which result port a divider publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DivSel {
    Quotient,
    Remainder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShiftDir {
    Left,
    Right,
}

/// Microinstructions across all PU kinds, plus the bus transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Instr {
    FramLoad { addr: usize },
    FramSave { addr: usize },
    /// First term of an accumulation: clears the register, then adds.
    AccumResetLoad { neg: bool },
    AccumLoad { neg: bool },
    AccumOut,
    MulLoad { sel: ArgSel },
    MulOut,
    DivLoad { sel: ArgSel },
    DivOut { sel: DivSel },
    ShiftInit,
    ShiftWork { dir: ShiftDir },
    ShiftOut,
    SpiReceive,
    SpiSend,
    /// One variable crossing the bus between two sub-PUs.
    Transport {
        var: Var,
        src: String,
        dst: String,
    },
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::FramLoad { addr } => write!(f, "load({addr})"),
            Instr::FramSave { addr } => write!(f, "save({addr})"),
            Instr::AccumResetLoad { neg } => {
                write!(f, "resetload({})", if *neg { "-" } else { "+" })
            }
            Instr::AccumLoad { neg } => write!(f, "load({})", if *neg { "-" } else { "+" }),
            Instr::AccumOut => write!(f, "out"),
            Instr::MulLoad { sel } => write!(f, "load({sel:?})"),
            Instr::MulOut => write!(f, "out"),
            Instr::DivLoad { sel } => write!(f, "load({sel:?})"),
            Instr::DivOut { sel } => write!(f, "out({sel:?})"),
            Instr::ShiftInit => write!(f, "init"),
            Instr::ShiftWork { dir } => write!(f, "work({dir:?})"),
            Instr::ShiftOut => write!(f, "out"),
            Instr::SpiReceive => write!(f, "receive"),
            Instr::SpiSend => write!(f, "send"),
            Instr::Transport { var, src, dst } => write!(f, "transport {var} {src} -> {dst}"),
        }
    }
}

// ── Contract ────────────────────────────────────────────────────────────────

/// The uniform PU contract.
pub trait ProcessorUnit<T: Val>: Sized + Clone {
    /// Admissibility check; on success, a snapshot with the function stored.
    fn try_bind(&self, f: &F<T>) -> Result<Self, String>;

    /// Target/Source actions currently offered, with time constraints.
    fn endpoint_options(&self) -> Vec<EndpointOption>;

    /// Commit a decision. Must verify it lies within some offered option.
    fn endpoint_decision(&self, d: &EndpointDecision) -> Result<Self, EngineError>;

    /// The PU's scheduling history.
    fn process(&self) -> &Process<T>;

    /// Current inter-variable ordering constraints.
    fn locks(&self) -> Vec<Lock>;

    /// Control wires driven at tick `t`, projected through the PU's port
    /// map. Ticks outside any scheduled instruction yield the no-op word.
    fn signals_at(&self, t: Tick) -> Vec<(SignalIdx, bool)>;
}

// ── The closed union ────────────────────────────────────────────────────────

/// The fixed PU variant set.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyPu<T: Val> {
    Fram(Fram<T>),
    Accum(Accum<T>),
    Mul(Multiplier<T>),
    Div(Divider<T>),
    Shift(Shift<T>),
    Spi(Spi<T>),
}

impl<T: Val> AnyPu<T> {
    pub fn kind(&self) -> &'static str {
        match self {
            AnyPu::Fram(_) => "fram",
            AnyPu::Accum(_) => "accum",
            AnyPu::Mul(_) => "mul",
            AnyPu::Div(_) => "div",
            AnyPu::Shift(_) => "shift",
            AnyPu::Spi(_) => "spi",
        }
    }

    /// Delegate a break-loop rewrite to the hosting PU. Only framed memory
    /// hosts loops.
    pub fn break_loop(&self, lp: &F<T>) -> Option<Self> {
        match self {
            AnyPu::Fram(fram) => fram.break_loop(lp).map(AnyPu::Fram),
            _ => None,
        }
    }
}

impl<T: Val> ProcessorUnit<T> for AnyPu<T> {
    fn try_bind(&self, f: &F<T>) -> Result<Self, String> {
        match self {
            AnyPu::Fram(pu) => pu.try_bind(f).map(AnyPu::Fram),
            AnyPu::Accum(pu) => pu.try_bind(f).map(AnyPu::Accum),
            AnyPu::Mul(pu) => pu.try_bind(f).map(AnyPu::Mul),
            AnyPu::Div(pu) => pu.try_bind(f).map(AnyPu::Div),
            AnyPu::Shift(pu) => pu.try_bind(f).map(AnyPu::Shift),
            AnyPu::Spi(pu) => pu.try_bind(f).map(AnyPu::Spi),
        }
    }

    fn endpoint_options(&self) -> Vec<EndpointOption> {
        match self {
            AnyPu::Fram(pu) => pu.endpoint_options(),
            AnyPu::Accum(pu) => pu.endpoint_options(),
            AnyPu::Mul(pu) => pu.endpoint_options(),
            AnyPu::Div(pu) => pu.endpoint_options(),
            AnyPu::Shift(pu) => pu.endpoint_options(),
            AnyPu::Spi(pu) => pu.endpoint_options(),
        }
    }

    fn endpoint_decision(&self, d: &EndpointDecision) -> Result<Self, EngineError> {
        match self {
            AnyPu::Fram(pu) => pu.endpoint_decision(d).map(AnyPu::Fram),
            AnyPu::Accum(pu) => pu.endpoint_decision(d).map(AnyPu::Accum),
            AnyPu::Mul(pu) => pu.endpoint_decision(d).map(AnyPu::Mul),
            AnyPu::Div(pu) => pu.endpoint_decision(d).map(AnyPu::Div),
            AnyPu::Shift(pu) => pu.endpoint_decision(d).map(AnyPu::Shift),
            AnyPu::Spi(pu) => pu.endpoint_decision(d).map(AnyPu::Spi),
        }
    }

    fn process(&self) -> &Process<T> {
        match self {
            AnyPu::Fram(pu) => pu.process(),
            AnyPu::Accum(pu) => pu.process(),
            AnyPu::Mul(pu) => pu.process(),
            AnyPu::Div(pu) => pu.process(),
            AnyPu::Shift(pu) => pu.process(),
            AnyPu::Spi(pu) => pu.process(),
        }
    }

    fn locks(&self) -> Vec<Lock> {
        match self {
            AnyPu::Fram(pu) => pu.locks(),
            AnyPu::Accum(pu) => pu.locks(),
            AnyPu::Mul(pu) => pu.locks(),
            AnyPu::Div(pu) => pu.locks(),
            AnyPu::Shift(pu) => pu.locks(),
            AnyPu::Spi(pu) => pu.locks(),
        }
    }

    fn signals_at(&self, t: Tick) -> Vec<(SignalIdx, bool)> {
        match self {
            AnyPu::Fram(pu) => pu.signals_at(t),
            AnyPu::Accum(pu) => pu.signals_at(t),
            AnyPu::Mul(pu) => pu.signals_at(t),
            AnyPu::Div(pu) => pu.signals_at(t),
            AnyPu::Shift(pu) => pu.signals_at(t),
            AnyPu::Spi(pu) => pu.signals_at(t),
        }
    }
}

impl<T: Val> Patch for AnyPu<T> {
    fn patch(&self, diff: &Diff) -> Self {
        match self {
            AnyPu::Fram(pu) => AnyPu::Fram(pu.patch(diff)),
            AnyPu::Accum(pu) => AnyPu::Accum(pu.patch(diff)),
            AnyPu::Mul(pu) => AnyPu::Mul(pu.patch(diff)),
            AnyPu::Div(pu) => AnyPu::Div(pu.patch(diff)),
            AnyPu::Shift(pu) => AnyPu::Shift(pu.patch(diff)),
            AnyPu::Spi(pu) => AnyPu::Spi(pu.patch(diff)),
        }
    }
}

// ── Microcode merge ─────────────────────────────────────────────────────────

/// Merge per-PU signal assignments into one bus word of `width` wires.
/// Two PUs driving the same wire with different values at the same tick is
/// a contract violation.
pub fn merge_microcode(
    width: usize,
    t: Tick,
    assignments: &[(SignalIdx, bool)],
) -> Result<Vec<Option<bool>>, EngineError> {
    let mut word: Vec<Option<bool>> = vec![None; width];
    for &(idx, value) in assignments {
        debug_assert!(idx < width, "signal {idx} outside bus width {width}");
        match word[idx] {
            None => word[idx] = Some(value),
            Some(prev) if prev == value => {}
            Some(_) => return Err(EngineError::MicrocodeConflict { tick: t, signal: idx }),
        }
    }
    Ok(word)
}

/// Render a merged word as a hex string, one bit per wire, undriven wires
/// reading as 0. Wire 0 is the least significant bit.
pub fn microcode_hex(word: &[Option<bool>]) -> String {
    let nibbles = word.len().div_ceil(4);
    let mut out = String::with_capacity(nibbles);
    for n in (0..nibbles).rev() {
        let mut nibble = 0u8;
        for bit in 0..4 {
            let idx = n * 4 + bit;
            if idx < word.len() && word[idx] == Some(true) {
                nibble |= 1 << bit;
            }
        }
        out.push(char::from_digit(nibble as u32, 16).unwrap());
    }
    out
}

// ── Tests ───────────────────────────────────────────────────────────────────
