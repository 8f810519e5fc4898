// value.rs — Bus value types: sized integers and binary fixed-point.
//
// Every value travelling over the bus is a two's-complement word of a fixed
// width, optionally interpreted with a binary point. Arithmetic wraps to the
// word width and flags the wrap through the attribute bits; whether a PU
// saturates or forwards the flag is part of that PU's contract.
//
// `Fx<M, B>` is a B-bit word with M integer (magnitude + sign) bits, hence
// B − M fractional bits: `fx24.32` is a 32-bit word with 8 fractional bits.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: literal parsing returns a message; division by zero yields
//   an invalid attribute, never a panic.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Attribute wrapper ───────────────────────────────────────────────────────

/// A value together with its attribute bits as carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attr<T> {
    pub value: T,
    pub invalid: bool,
    pub overflow: bool,
}

impl<T> Attr<T> {
    pub fn ok(value: T) -> Self {
        Attr {
            value,
            invalid: false,
            overflow: false,
        }
    }

    pub fn overflowed(value: T) -> Self {
        Attr {
            value,
            invalid: false,
            overflow: true,
        }
    }

    pub fn invalid(value: T) -> Self {
        Attr {
            value,
            invalid: true,
            overflow: false,
        }
    }
}

// ── Value contract ──────────────────────────────────────────────────────────

/// Contract for every value type the engine can synthesize over.
///
/// Operations wrap to `WIDTH` bits and report the wrap in the attribute
/// bits. Shifts are logical. `raw_bits` yields the word masked to `WIDTH`
/// for microcode/testbench dumps.
pub trait Val:
    Copy
    + Clone
    + Default
    + PartialEq
    + fmt::Debug
    + fmt::Display
    + Serialize
    + Send
    + Sync
    + 'static
{
    const WIDTH: u32;

    fn from_int(i: i64) -> Self;

    /// Parse a literal as written in an algorithm file (`-12`, `0.125`).
    fn parse_literal(s: &str) -> Result<Self, String>;

    fn add(self, rhs: Self) -> Attr<Self>;
    fn sub(self, rhs: Self) -> Attr<Self>;
    fn mul(self, rhs: Self) -> Attr<Self>;

    /// Quotient and remainder. Division by zero marks both results invalid.
    fn div_rem(self, rhs: Self) -> (Attr<Self>, Attr<Self>);

    fn shl(self, n: u32) -> Self;
    fn shr(self, n: u32) -> Self;

    fn is_zero(self) -> bool;

    /// The word masked to `WIDTH` bits, for bit-level dumps.
    fn raw_bits(self) -> u64;
}

// ── Width helpers ───────────────────────────────────────────────────────────

fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Wrap a wide intermediate to `width` bits, returning the sign-extended
/// result and whether the value changed.
fn wrap_signed(v: i128, width: u32) -> (i64, bool) {
    let m = mask(width) as i128;
    let bits = (v & m) as u64;
    let wrapped = sign_extend(bits, width);
    (wrapped, wrapped as i128 != v)
}

fn sign_extend(bits: u64, width: u32) -> i64 {
    if width >= 64 {
        return bits as i64;
    }
    let sign = 1u64 << (width - 1);
    if bits & sign != 0 {
        (bits | !mask(width)) as i64
    } else {
        bits as i64
    }
}

// ── Sized integer ───────────────────────────────────────────────────────────

/// Two's-complement signed integer of `W` bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntX<const W: u32>(i64);

impl<const W: u32> IntX<W> {
    pub fn raw(self) -> i64 {
        self.0
    }
}

impl<const W: u32> fmt::Display for IntX<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<const W: u32> Val for IntX<W> {
    const WIDTH: u32 = W;

    fn from_int(i: i64) -> Self {
        IntX(wrap_signed(i as i128, W).0)
    }

    fn parse_literal(s: &str) -> Result<Self, String> {
        let i: i64 = s
            .trim()
            .parse()
            .map_err(|_| format!("'{s}' is not an integer literal"))?;
        Ok(Self::from_int(i))
    }

    fn add(self, rhs: Self) -> Attr<Self> {
        let (v, wrapped) = wrap_signed(self.0 as i128 + rhs.0 as i128, W);
        if wrapped {
            Attr::overflowed(IntX(v))
        } else {
            Attr::ok(IntX(v))
        }
    }

    fn sub(self, rhs: Self) -> Attr<Self> {
        let (v, wrapped) = wrap_signed(self.0 as i128 - rhs.0 as i128, W);
        if wrapped {
            Attr::overflowed(IntX(v))
        } else {
            Attr::ok(IntX(v))
        }
    }

    fn mul(self, rhs: Self) -> Attr<Self> {
        let (v, wrapped) = wrap_signed(self.0 as i128 * rhs.0 as i128, W);
        if wrapped {
            Attr::overflowed(IntX(v))
        } else {
            Attr::ok(IntX(v))
        }
    }

    fn div_rem(self, rhs: Self) -> (Attr<Self>, Attr<Self>) {
        if rhs.0 == 0 {
            return (Attr::invalid(IntX(0)), Attr::invalid(IntX(0)));
        }
        (Attr::ok(IntX(self.0 / rhs.0)), Attr::ok(IntX(self.0 % rhs.0)))
    }

    fn shl(self, n: u32) -> Self {
        let bits = (self.raw_bits() << n) & mask(W);
        IntX(sign_extend(bits, W))
    }

    fn shr(self, n: u32) -> Self {
        IntX(sign_extend(self.raw_bits() >> n, W))
    }

    fn is_zero(self) -> bool {
        self.0 == 0
    }

    fn raw_bits(self) -> u64 {
        (self.0 as u64) & mask(W)
    }
}

// ── Binary fixed-point ──────────────────────────────────────────────────────

/// Binary fixed-point: a `B`-bit two's-complement word with `M` integer
/// bits, `B − M` fractional bits. Multiplication takes the full-width
/// product then shifts right by the fractional width. Division truncates
/// the quotient to its integer part (re-scaled to the word); the remainder
/// keeps the dividend's scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fx<const M: u32, const B: u32>(i64);

impl<const M: u32, const B: u32> Fx<M, B> {
    const FRAC: u32 = B - M;

    pub fn from_raw(raw: i64) -> Self {
        Fx(wrap_signed(raw as i128, B).0)
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    fn scale() -> f64 {
        (1u64 << Self::FRAC) as f64
    }
}

impl<const M: u32, const B: u32> fmt::Display for Fx<M, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0 as f64 / Self::scale())
    }
}

impl<const M: u32, const B: u32> Val for Fx<M, B> {
    const WIDTH: u32 = B;

    fn from_int(i: i64) -> Self {
        Fx(wrap_signed((i as i128) << Self::FRAC, B).0)
    }

    fn parse_literal(s: &str) -> Result<Self, String> {
        let t = s.trim();
        let x: f64 = t
            .parse()
            .map_err(|_| format!("'{s}' is not a numeric literal"))?;
        if !x.is_finite() {
            return Err(format!("'{s}' is not finite"));
        }
        let raw = (x * Self::scale()).round();
        Ok(Fx(wrap_signed(raw as i128, B).0))
    }

    fn add(self, rhs: Self) -> Attr<Self> {
        let (v, wrapped) = wrap_signed(self.0 as i128 + rhs.0 as i128, B);
        if wrapped {
            Attr::overflowed(Fx(v))
        } else {
            Attr::ok(Fx(v))
        }
    }

    fn sub(self, rhs: Self) -> Attr<Self> {
        let (v, wrapped) = wrap_signed(self.0 as i128 - rhs.0 as i128, B);
        if wrapped {
            Attr::overflowed(Fx(v))
        } else {
            Attr::ok(Fx(v))
        }
    }

    fn mul(self, rhs: Self) -> Attr<Self> {
        let product = (self.0 as i128 * rhs.0 as i128) >> Self::FRAC;
        let (v, wrapped) = wrap_signed(product, B);
        if wrapped {
            Attr::overflowed(Fx(v))
        } else {
            Attr::ok(Fx(v))
        }
    }

    fn div_rem(self, rhs: Self) -> (Attr<Self>, Attr<Self>) {
        if rhs.0 == 0 {
            return (Attr::invalid(Fx(0)), Attr::invalid(Fx(0)));
        }
        let q = (self.0 as i128 / rhs.0 as i128) << Self::FRAC;
        let r = self.0 as i128 % rhs.0 as i128;
        let (qv, q_wrapped) = wrap_signed(q, B);
        let (rv, _) = wrap_signed(r, B);
        let quotient = if q_wrapped {
            Attr::overflowed(Fx(qv))
        } else {
            Attr::ok(Fx(qv))
        };
        (quotient, Attr::ok(Fx(rv)))
    }

    fn shl(self, n: u32) -> Self {
        let bits = (self.raw_bits() << n) & mask(B);
        Fx(sign_extend(bits, B))
    }

    fn shr(self, n: u32) -> Self {
        Fx(sign_extend(self.raw_bits() >> n, B))
    }

    fn is_zero(self) -> bool {
        self.0 == 0
    }

    fn raw_bits(self) -> u64 {
        (self.0 as u64) & mask(B)
    }
}

// ── Common instantiations ───────────────────────────────────────────────────

pub type Int32 = IntX<32>;
pub type Fx16_32 = Fx<16, 32>;
pub type Fx24_32 = Fx<24, 32>;
pub type Fx32_32 = Fx<32, 32>;

// ── Tests ───────────────────────────────────────────────────────────────────
