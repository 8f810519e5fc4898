// time.rs — Tagged clocks, closed tick intervals, and time constraints.
//
// Every scheduling quantity in the engine is expressed in discrete ticks.
// Intervals are closed on both ends; `Tick::MAX` stands in for "no upper
// bound". Clock values optionally carry a branch tag so that divergent
// control flow can be rejected at arithmetic time rather than silently
// merged.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: adding clocks with mismatched tags returns an error.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Discrete scheduling time. Tick −1 is the reset tick in microcode dumps;
/// all scheduled activity lives at ticks ≥ 0.
pub type Tick = i64;

/// Stand-in for "no upper bound" on availability or duration.
pub const UNBOUNDED: Tick = Tick::MAX;

// ── Closed interval ─────────────────────────────────────────────────────────

/// A closed interval of ticks, `[inf, sup]`, both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeInterval {
    inf: Tick,
    sup: Tick,
}

impl TimeInterval {
    pub fn new(inf: Tick, sup: Tick) -> Self {
        debug_assert!(inf <= sup, "interval [{inf}, {sup}] is empty");
        TimeInterval { inf, sup }
    }

    /// The single-tick interval `[t, t]`.
    pub fn singleton(t: Tick) -> Self {
        TimeInterval { inf: t, sup: t }
    }

    pub fn inf(&self) -> Tick {
        self.inf
    }

    pub fn sup(&self) -> Tick {
        self.sup
    }

    /// Number of ticks covered: `sup − inf + 1`.
    pub fn width(&self) -> Tick {
        if self.sup == UNBOUNDED {
            UNBOUNDED
        } else {
            self.sup - self.inf + 1
        }
    }

    pub fn contains(&self, t: Tick) -> bool {
        self.inf <= t && t <= self.sup
    }

    pub fn intersects(&self, other: &TimeInterval) -> bool {
        self.inf <= other.sup && other.inf <= self.sup
    }

    /// Whether `other` lies entirely within `self`.
    pub fn encloses(&self, other: &TimeInterval) -> bool {
        self.inf <= other.inf && other.sup <= self.sup
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.inf == self.sup {
            write!(f, "{}", self.inf)
        } else if self.sup == UNBOUNDED {
            write!(f, "[{}..∞]", self.inf)
        } else {
            write!(f, "[{}..{}]", self.inf, self.sup)
        }
    }
}

// ── Tagged time ─────────────────────────────────────────────────────────────

/// A clock value annotated with an optional branch tag.
///
/// Tags are combined by addition: either side untagged, or both tags equal.
/// Anything else indicates two clocks from divergent control-flow branches
/// and is a contract violation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaggedTime {
    pub tag: Option<String>,
    pub tick: Tick,
}

impl TaggedTime {
    pub fn new(tick: Tick) -> Self {
        TaggedTime { tag: None, tick }
    }

    pub fn with_tag(tick: Tick, tag: impl Into<String>) -> Self {
        TaggedTime {
            tag: Some(tag.into()),
            tick,
        }
    }

    /// Add two clocks, combining tags. Mismatched tags are rejected.
    pub fn add(&self, other: &TaggedTime) -> Result<TaggedTime, EngineError> {
        let tag = match (&self.tag, &other.tag) {
            (None, t) | (t, None) => t.clone(),
            (Some(a), Some(b)) if a == b => Some(a.clone()),
            (Some(a), Some(b)) => {
                return Err(EngineError::TimeWrap {
                    detail: format!("clock tag mismatch: '{a}' + '{b}'"),
                })
            }
        };
        Ok(TaggedTime {
            tag,
            tick: self.tick + other.tick,
        })
    }

    /// Advance by a plain (untagged) number of ticks.
    pub fn advance(&self, d: Tick) -> TaggedTime {
        TaggedTime {
            tag: self.tag.clone(),
            tick: self.tick + d,
        }
    }
}

impl fmt::Display for TaggedTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}@{}", self.tick, tag),
            None => write!(f, "{}", self.tick),
        }
    }
}

// ── Time constraint ─────────────────────────────────────────────────────────

/// Admissible placements for an endpoint action: a closed interval of start
/// ticks and a closed interval of durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeConstraint {
    pub available: TimeInterval,
    pub duration: TimeInterval,
}

impl TimeConstraint {
    pub fn new(available: TimeInterval, duration: TimeInterval) -> Self {
        TimeConstraint {
            available,
            duration,
        }
    }

    /// Constraint admitting any start in `[from, ∞]` with any duration ≥ 1.
    pub fn from_tick(from: Tick) -> Self {
        TimeConstraint {
            available: TimeInterval::new(from, UNBOUNDED),
            duration: TimeInterval::new(1, UNBOUNDED),
        }
    }

    /// A decision interval is admissible when its start lies in `available`,
    /// its end does not exceed `available.sup`, and its width lies in
    /// `duration`.
    pub fn admits(&self, at: &TimeInterval) -> bool {
        let dur = at.width();
        at.inf() >= self.available.inf()
            && (self.available.sup() == UNBOUNDED || at.sup() <= self.available.sup())
            && self.duration.inf() <= dur
            && dur <= self.duration.sup()
    }
}

impl fmt::Display for TimeConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} dur {}", self.available, self.duration)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_width() {
        assert_eq!(TimeInterval::new(3, 5).width(), 3);
        assert_eq!(TimeInterval::singleton(7).width(), 1);
        assert_eq!(TimeInterval::new(0, UNBOUNDED).width(), UNBOUNDED);
    }

    #[test]
    fn interval_relations() {
        let a = TimeInterval::new(2, 6);
        assert!(a.contains(2));
        assert!(a.contains(6));
        assert!(!a.contains(7));
        assert!(a.intersects(&TimeInterval::new(6, 9)));
        assert!(!a.intersects(&TimeInterval::new(7, 9)));
        assert!(a.encloses(&TimeInterval::new(3, 5)));
        assert!(!a.encloses(&TimeInterval::new(5, 7)));
    }

    #[test]
    fn tag_combination() {
        let plain = TaggedTime::new(3);
        let tagged = TaggedTime::with_tag(4, "b1");
        let sum = plain.add(&tagged).unwrap();
        assert_eq!(sum.tick, 7);
        assert_eq!(sum.tag.as_deref(), Some("b1"));

        let same = tagged.add(&TaggedTime::with_tag(1, "b1")).unwrap();
        assert_eq!(same.tick, 5);
    }

    #[test]
    fn tag_mismatch_rejected() {
        let a = TaggedTime::with_tag(1, "b1");
        let b = TaggedTime::with_tag(1, "b2");
        assert!(a.add(&b).is_err());
    }

    #[test]
    fn constraint_admission() {
        let tc = TimeConstraint::new(TimeInterval::new(5, 10), TimeInterval::new(1, 2));
        assert!(tc.admits(&TimeInterval::singleton(5)));
        assert!(tc.admits(&TimeInterval::new(9, 10)));
        assert!(!tc.admits(&TimeInterval::singleton(4)), "starts too early");
        assert!(!tc.admits(&TimeInterval::new(10, 11)), "runs past available");
        assert!(!tc.admits(&TimeInterval::new(5, 7)), "duration too long");
    }

    #[test]
    fn unbounded_constraint() {
        let tc = TimeConstraint::from_tick(3);
        assert!(tc.admits(&TimeInterval::singleton(3)));
        assert!(tc.admits(&TimeInterval::new(100, 250)));
        assert!(!tc.admits(&TimeInterval::singleton(2)));
    }
}
