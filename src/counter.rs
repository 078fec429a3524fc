//! Route counters and count patterns.
//!
//! A [`RouteCounter`] is shared by every rule that should see the same
//! running count; a [`CountPattern`] decides whether a response applies to
//! the current count.

use crate::error::DefinitionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared, monotonically increasing invocation counter.
///
/// Cloning yields another handle to the same count. The router never resets
/// a counter on its own; call [`RouteCounter::reset`] at lifecycle boundaries
/// such as the start of a simulated session.
#[derive(Clone, Default)]
pub struct RouteCounter(Arc<AtomicU64>);

impl RouteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the previous value.
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

impl fmt::Debug for RouteCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RouteCounter").field(&self.get()).finish()
    }
}

/// Selects requests by their position in a counter sequence.
///
/// `Every(n)` matches whenever `count % n == 0`, which includes a count of 0.
/// The router evaluates patterns after incrementing, so the first resolved
/// request sees 1 and a fresh counter never reaches that boundary through
/// resolution alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCountPattern", into = "String")]
pub enum CountPattern {
    /// `3`
    Exact(u64),
    /// `2n`
    Every(u64),
    /// `odd`
    Odd,
    /// `even`
    Even,
    /// `>5`
    GreaterThan(u64),
    /// `<5`
    LessThan(u64),
    /// `2-4`, inclusive
    Range(u64, u64),
}

impl CountPattern {
    pub fn matches(&self, count: u64) -> bool {
        match *self {
            CountPattern::Exact(n) => count == n,
            CountPattern::Every(n) => count % n == 0,
            CountPattern::Odd => count % 2 == 1,
            CountPattern::Even => count % 2 == 0,
            CountPattern::GreaterThan(n) => count > n,
            CountPattern::LessThan(n) => count < n,
            CountPattern::Range(start, end) => (start..=end).contains(&count),
        }
    }
}

impl FromStr for CountPattern {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pattern = s.trim();
        let invalid = |reason: &str| DefinitionError::InvalidCountPattern {
            pattern: s.to_string(),
            reason: reason.to_string(),
        };
        let number = |text: &str| {
            text.trim()
                .parse::<u64>()
                .map_err(|_| invalid("expected a non-negative integer"))
        };

        match pattern {
            "odd" => Ok(CountPattern::Odd),
            "even" => Ok(CountPattern::Even),
            _ if pattern.ends_with('n') => {
                let n = number(&pattern[..pattern.len() - 1])?;
                if n == 0 {
                    return Err(invalid("period must be at least 1"));
                }
                Ok(CountPattern::Every(n))
            }
            _ if pattern.starts_with('>') => Ok(CountPattern::GreaterThan(number(&pattern[1..])?)),
            _ if pattern.starts_with('<') => Ok(CountPattern::LessThan(number(&pattern[1..])?)),
            _ if pattern.contains('-') => {
                let (start, end) = pattern
                    .split_once('-')
                    .ok_or_else(|| invalid("expected a range"))?;
                let (start, end) = (number(start)?, number(end)?);
                if start > end {
                    return Err(invalid("range start is greater than its end"));
                }
                Ok(CountPattern::Range(start, end))
            }
            _ => Ok(CountPattern::Exact(number(pattern)?)),
        }
    }
}

impl fmt::Display for CountPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountPattern::Exact(n) => write!(f, "{}", n),
            CountPattern::Every(n) => write!(f, "{}n", n),
            CountPattern::Odd => f.write_str("odd"),
            CountPattern::Even => f.write_str("even"),
            CountPattern::GreaterThan(n) => write!(f, ">{}", n),
            CountPattern::LessThan(n) => write!(f, "<{}", n),
            CountPattern::Range(start, end) => write!(f, "{}-{}", start, end),
        }
    }
}

impl From<u64> for CountPattern {
    fn from(n: u64) -> Self {
        CountPattern::Exact(n)
    }
}

impl From<CountPattern> for String {
    fn from(pattern: CountPattern) -> Self {
        pattern.to_string()
    }
}

/// YAML lets a pattern be a bare integer or a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawCountPattern {
    Number(u64),
    Text(String),
}

impl TryFrom<RawCountPattern> for CountPattern {
    type Error = DefinitionError;

    fn try_from(raw: RawCountPattern) -> Result<Self, Self::Error> {
        match raw {
            RawCountPattern::Number(n) => Ok(CountPattern::Exact(n)),
            RawCountPattern::Text(text) => text.parse(),
        }
    }
}
