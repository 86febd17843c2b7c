//! Exact fraction arithmetic for musical positions and durations.
//!
//! Positions are measured in whole notes from the start of the score.
//! Values are always stored in lowest terms with a positive denominator, so
//! structural equality is value equality. Intermediate products are
//! computed in `i128` and only narrowed back to `i64` after reduction.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ArithmeticError;

/// A position or duration in whole-note units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRational", into = "RawRational")]
pub struct RationalTime {
    numerator: i64,
    denominator: i64,
}

impl RationalTime {
    pub const ZERO: RationalTime = RationalTime {
        numerator: 0,
        denominator: 1,
    };

    /// Build a reduced fraction.
    ///
    /// ```
    /// # use scoreplay::RationalTime;
    /// let t = RationalTime::new(2, -8).unwrap();
    /// assert_eq!((t.numerator(), t.denominator()), (-1, 4));
    /// ```
    pub fn new(numerator: i64, denominator: i64) -> Result<Self, ArithmeticError> {
        reduce(numerator as i128, denominator as i128)
    }

    /// A whole number of whole notes.
    pub fn from_integer(value: i64) -> Self {
        Self {
            numerator: value,
            denominator: 1,
        }
    }

    pub fn numerator(&self) -> i64 {
        self.numerator
    }

    pub fn denominator(&self) -> i64 {
        self.denominator
    }

    pub fn is_zero(&self) -> bool {
        self.numerator == 0
    }

    pub fn is_negative(&self) -> bool {
        self.numerator < 0
    }

    pub fn add(self, other: Self) -> Result<Self, ArithmeticError> {
        let n = (self.numerator as i128 * other.denominator as i128)
            .checked_add(other.numerator as i128 * self.denominator as i128)
            .ok_or(ArithmeticError::Overflow)?;
        let d = self.denominator as i128 * other.denominator as i128;
        reduce(n, d)
    }

    pub fn subtract(self, other: Self) -> Result<Self, ArithmeticError> {
        let n = (self.numerator as i128 * other.denominator as i128)
            .checked_sub(other.numerator as i128 * self.denominator as i128)
            .ok_or(ArithmeticError::Overflow)?;
        let d = self.denominator as i128 * other.denominator as i128;
        reduce(n, d)
    }

    /// Scale by an integer factor (used for tuplets and dotted values).
    pub fn multiply(self, factor: i64) -> Result<Self, ArithmeticError> {
        reduce(self.numerator as i128 * factor as i128, self.denominator as i128)
    }

    pub fn compare(&self, other: &Self) -> Ordering {
        // Denominators are positive, so cross-multiplication preserves order.
        let lhs = self.numerator as i128 * other.denominator as i128;
        let rhs = other.numerator as i128 * self.denominator as i128;
        lhs.cmp(&rhs)
    }

    /// Convert to real seconds given the length of a whole note in seconds.
    pub fn to_real(&self, whole_note_seconds: f64) -> f64 {
        self.to_f64() * whole_note_seconds
    }

    /// Approximate value in whole notes.
    pub fn to_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

impl Default for RationalTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialOrd for RationalTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RationalTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl fmt::Display for RationalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denominator == 1 {
            write!(f, "{}", self.numerator)
        } else {
            write!(f, "{}/{}", self.numerator, self.denominator)
        }
    }
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn reduce(numerator: i128, denominator: i128) -> Result<RationalTime, ArithmeticError> {
    if denominator == 0 {
        return Err(ArithmeticError::ZeroDenominator);
    }
    if numerator == 0 {
        return Ok(RationalTime::ZERO);
    }

    let negative = (numerator < 0) != (denominator < 0);
    let n = numerator.unsigned_abs();
    let d = denominator.unsigned_abs();
    let g = gcd(n, d);
    let (n, d) = (n / g, d / g);

    let n = i64::try_from(n).map_err(|_| ArithmeticError::Overflow)?;
    let d = i64::try_from(d).map_err(|_| ArithmeticError::Overflow)?;

    Ok(RationalTime {
        numerator: if negative { -n } else { n },
        denominator: d,
    })
}

/// Wire form; deserialization re-reduces and rejects zero denominators.
#[derive(Serialize, Deserialize)]
struct RawRational {
    numerator: i64,
    denominator: i64,
}

impl TryFrom<RawRational> for RationalTime {
    type Error = ArithmeticError;

    fn try_from(raw: RawRational) -> Result<Self, Self::Error> {
        RationalTime::new(raw.numerator, raw.denominator)
    }
}

impl From<RationalTime> for RawRational {
    fn from(t: RationalTime) -> Self {
        RawRational {
            numerator: t.numerator,
            denominator: t.denominator,
        }
    }
}
