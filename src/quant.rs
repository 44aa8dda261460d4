//! Domain quantities: exact rational time and the identifier types shared by
//! waveforms, programs and measurement windows.

use std::{
    collections::BTreeSet,
    fmt,
    iter::Sum,
    ops::{Add, AddAssign, Div, Mul},
    sync::Arc,
};

use num::{ToPrimitive, Zero, rational::Ratio};

use crate::error::{Error, Result};

/// Exact non-negative rational time.
///
/// All durations, offsets and sample counts are `Time` values; conversion to
/// floating point is explicit and only happens at output boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Time(Ratio<i64>);

/// Channel identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub Arc<str>);

/// Measurement window name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MeasurementId(pub Arc<str>);

/// Set of channels a waveform or program is defined on.
///
/// Ordered so it can serve as a map key and renders deterministically.
pub type ChannelSet = BTreeSet<ChannelId>;

/// A named measurement window relative to the surrounding body start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementWindow {
    name: MeasurementId,
    begin: Time,
    length: Time,
}

impl Time {
    pub const ZERO: Self = Self(Ratio::new_raw(0, 1));

    /// Creates a time value from a fraction.
    ///
    /// # Errors
    ///
    /// Returns an error if the denominator is zero or the value is negative.
    pub fn from_fraction(numer: i64, denom: i64) -> Result<Self> {
        if denom == 0 {
            return Err(Error::ZeroDenominator);
        }
        let value = Ratio::new(numer, denom);
        if value < Ratio::zero() {
            return Err(Error::NegativeTime { numer, denom });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn from_int(value: u64) -> Self {
        Self(int_ratio(value))
    }

    #[must_use]
    pub fn numerator(&self) -> i64 {
        *self.0.numer()
    }

    #[must_use]
    pub fn denominator(&self) -> i64 {
        *self.0.denom()
    }

    /// Whether the value has denominator 1.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        self.0.is_integer()
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Whether the value is an integer multiple of `quantum`.
    #[must_use]
    pub fn is_multiple_of(&self, quantum: u64) -> bool {
        (self.0 / int_ratio(quantum)).is_integer()
    }

    #[must_use]
    pub fn to_f64(self) -> f64 {
        self.0.to_f64().unwrap_or(f64::NAN)
    }
}

fn int_ratio(value: u64) -> Ratio<i64> {
    Ratio::from_integer(i64::try_from(value).unwrap_or(i64::MAX))
}

impl Add for Time {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Time {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Mul for Time {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        Self(self.0 * rhs.0)
    }
}

impl Mul<u64> for Time {
    type Output = Self;

    fn mul(self, rhs: u64) -> Self::Output {
        Self(self.0 * int_ratio(rhs))
    }
}

impl Div<u64> for Time {
    type Output = Self;

    fn div(self, rhs: u64) -> Self::Output {
        Self(self.0 / int_ratio(rhs))
    }
}

impl Sum for Time {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_integer() {
            write!(f, "{}", self.0.numer())
        } else {
            write!(f, "{}/{}", self.0.numer(), self.0.denom())
        }
    }
}

impl ChannelId {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }
}

impl MeasurementId {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for MeasurementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl MeasurementWindow {
    pub fn new(name: impl Into<Arc<str>>, begin: Time, length: Time) -> Self {
        Self {
            name: MeasurementId::new(name),
            begin,
            length,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &MeasurementId {
        &self.name
    }

    #[must_use]
    pub const fn begin(&self) -> Time {
        self.begin
    }

    #[must_use]
    pub const fn length(&self) -> Time {
        self.length
    }

    /// The same window with its begin moved by `offset`.
    #[must_use]
    pub fn shifted(&self, offset: Time) -> Self {
        Self {
            name: self.name.clone(),
            begin: self.begin + offset,
            length: self.length,
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn fraction_construction() {
        let t = Time::from_fraction(3, 6).unwrap();
        assert_eq!(t.numerator(), 1);
        assert_eq!(t.denominator(), 2);
        assert!(!t.is_integer());
        assert_eq!(
            Time::from_fraction(-1, 2),
            Err(Error::NegativeTime { numer: -1, denom: 2 })
        );
        assert_eq!(Time::from_fraction(1, 0), Err(Error::ZeroDenominator));
        // a negative denominator normalizes
        assert_eq!(Time::from_fraction(-1, -2).unwrap(), t);
    }

    #[test]
    fn arithmetic() {
        let half = Time::from_fraction(1, 2).unwrap();
        let third = Time::from_fraction(1, 3).unwrap();
        assert_eq!(half + third, Time::from_fraction(5, 6).unwrap());
        assert_eq!(half * third, Time::from_fraction(1, 6).unwrap());
        assert_eq!(half * 4, Time::from_int(2));
        assert_eq!(Time::from_int(3) / 2, Time::from_fraction(3, 2).unwrap());
        let total: Time = [half, half, third].into_iter().sum();
        assert_eq!(total, Time::from_fraction(4, 3).unwrap());
    }

    #[test_case(8, 4, true)]
    #[test_case(10, 4, false)]
    #[test_case(0, 4, true)]
    fn multiple_of(value: u64, quantum: u64, expected: bool) {
        assert_eq!(Time::from_int(value).is_multiple_of(quantum), expected);
    }

    #[test]
    fn display() {
        assert_eq!(Time::from_int(7).to_string(), "7");
        assert_eq!(Time::from_fraction(7, 2).unwrap().to_string(), "7/2");
    }

    #[test]
    fn window_shift() {
        let w = MeasurementWindow::new("m", Time::from_int(1), Time::from_int(2));
        let shifted = w.shifted(Time::from_int(5));
        assert_eq!(shifted.begin(), Time::from_int(6));
        assert_eq!(shifted.length(), Time::from_int(2));
        assert_eq!(shifted.name(), &MeasurementId::new("m"));
    }
}
