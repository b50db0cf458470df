use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::time::{Duration, Instant};

/// Wrapper for [`Duration`] that can be negative.
///
/// Inter-group deltas are signed since neither send nor arrival order is guaranteed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimeDelta {
    /// An exact negative duration.
    Negative(Duration),

    /// An exact positive duration, or zero.
    Positive(Duration),
}

impl TimeDelta {
    pub(crate) const ZERO: Self = Self::Positive(Duration::ZERO);

    /// Signed difference `later - earlier` between two instants.
    pub(crate) fn between(later: Instant, earlier: Instant) -> Self {
        match later.cmp(&earlier) {
            Ordering::Less => Self::Negative(earlier - later),
            Ordering::Equal => Self::ZERO,
            Ordering::Greater => Self::Positive(later - earlier),
        }
    }

    /// Signed difference `later - earlier` between two offsets on the same timeline.
    pub(crate) fn between_offsets(later: Duration, earlier: Duration) -> Self {
        match later.cmp(&earlier) {
            Ordering::Less => Self::Negative(earlier - later),
            Ordering::Equal => Self::ZERO,
            Ordering::Greater => Self::Positive(later - earlier),
        }
    }

    /// Returns the number of milliseconds contained by this [`TimeDelta`] as `f64`.
    pub(crate) fn as_millis_f64(&self) -> f64 {
        match self {
            Self::Negative(d) => -(d.as_nanos() as f64 / 1e6),
            Self::Positive(d) => d.as_nanos() as f64 / 1e6,
        }
    }

    pub(crate) fn is_negative(&self) -> bool {
        matches!(self, Self::Negative(_))
    }
}

#[cfg(test)]
impl TimeDelta {
    /// Creates a [`TimeDelta`] from milliseconds.
    pub(crate) const fn from_millis(millis: i64) -> Self {
        if millis >= 0 {
            Self::Positive(Duration::from_millis(millis as u64))
        } else {
            Self::Negative(Duration::from_millis(-millis as u64))
        }
    }
}

impl Add<Self> for TimeDelta {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Self::Negative(this), Self::Negative(that)) => Self::Negative(this + that),
            (Self::Positive(this), Self::Positive(that)) => Self::Positive(this + that),
            (Self::Positive(this), Self::Negative(that)) => {
                Self::between_offsets(this, that)
            }
            (Self::Negative(this), Self::Positive(that)) => {
                Self::between_offsets(that, this)
            }
        }
    }
}

impl Neg for TimeDelta {
    type Output = Self;

    fn neg(self) -> Self::Output {
        match self {
            Self::Negative(d) => Self::Positive(d),
            Self::Positive(d) if d.is_zero() => Self::ZERO,
            Self::Positive(d) => Self::Negative(d),
        }
    }
}

impl Sub<Self> for TimeDelta {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        self + (-rhs)
    }
}

impl PartialOrd for TimeDelta {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(Self::cmp(self, other))
    }
}

impl Ord for TimeDelta {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Negative(_), Self::Positive(_)) => Ordering::Less,
            (Self::Positive(_), Self::Negative(_)) => Ordering::Greater,
            (Self::Positive(this), Self::Positive(that)) => this.cmp(that),
            (Self::Negative(this), Self::Negative(that)) => that.cmp(this),
        }
    }
}

impl PartialEq<Duration> for TimeDelta {
    fn eq(&self, other: &Duration) -> bool {
        *self == Self::from(*other)
    }
}

impl PartialOrd<Duration> for TimeDelta {
    fn partial_cmp(&self, other: &Duration) -> Option<Ordering> {
        Some(Self::cmp(self, &Self::from(*other)))
    }
}

impl From<Duration> for TimeDelta {
    fn from(value: Duration) -> Self {
        Self::Positive(value)
    }
}

impl fmt::Display for TimeDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeDelta::Negative(v) => write!(f, "-{:.03}", v.as_secs_f32()),
            TimeDelta::Positive(v) => write!(f, "{:.03}", v.as_secs_f32()),
        }
    }
}
