//! Exact sample-domain timestamps.
//!
//! Frame times are kept as 64.64 fixed point in *samples* so that
//! fractional advances from schedulers add without drift. All comparisons
//! are exact integer comparisons; floating point only appears at the
//! conversion boundary.

use core::{cmp, ops};

/// Sampling rate used whenever a non-positive rate is supplied.
pub const FALLBACK_SAMPLING_RATE: f64 = 44100.0;

/// A point (or distance) in sample-domain time.
///
/// Stored as whole samples plus a binary fraction of a sample
/// (1/2^64ths). Can represent u64::MAX samples, which at 192 kHz is
/// roughly three million years, with sub-sample precision fine enough
/// that repeated fractional advances never accumulate error.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde_derive", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameTime {
    samples: u64,
    /// Subsample fraction in units of 1/2^64 samples.
    frac: u64,
}

impl FrameTime {
    /// Time zero.
    pub const ZERO: Self = Self {
        samples: 0,
        frac: 0,
    };
    /// The largest representable time.
    pub const MAX: Self = Self {
        samples: u64::MAX,
        frac: u64::MAX,
    };

    #[allow(missing_docs)]
    pub fn new(samples: u64, frac: u64) -> Self {
        Self { samples, frac }
    }
    /// A whole number of samples.
    pub fn from_samples(samples: u64) -> Self {
        Self { samples, frac: 0 }
    }
    /// Convert a possibly fractional number of samples.
    ///
    /// The fraction is captured to the full 64 bits of subsample
    /// resolution; the conversion itself rounds to nearest (ties to even)
    /// per IEEE f64 arithmetic.
    pub fn from_samples_f64(samples: f64) -> Self {
        if samples <= 0.0 || !samples.is_finite() {
            return Self::ZERO;
        }
        let whole = samples.floor();
        let frac = ((samples - whole) * FRAC_ONE) as u64;
        Self {
            samples: whole as u64,
            frac,
        }
    }
    /// Convert from seconds at the given sampling rate. A non-positive
    /// rate falls back to [`FALLBACK_SAMPLING_RATE`].
    pub fn from_secs_f64(secs: f64, sampling_rate: f64) -> Self {
        Self::from_samples_f64(secs * checked_rate(sampling_rate))
    }
    /// Convert from milliseconds at the given sampling rate. A
    /// non-positive rate falls back to [`FALLBACK_SAMPLING_RATE`].
    pub fn from_ms_f64(ms: f64, sampling_rate: f64) -> Self {
        Self::from_samples_f64(ms * 0.001 * checked_rate(sampling_rate))
    }
    /// The whole-sample part, discarding any fraction.
    pub fn to_samples_floor(&self) -> u64 {
        self.samples
    }
    /// Round to whole samples, half to even.
    pub fn to_samples_round(&self) -> u64 {
        const HALF: u64 = 1 << 63;
        match self.frac.cmp(&HALF) {
            cmp::Ordering::Less => self.samples,
            cmp::Ordering::Greater => self.samples.saturating_add(1),
            // Exactly halfway: round towards the even sample count.
            cmp::Ordering::Equal => {
                if self.samples % 2 == 0 {
                    self.samples
                } else {
                    self.samples.saturating_add(1)
                }
            }
        }
    }
    /// Convert to a possibly fractional number of samples. May be lossy
    /// for very large values.
    pub fn to_samples_f64(&self) -> f64 {
        self.samples as f64 + self.frac as f64 / FRAC_ONE
    }
    /// Convert to seconds at the given sampling rate. A non-positive rate
    /// falls back to [`FALLBACK_SAMPLING_RATE`].
    pub fn to_secs_f64(&self, sampling_rate: f64) -> f64 {
        self.to_samples_f64() / checked_rate(sampling_rate)
    }
    /// True for time zero with no fraction.
    pub fn is_zero(&self) -> bool {
        self.samples == 0 && self.frac == 0
    }
    /// Returns `self - rhs` if `self >= rhs`, otherwise `None`.
    #[must_use]
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        if self < rhs {
            None
        } else if self.frac >= rhs.frac {
            Some(Self::new(self.samples - rhs.samples, self.frac - rhs.frac))
        } else {
            Some(Self::new(
                self.samples - rhs.samples - 1,
                u64::MAX - (rhs.frac - self.frac) + 1,
            ))
        }
    }
    /// Returns `self - rhs`, saturating at [`FrameTime::ZERO`].
    #[must_use]
    pub fn saturating_sub(self, rhs: Self) -> Self {
        self.checked_sub(rhs).unwrap_or(Self::ZERO)
    }
}

/// 2^64 as an f64, the scale of the subsample fraction.
const FRAC_ONE: f64 = 18_446_744_073_709_551_616.0;

fn checked_rate(sampling_rate: f64) -> f64 {
    if sampling_rate > 0.0 {
        sampling_rate
    } else {
        FALLBACK_SAMPLING_RATE
    }
}

impl PartialOrd for FrameTime {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for FrameTime {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        if self.samples == other.samples {
            self.frac.cmp(&other.frac)
        } else {
            self.samples.cmp(&other.samples)
        }
    }
}
impl ops::Add<FrameTime> for FrameTime {
    type Output = Self;

    fn add(self, rhs: FrameTime) -> Self::Output {
        let (frac, carry) = self.frac.overflowing_add(rhs.frac);
        let samples = self
            .samples
            .saturating_add(rhs.samples)
            .saturating_add(carry as u64);
        Self::new(samples, frac)
    }
}
impl ops::AddAssign<FrameTime> for FrameTime {
    fn add_assign(&mut self, rhs: FrameTime) {
        *self = *self + rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::FrameTime;

    #[test]
    fn ordering_is_exact() {
        let a = FrameTime::new(100, 0);
        let b = FrameTime::new(100, 1);
        let c = FrameTime::new(101, 0);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a, FrameTime::from_samples(100));
    }

    #[test]
    fn add_carries_fraction() {
        let a = FrameTime::new(0, u64::MAX);
        let b = FrameTime::new(1, 1);
        assert_eq!(a + b, FrameTime::new(2, 0));
    }

    #[test]
    fn sub_borrows_fraction() {
        let a = FrameTime::new(2, 0);
        let b = FrameTime::new(0, 1);
        assert_eq!(a.checked_sub(b), Some(FrameTime::new(1, u64::MAX)));
        assert_eq!(b.checked_sub(a), None);
        assert_eq!(b.saturating_sub(a), FrameTime::ZERO);
    }

    #[test]
    fn fractional_advances_do_not_drift() {
        // One third of a sample, added three times, must land exactly on
        // the sum of its parts regardless of order.
        let third = FrameTime::from_samples_f64(1.0 / 3.0);
        let mut acc = FrameTime::ZERO;
        for _ in 0..300 {
            acc += third;
        }
        let mut acc2 = FrameTime::ZERO;
        for _ in 0..100 {
            acc2 += third + third + third;
        }
        assert_eq!(acc, acc2);
    }

    #[test]
    fn round_half_to_even() {
        let half = FrameTime::new(2, 1 << 63);
        assert_eq!(half.to_samples_round(), 2);
        let half_odd = FrameTime::new(3, 1 << 63);
        assert_eq!(half_odd.to_samples_round(), 4);
        let above = FrameTime::new(3, (1 << 63) + 1);
        assert_eq!(above.to_samples_round(), 4);
        let below = FrameTime::new(3, (1 << 63) - 1);
        assert_eq!(below.to_samples_round(), 3);
    }

    #[test]
    fn float_conversions_stay_close() {
        use float_cmp::approx_eq;
        for samples in [0.1, 7.3, 1234.56789] {
            let t = FrameTime::from_samples_f64(samples);
            assert!(approx_eq!(f64, t.to_samples_f64(), samples, ulps = 2));
        }
        let t = FrameTime::from_secs_f64(0.73, 48000.0);
        assert!(approx_eq!(f64, t.to_secs_f64(48000.0), 0.73, epsilon = 1e-9));
    }

    #[test]
    fn rate_conversions() {
        assert_eq!(
            FrameTime::from_secs_f64(0.5, 44100.0),
            FrameTime::from_samples(22050)
        );
        assert_eq!(
            FrameTime::from_ms_f64(1000.0, 48000.0),
            FrameTime::from_samples(48000)
        );
        // Non-positive rates fall back to 44100.
        assert_eq!(
            FrameTime::from_secs_f64(1.0, -1.0),
            FrameTime::from_samples(44100)
        );
    }
}
