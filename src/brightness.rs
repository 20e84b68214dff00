//! Brightness scale conversions.
//!
//! Three scales meet in this daemon: the raw integer the virtual LED
//! reports (0..=max_brightness), the 0-100 percentage the hardware
//! transport speaks, and the four coarse levels the physical modules
//! actually distinguish. Every conversion lives here; no other module
//! re-implements the thresholds.

use std::fmt;

/// One of the four discrete backlight states the hardware supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Off,
    Low,
    Medium,
    High,
}

impl Level {
    pub const ALL: [Level; 4] = [Level::Off, Level::Low, Level::Medium, Level::High];

    /// Buckets a raw virtual-device value into a level.
    ///
    /// The raw value is scaled to a percentage against the device's
    /// max_brightness first, then bucketed with the same thresholds as
    /// [`Level::from_hw_pct`].
    pub fn from_raw(raw: u32, max: u32) -> Self {
        if max == 0 {
            return Level::Off;
        }
        let pct = ((u64::from(raw) * 100) / u64::from(max)).min(100) as u8;
        Self::from_hw_pct(pct)
    }

    /// Buckets a hardware percentage into a level.
    ///
    /// The thresholds are asymmetric on purpose: they are centered on the
    /// canonical per-level percentages from [`Level::hw_pct`] so that a
    /// value written by this daemon and read back lands in the same
    /// bucket.
    pub fn from_hw_pct(pct: u8) -> Self {
        match pct.min(100) {
            0..=16 => Level::Off,
            17..=50 => Level::Low,
            51..=83 => Level::Medium,
            _ => Level::High,
        }
    }

    /// The percentage actually sent to hardware for this level.
    ///
    /// The low tier is 35 rather than the naive 33: at exactly one third
    /// some modules flake back to zero, and the offset clears that.
    pub fn hw_pct(self) -> u8 {
        match self {
            Level::Off => 0,
            Level::Low => 35,
            Level::Medium => 67,
            Level::High => 100,
        }
    }

    /// The raw virtual-device value representing this level on a device
    /// with the given max_brightness. Used for mirror pushes. Rounds to
    /// nearest so the value re-buckets to the same level on scales that
    /// can still tell the four levels apart.
    pub fn raw(self, max: u32) -> u32 {
        ((u64::from(self.hw_pct()) * u64::from(max) + 50) / 100) as u32
    }

    /// Numeric step 0..=3, for logs and notification placeholders.
    pub fn step(self) -> u8 {
        match self {
            Level::Off => 0,
            Level::Low => 1,
            Level::Medium => 2,
            Level::High => 3,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.step())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn canonical_percentages_round_trip() {
        for level in Level::ALL {
            assert_eq!(Level::from_hw_pct(level.hw_pct()), level);
        }
    }

    #[test]
    fn raw_values_round_trip_at_default_scale() {
        for level in Level::ALL {
            assert_eq!(Level::from_raw(level.raw(100), 100), level);
        }
    }

    #[test]
    fn bucket_boundaries() {
        assert_eq!(Level::from_hw_pct(0), Level::Off);
        assert_eq!(Level::from_hw_pct(16), Level::Off);
        assert_eq!(Level::from_hw_pct(17), Level::Low);
        assert_eq!(Level::from_hw_pct(50), Level::Low);
        assert_eq!(Level::from_hw_pct(51), Level::Medium);
        assert_eq!(Level::from_hw_pct(83), Level::Medium);
        assert_eq!(Level::from_hw_pct(84), Level::High);
        assert_eq!(Level::from_hw_pct(100), Level::High);
    }

    #[test]
    fn forty_percent_is_low() {
        assert_eq!(Level::from_hw_pct(40), Level::Low);
    }

    #[test]
    fn ninety_percent_raw_is_high() {
        assert_eq!(Level::from_raw(90, 100), Level::High);
    }

    #[test]
    fn raw_beyond_max_saturates() {
        assert_eq!(Level::from_raw(500, 100), Level::High);
        assert_eq!(Level::from_hw_pct(255), Level::High);
    }

    #[test]
    fn zero_scale_is_off() {
        assert_eq!(Level::from_raw(7, 0), Level::Off);
    }

    #[test]
    fn low_tier_clears_the_naive_third() {
        assert_eq!(Level::Low.hw_pct(), 35);
        assert_eq!(Level::from_hw_pct(33), Level::Low);
    }

    proptest! {
        #[test]
        fn from_raw_is_monotone(max in 1u32..=4096, a in 0u32..=4096, b in 0u32..=4096) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(Level::from_raw(lo, max) <= Level::from_raw(hi, max));
        }

        #[test]
        fn raw_round_trips_on_any_scale(max in 3u32..=4096) {
            for level in Level::ALL {
                prop_assert_eq!(Level::from_raw(level.raw(max), max), level);
            }
        }
    }
}
