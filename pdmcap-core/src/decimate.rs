//! PDM → PCM decimation via population count.
//!
//! ## Algorithm
//!
//! A PDM microphone encodes amplitude as local 1-bit density. Counting the
//! set bits across one sample group (`OSR` bits = `OSR / 32` words) is a
//! boxcar low-pass filter plus downsample in a single step: crude compared
//! to a real CIC/FIR chain, but it runs in a handful of cycles per group,
//! which is what the time-critical producer path needs.
//!
//! The count ranges over `[0, OSR]`. At the reference OSR of 256 that is
//! one more value than a `u8` can hold, so the reduction to the output
//! width is an explicit [`RangePolicy`] rather than a silent cast.

use serde::{Deserialize, Serialize};

use crate::source::RawSampleWord;

/// How an out-of-range population count is reduced to the 8-bit output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangePolicy {
    /// Saturate at 255. A full-scale group stays full-scale.
    #[default]
    Clamp,
    /// Keep the low byte. This is the legacy hardware-driver behavior: a
    /// full-scale 256-bit group wraps to 0, inverting loud peaks.
    Wrap,
}

impl RangePolicy {
    /// Reduce a population count to the destination sample width.
    pub fn reduce(self, count: u32) -> u8 {
        match self {
            RangePolicy::Clamp => count.min(u8::MAX as u32) as u8,
            RangePolicy::Wrap => count as u8,
        }
    }
}

/// Converts one sample group into one PCM sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decimator {
    policy: RangePolicy,
}

impl Decimator {
    pub fn new(policy: RangePolicy) -> Self {
        Self { policy }
    }

    /// Count the set bits across `group` and reduce to one output byte.
    ///
    /// Pure and side-effect free. The slice is the whole sample group;
    /// callers pass exactly `oversample_ratio / 32` words.
    #[inline]
    pub fn decimate(&self, group: &[RawSampleWord]) -> u8 {
        let count: u32 = group.iter().map(|w| w.count_ones()).sum();
        self.policy.reduce(count)
    }

    pub fn policy(&self) -> RangePolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    /// Kernighan bit-clearing loop, independent of `count_ones`.
    fn reference_popcount(group: &[RawSampleWord]) -> u32 {
        let mut total = 0;
        for &word in group {
            let mut w = word;
            while w != 0 {
                w &= w - 1;
                total += 1;
            }
        }
        total
    }

    #[test]
    fn all_zero_group_is_silence() {
        let dec = Decimator::new(RangePolicy::Clamp);
        assert_eq!(dec.decimate(&[0u32; 8]), 0);
        assert_eq!(Decimator::new(RangePolicy::Wrap).decimate(&[0u32; 8]), 0);
    }

    #[test]
    fn all_one_group_follows_policy() {
        // 8 words × 32 bits = 256 set bits, one past u8::MAX.
        let group = [u32::MAX; 8];
        assert_eq!(Decimator::new(RangePolicy::Clamp).decimate(&group), 255);
        assert_eq!(Decimator::new(RangePolicy::Wrap).decimate(&group), 0);
    }

    #[test]
    fn half_density_group_is_midscale() {
        // 0xAAAAAAAA has 16 of 32 bits set → 128 of 256 across the group.
        let group = [0xAAAA_AAAAu32; 8];
        assert_eq!(Decimator::new(RangePolicy::Clamp).decimate(&group), 128);
        assert_eq!(Decimator::new(RangePolicy::Wrap).decimate(&group), 128);
    }

    #[test]
    fn policies_agree_within_range_and_diverge_past_it() {
        // 255 set bits: last word missing one bit.
        let mut group = [u32::MAX; 8];
        group[7] = u32::MAX << 1;
        assert_eq!(Decimator::new(RangePolicy::Clamp).decimate(&group), 255);
        assert_eq!(Decimator::new(RangePolicy::Wrap).decimate(&group), 255);

        // 256 set bits: clamp saturates, wrap rolls over.
        let full = [u32::MAX; 8];
        assert_eq!(Decimator::new(RangePolicy::Clamp).decimate(&full), 255);
        assert_eq!(Decimator::new(RangePolicy::Wrap).decimate(&full), 0);
    }

    #[test]
    fn boundary_words_count_exactly() {
        let dec = Decimator::new(RangePolicy::Clamp);
        assert_eq!(dec.decimate(&[1u32]), 1);
        assert_eq!(dec.decimate(&[1u32 << 31]), 1);
        assert_eq!(dec.decimate(&[0x8000_0001u32]), 2);
        assert_eq!(dec.decimate(&[0xDEAD_BEEFu32]), 24);
    }

    #[test]
    fn matches_reference_popcount_on_random_groups() {
        let mut rng = StdRng::seed_from_u64(0x5eed_cafe);
        let dec = Decimator::new(RangePolicy::Clamp);
        for _ in 0..500 {
            // Two-word groups keep the count within u8 range so the policy
            // never masks a reference mismatch.
            let group: [u32; 2] = [rng.gen(), rng.gen()];
            let expected = reference_popcount(&group);
            assert_eq!(dec.decimate(&group) as u32, expected, "group {group:08x?}");
        }
    }

    #[test]
    fn wrap_matches_reference_low_byte_on_full_groups() {
        let mut rng = StdRng::seed_from_u64(42);
        let dec = Decimator::new(RangePolicy::Wrap);
        for _ in 0..200 {
            let mut group = [0u32; 8];
            for word in group.iter_mut() {
                *word = rng.gen();
            }
            let expected = reference_popcount(&group) & 0xFF;
            assert_eq!(dec.decimate(&group) as u32, expected);
        }
    }
}
