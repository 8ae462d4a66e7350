//! Statistical bit corruption of in-flight byte buffers
//!
//! The fuzz "period" is the average distance in bytes between corrupted
//! bytes; the actual sites are randomly distributed. Each selected byte gets
//! 1-8 bit toggles (duplicates allowed), with extra toggles applied until
//! the byte actually differs from its original value. The generator state is
//! checkpointed around the whole operation, so the logical content stream is
//! bit-identical whether or not fuzzing is enabled.

use crate::prng::Prng;

/// Smallest accepted average corruption period, in bytes.
pub const MIN_PERIOD: u32 = 10;
/// Largest accepted average corruption period, in bytes.
pub const MAX_PERIOD: u32 = 1_000_000;

/// Probability that exactly `num_hits` corruptions occur in `length` bytes
/// at an average period of `period` bytes.
fn hit_probability(period: u32, length: usize, num_hits: usize) -> f64 {
    let p = period as f64;
    let mut probability = ((p - 1.0) / p).powi((length - num_hits) as i32);

    for hits in 0..num_hits {
        probability *= (length - hits) as f64 / (p * (hits + 1) as f64);
    }

    probability
}

/// Reproducible bit-corruption engine for byte buffers in flight.
#[derive(Debug, Clone, Copy)]
pub struct FaultInjector {
    period: u32,
}

impl FaultInjector {
    /// Create an injector with the given average corruption period in bytes.
    /// Returns `None` outside the accepted [`MIN_PERIOD`]..=[`MAX_PERIOD`]
    /// range.
    pub fn new(period: u32) -> Option<Self> {
        ((MIN_PERIOD..=MAX_PERIOD).contains(&period)).then_some(Self { period })
    }

    /// Average corruption period in bytes.
    pub fn period(&self) -> u32 {
        self.period
    }

    /// Corrupt `data` in place, returning the number of bytes hit.
    ///
    /// The hit count is drawn from the accumulated hit-probability
    /// distribution with a single uniform variable, capped at half the
    /// buffer length as a safety clamp against pathological parameters. The
    /// generator is restored afterwards so downstream randomness (signal
    /// content, future fuzz decisions) is unaffected.
    pub fn corrupt(&self, prng: &mut Prng, data: &mut [u8]) -> usize {
        if data.is_empty() {
            return 0;
        }

        let saved_state = prng.checkpoint();
        let fuzz_factor = prng.uniform();
        let length = data.len();

        let mut probability_accum = 0.0;
        let mut num_hits = 0;

        loop {
            probability_accum += hit_probability(self.period, length, num_hits);
            if probability_accum >= fuzz_factor {
                break;
            }
            num_hits += 1;

            if num_hits == length.div_ceil(2) {
                // Should not get here, but let's not hang.
                break;
            }
        }

        for _ in 0..num_hits {
            let index = ((prng.uniform() * length as f64).floor() as usize).min(length - 1);
            let mut delta_bits = (prng.uniform() * 8.0).ceil() as u32;
            let initial_value = data[index];

            while delta_bits > 0 || data[index] == initial_value {
                data[index] ^= 1 << ((prng.uniform() * 8.0).floor() as u32);
                delta_bits = delta_bits.saturating_sub(1);
            }
        }

        prng.restore(saved_state);
        num_hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_bounds() {
        assert!(FaultInjector::new(9).is_none());
        assert!(FaultInjector::new(10).is_some());
        assert!(FaultInjector::new(1_000_000).is_some());
        assert!(FaultInjector::new(1_000_001).is_none());
    }

    #[test]
    fn test_hit_probability_sums_to_one() {
        let total: f64 = (0..=200).map(|k| hit_probability(50, 200, k)).sum();
        assert!((total - 1.0).abs() < 1e-9, "total probability {}", total);
    }

    #[test]
    fn test_corrupted_bytes_always_differ() {
        let mut prng = Prng::new(1234);
        let injector = FaultInjector::new(10).unwrap();
        let mut total_hits = 0;

        for _ in 0..50 {
            let original: Vec<u8> = (0..512).map(|i| (i * 7) as u8).collect();
            let mut data = original.clone();
            let hits = injector.corrupt(&mut prng, &mut data);
            // Drive the generator forward so each trial sees fresh draws.
            prng.uniform();

            let changed = data
                .iter()
                .zip(&original)
                .filter(|(a, b)| a != b)
                .count();
            // Every hit leaves its byte different; several can share a byte.
            assert!(changed <= hits);
            if hits > 0 {
                assert!(changed > 0);
            }
            total_hits += hits;
        }

        // A cold seed can draw a zero fuzz factor for an individual buffer,
        // but period 10 over 50 x 512 bytes lands thousands of hits overall.
        assert!(total_hits > 1000, "only {total_hits} hits across all trials");
    }

    #[test]
    fn test_hit_rate_converges() {
        let mut prng = Prng::new(555);
        let period = 100u32;
        let length = 1000usize;
        let trials = 400;
        let injector = FaultInjector::new(period).unwrap();

        let mut total_hits = 0usize;
        for _ in 0..trials {
            let mut data = vec![0u8; length];
            total_hits += injector.corrupt(&mut prng, &mut data);
            prng.uniform();
        }

        let expected = trials as f64 * length as f64 / period as f64;
        let actual = total_hits as f64;
        assert!(
            (actual - expected).abs() / expected < 0.15,
            "expected ~{} hits, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_seed_restored_after_corrupt() {
        let injector = FaultInjector::new(100).unwrap();

        let mut with_fuzz = Prng::new(42);
        let mut without_fuzz = Prng::new(42);

        let mut data = vec![0xAAu8; 4096];
        injector.corrupt(&mut with_fuzz, &mut data);

        for _ in 0..100 {
            assert_eq!(with_fuzz.uniform(), without_fuzz.uniform());
        }
    }

    #[test]
    fn test_empty_buffer_no_hits() {
        let mut prng = Prng::default();
        let injector = FaultInjector::new(10).unwrap();
        assert_eq!(injector.corrupt(&mut prng, &mut []), 0);
    }
}
