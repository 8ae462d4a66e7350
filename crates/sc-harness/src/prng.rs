//! Deterministic pseudorandom source
//!
//! Every random decision in the rig (signal synthesis, fuzz site selection)
//! derives from this generator, so a run is fully reproducible given its
//! seed. The state is a single `u64`, and [`Prng::checkpoint`] /
//! [`Prng::restore`] expose it so a caller can bracket a side computation
//! (fault injection) without perturbing the main sequence.

/// Default seed, shared by every component that doesn't get an explicit one.
pub const DEFAULT_SEED: u64 = 0x3141_5926_5358_9793;

/// A generator shared between the synthesis loop and the fault-injection
/// path inside a channel. Both run on the producer thread, so the lock is
/// never contended; it exists so the fuzz path can borrow the same sequence
/// the synthesis path advances (which is what keeps fuzz site selection
/// varying from block to block).
pub type SharedPrng = std::sync::Arc<parking_lot::Mutex<Prng>>;

/// Wrap a seeded generator for sharing with a channel's fuzz path.
pub fn shared(seed: u64) -> SharedPrng {
    std::sync::Arc::new(parking_lot::Mutex::new(Prng::new(seed)))
}

/// Deterministic uniform generator with a single 64-bit state word.
#[derive(Debug, Clone)]
pub struct Prng {
    state: u64,
}

impl Default for Prng {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

impl Prng {
    /// Create a generator from an explicit seed.
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Draw a uniform value in `0.0 <= n < 1.0`.
    pub fn uniform(&mut self) -> f64 {
        self.state = (self.state.wrapping_shl(4).wrapping_sub(self.state)) ^ 1;
        self.state = (self.state.wrapping_shl(4).wrapping_sub(self.state)) ^ 1;
        self.state = (self.state.wrapping_shl(4).wrapping_sub(self.state)) ^ 1;
        (self.state >> 32) as f64 / 4294967296.0
    }

    /// Snapshot the current state word.
    pub fn checkpoint(&self) -> u64 {
        self.state
    }

    /// Rewind to a previously captured state word.
    pub fn restore(&mut self, state: u64) {
        self.state = state;
    }
}
