// Deterministic, portable pseudo-random number generator for phrase synthesis.
//
// Implements xoshiro256++ (Blackman & Vigna, 2019) with SplitMix64 seeding,
// hand-rolled so that every platform produces the same stream for the same
// seed. `melodist` draws every random decision (rhythm, motif, pitch sampling,
// refinement) from instances of `PhraseRng`.
//
// Parallel voice generation and batch generation need independent streams
// that do not depend on scheduling order. `fork(stream)` derives a child
// generator from the parent's *seed* and a stream number, never from the
// parent's current state, so a voice computed on a worker thread sees exactly
// the numbers it would have seen when computed serially.
//
// **Critical constraint: determinism.** No method may consult a clock, a
// thread id, or any platform-dependent source. Floating point appears only in
// the conversions to `f64`, which are exact for the bit widths used.

use serde::{Deserialize, Serialize};

/// Xoshiro256++ generator with a remembered seed for stream forking.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PhraseRng {
    seed: u64,
    s: [u64; 4],
}

impl PhraseRng {
    /// Create a generator seeded from a `u64`.
    ///
    /// Uses SplitMix64 to expand the seed into the 256-bit state. Two
    /// generators built from the same seed produce identical sequences.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            seed,
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    /// The seed this generator was created from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Derive an independent child generator for `stream`.
    ///
    /// The child depends only on `(seed, stream)`, so forking the same stream
    /// twice yields identical generators regardless of how many numbers the
    /// parent has produced in between.
    pub fn fork(&self, stream: u64) -> PhraseRng {
        let mut mix = self.seed ^ stream.wrapping_mul(0xd605_bbb5_8c8a_bbf5);
        let child_seed = splitmix64(&mut mix) ^ stream.rotate_left(17);
        PhraseRng::new(child_seed)
    }

    /// Generate the next `u64` in the sequence.
    pub fn next_u64(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    /// Generate a uniform `f64` in [0, 1) from the upper 53 bits.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Generate a uniform integer in `[low, high)` by rejection sampling.
    ///
    /// Panics if `low >= high`.
    pub fn range_u64(&mut self, low: u64, high: u64) -> u64 {
        assert!(low < high, "range_u64: low must be less than high");
        let range = high - low;
        if range.is_power_of_two() {
            return low + (self.next_u64() & (range - 1));
        }
        let threshold = range.wrapping_neg() % range;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return low + (r % range);
            }
        }
    }

    /// Generate a uniform `usize` in `[low, high)`.
    ///
    /// Panics if `low >= high`.
    pub fn range_usize(&mut self, low: usize, high: usize) -> usize {
        self.range_u64(low as u64, high as u64) as usize
    }

    /// Generate a uniform `i32` in `[low, high]` (inclusive on both ends).
    ///
    /// Panics if `low > high`.
    pub fn range_i32_inclusive(&mut self, low: i32, high: i32) -> i32 {
        assert!(low <= high, "range_i32_inclusive: low must be <= high");
        let span = (high as i64 - low as i64 + 1) as u64;
        (low as i64 + self.range_u64(0, span) as i64) as i32
    }

    /// Return `true` with probability `p`. `p <= 0` never fires, `p >= 1`
    /// always does.
    pub fn random_bool(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    /// Pick a uniformly random element, or `None` for an empty slice.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let idx = self.range_usize(0, items.len());
        items.get(idx)
    }

    /// Sample an index proportionally to `weights`.
    ///
    /// Negative and non-finite weights count as zero. Returns `None` when the
    /// slice is empty or every weight is zero, leaving the fallback policy to
    /// the caller. Exactly one `f64` is drawn when a choice is possible.
    pub fn weighted_index(&mut self, weights: &[f64]) -> Option<usize> {
        let total: f64 = weights.iter().copied().map(sanitize_weight).sum();
        if weights.is_empty() || total <= 0.0 || !total.is_finite() {
            return None;
        }
        let target = self.next_f64() * total;
        let mut cumulative = 0.0;
        let mut last_positive = None;
        for (i, &w) in weights.iter().enumerate() {
            let w = sanitize_weight(w);
            if w <= 0.0 {
                continue;
            }
            cumulative += w;
            last_positive = Some(i);
            if cumulative > target {
                return Some(i);
            }
        }
        // Rounding can leave `target` a hair above the running sum.
        last_positive
    }

    /// Sample `count` distinct indices from `0..len` (partial Fisher–Yates).
    ///
    /// Returns fewer than `count` indices only when `len < count`.
    pub fn sample_indices(&mut self, len: usize, count: usize) -> Vec<usize> {
        let mut pool: Vec<usize> = (0..len).collect();
        let take = count.min(len);
        for i in 0..take {
            let j = self.range_usize(i, len);
            pool.swap(i, j);
        }
        pool.truncate(take);
        pool
    }
}

fn sanitize_weight(w: f64) -> f64 {
    if w.is_finite() && w > 0.0 { w } else { 0.0 }
}

/// SplitMix64, used to expand a single `u64` into generator state.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
