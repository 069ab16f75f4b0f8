// Candidate pitch pools, memoized per generation call.
//
// A pool is the ascending list of absolute pitches a voice may choose from at
// one step: the chord scale (or just the chord tones on strong beats)
// intersected with the voice's octave range. Pools are keyed by value (key,
// chord tones, chord scale, range, restriction), so two different chord
// symbols that resolve to the same sets share one entry.
//
// Relaxation: an empty chord-tone pool falls back to the chord scale, an empty
// scale pool to the chromatic range. Only an empty chromatic range (which a
// valid `OctaveRange` cannot produce) surfaces as `NoLegalCandidate`.
//
// The cache is an explicit object owned by the caller. `generate` creates one
// per call; batch workers and dependent voices each own their own. Entries
// are immutable `Arc<[u8]>` slices, so a hit hands back exactly what the miss
// built.

use crate::chord::{Chord, PitchClassSet, scale_for_chord};
use crate::error::{GenError, Result};
use crate::mode::Key;
use crate::pitch::OctaveRange;
use log::warn;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Which pitch-class set a pool is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Restriction {
    /// Chord tones only (strong beats).
    ChordTones,
    /// The scale chosen for the chord.
    ChordScale,
    /// The key's own scale, ignoring the chord.
    KeyScale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PoolKey {
    key_scale: u16,
    chord_tones: u16,
    chord_scale: u16,
    range: OctaveRange,
    restriction: Restriction,
}

#[derive(Debug, Default)]
pub struct CandidatePoolCache {
    pools: FxHashMap<PoolKey, Arc<[u8]>>,
    hits: u64,
    misses: u64,
}

impl CandidatePoolCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Legal pitches for `chord` in `key` within `range`, ascending.
    pub fn pool(
        &mut self,
        key: &Key,
        chord: &Chord,
        range: OctaveRange,
        restriction: Restriction,
    ) -> Result<Arc<[u8]>> {
        let pool_key = PoolKey {
            key_scale: key.scale().mask(),
            chord_tones: chord.tones().mask(),
            chord_scale: scale_for_chord(key, chord).mask(),
            range,
            restriction,
        };
        if let Some(pool) = self.pools.get(&pool_key) {
            self.hits += 1;
            return Ok(Arc::clone(pool));
        }
        self.misses += 1;
        let pool: Arc<[u8]> = build_pool(&pool_key, chord)?.into();
        self.pools.insert(pool_key, Arc::clone(&pool));
        Ok(pool)
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn clear(&mut self) {
        self.pools.clear();
    }
}

fn pitches_in(set: PitchClassSet, range: OctaveRange) -> Vec<u8> {
    (range.low_pitch()..=range.high_pitch())
        .filter(|&p| set.contains(p))
        .collect()
}

fn build_pool(pool_key: &PoolKey, chord: &Chord) -> Result<Vec<u8>> {
    let range = pool_key.range;
    let chain: &[u16] = match pool_key.restriction {
        Restriction::ChordTones => &[pool_key.chord_tones, pool_key.chord_scale],
        Restriction::ChordScale => &[pool_key.chord_scale],
        Restriction::KeyScale => &[pool_key.key_scale],
    };
    for (tier, &mask) in chain.iter().enumerate() {
        let pitches = pitches_in(PitchClassSet::from_mask(mask), range);
        if !pitches.is_empty() {
            if tier > 0 {
                warn!("chord-tone pool for {chord} in {range:?} is empty; using the chord scale");
            }
            return Ok(pitches);
        }
    }
    let chromatic = pitches_in(PitchClassSet::CHROMATIC, range);
    if chromatic.is_empty() {
        return Err(GenError::NoLegalCandidate {
            context: format!("{chord} in octaves {}..={}", range.min, range.max),
        });
    }
    warn!("scale pool for {chord} in {range:?} is empty; using the chromatic range");
    Ok(chromatic)
}
