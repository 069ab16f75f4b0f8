// Polyphonic coordination: several voices over one timeline.
//
// The melody is generated first. Harmony and counterpoint lines each get
// their own selector, candidate cache and rng stream (forked by voice index),
// and read the finished melody as their reference. They have no data
// dependency on one another, so they may run on rayon workers; the result is
// identical either way because every stream is forked from the phrase seed.
//
// `enforce_voice_leading` is the barrier after all voices finish. Voices are
// ordered top (melody) to bottom. It works column by column:
// 1. Fit every lower voice into the octave under the melody, strictly below
//    the voice above it (or on it, when unisons are allowed). A voice keeps
//    its pitch class by moving whole octaves where that fits, leaving a
//    semitone of room for each voice still to come; otherwise it takes the
//    nearest pool candidate that fits. This settles crossing, spacing and
//    the distance from the melody.
// 2. Look for parallel fifths/octaves between adjacent voices, including any
//    the fitting created, and swap the offending lower note for another
//    candidate from that step's pool that fits and avoids them.
// 3. Refit and repeat, a bounded number of passes, keeping the arrangement
//    with the fewest parallels. Never an error.
// The last column keeps every pitch class so cadence roots survive. Only an
// octave separates the melody's root from the one under it, so from the
// third voice down the final roots double the voice above.

use crate::error::Result;
use crate::pitch::interval;
use crate::pool::CandidatePoolCache;
use crate::selector::{NoteSelector, SelectorContext, VoiceOutput};
use log::debug;
use melodist_prng::PhraseRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default pass budget for the voice-leading correction.
pub const MAX_CORRECTION_PASSES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceRole {
    Melody,
    /// Harmony line `line` (0-based) a fixed diatonic interval below the melody.
    Harmony { line: usize },
    Counterpoint,
}

impl fmt::Display for VoiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceRole::Melody => write!(f, "melody"),
            VoiceRole::Harmony { line } => write!(f, "harmony {}", line + 1),
            VoiceRole::Counterpoint => write!(f, "counterpoint"),
        }
    }
}

/// Voice roles, top to bottom: melody, harmony lines, counterpoint.
pub fn voice_roles(harmony_lines: usize, counterpoint: bool) -> Vec<VoiceRole> {
    let mut roles = vec![VoiceRole::Melody];
    roles.extend((0..harmony_lines).map(|line| VoiceRole::Harmony { line }));
    if counterpoint {
        roles.push(VoiceRole::Counterpoint);
    }
    roles
}

/// Outcome of the voice-leading correction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoicingReport {
    pub octave_moves: usize,
    pub parallel_fixes: usize,
    pub passes: usize,
    pub remaining_parallels: usize,
}

pub struct Coordinator<'a> {
    ctx: &'a SelectorContext<'a>,
    parallel: bool,
}

impl<'a> Coordinator<'a> {
    pub fn new(ctx: &'a SelectorContext<'a>, parallel: bool) -> Self {
        Coordinator { ctx, parallel }
    }

    /// Generate every voice in `roles` (melody first) and correct the
    /// voicing. `cache` serves the melody; dependent voices own theirs.
    pub fn generate(
        &self,
        roles: &[VoiceRole],
        root: &PhraseRng,
        cache: &mut CandidatePoolCache,
    ) -> Result<(Vec<VoiceOutput>, VoicingReport)> {
        let melody =
            NoteSelector::new(self.ctx, VoiceRole::Melody, None, cache, root.fork(1))?.run()?;

        let dependents = roles.iter().skip(1).copied().enumerate();
        let dependent_voice = |(k, role): (usize, VoiceRole)| -> Result<VoiceOutput> {
            let mut voice_cache = CandidatePoolCache::new();
            NoteSelector::new(
                self.ctx,
                role,
                Some(melody.pitches.as_slice()),
                &mut voice_cache,
                root.fork(2 + k as u64),
            )?
            .run()
        };
        let others: Vec<VoiceOutput> = if self.parallel {
            let jobs: Vec<(usize, VoiceRole)> = dependents.collect();
            jobs.into_par_iter()
                .map(dependent_voice)
                .collect::<Result<Vec<_>>>()?
        } else {
            dependents.map(dependent_voice).collect::<Result<Vec<_>>>()?
        };

        let mut voices = Vec::with_capacity(roles.len());
        voices.push(melody);
        voices.extend(others);

        let mut pitches: Vec<Vec<u8>> = voices.iter().map(|v| v.pitches.clone()).collect();
        let pools: Vec<Vec<Arc<[u8]>>> = voices.iter().map(|v| v.pools.clone()).collect();
        let (floor, _) = self.ctx.plan.octave_range.tolerance_bounds(1);
        let report = enforce_voice_leading(
            &mut pitches,
            &pools,
            floor,
            self.ctx.options.allow_unison,
            MAX_CORRECTION_PASSES,
        );
        for (voice, corrected) in voices.iter_mut().zip(pitches) {
            voice.pitches = corrected;
        }
        Ok((voices, report))
    }
}

/// The highest pitch of `pitch`'s class in `low..=high`, if there is one.
pub fn place(pitch: u8, low: u8, high: u8) -> Option<u8> {
    if high < low {
        return None;
    }
    let down = (high as i16 - pitch as i16).rem_euclid(12);
    let placed = high as i16 - down;
    (placed >= low as i16).then_some(placed as u8)
}

/// Pitches a lower voice may take under `upper` when `below` more voices
/// still need a distinct pitch under it, none lower than `bottom`.
pub fn slot(upper: u8, bottom: u8, below: usize, allow_unison: bool) -> (u8, u8) {
    if allow_unison {
        return (bottom, upper);
    }
    let low = (bottom as usize + below).min(u8::MAX as usize) as u8;
    (low, upper.saturating_sub(1))
}

/// Lowest pitch any voice of a column may take: an octave under the melody,
/// and never under `floor`.
fn column_bottom(melody: u8, floor: u8) -> u8 {
    melody.saturating_sub(12).max(floor)
}

/// True if a column (top voice first) has no crossing, no forbidden unison,
/// no adjacent gap wider than an octave, and nothing more than an octave
/// under the melody.
pub fn column_is_valid(column: &[u8], allow_unison: bool) -> bool {
    let Some(&melody) = column.first() else {
        return true;
    };
    column.iter().all(|&p| p as i16 >= melody as i16 - 12)
        && column.windows(2).all(|pair| {
            let gap = pair[0] as i16 - pair[1] as i16;
            (if allow_unison { gap >= 0 } else { gap > 0 }) && gap <= 12
        })
}

/// Parallel fifths/octaves between adjacent voices, over all columns.
pub fn count_parallels(voices: &[Vec<u8>]) -> usize {
    let mut count = 0;
    for pair in voices.windows(2) {
        let (upper, lower) = (&pair[0], &pair[1]);
        let n = upper.len().min(lower.len());
        for j in 1..n {
            if interval::is_parallel_perfect(upper[j - 1], lower[j - 1], upper[j], lower[j]) {
                count += 1;
            }
        }
    }
    count
}

/// Fit, then repair parallels. `floor` is the lowest pitch any voice may
/// take.
pub fn enforce_voice_leading(
    voices: &mut [Vec<u8>],
    pools: &[Vec<Arc<[u8]>>],
    floor: u8,
    allow_unison: bool,
    max_passes: usize,
) -> VoicingReport {
    let mut report = VoicingReport::default();
    if voices.len() < 2 {
        return report;
    }
    report.octave_moves += fit_columns(voices, pools, floor, allow_unison);
    let mut best_count = count_parallels(voices);
    let mut best = voices.to_vec();

    while report.passes < max_passes && best_count > 0 {
        report.passes += 1;
        let fixes = repair_parallels(voices, pools, floor, allow_unison);
        report.parallel_fixes += fixes;
        report.octave_moves += fit_columns(voices, pools, floor, allow_unison);
        let count = count_parallels(voices);
        debug!(
            "voice-leading pass {}: {fixes} swaps, {count} parallels remain",
            report.passes
        );
        if count < best_count {
            best_count = count;
            best = voices.to_vec();
        }
        if fixes == 0 || count == 0 {
            break;
        }
    }

    for (voice, kept) in voices.iter_mut().zip(best) {
        *voice = kept;
    }
    report.remaining_parallels = best_count;
    report
}

fn pool_at(pools: &[Vec<Arc<[u8]>>], v: usize, j: usize) -> &[u8] {
    pools.get(v).and_then(|p| p.get(j)).map_or(&[][..], |p| &p[..])
}

/// Top-down fitting. Returns the number of notes moved.
fn fit_columns(
    voices: &mut [Vec<u8>],
    pools: &[Vec<Arc<[u8]>>],
    floor: u8,
    allow_unison: bool,
) -> usize {
    let n = voices.iter().map(Vec::len).min().unwrap_or(0);
    let dependents = voices.len() - 1;
    let mut moved = 0;
    for j in 0..n {
        let bottom = column_bottom(voices[0][j], floor);
        for v in 1..voices.len() {
            let upper = voices[v - 1][j];
            let current = voices[v][j];
            let fitted = if j + 1 == n {
                place(current, bottom, upper.saturating_sub(1))
                    .or_else(|| place(current, bottom, upper))
                    .unwrap_or(upper)
            } else {
                let (low, high) = slot(upper, bottom, dependents - v, allow_unison);
                place(current, low, high)
                    .or_else(|| {
                        pool_at(pools, v, j)
                            .iter()
                            .filter_map(|&alt| place(alt, low, high))
                            .min_by_key(|&p| (p.abs_diff(current), p))
                    })
                    .unwrap_or(if low <= high { high } else { upper })
            };
            if fitted != current {
                voices[v][j] = fitted;
                moved += 1;
            }
        }
    }
    moved
}

/// Swap lower notes of parallel motion for other pool candidates. The first
/// and last columns are left alone.
fn repair_parallels(
    voices: &mut [Vec<u8>],
    pools: &[Vec<Arc<[u8]>>],
    floor: u8,
    allow_unison: bool,
) -> usize {
    let n = voices.iter().map(Vec::len).min().unwrap_or(0);
    let dependents = voices.len() - 1;
    let mut fixes = 0;
    for v in 1..voices.len() {
        for j in 1..n.saturating_sub(1) {
            let bottom = column_bottom(voices[0][j], floor);
            let upper = &voices[v - 1];
            let lower = &voices[v];
            if !interval::is_parallel_perfect(upper[j - 1], lower[j - 1], upper[j], lower[j]) {
                continue;
            }
            let current = lower[j];
            let (low, high) = slot(upper[j], bottom, dependents - v, allow_unison);
            let mut best: Option<u8> = None;
            for &alt in pool_at(pools, v, j) {
                let Some(placed) = place(alt, low, high) else {
                    continue;
                };
                if placed == current {
                    continue;
                }
                let clear_before =
                    !interval::is_parallel_perfect(upper[j - 1], lower[j - 1], upper[j], placed);
                let clear_after =
                    !interval::is_parallel_perfect(upper[j], placed, upper[j + 1], lower[j + 1]);
                if clear_before
                    && clear_after
                    && best.is_none_or(|b| placed.abs_diff(current) < b.abs_diff(current))
                {
                    best = Some(placed);
                }
            }
            if let Some(pitch) = best {
                voices[v][j] = pitch;
                fixes += 1;
            }
        }
    }
    fixes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_roles() {
        assert_eq!(voice_roles(0, false), vec![VoiceRole::Melody]);
        assert_eq!(
            voice_roles(2, true),
            vec![
                VoiceRole::Melody,
                VoiceRole::Harmony { line: 0 },
                VoiceRole::Harmony { line: 1 },
                VoiceRole::Counterpoint,
            ]
        );
        assert_eq!(VoiceRole::Harmony { line: 1 }.to_string(), "harmony 2");
    }

    #[test]
    fn test_place() {
        assert_eq!(place(64, 60, 71), Some(64));
        assert_eq!(place(88, 60, 71), Some(64));
        assert_eq!(place(40, 60, 71), Some(64));
        assert_eq!(place(72, 60, 71), Some(60));
        assert_eq!(place(84, 60, 72), Some(72));
        assert_eq!(place(71, 48, 59), Some(59));
        assert_eq!(place(65, 57, 63), None);
        assert_eq!(place(60, 61, 60), None);
    }

    #[test]
    fn test_slot_leaves_room_below() {
        assert_eq!(slot(72, 60, 0, false), (60, 71));
        assert_eq!(slot(72, 60, 3, false), (63, 71));
        assert_eq!(slot(72, 60, 3, true), (60, 72));
        assert_eq!(slot(0, 0, 0, false), (0, 0));
    }

    #[test]
    fn test_column_is_valid() {
        assert!(column_is_valid(&[72, 67, 64, 60], false));
        assert!(!column_is_valid(&[72, 74], false));
        assert!(!column_is_valid(&[72, 72], false));
        assert!(column_is_valid(&[72, 72], true));
        assert!(!column_is_valid(&[72, 55], false));
        // Adjacent gaps are fine but the bottom is too far from the melody.
        assert!(!column_is_valid(&[72, 67, 60, 55], false));
    }

    #[test]
    fn test_enforce_keeps_every_voice_under_the_melody() {
        let mut voices = vec![
            vec![67, 69, 71, 72],
            vec![76, 40, 74, 84],
            vec![36, 65, 90, 48],
        ];
        let pools: Vec<Vec<Arc<[u8]>>> = Vec::new();
        enforce_voice_leading(&mut voices, &pools, 0, false, MAX_CORRECTION_PASSES);
        for j in 0..3 {
            let column: Vec<u8> = voices.iter().map(|v| v[j]).collect();
            assert!(column_is_valid(&column, false), "column {j}: {column:?}");
        }
        // Pitch classes survive where they fit; without a pool the rest
        // take the highest free pitch.
        assert_eq!(voices[1], vec![64, 64, 62, 60]);
        // The final column keeps its roots and doubles the voice above.
        assert_eq!(voices[2], vec![60, 63, 61, 60]);
        // The melody is never moved.
        assert_eq!(voices[0], vec![67, 69, 71, 72]);
    }

    #[test]
    fn test_fitting_prefers_pool_alternative() {
        // F has no place between E and the octave floor; the pool offers D.
        let mut voices = vec![vec![69, 69], vec![64, 64], vec![65, 57]];
        let pool: Arc<[u8]> = vec![50, 53, 62].into();
        let pools = vec![vec![pool.clone(); 2], vec![pool.clone(); 2], vec![pool; 2]];
        enforce_voice_leading(&mut voices, &pools, 0, false, MAX_CORRECTION_PASSES);
        assert_eq!(voices[2][0], 62);
        assert_eq!(voices[2][1], 57);
    }

    #[test]
    fn test_stack_fits_at_bottom_of_midi_range() {
        // Five lines under a low melody, nothing under pitch 0.
        let melody = vec![12, 14, 16, 14, 12];
        let mut voices = vec![melody.clone()];
        voices.extend((0..5).map(|k| vec![7 + k, 40 - k, 2, 90, 0]));
        let pools: Vec<Vec<Arc<[u8]>>> = Vec::new();
        enforce_voice_leading(&mut voices, &pools, 0, false, MAX_CORRECTION_PASSES);
        for j in 0..4 {
            let column: Vec<u8> = voices.iter().map(|v| v[j]).collect();
            assert!(column_is_valid(&column, false), "column {j}: {column:?}");
        }
        let last: Vec<u8> = voices.iter().map(|v| v[4]).collect();
        assert!(column_is_valid(&last, true), "{last:?}");
        assert_eq!(voices[0], melody);
    }

    #[test]
    fn test_parallel_fifths_repaired_from_pool() {
        // C-G to D-A is a parallel fifth in the middle column.
        let mut voices = vec![vec![67, 69, 67, 67], vec![60, 62, 64, 60]];
        let pool: Arc<[u8]> = vec![53, 57, 60, 62, 65].into();
        let pools = vec![vec![pool.clone(); 4], vec![pool; 4]];
        assert_eq!(count_parallels(&voices), 1);
        let report = enforce_voice_leading(&mut voices, &pools, 0, false, MAX_CORRECTION_PASSES);
        assert_eq!(report.remaining_parallels, 0);
        assert_eq!(report.parallel_fixes, 1);
        assert_eq!(count_parallels(&voices), 0);
        assert_ne!(voices[1][1], 62);
        assert_eq!(voices[1][0], 60);
        assert_eq!(voices[1][3], 60);
    }

    #[test]
    fn test_unrepairable_parallels_keep_best() {
        let mut voices = vec![vec![67, 69, 71], vec![60, 62, 64]];
        // Only the offending pitch class is available.
        let pool: Arc<[u8]> = vec![62].into();
        let pools = vec![vec![pool.clone(); 3], vec![pool; 3]];
        let report = enforce_voice_leading(&mut voices, &pools, 0, false, MAX_CORRECTION_PASSES);
        assert_eq!(report.remaining_parallels, 2);
        assert_eq!(report.passes, 1);
        assert_eq!(voices[1], vec![60, 62, 64]);
    }

    #[test]
    fn test_single_voice_untouched() {
        let mut voices = vec![vec![60, 90, 30]];
        let report = enforce_voice_leading(&mut voices, &[], 0, false, MAX_CORRECTION_PASSES);
        assert_eq!(report, VoicingReport::default());
        assert_eq!(voices[0], vec![60, 90, 30]);
    }
}
