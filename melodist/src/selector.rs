// Note selector: the per-voice stateful sampler.
//
// One `NoteSelector` produces one voice, a step at a time, against the shared
// timeline. It moves through four states:
//
//   Seeding    the opening motif (melody only): a random low pool note, then
//              rising stepwise through the key scale, with strong-beat notes
//              snapped to chord tones.
//   Stepping   the main loop. At every motif boundary the melody restates the
//              note one motif earlier, shifted a scale degree in the contour
//              direction (and possibly by an octave). Every other step draws
//              from the candidate pool under the weighting engine.
//   Cadencing  the final note: the root of the final chord nearest the
//              previous pitch, inside the voice's active range.
//   Done       nothing more to emit.
//
// With a plagal cadence the melody's final tonic is placed first and the
// penultimate note forced to the scale step above it, so the line descends
// stepwise onto the final I.
//
// A selector never stalls. If the weights collapse the engine already goes
// uniform, and an empty pool falls back to a uniform draw from the key scale.
// Only a pool that is empty after every relaxation surfaces as
// `NoLegalCandidate`.

use crate::error::{GenError, Result};
use crate::mode::{Key, Scale};
use crate::model::SequenceModel;
use crate::pitch::{OctaveRange, interval, note_name};
use crate::planner::{PhrasePlan, fold_into};
use crate::polyphony::VoiceRole;
use crate::pool::{CandidatePoolCache, Restriction};
use crate::style::StyleVector;
use crate::timeline::{Cadence, Timeline};
use crate::weighting::{self, EnsembleContext, EnsembleGoal, StepContext, WeightParams};
use log::{debug, trace};
use melodist_prng::PhraseRng;
use std::sync::Arc;

/// Scale degrees handed to the sequence model.
pub const MODEL_HISTORY: usize = 4;

/// Own pitches visible to the style term.
const STYLE_HISTORY: usize = 4;

/// Diatonic offsets below the reference for harmony lines: third, sixth,
/// octave, then cycling.
pub const HARMONY_DEGREE_OFFSETS: [i32; 3] = [-2, -5, -7];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    Seeding,
    Stepping,
    Cadencing,
    Done,
}

/// Leap bookkeeping for one voice. Reset at the start of every voice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeapState {
    pub previous_interval: Option<i16>,
    /// Direction of the last leap, cleared once a non-leap follows it.
    pub leap_direction: i8,
    pub consecutive_leaps: u32,
}

impl LeapState {
    pub fn record(&mut self, semitones: i16) {
        self.previous_interval = Some(semitones);
        if interval::is_leap(semitones) {
            self.leap_direction = semitones.signum() as i8;
            self.consecutive_leaps += 1;
        } else {
            self.leap_direction = 0;
            self.consecutive_leaps = 0;
        }
    }
}

/// Per-call switches that shape every voice.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorOptions {
    pub motif_length: usize,
    pub octave_shift_chance: f64,
    pub allow_tritone: bool,
    pub allow_unison: bool,
    pub cadence: Cadence,
    /// Harmony and counterpoint lines under the melody.
    pub dependent_voices: usize,
}

impl Default for SelectorOptions {
    fn default() -> Self {
        SelectorOptions {
            motif_length: 4,
            octave_shift_chance: 0.1,
            allow_tritone: false,
            allow_unison: false,
            cadence: Cadence::Tonic,
            dependent_voices: 0,
        }
    }
}

/// Read-only state shared by every voice of one phrase.
#[derive(Debug)]
pub struct SelectorContext<'a> {
    pub key: &'a Key,
    pub scale: Scale,
    pub timeline: &'a Timeline,
    pub plan: &'a PhrasePlan,
    pub params: &'a WeightParams,
    pub options: &'a SelectorOptions,
    pub style: Option<&'a StyleVector>,
    pub model: &'a dyn SequenceModel,
    /// Guide pitches from the hierarchical planner, melody only.
    pub guides: Option<&'a [u8]>,
}

/// A finished voice plus the pool each step drew from.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceOutput {
    pub role: VoiceRole,
    pub range: OctaveRange,
    pub pitches: Vec<u8>,
    pub pools: Vec<Arc<[u8]>>,
    /// Steps where every candidate was ruled out and weights went uniform.
    pub uniform_fallbacks: usize,
}

pub struct NoteSelector<'a> {
    ctx: &'a SelectorContext<'a>,
    role: VoiceRole,
    range: OctaveRange,
    reference: Option<&'a [u8]>,
    cache: &'a mut CandidatePoolCache,
    rng: PhraseRng,
    state: SelectorState,
    leap: LeapState,
    octave_offset: i8,
    plagal_tonic: Option<u8>,
    pitches: Vec<u8>,
    pools: Vec<Arc<[u8]>>,
    uniform_fallbacks: usize,
}

impl<'a> NoteSelector<'a> {
    /// A selector for `role`. Dependent voices need the melody as
    /// `reference`, one pitch per step.
    pub fn new(
        ctx: &'a SelectorContext<'a>,
        role: VoiceRole,
        reference: Option<&'a [u8]>,
        cache: &'a mut CandidatePoolCache,
        rng: PhraseRng,
    ) -> Result<Self> {
        let steps = ctx.timeline.len();
        let range = match role {
            VoiceRole::Melody => ctx.plan.octave_range,
            _ => {
                match reference {
                    Some(r) if r.len() == steps => {}
                    _ => {
                        return Err(GenError::config(format!(
                            "{role} voice needs a {steps}-note reference line"
                        )));
                    }
                }
                ctx.plan.octave_range.extended_down()
            }
        };
        let mut selector = NoteSelector {
            ctx,
            role,
            range,
            reference,
            cache,
            rng,
            state: SelectorState::Seeding,
            leap: LeapState::default(),
            octave_offset: 0,
            plagal_tonic: None,
            pitches: Vec::with_capacity(steps),
            pools: Vec::with_capacity(steps),
            uniform_fallbacks: 0,
        };
        selector.state = selector.state_at(0);
        Ok(selector)
    }

    pub fn state(&self) -> SelectorState {
        self.state
    }

    pub fn leap_state(&self) -> LeapState {
        self.leap
    }

    pub fn pitches(&self) -> &[u8] {
        &self.pitches
    }

    /// Emit the next pitch, or `None` once the voice is complete.
    pub fn step(&mut self) -> Result<Option<u8>> {
        let i = self.pitches.len();
        let pitch = match self.state {
            SelectorState::Done => return Ok(None),
            SelectorState::Cadencing => self.cadence_note(i)?,
            _ if self.is_plagal_approach(i) => self.plagal_approach_note(i)?,
            SelectorState::Seeding => self.seed_note(i)?,
            SelectorState::Stepping => self.stepping_note(i)?,
        };
        if let Some(&prev) = self.pitches.last() {
            self.leap.record(interval::semitones(prev, pitch));
        }
        trace!(
            "{} step {i} ({:?}): {}",
            self.role,
            self.state,
            note_name(pitch)
        );
        self.pitches.push(pitch);
        self.state = self.state_at(i + 1);
        Ok(Some(pitch))
    }

    /// Run to completion.
    pub fn run(mut self) -> Result<VoiceOutput> {
        while self.step()?.is_some() {}
        debug!(
            "{} voice: {} notes, {} uniform fallbacks",
            self.role,
            self.pitches.len(),
            self.uniform_fallbacks
        );
        Ok(VoiceOutput {
            role: self.role,
            range: self.range,
            pitches: self.pitches,
            pools: self.pools,
            uniform_fallbacks: self.uniform_fallbacks,
        })
    }

    fn state_at(&self, index: usize) -> SelectorState {
        let n = self.ctx.timeline.len();
        if index >= n {
            SelectorState::Done
        } else if index == n - 1 {
            SelectorState::Cadencing
        } else if self.role == VoiceRole::Melody && index < self.ctx.options.motif_length {
            SelectorState::Seeding
        } else {
            SelectorState::Stepping
        }
    }

    fn is_plagal_approach(&self, index: usize) -> bool {
        self.role == VoiceRole::Melody
            && self.ctx.options.cadence == Cadence::Plagal
            && index + 2 == self.ctx.timeline.len()
    }

    /// The melody's range after any register shift; dependents never shift.
    fn active_range(&self) -> OctaveRange {
        self.range.shifted(self.octave_offset).unwrap_or(self.range)
    }

    fn pool(&mut self, index: usize, range: OctaveRange, restriction: Restriction) -> Result<Arc<[u8]>> {
        let ctx = self.ctx;
        self.cache
            .pool(ctx.key, ctx.timeline.chord_at(index), range, restriction)
    }

    fn seed_note(&mut self, i: usize) -> Result<u8> {
        let ctx = self.ctx;
        let range = self.active_range();
        let pool = self.pool(i, range, Restriction::ChordScale)?;
        let mut pitch = match self.pitches.last() {
            None => {
                // Start in the lowest third so the motif has room to rise.
                let take = (pool.len() / 3).max(1).min(pool.len());
                *self.rng.choose(&pool[..take]).ok_or_else(|| no_candidate(self.role, i))?
            }
            Some(&prev) => ctx
                .scale
                .step(prev, 1)
                .filter(|&p| range.contains(p))
                .unwrap_or(prev),
        };
        if ctx.timeline.steps()[i].strong {
            let tones = ctx.timeline.chord_at(i).tones();
            let floor = self.pitches.last().map_or(0, |&p| p.saturating_add(1));
            pitch = nearest_where(&pool, pitch, |p| tones.contains(p) && p >= floor).unwrap_or(pitch);
        }
        self.pools.push(pool);
        Ok(pitch)
    }

    fn stepping_note(&mut self, i: usize) -> Result<u8> {
        let motif = self.ctx.options.motif_length;
        if self.role == VoiceRole::Melody && motif > 0 && i >= motif && i % motif == 0 {
            return self.motif_repeat(i);
        }
        self.weighted_note(i)
    }

    fn motif_repeat(&mut self, i: usize) -> Result<u8> {
        let ctx = self.ctx;
        let ascending = i < ctx.timeline.len() / 2;
        self.shift_register(ascending);
        let range = self.active_range();
        let pool = self.pool(i, range, Restriction::ChordScale)?;
        self.pools.push(pool);

        let source = self.pitches[i - ctx.options.motif_length];
        let prev = self.pitches[i - 1];
        let mut direction = if ascending { 1 } else { -1 };
        let mut pitch = restate(&ctx.scale, source, direction, range);
        if self.leap.leap_direction != 0
            && interval::direction(prev, pitch) == self.leap.leap_direction
        {
            direction = -direction;
            pitch = restate(&ctx.scale, source, direction, range);
        }
        Ok(pitch)
    }

    /// Register shifts happen only at motif boundaries and stay within one
    /// octave of the base. A raised register comes back down once the
    /// phrase starts to descend. Under dependent voices the melody never
    /// drops below its base register.
    fn shift_register(&mut self, ascending: bool) {
        if !ascending && self.octave_offset > 0 {
            self.octave_offset = 0;
            return;
        }
        if !self.rng.random_bool(self.ctx.options.octave_shift_chance) {
            return;
        }
        let shift = if ascending && self.rng.random_bool(0.5) { 1 } else { -1 };
        let lowest = if self.ctx.options.dependent_voices > 0 { 0 } else { -1 };
        let next = (self.octave_offset + shift).clamp(lowest, 1);
        if next != self.octave_offset && self.range.shifted(next).is_some() {
            debug!("{} register shift {} -> {next}", self.role, self.octave_offset);
            self.octave_offset = next;
        }
    }

    fn weighted_note(&mut self, i: usize) -> Result<u8> {
        let ctx = self.ctx;
        let step = ctx.timeline.steps()[i];
        let restriction = if step.strong {
            Restriction::ChordTones
        } else {
            Restriction::ChordScale
        };
        let range = self.active_range();
        let pool = self.pool(i, range, restriction)?;

        let len = self.pitches.len();
        let history: Vec<i32> = self.pitches[len.saturating_sub(MODEL_HISTORY)..]
            .iter()
            .filter_map(|&p| ctx.scale.absolute_degree(ctx.scale.snap(p)))
            .collect();
        let scores = if history.is_empty() {
            Vec::new()
        } else {
            ctx.model.predict(&history)
        };

        let melody = self.role == VoiceRole::Melody;
        let contour_direction = match (melody, i < ctx.timeline.len() / 2) {
            (false, _) => 0,
            (true, true) => 1,
            (true, false) => -1,
        };
        let step_ctx = StepContext {
            previous: self.pitches.last().copied(),
            previous_interval: self.leap.previous_interval,
            leap_direction: self.leap.leap_direction,
            consecutive_leaps: self.leap.consecutive_leaps,
            strong: step.strong,
            chord_tones: ctx.timeline.chord_at(i).tones(),
            key_scale: &ctx.scale,
            tension: ctx.plan.tension_at(i),
            contour_direction,
            guide: if melody {
                ctx.guides.and_then(|g| g.get(i).copied())
            } else {
                None
            },
            allow_tritone: ctx.options.allow_tritone,
            recent: &self.pitches[len.saturating_sub(STYLE_HISTORY)..],
            ensemble: self.ensemble_context(i),
        };
        let weighted = weighting::weights(&pool, &step_ctx, ctx.params, ctx.style, &scores);
        if weighted.uniform {
            self.uniform_fallbacks += 1;
        }
        let pitch = match self.rng.weighted_index(&weighted.weights) {
            Some(idx) => pool[idx],
            None => self.key_scale_fallback(i, range)?,
        };
        self.pools.push(pool);
        Ok(pitch)
    }

    /// Uniform draw from the key scale when the chord pools are empty.
    fn key_scale_fallback(&mut self, i: usize, range: OctaveRange) -> Result<u8> {
        let pool = self.pool(i, range, Restriction::KeyScale)?;
        self.rng
            .choose(&pool)
            .copied()
            .ok_or_else(|| no_candidate(self.role, i))
    }

    fn ensemble_context(&self, i: usize) -> Option<EnsembleContext> {
        let reference = self.reference?;
        let now = reference[i];
        let goal = match self.role {
            VoiceRole::Melody => return None,
            VoiceRole::Harmony { line } => EnsembleGoal::Harmony {
                target: harmony_target(&self.ctx.scale, now, line),
            },
            VoiceRole::Counterpoint => EnsembleGoal::Counterpoint,
        };
        Some(EnsembleContext {
            goal,
            reference_prev: i.checked_sub(1).map(|j| reference[j]),
            reference_now: now,
            allow_unison: self.ctx.options.allow_unison,
        })
    }

    /// The scale step above the final tonic. The tonic itself is chosen
    /// here, in range and with room above it for the approach.
    fn plagal_approach_note(&mut self, i: usize) -> Result<u8> {
        let ctx = self.ctx;
        let range = self.active_range();
        let pool = self.pool(i, range, Restriction::ChordScale)?;
        self.pools.push(pool);
        let (_, ceiling) = ctx.plan.octave_range.tolerance_bounds(1);
        let from = self.pitches.last().copied().unwrap_or_else(|| centre(range));
        let tonic = nearest_in_range(from, ctx.key.tonic, range, |t| {
            ctx.scale.step(t, 1).is_some_and(|above| above <= ceiling)
        })
        .unwrap_or_else(|| nearest_with_pitch_class(from, ctx.key.tonic));
        self.plagal_tonic = Some(tonic);
        Ok(ctx.scale.step(tonic, 1).unwrap_or(tonic))
    }

    fn cadence_note(&mut self, i: usize) -> Result<u8> {
        let ctx = self.ctx;
        let range = self.active_range();
        let pool = self.pool(i, range, Restriction::ChordTones)?;
        self.pools.push(pool);
        if let Some(tonic) = self.plagal_tonic {
            return Ok(tonic);
        }
        let root = ctx.timeline.final_chord().root;
        let from = self.pitches.last().copied().unwrap_or_else(|| centre(range));
        Ok(nearest_in_range(from, root, range, |_| true)
            .unwrap_or_else(|| nearest_with_pitch_class(from, root)))
    }
}

fn no_candidate(role: VoiceRole, step: usize) -> GenError {
    GenError::NoLegalCandidate {
        context: format!("{role} voice at step {step}"),
    }
}

fn centre(range: OctaveRange) -> u8 {
    ((range.low_pitch() as u16 + range.high_pitch() as u16) / 2) as u8
}

/// The pitch `offset` scale degrees from `source`, folded into `range`.
fn restate(scale: &Scale, source: u8, offset: i32, range: OctaveRange) -> u8 {
    let pitch = scale.step(source, offset).unwrap_or(source);
    fold_into(pitch, range.low_pitch(), range.high_pitch())
}

/// Member of `pool` nearest `target` satisfying `keep`, ties to the lower.
fn nearest_where(pool: &[u8], target: u8, keep: impl Fn(u8) -> bool) -> Option<u8> {
    pool.iter()
        .copied()
        .filter(|&p| keep(p))
        .min_by_key(|&p| (p.abs_diff(target), p))
}

/// The pitch with class `pc` inside `range` nearest `from` that satisfies
/// `keep`, ties to the lower.
pub fn nearest_in_range(
    from: u8,
    pc: u8,
    range: OctaveRange,
    keep: impl Fn(u8) -> bool,
) -> Option<u8> {
    (range.low_pitch()..=range.high_pitch())
        .filter(|&p| p % 12 == pc && keep(p))
        .min_by_key(|&p| (p.abs_diff(from), p))
}

/// The pitch with class `pc` nearest `from`, ties to the lower.
pub fn nearest_with_pitch_class(from: u8, pc: u8) -> u8 {
    let down = (from as i16 % 12 - pc as i16).rem_euclid(12);
    let below = from as i16 - down;
    let above = below + 12;
    let pick = if below >= 0 && (down <= 12 - down || above > 127) {
        below
    } else {
        above
    };
    pick.clamp(0, 127) as u8
}

/// The pitch a harmony line aims for under `reference`.
pub fn harmony_target(scale: &Scale, reference: u8, line: usize) -> u8 {
    let offset = HARMONY_DEGREE_OFFSETS[line % HARMONY_DEGREE_OFFSETS.len()];
    scale
        .absolute_degree(scale.snap(reference))
        .and_then(|d| scale.pitch_at(d + offset))
        .unwrap_or_else(|| reference.saturating_sub(12))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::Chord;
    use crate::model::NullModel;
    use crate::planner::{Contour, plan_phrase};
    use crate::rhythm::{Meter, lay_out};
    use crate::timeline::ChordPacing;

    struct Fixture {
        key: Key,
        timeline: Timeline,
        plan: PhrasePlan,
        params: WeightParams,
        options: SelectorOptions,
    }

    fn fixture(durations: &[u32], chords: &[&str], cadence: Cadence) -> Fixture {
        fixture_in("C", durations, chords, cadence)
    }

    fn fixture_in(key: &str, durations: &[u32], chords: &[&str], cadence: Cadence) -> Fixture {
        let key = Key::parse(key).unwrap();
        let meter = Meter::default();
        let rhythm = lay_out(durations, &meter);
        let chords: Vec<Chord> = chords.iter().map(|c| Chord::parse(c).unwrap()).collect();
        let mut timeline =
            Timeline::from_progression(&rhythm, meter, &chords, ChordPacing::PerBar).unwrap();
        timeline.apply_cadence(&key, cadence);
        let plan = plan_phrase(durations.len(), 4, 1, Contour::Arch).unwrap();
        Fixture {
            key,
            timeline,
            plan,
            params: WeightParams::default(),
            options: SelectorOptions {
                cadence,
                ..SelectorOptions::default()
            },
        }
    }

    fn context(f: &Fixture) -> SelectorContext<'_> {
        SelectorContext {
            key: &f.key,
            scale: f.key.scale(),
            timeline: &f.timeline,
            plan: &f.plan,
            params: &f.params,
            options: &f.options,
            style: None,
            model: &NullModel,
            guides: None,
        }
    }

    fn run_melody(f: &Fixture, seed: u64) -> VoiceOutput {
        let ctx = context(f);
        let mut cache = CandidatePoolCache::new();
        NoteSelector::new(&ctx, VoiceRole::Melody, None, &mut cache, PhraseRng::new(seed))
            .unwrap()
            .run()
            .unwrap()
    }

    #[test]
    fn test_leap_state_record() {
        let mut leap = LeapState::default();
        leap.record(2);
        assert_eq!(leap.leap_direction, 0);
        leap.record(-9);
        assert_eq!(leap.leap_direction, -1);
        assert_eq!(leap.consecutive_leaps, 1);
        leap.record(7);
        assert_eq!(leap.leap_direction, 1);
        assert_eq!(leap.consecutive_leaps, 2);
        leap.record(-1);
        assert_eq!(leap, LeapState {
            previous_interval: Some(-1),
            leap_direction: 0,
            consecutive_leaps: 0,
        });
    }

    #[test]
    fn test_state_progression() {
        let f = fixture(&[480; 8], &["C", "G"], Cadence::Tonic);
        let ctx = context(&f);
        let mut cache = CandidatePoolCache::new();
        let mut selector =
            NoteSelector::new(&ctx, VoiceRole::Melody, None, &mut cache, PhraseRng::new(1))
                .unwrap();
        let mut states = Vec::new();
        while selector.state() != SelectorState::Done {
            states.push(selector.state());
            selector.step().unwrap();
        }
        assert_eq!(states[..4], [SelectorState::Seeding; 4]);
        assert_eq!(states[4..7], [SelectorState::Stepping; 3]);
        assert_eq!(states[7], SelectorState::Cadencing);
        assert_eq!(selector.step().unwrap(), None);
    }

    #[test]
    fn test_melody_length_and_tonic_cadence() {
        let f = fixture(&[480; 12], &["C", "G", "Am", "F"], Cadence::Tonic);
        for seed in 0..40 {
            let voice = run_melody(&f, seed);
            assert_eq!(voice.pitches.len(), 12);
            assert_eq!(voice.pools.len(), 12);
            assert_eq!(voice.pitches[11] % 12, 0, "seed {seed}: {:?}", voice.pitches);
        }
    }

    #[test]
    fn test_seed_motif_rises() {
        let f = fixture(&[480; 8], &["C", "G"], Cadence::Tonic);
        for seed in 0..40 {
            let voice = run_melody(&f, seed);
            for k in 1..4 {
                assert!(
                    voice.pitches[k] > voice.pitches[k - 1],
                    "seed {seed}: {:?}",
                    voice.pitches
                );
            }
            // Every onset in 4/4 quarters is strong, so the motif is all
            // chord tones of C.
            for &p in &voice.pitches[..4] {
                assert!(matches!(p % 12, 0 | 4 | 7), "seed {seed}: {p}");
            }
        }
    }

    #[test]
    fn test_same_seed_same_voice() {
        let f = fixture(&[480, 240, 240, 960, 480, 480, 960, 480, 480], &["Am", "Dm", "E7"], Cadence::Tonic);
        assert_eq!(run_melody(&f, 9).pitches, run_melody(&f, 9).pitches);
    }

    #[test]
    fn test_plagal_approach_descends_stepwise() {
        let f = fixture(&[480; 8], &["C", "G"], Cadence::Plagal);
        for seed in 0..30 {
            let voice = run_melody(&f, seed);
            let penultimate = voice.pitches[6];
            let last = voice.pitches[7];
            assert_eq!(penultimate % 12, 2);
            assert_eq!(last % 12, 0);
            assert_eq!(penultimate - last, 2);
        }
    }

    #[test]
    fn test_plagal_tonic_placed_before_approach() {
        // B and A# put the supertonic across a C, so a separately chosen
        // tonic could land an octave off.
        for (key, chords) in [("B", ["B", "E"]), ("A#", ["A#", "D#"]), ("Bm", ["Bm", "Em"])] {
            let mut f = fixture_in(key, &[480; 24], &chords, Cadence::Plagal);
            f.options.octave_shift_chance = 1.0;
            let tonic = f.key.tonic;
            let scale = f.key.scale();
            let (low, high) = f.plan.octave_range.tolerance_bounds(1);
            for seed in 0..100 {
                let voice = run_melody(&f, seed);
                let (penultimate, last) = (voice.pitches[22], voice.pitches[23]);
                assert_eq!(last % 12, tonic, "{key} seed {seed}");
                assert_eq!(scale.step(last, 1), Some(penultimate), "{key} seed {seed}");
                assert!(penultimate - last <= 2, "{key} seed {seed}");
                for &p in &voice.pitches {
                    assert!((low..=high).contains(&p), "{key} seed {seed}: {p}");
                }
            }
        }
    }

    #[test]
    fn test_register_stays_up_under_dependents() {
        let mut f = fixture(&[480; 24], &["C", "G", "Am", "F"], Cadence::Tonic);
        f.options.octave_shift_chance = 1.0;
        f.options.dependent_voices = 2;
        let floor = f.plan.octave_range.low_pitch();
        for seed in 0..50 {
            let voice = run_melody(&f, seed);
            assert!(
                voice.pitches.iter().all(|&p| p >= floor),
                "seed {seed}: {:?}",
                voice.pitches
            );
        }
    }

    #[test]
    fn test_nearest_in_range() {
        let range = OctaveRange::new(4, 5).unwrap();
        assert_eq!(nearest_in_range(50, 0, range, |_| true), Some(60));
        assert_eq!(nearest_in_range(90, 11, range, |_| true), Some(83));
        assert_eq!(nearest_in_range(66, 0, range, |_| true), Some(60));
        assert_eq!(nearest_in_range(83, 11, range, |p| p < 80), Some(71));
        assert_eq!(nearest_in_range(60, 0, range, |_| false), None);
    }

    #[test]
    fn test_zero_weights_still_complete() {
        let mut f = fixture(&[480; 16], &["C", "F", "G", "C"], Cadence::Tonic);
        f.params.transition_weights = vec![0.0; 8];
        f.params.transition_default = 0.0;
        let voice = run_melody(&f, 3);
        assert_eq!(voice.pitches.len(), 16);
        assert!(voice.uniform_fallbacks > 0);
        assert_eq!(voice.pitches[15] % 12, 0);
    }

    #[test]
    fn test_harmony_voice_follows_reference() {
        let f = fixture(&[480; 8], &["C", "F"], Cadence::Tonic);
        let melody = run_melody(&f, 5);
        let ctx = context(&f);
        let mut cache = CandidatePoolCache::new();
        let harmony = NoteSelector::new(
            &ctx,
            VoiceRole::Harmony { line: 0 },
            Some(melody.pitches.as_slice()),
            &mut cache,
            PhraseRng::new(6),
        )
        .unwrap()
        .run()
        .unwrap();
        assert_eq!(harmony.pitches.len(), 8);
        assert_eq!(harmony.pitches[7] % 12, 0);
        let below = melody
            .pitches
            .iter()
            .zip(&harmony.pitches)
            .filter(|(m, h)| h < m)
            .count();
        assert!(below >= 5, "{:?} vs {:?}", melody.pitches, harmony.pitches);
    }

    #[test]
    fn test_dependent_voice_requires_reference() {
        let f = fixture(&[480; 4], &["C"], Cadence::Tonic);
        let ctx = context(&f);
        let mut cache = CandidatePoolCache::new();
        let result = NoteSelector::new(
            &ctx,
            VoiceRole::Counterpoint,
            None,
            &mut cache,
            PhraseRng::new(0),
        );
        assert!(matches!(result, Err(GenError::Configuration(_))));
    }

    #[test]
    fn test_nearest_with_pitch_class() {
        assert_eq!(nearest_with_pitch_class(62, 0), 60);
        assert_eq!(nearest_with_pitch_class(70, 0), 72);
        // Tritone away: ties go down.
        assert_eq!(nearest_with_pitch_class(66, 0), 60);
        assert_eq!(nearest_with_pitch_class(67, 7), 67);
        assert_eq!(nearest_with_pitch_class(3, 9), 9);
    }

    #[test]
    fn test_harmony_targets() {
        let scale = Key::parse("C").unwrap().scale();
        assert_eq!(harmony_target(&scale, 67, 0), 64); // G -> E
        assert_eq!(harmony_target(&scale, 67, 1), 59); // G -> B
        assert_eq!(harmony_target(&scale, 67, 2), 55); // G -> G
        assert_eq!(harmony_target(&scale, 67, 3), 64);
    }
}
