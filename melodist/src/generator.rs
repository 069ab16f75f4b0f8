// Phrase generation pipeline.
//
// `Generator` holds the optional, reusable collaborators (sequence model,
// progression model, reference corpus statistics) and turns a
// `GenerationRequest` into a `Phrase`:
//
//   1. validate the request (every caller error surfaces here)
//   2. rhythm                          rng stream 0x100
//   3. harmony timeline: the caller's progression, or a generated one over
//      the bar-aligned length          rng stream 0x101
//   4. cadence reharmonization
//   5. phrase plan, plus skeleton/infill guides when hierarchical
//                                      rng stream 0x102
//   6. voices via the polyphonic coordinator (melody stream 1, dependent
//      voice k stream 2 + k) and voice-leading correction
//   7. optional corpus-distance refinement    rng stream 0x104
//   8. notes with tension-driven velocity, optionally humanized
//                                      rng stream 0x103
//
// Every stage draws from its own stream forked from the request seed, so
// switching a stage on or off (or running voices in parallel) never disturbs
// the numbers another stage sees.

use crate::config::GenerationRequest;
use crate::error::Result;
use crate::harmony::{HarmonyGenerator, ProgressionModel};
use crate::model::{NullModel, SequenceModel};
use crate::phrase::{GenerationReport, Note, Phrase, VoiceLine, velocity};
use crate::planner::{INFILL_MOTIFS, infill_skeleton, plan_phrase, plan_skeleton};
use crate::polyphony::{Coordinator, voice_roles};
use crate::pool::CandidatePoolCache;
use crate::refine::{CorpusStats, RefineInput, refine};
use crate::rhythm::TICKS_PER_WHOLE;
use crate::selector::SelectorContext;
use crate::timeline::{Cadence, Timeline, bar_aligned_end};
use log::debug;
use melodist_prng::PhraseRng;
use std::sync::Arc;

const RHYTHM_STREAM: u64 = 0x100;
const HARMONY_STREAM: u64 = 0x101;
const SKELETON_STREAM: u64 = 0x102;
const HUMANIZE_STREAM: u64 = 0x103;
const REFINE_STREAM: u64 = 0x104;

/// Largest velocity change `humanize` applies.
const HUMANIZE_SPREAD: i32 = 10;

const TICKS_PER_QUARTER: f64 = TICKS_PER_WHOLE as f64 / 4.0;

#[derive(Debug, Clone, Default)]
pub struct Generator {
    sequence_model: Option<Arc<dyn SequenceModel>>,
    progression_model: Option<Arc<dyn ProgressionModel>>,
    reference: Option<CorpusStats>,
}

impl Generator {
    /// No models: pure heuristics, rule-based harmony.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sequence_model(mut self, model: Arc<dyn SequenceModel>) -> Self {
        self.sequence_model = Some(model);
        self
    }

    pub fn with_progression_model(mut self, model: Arc<dyn ProgressionModel>) -> Self {
        self.progression_model = Some(model);
        self
    }

    /// Statistics the refinement pass pulls toward. Without them it uses
    /// `CorpusStats::default_reference()`.
    pub fn with_reference(mut self, stats: CorpusStats) -> Self {
        self.reference = Some(stats);
        self
    }

    pub fn generate(&self, request: &GenerationRequest) -> Result<Phrase> {
        let mut cache = CandidatePoolCache::new();
        self.generate_with_cache(request, &mut cache)
    }

    /// Like `generate`, reusing the caller's candidate-pool cache for the
    /// melody. Cached pools are keyed by value, so reuse never changes the
    /// output.
    pub fn generate_with_cache(
        &self,
        request: &GenerationRequest,
        cache: &mut CandidatePoolCache,
    ) -> Result<Phrase> {
        let resolved = request.validate()?;
        let root = PhraseRng::new(request.seed);
        let (hits_before, misses_before) = (cache.hits(), cache.misses());

        let rhythm = resolved.rhythm.generate(
            request.note_count,
            &resolved.meter,
            &mut root.fork(RHYTHM_STREAM),
        )?;

        let mut timeline = match &resolved.chords {
            Some(chords) => {
                Timeline::from_progression(&rhythm, resolved.meter, chords, request.chord_pacing)?
            }
            None => {
                let harmony =
                    HarmonyGenerator::new(resolved.key, self.progression_model.as_deref());
                let spans = harmony.generate(
                    bar_aligned_end(&rhythm, &resolved.meter),
                    &resolved.meter,
                    &mut root.fork(HARMONY_STREAM),
                );
                Timeline::new(&rhythm, resolved.meter, spans)?
            }
        };
        timeline.apply_cadence(&resolved.key, resolved.cadence);
        debug!(
            "timeline: {} steps over {} ticks, {} chord spans",
            timeline.len(),
            timeline.end(),
            timeline.spans().len()
        );

        let plan = plan_phrase(
            request.note_count,
            resolved.base_octave,
            resolved.pitch_span,
            request.contour,
        )?;
        let scale = resolved.key.scale();
        let guides = request.hierarchical.then(|| {
            let mut rng = root.fork(SKELETON_STREAM);
            let anchors = plan_skeleton(&timeline, &plan, &mut rng);
            let motif = rng.choose(INFILL_MOTIFS).copied().unwrap_or(&[0]);
            debug!("skeleton: {} anchors", anchors.len());
            infill_skeleton(&anchors, motif, request.note_count, &scale, plan.octave_range)
        });

        let null_model = NullModel;
        let model: &dyn SequenceModel = match &self.sequence_model {
            Some(model) => &**model,
            None => &null_model,
        };
        let ctx = SelectorContext {
            key: &resolved.key,
            scale,
            timeline: &timeline,
            plan: &plan,
            params: &request.weights,
            options: &resolved.options,
            style: resolved.style.as_ref(),
            model,
            guides: guides.as_deref(),
        };
        let roles = voice_roles(resolved.harmony_lines, request.counterpoint);
        let (voices, voicing) =
            Coordinator::new(&ctx, request.parallel_voices).generate(&roles, &root, cache)?;

        let mut lines: Vec<Vec<u8>> = voices.iter().map(|v| v.pitches.clone()).collect();
        let refinement = match &request.refine {
            Some(config) => {
                let durations: Vec<f64> = timeline
                    .steps()
                    .iter()
                    .map(|s| s.duration as f64 / TICKS_PER_QUARTER)
                    .collect();
                let pools: Vec<_> = voices.iter().map(|v| v.pools.clone()).collect();
                let default_reference;
                let target = match &self.reference {
                    Some(stats) => stats,
                    None => {
                        default_reference = CorpusStats::default_reference();
                        &default_reference
                    }
                };
                let input = RefineInput {
                    durations: &durations,
                    pools: &pools,
                    target,
                    allow_unison: request.allow_unison,
                    locked_tail: if resolved.cadence == Cadence::Plagal { 2 } else { 1 },
                };
                Some(refine(&mut lines, &input, config, &mut root.fork(REFINE_STREAM)))
            }
            None => None,
        };

        let mut humanizer = request.humanize.then(|| root.fork(HUMANIZE_STREAM));
        let voice_lines = voices
            .iter()
            .zip(&lines)
            .enumerate()
            .map(|(v, (output, pitches))| VoiceLine {
                role: output.role,
                notes: timeline
                    .steps()
                    .iter()
                    .zip(pitches)
                    .map(|(step, &pitch)| {
                        let mut vel = velocity(plan.tension_at(step.index), step.strong);
                        if let Some(rng) = humanizer.as_mut() {
                            let jitter = rng.range_i32_inclusive(-HUMANIZE_SPREAD, HUMANIZE_SPREAD);
                            vel = (vel as i32 + jitter).clamp(1, 127) as u8;
                        }
                        Note {
                            pitch,
                            start: step.start,
                            duration: step.duration,
                            velocity: vel,
                            voice: v,
                        }
                    })
                    .collect(),
            })
            .collect();

        let report = GenerationReport {
            voicing,
            refinement,
            uniform_fallbacks: voices.iter().map(|v| v.uniform_fallbacks).sum(),
            cache_hits: cache.hits() - hits_before,
            cache_misses: cache.misses() - misses_before,
        };
        debug!(
            "phrase seed {}: {} voices, {} uniform fallbacks, {} parallels left",
            request.seed,
            voices.len(),
            report.uniform_fallbacks,
            report.voicing.remaining_parallels
        );
        Ok(Phrase {
            key: resolved.key,
            meter: resolved.meter,
            seed: request.seed,
            chords: timeline.spans().to_vec(),
            plan,
            voices: voice_lines,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harmony::ChordMarkovModel;
    use crate::model::DegreeMarkovModel;
    use crate::refine::RefineConfig;
    use crate::rhythm::RhythmSource;

    fn request(seed: u64) -> GenerationRequest {
        GenerationRequest {
            chords: Some(vec!["C".into(), "G".into(), "Am".into(), "F".into()]),
            seed,
            ..GenerationRequest::default()
        }
    }

    #[test]
    fn test_generate_is_deterministic() {
        let generator = Generator::new();
        let a = generator.generate(&request(42)).unwrap();
        let b = generator.generate(&request(42)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.melody().notes.len(), 8);
    }

    #[test]
    fn test_notes_follow_rhythm() {
        let request = GenerationRequest {
            rhythm: RhythmSource::Explicit(vec![0.25, 0.125, 0.125]),
            note_count: 6,
            ..request(3)
        };
        let phrase = Generator::new().generate(&request).unwrap();
        let notes = &phrase.melody().notes;
        let starts: Vec<u32> = notes.iter().map(|n| n.start).collect();
        assert_eq!(starts, vec![0, 480, 720, 960, 1440, 1680]);
        assert!(notes.iter().all(|n| (1..=127).contains(&n.velocity)));
        // Strong beats get the accent.
        assert!(notes[0].velocity >= 64);
    }

    #[test]
    fn test_generated_progression_covers_phrase() {
        let request = GenerationRequest {
            note_count: 16,
            seed: 5,
            ..GenerationRequest::default()
        };
        let generator =
            Generator::new().with_progression_model(Arc::new(ChordMarkovModel::default_model()));
        let phrase = generator.generate(&request).unwrap();
        assert_eq!(phrase.chords.first().map(|s| s.start), Some(0));
        assert!(phrase.chords.windows(2).all(|w| w[0].end() == w[1].start));
        let last = phrase.melody().notes.last().unwrap();
        assert!(phrase.chords.last().unwrap().end() >= last.start + last.duration);
    }

    #[test]
    fn test_hierarchical_with_models() {
        let request = GenerationRequest {
            note_count: 24,
            hierarchical: true,
            humanize: true,
            ..request(11)
        };
        let generator =
            Generator::new().with_sequence_model(Arc::new(DegreeMarkovModel::default_model()));
        let phrase = generator.generate(&request).unwrap();
        assert_eq!(phrase.melody().notes.len(), 24);
        let last = phrase.melody().notes.last().unwrap();
        assert_eq!(last.pitch % 12, 0);
    }

    #[test]
    fn test_refinement_keeps_cadence() {
        let request = GenerationRequest {
            note_count: 16,
            harmony_lines: 1,
            refine: Some(RefineConfig::default()),
            ..request(9)
        };
        let phrase = Generator::new().generate(&request).unwrap();
        let report = phrase.report.refinement.clone().unwrap();
        assert!(report.final_distance <= report.initial_distance);
        assert_eq!(phrase.melody().notes.last().unwrap().pitch % 12, 0);
    }

    #[test]
    fn test_shared_cache_does_not_change_output() {
        let generator = Generator::new();
        let mut cache = CandidatePoolCache::new();
        let first = generator.generate_with_cache(&request(8), &mut cache).unwrap();
        let second = generator.generate_with_cache(&request(8), &mut cache).unwrap();
        assert_eq!(first.voices, second.voices);
        assert!(second.report.cache_hits > 0);
        assert_eq!(second.report.cache_misses, 0);
    }
}
