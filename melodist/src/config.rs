// Caller-facing generation request.
//
// `GenerationRequest` is everything one phrase needs: key, harmony, rhythm,
// register, voices, switches and the tuned weighting constants. It is plain
// serde data with a `Default` for every field, so a JSON request only names
// what it changes.
//
// `validate()` resolves the textual parts (key, chord symbols, style) and
// checks every numeric bound up front. Every caller-input error surfaces here,
// before the first note is drawn; the generator only ever sees a
// `ResolvedRequest`.
//
// See also: `generator.rs` which runs the pipeline from a resolved request,
// `weighting.rs` for `WeightParams`, `refine.rs` for `RefineConfig`.

use crate::chord::Chord;
use crate::error::{GenError, Result};
use crate::mode::Key;
use crate::pitch::{MAX_OCTAVE, OctaveRange};
use crate::planner::{Contour, plan_octave_range};
use crate::refine::RefineConfig;
use crate::rhythm::{Meter, RhythmEngine, RhythmSource, RhythmTransitions};
use crate::selector::SelectorOptions;
use crate::style::{StyleSpec, StyleVector};
use crate::timeline::{Cadence, ChordPacing};
use crate::weighting::WeightParams;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Most dependent harmony lines a request may ask for.
pub const MAX_HARMONY_LINES: i64 = 8;

/// Longest phrase a single request may ask for.
pub const MAX_NOTE_COUNT: usize = 65_536;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationRequest {
    /// Key name, e.g. `"C"`, `"Am"`, `"D dorian"`.
    pub key: String,
    /// Chord symbols. When absent the progression is generated.
    pub chords: Option<Vec<String>>,
    pub chord_pacing: ChordPacing,
    pub note_count: usize,
    pub base_octave: i64,
    /// Width of the melody's register in octaves.
    pub pitch_span: i64,
    pub meter_numerator: i64,
    pub meter_denominator: i64,
    pub rhythm: RhythmSource,
    /// Transition table for `RhythmSource::Markov`; built-in table if absent.
    pub rhythm_transitions: Option<RhythmTransitions>,
    pub harmony_lines: i64,
    pub counterpoint: bool,
    pub plagal_cadence: bool,
    /// Reharmonize the final onset to the tonic triad. Ignored when
    /// `plagal_cadence` is set.
    pub resolve_to_tonic: bool,
    pub allow_tritone: bool,
    pub allow_unison: bool,
    pub seed: u64,
    pub style: Option<StyleSpec>,
    pub motif_length: usize,
    pub octave_shift_chance: f64,
    pub contour: Contour,
    /// Guide the melody with bar anchors and motif infill.
    pub hierarchical: bool,
    /// Jitter velocities by up to ±10.
    pub humanize: bool,
    pub weights: WeightParams,
    /// Run the corpus-distance refinement pass with these settings.
    pub refine: Option<RefineConfig>,
    /// Generate dependent voices on the rayon pool.
    pub parallel_voices: bool,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        GenerationRequest {
            key: "C".into(),
            chords: None,
            chord_pacing: ChordPacing::PerBar,
            note_count: 8,
            base_octave: 4,
            pitch_span: 1,
            meter_numerator: 4,
            meter_denominator: 4,
            rhythm: RhythmSource::Library,
            rhythm_transitions: None,
            harmony_lines: 0,
            counterpoint: false,
            plagal_cadence: false,
            resolve_to_tonic: true,
            allow_tritone: false,
            allow_unison: false,
            seed: 0,
            style: None,
            motif_length: 4,
            octave_shift_chance: 0.1,
            contour: Contour::Arch,
            hierarchical: false,
            humanize: false,
            weights: WeightParams::default(),
            refine: None,
            parallel_voices: false,
        }
    }
}

/// A request with every symbol parsed and every bound checked.
#[derive(Debug, Clone)]
pub struct ResolvedRequest {
    pub key: Key,
    pub chords: Option<Vec<Chord>>,
    pub meter: Meter,
    pub style: Option<StyleVector>,
    pub cadence: Cadence,
    pub octave_range: OctaveRange,
    pub base_octave: u8,
    pub pitch_span: u8,
    pub harmony_lines: usize,
    pub rhythm: RhythmEngine,
    pub options: SelectorOptions,
}

impl GenerationRequest {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn cadence(&self) -> Cadence {
        if self.plagal_cadence {
            Cadence::Plagal
        } else if self.resolve_to_tonic {
            Cadence::Tonic
        } else {
            Cadence::FinalChord
        }
    }

    /// Parse and bound-check everything the pipeline reads.
    pub fn validate(&self) -> Result<ResolvedRequest> {
        let key = Key::parse(&self.key)?;
        let chords = match &self.chords {
            Some(symbols) if symbols.is_empty() => {
                return Err(GenError::config("chord list is empty"));
            }
            Some(symbols) => Some(
                symbols
                    .iter()
                    .map(|s| Chord::parse(s))
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };
        let meter = Meter::new(self.meter_numerator, self.meter_denominator)?;

        if self.note_count == 0 || self.note_count > MAX_NOTE_COUNT {
            return Err(GenError::config(format!(
                "note count {} must be between 1 and {MAX_NOTE_COUNT}",
                self.note_count
            )));
        }
        let base_octave = octave_field("base octave", self.base_octave)?;
        let pitch_span = octave_field("pitch span", self.pitch_span)?;
        let octave_range = plan_octave_range(base_octave, pitch_span)?;

        if self.harmony_lines < 0 {
            return Err(GenError::config(format!(
                "harmony line count {} is negative",
                self.harmony_lines
            )));
        }
        if self.harmony_lines > MAX_HARMONY_LINES {
            return Err(GenError::config(format!(
                "harmony line count {} is above {MAX_HARMONY_LINES}",
                self.harmony_lines
            )));
        }
        if self.motif_length == 0 {
            return Err(GenError::config("motif length must be positive"));
        }
        if !(0.0..=1.0).contains(&self.octave_shift_chance) {
            return Err(GenError::config(format!(
                "octave shift chance {} is outside [0, 1]",
                self.octave_shift_chance
            )));
        }

        let style = self.style.as_ref().map(StyleSpec::resolve).transpose()?;
        self.weights.validate()?;
        if let Some(refine) = &self.refine {
            refine.validate()?;
        }
        let rhythm = RhythmEngine::new(
            self.rhythm.clone(),
            self.rhythm_transitions.clone().unwrap_or_default(),
        );
        rhythm.validate()?;

        let cadence = self.cadence();
        Ok(ResolvedRequest {
            key,
            chords,
            meter,
            style,
            cadence,
            octave_range,
            base_octave,
            pitch_span,
            harmony_lines: self.harmony_lines as usize,
            rhythm,
            options: SelectorOptions {
                motif_length: self.motif_length,
                octave_shift_chance: self.octave_shift_chance,
                allow_tritone: self.allow_tritone,
                allow_unison: self.allow_unison,
                cadence,
                dependent_voices: self.harmony_lines as usize + usize::from(self.counterpoint),
            },
        })
    }
}

fn octave_field(name: &str, value: i64) -> Result<u8> {
    if !(0..=MAX_OCTAVE as i64).contains(&value) {
        return Err(GenError::config(format!(
            "{name} {value} is outside 0..={MAX_OCTAVE}"
        )));
    }
    Ok(value as u8)
}
