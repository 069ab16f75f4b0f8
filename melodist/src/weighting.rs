// Weighting engine: per-candidate weights for one step of one voice.
//
// Every bias is a term in log-weight space, so each is a soft preference and
// the terms compose by addition:
//
// Layer 1 (melodic shape): baseline transition weight by interval size,
//   similarity to the previous interval, tension matching, leap
//   compensation, contour direction.
// Layer 2 (harmony): chord-tone multiplier on strong beats.
// Layer 3 (optional capabilities): sequence-model scores per scale degree,
//   style-vector offset, guide pitch from the hierarchical plan.
// Layer 4 (counterpoint): parallel fifths/octaves against the reference
//   voice are halved; tritone leaps are removed when disallowed unless every
//   candidate is one.
// Layer 5 (ensemble, dependent voices only): interval target below the
//   reference, consonance and contrary motion for the counterpoint line,
//   crossing, unison and spacing penalties.
//
// The log weights are exponentiated relative to their maximum. If no
// candidate has a finite log weight the result falls back to uniform, which
// is the guarantee that a step never stalls on its weights.

use crate::chord::PitchClassSet;
use crate::error::{GenError, Result};
use crate::mode::Scale;
use crate::pitch::interval;
use crate::style::StyleVector;
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunable constants of the weighting engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightParams {
    /// Baseline weight by |interval| in semitones, 0 first.
    pub transition_weights: Vec<f64>,
    /// Baseline weight for intervals past the end of the table.
    pub transition_default: f64,
    /// Bonus by | |interval| - |previous interval| |.
    pub similarity_weights: Vec<f64>,
    pub similarity_default: f64,
    pub chord_tone_multiplier: f64,
    pub tension_strength: f64,
    /// Multiplier for moving against a pending leap.
    pub leap_compensation: f64,
    /// Multiplier for moving further in a pending leap's direction.
    pub leap_continuation_penalty: f64,
    /// Multiplier for a second leap in a row.
    pub repeated_leap_penalty: f64,
    /// Multiplier for moving in the phrase's contour direction.
    pub contour_bias: f64,
    pub model_strength: f64,
    pub style_strength: f64,
    /// Log-space pull toward the hierarchical guide, per octave of distance.
    pub guide_strength: f64,
    pub parallel_penalty: f64,
    pub ensemble: EnsembleParams,
}

impl Default for WeightParams {
    fn default() -> Self {
        WeightParams {
            transition_weights: vec![1.2, 1.0, 0.8, 0.6, 0.4, 0.3, 0.1],
            transition_default: 0.2,
            similarity_weights: vec![1.0, 0.8, 0.6, 0.4],
            similarity_default: 0.2,
            chord_tone_multiplier: 1.5,
            tension_strength: 1.0,
            leap_compensation: 2.0,
            leap_continuation_penalty: 0.25,
            repeated_leap_penalty: 0.5,
            contour_bias: 1.2,
            model_strength: 1.0,
            style_strength: 1.0,
            guide_strength: 0.5,
            parallel_penalty: 0.5,
            ensemble: EnsembleParams::default(),
        }
    }
}

/// Multipliers used only by harmony and counterpoint voices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleParams {
    pub target_strength: f64,
    pub consonance_bonus: f64,
    pub dissonance_penalty: f64,
    pub contrary_bonus: f64,
    pub crossing_penalty: f64,
    pub unison_penalty: f64,
    pub spacing_penalty: f64,
}

impl Default for EnsembleParams {
    fn default() -> Self {
        EnsembleParams {
            target_strength: 1.0,
            consonance_bonus: 2.0,
            dissonance_penalty: 0.5,
            contrary_bonus: 1.5,
            crossing_penalty: 0.05,
            unison_penalty: 0.1,
            spacing_penalty: 0.2,
        }
    }
}

impl WeightParams {
    pub fn from_json(json: &str) -> Result<Self> {
        let params: WeightParams = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Every weight must be finite and non-negative. Zero is allowed: it
    /// removes the candidates it applies to.
    pub fn validate(&self) -> Result<()> {
        let e = &self.ensemble;
        let scalars = [
            ("transition_default", self.transition_default),
            ("similarity_default", self.similarity_default),
            ("chord_tone_multiplier", self.chord_tone_multiplier),
            ("tension_strength", self.tension_strength),
            ("leap_compensation", self.leap_compensation),
            ("leap_continuation_penalty", self.leap_continuation_penalty),
            ("repeated_leap_penalty", self.repeated_leap_penalty),
            ("contour_bias", self.contour_bias),
            ("model_strength", self.model_strength),
            ("style_strength", self.style_strength),
            ("guide_strength", self.guide_strength),
            ("parallel_penalty", self.parallel_penalty),
            ("ensemble.target_strength", e.target_strength),
            ("ensemble.consonance_bonus", e.consonance_bonus),
            ("ensemble.dissonance_penalty", e.dissonance_penalty),
            ("ensemble.contrary_bonus", e.contrary_bonus),
            ("ensemble.crossing_penalty", e.crossing_penalty),
            ("ensemble.unison_penalty", e.unison_penalty),
            ("ensemble.spacing_penalty", e.spacing_penalty),
        ];
        for (name, value) in scalars {
            check_weight(name, value)?;
        }
        for (i, &w) in self.transition_weights.iter().enumerate() {
            check_weight(&format!("transition_weights[{i}]"), w)?;
        }
        for (i, &w) in self.similarity_weights.iter().enumerate() {
            check_weight(&format!("similarity_weights[{i}]"), w)?;
        }
        Ok(())
    }

    fn transition(&self, size: u16) -> f64 {
        self.transition_weights
            .get(size as usize)
            .copied()
            .unwrap_or(self.transition_default)
    }

    fn similarity(&self, difference: u16) -> f64 {
        self.similarity_weights
            .get(difference as usize)
            .copied()
            .unwrap_or(self.similarity_default)
    }
}

fn check_weight(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(GenError::config(format!(
            "weight {name} = {value} must be finite and non-negative"
        )));
    }
    Ok(())
}

/// What a dependent voice is trying to do relative to the reference line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsembleGoal {
    /// Sit near `target`, a fixed diatonic interval below the reference.
    Harmony { target: u8 },
    /// Stay consonant with the reference and move against it.
    Counterpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsembleContext {
    pub goal: EnsembleGoal,
    pub reference_prev: Option<u8>,
    pub reference_now: u8,
    pub allow_unison: bool,
}

/// Everything the engine needs to know about the step being weighted.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub previous: Option<u8>,
    pub previous_interval: Option<i16>,
    /// Direction of an uncompensated leap (-1, 0, +1).
    pub leap_direction: i8,
    pub consecutive_leaps: u32,
    pub strong: bool,
    pub chord_tones: PitchClassSet,
    pub key_scale: &'a Scale,
    /// Target tension in [0, 1].
    pub tension: f64,
    /// Preferred direction of motion (-1, 0, +1).
    pub contour_direction: i8,
    pub guide: Option<u8>,
    pub allow_tritone: bool,
    /// The voice's own recent pitches, oldest first.
    pub recent: &'a [u8],
    pub ensemble: Option<EnsembleContext>,
}

/// Non-negative weights, one per candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Weighted {
    pub weights: Vec<f64>,
    /// Set when every candidate was ruled out and the uniform fallback applied.
    pub uniform: bool,
}

/// Weight every candidate for one step.
///
/// `model_scores` holds one log-space bias per degree of the key scale; an
/// empty slice means no model.
pub fn weights(
    candidates: &[u8],
    ctx: &StepContext,
    params: &WeightParams,
    style: Option<&StyleVector>,
    model_scores: &[f64],
) -> Weighted {
    let mut logs: Vec<f64> = candidates
        .iter()
        .map(|&c| log_weight(c, ctx, params, style, model_scores))
        .collect();

    if !ctx.allow_tritone
        && let Some(prev) = ctx.previous
    {
        let is_tritone = |c: u8| interval::is_tritone(interval::semitones(prev, c));
        if !candidates.iter().all(|&c| is_tritone(c)) {
            for (w, &c) in logs.iter_mut().zip(candidates) {
                if is_tritone(c) {
                    *w = f64::NEG_INFINITY;
                }
            }
        }
    }

    normalize(logs)
}

/// Exponentiate log weights relative to their maximum, or go uniform.
pub fn normalize(logs: Vec<f64>) -> Weighted {
    let max = logs
        .iter()
        .copied()
        .filter(|w| w.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        if !logs.is_empty() {
            warn!(
                "all {} candidates ruled out by weighting; falling back to uniform",
                logs.len()
            );
        }
        return Weighted {
            weights: vec![1.0; logs.len()],
            uniform: true,
        };
    }
    Weighted {
        weights: logs
            .into_iter()
            .map(|w| if w.is_finite() { (w - max).exp() } else { 0.0 })
            .collect(),
        uniform: false,
    }
}

fn ln(multiplier: f64) -> f64 {
    // ln(0) is -inf, which removes the candidate.
    multiplier.ln()
}

fn log_weight(
    candidate: u8,
    ctx: &StepContext,
    params: &WeightParams,
    style: Option<&StyleVector>,
    model_scores: &[f64],
) -> f64 {
    let mut w = 0.0;

    if let Some(prev) = ctx.previous {
        let iv = interval::semitones(prev, candidate);
        let size = iv.unsigned_abs();
        let dir = iv.signum() as i8;

        w += ln(params.transition(size));

        if let Some(prev_iv) = ctx.previous_interval {
            w += ln(params.similarity(size.abs_diff(prev_iv.unsigned_abs())));
        }

        let off_target = (interval::tension(iv) - ctx.tension).abs();
        w -= params.tension_strength * (1.0 + off_target).ln();

        if ctx.leap_direction != 0 && dir != 0 {
            if dir == -ctx.leap_direction {
                w += ln(params.leap_compensation);
            } else {
                w += ln(params.leap_continuation_penalty);
            }
        }
        if ctx.consecutive_leaps > 0 && interval::is_leap(iv) {
            w += ln(params.repeated_leap_penalty);
        }
        if ctx.contour_direction != 0 && dir == ctx.contour_direction {
            w += ln(params.contour_bias);
        }
    }

    if ctx.strong && ctx.chord_tones.contains(candidate) {
        w += ln(params.chord_tone_multiplier);
    }

    if let Some(guide) = ctx.guide {
        let distance = (candidate as f64 - guide as f64).abs() / 12.0;
        w -= params.guide_strength * distance;
    }

    if let Some(score) = ctx
        .key_scale
        .degree_of(candidate)
        .and_then(|d| model_scores.get(d))
        .filter(|s| s.is_finite())
    {
        w += params.model_strength * score;
    }

    if let Some(style) = style {
        let in_key = ctx.key_scale.contains(candidate);
        w += params.style_strength * style.offset(candidate, ctx.previous, ctx.recent, in_key);
    }

    if let Some(ens) = &ctx.ensemble {
        w += ensemble_term(candidate, ctx.previous, ens, params);
    }

    w
}

fn ensemble_term(
    candidate: u8,
    previous: Option<u8>,
    ens: &EnsembleContext,
    params: &WeightParams,
) -> f64 {
    let p = &params.ensemble;
    let mut w = 0.0;
    let against = interval::semitones(candidate, ens.reference_now);

    match ens.goal {
        EnsembleGoal::Harmony { target } => {
            let distance = (candidate as f64 - target as f64).abs();
            w -= p.target_strength * (1.0 + distance).ln();
        }
        EnsembleGoal::Counterpoint => {
            if against != 0 && interval::is_consonant(against) {
                w += ln(p.consonance_bonus);
            } else if interval::is_dissonant(against) {
                w += ln(p.dissonance_penalty);
            }
            if let (Some(prev), Some(ref_prev)) = (previous, ens.reference_prev) {
                let own = interval::direction(prev, candidate);
                let theirs = interval::direction(ref_prev, ens.reference_now);
                if own != 0 && own == -theirs {
                    w += ln(p.contrary_bonus);
                }
            }
        }
    }

    if against < 0 {
        w += ln(p.crossing_penalty);
    } else if against == 0 && !ens.allow_unison {
        w += ln(p.unison_penalty);
    } else if against > 12 {
        w += ln(p.spacing_penalty);
    }

    if let (Some(prev), Some(ref_prev)) = (previous, ens.reference_prev)
        && interval::is_parallel_perfect(ref_prev, prev, ens.reference_now, candidate)
    {
        w += ln(params.parallel_penalty);
    }

    w
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::{Key, Mode};

    fn c_major() -> Scale {
        Scale::new(0, Mode::Major)
    }

    fn context<'a>(scale: &'a Scale, previous: Option<u8>) -> StepContext<'a> {
        StepContext {
            previous,
            previous_interval: None,
            leap_direction: 0,
            consecutive_leaps: 0,
            strong: false,
            chord_tones: PitchClassSet::from_pitch_classes([0, 4, 7]),
            key_scale: scale,
            tension: 0.3,
            contour_direction: 0,
            guide: None,
            allow_tritone: true,
            recent: &[],
            ensemble: None,
        }
    }

    fn weight_of(result: &Weighted, candidates: &[u8], pitch: u8) -> f64 {
        let i = candidates.iter().position(|&c| c == pitch).unwrap();
        result.weights[i]
    }

    #[test]
    fn test_stepwise_motion_preferred() {
        let scale = c_major();
        let ctx = context(&scale, Some(64));
        let candidates = [60, 62, 64, 65, 67, 72, 76];
        let result = weights(&candidates, &ctx, &WeightParams::default(), None, &[]);
        assert!(!result.uniform);
        assert!(weight_of(&result, &candidates, 65) > weight_of(&result, &candidates, 72));
        assert!(weight_of(&result, &candidates, 62) > weight_of(&result, &candidates, 76));
        assert!(result.weights.iter().all(|w| *w >= 0.0 && w.is_finite()));
    }

    #[test]
    fn test_chord_tone_bonus_only_on_strong_beats() {
        let scale = c_major();
        let mut ctx = context(&scale, Some(62));
        let candidates = [60, 64];
        let weak = weights(&candidates, &ctx, &WeightParams::default(), None, &[]);
        ctx.strong = true;
        let strong = weights(&candidates, &ctx, &WeightParams::default(), None, &[]);
        // 60 and 64 are both chord tones a step away, so only the bonus moves
        // them; relative order is unchanged but both gain equally.
        assert!((weak.weights[0] / weak.weights[1] - strong.weights[0] / strong.weights[1]).abs() < 1e-9);

        let candidates = [64, 65];
        let mut ctx = context(&scale, Some(67));
        ctx.strong = true;
        let strong = weights(&candidates, &ctx, &WeightParams::default(), None, &[]);
        ctx.strong = false;
        let weak = weights(&candidates, &ctx, &WeightParams::default(), None, &[]);
        let ratio_strong = strong.weights[0] / strong.weights[1];
        let ratio_weak = weak.weights[0] / weak.weights[1];
        assert!((ratio_strong / ratio_weak - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_leap_compensation_favours_opposite_direction() {
        let scale = c_major();
        let mut ctx = context(&scale, Some(72));
        ctx.previous_interval = Some(9);
        ctx.leap_direction = 1;
        ctx.consecutive_leaps = 1;
        let candidates = [71, 74];
        let result = weights(&candidates, &ctx, &WeightParams::default(), None, &[]);
        assert!(result.weights[0] > result.weights[1] * 4.0);
    }

    #[test]
    fn test_tritone_removed_unless_only_option() {
        let scale = c_major();
        let mut ctx = context(&scale, Some(65));
        ctx.allow_tritone = false;
        let candidates = [64, 71];
        let result = weights(&candidates, &ctx, &WeightParams::default(), None, &[]);
        assert_eq!(result.weights[1], 0.0);
        assert!(result.weights[0] > 0.0);

        let only = [71];
        let result = weights(&only, &ctx, &WeightParams::default(), None, &[]);
        assert!(result.weights[0] > 0.0);
        assert!(!result.uniform);
    }

    #[test]
    fn test_zero_weights_fall_back_to_uniform() {
        let scale = c_major();
        let ctx = context(&scale, Some(60));
        let params = WeightParams {
            transition_weights: vec![0.0; 12],
            transition_default: 0.0,
            ..WeightParams::default()
        };
        let candidates = [60, 62, 64, 65, 67];
        let result = weights(&candidates, &ctx, &params, None, &[]);
        assert!(result.uniform);
        assert_eq!(result.weights, vec![1.0; 5]);
    }

    #[test]
    fn test_model_scores_bias_degrees() {
        let scale = c_major();
        let ctx = context(&scale, Some(64));
        let candidates = [62, 65];
        // Favour degree 3 (F), disfavour degree 1 (D).
        let scores = [0.0, -2.0, 0.0, 2.0, 0.0, 0.0, 0.0];
        let with = weights(&candidates, &ctx, &WeightParams::default(), None, &scores);
        let without = weights(&candidates, &ctx, &WeightParams::default(), None, &[]);
        assert!(with.weights[1] / with.weights[0] > without.weights[1] / without.weights[0]);
    }

    #[test]
    fn test_style_offset_is_applied() {
        let scale = c_major();
        let ctx = context(&scale, Some(60));
        let candidates = [60, 62];
        let pop = StyleVector::preset("pop").unwrap();
        let plain = weights(&candidates, &ctx, &WeightParams::default(), None, &[]);
        let styled = weights(&candidates, &ctx, &WeightParams::default(), Some(&pop), &[]);
        assert!(styled.weights[0] / styled.weights[1] > plain.weights[0] / plain.weights[1]);
    }

    #[test]
    fn test_harmony_target_and_crossing() {
        let scale = Key::new(0, Mode::Major).scale();
        let mut ctx = context(&scale, Some(64));
        ctx.ensemble = Some(EnsembleContext {
            goal: EnsembleGoal::Harmony { target: 64 },
            reference_prev: Some(69),
            reference_now: 67,
            allow_unison: false,
        });
        let candidates = [60, 64, 67, 71];
        let result = weights(&candidates, &ctx, &WeightParams::default(), None, &[]);
        let best = result
            .weights
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| candidates[i]);
        assert_eq!(best, Some(64));
        // Above the reference is heavily penalized.
        assert!(weight_of(&result, &candidates, 71) < weight_of(&result, &candidates, 60));
    }

    #[test]
    fn test_parallel_fifths_penalized() {
        let scale = c_major();
        let mut ctx = context(&scale, Some(60));
        ctx.ensemble = Some(EnsembleContext {
            goal: EnsembleGoal::Counterpoint,
            reference_prev: Some(67),
            reference_now: 69,
            allow_unison: false,
        });
        // 62 makes a fifth below 69 after a fifth below 67, moving the same way.
        let candidates = [62, 65];
        let params = WeightParams::default();
        let result = weights(&candidates, &ctx, &params, None, &[]);
        let no_parallel = WeightParams {
            parallel_penalty: 1.0,
            ..WeightParams::default()
        };
        let baseline = weights(&candidates, &ctx, &no_parallel, None, &[]);
        let ratio = result.weights[0] / result.weights[1];
        let base_ratio = baseline.weights[0] / baseline.weights[1];
        assert!((ratio / base_ratio - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_params_json_defaults_and_validation() {
        let params = WeightParams::from_json(r#"{"chord_tone_multiplier": 2.0}"#).unwrap();
        assert_eq!(params.chord_tone_multiplier, 2.0);
        assert_eq!(params.transition_weights.len(), 7);
        assert!(matches!(
            WeightParams::from_json(r#"{"contour_bias": -1.0}"#),
            Err(GenError::Configuration(_))
        ));
    }

    #[test]
    fn test_empty_candidates() {
        let result = normalize(Vec::new());
        assert!(result.weights.is_empty());
        assert!(result.uniform);
    }
}
