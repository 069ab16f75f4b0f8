// Phrase planning: the large-scale shape decided before any note is chosen.
//
// A `PhrasePlan` carries one tension value per note (bounded in [0, 1]) and
// the octave range the melody lives in. The tension curve follows a selectable
// `Contour`; the default arch rises through the first half and falls through
// the second.
//
// The hierarchical path adds guide pitches for long phrases:
// - `plan_skeleton` places one anchor per bar, on the first onset in the bar,
//   choosing a chord tone whose register follows the tension curve;
// - `infill_skeleton` fills the gaps between anchors by restating a short
//   scale-degree motif, transposed along the line joining the two anchors.
// Guides are soft: the weighting engine pulls candidates toward them but any
// legal pitch may still be chosen.
//
// Everything here is a pure function of its inputs and the rng state.

use crate::error::{GenError, Result};
use crate::mode::Scale;
use crate::pitch::{MAX_OCTAVE, OctaveRange};
use crate::timeline::Timeline;
use melodist_prng::PhraseRng;
use serde::{Deserialize, Serialize};

/// Shape of the tension curve over the phrase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Contour {
    /// Rise through the first half, fall through the second.
    #[default]
    Arch,
    Rising,
    Falling,
    /// Two arches.
    Wave,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhrasePlan {
    pub tension: Vec<f64>,
    pub octave_range: OctaveRange,
}

impl PhrasePlan {
    /// Tension at step `index`; the last value is held past the end.
    pub fn tension_at(&self, index: usize) -> f64 {
        self.tension
            .get(index)
            .or_else(|| self.tension.last())
            .copied()
            .unwrap_or(0.5)
    }
}

/// Build a full plan: tension curve plus octave range.
pub fn plan_phrase(
    note_count: usize,
    base_octave: u8,
    pitch_span: u8,
    contour: Contour,
) -> Result<PhrasePlan> {
    if note_count == 0 {
        return Err(GenError::config("note count must be positive"));
    }
    Ok(PhrasePlan {
        tension: plan_tension_curve(note_count, contour),
        octave_range: plan_octave_range(base_octave, pitch_span)?,
    })
}

/// One tension value per note, each in [0, 1].
pub fn plan_tension_curve(note_count: usize, contour: Contour) -> Vec<f64> {
    let position = |i: usize| {
        if note_count > 1 {
            i as f64 / (note_count - 1) as f64
        } else {
            0.0
        }
    };
    let curve: Vec<f64> = match contour {
        Contour::Arch => {
            let up = note_count / 2;
            let down = note_count - up;
            let rise = (0..up).map(|i| i as f64 / up.max(1) as f64);
            let fall = (0..down).map(|i| 1.0 - i as f64 / down.max(1) as f64);
            rise.chain(fall).collect()
        }
        Contour::Rising => (0..note_count).map(position).collect(),
        Contour::Falling => (0..note_count).map(|i| 1.0 - position(i)).collect(),
        Contour::Wave => (0..note_count)
            .map(|i| 0.5 * (1.0 - (4.0 * std::f64::consts::PI * position(i)).cos()))
            .collect(),
        Contour::Flat => vec![0.5; note_count],
    };
    curve.into_iter().map(|t| t.clamp(0.0, 1.0)).collect()
}

/// `(base, base + span)`, shifted down to end at the top octave if needed.
pub fn plan_octave_range(base_octave: u8, pitch_span: u8) -> Result<OctaveRange> {
    if base_octave > MAX_OCTAVE {
        return Err(GenError::config(format!(
            "base octave {base_octave} is above {MAX_OCTAVE}"
        )));
    }
    if pitch_span == 0 || pitch_span > MAX_OCTAVE {
        return Err(GenError::config(format!(
            "pitch span {pitch_span} must be between 1 and {MAX_OCTAVE}"
        )));
    }
    let max = (base_octave + pitch_span).min(MAX_OCTAVE);
    OctaveRange::new(max - pitch_span, max)
}

/// A structural pitch pinned to one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub step: usize,
    pub pitch: u8,
}

/// One anchor per bar that has an onset, each a chord tone of the chord at
/// that onset, placed in the register the tension curve asks for.
pub fn plan_skeleton(
    timeline: &Timeline,
    plan: &PhrasePlan,
    rng: &mut PhraseRng,
) -> Vec<Anchor> {
    let bar = timeline.meter().bar_ticks();
    let range = plan.octave_range;
    let (low, high) = (range.low_pitch(), range.high_pitch());
    // Anchors sit in the lower three quarters of the range so infill has
    // room above them.
    let span = (high - low) as f64 * 0.75;

    let mut anchors = Vec::new();
    let mut last_bar = None;
    for step in timeline.steps() {
        let bar_index = step.start / bar;
        if last_bar == Some(bar_index) {
            continue;
        }
        last_bar = Some(bar_index);

        let tones = timeline.chord_at(step.index).tones();
        let target = low as f64 + span * plan.tension_at(step.index);
        let mut nearest: Vec<u8> = (low..=high).filter(|&p| tones.contains(p)).collect();
        nearest.sort_by(|a, b| {
            (*a as f64 - target)
                .abs()
                .total_cmp(&(*b as f64 - target).abs())
                .then(a.cmp(b))
        });
        nearest.truncate(2);
        if let Some(&pitch) = rng.choose(&nearest) {
            anchors.push(Anchor {
                step: step.index,
                pitch,
            });
        }
    }
    anchors
}

/// Built-in infill motifs, as scale-degree offsets from the motif's start.
pub const INFILL_MOTIFS: &[&[i32]] = &[&[0, 1, 2, 1], &[0, -1, 0, 1], &[0, 2, 1, 0], &[0, 1, 0, -1]];

/// Expand anchors into one guide pitch per step.
///
/// Between two anchors the motif repeats, each statement transposed onto the
/// straight scale-degree line from the first anchor to the second. After the
/// last anchor the motif repeats at that anchor's level. Pitches are folded
/// into `range` by octaves.
pub fn infill_skeleton(
    anchors: &[Anchor],
    motif: &[i32],
    note_count: usize,
    scale: &Scale,
    range: OctaveRange,
) -> Vec<u8> {
    let (low, high) = (range.low_pitch(), range.high_pitch());
    let fallback = scale.snap(((low as u16 + high as u16) / 2) as u8);
    let mut guides = vec![fallback; note_count];
    let motif: &[i32] = if motif.is_empty() { &[0] } else { motif };

    let Some(first) = anchors.first() else {
        return guides;
    };
    // Steps before the first anchor hold its pitch.
    for guide in guides.iter_mut().take(first.step) {
        *guide = first.pitch;
    }

    for (i, anchor) in anchors.iter().enumerate() {
        let start = scale.absolute_degree(scale.snap(anchor.pitch)).unwrap_or(0);
        let (end_step, end_degree) = match anchors.get(i + 1) {
            Some(next) => (
                next.step,
                scale.absolute_degree(scale.snap(next.pitch)).unwrap_or(start),
            ),
            None => (note_count, start),
        };
        if anchor.step >= note_count {
            break;
        }
        guides[anchor.step] = anchor.pitch;
        let gap = end_step.saturating_sub(anchor.step);
        for k in 1..gap {
            let step = anchor.step + k;
            if step >= note_count {
                break;
            }
            let drift = ((end_degree - start) as f64 * k as f64 / gap as f64).round() as i32;
            let degree = start + drift + motif[k % motif.len()];
            let pitch = scale.pitch_at(degree).unwrap_or(anchor.pitch);
            guides[step] = fold_into(pitch, low, high);
        }
    }
    guides
}

/// Move `pitch` by octaves until it lies in `[low, high]` (when possible).
pub fn fold_into(pitch: u8, low: u8, high: u8) -> u8 {
    let mut p = pitch as i16;
    while p < low as i16 && p + 12 <= 127 {
        p += 12;
    }
    while p > high as i16 && p - 12 >= 0 {
        p -= 12;
    }
    p as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::Chord;
    use crate::mode::Key;
    use crate::rhythm::{Meter, lay_out};
    use crate::timeline::ChordPacing;

    #[test]
    fn test_arch_tension_curve() {
        let curve = plan_tension_curve(8, Contour::Arch);
        assert_eq!(curve, vec![0.0, 0.25, 0.5, 0.75, 1.0, 0.75, 0.5, 0.25]);
    }

    #[test]
    fn test_all_contours_are_bounded() {
        for contour in [Contour::Arch, Contour::Rising, Contour::Falling, Contour::Wave, Contour::Flat] {
            for n in [1, 2, 7, 33] {
                let curve = plan_tension_curve(n, contour);
                assert_eq!(curve.len(), n);
                assert!(curve.iter().all(|t| (0.0..=1.0).contains(t)), "{contour:?} {n}");
            }
        }
        let rising = plan_tension_curve(5, Contour::Rising);
        assert_eq!(rising.first(), Some(&0.0));
        assert_eq!(rising.last(), Some(&1.0));
    }

    #[test]
    fn test_octave_range_planning() {
        assert_eq!(plan_octave_range(4, 1).unwrap(), OctaveRange { min: 4, max: 5 });
        assert_eq!(plan_octave_range(8, 2).unwrap(), OctaveRange { min: 6, max: 8 });
        assert!(matches!(plan_octave_range(9, 1), Err(GenError::Configuration(_))));
        assert!(plan_octave_range(4, 0).is_err());
    }

    #[test]
    fn test_plan_phrase_rejects_zero_notes() {
        assert!(plan_phrase(0, 4, 1, Contour::Arch).is_err());
        let plan = plan_phrase(3, 4, 1, Contour::Flat).unwrap();
        assert_eq!(plan.tension_at(10), 0.5);
    }

    fn four_bar_timeline() -> Timeline {
        let meter = Meter::default();
        let rhythm = lay_out(&[480; 16], &meter);
        let chords: Vec<Chord> = ["C", "F", "G", "C"]
            .iter()
            .map(|s| Chord::parse(s).unwrap())
            .collect();
        Timeline::from_progression(&rhythm, meter, &chords, ChordPacing::PerBar).unwrap()
    }

    #[test]
    fn test_skeleton_has_one_chord_tone_anchor_per_bar() {
        let timeline = four_bar_timeline();
        let plan = plan_phrase(16, 4, 1, Contour::Arch).unwrap();
        let mut rng = PhraseRng::new(6);
        let anchors = plan_skeleton(&timeline, &plan, &mut rng);
        let steps: Vec<usize> = anchors.iter().map(|a| a.step).collect();
        assert_eq!(steps, vec![0, 4, 8, 12]);
        for anchor in &anchors {
            assert!(timeline.chord_at(anchor.step).tones().contains(anchor.pitch));
            assert!(plan.octave_range.contains(anchor.pitch));
        }
    }

    #[test]
    fn test_infill_hits_anchors_and_stays_in_scale() {
        let key = Key::parse("C").unwrap();
        let scale = key.scale();
        let range = OctaveRange::new(4, 5).unwrap();
        let anchors = [
            Anchor { step: 0, pitch: 60 },
            Anchor { step: 4, pitch: 67 },
            Anchor { step: 8, pitch: 64 },
        ];
        let guides = infill_skeleton(&anchors, INFILL_MOTIFS[0], 11, &scale, range);
        assert_eq!(guides.len(), 11);
        assert_eq!(guides[0], 60);
        assert_eq!(guides[4], 67);
        assert_eq!(guides[8], 64);
        assert!(guides.iter().all(|&p| scale.contains(p) && range.contains(p)));
        // First gap climbs from C4 toward G4: D4 + motif offset 1 = E4.
        assert_eq!(guides[1], 64);
    }

    #[test]
    fn test_infill_without_anchors_is_flat() {
        let scale = Key::parse("C").unwrap().scale();
        let range = OctaveRange::new(4, 5).unwrap();
        let guides = infill_skeleton(&[], INFILL_MOTIFS[1], 4, &scale, range);
        assert!(guides.iter().all(|&p| p == guides[0]));
    }

    #[test]
    fn test_fold_into() {
        assert_eq!(fold_into(50, 60, 83), 62);
        assert_eq!(fold_into(90, 60, 83), 78);
        assert_eq!(fold_into(70, 60, 83), 70);
    }
}
