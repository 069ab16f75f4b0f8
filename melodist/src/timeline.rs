// The shared rhythm/harmony timeline every voice reads.
//
// A `Timeline` pairs the rhythm skeleton (one `Step` per note index) with a
// list of `ChordSpan`s that tile `[0, end)` with no gaps or overlaps. Each
// step records the span sounding at its onset. Voices never mutate the
// timeline; it is built once per call, cadence included, before any pitch is
// chosen.
//
// Cadence handling rewrites the tail of the harmony:
// - tonic resolution puts the key's tonic triad under the final onset;
// - plagal resolution puts IV under the final bar (from the earlier of the
//   penultimate onset and the last bar line) and I under the final onset.
// `reharmonize` splits spans at the edges of the rewritten range and merges
// neighbours that end up holding the same chord.

use crate::chord::Chord;
use crate::error::{GenError, Result};
use crate::mode::Key;
use crate::rhythm::{Meter, RhythmStep};
use serde::{Deserialize, Serialize};

/// A chord sounding over `[start, start + duration)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordSpan {
    pub chord: Chord,
    pub start: u32,
    pub duration: u32,
}

impl ChordSpan {
    pub fn end(&self) -> u32 {
        self.start + self.duration
    }
}

/// How an explicit progression is laid over the rhythm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChordPacing {
    /// Chord `i` fills bar `i`, cycling through the progression.
    #[default]
    PerBar,
    /// Chord `i mod len` sounds under note `i`.
    PerNote,
}

/// What the final notes resolve to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// Keep the caller's final chord; the last note takes its root.
    FinalChord,
    /// Reharmonize the final onset to the tonic triad.
    #[default]
    Tonic,
    /// IV over the final bar, then I on the final onset.
    Plagal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub index: usize,
    pub start: u32,
    pub duration: u32,
    pub strong: bool,
    /// Index into `Timeline::spans` of the chord at `start`.
    pub span: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeline {
    meter: Meter,
    steps: Vec<Step>,
    spans: Vec<ChordSpan>,
    end: u32,
}

impl Timeline {
    /// Pair a rhythm with chord spans. The spans must tile `[0, end)` where
    /// `end` is at least the end of the last note.
    pub fn new(rhythm: &[RhythmStep], meter: Meter, spans: Vec<ChordSpan>) -> Result<Timeline> {
        if rhythm.is_empty() {
            return Err(GenError::config("timeline needs at least one step"));
        }
        let end = spans.last().map(ChordSpan::end).unwrap_or(0);
        let notes_end = rhythm.last().map(|s| s.start + s.duration).unwrap_or(0);
        let tiled = spans.first().is_some_and(|s| s.start == 0)
            && spans.windows(2).all(|w| w[0].end() == w[1].start)
            && spans.iter().all(|s| s.duration > 0);
        if !tiled || end < notes_end {
            return Err(GenError::config(
                "chord spans must cover the whole phrase without gaps or overlaps",
            ));
        }
        let steps = rhythm
            .iter()
            .enumerate()
            .map(|(index, r)| Step {
                index,
                start: r.start,
                duration: r.duration,
                strong: r.strong,
                span: 0,
            })
            .collect();
        let mut timeline = Timeline {
            meter,
            steps,
            spans,
            end,
        };
        timeline.assign_spans();
        Ok(timeline)
    }

    /// Lay an explicit progression over `rhythm`.
    pub fn from_progression(
        rhythm: &[RhythmStep],
        meter: Meter,
        chords: &[Chord],
        pacing: ChordPacing,
    ) -> Result<Timeline> {
        if chords.is_empty() {
            return Err(GenError::config("chord progression is empty"));
        }
        let spans = match pacing {
            ChordPacing::PerBar => {
                let bar = meter.bar_ticks();
                let end = bar_aligned_end(rhythm, &meter);
                (0..end / bar)
                    .map(|i| ChordSpan {
                        chord: chords[i as usize % chords.len()].clone(),
                        start: i * bar,
                        duration: bar,
                    })
                    .collect()
            }
            ChordPacing::PerNote => rhythm
                .iter()
                .enumerate()
                .map(|(i, r)| ChordSpan {
                    chord: chords[i % chords.len()].clone(),
                    start: r.start,
                    duration: r.duration,
                })
                .collect(),
        };
        Timeline::new(rhythm, meter, spans)
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn spans(&self) -> &[ChordSpan] {
        &self.spans
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    /// The chord sounding at the onset of step `index`.
    pub fn chord_at(&self, index: usize) -> &Chord {
        &self.spans[self.steps[index].span].chord
    }

    /// The chord under the final note.
    pub fn final_chord(&self) -> &Chord {
        self.chord_at(self.steps.len() - 1)
    }

    /// Overwrite `[from, to)` with `chord`.
    pub fn reharmonize(&mut self, from: u32, to: u32, chord: Chord) {
        let to = to.min(self.end);
        if from >= to {
            return;
        }
        let mut spans: Vec<ChordSpan> = Vec::with_capacity(self.spans.len() + 2);
        let mut inserted = false;
        for span in self.spans.drain(..) {
            if span.start < from {
                let head_end = span.end().min(from);
                spans.push(ChordSpan {
                    chord: span.chord.clone(),
                    start: span.start,
                    duration: head_end - span.start,
                });
            }
            if span.end() > from && !inserted {
                spans.push(ChordSpan {
                    chord: chord.clone(),
                    start: from,
                    duration: to - from,
                });
                inserted = true;
            }
            let span_end = span.end();
            if span_end > to {
                let tail_start = span.start.max(to);
                spans.push(ChordSpan {
                    chord: span.chord,
                    start: tail_start,
                    duration: span_end - tail_start,
                });
            }
        }
        spans.dedup_by(|next, prev| {
            if prev.chord == next.chord && prev.end() == next.start {
                prev.duration += next.duration;
                true
            } else {
                false
            }
        });
        self.spans = spans;
        self.assign_spans();
    }

    /// Rewrite the end of the harmony for `cadence`.
    pub fn apply_cadence(&mut self, key: &Key, cadence: Cadence) {
        let Some(last) = self.steps.last().map(|s| s.start) else {
            return;
        };
        let tonic = Chord::tonic(key);
        match cadence {
            Cadence::FinalChord => {}
            Cadence::Tonic => self.reharmonize(last, self.end, tonic),
            Cadence::Plagal => {
                let bar_start = self.meter.bar_start(last);
                let iv_from = match self.steps.len() {
                    n if n >= 2 => self.steps[n - 2].start.min(bar_start),
                    _ => bar_start,
                };
                self.reharmonize(iv_from, last, Chord::diatonic(key, 3));
                self.reharmonize(last, self.end, tonic);
            }
        }
    }

    fn assign_spans(&mut self) {
        let mut span = 0;
        for step in &mut self.steps {
            while span + 1 < self.spans.len() && self.spans[span].end() <= step.start {
                span += 1;
            }
            step.span = span;
        }
    }
}

/// End of the last note rounded up to a bar line.
pub fn bar_aligned_end(rhythm: &[RhythmStep], meter: &Meter) -> u32 {
    let bar = meter.bar_ticks();
    let notes_end = rhythm.last().map(|s| s.start + s.duration).unwrap_or(0);
    notes_end.div_ceil(bar).max(1) * bar
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhythm::lay_out;

    fn chords(symbols: &[&str]) -> Vec<Chord> {
        symbols.iter().map(|s| Chord::parse(s).unwrap()).collect()
    }

    fn symbols(timeline: &Timeline) -> Vec<String> {
        timeline.spans().iter().map(|s| s.chord.symbol()).collect()
    }

    #[test]
    fn test_per_bar_pacing_cycles_chords() {
        let meter = Meter::default();
        let rhythm = lay_out(&[960; 9], &meter);
        let tl = Timeline::from_progression(&rhythm, meter, &chords(&["C", "G", "Am", "F"]), ChordPacing::PerBar)
            .unwrap();
        assert_eq!(tl.end(), 1920 * 5);
        assert_eq!(symbols(&tl), ["C", "G", "Am", "F", "C"]);
        assert_eq!(tl.chord_at(2).symbol(), "G");
        assert_eq!(tl.chord_at(8).symbol(), "C");
    }

    #[test]
    fn test_per_note_pacing() {
        let meter = Meter::default();
        let rhythm = lay_out(&[480, 240, 240, 960], &meter);
        let tl = Timeline::from_progression(&rhythm, meter, &chords(&["C", "F"]), ChordPacing::PerNote)
            .unwrap();
        let under: Vec<String> = (0..4).map(|i| tl.chord_at(i).symbol()).collect();
        assert_eq!(under, ["C", "F", "C", "F"]);
    }

    #[test]
    fn test_empty_progression_rejected() {
        let meter = Meter::default();
        let rhythm = lay_out(&[480], &meter);
        assert!(Timeline::from_progression(&rhythm, meter, &[], ChordPacing::PerBar).is_err());
    }

    #[test]
    fn test_gap_in_spans_rejected() {
        let meter = Meter::default();
        let rhythm = lay_out(&[960, 960], &meter);
        let c = Chord::parse("C").unwrap();
        let spans = vec![
            ChordSpan { chord: c.clone(), start: 0, duration: 900 },
            ChordSpan { chord: c, start: 960, duration: 960 },
        ];
        assert!(Timeline::new(&rhythm, meter, spans).is_err());
    }

    #[test]
    fn test_tonic_cadence_splits_final_span() {
        let key = Key::parse("C").unwrap();
        let meter = Meter::default();
        let rhythm = lay_out(&[480; 8], &meter);
        let mut tl = Timeline::from_progression(&rhythm, meter, &chords(&["C", "G"]), ChordPacing::PerBar)
            .unwrap();
        tl.apply_cadence(&key, Cadence::Tonic);
        assert_eq!(symbols(&tl), ["C", "G", "C"]);
        assert_eq!(tl.spans()[2].start, 1920 + 1440);
        assert_eq!(tl.final_chord().symbol(), "C");
        assert_eq!(tl.chord_at(6).symbol(), "G");
    }

    #[test]
    fn test_plagal_cadence_ends_iv_i() {
        let key = Key::parse("G").unwrap();
        let meter = Meter::default();
        let rhythm = lay_out(&[480; 8], &meter);
        let mut tl = Timeline::from_progression(&rhythm, meter, &chords(&["G", "D"]), ChordPacing::PerBar)
            .unwrap();
        tl.apply_cadence(&key, Cadence::Plagal);
        assert_eq!(symbols(&tl), ["G", "C", "G"]);
        assert_eq!(tl.spans()[1].start, 1920);
        assert_eq!(tl.chord_at(6).symbol(), "C");
        assert_eq!(tl.chord_at(7).symbol(), "G");
    }

    #[test]
    fn test_plagal_reaches_back_to_penultimate_onset() {
        let key = Key::parse("C").unwrap();
        let meter = Meter::default();
        // Last note starts on a bar line; the penultimate one a half earlier.
        let rhythm = lay_out(&[960, 960, 960, 960, 480], &meter);
        let mut tl = Timeline::from_progression(&rhythm, meter, &chords(&["C", "G", "Am"]), ChordPacing::PerBar)
            .unwrap();
        tl.apply_cadence(&key, Cadence::Plagal);
        assert_eq!(symbols(&tl), ["C", "G", "F", "C"]);
        assert_eq!(tl.chord_at(3).symbol(), "F");
        assert_eq!(tl.final_chord().symbol(), "C");
        let n = tl.spans().len();
        assert_eq!(tl.spans()[n - 1].end(), tl.end());
    }

    #[test]
    fn test_reharmonize_inside_one_span() {
        let meter = Meter::default();
        let rhythm = lay_out(&[1920, 1920], &meter);
        let spans = vec![ChordSpan { chord: Chord::parse("C").unwrap(), start: 0, duration: 3840 }];
        let mut tl = Timeline::new(&rhythm, meter, spans).unwrap();
        tl.reharmonize(960, 2880, Chord::parse("F").unwrap());
        assert_eq!(symbols(&tl), ["C", "F", "C"]);
        let bounds: Vec<(u32, u32)> = tl.spans().iter().map(|s| (s.start, s.end())).collect();
        assert_eq!(bounds, [(0, 960), (960, 2880), (2880, 3840)]);
        assert_eq!(tl.chord_at(1).symbol(), "F");
    }

    #[test]
    fn test_reharmonize_merges_equal_neighbours() {
        let meter = Meter::default();
        let rhythm = lay_out(&[1920, 1920], &meter);
        let mut tl = Timeline::from_progression(&rhythm, meter, &chords(&["C", "F"]), ChordPacing::PerBar)
            .unwrap();
        tl.reharmonize(1920, 3840, Chord::parse("C").unwrap());
        assert_eq!(symbols(&tl), ["C"]);
        assert_eq!(tl.spans()[0].duration, 3840);
        assert_eq!(tl.steps()[1].span, 0);
    }
}
