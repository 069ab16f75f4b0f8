// Melodist: constraint-guided melodic phrase generator.
//
// Builds short phrases (a melody plus optional harmony and counterpoint
// lines) from a key, a chord progression or a generated one, a meter and
// optional stylistic biases. Every pitch is a weighted draw from the legal
// candidates of its step, with soft biases layered in log space; voices are
// then corrected for voice-leading and optionally refined toward a reference
// corpus. Output is tick-based note records for an external serializer.
//
// Architecture (leaf to root):
// - error.rs: `GenError` taxonomy and the crate `Result`
// - pitch.rs: MIDI pitch helpers, octave ranges, interval classification
// - mode.rs: modes, keys and ordered scales
// - chord.rs: chord symbols, chord tones, scale-for-chord
// - pool.rs: memoized candidate pools per (key, chord, range, restriction)
// - rhythm.rs: meter, duration classes, pattern/Markov rhythm engine
// - timeline.rs: rhythm steps paired with chord spans, cadence rewriting
// - harmony.rs: generated progressions (model-driven or rule-based)
// - planner.rs: tension curves, octave ranges, skeleton + infill guides
// - model.rs: pluggable sequence models over scale degrees
// - style.rs: style vectors, presets and blends
// - weighting.rs: per-candidate log-space weights and tunable constants
// - selector.rs: the per-voice note selector state machine
// - polyphony.rs: voice roles, coordinator, voice-leading correction
// - refine.rs: corpus statistics and the Fréchet-distance hill climb
// - phrase.rs: notes, voices, the finished phrase and its report
// - config.rs: `GenerationRequest` and eager validation
// - generator.rs: the end-to-end pipeline
// - batch.rs: independent phrases on a rayon worker pool
//
// Given the same request (seed included) the output is identical on every
// run, on every platform, for any worker count.

pub mod batch;
pub mod chord;
pub mod config;
pub mod error;
pub mod generator;
pub mod harmony;
pub mod mode;
pub mod model;
pub mod phrase;
pub mod pitch;
pub mod planner;
pub mod polyphony;
pub mod pool;
pub mod refine;
pub mod rhythm;
pub mod selector;
pub mod style;
pub mod timeline;
pub mod weighting;

pub use batch::generate_batch;
pub use config::GenerationRequest;
pub use error::{GenError, Result};
pub use generator::Generator;
pub use phrase::{Note, Phrase};
