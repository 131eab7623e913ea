//! Compilation context: the DSL's named libraries, the seeded random
//! stream, and the running observation state consumed by conditions.
//!
//! A fresh context is created per compile and shared across every track of
//! the document, so libraries defined in one track are visible to later
//! tracks.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;

use crate::event::{Event, EventKind};

/// A scale: interval set plus a root note.
#[derive(Debug, Clone)]
pub struct Scale {
    pub intervals: Vec<i64>,
    pub root_note: i64,
}

impl Scale {
    /// Whether the note's pitch class is a member of this scale.
    pub fn contains(&self, note: i64) -> bool {
        let class = (note - self.root_note).rem_euclid(12);
        self.intervals.iter().any(|i| i.rem_euclid(12) == class)
    }

    /// Nearest scale member to `note`, widening one semitone up then one
    /// down, alternately, until a member is found.
    pub fn nearest_scale_note(&self, note: i64) -> i64 {
        if self.contains(note) {
            return note;
        }
        for distance in 1..=11 {
            if self.contains(note + distance) {
                return note + distance;
            }
            if self.contains(note - distance) {
                return note - distance;
            }
        }
        note
    }
}

/// Per-step timing and velocity offsets, applied cyclically.
#[derive(Debug, Clone)]
pub struct GrooveTemplate {
    pub steps: Vec<(i64, i64)>,
}

/// Per-note-pair duration and velocity multipliers, applied cyclically.
#[derive(Debug, Clone)]
pub struct ArticulationPattern {
    pub steps: Vec<(f64, f64)>,
}

#[derive(Debug, Clone)]
pub struct Chord {
    pub notes: Vec<i64>,
    pub duration: i64,
}

#[derive(Debug, Clone)]
pub struct ChordProgression {
    pub root_note: i64,
    pub chords: Vec<Chord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpeggioMode {
    Up,
    Down,
    UpDown,
    Random,
}

#[derive(Debug, Clone)]
pub struct Arpeggiator {
    pub mode: ArpeggioMode,
    pub octave_range: i64,
    pub note_duration: i64,
}

#[derive(Debug, Clone)]
pub struct Polyrhythm {
    pub rhythms: Vec<i64>,
    pub patterns: Vec<Vec<Event>>,
}

/// A base phrase repeated with random single-semitone variations.
#[derive(Debug, Clone)]
pub struct Phrase {
    pub base: Vec<Event>,
    pub repetitions: u32,
}

/// Cyclic list of velocities for note-ons.
#[derive(Debug, Clone)]
pub struct VelocityCurve {
    pub velocities: Vec<u8>,
}

/// Scale degrees aligned with the harmony intervals to stack on each.
#[derive(Debug, Clone)]
pub struct HarmonizationRule {
    pub scale_intervals: Vec<i64>,
    pub harmonization_intervals: Vec<Vec<i64>>,
}

/// Controller automation: sorted (tick, value) breakpoints.
#[derive(Debug, Clone)]
pub struct ParameterAutomation {
    pub controller: u8,
    pub points: Vec<(i64, i64)>,
}

impl ParameterAutomation {
    /// Linearly interpolated value at `tick`, clamped to the endpoint
    /// values outside the breakpoint range. None when no points exist.
    pub fn value_at(&self, tick: i64) -> Option<i64> {
        let (first, last) = (self.points.first()?, self.points.last()?);
        if tick <= first.0 {
            return Some(first.1);
        }
        if tick >= last.0 {
            return Some(last.1);
        }
        let after = self.points.iter().position(|p| p.0 > tick)?;
        let (t0, v0) = self.points[after - 1];
        let (t1, v1) = self.points[after];
        if t1 == t0 {
            return Some(v1);
        }
        Some(v0 + (v1 - v0) * (tick - t0) / (t1 - t0))
    }
}

/// Sorted (tick, microseconds-per-quarter) points.
#[derive(Debug, Clone, Default)]
pub struct TempoMap {
    pub points: Vec<(i64, u32)>,
}

impl TempoMap {
    /// Tempo of the highest point at or before `tick`.
    pub fn tempo_at(&self, tick: i64) -> Option<u32> {
        self.points
            .iter()
            .rev()
            .find(|(t, _)| *t <= tick)
            .map(|(_, tempo)| *tempo)
    }
}

#[derive(Debug, Clone)]
pub struct RandomizationParams {
    pub velocity_range: i64,
    pub timing_range: i64,
    pub pitch_range: i64,
    pub note_probability: f64,
}

impl Default for RandomizationParams {
    fn default() -> Self {
        RandomizationParams {
            velocity_range: 10,
            timing_range: 5,
            pitch_range: 2,
            note_probability: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub enum MidiEffect {
    Echo { delay: i64, repetitions: u32, decay: f64 },
    ChordSplitter { interval: i64 },
}

/// Chance of rewriting events of one kind, with the payload patch to apply.
#[derive(Debug, Clone)]
pub struct EventProbability {
    pub probability: f64,
    pub modification: Value,
}

/// A tempo change deferred to the top-level driver.
#[derive(Debug, Clone)]
pub struct TempoChange {
    pub delta_time: i64,
    pub us_per_quarter: u32,
}

pub struct Context {
    pub scales: HashMap<String, Scale>,
    pub groove_templates: HashMap<String, GrooveTemplate>,
    pub articulation_patterns: HashMap<String, ArticulationPattern>,
    pub chord_progressions: HashMap<String, ChordProgression>,
    pub arpeggiators: HashMap<String, Arpeggiator>,
    pub polyrhythms: HashMap<String, Polyrhythm>,
    pub phrases: HashMap<String, Phrase>,
    pub velocity_curves: HashMap<String, VelocityCurve>,
    pub harmonization_rules: HashMap<String, HarmonizationRule>,
    pub effects: Vec<MidiEffect>,
    pub event_probabilities: HashMap<String, EventProbability>,
    pub automations: Vec<ParameterAutomation>,
    pub tempo_map: TempoMap,
    pub randomization: RandomizationParams,
    pub track_mutes: HashMap<String, bool>,
    pub tempo_changes: Vec<TempoChange>,
    pub rng: StdRng,

    // Observation state, updated as literal events are materialized.
    pub note_counts: HashMap<u8, u32>,
    pub note_sequence: Vec<u8>,
    pub total_delta_time: i64,
    pub delta_time_sequence: Vec<i64>,
    pub current_polyphony: i64,
    pub min_velocity: u8,
    pub max_velocity: u8,
    pub controller_values: HashMap<u8, u8>,
}

impl Context {
    /// Fresh context. With `Some(seed)` every randomized transform is
    /// reproducible; otherwise the stream is seeded from OS entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Context {
            scales: HashMap::new(),
            groove_templates: HashMap::new(),
            articulation_patterns: HashMap::new(),
            chord_progressions: HashMap::new(),
            arpeggiators: HashMap::new(),
            polyrhythms: HashMap::new(),
            phrases: HashMap::new(),
            velocity_curves: HashMap::new(),
            harmonization_rules: HashMap::new(),
            effects: Vec::new(),
            event_probabilities: HashMap::new(),
            automations: Vec::new(),
            tempo_map: TempoMap::default(),
            randomization: RandomizationParams::default(),
            track_mutes: HashMap::new(),
            tempo_changes: Vec::new(),
            rng,
            note_counts: HashMap::new(),
            note_sequence: Vec::new(),
            total_delta_time: 0,
            delta_time_sequence: Vec::new(),
            current_polyphony: 0,
            min_velocity: 127,
            max_velocity: 0,
            controller_values: HashMap::new(),
        }
    }

    pub fn note_count(&self, note: u8) -> u32 {
        self.note_counts.get(&note).copied().unwrap_or(0)
    }

    /// Fold one materialized literal event into the observation state.
    pub fn observe(&mut self, event: &Event) {
        self.total_delta_time += event.delta;
        self.delta_time_sequence.push(event.delta);

        match &event.kind {
            EventKind::NoteOn { note, velocity, .. } => {
                *self.note_counts.entry(*note).or_insert(0) += 1;
                self.note_sequence.push(*note);
                self.current_polyphony += 1;
                self.min_velocity = self.min_velocity.min(*velocity);
                self.max_velocity = self.max_velocity.max(*velocity);
            }
            EventKind::NoteOff { .. } => {
                self.current_polyphony = (self.current_polyphony - 1).max(0);
            }
            EventKind::ControlChange { controller, value, .. } => {
                self.controller_values.insert(*controller, *value);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn major() -> Scale {
        Scale { intervals: vec![0, 2, 4, 5, 7, 9, 11], root_note: 60 }
    }

    #[test]
    fn scale_membership() {
        let scale = major();
        assert!(scale.contains(60));
        assert!(scale.contains(72));
        assert!(scale.contains(48));
        assert!(!scale.contains(61));
    }

    #[test]
    fn nearest_scale_note_widens_alternately() {
        let scale = major();
        assert_eq!(scale.nearest_scale_note(60), 60);
        // C# resolves upward to D before downward to C.
        assert_eq!(scale.nearest_scale_note(61), 62);
        assert_eq!(scale.nearest_scale_note(66), 67);
    }

    #[test]
    fn automation_interpolates_and_clamps() {
        let auto = ParameterAutomation { controller: 1, points: vec![(0, 0), (100, 100)] };
        assert_eq!(auto.value_at(-10), Some(0));
        assert_eq!(auto.value_at(0), Some(0));
        assert_eq!(auto.value_at(50), Some(50));
        assert_eq!(auto.value_at(100), Some(100));
        assert_eq!(auto.value_at(500), Some(100));
    }

    #[test]
    fn tempo_map_lookup() {
        let map = TempoMap { points: vec![(0, 500_000), (960, 400_000)] };
        assert_eq!(map.tempo_at(0), Some(500_000));
        assert_eq!(map.tempo_at(959), Some(500_000));
        assert_eq!(map.tempo_at(960), Some(400_000));
        assert_eq!(TempoMap::default().tempo_at(0), None);
    }

    #[test]
    fn observation_tracks_notes_and_controllers() {
        let mut ctx = Context::new(Some(1));
        ctx.observe(&Event::new(0, EventKind::NoteOn { channel: 0, note: 60, velocity: 80 }));
        ctx.observe(&Event::new(120, EventKind::NoteOn { channel: 0, note: 64, velocity: 90 }));
        ctx.observe(&Event::new(120, EventKind::NoteOff { channel: 0, note: 60, velocity: 0 }));
        ctx.observe(&Event::new(0, EventKind::ControlChange { channel: 0, controller: 7, value: 100 }));

        assert_eq!(ctx.note_count(60), 1);
        assert_eq!(ctx.note_sequence, vec![60, 64]);
        assert_eq!(ctx.current_polyphony, 1);
        assert_eq!(ctx.total_delta_time, 240);
        assert_eq!(ctx.min_velocity, 80);
        assert_eq!(ctx.max_velocity, 90);
        assert_eq!(ctx.controller_values.get(&7), Some(&100));
    }
}
