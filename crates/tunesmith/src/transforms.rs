//! Deterministic event-generation transforms behind the DSL directives.
//!
//! Generators return fresh event sequences; mutators rewrite a stream in
//! place. Wherever a transform may perturb ordering (polyrhythm layering,
//! automation insertion, echo copies) a stable sort by delta restores it.
//! Randomized paths draw exclusively from the context's seeded stream.

use rand::rngs::StdRng;
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use crate::context::{
    ArpeggioMode, Arpeggiator, ArticulationPattern, ChordProgression, EventProbability,
    GrooveTemplate, HarmonizationRule, MidiEffect, ParameterAutomation, Phrase, Polyrhythm,
    RandomizationParams, Scale, TempoMap, VelocityCurve,
};
use crate::event::{clamp_note, clamp_velocity, Event, EventKind};

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn lcm(a: i64, b: i64) -> i64 {
    if a == 0 || b == 0 { 0 } else { a / gcd(a, b) * b }
}

/// Walk note-on/note-off pairs, cycling through the pattern's
/// (duration multiplier, velocity multiplier) steps. The note-on's
/// velocity is scaled, the following note-off's delta is scaled.
pub fn apply_articulation_pattern(events: &mut [Event], pattern: &ArticulationPattern) {
    if pattern.steps.is_empty() {
        return;
    }
    let mut step = 0usize;
    let mut i = 0usize;
    while i + 1 < events.len() {
        if events[i].kind.is_note_on() && events[i + 1].kind.is_note_off() {
            let (duration_mult, velocity_mult) = pattern.steps[step % pattern.steps.len()];
            step += 1;
            if let EventKind::NoteOn { velocity, .. } = &mut events[i].kind {
                *velocity = clamp_velocity((*velocity as f64 * velocity_mult) as i64);
            }
            events[i + 1].delta = (events[i + 1].delta as f64 * duration_mult) as i64;
        }
        i += 1;
    }
}

/// Layer the polyrhythm's patterns across `measures` measures of the
/// combined cycle (LCM of the rhythm lengths, 480 ticks per beat).
pub fn generate_polyrhythm(poly: &Polyrhythm, measures: u32) -> Vec<Event> {
    const TICKS_PER_BEAT: i64 = 480;

    let cycle = poly
        .rhythms
        .iter()
        .filter(|r| **r > 0)
        .fold(1i64, |acc, r| lcm(acc, *r));
    if cycle <= 1 && poly.rhythms.iter().all(|r| *r <= 0) {
        warn!("polyrhythm has no usable rhythms");
        return Vec::new();
    }

    let mut events = Vec::new();
    for measure in 0..measures as i64 {
        for (rhythm, pattern) in poly.rhythms.iter().zip(&poly.patterns) {
            if *rhythm <= 0 {
                continue;
            }
            let copies = cycle / rhythm;
            for copy in 0..copies {
                let offset = measure * cycle * TICKS_PER_BEAT + copy * rhythm * TICKS_PER_BEAT;
                for event in pattern {
                    events.push(Event::new(event.delta + offset, event.kind.clone()));
                }
            }
        }
    }

    events.sort_by_key(|e| e.delta);
    events
}

/// The base phrase once, then `repetitions - 1` variations with each note
/// nudged by a random semitone in {-1, 0, +1}.
pub fn generate_phrase_with_variation(phrase: &Phrase, rng: &mut StdRng) -> Vec<Event> {
    let mut events = phrase.base.clone();
    for _ in 1..phrase.repetitions.max(1) {
        for event in &phrase.base {
            let mut varied = event.clone();
            match &mut varied.kind {
                EventKind::NoteOn { note, .. } | EventKind::NoteOff { note, .. } => {
                    *note = clamp_note(*note as i64 + rng.gen_range(-1..=1));
                }
                _ => {}
            }
            events.push(varied);
        }
    }
    events
}

/// Spread the chord's notes across its duration in the arpeggiator's
/// order, one pair of note edges per step.
pub fn apply_arpeggiator(chord_events: &[Event], arp: &Arpeggiator, rng: &mut StdRng) -> Vec<Event> {
    let mut notes: Vec<u8> = chord_events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::NoteOn { note, .. } => Some(*note),
            _ => None,
        })
        .collect();
    notes.sort_unstable();

    let count = notes.len() as i64;
    if count == 0 || arp.note_duration <= 0 {
        return Vec::new();
    }

    let channel = chord_events
        .iter()
        .find_map(|e| match &e.kind {
            EventKind::NoteOn { channel, .. } => Some(*channel),
            _ => None,
        })
        .unwrap_or(0);

    let total = match (chord_events.first(), chord_events.last()) {
        (Some(first), Some(last)) => (last.delta - first.delta).max(0),
        _ => 0,
    };
    let steps = total / arp.note_duration;

    let mut events = Vec::with_capacity(steps as usize * 2);
    for i in 0..steps {
        let index = match arp.mode {
            ArpeggioMode::Up => i % count,
            ArpeggioMode::Down => count - 1 - (i % count),
            ArpeggioMode::UpDown => {
                if count == 1 {
                    0
                } else {
                    let j = i % (2 * count - 2);
                    if j >= count { 2 * (count - 1) - j } else { j }
                }
            }
            ArpeggioMode::Random => rng.gen_range(0..count),
        };
        let pitch = clamp_note(notes[index as usize] as i64 + (i / count) * 12 * arp.octave_range);
        events.push(Event::new(
            i * arp.note_duration,
            EventKind::NoteOn { channel, note: pitch, velocity: 100 },
        ));
        events.push(Event::new(
            (i + 1) * arp.note_duration,
            EventKind::NoteOff { channel, note: pitch, velocity: 0 },
        ));
    }
    events
}

/// Harmony events for each melody note edge: the note's scale degree
/// selects which intervals to stack. Returned for appending to the stream.
pub fn apply_adaptive_harmonization(
    events: &[Event],
    rule: &HarmonizationRule,
    root_note: i64,
) -> Vec<Event> {
    let mut harmony = Vec::new();
    for event in events {
        let (channel, note, velocity, on) = match &event.kind {
            EventKind::NoteOn { channel, note, velocity } => (*channel, *note, *velocity, true),
            EventKind::NoteOff { channel, note, velocity } => (*channel, *note, *velocity, false),
            _ => continue,
        };
        let degree = (note as i64 - root_note + 120).rem_euclid(12);
        let Some(index) = rule.scale_intervals.iter().position(|i| *i == degree) else {
            continue;
        };
        let Some(intervals) = rule.harmonization_intervals.get(index) else {
            continue;
        };
        for interval in intervals {
            let pitch = clamp_note(note as i64 + interval);
            let kind = if on {
                EventKind::NoteOn { channel, note: pitch, velocity }
            } else {
                EventKind::NoteOff { channel, note: pitch, velocity }
            };
            harmony.push(Event::new(event.delta, kind));
        }
    }
    harmony
}

/// Roll each event against its kind's probability entry; on a hit, merge
/// the modification record into the payload key by key.
pub fn apply_event_probabilities(
    events: &mut [Event],
    table: &HashMap<String, EventProbability>,
    rng: &mut StdRng,
) {
    for event in events.iter_mut() {
        let Some(entry) = table.get(event.kind.json_name()) else {
            continue;
        };
        if rng.gen::<f64>() < entry.probability {
            apply_modification(&mut event.kind, &entry.modification);
        }
    }
}

fn apply_modification(kind: &mut EventKind, modification: &Value) {
    let Some(fields) = modification.as_object() else {
        return;
    };
    for (key, value) in fields {
        let number = value.as_i64();
        let applied = match (key.as_str(), &mut *kind) {
            ("noteNumber", EventKind::NoteOn { note, .. })
            | ("noteNumber", EventKind::NoteOff { note, .. })
            | ("noteNumber", EventKind::PolyphonicKeyPressure { note, .. }) => {
                number.map(|n| *note = clamp_note(n)).is_some()
            }
            ("velocity", EventKind::NoteOn { velocity, .. })
            | ("velocity", EventKind::NoteOff { velocity, .. }) => {
                number.map(|n| *velocity = n.clamp(0, 127) as u8).is_some()
            }
            ("channel", EventKind::NoteOn { channel, .. })
            | ("channel", EventKind::NoteOff { channel, .. })
            | ("channel", EventKind::PolyphonicKeyPressure { channel, .. })
            | ("channel", EventKind::ControlChange { channel, .. })
            | ("channel", EventKind::ProgramChange { channel, .. })
            | ("channel", EventKind::ChannelPressure { channel, .. })
            | ("channel", EventKind::PitchBend { channel, .. }) => {
                number.map(|n| *channel = (n & 0x0F) as u8).is_some()
            }
            ("value", EventKind::ControlChange { value: v, .. }) => {
                number.map(|n| *v = n.clamp(0, 127) as u8).is_some()
            }
            ("value", EventKind::PitchBend { value: v, .. }) => {
                number.map(|n| *v = n.clamp(-8192, 8191) as i16).is_some()
            }
            ("controllerNumber", EventKind::ControlChange { controller, .. }) => {
                number.map(|n| *controller = n.clamp(0, 127) as u8).is_some()
            }
            ("pressure", EventKind::ChannelPressure { pressure, .. })
            | ("pressure", EventKind::PolyphonicKeyPressure { pressure, .. }) => {
                number.map(|n| *pressure = n.clamp(0, 127) as u8).is_some()
            }
            ("programNumber", EventKind::ProgramChange { program, .. }) => {
                number.map(|n| *program = n.clamp(0, 127) as u8).is_some()
            }
            ("microsecondsPerQuarter", EventKind::SetTempo(tempo)) => {
                number.map(|n| *tempo = n.clamp(0, 0xFF_FFFF) as u32).is_some()
            }
            ("text", EventKind::MetaText { text, .. })
            | ("text", EventKind::TrackName(text))
            | ("text", EventKind::Marker(text))
            | ("text", EventKind::CuePoint(text))
            | ("text", EventKind::DeviceName(text)) => {
                value.as_str().map(|s| *text = s.to_string()).is_some()
            }
            _ => false,
        };
        if !applied {
            warn!(
                "event probability modification key '{key}' does not apply to {}",
                kind.json_name()
            );
        }
    }
}

/// Insert control changes wherever an automation's interpolated value
/// moves, then restore delta order.
pub fn apply_parameter_automation(events: &mut Vec<Event>, automations: &[ParameterAutomation]) {
    if automations.is_empty() {
        return;
    }

    let mut inserted = Vec::new();
    let mut last_values: Vec<Option<i64>> = vec![None; automations.len()];
    let mut tick = 0i64;

    for event in events.iter() {
        tick += event.delta;
        for (automation, last) in automations.iter().zip(last_values.iter_mut()) {
            let Some(value) = automation.value_at(tick) else {
                continue;
            };
            if *last != Some(value) {
                inserted.push(Event::new(
                    tick,
                    EventKind::ControlChange {
                        channel: 0,
                        controller: automation.controller,
                        value: value.clamp(0, 127) as u8,
                    },
                ));
                *last = Some(value);
            }
        }
    }

    events.extend(inserted);
    events.sort_by_key(|e| e.delta);
}

/// A parallel voice: each note edge mirrored at the nearest scale member
/// above (or below) the harmonization interval.
pub fn generate_adaptive_harmony(events: &[Event], scale: &Scale, interval: i64) -> Vec<Event> {
    let mut harmony = Vec::new();
    for event in events {
        match &event.kind {
            EventKind::NoteOn { channel, note, velocity } => {
                let pitch = clamp_note(scale.nearest_scale_note(*note as i64 + interval));
                harmony.push(Event::new(
                    event.delta,
                    EventKind::NoteOn { channel: *channel, note: pitch, velocity: *velocity },
                ));
            }
            EventKind::NoteOff { channel, note, velocity } => {
                let pitch = clamp_note(scale.nearest_scale_note(*note as i64 + interval));
                harmony.push(Event::new(
                    event.delta,
                    EventKind::NoteOff { channel: *channel, note: pitch, velocity: *velocity },
                ));
            }
            _ => {}
        }
    }
    harmony
}

/// Insert tempo events where the tempo map changes the active tempo. The
/// inserted event takes over the current event's delta so the change
/// lands exactly on that event's tick. An empty map changes nothing.
pub fn apply_tempo_map(events: &mut Vec<Event>, map: &TempoMap) {
    if map.points.is_empty() {
        return;
    }

    let mut out = Vec::with_capacity(events.len());
    let mut tick = 0i64;
    let mut active: Option<u32> = None;

    for mut event in events.drain(..) {
        tick += event.delta;
        if let Some(tempo) = map.tempo_at(tick) {
            if active != Some(tempo) {
                out.push(Event::new(event.delta, EventKind::SetTempo(tempo)));
                event.delta = 0;
                active = Some(tempo);
            }
        }
        out.push(event);
    }

    *events = out;
}

/// Full randomization: probabilistic note dropping (a dropped note-on
/// takes its matching note-off with it), velocity and pitch jitter on
/// note-ons, timing jitter on every event.
pub fn apply_randomization(events: &mut Vec<Event>, params: &RandomizationParams, rng: &mut StdRng) {
    let mut dropped = vec![false; events.len()];

    for i in 0..events.len() {
        if dropped[i] || !events[i].kind.is_note_on() {
            continue;
        }
        if rng.gen::<f64>() >= params.note_probability {
            dropped[i] = true;
            let note = events[i].kind.note();
            if let Some(j) = (i + 1..events.len())
                .find(|j| events[*j].kind.is_note_off() && events[*j].kind.note() == note)
            {
                dropped[j] = true;
            }
            continue;
        }
        if let EventKind::NoteOn { note, velocity, .. } = &mut events[i].kind {
            if params.velocity_range > 0 {
                *velocity = clamp_velocity(
                    *velocity as i64 + rng.gen_range(-params.velocity_range..=params.velocity_range),
                );
            }
            if params.pitch_range > 0 {
                *note = clamp_note(
                    *note as i64 + rng.gen_range(-params.pitch_range..=params.pitch_range),
                );
            }
        }
    }

    let mut keep = dropped.iter().map(|d| !d);
    events.retain(|_| keep.next().unwrap());

    if params.timing_range > 0 {
        for event in events.iter_mut() {
            event.delta =
                (event.delta + rng.gen_range(-params.timing_range..=params.timing_range)).max(0);
        }
    }
}

/// The two-parameter variant: velocity jitter on note-ons and timing
/// jitter everywhere, never dropping notes.
pub fn apply_controlled_randomization(
    events: &mut [Event],
    velocity_range: i64,
    timing_range: i64,
    rng: &mut StdRng,
) {
    for event in events.iter_mut() {
        if velocity_range > 0 {
            if let EventKind::NoteOn { velocity, .. } = &mut event.kind {
                *velocity =
                    clamp_velocity(*velocity as i64 + rng.gen_range(-velocity_range..=velocity_range));
            }
        }
        if timing_range > 0 {
            event.delta = (event.delta + rng.gen_range(-timing_range..=timing_range)).max(0);
        }
    }
}

/// Walk the progression's chords, block style or arpeggiated.
pub fn expand_chord_progression(progression: &ChordProgression, arpeggiate: bool) -> Vec<Event> {
    let mut events = Vec::new();
    let mut start = 0i64;

    for chord in &progression.chords {
        let duration = chord.duration.max(0);
        if arpeggiate && !chord.notes.is_empty() {
            let slice = duration / chord.notes.len() as i64;
            for (i, offset) in chord.notes.iter().enumerate() {
                let pitch = clamp_note(progression.root_note + offset);
                let on = start + i as i64 * slice;
                events.push(Event::new(
                    on,
                    EventKind::NoteOn { channel: 0, note: pitch, velocity: 100 },
                ));
                events.push(Event::new(
                    on + slice,
                    EventKind::NoteOff { channel: 0, note: pitch, velocity: 0 },
                ));
            }
        } else {
            for offset in &chord.notes {
                let pitch = clamp_note(progression.root_note + offset);
                events.push(Event::new(
                    start,
                    EventKind::NoteOn { channel: 0, note: pitch, velocity: 100 },
                ));
            }
            for offset in &chord.notes {
                let pitch = clamp_note(progression.root_note + offset);
                events.push(Event::new(
                    start + duration,
                    EventKind::NoteOff { channel: 0, note: pitch, velocity: 0 },
                ));
            }
        }
        start += duration;
    }

    events
}

/// Shift note edges by the groove's cyclic timing offsets and push
/// note-on velocities by its velocity offsets.
pub fn apply_groove_template(events: &mut [Event], groove: &GrooveTemplate) {
    if groove.steps.is_empty() {
        return;
    }
    let mut step = 0usize;
    for event in events.iter_mut() {
        if !(event.kind.is_note_on() || event.kind.is_note_off()) {
            continue;
        }
        let (timing_offset, velocity_offset) = groove.steps[step % groove.steps.len()];
        step += 1;
        event.delta = (event.delta + timing_offset).max(0);
        if let EventKind::NoteOn { velocity, .. } = &mut event.kind {
            *velocity = clamp_velocity(*velocity as i64 + velocity_offset);
        }
    }
}

/// Replace each note-on velocity with the curve's next value, cyclically.
pub fn apply_velocity_curve(events: &mut [Event], curve: &VelocityCurve) {
    if curve.velocities.is_empty() {
        return;
    }
    let mut step = 0usize;
    for event in events.iter_mut() {
        if let EventKind::NoteOn { velocity, .. } = &mut event.kind {
            *velocity = curve.velocities[step % curve.velocities.len()].clamp(1, 127);
            step += 1;
        }
    }
}

/// Random walk over the scale members inside the note range.
pub fn generate_scale_based_melody(
    scale: &Scale,
    length: u32,
    min_note: i64,
    max_note: i64,
    rng: &mut StdRng,
) -> Vec<Event> {
    const NOTE_TICKS: i64 = 240;

    let members: Vec<u8> = (min_note.max(0)..=max_note.min(127))
        .filter(|note| scale.contains(*note))
        .map(|note| note as u8)
        .collect();
    if members.is_empty() {
        warn!("scale has no members between {min_note} and {max_note}");
        return Vec::new();
    }

    let mut events = Vec::with_capacity(length as usize * 2);
    for _ in 0..length {
        let note = members[rng.gen_range(0..members.len())];
        events.push(Event::new(0, EventKind::NoteOn { channel: 0, note, velocity: 100 }));
        events.push(Event::new(NOTE_TICKS, EventKind::NoteOff { channel: 0, note, velocity: 0 }));
    }
    events
}

/// Fold one effect over the stream.
pub fn apply_midi_effect(events: Vec<Event>, effect: &MidiEffect) -> Vec<Event> {
    match effect {
        MidiEffect::Echo { delay, repetitions, decay } => {
            apply_echo(events, *delay, *repetitions, *decay)
        }
        MidiEffect::ChordSplitter { interval } => apply_chord_splitter(events, *interval),
    }
}

/// Echo every note edge `repetitions` times at `delay` tick spacing,
/// decaying the copies' velocities.
fn apply_echo(events: Vec<Event>, delay: i64, repetitions: u32, decay: f64) -> Vec<Event> {
    let mut out = events.clone();
    for event in &events {
        for repeat in 1..=repetitions as i64 {
            let mut copy = event.clone();
            match &mut copy.kind {
                EventKind::NoteOn { velocity, .. } => {
                    *velocity = clamp_velocity(
                        (*velocity as f64 * decay.powi(repeat as i32)) as i64,
                    );
                }
                EventKind::NoteOff { .. } => {}
                _ => continue,
            }
            copy.delta = event.delta + repeat * delay;
            out.push(copy);
        }
    }
    out.sort_by_key(|e| e.delta);
    out
}

/// Stagger simultaneous note-ons: within each run of note-ons sharing a
/// delta, the j-th is pushed back by `j * interval` ticks.
fn apply_chord_splitter(mut events: Vec<Event>, interval: i64) -> Vec<Event> {
    let mut i = 0;
    while i < events.len() {
        if events[i].kind.is_note_on() {
            let base = events[i].delta;
            let mut j = i + 1;
            while j < events.len() && events[j].kind.is_note_on() && events[j].delta == base {
                events[j].delta = base + (j - i) as i64 * interval;
                j += 1;
            }
            i = j;
        } else {
            i += 1;
        }
    }
    events.sort_by_key(|e| e.delta);
    events
}
