//! Recursive DSL expander and top-level driver.
//!
//! A stream is a JSON array of directives and event literals, processed in
//! source order: every directive sees the events accumulated by earlier
//! elements of the same stream. Directives are matched first; anything
//! else is parsed as an event literal, and anything unrecognized is
//! skipped with a warning. Only structural problems abort a compile;
//! data-level problems degrade to warnings so a partially valid document
//! still produces output.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::conditions;
use crate::context::{
    Arpeggiator, ArpeggioMode, ArticulationPattern, Chord, ChordProgression, Context,
    EventProbability, GrooveTemplate, HarmonizationRule, MidiEffect, ParameterAutomation, Phrase,
    Polyrhythm, Scale, TempoChange, VelocityCurve,
};
use crate::error::Error;
use crate::event::{Event, EventKind};
use crate::patterns::PatternStore;
use crate::transforms;

/// Expand the whole document into per-track event sequences, then apply
/// the track-level passes that need every track in hand: deferred tempo
/// changes and track muting.
pub fn expand_document(doc: &Value, patterns: &mut PatternStore, ctx: &mut Context) -> Vec<Vec<Event>> {
    let mut tracks = Vec::new();
    if let Some(track_list) = doc.get("tracks").and_then(Value::as_array) {
        for track in track_list {
            tracks.push(expand_stream(track, patterns, ctx));
        }
    } else {
        tracks.push(expand_stream(doc, patterns, ctx));
    }

    if !ctx.tempo_changes.is_empty() {
        if let Some(first) = tracks.first_mut() {
            let mut prefixed: Vec<Event> = ctx
                .tempo_changes
                .iter()
                .map(|tc| Event::new(tc.delta_time, EventKind::SetTempo(tc.us_per_quarter)))
                .collect();
            prefixed.append(first);
            *first = prefixed;
        }
    }

    apply_track_muting(doc, ctx, &mut tracks);
    tracks
}

/// Merge the top-level `trackMuting` map with `setTrackMute` directives
/// (directives win) and neuter note events in muted tracks.
fn apply_track_muting(doc: &Value, ctx: &Context, tracks: &mut [Vec<Event>]) {
    let mut muting: HashMap<String, bool> = HashMap::new();
    if let Some(map) = doc.get("trackMuting").and_then(Value::as_object) {
        for (name, muted) in map {
            if let Some(muted) = muted.as_bool() {
                muting.insert(name.clone(), muted);
            }
        }
    }
    for (name, muted) in &ctx.track_mutes {
        muting.insert(name.clone(), *muted);
    }

    for (name, muted) in &muting {
        if !muted {
            continue;
        }
        let index = name
            .strip_prefix("Track")
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|n| *n >= 1);
        let Some(index) = index else {
            warn!("track mute name '{name}' does not match Track<N>");
            continue;
        };
        match tracks.get_mut(index - 1) {
            Some(track) => mute_track(track),
            None => warn!("track mute '{name}' refers to a track that does not exist"),
        }
    }
}

fn mute_track(track: &mut [Event]) {
    for event in track.iter_mut() {
        match event.kind {
            EventKind::NoteOn { channel, note, .. } => {
                event.kind = EventKind::SilentNoteOn { channel, note };
            }
            EventKind::NoteOff { channel, note, .. } => {
                event.kind = EventKind::SilentNoteOff { channel, note };
            }
            _ => {}
        }
    }
}

/// Expand one stream into a flat event sequence.
pub fn expand_stream(stream: &Value, patterns: &mut PatternStore, ctx: &mut Context) -> Vec<Event> {
    expand_stream_with_loop(stream, patterns, ctx, 1)
}

/// Expansion entry point with the legacy loop-count parameter. A count
/// above one collapses the result: the summed delta moves onto the first
/// event and every other delta becomes zero. No documented directive
/// passes a count above one; the behavior is kept for compatibility.
pub fn expand_stream_with_loop(
    stream: &Value,
    patterns: &mut PatternStore,
    ctx: &mut Context,
    loop_count: u32,
) -> Vec<Event> {
    let Some(elements) = stream.as_array() else {
        warn!("stream is not an array; it produces no events");
        return Vec::new();
    };

    let mut events = Vec::new();
    for element in elements {
        expand_element(element, patterns, ctx, &mut events);
    }

    if loop_count > 1 {
        let total: i64 = events.iter().map(|e| e.delta).sum();
        for event in events.iter_mut() {
            event.delta = 0;
        }
        if let Some(first) = events.first_mut() {
            first.delta = total;
        }
    }

    events
}

// Defaulting accessors for directive arguments. Absent or mistyped
// arguments fall back, matching the original's tolerant reads.

fn arg_str<'a>(v: &'a Value, key: &str, default: &'a str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or(default)
}

fn arg_i64(v: &Value, key: &str, default: i64) -> i64 {
    v.get(key).and_then(Value::as_i64).unwrap_or(default)
}

fn arg_f64(v: &Value, key: &str, default: f64) -> f64 {
    v.get(key).and_then(Value::as_f64).unwrap_or(default)
}

fn arg_bool(v: &Value, key: &str, default: bool) -> bool {
    v.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn i64_list(v: &Value) -> Vec<i64> {
    v.as_array()
        .map(|items| items.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default()
}

/// Parse `[[a, b], …]` into pairs, skipping malformed entries.
fn pair_list(v: &Value) -> Vec<(f64, f64)> {
    v.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|step| {
                    let step = step.as_array()?;
                    Some((step.first()?.as_f64()?, step.get(1)?.as_f64()?))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn directive<'a>(element: &'a Value, key: &str) -> Option<&'a Value> {
    element.get(key).filter(|v| v.is_object())
}

fn directive_str<'a>(element: &'a Value, key: &str) -> Option<&'a str> {
    element.get(key).and_then(Value::as_str)
}

fn directive_flag(element: &Value, key: &str) -> bool {
    element.get(key).and_then(Value::as_bool) == Some(true)
}

fn expand_element(
    element: &Value,
    patterns: &mut PatternStore,
    ctx: &mut Context,
    events: &mut Vec<Event>,
) {
    if let Some(def) = directive(element, "definePattern") {
        let Some(name) = def.get("name").and_then(Value::as_str).map(str::to_owned) else {
            warn!("definePattern without a name: {element}");
            return;
        };
        let pattern_events =
            expand_stream(def.get("events").unwrap_or(&Value::Null), patterns, ctx);
        patterns.define(name, pattern_events);
    } else if let Some(def) = directive(element, "articulationPattern") {
        let name = arg_str(def, "name", "default").to_owned();
        let steps = pair_list(def.get("pattern").unwrap_or(&Value::Null));
        ctx.articulation_patterns.insert(name, ArticulationPattern { steps });
    } else if let Some(def) = directive(element, "definePolyrhythm") {
        let name = arg_str(def, "name", "default").to_owned();
        let rhythms = i64_list(def.get("rhythms").unwrap_or(&Value::Null));
        let mut pattern_streams = Vec::new();
        if let Some(streams) = def.get("patterns").and_then(Value::as_array) {
            for stream in streams {
                pattern_streams.push(expand_stream(stream, patterns, ctx));
            }
        }
        ctx.polyrhythms.insert(name, Polyrhythm { rhythms, patterns: pattern_streams });
    } else if let Some(gen) = directive(element, "generatePolyrhythm") {
        let name = arg_str(gen, "name", "default");
        let measures = arg_i64(gen, "measures", 1).max(0) as u32;
        match ctx.polyrhythms.get(name) {
            Some(poly) => events.extend(transforms::generate_polyrhythm(poly, measures)),
            None => warn!("{}", Error::missing("polyrhythm", name)),
        }
    } else if let Some(def) = directive(element, "definePhraseWithVariation") {
        let name = arg_str(def, "name", "default").to_owned();
        let base = expand_stream(def.get("basePhrase").unwrap_or(&Value::Null), patterns, ctx);
        let repetitions = arg_i64(def, "repetitions", 4).max(1) as u32;
        ctx.phrases.insert(name, Phrase { base, repetitions });
    } else if let Some(name) = directive_str(element, "generatePhraseWithVariation") {
        match ctx.phrases.get(name) {
            Some(phrase) => {
                events.extend(transforms::generate_phrase_with_variation(phrase, &mut ctx.rng));
            }
            None => warn!("{}", Error::missing("phrase with variation", name)),
        }
    } else if let Some(def) = directive(element, "defineArpeggiator") {
        let name = arg_str(def, "name", "default").to_owned();
        let mode = match arg_str(def, "mode", "up") {
            "down" => ArpeggioMode::Down,
            "updown" => ArpeggioMode::UpDown,
            "random" => ArpeggioMode::Random,
            _ => ArpeggioMode::Up,
        };
        let arpeggiator = Arpeggiator {
            mode,
            octave_range: arg_i64(def, "octaveRange", 1),
            note_duration: arg_i64(def, "noteDuration", 120),
        };
        ctx.arpeggiators.insert(name, arpeggiator);
    } else if let Some(apply) = directive(element, "applyArpeggiator") {
        let name = arg_str(apply, "name", "default").to_owned();
        let chord = expand_stream(apply.get("chord").unwrap_or(&Value::Null), patterns, ctx);
        match ctx.arpeggiators.get(&name) {
            Some(arp) => events.extend(transforms::apply_arpeggiator(&chord, arp, &mut ctx.rng)),
            None => warn!("{}", Error::missing("arpeggiator", &name)),
        }
    } else if let Some(def) = directive(element, "defineHarmonizationRule") {
        let name = arg_str(def, "name", "default").to_owned();
        let scale_intervals = i64_list(def.get("scaleIntervals").unwrap_or(&Value::Null));
        let harmonization_intervals = def
            .get("harmonizationIntervals")
            .and_then(Value::as_array)
            .map(|rows| rows.iter().map(i64_list).collect())
            .unwrap_or_default();
        ctx.harmonization_rules
            .insert(name, HarmonizationRule { scale_intervals, harmonization_intervals });
    } else if let Some(apply) = directive(element, "applyAdaptiveHarmonization") {
        let name = arg_str(apply, "rule", "default");
        let root_note = arg_i64(apply, "rootNote", 60);
        match ctx.harmonization_rules.get(name) {
            Some(rule) => {
                let harmony = transforms::apply_adaptive_harmonization(events, rule, root_note);
                events.extend(harmony);
            }
            None => warn!("{}", Error::missing("harmonization rule", name)),
        }
    } else if let Some(def) = directive(element, "defineMidiEffect") {
        let parameters = def.get("parameters").cloned().unwrap_or(Value::Null);
        let effect = match arg_str(def, "type", "echo") {
            "chord_splitter" => {
                MidiEffect::ChordSplitter { interval: arg_i64(&parameters, "interval", 30) }
            }
            _ => MidiEffect::Echo {
                delay: arg_i64(&parameters, "delay", 480),
                repetitions: arg_i64(&parameters, "repetitions", 2).max(0) as u32,
                decay: arg_f64(&parameters, "decay", 0.5),
            },
        };
        ctx.effects.push(effect);
    } else if directive_flag(element, "applyMidiEffects") {
        for effect in &ctx.effects {
            *events = transforms::apply_midi_effect(std::mem::take(events), effect);
        }
    } else if let Some(def) = directive(element, "defineEventProbability") {
        let event_type = arg_str(def, "eventType", "noteOn").to_owned();
        let probability = arg_f64(def, "probability", 1.0);
        let modification = def.get("modification").cloned().unwrap_or(Value::Null);
        ctx.event_probabilities
            .insert(event_type, EventProbability { probability, modification });
    } else if element.get("applyEventProbabilities").is_some() {
        let value = &element["applyEventProbabilities"];
        if let Some(table) = value.as_object() {
            // Inline form: register the entries, then apply immediately.
            for (event_type, entry) in table {
                ctx.event_probabilities.insert(
                    event_type.clone(),
                    EventProbability {
                        probability: arg_f64(entry, "probability", 1.0),
                        modification: entry.get("modification").cloned().unwrap_or(Value::Null),
                    },
                );
            }
            transforms::apply_event_probabilities(events, &ctx.event_probabilities, &mut ctx.rng);
        } else if value.as_bool() == Some(true) {
            transforms::apply_event_probabilities(events, &ctx.event_probabilities, &mut ctx.rng);
        }
    } else if let Some(name) = directive_str(element, "applyArticulationPattern") {
        match ctx.articulation_patterns.get(name) {
            Some(pattern) => transforms::apply_articulation_pattern(events, pattern),
            None => warn!("{}", Error::missing("articulation pattern", name)),
        }
    } else if let Some(def) = directive(element, "defineScale") {
        let name = arg_str(def, "name", "default").to_owned();
        let intervals = match def.get("intervals") {
            Some(list) => i64_list(list),
            None => vec![0, 2, 4, 5, 7, 9, 11],
        };
        let root_note = arg_i64(def, "rootNote", 60);
        ctx.scales.insert(name, Scale { intervals, root_note });
    } else if let Some(gen) = directive(element, "generateScaleBasedMelody") {
        let name = arg_str(gen, "scale", "default");
        let length = arg_i64(gen, "length", 8).max(0) as u32;
        let min_note = arg_i64(gen, "minNote", 60);
        let max_note = arg_i64(gen, "maxNote", 84);
        match ctx.scales.get(name) {
            Some(scale) => events.extend(transforms::generate_scale_based_melody(
                scale,
                length,
                min_note,
                max_note,
                &mut ctx.rng,
            )),
            None => warn!("{}", Error::missing("scale", name)),
        }
    } else if let Some(def) = directive(element, "setTrackMute") {
        let track = arg_str(def, "track", "").to_owned();
        let mute = arg_bool(def, "mute", false);
        ctx.track_mutes.insert(track, mute);
    } else if let Some(def) = directive(element, "parameterAutomation") {
        let controller = arg_i64(def, "controllerNumber", 1).clamp(0, 127) as u8;
        let mut points: Vec<(i64, i64)> = pair_list(def.get("points").unwrap_or(&Value::Null))
            .into_iter()
            .map(|(tick, value)| (tick as i64, value as i64))
            .collect();
        points.sort_by_key(|(tick, _)| *tick);
        ctx.automations.push(ParameterAutomation { controller, points });
    } else if directive_flag(element, "applyParameterAutomation") {
        transforms::apply_parameter_automation(events, &ctx.automations);
    } else if let Some(gen) = directive(element, "generateAdaptiveHarmony") {
        let name = arg_str(gen, "scale", "default");
        let interval = arg_i64(gen, "interval", 4);
        match ctx.scales.get(name) {
            Some(scale) => {
                let harmony = transforms::generate_adaptive_harmony(events, scale, interval);
                events.extend(harmony);
            }
            None => warn!("{}", Error::missing("scale", name)),
        }
    } else if let Some(points) = element.get("defineTempoMap").and_then(Value::as_array) {
        for point in points {
            let tick = arg_i64(point, "tick", 0);
            let tempo = arg_i64(point, "microsecondsPerQuarter", 500_000).clamp(0, 0xFF_FFFF) as u32;
            ctx.tempo_map.points.push((tick, tempo));
        }
        ctx.tempo_map.points.sort_by_key(|(tick, _)| *tick);
    } else if directive_flag(element, "applyTempoMap") {
        transforms::apply_tempo_map(events, &ctx.tempo_map);
    } else if let Some(params) = directive(element, "setRandomizationParams") {
        ctx.randomization.velocity_range = arg_i64(params, "velocityRange", 10);
        ctx.randomization.timing_range = arg_i64(params, "timingRange", 5);
        ctx.randomization.pitch_range = arg_i64(params, "pitchRange", 2);
        ctx.randomization.note_probability = arg_f64(params, "noteProbability", 1.0);
    } else if element.get("applyRandomization").is_some() {
        let value = &element["applyRandomization"];
        if value.is_object() {
            // Simpler two-parameter variant; never drops notes.
            let velocity_range = arg_i64(value, "velocityRange", 10);
            let timing_range = arg_i64(value, "timingRange", 5);
            transforms::apply_controlled_randomization(
                events,
                velocity_range,
                timing_range,
                &mut ctx.rng,
            );
        } else if value.as_bool() == Some(true) {
            transforms::apply_randomization(events, &ctx.randomization, &mut ctx.rng);
        }
    } else if let Some(def) = directive(element, "defineChordProgression") {
        let name = arg_str(def, "name", "default").to_owned();
        let root_note = arg_i64(def, "rootNote", 60);
        let mut chords = Vec::new();
        if let Some(list) = def.get("chords").and_then(Value::as_array) {
            for chord in list {
                chords.push(Chord {
                    notes: i64_list(chord.get("notes").unwrap_or(&Value::Null)),
                    duration: arg_i64(chord, "duration", 0),
                });
            }
        }
        ctx.chord_progressions.insert(name, ChordProgression { root_note, chords });
    } else if let Some(expand) = directive(element, "expandChordProgression") {
        let name = arg_str(expand, "name", "default");
        let arpeggiate = arg_bool(expand, "arpeggiate", false);
        match ctx.chord_progressions.get(name) {
            Some(progression) => {
                events.extend(transforms::expand_chord_progression(progression, arpeggiate));
            }
            None => warn!("{}", Error::missing("chord progression", name)),
        }
    } else if let Some(def) = directive(element, "grooveTemplate") {
        let name = arg_str(def, "name", "default").to_owned();
        let steps = pair_list(def.get("steps").unwrap_or(&Value::Null))
            .into_iter()
            .map(|(timing, velocity)| (timing as i64, velocity as i64))
            .collect();
        ctx.groove_templates.insert(name, GrooveTemplate { steps });
    } else if let Some(name) = directive_str(element, "applyGrooveTemplate") {
        match ctx.groove_templates.get(name) {
            Some(groove) => transforms::apply_groove_template(events, groove),
            None => warn!("{}", Error::missing("groove template", name)),
        }
    } else if let Some(use_pattern) = directive(element, "usePattern") {
        let Some(name) = use_pattern.get("name").and_then(Value::as_str) else {
            warn!("usePattern without a name: {element}");
            return;
        };
        let repetitions = arg_i64(use_pattern, "repetitions", 1).max(0) as u32;
        match patterns.get(name, repetitions) {
            Ok(pattern_events) => events.extend(pattern_events),
            Err(err) => warn!("{err}"),
        }
    } else if let Some(change) = directive(element, "tempoChange") {
        ctx.tempo_changes.push(TempoChange {
            delta_time: arg_i64(change, "deltaTime", 0),
            us_per_quarter: arg_i64(change, "microsecondsPerQuarter", 500_000).clamp(0, 0xFF_FFFF)
                as u32,
        });
    } else if let Some(def) = directive(element, "velocityCurve") {
        let name = arg_str(def, "name", "default").to_owned();
        let velocities = match def.get("velocities") {
            Some(list) => i64_list(list).into_iter().map(|v| v.clamp(0, 127) as u8).collect(),
            None => vec![64, 96, 80, 112],
        };
        ctx.velocity_curves.insert(name, VelocityCurve { velocities });
    } else if let Some(name) = directive_str(element, "applyVelocityCurve") {
        match ctx.velocity_curves.get(name) {
            Some(curve) => transforms::apply_velocity_curve(events, curve),
            None => warn!("{}", Error::missing("velocity curve", name)),
        }
    } else if let Some(conditional) = directive(element, "conditional") {
        let condition = conditional.get("condition").cloned().unwrap_or(Value::Null);
        let kind = condition.get("type").and_then(Value::as_str).unwrap_or("");
        let params = condition.get("parameters").cloned().unwrap_or(Value::Null);

        let taken = match conditions::evaluate(kind, ctx, &params) {
            Ok(result) => result,
            Err(err) => {
                // An unknown condition collapses to the false branch.
                warn!("{err}");
                false
            }
        };
        if taken {
            let branch = expand_stream(conditional.get("ifTrue").unwrap_or(&Value::Null), patterns, ctx);
            events.extend(branch);
        } else if let Some(if_false) = conditional.get("ifFalse") {
            let branch = expand_stream(if_false, patterns, ctx);
            events.extend(branch);
        }
    } else if let Some(loop_def) = directive(element, "loop") {
        let count = arg_i64(loop_def, "count", 1).max(0);
        let empty = Value::Null;
        let body = loop_def.get("events").unwrap_or(&empty);
        for _ in 0..count {
            let iteration = expand_stream(body, patterns, ctx);
            events.extend(iteration);
        }
    } else {
        match parse_literal(element) {
            Ok(event) => {
                ctx.observe(&event);
                events.push(event);
            }
            Err(err) => warn!("{err}"),
        }
    }
}

// Literal payload accessors. A missing field takes the default; a field
// present with the wrong type is a payload error and skips the element.

fn field_i64(element: &Value, payload: &Value, key: &str, default: i64) -> Result<i64, Error> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value.as_i64().ok_or_else(|| Error::Payload {
            field: key.to_string(),
            element: element.to_string(),
        }),
    }
}

fn field_u8(element: &Value, payload: &Value, key: &str, default: i64) -> Result<u8, Error> {
    Ok(field_i64(element, payload, key, default)?.clamp(0, 127) as u8)
}

fn field_str(element: &Value, payload: &Value, key: &str) -> Result<String, Error> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(value) => value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| Error::Payload { field: key.to_string(), element: element.to_string() }),
    }
}

fn channel_of(element: &Value) -> Result<u8, Error> {
    Ok((field_i64(element, element, "channel", 0)? & 0x0F) as u8)
}

fn byte_list(element: &Value, payload: &Value, key: &str) -> Result<Vec<u8>, Error> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_u64().map(|b| b as u8).ok_or_else(|| Error::Payload {
                    field: key.to_string(),
                    element: element.to_string(),
                })
            })
            .collect(),
        Some(Value::String(text)) => Ok(text.as_bytes().to_vec()),
        Some(_) => {
            Err(Error::Payload { field: key.to_string(), element: element.to_string() })
        }
    }
}

fn hex_bytes(element: &Value, text: &str) -> Result<Vec<u8>, Error> {
    let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    cleaned
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| Error::Payload {
                    field: "sysex".to_string(),
                    element: element.to_string(),
                })
        })
        .collect()
}

/// Parse one event literal. The element matches by the presence of a key
/// naming the kind; `delta` defaults to 0 and `channel` is read from the
/// element level for channel-voice kinds.
fn parse_literal(element: &Value) -> Result<Event, Error> {
    let delta = field_i64(element, element, "delta", 0)?;

    let kind = if let Some(payload) = directive(element, "noteOn") {
        EventKind::NoteOn {
            channel: channel_of(element)?,
            note: field_u8(element, payload, "noteNumber", 0)?,
            velocity: field_u8(element, payload, "velocity", 0)?,
        }
    } else if let Some(payload) = directive(element, "noteOff") {
        EventKind::NoteOff {
            channel: channel_of(element)?,
            note: field_u8(element, payload, "noteNumber", 0)?,
            velocity: field_u8(element, payload, "velocity", 0)?,
        }
    } else if let Some(payload) = directive(element, "marker") {
        EventKind::Marker(field_str(element, payload, "text")?)
    } else if let Some(payload) = directive(element, "controlChange") {
        // The legacy compile key for the controller number was "type".
        let controller = match payload.get("controllerNumber") {
            Some(_) => field_u8(element, payload, "controllerNumber", 0)?,
            None => field_u8(element, payload, "type", 0)?,
        };
        EventKind::ControlChange {
            channel: channel_of(element)?,
            controller,
            value: field_u8(element, payload, "value", 0)?,
        }
    } else if let Some(payload) = directive(element, "programChange") {
        EventKind::ProgramChange {
            channel: channel_of(element)?,
            program: field_u8(element, payload, "programNumber", 0)?,
        }
    } else if let Some(payload) = directive(element, "setTempo") {
        EventKind::SetTempo(
            field_i64(element, payload, "microsecondsPerQuarter", 500_000)?.clamp(0, 0xFF_FFFF)
                as u32,
        )
    } else if let Some(channel) = element.get("midiChannelPrefix").and_then(Value::as_i64) {
        EventKind::MidiChannelPrefix((channel & 0x0F) as u8)
    } else if let Some(payload) = directive(element, "timeSignature") {
        let thirty_seconds = match payload.get("thirtySeconds") {
            Some(_) => field_u8(element, payload, "thirtySeconds", 8)?,
            None => field_u8(element, payload, "thirtyseconds", 8)?,
        };
        EventKind::TimeSignature {
            numerator: field_i64(element, payload, "numerator", 4)?.clamp(0, 255) as u8,
            denominator: field_i64(element, payload, "denominator", 4)?.clamp(0, 255) as u8,
            metronome: field_i64(element, payload, "metronome", 24)?.clamp(0, 255) as u8,
            thirty_seconds,
        }
    } else if let Some(payload) = directive(element, "polyphonicKeyPressure") {
        EventKind::PolyphonicKeyPressure {
            channel: channel_of(element)?,
            note: field_u8(element, payload, "noteNumber", 0)?,
            pressure: field_u8(element, payload, "pressure", 0)?,
        }
    } else if let Some(payload) = directive(element, "keySignature") {
        let minor = match payload.get("scale") {
            Some(Value::String(scale)) => scale == "minor",
            Some(value) => value.as_i64().unwrap_or(0) != 0,
            None => false,
        };
        EventKind::KeySignature {
            key: field_i64(element, payload, "key", 0)?.clamp(-7, 7) as i8,
            minor,
        }
    } else if let Some(payload) = directive(element, "sysex") {
        EventKind::Sysex(byte_list(element, payload, "data")?)
    } else if let Some(text) = element.get("sysex").and_then(Value::as_str) {
        EventKind::Sysex(hex_bytes(element, text)?)
    } else if let Some(channel) = element.get("channelPrefix").and_then(Value::as_i64) {
        EventKind::MidiChannelPrefix((channel & 0x0F) as u8)
    } else if let Some(port) = element.get("midiPort").and_then(Value::as_i64) {
        EventKind::MidiPort(port.clamp(0, 255) as u8)
    } else if element.get("endOfTrack").is_some() {
        EventKind::EndOfTrack
    } else if let Some(value) = element.get("pitchBend") {
        let bend = if let Some(number) = value.as_i64() {
            number
        } else if value.is_object() {
            field_i64(element, value, "value", 0)?
        } else {
            return Err(Error::Payload {
                field: "pitchBend".to_string(),
                element: element.to_string(),
            });
        };
        EventKind::PitchBend {
            channel: channel_of(element)?,
            value: bend.clamp(-8192, 8191) as i16,
        }
    } else if let Some(value) = element.get("trackName") {
        match value {
            Value::String(text) => EventKind::TrackName(text.clone()),
            payload if payload.is_object() => {
                EventKind::TrackName(field_str(element, payload, "text")?)
            }
            _ => {
                return Err(Error::Payload {
                    field: "trackName".to_string(),
                    element: element.to_string(),
                })
            }
        }
    } else if let Some(payload) = directive(element, "channelPressure") {
        EventKind::ChannelPressure {
            channel: channel_of(element)?,
            pressure: field_u8(element, payload, "pressure", 0)?,
        }
    } else if let Some(payload) = directive(element, "metaText") {
        EventKind::MetaText {
            subtype: field_i64(element, payload, "subtype", 0x01)?.clamp(0, 255) as u8,
            text: field_str(element, payload, "text")?,
        }
    } else if let Some(payload) = directive(element, "sequencerSpecific") {
        EventKind::SequencerSpecific(byte_list(element, payload, "data")?)
    } else if let Some(payload) = directive(element, "smpteOffset") {
        let sub_frame = match payload.get("subFrame") {
            Some(_) => field_u8(element, payload, "subFrame", 0)?,
            None => field_u8(element, payload, "fractionalFrame", 0)?,
        };
        EventKind::SmpteOffset {
            hour: field_u8(element, payload, "hour", 0)?,
            minute: field_u8(element, payload, "minute", 0)?,
            second: field_u8(element, payload, "second", 0)?,
            frame: field_u8(element, payload, "frame", 0)?,
            sub_frame,
        }
    } else if let Some(payload) = directive(element, "cuePoint") {
        EventKind::CuePoint(field_str(element, payload, "text")?)
    } else if let Some(value) = element.get("deviceName") {
        match value {
            Value::String(text) => EventKind::DeviceName(text.clone()),
            payload if payload.is_object() => {
                EventKind::DeviceName(field_str(element, payload, "text")?)
            }
            _ => {
                return Err(Error::Payload {
                    field: "deviceName".to_string(),
                    element: element.to_string(),
                })
            }
        }
    } else if let Some(payload) = directive(element, "channelAftertouch") {
        // Legacy alias; the wire form matches polyphonic key pressure.
        EventKind::PolyphonicKeyPressure {
            channel: channel_of(element)?,
            note: field_u8(element, payload, "noteNumber", 0)?,
            pressure: field_u8(element, payload, "pressure", 0)?,
        }
    } else if let Some(position) = element.get("songPositionPointer").and_then(Value::as_i64) {
        EventKind::SongPositionPointer(position.clamp(0, 16383) as u16)
    } else if let Some(text) = element.get("sequencerSpecificData").and_then(Value::as_str) {
        EventKind::SequencerSpecific(text.as_bytes().to_vec())
    } else if let Some(value) = element.get("songSelect") {
        let song = if let Some(number) = value.as_i64() {
            number
        } else if value.is_object() {
            field_i64(element, value, "songNumber", 0)?
        } else {
            return Err(Error::Payload {
                field: "songSelect".to_string(),
                element: element.to_string(),
            });
        };
        EventKind::SongSelect(song.clamp(0, 127) as u8)
    } else if element.get("tuneRequest").is_some() {
        EventKind::TuneRequest
    } else if element.get("timingClock").is_some() {
        EventKind::TimingClock
    } else if element.get("start").is_some() {
        EventKind::Start
    } else if element.get("continue").is_some() {
        EventKind::Continue
    } else if element.get("stop").is_some() {
        EventKind::Stop
    } else if element.get("activeSensing").is_some() {
        EventKind::ActiveSensing
    } else if element.get("systemReset").is_some() {
        EventKind::SystemReset
    } else if let Some(number) = element.get("sequenceNumber").and_then(Value::as_i64) {
        EventKind::SequenceNumber(number.clamp(0, 0xFFFF) as u16)
    } else if let Some(text) = element.get("text").and_then(Value::as_str) {
        EventKind::MetaText { subtype: 0x01, text: text.to_owned() }
    } else if let Some(text) = element.get("copyrightNotice").and_then(Value::as_str) {
        EventKind::MetaText { subtype: 0x02, text: text.to_owned() }
    } else if let Some(text) = element.get("instrumentName").and_then(Value::as_str) {
        EventKind::MetaText { subtype: 0x04, text: text.to_owned() }
    } else if let Some(text) = element.get("lyric").and_then(Value::as_str) {
        EventKind::MetaText { subtype: 0x05, text: text.to_owned() }
    } else if let Some(text) = element.get("programName").and_then(Value::as_str) {
        EventKind::MetaText { subtype: 0x08, text: text.to_owned() }
    } else {
        return Err(Error::UnknownDirective(element.to_string()));
    };

    Ok(Event::new(delta, kind))
}
