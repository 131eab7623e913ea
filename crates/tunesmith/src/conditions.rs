//! Condition evaluator: pure predicates over the compilation context's
//! observation state, keyed by condition-kind string.

use serde_json::Value;

use crate::context::Context;
use crate::error::Error;

fn param_i64(params: &Value, key: &str, default: i64) -> i64 {
    params.get(key).and_then(Value::as_i64).unwrap_or(default)
}

fn param_f64(params: &Value, key: &str, default: f64) -> f64 {
    params.get(key).and_then(Value::as_f64).unwrap_or(default)
}

fn param_str<'a>(params: &'a Value, key: &str, default: &'a str) -> &'a str {
    params.get(key).and_then(Value::as_str).unwrap_or(default)
}

fn param_i64_list(params: &Value, key: &str) -> Vec<i64> {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default()
}

/// Evaluate the condition `kind` against the context. Unknown kinds are an
/// error; the expander decides how to degrade.
pub fn evaluate(kind: &str, ctx: &Context, params: &Value) -> Result<bool, Error> {
    let result = match kind {
        "noteCount" => {
            let note = param_i64(params, "noteNumber", 0).clamp(0, 127) as u8;
            let count = param_i64(params, "count", 0);
            ctx.note_count(note) as i64 >= count
        }
        "totalNoteCount" => {
            let count = param_i64(params, "count", 0);
            let total: i64 = ctx.note_counts.values().map(|c| *c as i64).sum();
            total >= count
        }
        "noteInRange" => {
            let min = param_i64(params, "minNote", 0);
            let max = param_i64(params, "maxNote", 127);
            ctx.note_counts
                .iter()
                .any(|(note, count)| (min..=max).contains(&(*note as i64)) && *count > 0)
        }
        "noteCountInRange" => {
            let min = param_i64(params, "minNote", 0);
            let max = param_i64(params, "maxNote", 127);
            let min_count = param_i64(params, "minCount", 1);
            ctx.note_counts.iter().any(|(note, count)| {
                (min..=max).contains(&(*note as i64)) && *count as i64 >= min_count
            })
        }
        "specificNoteSequence" => {
            let wanted = param_i64_list(params, "sequence");
            ctx.note_sequence.len() >= wanted.len()
                && ctx.note_sequence[ctx.note_sequence.len() - wanted.len()..]
                    .iter()
                    .zip(&wanted)
                    .all(|(observed, want)| *observed as i64 == *want)
        }
        "noteVariety" => {
            let min_variety = param_i64(params, "minVariety", 1);
            ctx.note_counts.len() as i64 >= min_variety
        }
        "intervalBetweenNotes" => {
            let interval = param_i64(params, "interval", 0);
            match ctx.note_sequence.as_slice() {
                [.., a, b] => (*a as i64 - *b as i64).abs() == interval,
                _ => false,
            }
        }
        "noteRepetition" => {
            let repetitions = param_i64(params, "repetitions", 2).max(0) as usize;
            match ctx.note_sequence.last() {
                Some(last) if ctx.note_sequence.len() >= repetitions => ctx.note_sequence
                    [ctx.note_sequence.len() - repetitions..]
                    .iter()
                    .all(|note| note == last),
                _ => false,
            }
        }
        "noteProgression" => {
            let direction = param_str(params, "direction", "ascending");
            let length = param_i64(params, "length", 2).max(0) as usize;
            if ctx.note_sequence.len() < length {
                false
            } else {
                let tail = &ctx.note_sequence[ctx.note_sequence.len() - length..];
                match direction {
                    "ascending" => tail.windows(2).all(|w| w[0] <= w[1]),
                    "descending" => tail.windows(2).all(|w| w[0] >= w[1]),
                    _ => false,
                }
            }
        }
        "chordPresence" => {
            let chord = param_i64_list(params, "chord");
            chord.iter().all(|note| {
                (0..=127).contains(note) && ctx.note_counts.contains_key(&(*note as u8))
            })
        }
        "timeElapsed" => {
            let time = param_i64(params, "time", 0);
            ctx.total_delta_time >= time
        }
        "noteRange" => {
            let min = param_i64(params, "minNote", 0);
            let max = param_i64(params, "maxNote", 127);
            let lowest = ctx.note_counts.keys().min();
            let highest = ctx.note_counts.keys().max();
            match (lowest, highest) {
                (Some(lo), Some(hi)) => *lo as i64 >= min && *hi as i64 <= max,
                _ => false,
            }
        }
        "rhythmicPattern" => {
            // Deltas match the pattern tail within a 5-tick tolerance.
            let pattern = param_i64_list(params, "pattern");
            ctx.delta_time_sequence.len() >= pattern.len()
                && ctx.delta_time_sequence[ctx.delta_time_sequence.len() - pattern.len()..]
                    .iter()
                    .zip(&pattern)
                    .all(|(observed, want)| (observed - want).abs() <= 5)
        }
        "polyphony" => {
            let min_voices = param_i64(params, "minVoices", 1);
            let max_voices = param_i64(params, "maxVoices", 127);
            (min_voices..=max_voices).contains(&ctx.current_polyphony)
        }
        "velocityRange" => {
            let min = param_i64(params, "minVelocity", 0);
            let max = param_i64(params, "maxVelocity", 127);
            ctx.min_velocity as i64 >= min && ctx.max_velocity as i64 <= max
        }
        "scaleAdherence" => {
            let scale = {
                let given = param_i64_list(params, "scale");
                if given.is_empty() { vec![0, 2, 4, 5, 7, 9, 11] } else { given }
            };
            let root = param_i64(params, "rootNote", 0);
            let classes: Vec<i64> = scale.iter().map(|i| (root + i).rem_euclid(12)).collect();
            ctx.note_counts
                .keys()
                .all(|note| classes.contains(&((*note as i64).rem_euclid(12))))
        }
        "uniqueNoteCount" => {
            let min_unique = param_i64(params, "minUnique", 1);
            let max_unique = param_i64(params, "maxUnique", 127);
            (min_unique..=max_unique).contains(&(ctx.note_counts.len() as i64))
        }
        "noteRatio" => {
            let note1 = param_i64(params, "note1", 60).clamp(0, 127) as u8;
            let note2 = param_i64(params, "note2", 64).clamp(0, 127) as u8;
            let ratio = param_f64(params, "ratio", 1.0);
            let epsilon = param_f64(params, "epsilon", 0.1);
            let count1 = ctx.note_count(note1);
            let count2 = ctx.note_count(note2);
            count2 != 0 && (count1 as f64 / count2 as f64 - ratio).abs() <= epsilon
        }
        "controllerValue" => {
            let controller = param_i64(params, "controller", 0).clamp(0, 127) as u8;
            let min = param_i64(params, "minValue", 0);
            let max = param_i64(params, "maxValue", 127);
            match ctx.controller_values.get(&controller) {
                Some(value) => (min..=max).contains(&(*value as i64)),
                None => false,
            }
        }
        _ => return Err(Error::UnknownCondition(kind.to_string())),
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventKind};
    use serde_json::json;

    fn ctx_with_notes(notes: &[(u8, u8)]) -> Context {
        let mut ctx = Context::new(Some(7));
        for (note, velocity) in notes {
            ctx.observe(&Event::new(
                120,
                EventKind::NoteOn { channel: 0, note: *note, velocity: *velocity },
            ));
        }
        ctx
    }

    #[test]
    fn note_count_threshold() {
        let ctx = ctx_with_notes(&[(60, 100), (60, 100), (60, 100)]);
        let params = json!({ "noteNumber": 60, "count": 3 });
        assert!(evaluate("noteCount", &ctx, &params).unwrap());
        let params = json!({ "noteNumber": 60, "count": 4 });
        assert!(!evaluate("noteCount", &ctx, &params).unwrap());
    }

    #[test]
    fn sequence_and_progression() {
        let ctx = ctx_with_notes(&[(60, 100), (62, 100), (64, 100)]);
        assert!(evaluate("specificNoteSequence", &ctx, &json!({ "sequence": [62, 64] })).unwrap());
        assert!(!evaluate("specificNoteSequence", &ctx, &json!({ "sequence": [60, 64] })).unwrap());
        assert!(evaluate(
            "noteProgression",
            &ctx,
            &json!({ "direction": "ascending", "length": 3 })
        )
        .unwrap());
        assert!(!evaluate(
            "noteProgression",
            &ctx,
            &json!({ "direction": "descending", "length": 3 })
        )
        .unwrap());
    }

    #[test]
    fn interval_and_repetition() {
        let ctx = ctx_with_notes(&[(60, 100), (67, 100)]);
        assert!(evaluate("intervalBetweenNotes", &ctx, &json!({ "interval": 7 })).unwrap());

        let ctx = ctx_with_notes(&[(60, 100), (71, 100), (71, 100), (71, 100)]);
        assert!(evaluate("noteRepetition", &ctx, &json!({ "repetitions": 3 })).unwrap());
        assert!(!evaluate("noteRepetition", &ctx, &json!({ "repetitions": 4 })).unwrap());
    }

    #[test]
    fn ranges_and_variety() {
        let ctx = ctx_with_notes(&[(60, 90), (64, 110), (67, 100)]);
        assert!(evaluate("noteRange", &ctx, &json!({ "minNote": 60, "maxNote": 72 })).unwrap());
        assert!(!evaluate("noteRange", &ctx, &json!({ "minNote": 61, "maxNote": 72 })).unwrap());
        assert!(evaluate("noteVariety", &ctx, &json!({ "minVariety": 3 })).unwrap());
        assert!(evaluate("uniqueNoteCount", &ctx, &json!({ "minUnique": 2, "maxUnique": 3 })).unwrap());
        assert!(evaluate(
            "velocityRange",
            &ctx,
            &json!({ "minVelocity": 90, "maxVelocity": 110 })
        )
        .unwrap());
        assert!(evaluate("chordPresence", &ctx, &json!({ "chord": [60, 64, 67] })).unwrap());
        assert!(!evaluate("chordPresence", &ctx, &json!({ "chord": [60, 63] })).unwrap());
    }

    #[test]
    fn scale_adherence_and_ratio() {
        let ctx = ctx_with_notes(&[(60, 100), (64, 100), (60, 100)]);
        assert!(evaluate(
            "scaleAdherence",
            &ctx,
            &json!({ "scale": [0, 2, 4, 5, 7, 9, 11], "rootNote": 60 })
        )
        .unwrap());
        assert!(evaluate(
            "noteRatio",
            &ctx,
            &json!({ "note1": 60, "note2": 64, "ratio": 2.0, "epsilon": 0.1 })
        )
        .unwrap());
    }

    #[test]
    fn time_polyphony_controller() {
        let mut ctx = ctx_with_notes(&[(60, 100), (64, 100)]);
        ctx.observe(&Event::new(
            0,
            EventKind::ControlChange { channel: 0, controller: 1, value: 64 },
        ));
        assert!(evaluate("timeElapsed", &ctx, &json!({ "time": 240 })).unwrap());
        assert!(!evaluate("timeElapsed", &ctx, &json!({ "time": 241 })).unwrap());
        assert!(evaluate("polyphony", &ctx, &json!({ "minVoices": 2, "maxVoices": 4 })).unwrap());
        assert!(evaluate(
            "controllerValue",
            &ctx,
            &json!({ "controller": 1, "minValue": 60, "maxValue": 70 })
        )
        .unwrap());
        assert!(!evaluate(
            "controllerValue",
            &ctx,
            &json!({ "controller": 2, "minValue": 0, "maxValue": 127 })
        )
        .unwrap());
    }

    #[test]
    fn rhythmic_pattern_tolerance() {
        let ctx = ctx_with_notes(&[(60, 100), (62, 100), (64, 100)]);
        assert!(evaluate("rhythmicPattern", &ctx, &json!({ "pattern": [118, 124] })).unwrap());
        assert!(!evaluate("rhythmicPattern", &ctx, &json!({ "pattern": [100, 120] })).unwrap());
    }

    #[test]
    fn unknown_condition_errors() {
        let ctx = Context::new(Some(1));
        assert!(matches!(
            evaluate("fullMoon", &ctx, &json!({})),
            Err(Error::UnknownCondition(kind)) if kind == "fullMoon"
        ));
    }
}
