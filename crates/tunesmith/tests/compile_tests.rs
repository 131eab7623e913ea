//! End-to-end compile scenarios, checked at the byte level.

use serde_json::json;
use tunesmith::compile;

/// One middle C for a quarter note, format 0. The full byte image is
/// pinned, header through end-of-track.
#[test]
fn minimal_single_note() {
    let doc = json!({
        "format": 0,
        "division": 480,
        "tracks": [[
            { "delta": 0, "noteOn": { "noteNumber": 60, "velocity": 64 }, "channel": 0 },
            { "delta": 480, "noteOff": { "noteNumber": 60, "velocity": 0 }, "channel": 0 },
            { "endOfTrack": true, "delta": 0 }
        ]]
    });
    let bytes = compile(&doc, None).unwrap();
    let expected: Vec<u8> = vec![
        0x4D, 0x54, 0x68, 0x64, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x01, 0x01, 0xE0, 0x4D,
        0x54, 0x72, 0x6B, 0x00, 0x00, 0x00, 0x0D, 0x00, 0x90, 0x3C, 0x40, 0x83, 0x60, 0x80, 0x3C,
        0x00, 0x00, 0xFF, 0x2F, 0x00,
    ];
    assert_eq!(bytes, expected);
}

#[test]
fn varlen_boundary_delta() {
    let doc = json!({
        "format": 0,
        "tracks": [[
            { "delta": 0x0FFF_FFFF, "marker": { "text": "" } },
            { "endOfTrack": true }
        ]]
    });
    let bytes = compile(&doc, None).unwrap();
    // Track body starts right after the 8-byte MTrk header at offset 14.
    assert_eq!(&bytes[22..26], &[0xFF, 0xFF, 0xFF, 0x7F]);
}

#[test]
fn arpeggiator_scenario() {
    let doc = json!({
        "format": 0,
        "tracks": [[
            { "defineArpeggiator": { "name": "a", "mode": "up", "octaveRange": 1, "noteDuration": 120 } },
            { "applyArpeggiator": { "name": "a", "chord": [
                { "delta": 0, "noteOn": { "noteNumber": 60, "velocity": 100 }, "channel": 0 },
                { "delta": 0, "noteOn": { "noteNumber": 64, "velocity": 100 }, "channel": 0 },
                { "delta": 0, "noteOn": { "noteNumber": 67, "velocity": 100 }, "channel": 0 },
                { "delta": 480, "noteOff": { "noteNumber": 60, "velocity": 0 }, "channel": 0 }
            ]}},
            { "endOfTrack": true }
        ]]
    });
    let bytes = compile(&doc, None).unwrap();

    // 4 pairs: 60, 64, 67, 72 at 120-tick steps.
    let note_ons: Vec<u8> = bytes
        .windows(3)
        .filter(|w| w[0] == 0x90)
        .map(|w| w[1])
        .collect();
    assert_eq!(note_ons, vec![60, 64, 67, 72]);
}

#[test]
fn conditional_note_count_scenario() {
    let doc = json!({
        "format": 0,
        "tracks": [[
            { "delta": 0, "noteOn": { "noteNumber": 60, "velocity": 80 }, "channel": 0 },
            { "delta": 0, "noteOn": { "noteNumber": 60, "velocity": 80 }, "channel": 0 },
            { "delta": 0, "noteOn": { "noteNumber": 60, "velocity": 80 }, "channel": 0 },
            { "conditional": {
                "condition": { "type": "noteCount", "parameters": { "noteNumber": 60, "count": 3 } },
                "ifTrue": [ { "delta": 0, "marker": { "text": "reached" } } ]
            }},
            { "endOfTrack": true }
        ]]
    });
    let bytes = compile(&doc, None).unwrap();
    let marker_pos = bytes.windows(2).position(|w| w == [0xFF, 0x06]);
    assert!(marker_pos.is_some(), "marker meta event should be present");
    let pos = marker_pos.unwrap();
    assert_eq!(&bytes[pos + 3..pos + 10], b"reached");
}

#[test]
fn muted_track_has_no_note_status_bytes() {
    let doc = json!({
        "format": 0,
        "division": 480,
        "tracks": [[
            { "delta": 0, "noteOn": { "noteNumber": 60, "velocity": 100 }, "channel": 0 },
            { "delta": 480, "noteOff": { "noteNumber": 60, "velocity": 0 }, "channel": 0 },
            { "endOfTrack": true, "delta": 0 }
        ]],
        "trackMuting": { "Track1": true }
    });
    let bytes = compile(&doc, None).unwrap();
    // Both note events are neutered: only their deltas and the end of
    // track remain in the body.
    let body = &bytes[22..];
    assert_eq!(body, &[0x00, 0x83, 0x60, 0x00, 0xFF, 0x2F, 0x00]);
}

#[test]
fn polyrhythm_density_property() {
    let doc = json!({
        "format": 0,
        "tracks": [[
            { "definePolyrhythm": { "name": "p", "rhythms": [3, 4], "patterns": [
                [ { "delta": 0, "noteOn": { "noteNumber": 60, "velocity": 100 }, "channel": 0 } ],
                [ { "delta": 0, "noteOn": { "noteNumber": 72, "velocity": 100 }, "channel": 0 } ]
            ]}},
            { "generatePolyrhythm": { "name": "p", "measures": 2 } },
            { "endOfTrack": true }
        ]]
    });
    let bytes = compile(&doc, None).unwrap();
    let note_on_count = bytes.windows(3).filter(|w| w[0] == 0x90).count();
    // LCM(3,4)=12: (12/3 + 12/4) events per measure, twice.
    assert_eq!(note_on_count, 2 * (4 + 3));
}

#[test]
fn unknown_elements_are_skipped_not_fatal() {
    let doc = json!({
        "format": 0,
        "tracks": [[
            { "delta": 0, "noSuchEvent": { "x": 1 } },
            { "delta": 0, "noteOn": { "noteNumber": 60, "velocity": 64 }, "channel": 0 },
            { "delta": 480, "noteOff": { "noteNumber": 60, "velocity": 0 }, "channel": 0 },
            { "endOfTrack": true }
        ]]
    });
    let bytes = compile(&doc, None).unwrap();
    assert_eq!(bytes.windows(3).filter(|w| w[0] == 0x90).count(), 1);
}

#[test]
fn tempo_map_and_automation_emit_wire_events() {
    let doc = json!({
        "format": 0,
        "tracks": [[
            { "defineTempoMap": [
                { "tick": 0, "microsecondsPerQuarter": 500000 },
                { "tick": 960, "microsecondsPerQuarter": 400000 }
            ]},
            { "parameterAutomation": { "controllerNumber": 11, "points": [[0, 0], [960, 64]] } },
            { "delta": 0, "noteOn": { "noteNumber": 60, "velocity": 100 }, "channel": 0 },
            { "delta": 960, "noteOff": { "noteNumber": 60, "velocity": 0 }, "channel": 0 },
            { "applyTempoMap": true },
            { "applyParameterAutomation": true },
            { "endOfTrack": true }
        ]]
    });
    let bytes = compile(&doc, None).unwrap();
    assert!(bytes.windows(3).any(|w| w == [0xFF, 0x51, 0x03]));
    assert!(bytes.windows(2).any(|w| w == [0xB0, 11]));
}

#[test]
fn output_parses_with_midly() {
    let doc = json!({
        "format": 1,
        "tracks": [
            [
                { "delta": 0, "setTempo": { "microsecondsPerQuarter": 500000 } },
                { "delta": 0, "timeSignature": { "numerator": 4, "denominator": 4 } },
                { "endOfTrack": true }
            ],
            [
                { "delta": 0, "trackName": "Lead" },
                { "delta": 0, "noteOn": { "noteNumber": 60, "velocity": 100 }, "channel": 0 },
                { "delta": 480, "noteOff": { "noteNumber": 60, "velocity": 0 }, "channel": 0 },
                { "endOfTrack": true }
            ]
        ]
    });
    let bytes = compile(&doc, None).unwrap();
    let smf = midly::Smf::parse(&bytes).expect("generated SMF should be valid");
    assert_eq!(smf.header.format, midly::Format::Parallel);
    assert_eq!(smf.tracks.len(), 2);
}
