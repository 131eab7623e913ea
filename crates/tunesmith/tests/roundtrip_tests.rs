//! Decompile-then-recompile round trips over the lossless kind subset.

use serde_json::json;
use tunesmith::{compile, decompile};

fn round_trip(bytes: &[u8]) -> Vec<u8> {
    let doc = decompile(bytes).expect("decompile should succeed");
    compile(&doc, None).expect("recompile should succeed")
}

#[test]
fn single_note_round_trips_byte_identical() {
    let bytes: Vec<u8> = vec![
        0x4D, 0x54, 0x68, 0x64, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x01, 0x01, 0xE0, 0x4D,
        0x54, 0x72, 0x6B, 0x00, 0x00, 0x00, 0x0D, 0x00, 0x90, 0x3C, 0x40, 0x83, 0x60, 0x80, 0x3C,
        0x00, 0x00, 0xFF, 0x2F, 0x00,
    ];
    assert_eq!(round_trip(&bytes), bytes);
}

#[test]
fn compiled_document_round_trips() {
    let doc = json!({
        "format": 1,
        "division": 960,
        "tracks": [
            [
                { "delta": 0, "setTempo": { "microsecondsPerQuarter": 480000 } },
                { "delta": 0, "keySignature": { "key": 2, "scale": "major" } },
                { "delta": 0, "trackName": "Tempo" },
                { "endOfTrack": true }
            ],
            [
                { "delta": 0, "programChange": { "programNumber": 33 }, "channel": 1 },
                { "delta": 0, "controlChange": { "controllerNumber": 7, "value": 100 }, "channel": 1 },
                { "delta": 0, "noteOn": { "noteNumber": 45, "velocity": 96 }, "channel": 1 },
                { "delta": 240, "pitchBend": 2000, "channel": 1 },
                { "delta": 240, "noteOff": { "noteNumber": 45, "velocity": 64 }, "channel": 1 },
                { "delta": 0, "channelPressure": { "pressure": 50 }, "channel": 1 },
                { "delta": 0, "polyphonicKeyPressure": { "noteNumber": 45, "pressure": 10 }, "channel": 1 },
                { "delta": 0, "marker": { "text": "coda" } },
                { "delta": 0, "cuePoint": { "text": "hit" } },
                { "delta": 0, "midiChannelPrefix": 1 },
                { "delta": 0, "midiPort": 2 },
                { "delta": 0, "sequencerSpecific": { "data": [1, 2, 3] } },
                { "delta": 0, "sysex": { "data": [0x7E, 0x7F, 0x09, 0x01] } },
                { "delta": 0, "smpteOffset": { "hour": 1, "minute": 2, "second": 3, "frame": 4, "subFrame": 5 } },
                { "endOfTrack": true }
            ]
        ]
    });
    let first = compile(&doc, None).unwrap();
    assert_eq!(round_trip(&first), first);
}

#[test]
fn note_on_velocity_zero_is_canonicalized_once() {
    // 0x90 with velocity 0 decodes as a noteOff and stays one from then on.
    let body: Vec<u8> = vec![
        0x00, 0x90, 0x3C, 0x40, 0x60, 0x90, 0x3C, 0x00, 0x00, 0xFF, 0x2F, 0x00,
    ];
    let mut bytes = vec![
        0x4D, 0x54, 0x68, 0x64, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x01, 0x01, 0xE0,
    ];
    bytes.extend_from_slice(b"MTrk");
    bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
    bytes.extend_from_slice(&body);

    let doc = decompile(&bytes).unwrap();
    let track = doc["tracks"][0].as_array().unwrap();
    assert!(track.iter().all(|e| e.get("noteOn").map_or(
        true,
        |n| n["velocity"].as_u64().unwrap_or(0) > 0
    )));

    // The rewrite makes the recompiled file differ only in that status
    // byte: 0x90 vel 0 becomes 0x80 vel 0. A second round trip is stable.
    let once = compile(&doc, None).unwrap();
    assert_eq!(round_trip(&once), once);
}

#[test]
fn running_status_input_round_trips_to_full_status() {
    // Input compressed with running status; output always carries full
    // status bytes, after which it round trips byte identically.
    let body: Vec<u8> = vec![
        0x00, 0x90, 0x3C, 0x64, 0x60, 0x3C, 0x00, 0x00, 0x3E, 0x64, 0x60, 0x3E, 0x00, 0x00, 0xFF,
        0x2F, 0x00,
    ];
    let mut bytes = vec![
        0x4D, 0x54, 0x68, 0x64, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x01, 0x01, 0xE0,
    ];
    bytes.extend_from_slice(b"MTrk");
    bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
    bytes.extend_from_slice(&body);

    let expanded = round_trip(&bytes);
    assert!(expanded.len() > bytes.len());
    assert_eq!(round_trip(&expanded), expanded);
}

#[test]
fn decoder_text_metas_recompile() {
    let body: Vec<u8> = [
        &[0x00, 0xFF, 0x01, 0x05, b'h', b'e', b'l', b'l', b'o'][..],
        &[0x00, 0xFF, 0x02, 0x03, b'(', b'c', b')'][..],
        &[0x00, 0xFF, 0x04, 0x04, b'o', b'b', b'o', b'e'][..],
        &[0x00, 0xFF, 0x05, 0x02, b'l', b'a'][..],
        &[0x00, 0xFF, 0x08, 0x03, b'G', b'M', b'1'][..],
        &[0x00, 0xFF, 0x2F, 0x00][..],
    ]
    .concat();
    let mut bytes = vec![
        0x4D, 0x54, 0x68, 0x64, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x01, 0x01, 0xE0,
    ];
    bytes.extend_from_slice(b"MTrk");
    bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
    bytes.extend_from_slice(&body);

    assert_eq!(round_trip(&bytes), bytes);
}

#[test]
fn format_and_division_pass_through() {
    let doc = json!({
        "format": 2,
        "division": 96,
        "tracks": [[ { "endOfTrack": true } ]]
    });
    let bytes = compile(&doc, None).unwrap();
    let decoded = decompile(&bytes).unwrap();
    assert_eq!(decoded["format"], 2);
    assert_eq!(decoded["division"], 96);
}
