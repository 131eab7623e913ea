//! Standard MIDI File encoder.
//!
//! Writes `MThd` and `MTrk` chunks from flat event sequences. Every event
//! carries its full status byte; running-status compression is not used.
//! Track lengths are exact: each track body is buffered, then emitted
//! behind its chunk header.

use crate::event::{Event, EventKind};
use crate::vlq;

/// Serialize a complete SMF byte stream.
///
/// `division` is written verbatim, so negative SMPTE divisions pass
/// through as their two's-complement u16 image.
pub fn write_file(tracks: &[Vec<Event>], format: u16, division: u16) -> Vec<u8> {
    let mut out = Vec::new();

    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes());
    out.extend_from_slice(&format.to_be_bytes());
    out.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
    out.extend_from_slice(&division.to_be_bytes());

    for track in tracks {
        let body = encode_track(track);
        out.extend_from_slice(b"MTrk");
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
    }

    out
}

/// Encode one track body (delta + event bytes, no chunk header).
pub fn encode_track(events: &[Event]) -> Vec<u8> {
    let mut body = Vec::new();
    for event in events {
        vlq::encode(&mut body, event.delta.max(0) as u32);
        encode_event(&mut body, &event.kind);
    }
    body
}

fn meta_text(buf: &mut Vec<u8>, subtype: u8, text: &str) {
    buf.push(0xFF);
    buf.push(subtype);
    vlq::encode(buf, text.len() as u32);
    buf.extend_from_slice(text.as_bytes());
}

/// Append the wire form of one event. Silent note kinds emit nothing.
fn encode_event(buf: &mut Vec<u8>, kind: &EventKind) {
    match kind {
        EventKind::NoteOn { channel, note, velocity } => {
            buf.push(0x90 | (channel & 0x0F));
            buf.push(*note);
            buf.push(*velocity);
        }
        EventKind::NoteOff { channel, note, velocity } => {
            buf.push(0x80 | (channel & 0x0F));
            buf.push(*note);
            buf.push(*velocity);
        }
        EventKind::PolyphonicKeyPressure { channel, note, pressure } => {
            buf.push(0xA0 | (channel & 0x0F));
            buf.push(*note);
            buf.push(*pressure);
        }
        EventKind::ControlChange { channel, controller, value } => {
            buf.push(0xB0 | (channel & 0x0F));
            buf.push(*controller);
            buf.push(*value);
        }
        EventKind::ProgramChange { channel, program } => {
            buf.push(0xC0 | (channel & 0x0F));
            buf.push(program & 0x7F);
        }
        EventKind::ChannelPressure { channel, pressure } => {
            buf.push(0xD0 | (channel & 0x0F));
            buf.push(*pressure);
        }
        EventKind::PitchBend { channel, value } => {
            // 14-bit wire value, recentered from the signed convention.
            buf.push(0xE0 | (channel & 0x0F));
            let adjusted = (*value as i32 + 8192).clamp(0, 16383) as u16;
            buf.push((adjusted & 0x7F) as u8);
            buf.push(((adjusted >> 7) & 0x7F) as u8);
        }

        // Muted note edges are kept in the stream for timing but never hit
        // the wire.
        EventKind::SilentNoteOn { .. } | EventKind::SilentNoteOff { .. } => {}

        EventKind::SequenceNumber(number) => {
            buf.extend_from_slice(&[0xFF, 0x00, 0x02]);
            buf.extend_from_slice(&number.to_be_bytes());
        }
        EventKind::MetaText { subtype, text } => meta_text(buf, *subtype, text),
        EventKind::TrackName(text) => meta_text(buf, 0x03, text),
        EventKind::Marker(text) => meta_text(buf, 0x06, text),
        EventKind::CuePoint(text) => meta_text(buf, 0x07, text),
        EventKind::DeviceName(text) => meta_text(buf, 0x09, text),
        EventKind::MidiChannelPrefix(channel) => {
            buf.extend_from_slice(&[0xFF, 0x20, 0x01, *channel]);
        }
        EventKind::MidiPort(port) => {
            buf.extend_from_slice(&[0xFF, 0x21, 0x01, *port]);
        }
        EventKind::EndOfTrack => {
            buf.extend_from_slice(&[0xFF, 0x2F, 0x00]);
        }
        EventKind::SetTempo(us_per_quarter) => {
            buf.extend_from_slice(&[0xFF, 0x51, 0x03]);
            buf.push((us_per_quarter >> 16) as u8);
            buf.push((us_per_quarter >> 8) as u8);
            buf.push(*us_per_quarter as u8);
        }
        EventKind::SmpteOffset { hour, minute, second, frame, sub_frame } => {
            buf.extend_from_slice(&[0xFF, 0x54, 0x05, *hour, *minute, *second, *frame, *sub_frame]);
        }
        EventKind::TimeSignature { numerator, denominator, metronome, thirty_seconds } => {
            // The denominator byte is written verbatim, not as a power of two.
            buf.extend_from_slice(&[
                0xFF, 0x58, 0x04, *numerator, *denominator, *metronome, *thirty_seconds,
            ]);
        }
        EventKind::KeySignature { key, minor } => {
            buf.extend_from_slice(&[0xFF, 0x59, 0x02, *key as u8, u8::from(*minor)]);
        }
        EventKind::SequencerSpecific(data) => {
            buf.extend_from_slice(&[0xFF, 0x7F]);
            vlq::encode(buf, data.len() as u32);
            buf.extend_from_slice(data);
        }

        EventKind::Sysex(data) => {
            buf.push(0xF0);
            vlq::encode(buf, data.len() as u32);
            buf.extend_from_slice(data);
            buf.push(0xF7);
        }

        EventKind::SongPositionPointer(position) => {
            buf.push(0xF2);
            buf.push((position & 0x7F) as u8);
            buf.push(((position >> 7) & 0x7F) as u8);
        }
        EventKind::SongSelect(song) => {
            buf.push(0xF3);
            buf.push(*song);
        }
        EventKind::TuneRequest => buf.push(0xF6),
        EventKind::TimingClock => buf.push(0xF8),
        EventKind::Start => buf.push(0xFA),
        EventKind::Continue => buf.push(0xFB),
        EventKind::Stop => buf.push(0xFC),
        EventKind::ActiveSensing => buf.push(0xFE),
        EventKind::SystemReset => buf.push(0xFF),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    fn note_on(delta: i64, note: u8, velocity: u8) -> Event {
        Event::new(delta, EventKind::NoteOn { channel: 0, note, velocity })
    }

    fn note_off(delta: i64, note: u8) -> Event {
        Event::new(delta, EventKind::NoteOff { channel: 0, note, velocity: 0 })
    }

    #[test]
    fn header_bytes() {
        let bytes = write_file(&[], 1, 480);
        assert_eq!(&bytes[0..8], &[0x4D, 0x54, 0x68, 0x64, 0x00, 0x00, 0x00, 0x06]);
        assert_eq!(&bytes[8..14], &[0x00, 0x01, 0x00, 0x00, 0x01, 0xE0]);
    }

    #[test]
    fn track_length_is_exact() {
        let track = vec![
            note_on(0, 60, 64),
            note_off(480, 60),
            Event::new(0, EventKind::EndOfTrack),
        ];
        let bytes = write_file(&[track], 0, 480);
        let len = u32::from_be_bytes([bytes[18], bytes[19], bytes[20], bytes[21]]) as usize;
        assert_eq!(len, bytes.len() - 22);
    }

    #[test]
    fn minimal_single_note_file() {
        // Known-good byte image for one note of 480 ticks at velocity 64.
        let track = vec![
            note_on(0, 60, 64),
            note_off(480, 60),
            Event::new(0, EventKind::EndOfTrack),
        ];
        let bytes = write_file(&[track], 0, 480);
        let expected: Vec<u8> = vec![
            0x4D, 0x54, 0x68, 0x64, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x01, 0x01, 0xE0,
            0x4D, 0x54, 0x72, 0x6B, 0x00, 0x00, 0x00, 0x0D, 0x00, 0x90, 0x3C, 0x40, 0x83, 0x60,
            0x80, 0x3C, 0x00, 0x00, 0xFF, 0x2F, 0x00,
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn pitch_bend_wire_form() {
        for (value, lsb, msb) in [(0i16, 0x00, 0x40), (-8192, 0x00, 0x00), (8191, 0x7F, 0x7F)] {
            let mut buf = Vec::new();
            encode_event(&mut buf, &EventKind::PitchBend { channel: 2, value });
            assert_eq!(buf, vec![0xE2, lsb, msb], "value {value}");
        }
    }

    #[test]
    fn silent_notes_emit_nothing() {
        let track = vec![
            Event::new(0, EventKind::SilentNoteOn { channel: 0, note: 60 }),
            Event::new(480, EventKind::SilentNoteOff { channel: 0, note: 60 }),
            Event::new(0, EventKind::EndOfTrack),
        ];
        let body = encode_track(&track);
        // Two bare deltas plus the end-of-track event.
        assert_eq!(body, vec![0x00, 0x83, 0x60, 0x00, 0xFF, 0x2F, 0x00]);
    }

    #[test]
    fn meta_and_sysex_framing() {
        let mut buf = Vec::new();
        encode_event(&mut buf, &EventKind::TrackName("Lead".into()));
        assert_eq!(buf, vec![0xFF, 0x03, 0x04, b'L', b'e', b'a', b'd']);

        buf.clear();
        encode_event(&mut buf, &EventKind::Sysex(vec![0x41, 0x10]));
        assert_eq!(buf, vec![0xF0, 0x02, 0x41, 0x10, 0xF7]);

        buf.clear();
        encode_event(&mut buf, &EventKind::KeySignature { key: -3, minor: true });
        assert_eq!(buf, vec![0xFF, 0x59, 0x02, 0xFD, 0x01]);
    }

    #[test]
    fn generated_files_parse_with_midly() {
        let track = vec![
            Event::new(0, EventKind::SetTempo(500_000)),
            note_on(0, 60, 100),
            note_off(480, 60),
            Event::new(0, EventKind::EndOfTrack),
        ];
        let bytes = write_file(&[track], 0, 480);
        let smf = midly::Smf::parse(&bytes).expect("generated SMF should be valid");
        assert_eq!(smf.tracks.len(), 1);
    }
}
