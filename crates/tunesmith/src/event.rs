//! Tagged MIDI event model.
//!
//! One variant per event kind with a typed payload, in place of a
//! string-tagged record. The encoder matches exhaustively over this enum,
//! so adding a kind without a wire encoding is a compile error.

/// A single MIDI, meta, or system event with its delta time.
///
/// `delta` is ticks since the previous event in the track. Generators in
/// the DSL tag freshly emitted events with offset-style deltas (position
/// within the generated figure) and rely on a stable sort by `delta`; the
/// serializer writes whatever it is handed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub delta: i64,
    pub kind: EventKind,
}

impl Event {
    pub fn new(delta: i64, kind: EventKind) -> Self {
        Event { delta, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    // Channel voice
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    PolyphonicKeyPressure { channel: u8, note: u8, pressure: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelPressure { channel: u8, pressure: u8 },
    /// Signed, centered at 0; the wire form is `value + 8192` split LSB/MSB.
    PitchBend { channel: u8, value: i16 },

    /// A muted note edge. Produced by track muting, never serialized.
    SilentNoteOn { channel: u8, note: u8 },
    SilentNoteOff { channel: u8, note: u8 },

    // Meta
    SequenceNumber(u16),
    MetaText { subtype: u8, text: String },
    TrackName(String),
    Marker(String),
    CuePoint(String),
    DeviceName(String),
    MidiChannelPrefix(u8),
    MidiPort(u8),
    EndOfTrack,
    SetTempo(u32),
    SmpteOffset { hour: u8, minute: u8, second: u8, frame: u8, sub_frame: u8 },
    TimeSignature { numerator: u8, denominator: u8, metronome: u8, thirty_seconds: u8 },
    KeySignature { key: i8, minor: bool },
    SequencerSpecific(Vec<u8>),

    // SysEx
    Sysex(Vec<u8>),

    // System common / realtime
    SongPositionPointer(u16),
    SongSelect(u8),
    TuneRequest,
    TimingClock,
    Start,
    Continue,
    Stop,
    ActiveSensing,
    SystemReset,
}

impl EventKind {
    /// The JSON-facing name of this kind, used for warnings and for the
    /// event-probability table lookup.
    pub fn json_name(&self) -> &'static str {
        match self {
            EventKind::NoteOn { .. } => "noteOn",
            EventKind::NoteOff { .. } => "noteOff",
            EventKind::PolyphonicKeyPressure { .. } => "polyphonicKeyPressure",
            EventKind::ControlChange { .. } => "controlChange",
            EventKind::ProgramChange { .. } => "programChange",
            EventKind::ChannelPressure { .. } => "channelPressure",
            EventKind::PitchBend { .. } => "pitchBend",
            EventKind::SilentNoteOn { .. } => "silentNoteOn",
            EventKind::SilentNoteOff { .. } => "silentNoteOff",
            EventKind::SequenceNumber(_) => "sequenceNumber",
            EventKind::MetaText { .. } => "metaText",
            EventKind::TrackName(_) => "trackName",
            EventKind::Marker(_) => "marker",
            EventKind::CuePoint(_) => "cuePoint",
            EventKind::DeviceName(_) => "deviceName",
            EventKind::MidiChannelPrefix(_) => "midiChannelPrefix",
            EventKind::MidiPort(_) => "midiPort",
            EventKind::EndOfTrack => "endOfTrack",
            EventKind::SetTempo(_) => "setTempo",
            EventKind::SmpteOffset { .. } => "smpteOffset",
            EventKind::TimeSignature { .. } => "timeSignature",
            EventKind::KeySignature { .. } => "keySignature",
            EventKind::SequencerSpecific(_) => "sequencerSpecific",
            EventKind::Sysex(_) => "sysex",
            EventKind::SongPositionPointer(_) => "songPositionPointer",
            EventKind::SongSelect(_) => "songSelect",
            EventKind::TuneRequest => "tuneRequest",
            EventKind::TimingClock => "timingClock",
            EventKind::Start => "start",
            EventKind::Continue => "continue",
            EventKind::Stop => "stop",
            EventKind::ActiveSensing => "activeSensing",
            EventKind::SystemReset => "systemReset",
        }
    }

    /// Note number, for the kinds that carry one.
    pub fn note(&self) -> Option<u8> {
        match self {
            EventKind::NoteOn { note, .. }
            | EventKind::NoteOff { note, .. }
            | EventKind::SilentNoteOn { note, .. }
            | EventKind::SilentNoteOff { note, .. }
            | EventKind::PolyphonicKeyPressure { note, .. } => Some(*note),
            _ => None,
        }
    }

    pub fn is_note_on(&self) -> bool {
        matches!(self, EventKind::NoteOn { .. })
    }

    pub fn is_note_off(&self) -> bool {
        matches!(self, EventKind::NoteOff { .. })
    }
}

/// Clamp an arithmetic result into the audible velocity range.
pub fn clamp_velocity(value: i64) -> u8 {
    value.clamp(1, 127) as u8
}

/// Clamp an arithmetic result into the MIDI note range.
pub fn clamp_note(value: i64) -> u8 {
    value.clamp(0, 127) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_equality() {
        let a = Event::new(0, EventKind::NoteOn { channel: 0, note: 60, velocity: 100 });
        let b = Event::new(0, EventKind::NoteOn { channel: 0, note: 60, velocity: 100 });
        let c = Event::new(0, EventKind::NoteOn { channel: 0, note: 60, velocity: 99 });
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn clamps() {
        assert_eq!(clamp_velocity(0), 1);
        assert_eq!(clamp_velocity(200), 127);
        assert_eq!(clamp_note(-3), 0);
        assert_eq!(clamp_note(128), 127);
    }
}
