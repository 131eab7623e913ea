//! Standard MIDI File decoder.
//!
//! Thin inverse of the encoder: walks `MThd` and `MTrk` chunks and emits
//! the canonical JSON document the compile path accepts back. Running
//! status is honored (a data byte below 0x80 reuses the previous status);
//! meta and SysEx events reset it. `noteOn` with velocity 0 is rewritten
//! to `noteOff`, and pitch bend is recentered to the signed convention
//! with a normalized float alongside.

use serde_json::{json, Map, Value};

use crate::error::Error;
use crate::vlq;

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    running_status: u8,
}

/// Decode an SMF byte stream into the canonical JSON document.
pub fn decompile(bytes: &[u8]) -> Result<Value, Error> {
    let mut reader = Reader { data: bytes, pos: 0, running_status: 0 };

    let (format, division) = reader.parse_header()?;

    let mut tracks = Vec::new();
    while reader.pos < reader.data.len() {
        reader.running_status = 0;
        tracks.push(reader.parse_track()?);
    }

    Ok(json!({
        "metadata": {},
        "format": format,
        "division": division,
        "tracks": tracks,
    }))
}

impl<'a> Reader<'a> {
    fn read_u8(&mut self) -> Result<u8, Error> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| Error::MalformedSmf("unexpected end of file".into()))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_u16(&mut self) -> Result<u16, Error> {
        Ok(((self.read_u8()? as u16) << 8) | self.read_u8()? as u16)
    }

    fn read_u32(&mut self) -> Result<u32, Error> {
        Ok(((self.read_u16()? as u32) << 16) | self.read_u16()? as u32)
    }

    fn read_bytes(&mut self, length: usize) -> Result<&'a [u8], Error> {
        let end = self
            .pos
            .checked_add(length)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| Error::MalformedSmf("event data overruns chunk".into()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_varlen(&mut self) -> Result<u32, Error> {
        vlq::decode(self.data, &mut self.pos)
    }

    fn parse_header(&mut self) -> Result<(u16, u16), Error> {
        if self.read_bytes(4)? != b"MThd" {
            return Err(Error::MalformedSmf("missing MThd header".into()));
        }
        if self.read_u32()? != 6 {
            return Err(Error::MalformedSmf("invalid MThd length".into()));
        }
        let format = self.read_u16()?;
        let _num_tracks = self.read_u16()?;
        let division = self.read_u16()?;
        Ok((format, division))
    }

    fn parse_track(&mut self) -> Result<Value, Error> {
        if self.read_bytes(4)? != b"MTrk" {
            return Err(Error::MalformedSmf("missing MTrk header".into()));
        }
        let length = self.read_u32()? as usize;
        let end = self
            .pos
            .checked_add(length)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| Error::MalformedSmf("MTrk length overruns file".into()))?;

        let mut track = Vec::new();
        while self.pos < end {
            let delta = self.read_varlen()?;
            track.push(self.parse_event(delta)?);
        }
        Ok(Value::Array(track))
    }

    fn parse_event(&mut self, delta: u32) -> Result<Value, Error> {
        let mut event = Map::new();
        event.insert("delta".into(), json!(delta));

        let mut status = self.read_u8()?;
        if status < 0x80 {
            // Running status: the byte we just read is data.
            if self.running_status == 0 {
                return Err(Error::MalformedSmf("data byte with no running status".into()));
            }
            self.pos -= 1;
            status = self.running_status;
        }

        if status == 0xFF {
            self.parse_meta(&mut event)?;
            self.running_status = 0;
        } else if status == 0xF0 || status == 0xF7 {
            let length = self.read_varlen()? as usize;
            let mut data = self.read_bytes(length)?.to_vec();
            // The encoder's length covers the payload only, with the F7
            // terminator after it; standard files include the F7 in the
            // length. Accept both and strip the terminator from the data.
            if data.last() == Some(&0xF7) {
                data.pop();
            } else if status == 0xF0 && self.data.get(self.pos) == Some(&0xF7) {
                self.pos += 1;
            }
            event.insert(
                "sysex".into(),
                json!({
                    "type": if status == 0xF0 { "normal" } else { "escaped" },
                    "data": data,
                }),
            );
            self.running_status = 0;
        } else if status >= 0xF0 {
            self.parse_system(status, &mut event)?;
            self.running_status = 0;
        } else {
            self.parse_channel(status, &mut event)?;
            self.running_status = status;
        }

        Ok(Value::Object(event))
    }

    fn parse_meta(&mut self, event: &mut Map<String, Value>) -> Result<(), Error> {
        let meta_type = self.read_u8()?;
        let length = self.read_varlen()? as usize;
        let data = self.read_bytes(length)?;

        let need = |want: usize| -> Result<(), Error> {
            if data.len() < want {
                Err(Error::MalformedSmf(format!(
                    "meta event 0x{meta_type:02X} shorter than {want} bytes"
                )))
            } else {
                Ok(())
            }
        };

        match meta_type {
            0x00 => {
                need(2)?;
                event.insert("sequenceNumber".into(), json!(((data[0] as u16) << 8) | data[1] as u16));
            }
            0x01 => {
                event.insert("text".into(), json!(safe_byte_string(data)));
            }
            0x02 => {
                event.insert("copyrightNotice".into(), json!(safe_byte_string(data)));
            }
            0x03 => {
                event.insert("trackName".into(), json!(safe_byte_string(data)));
            }
            0x04 => {
                event.insert("instrumentName".into(), json!(safe_byte_string(data)));
            }
            0x05 => {
                event.insert("lyric".into(), json!(safe_byte_string(data)));
            }
            0x06 => {
                event.insert("marker".into(), json!({ "text": safe_byte_string(data) }));
            }
            0x07 => {
                event.insert("cuePoint".into(), json!({ "text": safe_byte_string(data) }));
            }
            0x08 => {
                event.insert("programName".into(), json!(safe_byte_string(data)));
            }
            0x09 => {
                event.insert("deviceName".into(), json!(safe_byte_string(data)));
            }
            0x20 => {
                need(1)?;
                event.insert("midiChannelPrefix".into(), json!(data[0]));
            }
            0x21 => {
                need(1)?;
                event.insert("midiPort".into(), json!(data[0]));
            }
            0x2F => {
                event.insert("endOfTrack".into(), json!(true));
            }
            0x51 => {
                need(3)?;
                let tempo = ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | data[2] as u32;
                event.insert("setTempo".into(), json!({ "microsecondsPerQuarter": tempo }));
            }
            0x54 => {
                need(5)?;
                event.insert(
                    "smpteOffset".into(),
                    json!({
                        "hour": data[0],
                        "minute": data[1],
                        "second": data[2],
                        "frame": data[3],
                        "fractionalFrame": data[4],
                    }),
                );
            }
            0x58 => {
                need(4)?;
                event.insert(
                    "timeSignature".into(),
                    json!({
                        "numerator": data[0],
                        "denominator": 1u32 << data[1],
                        "metronome": data[2],
                        "thirtyseconds": data[3],
                    }),
                );
            }
            0x59 => {
                need(2)?;
                event.insert(
                    "keySignature".into(),
                    json!({
                        "key": data[0] as i8,
                        "scale": if data[1] == 0 { "major" } else { "minor" },
                    }),
                );
            }
            0x7F => {
                event.insert("sequencerSpecific".into(), json!({ "data": data }));
            }
            _ => {
                event.insert("unknownMeta".into(), json!({ "type": meta_type, "data": data }));
            }
        }
        Ok(())
    }

    fn parse_channel(&mut self, status: u8, event: &mut Map<String, Value>) -> Result<(), Error> {
        let channel = status & 0x0F;
        event.insert("channel".into(), json!(channel));

        match status & 0xF0 {
            0x80 => {
                let note = self.read_u8()?;
                let velocity = self.read_u8()?;
                event.insert("noteOff".into(), json!({ "noteNumber": note, "velocity": velocity }));
            }
            0x90 => {
                let note = self.read_u8()?;
                let velocity = self.read_u8()?;
                // Velocity 0 is a note off in disguise; canonicalize it.
                let key = if velocity == 0 { "noteOff" } else { "noteOn" };
                event.insert(key.into(), json!({ "noteNumber": note, "velocity": velocity }));
            }
            0xA0 => {
                let note = self.read_u8()?;
                let pressure = self.read_u8()?;
                event.insert(
                    "polyphonicKeyPressure".into(),
                    json!({ "noteNumber": note, "pressure": pressure }),
                );
            }
            0xB0 => {
                let controller = self.read_u8()?;
                let value = self.read_u8()?;
                event.insert(
                    "controlChange".into(),
                    json!({ "controllerNumber": controller, "value": value }),
                );
            }
            0xC0 => {
                let program = self.read_u8()?;
                event.insert("programChange".into(), json!({ "programNumber": program }));
            }
            0xD0 => {
                let pressure = self.read_u8()?;
                event.insert("channelPressure".into(), json!({ "pressure": pressure }));
            }
            0xE0 => {
                let lsb = self.read_u8()? as i32;
                let msb = self.read_u8()? as i32;
                let bend = ((msb << 7) | lsb) - 8192;
                event.insert("pitchBend".into(), json!(bend));
                event.insert("pitchBendNormalized".into(), json!(bend as f64 / 8192.0));
            }
            _ => unreachable!("channel status byte"),
        }
        Ok(())
    }

    fn parse_system(&mut self, status: u8, event: &mut Map<String, Value>) -> Result<(), Error> {
        match status {
            0xF1 => {
                let data = self.read_u8()?;
                event.insert("midiTimeCodeQuarterFrame".into(), json!({ "data": data }));
            }
            0xF2 => {
                let lsb = self.read_u8()? as u16;
                let msb = self.read_u8()? as u16;
                event.insert("songPositionPointer".into(), json!((msb << 7) | lsb));
            }
            0xF3 => {
                let song = self.read_u8()?;
                event.insert("songSelect".into(), json!({ "songNumber": song }));
            }
            0xF6 => {
                event.insert("tuneRequest".into(), json!(true));
            }
            0xF8 => {
                event.insert("timingClock".into(), json!(true));
            }
            0xFA => {
                event.insert("start".into(), json!(true));
            }
            0xFB => {
                event.insert("continue".into(), json!(true));
            }
            0xFC => {
                event.insert("stop".into(), json!(true));
            }
            0xFE => {
                event.insert("activeSensing".into(), json!(true));
            }
            _ => {
                return Err(Error::MalformedSmf(format!(
                    "unexpected status byte 0x{status:02X}"
                )));
            }
        }
        Ok(())
    }
}

/// Render meta text bytes, escaping anything outside printable ASCII.
fn safe_byte_string(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &byte in data {
        if (32..=126).contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("\\x{byte:02x}"));
        }
    }
    out
}
