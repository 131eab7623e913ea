//! JSON composition DSL to Standard MIDI File compiler, and back.
//!
//! A document describes raw MIDI events and a small composition DSL
//! (patterns, loops, conditionals, chord progressions, arpeggiators,
//! polyrhythms, grooves, harmonization, parameter automation, tempo maps,
//! randomization, per-track muting). Compilation expands the DSL into
//! flat per-track event sequences and serializes them as SMF bytes;
//! decompilation reads SMF bytes back into a document that recompiles to
//! equivalent audible events.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//!
//! let doc = json!({
//!     "format": 0,
//!     "division": 480,
//!     "tracks": [[
//!         { "delta": 0, "noteOn": { "noteNumber": 60, "velocity": 64 }, "channel": 0 },
//!         { "delta": 480, "noteOff": { "noteNumber": 60, "velocity": 0 }, "channel": 0 },
//!         { "endOfTrack": true, "delta": 0 }
//!     ]]
//! });
//!
//! let midi = tunesmith::compile(&doc, None).unwrap();
//! assert_eq!(&midi[0..4], b"MThd");
//!
//! let round_tripped = tunesmith::decompile(&midi).unwrap();
//! assert_eq!(tunesmith::compile(&round_tripped, None).unwrap(), midi);
//! ```

pub mod conditions;
pub mod context;
pub mod error;
pub mod event;
pub mod expand;
pub mod patterns;
pub mod reader;
pub mod transforms;
pub mod vlq;
pub mod writer;

use serde_json::Value;

pub use context::Context;
pub use error::Error;
pub use event::{Event, EventKind};
pub use patterns::PatternStore;
pub use reader::decompile;

/// Compile a JSON document into SMF bytes.
///
/// `format` (default 1) and `division` (default 480) come from the
/// document. Randomized directives draw from one seeded stream: the
/// document's `seed` field wins, then the `seed` argument, then OS
/// entropy.
pub fn compile(doc: &Value, seed: Option<u64>) -> Result<Vec<u8>, Error> {
    let format = doc.get("format").and_then(Value::as_u64).unwrap_or(1) as u16;
    let division = doc.get("division").and_then(Value::as_u64).unwrap_or(480) as u16;
    let seed = doc.get("seed").and_then(Value::as_u64).or(seed);

    let mut patterns = PatternStore::new();
    let mut ctx = Context::new(seed);

    let tracks = expand::expand_document(doc, &mut patterns, &mut ctx);
    if tracks.is_empty() {
        return Err(Error::NoTracks);
    }

    Ok(writer::write_file(&tracks, format, division))
}

/// Parse a JSON string and compile it.
pub fn compile_str(json: &str, seed: Option<u64>) -> Result<Vec<u8>, Error> {
    let doc: Value = serde_json::from_str(json)?;
    compile(&doc, seed)
}
