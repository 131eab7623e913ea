//! Named, reusable event sequences.

use std::collections::HashMap;

use crate::error::Error;
use crate::event::Event;

/// Store of named patterns. Defining a name again replaces it.
#[derive(Debug, Default)]
pub struct PatternStore {
    patterns: HashMap<String, Vec<Event>>,
}

impl PatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: impl Into<String>, events: Vec<Event>) {
        self.patterns.insert(name.into(), events);
    }

    /// Return the named sequence concatenated `repetitions` times, copied.
    pub fn get(&self, name: &str, repetitions: u32) -> Result<Vec<Event>, Error> {
        let pattern = self
            .patterns
            .get(name)
            .ok_or_else(|| Error::PatternNotFound(name.to_string()))?;
        let mut result = Vec::with_capacity(pattern.len() * repetitions as usize);
        for _ in 0..repetitions {
            result.extend(pattern.iter().cloned());
        }
        Ok(result)
    }
}
