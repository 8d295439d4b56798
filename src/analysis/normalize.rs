//! Text normalization for recognized plate text
//!
//! Turns noisy recognizer output into a canonical key that can be compared
//! against reference records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Alphabet kept by the normalizer in addition to the digits 0-9
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alphabet {
    /// Thai consonants, vowels, signs and digits (U+0E01..=U+0E59)
    #[default]
    Thai,
    /// Basic Latin uppercase letters (A-Z)
    Latin,
}

impl Alphabet {
    /// Whether `c` belongs to this alphabet
    pub fn contains(&self, c: char) -> bool {
        match self {
            Alphabet::Thai => ('\u{0E01}'..='\u{0E59}').contains(&c),
            Alphabet::Latin => c.is_ascii_uppercase(),
        }
    }
}

/// Canonical comparison key produced by [`TextNormalizer`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct NormalizedKey(String);

impl NormalizedKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonicalizes recognized text into a [`NormalizedKey`]
#[derive(Debug, Clone, Copy, Default)]
pub struct TextNormalizer {
    alphabet: Alphabet,
}

impl TextNormalizer {
    pub fn new(alphabet: Alphabet) -> Self {
        Self { alphabet }
    }

    /// Uppercase, trim, drop interior whitespace, then keep only digits and
    /// the configured alphabet. Order matters: uppercasing first lets Latin
    /// lowercase input survive the character filter.
    pub fn normalize(&self, text: &str) -> NormalizedKey {
        let upper = text.to_uppercase();
        let key = upper
            .trim()
            .chars()
            .filter(|c| !c.is_whitespace())
            .filter(|&c| c.is_ascii_digit() || self.alphabet.contains(c))
            .collect();
        NormalizedKey(key)
    }
}
