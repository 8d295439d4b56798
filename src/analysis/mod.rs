//! Analysis Engine
//!
//! Turns recognized plate text into match verdicts against reference records.

pub mod matching;
pub mod normalize;

pub use matching::{MatchPolicy, MatchStrategy, MatchVerdict};
pub use normalize::{NormalizedKey, TextNormalizer};
