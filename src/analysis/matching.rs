//! Match policy for recognized plates
//!
//! Decides whether a normalized (identifier, region) pair belongs to a known
//! reference record. Two selection strategies are supported and chosen by
//! configuration.

use serde::{Deserialize, Serialize};
use strsim::normalized_levenshtein;
use tracing::{debug, info, warn};

use super::normalize::NormalizedKey;
use crate::storage::{ReferenceRecord, ReferenceStore, StoreError};

/// Record selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Every record is scored on identifier and region independently; a
    /// record qualifies when both meet their floors, and the qualifying
    /// record with the best identifier score wins.
    #[default]
    IndependentThreshold,
    /// The record with the globally best identifier score is selected first;
    /// only that record is then checked against both floors.
    BestIdentifierThenRegion,
}

impl MatchStrategy {
    /// Floors used when the configuration does not override them
    pub fn default_thresholds(&self) -> MatchThresholds {
        match self {
            MatchStrategy::IndependentThreshold => MatchThresholds {
                identifier_floor: 85,
                region_floor: 85,
            },
            MatchStrategy::BestIdentifierThenRegion => MatchThresholds {
                identifier_floor: 85,
                region_floor: 70,
            },
        }
    }
}

/// Inclusive similarity floors on the 0-100 scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchThresholds {
    pub identifier_floor: u8,
    pub region_floor: u8,
}

impl MatchThresholds {
    fn admits(&self, scores: Scores) -> bool {
        scores.identifier >= self.identifier_floor && scores.region >= self.region_floor
    }
}

/// Similarity scores of a candidate against one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Scores {
    pub identifier: u8,
    pub region: u8,
}

/// Outcome of evaluating one candidate
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MatchVerdict {
    pub matched: bool,
    pub holder: Option<String>,
    pub matched_identifier: Option<String>,
    /// Scores of the selected record, or of the closest record on a miss
    pub scores: Scores,
}

impl MatchVerdict {
    fn no_match(scores: Scores) -> Self {
        Self {
            scores,
            ..Default::default()
        }
    }

    fn matched(record: &ReferenceRecord, scores: Scores) -> Self {
        Self {
            matched: true,
            holder: Some(record.holder.clone()),
            matched_identifier: Some(record.identifier.to_string()),
            scores,
        }
    }

    /// Overlay label for a candidate read as `identifier` / `region`
    pub fn label(&self, identifier: &NormalizedKey, region: &NormalizedKey) -> String {
        match (&self.matched, &self.holder) {
            (true, Some(holder)) => format!("{} ({})\nOwner: {}", identifier, region, holder),
            (true, None) => format!("{} ({}) - found", identifier, region),
            (false, _) => format!("{} ({}) - not found", identifier, region),
        }
    }
}

/// Character-level edit-distance similarity scaled to 0-100 and rounded
pub fn similarity(a: &str, b: &str) -> u8 {
    (normalized_levenshtein(a, b) * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Fuzzy match policy over a reference store
#[derive(Debug, Clone, Copy)]
pub struct MatchPolicy {
    strategy: MatchStrategy,
    thresholds: MatchThresholds,
}

impl MatchPolicy {
    /// Policy with the strategy's default floors
    pub fn new(strategy: MatchStrategy) -> Self {
        Self {
            strategy,
            thresholds: strategy.default_thresholds(),
        }
    }

    pub fn with_thresholds(strategy: MatchStrategy, thresholds: MatchThresholds) -> Self {
        Self { strategy, thresholds }
    }

    pub fn strategy(&self) -> MatchStrategy {
        self.strategy
    }

    pub fn thresholds(&self) -> MatchThresholds {
        self.thresholds
    }

    /// Evaluate a candidate. Store failures degrade to "no match".
    pub fn evaluate(
        &self,
        store: &dyn ReferenceStore,
        identifier: &NormalizedKey,
        region: &NormalizedKey,
    ) -> MatchVerdict {
        match self.try_evaluate(store, identifier, region) {
            Ok(verdict) => verdict,
            Err(StoreError::Unavailable(cause)) => {
                warn!("Store unavailable while matching '{}': {}", identifier, cause);
                MatchVerdict::default()
            }
            Err(StoreError::Query(cause)) => {
                warn!("Store query failed while matching '{}': {}", identifier, cause);
                MatchVerdict::default()
            }
        }
    }

    /// Evaluate a candidate, surfacing store failures to the caller
    pub fn try_evaluate(
        &self,
        store: &dyn ReferenceStore,
        identifier: &NormalizedKey,
        region: &NormalizedKey,
    ) -> Result<MatchVerdict, StoreError> {
        if identifier.is_empty() {
            debug!("Empty identifier, nothing to match");
            return Ok(MatchVerdict::default());
        }

        let records = store.all_records()?;
        let verdict = match self.strategy {
            MatchStrategy::IndependentThreshold => self.independent_threshold(&records, identifier, region),
            MatchStrategy::BestIdentifierThenRegion => self.best_identifier(&records, identifier, region),
        };

        if verdict.matched {
            info!(
                "Matched '{}' / '{}' to {:?} (holder: {:?}, scores {}/{})",
                identifier,
                region,
                verdict.matched_identifier,
                verdict.holder,
                verdict.scores.identifier,
                verdict.scores.region
            );
        } else {
            debug!(
                "No match for '{}' / '{}' among {} records",
                identifier,
                region,
                records.len()
            );
        }
        Ok(verdict)
    }

    fn independent_threshold(
        &self,
        records: &[ReferenceRecord],
        identifier: &NormalizedKey,
        region: &NormalizedKey,
    ) -> MatchVerdict {
        let mut best: Option<(&ReferenceRecord, Scores)> = None;
        let mut closest = Scores::default();

        for record in records {
            let scores = score(record, identifier, region);
            if scores.identifier > closest.identifier {
                closest = scores;
            }
            if !self.thresholds.admits(scores) {
                continue;
            }
            // Strictly greater: ties keep the record seen first
            if best.map_or(true, |(_, b)| scores.identifier > b.identifier) {
                best = Some((record, scores));
            }
        }

        match best {
            Some((record, scores)) => MatchVerdict::matched(record, scores),
            None => MatchVerdict::no_match(closest),
        }
    }

    fn best_identifier(
        &self,
        records: &[ReferenceRecord],
        identifier: &NormalizedKey,
        region: &NormalizedKey,
    ) -> MatchVerdict {
        let mut nearest: Option<(&ReferenceRecord, u8)> = None;
        for record in records {
            let id_score = similarity(identifier.as_str(), record.identifier.as_str());
            if nearest.map_or(true, |(_, best)| id_score > best) {
                nearest = Some((record, id_score));
            }
        }

        let Some((record, _)) = nearest else {
            return MatchVerdict::no_match(Scores::default());
        };

        let scores = score(record, identifier, region);
        if self.thresholds.admits(scores) {
            MatchVerdict::matched(record, scores)
        } else {
            MatchVerdict::no_match(scores)
        }
    }
}

fn score(record: &ReferenceRecord, identifier: &NormalizedKey, region: &NormalizedKey) -> Scores {
    Scores {
        identifier: similarity(identifier.as_str(), record.identifier.as_str()),
        region: similarity(region.as_str(), record.region.as_str()),
    }
}
