//! Runtime state shared between the pipeline and its controls

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop request, observed by the pipeline once per iteration
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    raised: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop; later calls have no further effect
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}

/// Counters collected while the pipeline runs (not persisted)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Frames taken through detection
    pub frames_processed: u64,
    /// Plates read and evaluated
    pub candidates: u64,
    /// Plates that matched a reference record
    pub matches: u64,
    /// Frames whose detection pass failed
    pub detection_failures: u64,
    /// Detection passes discarded for overrunning their deadline
    pub stale_detections: u64,
    /// Frames the renderer failed to draw or save
    pub render_failures: u64,
}

impl PipelineStats {
    /// Share of evaluated plates that matched, 0.0 when none were evaluated
    pub fn match_rate(&self) -> f32 {
        if self.candidates == 0 {
            0.0
        } else {
            self.matches as f32 / self.candidates as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_is_shared_between_clones() {
        let signal = ShutdownSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_raised());

        signal.raise();
        assert!(observer.is_raised());
        signal.raise();
        assert!(observer.is_raised());
    }

    #[test]
    fn test_match_rate() {
        assert_eq!(PipelineStats::default().match_rate(), 0.0);

        let stats = PipelineStats {
            candidates: 4,
            matches: 1,
            ..Default::default()
        };
        assert!((stats.match_rate() - 0.25).abs() < f32::EPSILON);
    }
}
