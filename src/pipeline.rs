//! Pipeline Driver
//!
//! Pulls the latest frame, runs detection and recognition, evaluates each
//! plate against the reference store, and hands the verdicts to the
//! renderer. Runs on the caller's thread until asked to stop.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::analysis::matching::{MatchPolicy, MatchVerdict};
use crate::analysis::normalize::{NormalizedKey, TextNormalizer};
use crate::capture::{Frame, FrameSource};
use crate::overlay::OverlayRenderer;
use crate::shared::ShutdownSignal;
use crate::storage::ReferenceStore;
use crate::vision::{Candidate, DetectionAdapter, VisionError};

pub use crate::shared::PipelineStats;

/// Driver lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Init,
    Streaming,
    Stopped,
}

/// A plate with its normalized keys and verdict
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateResult {
    pub candidate: Candidate,
    pub identifier: NormalizedKey,
    pub region: NormalizedKey,
    pub verdict: MatchVerdict,
}

/// What one iteration did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// No fresh frame was available
    Idle,
    /// A finite source has nothing more to deliver
    Exhausted,
    /// A frame went through detection, matching and rendering
    Processed { candidates: usize, matches: usize },
}

/// Driver timing and bounds
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Sleep when no fresh frame is available
    pub idle_poll: Duration,
    /// Detection passes slower than this are discarded
    pub inference_timeout: Option<Duration>,
    /// Stop after this many processed frames
    pub max_frames: Option<u64>,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            idle_poll: Duration::from_millis(10),
            inference_timeout: None,
            max_frames: None,
        }
    }
}

/// Owns every pipeline component for the duration of a run
pub struct PipelineDriver {
    source: FrameSource,
    adapter: DetectionAdapter,
    normalizer: TextNormalizer,
    policy: MatchPolicy,
    store: Box<dyn ReferenceStore>,
    renderer: Box<dyn OverlayRenderer>,
    shutdown: ShutdownSignal,
    settings: DriverSettings,
    state: DriverState,
    last_seq: u64,
    stats: PipelineStats,
}

impl PipelineDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: FrameSource,
        adapter: DetectionAdapter,
        normalizer: TextNormalizer,
        policy: MatchPolicy,
        store: Box<dyn ReferenceStore>,
        renderer: Box<dyn OverlayRenderer>,
        shutdown: ShutdownSignal,
        settings: DriverSettings,
    ) -> Self {
        Self {
            source,
            adapter,
            normalizer,
            policy,
            store,
            renderer,
            shutdown,
            settings,
            state: DriverState::Init,
            last_seq: 0,
            stats: PipelineStats::default(),
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Run until the shutdown signal is raised, the frame bound is reached,
    /// or a finite source is exhausted. The frame source is stopped before
    /// this returns.
    pub fn run(&mut self) -> PipelineStats {
        self.state = DriverState::Streaming;
        info!(
            "Pipeline streaming ({:?} strategy, floors {}/{})",
            self.policy.strategy(),
            self.policy.thresholds().identifier_floor,
            self.policy.thresholds().region_floor
        );

        loop {
            if self.shutdown.is_raised() {
                info!("Quit requested");
                break;
            }
            if let Some(max) = self.settings.max_frames {
                if self.stats.frames_processed >= max {
                    info!("Processed {} frames, stopping", max);
                    break;
                }
            }

            match self.run_iteration() {
                IterationOutcome::Idle => std::thread::sleep(self.settings.idle_poll),
                IterationOutcome::Exhausted => {
                    info!("Frame source exhausted");
                    break;
                }
                IterationOutcome::Processed { .. } => {}
            }
        }

        self.stop();
        self.stats
    }

    /// One Acquire, Detect, Match, Render pass
    pub fn run_iteration(&mut self) -> IterationOutcome {
        // Read the flag first: it is set only after the final frame is published
        let exhausted = self.source.is_exhausted();
        let frame = match self.source.latest() {
            Some(frame) if frame.seq > self.last_seq => frame,
            _ if exhausted => return IterationOutcome::Exhausted,
            _ => return IterationOutcome::Idle,
        };
        self.last_seq = frame.seq;

        let candidates = self.detect(&frame);
        let results: Vec<CandidateResult> = candidates
            .into_iter()
            .map(|candidate| self.evaluate(candidate))
            .collect();

        let matches = results.iter().filter(|r| r.verdict.matched).count();
        self.stats.frames_processed += 1;
        self.stats.candidates += results.len() as u64;
        self.stats.matches += matches as u64;

        if let Err(e) = self.renderer.render(&frame, &results) {
            self.stats.render_failures += 1;
            warn!("Failed to render frame {}: {}", frame.seq, e);
        }

        IterationOutcome::Processed {
            candidates: results.len(),
            matches,
        }
    }

    fn detect(&mut self, frame: &Arc<Frame>) -> Vec<Candidate> {
        let result = match self.adapter.process(frame) {
            Ok(result) => result,
            Err(e) => {
                self.stats.detection_failures += 1;
                warn!("Detection failed on frame {}: {}", frame.seq, e);
                return Vec::new();
            }
        };

        if let Some(deadline) = self.settings.inference_timeout {
            if result.processing_time > deadline {
                self.stats.stale_detections += 1;
                let error = VisionError::Timeout {
                    elapsed: result.processing_time,
                    deadline,
                };
                warn!("Discarding results for frame {}: {}", frame.seq, error);
                return Vec::new();
            }
        }

        result.candidates
    }

    fn evaluate(&self, candidate: Candidate) -> CandidateResult {
        let identifier = self.normalizer.normalize(&candidate.identifier_text);
        let region = self.normalizer.normalize(&candidate.region_text);
        let verdict = self.policy.evaluate(self.store.as_ref(), &identifier, &region);

        debug!(
            "Plate '{}' / '{}' read as '{}' / '{}': matched={}",
            candidate.identifier_text, candidate.region_text, identifier, region, verdict.matched
        );

        CandidateResult {
            candidate,
            identifier,
            region,
            verdict,
        }
    }

    fn stop(&mut self) {
        if self.state == DriverState::Stopped {
            return;
        }
        self.source.stop();
        self.state = DriverState::Stopped;
        info!(
            "Pipeline stopped: {} frames, {} plates, {} matches, {} detection failures, {} stale, {} render failures",
            self.stats.frames_processed,
            self.stats.candidates,
            self.stats.matches,
            self.stats.detection_failures,
            self.stats.stale_detections,
            self.stats.render_failures
        );
    }
}
