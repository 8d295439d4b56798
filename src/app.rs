//! Application Coordinator
//!
//! Builds the pipeline components from configuration and runs them, along
//! with the one-shot store queries behind the `check` and `lookup` commands.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::analysis::matching::{MatchPolicy, MatchVerdict};
use crate::analysis::normalize::{NormalizedKey, TextNormalizer};
use crate::capture::{open_stream, CaptureConfig, FrameSource};
use crate::config::AppConfig;
use crate::hotkey::{parse_quit_key, QuitListener};
use crate::overlay::{ImageOverlay, OverlayRenderer};
use crate::pipeline::{DriverSettings, PipelineDriver, PipelineStats};
use crate::shared::ShutdownSignal;
use crate::storage::{ReferenceRecord, ReferenceStore, SqliteStore};
use crate::vision::detection::OnnxPlateDetector;
use crate::vision::ocr::OnnxTextRecognizer;
use crate::vision::DetectionAdapter;

/// Result of the `check` command
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub plate_number: NormalizedKey,
    pub province: NormalizedKey,
    #[serde(flatten)]
    pub verdict: MatchVerdict,
}

/// Result of the `lookup` command
#[derive(Debug, Clone, Serialize)]
pub struct LookupReport {
    pub plate_number: NormalizedKey,
    pub found: bool,
    pub results: Vec<ReferenceRecord>,
}

/// Main application coordinator
pub struct PlateVerifierApp {
    config: AppConfig,
    normalizer: TextNormalizer,
    shutdown: ShutdownSignal,
}

impl PlateVerifierApp {
    /// Create a new application coordinator
    pub fn new(config: AppConfig) -> Self {
        let normalizer = TextNormalizer::new(config.normalizer.alphabet);
        Self {
            config,
            normalizer,
            shutdown: ShutdownSignal::new(),
        }
    }

    fn store(&self) -> Result<SqliteStore> {
        SqliteStore::new(&self.config.store, self.normalizer).context("Failed to configure reference store")
    }

    fn policy(&self) -> MatchPolicy {
        self.config.matching.policy()
    }

    /// Run the live pipeline until quit, exhaustion or the frame bound
    pub fn run(&self, max_frames: Option<u64>) -> Result<PipelineStats> {
        let mut driver = self.build_driver(max_frames)?;

        let quit_key = parse_quit_key(&self.config.controls.quit_key)
            .with_context(|| format!("Invalid quit key '{}'", self.config.controls.quit_key))?;
        let _listener = QuitListener::spawn(quit_key, self.shutdown.clone());

        let stats = driver.run();
        info!(
            "Run complete: {} frames, {} plates, {:.0}% matched",
            stats.frames_processed,
            stats.candidates,
            stats.match_rate() * 100.0
        );
        Ok(stats)
    }

    /// Build every pipeline component. Models and the store are validated
    /// before the stream is opened.
    pub fn build_driver(&self, max_frames: Option<u64>) -> Result<PipelineDriver> {
        let detector = OnnxPlateDetector::from_settings(&self.config.detection)
            .context("Failed to load plate detector")?;
        let recognizer = OnnxTextRecognizer::from_settings(&self.config.recognition)
            .context("Failed to load text recognizer")?;
        let adapter = DetectionAdapter::new(
            Box::new(detector),
            Box::new(recognizer),
            self.config.recognition.layout.clone(),
            self.config.recognition.color_format,
        );
        info!(
            "Recognition languages: {}",
            self.config.recognition.languages.join(", ")
        );

        let store = self.store()?;
        let renderer = self.renderer();

        let stream = open_stream(&self.config.stream);
        let source = FrameSource::start(stream, CaptureConfig::from(&self.config.stream));

        Ok(PipelineDriver::new(
            source,
            adapter,
            self.normalizer,
            self.policy(),
            Box::new(store),
            renderer,
            self.shutdown.clone(),
            self.driver_settings(max_frames),
        ))
    }

    fn renderer(&self) -> Box<dyn OverlayRenderer> {
        match ImageOverlay::new(&self.config.overlay) {
            Ok(overlay) => Box::new(overlay),
            Err(e) => {
                warn!("{}; labels will not be drawn", e);
                Box::new(ImageOverlay::without_font(&self.config.overlay))
            }
        }
    }

    fn driver_settings(&self, max_frames: Option<u64>) -> DriverSettings {
        let timeout_ms = self.config.detection.inference_timeout_ms;
        DriverSettings {
            idle_poll: Duration::from_millis(self.config.stream.idle_poll_ms),
            inference_timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
            max_frames,
        }
    }

    /// Evaluate a single plate reading against the store
    pub fn check(&self, identifier: &str, region: &str) -> Result<CheckReport> {
        let store = self.store()?;
        let identifier = self.normalizer.normalize(identifier);
        let region = self.normalizer.normalize(region);
        let verdict = self
            .policy()
            .try_evaluate(&store, &identifier, &region)
            .context("Plate check failed")?;

        Ok(CheckReport {
            plate_number: identifier,
            province: region,
            verdict,
        })
    }

    /// Every record whose plate contains `identifier`
    pub fn lookup(&self, identifier: &str) -> Result<LookupReport> {
        let identifier = self.normalizer.normalize(identifier);
        if identifier.is_empty() {
            bail!("Plate number is required");
        }
        let store = self.store()?;
        let results = store
            .records_for(&identifier)
            .context("Plate lookup failed")?;

        Ok(LookupReport {
            plate_number: identifier,
            found: !results.is_empty(),
            results,
        })
    }
}
