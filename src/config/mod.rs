//! Application Configuration
//!
//! Pipeline settings stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::analysis::matching::{MatchPolicy, MatchStrategy, MatchThresholds};
use crate::analysis::normalize::Alphabet;
use crate::vision::{ColorFormat, FragmentLayout};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Video stream settings
    pub stream: StreamSettings,
    /// Plate detection model settings
    pub detection: DetectionSettings,
    /// Text recognition settings
    pub recognition: RecognitionSettings,
    /// Text normalization settings
    pub normalizer: NormalizerSettings,
    /// Match policy settings
    pub matching: MatchingSettings,
    /// Reference store settings
    pub store: StoreSettings,
    /// Overlay rendering settings
    pub overlay: OverlaySettings,
    /// Operator controls
    pub controls: ControlSettings,
}

/// Video stream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Stream locator: RTSP/HTTP URL, video file, or a directory of images
    pub locator: String,
    /// Frame width delivered to the pipeline
    pub width: u32,
    /// Frame height delivered to the pipeline
    pub height: u32,
    /// Target frames per second for paced sources
    pub fps: u32,
    /// First reconnection delay
    pub backoff_initial_ms: u64,
    /// Upper bound on the reconnection delay
    pub backoff_max_ms: u64,
    /// A live stream with no frame for this long is reconnected
    pub read_timeout_ms: u64,
    /// Driver sleep when no fresh frame is available
    pub idle_poll_ms: u64,
    /// Restart an image sequence from the beginning when exhausted
    pub loop_sequence: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            locator: String::new(),
            width: 1280,
            height: 720,
            fps: 25,
            backoff_initial_ms: 500,
            backoff_max_ms: 10_000,
            read_timeout_ms: 5_000,
            idle_poll_ms: 10,
            loop_sequence: false,
        }
    }
}

/// Plate detection model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Path to the ONNX detection model
    pub model_path: PathBuf,
    /// Square model input size in pixels
    pub input_size: u32,
    /// Object classes the model scores; each proposal carries 4 box values
    /// plus one score per class
    pub num_classes: usize,
    /// Minimum detection confidence
    pub confidence_threshold: f32,
    /// IoU above which overlapping boxes are suppressed
    pub iou_threshold: f32,
    /// Soft deadline for one detection pass; 0 disables it
    pub inference_timeout_ms: u64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/plate_detector.onnx"),
            input_size: 640,
            num_classes: 1,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            inference_timeout_ms: 2_000,
        }
    }
}

/// Text recognition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Path to the ONNX recognition model
    pub model_path: PathBuf,
    /// Character dictionary, one entry per line
    pub dictionary_path: PathBuf,
    /// Languages the recognition model was trained for
    pub languages: Vec<String>,
    /// Color format regions are converted to before recognition
    pub color_format: ColorFormat,
    /// How fragments are assembled into identifier and region
    pub layout: FragmentLayout,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/text_recognizer.onnx"),
            dictionary_path: PathBuf::from("models/dictionary.txt"),
            languages: vec!["th".to_string()],
            color_format: ColorFormat::default(),
            layout: FragmentLayout::default(),
        }
    }
}

/// Text normalization settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerSettings {
    /// Alphabet kept alongside digits
    pub alphabet: Alphabet,
}

/// Match policy settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingSettings {
    /// Record selection strategy
    pub strategy: MatchStrategy,
    /// Identifier floor override (0-100)
    pub identifier_floor: Option<u8>,
    /// Region floor override (0-100)
    pub region_floor: Option<u8>,
}

impl MatchingSettings {
    /// Floors for the configured strategy, with overrides applied
    pub fn thresholds(&self) -> MatchThresholds {
        let defaults = self.strategy.default_thresholds();
        MatchThresholds {
            identifier_floor: self.identifier_floor.unwrap_or(defaults.identifier_floor).min(100),
            region_floor: self.region_floor.unwrap_or(defaults.region_floor).min(100),
        }
    }

    pub fn policy(&self) -> MatchPolicy {
        MatchPolicy::with_thresholds(self.strategy, self.thresholds())
    }
}

/// Reference store connection descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// SQLite database file
    pub path: PathBuf,
    /// Table holding plate records
    pub table: String,
    /// How long a query waits on a locked database
    pub busy_timeout_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("license_plates.db"),
            table: "license_plates".to_string(),
            busy_timeout_ms: 2_000,
        }
    }
}

/// Overlay rendering settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    /// TrueType/OpenType font able to render the plate alphabet
    pub font_path: PathBuf,
    /// Label font size in pixels
    pub font_size: f32,
    /// Where the annotated frame is written
    pub output_path: PathBuf,
    /// Write every Nth rendered frame; 0 disables writing
    pub save_every: u32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            font_path: PathBuf::from("fonts/THSarabunNew.ttf"),
            font_size: 30.0,
            output_path: PathBuf::from("overlay.png"),
            save_every: 1,
        }
    }
}

/// Operator controls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    /// Key that stops the pipeline when entered on stdin
    pub quit_key: String,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            quit_key: "q".to_string(),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Default configuration file location
pub fn default_config_path() -> Result<PathBuf> {
    Ok(crate::storage::get_config_dir()?.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        // Stream defaults
        assert!(config.stream.locator.is_empty());
        assert_eq!(config.stream.width, 1280);
        assert_eq!(config.stream.height, 720);
        assert!(config.stream.backoff_initial_ms <= config.stream.backoff_max_ms);
        assert_eq!(config.stream.read_timeout_ms, 5_000);

        // Detection defaults
        assert_eq!(config.detection.num_classes, 1);

        // Recognition defaults
        assert_eq!(config.recognition.color_format, ColorFormat::Grayscale);
        assert_eq!(config.recognition.layout.min_fragments, 3);

        // Matching defaults
        assert_eq!(config.matching.strategy, MatchStrategy::IndependentThreshold);
        assert_eq!(
            config.matching.thresholds(),
            MatchThresholds {
                identifier_floor: 85,
                region_floor: 85
            }
        );

        // Normalizer and overlay
        assert_eq!(config.normalizer.alphabet, Alphabet::Thai);
        assert!((config.overlay.font_size - 30.0).abs() < 0.01);
        assert_eq!(config.controls.quit_key, "q");
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = AppConfig::default();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.stream.width, parsed.stream.width);
        assert_eq!(config.store.table, parsed.store.table);
        assert_eq!(config.recognition.layout, parsed.recognition.layout);
        assert_eq!(config.matching.strategy, parsed.matching.strategy);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [stream]
            locator = "rtsp://camera.local:554/stream1"

            [matching]
            strategy = "best_identifier_then_region"

            [normalizer]
            alphabet = "latin"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.stream.locator, "rtsp://camera.local:554/stream1");
        assert_eq!(parsed.stream.width, 1280);
        assert_eq!(parsed.normalizer.alphabet, Alphabet::Latin);
        assert_eq!(
            parsed.matching.thresholds(),
            MatchThresholds {
                identifier_floor: 85,
                region_floor: 70
            }
        );
        assert_eq!(parsed.store.table, "license_plates");
    }

    #[test]
    fn test_threshold_overrides() {
        let settings = MatchingSettings {
            strategy: MatchStrategy::IndependentThreshold,
            identifier_floor: Some(90),
            region_floor: Some(150),
        };
        let thresholds = settings.thresholds();
        assert_eq!(thresholds.identifier_floor, 90);
        assert_eq!(thresholds.region_floor, 100);
        assert_eq!(settings.policy().thresholds(), thresholds);
    }

    #[test]
    fn test_save_and_load_config() {
        let mut config = AppConfig::default();
        config.stream.locator = "/data/frames".to_string();
        config.store.busy_timeout_ms = 750;

        let temp_file = NamedTempFile::new().unwrap();
        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(loaded.stream.locator, "/data/frames");
        assert_eq!(loaded.store.busy_timeout_ms, 750);
    }

    #[test]
    fn test_save_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        save_config(&AppConfig::default(), &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
