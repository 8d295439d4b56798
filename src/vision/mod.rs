//! Vision/OCR Layer
//!
//! Finds plate regions in a frame and reads their text. Model output never
//! leaves this module: callers receive [`Candidate`] values carrying the raw
//! identifier and region text of each plate.
//!
//! Backends:
//! - plate detection: YOLO-style ONNX model ([`detection::OnnxPlateDetector`])
//! - text recognition: CRNN/CTC ONNX model ([`ocr::OnnxTextRecognizer`])

pub mod detection;
pub mod models;
pub mod ocr;
pub mod preprocess;

use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::capture::frame::Frame;

pub use detection::OnnxPlateDetector;
pub use models::OnnxSession;
pub use ocr::OnnxTextRecognizer;

/// Failures inside the detection/recognition adapter
#[derive(Debug, Error)]
pub enum VisionError {
    /// A model could not be loaded
    #[error("failed to load model: {0}")]
    Model(String),
    /// A model failed while running
    #[error("inference failed: {0}")]
    Inference(String),
    /// A detection pass overran its deadline
    #[error("detection took {elapsed:?}, deadline {deadline:?}")]
    Timeout { elapsed: Duration, deadline: Duration },
    /// Too few text fragments to assemble a plate
    #[error("found {found} text fragments, need {required}")]
    InsufficientFragments { found: usize, required: usize },
    /// A region lies outside the frame or is empty
    #[error("region is empty after clamping to the frame")]
    InvalidRegion,
}

/// Axis-aligned box in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union with another box
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Integer pixel rectangle `(x, y, width, height)` inside a
    /// `width` x `height` frame, or `None` when nothing is left
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x1.floor().clamp(0.0, width as f32) as u32;
        let y1 = self.y1.floor().clamp(0.0, height as f32) as u32;
        let x2 = self.x2.ceil().clamp(0.0, width as f32) as u32;
        let y2 = self.y2.ceil().clamp(0.0, height as f32) as u32;

        if x2 <= x1 || y2 <= y1 {
            None
        } else {
            Some((x1, y1, x2 - x1, y2 - y1))
        }
    }
}

/// Plate region reported by the detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// One unit of recognized text
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub text: String,
    pub confidence: f32,
}

impl Fragment {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// A plate read from one frame, before normalization
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub identifier_text: String,
    pub region_text: String,
    pub bbox: BoundingBox,
    /// Detector confidence for the plate region
    pub confidence: f32,
}

/// Pixel format regions are converted to before recognition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorFormat {
    #[default]
    Grayscale,
    Rgb,
}

impl ColorFormat {
    pub fn convert(&self, region: RgbImage) -> DynamicImage {
        match self {
            ColorFormat::Grayscale => DynamicImage::ImageLuma8(DynamicImage::ImageRgb8(region).to_luma8()),
            ColorFormat::Rgb => DynamicImage::ImageRgb8(region),
        }
    }
}

/// How recognized fragments are assembled into identifier and region text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentLayout {
    /// Fragment indices concatenated, in order, into the identifier
    pub identifier: Vec<usize>,
    /// Fragment indices concatenated, in order, into the region
    pub region: Vec<usize>,
    /// Regions with fewer fragments are discarded
    pub min_fragments: usize,
}

impl Default for FragmentLayout {
    fn default() -> Self {
        Self {
            identifier: vec![0, 2],
            region: vec![1],
            min_fragments: 3,
        }
    }
}

impl FragmentLayout {
    /// Fewest fragments that satisfy both the floor and every index
    pub fn required_fragments(&self) -> usize {
        let highest = self
            .identifier
            .iter()
            .chain(self.region.iter())
            .map(|&i| i + 1)
            .max()
            .unwrap_or(0);
        self.min_fragments.max(highest)
    }

    /// Build `(identifier, region)` text from fragments
    pub fn assemble(&self, fragments: &[Fragment]) -> Result<(String, String), VisionError> {
        let required = self.required_fragments();
        if fragments.len() < required {
            return Err(VisionError::InsufficientFragments {
                found: fragments.len(),
                required,
            });
        }

        let join = |indices: &[usize]| -> String {
            indices
                .iter()
                .map(|&i| fragments[i].text.as_str())
                .collect::<String>()
        };
        Ok((join(&self.identifier), join(&self.region)))
    }
}

/// Locates plate regions in a frame
pub trait PlateDetector: Send {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, VisionError>;
}

/// Reads text fragments from a cropped plate region
pub trait TextRecognizer: Send {
    fn recognize(&mut self, region: &DynamicImage) -> Result<Vec<Fragment>, VisionError>;
}

/// Result of one adapter pass over a frame
#[derive(Debug, Clone, Default)]
pub struct VisionResult {
    pub candidates: Vec<Candidate>,
    /// Regions the detector reported
    pub regions: usize,
    pub processing_time: Duration,
}

/// Runs detection and recognition over a frame and assembles candidates
pub struct DetectionAdapter {
    detector: Box<dyn PlateDetector>,
    recognizer: Box<dyn TextRecognizer>,
    layout: FragmentLayout,
    color_format: ColorFormat,
}

impl DetectionAdapter {
    pub fn new(
        detector: Box<dyn PlateDetector>,
        recognizer: Box<dyn TextRecognizer>,
        layout: FragmentLayout,
        color_format: ColorFormat,
    ) -> Self {
        Self {
            detector,
            recognizer,
            layout,
            color_format,
        }
    }

    /// Detect plates and read them. A detector failure fails the frame; a
    /// recognition failure drops only the affected region.
    pub fn process(&mut self, frame: &Frame) -> Result<VisionResult, VisionError> {
        let start = Instant::now();
        let (width, height) = frame.dimensions();

        let detections = self.detector.detect(&frame.image)?;
        let mut candidates = Vec::with_capacity(detections.len());

        for detection in &detections {
            match self.read_region(frame, detection, width, height) {
                Ok(candidate) => candidates.push(candidate),
                Err(e @ VisionError::InsufficientFragments { .. }) | Err(e @ VisionError::InvalidRegion) => {
                    debug!("Discarding region {:?}: {}", detection.bbox, e);
                }
                Err(e) => {
                    warn!("Recognition failed for region {:?}: {}", detection.bbox, e);
                }
            }
        }

        let processing_time = start.elapsed();
        debug!(
            "Vision processing of frame {} complete in {:?}: {} regions, {} candidates",
            frame.seq,
            processing_time,
            detections.len(),
            candidates.len()
        );

        Ok(VisionResult {
            candidates,
            regions: detections.len(),
            processing_time,
        })
    }

    fn read_region(
        &mut self,
        frame: &Frame,
        detection: &Detection,
        width: u32,
        height: u32,
    ) -> Result<Candidate, VisionError> {
        let (x, y, w, h) = detection
            .bbox
            .clamp_to(width, height)
            .ok_or(VisionError::InvalidRegion)?;

        let crop = image::imageops::crop_imm(&frame.image, x, y, w, h).to_image();
        let region = self.color_format.convert(crop);

        let fragments = self.recognizer.recognize(&region)?;
        let (identifier_text, region_text) = self.layout.assemble(&fragments)?;

        Ok(Candidate {
            identifier_text,
            region_text,
            bbox: detection.bbox,
            confidence: detection.confidence,
        })
    }
}
