//! License plate detection
//!
//! Runs a YOLO-style ONNX export and turns its raw proposals into plate
//! boxes in frame coordinates.

use image::RgbImage;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

use super::models::OnnxSession;
use super::preprocess::{into_shape_and_data, preprocess_for_detection};
use super::{BoundingBox, Detection, PlateDetector, VisionError};
use crate::config::DetectionSettings;

/// Decoding parameters for raw detector output
#[derive(Debug, Clone, Copy)]
pub struct DecodeConfig {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Class scores after the 4 box values
    pub num_classes: usize,
    /// Model space to frame space
    pub scale_x: f32,
    pub scale_y: f32,
    pub frame_width: u32,
    pub frame_height: u32,
}

/// YOLO plate detector on ONNX Runtime
pub struct OnnxPlateDetector {
    session: OnnxSession,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
    num_classes: usize,
}

impl OnnxPlateDetector {
    pub fn new(model_path: &Path, settings: &DetectionSettings) -> Result<Self, VisionError> {
        let session = OnnxSession::new(model_path).map_err(|e| VisionError::Model(format!("{:#}", e)))?;

        // Prefer the size baked into the model over the configured one
        let input_size = session
            .input_info()
            .first()
            .and_then(|info| info.fixed_dim(2))
            .unwrap_or(settings.input_size);

        Ok(Self {
            session,
            input_size,
            confidence_threshold: settings.confidence_threshold,
            iou_threshold: settings.iou_threshold,
            num_classes: settings.num_classes,
        })
    }

    pub fn from_settings(settings: &DetectionSettings) -> Result<Self, VisionError> {
        Self::new(&settings.model_path, settings)
    }
}

impl PlateDetector for OnnxPlateDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, VisionError> {
        let start = Instant::now();
        let (width, height) = image.dimensions();

        let (tensor, scale_x, scale_y) = preprocess_for_detection(image, self.input_size);
        let (shape, data) = into_shape_and_data(tensor);

        let (out_shape, out_data) = self
            .session
            .run(shape, data)
            .map_err(|e| VisionError::Inference(format!("{:#}", e)))?;

        let detections = decode_yolo(
            &out_shape,
            &out_data,
            &DecodeConfig {
                confidence_threshold: self.confidence_threshold,
                iou_threshold: self.iou_threshold,
                num_classes: self.num_classes,
                scale_x,
                scale_y,
                frame_width: width,
                frame_height: height,
            },
        )?;

        debug!(
            "Plate detection complete in {:?}: {} plates",
            start.elapsed(),
            detections.len()
        );
        Ok(detections)
    }
}

/// Decode a `[1, 4 + classes, N]` (or transposed `[1, N, 4 + classes]`)
/// YOLO output into boxes after thresholding and NMS
pub fn decode_yolo(shape: &[usize], data: &[f32], config: &DecodeConfig) -> Result<Vec<Detection>, VisionError> {
    let (rows, cols) = match shape {
        [1, a, b] | [a, b] => (*a, *b),
        _ => {
            return Err(VisionError::Inference(format!(
                "unexpected detector output shape {:?}",
                shape
            )))
        }
    };

    if rows * cols != data.len() {
        return Err(VisionError::Inference(format!(
            "detector output has {} values, shape {:?}",
            data.len(),
            shape
        )));
    }

    // 4 box values plus one score per class; a square output is read attribute-major
    let attributes = 4 + config.num_classes.max(1);
    let transposed = if rows == attributes {
        false
    } else if cols == attributes {
        true
    } else {
        return Err(VisionError::Inference(format!(
            "detector output shape {:?} has no axis of {} attributes",
            shape, attributes
        )));
    };
    let proposals = if transposed { rows } else { cols };

    let value = |attr: usize, i: usize| -> f32 {
        if transposed {
            data[i * attributes + attr]
        } else {
            data[attr * proposals + i]
        }
    };

    let mut candidates = Vec::new();
    for i in 0..proposals {
        let score = (4..attributes)
            .map(|attr| value(attr, i))
            .fold(f32::NEG_INFINITY, f32::max);
        if score < config.confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (value(0, i), value(1, i), value(2, i), value(3, i));
        let bbox = BoundingBox::new(
            ((cx - w / 2.0) * config.scale_x).max(0.0),
            ((cy - h / 2.0) * config.scale_y).max(0.0),
            ((cx + w / 2.0) * config.scale_x).min(config.frame_width as f32),
            ((cy + h / 2.0) * config.scale_y).min(config.frame_height as f32),
        );
        if bbox.area() <= 0.0 {
            continue;
        }

        candidates.push(Detection {
            bbox,
            confidence: score,
        });
    }

    Ok(non_maximum_suppression(candidates, config.iou_threshold))
}

/// Greedy NMS: sort by confidence descending, suppress overlapping boxes
pub fn non_maximum_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        kept.push(detections[i]);
        for j in (i + 1)..detections.len() {
            if detections[i].bbox.iou(&detections[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DecodeConfig {
        DecodeConfig {
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            num_classes: 1,
            scale_x: 2.0,
            scale_y: 1.0,
            frame_width: 1280,
            frame_height: 720,
        }
    }

    /// Attribute-major layout: [cx..., cy..., w..., h..., score...]
    fn attribute_major(proposals: &[[f32; 5]]) -> Vec<f32> {
        let mut data = vec![0.0; 5 * proposals.len()];
        for (i, p) in proposals.iter().enumerate() {
            for (attr, v) in p.iter().enumerate() {
                data[attr * proposals.len() + i] = *v;
            }
        }
        data
    }

    #[test]
    fn test_decode_scales_and_thresholds() {
        let proposals = [
            [100.0, 200.0, 40.0, 20.0, 0.9],
            [300.0, 300.0, 40.0, 20.0, 0.2],
        ];
        let data = attribute_major(&proposals);

        let detections = decode_yolo(&[1, 5, 2], &data, &config()).unwrap();
        assert_eq!(detections.len(), 1);
        let bbox = detections[0].bbox;
        assert_eq!(bbox, BoundingBox::new(160.0, 190.0, 240.0, 210.0));
        assert!((detections[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_transposed_output() {
        let proposals = [
            [100.0, 200.0, 40.0, 20.0, 0.9],
            [300.0, 300.0, 40.0, 20.0, 0.8],
            [500.0, 100.0, 40.0, 20.0, 0.1],
            [50.0, 50.0, 10.0, 10.0, 0.05],
            [60.0, 60.0, 10.0, 10.0, 0.05],
            [70.0, 70.0, 10.0, 10.0, 0.05],
        ];
        let data: Vec<f32> = proposals.iter().flatten().copied().collect();

        let detections = decode_yolo(&[1, 6, 5], &data, &config()).unwrap();
        assert_eq!(detections.len(), 2);
        assert!(detections[0].confidence >= detections[1].confidence);
    }

    #[test]
    fn test_decode_clamps_to_frame() {
        let data = attribute_major(&[[630.0, 715.0, 40.0, 20.0, 0.9]]);
        let detections = decode_yolo(&[1, 5, 1], &data, &config()).unwrap();
        assert_eq!(detections[0].bbox.x2, 1280.0);
        assert_eq!(detections[0].bbox.y2, 720.0);
    }

    #[test]
    fn test_decode_rejects_bad_shape() {
        assert!(decode_yolo(&[1, 5, 3], &[0.0; 10], &config()).is_err());
        assert!(decode_yolo(&[1, 2, 3, 4], &[0.0; 24], &config()).is_err());
        assert!(decode_yolo(&[1, 4, 2], &[0.0; 8], &config()).is_err());
        // Two-class output against a single-class config
        assert!(decode_yolo(&[1, 6, 3], &[0.0; 18], &config()).is_err());
    }

    #[test]
    fn test_decode_single_proposal_transposed() {
        let data = [100.0, 200.0, 40.0, 20.0, 0.9];
        let detections = decode_yolo(&[1, 1, 5], &data, &config()).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox, BoundingBox::new(160.0, 190.0, 240.0, 210.0));
    }

    #[test]
    fn test_decode_square_output_is_attribute_major() {
        let proposals = [
            [100.0, 200.0, 40.0, 20.0, 0.9],
            [300.0, 300.0, 40.0, 20.0, 0.1],
            [500.0, 100.0, 40.0, 20.0, 0.1],
            [50.0, 50.0, 10.0, 10.0, 0.1],
            [70.0, 70.0, 10.0, 10.0, 0.1],
        ];
        let data = attribute_major(&proposals);
        let detections = decode_yolo(&[1, 5, 5], &data, &config()).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox, BoundingBox::new(160.0, 190.0, 240.0, 210.0));
    }

    #[test]
    fn test_decode_best_class_score() {
        // [cx, cy, w, h, plate, other] for two proposals, attribute-major
        let data = [
            100.0, 300.0, // cx
            200.0, 300.0, // cy
            40.0, 40.0, // w
            20.0, 20.0, // h
            0.1, 0.2, // class 0
            0.8, 0.3, // class 1
        ];
        let config = DecodeConfig {
            num_classes: 2,
            ..config()
        };
        let detections = decode_yolo(&[1, 6, 2], &data, &config).unwrap();
        assert_eq!(detections.len(), 1);
        assert!((detections[0].confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlaps() {
        let detections = vec![
            Detection {
                bbox: BoundingBox::new(0.0, 0.0, 100.0, 50.0),
                confidence: 0.7,
            },
            Detection {
                bbox: BoundingBox::new(5.0, 2.0, 105.0, 52.0),
                confidence: 0.9,
            },
            Detection {
                bbox: BoundingBox::new(300.0, 300.0, 400.0, 350.0),
                confidence: 0.6,
            },
        ];

        let kept = non_maximum_suppression(detections, 0.45);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(kept[1].bbox.x1, 300.0);
    }
}
