//! OCR (Optical Character Recognition) module
//!
//! Reads plate text with a CRNN/CTC recognition model via ONNX Runtime. A
//! plate usually carries several text units (letter group, digit group,
//! region line); each unit is located by ink projection and recognized on
//! its own.

use image::{DynamicImage, GrayImage};
use imageproc::contrast::otsu_level;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use super::models::OnnxSession;
use super::preprocess::{into_shape_and_data, preprocess_for_recognition, PreprocessConfig};
use super::{Fragment, TextRecognizer, VisionError};
use crate::config::RecognitionSettings;

/// Pixel rectangle of one text unit: (x, y, width, height)
pub type TextUnit = (u32, u32, u32, u32);

/// Text recognizer using a CRNN/CTC model
pub struct OnnxTextRecognizer {
    session: OnnxSession,
    charset: Vec<String>,
    preprocess: PreprocessConfig,
}

impl OnnxTextRecognizer {
    pub fn new(model_path: &Path, dictionary_path: &Path) -> Result<Self, VisionError> {
        let charset = load_dictionary(dictionary_path)?;
        let session = OnnxSession::new(model_path).map_err(|e| VisionError::Model(format!("{:#}", e)))?;

        let mut preprocess = PreprocessConfig::default();
        if let Some(height) = session.input_info().first().and_then(|info| info.fixed_dim(2)) {
            preprocess.rec_target_height = height;
        }

        info!(
            "Text recognizer ready: {} characters, input height {}",
            charset.len(),
            preprocess.rec_target_height
        );

        Ok(Self {
            session,
            charset,
            preprocess,
        })
    }

    pub fn from_settings(settings: &RecognitionSettings) -> Result<Self, VisionError> {
        debug!("Recognition languages: {:?}", settings.languages);
        Self::new(&settings.model_path, &settings.dictionary_path)
    }

    fn recognize_unit(&mut self, region: &image::RgbImage, unit: TextUnit) -> Result<Option<Fragment>, VisionError> {
        let (x, y, w, h) = pad_unit(unit, 2, region.width(), region.height());
        let crop = image::imageops::crop_imm(region, x, y, w, h).to_image();

        let (shape, data) = into_shape_and_data(preprocess_for_recognition(&crop, &self.preprocess));
        let (out_shape, out_data) = self
            .session
            .run(shape, data)
            .map_err(|e| VisionError::Inference(format!("{:#}", e)))?;

        let (seq_len, num_classes) = match out_shape[..] {
            [1, t, c] | [t, c] => (t, c),
            _ => {
                return Err(VisionError::Inference(format!(
                    "unexpected recognizer output shape {:?}",
                    out_shape
                )))
            }
        };

        let (text, confidence) = ctc_greedy_decode(&out_data, seq_len, num_classes, &self.charset);
        let text = text.trim();
        if text.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Fragment::new(text, confidence)))
        }
    }
}

impl TextRecognizer for OnnxTextRecognizer {
    fn recognize(&mut self, region: &DynamicImage) -> Result<Vec<Fragment>, VisionError> {
        let start = Instant::now();
        let gray = region.to_luma8();

        let mut units = segment_text_units(&gray);
        if units.is_empty() {
            units.push((0, 0, gray.width(), gray.height()));
        }

        // The model takes three channels; grayscale regions are replicated
        let rgb = region.to_rgb8();
        let mut fragments = Vec::with_capacity(units.len());
        for unit in units {
            if let Some(fragment) = self.recognize_unit(&rgb, unit)? {
                fragments.push(fragment);
            }
        }

        debug!(
            "Recognized {} fragments in {:?}: {:?}",
            fragments.len(),
            start.elapsed(),
            fragments.iter().map(|f| f.text.as_str()).collect::<Vec<_>>()
        );
        Ok(fragments)
    }
}

/// Load a character dictionary, one entry per line. Class 0 is the CTC
/// blank, so entry `i` decodes class `i + 1`; a trailing space entry is
/// appended.
pub fn load_dictionary(path: &Path) -> Result<Vec<String>, VisionError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| VisionError::Model(format!("dictionary {:?}: {}", path, e)))?;

    let mut charset: Vec<String> = content
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if charset.is_empty() {
        return Err(VisionError::Model(format!("dictionary {:?} is empty", path)));
    }
    charset.push(" ".to_string());
    Ok(charset)
}

/// Greedy CTC decoding over `[seq_len, num_classes]` probabilities.
/// Returns the text and the mean probability of its characters.
pub fn ctc_greedy_decode(
    probs: &[f32],
    seq_len: usize,
    num_classes: usize,
    charset: &[String],
) -> (String, f32) {
    let mut text = String::new();
    let mut confidences = Vec::new();
    let mut previous = 0usize;

    for step in probs.chunks_exact(num_classes.max(1)).take(seq_len) {
        let (index, prob) = step
            .iter()
            .copied()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best });

        if index != 0 && index != previous {
            if let Some(ch) = charset.get(index - 1) {
                text.push_str(ch);
                confidences.push(prob);
            }
        }
        previous = index;
    }

    let confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f32>() / confidences.len() as f32
    };
    (text, confidence)
}

/// Locate text units on a plate by ink projection: row bands become lines,
/// wide column gaps inside a line split words. Units are ordered by left
/// edge, then top.
pub fn segment_text_units(gray: &GrayImage) -> Vec<TextUnit> {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let level = otsu_level(gray);
    let mut ink: Vec<bool> = gray.pixels().map(|p| p[0] <= level).collect();

    // Text is the minority class; flip for light text on a dark plate
    let ink_count = ink.iter().filter(|&&i| i).count();
    if ink_count * 2 > ink.len() {
        ink.iter_mut().for_each(|i| *i = !*i);
    }

    let w = width as usize;
    let at = |x: usize, y: usize| ink[y * w + x];

    let min_row_ink = (w / 50).max(1);
    let min_line_height = (height as usize / 12).max(2);

    let mut lines = Vec::new();
    let mut line_start: Option<usize> = None;
    for y in 0..=height as usize {
        let is_text = y < height as usize && (0..w).filter(|&x| at(x, y)).count() >= min_row_ink;
        match (is_text, line_start) {
            (true, None) => line_start = Some(y),
            (false, Some(start)) => {
                if y - start >= min_line_height {
                    lines.push((start, y));
                }
                line_start = None;
            }
            _ => {}
        }
    }

    let mut units = Vec::new();
    for (top, bottom) in lines {
        let max_gap = ((bottom - top) / 2).max(2);
        let column_has_ink = |x: usize| (top..bottom).any(|y| at(x, y));

        let mut run: Option<(usize, usize)> = None;
        let mut gap = 0usize;
        for x in 0..=w {
            let inked = x < w && column_has_ink(x);
            if inked {
                run = Some(match run {
                    Some((start, _)) => (start, x + 1),
                    None => (x, x + 1),
                });
                gap = 0;
                continue;
            }

            gap += 1;
            if let Some((start, end)) = run {
                if gap > max_gap || x == w {
                    if end - start >= 2 {
                        units.push((start as u32, top as u32, (end - start) as u32, (bottom - top) as u32));
                    }
                    run = None;
                }
            }
        }
    }

    units.sort_by_key(|&(x, y, _, _)| (x, y));
    units
}

fn pad_unit(unit: TextUnit, pad: u32, width: u32, height: u32) -> TextUnit {
    let (x, y, w, h) = unit;
    let x1 = x.saturating_sub(pad);
    let y1 = y.saturating_sub(pad);
    let x2 = (x + w + pad).min(width);
    let y2 = (y + h + pad).min(height);
    (x1, y1, x2.saturating_sub(x1).max(1), y2.saturating_sub(y1).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn charset(chars: &str) -> Vec<String> {
        chars.chars().map(|c| c.to_string()).collect()
    }

    /// One-hot probability rows for the given class indices
    fn one_hot(indices: &[usize], num_classes: usize) -> Vec<f32> {
        let mut probs = vec![0.0; indices.len() * num_classes];
        for (t, &i) in indices.iter().enumerate() {
            probs[t * num_classes + i] = 0.9;
        }
        probs
    }

    #[test]
    fn test_ctc_collapses_repeats_and_blanks() {
        let chars = charset("AB12");
        // A A _ B B _ B 1 1 _ 2
        let probs = one_hot(&[1, 1, 0, 2, 2, 0, 2, 3, 3, 0, 4], 5);

        let (text, confidence) = ctc_greedy_decode(&probs, 11, 5, &chars);
        assert_eq!(text, "ABB12");
        assert!((confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_ctc_all_blank() {
        let probs = one_hot(&[0, 0, 0], 3);
        let (text, confidence) = ctc_greedy_decode(&probs, 3, 3, &charset("AB"));
        assert!(text.is_empty());
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn test_ctc_ignores_classes_outside_dictionary() {
        let probs = one_hot(&[1, 7, 2], 8);
        let (text, _) = ctc_greedy_decode(&probs, 3, 8, &charset("AB"));
        assert_eq!(text, "AB");
    }

    #[test]
    fn test_load_dictionary_appends_space() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "ก\r\nข\n\n1\n").unwrap();

        let chars = load_dictionary(file.path()).unwrap();
        assert_eq!(chars, vec!["ก", "ข", "1", " "]);
    }

    #[test]
    fn test_load_empty_dictionary_fails() {
        let file = NamedTempFile::new().unwrap();
        assert!(load_dictionary(file.path()).is_err());
        assert!(load_dictionary(Path::new("/nonexistent/dict.txt")).is_err());
    }

    fn fill(image: &mut GrayImage, x1: u32, y1: u32, x2: u32, y2: u32) {
        for y in y1..y2 {
            for x in x1..x2 {
                image.put_pixel(x, y, Luma([0]));
            }
        }
    }

    #[test]
    fn test_segment_plate_layout() {
        let mut plate = GrayImage::from_pixel(140, 60, Luma([255]));
        // Letter group: two glyphs with a narrow gap
        fill(&mut plate, 10, 5, 18, 25);
        fill(&mut plate, 22, 5, 30, 25);
        // Digit group
        fill(&mut plate, 60, 5, 110, 25);
        // Region line underneath, starting between the two groups
        fill(&mut plate, 20, 35, 100, 50);

        let units = segment_text_units(&plate);
        assert_eq!(
            units,
            vec![(10, 5, 20, 20), (20, 35, 80, 15), (60, 5, 50, 20)]
        );
    }

    #[test]
    fn test_segment_light_text_on_dark_plate() {
        let mut plate = GrayImage::from_pixel(80, 30, Luma([0]));
        for y in 5..20 {
            for x in 10..40 {
                plate.put_pixel(x, y, Luma([255]));
            }
        }

        let units = segment_text_units(&plate);
        assert_eq!(units, vec![(10, 5, 30, 15)]);
    }

    #[test]
    fn test_segment_blank_plate() {
        let plate = GrayImage::from_pixel(50, 20, Luma([200]));
        assert!(segment_text_units(&plate).is_empty());
        assert!(segment_text_units(&GrayImage::new(0, 0)).is_empty());
    }

    #[test]
    fn test_pad_unit_clamps() {
        assert_eq!(pad_unit((0, 0, 10, 10), 2, 11, 11), (0, 0, 11, 11));
        assert_eq!(pad_unit((5, 5, 4, 4), 2, 20, 20), (3, 3, 8, 8));
    }
}
