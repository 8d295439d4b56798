//! Overlay Presentation Layer
//!
//! Draws match verdicts onto frames: a colored box around each plate and a
//! translucent label with the plate text and holder. The annotated frame is
//! written to disk so an external viewer can display it.

use ab_glyph::FontVec;
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::capture::frame::Frame;
use crate::config::OverlaySettings;
use crate::pipeline::CandidateResult;

const MATCH_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const NO_MATCH_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const MATCH_BACKGROUND: Rgb<u8> = Rgb([0, 128, 0]);
const NO_MATCH_BACKGROUND: Rgb<u8> = Rgb([128, 0, 0]);
const LABEL_ALPHA: u8 = 180;
const BOX_THICKNESS: i32 = 3;
const LABEL_PADDING: i32 = 5;
/// Labels sit this far above the plate, but never above `LABEL_MIN_Y`
const LABEL_OFFSET: i32 = 100;
const LABEL_MIN_Y: i32 = 30;

/// Failures while drawing or publishing a frame
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to load font {path:?}: {reason}")]
    Font { path: PathBuf, reason: String },
    #[error("failed to save overlay to {path:?}: {reason}")]
    Save { path: PathBuf, reason: String },
}

/// Presents verdicts for a frame
pub trait OverlayRenderer: Send {
    fn render(&mut self, frame: &Frame, results: &[CandidateResult]) -> Result<(), RenderError>;
}

/// Renders verdicts into an image file
pub struct ImageOverlay {
    font: Option<FontVec>,
    font_size: f32,
    output_path: PathBuf,
    save_every: u32,
    rendered: u64,
}

impl ImageOverlay {
    /// Create an overlay, loading the label font once
    pub fn new(settings: &OverlaySettings) -> Result<Self, RenderError> {
        let font = load_font(&settings.font_path)?;
        info!("Loaded overlay font from {:?}", settings.font_path);
        Ok(Self {
            font: Some(font),
            ..Self::without_font(settings)
        })
    }

    /// Overlay that draws boxes only
    pub fn without_font(settings: &OverlaySettings) -> Self {
        Self {
            font: None,
            font_size: settings.font_size.max(1.0),
            output_path: settings.output_path.clone(),
            save_every: settings.save_every,
            rendered: 0,
        }
    }

    /// Draw every result onto a copy of `image`
    pub fn annotate(&self, image: &RgbImage, results: &[CandidateResult]) -> RgbImage {
        let mut canvas = image.clone();
        for result in results {
            let (color, background) = verdict_colors(result.verdict.matched);
            draw_box(&mut canvas, result, color);

            if let Some(font) = &self.font {
                let label = result.verdict.label(&result.identifier, &result.region);
                let x = result.candidate.bbox.x1.max(0.0) as i32;
                let y = (result.candidate.bbox.y1 as i32 - LABEL_OFFSET).max(LABEL_MIN_Y);
                draw_label(&mut canvas, font, self.font_size, (x, y), &label, (color, background));
            }
        }
        canvas
    }

    fn should_save(&self) -> bool {
        self.save_every > 0 && self.rendered % self.save_every as u64 == 0
    }
}

impl OverlayRenderer for ImageOverlay {
    fn render(&mut self, frame: &Frame, results: &[CandidateResult]) -> Result<(), RenderError> {
        self.rendered += 1;
        if !self.should_save() {
            return Ok(());
        }

        let annotated = self.annotate(&frame.image, results);
        save_atomic(&annotated, &self.output_path)?;
        debug!(
            "Wrote overlay for frame {} ({} plates) to {:?}",
            frame.seq,
            results.len(),
            self.output_path
        );
        Ok(())
    }
}

fn load_font(path: &Path) -> Result<FontVec, RenderError> {
    let data = std::fs::read(path).map_err(|e| RenderError::Font {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    FontVec::try_from_vec(data).map_err(|e| RenderError::Font {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn draw_box(canvas: &mut RgbImage, result: &CandidateResult, color: Rgb<u8>) {
    let bbox = &result.candidate.bbox;
    let Some((x, y, w, h)) = bbox.clamp_to(canvas.width(), canvas.height()) else {
        return;
    };

    for inset in 0..BOX_THICKNESS {
        let width = w as i32 - 2 * inset;
        let height = h as i32 - 2 * inset;
        if width <= 0 || height <= 0 {
            break;
        }
        let rect = Rect::at(x as i32 + inset, y as i32 + inset).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}

/// Box and label text color, then label background color
fn verdict_colors(matched: bool) -> (Rgb<u8>, Rgb<u8>) {
    if matched {
        (MATCH_COLOR, MATCH_BACKGROUND)
    } else {
        (NO_MATCH_COLOR, NO_MATCH_BACKGROUND)
    }
}

fn draw_label(
    canvas: &mut RgbImage,
    font: &FontVec,
    size: f32,
    (x, y): (i32, i32),
    label: &str,
    (text_color, background): (Rgb<u8>, Rgb<u8>),
) {
    let lines: Vec<&str> = label.lines().collect();
    let line_height = (size * 1.2).ceil() as i32;

    let text_width = lines
        .iter()
        .map(|line| text_size(size, font, line).0 as i32)
        .max()
        .unwrap_or(0);
    let text_height = line_height * lines.len() as i32;

    blend_rect(
        canvas,
        x - LABEL_PADDING,
        y - LABEL_PADDING,
        text_width + 2 * LABEL_PADDING,
        text_height + 2 * LABEL_PADDING,
        background,
        LABEL_ALPHA,
    );

    for (i, line) in lines.iter().enumerate() {
        draw_text_mut(canvas, text_color, x, y + i as i32 * line_height, size, font, line);
    }
}

/// Fill a rectangle with `color` at `alpha`/255 opacity, clipped to the canvas
fn blend_rect(canvas: &mut RgbImage, x: i32, y: i32, width: i32, height: i32, color: Rgb<u8>, alpha: u8) {
    let x1 = x.max(0) as u32;
    let y1 = y.max(0) as u32;
    let x2 = (x + width).clamp(0, canvas.width() as i32) as u32;
    let y2 = (y + height).clamp(0, canvas.height() as i32) as u32;

    let a = alpha as u32;
    for py in y1..y2 {
        for px in x1..x2 {
            let pixel = canvas.get_pixel_mut(px, py);
            for c in 0..3 {
                pixel[c] = ((color[c] as u32 * a + pixel[c] as u32 * (255 - a)) / 255) as u8;
            }
        }
    }
}

/// Write through a temporary file so readers never see a partial image
fn save_atomic(image: &RgbImage, path: &Path) -> Result<(), RenderError> {
    let save_error = |reason: String| RenderError::Save {
        path: path.to_path_buf(),
        reason,
    };

    let format = ImageFormat::from_path(path).unwrap_or(ImageFormat::Png);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "overlay".to_string());
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name));

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| save_error(e.to_string()))?;
        }
    }

    image
        .save_with_format(&temp_path, format)
        .map_err(|e| save_error(e.to_string()))?;
    std::fs::rename(&temp_path, path).map_err(|e| {
        std::fs::remove_file(&temp_path).ok();
        save_error(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::matching::{MatchVerdict, Scores};
    use crate::analysis::normalize::{Alphabet, TextNormalizer};
    use crate::vision::{BoundingBox, Candidate};

    fn result(matched: bool) -> CandidateResult {
        let normalizer = TextNormalizer::new(Alphabet::Latin);
        CandidateResult {
            candidate: Candidate {
                identifier_text: "AB1234".to_string(),
                region_text: "BANGKOK".to_string(),
                bbox: BoundingBox::new(20.0, 40.0, 80.0, 70.0),
                confidence: 0.9,
            },
            identifier: normalizer.normalize("AB1234"),
            region: normalizer.normalize("BANGKOK"),
            verdict: MatchVerdict {
                matched,
                holder: matched.then(|| "Somchai".to_string()),
                matched_identifier: matched.then(|| "AB1234".to_string()),
                scores: Scores {
                    identifier: 100,
                    region: 100,
                },
            },
        }
    }

    fn settings(dir: &Path, save_every: u32) -> OverlaySettings {
        OverlaySettings {
            font_path: dir.join("missing.ttf"),
            font_size: 20.0,
            output_path: dir.join("out").join("overlay.png"),
            save_every,
        }
    }

    #[test]
    fn test_box_color_follows_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let overlay = ImageOverlay::without_font(&settings(dir.path(), 1));
        let image = RgbImage::new(100, 100);

        let matched = overlay.annotate(&image, &[result(true)]);
        assert_eq!(*matched.get_pixel(20, 40), MATCH_COLOR);
        assert_eq!(*matched.get_pixel(22, 42), MATCH_COLOR);
        assert_eq!(*matched.get_pixel(50, 55), Rgb([0, 0, 0]));

        let missed = overlay.annotate(&image, &[result(false)]);
        assert_eq!(*missed.get_pixel(79, 69), NO_MATCH_COLOR);
    }

    #[test]
    fn test_blend_rect_is_translucent() {
        let mut canvas = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
        blend_rect(&mut canvas, -3, -3, 8, 8, MATCH_BACKGROUND, LABEL_ALPHA);

        assert_eq!(*canvas.get_pixel(0, 0), Rgb([75, 165, 75]));
        assert_eq!(*canvas.get_pixel(4, 4), Rgb([75, 165, 75]));
        assert_eq!(*canvas.get_pixel(5, 5), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_label_colors_follow_verdict() {
        assert_eq!(verdict_colors(true), (Rgb([0, 255, 0]), Rgb([0, 128, 0])));
        assert_eq!(verdict_colors(false), (Rgb([255, 0, 0]), Rgb([128, 0, 0])));
    }

    #[test]
    fn test_unmatched_label_background_is_red() {
        let mut canvas = RgbImage::new(4, 4);
        let (_, background) = verdict_colors(false);
        blend_rect(&mut canvas, 0, 0, 4, 4, background, LABEL_ALPHA);

        // 128 * 180 / 255
        assert_eq!(*canvas.get_pixel(1, 1), Rgb([90, 0, 0]));
    }

    #[test]
    fn test_render_saves_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), 1);
        let mut overlay = ImageOverlay::without_font(&settings);
        let frame = Frame::new(1, RgbImage::new(100, 100));

        overlay.render(&frame, &[result(true)]).unwrap();

        let saved = image::open(&settings.output_path).unwrap().to_rgb8();
        assert_eq!(*saved.get_pixel(20, 40), MATCH_COLOR);
        let leftovers: Vec<_> = std::fs::read_dir(settings.output_path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_save_every_nth_frame() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), 3);
        let mut overlay = ImageOverlay::without_font(&settings);
        let frame = Frame::new(1, RgbImage::new(10, 10));

        overlay.render(&frame, &[]).unwrap();
        overlay.render(&frame, &[]).unwrap();
        assert!(!settings.output_path.exists());
        overlay.render(&frame, &[]).unwrap();
        assert!(settings.output_path.exists());
    }

    #[test]
    fn test_save_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), 0);
        let mut overlay = ImageOverlay::without_font(&settings);

        overlay.render(&Frame::new(1, RgbImage::new(10, 10)), &[]).unwrap();
        assert!(!settings.output_path.exists());
    }

    #[test]
    fn test_missing_font_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageOverlay::new(&settings(dir.path(), 1)),
            Err(RenderError::Font { .. })
        ));
    }
}
