//! Image preprocessing for ONNX models
//!
//! Handles image resizing, normalization, and tensor conversion for the plate
//! detector and the text recognizer.

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::{Array3, Array4};

/// Preprocessing configuration for the text recognizer
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Target height for the recognition model (typically 32 or 48)
    pub rec_target_height: u32,
    /// Maximum width for recognition
    pub rec_max_width: u32,
    /// Mean values for normalization [R, G, B]
    pub mean: [f32; 3],
    /// Std values for normalization [R, G, B]
    pub std: [f32; 3],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            rec_target_height: 48,
            rec_max_width: 640,
            // (pixel / 255.0 - 0.5) / 0.5 maps [0, 255] -> [-1, 1]
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        }
    }
}

/// Convert an RGB image to an HWC f32 array scaled to 0-1
pub fn rgb_to_f32(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
        image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let (h, w, _) = image.dim();
    let mut normalized = Array3::<f32>::zeros((h, w, 3));

    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                normalized[[y, x, c]] = (image[[y, x, c]] - mean[c]) / std[c];
            }
        }
    }

    normalized
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    let mut tensor = Array4::<f32>::zeros((1, c, h, w));

    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                tensor[[0, ch, y, x]] = image[[y, x, ch]];
            }
        }
    }

    tensor
}

/// Flatten a tensor into the `(shape, data)` pair the runtime consumes
pub fn into_shape_and_data(tensor: Array4<f32>) -> ([usize; 4], Vec<f32>) {
    let (n, c, h, w) = tensor.dim();
    let tensor = if tensor.is_standard_layout() {
        tensor
    } else {
        tensor.as_standard_layout().into_owned()
    };
    let (data, _offset) = tensor.into_raw_vec_and_offset();
    ([n, c, h, w], data)
}

/// Stretch a frame to a square detector input
/// Returns (tensor, scale_x, scale_y) where scales map model space back to the frame
pub fn preprocess_for_detection(image: &RgbImage, target_size: u32) -> (Array4<f32>, f32, f32) {
    let (width, height) = image.dimensions();
    let resized = image::imageops::resize(image, target_size, target_size, FilterType::Triangle);

    let tensor = hwc_to_nchw(&rgb_to_f32(&resized));
    let scale_x = width as f32 / target_size as f32;
    let scale_y = height as f32 / target_size as f32;

    (tensor, scale_x, scale_y)
}

/// Resize image for recognition model (fixed height, variable width)
pub fn resize_for_recognition(
    image: &Array3<f32>,
    target_height: u32,
    max_width: u32,
) -> Array3<f32> {
    let (h, w, c) = image.dim();
    let h = h as f32;
    let w = w as f32;

    // Scale to target height
    let scale = target_height as f32 / h;
    let new_w = ((w * scale) as u32).clamp(1, max_width.max(1)) as usize;
    let new_h = target_height as usize;

    let mut resized = Array3::<f32>::zeros((new_h, new_w, c));
    let h = h as usize;

    for y in 0..new_h {
        for x in 0..new_w {
            let src_y = (y as f32 / scale).min(h as f32 - 1.0);
            let src_x = (x as f32 / scale).min(w - 1.0);

            // Bilinear interpolation
            let y0 = src_y.floor() as usize;
            let y1 = (y0 + 1).min(h - 1);
            let x0 = src_x.floor() as usize;
            let x1 = (x0 + 1).min(w as usize - 1);

            let fy = src_y - y0 as f32;
            let fx = src_x - x0 as f32;

            for ch in 0..c {
                let v00 = image[[y0, x0, ch]];
                let v01 = image[[y0, x1, ch]];
                let v10 = image[[y1, x0, ch]];
                let v11 = image[[y1, x1, ch]];

                let v0 = v00 * (1.0 - fx) + v01 * fx;
                let v1 = v10 * (1.0 - fx) + v11 * fx;
                resized[[y, x, ch]] = v0 * (1.0 - fy) + v1 * fy;
            }
        }
    }

    resized
}

/// Full preprocessing pipeline for recognition
pub fn preprocess_for_recognition(image: &RgbImage, config: &PreprocessConfig) -> Array4<f32> {
    let rgb = rgb_to_f32(image);

    // 1. Resize to fixed height
    let resized = resize_for_recognition(&rgb, config.rec_target_height, config.rec_max_width);

    // 2. Normalize
    let normalized = normalize(&resized, &config.mean, &config.std);

    // 3. Convert to NCHW tensor
    hwc_to_nchw(&normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_rgb_to_f32() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));
        image.put_pixel(1, 0, Rgb([0, 255, 128]));

        let rgb = rgb_to_f32(&image);

        assert_eq!(rgb.dim(), (1, 2, 3));
        assert!((rgb[[0, 0, 0]] - 1.0).abs() < 0.01);
        assert!(rgb[[0, 0, 1]].abs() < 0.01);
        assert!((rgb[[0, 1, 1]] - 1.0).abs() < 0.01);
        assert!((rgb[[0, 1, 2]] - 0.502).abs() < 0.01);
    }

    #[test]
    fn test_hwc_to_nchw() {
        let hwc = Array3::<f32>::from_shape_fn((10, 20, 3), |(h, w, c)| {
            (h * 100 + w * 10 + c) as f32
        });

        let nchw = hwc_to_nchw(&hwc);

        assert_eq!(nchw.dim(), (1, 3, 10, 20));
        assert_eq!(nchw[[0, 1, 5, 10]], hwc[[5, 10, 1]]);
    }

    #[test]
    fn test_normalize_maps_to_unit_range() {
        let config = PreprocessConfig::default();
        let white = Array3::<f32>::from_elem((1, 1, 3), 1.0);
        let black = Array3::<f32>::zeros((1, 1, 3));

        assert!((normalize(&white, &config.mean, &config.std)[[0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((normalize(&black, &config.mean, &config.std)[[0, 0, 2]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_detection_input_shape_and_scale() {
        let image = RgbImage::new(1280, 720);
        let (tensor, sx, sy) = preprocess_for_detection(&image, 640);

        assert_eq!(tensor.dim(), (1, 3, 640, 640));
        assert!((sx - 2.0).abs() < 1e-6);
        assert!((sy - 1.125).abs() < 1e-6);

        let (shape, data) = into_shape_and_data(tensor);
        assert_eq!(shape, [1, 3, 640, 640]);
        assert_eq!(data.len(), 3 * 640 * 640);
    }

    #[test]
    fn test_recognition_input_keeps_aspect() {
        let image = RgbImage::from_pixel(100, 24, Rgb([255, 255, 255]));
        let tensor = preprocess_for_recognition(&image, &PreprocessConfig::default());

        assert_eq!(tensor.dim(), (1, 3, 48, 200));
        assert!((tensor[[0, 0, 10, 10]] - 1.0).abs() < 1e-5);
    }
}
