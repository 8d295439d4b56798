//! Still-image sequence stream for offline runs

use image::imageops::FilterType;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::{StreamError, VideoStream};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp", "tif", "tiff"];

/// Replays the images of a directory in file-name order
pub struct ImageSequenceStream {
    dir: PathBuf,
    size: Option<(u32, u32)>,
    interval: Duration,
    looping: bool,
    paths: Vec<PathBuf>,
    index: usize,
    last_emit: Option<Instant>,
    open: bool,
}

impl ImageSequenceStream {
    /// `size` rescales every frame; `fps` of 0 replays as fast as possible
    pub fn new(dir: impl AsRef<Path>, size: Option<(u32, u32)>, fps: u32, looping: bool) -> Self {
        let interval = if fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / fps as f64)
        };
        Self {
            dir: dir.as_ref().to_path_buf(),
            size,
            interval,
            looping,
            paths: Vec::new(),
            index: 0,
            last_emit: None,
            open: false,
        }
    }

    fn pace(&mut self) {
        if let Some(last) = self.last_emit {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        self.last_emit = Some(Instant::now());
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl VideoStream for ImageSequenceStream {
    fn open(&mut self) -> Result<(), StreamError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image(path))
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(StreamError::Unavailable(format!(
                "no images in {}",
                self.dir.display()
            )));
        }

        self.paths = paths;
        self.index = 0;
        self.open = true;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RgbImage, StreamError> {
        if !self.open {
            return Err(StreamError::NotOpen);
        }
        if self.index >= self.paths.len() {
            if !self.looping {
                return Err(StreamError::EndOfStream);
            }
            self.index = 0;
        }

        self.pace();
        let path = &self.paths[self.index];
        self.index += 1;

        let image = image::open(path)
            .map_err(|e| StreamError::Decode(format!("{}: {}", path.display(), e)))?
            .to_rgb8();

        Ok(match self.size {
            Some((w, h)) if image.dimensions() != (w, h) => {
                image::imageops::resize(&image, w, h, FilterType::Triangle)
            }
            _ => image,
        })
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn describe(&self) -> String {
        format!("image sequence {}", self.dir.display())
    }

    fn is_finite(&self) -> bool {
        !self.looping
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn write_images(dir: &Path, names: &[&str]) {
        for (i, name) in names.iter().enumerate() {
            let image = RgbImage::from_pixel(8, 6, Rgb([i as u8 * 40, 0, 0]));
            image.save(dir.join(name)).unwrap();
        }
    }

    #[test]
    fn test_replays_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_images(dir.path(), &["b.png", "a.png"]);
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let mut stream = ImageSequenceStream::new(dir.path(), None, 0, false);
        stream.open().unwrap();

        // a.png was written second, so its red channel is 40
        assert_eq!(stream.read_frame().unwrap().get_pixel(0, 0)[0], 40);
        assert_eq!(stream.read_frame().unwrap().get_pixel(0, 0)[0], 0);
        assert!(matches!(stream.read_frame(), Err(StreamError::EndOfStream)));
        assert!(stream.is_finite());
    }

    #[test]
    fn test_looping_restarts() {
        let dir = tempfile::tempdir().unwrap();
        write_images(dir.path(), &["only.png"]);

        let mut stream = ImageSequenceStream::new(dir.path(), Some((16, 12)), 0, true);
        stream.open().unwrap();
        for _ in 0..3 {
            assert_eq!(stream.read_frame().unwrap().dimensions(), (16, 12));
        }
        assert!(!stream.is_finite());
    }

    #[test]
    fn test_empty_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut stream = ImageSequenceStream::new(dir.path(), None, 0, false);
        assert!(matches!(stream.open(), Err(StreamError::Unavailable(_))));
        assert!(matches!(stream.read_frame(), Err(StreamError::NotOpen)));
    }
}
