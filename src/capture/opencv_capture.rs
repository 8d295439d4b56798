//! OpenCV-backed network/file stream

use image::RgbImage;
use opencv::core::{Mat, Size, Vector};
use opencv::imgproc::{cvt_color, resize, COLOR_BGR2RGB, INTER_LINEAR};
use opencv::prelude::*;
use opencv::videoio::{VideoCapture, CAP_ANY, CAP_PROP_OPEN_TIMEOUT_MSEC, CAP_PROP_READ_TIMEOUT_MSEC};
use std::time::Duration;
use tracing::debug;

use super::ffmpeg::redact_credentials;
use super::{is_network_locator, StreamError, VideoStream};

/// Stream decoded in-process by OpenCV's `VideoCapture`
pub struct OpenCvStream {
    locator: String,
    width: u32,
    height: u32,
    read_timeout: Duration,
    capture: Option<VideoCapture>,
    frames_read: u64,
}

// VideoCapture is only touched from the producer thread that owns the stream
unsafe impl Send for OpenCvStream {}

impl OpenCvStream {
    pub fn new(locator: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            locator: locator.into(),
            width: width.max(1),
            height: height.max(1),
            read_timeout: Duration::from_secs(5),
            capture: None,
            frames_read: 0,
        }
    }

    /// Longest wait for the backend to open the stream or return a frame
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn ended(&self) -> StreamError {
        if self.frames_read > 0 && self.is_finite() {
            StreamError::EndOfStream
        } else {
            StreamError::Unavailable("no frame returned by capture backend".to_string())
        }
    }

    fn to_rgb(&self, image: &Mat) -> Result<RgbImage, StreamError> {
        let mut resized = Mat::default();
        resize(
            image,
            &mut resized,
            Size::new(self.width as i32, self.height as i32),
            0.0,
            0.0,
            INTER_LINEAR,
        )
        .map_err(cv_error)?;

        let mut rgb = Mat::default();
        cvt_color(&resized, &mut rgb, COLOR_BGR2RGB, 0).map_err(cv_error)?;

        let bytes = rgb.data_bytes().map_err(cv_error)?.to_vec();
        let len = bytes.len();
        RgbImage::from_raw(self.width, self.height, bytes)
            .ok_or_else(|| StreamError::Decode(format!("unexpected frame buffer of {} bytes", len)))
    }
}

fn cv_error(e: opencv::Error) -> StreamError {
    StreamError::Decode(e.to_string())
}

impl VideoStream for OpenCvStream {
    fn open(&mut self) -> Result<(), StreamError> {
        self.close();

        if self.locator.is_empty() {
            return Err(StreamError::Unavailable("no stream locator configured".to_string()));
        }

        let timeout_ms = self.read_timeout.as_millis().min(i32::MAX as u128) as i32;
        let params = Vector::from_slice(&[
            CAP_PROP_OPEN_TIMEOUT_MSEC,
            timeout_ms,
            CAP_PROP_READ_TIMEOUT_MSEC,
            timeout_ms,
        ]);
        let capture = VideoCapture::from_file_with_params(&self.locator, CAP_ANY, &params)
            .map_err(|e| StreamError::Unavailable(e.to_string()))?;

        if !capture.is_opened().map_err(cv_error)? {
            return Err(StreamError::Unavailable(format!("could not open {}", self.describe())));
        }

        debug!("Opened capture backend for {}", self.describe());
        self.frames_read = 0;
        self.capture = Some(capture);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RgbImage, StreamError> {
        let capture = self.capture.as_mut().ok_or(StreamError::NotOpen)?;

        let mut image = Mat::default();
        let grabbed = capture.read(&mut image).map_err(cv_error)?;
        if !grabbed || image.empty() {
            return Err(self.ended());
        }

        let frame = self.to_rgb(&image)?;
        self.frames_read += 1;
        Ok(frame)
    }

    fn close(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            let _ = capture.release();
        }
    }

    fn describe(&self) -> String {
        redact_credentials(&self.locator)
    }

    fn is_finite(&self) -> bool {
        !is_network_locator(&self.locator)
    }
}
