//! Video Capture Layer
//!
//! A dedicated producer thread decodes frames from a [`VideoStream`] and keeps
//! only the most recent one. Consumers read it without blocking; frames they
//! are too slow to see are dropped, never queued.

pub mod ffmpeg;
pub mod frame;
#[cfg(feature = "opencv")]
pub mod opencv_capture;
pub mod sequence;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use image::RgbImage;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::StreamSettings;

pub use ffmpeg::FfmpegStream;
pub use frame::Frame;
pub use sequence::ImageSequenceStream;

/// Failures while opening or reading a video stream
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to start decoder: {0}")]
    Spawn(String),
    #[error("stream unavailable: {0}")]
    Unavailable(String),
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("end of stream")]
    EndOfStream,
    #[error("failed to decode frame: {0}")]
    Decode(String),
    #[error("stream is not open")]
    NotOpen,
    #[error("no frame within {0:?}")]
    Timeout(Duration),
    #[error("stream interrupted")]
    Interrupted,
}

/// Unblocks a pending `open` or `read_frame` from another thread. Once
/// called, the stream refuses to reopen.
pub type StreamInterrupt = Arc<dyn Fn() + Send + Sync>;

/// A source of decoded frames
pub trait VideoStream: Send {
    /// Open (or reopen) the stream
    fn open(&mut self) -> Result<(), StreamError>;

    /// Block until the next frame is decoded
    fn read_frame(&mut self) -> Result<RgbImage, StreamError>;

    /// Release the underlying decoder; safe to call when not open
    fn close(&mut self);

    /// Human-readable description, safe to log
    fn describe(&self) -> String;

    /// Whether `EndOfStream` means the source is exhausted rather than dropped
    fn is_finite(&self) -> bool {
        false
    }

    /// Handle that aborts a blocked read, for streams whose reads can stall
    fn interrupt_handle(&self) -> Option<StreamInterrupt> {
        None
    }
}

/// Whether a locator names a live network source rather than a file
pub fn is_network_locator(locator: &str) -> bool {
    const SCHEMES: [&str; 8] = ["rtsp", "rtsps", "rtmp", "rtmps", "http", "https", "udp", "srt"];
    match locator.trim().split_once("://") {
        Some((scheme, _)) => SCHEMES.iter().any(|s| s.eq_ignore_ascii_case(scheme)),
        None => false,
    }
}

/// Frame source configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// First reconnection delay
    pub backoff_initial: Duration,
    /// Upper bound on the reconnection delay
    pub backoff_max: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backoff_initial: Duration::from_millis(500),
            backoff_max: Duration::from_secs(10),
        }
    }
}

impl From<&StreamSettings> for CaptureConfig {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            backoff_initial: Duration::from_millis(settings.backoff_initial_ms.max(1)),
            backoff_max: Duration::from_millis(settings.backoff_max_ms.max(settings.backoff_initial_ms).max(1)),
        }
    }
}

/// Exponential reconnection delay, doubling up to a cap
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial.min(max),
        }
    }

    /// Delay to wait now; the following call returns twice as much, capped
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Start over from the initial delay
    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
    }
}

/// State shared between the producer thread and its owner
struct Shared {
    slot: Mutex<Option<Arc<Frame>>>,
    running: AtomicBool,
    exhausted: AtomicBool,
}

/// Latest-frame holder backed by a producer thread
pub struct FrameSource {
    shared: Arc<Shared>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    interrupt: Option<StreamInterrupt>,
    description: String,
}

impl FrameSource {
    /// Start producing frames from `stream` on a background thread
    pub fn start(stream: Box<dyn VideoStream>, config: CaptureConfig) -> Self {
        let shared = Arc::new(Shared {
            slot: Mutex::new(None),
            running: AtomicBool::new(true),
            exhausted: AtomicBool::new(false),
        });
        let (stop_tx, stop_rx) = bounded(1);
        let description = stream.describe();
        let interrupt = stream.interrupt_handle();

        let producer_shared = shared.clone();
        let handle = std::thread::spawn(move || {
            debug!("Frame producer starting...");
            produce(stream, &producer_shared, &stop_rx, &config);
            debug!("Frame producer exiting...");
        });

        info!("Frame source started for {}", description);

        Self {
            shared,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            interrupt,
            description,
        }
    }

    /// Most recently published frame, if any. Never blocks on decoding.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.shared.slot.lock().clone()
    }

    /// Whether a finite source has delivered its last frame
    pub fn is_exhausted(&self) -> bool {
        self.shared.exhausted.load(Ordering::Acquire)
    }

    /// Whether the producer thread is still running
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop the producer and wait for it to exit. Nothing is published
    /// after this returns. Calling it again is a no-op.
    pub fn stop(&mut self) {
        {
            // The producer checks the flag under the same lock before publishing
            let _slot = self.shared.slot.lock();
            self.shared.running.store(false, Ordering::Release);
        }

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.try_send(());
        }

        // A producer blocked inside the stream never sees the stop channel
        if let Some(interrupt) = self.interrupt.take() {
            interrupt();
        }

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Frame producer for {} panicked", self.description);
            }
            info!("Frame source stopped for {}", self.description);
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleep for `delay` unless a stop is requested first. Returns true on stop.
fn wait_or_stop(stop_rx: &Receiver<()>, delay: Duration) -> bool {
    !matches!(stop_rx.recv_timeout(delay), Err(RecvTimeoutError::Timeout))
}

fn produce(
    mut stream: Box<dyn VideoStream>,
    shared: &Shared,
    stop_rx: &Receiver<()>,
    config: &CaptureConfig,
) {
    let mut backoff = Backoff::new(config.backoff_initial, config.backoff_max);
    let mut seq = 0u64;
    let mut open = false;

    while shared.running.load(Ordering::Acquire) {
        if !open {
            match stream.open() {
                Ok(()) => {
                    info!("Opened stream {}", stream.describe());
                    open = true;
                }
                Err(StreamError::Interrupted) => break,
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        "Failed to open stream {}: {} (retrying in {:?})",
                        stream.describe(),
                        e,
                        delay
                    );
                    if wait_or_stop(stop_rx, delay) {
                        break;
                    }
                    continue;
                }
            }
        }

        match stream.read_frame() {
            Ok(image) => {
                backoff.reset();
                seq += 1;
                let frame = Arc::new(Frame::new(seq, image));

                let mut slot = shared.slot.lock();
                if !shared.running.load(Ordering::Acquire) {
                    break;
                }
                *slot = Some(frame);
            }
            Err(StreamError::Interrupted) => break,
            Err(StreamError::EndOfStream) if stream.is_finite() => {
                info!("Stream {} exhausted after {} frames", stream.describe(), seq);
                shared.exhausted.store(true, Ordering::Release);
                break;
            }
            Err(e) => {
                stream.close();
                open = false;
                let delay = backoff.next_delay();
                warn!(
                    "Lost stream {}: {} (reconnecting in {:?})",
                    stream.describe(),
                    e,
                    delay
                );
                if wait_or_stop(stop_rx, delay) {
                    break;
                }
            }
        }
    }

    stream.close();
}

/// Build the stream for a locator: a directory replays its images, anything
/// else goes to the video decoder (OpenCV when built with the `opencv`
/// feature, an ffmpeg process otherwise).
pub fn open_stream(settings: &StreamSettings) -> Box<dyn VideoStream> {
    let locator = settings.locator.trim();
    let read_timeout = Duration::from_millis(settings.read_timeout_ms.max(1));

    if Path::new(locator).is_dir() {
        return Box::new(ImageSequenceStream::new(
            locator,
            Some((settings.width, settings.height)),
            settings.fps,
            settings.loop_sequence,
        ));
    }

    #[cfg(feature = "opencv")]
    {
        Box::new(opencv_capture::OpenCvStream::new(locator, settings.width, settings.height).with_read_timeout(read_timeout))
    }
    #[cfg(not(feature = "opencv"))]
    {
        Box::new(FfmpegStream::new(locator, settings.width, settings.height).with_read_timeout(read_timeout))
    }
}
