use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ipcam_common::config::{Config, StreamConfig};
use ipcam_common::frame::{frame_name, source_stem, Frame};
use tracing::{debug, error, info, warn};

use crate::acquisition::{AcquisitionLoop, AcquisitionStats};
use crate::error::{catch_source_panic, ReaderError};
use crate::slot::FrameSlot;
use crate::source::{self, MjpegSource, VideoSource};

/// Upper bound on how long a waiting consumer goes without re-checking whether
/// acquisition is still alive. Publishes wake it immediately regardless.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Intrinsics for undistortion, applied downstream of this reader.
    pub camera_parameter_path: Option<PathBuf>,
    pub undistort: bool,
    pub poll_interval: Duration,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            camera_parameter_path: None,
            undistort: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderStatus {
    /// The acquisition thread is alive and publishing.
    Streaming,
    /// The source never opened or acquisition has ended; no new frames will come.
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub frames_delivered: u64,
    pub acquisition: AcquisitionStats,
}

/// Network camera reader that always hands out the newest frame.
///
/// Construction opens the source and starts a background acquisition thread;
/// dropping the reader stops and joins it. If the source fails to open the reader
/// is closed from the start and every retrieval returns immediately.
///
/// Retrieval takes `&mut self`: there is exactly one consumer per reader.
pub struct IpCameraReader {
    stem: String,
    options: ReaderOptions,
    slot: Arc<FrameSlot>,
    acquisition: Option<AcquisitionLoop>,
    frames_delivered: u64,
}

impl IpCameraReader {
    /// Open an MJPEG stream at `source_identifier` with default stream settings.
    pub fn new(
        source_identifier: &str,
        camera_parameter_path: Option<PathBuf>,
        undistort: bool,
    ) -> Self {
        let options = ReaderOptions {
            camera_parameter_path,
            undistort,
            ..ReaderOptions::default()
        };
        match MjpegSource::new(&StreamConfig::from_url(source_identifier)) {
            Ok(source) => Self::with_source(source, options),
            Err(e) => {
                error!(source = source_identifier, error = %e, "failed to create video source");
                Self::closed(source_identifier, options)
            }
        }
    }

    /// Build the reader described by `config.stream` and `config.reader`.
    pub fn from_config(config: &Config) -> Self {
        let options = ReaderOptions {
            camera_parameter_path: config.reader.camera_parameter_path.clone(),
            undistort: config.reader.undistort,
            poll_interval: config.reader.poll_interval(),
        };
        match source::from_config(&config.stream) {
            Ok(source) => Self::with_source(source, options),
            Err(e) => {
                error!(source = %config.stream.url, error = %e, "failed to create video source");
                Self::closed(&config.stream.url, options)
            }
        }
    }

    /// Open `source` and, if that succeeds, start acquiring from it.
    pub fn with_source<S: VideoSource>(mut source: S, options: ReaderOptions) -> Self {
        let identifier = source.describe();
        let mut reader = Self::closed(&identifier, options);

        if let Err(e) = catch_source_panic(|| source.open()) {
            error!(source = %identifier, error = %e, "failed to open video source");
            return reader;
        }

        match AcquisitionLoop::spawn(source, Arc::clone(&reader.slot)) {
            Ok(acquisition) => {
                info!(source = %identifier, "camera reader streaming");
                reader.acquisition = Some(acquisition);
            }
            Err(e) => error!(source = %identifier, error = %e, "failed to spawn acquisition thread"),
        }
        reader
    }

    fn closed(identifier: &str, options: ReaderOptions) -> Self {
        if options.undistort && options.camera_parameter_path.is_none() {
            warn!(
                source = %identifier,
                "undistortion requested without camera parameters; frames pass through as read"
            );
        }
        Self {
            stem: source_stem(identifier),
            options,
            slot: Arc::new(FrameSlot::new()),
            acquisition: None,
            frames_delivered: 0,
        }
    }

    /// Wait for the newest frame and take it.
    ///
    /// Returns an empty frame, without waiting, once the reader is closed and
    /// nothing is pending.
    pub fn next_frame(&mut self) -> Frame {
        self.wait_for_frame(None).unwrap_or_default()
    }

    /// Like [`next_frame`](Self::next_frame), but a closed reader is an error
    /// rather than an empty frame.
    pub fn try_next_frame(&mut self) -> Result<Frame, ReaderError> {
        self.wait_for_frame(None)
    }

    /// Wait at most `timeout` for a frame.
    pub fn next_frame_timeout(&mut self, timeout: Duration) -> Result<Frame, ReaderError> {
        self.wait_for_frame(Some(timeout))
    }

    /// Batch form of [`next_frame`](Self::next_frame): always exactly one frame,
    /// which is empty once the reader is closed.
    pub fn read_frames(&mut self) -> Vec<Frame> {
        vec![self.next_frame()]
    }

    /// Name the next delivered frame will carry, e.g. `video_000000000042`.
    pub fn next_frame_name(&self) -> String {
        frame_name(&self.stem, self.frames_delivered)
    }

    pub fn status(&self) -> ReaderStatus {
        match &self.acquisition {
            Some(acquisition) if acquisition.is_running() => ReaderStatus::Streaming,
            _ => ReaderStatus::Closed,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.status() == ReaderStatus::Streaming
    }

    pub fn stats(&self) -> ReaderStats {
        ReaderStats {
            frames_delivered: self.frames_delivered,
            acquisition: self
                .acquisition
                .as_ref()
                .map(AcquisitionLoop::stats)
                .unwrap_or_default(),
        }
    }

    pub fn camera_parameter_path(&self) -> Option<&Path> {
        self.options.camera_parameter_path.as_deref()
    }

    pub fn undistort(&self) -> bool {
        self.options.undistort
    }

    /// Stop acquisition and join the thread. A frame already published stays
    /// retrievable. Idempotent; also run on drop.
    pub fn close(&mut self) {
        if let Some(mut acquisition) = self.acquisition.take() {
            let stats = acquisition.stats();
            acquisition.stop();
            debug!(
                source = %self.stem,
                delivered = self.frames_delivered,
                published = stats.frames_published,
                "camera reader closed"
            );
        }
    }

    fn wait_for_frame(&mut self, timeout: Option<Duration>) -> Result<Frame, ReaderError> {
        // A timeout too large to represent as an instant means no deadline.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        loop {
            if !self.is_streaming() {
                // Acquisition is over, but its last publish is still deliverable.
                return match self.slot.try_take() {
                    Some(frame) => Ok(self.deliver(frame)),
                    None => Err(ReaderError::Closed),
                };
            }

            let wait = match deadline {
                Some(deadline) => deadline
                    .saturating_duration_since(Instant::now())
                    .min(self.options.poll_interval),
                None => self.options.poll_interval,
            };
            if let Some(frame) = self.slot.take_timeout(wait) {
                return Ok(self.deliver(frame));
            }

            if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
                if Instant::now() >= deadline {
                    return Err(ReaderError::Timeout(timeout));
                }
            }
        }
    }

    fn deliver(&mut self, frame: Frame) -> Frame {
        self.frames_delivered += 1;
        frame
    }
}

impl Drop for IpCameraReader {
    fn drop(&mut self) {
        self.close();
    }
}
