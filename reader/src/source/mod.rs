//! Video sources the acquisition thread reads from.

pub mod mjpeg;
pub mod snapshot;

use ipcam_common::config::StreamConfig;
use ipcam_common::frame::Frame;
use reqwest::blocking::Client;

use crate::acquisition::StopSignal;
use crate::error::SourceError;

pub use mjpeg::MjpegSource;
pub use snapshot::SnapshotSource;

/// A blocking camera or stream the reader pulls frames from.
///
/// Implementations own their throttling and reconnection; the acquisition loop
/// calls [`read_frame`](Self::read_frame) back to back with no pause of its own.
pub trait VideoSource: Send + 'static {
    /// Open the underlying stream. Called once, before acquisition starts; an error
    /// leaves the reader closed.
    fn open(&mut self) -> Result<(), SourceError>;

    /// Block until the next frame is read.
    ///
    /// An empty frame means "nothing this attempt" and is not an error. Errors are
    /// treated as transient: the loop reports them and reads again.
    fn read_frame(&mut self) -> Result<Frame, SourceError>;

    /// Identifier for logs and frame names, usually the URL.
    fn describe(&self) -> String;

    /// Hands over the acquisition thread's stop signal, so long waits inside
    /// `read_frame` can end early on shutdown.
    fn bind_stop_signal(&mut self, _stop: StopSignal) {}
}

impl<S: VideoSource + ?Sized> VideoSource for Box<S> {
    fn open(&mut self) -> Result<(), SourceError> {
        (**self).open()
    }

    fn read_frame(&mut self) -> Result<Frame, SourceError> {
        (**self).read_frame()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn bind_stop_signal(&mut self, stop: StopSignal) {
        (**self).bind_stop_signal(stop)
    }
}

/// Build the source selected by `stream.mode`.
pub fn from_config(stream: &StreamConfig) -> Result<Box<dyn VideoSource>, SourceError> {
    match stream.mode.as_str() {
        "mjpeg" => Ok(Box::new(MjpegSource::new(stream)?)),
        "polling" => Ok(Box::new(SnapshotSource::new(stream)?)),
        other => Err(SourceError::UnsupportedMode(other.to_string())),
    }
}

/// Blocking HTTP client with the stream's timeouts. The overall timeout also bounds
/// each body read, which is what keeps shutdown latency finite.
fn http_client(stream: &StreamConfig) -> Result<Client, SourceError> {
    Client::builder()
        .connect_timeout(stream.connect_timeout())
        .timeout(stream.read_timeout())
        .build()
        .map_err(SourceError::Client)
}
