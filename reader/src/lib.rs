//! Latest-frame reader for network cameras.
//!
//! A camera read is blocking and its latency is whatever the network and the
//! camera feel like. [`IpCameraReader`] moves that read onto a dedicated
//! acquisition thread which publishes into a single-capacity [`FrameSlot`]. The
//! consumer always takes the newest frame; anything it was too slow to see is
//! dropped rather than queued.
//!
//! ```no_run
//! use ipcam_reader::IpCameraReader;
//!
//! let mut reader = IpCameraReader::new("http://10.0.0.5/video.cgi?x.mjpeg", None, false);
//! let frame = reader.next_frame();
//! println!("{} bytes, {}x{}", frame.payload_size(), frame.width, frame.height);
//! // Dropping the reader stops and joins the acquisition thread.
//! ```

pub mod acquisition;
pub mod camera;
pub mod error;
pub mod slot;
pub mod source;

#[cfg(test)]
mod testing;

pub use acquisition::{AcquisitionLoop, AcquisitionStats, StopSignal};
pub use camera::{IpCameraReader, ReaderOptions, ReaderStats, ReaderStatus};
pub use error::{ReaderError, SourceError};
pub use ipcam_common::frame::Frame;
pub use slot::FrameSlot;
pub use source::VideoSource;
