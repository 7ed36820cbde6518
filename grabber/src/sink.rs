use std::fs;
use std::path::{Path, PathBuf};

use ipcam_common::config::OutputConfig;
use ipcam_common::frame::Frame;
use tracing::debug;

use crate::GrabberError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `<dir>/<frame name>.<ext>`
    Sequential,
    /// `<dir>/<YYYY-MM-DD>/<timestamp>_<seq>.<ext>`
    Dated,
}

impl Layout {
    pub fn parse(name: &str) -> Result<Self, GrabberError> {
        match name {
            "sequential" => Ok(Self::Sequential),
            "dated" => Ok(Self::Dated),
            other => Err(GrabberError::UnknownLayout(other.to_string())),
        }
    }
}

/// Writes delivered frames to disk, keeping every `save_every`-th one.
pub struct FrameSink {
    dir: PathBuf,
    layout: Layout,
    save_every: u64,
    seen: u64,
    saved: u64,
}

impl FrameSink {
    pub fn new(output: &OutputConfig) -> Result<Self, GrabberError> {
        fs::create_dir_all(&output.dir)
            .map_err(|e| GrabberError::Io(output.dir.display().to_string(), e))?;
        Ok(Self {
            dir: output.dir.clone(),
            layout: Layout::parse(&output.layout)?,
            save_every: output.save_every.max(1),
            seen: 0,
            saved: 0,
        })
    }

    /// Offer a frame under the reader's name for it. Returns the written path, or
    /// `None` when the frame was skipped.
    pub fn offer(&mut self, name: &str, frame: &Frame) -> Result<Option<PathBuf>, GrabberError> {
        self.seen += 1;
        if frame.is_empty() || (self.seen - 1) % self.save_every != 0 {
            return Ok(None);
        }

        let path = self.path_for(name, frame);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| GrabberError::Io(parent.display().to_string(), e))?;
        }
        fs::write(&path, &frame.data)
            .map_err(|e| GrabberError::Io(path.display().to_string(), e))?;
        self.saved += 1;

        debug!(path = %path.display(), bytes = frame.payload_size(), seq = frame.seq, "frame saved");
        Ok(Some(path))
    }

    pub fn saved(&self) -> u64 {
        self.saved
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str, frame: &Frame) -> PathBuf {
        match self.layout {
            Layout::Sequential => self.dir.join(format!("{name}.{}", frame.extension())),
            Layout::Dated => self.dir.join(frame.object_key("")),
        }
    }
}
