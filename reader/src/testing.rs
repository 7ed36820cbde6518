//! Scripted in-memory source for exercising the reader without a camera.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ipcam_common::frame::Frame;

use crate::error::SourceError;
use crate::source::VideoSource;

pub enum Step {
    Frame(u64),
    Empty,
    Fail,
    Panic,
    /// Simulates a slow read that eventually yields nothing.
    Block(Duration),
}

/// Plays back a fixed script of reads, then returns empty frames forever.
pub struct ScriptedSource {
    identifier: String,
    steps: VecDeque<Step>,
    read_delay: Duration,
    fail_open: bool,
    reads: Arc<AtomicU64>,
}

impl ScriptedSource {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            identifier: "scripted://camera/front.mjpeg".into(),
            steps: steps.into_iter().collect(),
            read_delay: Duration::ZERO,
            fail_open: false,
            reads: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn idle() -> Self {
        Self::new([])
    }

    pub fn failing_open() -> Self {
        Self {
            fail_open: true,
            ..Self::idle()
        }
    }

    /// Delay applied before every read, standing in for network latency.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    /// Number of reads started so far.
    pub fn reads(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.reads)
    }
}

/// A frame whose every byte is derived from `seq`, so splicing is detectable.
pub fn test_frame(seq: u64) -> Frame {
    Frame::new(vec![(seq % 256) as u8; 1024], 32, 32, seq as i64, seq)
}

pub fn is_intact(frame: &Frame) -> bool {
    let expected = (frame.seq % 256) as u8;
    frame.data.len() == 1024 && frame.data.iter().all(|&b| b == expected)
}

impl VideoSource for ScriptedSource {
    fn open(&mut self) -> Result<(), SourceError> {
        if self.fail_open {
            Err(SourceError::HttpStatus(503))
        } else {
            Ok(())
        }
    }

    fn read_frame(&mut self) -> Result<Frame, SourceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.read_delay);
        match self.steps.pop_front() {
            Some(Step::Frame(seq)) => Ok(test_frame(seq)),
            Some(Step::Empty) => Ok(Frame::empty()),
            Some(Step::Fail) => Err(SourceError::Stream(io::Error::other("scripted failure"))),
            Some(Step::Panic) => panic!("scripted panic"),
            Some(Step::Block(duration)) => {
                thread::sleep(duration);
                Ok(Frame::empty())
            }
            None => {
                thread::sleep(Duration::from_millis(1));
                Ok(Frame::empty())
            }
        }
    }

    fn describe(&self) -> String {
        self.identifier.clone()
    }
}
