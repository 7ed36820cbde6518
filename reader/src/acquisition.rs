//! Background acquisition thread.
//!
//! The loop bridges a blocking [`VideoSource::read_frame`] into the non-blocking
//! [`FrameSlot`]. It never waits on the consumer, and a failed or panicking read
//! costs one iteration, not the thread. Cancellation is cooperative: the stop
//! signal is checked once per read, so stopping takes at most one in-flight read.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use crate::error::{catch_source_panic, panic_message, SourceError};
use crate::slot::FrameSlot;
use crate::source::VideoSource;

/// Longest uninterrupted nap taken by [`StopSignal::sleep`].
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Cooperative stop flag shared between the owner and the acquisition thread.
///
/// Sources receive a clone so their own backoff sleeps can end early on shutdown.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Sleep for `duration` unless a stop is requested first.
    ///
    /// Returns `false` if the sleep was cut short by a stop request.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        loop {
            if self.is_requested() {
                return false;
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => STOP_CHECK_INTERVAL,
            };
            if remaining.is_zero() {
                return true;
            }
            thread::sleep(remaining.min(STOP_CHECK_INTERVAL));
        }
    }
}

/// Counters maintained by the acquisition thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    pub frames_published: u64,
    /// Published frames that overwrote one the consumer never took.
    pub frames_dropped: u64,
    pub empty_reads: u64,
    pub failed_reads: u64,
}

#[derive(Debug, Default)]
struct Shared {
    running: AtomicBool,
    frames_published: AtomicU64,
    frames_dropped: AtomicU64,
    empty_reads: AtomicU64,
    failed_reads: AtomicU64,
}

/// Owner of the acquisition thread.
///
/// The handle is present only while a started thread has not been joined, so a
/// second [`stop`](Self::stop) (or the one in `Drop`) is a no-op.
#[derive(Debug)]
pub struct AcquisitionLoop {
    stop: StopSignal,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl AcquisitionLoop {
    /// Start reading `source` on a dedicated thread, publishing into `slot`.
    ///
    /// The source should already be open.
    pub fn spawn<S: VideoSource>(mut source: S, slot: Arc<FrameSlot>) -> std::io::Result<Self> {
        // Fresh per loop, so a stop requested before the thread first runs still counts.
        let stop = StopSignal::new();
        source.bind_stop_signal(stop.clone());

        let shared = Arc::new(Shared::default());
        shared.running.store(true, Ordering::Release);

        let handle = thread::Builder::new()
            .name("ipcam-acquire".into())
            .spawn({
                let stop = stop.clone();
                let shared = Arc::clone(&shared);
                move || run(source, &slot, &stop, &shared)
            })
            .map_err(|e| {
                shared.running.store(false, Ordering::Release);
                e
            })?;

        Ok(Self {
            stop,
            shared,
            handle: Some(handle),
        })
    }

    /// `false` once the thread has exited, whether by stop request or panic.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> AcquisitionStats {
        AcquisitionStats {
            frames_published: self.shared.frames_published.load(Ordering::Relaxed),
            frames_dropped: self.shared.frames_dropped.load(Ordering::Relaxed),
            empty_reads: self.shared.empty_reads.load(Ordering::Relaxed),
            failed_reads: self.shared.failed_reads.load(Ordering::Relaxed),
        }
    }

    /// Ask the loop to exit after its current read, without waiting.
    pub fn request_stop(&self) {
        self.stop.request();
    }

    /// Signal stop and join the thread. Blocks for at most one in-flight read.
    ///
    /// A panicked thread is reported, never propagated.
    pub fn stop(&mut self) {
        self.request_stop();
        let Some(handle) = self.handle.take() else {
            return;
        };
        debug!("joining acquisition thread");
        if let Err(payload) = handle.join() {
            error!(
                reason = %panic_message(&*payload),
                "acquisition thread panicked"
            );
        }
    }
}

impl Drop for AcquisitionLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Clears `running` however the loop exits.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn run<S: VideoSource>(mut source: S, slot: &FrameSlot, stop: &StopSignal, shared: &Shared) {
    let _running = RunningGuard(&shared.running);
    let source_name = source.describe();
    info!(source = %source_name, "acquisition started");

    while !stop.is_requested() {
        match catch_source_panic(|| source.read_frame()) {
            Ok(frame) if frame.is_empty() => {
                shared.empty_reads.fetch_add(1, Ordering::Relaxed);
                trace!("empty read, nothing to publish");
            }
            Ok(frame) => {
                let seq = frame.seq;
                if slot.publish(frame) {
                    shared.frames_dropped.fetch_add(1, Ordering::Relaxed);
                }
                let published = shared.frames_published.fetch_add(1, Ordering::Relaxed) + 1;
                trace!(seq, published, "frame published");
            }
            Err(SourceError::Panicked(reason)) => {
                shared.failed_reads.fetch_add(1, Ordering::Relaxed);
                error!(source = %source_name, reason = %reason, "frame read panicked");
            }
            Err(e) => {
                shared.failed_reads.fetch_add(1, Ordering::Relaxed);
                warn!(source = %source_name, error = %e, "frame read failed");
            }
        }
    }

    info!(
        source = %source_name,
        published = shared.frames_published.load(Ordering::Relaxed),
        dropped = shared.frames_dropped.load(Ordering::Relaxed),
        failed = shared.failed_reads.load(Ordering::Relaxed),
        "acquisition stopped"
    );
}
