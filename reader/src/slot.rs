use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ipcam_common::frame::Frame;

/// Single-capacity exchange point between the acquisition thread and the consumer.
///
/// A publish overwrites whatever is pending, so a slow consumer only ever sees the
/// newest frame and no backlog builds up. The lock is held for the swap only: never
/// across a camera read, never while the consumer waits (the condvar releases it).
#[derive(Debug, Default)]
pub struct FrameSlot {
    pending: Mutex<Option<Frame>>,
    ready: Condvar,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame`, discarding any frame that was never taken.
    ///
    /// Returns `true` if an unconsumed frame was discarded.
    pub fn publish(&self, frame: Frame) -> bool {
        let previous = self.lock().replace(frame);
        self.ready.notify_one();
        previous.is_some()
    }

    /// Take the pending frame, if any, leaving the slot empty. Never waits.
    pub fn try_take(&self) -> Option<Frame> {
        self.lock().take()
    }

    /// Like [`try_take`](Self::try_take), but waits up to `timeout` for a publish.
    pub fn take_timeout(&self, timeout: Duration) -> Option<Frame> {
        let guard = self.lock();
        let (mut guard, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |pending| pending.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        guard.take()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    // A panic while holding the guard cannot leave a half-written frame behind:
    // the only mutations are whole-value `replace`/`take`.
    fn lock(&self) -> MutexGuard<'_, Option<Frame>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn frame(seq: u64) -> Frame {
        Frame::new(vec![(seq % 256) as u8; 4096], 64, 64, 0, seq)
    }

    #[test]
    fn empty_take_returns_immediately() {
        let slot = FrameSlot::new();
        let start = Instant::now();
        assert!(slot.try_take().is_none());
        assert!(start.elapsed() < Duration::from_millis(50));
        assert!(slot.is_empty());
    }

    #[test]
    fn newest_publish_wins() {
        let slot = FrameSlot::new();
        assert!(!slot.publish(frame(1)));
        assert!(slot.publish(frame(2)), "second publish discards the first");

        assert_eq!(slot.try_take().map(|f| f.seq), Some(2));
        assert!(slot.try_take().is_none(), "take leaves the slot empty");
    }

    #[test]
    fn take_timeout_expires_on_empty_slot() {
        let slot = FrameSlot::new();
        let start = Instant::now();
        assert!(slot.take_timeout(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn take_timeout_wakes_on_publish() {
        let slot = Arc::new(FrameSlot::new());
        let publisher = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                slot.publish(frame(9));
            })
        };

        let start = Instant::now();
        let taken = slot.take_timeout(Duration::from_secs(5));
        assert_eq!(taken.map(|f| f.seq), Some(9));
        assert!(start.elapsed() < Duration::from_secs(5));
        publisher.join().unwrap();
    }

    #[test]
    fn concurrent_takes_never_see_torn_frames() {
        let slot = Arc::new(FrameSlot::new());
        let done = Arc::new(AtomicBool::new(false));

        let producer = {
            let slot = Arc::clone(&slot);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for seq in 1..=5_000 {
                    slot.publish(frame(seq));
                }
                done.store(true, Ordering::Release);
            })
        };

        let mut last_seq = 0;
        let mut taken = 0;
        while !done.load(Ordering::Acquire) || !slot.is_empty() {
            if let Some(f) = slot.try_take() {
                let expected = (f.seq % 256) as u8;
                assert!(f.data.iter().all(|&b| b == expected), "frame {} is torn", f.seq);
                assert!(f.seq > last_seq, "frames arrive in production order");
                last_seq = f.seq;
                taken += 1;
            }
        }
        producer.join().unwrap();

        assert!(taken >= 1);
        assert_eq!(last_seq, 5_000, "the final publish is never lost");
    }
}
