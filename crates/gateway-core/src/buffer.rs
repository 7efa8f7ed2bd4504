//! C2 — bounded, drop-oldest async buffer.
//!
//! One instance per track, with exactly one producer and one consumer.
//! `FrameBuffer` is a `DropBuffer` of capacity 1; `AudioBuffer` uses a
//! deeper capacity since acoustic analysis wants a batch of items at once
//! (spec.md §4.1).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

/// Drop counter snapshot for a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    pub dropped: u64,
}

/// A single-producer single-consumer queue that evicts the oldest resident
/// item on overflow instead of blocking the producer.
pub struct DropBuffer<T> {
    capacity: usize,
    queue: Mutex<VecDeque<T>>,
    notify: tokio::sync::Notify,
    dropped: AtomicU64,
}

impl<T> DropBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "buffer capacity must be at least 1");
        Self {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: tokio::sync::Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Default-capacity `FrameBuffer` (spec.md §4.1: capacity 1).
    pub fn frame_buffer() -> Self {
        Self::new(1)
    }

    /// Default-capacity `AudioBuffer` (spec.md §4.1: default 1024).
    pub fn audio_buffer() -> Self {
        Self::new(1024)
    }

    /// Insert `item`, evicting the oldest resident item if at capacity.
    /// Never blocks, never fails. Returns whether a drop occurred.
    pub fn put(&self, item: T) -> bool {
        let dropped = {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            let dropped = if queue.len() >= self.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(item);
            dropped
        };
        if dropped {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        dropped
    }

    /// Suspend until an item is available, or `cancel` fires.
    pub async fn get(&self, cancel: &CancellationToken) -> Option<T> {
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            tokio::select! {
                _ = self.notify.notified() => continue,
                _ = cancel.cancelled() => return None,
            }
        }
    }

    fn try_pop(&self) -> Option<T> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type FrameBuffer<T> = DropBuffer<T>;
pub type AudioBuffer<T> = DropBuffer<T>;
