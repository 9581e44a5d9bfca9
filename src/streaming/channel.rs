//! Channel types for the streaming pipeline.
//!
//! Two bounded queues connect the reader and writer stages:
//! free buffers flow reader-ward, filled buffers flow writer-ward.
//! A buffer is owned by whoever last received it from a queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Default number of buffers in the pool
pub const DEFAULT_BUFFER_COUNT: usize = 1000;

/// Default buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024; // 64KB

/// One entry of the ready queue.
#[derive(Debug)]
pub enum Slot {
    /// Non-empty buffer of stream data.
    Filled(Vec<u8>),
    /// Source is exhausted; nothing follows.
    End,
}

pub type FreeSender = mpsc::Sender<Vec<u8>>;
pub type FreeReceiver = mpsc::Receiver<Vec<u8>>;
pub type ReadySender = mpsc::Sender<Slot>;
pub type ReadyReceiver = mpsc::Receiver<Slot>;

/// Fixed pool of transfer buffers.
///
/// All buffers are allocated up front. The stages report back how they use
/// them: how many are out of the free queue at once, the largest capacity
/// seen, and every time a fill had to grow a buffer.
#[derive(Debug)]
pub struct BufferPool {
    count: usize,
    size: usize,
    allocated: usize,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    largest: Arc<AtomicUsize>,
    regrown: Arc<AtomicUsize>,
}

impl BufferPool {
    /// Allocate `count` buffers of `size` bytes and queue them as free.
    pub fn new(count: usize, size: usize) -> (Self, FreeSender, FreeReceiver) {
        let count = count.max(1);
        let size = size.max(1);
        let (tx, rx) = mpsc::channel(count);

        let mut allocated = 0;
        for _ in 0..count {
            // Capacity == count, so this cannot fail.
            if tx.try_send(Vec::with_capacity(size)).is_ok() {
                allocated += 1;
            }
        }

        let pool = Self {
            count,
            size,
            allocated,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            largest: Arc::new(AtomicUsize::new(size)),
            regrown: Arc::new(AtomicUsize::new(0)),
        };
        (pool, tx, rx)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn buffer_size(&self) -> usize {
        self.size
    }

    /// Allocations over the pool's lifetime: the initial buffers plus every
    /// reallocation a fill caused.
    pub fn allocated(&self) -> usize {
        self.allocated + self.regrown.load(Ordering::Relaxed)
    }

    /// Largest buffer capacity observed after a fill.
    pub fn largest_buffer(&self) -> usize {
        self.largest.load(Ordering::Relaxed)
    }

    /// Highest number of buffers taken out of the free queue at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn tracker(&self) -> InFlight {
        InFlight {
            current: Arc::clone(&self.in_flight),
            peak: Arc::clone(&self.peak),
            largest: Arc::clone(&self.largest),
            regrown: Arc::clone(&self.regrown),
        }
    }
}

/// Handle shared by both stages for in-flight accounting.
#[derive(Debug, Clone)]
pub struct InFlight {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    largest: Arc<AtomicUsize>,
    regrown: Arc<AtomicUsize>,
}

impl InFlight {
    pub fn taken(&self) {
        let now = self.current.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak.fetch_max(now, Ordering::Relaxed);
    }

    pub fn returned(&self) {
        self.current.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a buffer's capacity before and after it was filled.
    pub fn filled(&self, before: usize, after: usize) {
        if after > before {
            self.regrown.fetch_add(1, Ordering::Relaxed);
        }
        self.largest.fetch_max(after, Ordering::Relaxed);
    }
}

/// Create the ready queue. Same capacity as the pool.
pub fn ready_channel(count: usize) -> (ReadySender, ReadyReceiver) {
    mpsc::channel(count.max(1))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_prefilled() {
        let (pool, _tx, mut rx) = BufferPool::new(4, 128);
        assert_eq!(pool.allocated(), 4);
        assert_eq!(pool.count(), 4);
        assert_eq!(pool.buffer_size(), 128);

        for _ in 0..4 {
            let buf = rx.recv().await.unwrap();
            assert!(buf.is_empty());
            assert!(buf.capacity() >= 128);
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_pool_clamps_zero() {
        let (pool, _tx, _rx) = BufferPool::new(0, 0);
        assert_eq!(pool.count(), 1);
        assert_eq!(pool.buffer_size(), 1);
        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn test_in_flight_peak() {
        let (pool, _tx, _rx) = BufferPool::new(8, 16);
        let tracker = pool.tracker();

        tracker.taken();
        tracker.taken();
        tracker.returned();
        tracker.taken();
        tracker.taken();
        assert_eq!(pool.peak_in_flight(), 3);
    }

    #[test]
    fn test_regrown_buffers_count_as_allocations() {
        let (pool, _tx, _rx) = BufferPool::new(4, 16);
        let tracker = pool.tracker();

        tracker.filled(16, 16);
        assert_eq!(pool.allocated(), 4);
        assert_eq!(pool.largest_buffer(), 16);

        tracker.filled(16, 4096);
        tracker.filled(4096, 4096);
        assert_eq!(pool.allocated(), 5);
        assert_eq!(pool.largest_buffer(), 4096);
    }

    #[tokio::test]
    async fn test_ready_channel_fifo() {
        let (tx, mut rx) = ready_channel(3);
        tx.send(Slot::Filled(vec![1])).await.unwrap();
        tx.send(Slot::Filled(vec![2])).await.unwrap();
        tx.send(Slot::End).await.unwrap();

        assert!(matches!(rx.recv().await, Some(Slot::Filled(b)) if b == vec![1]));
        assert!(matches!(rx.recv().await, Some(Slot::Filled(b)) if b == vec![2]));
        assert!(matches!(rx.recv().await, Some(Slot::End)));
    }
}
