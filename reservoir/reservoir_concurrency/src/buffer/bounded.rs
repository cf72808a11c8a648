//! A fixed-capacity FIFO buffer with blocking put and take.
//!
//! Items live in a circular array of `capacity` slots. Producers block while
//! every slot is occupied; consumers block while none is. Each side has its
//! own condition variable, and every wait re-checks its predicate after
//! waking, so spurious wake-ups and lost races are harmless.
//!
//! # Examples
//!
//! ```
//! use reservoir_concurrency::BoundedBuffer;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let buffer = Arc::new(BoundedBuffer::new(2));
//!
//! let producer = {
//!     let buffer = Arc::clone(&buffer);
//!     thread::spawn(move || {
//!         for i in 0..10 {
//!             buffer.put(i);
//!         }
//!     })
//! };
//!
//! let received: Vec<i32> = (0..10).map(|_| buffer.take()).collect();
//! producer.join().unwrap();
//! assert_eq!(received, (0..10).collect::<Vec<_>>());
//! ```

use log::trace;
use parking_lot::{Condvar, Mutex};
use reservoir_core::error::{BufferError, ConfigError};
use reservoir_core::utils::config::BufferConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Fill level of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferState {
    /// No items
    Empty,
    /// Some items, some free slots
    Partial,
    /// Every slot occupied
    Full,
}

/// Point-in-time view of a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferStatus {
    /// Number of slots
    pub capacity: usize,

    /// Items currently held
    pub len: usize,

    /// Fill level
    pub state: BufferState,

    /// Producers blocked waiting for a free slot
    pub producers_waiting: usize,

    /// Consumers blocked waiting for an item
    pub consumers_waiting: usize,

    /// Items ever inserted
    pub total_put: u64,

    /// Items ever removed
    pub total_taken: u64,
}

/// A put that did not happen. Carries the item back to the caller.
#[derive(Error)]
#[error("{reason}")]
pub struct PutError<T> {
    item: T,
    reason: BufferError,
}

impl<T> PutError<T> {
    /// Recover the item that could not be inserted.
    pub fn into_inner(self) -> T {
        self.item
    }

    /// Why the put failed.
    pub fn reason(&self) -> BufferError {
        self.reason
    }

    /// Whether the put gave up at its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self.reason, BufferError::Timeout(_))
    }

    /// Whether the buffer was full on a non-blocking put.
    pub fn is_full(&self) -> bool {
        matches!(self.reason, BufferError::Full)
    }
}

impl<T> fmt::Debug for PutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PutError")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

impl<T> From<PutError<T>> for BufferError {
    fn from(err: PutError<T>) -> Self {
        err.reason
    }
}

impl<T> From<PutError<T>> for reservoir_core::Error {
    fn from(err: PutError<T>) -> Self {
        reservoir_core::Error::Buffer(err.reason)
    }
}

/// The circular array and its indices.
///
/// `put_index` is where the next item goes, `take_index` where the oldest
/// item sits. Both advance modulo the slot count.
struct Ring<T> {
    slots: Box<[Option<T>]>,
    count: usize,
    put_index: usize,
    take_index: usize,
    producers_waiting: usize,
    consumers_waiting: usize,
    total_put: u64,
    total_taken: u64,
}

impl<T> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            count: 0,
            put_index: 0,
            take_index: 0,
            producers_waiting: 0,
            consumers_waiting: 0,
            total_put: 0,
            total_taken: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    /// Caller must have checked `is_full`.
    fn push(&mut self, item: T) {
        debug_assert!(self.slots[self.put_index].is_none());
        self.slots[self.put_index] = Some(item);
        self.put_index = (self.put_index + 1) % self.slots.len();
        self.count += 1;
        self.total_put += 1;
    }

    fn pop(&mut self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        let item = self.slots[self.take_index].take();
        self.take_index = (self.take_index + 1) % self.slots.len();
        self.count -= 1;
        self.total_taken += 1;
        item
    }

    fn state(&self) -> BufferState {
        match self.count {
            0 => BufferState::Empty,
            n if n == self.slots.len() => BufferState::Full,
            _ => BufferState::Partial,
        }
    }
}

/// A blocking FIFO buffer with a fixed number of slots.
///
/// Share it between threads with an `Arc`. Items come out in exactly the
/// order they went in.
pub struct BoundedBuffer<T> {
    capacity: usize,
    ring: Mutex<Ring<T>>,

    /// Signalled after a take frees a slot
    not_full: Condvar,

    /// Signalled after a put adds an item
    not_empty: Condvar,
}

impl<T> BoundedBuffer<T> {
    /// Create an empty buffer with `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "buffer capacity must be at least 1");
        Self {
            capacity,
            ring: Mutex::new(Ring::with_capacity(capacity)),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Create a buffer from a validated configuration.
    pub fn with_config(config: &BufferConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config.capacity))
    }

    /// Insert an item at the tail, blocking while the buffer is full.
    pub fn put(&self, item: T) {
        let mut ring = self.ring.lock();
        while ring.is_full() {
            ring.producers_waiting += 1;
            self.not_full.wait(&mut ring);
            ring.producers_waiting -= 1;
        }
        ring.push(item);
        drop(ring);

        self.not_empty.notify_one();
    }

    /// Insert an item, giving up after `timeout`.
    ///
    /// On timeout the buffer is unchanged and the item is handed back in
    /// the error.
    pub fn put_timeout(&self, item: T, timeout: Duration) -> Result<(), PutError<T>> {
        let deadline = Instant::now().checked_add(timeout);
        let mut ring = self.ring.lock();

        while ring.is_full() {
            ring.producers_waiting += 1;
            let timed_out = match deadline {
                Some(deadline) if Instant::now() >= deadline => true,
                Some(deadline) => {
                    self.not_full.wait_until(&mut ring, deadline);
                    false
                }
                None => {
                    self.not_full.wait(&mut ring);
                    false
                }
            };
            ring.producers_waiting -= 1;

            if timed_out {
                trace!("put timed out after {:?}", timeout);
                return Err(PutError {
                    item,
                    reason: BufferError::Timeout(timeout),
                });
            }
        }
        ring.push(item);
        drop(ring);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Insert an item only if a slot is free right now.
    pub fn try_put(&self, item: T) -> Result<(), PutError<T>> {
        let mut ring = self.ring.lock();
        if ring.is_full() {
            return Err(PutError {
                item,
                reason: BufferError::Full,
            });
        }
        ring.push(item);
        drop(ring);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest item, blocking while the buffer is empty.
    pub fn take(&self) -> T {
        let mut ring = self.ring.lock();
        loop {
            if let Some(item) = ring.pop() {
                drop(ring);
                self.not_full.notify_one();
                return item;
            }
            ring.consumers_waiting += 1;
            self.not_empty.wait(&mut ring);
            ring.consumers_waiting -= 1;
        }
    }

    /// Remove the oldest item, giving up after `timeout`.
    pub fn take_timeout(&self, timeout: Duration) -> Result<T, BufferError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut ring = self.ring.lock();

        loop {
            if let Some(item) = ring.pop() {
                drop(ring);
                self.not_full.notify_one();
                return Ok(item);
            }

            match deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    trace!("take timed out after {:?}", timeout);
                    return Err(BufferError::Timeout(timeout));
                }
                Some(deadline) => {
                    ring.consumers_waiting += 1;
                    self.not_empty.wait_until(&mut ring, deadline);
                    ring.consumers_waiting -= 1;
                }
                None => {
                    ring.consumers_waiting += 1;
                    self.not_empty.wait(&mut ring);
                    ring.consumers_waiting -= 1;
                }
            }
        }
    }

    /// Remove the oldest item only if one is present right now.
    pub fn try_take(&self) -> Result<T, BufferError> {
        let mut ring = self.ring.lock();
        let item = ring.pop().ok_or(BufferError::Empty)?;
        drop(ring);

        self.not_full.notify_one();
        Ok(item)
    }

    /// Number of items currently held.
    pub fn len(&self) -> usize {
        self.ring.lock().count
    }

    /// Whether the buffer holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every slot is occupied.
    pub fn is_full(&self) -> bool {
        self.ring.lock().is_full()
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current fill level.
    pub fn state(&self) -> BufferState {
        self.ring.lock().state()
    }

    /// Snapshot of the buffer's counters.
    pub fn status(&self) -> BufferStatus {
        let ring = self.ring.lock();
        BufferStatus {
            capacity: self.capacity,
            len: ring.count,
            state: ring.state(),
            producers_waiting: ring.producers_waiting,
            consumers_waiting: ring.consumers_waiting,
            total_put: ring.total_put,
            total_taken: ring.total_taken,
        }
    }
}

impl<T> fmt::Debug for BoundedBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("BoundedBuffer")
            .field("capacity", &self.capacity)
            .field("len", &ring.count)
            .field("put_index", &ring.put_index)
            .field("take_index", &ring.take_index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let buffer = BoundedBuffer::new(3);
        buffer.put('a');
        buffer.put('b');
        buffer.put('c');

        assert_eq!(buffer.state(), BufferState::Full);
        assert_eq!(buffer.take(), 'a');
        assert_eq!(buffer.take(), 'b');
        assert_eq!(buffer.take(), 'c');
        assert_eq!(buffer.state(), BufferState::Empty);
    }

    #[test]
    fn test_wraps_around() {
        let buffer = BoundedBuffer::new(2);
        for round in 0..5 {
            buffer.put(round * 2);
            buffer.put(round * 2 + 1);
            assert_eq!(buffer.take(), round * 2);
            assert_eq!(buffer.state(), BufferState::Partial);
            assert_eq!(buffer.take(), round * 2 + 1);
        }

        let status = buffer.status();
        assert_eq!(status.total_put, 10);
        assert_eq!(status.total_taken, 10);
        assert_eq!(status.len, 0);
    }

    #[test]
    fn test_put_blocks_while_full() {
        let buffer = Arc::new(BoundedBuffer::new(1));
        buffer.put(1);

        let (tx, rx) = mpsc::channel();
        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                buffer.put(2);
                tx.send(()).unwrap();
            })
        };

        while buffer.status().producers_waiting == 0 {
            thread::yield_now();
        }
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        assert_eq!(buffer.take(), 1);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        producer.join().unwrap();
        assert_eq!(buffer.take(), 2);
    }

    #[test]
    fn test_take_blocks_while_empty() {
        let buffer = Arc::new(BoundedBuffer::new(2));

        let consumer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.take())
        };

        while buffer.status().consumers_waiting == 0 {
            thread::yield_now();
        }
        buffer.put("hello");
        assert_eq!(consumer.join().unwrap(), "hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_take_timeout_on_empty() {
        let buffer: BoundedBuffer<u8> = BoundedBuffer::new(1);

        let start = Instant::now();
        let result = buffer.take_timeout(Duration::from_millis(40));
        let elapsed = start.elapsed();

        assert_eq!(result, Err(BufferError::Timeout(Duration::from_millis(40))));
        assert!(elapsed >= Duration::from_millis(40));
        assert!(elapsed < Duration::from_secs(2));

        let status = buffer.status();
        assert_eq!(status.consumers_waiting, 0);
        assert_eq!(status.total_taken, 0);
    }

    #[test]
    fn test_take_timeout_woken_by_put() {
        let buffer = Arc::new(BoundedBuffer::new(1));

        let consumer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let start = Instant::now();
                (buffer.take_timeout(Duration::from_secs(5)), start.elapsed())
            })
        };

        while buffer.status().consumers_waiting == 0 {
            thread::yield_now();
        }
        buffer.put(String::from("late"));

        let (result, waited) = consumer.join().unwrap();
        assert_eq!(result, Ok(String::from("late")));
        assert!(waited < Duration::from_secs(5));

        let status = buffer.status();
        assert_eq!(status.consumers_waiting, 0);
        assert_eq!(status.total_taken, 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_put_timeout_returns_item() {
        let buffer = BoundedBuffer::new(1);
        buffer.put(String::from("first"));

        let err = buffer
            .put_timeout(String::from("second"), Duration::from_millis(30))
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.into_inner(), "second");

        // Buffer unchanged
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.status().producers_waiting, 0);
        assert_eq!(buffer.take(), "first");
    }

    #[test]
    fn test_put_timeout_succeeds_when_space_frees() {
        let buffer = Arc::new(BoundedBuffer::new(1));
        buffer.put(1);

        let consumer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                buffer.take()
            })
        };

        buffer.put_timeout(2, Duration::from_secs(5)).unwrap();
        assert_eq!(consumer.join().unwrap(), 1);
        assert_eq!(buffer.take(), 2);
    }

    #[test]
    fn test_non_blocking_variants() {
        let buffer = BoundedBuffer::new(1);
        assert_eq!(buffer.try_take(), Err(BufferError::Empty));

        buffer.try_put(10).unwrap();
        let err = buffer.try_put(11).unwrap_err();
        assert!(err.is_full());
        assert_eq!(err.reason(), BufferError::Full);
        assert_eq!(BufferError::from(err), BufferError::Full);

        assert_eq!(buffer.try_take(), Ok(10));
    }

    #[test]
    fn test_put_error_converts_to_root_error() {
        let buffer = BoundedBuffer::new(1);
        buffer.put(());
        let err: reservoir_core::Error = buffer.try_put(()).unwrap_err().into();
        assert_eq!(err.to_string(), "Buffer error: buffer is full");
    }

    #[test]
    fn test_with_config() {
        let buffer: BoundedBuffer<u8> = BoundedBuffer::with_config(&BufferConfig::new(4)).unwrap();
        assert_eq!(buffer.capacity(), 4);

        assert!(BoundedBuffer::<u8>::with_config(&BufferConfig::new(0)).is_err());
    }

    #[test]
    #[should_panic(expected = "capacity must be at least 1")]
    fn test_zero_capacity_panics() {
        let _ = BoundedBuffer::<u8>::new(0);
    }
}
