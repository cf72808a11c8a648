//! Producer/consumer tests for the bounded buffer.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use reservoir_concurrency::{BoundedBuffer, BufferError};

/// An item tagged with its producer and a per-producer sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Tagged {
    producer: usize,
    seq: usize,
}

fn run_stress(producers: usize, consumers: usize, per_producer: usize, capacity: usize) {
    let buffer: Arc<BoundedBuffer<Option<Tagged>>> = Arc::new(BoundedBuffer::new(capacity));

    let producer_handles: Vec<_> = (0..producers)
        .map(|producer| {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for seq in 0..per_producer {
                    buffer.put(Some(Tagged { producer, seq }));
                }
            })
        })
        .collect();

    let consumer_handles: Vec<_> = (0..consumers)
        .map(|_| {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut received = Vec::new();
                while let Some(item) = buffer.take() {
                    received.push(item);
                }
                received
            })
        })
        .collect();

    for handle in producer_handles {
        handle.join().unwrap();
    }
    for _ in 0..consumers {
        buffer.put(None);
    }

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in consumer_handles {
        let received = handle.join().unwrap();

        // Each consumer sees every producer's items in increasing order
        let mut last_seq = vec![None; producers];
        for item in &received {
            if let Some(previous) = last_seq[item.producer] {
                assert!(item.seq > previous, "out of order: {:?}", item);
            }
            last_seq[item.producer] = Some(item.seq);
            assert!(seen.insert(*item), "duplicate: {:?}", item);
        }
        total += received.len();
    }

    assert_eq!(total, producers * per_producer);
    assert_eq!(seen.len(), producers * per_producer);
    assert!(buffer.is_empty());
}

#[test]
fn test_many_producers_many_consumers() {
    run_stress(4, 4, 1000, 3);
}

#[test]
fn test_single_slot_buffer() {
    run_stress(2, 3, 500, 1);
}

#[test]
fn test_single_producer_single_consumer_is_fifo() {
    let buffer = Arc::new(BoundedBuffer::new(3));
    let producer = {
        let buffer = Arc::clone(&buffer);
        thread::spawn(move || {
            for tag in 0..5000u32 {
                buffer.put(tag);
            }
        })
    };

    for expected in 0..5000u32 {
        assert_eq!(buffer.take(), expected);
    }
    producer.join().unwrap();
}

#[test]
fn test_extra_put_blocks_until_take() {
    const K: usize = 3;
    let buffer = Arc::new(BoundedBuffer::new(K));
    for i in 0..K {
        buffer.put(i);
    }

    let done = Arc::new(AtomicBool::new(false));
    let producer = {
        let buffer = Arc::clone(&buffer);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            buffer.put(K);
            done.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!done.load(Ordering::SeqCst));
    assert_eq!(buffer.len(), K);

    assert_eq!(buffer.take(), 0);
    producer.join().unwrap();
    assert!(done.load(Ordering::SeqCst));

    let rest: Vec<_> = (0..K).map(|_| buffer.take()).collect();
    assert_eq!(rest, vec![1, 2, 3]);
}

#[test]
fn test_timeouts_against_stuck_buffer() {
    let full = BoundedBuffer::new(2);
    full.put(1);
    full.put(2);
    let before = full.status();

    let start = Instant::now();
    let err = full.put_timeout(3, Duration::from_millis(60)).unwrap_err();
    let elapsed = start.elapsed();
    assert_eq!(err.reason(), BufferError::Timeout(Duration::from_millis(60)));
    assert!(elapsed >= Duration::from_millis(60));
    assert!(elapsed < Duration::from_secs(2));
    assert_eq!(full.status(), before);

    let empty: BoundedBuffer<u8> = BoundedBuffer::new(2);
    let before = empty.status();
    let start = Instant::now();
    assert!(matches!(
        empty.take_timeout(Duration::from_millis(60)),
        Err(BufferError::Timeout(_))
    ));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(empty.status(), before);
}
