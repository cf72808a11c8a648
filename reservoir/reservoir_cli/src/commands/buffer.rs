//! Bounded buffer stress command

use super::StressError;
use clap::Args;
use log::info;
use reservoir_concurrency::{BoundedBuffer, BufferStatus};
use reservoir_core::{BufferConfig, ReservoirConfig};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Arguments for the buffer-stress command
#[derive(Args, Debug)]
pub struct BufferStressArgs {
    /// Buffer capacity (defaults to the configured capacity)
    #[clap(long)]
    pub capacity: Option<usize>,

    /// Number of producer threads
    #[clap(long, default_value_t = 4)]
    pub producers: usize,

    /// Number of consumer threads
    #[clap(long, default_value_t = 4)]
    pub consumers: usize,

    /// Items put by each producer
    #[clap(long, default_value_t = 1000)]
    pub items: usize,
}

/// An item tagged with its producer and sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Tagged {
    producer: usize,
    seq: usize,
}

/// JSON report printed by buffer-stress
#[derive(Debug, Serialize)]
pub struct BufferStressReport {
    pub capacity: usize,
    pub producers: usize,
    pub consumers: usize,
    pub items_per_producer: usize,
    pub put: usize,
    pub taken: usize,
    pub duplicates: usize,
    pub lost: usize,
    pub fifo_violations: usize,
    pub elapsed_ms: u64,
    pub status: BufferStatus,
}

/// Implementation of the buffer-stress command
pub fn execute_buffer_stress(
    args: &BufferStressArgs,
    config: &ReservoirConfig,
) -> anyhow::Result<()> {
    let buffer_config = match args.capacity {
        Some(capacity) => BufferConfig::new(capacity),
        None => config.buffer.clone(),
    };
    // `None` tells a consumer to stop
    let buffer: Arc<BoundedBuffer<Option<Tagged>>> =
        Arc::new(BoundedBuffer::with_config(&buffer_config)?);
    let producers = args.producers.max(1);
    let consumers = args.consumers.max(1);

    info!(
        "Starting buffer stress: capacity {}, {} producers x {} items, {} consumers",
        buffer.capacity(),
        producers,
        args.items,
        consumers
    );
    let start = Instant::now();

    let producer_handles: Vec<_> = (0..producers)
        .map(|producer| {
            let buffer = Arc::clone(&buffer);
            let items = args.items;
            thread::spawn(move || {
                for seq in 0..items {
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
        handle
            .join()
            .map_err(|_| StressError::ThreadPanicked("producer"))?;
    }
    for _ in 0..consumers {
        buffer.put(None);
    }

    let mut seen = HashSet::new();
    let mut taken = 0;
    let mut duplicates = 0;
    let mut fifo_violations = 0;
    for handle in consumer_handles {
        let received = handle
            .join()
            .map_err(|_| StressError::ThreadPanicked("consumer"))?;
        taken += received.len();

        let mut last_seq: Vec<Option<usize>> = vec![None; producers];
        for item in received {
            if last_seq[item.producer].is_some_and(|prev| item.seq <= prev) {
                fifo_violations += 1;
            }
            last_seq[item.producer] = Some(item.seq);
            if !seen.insert(item) {
                duplicates += 1;
            }
        }
    }
    let elapsed = start.elapsed();

    let put = producers * args.items;
    let report = BufferStressReport {
        capacity: buffer.capacity(),
        producers,
        consumers,
        items_per_producer: args.items,
        put,
        taken,
        duplicates,
        lost: put - seen.len(),
        fifo_violations,
        elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        status: buffer.status(),
    };
    super::print_report(&report)?;

    if report.duplicates > 0 || report.lost > 0 || report.fifo_violations > 0 {
        return Err(StressError::BufferAnomalies {
            duplicates: report.duplicates,
            lost: report.lost,
            reordered: report.fifo_violations,
        }
        .into());
    }

    info!("Buffer stress finished in {:?}", elapsed);
    Ok(())
}
