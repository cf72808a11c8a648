//! Resource pool stress command
//!
//! Client threads run on a [`WorkerPool`]; each one repeatedly acquires a
//! resource, holds it briefly and releases it. The report records the peak
//! number of resources held at once, which must never exceed the capacity.

use super::StressError;
use anyhow::Context;
use clap::Args;
use log::{debug, info};
use reservoir_concurrency::{PoolError, PoolStatus, ResourcePool, WorkerPool};
use reservoir_core::{ReservoirConfig, WorkerPoolConfig};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

/// Arguments for the pool-stress command
#[derive(Args, Debug)]
pub struct PoolStressArgs {
    /// Pool capacity (defaults to the configured capacity)
    #[clap(long)]
    pub capacity: Option<usize>,

    /// Number of client threads
    #[clap(long, default_value_t = 8)]
    pub threads: usize,

    /// Acquire/release cycles per thread
    #[clap(long, default_value_t = 100)]
    pub iterations: usize,

    /// How long each resource is held, in milliseconds
    #[clap(long, default_value_t = 1)]
    pub hold_ms: u64,

    /// Make every K-th resource construction fail
    #[clap(long)]
    pub fail_every: Option<usize>,
}

/// A stand-in for an expensive connection
#[derive(Debug)]
struct Connection {
    serial: usize,
}

/// Outcome of one client thread
#[derive(Debug, Default)]
struct Tally {
    acquired: usize,
    creation_failures: usize,
    timeouts: usize,
}

/// JSON report printed by pool-stress
#[derive(Debug, Serialize)]
pub struct PoolStressReport {
    pub capacity: usize,
    pub threads: usize,
    pub iterations: usize,
    pub acquired: usize,
    pub creation_failures: usize,
    pub timeouts: usize,
    pub peak_outstanding: usize,
    pub created: usize,
    pub disposed: usize,
    pub elapsed_ms: u64,
    pub status: PoolStatus,
}

/// Implementation of the pool-stress command
pub fn execute_pool_stress(args: &PoolStressArgs, config: &ReservoirConfig) -> anyhow::Result<()> {
    let mut pool_config = config.pool.clone();
    if let Some(capacity) = args.capacity {
        pool_config.capacity = capacity;
    }

    let created = Arc::new(AtomicUsize::new(0));
    let attempts = Arc::new(AtomicUsize::new(0));
    let disposed = Arc::new(AtomicUsize::new(0));
    let fail_every = args.fail_every.filter(|k| *k > 0);

    let pool = {
        let created = Arc::clone(&created);
        let attempts = Arc::clone(&attempts);
        let disposed = Arc::clone(&disposed);
        ResourcePool::with_config(
            pool_config,
            move || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if fail_every.is_some_and(|k| attempt % k == 0) {
                    return Err(format!("injected failure on attempt {}", attempt));
                }
                let serial = created.fetch_add(1, Ordering::SeqCst);
                debug!("Opened connection {}", serial);
                Ok(Connection { serial })
            },
            move |conn: Connection| {
                debug!("Closed connection {}", conn.serial);
                disposed.fetch_add(1, Ordering::SeqCst);
            },
        )?
    };

    let workers = WorkerPool::with_config(WorkerPoolConfig {
        threads: Some(args.threads.max(1)),
        ..config.workers.clone()
    })?;

    info!(
        "Starting pool stress: capacity {}, {} threads x {} iterations",
        pool.capacity(),
        workers.worker_count(),
        args.iterations
    );

    let outstanding = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let hold = Duration::from_millis(args.hold_ms);
    let (tx, rx) = mpsc::channel();
    let start = Instant::now();

    for _ in 0..workers.worker_count() {
        let pool = Arc::clone(&pool);
        let outstanding = Arc::clone(&outstanding);
        let peak = Arc::clone(&peak);
        let tx = tx.clone();
        let iterations = args.iterations;

        workers.execute(move || {
            let mut tally = Tally::default();
            let mut outcome = Ok(());

            for _ in 0..iterations {
                match pool.acquire() {
                    Ok(conn) => {
                        let now = outstanding.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tally.acquired += 1;
                        if !hold.is_zero() {
                            thread::sleep(hold);
                        }
                        outstanding.fetch_sub(1, Ordering::SeqCst);
                        drop(conn);
                    }
                    Err(PoolError::CreationFailed(_)) => tally.creation_failures += 1,
                    Err(PoolError::Timeout(_)) => tally.timeouts += 1,
                    Err(e) => {
                        outcome = Err(e);
                        break;
                    }
                }
            }

            let _ = tx.send(outcome.map(|()| tally));
        })?;
    }
    drop(tx);
    workers.join();

    let mut total = Tally::default();
    for outcome in rx {
        let tally = outcome.context("client thread failed")?;
        total.acquired += tally.acquired;
        total.creation_failures += tally.creation_failures;
        total.timeouts += tally.timeouts;
    }
    let elapsed = start.elapsed();

    pool.close();
    let report = PoolStressReport {
        capacity: pool.capacity(),
        threads: args.threads.max(1),
        iterations: args.iterations,
        acquired: total.acquired,
        creation_failures: total.creation_failures,
        timeouts: total.timeouts,
        peak_outstanding: peak.load(Ordering::SeqCst),
        created: created.load(Ordering::SeqCst),
        disposed: disposed.load(Ordering::SeqCst),
        elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        status: pool.status(),
    };
    super::print_report(&report)?;

    if report.peak_outstanding > report.capacity {
        return Err(StressError::CapacityExceeded {
            peak: report.peak_outstanding,
            capacity: report.capacity,
        }
        .into());
    }
    if report.disposed != report.created {
        return Err(StressError::DisposalMismatch {
            created: report.created,
            disposed: report.disposed,
        }
        .into());
    }

    info!("Pool stress finished in {:?}", elapsed);
    Ok(())
}
