//! Resource pooling for reusable resources like connections or file handles.
//!
//! A [`ResourcePool`] owns at most `capacity` live resources. Resources are
//! created on demand by a factory, handed out wrapped in a [`Pooled`] guard,
//! and go back to the idle set when the guard is dropped. When the idle set
//! is empty and the cap is reached, `acquire` blocks on a condition variable
//! until a resource is returned, a capacity slot frees up, or the pool is
//! closed.
//!
//! Idle resources are reused in FIFO order (oldest return first), so no
//! idle resource is starved.
//!
//! Construction happens outside the pool lock: a capacity slot is reserved
//! under the lock first, and released again if the factory fails or panics.
//!
//! # Examples
//!
//! ```
//! use reservoir_concurrency::ResourcePool;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let created = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&created);
//! let pool = ResourcePool::new(
//!     2,
//!     move || Ok::<_, String>(counter.fetch_add(1, Ordering::SeqCst)),
//!     |_conn| {},
//! );
//!
//! let first = pool.acquire().unwrap();
//! let tag = *first;
//! drop(first);
//!
//! // The idle resource is reused rather than rebuilt
//! let again = pool.acquire().unwrap();
//! assert_eq!(*again, tag);
//! assert_eq!(created.load(Ordering::SeqCst), 1);
//! ```

use log::{debug, info, trace, warn};
use parking_lot::{Condvar, Mutex};
use reservoir_core::error::{ConfigError, PoolError};
use reservoir_core::id::{PoolId, ResourceId};
use reservoir_core::utils::config::PoolConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

type Factory<R> = Box<dyn Fn() -> Result<R, String> + Send + Sync>;
type Disposer<R> = Box<dyn Fn(R) + Send + Sync>;

/// A resource type that knows how to build and tear itself down.
///
/// Implementing this trait lets a pool be built with
/// [`ResourcePool::for_resource`] instead of passing closures.
pub trait Resource: Send + Sized + 'static {
    /// Create a new instance of the resource
    fn create() -> Result<Self, String>;

    /// Physically close the resource. Called exactly once per resource.
    fn dispose(self) {}
}

/// Point-in-time view of a pool, for diagnostics.
///
/// Taken under the pool lock but not coordinated with in-flight
/// construction or disposal, so treat it as best-effort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Maximum number of live resources
    pub capacity: usize,

    /// Resources checked out or under construction
    pub active: usize,

    /// Resources waiting in the idle set
    pub idle: usize,

    /// Resources currently in existence
    pub live: usize,

    /// Threads blocked in `acquire`
    pub waiting: usize,

    /// Whether the pool has been closed
    pub closed: bool,

    /// Resources ever created
    pub total_created: u64,

    /// Resources ever disposed
    pub total_disposed: u64,

    /// Successful acquisitions
    pub total_acquired: u64,

    /// Factory failures (errors and panics)
    pub creation_failures: u64,

    /// Acquisitions that gave up at their deadline
    pub timeouts: u64,
}

/// A resource plus the bookkeeping the pool keeps for it.
struct Slot<R> {
    id: ResourceId,
    resource: R,
    created_at: Instant,
    uses: u64,
}

impl<R> Slot<R> {
    fn new(resource: R) -> Self {
        Self {
            id: ResourceId::new(),
            resource,
            created_at: Instant::now(),
            uses: 0,
        }
    }
}

/// Everything mutable about a pool. Guarded by a single mutex.
struct PoolState<R> {
    idle: VecDeque<Slot<R>>,
    live: usize,
    checked_out: usize,
    waiting: usize,
    closed: bool,
    total_created: u64,
    total_disposed: u64,
    total_acquired: u64,
    creation_failures: u64,
    timeouts: u64,
}

impl<R> PoolState<R> {
    fn new(capacity: usize) -> Self {
        Self {
            idle: VecDeque::with_capacity(capacity),
            live: 0,
            checked_out: 0,
            waiting: 0,
            closed: false,
            total_created: 0,
            total_disposed: 0,
            total_acquired: 0,
            creation_failures: 0,
            timeouts: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Wait {
    Never,
    Forever,
    Until { deadline: Instant, timeout: Duration },
}

impl Wait {
    fn for_timeout(timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => Self::Until { deadline, timeout },
            None => Self::Forever,
        }
    }
}

/// A capacity slot claimed for a resource under construction.
///
/// Dropping it without `commit` hands the slot back, which covers both a
/// factory error and a factory panic.
struct Reservation<'a, R: Send + 'static> {
    pool: &'a ResourcePool<R>,
    armed: bool,
}

impl<R: Send + 'static> Reservation<'_, R> {
    fn commit(mut self) {
        self.armed = false;
    }
}

impl<R: Send + 'static> Drop for Reservation<'_, R> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.abandon_reservation();
        }
    }
}

/// A bounded pool of reusable resources.
pub struct ResourcePool<R: Send + 'static> {
    /// Identity, used to reject foreign releases
    id: PoolId,

    /// Maximum number of live resources; never changes
    capacity: usize,

    /// Deadline applied by `acquire`
    acquire_timeout: Option<Duration>,

    state: Mutex<PoolState<R>>,

    /// Signalled when a resource is returned, a slot frees up, or the pool closes
    available: Condvar,

    factory: Factory<R>,
    dispose: Disposer<R>,
}

impl<R: Send + 'static> ResourcePool<R> {
    /// Create a lazily-growing pool with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new<F, E, D>(capacity: usize, factory: F, dispose: D) -> Arc<Self>
    where
        F: Fn() -> Result<R, E> + Send + Sync + 'static,
        E: fmt::Display + 'static,
        D: Fn(R) + Send + Sync + 'static,
    {
        assert!(capacity > 0, "resource pool capacity must be at least 1");
        Self::build(PoolConfig::new(capacity), factory, dispose)
    }

    /// Create a pool from a validated configuration.
    ///
    /// `initial_size` resources are created before this returns; factory
    /// failures during that warm-up are logged and skipped.
    pub fn with_config<F, E, D>(
        config: PoolConfig,
        factory: F,
        dispose: D,
    ) -> Result<Arc<Self>, ConfigError>
    where
        F: Fn() -> Result<R, E> + Send + Sync + 'static,
        E: fmt::Display + 'static,
        D: Fn(R) + Send + Sync + 'static,
    {
        config.validate()?;
        Ok(Self::build(config, factory, dispose))
    }

    fn build<F, E, D>(config: PoolConfig, factory: F, dispose: D) -> Arc<Self>
    where
        F: Fn() -> Result<R, E> + Send + Sync + 'static,
        E: fmt::Display + 'static,
        D: Fn(R) + Send + Sync + 'static,
    {
        let pool = Arc::new(Self {
            id: PoolId::new(),
            capacity: config.capacity,
            acquire_timeout: config.acquire_timeout(),
            state: Mutex::new(PoolState::new(config.capacity)),
            available: Condvar::new(),
            factory: Box::new(move || factory().map_err(|e| e.to_string())),
            dispose: Box::new(dispose),
        });

        info!(
            "Created resource pool {} with capacity {}",
            pool.id.short(),
            pool.capacity
        );

        pool.warm_up(config.initial_size);
        pool
    }

    /// Pre-create resources into the idle set.
    fn warm_up(&self, count: usize) {
        if count == 0 {
            return;
        }

        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            match (self.factory)() {
                Ok(resource) => created.push(Slot::new(resource)),
                Err(e) => warn!("Failed to create resource during warm-up: {}", e),
            }
        }

        let mut state = self.state.lock();
        state.live += created.len();
        state.total_created += created.len() as u64;
        state.idle.extend(created);

        debug!(
            "Pool {} warmed up with {} of {} requested resources",
            self.id.short(),
            state.idle.len(),
            count
        );
    }

    /// Acquire a resource, blocking while the pool is at capacity.
    ///
    /// Waits indefinitely unless the pool was configured with an
    /// `acquire_timeout`, in which case this behaves like
    /// [`acquire_timeout`](Self::acquire_timeout).
    pub fn acquire(self: &Arc<Self>) -> Result<Pooled<R>, PoolError> {
        match self.acquire_timeout {
            Some(timeout) => self.acquire_timeout(timeout),
            None => self.checkout(Wait::Forever),
        }
    }

    /// Acquire a resource, giving up with [`PoolError::Timeout`] after `timeout`.
    pub fn acquire_timeout(self: &Arc<Self>, timeout: Duration) -> Result<Pooled<R>, PoolError> {
        self.checkout(Wait::for_timeout(timeout))
    }

    /// Acquire a resource without waiting.
    ///
    /// Returns [`PoolError::Exhausted`] when no resource is idle and the
    /// pool is at capacity.
    pub fn try_acquire(self: &Arc<Self>) -> Result<Pooled<R>, PoolError> {
        self.checkout(Wait::Never)
    }

    fn checkout(self: &Arc<Self>, wait: Wait) -> Result<Pooled<R>, PoolError> {
        let mut state = self.state.lock();

        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }

            if let Some(mut slot) = state.idle.pop_front() {
                slot.uses += 1;
                state.checked_out += 1;
                state.total_acquired += 1;
                drop(state);

                trace!(
                    "Pool {}: reusing resource {}",
                    self.id.short(),
                    slot.id.short()
                );
                return Ok(Pooled::new(slot, Arc::clone(self)));
            }

            if state.live < self.capacity {
                state.live += 1;
                state.checked_out += 1;
                drop(state);

                return self.create_reserved();
            }

            match wait {
                Wait::Never => return Err(PoolError::Exhausted),
                Wait::Forever => {
                    state.waiting += 1;
                    self.available.wait(&mut state);
                    state.waiting -= 1;
                }
                Wait::Until { deadline, timeout } => {
                    if Instant::now() >= deadline {
                        state.timeouts += 1;
                        debug!(
                            "Pool {}: acquire timed out after {:?}",
                            self.id.short(),
                            timeout
                        );
                        return Err(PoolError::Timeout(timeout));
                    }
                    state.waiting += 1;
                    self.available.wait_until(&mut state, deadline);
                    state.waiting -= 1;
                }
            }
        }
    }

    /// Build a resource into a slot already reserved by `checkout`.
    fn create_reserved(self: &Arc<Self>) -> Result<Pooled<R>, PoolError> {
        let reservation = Reservation {
            pool: self,
            armed: true,
        };

        debug!("Pool {}: creating new resource", self.id.short());
        let resource = match (self.factory)() {
            Ok(resource) => resource,
            Err(e) => {
                warn!("Pool {}: failed to create resource: {}", self.id.short(), e);
                drop(reservation);
                return Err(PoolError::CreationFailed(e));
            }
        };
        reservation.commit();

        let mut state = self.state.lock();
        state.total_created += 1;

        if state.closed {
            // Closed while we were building; this resource never reaches a caller.
            state.live -= 1;
            state.checked_out -= 1;
            state.total_disposed += 1;
            drop(state);

            (self.dispose)(resource);
            return Err(PoolError::Closed);
        }

        state.total_acquired += 1;
        drop(state);

        let mut slot = Slot::new(resource);
        slot.uses = 1;
        Ok(Pooled::new(slot, Arc::clone(self)))
    }

    fn abandon_reservation(&self) {
        let mut state = self.state.lock();
        state.live -= 1;
        state.checked_out -= 1;
        state.creation_failures += 1;
        drop(state);

        // The freed slot lets one waiter try to create instead.
        self.available.notify_one();
    }

    /// Return a resource obtained from this pool.
    ///
    /// Equivalent to dropping the guard. A guard that belongs to a different
    /// pool is rejected with [`PoolError::InvalidRelease`] and still goes back
    /// to the pool it came from. Releasing twice cannot happen: the guard is
    /// consumed.
    pub fn release(&self, resource: Pooled<R>) -> Result<(), PoolError> {
        if resource.pool.id != self.id {
            let id = resource.id();
            warn!(
                "Pool {}: rejected release of resource {} owned by pool {}",
                self.id.short(),
                id.short(),
                resource.pool.id.short()
            );
            return Err(PoolError::InvalidRelease(id));
        }

        drop(resource);
        Ok(())
    }

    /// Put a returned resource back into the idle set, or dispose it if closed.
    fn check_in(&self, slot: Slot<R>) {
        let mut state = self.state.lock();
        state.checked_out -= 1;

        if state.closed {
            state.live -= 1;
            state.total_disposed += 1;
            drop(state);

            trace!(
                "Pool {} is closed, disposing returned resource {}",
                self.id.short(),
                slot.id.short()
            );
            (self.dispose)(slot.resource);
            return;
        }

        trace!(
            "Pool {}: resource {} returned",
            self.id.short(),
            slot.id.short()
        );
        state.idle.push_back(slot);
        drop(state);

        self.available.notify_one();
    }

    /// Dispose a checked-out resource and free its capacity slot.
    fn evict(&self, slot: Slot<R>) {
        let mut state = self.state.lock();
        state.checked_out -= 1;
        state.live -= 1;
        state.total_disposed += 1;
        let closed = state.closed;
        drop(state);

        debug!(
            "Pool {}: discarding resource {} after {} uses",
            self.id.short(),
            slot.id.short(),
            slot.uses
        );
        (self.dispose)(slot.resource);

        if !closed {
            self.available.notify_one();
        }
    }

    /// Close the pool.
    ///
    /// Idempotent. Disposes every idle resource and fails all current and
    /// future `acquire` calls with [`PoolError::Closed`]. Resources that are
    /// checked out are not reclaimed; they are disposed when released.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;

        let idle: Vec<Slot<R>> = state.idle.drain(..).collect();
        state.live -= idle.len();
        state.total_disposed += idle.len() as u64;
        let outstanding = state.checked_out;
        drop(state);

        self.available.notify_all();

        info!(
            "Closing pool {}: disposing {} idle resources, {} still checked out",
            self.id.short(),
            idle.len(),
            outstanding
        );

        for slot in idle {
            (self.dispose)(slot.resource);
        }
    }

    /// Snapshot of the pool's counters.
    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        PoolStatus {
            capacity: self.capacity,
            active: state.checked_out,
            idle: state.idle.len(),
            live: state.live,
            waiting: state.waiting,
            closed: state.closed,
            total_created: state.total_created,
            total_disposed: state.total_disposed,
            total_acquired: state.total_acquired,
            creation_failures: state.creation_failures,
            timeouts: state.timeouts,
        }
    }

    /// Maximum number of live resources.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Identity of this pool.
    pub fn id(&self) -> PoolId {
        self.id
    }
}

impl<R: Resource> ResourcePool<R> {
    /// Create a pool whose resources are built and disposed through [`Resource`].
    pub fn for_resource(config: PoolConfig) -> Result<Arc<Self>, ConfigError> {
        Self::with_config(config, R::create, R::dispose)
    }
}

impl<R: Send + 'static> Drop for ResourcePool<R> {
    fn drop(&mut self) {
        // No guard can outlive the pool, so only idle resources remain.
        self.close();
    }
}

impl<R: Send + 'static> fmt::Debug for ResourcePool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

/// A resource checked out of a [`ResourcePool`].
///
/// Dereferences to the resource. Dropping the guard returns the resource
/// to its pool exactly once, including while unwinding from a panic.
pub struct Pooled<R: Send + 'static> {
    /// Present until the guard is released or discarded
    slot: Option<Slot<R>>,

    /// The pool this resource belongs to
    pool: Arc<ResourcePool<R>>,

    /// When this resource was acquired
    acquired_at: Instant,
}

impl<R: Send + 'static> Pooled<R> {
    fn new(slot: Slot<R>, pool: Arc<ResourcePool<R>>) -> Self {
        Self {
            slot: Some(slot),
            pool,
            acquired_at: Instant::now(),
        }
    }

    // `slot` is only taken by `discard` and `Drop`, both of which consume
    // the guard, so every accessor below sees it populated.
    fn slot(&self) -> &Slot<R> {
        self.slot.as_ref().expect("pooled resource already returned")
    }

    /// Identity of the underlying resource.
    pub fn id(&self) -> ResourceId {
        self.slot().id
    }

    /// Get a reference to the resource
    pub fn get(&self) -> &R {
        &self.slot().resource
    }

    /// Get a mutable reference to the resource
    pub fn get_mut(&mut self) -> &mut R {
        &mut self
            .slot
            .as_mut()
            .expect("pooled resource already returned")
            .resource
    }

    /// How many times this resource has been checked out, this time included.
    pub fn use_count(&self) -> u64 {
        self.slot().uses
    }

    /// Time since the resource was created.
    pub fn age(&self) -> Duration {
        self.slot().created_at.elapsed()
    }

    /// Time since this checkout.
    pub fn held_duration(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// The pool this resource belongs to.
    pub fn pool(&self) -> &Arc<ResourcePool<R>> {
        &self.pool
    }

    /// Return the resource to the pool now.
    pub fn release(self) {
        drop(self);
    }

    /// Dispose the resource instead of returning it, freeing its capacity slot.
    ///
    /// Use this when the resource is known to be broken.
    pub fn discard(mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.evict(slot);
        }
    }
}

impl<R: Send + 'static> Deref for Pooled<R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.get()
    }
}

impl<R: Send + 'static> DerefMut for Pooled<R> {
    fn deref_mut(&mut self) -> &mut R {
        self.get_mut()
    }
}

impl<R: Send + 'static> Drop for Pooled<R> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.check_in(slot);
        }
    }
}

impl<R: Send + fmt::Debug + 'static> fmt::Debug for Pooled<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.slot {
            Some(slot) => f
                .debug_struct("Pooled")
                .field("id", &slot.id)
                .field("resource", &slot.resource)
                .field("uses", &slot.uses)
                .finish(),
            None => write!(f, "Pooled(returned)"),
        }
    }
}
