// Copyright 2025 FastLabs Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fixed-capacity pools.
//!
//! A [`Pool`] creates all of its objects up front, in [`Pool::new`], and never grows afterwards.
//! Callers borrow an object with [`Pool::get`] and give it back by dropping the returned
//! [`Object`] (or calling [`Object::release`]). When every object is checked out, `get` waits
//! until one is released, the pool is closed, or the configured deadline expires. Waiters are
//! served first come, first served.
//!
//! On dequeue the pool asks [`ManageObject::is_healthy`] whether the idle object is still usable.
//! An unhealthy object is closed and replaced in place. If the replacement cannot be created the
//! slot stays empty and the pool runs with one object less until [`Pool::replenish`] fills it.
//!
//! [`Pool::close`] closes every idle object, wakes every waiter with [`Error::Closed`], and makes
//! outstanding objects close themselves when they are released.
//!
//! ## Examples
//!
//! ```
//! use std::convert::Infallible;
//!
//! use fixedpool::ManageObject;
//! use fixedpool::Pool;
//! use fixedpool::PoolConfig;
//!
//! #[derive(Debug)]
//! struct Connection {
//!     id: usize,
//! }
//!
//! struct Manager;
//! impl ManageObject for Manager {
//!     type Object = Connection;
//!     type Error = Infallible;
//!
//!     async fn create(&self) -> Result<Self::Object, Self::Error> {
//!         Ok(Connection { id: 7 })
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let pool = Pool::new(PoolConfig::new(4), Manager).await.unwrap();
//! let conn = pool.get().await.unwrap();
//! assert_eq!(conn.id, 7);
//! assert_eq!(pool.status().outstanding, 1);
//! drop(conn);
//!
//! pool.close();
//! assert!(pool.get().await.unwrap_err().is_closed());
//! # }
//! ```

use std::collections::VecDeque;
use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use mea::semaphore::OwnedSemaphorePermit;
use mea::semaphore::Semaphore;
use tokio::sync::watch;

use crate::Error;
use crate::ManageObject;
use crate::ObjectStatus;
use crate::mutex::Mutex;

/// The configuration of [`Pool`].
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolConfig {
    /// Number of objects the [`Pool`] creates and keeps.
    pub capacity: usize,

    /// Deadline applied by [`Pool::get`].
    ///
    /// `None` (the default) lets `get` wait until an object is released or the pool is closed.
    #[cfg_attr(feature = "serde", serde(default))]
    pub acquire_timeout: Option<Duration>,

    /// Whether to call [`ManageObject::is_healthy`] before handing out an idle object.
    #[cfg_attr(feature = "serde", serde(default = "default_health_check"))]
    pub health_check: bool,
}

#[cfg(feature = "serde")]
fn default_health_check() -> bool {
    true
}

impl PoolConfig {
    /// Creates a new [`PoolConfig`].
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            acquire_timeout: None,
            health_check: true,
        }
    }

    /// Returns a new [`PoolConfig`] with the specified acquire timeout.
    pub fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = Some(acquire_timeout);
        self
    }

    /// Returns a new [`PoolConfig`] with health checks on dequeue enabled or disabled.
    pub fn with_health_check(mut self, health_check: bool) -> Self {
        self.health_check = health_check;
        self
    }
}

/// The current pool status.
///
/// See [`Pool::status`].
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct PoolStatus {
    /// The configured capacity of the pool.
    pub capacity: usize,

    /// The number of live objects, idle or checked out.
    pub size: usize,

    /// The number of idle objects in the pool.
    pub idle: usize,

    /// The number of objects currently checked out.
    pub outstanding: usize,

    /// The number of futures waiting for an object.
    pub waiting: usize,

    /// The number of slots left empty by failed replacements.
    pub lost: usize,

    /// Whether the pool has been closed.
    pub closed: bool,
}

/// Generic fixed-capacity object pool.
///
/// See the [crate level documentation](crate) for more.
pub struct Pool<M: ManageObject> {
    config: PoolConfig,
    manager: M,

    /// A counter that tracks the sum of waiters + obtained objects.
    users: AtomicUsize,
    /// One permit per slot. A permit is required to take an idle object.
    permits: Arc<Semaphore>,
    /// The idle objects and the bookkeeping of the pool.
    slots: Mutex<PoolSlots<ObjectState<M::Object>>>,
    /// Flipped to `true` exactly once, by [`Pool::close`].
    closed: watch::Sender<bool>,
}

#[derive(Debug)]
struct PoolSlots<T> {
    deque: VecDeque<T>,
    /// Live objects: idle, checked out, or under a health check.
    current_size: usize,
    /// Objects handed out as [`Object`].
    outstanding: usize,
    /// Permits of slots whose object could not be replaced.
    parked: Vec<OwnedSemaphorePermit>,
    closed: bool,
}

impl<M> std::fmt::Debug for Pool<M>
where
    M: ManageObject,
    M::Object: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("slots", &self.slots)
            .field("config", &self.config)
            .field("users", &self.users)
            .field("permits", &self.permits)
            .finish()
    }
}

impl<M: ManageObject> Pool<M> {
    /// Creates a new [`Pool`] and fills it with `config.capacity` objects.
    ///
    /// Objects are created one after another. If any creation fails, the objects created so far
    /// are closed and [`Error::Init`] is returned. The same cleanup happens if the returned future
    /// is dropped before completion.
    pub async fn new(config: PoolConfig, manager: M) -> Result<Arc<Self>, Error<M::Error>> {
        let capacity = config.capacity;
        if capacity == 0 {
            return Err(Error::InvalidCapacity);
        }

        let created = VecDeque::<ObjectState<M::Object>>::with_capacity(capacity);
        let mut created = scopeguard::guard(created, |created| {
            for state in created {
                manager.close(state.o);
            }
        });

        for index in 0..capacity {
            match manager.create().await {
                Ok(o) => created.push_back(ObjectState {
                    o,
                    status: ObjectStatus::default(),
                }),
                Err(source) => {
                    tracing::error!(
                        index,
                        capacity,
                        error = %source,
                        "failed to create object; closing {} created objects",
                        created.len()
                    );
                    return Err(Error::Init {
                        index,
                        capacity,
                        source,
                    });
                }
            }
        }

        let deque = scopeguard::ScopeGuard::into_inner(created);
        tracing::info!(capacity, "pool initialized");

        let (closed, _) = watch::channel(false);
        Ok(Arc::new(Self {
            config,
            manager,
            users: AtomicUsize::new(0),
            permits: Arc::new(Semaphore::new(capacity)),
            slots: Mutex::new(PoolSlots {
                deque,
                current_size: capacity,
                outstanding: 0,
                parked: Vec::new(),
                closed: false,
            }),
            closed,
        }))
    }

    /// Retrieves an [`Object`] from this [`Pool`].
    ///
    /// If every object is checked out, this method waits until one is released. The wait is
    /// bounded by [`PoolConfig::acquire_timeout`] when set, and always ends with
    /// [`Error::Closed`] once the pool is closed.
    ///
    /// The returned future may be dropped at any point; an object it had already taken from the
    /// pool is put back.
    pub async fn get(self: &Arc<Self>) -> Result<Object<M>, Error<M::Error>> {
        match self.config.acquire_timeout {
            Some(timeout) => self.get_timeout(timeout).await,
            None => self.acquire().await,
        }
    }

    /// Retrieves an [`Object`] from this [`Pool`], waiting at most `timeout`.
    ///
    /// Returns [`Error::Timeout`] if no object became available in time.
    pub async fn get_timeout(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Result<Object<M>, Error<M::Error>> {
        match tokio::time::timeout(timeout, self.acquire()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(?timeout, "timed out waiting for an object");
                Err(Error::Timeout(timeout))
            }
        }
    }

    async fn acquire(self: &Arc<Self>) -> Result<Object<M>, Error<M::Error>> {
        self.users.fetch_add(1, Ordering::Relaxed);

        let guard = scopeguard::guard((), |()| {
            self.users.fetch_sub(1, Ordering::Relaxed);
        });

        let mut closed = self.closed.subscribe();

        let object = loop {
            let permit = tokio::select! {
                biased;
                _ = closed.wait_for(|closed| *closed) => return Err(Error::Closed),
                permit = self.permits.clone().acquire_owned(1) => permit,
            };

            let state = {
                let mut slots = self.slots.lock();
                if slots.closed {
                    return Err(Error::Closed);
                }
                match slots.deque.pop_front() {
                    Some(state) => state,
                    None => unreachable!(
                        "invariant broken: a permit holder must find an idle object \
                         (current_size: {}, outstanding: {})",
                        slots.current_size, slots.outstanding,
                    ),
                }
            };

            let mut unready = UnreadyObject {
                state: Some(state),
                permit: Some(permit),
                pool: self.clone(),
            };

            if self.config.health_check {
                let state = unready.state();
                let status = state.status;
                if !self.manager.is_healthy(&mut state.o, &status).await {
                    match self.replace(unready).await {
                        Some((state, permit)) => break self.hand_out(state, permit)?,
                        None => continue,
                    }
                }
            }

            let (state, permit) = unready.into_parts();
            break self.hand_out(state, permit)?;
        };

        scopeguard::ScopeGuard::into_inner(guard);
        Ok(object)
    }

    /// Closes an unhealthy object and creates its replacement.
    ///
    /// Returns `None` if the replacement failed, in which case the slot's permit is parked.
    async fn replace(
        &self,
        unready: UnreadyObject<M>,
    ) -> Option<(ObjectState<M::Object>, OwnedSemaphorePermit)> {
        let (state, permit) = unready.into_parts();
        tracing::warn!(
            acquire_count = state.status.acquire_count(),
            "closing unhealthy object"
        );
        self.manager.close(state.o);
        self.slots.with(|slots| slots.current_size -= 1);

        // the permit must not return to the semaphore without an object behind it
        let permit = scopeguard::guard(permit, |permit| self.park(permit));

        match self.manager.create().await {
            Ok(o) => {
                self.slots.with(|slots| slots.current_size += 1);
                tracing::debug!("replaced unhealthy object");
                let state = ObjectState {
                    o,
                    status: ObjectStatus::default(),
                };
                Some((state, scopeguard::ScopeGuard::into_inner(permit)))
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to replace unhealthy object");
                self.manager.on_replacement_failed(&err);
                None
            }
        }
    }

    fn hand_out(
        self: &Arc<Self>,
        mut state: ObjectState<M::Object>,
        permit: OwnedSemaphorePermit,
    ) -> Result<Object<M>, Error<M::Error>> {
        let mut slots = self.slots.lock();
        if slots.closed {
            slots.current_size -= 1;
            drop(slots);
            self.manager.close(state.o);
            return Err(Error::Closed);
        }

        slots.outstanding += 1;
        assert!(
            slots.outstanding <= self.config.capacity,
            "invariant broken: outstanding <= capacity (actual: {} <= {})",
            slots.outstanding,
            self.config.capacity,
        );
        drop(slots);

        state.status.mark_acquired();
        tracing::debug!(acquire_count = state.status.acquire_count(), "object acquired");
        Ok(Object {
            state: Some(state),
            permit,
            pool: self.clone(),
        })
    }

    /// Tries to create an object for every slot emptied by a failed replacement.
    ///
    /// Each empty slot is attempted once. Returns the number of slots that were filled. Does
    /// nothing on a closed pool.
    pub async fn replenish(&self) -> usize {
        let attempts = self.slots.with(|slots| slots.parked.len());

        let mut replenished = 0;
        for _ in 0..attempts {
            let permit = {
                let mut slots = self.slots.lock();
                if slots.closed {
                    break;
                }
                match slots.parked.pop() {
                    Some(permit) => permit,
                    None => break,
                }
            };

            let permit = scopeguard::guard(permit, |permit| self.park(permit));
            match self.manager.create().await {
                Ok(o) => {
                    let permit = scopeguard::ScopeGuard::into_inner(permit);
                    let state = ObjectState {
                        o,
                        status: ObjectStatus::default(),
                    };
                    let mut slots = self.slots.lock();
                    if slots.closed {
                        drop(slots);
                        self.manager.close(state.o);
                        break;
                    }
                    slots.current_size += 1;
                    slots.deque.push_back(state);
                    drop(slots);

                    // the object is queued before its permit becomes available
                    drop(permit);
                    replenished += 1;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to replenish an empty slot");
                    self.manager.on_replacement_failed(&err);
                }
            }
        }

        if replenished > 0 {
            tracing::info!(replenished, "replenished empty slots");
        }
        replenished
    }

    /// Closes the pool.
    ///
    /// Every idle object is closed before this method returns, and every future waiting in
    /// [`Pool::get`] resolves to [`Error::Closed`]. Objects checked out at this point are closed
    /// when they are released. Calling this method again has no effect.
    pub fn close(&self) {
        let (drained, outstanding) = {
            let mut slots = self.slots.lock();
            if slots.closed {
                return;
            }
            slots.closed = true;
            let drained: Vec<_> = slots.deque.drain(..).collect();
            slots.current_size -= drained.len();
            slots.parked.clear();
            (drained, slots.outstanding)
        };

        self.closed.send_replace(true);

        let count = drained.len();
        for state in drained {
            self.manager.close(state.o);
        }
        tracing::info!(closed = count, outstanding, "pool closed");
    }

    /// Returns `true` if [`Pool::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.slots.with(|slots| slots.closed)
    }

    /// Returns the current status of the pool.
    ///
    /// The status returned by the pool is not guaranteed to be consistent.
    ///
    /// While this features provides [eventual consistency], the numbers will be
    /// off when accessing the status of a pool under heavy load. These numbers
    /// are meant for an overall insight.
    ///
    /// [eventual consistency]: (https://en.wikipedia.org/wiki/Eventual_consistency)
    pub fn status(&self) -> PoolStatus {
        let slots = self.slots.lock();
        let (size, idle, outstanding, lost, closed) = (
            slots.current_size,
            slots.deque.len(),
            slots.outstanding,
            slots.parked.len(),
            slots.closed,
        );
        drop(slots);

        let users = self.users.load(Ordering::Relaxed);
        PoolStatus {
            capacity: self.config.capacity,
            size,
            idle,
            outstanding,
            waiting: users.saturating_sub(outstanding),
            lost,
            closed,
        }
    }

    fn park(&self, permit: OwnedSemaphorePermit) {
        self.slots.with(|slots| slots.parked.push(permit));
    }

    /// Puts an object that was never handed out back into the pool.
    fn requeue(&self, state: ObjectState<M::Object>) {
        let mut slots = self.slots.lock();
        if slots.closed {
            slots.current_size -= 1;
            drop(slots);
            self.manager.close(state.o);
        } else {
            slots.deque.push_back(state);
        }
    }

    fn release(&self, state: ObjectState<M::Object>) {
        let mut slots = self.slots.lock();

        assert!(
            slots.outstanding > 0,
            "invariant broken: released an object while none is outstanding",
        );
        slots.outstanding -= 1;

        if slots.closed {
            slots.current_size -= 1;
            drop(slots);
            tracing::debug!("closing object released to a closed pool");
            self.manager.close(state.o);
        } else {
            slots.deque.push_back(state);
            drop(slots);
            tracing::debug!("object released");
        }

        self.users.fetch_sub(1, Ordering::Relaxed);
    }
}

impl<M: ManageObject> Drop for Pool<M> {
    fn drop(&mut self) {
        self.close();
    }
}

/// A wrapper of the actual pooled object.
///
/// This object implements [`Deref`] and [`DerefMut`]. You can use it as if it was of type
/// `M::Object`.
///
/// This object implements [`Drop`] that returns the underlying object to the pool on drop, or
/// closes it if the pool has been closed in the meantime. Because the wrapper is consumed on
/// release, an object can never be released twice or used after release.
pub struct Object<M: ManageObject> {
    state: Option<ObjectState<M::Object>>,
    permit: OwnedSemaphorePermit,
    pool: Arc<Pool<M>>,
}

impl<M> std::fmt::Debug for Object<M>
where
    M: ManageObject,
    M::Object: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("state", &self.state)
            .field("permit", &self.permit)
            .finish()
    }
}

impl<M: ManageObject> Drop for Object<M> {
    fn drop(&mut self) {
        // `permit` is dropped after this body, so the object is queued before the next waiter
        // is admitted.
        if let Some(state) = self.state.take() {
            self.pool.release(state);
        }
    }
}

impl<M: ManageObject> Deref for Object<M> {
    type Target = M::Object;
    fn deref(&self) -> &M::Object {
        // SAFETY: `state` is always `Some` when `Object` is owned.
        &self.state.as_ref().unwrap().o
    }
}

impl<M: ManageObject> DerefMut for Object<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: `state` is always `Some` when `Object` is owned.
        &mut self.state.as_mut().unwrap().o
    }
}

impl<M: ManageObject> AsRef<M::Object> for Object<M> {
    fn as_ref(&self) -> &M::Object {
        self
    }
}

impl<M: ManageObject> AsMut<M::Object> for Object<M> {
    fn as_mut(&mut self) -> &mut M::Object {
        self
    }
}

impl<M: ManageObject> Object<M> {
    /// Returns the object to the [`Pool`].
    ///
    /// Equivalent to dropping it.
    pub fn release(self) {
        drop(self);
    }

    /// Returns the status of the object.
    pub fn status(&self) -> ObjectStatus {
        // SAFETY: `state` is always `Some` when `Object` is owned.
        self.state.as_ref().unwrap().status
    }

    /// Returns the pool this object belongs to.
    pub fn pool(&self) -> &Arc<Pool<M>> {
        &self.pool
    }
}

/// An object taken from the idle queue that has not passed its health check yet.
///
/// Dropping it (e.g. because the `get` future was cancelled) puts the object back at the end of
/// the idle queue before its permit is released.
struct UnreadyObject<M: ManageObject> {
    state: Option<ObjectState<M::Object>>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<Pool<M>>,
}

impl<M: ManageObject> Drop for UnreadyObject<M> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            self.pool.requeue(state);
        }
        drop(self.permit.take());
    }
}

impl<M: ManageObject> UnreadyObject<M> {
    fn into_parts(mut self) -> (ObjectState<M::Object>, OwnedSemaphorePermit) {
        // SAFETY: `state` and `permit` are always `Some` when `UnreadyObject` is owned.
        let state = self.state.take().unwrap();
        let permit = self.permit.take().unwrap();
        (state, permit)
    }

    fn state(&mut self) -> &mut ObjectState<M::Object> {
        // SAFETY: `state` is always `Some` when `UnreadyObject` is owned.
        self.state.as_mut().unwrap()
    }
}

#[derive(Debug)]
struct ObjectState<T> {
    o: T,
    status: ObjectStatus,
}
