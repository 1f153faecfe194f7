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

use std::future::Future;
use std::time::Instant;

/// Statistics regarding an object managed by the pool.
#[derive(Debug, Clone, Copy)]
pub struct ObjectStatus {
    created: Instant,
    pub(crate) last_acquired: Option<Instant>,
    pub(crate) acquire_count: usize,
}

impl Default for ObjectStatus {
    fn default() -> Self {
        Self {
            created: Instant::now(),
            last_acquired: None,
            acquire_count: 0,
        }
    }
}

impl ObjectStatus {
    /// Returns the instant when this object was created.
    pub fn created(&self) -> Instant {
        self.created
    }

    /// Returns the instant when this object was last handed out, or its creation instant if it
    /// has never been handed out.
    pub fn last_used(&self) -> Instant {
        self.last_acquired.unwrap_or(self.created)
    }

    /// Returns the number of times the object was handed out by the pool.
    pub fn acquire_count(&self) -> usize {
        self.acquire_count
    }

    pub(crate) fn mark_acquired(&mut self) {
        self.acquire_count += 1;
        self.last_acquired = Some(Instant::now());
    }
}

/// A trait whose instance creates, checks and closes the objects of a pool.
///
/// The pool owns every object it creates. An object is closed exactly once: either when the pool
/// evicts it after a failed health check, or when the pool shuts down.
pub trait ManageObject: Send + Sync {
    /// The type of objects that this instance creates.
    type Object: Send;

    /// The type of errors that [`ManageObject::create`] can return.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Creates a new object.
    fn create(&self) -> impl Future<Output = Result<Self::Object, Self::Error>> + Send;

    /// Whether the idle object `o` is still usable.
    ///
    /// Called on every dequeue unless health checks are disabled in the pool config. An unhealthy
    /// object is closed and replaced with a freshly created one.
    fn is_healthy(
        &self,
        _o: &mut Self::Object,
        _status: &ObjectStatus,
    ) -> impl Future<Output = bool> + Send {
        std::future::ready(true)
    }

    /// Closes the object. The object is never handed out again.
    ///
    /// This may be called from a [`Drop`] implementation and therefore must not block for long.
    fn close(&self, o: Self::Object) {
        drop(o);
    }

    /// A callback invoked when the pool failed to replace an unhealthy object.
    ///
    /// The slot stays empty until [`Pool::replenish`](crate::Pool::replenish) succeeds in
    /// creating a new object for it.
    fn on_replacement_failed(&self, _err: &Self::Error) {}
}
