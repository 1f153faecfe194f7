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

use std::time::Duration;

/// Errors returned by a [`Pool`](crate::Pool).
///
/// `E` is the error type of the pool's [`ManageObject`](crate::ManageObject).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error<E> {
    /// The pool was configured with a capacity of zero.
    #[error("pool capacity must be positive")]
    InvalidCapacity,

    /// Creating one of the initial objects failed. Objects created before the failure have
    /// already been closed.
    #[error("failed to create object {index} of {capacity} while initializing the pool")]
    Init {
        /// Zero-based index of the object whose creation failed.
        index: usize,
        /// The configured capacity.
        capacity: usize,
        /// The error returned by the manager.
        #[source]
        source: E,
    },

    /// The pool is closed, or was closed while waiting for an object.
    #[error("pool is closed")]
    Closed,

    /// No object became available before the deadline.
    #[error("timed out after {0:?} waiting for an object")]
    Timeout(Duration),
}

impl<E> Error<E> {
    /// Returns `true` if this error reports a closed pool.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }

    /// Returns `true` if this error reports an acquire timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}
