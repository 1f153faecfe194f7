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

use std::fmt;
use std::sync::MutexGuard;
use std::sync::PoisonError;

/// The single exclusion point guarding a pool's shared state.
///
/// A panic while the lock is held (e.g. a broken invariant assertion) must not turn every later
/// release or close into a second panic, so poisoning is ignored.
pub(crate) struct Mutex<T: ?Sized>(std::sync::Mutex<T>);

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<T> Mutex<T> {
    pub(crate) const fn new(t: T) -> Self {
        Self(std::sync::Mutex::new(t))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with the lock held and releases it before returning.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.lock())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_lock_survives_poison() {
        let mutex = Arc::new(Mutex::new(VecDeque::from([1, 2])));
        let m = mutex.clone();
        let handle = std::thread::spawn(move || {
            let mut guard = m.lock();
            guard.push_back(3);
            panic!("invariant broken");
        });
        assert!(handle.join().is_err());
        assert_eq!(mutex.with(|deque| deque.pop_front()), Some(1));
        assert_eq!(mutex.lock().len(), 2);
    }
}
