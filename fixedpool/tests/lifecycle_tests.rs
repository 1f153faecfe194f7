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

use std::io;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use fixedpool::Error;
use fixedpool::ManageObject;
use fixedpool::Pool;
use fixedpool::PoolConfig;

#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    closed: AtomicUsize,
}

struct CountingManager {
    counters: Arc<Counters>,
    /// Zero-based call index of `create` that fails.
    fail_on: Option<usize>,
    /// Zero-based call index of `create` from which calls hang for a while.
    slow_from: Option<usize>,
    calls: AtomicUsize,
}

impl CountingManager {
    fn new(counters: Arc<Counters>) -> Self {
        Self {
            counters,
            fail_on: None,
            slow_from: None,
            calls: AtomicUsize::new(0),
        }
    }
}

impl ManageObject for CountingManager {
    type Object = usize;
    type Error = io::Error;

    async fn create(&self) -> Result<Self::Object, Self::Error> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(call) {
            return Err(io::Error::other("connection refused"));
        }
        if self.slow_from.is_some_and(|from| call >= from) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Ok(self.counters.created.fetch_add(1, Ordering::SeqCst))
    }

    fn close(&self, _o: Self::Object) {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_new_creates_all_objects_eagerly() {
    let counters = Arc::new(Counters::default());
    let pool = Pool::new(PoolConfig::new(3), CountingManager::new(counters.clone()))
        .await
        .unwrap();

    assert_eq!(counters.created.load(Ordering::SeqCst), 3);
    let status = pool.status();
    assert_eq!(status.capacity, 3);
    assert_eq!(status.size, 3);
    assert_eq!(status.idle, 3);
    assert_eq!(status.outstanding, 0);
    assert_eq!(status.lost, 0);
    assert!(!status.closed);

    let o = pool.get().await.unwrap();
    assert_eq!(*o, 0, "objects are handed out in creation order");
    assert_eq!(
        counters.created.load(Ordering::SeqCst),
        3,
        "get must never create objects on a healthy pool"
    );
}

#[tokio::test]
async fn test_zero_capacity_is_rejected() {
    let counters = Arc::new(Counters::default());
    let result = Pool::new(PoolConfig::new(0), CountingManager::new(counters.clone())).await;

    assert!(matches!(result, Err(Error::InvalidCapacity)));
    assert_eq!(counters.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_init_failure_closes_created_objects() {
    let counters = Arc::new(Counters::default());
    let mut manager = CountingManager::new(counters.clone());
    manager.fail_on = Some(1);

    let err = Pool::new(PoolConfig::new(3), manager).await.unwrap_err();
    match err {
        Error::Init {
            index,
            capacity,
            source,
        } => {
            assert_eq!(index, 1);
            assert_eq!(capacity, 3);
            assert_eq!(source.to_string(), "connection refused");
        }
        err => panic!("expected Error::Init, got {err:?}"),
    }

    assert_eq!(counters.created.load(Ordering::SeqCst), 1);
    assert_eq!(
        counters.closed.load(Ordering::SeqCst),
        1,
        "the object created before the failure must be closed"
    );
}

#[tokio::test]
async fn test_init_error_reports_source() {
    let counters = Arc::new(Counters::default());
    let mut manager = CountingManager::new(counters);
    manager.fail_on = Some(0);

    let err = Pool::new(PoolConfig::new(2), manager).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to create object 0 of 2 while initializing the pool"
    );
    let source = std::error::Error::source(&err).map(|source| source.to_string());
    assert_eq!(source.as_deref(), Some("connection refused"));
}

#[tokio::test]
async fn test_cancelled_new_closes_created_objects() {
    let counters = Arc::new(Counters::default());
    let mut manager = CountingManager::new(counters.clone());
    manager.slow_from = Some(1);

    let result = tokio::time::timeout(
        Duration::from_millis(50),
        Pool::new(PoolConfig::new(3), manager),
    )
    .await;
    assert!(result.is_err(), "Should have timed out");

    assert_eq!(counters.created.load(Ordering::SeqCst), 1);
    assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_close_closes_idle_objects_once() {
    let counters = Arc::new(Counters::default());
    let pool = Pool::new(PoolConfig::new(3), CountingManager::new(counters.clone()))
        .await
        .unwrap();

    pool.close();
    assert_eq!(counters.closed.load(Ordering::SeqCst), 3);
    assert!(pool.is_closed());

    pool.close();
    assert_eq!(
        counters.closed.load(Ordering::SeqCst),
        3,
        "a second close must not close any object again"
    );

    drop(pool);
    assert_eq!(
        counters.closed.load(Ordering::SeqCst),
        3,
        "dropping a closed pool must not close any object again"
    );
}

#[tokio::test]
async fn test_get_on_closed_pool_fails_immediately() {
    let counters = Arc::new(Counters::default());
    let pool = Pool::new(PoolConfig::new(2), CountingManager::new(counters))
        .await
        .unwrap();
    pool.close();

    for _ in 0..3 {
        let result = tokio::time::timeout(Duration::from_millis(100), pool.get())
            .await
            .expect("get on a closed pool must not wait");
        assert!(result.unwrap_err().is_closed());
    }

    let result = pool.get_timeout(Duration::from_secs(1)).await;
    assert!(result.unwrap_err().is_closed());
}

#[tokio::test]
async fn test_outstanding_objects_close_on_release() {
    let counters = Arc::new(Counters::default());
    let pool = Pool::new(PoolConfig::new(2), CountingManager::new(counters.clone()))
        .await
        .unwrap();

    let o = pool.get().await.unwrap();
    pool.close();
    assert_eq!(counters.closed.load(Ordering::SeqCst), 1);

    let status = pool.status();
    assert!(status.closed);
    assert_eq!(status.idle, 0);
    assert_eq!(status.outstanding, 1);
    assert_eq!(status.size, 1);

    o.release();
    assert_eq!(counters.closed.load(Ordering::SeqCst), 2);

    let status = pool.status();
    assert_eq!(status.idle, 0, "a closed pool must not take objects back");
    assert_eq!(status.outstanding, 0);
    assert_eq!(status.size, 0);

    pool.close();
    assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_dropping_pool_closes_objects() {
    let counters = Arc::new(Counters::default());
    let pool = Pool::new(PoolConfig::new(2), CountingManager::new(counters.clone()))
        .await
        .unwrap();

    let o = pool.get().await.unwrap();
    drop(pool);
    assert_eq!(
        counters.closed.load(Ordering::SeqCst),
        0,
        "an outstanding object keeps the pool alive"
    );

    drop(o);
    assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
}
