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

//! Online/offline presence service sketch: every request writes a heartbeat row through one of a
//! fixed number of pooled database connections.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use clap::Parser;
use fixedpool::Object;
use fixedpool::ObjectStatus;
use fixedpool::Pool;
use fixedpool::PoolConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "heartbeat", about = "Simulated heartbeat writes over a fixed connection pool")]
struct Args {
    /// Number of pooled connections
    #[arg(long, default_value_t = 10)]
    pool_size: usize,

    /// Number of concurrent heartbeat requests
    #[arg(long, default_value_t = 15)]
    requests: usize,

    /// Simulated duration of one heartbeat write, in milliseconds
    #[arg(long, default_value_t = 100)]
    work_ms: u64,

    /// Give up on a request after waiting this long for a connection, in milliseconds
    #[arg(long)]
    acquire_timeout_ms: Option<u64>,

    /// Break every n-th connection after use so the pool has to replace it (0 disables)
    #[arg(long, default_value_t = 4)]
    break_every: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("failed to connect to {dsn}")]
    Connect { dsn: String },

    #[error("connection {0} is broken")]
    Broken(usize),
}

/// A stand-in for a database connection.
#[derive(Debug)]
pub struct Connection {
    id: usize,
    writes: usize,
    broken: bool,
}

impl Connection {
    async fn execute_heartbeat(&mut self, user_id: &str, last_seen: u64) -> Result<(), DbError> {
        if self.broken {
            return Err(DbError::Broken(self.id));
        }
        tracing::debug!(conn = self.id, user_id, last_seen, "UPDATE user_status SET last_seen");
        self.writes += 1;
        Ok(())
    }

    async fn ping(&self) -> bool {
        !self.broken
    }
}

#[derive(Debug)]
pub struct ManageConnection {
    dsn: String,
    next_id: AtomicUsize,
}

impl fixedpool::ManageObject for ManageConnection {
    type Object = Connection;
    type Error = DbError;

    async fn create(&self) -> Result<Self::Object, Self::Error> {
        if self.dsn.is_empty() {
            return Err(DbError::Connect {
                dsn: self.dsn.clone(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!(conn = id, dsn = %self.dsn, "connection opened");
        Ok(Connection {
            id,
            writes: 0,
            broken: false,
        })
    }

    async fn is_healthy(&self, conn: &mut Self::Object, _: &ObjectStatus) -> bool {
        conn.ping().await
    }

    fn close(&self, conn: Self::Object) {
        tracing::info!(conn = conn.id, writes = conn.writes, "connection closed");
    }

    fn on_replacement_failed(&self, err: &Self::Error) {
        tracing::warn!(error = %err, "running with one connection less");
    }
}

#[derive(Debug, Clone)]
pub struct HeartbeatStore {
    pool: Arc<Pool<ManageConnection>>,
}

impl HeartbeatStore {
    pub async fn connect(dsn: &str, config: PoolConfig) -> anyhow::Result<Self> {
        let manager = ManageConnection {
            dsn: dsn.to_string(),
            next_id: AtomicUsize::new(0),
        };
        let pool = Pool::new(config, manager).await?;

        let weak_pool = Arc::downgrade(&pool);
        tokio::spawn(async move {
            const REPLENISH_INTERVAL: Duration = Duration::from_secs(1);

            loop {
                tokio::time::sleep(REPLENISH_INTERVAL).await;
                match weak_pool.upgrade() {
                    Some(pool) if !pool.is_closed() => {
                        let n = pool.replenish().await;
                        if n > 0 {
                            tracing::info!(replenished = n, "refilled empty connection slots");
                        }
                    }
                    _ => break,
                }
            }
        });

        Ok(Self { pool })
    }

    pub async fn acquire(&self) -> Result<Object<ManageConnection>, fixedpool::Error<DbError>> {
        self.pool.get().await
    }

    pub async fn record(&self, user_id: &str) -> anyhow::Result<()> {
        let mut conn = self.acquire().await?;
        let last_seen = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        conn.execute_heartbeat(user_id, last_seen).await?;
        Ok(())
    }

    pub fn close(&self) {
        self.pool.close();
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    let mut config = PoolConfig::new(args.pool_size);
    if let Some(ms) = args.acquire_timeout_ms {
        config = config.with_acquire_timeout(Duration::from_millis(ms));
    }
    const DSN: &str = "user:password@tcp(localhost:3306)/online_status_db";
    let store = HeartbeatStore::connect(DSN, config).await?;

    let work = Duration::from_millis(args.work_ms);
    let handles: Vec<_> = (0..args.requests)
        .map(|request_id| {
            let store = store.clone();
            let break_every = args.break_every;
            tokio::spawn(async move {
                let user_id = format!("user_{request_id}");
                let mut conn = store.acquire().await?;
                let last_seen = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
                conn.execute_heartbeat(&user_id, last_seen).await?;

                tokio::time::sleep(work).await;
                if break_every > 0 && (request_id + 1) % break_every == 0 {
                    conn.broken = true;
                }
                conn.release();
                tracing::info!(request_id, "request completed");
                anyhow::Ok(())
            })
        })
        .collect();

    let mut failed = 0;
    for handle in handles {
        if let Err(err) = handle.await? {
            tracing::warn!(error = %err, "request failed");
            failed += 1;
        }
    }

    store.record("user_final").await?;

    let status = store.pool.status();
    tracing::info!(
        requests = args.requests,
        failed,
        size = status.size,
        lost = status.lost,
        "all requests completed"
    );

    store.close();
    Ok(())
}
