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

//! A fixed-capacity resource pool for Rust.
//!
//! The pool creates every object eagerly, hands them out to concurrent callers one holder at a
//! time, queues callers fairly when all objects are checked out, and closes every object exactly
//! once on shutdown. It is meant for expensive-to-create resources such as database
//! connections.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use fixedpool::ManageObject;
//! use fixedpool::ObjectStatus;
//!
//! #[derive(Debug)]
//! struct ConnectError;
//! impl std::fmt::Display for ConnectError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         f.write_str("connect error")
//!     }
//! }
//! impl std::error::Error for ConnectError {}
//!
//! struct Connection;
//! impl Connection {
//!     async fn ping(&self) -> bool {
//!         true
//!     }
//! }
//!
//! struct Manager;
//! impl ManageObject for Manager {
//!     type Object = Connection;
//!     type Error = ConnectError;
//!
//!     async fn create(&self) -> Result<Self::Object, Self::Error> {
//!         Ok(Connection)
//!     }
//!
//!     async fn is_healthy(&self, o: &mut Self::Object, _status: &ObjectStatus) -> bool {
//!         o.ping().await
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = fixedpool::PoolConfig::new(16).with_acquire_timeout(Duration::from_secs(5));
//! let pool = fixedpool::Pool::new(config, Manager).await.unwrap();
//! let conn = pool.get().await.unwrap();
//! assert!(conn.ping().await);
//! conn.release();
//! pool.close();
//! # }
//! ```

mod error;
mod manage;
mod mutex;
mod pool;

pub use error::Error;
pub use manage::ManageObject;
pub use manage::ObjectStatus;
pub use pool::Object;
pub use pool::Pool;
pub use pool::PoolConfig;
pub use pool::PoolStatus;
