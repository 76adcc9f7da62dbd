//! zipserve core - bundle requested files into a zip archive over HTTP.
//!
//! A request target such as `/a.txt&b.txt` names files under a serving root.
//! The files that exist are read in parallel, zipped, cached for a short time
//! under a key built from the sorted path set, and sent back as
//! `archive.zip`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zipserve_core::{config::Config, pool::WorkerPool, server};
//!
//! #[tokio::main]
//! async fn main() -> zipserve_core::Result<()> {
//!     let config = Config::load(None)?;
//!     let pool = Arc::new(WorkerPool::current()?);
//!     server::run(&config, pool, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```

pub mod archive;
pub mod cache;
pub mod config;
pub mod error;
pub mod handler;
pub mod pool;
pub mod resolver;
pub mod server;

pub use archive::{ArchiveBuilder, ArchiveError, ContentSource, FsSource};
pub use cache::{ArchiveCache, CacheKey, CacheStats};
pub use config::{ArchiveConfig, Config, ConfigError, PoolConfig, ServerConfig};
pub use error::{Result, ZipServeError};
pub use handler::{Outcome, RequestHandler, RequestTarget};
pub use pool::{InlinePool, TaskPool, WorkerPool};
pub use resolver::{FileResolver, Resolution, ResolvedPath};
pub use server::{ArchiveServer, ShutdownHandle};
