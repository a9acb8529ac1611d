//! # class-cache
//!
//! An in-memory resolution layer that maps class/resource identifiers such as
//! `com/acme/Foo.class` to byte blobs drawn from several backing stores.
//!
//! ## Architecture
//!
//! - **key**: Resource identifier normalization and decomposition
//! - **retention**: FIFO queue pinning recently touched reclaimable blobs
//! - **cache**: Concurrent blob cache with strong and reclaimable retention
//! - **resolver**: Fallback source capability used by the loader
//! - **archive**: Jar resolution, eager indexing or lazy per-lookup scans
//! - **scan**: Recursive directory collection of archive candidates
//! - **db**: SQLite-backed resolver over a pooled connection
//! - **compile**: Source compiler boundary (`javac`)
//! - **loader**: Cache facade composing the cache with ordered resolvers
//! - **config**: Loader, database and pool configuration
//! - **cli**: Command line model for the `class-cache` binary

pub mod archive;
pub mod cache;
pub mod cli;
pub mod compile;
pub mod config;
pub mod db;
pub mod error;
pub mod key;
pub mod loader;
pub mod resolver;
pub mod retention;
pub mod scan;

pub use cache::{Blob, BlobCache, RetentionClass};
pub use error::{LoaderError, Result};
pub use key::ResourceKey;
pub use loader::ResourceLoader;
pub use resolver::Resolver;
