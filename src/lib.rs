//! nfs-crawler - Recursive NFS Directory Crawler
//!
//! Lists every file and directory below a starting directory on an NFS
//! share, talking to the server directly through libnfs. Results come
//! back as a lazy stream of [`Entry`] values in a pull-based iterator.
//!
//! # Strategies
//!
//! - **Sequential**: one connection, one blocking listing at a time,
//!   depth-first pre-order output.
//!
//! - **Pipelined**: one connection with several listings in flight,
//!   driven by polling the connection's descriptor.
//!
//! - **Pooled**: N worker threads, each owning a connection. Directories
//!   are handed out round-robin and results merged on the caller's thread.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        NFS Server                                │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ READDIR
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Transport / Session (nfs module)                 │
//! │       libnfs sessions, or an in-memory share for tests           │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Crawler (crawler module)                     │
//! │  ┌────────────┐   ┌──────────────────┐   ┌──────────────────┐   │
//! │  │ Sequential │   │ RequestPipeline  │   │  PooledCrawler   │   │
//! │  │            │   │ poll + service   │   │  worker threads  │   │
//! │  └────────────┘   └──────────────────┘   └──────────────────┘   │
//! │                 dedup, error isolation, stats                    │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               ▼
//!                    ┌──────────────────┐
//!                    │   EntryStream    │
//!                    │  (Iterator)      │
//!                    └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # List a share
//! nfs-find nfs://server/export
//!
//! # Local mount point resolved through /etc/fstab, 8 connections
//! nfs-find /mnt/data/projects -c 8 --stats
//! ```

pub mod config;
pub mod crawler;
pub mod error;
pub mod fstab;
pub mod nfs;
pub mod progress;

pub use config::{CliArgs, CrawlConfig, NfsUrl};
pub use crawler::{crawl, CrawlOptions, EntryStream, Strategy};
pub use error::{CrawlError, CrawlResult};
pub use nfs::{Entry, EntryType};

#[cfg(feature = "libnfs")]
pub use crawler::crawl_url;
