//! NFS access module
//!
//! The crawler only sees the capability contract in [`transport`]. Two
//! transports implement it:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │         Transport / Session / PendingListing        │
//! │  - open() per connection, close on drop             │
//! │  - list() and list_async() + pollable descriptor    │
//! └─────────────────────────────────────────────────────┘
//!               │                          │
//!               ▼                          ▼
//! ┌──────────────────────────┐  ┌──────────────────────────┐
//! │  NfsTransport (libnfs)   │  │  MemoryTransport         │
//! │  - feature "libnfs"      │  │  - in-memory tree        │
//! │  - nfs_opendir_async     │  │  - socket-pair readiness │
//! └──────────────────────────┘  └──────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use nfs_crawler::nfs::{MemoryShare, MemoryTransport, Session, Transport};
//!
//! let transport = MemoryTransport::new(MemoryShare::new().with_file("/data/a.txt"));
//! let mut session = transport.open().unwrap();
//!
//! for entry in session.list("/data").unwrap() {
//!     println!("{}: {:?}", entry.path, entry.kind);
//! }
//! ```

#[cfg(feature = "libnfs")]
mod connection;
pub mod memory;
pub mod poller;
pub mod transport;
pub mod types;

#[cfg(feature = "libnfs")]
pub use connection::{NfsListing, NfsSession, NfsTransport};
pub use memory::{MemoryListing, MemoryShare, MemorySession, MemoryTransport};
pub use poller::{Interest, Poller, Readiness, SysPoller};
pub use transport::{Events, PendingListing, Session, Transport};
pub use types::{Entry, EntryType};
