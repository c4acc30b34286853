//! In-memory share
//!
//! A [`MemoryTransport`] serves listings from a [`MemoryShare`] tree built
//! in code. Every session owns a real socket pair so the crawler polls a
//! real descriptor: a session with queued requests waits for `WRITABLE`
//! (immediately ready), a stalled session waits for `READABLE` on a socket
//! nobody ever writes to.
//!
//! Failures, stalls and open errors can be injected, and the transport
//! counts opened and closed sessions so resource cleanup can be checked.

use crate::error::{NfsError, NfsResult};
use crate::nfs::transport::{Events, PendingListing, Session, Transport};
use crate::nfs::types::{join_path, Entry, EntryType};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A directory tree served by [`MemoryTransport`]
#[derive(Debug, Clone)]
pub struct MemoryShare {
    /// Directory path -> entries in listing order
    dirs: HashMap<String, Vec<Entry>>,

    /// Every known path and its type
    kinds: HashMap<String, EntryType>,

    /// Injected per-directory listing failures
    failures: HashMap<String, NfsError>,
}

impl Default for MemoryShare {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryShare {
    /// Create a share containing only the root directory
    pub fn new() -> Self {
        let mut share = Self {
            dirs: HashMap::new(),
            kinds: HashMap::new(),
            failures: HashMap::new(),
        };
        share.dirs.insert("/".to_string(), Vec::new());
        share.kinds.insert("/".to_string(), EntryType::Directory);
        share
    }

    /// Build a uniform tree
    ///
    /// Every directory down to `depth` holds `dirs` subdirectories named
    /// `d0..` and `files` files named `f0..`.
    pub fn synthetic(depth: usize, dirs: usize, files: usize) -> Self {
        let mut share = Self::new();
        let mut level = vec!["/".to_string()];

        for _ in 0..depth {
            let mut next = Vec::with_capacity(level.len() * dirs);
            for parent in &level {
                for i in 0..dirs {
                    let path = join_path(parent, &format!("d{}", i));
                    share.insert(&path, EntryType::Directory);
                    next.push(path);
                }
                for i in 0..files {
                    share.insert(&join_path(parent, &format!("f{}", i)), EntryType::File);
                }
            }
            level = next;
        }

        share
    }

    /// Add a directory (and any missing parents)
    pub fn with_dir(mut self, path: &str) -> Self {
        self.insert(path, EntryType::Directory);
        self
    }

    /// Add a regular file (and any missing parents)
    pub fn with_file(mut self, path: &str) -> Self {
        self.insert(path, EntryType::File);
        self
    }

    /// Add a non-file, non-directory entry (and any missing parents)
    pub fn with_other(mut self, path: &str) -> Self {
        self.insert(path, EntryType::Other);
        self
    }

    /// Make listing `path` fail with `error`
    pub fn fail(mut self, path: &str, error: NfsError) -> Self {
        self.failures.insert(path.to_string(), error);
        self
    }

    fn insert(&mut self, path: &str, kind: EntryType) {
        let path = path.trim_end_matches('/');
        if path.is_empty() || self.kinds.contains_key(path) {
            return;
        }

        let parent = match path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(idx) => path[..idx].to_string(),
        };

        if !self.dirs.contains_key(&parent) {
            self.insert(&parent, EntryType::Directory);
        }

        self.kinds.insert(path.to_string(), kind);
        if let Some(listing) = self.dirs.get_mut(&parent) {
            listing.push(Entry::new(path, kind));
        }
        if kind.is_dir() {
            self.dirs.insert(path.to_string(), Vec::new());
        }
    }

    /// List a directory the way a server would
    pub fn list(&self, path: &str) -> NfsResult<Vec<Entry>> {
        if let Some(error) = self.failures.get(path) {
            return Err(error.clone());
        }

        match self.dirs.get(path) {
            Some(entries) => Ok(entries.clone()),
            None if self.kinds.contains_key(path) => Err(NfsError::NotADirectory {
                path: path.to_string(),
            }),
            None => Err(NfsError::NotFound {
                path: path.to_string(),
            }),
        }
    }

    /// Every entry below the root, in no particular order
    pub fn entries(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.dirs.values().flatten()
    }

    /// Every entry at or below `path`, excluding `path` itself
    pub fn entries_under<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Entry> + 'a {
        let prefix = join_path(path, "");
        self.entries()
            .filter(move |entry| entry.path.starts_with(&prefix))
    }
}

/// Session accounting shared by a transport and its sessions
#[derive(Debug, Default)]
pub struct SessionCounters {
    /// Sessions successfully opened
    pub opened: AtomicUsize,

    /// Sessions dropped
    pub closed: AtomicUsize,

    /// Open attempts, successful or not
    pub attempts: AtomicUsize,

    /// Listing requests issued (sync and async)
    pub requests: AtomicUsize,
}

/// Transport serving a [`MemoryShare`]
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    share: Arc<MemoryShare>,
    counters: Arc<SessionCounters>,

    /// Session index -> requests completed before it stalls
    stalls: HashMap<usize, usize>,

    /// Every session stalls immediately
    stall_all: bool,

    /// Open attempts beyond this count fail
    fail_open_after: Option<usize>,
}

impl MemoryTransport {
    pub fn new(share: MemoryShare) -> Self {
        Self {
            share: Arc::new(share),
            counters: Arc::new(SessionCounters::default()),
            stalls: HashMap::new(),
            stall_all: false,
            fail_open_after: None,
        }
    }

    /// Never complete any asynchronous request
    pub fn stall_all(mut self) -> Self {
        self.stall_all = true;
        self
    }

    /// Let session `index` complete `after` requests, then stall
    pub fn stall_session(mut self, index: usize, after: usize) -> Self {
        self.stalls.insert(index, after);
        self
    }

    /// Fail every open attempt after the first `n`
    pub fn fail_open_after(mut self, n: usize) -> Self {
        self.fail_open_after = Some(n);
        self
    }

    /// The share being served
    pub fn share(&self) -> &MemoryShare {
        &self.share
    }

    /// Sessions opened so far
    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Sessions closed so far
    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    /// Sessions currently open
    pub fn open_sessions(&self) -> usize {
        self.opened() - self.closed()
    }

    /// Listing requests issued so far
    pub fn requests(&self) -> usize {
        self.counters.requests.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryTransport {
    type Session = MemorySession;

    fn open(&self) -> NfsResult<MemorySession> {
        let attempt = self.counters.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_open_after.is_some_and(|n| attempt >= n) {
            return Err(NfsError::ConnectionFailed {
                server: self.endpoint(),
                reason: format!("open attempt {} refused", attempt),
            });
        }

        let (socket, peer) = UnixStream::pair().map_err(|e| NfsError::ConnectionFailed {
            server: self.endpoint(),
            reason: e.to_string(),
        })?;

        let index = self.counters.opened.fetch_add(1, Ordering::SeqCst);
        let stall_after = if self.stall_all {
            Some(0)
        } else {
            self.stalls.get(&index).copied()
        };

        Ok(MemorySession {
            share: Arc::clone(&self.share),
            counters: Arc::clone(&self.counters),
            queued: VecDeque::new(),
            served: 0,
            stall_after,
            socket,
            _peer: peer,
        })
    }

    fn endpoint(&self) -> String {
        "memory://share".to_string()
    }
}

type ListingSlot = Arc<Mutex<Option<NfsResult<Vec<Entry>>>>>;

/// Session on a [`MemoryTransport`]
pub struct MemorySession {
    share: Arc<MemoryShare>,
    counters: Arc<SessionCounters>,
    queued: VecDeque<(String, ListingSlot)>,
    served: usize,
    stall_after: Option<usize>,
    socket: UnixStream,
    _peer: UnixStream,
}

impl MemorySession {
    fn is_stalled(&self) -> bool {
        self.stall_after.is_some_and(|n| self.served >= n)
    }
}

impl Session for MemorySession {
    type Listing = MemoryListing;

    fn list(&mut self, path: &str) -> NfsResult<Vec<Entry>> {
        self.counters.requests.fetch_add(1, Ordering::SeqCst);
        self.share.list(path)
    }

    fn list_async(&mut self, path: &str) -> NfsResult<MemoryListing> {
        self.counters.requests.fetch_add(1, Ordering::SeqCst);
        let slot: ListingSlot = Arc::new(Mutex::new(None));
        self.queued.push_back((path.to_string(), Arc::clone(&slot)));

        Ok(MemoryListing {
            path: path.to_string(),
            slot,
        })
    }

    fn descriptor(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    fn desired_events(&self) -> Events {
        if !self.queued.is_empty() && !self.is_stalled() {
            Events::WRITABLE
        } else {
            Events::READABLE
        }
    }

    fn service(&mut self, revents: Events) -> NfsResult<()> {
        if !revents.contains(Events::WRITABLE) {
            return Ok(());
        }

        while !self.is_stalled() {
            let Some((path, slot)) = self.queued.pop_front() else {
                break;
            };
            *slot.lock() = Some(self.share.list(&path));
            self.served += 1;
        }

        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Pending listing on a [`MemorySession`]
pub struct MemoryListing {
    path: String,
    slot: ListingSlot,
}

impl PendingListing for MemoryListing {
    fn path(&self) -> &str {
        &self.path
    }

    fn is_ready(&self) -> NfsResult<bool> {
        match &*self.slot.lock() {
            None => Ok(false),
            Some(Ok(_)) => Ok(true),
            Some(Err(e)) => Err(e.clone()),
        }
    }

    fn drain(self) -> Vec<Entry> {
        match self.slot.lock().take() {
            Some(Ok(entries)) => entries,
            _ => Vec::new(),
        }
    }
}
