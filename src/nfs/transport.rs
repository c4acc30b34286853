//! Transport capability contract
//!
//! The crawler never talks to a wire protocol directly. It drives any
//! transport that can open sessions, issue (a)synchronous directory
//! listings, and expose a pollable descriptor whose readiness pumps the
//! protocol state machine.
//!
//! ```text
//!   Transport ──open()──▶ Session ──list_async()──▶ PendingListing
//!                            │                            │
//!          descriptor() + desired_events()           is_ready()
//!                            │                            │
//!                     Poller::poll()                   drain()
//!                            │
//!                   service(revents)
//! ```
//!
//! Sessions are closed by dropping them.

use crate::error::NfsResult;
use crate::nfs::types::Entry;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::os::unix::io::RawFd;

/// Poll event mask (same bit layout as `poll(2)`)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Events(i16);

impl Events {
    /// No events
    pub const NONE: Events = Events(0);
    /// Data can be read (`POLLIN`)
    pub const READABLE: Events = Events(libc::POLLIN);
    /// Data can be written (`POLLOUT`)
    pub const WRITABLE: Events = Events(libc::POLLOUT);
    /// Error condition (`POLLERR`)
    pub const ERROR: Events = Events(libc::POLLERR);
    /// Peer hung up (`POLLHUP`)
    pub const HANGUP: Events = Events(libc::POLLHUP);
    /// Descriptor is not open (`POLLNVAL`)
    pub const INVALID: Events = Events(libc::POLLNVAL);

    /// Build from raw poll bits
    pub const fn from_bits(bits: i16) -> Self {
        Events(bits)
    }

    /// Raw poll bits
    pub const fn bits(self) -> i16 {
        self.0
    }

    /// Check if every bit of `other` is set
    pub const fn contains(self, other: Events) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check if any bit of `other` is set
    pub const fn intersects(self, other: Events) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Events {
    type Output = Events;

    fn bitor(self, rhs: Events) -> Events {
        Events(self.0 | rhs.0)
    }
}

impl BitOrAssign for Events {
    fn bitor_assign(&mut self, rhs: Events) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Events, &str); 5] = [
            (Events::READABLE, "READABLE"),
            (Events::WRITABLE, "WRITABLE"),
            (Events::ERROR, "ERROR"),
            (Events::HANGUP, "HANGUP"),
            (Events::INVALID, "INVALID"),
        ];

        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(ev, _)| self.contains(*ev))
            .map(|(_, name)| *name)
            .collect();

        if names.is_empty() {
            write!(f, "Events({:#x})", self.0)
        } else {
            write!(f, "Events({})", names.join(" | "))
        }
    }
}

/// Opens sessions against one remote share
///
/// Implementations are shared by reference between the driver and
/// nothing else; each opened session is owned by exactly one thread.
pub trait Transport {
    /// Session type produced by this transport
    type Session: Session;

    /// Open and mount a new session
    fn open(&self) -> NfsResult<Self::Session>;

    /// Human readable endpoint for logging
    fn endpoint(&self) -> String;
}

/// One connection to a remote share
///
/// Sessions move between threads but are never shared. Dropping a
/// session unmounts and closes it.
pub trait Session: Send {
    /// Asynchronous listing handle produced by [`Session::list_async`]
    type Listing: PendingListing;

    /// List a directory synchronously
    fn list(&mut self, path: &str) -> NfsResult<Vec<Entry>>;

    /// Issue a non-blocking listing request
    fn list_async(&mut self, path: &str) -> NfsResult<Self::Listing>;

    /// Descriptor to register with the readiness poller
    fn descriptor(&self) -> RawFd;

    /// Events the session currently waits for
    fn desired_events(&self) -> Events;

    /// Pump the protocol state machine for the returned events
    ///
    /// Must be called before checking [`PendingListing::is_ready`].
    fn service(&mut self, revents: Events) -> NfsResult<()>;
}

/// An in-flight asynchronous directory listing
///
/// A listing must not outlive the session that issued it. Dropping a
/// listing releases its directory handle.
pub trait PendingListing {
    /// Directory being listed
    fn path(&self) -> &str;

    /// Non-blocking completion check
    ///
    /// Fails with the transport error if the request failed.
    fn is_ready(&self) -> NfsResult<bool>;

    /// Consume a ready listing
    fn drain(self) -> Vec<Entry>;
}
