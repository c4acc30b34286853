//! NFS entry types
//!
//! An [`Entry`] is one filesystem object surfaced by a directory listing.
//! Entries are plain values: created from a listing response, handed to
//! the caller, and never mutated afterwards.

/// Type of filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Anything else (symlinks, devices, FIFOs, sockets, unknown)
    Other,
}

impl EntryType {
    /// Convert from Unix mode bits as reported by libnfs
    pub fn from_mode(mode: u32) -> Self {
        match mode & 0o170000 {
            0o100000 => EntryType::File,      // S_IFREG
            0o040000 => EntryType::Directory, // S_IFDIR
            _ => EntryType::Other,
        }
    }

    /// Check if this is a regular file
    pub fn is_file(&self) -> bool {
        *self == EntryType::File
    }

    /// Check if this is a directory
    pub fn is_dir(&self) -> bool {
        *self == EntryType::Directory
    }
}

/// A directory entry surfaced by a crawl
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    /// Absolute path within the share root
    pub path: String,

    /// Entry type
    pub kind: EntryType,
}

impl Entry {
    pub fn new(path: impl Into<String>, kind: EntryType) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Build the entry for `name` found while listing `parent`
    pub fn child(parent: &str, name: &str, kind: EntryType) -> Self {
        Self::new(join_path(parent, name), kind)
    }

    /// Check if this entry is a directory
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Final path component
    pub fn name(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) => &self.path[idx + 1..],
            None => &self.path,
        }
    }
}

/// Check if a listing name is "." or ".."
pub fn is_special_name(name: &str) -> bool {
    name == "." || name == ".."
}

/// Join a directory path and an entry name with exactly one separator
pub fn join_path(parent: &str, name: &str) -> String {
    let parent = parent.strip_suffix('/').unwrap_or(parent);
    let mut path = String::with_capacity(parent.len() + name.len() + 1);
    path.push_str(parent);
    path.push('/');
    path.push_str(name);
    path
}
