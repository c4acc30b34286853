//! Error types for nfs-crawler
//!
//! This module defines the error hierarchy for a crawl:
//! - NFS transport errors (connection setup and per-directory listing)
//! - Fatal crawl conditions (stalled connections, malformed readiness)
//! - Configuration, fstab and worker thread errors
//!
//! Per-directory listing errors are recovered by the crawler and never
//! reach the caller; everything else ends the entry stream.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for a crawl
#[derive(Error, Debug)]
pub enum CrawlError {
    /// NFS-related errors (session setup or servicing)
    #[error("NFS error: {0}")]
    Nfs(#[from] NfsError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// fstab resolution errors
    #[error("fstab error: {0}")]
    Fstab(#[from] FstabError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// The connection produced no readiness events within the poll timeout
    #[error("Connection stalled: no readiness within {timeout:?} with {in_flight} request(s) in flight")]
    Stalled { timeout: Duration, in_flight: usize },

    /// Servicing the connection failed at the connection level
    #[error("Connection failed while servicing requests: {source}")]
    Connection { source: NfsError },

    /// The readiness poll returned something that cannot be mapped back
    #[error("Malformed readiness from poll: {reason}")]
    MalformedReadiness { reason: String },

    /// Every pool connection retired while work was still outstanding
    #[error("All {connections} connections stalled with {outstanding} directories outstanding")]
    AllConnectionsStalled {
        connections: usize,
        outstanding: usize,
    },
}

impl CrawlError {
    /// Check if this error only concerns the connection that raised it
    ///
    /// A worker pool retires the affected connection and keeps crawling
    /// on the others; every other error aborts the traversal.
    pub fn is_connection_local(&self) -> bool {
        matches!(
            self,
            CrawlError::Stalled { .. } | CrawlError::Connection { .. }
        )
    }

    /// The per-directory error reported for a path that was in flight
    /// when this connection-level error occurred
    pub fn for_in_flight_path(&self, path: &str) -> NfsError {
        match self {
            CrawlError::Stalled { timeout, .. } => NfsError::Timeout {
                path: path.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            },
            CrawlError::Connection { source } => source.clone(),
            other => NfsError::ReadDirFailed {
                path: path.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// NFS connection and protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NfsError {
    /// Failed to parse NFS URL
    #[error("Invalid NFS URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Failed to initialize NFS context
    #[error("Failed to initialize NFS context: {0}")]
    InitFailed(String),

    /// Connection failed
    #[error("Failed to connect to NFS server '{server}': {reason}")]
    ConnectionFailed { server: String, reason: String },

    /// Mount failed
    #[error("Failed to mount export '{export}' on '{server}': {reason}")]
    MountFailed {
        server: String,
        export: String,
        reason: String,
    },

    /// Directory operation failed
    #[error("Failed to read directory '{path}': {reason}")]
    ReadDirFailed { path: String, reason: String },

    /// Permission denied
    #[error("Permission denied: '{path}'")]
    PermissionDenied { path: String },

    /// Path not found
    #[error("Path not found: '{path}'")]
    NotFound { path: String },

    /// Path is not a directory
    #[error("Not a directory: '{path}'")]
    NotADirectory { path: String },

    /// Stale file handle (server-side change detected)
    #[error("Stale file handle for '{path}' - filesystem changed during crawl")]
    StaleHandle { path: String },

    /// Request timed out
    #[error("Timed out after {timeout_ms}ms while listing '{path}'")]
    Timeout { path: String, timeout_ms: u64 },

    /// Generic NFS error with error code
    #[error("NFS error {code}: {message}")]
    Protocol { code: i32, message: String },
}

impl NfsError {
    /// Translate a negative libnfs status code into an error for `path`
    ///
    /// libnfs reports failures as negated errno values.
    pub fn from_status(path: &str, code: i32, message: impl Into<String>) -> Self {
        let path = path.to_string();
        match code.wrapping_neg() {
            libc::EACCES | libc::EPERM => NfsError::PermissionDenied { path },
            libc::ENOENT => NfsError::NotFound { path },
            libc::ENOTDIR => NfsError::NotADirectory { path },
            libc::ESTALE => NfsError::StaleHandle { path },
            libc::ETIMEDOUT => NfsError::Timeout {
                path,
                timeout_ms: 0,
            },
            _ => NfsError::Protocol {
                code,
                message: message.into(),
            },
        }
    }
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid connection count
    #[error("Invalid connection count {count}: must be between 1 and {max}")]
    InvalidConcurrency { count: usize, max: usize },

    /// Invalid pipeline depth
    #[error("Invalid pipeline depth {depth}: must be between 1 and {max}")]
    InvalidPipelineDepth { depth: usize, max: usize },

    /// Invalid poll timeout
    #[error("Invalid poll timeout {millis}ms: must be greater than zero")]
    InvalidTimeout { millis: u128 },

    /// Invalid result queue sizing
    #[error("Invalid result queue factor {factor}: must be at least 1")]
    InvalidQueueFactor { factor: usize },

    /// Start path is not absolute
    #[error("Invalid start path '{path}': must be absolute")]
    InvalidStartPath { path: String },

    /// The crawl target could not be turned into an NFS URL
    #[error("Invalid crawl target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },
}

/// fstab parsing and resolution errors
#[derive(Error, Debug)]
pub enum FstabError {
    /// The fstab file could not be read
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A non-comment line did not have four to six fields
    #[error("Malformed fstab line {line_no}: '{line}'")]
    MalformedLine { line_no: usize, line: String },

    /// No NFS mount covers the requested path
    #[error("No NFS fstab entry covers '{path}'")]
    NoMatch { path: PathBuf },

    /// The mount source has a folder that is not absolute
    #[error("Mount source '{source_spec}' has folder '{folder}' that does not start with '/'")]
    UnexpectedSource { source_spec: String, folder: String },

    /// The current directory could not be determined
    #[error("Cannot make '{path}' absolute: {source}")]
    Absolute {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker panicked
    #[error("Worker {id} panicked: {message}")]
    Panicked { id: usize, message: String },

    /// Worker thread could not be started
    #[error("Failed to spawn worker {id}: {reason}")]
    SpawnFailed { id: usize, reason: String },

    /// Result channel closed
    #[error("Result channel closed with {outstanding} directories outstanding")]
    ResultChannelClosed { outstanding: usize },
}

/// Result type alias for CrawlError
pub type CrawlResult<T> = std::result::Result<T, CrawlError>;

/// Result type alias for NfsError
pub type NfsResult<T> = std::result::Result<T, NfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_translation() {
        assert_eq!(
            NfsError::from_status("/a", -libc::EACCES, "denied"),
            NfsError::PermissionDenied { path: "/a".into() }
        );
        assert_eq!(
            NfsError::from_status("/a", -libc::ENOENT, ""),
            NfsError::NotFound { path: "/a".into() }
        );
        assert_eq!(
            NfsError::from_status("/a", -libc::ESTALE, ""),
            NfsError::StaleHandle { path: "/a".into() }
        );
        assert!(matches!(
            NfsError::from_status("/a", -libc::EIO, "rpc failed"),
            NfsError::Protocol { code, ref message } if code == -libc::EIO && message == "rpc failed"
        ));
    }

    #[test]
    fn test_connection_local_errors() {
        let stalled = CrawlError::Stalled {
            timeout: Duration::from_millis(250),
            in_flight: 2,
        };
        assert!(stalled.is_connection_local());
        assert_eq!(
            stalled.for_in_flight_path("/x"),
            NfsError::Timeout {
                path: "/x".into(),
                timeout_ms: 250
            }
        );

        let malformed = CrawlError::MalformedReadiness {
            reason: "index 3 out of range".into(),
        };
        assert!(!malformed.is_connection_local());
    }

    #[test]
    fn test_error_conversion() {
        let nfs_err = NfsError::NotFound {
            path: "/missing".into(),
        };
        let crawl_err: CrawlError = nfs_err.into();
        assert!(matches!(crawl_err, CrawlError::Nfs(_)));
    }
}
