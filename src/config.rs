//! Configuration types for nfs-crawler
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - NFS URL parsing

use crate::crawler::CrawlOptions;
use crate::error::{ConfigError, CrawlResult, NfsError};
use crate::fstab;
use clap::Parser;
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

/// Regex for parsing NFS URLs (query already stripped)
static NFS_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // Matches: nfs://server/export/path or nfs://server:port/export
    Regex::new(r"^(?:nfs://)?([^:/?]+)(:\d+)?(/[^\s?]*)$").expect("Invalid NFS URL regex")
});

/// List every file on an NFS share
#[derive(Parser, Debug, Clone)]
#[command(
    name = "nfs-find",
    version,
    about = "List every file on an NFS share",
    long_about = "Recursively lists an NFS share using direct libnfs access.\n\n\
                  PATH may be an nfs:// URL or a local path below an NFS mount listed in fstab;\n\
                  local paths are translated to a URL and printed relative to the local mount.",
    after_help = "EXAMPLES:\n    \
        nfs-find nfs://server/export\n    \
        nfs-find /mnt/data/projects -c 8\n    \
        nfs-find nfs://server/export --pipeline-depth 16 --stats"
)]
pub struct CliArgs {
    /// Local path below an NFS mount, or an nfs:// URL
    #[arg(value_name = "PATH|NFS_URL")]
    pub path: String,

    /// fstab used to resolve local paths
    #[arg(long, default_value = "/etc/fstab", value_name = "FILE")]
    pub fstab: PathBuf,

    /// Number of NFS connections
    #[arg(short = 'c', long, default_value = "1", value_name = "NUM")]
    pub connections: usize,

    /// Outstanding directory listings per connection
    #[arg(long, default_value = "1", value_name = "NUM")]
    pub pipeline_depth: usize,

    /// How long a connection may stay silent before it counts as stalled
    #[arg(long, default_value = "5000", value_name = "MS")]
    pub timeout_ms: u64,

    /// Number of connect attempts to retry
    #[arg(long, default_value = "3", value_name = "NUM")]
    pub retries: u32,

    /// Directory to start from, relative to PATH
    #[arg(long, default_value = "/", value_name = "PATH")]
    pub start_path: String,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Print a summary to stderr when done
    #[arg(long)]
    pub stats: bool,
}

/// Parsed NFS URL components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NfsUrl {
    /// NFS server hostname or IP
    pub server: String,

    /// Optional port (default is 2049)
    pub port: Option<u16>,

    /// Export path (must start with /)
    pub export: String,

    /// Subpath within the export (may be empty)
    pub subpath: String,

    /// libnfs URL options without the leading '?'
    pub options: Option<String>,
}

impl NfsUrl {
    /// Parse an NFS URL string
    ///
    /// Accepts formats:
    /// - nfs://server/export
    /// - nfs://server/export/subpath
    /// - nfs://server:port/export
    /// - nfs://server/export?version=4&timeo=600
    /// - server:/export
    /// - server:/export/subpath
    pub fn parse(url: &str) -> Result<Self, NfsError> {
        let url = url.trim();
        let (location, options) = match url.split_once('?') {
            Some((location, query)) if !query.is_empty() => (location, Some(query.to_string())),
            Some((location, _)) => (location, None),
            None => (url, None),
        };

        if let Some(caps) = NFS_URL_REGEX.captures(location) {
            let server = caps
                .get(1)
                .ok_or_else(|| NfsError::InvalidUrl {
                    url: url.to_string(),
                    reason: "Missing server".into(),
                })?
                .as_str()
                .to_string();

            let port = match caps.get(2) {
                Some(m) => Some(m.as_str().trim_start_matches(':').parse::<u16>().map_err(
                    |_| NfsError::InvalidUrl {
                        url: url.to_string(),
                        reason: format!("Invalid port '{}'", m.as_str()),
                    },
                )?),
                None => None,
            };

            let full_path = caps
                .get(3)
                .ok_or_else(|| NfsError::InvalidUrl {
                    url: url.to_string(),
                    reason: "Missing export path".into(),
                })?
                .as_str();

            let (export, subpath) = Self::split_export_path(full_path);

            return Ok(Self {
                server,
                port,
                export,
                subpath,
                options,
            });
        }

        // Legacy format: server:/export
        // Strip nfs:// first so the :// itself is not taken as the separator
        let legacy_url = location.strip_prefix("nfs://").unwrap_or(location);
        if let Some(idx) = legacy_url.find(":/") {
            let server = legacy_url[..idx].to_string();
            let full_path = &legacy_url[idx + 1..];
            let (export, subpath) = Self::split_export_path(full_path);

            if server.is_empty() {
                return Err(NfsError::InvalidUrl {
                    url: url.to_string(),
                    reason: "Empty server name".into(),
                });
            }

            return Ok(Self {
                server,
                port: None,
                export,
                subpath,
                options,
            });
        }

        Err(NfsError::InvalidUrl {
            url: url.to_string(),
            reason: "Expected format: nfs://server/export or server:/export".into(),
        })
    }

    /// Split a full path into export and subpath
    ///
    /// The export is assumed to be the first path component.
    /// For example: /export/foo/bar -> export="/export", subpath="/foo/bar"
    fn split_export_path(path: &str) -> (String, String) {
        let path = path.trim_end_matches('/');

        if path.is_empty() {
            return ("/".to_string(), String::new());
        }

        let without_leading = path.trim_start_matches('/');
        if let Some(idx) = without_leading.find('/') {
            let export = format!("/{}", &without_leading[..idx]);
            let subpath = without_leading[idx..].to_string();
            (export, subpath)
        } else {
            (path.to_string(), String::new())
        }
    }

    /// Use an explicit export, moving the rest of the path into the subpath
    ///
    /// Needed for exports with more than one path component, e.g.
    /// `/volumes/projects`.
    pub fn with_export(mut self, export: &str) -> Self {
        let export = normalize_path(export);
        let full_path = self.full_path();

        self.subpath = match full_path.strip_prefix(&export) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.to_string(),
            _ => String::new(),
        };
        self.export = export;
        self
    }

    /// Mount the whole URL path as the export, leaving no subpath
    ///
    /// Servers may export any directory, so an `nfs://` target is mounted
    /// exactly as given.
    pub fn mount_full_path(self) -> Self {
        let full_path = self.full_path();
        self.with_export(&full_path)
    }

    /// Get the full path (export + subpath)
    pub fn full_path(&self) -> String {
        if self.subpath.is_empty() {
            self.export.clone()
        } else {
            format!("{}{}", self.export, self.subpath)
        }
    }

    /// Directory within the mounted export where a crawl starts
    pub fn walk_start_path(&self) -> String {
        if self.subpath.is_empty() {
            "/".to_string()
        } else {
            self.subpath.clone()
        }
    }

    fn authority(&self) -> String {
        match self.port {
            Some(p) => format!("nfs://{}:{}", self.server, p),
            None => format!("nfs://{}", self.server),
        }
    }

    fn query(&self) -> String {
        match &self.options {
            Some(options) => format!("?{}", options),
            None => String::new(),
        }
    }

    /// URL of the export alone, with options, as handed to libnfs for mounting
    pub fn mount_url(&self) -> String {
        format!("{}{}{}", self.authority(), self.export, self.query())
    }

    /// Full URL including subpath and options
    pub fn to_url_string(&self) -> String {
        format!("{}{}{}", self.authority(), self.full_path(), self.query())
    }

    /// Format as a connection string for display (no options)
    pub fn to_display_string(&self) -> String {
        format!("{}{}", self.authority(), self.full_path())
    }
}

/// Lexically normalize an absolute path
///
/// Collapses repeated separators, `.` and `..` components and drops any
/// trailing slash. `..` never climbs above the root.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    format!("/{}", parts.join("/"))
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Parsed NFS URL
    pub nfs_url: NfsUrl,

    /// Local prefix prepended to every printed path
    pub display_prefix: String,

    /// Directory within the export that output paths are relative to
    pub crawl_root: String,

    /// Directory within the export where the crawl starts
    pub start_path: String,

    /// Traversal knobs
    pub options: CrawlOptions,

    /// RPC timeout for each connection
    pub timeout: Duration,

    /// Retry count for connection setup
    pub retry_count: u32,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,

    /// Print a summary at the end
    pub print_stats: bool,
}

impl CrawlConfig {
    /// Create and validate configuration from CLI arguments
    ///
    /// An `nfs://` argument is mounted as given and printed below `/`.
    /// Anything else is resolved to a URL through the fstab and printed
    /// below the local path.
    pub fn from_args(args: CliArgs) -> CrawlResult<Self> {
        if args.path.trim().is_empty() {
            return Err(ConfigError::InvalidTarget {
                target: args.path,
                reason: "Path is empty".into(),
            }
            .into());
        }

        let (nfs_url, display_prefix) = if args.path.starts_with("nfs://") {
            (NfsUrl::parse(&args.path)?.mount_full_path(), "/".to_string())
        } else {
            let url = fstab::resolve_path(&args.path, &args.fstab)?;
            let prefix = fstab::absolute_path(&args.path)?;
            (url, prefix)
        };

        let options = CrawlOptions::default()
            .concurrency(args.connections)
            .pipeline_depth(args.pipeline_depth)
            .poll_timeout(Duration::from_millis(args.timeout_ms));
        options.validate()?;

        let crawl_root = nfs_url.walk_start_path();
        let start_path = normalize_path(&format!("{}/{}", crawl_root, args.start_path));

        Ok(Self {
            nfs_url,
            display_prefix,
            crawl_root,
            start_path,
            options,
            timeout: Duration::from_millis(args.timeout_ms),
            retry_count: args.retries,
            show_progress: !args.quiet,
            verbose: args.verbose,
            print_stats: args.stats,
        })
    }

    /// Path to print for an entry path within the export
    pub fn display_path(&self, path: &str) -> String {
        let relative = match path.strip_prefix(&self.crawl_root) {
            Some(rest) if self.crawl_root != "/" => rest,
            _ => path,
        };
        normalize_path(&format!("{}/{}", self.display_prefix, relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(path: &str) -> CliArgs {
        CliArgs::parse_from(["nfs-find", path])
    }

    #[test]
    fn test_parse_nfs_url_standard() {
        let url = NfsUrl::parse("nfs://server.local/export").unwrap();
        assert_eq!(url.server, "server.local");
        assert_eq!(url.export, "/export");
        assert_eq!(url.subpath, "");
        assert_eq!(url.port, None);
        assert_eq!(url.options, None);
    }

    #[test]
    fn test_parse_nfs_url_with_subpath() {
        let url = NfsUrl::parse("nfs://server/export/data/subdir").unwrap();
        assert_eq!(url.server, "server");
        assert_eq!(url.export, "/export");
        assert_eq!(url.subpath, "/data/subdir");
        assert_eq!(url.walk_start_path(), "/data/subdir");
    }

    #[test]
    fn test_parse_nfs_url_with_port() {
        let url = NfsUrl::parse("nfs://server:2049/export").unwrap();
        assert_eq!(url.server, "server");
        assert_eq!(url.port, Some(2049));
        assert_eq!(url.export, "/export");
    }

    #[test]
    fn test_parse_nfs_url_with_options() {
        let url = NfsUrl::parse("nfs://server/export/sub?version=4&timeo=600").unwrap();
        assert_eq!(url.export, "/export");
        assert_eq!(url.subpath, "/sub");
        assert_eq!(url.options.as_deref(), Some("version=4&timeo=600"));
        assert_eq!(url.mount_url(), "nfs://server/export?version=4&timeo=600");
        assert_eq!(
            url.to_url_string(),
            "nfs://server/export/sub?version=4&timeo=600"
        );
        assert_eq!(url.to_display_string(), "nfs://server/export/sub");
    }

    #[test]
    fn test_parse_legacy_format() {
        let url = NfsUrl::parse("192.168.1.100:/data").unwrap();
        assert_eq!(url.server, "192.168.1.100");
        assert_eq!(url.export, "/data");
    }

    #[test]
    fn test_parse_invalid_url() {
        assert!(NfsUrl::parse("invalid").is_err());
        assert!(NfsUrl::parse("://server/export").is_err());
        assert!(NfsUrl::parse("nfs://server:99999/export").is_err());
    }

    #[test]
    fn test_explicit_export() {
        let url = NfsUrl::parse("nfs://server/volumes/projects/alpha")
            .unwrap()
            .with_export("/volumes/projects");
        assert_eq!(url.export, "/volumes/projects");
        assert_eq!(url.subpath, "/alpha");

        let url = NfsUrl::parse("nfs://server/a/b").unwrap().with_export("/other");
        assert_eq!(url.export, "/other");
        assert_eq!(url.subpath, "");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("//a//b/"), "/a/b");
        assert_eq!(normalize_path("/a/./b/../c"), "/a/c");
        assert_eq!(normalize_path("/../.."), "/");
    }

    #[test]
    fn test_config_from_url() {
        let config = CrawlConfig::from_args(args("nfs://server/export")).unwrap();
        assert_eq!(config.display_prefix, "/");
        assert_eq!(config.start_path, "/");
        assert_eq!(config.options.concurrency, 1);
        assert_eq!(config.display_path("/a/x"), "/a/x");
    }

    #[test]
    fn test_config_with_subpath_and_start() {
        let cli = CliArgs::parse_from([
            "nfs-find",
            "nfs://server/export/data",
            "--start-path",
            "projects",
            "-c",
            "4",
        ]);
        let config = CrawlConfig::from_args(cli).unwrap();

        assert_eq!(config.nfs_url.export, "/export/data");
        assert_eq!(config.crawl_root, "/");
        assert_eq!(config.start_path, "/projects");
        assert_eq!(config.options.concurrency, 4);
        assert_eq!(config.display_path("/projects/x"), "/projects/x");
    }

    #[test]
    fn test_config_mounts_multi_part_export() {
        let config =
            CrawlConfig::from_args(args("nfs://server/volumes/projects/alpha?version=4")).unwrap();

        assert_eq!(config.nfs_url.export, "/volumes/projects/alpha");
        assert_eq!(config.nfs_url.subpath, "");
        assert_eq!(
            config.nfs_url.mount_url(),
            "nfs://server/volumes/projects/alpha?version=4"
        );
        assert_eq!(config.start_path, "/");
        assert_eq!(config.display_path("/x/y"), "/x/y");
    }

    #[test]
    fn test_config_rejects_bad_options() {
        let cli = CliArgs::parse_from(["nfs-find", "nfs://server/export", "-c", "0"]);
        assert!(CrawlConfig::from_args(cli).is_err());

        let cli = CliArgs::parse_from(["nfs-find", "nfs://server/export", "--timeout-ms", "0"]);
        assert!(CrawlConfig::from_args(cli).is_err());

        assert!(matches!(
            CrawlConfig::from_args(args("  ")),
            Err(crate::error::CrawlError::Config(ConfigError::InvalidTarget { .. }))
        ));
    }
}
