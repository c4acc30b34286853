//! fstab resolution
//!
//! Turns a local path below an NFS mount into the libnfs URL of the same
//! directory, using the mount's fstab line:
//!
//! ```text
//!   fileserver:/srv/data  /mnt/data  nfs  vers=3,rsize=1048576  0 0
//!
//!   /mnt/data/projects/a  ──▶  nfs://fileserver/srv/data/projects/a?version=3&rsize=1048576
//! ```

use crate::config::{normalize_path, NfsUrl};
use crate::error::FstabError;
use std::fs;
use std::path::Path;

/// Mount options passed through to libnfs unchanged
const PASSTHROUGH_OPTIONS: [&str; 6] = ["timeo", "rsize", "wsize", "sec", "retrans", "mountport"];

/// One fstab line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    /// Device or remote source (`server:/export` for NFS)
    pub source: String,

    /// Local mount point
    pub target: String,

    /// Filesystem type
    pub fs_type: String,

    pub mount_options: Vec<String>,
    pub dump: u32,
    pub passno: u32,
}

impl FstabEntry {
    /// Parse one non-comment fstab line
    ///
    /// The dump and pass fields may be omitted and default to 0.
    pub fn from_line(line: &str, line_no: usize) -> Result<Self, FstabError> {
        let malformed = || FstabError::MalformedLine {
            line_no,
            line: line.trim().to_string(),
        };

        let fields: Vec<&str> = line.split_whitespace().collect();
        if !(4..=6).contains(&fields.len()) {
            return Err(malformed());
        }

        let number = |idx: usize| -> Result<u32, FstabError> {
            match fields.get(idx) {
                Some(value) => value.parse().map_err(|_| malformed()),
                None => Ok(0),
            }
        };

        Ok(Self {
            source: fields[0].to_string(),
            target: fields[1].to_string(),
            fs_type: fields[2].to_string(),
            mount_options: fields[3].split(',').map(str::to_string).collect(),
            dump: number(4)?,
            passno: number(5)?,
        })
    }

    /// Format back into an fstab line
    pub fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            self.source,
            self.target,
            self.fs_type,
            self.mount_options.join(","),
            self.dump,
            self.passno
        )
    }

    /// Check if this is an NFS mount
    pub fn is_nfs(&self) -> bool {
        matches!(self.fs_type.as_str(), "nfs" | "nfs4")
    }

    /// Split the source into server and exported folder
    ///
    /// A source without a colon exports `/`.
    fn server_and_folder(&self) -> Result<(&str, &str), FstabError> {
        let (server, folder) = match self.source.find(":/") {
            Some(idx) => (&self.source[..idx], &self.source[idx + 1..]),
            None => match self.source.split_once(':') {
                Some(parts) => parts,
                None => (self.source.as_str(), "/"),
            },
        };

        if !folder.starts_with('/') {
            return Err(FstabError::UnexpectedSource {
                source_spec: self.source.clone(),
                folder: folder.to_string(),
            });
        }

        Ok((server, folder))
    }
}

/// Parse fstab contents, skipping comments and blank lines
pub fn parse_fstab_str(contents: &str) -> Result<Vec<FstabEntry>, FstabError> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(idx, line)| FstabEntry::from_line(line, idx + 1))
        .collect()
}

/// Read and parse an fstab file
pub fn parse_fstab(path: &Path) -> Result<Vec<FstabEntry>, FstabError> {
    let contents = fs::read_to_string(path).map_err(|source| FstabError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_fstab_str(&contents)
}

/// Translate mount options into a libnfs URL query (with leading `?`)
///
/// Returns an empty string when no option carries over.
pub fn mount_options_to_url_query<S: AsRef<str>>(options: &[S]) -> String {
    let mut query = Vec::new();

    for option in options {
        let option = option.as_ref();
        let (key, value) = option.split_once('=').unwrap_or((option, ""));

        match key {
            k if PASSTHROUGH_OPTIONS.contains(&k) => query.push(option.to_string()),
            "nfsvers" | "vers" => query.push(format!("version={}", value)),
            "port" => query.push(format!("nfsport={}", value)),
            _ => {}
        }
    }

    if query.is_empty() {
        String::new()
    } else {
        format!("?{}", query.join("&"))
    }
}

/// Make a local path absolute and normalize it lexically
pub fn absolute_path(path: &str) -> Result<String, FstabError> {
    let absolute = std::path::absolute(path).map_err(|source| FstabError::Absolute {
        path: path.into(),
        source,
    })?;
    Ok(normalize_path(&absolute.to_string_lossy()))
}

/// Find the NFS URL for an absolute, normalized local path
///
/// The first NFS entry whose mount point is the path or one of its
/// ancestors wins.
pub fn resolve_in(path: &str, entries: &[FstabEntry]) -> Result<NfsUrl, FstabError> {
    for entry in entries.iter().filter(|e| e.is_nfs()) {
        let mount = normalize_path(&entry.target);

        let remainder = if path == mount {
            ""
        } else if mount == "/" {
            path
        } else {
            match path.strip_prefix(&mount) {
                Some(rest) if rest.starts_with('/') => rest,
                _ => continue,
            }
        };

        let (server, folder) = entry.server_and_folder()?;
        let query = mount_options_to_url_query(&entry.mount_options);

        let export = normalize_path(folder);
        let subpath = match normalize_path(remainder).as_str() {
            "/" => String::new(),
            rest => rest.to_string(),
        };

        return Ok(NfsUrl {
            server: server.to_string(),
            port: None,
            export,
            subpath,
            options: query.strip_prefix('?').map(str::to_string),
        });
    }

    Err(FstabError::NoMatch { path: path.into() })
}

/// Resolve a local path through an fstab file
pub fn resolve_path(path: &str, fstab: &Path) -> Result<NfsUrl, FstabError> {
    let absolute = absolute_path(path)?;
    let entries = parse_fstab(fstab)?;
    resolve_in(&absolute, &entries)
}

/// URL string for a local path below an NFS mount
pub fn path_to_nfs_url(path: &str, fstab: &Path) -> Result<String, FstabError> {
    resolve_path(path, fstab).map(|url| url.to_url_string())
}
