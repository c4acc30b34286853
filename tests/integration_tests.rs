//! Integration tests for nfs-crawler
//!
//! Real NFS servers are not available in CI, so every crawl here runs
//! against the in-memory share. Sessions still expose real socket
//! descriptors, so the pipelined and pooled strategies go through poll(2).

use nfs_crawler::crawler::{crawl, CrawlOptions, Strategy};
use nfs_crawler::error::{CrawlError, NfsError};
use nfs_crawler::nfs::{EntryType, MemoryShare, MemoryTransport};
use nfs_crawler::Entry;
use std::collections::HashSet;
use std::time::Duration;

/// Option sets covering every strategy
fn all_strategies() -> Vec<CrawlOptions> {
    let base = CrawlOptions::default().poll_timeout(Duration::from_secs(2));
    vec![
        base.clone(),
        base.clone().pipeline_depth(4),
        base.clone().concurrency(2),
        base.clone().concurrency(4),
        base.concurrency(3).pipeline_depth(2),
    ]
}

fn collect(transport: &MemoryTransport, start: &str, options: &CrawlOptions) -> Vec<Entry> {
    crawl(transport, start, options)
        .unwrap()
        .map(|r| r.unwrap())
        .collect()
}

fn expected_under(share: &MemoryShare, start: &str) -> HashSet<String> {
    share.entries_under(start).map(|e| e.path.clone()).collect()
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

#[test]
fn test_small_tree_all_strategies() {
    for options in all_strategies() {
        let share = MemoryShare::new().with_dir("/a").with_file("/f").with_file("/a/x");
        let transport = MemoryTransport::new(share);

        let entries = collect(&transport, "/", &options);
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();

        assert_eq!(paths.len(), 3, "{:?}", options.strategy());
        let set: HashSet<&str> = paths.iter().copied().collect();
        assert_eq!(set, HashSet::from(["/a", "/f", "/a/x"]));

        let a = paths.iter().position(|p| *p == "/a").unwrap();
        let x = paths.iter().position(|p| *p == "/a/x").unwrap();
        assert!(a < x, "{:?}: /a after /a/x", options.strategy());

        let a_entry = &entries[a];
        assert_eq!(a_entry.kind, EntryType::Directory);
        assert_eq!(entries[x].kind, EntryType::File);
    }
}

#[test]
fn test_complete_without_duplicates() {
    for options in all_strategies() {
        let transport = MemoryTransport::new(MemoryShare::synthetic(4, 3, 2));
        let expected = expected_under(transport.share(), "/");

        let paths: Vec<String> = collect(&transport, "/", &options)
            .into_iter()
            .map(|e| e.path)
            .collect();
        let unique: HashSet<String> = paths.iter().cloned().collect();

        assert_eq!(paths.len(), unique.len(), "{:?} yielded duplicates", options.strategy());
        assert_eq!(unique, expected, "{:?} missed entries", options.strategy());
    }
}

#[test]
fn test_parents_before_children() {
    for options in all_strategies() {
        let transport = MemoryTransport::new(MemoryShare::synthetic(3, 2, 2));
        let mut yielded = HashSet::new();

        for entry in collect(&transport, "/", &options) {
            let parent = parent_of(&entry.path);
            assert!(
                parent == "/" || yielded.contains(parent),
                "{:?}: {} before its parent",
                options.strategy(),
                entry.path
            );
            yielded.insert(entry.path);
        }
    }
}

#[test]
fn test_sequential_is_depth_first() {
    let share = MemoryShare::new()
        .with_file("/a/x")
        .with_file("/a/y/z")
        .with_file("/b")
        .with_file("/c/w");
    let transport = MemoryTransport::new(share);

    let paths: Vec<String> = collect(&transport, "/", &CrawlOptions::default())
        .into_iter()
        .map(|e| e.path)
        .collect();

    assert_eq!(paths, vec!["/a", "/a/x", "/a/y", "/a/y/z", "/b", "/c", "/c/w"]);
}

#[test]
fn test_start_below_root() {
    for options in all_strategies() {
        let transport = MemoryTransport::new(MemoryShare::synthetic(3, 2, 1));
        let expected = expected_under(transport.share(), "/d1");

        let paths: HashSet<String> = collect(&transport, "/d1", &options)
            .into_iter()
            .map(|e| e.path)
            .collect();

        assert!(!paths.contains("/d1"), "start directory must not be yielded");
        assert_eq!(paths, expected);
    }
}

#[test]
fn test_failed_directory_is_isolated() {
    for options in all_strategies() {
        let share = MemoryShare::new()
            .with_file("/a/b/secret/deep")
            .with_file("/a/b/hidden")
            .with_file("/a/c/visible")
            .with_file("/d")
            .fail("/a/b", NfsError::PermissionDenied { path: "/a/b".into() });
        let transport = MemoryTransport::new(share);

        let mut stream = crawl(&transport, "/", &options).unwrap();
        let paths: HashSet<String> = stream.by_ref().map(|r| r.unwrap().path).collect();

        let expected: HashSet<String> = ["/a", "/a/b", "/a/c", "/a/c/visible", "/d"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(paths, expected, "{:?}", options.strategy());
        assert_eq!(stream.progress().dir_errors, 1);
    }
}

#[test]
fn test_sessions_closed_after_exhaustion() {
    for options in all_strategies() {
        let transport = MemoryTransport::new(MemoryShare::synthetic(2, 3, 1));
        let mut stream = crawl(&transport, "/", &options).unwrap();

        assert_eq!(transport.opened(), options.strategy().connections());
        for item in stream.by_ref() {
            item.unwrap();
        }

        // Released before the stream itself is dropped
        assert_eq!(transport.open_sessions(), 0, "{:?}", options.strategy());
        assert_eq!(transport.opened(), transport.closed());
    }
}

#[test]
fn test_sessions_closed_after_early_drop() {
    for options in all_strategies() {
        let transport = MemoryTransport::new(MemoryShare::synthetic(4, 3, 2));
        let mut stream = crawl(&transport, "/", &options).unwrap();

        let first: Vec<_> = stream.by_ref().take(5).collect();
        assert_eq!(first.len(), 5);
        drop(stream);

        assert_eq!(transport.open_sessions(), 0, "{:?}", options.strategy());
    }
}

#[test]
fn test_pipelined_stall_is_fatal() {
    let transport = MemoryTransport::new(MemoryShare::synthetic(2, 2, 1)).stall_all();
    let options = CrawlOptions::default()
        .pipeline_depth(4)
        .poll_timeout(Duration::from_millis(50));
    assert_eq!(options.strategy(), Strategy::Pipelined { depth: 4 });

    let mut stream = crawl(&transport, "/", &options).unwrap();

    assert!(matches!(stream.next(), Some(Err(CrawlError::Stalled { .. }))));
    assert!(stream.next().is_none());
    assert!(stream.next().is_none());
    assert_eq!(transport.open_sessions(), 0);
}

#[test]
fn test_pool_retires_stalled_connection() {
    // Connection 0 lists the root, then stops answering. /a goes to
    // connection 1 and /b to connection 0, where it times out.
    let share = MemoryShare::new()
        .with_file("/a/x/1")
        .with_file("/a/x/2")
        .with_file("/a/y/3")
        .with_file("/b/lost/4")
        .with_file("/b/5")
        .with_file("/c");
    let transport = MemoryTransport::new(share).stall_session(0, 1);
    let options = CrawlOptions::default()
        .concurrency(2)
        .poll_timeout(Duration::from_millis(100));

    let mut stream = crawl(&transport, "/", &options).unwrap();
    let paths: HashSet<String> = stream.by_ref().map(|r| r.unwrap().path).collect();

    let lost: HashSet<String> = expected_under(transport.share(), "/b");
    let expected: HashSet<String> = expected_under(transport.share(), "/")
        .difference(&lost)
        .cloned()
        .collect();

    assert!(paths.contains("/b"));
    assert_eq!(paths, expected);

    let progress = stream.progress();
    assert_eq!(progress.retired_connections, 1);
    assert_eq!(progress.dir_errors, 1);

    drop(stream);
    assert_eq!(transport.open_sessions(), 0);
}

#[test]
fn test_pool_fails_when_every_connection_stalls() {
    // Connection 0 lists the root and then stalls; connection 1 never
    // answers. The last queued directory has nowhere left to go.
    let share = MemoryShare::new()
        .with_file("/a/1")
        .with_file("/b/2")
        .with_file("/c/3");
    let transport = MemoryTransport::new(share)
        .stall_session(0, 1)
        .stall_session(1, 0);
    let options = CrawlOptions::default()
        .concurrency(2)
        .poll_timeout(Duration::from_millis(100));

    let mut stream = crawl(&transport, "/", &options).unwrap();
    let mut items: Vec<_> = stream.by_ref().collect();

    assert!(matches!(
        items.pop(),
        Some(Err(CrawlError::AllConnectionsStalled { connections: 2, .. }))
    ));
    let paths: HashSet<String> = items.into_iter().map(|r| r.unwrap().path).collect();
    let expected: HashSet<String> = ["/a", "/b", "/c"].into_iter().map(String::from).collect();
    assert_eq!(paths, expected);

    assert!(stream.next().is_none());
    assert_eq!(stream.progress().retired_connections, 2);
    assert_eq!(transport.open_sessions(), 0);
}

#[test]
fn test_open_failure_is_reported() {
    let transport = MemoryTransport::new(MemoryShare::new()).fail_open_after(0);
    let result = crawl(&transport, "/", &CrawlOptions::default());

    assert!(matches!(
        result,
        Err(CrawlError::Nfs(NfsError::ConnectionFailed { .. }))
    ));
    assert_eq!(transport.open_sessions(), 0);
}

#[test]
fn test_progress_counts() {
    let transport = MemoryTransport::new(MemoryShare::synthetic(2, 2, 3));
    let mut stream = crawl(&transport, "/", &CrawlOptions::default().concurrency(2)).unwrap();
    let count = stream.by_ref().count();

    let progress = stream.progress();
    assert_eq!(progress.entries, count as u64);
    // root + 2 + 4 directories
    assert_eq!(progress.dirs_listed, 7);
    assert_eq!(progress.dir_errors, 0);
}
