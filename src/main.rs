//! nfs-find - List every file on an NFS share
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use nfs_crawler::config::{CliArgs, CrawlConfig};
use nfs_crawler::crawler::crawl;
use nfs_crawler::nfs::NfsTransport;
use nfs_crawler::progress::{print_summary, ProgressReporter};
use std::io::{self, BufWriter, IsTerminal, Write};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// How often the spinner is refreshed
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();

    setup_logging(args.verbose)?;

    let config = CrawlConfig::from_args(args).context("Invalid configuration")?;

    let transport = NfsTransport::new(config.nfs_url.clone())
        .timeout(config.timeout)
        .retries(config.retry_count);

    // Setup signal handler for graceful shutdown
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, shutting down...");
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let mut stream = crawl(&transport, &config.start_path, &config.options)
        .with_context(|| format!("Failed to start crawl of {}", config.nfs_url.to_display_string()))?;

    // The spinner would interleave with paths on a terminal
    let progress = (config.show_progress && !io::stdout().is_terminal()).then(ProgressReporter::new);

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut last_update = Instant::now();
    let mut failure = None;

    while let Some(item) = stream.next() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        match item {
            Ok(entry) => {
                if let Err(e) = writeln!(out, "{}", config.display_path(&entry.path)) {
                    // Reader went away (e.g. `| head`)
                    if e.kind() == io::ErrorKind::BrokenPipe {
                        break;
                    }
                    return Err(e).context("Failed to write output");
                }
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }

        if let Some(ref p) = progress {
            if last_update.elapsed() >= PROGRESS_INTERVAL {
                p.update(&stream.progress());
                last_update = Instant::now();
            }
        }
    }

    match out.flush() {
        Err(e) if e.kind() != io::ErrorKind::BrokenPipe => {
            return Err(e).context("Failed to write output");
        }
        _ => {}
    }

    if let Some(ref p) = progress {
        p.finish_and_clear();
    }

    let summary = stream.progress();
    let completed = failure.is_none() && !shutdown.load(Ordering::SeqCst);

    if config.print_stats {
        print_summary(&config.nfs_url.to_display_string(), &summary, completed);
    }

    if summary.dir_errors > 0 {
        info!(errors = summary.dir_errors, "Crawl completed with skipped directories");
    }

    // Closes every session before exiting
    drop(stream);

    match failure {
        Some(e) => Err(e).context("Crawl failed"),
        None => Ok(()),
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("nfs_crawler=debug,warn")
    } else {
        EnvFilter::new("nfs_crawler=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
