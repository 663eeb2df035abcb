// ffauto daemon - profile-driven transcoding of watched directories
// Wires the watcher, scheduler and mapper together around one profile

mod cli;
mod shutdown;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Args;
use ffauto_core::{
    Dispatch, ExcludeListFilter, ExtensionFilter, PathFilter, ProbeFilter, Profile,
    ProfileMapper, Scheduler, WatchEvent, Watcher,
};
use log::{info, warn};
use notify::{Event, EventKind, RecursiveMode, Watcher as _};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    info!("=== ffauto ===");

    let input_root = args
        .input
        .canonicalize()
        .with_context(|| format!("input directory '{}'", args.input.display()))?;
    fs::create_dir_all(&args.output)
        .with_context(|| format!("output directory '{}'", args.output.display()))?;
    let output_root = args
        .output
        .canonicalize()
        .with_context(|| format!("output directory '{}'", args.output.display()))?;

    // Profile load and validation failures are fatal
    let profile = Profile::load(&args.profile)?
        .with_directories(input_root.clone(), output_root.clone());
    profile.validate()?;
    let profile = Arc::new(profile);

    print_configuration(&profile, args.watch);

    let mapper = Arc::new(ProfileMapper::new(profile.clone()));
    let scheduler = Scheduler::new(mapper);

    let filters: Vec<Box<dyn PathFilter>> = vec![
        Box::new(ExcludeListFilter::new(&input_root, &output_root)),
        Box::new(ExtensionFilter::new(
            profile.input.include.as_deref(),
            profile.input.exclude.as_deref(),
        )?),
        Box::new(ProbeFilter),
    ];

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (dispatch_tx, mut dispatch_rx) = mpsc::unbounded_channel();
    let watcher_task = tokio::spawn(Watcher::new(event_rx, dispatch_tx, filters).run());

    // Bridge watcher decisions into the queue
    let queue = scheduler.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(dispatch) = dispatch_rx.recv().await {
            match dispatch {
                Dispatch::Schedule(file) => queue.schedule(&file),
                Dispatch::Cancel(file) => queue.cancel(&file),
            }
        }
    });

    // Pre-existing files go through the same stabilization + filter path
    info!("scanning '{}'", input_root.display());
    let found = scan_directory(&input_root, &event_tx)?;
    info!("initial scan found {} file(s)", found);

    if args.watch {
        let _fs_watcher = start_fs_watcher(&input_root, event_tx.clone())?;
        info!("watching '{}' (Ctrl+C to stop)", input_root.display());
        shutdown::wait().await;
        info!("shutdown requested, dropping pending work");
    } else {
        // Closing the event channel flushes the pending set immediately
        drop(event_tx);
        watcher_task.await.context("watcher task panicked")?;
        forwarder.await.context("dispatch forwarder panicked")?;
        scheduler.drain().await;
        info!("one-shot processing complete");
    }

    Ok(())
}

/// Recursively inject every regular file as an `add` event
fn scan_directory(dir: &Path, events: &mpsc::UnboundedSender<WatchEvent>) -> Result<usize> {
    let mut found = 0;
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read directory '{}'", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            found += scan_directory(&path, events)?;
        } else if path.is_file() {
            let _ = events.send(WatchEvent::Add(path));
            found += 1;
        }
    }
    Ok(found)
}

/// Start the filesystem watcher and translate its events
fn start_fs_watcher(
    root: &Path,
    events: mpsc::UnboundedSender<WatchEvent>,
) -> Result<notify::RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(
        move |result: std::result::Result<Event, notify::Error>| match result {
            Ok(event) => {
                let kind = event.kind.clone();
                for path in event.paths {
                    let mapped = match kind {
                        EventKind::Create(_) => Some(WatchEvent::Add(path)),
                        EventKind::Modify(_) => Some(WatchEvent::Change(path)),
                        EventKind::Remove(_) => Some(WatchEvent::Remove(path)),
                        _ => None,
                    };
                    if let Some(event) = mapped {
                        let _ = events.send(event);
                    }
                }
            }
            Err(e) => warn!("filesystem watcher error: {}", e),
        },
    )?;

    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(watcher)
}

/// Print the effective configuration
fn print_configuration(profile: &Profile, watch: bool) {
    info!("Configuration:");
    info!("  Profile: {}", profile.id);
    info!("  Input: {}", display_dir(profile.input.directory.as_deref()));
    if let Some(include) = &profile.input.include {
        info!("  Include: {}", include);
    }
    if let Some(exclude) = &profile.input.exclude {
        info!("  Exclude: {}", exclude);
    }
    info!("  Output: {}", display_dir(profile.output.directory.as_deref()));
    info!("  Default extension: {}", profile.output.default_extension);
    info!("  Write log: {}", profile.output.write_log);
    info!("  Delete after process: {}", profile.input.delete_after_process);
    info!("  Mappings: {}", profile.retained_mappings().len());
    info!("  Watch mode: {}", watch);
}

fn display_dir(dir: Option<&Path>) -> String {
    dir.map(|d| d.display().to_string()).unwrap_or_else(|| "<unset>".into())
}
