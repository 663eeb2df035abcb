// Watcher: collects filesystem events, waits for stabilization, filters,
// and emits schedule/cancel decisions

use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::constants::watcher::STABILIZATION_WINDOW_SECONDS;
use crate::error::Result;
use crate::filter::PathFilter;

/// Normalized filesystem event, as produced by the watch primitive
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Add(PathBuf),
    Change(PathBuf),
    Remove(PathBuf),
}

/// Decision emitted towards the scheduler
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Schedule(PathBuf),
    Cancel(PathBuf),
}

/// Debounces events into a pending set and flushes it through the filters
///
/// Every event on a pending file restarts the stabilization timer; when the
/// timer fires the pending snapshot is processed in sorted order. Closing
/// the event channel flushes what is left and ends the loop.
pub struct Watcher {
    events: mpsc::UnboundedReceiver<WatchEvent>,
    out: mpsc::UnboundedSender<Dispatch>,
    filters: Vec<Box<dyn PathFilter>>,
    window: Duration,
    pending: Vec<PathBuf>,
}

impl Watcher {
    pub fn new(
        events: mpsc::UnboundedReceiver<WatchEvent>,
        out: mpsc::UnboundedSender<Dispatch>,
        filters: Vec<Box<dyn PathFilter>>,
    ) -> Self {
        Self::with_window(
            events,
            out,
            filters,
            Duration::from_secs(STABILIZATION_WINDOW_SECONDS),
        )
    }

    pub fn with_window(
        events: mpsc::UnboundedReceiver<WatchEvent>,
        out: mpsc::UnboundedSender<Dispatch>,
        filters: Vec<Box<dyn PathFilter>>,
        window: Duration,
    ) -> Self {
        Self {
            events,
            out,
            filters,
            window,
            pending: Vec::new(),
        }
    }

    pub async fn run(mut self) {
        let mut deadline: Option<Instant> = None;

        loop {
            let event = match deadline {
                Some(at) => tokio::select! {
                    event = self.events.recv() => Some(event),
                    _ = tokio::time::sleep_until(at) => None,
                },
                None => Some(self.events.recv().await),
            };

            match event {
                Some(Some(event)) => {
                    if self.handle(event) {
                        deadline = Some(Instant::now() + self.window);
                    }
                }
                Some(None) => {
                    // channel closed: flush whatever stabilized and stop
                    self.flush().await;
                    return;
                }
                None => {
                    self.flush().await;
                    deadline = None;
                }
            }
        }
    }

    /// Apply one event; returns whether the stabilization timer restarts
    fn handle(&mut self, event: WatchEvent) -> bool {
        match event {
            WatchEvent::Add(file) => {
                if !self.pending.contains(&file) {
                    debug!("pending: '{}'", file.display());
                    self.pending.push(file);
                }
                true
            }
            WatchEvent::Change(file) => self.pending.contains(&file),
            WatchEvent::Remove(file) => {
                let was_pending = self.pending.contains(&file);
                self.pending.retain(|p| *p != file);
                // cancel is a no-op downstream when the file is unknown
                let _ = self.out.send(Dispatch::Cancel(file));
                was_pending
            }
        }
    }

    /// Snapshot the pending set, sorted ascending, and run the filters
    async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let mut snapshot = std::mem::take(&mut self.pending);
        snapshot.sort();

        for file in snapshot {
            match self.accept(&file).await {
                Ok(None) => {
                    let _ = self.out.send(Dispatch::Schedule(file));
                }
                Ok(Some(reason)) => {
                    debug!("IGNORE: '{}': {}", file.display(), reason);
                }
                Err(e) => {
                    warn!("IGNORE: '{}': {}", file.display(), e);
                }
            }
        }
    }

    async fn accept(&self, file: &Path) -> Result<Option<String>> {
        for filter in &self.filters {
            if let Some(reason) = filter.check(file).await? {
                return Ok(Some(reason));
            }
        }
        Ok(None)
    }
}
