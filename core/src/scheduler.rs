// Single-flight scheduler: a FIFO queue of files to process
// At most one task runs at any instant; queued tasks can be cancelled

use async_trait::async_trait;
use log::{debug, error, info};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::constants::scheduler::INTER_TASK_DELAY_SECONDS;

/// The work a scheduled task performs
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    async fn process(&self, file: &Path) -> crate::error::Result<()>;
}

enum Command {
    Schedule(PathBuf),
    Cancel(PathBuf),
    Drain(oneshot::Sender<()>),
}

/// Handle to the scheduler's queue loop
///
/// Dropping the last handle destroys the queue: the in-flight task
/// finishes, pending tasks are never executed.
#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<Command>,
}

impl Scheduler {
    /// Spawn the queue loop with the default inter-task delay
    pub fn new(processor: Arc<dyn Processor>) -> Self {
        Self::with_delay(processor, Duration::from_secs(INTER_TASK_DELAY_SECONDS))
    }

    pub fn with_delay(processor: Arc<dyn Processor>, delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, processor, delay));
        Self { tx }
    }

    /// Enqueue a file; it is assigned the next monotonic task id
    pub fn schedule(&self, file: &Path) {
        let _ = self.tx.send(Command::Schedule(file.to_path_buf()));
    }

    /// Remove a queued file; a running or unknown file is left alone
    pub fn cancel(&self, file: &Path) {
        let _ = self.tx.send(Command::Cancel(file.to_path_buf()));
    }

    /// Wait until the queue is empty and nothing is running
    pub async fn drain(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Drain(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

struct State {
    queue: VecDeque<u64>,
    files: HashMap<u64, PathBuf>,
    next_id: u64,
    current: u64,
    drains: Vec<oneshot::Sender<()>>,
}

impl State {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            files: HashMap::new(),
            next_id: 1,
            current: 0,
            drains: Vec::new(),
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Schedule(file) => {
                let id = self.next_id;
                self.next_id += 1;
                debug!("task {}: queued '{}'", id, file.display());
                self.files.insert(id, file);
                self.queue.push_back(id);
            }
            Command::Cancel(file) => {
                // Only queued-but-not-yet-started tasks can be cancelled
                let id = self
                    .files
                    .iter()
                    .filter(|(_, f)| **f == file)
                    .map(|(id, _)| *id)
                    .max();
                match id {
                    Some(id) if id > self.current => {
                        debug!("task {}: cancelled '{}'", id, file.display());
                        self.queue.retain(|queued| *queued != id);
                        self.files.remove(&id);
                    }
                    _ => debug!("cancel '{}': nothing to do", file.display()),
                }
            }
            Command::Drain(reply) => {
                if self.queue.is_empty() {
                    let _ = reply.send(());
                } else {
                    self.drains.push(reply);
                }
            }
        }
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<Command>,
    processor: Arc<dyn Processor>,
    delay: Duration,
) {
    let mut state = State::new();
    let mut ran_before = false;

    loop {
        // Idle: answer drain requests and wait for commands
        while state.queue.is_empty() {
            for reply in state.drains.drain(..) {
                let _ = reply.send(());
            }
            match rx.recv().await {
                Some(command) => state.apply(command),
                None => {
                    debug!("scheduler destroyed, {} pending task(s) dropped", state.queue.len());
                    return;
                }
            }
        }

        // Settle window between tasks, letting the filesystem rest
        if ran_before {
            tokio::time::sleep(delay).await;
        }

        // Apply buffered commands (cancellations in particular) before
        // picking the next task
        while let Ok(command) = rx.try_recv() {
            state.apply(command);
        }

        let Some(id) = state.queue.pop_front() else {
            continue;
        };
        let Some(file) = state.files.remove(&id) else {
            continue;
        };

        state.current = id;
        ran_before = true;
        info!("task {}: processing '{}'", id, file.display());
        match processor.process(&file).await {
            Ok(()) => info!("task {}: done", id),
            Err(e) => error!("task {} failed: {}", id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        started: Mutex<Vec<PathBuf>>,
        task_delay: Duration,
        fail_on: Option<PathBuf>,
    }

    impl Recorder {
        fn new(task_delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                started: Mutex::new(Vec::new()),
                task_delay,
                fail_on: None,
            })
        }

        fn failing_on(file: &str) -> Arc<Self> {
            Arc::new(Self {
                started: Mutex::new(Vec::new()),
                task_delay: Duration::from_millis(1),
                fail_on: Some(PathBuf::from(file)),
            })
        }

        fn started(&self) -> Vec<PathBuf> {
            self.started.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Processor for Recorder {
        async fn process(&self, file: &Path) -> crate::error::Result<()> {
            self.started.lock().unwrap().push(file.to_path_buf());
            tokio::time::sleep(self.task_delay).await;
            if self.fail_on.as_deref() == Some(file) {
                return Err(crate::error::CoreError::TranscodeFailed("simulated".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_fifo_ordering() {
        let recorder = Recorder::new(Duration::from_millis(1));
        let scheduler = Scheduler::with_delay(recorder.clone(), Duration::from_millis(1));

        scheduler.schedule(Path::new("a"));
        scheduler.schedule(Path::new("b"));
        scheduler.schedule(Path::new("c"));
        scheduler.drain().await;

        assert_eq!(
            recorder.started(),
            vec![PathBuf::from("a"), PathBuf::from("b"), PathBuf::from("c")]
        );
    }

    #[tokio::test]
    async fn test_cancel_before_queue_tick() {
        let recorder = Recorder::new(Duration::from_millis(1));
        let scheduler = Scheduler::with_delay(recorder.clone(), Duration::from_millis(1));

        scheduler.schedule(Path::new("a"));
        scheduler.schedule(Path::new("b"));
        scheduler.cancel(Path::new("b"));
        scheduler.drain().await;

        assert_eq!(recorder.started(), vec![PathBuf::from("a")]);
    }

    #[tokio::test]
    async fn test_cancel_running_task_is_a_noop() {
        let recorder = Recorder::new(Duration::from_millis(50));
        let scheduler = Scheduler::with_delay(recorder.clone(), Duration::from_millis(1));

        scheduler.schedule(Path::new("a"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        scheduler.cancel(Path::new("a"));
        scheduler.drain().await;

        assert_eq!(recorder.started(), vec![PathBuf::from("a")]);
    }

    #[tokio::test]
    async fn test_cancel_unknown_file_is_a_noop() {
        let recorder = Recorder::new(Duration::from_millis(1));
        let scheduler = Scheduler::with_delay(recorder.clone(), Duration::from_millis(1));

        scheduler.cancel(Path::new("ghost"));
        scheduler.schedule(Path::new("a"));
        scheduler.drain().await;

        assert_eq!(recorder.started(), vec![PathBuf::from("a")]);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_next_task() {
        let recorder = Recorder::failing_on("bad");
        let scheduler = Scheduler::with_delay(recorder.clone(), Duration::from_millis(1));

        scheduler.schedule(Path::new("bad"));
        scheduler.schedule(Path::new("good"));
        scheduler.drain().await;

        assert_eq!(recorder.started(), vec![PathBuf::from("bad"), PathBuf::from("good")]);
    }
}
