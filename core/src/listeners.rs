// Default worker observers: logging, progress reporting and post work
// Registered on every worker in this order: Logging, Progress, Post

use log::{error, info, warn};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::constants::progress::REPORT_STEP_PERCENT;
use crate::constants::state::EXCLUDE_LIST_FILE;
use crate::media::{InputMedia, OutputMedia};
use crate::profile::Profile;
use crate::worker::{Progress, Worker, WorkerObserver};

/// Build the three default listeners for a plan and register them
pub fn register_default_listeners(worker: &mut Worker, profile: &Profile) {
    let input = worker.input().clone();
    let outputs: Vec<OutputMedia> = worker.outputs().to_vec();
    let input_root = profile.input_directory().to_path_buf();
    let output_root = profile.output_directory().to_path_buf();

    worker.register(Box::new(LoggingListener::new(
        profile.output.write_log,
        &output_root,
        &input.path.filename,
    )));
    worker.register(Box::new(ProgressListener::new(&input)));
    worker.register(Box::new(PostListener::new(
        &input,
        &outputs,
        &input_root,
        &output_root,
        profile.input.delete_after_process,
    )));
}

/// Buffers the command line and stderr; writes the log file when asked
///
/// On success the log is written only when the profile's `writeLog` is set;
/// on failure it is written unconditionally and its path reported.
pub struct LoggingListener {
    write_log: bool,
    log_dir: PathBuf,
    input_stem: String,
    buffer: Vec<String>,
}

impl LoggingListener {
    pub fn new(write_log: bool, log_dir: &Path, input_stem: &str) -> Self {
        Self {
            write_log,
            log_dir: log_dir.to_path_buf(),
            input_stem: input_stem.to_string(),
            buffer: Vec::new(),
        }
    }

    fn write(&self) -> std::io::Result<PathBuf> {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%3f");
        let path = self.log_dir.join(format!("{}.{}.log", self.input_stem, stamp));
        std::fs::create_dir_all(&self.log_dir)?;
        std::fs::write(&path, self.buffer.join("\n") + "\n")?;
        Ok(path)
    }
}

impl WorkerObserver for LoggingListener {
    fn on_start(&mut self, command: &str) {
        self.buffer.push(command.to_string());
    }

    fn on_line(&mut self, line: &str) {
        self.buffer.push(line.to_string());
    }

    fn on_end(&mut self) {
        if self.write_log {
            if let Err(e) = self.write() {
                warn!("failed to write transcode log: {}", e);
            }
        }
    }

    fn on_failed(&mut self, _message: &str) {
        match self.write() {
            Ok(path) => error!("transcode failed, log written to '{}'", path.display()),
            Err(e) => error!("transcode failed and the log could not be written: {}", e),
        }
    }
}

/// Reports progress every few percent: position, frames, FPS, ETA and speed
pub struct ProgressListener {
    /// Rational average framerate of the first video stream, 1 if absent
    framerate: f64,

    /// Input duration in seconds, 0 if unknown
    duration: f64,

    last_percent: i64,
    started: Option<Instant>,
}

impl ProgressListener {
    pub fn new(input: &InputMedia) -> Self {
        let framerate = input
            .first_video_stream()
            .and_then(|s| s.avg_frame_rate())
            .unwrap_or(1.0);
        Self {
            framerate,
            duration: input.duration().unwrap_or(0.0),
            last_percent: 0,
            started: None,
        }
    }

    fn should_report(&mut self, percent: i64) -> bool {
        if percent > self.last_percent && percent % REPORT_STEP_PERCENT == 0 {
            self.last_percent = percent;
            true
        } else {
            false
        }
    }
}

impl WorkerObserver for ProgressListener {
    fn on_start(&mut self, _command: &str) {
        self.started = Some(Instant::now());
    }

    fn on_progress(&mut self, progress: &Progress) {
        let percent = progress.percent.floor() as i64;
        if !self.should_report(percent) {
            return;
        }

        let elapsed = self
            .started
            .map(|s| s.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let total_frames = self.duration * self.framerate;
        let eta = if progress.current_fps > 0.0 {
            (total_frames - progress.frames as f64) / progress.current_fps
        } else {
            f64::INFINITY
        };
        let speed = if self.framerate > 0.0 {
            progress.current_fps / self.framerate
        } else {
            0.0
        };

        info!(
            "{:>3}% frame={} time={} fps={:.1} elapsed={} eta={} speed={:.2}x",
            percent,
            progress.frames,
            progress.timemark,
            progress.current_fps,
            crate::utils::format_duration(elapsed),
            crate::utils::format_duration(eta),
            speed
        );
    }
}

/// Success and failure side effects on the filesystem
///
/// Success: ownership adjustment, the exclude-list append, and the optional
/// input deletion. Failure: best-effort removal of the planned outputs.
pub struct PostListener {
    input_file: PathBuf,
    input_relative: PathBuf,
    outputs: Vec<PathBuf>,
    output_root: PathBuf,
    delete_after_process: bool,
}

impl PostListener {
    pub fn new(
        input: &InputMedia,
        outputs: &[OutputMedia],
        input_root: &Path,
        output_root: &Path,
        delete_after_process: bool,
    ) -> Self {
        Self {
            input_file: input.path.resolve(input_root),
            input_relative: input.path.relative(),
            outputs: outputs.iter().map(|o| o.path.resolve(output_root)).collect(),
            output_root: output_root.to_path_buf(),
            delete_after_process,
        }
    }

    /// Reassign ownership of each output and its ancestors up to (but not
    /// including) the output root
    #[cfg(unix)]
    fn adjust_ownership(&self, uid: u32, gid: u32) {
        use std::os::unix::fs::MetadataExt;

        for output in &self.outputs {
            let mut current: &Path = output.as_path();
            loop {
                if current == self.output_root || !current.starts_with(&self.output_root) {
                    break;
                }
                match std::fs::metadata(current) {
                    Ok(meta) if meta.uid() != uid || meta.gid() != gid => {
                        if let Err(e) = std::os::unix::fs::chown(current, Some(uid), Some(gid)) {
                            warn!("failed to chown '{}': {}", current.display(), e);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!("failed to stat '{}': {}", current.display(), e),
                }
                match current.parent() {
                    Some(parent) => current = parent,
                    None => break,
                }
            }
        }
    }

    fn append_exclude(&self) -> std::io::Result<()> {
        let path = self.output_root.join(EXCLUDE_LIST_FILE);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", self.input_relative.display())
    }
}

impl WorkerObserver for PostListener {
    fn on_end(&mut self) {
        #[cfg(unix)]
        {
            let uid = std::env::var("UID").ok().and_then(|v| v.parse::<u32>().ok());
            let gid = std::env::var("GID").ok().and_then(|v| v.parse::<u32>().ok());
            if let (Some(uid), Some(gid)) = (uid, gid) {
                self.adjust_ownership(uid, gid);
            }
        }

        if let Err(e) = self.append_exclude() {
            error!("failed to record '{}' as processed: {}", self.input_relative.display(), e);
        }

        if self.delete_after_process {
            if let Err(e) = std::fs::remove_file(&self.input_file) {
                warn!("failed to delete input '{}': {}", self.input_file.display(), e);
            }
        }
    }

    fn on_failed(&mut self, _message: &str) {
        for output in &self.outputs {
            match std::fs::remove_file(output) {
                Ok(()) => info!("removed partial output '{}'", output.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to remove '{}': {}", output.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaPath, OutputStream};
    use serde_json::Map;
    use tempfile::TempDir;

    fn input_media(stem: &str) -> InputMedia {
        let mut format = Map::new();
        format.insert("duration".into(), serde_json::Value::String("100.0".into()));
        InputMedia {
            id: 0,
            path: MediaPath::new("subdir", stem, "mp4"),
            params: vec![],
            streams: vec![],
            format,
            chapters: vec![],
        }
    }

    fn output_media(stem: &str) -> OutputMedia {
        OutputMedia {
            id: 0,
            source: 0,
            path: MediaPath::new("subdir", stem, "mkv"),
            params: vec![],
            streams: vec![OutputStream {
                index: 0,
                source: 0,
                params: vec![],
            }],
            chapter: None,
        }
    }

    #[test]
    fn test_logging_listener_writes_on_failure() {
        let dir = TempDir::new().unwrap();
        let mut listener = LoggingListener::new(false, dir.path(), "film");

        listener.on_start("ffmpeg -i film.mp4 film.mkv");
        listener.on_line("Stream mapping:");
        listener.on_failed("boom");

        let logs: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".log"))
            .collect();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].file_name().to_string_lossy().starts_with("film."));

        let contents = std::fs::read_to_string(logs[0].path()).unwrap();
        assert!(contents.contains("ffmpeg -i film.mp4 film.mkv"));
        assert!(contents.contains("Stream mapping:"));
    }

    #[test]
    fn test_logging_listener_success_respects_write_log() {
        let dir = TempDir::new().unwrap();
        let mut silent = LoggingListener::new(false, dir.path(), "film");
        silent.on_start("cmd");
        silent.on_end();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let mut verbose = LoggingListener::new(true, dir.path(), "film");
        verbose.on_start("cmd");
        verbose.on_end();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_progress_reporting_steps() {
        let mut listener = ProgressListener::new(&input_media("film"));

        assert!(!listener.should_report(3));
        assert!(listener.should_report(5));
        assert!(!listener.should_report(5));
        assert!(!listener.should_report(7));
        assert!(listener.should_report(10));
        assert!(!listener.should_report(9));
    }

    fn post_listener(dir: &TempDir, delete_after: bool) -> (PostListener, PathBuf, PathBuf) {
        let input_root = dir.path().join("in");
        let output_root = dir.path().join("out");
        std::fs::create_dir_all(input_root.join("subdir")).unwrap();
        std::fs::create_dir_all(output_root.join("subdir")).unwrap();

        let input = input_media("film");
        let input_file = input.path.resolve(&input_root);
        std::fs::write(&input_file, b"input").unwrap();

        let output = output_media("film");
        let output_file = output.path.resolve(&output_root);

        let listener = PostListener::new(&input, &[output], &input_root, &output_root, delete_after);
        (listener, input_file, output_file)
    }

    #[test]
    fn test_post_success_appends_exclude_once() {
        let dir = TempDir::new().unwrap();
        let (mut listener, input_file, _) = post_listener(&dir, false);

        listener.on_end();

        let exclude = dir.path().join("out").join(EXCLUDE_LIST_FILE);
        let contents = std::fs::read_to_string(&exclude).unwrap();
        assert_eq!(contents, "subdir/film.mp4\n");
        assert!(input_file.exists());
    }

    #[test]
    fn test_post_success_deletes_input_when_asked() {
        let dir = TempDir::new().unwrap();
        let (mut listener, input_file, _) = post_listener(&dir, true);

        listener.on_end();
        assert!(!input_file.exists());
    }

    #[test]
    fn test_post_failure_removes_outputs() {
        let dir = TempDir::new().unwrap();
        let (mut listener, _, output_file) = post_listener(&dir, false);
        std::fs::write(&output_file, b"partial").unwrap();

        listener.on_failed("boom");
        assert!(!output_file.exists());

        // a second run with the file already gone is a no-op
        listener.on_failed("boom again");
        assert!(!output_file.exists());
    }
}
