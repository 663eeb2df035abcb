// Transcode worker: one plan, one ffmpeg invocation
// Assembles the command line, streams stderr as events and guards single use

use log::debug;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::constants::transcoder::{FFMPEG, MAX_STDERR_LINES};
use crate::error::{CoreError, Result};
use crate::media::{InputMedia, OutputMedia};
use crate::utils::parse_time_to_seconds;

/// Progress information parsed from the transcoder's stderr
#[derive(Debug, Clone)]
pub struct Progress {
    /// Current frame count
    pub frames: u64,

    /// Current encoding speed in frames per second
    pub current_fps: f64,

    /// Raw timemark, e.g. `"00:01:23.45"`
    pub timemark: String,

    /// Timemark parsed to seconds
    pub seconds: f64,

    /// Position in the input, 0-100; 0 when the input duration is unknown
    pub percent: f64,

    /// Realtime factor reported by the transcoder, e.g. 1.5 for `1.5x`
    pub speed: f64,
}

/// Fixed observer interface over the worker's lifecycle events
///
/// `on_start` precedes all `on_progress`/`on_line` calls, which precede
/// exactly one of `on_end` or `on_failed`.
pub trait WorkerObserver: Send {
    fn on_start(&mut self, _command: &str) {}
    fn on_progress(&mut self, _progress: &Progress) {}
    fn on_line(&mut self, _line: &str) {}
    fn on_end(&mut self) {}
    fn on_failed(&mut self, _message: &str) {}
}

/// Executes one resolved plan through the external transcoder
///
/// Single-use: a second `execute` fails with `AlreadyExecuted`.
pub struct Worker {
    input: InputMedia,
    outputs: Vec<OutputMedia>,
    input_root: PathBuf,
    output_root: PathBuf,
    observers: Vec<Box<dyn WorkerObserver>>,
    executed: bool,
}

impl Worker {
    pub fn new(
        input: InputMedia,
        outputs: Vec<OutputMedia>,
        input_root: &Path,
        output_root: &Path,
    ) -> Self {
        Self {
            input,
            outputs,
            input_root: input_root.to_path_buf(),
            output_root: output_root.to_path_buf(),
            observers: Vec::new(),
            executed: false,
        }
    }

    pub fn register(&mut self, observer: Box<dyn WorkerObserver>) {
        self.observers.push(observer);
    }

    pub fn input(&self) -> &InputMedia {
        &self.input
    }

    pub fn outputs(&self) -> &[OutputMedia] {
        &self.outputs
    }

    /// The transcoder argument vector, in plan order
    ///
    /// Input options and path first, then for each output its stream
    /// options, its media options and its path. Parameters are split on
    /// whitespace into argv tokens.
    pub fn command_args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();

        for param in &self.input.params {
            args.extend(split_tokens(param));
        }
        args.push("-i".to_string());
        args.push(self.input.path.resolve(&self.input_root).to_string_lossy().into_owned());

        for output in &self.outputs {
            for stream in &output.streams {
                for param in &stream.params {
                    args.extend(split_tokens(param));
                }
            }
            for param in &output.params {
                args.extend(split_tokens(param));
            }
            args.push(output.path.resolve(&self.output_root).to_string_lossy().into_owned());
        }

        args
    }

    /// Run the transcoder to completion, emitting lifecycle events
    pub async fn execute(&mut self) -> Result<()> {
        if self.executed {
            return Err(CoreError::AlreadyExecuted(self.input.path.file_name()));
        }
        self.executed = true;

        // Every output directory must exist before the transcoder starts
        for output in &self.outputs {
            if let Some(parent) = output.path.resolve(&self.output_root).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let args = self.command_args();
        let command_line = format!("{} {}", FFMPEG, args.join(" "));
        debug!("spawning: {}", command_line);

        for observer in &mut self.observers {
            observer.on_start(&command_line);
        }

        let mut child = match Command::new(FFMPEG)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let message = format!("failed to start {}: {}", FFMPEG, e);
                self.emit_failed(&message);
                return Err(CoreError::TranscodeFailed(message));
            }
        };

        let duration = self.input.duration().unwrap_or(0.0);
        let mut buffer: Vec<String> = Vec::new();

        let stderr = child.stderr.take();
        if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        interrupt(&child);
                        let message = format!("lost the transcoder's stderr: {}", e);
                        self.emit_failed(&message);
                        return Err(CoreError::TranscodeFailed(message));
                    }
                };

                if buffer.len() < MAX_STDERR_LINES {
                    buffer.push(line.clone());
                } else if buffer.len() == MAX_STDERR_LINES {
                    buffer.push("... (output truncated) ...".to_string());
                }

                if let Some(progress) = parse_progress(&line, duration) {
                    for observer in &mut self.observers {
                        observer.on_progress(&progress);
                    }
                    continue;
                }
                if is_noise(&line) {
                    continue;
                }
                for observer in &mut self.observers {
                    observer.on_line(&line);
                }
            }
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => {
                interrupt(&child);
                let message = format!("failed to wait for {}: {}", FFMPEG, e);
                self.emit_failed(&message);
                return Err(CoreError::TranscodeFailed(message));
            }
        };

        if status.success() {
            for observer in &mut self.observers {
                observer.on_end();
            }
            return Ok(());
        }

        interrupt(&child);
        let message = error_message(&buffer, status.code());
        self.emit_failed(&message);
        Err(CoreError::TranscodeFailed(message))
    }

    fn emit_failed(&mut self, message: &str) {
        for observer in &mut self.observers {
            observer.on_failed(message);
        }
    }
}

fn split_tokens(param: &str) -> Vec<String> {
    param.split_whitespace().map(str::to_string).collect()
}

/// Send SIGINT so the transcoder can clean up its own temporaries
fn interrupt(child: &Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as i32, libc::SIGINT);
        }
    }
}

/// Progress and prompt noise the observers should not see as lines
fn is_noise(line: &str) -> bool {
    static PROGRESS: &str = r"^frame=\s*\d+";
    Regex::new(PROGRESS).map(|re| re.is_match(line)).unwrap_or(false) || line.contains("Press ")
}

/// Parse a `frame= 1234 fps= 45 ... time=00:01:23.45 ... speed=1.5x` line
fn parse_progress(line: &str, duration: f64) -> Option<Progress> {
    let frame_re = Regex::new(r"^frame=\s*(\d+)").ok()?;
    let frames: u64 = frame_re.captures(line)?.get(1)?.as_str().parse().ok()?;

    let capture = |pattern: &str| -> Option<String> {
        Regex::new(pattern)
            .ok()?
            .captures(line)?
            .get(1)
            .map(|m| m.as_str().to_string())
    };

    let current_fps: f64 = capture(r"fps=\s*([\d.]+)")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0);
    let timemark = capture(r"time=\s*(\S+)").unwrap_or_default();
    let seconds = parse_time_to_seconds(&timemark);
    let speed: f64 = capture(r"speed=\s*([\d.]+)x")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0);

    let percent = if duration > 0.0 {
        (seconds / duration * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    Some(Progress {
        frames,
        current_fps,
        timemark,
        seconds,
        percent,
        speed,
    })
}

/// Error text for a failed run: exit code plus the buffered stderr, trimmed
/// of trailing blank lines
fn error_message(buffer: &[String], code: Option<i32>) -> String {
    let mut lines: Vec<&str> = buffer.iter().map(String::as_str).collect();
    while lines.last().map(|l| l.trim().is_empty()).unwrap_or(false) {
        lines.pop();
    }

    let code = code
        .map(|c| format!("exit code {}", c))
        .unwrap_or_else(|| "killed by signal".to_string());
    if lines.is_empty() {
        format!("{} ({})", FFMPEG, code)
    } else {
        format!("{} ({})\n{}", FFMPEG, code, lines.join("\n"))
    }
}
