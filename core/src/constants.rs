// Constants used throughout the application
// Centralizes magic numbers for maintainability

/// External tool names, resolved from PATH
pub mod transcoder {
    /// Transcoder binary
    pub const FFMPEG: &str = "ffmpeg";

    /// Probe binary
    pub const FFPROBE: &str = "ffprobe";

    /// Maximum stderr lines to buffer (prevent memory exhaustion)
    pub const MAX_STDERR_LINES: usize = 1000;
}

/// Scheduler timing
pub mod scheduler {
    /// Settle window between two tasks, letting just-written files rest
    /// before they potentially become inputs again
    pub const INTER_TASK_DELAY_SECONDS: u64 = 10;
}

/// Watcher timing
pub mod watcher {
    /// Idle period a candidate file must survive before it is processed
    pub const STABILIZATION_WINDOW_SECONDS: u64 = 60;
}

/// Progress reporting
pub mod progress {
    /// Report every N percent
    pub const REPORT_STEP_PERCENT: i64 = 5;
}

/// Persisted state
pub mod state {
    /// Record of inputs already transcoded, one relative path per line
    pub const EXCLUDE_LIST_FILE: &str = "exclude.list";
}
