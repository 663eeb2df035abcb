// Core library for the ffauto transcoding daemon
// Contains the profile model, snippet engine, planner, worker and queue

pub mod constants;
pub mod error;
pub mod filter;
pub mod listeners;
pub mod mapper;
pub mod mapping;
pub mod media;
pub mod predicate;
pub mod probe;
pub mod profile;
pub mod scheduler;
pub mod snippet;
pub mod utils;
pub mod watcher;
pub mod worker;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use filter::{ExcludeListFilter, ExtensionFilter, PathFilter, ProbeFilter};
pub use listeners::{register_default_listeners, LoggingListener, PostListener, ProgressListener};
pub use mapper::ProfileMapper;
pub use mapping::{MappingBuilder, PostResolver};
pub use media::{
    Chapter, CodecType, InputMedia, InputStream, MediaPath, OutputMedia, OutputStream,
};
pub use predicate::Predicate;
pub use probe::{probe, ProbeData};
pub use profile::{InputConfig, Mapping, MappingOption, OutputConfig, Profile, StreamSelector};
pub use scheduler::{Processor, Scheduler};
pub use snippet::{SnippetContext, SnippetResolver};
pub use watcher::{Dispatch, WatchEvent, Watcher};
pub use worker::{Progress, Worker, WorkerObserver};
