// ABOUTME: Sandbox lifecycle manager and execution backend for Capsule
// ABOUTME: Registry, Docker runtime adapter, bounded exec pipeline, and TTL reaper

pub mod error;
pub mod exec;
pub mod provider;
pub mod reaper;
pub mod registry;
pub mod sink;
pub mod templates;

// Re-export commonly used types
pub use error::{ErrorKind, Result, SandboxError};
pub use exec::{
    ExecLimits, ExecOutcome, DEFAULT_TTL_MS, MAX_STREAM_BYTES, MAX_TIMEOUT_MS, REQUEST_BODY_CAP,
};
pub use provider::{DockerProvider, FileEntry};
pub use reaper::{Reaper, REAP_PERIOD};
pub use registry::{Sandbox, SandboxRegistry};
pub use sink::LimitedSink;
pub use templates::Template;
