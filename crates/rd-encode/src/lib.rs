//! # rd-encode
//!
//! The encode task runner and the external tooling underneath it.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout and
//!   cancellation support that kills the child process when either fires.
//! - **Runner contract** ([`EncodeRunner`]) -- one `(source, profile)` encode
//!   per call, reporting an output path or an error.
//! - **ffmpeg runner** ([`FfmpegRunner`]) -- the production implementation.
//! - **Output layout** ([`rendition_path`]) -- collision-free output paths
//!   derived from job id and profile name.

pub mod command;
pub mod ffmpeg;
pub mod output;
pub mod runner;
pub mod tools;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use ffmpeg::{adaptive_crf, FfmpegRunner};
pub use output::{partial_path, remove_partial_output, rendition_path};
pub use runner::{EncodeContext, EncodeRequest, EncodeRunner, ProgressSender};
pub use tools::{ToolInfo, ToolRegistry};
