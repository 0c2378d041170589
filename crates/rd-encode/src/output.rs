//! Rendition output layout.
//!
//! Every output lives at `<output_dir>/<job_id>/<profile>.<container>`.
//! Job ids are unique and profile names are unique within a job, so no two
//! tasks ever write the same file, even when a source is transcoded twice.

use std::path::{Path, PathBuf};

use rd_core::{FormatProfile, JobId};

/// Final output path for one task.
pub fn rendition_path(output_dir: &Path, job_id: JobId, profile: &FormatProfile) -> PathBuf {
    output_dir.join(job_id.to_string()).join(profile.file_name())
}

/// Path an encode writes to before being renamed into place.
///
/// Keeps the container extension so the encoder can still infer the muxer.
pub fn partial_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    let name = match output.extension() {
        Some(ext) => format!("{stem}.partial.{}", ext.to_string_lossy()),
        None => format!("{stem}.partial"),
    };
    output.with_file_name(name)
}

/// Best-effort removal of a partial or stale output file.
pub async fn remove_partial_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), "Failed to remove partial output: {e}"),
    }
}
