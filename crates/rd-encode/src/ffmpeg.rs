//! ffmpeg-backed [`EncodeRunner`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use rd_core::{Error, FormatProfile, Result};

use crate::command::ToolCommand;
use crate::output::{partial_path, remove_partial_output};
use crate::runner::{EncodeContext, EncodeRequest, EncodeRunner};
use crate::tools::ToolRegistry;

/// Hard ceiling on a single ffmpeg invocation. The orchestrator normally
/// enforces a tighter per-task deadline through cancellation.
const ENCODE_TIMEOUT: Duration = Duration::from_secs(86400);

/// Timeout for the duration probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Choose a CRF value based on output height.
///
/// Smaller renditions tolerate a higher CRF; the ladder tops out at 22 for
/// anything above 1080p.
pub fn adaptive_crf(height: u32) -> u32 {
    if height <= 480 {
        26
    } else if height <= 720 {
        24
    } else if height <= 1080 {
        23
    } else {
        22
    }
}

/// Encodes one rendition with ffmpeg, reporting progress parsed from
/// `-progress` output.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    ffmpeg: PathBuf,
    ffprobe: Option<PathBuf>,
}

impl FfmpegRunner {
    pub fn new(ffmpeg: PathBuf, ffprobe: Option<PathBuf>) -> Self {
        Self { ffmpeg, ffprobe }
    }

    /// Build a runner from discovered tools. ffprobe is optional; without it
    /// no progress is reported.
    pub fn from_registry(tools: &ToolRegistry) -> Result<Self> {
        let ffmpeg = tools.require("ffmpeg")?.to_path_buf();
        let ffprobe = tools.get("ffprobe").map(Path::to_path_buf);
        if ffprobe.is_none() {
            tracing::warn!("ffprobe not found; encode progress will not be reported");
        }
        Ok(Self::new(ffmpeg, ffprobe))
    }

    async fn probe_duration(&self, source: &Path) -> Option<f64> {
        let ffprobe = self.ffprobe.as_ref()?;
        let output = ToolCommand::new(ffprobe.clone())
            .args(["-v", "error", "-show_entries", "format=duration"])
            .args(["-of", "json"])
            .arg(source)
            .timeout(PROBE_TIMEOUT)
            .execute()
            .await;

        match output {
            Ok(out) => parse_probe_duration(&out.stdout),
            Err(e) => {
                tracing::debug!(source = %source.display(), "Duration probe failed: {e}");
                None
            }
        }
    }
}

/// Extract `format.duration` from ffprobe's JSON output.
fn parse_probe_duration(json: &str) -> Option<f64> {
    let value: serde_json::Value = serde_json::from_str(json).ok()?;
    value["format"]["duration"]
        .as_str()?
        .parse::<f64>()
        .ok()
        .filter(|d| *d > 0.0)
}

#[async_trait]
impl EncodeRunner for FfmpegRunner {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn run(&self, request: &EncodeRequest, ctx: &EncodeContext) -> Result<PathBuf> {
        check_source(&request.source).await?;

        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let duration = self.probe_duration(&request.source).await;
        let partial = partial_path(&request.output);
        let profile = &request.profile;

        tracing::info!(
            job_id = %request.job_id,
            profile = %profile.name,
            "Encoding {:?} -> {:?} ({}, {}, preset={})",
            request.source,
            request.output,
            profile.size(),
            profile.video_codec,
            profile.preset,
        );

        let mut cmd = ToolCommand::new(self.ffmpeg.clone());
        cmd.timeout(ENCODE_TIMEOUT);
        cmd.args(build_args(profile, &request.source, &partial));

        let progress = ctx.progress.clone();
        let result = cmd
            .execute_with_stderr_callback(
                move |line| match parse_out_time(line) {
                    Some(Some(secs)) => {
                        if let Some(total) = duration {
                            progress.send((secs / total).clamp(0.0, 1.0) as f32);
                        }
                        true
                    }
                    Some(None) => true,
                    None => false,
                },
                &ctx.cancellation,
            )
            .await;

        if let Err(e) = result {
            remove_partial_output(&partial).await;
            return Err(e);
        }

        match tokio::fs::metadata(&partial).await {
            Ok(meta) if meta.len() > 0 => {}
            _ => {
                remove_partial_output(&partial).await;
                return Err(Error::tool("ffmpeg", "encode produced no output"));
            }
        }

        if let Err(e) = tokio::fs::rename(&partial, &request.output).await {
            remove_partial_output(&partial).await;
            return Err(e.into());
        }

        Ok(request.output.clone())
    }
}

async fn check_source(source: &Path) -> Result<()> {
    let meta = tokio::fs::metadata(source)
        .await
        .map_err(|e| Error::Source(format!("{}: {e}", source.display())))?;
    if !meta.is_file() {
        return Err(Error::Source(format!(
            "{} is not a regular file",
            source.display()
        )));
    }
    Ok(())
}

/// Build the ffmpeg argument list for one rendition.
///
/// Paths are passed through as `OsString`s so non-UTF-8 names reach ffmpeg
/// unchanged.
pub fn build_args(profile: &FormatProfile, input: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-hide_banner",
        "-nostdin",
        "-y",
        "-loglevel",
        "error",
        "-progress",
        "pipe:2",
        "-nostats",
        "-i",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(input.into());

    let mut options = vec![
        "-vf".to_string(),
        format!("scale={}:{}", profile.width, profile.height),
        "-c:v".to_string(),
        profile.video_codec.clone(),
        "-preset".to_string(),
        profile.preset.clone(),
    ];

    match &profile.video_bitrate {
        Some(bitrate) => options.extend(["-b:v".to_string(), bitrate.clone()]),
        None => {
            let crf = profile.crf.unwrap_or_else(|| adaptive_crf(profile.height));
            options.extend(["-crf".to_string(), crf.to_string()]);
        }
    }

    options.extend([
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        profile.audio_bitrate.clone(),
    ]);

    if matches!(profile.container.as_str(), "mp4" | "mov" | "m4v") {
        options.extend(["-movflags".to_string(), "+faststart".to_string()]);
    }

    args.extend(options.into_iter().map(OsString::from));
    args.push(output.into());
    args
}

/// Classify one stderr line from `-progress pipe:2`.
///
/// Returns `None` for ordinary log output, `Some(None)` for a progress
/// key/value line without timing, and `Some(Some(seconds))` for an
/// `out_time_us` report.
fn parse_out_time(line: &str) -> Option<Option<f64>> {
    let (key, value) = line.split_once('=')?;
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return None;
    }
    if key == "out_time_us" {
        Some(value.trim().parse::<f64>().ok().map(|us| us / 1_000_000.0))
    } else {
        Some(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn adaptive_crf_by_height() {
        assert_eq!(adaptive_crf(360), 26);
        assert_eq!(adaptive_crf(720), 24);
        assert_eq!(adaptive_crf(1080), 23);
        assert_eq!(adaptive_crf(2160), 22);
    }

    #[test]
    fn probe_duration_from_json() {
        let json = r#"{ "format": { "duration": "12.480000" } }"#;
        assert_eq!(parse_probe_duration(json), Some(12.48));
        assert_eq!(parse_probe_duration(r#"{ "format": { "duration": "N/A" } }"#), None);
        assert_eq!(parse_probe_duration(r#"{ "format": {} }"#), None);
        assert_eq!(parse_probe_duration("not json"), None);
    }

    #[test]
    fn args_scale_and_crf() {
        let profile = FormatProfile::new("720p", 1280, 720);
        let args = build_args(&profile, Path::new("/in.mov"), Path::new("/out/720p.mp4"));

        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("-i") + 1], "/in.mov");
        assert_eq!(args[pos("-vf") + 1], "scale=1280:720");
        assert_eq!(args[pos("-c:v") + 1], "libx264");
        assert_eq!(args[pos("-crf") + 1], "24");
        assert_eq!(args[pos("-movflags") + 1], "+faststart");
        assert_eq!(args.last().unwrap(), "/out/720p.mp4");
        assert!(!args.iter().any(|a| a == "-b:v"));
    }

    #[test]
    fn args_bitrate_overrides_crf() {
        let mut profile = FormatProfile::new("360p", 640, 360);
        profile.video_bitrate = Some("800k".into());
        profile.container = "webm".into();
        let args = build_args(&profile, Path::new("/in.mov"), Path::new("/out/360p.webm"));
        assert!(args.iter().any(|a| a == "800k"));
        assert!(!args.iter().any(|a| a == "-crf"));
        assert!(!args.iter().any(|a| a == "-movflags"));
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_paths_pass_through_unchanged() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let input = Path::new(OsStr::from_bytes(b"/uploads/clip-\xff.mov"));
        let output = Path::new(OsStr::from_bytes(b"/out/\xfe/720p.mp4"));
        let profile = FormatProfile::new("720p", 1280, 720);
        let args = build_args(&profile, input, output);

        let pos = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[pos + 1].as_os_str(), input.as_os_str());
        assert_eq!(args.last().unwrap().as_os_str(), output.as_os_str());
    }

    #[test]
    fn progress_lines_classified() {
        assert_eq!(parse_out_time("out_time_us=2500000"), Some(Some(2.5)));
        assert_eq!(parse_out_time("progress=continue"), Some(None));
        assert_eq!(parse_out_time("out_time_us=N/A"), Some(None));
        assert_eq!(parse_out_time("Error opening input file"), None);
        assert_eq!(parse_out_time("[h264 @ 0x55] bad option=1"), None);
    }

    #[tokio::test]
    async fn missing_source_is_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FfmpegRunner::new(PathBuf::from("ffmpeg"), None);
        let request = EncodeRequest {
            job_id: rd_core::JobId::new(),
            source: dir.path().join("missing.mov"),
            output: dir.path().join("out/360p.mp4"),
            profile: FormatProfile::new("360p", 640, 360),
        };
        let result = runner.run(&request, &EncodeContext::new()).await;
        assert_matches!(result, Err(Error::Source(_)));
        assert!(!request.output.exists());
    }

    #[tokio::test]
    async fn failed_encode_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mov");
        std::fs::write(&source, b"not really video").unwrap();

        // `false` stands in for an encoder that exits non-zero.
        let runner = FfmpegRunner::new(PathBuf::from("false"), None);
        let request = EncodeRequest {
            job_id: rd_core::JobId::new(),
            source,
            output: dir.path().join("out/720p.mp4"),
            profile: FormatProfile::new("720p", 1280, 720),
        };
        let result = runner.run(&request, &EncodeContext::new()).await;
        assert!(result.is_err());
        assert!(!request.output.exists());
        assert!(!partial_path(&request.output).exists());
    }
}
