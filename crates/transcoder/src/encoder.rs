use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use crate::error::EncoderError;
use crate::ffprobe;
use crate::params::{ProcessingParams, RateControl};

/// Everything the encoder needs to produce one output
#[derive(Debug, Clone, Copy)]
pub struct EncodeRequest<'a> {
    pub object_name: &'a str,
    /// One path, or several to be concatenated in order
    pub inputs: &'a [PathBuf],
    pub output: &'a Path,
    pub params: &'a ProcessingParams,
}

/// Captured result of a successful encode
#[derive(Debug, Clone)]
pub struct EncodeOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Produces an output file from one or more inputs
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn transcode(&self, request: EncodeRequest<'_>) -> Result<EncodeOutput, EncoderError>;
}

/// Encoder backed by the ffmpeg and ffprobe binaries
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg_bin: PathBuf,
    ffprobe_bin: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>, ffprobe_bin: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
        }
    }
}

/// Path of the concat playlist written next to the output
pub fn playlist_path(output: &Path) -> PathBuf {
    output.with_extension("ffconcat")
}

/// ffconcat playlist listing `inputs` in order
pub fn build_playlist(inputs: &[PathBuf]) -> String {
    let mut playlist = String::from("ffconcat version 1.0\n");
    for input in inputs {
        // single quotes are closed, escaped and reopened
        let escaped = input.to_string_lossy().replace('\'', r"'\''");
        playlist.push_str(&format!("file '{}'\n", escaped));
    }
    playlist
}

/// Output options for ffmpeg; `coded_res` is the measured source resolution
pub fn build_output_args(params: &ProcessingParams, coded_res: Option<[u32; 2]>) -> Vec<String> {
    let mut ffmpeg_args = Vec::new();

    ffmpeg_args.push("-c:v".to_string());
    ffmpeg_args.push(params.video_codec.clone());

    if !params.is_passthrough() {
        if let Some(pix_fmt) = &params.pix_fmt {
            ffmpeg_args.push("-pix_fmt".to_string());
            ffmpeg_args.push(pix_fmt.clone());
        }
    }

    match params.rate_control() {
        Some(RateControl::Crf(crf)) => {
            ffmpeg_args.push("-crf".to_string());
            ffmpeg_args.push(crf.to_string());
        }
        Some(RateControl::Qp(qp)) => {
            ffmpeg_args.push("-qp".to_string());
            ffmpeg_args.push(qp.to_string());
        }
        None => {}
    }

    for lang in &params.langs {
        ffmpeg_args.push("-map".to_string());
        ffmpeg_args.push(format!("0:m:language:{}", lang));
    }

    if params.resize && coded_res != Some(params.target_res) {
        ffmpeg_args.push("-vf".to_string());
        ffmpeg_args.push(format!("scale={}:{}", params.target_width(), params.target_height()));
    }

    // Audio and subtitles: copy
    ffmpeg_args.push("-c:a".to_string());
    ffmpeg_args.push("copy".to_string());
    ffmpeg_args.push("-c:s".to_string());
    ffmpeg_args.push("copy".to_string());

    ffmpeg_args
}

/// Full ffmpeg argument list; `input` is either a media file or a concat playlist
pub fn build_ffmpeg_args(
    input: &Path,
    concat: bool,
    output: &Path,
    params: &ProcessingParams,
    coded_res: Option<[u32; 2]>,
) -> Vec<String> {
    let mut ffmpeg_args = vec![
        "-nostdin".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-y".to_string(),
    ];

    if concat {
        ffmpeg_args.push("-f".to_string());
        ffmpeg_args.push("concat".to_string());
        ffmpeg_args.push("-safe".to_string());
        ffmpeg_args.push("0".to_string());
    }
    ffmpeg_args.push("-i".to_string());
    ffmpeg_args.push(input.to_string_lossy().into_owned());

    ffmpeg_args.extend(build_output_args(params, coded_res));
    ffmpeg_args.push(output.to_string_lossy().into_owned());
    ffmpeg_args
}

impl FfmpegEncoder {
    async fn run(&self, args: &[String]) -> Result<EncodeOutput, EncoderError> {
        debug!("ffmpeg command: {} {}", self.ffmpeg_bin.display(), args.join(" "));

        let start = Instant::now();
        let output = Command::new(&self.ffmpeg_bin)
            .args(args)
            .output()
            .await
            .map_err(|e| EncoderError::Launch(format!("{}: {}", self.ffmpeg_bin.display(), e)))?;
        let duration = start.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(EncoderError::Failed {
                exit_code: output.status.code().unwrap_or(-1),
                stdout,
                stderr,
            });
        }

        Ok(EncodeOutput {
            stdout,
            stderr,
            duration,
        })
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn transcode(&self, request: EncodeRequest<'_>) -> Result<EncodeOutput, EncoderError> {
        let first = request
            .inputs
            .first()
            .ok_or_else(|| EncoderError::Launch(format!("{} has no inputs", request.object_name)))?;

        let coded_res = if request.params.resize {
            ffprobe::probe_file(&self.ffprobe_bin, first).await?.coded_resolution()
        } else {
            None
        };

        if request.inputs.len() == 1 {
            let args = build_ffmpeg_args(first, false, request.output, request.params, coded_res);
            return self.run(&args).await;
        }

        // The concat demuxer resolves relative entries against the playlist location
        let mut absolute = Vec::with_capacity(request.inputs.len());
        for input in request.inputs {
            absolute.push(tokio::fs::canonicalize(input).await?);
        }
        let playlist = playlist_path(request.output);
        tokio::fs::write(&playlist, build_playlist(&absolute)).await?;

        let args = build_ffmpeg_args(&playlist, true, request.output, request.params, coded_res);
        let result = self.run(&args).await;

        if let Err(e) = tokio::fs::remove_file(&playlist).await {
            debug!("Failed to remove playlist {}: {}", playlist.display(), e);
        }
        result
    }
}
