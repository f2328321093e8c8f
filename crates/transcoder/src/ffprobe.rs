use std::path::Path;
use serde::Deserialize;
use tokio::process::Command;
use log::debug;
use crate::error::EncoderError;

/// Subset of ffprobe's JSON output used by the pipeline
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    pub streams: Vec<FFProbeStream>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeStream {
    pub index: i32,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub coded_width: Option<u32>,
    pub coded_height: Option<u32>,
}

impl FFProbeData {
    /// Coded [width, height] of the first video stream
    pub fn coded_resolution(&self) -> Option<[u32; 2]> {
        let video = self
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))?;
        let width = video.coded_width.filter(|w| *w > 0).or(video.width)?;
        let height = video.coded_height.filter(|h| *h > 0).or(video.height)?;
        Some([width, height])
    }
}

/// Run ffprobe and parse the JSON output
pub async fn probe_file(ffprobe_bin: &Path, file_path: &Path) -> Result<FFProbeData, EncoderError> {
    let probe_err = |message: String| EncoderError::Probe {
        path: file_path.to_path_buf(),
        message,
    };

    if !file_path.exists() {
        return Err(probe_err("file does not exist".to_string()));
    }

    debug!("ffprobe: probing {}", file_path.display());

    let output = Command::new(ffprobe_bin)
        .arg("-v")
        .arg("error")
        .arg("-print_format")
        .arg("json")
        .arg("-show_streams")
        .arg(file_path)
        .output()
        .await
        .map_err(|e| probe_err(format!("failed to execute ffprobe: {}", e)))?;

    if !output.status.success() {
        return Err(probe_err(format!(
            "ffprobe exit code {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    serde_json::from_slice(&output.stdout)
        .map_err(|e| probe_err(format!("failed to parse ffprobe JSON: {}", e)))
}
