use serde::{Deserialize, Serialize};
use crate::error::ConfigError;

/// Rate control mode handed to the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateControl {
    /// Constant quantization parameter
    Qp(u32),
    /// Constant rate factor
    Crf(u32),
}

/// Encoding parameters shared by every job of a run.
///
/// Fields are declared in lexicographic order so the serialized form has
/// sorted keys; that text is the body of every lock marker written by the
/// run and is what operators read to see how an object was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingParams {
    /// Language tags of the streams to keep, in mapping order
    pub langs: Vec<String>,
    /// Pixel format; ignored when the codec is `copy`
    pub pix_fmt: Option<String>,
    /// Scale to `target_res` when the source resolution differs
    pub resize: bool,
    pub target_crf: Option<u32>,
    pub target_qp: Option<u32>,
    /// Target [width, height]
    pub target_res: [u32; 2],
    pub video_codec: String,
}

impl ProcessingParams {
    /// Build parameters, rejecting a qp and crf set at the same time
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resize: bool,
        target_width: u32,
        target_height: u32,
        video_codec: impl Into<String>,
        pix_fmt: Option<String>,
        langs: Vec<String>,
        target_qp: Option<u32>,
        target_crf: Option<u32>,
    ) -> Result<Self, ConfigError> {
        let params = Self {
            langs,
            pix_fmt,
            resize,
            target_crf,
            target_qp,
            target_res: [target_width, target_height],
            video_codec: video_codec.into(),
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let (Some(qp), Some(crf)) = (self.target_qp, self.target_crf) {
            return Err(ConfigError::ConflictingRateControl { qp, crf });
        }
        if self.video_codec.trim().is_empty() {
            return Err(ConfigError::Invalid("video codec must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn rate_control(&self) -> Option<RateControl> {
        match (self.target_qp, self.target_crf) {
            (_, Some(crf)) => Some(RateControl::Crf(crf)),
            (Some(qp), None) => Some(RateControl::Qp(qp)),
            (None, None) => None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.video_codec == "copy"
    }

    pub fn target_width(&self) -> u32 {
        self.target_res[0]
    }

    pub fn target_height(&self) -> u32 {
        self.target_res[1]
    }

    /// Canonical text form: sorted keys, 4-space indentation
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        // serde_json only ever writes UTF-8
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Parse a lock marker body back into parameters
    pub fn from_lock_body(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}
