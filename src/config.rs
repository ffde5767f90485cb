use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::redact::{KernelSize, RedactConfig, RedactStrategy, DEFAULT_CLASSES};

/// Directory every relative path is resolved against
pub const DEFAULT_BASE_DIR: &str = "/app/volume";

/// Name of a fresh output file, stamped with the local time
pub fn output_file_name() -> String {
    chrono::Local::now().format("output_%Y%m%d_%H%M%S.mp4").to_string()
}

/// Batching aggregator settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MuxerConfig {
    pub width: u32,
    pub height: u32,
    pub batch_size: u32,
    /// Microseconds to wait for a full batch
    pub batched_push_timeout: u32,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            batch_size: 1,
            batched_push_timeout: 40_000,
        }
    }
}

/// Software H.264 encoder settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncoderConfig {
    pub speed_preset: String,
    /// Kilobits per second
    pub bitrate: u32,
    pub pass: String,
    pub quantizer: u32,
    /// Copy engine used by the converter ahead of the encoder
    pub copy_hw: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            speed_preset: "ultrafast".to_string(),
            bitrate: 4000,
            pass: "qual".to_string(),
            quantizer: 21,
            copy_hw: 2,
        }
    }
}

/// Application settings
///
/// Every field has a default, so a settings file only lists what differs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub base_dir: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    pub infer_config: PathBuf,
    pub classes: BTreeSet<i32>,
    /// `blur` or `fill`
    pub strategy: String,
    /// Blur kernel, `51`, `[51, 31]` or `"51x31"`
    pub kernel_size: KernelSize,
    pub muxer: MuxerConfig,
    pub encoder: EncoderConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            input: PathBuf::from("data/input.mp4"),
            output: Path::new("output").join(output_file_name()),
            infer_config: PathBuf::from("config/config_infer_primary.txt"),
            classes: DEFAULT_CLASSES.into_iter().collect(),
            strategy: "blur".to_string(),
            kernel_size: KernelSize::default(),
            muxer: MuxerConfig::default(),
            encoder: EncoderConfig::default(),
        }
    }
}

impl AppConfig {
    /// Parse settings from JSON
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| PipelineError::InvalidConfig(e.to_string()))
    }

    /// Read settings from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// Make every path absolute and check the settings
    pub fn resolve(mut self) -> Result<Self> {
        if self.base_dir.is_relative() {
            let cwd = std::env::current_dir()
                .map_err(|e| PipelineError::InvalidConfig(format!("current directory: {}", e)))?;
            self.base_dir = cwd.join(&self.base_dir);
        }
        for path in [&mut self.input, &mut self.output, &mut self.infer_config] {
            if path.is_relative() {
                *path = self.base_dir.join(&*path);
            }
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        self.redact_config()?;
        if self.muxer.width == 0 || self.muxer.height == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "frame size {}x{} is empty",
                self.muxer.width, self.muxer.height
            )));
        }
        if self.muxer.batch_size == 0 {
            return Err(PipelineError::InvalidConfig("batch size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// URI the decoder reads from
    pub fn input_uri(&self) -> String {
        format!("file://{}", self.input.display())
    }

    pub fn redact_config(&self) -> Result<RedactConfig> {
        Ok(RedactConfig {
            classes: self.classes.clone(),
            strategy: RedactStrategy::parse(&self.strategy, self.kernel_size)?,
        })
    }
}

/// Returns a version as specified in Cargo.toml
pub fn app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
