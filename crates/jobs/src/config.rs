use media_io::{EncoderSettings, DEFAULT_OUTPUT_SUFFIX};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::JobError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Encoder executable. Looked up on PATH when unset.
    pub ffmpeg_path: Option<PathBuf>,
    pub output_suffix: String,
    pub quality: u8,
    pub preset: String,
    pub audio_codec: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let enc = EncoderSettings::default();
        Self {
            ffmpeg_path: None,
            output_suffix: DEFAULT_OUTPUT_SUFFIX.to_string(),
            quality: enc.quality,
            preset: enc.preset,
            audio_codec: enc.audio_codec,
        }
    }
}

impl ControllerConfig {
    pub fn load(path: &Path) -> Result<Self, JobError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| JobError::Config(format!("read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| JobError::Config(format!("parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), JobError> {
        if self.output_suffix.is_empty() {
            return Err(JobError::Config(
                "output_suffix must not be empty; the source would be overwritten".into(),
            ));
        }
        if self.quality > 51 {
            return Err(JobError::Config(format!(
                "quality {} out of range (0-51)",
                self.quality
            )));
        }
        Ok(())
    }

    pub fn encoder_settings(&self) -> EncoderSettings {
        EncoderSettings {
            quality: self.quality,
            preset: self.preset.clone(),
            audio_codec: self.audio_codec.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_encoder_defaults() {
        let c = ControllerConfig::default();
        assert_eq!(c.output_suffix, "_CROPPED");
        assert_eq!(c.encoder_settings(), EncoderSettings::default());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cropper.json");
        fs::write(&path, r#"{ "quality": 22, "ffmpeg_path": "/usr/local/bin/ffmpeg" }"#).unwrap();
        let c = ControllerConfig::load(&path).unwrap();
        assert_eq!(c.quality, 22);
        assert_eq!(c.preset, "slow");
        assert_eq!(c.ffmpeg_path, Some(PathBuf::from("/usr/local/bin/ffmpeg")));
    }

    #[test]
    fn rejects_empty_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{ "output_suffix": "" }"#).unwrap();
        assert!(matches!(
            ControllerConfig::load(&path),
            Err(JobError::Config(_))
        ));
    }
}
