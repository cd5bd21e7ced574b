use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

mod encoder_args;
mod output_path;

pub use encoder_args::{build_encoder_args, build_filter, CropRect, EncoderSettings, HwVendor};
pub use output_path::{clear_stale_output, prepare_output_path, resolve_output_path};

/// Suffix inserted between the source stem and its extension.
pub const DEFAULT_OUTPUT_SUFFIX: &str = "_CROPPED";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("ffmpeg not found on PATH; please install FFmpeg or configure its location")]
    EncoderMissing,
    #[error("the specified path does not exist: {0}")]
    InvalidPath(PathBuf),
    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Pick the encoder executable: an explicit override wins, otherwise search PATH.
pub fn locate_ffmpeg(explicit: Option<&Path>) -> Result<PathBuf, MediaError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    which::which("ffmpeg").map_err(|_| MediaError::EncoderMissing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_encoder_path_is_used_verbatim() {
        let p = Path::new("/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(locate_ffmpeg(Some(p)).unwrap(), p);
    }
}
