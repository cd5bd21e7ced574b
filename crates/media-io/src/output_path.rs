use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::MediaError;

/// Destination for a crop of `source`: same directory, `suffix` inserted before the extension.
pub fn resolve_output_path(source: &Path, suffix: &str) -> Result<PathBuf, MediaError> {
    let parent = source
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| MediaError::InvalidPath(source.to_path_buf()))?;
    let stem = source
        .file_stem()
        .ok_or_else(|| MediaError::InvalidPath(source.to_path_buf()))?;

    let mut name = stem.to_os_string();
    name.push(suffix);
    if let Some(ext) = source.extension() {
        name.push(".");
        name.push(ext);
    }
    Ok(parent.join(name))
}

/// Remove a leftover artifact at `destination`. A missing file is fine; anything else is reported.
pub fn clear_stale_output(destination: &Path) -> Result<(), MediaError> {
    match fs::remove_file(destination) {
        Ok(()) => {
            debug!(path = %destination.display(), "removed stale output");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(MediaError::Filesystem {
            path: destination.to_path_buf(),
            source,
        }),
    }
}

pub fn prepare_output_path(source: &Path, suffix: &str) -> Result<PathBuf, MediaError> {
    let destination = resolve_output_path(source, suffix)?;
    clear_stale_output(&destination)?;
    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_OUTPUT_SUFFIX;

    #[test]
    fn suffix_goes_before_extension() {
        let out = resolve_output_path(Path::new("/media/clips/holiday.mp4"), DEFAULT_OUTPUT_SUFFIX)
            .unwrap();
        assert_eq!(out, Path::new("/media/clips/holiday_CROPPED.mp4"));
    }

    #[test]
    fn source_without_extension() {
        let out = resolve_output_path(Path::new("/media/raw"), DEFAULT_OUTPUT_SUFFIX).unwrap();
        assert_eq!(out, Path::new("/media/raw_CROPPED"));
    }

    #[test]
    fn bare_file_name_is_rejected() {
        let err = resolve_output_path(Path::new("clip.mp4"), DEFAULT_OUTPUT_SUFFIX).unwrap_err();
        assert!(matches!(err, MediaError::InvalidPath(_)));
        let err = resolve_output_path(Path::new("/"), DEFAULT_OUTPUT_SUFFIX).unwrap_err();
        assert!(matches!(err, MediaError::InvalidPath(_)));
    }

    #[test]
    fn stale_output_is_removed_and_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("take1.mov");
        fs::write(&source, b"src").unwrap();

        let first = prepare_output_path(&source, DEFAULT_OUTPUT_SUFFIX).unwrap();
        fs::write(&first, b"previous run").unwrap();

        let second = prepare_output_path(&source, DEFAULT_OUTPUT_SUFFIX).unwrap();
        assert_eq!(first, second);
        assert!(!second.exists());
        assert!(source.exists());
    }

    #[test]
    fn undeletable_destination_surfaces_filesystem_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory at the destination cannot be removed with remove_file.
        let blocker = dir.path().join("a_CROPPED.mp4");
        fs::create_dir(&blocker).unwrap();
        let err = clear_stale_output(&blocker).unwrap_err();
        assert!(matches!(err, MediaError::Filesystem { .. }));
    }
}
