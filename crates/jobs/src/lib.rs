//! Crop-transcode controller: runs one external encoder process, turns its
//! diagnostic output into progress and failure events, and exposes
//! start/pause/resume/cancel over the live process.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

mod config;
mod control;
mod parser;
mod progress;
mod supervisor;

pub use config::ControllerConfig;
pub use control::{platform_control, ProcessControl, Unsupported};
pub use media_io::{CropRect, HwVendor, MediaError};
pub use parser::{parse_timestamp, ConditionKind, OutputParser, ParsedEvent};
pub use progress::ProgressSample;
pub use shared_child::SharedChild;
pub use supervisor::{JobSnapshot, JobState, Outcome, TranscodeController, TranscodeRequest};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to launch {}: {source}", .program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("a transcode is already running on this controller")]
    Busy,
    #[error("pausing a running process is not supported on this platform")]
    SuspendUnsupported,
    #[error("process control failed: {0}")]
    ProcessControl(#[source] io::Error),
    #[error("config error: {0}")]
    Config(String),
}
