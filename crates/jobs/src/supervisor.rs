use crossbeam_channel::{unbounded, Receiver, Sender};
use media_io::{
    build_encoder_args, clear_stale_output, locate_ffmpeg, prepare_output_path, CropRect, HwVendor,
    MediaError,
};
use parking_lot::Mutex;
use shared_child::SharedChild;
use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Read};
#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ControllerConfig;
use crate::control::{platform_control, ProcessControl};
use crate::parser::{OutputParser, ParsedEvent};
use crate::progress::{ProgressSample, Subscribers};
use crate::JobError;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// What to crop and how the frames should travel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeRequest {
    pub source: PathBuf,
    pub crop: CropRect,
    pub hw_vendor: Option<HwVendor>,
}

impl TranscodeRequest {
    pub fn new(source: impl Into<PathBuf>, crop: CropRect) -> Self {
        Self {
            source: source.into(),
            crop,
            hw_vendor: None,
        }
    }

    pub fn with_hw_vendor(mut self, vendor: Option<HwVendor>) -> Self {
        self.hw_vendor = vendor;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JobState {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_active(self) -> bool {
        matches!(self, JobState::Running | JobState::Paused)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(PathBuf),
    Cancelled,
    Failed(String),
}

/// Facts about the current job or, once it has ended, the most recent one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobSnapshot {
    pub state: JobState,
    pub destination: Option<PathBuf>,
    pub duration: Option<Duration>,
    pub position: Option<Duration>,
    pub error: Option<String>,
}

struct ActiveJob {
    id: Uuid,
    destination: PathBuf,
    child: Arc<SharedChild>,
    duration: Option<Duration>,
    position: Option<Duration>,
    error: Option<String>,
    cancelled: bool,
}

/// What remains of a job after its process handle is released.
#[derive(Debug, Clone)]
struct JobRecord {
    destination: PathBuf,
    duration: Option<Duration>,
    position: Option<Duration>,
    error: Option<String>,
}

impl From<&ActiveJob> for JobRecord {
    fn from(job: &ActiveJob) -> Self {
        Self {
            destination: job.destination.clone(),
            duration: job.duration,
            position: job.position,
            error: job.error.clone(),
        }
    }
}

struct Inner {
    state: JobState,
    job: Option<ActiveJob>,
    last: Option<JobRecord>,
}

impl Inner {
    fn record(&self) -> Option<JobRecord> {
        self.job.as_ref().map(JobRecord::from).or_else(|| self.last.clone())
    }

    /// Drop the live job, keeping its facts for `snapshot`.
    fn retire(&mut self) -> Option<ActiveJob> {
        let job = self.job.take()?;
        self.last = Some(JobRecord::from(&job));
        Some(job)
    }
}

struct Shared {
    config: ControllerConfig,
    control: Box<dyn ProcessControl>,
    inner: Mutex<Inner>,
    progress: Subscribers<ProgressSample>,
    errors: Subscribers<String>,
}

/// Drives one external encoder process at a time.
///
/// Clones share the same job; `start` blocks its caller until the job ends
/// while `pause`, `resume` and `cancel` may be called from any other thread.
#[derive(Clone)]
pub struct TranscodeController {
    shared: Arc<Shared>,
}

impl TranscodeController {
    pub fn new(config: ControllerConfig) -> Self {
        Self::with_control(config, platform_control())
    }

    pub fn with_control(config: ControllerConfig, control: Box<dyn ProcessControl>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                control,
                inner: Mutex::new(Inner {
                    state: JobState::Idle,
                    job: None,
                    last: None,
                }),
                progress: Subscribers::new(),
                errors: Subscribers::new(),
            }),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.shared.config
    }

    pub fn subscribe_progress(&self) -> Receiver<ProgressSample> {
        self.shared.progress.subscribe()
    }

    /// Human-readable failure messages, delivered as soon as they are known.
    pub fn subscribe_errors(&self) -> Receiver<String> {
        self.shared.errors.subscribe()
    }

    pub fn state(&self) -> JobState {
        self.shared.inner.lock().state
    }

    pub fn destination(&self) -> Option<PathBuf> {
        self.shared.inner.lock().record().map(|r| r.destination)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let inner = self.shared.inner.lock();
        let Some(record) = inner.record() else {
            return JobSnapshot {
                state: inner.state,
                ..JobSnapshot::default()
            };
        };
        JobSnapshot {
            state: inner.state,
            destination: Some(record.destination),
            duration: record.duration,
            position: record.position,
            error: record.error,
        }
    }

    /// Arguments `start` would hand to the encoder for `request`, without touching the filesystem.
    pub fn planned_args(&self, request: &TranscodeRequest) -> Result<(PathBuf, Vec<OsString>), JobError> {
        let destination =
            media_io::resolve_output_path(&request.source, &self.shared.config.output_suffix)?;
        let args = build_encoder_args(
            &request.source,
            &request.crop,
            request.hw_vendor,
            &self.shared.config.encoder_settings(),
            &destination,
        );
        Ok((destination, args))
    }

    /// Run a job to its end. Returns once the encoder has exited or the job was cancelled.
    pub fn start(&self, request: &TranscodeRequest) -> Result<Outcome, JobError> {
        let shared = &self.shared;
        let (id, child, destination, lines) = {
            let mut inner = shared.inner.lock();
            if inner.state.is_active() {
                return Err(JobError::Busy);
            }

            let program =
                locate_ffmpeg(shared.config.ffmpeg_path.as_deref()).map_err(launch_error)?;
            let destination = prepare_output_path(&request.source, &shared.config.output_suffix)?;
            let args = build_encoder_args(
                &request.source,
                &request.crop,
                request.hw_vendor,
                &shared.config.encoder_settings(),
                &destination,
            );
            debug!(program = %program.display(), ?args, "launching encoder");

            let mut command = Command::new(&program);
            command
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            #[cfg(target_os = "windows")]
            {
                command.creation_flags(CREATE_NO_WINDOW);
            }
            let child = SharedChild::spawn(&mut command)
                .map_err(|source| JobError::Launch { program, source })?;
            let child = Arc::new(child);
            shared.progress.publish(ProgressSample::start());

            let (tx, lines) = unbounded::<String>();
            if let Some(out) = child.take_stdout() {
                spawn_line_reader("stdout", out, tx.clone());
            }
            if let Some(err) = child.take_stderr() {
                spawn_line_reader("stderr", err, tx);
            }

            let id = Uuid::new_v4();
            inner.job = Some(ActiveJob {
                id,
                destination: destination.clone(),
                child: child.clone(),
                duration: None,
                position: None,
                error: None,
                cancelled: false,
            });
            inner.last = None;
            inner.state = JobState::Running;
            info!(job = %id, pid = child.id(), source = %request.source.display(), "transcode started");
            (id, child, destination, lines)
        };

        let dest_dir = destination
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let mut parser = OutputParser::new(dest_dir);
        let mut last_line: Option<String> = None;
        for line in lines.iter() {
            debug!(target: "encoder", "{line}");
            let event = parser.consume(&line);
            last_line = Some(line);
            self.apply(id, event);
        }

        let status = child.wait();
        Ok(self.finish(id, status, last_line))
    }

    fn apply(&self, id: Uuid, event: ParsedEvent) {
        let shared = &self.shared;
        let mut guard = shared.inner.lock();
        let Inner { state, job, .. } = &mut *guard;
        let Some(job) = job.as_mut().filter(|j| j.id == id && !j.cancelled) else {
            return;
        };

        match event {
            ParsedEvent::DurationDiscovered(d) => {
                debug!(job = %id, duration = ?d, "duration discovered");
                job.duration = Some(d);
            }
            ParsedEvent::ProgressTick(t) => {
                job.position = Some(t);
                if let Some(sample) = job.duration.and_then(|d| ProgressSample::from_position(t, d)) {
                    shared.progress.publish(sample);
                }
            }
            ParsedEvent::RecoverableCondition { kind, message } => {
                warn!(job = %id, ?kind, "encoder reported a fatal condition");
                if kind.suspends_encoder() && *state == JobState::Running {
                    match shared.control.suspend(&job.child) {
                        Ok(()) => {
                            *state = JobState::Paused;
                            info!(job = %id, "encoder suspended after storage failure");
                        }
                        Err(e) => warn!(job = %id, "could not suspend encoder: {e}"),
                    }
                }
                if job.error.is_none() {
                    job.error = Some(message.clone());
                }
                shared.errors.publish(message);
            }
            ParsedEvent::Ignored => {}
        }
    }

    fn finish(
        &self,
        id: Uuid,
        status: io::Result<ExitStatus>,
        last_line: Option<String>,
    ) -> Outcome {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        if !inner.job.as_ref().is_some_and(|j| j.id == id) {
            // A concurrent cancel already tore the job down.
            return Outcome::Cancelled;
        }
        let Some(job) = inner.retire() else {
            return Outcome::Cancelled;
        };

        if job.cancelled {
            if let Err(e) = clear_stale_output(&job.destination) {
                warn!(job = %id, "{e}");
            }
            inner.state = JobState::Cancelled;
            info!(job = %id, "transcode cancelled");
            return Outcome::Cancelled;
        }

        if let Some(message) = job.error.clone() {
            inner.state = JobState::Failed;
            info!(job = %id, "transcode failed on encoder condition");
            return Outcome::Failed(message);
        }

        let failure = match status {
            Ok(s) if s.success() => None,
            Ok(s) => Some(match last_line {
                Some(line) => format!("Process failed.\nError message: {line}"),
                None => format!("Process failed.\nEncoder exited with {s}"),
            }),
            Err(e) => Some(format!("Process failed.\nCould not wait for the encoder: {e}")),
        };

        match failure {
            None => {
                shared.progress.publish(ProgressSample::complete());
                inner.state = JobState::Completed;
                info!(job = %id, destination = %job.destination.display(), "transcode completed");
                Outcome::Success(job.destination)
            }
            Some(message) => {
                if let Some(last) = inner.last.as_mut() {
                    last.error = Some(message.clone());
                }
                inner.state = JobState::Failed;
                warn!(job = %id, "encoder exited unsuccessfully");
                shared.errors.publish(message.clone());
                Outcome::Failed(message)
            }
        }
    }

    /// Suspend the encoder in place. No-op unless a job is running.
    pub fn pause(&self) -> Result<(), JobError> {
        let mut inner = self.shared.inner.lock();
        if inner.state != JobState::Running {
            return Ok(());
        }
        let Some(job) = inner.job.as_ref().filter(|j| !j.cancelled) else {
            return Ok(());
        };
        if exited(&job.child) {
            return Ok(());
        }
        self.shared.control.suspend(&job.child)?;
        info!(job = %job.id, "transcode paused");
        inner.state = JobState::Paused;
        Ok(())
    }

    /// Let a paused encoder continue. No-op unless a job is paused.
    pub fn resume(&self) -> Result<(), JobError> {
        let mut inner = self.shared.inner.lock();
        if inner.state != JobState::Paused {
            return Ok(());
        }
        let Some(job) = inner.job.as_ref().filter(|j| !j.cancelled) else {
            return Ok(());
        };
        if exited(&job.child) {
            return Ok(());
        }
        self.shared.control.resume(&job.child)?;
        info!(job = %job.id, "transcode resumed");
        inner.state = JobState::Running;
        Ok(())
    }

    /// Terminate the encoder, wait for it, and remove its partial output.
    pub fn cancel(&self) -> Result<(), JobError> {
        let (id, child) = {
            let mut inner = self.shared.inner.lock();
            if !inner.state.is_active() {
                return Ok(());
            }
            let Some(job) = inner.job.as_mut() else {
                return Ok(());
            };
            job.cancelled = true;
            (job.id, job.child.clone())
        };

        info!(job = %id, "cancelling transcode");
        if let Err(e) = child.kill() {
            debug!(job = %id, "kill: {e}");
        }
        if let Err(e) = child.wait() {
            warn!(job = %id, "waiting for cancelled encoder: {e}");
        }

        let mut inner = self.shared.inner.lock();
        if !inner.job.as_ref().is_some_and(|j| j.id == id) {
            return Ok(());
        }
        let Some(job) = inner.retire() else {
            return Ok(());
        };
        inner.state = JobState::Cancelled;
        info!(job = %id, "transcode cancelled");
        clear_stale_output(&job.destination)?;
        Ok(())
    }
}

fn exited(child: &SharedChild) -> bool {
    matches!(child.try_wait(), Ok(Some(_)))
}

/// An encoder that cannot be found is reported the same way as one that cannot be started.
fn launch_error(err: MediaError) -> JobError {
    JobError::Launch {
        program: PathBuf::from("ffmpeg"),
        source: io::Error::new(io::ErrorKind::NotFound, err),
    }
}

/// Forward a process stream line by line. Progress reports end in `\r`, so both `\r` and `\n` split lines.
fn spawn_line_reader<R: Read + Send + 'static>(name: &'static str, stream: R, tx: Sender<String>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut pending: Vec<u8> = Vec::new();
        loop {
            let consumed = match reader.fill_buf() {
                Ok([]) => break,
                Ok(buf) => {
                    for &b in buf {
                        if b == b'\n' || b == b'\r' {
                            if !pending.is_empty() {
                                let line = String::from_utf8_lossy(&pending).into_owned();
                                pending.clear();
                                if tx.send(line).is_err() {
                                    return;
                                }
                            }
                        } else {
                            pending.push(b);
                        }
                    }
                    buf.len()
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("{name} reader stopped: {e}");
                    break;
                }
            };
            reader.consume(consumed);
        }
        if !pending.is_empty() {
            let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Unsupported;

    fn request() -> TranscodeRequest {
        TranscodeRequest::new("/media/in.mp4", CropRect::new(0, 0, 100, 100))
    }

    #[test]
    fn idle_controller_ignores_control_calls() {
        let ctl = TranscodeController::with_control(ControllerConfig::default(), Box::new(Unsupported));
        ctl.pause().unwrap();
        ctl.resume().unwrap();
        ctl.cancel().unwrap();
        assert_eq!(ctl.state(), JobState::Idle);
        assert!(ctl.destination().is_none());
    }

    #[test]
    fn planned_args_follow_config() {
        let config = ControllerConfig {
            quality: 24,
            output_suffix: "_crop".into(),
            ..ControllerConfig::default()
        };
        let ctl = TranscodeController::new(config);
        let (dest, args) = ctl.planned_args(&request()).unwrap();
        assert_eq!(dest, Path::new("/media/in_crop.mp4"));
        assert!(args.iter().any(|a| a == "crop=100:100:0:0"));
        assert!(args.iter().any(|a| a == "24"));
    }

    #[test]
    fn missing_parent_fails_before_launch() {
        let ctl = TranscodeController::new(ControllerConfig {
            ffmpeg_path: Some(PathBuf::from("/nonexistent/ffmpeg")),
            ..ControllerConfig::default()
        });
        let req = TranscodeRequest::new("in.mp4", CropRect::new(0, 0, 10, 10));
        let err = ctl.start(&req).unwrap_err();
        assert!(matches!(
            err,
            JobError::Media(media_io::MediaError::InvalidPath(_))
        ));
        assert_eq!(ctl.state(), JobState::Idle);
    }

    #[test]
    fn missing_encoder_is_a_launch_error() {
        match launch_error(MediaError::EncoderMissing) {
            JobError::Launch { program, source } => {
                assert_eq!(program, Path::new("ffmpeg"));
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("expected a launch error, got {other:?}"),
        }
    }

    #[test]
    fn fresh_controller_snapshot_is_empty() {
        let ctl = TranscodeController::with_control(ControllerConfig::default(), Box::new(Unsupported));
        assert_eq!(
            ctl.snapshot(),
            JobSnapshot {
                state: JobState::Idle,
                ..JobSnapshot::default()
            }
        );
    }

    #[test]
    fn states() {
        assert!(JobState::Paused.is_active());
        assert!(!JobState::Idle.is_active());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }
}
