//! Recognizes the handful of encoder diagnostic lines that matter.
//!
//! The encoder offers no structured channel on stderr, so the controller
//! pattern-matches known line shapes. Rules are tried in a fixed order and
//! the first one that matches decides the event; storage failures are looked
//! for before duration/progress because they can share a line with a
//! `frame=` status report.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;

const NO_SUCH_FILE_SUFFIX: &str = ": No such file or directory";
const STORAGE_SUFFIXES: [&str; 2] = ["No space left on device", "I/O error"];

const PATH_TOO_LONG_TEMPLATE: &str = "The source file name is too long. Shorten it to get the total \
number of characters in the destination directory lower than 256.\n\nDestination directory: ";

static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Duration:\s(\d{2,}:\d{2}:\d{2}\.\d+)").expect("duration pattern compiles")
});
static PROGRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^frame=\s*\d+\s.+?time=(\d{2,}:\d{2}:\d{2}\.\d+)")
        .expect("progress pattern compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    /// Output could not be opened; in practice the combined path is too long.
    PathTooLong,
    /// Disk full or write failure. The encoder is frozen when this is seen.
    StorageExhausted,
}

impl ConditionKind {
    pub fn suspends_encoder(self) -> bool {
        matches!(self, ConditionKind::StorageExhausted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedEvent {
    DurationDiscovered(Duration),
    ProgressTick(Duration),
    RecoverableCondition { kind: ConditionKind, message: String },
    Ignored,
}

/// Per-job line classifier. Remembers the first announced duration.
#[derive(Debug)]
pub struct OutputParser {
    destination_dir: PathBuf,
    duration: Option<Duration>,
}

impl OutputParser {
    pub fn new(destination_dir: impl Into<PathBuf>) -> Self {
        Self {
            destination_dir: destination_dir.into(),
            duration: None,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn consume(&mut self, line: &str) -> ParsedEvent {
        let line = line.trim_end();
        if line.trim_start().is_empty() {
            return ParsedEvent::Ignored;
        }

        if let Some(stripped) = line.strip_suffix(NO_SUCH_FILE_SUFFIX) {
            return ParsedEvent::RecoverableCondition {
                kind: ConditionKind::PathTooLong,
                message: format!(
                    "{PATH_TOO_LONG_TEMPLATE}{}\n\nEncoder reported: {}",
                    self.destination_dir.display(),
                    stripped.trim()
                ),
            };
        }

        if STORAGE_SUFFIXES.iter().any(|s| line.ends_with(s)) {
            return ParsedEvent::RecoverableCondition {
                kind: ConditionKind::StorageExhausted,
                message: format!("Process failed.\nError message: {line}"),
            };
        }

        if self.duration.is_none() {
            if let Some(d) = DURATION_RE
                .captures(line)
                .and_then(|c| c.get(1))
                .and_then(|m| parse_timestamp(m.as_str()))
            {
                self.duration = Some(d);
                return ParsedEvent::DurationDiscovered(d);
            }
        }

        if line.starts_with("frame") {
            if let Some(t) = PROGRESS_RE
                .captures(line)
                .and_then(|c| c.get(1))
                .and_then(|m| parse_timestamp(m.as_str()))
            {
                return ParsedEvent::ProgressTick(t);
            }
        }

        ParsedEvent::Ignored
    }
}

/// Parse `HH:MM:SS.ff` (any number of fractional digits).
pub fn parse_timestamp(s: &str) -> Option<Duration> {
    let mut parts = s.trim().splitn(3, ':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let (secs, frac) = match parts.next()?.split_once('.') {
        Some((s, f)) => (s, f),
        None => return None,
    };
    let secs: u64 = secs.parse().ok()?;
    if minutes >= 60 || secs >= 60 || frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    // Keep nanosecond precision at most.
    let digits = &frac[..frac.len().min(9)];
    let nanos: u32 = digits.parse().ok()?;
    let nanos = nanos * 10u32.pow(9 - digits.len() as u32);

    let total = hours
        .checked_mul(3600)?
        .checked_add(minutes * 60)?
        .checked_add(secs)?;
    Some(Duration::new(total, nanos))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> OutputParser {
        OutputParser::new("/videos/out")
    }

    #[test]
    fn duration_then_progress() {
        let mut p = parser();
        assert_eq!(
            p.consume("  Duration: 00:01:30.00, start: 0.000000, bitrate: 5012 kb/s"),
            ParsedEvent::DurationDiscovered(Duration::from_secs(90))
        );
        assert_eq!(
            p.consume("frame=   10 fps=0.0 q=0.0 size=       0kB time=00:00:45.00 bitrate=N/A speed=1.2x"),
            ParsedEvent::ProgressTick(Duration::from_secs(45))
        );
    }

    #[test]
    fn first_duration_is_authoritative() {
        let mut p = parser();
        p.consume("  Duration: 00:01:30.00, start: 0.000000");
        assert_eq!(
            p.consume("  Duration: 00:09:00.00, start: 0.000000"),
            ParsedEvent::Ignored
        );
        assert_eq!(p.duration(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn blank_and_unrelated_lines_are_ignored() {
        let mut p = parser();
        assert_eq!(p.consume(""), ParsedEvent::Ignored);
        assert_eq!(p.consume("   \t"), ParsedEvent::Ignored);
        assert_eq!(
            p.consume("Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'in.mp4':"),
            ParsedEvent::Ignored
        );
        assert_eq!(
            p.consume("frame=    0 fps=0.0 q=0.0 size=N/A time=N/A bitrate=N/A"),
            ParsedEvent::Ignored
        );
    }

    #[test]
    fn missing_file_becomes_path_length_condition() {
        let mut p = parser();
        match p.consume("/videos/out/a_very_long_name_CROPPED.mp4: No such file or directory") {
            ParsedEvent::RecoverableCondition { kind, message } => {
                assert_eq!(kind, ConditionKind::PathTooLong);
                assert!(message.contains("/videos/out"));
                assert!(message.contains("a_very_long_name_CROPPED.mp4"));
                assert!(!message.contains("No such file or directory"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn storage_errors_win_over_progress() {
        let mut p = parser();
        p.consume("  Duration: 00:01:00.00, start: 0.000000");
        let ev = p.consume(
            "frame= 1200 fps= 50 q=28.0 size=  262144kB time=00:00:40.00 bitrate=5000kbits/s av_interleaved_write_frame(): No space left on device",
        );
        assert!(matches!(
            ev,
            ParsedEvent::RecoverableCondition {
                kind: ConditionKind::StorageExhausted,
                ..
            }
        ));
        let ev = p.consume("Error writing trailer of out.mp4: I/O error");
        match ev {
            ParsedEvent::RecoverableCondition { kind, message } => {
                assert!(kind.suspends_encoder());
                assert!(message.ends_with("I/O error"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn progress_before_duration_is_still_reported() {
        let mut p = parser();
        assert_eq!(
            p.consume("frame=  5 fps=0.0 q=0.0 size=0kB time=00:00:01.50 bitrate=N/A"),
            ParsedEvent::ProgressTick(Duration::from_millis(1500))
        );
    }

    #[test]
    fn timestamps() {
        assert_eq!(parse_timestamp("00:00:45.00"), Some(Duration::from_secs(45)));
        assert_eq!(
            parse_timestamp("01:02:03.25"),
            Some(Duration::from_millis(3_723_250))
        );
        assert_eq!(
            parse_timestamp("00:00:00.123456"),
            Some(Duration::from_micros(123_456))
        );
        assert_eq!(parse_timestamp("00:61:00.00"), None);
        assert_eq!(parse_timestamp("N/A"), None);
        assert_eq!(parse_timestamp("00:00:10"), None);
        assert_eq!(parse_timestamp("9999999999999999:00:00.00"), None);
        assert_eq!(parse_timestamp("99999999999999999999:00:00.00"), None);
    }

    #[test]
    fn absurd_duration_is_ignored_not_fatal() {
        let mut p = parser();
        assert_eq!(
            p.consume("  Duration: 9999999999999999:00:00.00, start: 0"),
            ParsedEvent::Ignored
        );
        assert_eq!(p.duration(), None);
        assert_eq!(
            p.consume("  Duration: 00:00:30.00, start: 0"),
            ParsedEvent::DurationDiscovered(Duration::from_secs(30))
        );
    }
}
