use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::time::Duration;

/// One progress update: completion fraction in `[0, 1]` plus a display string.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSample {
    pub fraction: f64,
    pub text: String,
}

impl ProgressSample {
    pub fn start() -> Self {
        Self {
            fraction: 0.0,
            text: "0.0 %".to_string(),
        }
    }

    pub fn complete() -> Self {
        Self {
            fraction: 1.0,
            text: "100 %".to_string(),
        }
    }

    /// `None` while the duration is unknown or zero; the encoder may overshoot, so the fraction is clamped.
    pub fn from_position(position: Duration, duration: Duration) -> Option<Self> {
        if duration.is_zero() {
            return None;
        }
        let fraction = (position.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0);
        let percent = (fraction * 100.0 * 100.0).round() / 100.0;
        Some(Self {
            fraction,
            text: format!("{percent} %"),
        })
    }
}

/// Fan-out of values to any number of channel subscribers. Dropped receivers are pruned on publish.
pub(crate) struct Subscribers<T> {
    senders: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone> Subscribers<T> {
    pub(crate) fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = unbounded();
        self.senders.lock().push(tx);
        rx
    }

    pub(crate) fn publish(&self, value: T) {
        self.senders.lock().retain(|tx| tx.send(value.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_way() {
        let s = ProgressSample::from_position(Duration::from_secs(45), Duration::from_secs(90))
            .unwrap();
        assert_eq!(s.fraction, 0.5);
        assert_eq!(s.text, "50 %");
    }

    #[test]
    fn rounds_to_two_decimals() {
        let s = ProgressSample::from_position(Duration::from_secs(1), Duration::from_secs(3))
            .unwrap();
        assert_eq!(s.text, "33.33 %");
    }

    #[test]
    fn unknown_duration_is_indeterminate() {
        assert!(ProgressSample::from_position(Duration::from_secs(5), Duration::ZERO).is_none());
    }

    #[test]
    fn overshoot_is_clamped() {
        let s = ProgressSample::from_position(Duration::from_secs(61), Duration::from_secs(60))
            .unwrap();
        assert_eq!(s.fraction, 1.0);
        assert_eq!(s.text, "100 %");
    }

    #[test]
    fn every_subscriber_gets_a_copy() {
        let subs = Subscribers::new();
        let a = subs.subscribe();
        let b = subs.subscribe();
        drop(subs.subscribe());
        subs.publish(7u32);
        assert_eq!(a.try_recv(), Ok(7));
        assert_eq!(b.try_recv(), Ok(7));
        assert_eq!(subs.senders.lock().len(), 2);
    }
}
