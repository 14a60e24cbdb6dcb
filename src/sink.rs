//! Event sinks: where detectors push their output.
//!
//! A detector writes to exactly one `EventSink` and never learns how many
//! listeners sit behind it. `FanoutSink` composes several sinks;
//! `ChannelSink` hands events to another thread (a UI loop, a logger, a test).

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Local};
use image::RgbImage;
use serde::Serialize;

use crate::detect::Direction;

/// Display payload pushed once per processed tick, or once per preview.
#[derive(Clone, Debug)]
pub struct FrameUpdate {
    pub location: String,
    pub image: RgbImage,
    /// Instantaneous detection for this tick (not the debounced tracking state).
    pub train_detected: bool,
    pub diff_intensity_sum: f64,
    /// Preview frames carry no detection data.
    pub preview: bool,
}

/// One completed motion event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DirectionVerdict {
    pub direction: Direction,
    pub timestamp: DateTime<Local>,
    pub location: String,
    pub threshold_value: f64,
    pub tolerance_value: f64,
}

/// Receiver side of detector output.
pub trait EventSink: Send + Sync {
    fn on_frame(&self, update: FrameUpdate);

    /// Persisting sinks report I/O failures here; the detector logs them and
    /// keeps running.
    fn on_verdict(&self, verdict: &DirectionVerdict) -> Result<()>;

    /// Operator-visible status text (e.g. a failed write).
    fn on_status(&self, _location: &str, _message: &str) {}
}

/// Everything a `ChannelSink` forwards.
#[derive(Clone, Debug)]
pub enum SinkEvent {
    Frame(FrameUpdate),
    Verdict(DirectionVerdict),
    Status { location: String, message: String },
}

/// Forwards events over a std channel. A dropped receiver is not an error.
pub struct ChannelSink {
    tx: Mutex<Sender<SinkEvent>>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<SinkEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Mutex::new(tx) }, rx)
    }

    fn send(&self, event: SinkEvent) {
        let Ok(tx) = self.tx.lock() else {
            return;
        };
        if tx.send(event).is_err() {
            log::trace!("sink receiver gone, dropping event");
        }
    }
}

impl EventSink for ChannelSink {
    fn on_frame(&self, update: FrameUpdate) {
        self.send(SinkEvent::Frame(update));
    }

    fn on_verdict(&self, verdict: &DirectionVerdict) -> Result<()> {
        self.send(SinkEvent::Verdict(verdict.clone()));
        Ok(())
    }

    fn on_status(&self, location: &str, message: &str) {
        self.send(SinkEvent::Status {
            location: location.to_string(),
            message: message.to_string(),
        });
    }
}

/// Delivers every event to each inner sink in order.
///
/// A failing verdict sink does not stop delivery to the others; the first
/// error is returned after all have been tried.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn on_frame(&self, update: FrameUpdate) {
        let Some((last, rest)) = self.sinks.split_last() else {
            return;
        };
        for sink in rest {
            sink.on_frame(update.clone());
        }
        last.on_frame(update);
    }

    fn on_verdict(&self, verdict: &DirectionVerdict) -> Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(err) = sink.on_verdict(verdict) {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn on_status(&self, location: &str, message: &str) {
        for sink in &self.sinks {
            sink.on_status(location, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct FailingSink;

    impl EventSink for FailingSink {
        fn on_frame(&self, _update: FrameUpdate) {}

        fn on_verdict(&self, _verdict: &DirectionVerdict) -> Result<()> {
            Err(anyhow!("disk full"))
        }
    }

    fn verdict() -> DirectionVerdict {
        DirectionVerdict {
            direction: Direction::East,
            timestamp: Local::now(),
            location: "LEFT".to_string(),
            threshold_value: 25.0,
            tolerance_value: 5000.0,
        }
    }

    #[test]
    fn channel_sink_forwards_events() -> Result<()> {
        let (sink, rx) = ChannelSink::new();
        sink.on_verdict(&verdict())?;
        sink.on_status("LEFT", "hello");

        match rx.recv()? {
            SinkEvent::Verdict(v) => assert_eq!(v.direction, Direction::East),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(rx.recv()?, SinkEvent::Status { .. }));
        Ok(())
    }

    #[test]
    fn channel_sink_tolerates_dropped_receiver() -> Result<()> {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.on_verdict(&verdict())?;
        Ok(())
    }

    #[test]
    fn fanout_delivers_past_failures() {
        let (channel, rx) = ChannelSink::new();
        let fanout = FanoutSink::new()
            .with(Arc::new(FailingSink))
            .with(Arc::new(channel));
        assert_eq!(fanout.len(), 2);

        assert!(fanout.on_verdict(&verdict()).is_err());
        assert!(matches!(rx.try_recv(), Ok(SinkEvent::Verdict(_))));
    }
}
