use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use train_tracker::config::DEFAULT_TIMESTAMP_FORMAT;
use train_tracker::storage::RESULTS_HEADER;
use train_tracker::{
    ArtifactWriter, BoundingBox, CaptureDevice, ChannelSink, DetectorParams, DeviceOpener,
    Direction, EventSink, FanoutSink, MotionDetector, RawFrame, Resolution, ResultWriter,
    Schedule, SharedCaptureHandle, SinkEvent, TickParams,
};

const WIDTH: u32 = 40;
const HEIGHT: u32 = 10;
const RES: Resolution = Resolution {
    width: WIDTH,
    height: HEIGHT,
};

/// Plays a fixed list of frames, then repeats the last one forever.
struct ScriptedDevice {
    frames: Arc<Vec<RawFrame>>,
    next: usize,
    open: bool,
}

impl CaptureDevice for ScriptedDevice {
    fn configure(&mut self, _width: u32, _height: u32) -> Result<Resolution> {
        Ok(RES)
    }

    fn read_frame(&mut self) -> Result<RawFrame> {
        let index = self.next.min(self.frames.len() - 1);
        self.next += 1;
        Ok(self.frames[index].clone())
    }

    fn release(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

struct ScriptedOpener {
    frames: Arc<Vec<RawFrame>>,
    opens: AtomicUsize,
}

impl DeviceOpener for ScriptedOpener {
    fn open(&self, _device_id: &str) -> Result<Box<dyn CaptureDevice>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedDevice {
            frames: self.frames.clone(),
            next: 0,
            open: true,
        }))
    }
}

fn background() -> RgbImage {
    RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([30, 30, 30]))
}

fn with_block(x: u32) -> RawFrame {
    let mut image = background();
    for dx in 0..4 {
        for y in 3..7 {
            image.put_pixel(x + dx, y, Rgb([230, 230, 230]));
        }
    }
    RawFrame::from_image(image)
}

/// Three idle frames, a block sliding left to right, then idle again.
fn eastbound_script() -> Arc<Vec<RawFrame>> {
    let mut frames = vec![RawFrame::from_image(background()); 3];
    frames.extend((1..15).map(|step| with_block(step * 2)));
    frames.push(RawFrame::from_image(background()));
    Arc::new(frames)
}

fn scripted_handle(frames: Arc<Vec<RawFrame>>) -> (SharedCaptureHandle, Arc<ScriptedOpener>) {
    let opener = Arc::new(ScriptedOpener {
        frames,
        opens: AtomicUsize::new(0),
    });
    (
        SharedCaptureHandle::new("scripted://yard", RES, opener.clone()),
        opener,
    )
}

fn fast_schedule() -> Schedule {
    let mut schedule = Schedule::new(100, RES);
    schedule.initial_delay = Duration::from_millis(0);
    schedule
}

fn params(calibrating: bool) -> Result<DetectorParams> {
    DetectorParams::new(
        RES,
        TickParams {
            roi: BoundingBox::full_frame(WIDTH, HEIGHT)?,
            threshold: 40.0,
            tolerance: 1000.0,
            calibrating,
        },
    )
}

/// Collect events until `frames` display updates have arrived.
fn collect_frames(rx: &Receiver<SinkEvent>, frames: usize) -> Result<Vec<SinkEvent>> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut events = Vec::new();
    let mut seen = 0;
    while seen < frames {
        let wait = deadline.saturating_duration_since(Instant::now());
        let event = rx
            .recv_timeout(wait)
            .map_err(|_| anyhow!("timed out after {} frame updates", seen))?;
        if matches!(event, SinkEvent::Frame(_)) {
            seen += 1;
        }
        events.push(event);
    }
    Ok(events)
}

fn verdicts(events: &[SinkEvent]) -> Vec<Direction> {
    events
        .iter()
        .filter_map(|event| match event {
            SinkEvent::Verdict(verdict) => Some(verdict.direction),
            _ => None,
        })
        .collect()
}

#[test]
fn eastbound_crossing_yields_one_east_verdict() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let results = Arc::new(ResultWriter::create(
        &dir.path().join("results.csv"),
        DEFAULT_TIMESTAMP_FORMAT,
    )?);
    let artifacts = ArtifactWriter::new(&dir.path().join("images"), "png", DEFAULT_TIMESTAMP_FORMAT)?;
    let (channel, rx) = ChannelSink::new();
    let sink: Arc<dyn EventSink> = Arc::new(
        FanoutSink::new()
            .with(results.clone())
            .with(Arc::new(channel)),
    );

    let (handle, opener) = scripted_handle(eastbound_script());
    let detector = MotionDetector::with_artifacts(
        "LEFT",
        handle.clone(),
        params(false)?,
        sink,
        fast_schedule(),
        Some(artifacts),
    );
    detector.start()?;
    assert!(handle.is_device_open());

    // 18 scripted frames minus the bootstrap tick, plus idle ticks after.
    let events = collect_frames(&rx, 30)?;
    assert_eq!(detector.stop(false)?, 0);
    assert!(!handle.is_device_open());
    assert_eq!(opener.opens.load(Ordering::SeqCst), 1);

    assert_eq!(verdicts(&events), vec![Direction::East]);
    assert!(!detector.state().is_tracking());
    assert!(detector.state().centroid_samples().is_empty());

    results.close()?;
    let csv = std::fs::read_to_string(results.path())?;
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], RESULTS_HEADER);
    assert!(lines[1].ends_with(",LEFT,40,1000,East"), "row: {}", lines[1]);

    let saved = std::fs::read_dir(dir.path().join("images"))?.count();
    assert!(saved > 0);
    Ok(())
}

#[test]
fn calibrating_detector_reports_frames_but_no_verdicts() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let artifacts = ArtifactWriter::new(dir.path(), "png", DEFAULT_TIMESTAMP_FORMAT)?;
    let (channel, rx) = ChannelSink::new();

    let (handle, _) = scripted_handle(eastbound_script());
    let detector = MotionDetector::with_artifacts(
        "LEFT",
        handle,
        params(true)?,
        Arc::new(channel),
        fast_schedule(),
        Some(artifacts),
    );
    detector.start()?;
    let events = collect_frames(&rx, 25)?;
    detector.stop(false)?;

    assert!(verdicts(&events).is_empty());
    let detected_frames = events
        .iter()
        .filter(|event| matches!(event, SinkEvent::Frame(update) if update.train_detected))
        .count();
    assert!(detected_frames > 0);
    assert_eq!(detector.state().hysteresis_counter(), 0);
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[test]
fn two_regions_share_one_device() -> Result<()> {
    let (left_sink, left_rx) = ChannelSink::new();
    let (right_sink, right_rx) = ChannelSink::new();
    let (handle, opener) = scripted_handle(eastbound_script());

    let left = MotionDetector::new(
        "LEFT",
        handle.clone(),
        params(false)?,
        Arc::new(left_sink),
        fast_schedule(),
    );
    let right = MotionDetector::new(
        "RIGHT",
        handle.clone(),
        params(false)?,
        Arc::new(right_sink),
        fast_schedule(),
    );
    left.start()?;
    right.start()?;
    assert_eq!(handle.ref_count(), 2);

    collect_frames(&left_rx, 3)?;
    collect_frames(&right_rx, 3)?;

    assert_eq!(left.stop(false)?, 1);
    assert!(handle.is_device_open());
    assert_eq!(right.stop(false)?, 0);
    assert!(!handle.is_device_open());
    assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
    Ok(())
}
