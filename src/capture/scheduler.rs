use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use image::RgbImage;

use super::handle::{CaptureLease, SharedCaptureHandle};
use super::params::DetectorParams;
use crate::detect::{DetectorState, MotionPipeline, TickReport};
use crate::display::{fit_to_display, render_motion_view, render_roi_overlay};
use crate::frame::Resolution;
use crate::sink::{DirectionVerdict, EventSink, FrameUpdate};
use crate::storage::ArtifactWriter;

/// Delay before the first tick after `start`.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Timing and display settings of one detector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Schedule {
    pub fps: u32,
    pub initial_delay: Duration,
    pub display: Resolution,
}

impl Schedule {
    pub fn new(fps: u32, display: Resolution) -> Self {
        Self {
            fps,
            initial_delay: DEFAULT_INITIAL_DELAY,
            display,
        }
    }

    /// Tick period, `1000 / fps` ms.
    pub fn period(&self) -> Result<Duration> {
        if self.fps == 0 {
            bail!("frames per second must be > 0");
        }
        Ok(Duration::from_millis(u64::from((1000 / self.fps).max(1))))
    }
}

struct Worker {
    location: String,
    handle: SharedCaptureHandle,
    params: Arc<DetectorParams>,
    sink: Arc<dyn EventSink>,
    artifacts: Option<ArtifactWriter>,
    pipeline: Mutex<MotionPipeline>,
    display: Resolution,
}

struct RunningTask {
    cancel: Sender<()>,
    lease: CaptureLease,
}

/// One named detector watching one region of one capture device.
///
/// `start` registers the detector with the shared device and spawns its
/// periodic capture task; `stop` cancels the task and drops the registration.
/// Several detectors may share one `SharedCaptureHandle`.
pub struct MotionDetector {
    worker: Arc<Worker>,
    schedule: Schedule,
    task: Mutex<Option<RunningTask>>,
}

impl MotionDetector {
    pub fn new(
        location: &str,
        handle: SharedCaptureHandle,
        params: DetectorParams,
        sink: Arc<dyn EventSink>,
        schedule: Schedule,
    ) -> Self {
        Self::with_artifacts(location, handle, params, sink, schedule, None)
    }

    pub fn with_artifacts(
        location: &str,
        handle: SharedCaptureHandle,
        params: DetectorParams,
        sink: Arc<dyn EventSink>,
        schedule: Schedule,
        artifacts: Option<ArtifactWriter>,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                location: location.to_string(),
                handle,
                params: Arc::new(params),
                sink,
                artifacts,
                pipeline: Mutex::new(MotionPipeline::new()),
                display: schedule.display,
            }),
            schedule,
            task: Mutex::new(None),
        }
    }

    pub fn location(&self) -> &str {
        &self.worker.location
    }

    /// Live tunables; changes apply from the next tick.
    pub fn params(&self) -> &Arc<DetectorParams> {
        &self.worker.params
    }

    pub fn handle(&self) -> &SharedCaptureHandle {
        &self.worker.handle
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.is_some())
            .unwrap_or(false)
    }

    /// Copy of the detection state for inspection.
    pub fn state(&self) -> DetectorState {
        self.worker
            .pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state()
            .clone()
    }

    /// Begin capturing. Starting a running detector is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut task = self
            .task
            .lock()
            .map_err(|_| anyhow!("detector {} task lock poisoned", self.location()))?;
        if task.is_some() {
            log::warn!("detector {} already running", self.location());
            return Ok(());
        }

        let period = self.schedule.period()?;
        let lease = self.worker.handle.acquire()?;

        // The ROI must fit what the device delivers, not what was requested.
        if let Err(err) = self.worker.params.bind_frame_size(lease.frame_size()) {
            self.give_back(lease);
            return Err(err);
        }

        let (cancel, cancelled) = mpsc::channel::<()>();
        let worker = self.worker.clone();
        let initial_delay = self.schedule.initial_delay;
        let spawned = std::thread::Builder::new()
            .name(format!("detector-{}", self.location()))
            .spawn(move || {
                let mut next = Instant::now() + initial_delay;
                loop {
                    let wait = next.saturating_duration_since(Instant::now());
                    match cancelled.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    worker.tick();
                    next += period;
                    let now = Instant::now();
                    if next < now {
                        // Overran; skip missed ticks instead of bursting.
                        next = now;
                    }
                }
                log::debug!("detector {} task exited", worker.location);
            })
            .with_context(|| format!("spawn capture task for {}", self.location()));

        if let Err(err) = spawned {
            self.give_back(lease);
            return Err(err);
        }

        *task = Some(RunningTask { cancel, lease });
        log::info!(
            "detector {} started on {} ({} fps, roi {})",
            self.location(),
            self.worker.handle.device_id(),
            self.schedule.fps,
            self.worker.params.snapshot().roi
        );
        Ok(())
    }

    /// Stop capturing and return the device's remaining consumer count.
    ///
    /// The capture task is signalled but not joined; a tick already in
    /// flight may still finish. Stopping a detector that is not running
    /// leaves the count alone unless `force` is set, which releases the
    /// device for every consumer. Consumers whose registration a forced stop
    /// voided keep running without it; their own later `stop` no longer
    /// changes the count.
    pub fn stop(&self, force: bool) -> Result<usize> {
        let task = self
            .task
            .lock()
            .map_err(|_| anyhow!("detector {} task lock poisoned", self.location()))?
            .take();

        let handle = &self.worker.handle;
        let remaining = match (task, force) {
            (Some(RunningTask { cancel, lease }), _) => {
                // The task may already be gone; either way it stops.
                let _ = cancel.send(());
                if force {
                    drop(lease);
                    handle.force_release()?
                } else {
                    handle.release(lease)?
                }
            }
            (None, true) => handle.force_release()?,
            (None, false) => return Ok(handle.ref_count()),
        };
        log::info!(
            "detector {} stopped{} ({} consumers left on {})",
            self.location(),
            if force { " (forced)" } else { "" },
            remaining,
            handle.device_id()
        );
        Ok(remaining)
    }

    /// Return a lease taken by a `start` that did not complete.
    fn give_back(&self, lease: CaptureLease) {
        if let Err(err) = self.worker.handle.release(lease) {
            log::warn!(
                "detector {}: releasing {} failed: {:#}",
                self.location(),
                self.worker.handle.device_id(),
                err
            );
        }
    }

    /// Grab one frame outside the capture loop and push it with the ROI
    /// outlined. Returns the pushed image.
    pub fn preview_once(&self) -> Result<RgbImage> {
        let frame = self.worker.handle.read_preview_frame()?;
        let roi = self.worker.params.snapshot().roi;
        roi.check_within(frame.width(), frame.height())?;

        let overlay = render_roi_overlay(frame.into_rgb(), &roi);
        let image = fit_to_display(&overlay, self.worker.display);
        self.worker.sink.on_frame(FrameUpdate {
            location: self.worker.location.clone(),
            image: image.clone(),
            train_detected: false,
            diff_intensity_sum: 0.0,
            preview: true,
        });
        Ok(image)
    }
}

impl Drop for MotionDetector {
    fn drop(&mut self) {
        if let Err(err) = self.stop(false) {
            log::warn!("detector {} stop on drop failed: {}", self.location(), err);
        }
    }
}

impl Worker {
    fn report_status(&self, message: &str) {
        self.sink.on_status(&self.location, message);
    }

    fn tick(&self) {
        let frame = match self.handle.read_frame() {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("detector {}: frame read failed: {:#}", self.location, err);
                self.report_status(&format!("frame read failed: {}", err));
                return;
            }
        };
        let params = self.params.snapshot();

        let (report, counter, tracking) = {
            let mut pipeline = self.pipeline.lock().unwrap_or_else(PoisonError::into_inner);
            match pipeline.process(&frame, &params) {
                Ok(Some(report)) => {
                    let state = pipeline.state();
                    (report, state.hysteresis_counter(), state.is_tracking())
                }
                Ok(None) => {
                    log::debug!("detector {}: baseline set", self.location);
                    return;
                }
                Err(err) => {
                    log::warn!("detector {}: {:#}", self.location, err);
                    self.report_status(&err.to_string());
                    return;
                }
            }
        };

        let now = Local::now();
        let TickReport {
            current,
            diff,
            sample,
            outcome,
        } = report;
        log::debug!(
            "detector {} {} sum={} detected={} counter={} centroid=({:.1},{:.1}) tracking={}",
            self.location,
            now.format("%H:%M:%S%.3f"),
            sample.intensity_sum,
            outcome.detected,
            counter,
            sample.centroid_x,
            sample.centroid_y,
            tracking
        );

        if outcome.detected && !params.calibrating {
            if let Some(artifacts) = &self.artifacts {
                if let Err(err) = artifacts.save(&current, now) {
                    log::warn!("detector {}: {:#}", self.location, err);
                    self.report_status(&format!("image save failed: {}", err));
                }
            }
        }

        self.sink.on_frame(FrameUpdate {
            location: self.location.clone(),
            image: render_motion_view(&diff, &sample, self.display),
            train_detected: outcome.detected,
            diff_intensity_sum: sample.intensity_sum,
            preview: false,
        });

        if let Some(direction) = outcome.completed {
            let verdict = DirectionVerdict {
                direction,
                timestamp: now,
                location: self.location.clone(),
                threshold_value: params.threshold,
                tolerance_value: params.tolerance,
            };
            log::info!("detector {}: train moving {}", self.location, direction);
            if let Err(err) = self.sink.on_verdict(&verdict) {
                log::error!("detector {}: verdict not recorded: {:#}", self.location, err);
                self.report_status(&format!("result write failed: {}", err));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::TickParams;
    use crate::frame::{BoundingBox, RawFrame, RegionError};
    use crate::ingest::{CaptureDevice, DeviceOpener};
    use crate::sink::{ChannelSink, SinkEvent};

    /// Always delivers 16x8 frames, whatever was requested.
    struct BlankDevice;

    impl CaptureDevice for BlankDevice {
        fn configure(&mut self, _width: u32, _height: u32) -> Result<Resolution> {
            Ok(RES)
        }

        fn read_frame(&mut self) -> Result<RawFrame> {
            RawFrame::new(vec![10u8; 16 * 8 * 3], 16, 8)
        }

        fn release(&mut self) {}

        fn is_open(&self) -> bool {
            true
        }
    }

    struct BlankOpener;

    impl DeviceOpener for BlankOpener {
        fn open(&self, _device_id: &str) -> Result<Box<dyn CaptureDevice>> {
            Ok(Box::new(BlankDevice))
        }
    }

    const RES: Resolution = Resolution {
        width: 16,
        height: 8,
    };

    fn detector(
        location: &str,
        handle: SharedCaptureHandle,
        roi: BoundingBox,
        fps: u32,
    ) -> Result<(MotionDetector, mpsc::Receiver<SinkEvent>)> {
        // Params accept any ROI inside 64x64 until `start` binds them to the
        // 16x8 the device delivers.
        let params = DetectorParams::new(
            Resolution {
                width: 64,
                height: 64,
            },
            TickParams {
                roi,
                threshold: 25.0,
                tolerance: 100.0,
                calibrating: false,
            },
        )?;
        let (sink, rx) = ChannelSink::new();
        let mut schedule = Schedule::new(fps, RES);
        schedule.initial_delay = Duration::from_millis(0);
        Ok((
            MotionDetector::new(location, handle, params, Arc::new(sink), schedule),
            rx,
        ))
    }

    fn handle() -> SharedCaptureHandle {
        SharedCaptureHandle::new("blank", RES, Arc::new(BlankOpener))
    }

    #[test]
    fn zero_fps_fails_before_acquiring() -> Result<()> {
        let h = handle();
        let (d, _rx) = detector("LEFT", h.clone(), BoundingBox::full_frame(16, 8)?, 0)?;
        assert!(d.start().is_err());
        assert_eq!(h.ref_count(), 0);
        assert!(!d.is_running());
        Ok(())
    }

    #[test]
    fn roi_outside_frame_fails_and_gives_device_back() -> Result<()> {
        let h = handle();
        let (d, _rx) = detector("LEFT", h.clone(), BoundingBox::new(0, 0, 32, 8)?, 10)?;
        assert!(d.start().is_err());
        assert_eq!(h.ref_count(), 0);
        assert!(!h.is_device_open());
        Ok(())
    }

    #[test]
    fn roi_is_checked_against_the_settled_frame_size() -> Result<()> {
        // Requests 32x16; the device settles on 16x8.
        let h = SharedCaptureHandle::new(
            "blank",
            Resolution {
                width: 32,
                height: 16,
            },
            Arc::new(BlankOpener),
        );
        let (wide, rx) = detector("LEFT", h.clone(), BoundingBox::full_frame(32, 16)?, 100)?;
        let err = wide
            .start()
            .err()
            .ok_or_else(|| anyhow!("expected the 32x16 region to be rejected"))?;
        assert!(err.downcast_ref::<RegionError>().is_some());
        assert!(!wide.is_running());
        assert_eq!(h.ref_count(), 0);
        assert!(!h.is_device_open());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        let (fitting, _r) = detector("RIGHT", h.clone(), BoundingBox::full_frame(16, 8)?, 100)?;
        fitting.start()?;
        assert_eq!(h.active_resolution(), Some(RES));
        assert_eq!(fitting.params().resolution(), RES);
        assert!(fitting
            .params()
            .set_roi(BoundingBox::full_frame(32, 16)?)
            .is_err());
        fitting.params().set_roi(BoundingBox::new(4, 0, 12, 8)?)?;
        assert_eq!(fitting.stop(false)?, 0);
        Ok(())
    }

    #[test]
    fn detectors_share_one_device() -> Result<()> {
        let h = handle();
        let (left, _l) = detector("LEFT", h.clone(), BoundingBox::new(0, 0, 8, 8)?, 50)?;
        let (right, _r) = detector("RIGHT", h.clone(), BoundingBox::new(8, 0, 16, 8)?, 50)?;

        left.start()?;
        right.start()?;
        left.start()?;
        assert_eq!(h.ref_count(), 2);

        assert_eq!(left.stop(false)?, 1);
        assert!(h.is_device_open());
        assert_eq!(left.stop(false)?, 1);
        assert_eq!(right.stop(false)?, 0);
        assert!(!h.is_device_open());
        Ok(())
    }

    #[test]
    fn forced_stop_releases_for_everyone() -> Result<()> {
        let h = handle();
        let (left, _l) = detector("LEFT", h.clone(), BoundingBox::full_frame(16, 8)?, 50)?;
        let (right, _r) = detector("RIGHT", h.clone(), BoundingBox::full_frame(16, 8)?, 50)?;
        left.start()?;
        right.start()?;

        assert_eq!(left.stop(true)?, 0);
        assert!(!h.is_device_open());
        assert_eq!(right.stop(false)?, 0);
        Ok(())
    }

    #[test]
    fn restart_after_forced_stop_survives_other_stops() -> Result<()> {
        let h = handle();
        let (left, _l) = detector("LEFT", h.clone(), BoundingBox::full_frame(16, 8)?, 50)?;
        let (right, _r) = detector("RIGHT", h.clone(), BoundingBox::full_frame(16, 8)?, 50)?;
        left.start()?;
        right.start()?;

        left.stop(true)?;
        left.start()?;
        assert_eq!(h.ref_count(), 1);

        // RIGHT's registration was voided by the forced stop; stopping it
        // must not take the device away from the restarted LEFT.
        assert_eq!(right.stop(false)?, 1);
        assert!(h.is_device_open());
        assert!(left.is_running());
        assert!(h.read_frame().is_ok());

        assert_eq!(left.stop(false)?, 0);
        assert!(!h.is_device_open());
        Ok(())
    }

    #[test]
    fn forced_stop_of_idle_detector_releases_device() -> Result<()> {
        let h = handle();
        let (left, _l) = detector("LEFT", h.clone(), BoundingBox::full_frame(16, 8)?, 50)?;
        let (right, _r) = detector("RIGHT", h.clone(), BoundingBox::full_frame(16, 8)?, 50)?;
        right.start()?;

        assert_eq!(left.stop(false)?, 1);
        assert_eq!(left.stop(true)?, 0);
        assert!(!h.is_device_open());
        assert_eq!(right.stop(false)?, 0);
        Ok(())
    }

    #[test]
    fn ticks_push_frames_after_bootstrap() -> Result<()> {
        let h = handle();
        let (d, rx) = detector("LEFT", h, BoundingBox::full_frame(16, 8)?, 100)?;
        d.start()?;
        let event = rx.recv_timeout(Duration::from_secs(5))?;
        d.stop(false)?;

        match event {
            SinkEvent::Frame(update) => {
                assert_eq!(update.location, "LEFT");
                assert!(!update.preview);
                assert!(!update.train_detected);
                assert_eq!(update.diff_intensity_sum, 0.0);
                assert_eq!(update.image.dimensions(), (16, 8));
            }
            other => panic!("unexpected event {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn preview_pushes_display_only_frame() -> Result<()> {
        let h = handle();
        let (d, rx) = detector("LEFT", h.clone(), BoundingBox::new(2, 2, 10, 6)?, 10)?;
        let image = d.preview_once()?;
        assert_eq!(image.dimensions(), (16, 8));
        assert!(!h.is_device_open());

        match rx.try_recv()? {
            SinkEvent::Frame(update) => assert!(update.preview),
            other => panic!("unexpected event {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn period_follows_fps() -> Result<()> {
        assert_eq!(Schedule::new(4, RES).period()?, Duration::from_millis(250));
        assert_eq!(Schedule::new(5000, RES).period()?, Duration::from_millis(1));
        assert!(Schedule::new(0, RES).period().is_err());
        Ok(())
    }
}
