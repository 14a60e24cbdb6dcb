//! Capture lifecycle: shared devices and the detectors that poll them.
//!
//! - `SharedCaptureHandle` reference-counts the consumers of one device; the
//!   device is open exactly while at least one consumer holds it.
//! - `DeviceRegistry` hands out one handle per device id and is injected into
//!   whoever builds detectors.
//! - `MotionDetector` owns one periodic capture task and the pipeline state of
//!   one region; tunables live in `DetectorParams`.

mod handle;
mod params;
mod scheduler;

pub use crate::frame::Resolution;
pub use handle::{CaptureLease, DeviceRegistry, SharedCaptureHandle};
pub use params::DetectorParams;
pub use scheduler::{MotionDetector, Schedule, DEFAULT_INITIAL_DELAY};
