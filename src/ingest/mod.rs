//! Frame sources.
//!
//! The detection core never talks to a camera driver directly. It sees:
//! - `DeviceOpener`: opens a physical device by id
//! - `CaptureDevice`: an opened device that can be configured, read, released
//!
//! Provided implementations:
//! - `SyntheticSource` for `stub://<name>` ids (tests, demos, calibration dry runs)
//! - `V4l2Source` for local device nodes (feature: ingest-v4l2)
//!
//! `SourceOpener` picks between them from the device id.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::frame::{RawFrame, Resolution};

pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Prefix of device ids served by `SyntheticSource`.
pub const STUB_SCHEME: &str = "stub://";

/// An opened capture device.
///
/// Calls are serialized by the owning `SharedCaptureHandle`; implementations
/// do not need their own locking.
pub trait CaptureDevice: Send {
    /// Request a capture resolution and return the size the device settled
    /// on, which may differ from the request. Later frames have that size.
    fn configure(&mut self, width: u32, height: u32) -> Result<Resolution>;

    /// Pull the next frame.
    fn read_frame(&mut self) -> Result<RawFrame>;

    /// Release the underlying device. Further reads fail.
    fn release(&mut self);

    fn is_open(&self) -> bool;
}

/// Opens capture devices by id.
pub trait DeviceOpener: Send + Sync {
    fn open(&self, device_id: &str) -> Result<Box<dyn CaptureDevice>>;
}

/// Default opener: `stub://` ids get a synthetic source, anything else a V4L2
/// device node.
#[derive(Clone, Debug, Default)]
pub struct SourceOpener;

impl DeviceOpener for SourceOpener {
    fn open(&self, device_id: &str) -> Result<Box<dyn CaptureDevice>> {
        if device_id.starts_with(STUB_SCHEME) {
            return Ok(Box::new(SyntheticSource::open(device_id)?));
        }
        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(Box::new(V4l2Source::open(device_id)?))
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            anyhow::bail!(
                "device '{}' requires the ingest-v4l2 feature (only {} ids are built in)",
                device_id,
                STUB_SCHEME
            )
        }
    }
}
