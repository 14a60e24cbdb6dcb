use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};

use crate::frame::{RawFrame, Resolution};
use crate::ingest::{CaptureDevice, DeviceOpener};

struct HandleState {
    ref_count: usize,
    device: Option<Box<dyn CaptureDevice>>,
    /// Size the open device settled on.
    active: Option<Resolution>,
    /// Bumped by every forced release; leases from earlier generations are void.
    generation: u64,
}

/// Proof of one successful `acquire`.
///
/// Consumed by `SharedCaptureHandle::release`, so a consumer can give back
/// only what it took. A forced release voids every outstanding lease.
#[derive(Debug)]
#[must_use = "dropping a lease without releasing it keeps the device open"]
pub struct CaptureLease {
    generation: u64,
    frame: Resolution,
}

impl CaptureLease {
    /// Size of the frames the device delivers under this lease.
    pub fn frame_size(&self) -> Resolution {
        self.frame
    }
}

/// Reference-counted access to one physical capture device.
///
/// Every logical consumer calls `acquire` when its capture starts and hands
/// the returned lease to `release` when it stops. The device is opened on the
/// 0 -> 1 transition and released when the count returns to 0 or on
/// `force_release`. All transitions and reads go through one mutex.
#[derive(Clone)]
pub struct SharedCaptureHandle {
    device_id: Arc<str>,
    resolution: Resolution,
    opener: Arc<dyn DeviceOpener>,
    state: Arc<Mutex<HandleState>>,
}

impl SharedCaptureHandle {
    pub fn new(device_id: &str, resolution: Resolution, opener: Arc<dyn DeviceOpener>) -> Self {
        Self {
            device_id: Arc::from(device_id),
            resolution,
            opener,
            state: Arc::new(Mutex::new(HandleState {
                ref_count: 0,
                device: None,
                active: None,
                generation: 0,
            })),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Resolution requested when the device is opened.
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Resolution the device settled on, while it is open.
    pub fn active_resolution(&self) -> Option<Resolution> {
        self.lock().ok().and_then(|state| state.active)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HandleState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("capture handle lock poisoned for {}", self.device_id))
    }

    fn open_device(&self) -> Result<(Box<dyn CaptureDevice>, Resolution)> {
        let mut device = self.opener.open(&self.device_id)?;
        let settled = match device.configure(self.resolution.width, self.resolution.height) {
            Ok(settled) => settled,
            Err(err) => {
                device.release();
                return Err(err);
            }
        };
        if settled != self.resolution {
            log::warn!(
                "capture device {} settled on {}x{} (requested {}x{})",
                self.device_id,
                settled.width,
                settled.height,
                self.resolution.width,
                self.resolution.height
            );
        }
        log::info!(
            "capture device {} opened at {}x{}",
            self.device_id,
            settled.width,
            settled.height
        );
        Ok((device, settled))
    }

    fn close_device(&self, state: &mut HandleState, forced: bool) {
        state.active = None;
        if let Some(mut device) = state.device.take() {
            device.release();
            log::info!(
                "capture device {} released{}",
                self.device_id,
                if forced { " (forced)" } else { "" }
            );
        }
    }

    /// Register one consumer, opening the device if it is the first.
    ///
    /// On failure the count is unchanged.
    pub fn acquire(&self) -> Result<CaptureLease> {
        let mut state = self.lock()?;
        let frame = match (state.device.is_some(), state.active) {
            (true, Some(frame)) => frame,
            _ => {
                let (device, settled) = self.open_device()?;
                state.device = Some(device);
                state.active = Some(settled);
                settled
            }
        };
        state.ref_count += 1;
        log::debug!(
            "capture device {} consumers={}",
            self.device_id,
            state.ref_count
        );
        Ok(CaptureLease {
            generation: state.generation,
            frame,
        })
    }

    /// Give back one lease. Returns the remaining consumer count.
    ///
    /// A lease voided by `force_release` leaves the count untouched.
    pub fn release(&self, lease: CaptureLease) -> Result<usize> {
        let mut state = self.lock()?;
        if lease.generation != state.generation {
            log::debug!(
                "capture device {}: ignoring lease voided by a forced release",
                self.device_id
            );
            return Ok(state.ref_count);
        }
        state.ref_count = state.ref_count.saturating_sub(1);
        if state.ref_count == 0 {
            self.close_device(&mut state, false);
        }
        Ok(state.ref_count)
    }

    /// Release the device and zero the count regardless of outstanding leases.
    pub fn force_release(&self) -> Result<usize> {
        let mut state = self.lock()?;
        state.ref_count = 0;
        state.generation += 1;
        self.close_device(&mut state, true);
        Ok(0)
    }

    /// Read one frame for a registered consumer.
    pub fn read_frame(&self) -> Result<RawFrame> {
        let mut state = self.lock()?;
        let device = state
            .device
            .as_mut()
            .ok_or_else(|| anyhow!("capture device {} is not open", self.device_id))?;
        device.read_frame()
    }

    /// Read one frame outside any capture loop.
    ///
    /// If nobody holds the device it is opened for this read only and
    /// released again before returning.
    pub fn read_preview_frame(&self) -> Result<RawFrame> {
        let mut state = self.lock()?;
        if let Some(device) = state.device.as_mut() {
            return device.read_frame();
        }
        let (mut device, _) = self.open_device()?;
        let frame = device.read_frame();
        device.release();
        frame
    }

    pub fn ref_count(&self) -> usize {
        self.lock().map(|state| state.ref_count).unwrap_or(0)
    }

    pub fn is_device_open(&self) -> bool {
        self.lock()
            .map(|state| state.device.as_ref().is_some_and(|d| d.is_open()))
            .unwrap_or(false)
    }
}

/// Hands out one `SharedCaptureHandle` per device id.
///
/// Detectors that name the same device get clones of the same handle and so
/// share its reference count.
pub struct DeviceRegistry {
    opener: Arc<dyn DeviceOpener>,
    resolution: Resolution,
    handles: Mutex<HashMap<String, SharedCaptureHandle>>,
}

impl DeviceRegistry {
    pub fn new(opener: Arc<dyn DeviceOpener>, resolution: Resolution) -> Self {
        Self {
            opener,
            resolution,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Handle for `device_id`, created on first use.
    pub fn handle(&self, device_id: &str) -> Result<SharedCaptureHandle> {
        let mut handles = self
            .handles
            .lock()
            .map_err(|_| anyhow!("device registry lock poisoned"))?;
        let handle = handles
            .entry(device_id.to_string())
            .or_insert_with(|| {
                SharedCaptureHandle::new(device_id, self.resolution, self.opener.clone())
            })
            .clone();
        Ok(handle)
    }

    /// Known device ids.
    pub fn list(&self) -> Vec<String> {
        self.handles
            .lock()
            .map(|handles| handles.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Force-release every device, e.g. on process shutdown.
    pub fn release_all(&self) -> Result<()> {
        let handles: Vec<SharedCaptureHandle> = self
            .handles
            .lock()
            .map_err(|_| anyhow!("device registry lock poisoned"))?
            .values()
            .cloned()
            .collect();
        for handle in handles {
            handle.force_release()?;
        }
        Ok(())
    }
}
