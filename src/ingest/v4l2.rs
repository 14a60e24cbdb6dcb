//! V4L2 frame source.
//!
//! `V4l2Source` captures from a local device node (e.g. /dev/video0):
//! - `open` claims the device node
//! - `configure` negotiates resolution and pixel format, then maps buffers
//! - `read_frame` dequeues one buffer and normalizes it to RGB24
//! - `release` drops the stream and the device handle
//!
//! RGB3 is requested first; webcams that only offer YUYV are converted.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::Instant;

use super::normalize::{decode_frame, PixelFormat};
use super::CaptureDevice;
use crate::frame::{RawFrame, Resolution};

/// Buffers mapped for streaming capture.
const STREAM_BUFFERS: u32 = 4;

pub struct V4l2Source {
    path: String,
    device: Option<v4l::Device>,
    state: Option<StreamState>,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

#[self_referencing]
struct StreamState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn open(path: &str) -> Result<Self> {
        let device =
            v4l::Device::with_path(path).with_context(|| format!("open v4l2 device {}", path))?;
        log::info!("V4l2Source: opened {}", path);
        Ok(Self {
            path: path.to_string(),
            device: Some(device),
            state: None,
            format: PixelFormat::Rgb24,
            active_width: 0,
            active_height: 0,
            frame_count: 0,
            last_frame_at: None,
        })
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    pub fn last_frame_at(&self) -> Option<Instant> {
        self.last_frame_at
    }

    fn take_device(&mut self) -> Option<v4l::Device> {
        match self.state.take() {
            Some(state) => Some(state.into_heads().device),
            None => self.device.take(),
        }
    }

    fn negotiate(&mut self, device: &v4l::Device, width: u32, height: u32) -> Result<()> {
        use v4l::video::Capture;

        let mut requested = device.format().context("read v4l2 format")?;
        requested.width = width;
        requested.height = height;

        for fourcc in [b"RGB3", b"YUYV"] {
            requested.fourcc = v4l::FourCC::new(fourcc);
            match device.set_format(&requested) {
                Ok(actual) => {
                    let Some(format) = PixelFormat::from_fourcc(&actual.fourcc.repr) else {
                        continue;
                    };
                    self.format = format;
                    self.active_width = actual.width;
                    self.active_height = actual.height;
                    return Ok(());
                }
                Err(err) => {
                    log::warn!(
                        "V4l2Source: {} rejected {}: {}",
                        self.path,
                        String::from_utf8_lossy(fourcc),
                        err
                    );
                }
            }
        }
        Err(anyhow!("{} offers neither RGB3 nor YUYV capture", self.path))
    }
}

impl CaptureDevice for V4l2Source {
    fn configure(&mut self, width: u32, height: u32) -> Result<Resolution> {
        use v4l::buffer::Type;

        let device = self
            .take_device()
            .ok_or_else(|| anyhow!("{} is released", self.path))?;
        if let Err(err) = self.negotiate(&device, width, height) {
            self.device = Some(device);
            return Err(err);
        }

        let state = StreamStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: {} capturing {}x{} {:?}",
            self.path,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(Resolution {
            width: self.active_width,
            height: self.active_height,
        })
    }

    fn read_frame(&mut self) -> Result<RawFrame> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .with_context(|| format!("{} is not configured", self.path))?;
        let buf = state
            .with_stream_mut(|stream| stream.next().map(|(buf, _meta)| buf.to_vec()))
            .context("capture v4l2 frame")?;

        let frame = decode_frame(&buf, self.active_width, self.active_height, self.format)?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(frame)
    }

    fn release(&mut self) {
        if self.take_device().is_some() {
            log::info!(
                "V4l2Source: released {} after {} frames",
                self.path,
                self.frame_count
            );
        }
    }

    fn is_open(&self) -> bool {
        self.state.is_some() || self.device.is_some()
    }
}
