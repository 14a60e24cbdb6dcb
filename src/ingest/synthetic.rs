//! Synthetic frame source for `stub://` device ids.
//!
//! Renders a static textured scene that a bright block (the "train")
//! periodically crosses from one side to the other, plus a little sensor
//! noise. The id after the scheme picks the traffic pattern:
//! - `stub://eastbound`: every pass travels east
//! - `stub://westbound`: every pass travels west
//! - `stub://static`: no traffic, noise only
//! - anything else: passes alternate east, west, east, ...

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use rand::{rngs::StdRng, Rng, SeedableRng};

use super::{CaptureDevice, STUB_SCHEME};
use crate::detect::Direction;
use crate::frame::{RawFrame, Resolution};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
/// Quiet frames between two passes.
const IDLE_FRAMES: u64 = 30;
/// Peak sensor noise, in intensity levels.
const NOISE_AMPLITUDE: i16 = 3;
const TRAIN_LEVEL: u8 = 235;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Traffic {
    Eastbound,
    Westbound,
    Alternating,
    Static,
}

/// Synthetic capture device.
pub struct SyntheticSource {
    device_id: String,
    traffic: Traffic,
    width: u32,
    height: u32,
    open: bool,
    frame_count: u64,
    rng: StdRng,
}

impl SyntheticSource {
    pub fn open(device_id: &str) -> Result<Self> {
        let name = device_id
            .strip_prefix(STUB_SCHEME)
            .ok_or_else(|| anyhow!("synthetic source needs a {} id", STUB_SCHEME))?;
        let traffic = match name {
            "eastbound" => Traffic::Eastbound,
            "westbound" => Traffic::Westbound,
            "static" => Traffic::Static,
            _ => Traffic::Alternating,
        };
        let seed = name
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325u64, |acc, b| {
                (acc ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
            });
        log::info!("SyntheticSource: opened {} ({:?})", device_id, traffic);
        Ok(Self {
            device_id: device_id.to_string(),
            traffic,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            open: true,
            frame_count: 0,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn train_width(&self) -> u32 {
        (self.width / 4).max(1)
    }

    fn speed(&self) -> u32 {
        (self.width / 40).max(1)
    }

    fn crossing_frames(&self) -> u64 {
        u64::from((self.width + self.train_width()).div_ceil(self.speed()))
    }

    /// Left edge of the train for the current frame, if one is in view.
    fn train_left_edge(&self) -> Option<i64> {
        if self.traffic == Traffic::Static {
            return None;
        }
        let cycle = IDLE_FRAMES + self.crossing_frames();
        let pass = self.frame_count / cycle;
        let step = self.frame_count % cycle;
        if step < IDLE_FRAMES {
            return None;
        }
        let travelled = i64::try_from((step - IDLE_FRAMES) * u64::from(self.speed())).ok()?;
        let train_w = i64::from(self.train_width());
        let direction = match self.traffic {
            Traffic::Eastbound => Direction::East,
            Traffic::Westbound => Direction::West,
            _ if pass % 2 == 0 => Direction::East,
            _ => Direction::West,
        };
        Some(match direction {
            Direction::East => travelled - train_w,
            Direction::West => i64::from(self.width) - travelled,
        })
    }

    fn render(&mut self) -> RgbImage {
        let (width, height) = (self.width, self.height);
        let train = self.train_left_edge();
        let train_w = i64::from(self.train_width());
        let (top, bottom) = (height / 3, height * 2 / 3);

        let mut image = RgbImage::from_fn(width, height, |x, y| {
            let base = 40 + ((x / 16 + y / 16) % 2) as u8 * 30;
            Rgb([base, base, base])
        });
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            let in_train = train.is_some_and(|left| {
                let x = i64::from(x);
                x >= left && x < left + train_w && y >= top && y < bottom
            });
            let level = if in_train { TRAIN_LEVEL } else { pixel.0[0] };
            let noise = self.rng.gen_range(-NOISE_AMPLITUDE..=NOISE_AMPLITUDE);
            let noisy = (i16::from(level) + noise).clamp(0, 255) as u8;
            *pixel = Rgb([noisy, noisy, noisy]);
        }
        image
    }
}

impl CaptureDevice for SyntheticSource {
    fn configure(&mut self, width: u32, height: u32) -> Result<Resolution> {
        if width == 0 || height == 0 {
            return Err(anyhow!("invalid synthetic resolution {}x{}", width, height));
        }
        self.width = width;
        self.height = height;
        Ok(Resolution { width, height })
    }

    fn read_frame(&mut self) -> Result<RawFrame> {
        if !self.open {
            return Err(anyhow!("{} is released", self.device_id));
        }
        let image = self.render();
        self.frame_count += 1;
        Ok(RawFrame::from_image(image))
    }

    fn release(&mut self) {
        if self.open {
            log::info!(
                "SyntheticSource: released {} after {} frames",
                self.device_id,
                self.frame_count
            );
        }
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
