//! Frame types and the preprocessing stage.
//!
//! - `RawFrame`: packed RGB24 pixels exactly as a frame source delivered them.
//! - `Resolution`: a frame size, requested or settled.
//! - `BoundingBox`: the region of interest, in source-frame coordinates.
//! - `preprocess`: grayscale conversion + ROI crop, the first pipeline stage.
//!
//! Every later stage works on `image::GrayImage`. A grayscale frame is owned by
//! the tick that produced it; only the differencer keeps one around (as the
//! baseline for the next tick).

use anyhow::{anyhow, Result};
use image::{imageops, GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// RawFrame: source pixels
// ----------------------------------------------------------------------------

/// A full-resolution frame as delivered by a `CaptureDevice`.
///
/// Pixels are packed RGB24, row-major, no padding.
#[derive(Clone, Debug)]
pub struct RawFrame {
    image: RgbImage,
}

impl RawFrame {
    /// Wrap packed RGB24 bytes. Fails if the length does not match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow: {}x{}", width, height))?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| anyhow!("RGB buffer rejected for {}x{}", width, height))?;
        Ok(Self { image })
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_rgb(self) -> RgbImage {
        self.image
    }
}

/// Frame size in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

// ----------------------------------------------------------------------------
// BoundingBox: region of interest
// ----------------------------------------------------------------------------

/// Rectangular region of interest, corners in source-frame pixels.
///
/// `x2`/`y2` are exclusive. Corners are normalized on construction, so a box
/// dragged from bottom-right to top-left is the same box.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[u32; 4]", into = "[u32; 4]")]
pub struct BoundingBox {
    x1: u32,
    y1: u32,
    x2: u32,
    y2: u32,
}

impl BoundingBox {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Result<Self> {
        let bbox = Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        };
        if bbox.width() == 0 || bbox.height() == 0 {
            return Err(anyhow!(
                "bounding box ({},{})-({},{}) has zero width or height",
                x1,
                y1,
                x2,
                y2
            ));
        }
        Ok(bbox)
    }

    /// Box covering a whole `width` x `height` frame.
    pub fn full_frame(width: u32, height: u32) -> Result<Self> {
        Self::new(0, 0, width, height)
    }

    pub fn x1(&self) -> u32 {
        self.x1
    }

    pub fn y1(&self) -> u32 {
        self.y1
    }

    pub fn x2(&self) -> u32 {
        self.x2
    }

    pub fn y2(&self) -> u32 {
        self.y2
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    /// True when the whole box lies inside a `width` x `height` frame.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x2 <= width && self.y2 <= height
    }

    /// Reject a box that does not fit a `width` x `height` frame.
    pub fn check_within(&self, width: u32, height: u32) -> Result<()> {
        if self.fits_within(width, height) {
            Ok(())
        } else {
            Err(RegionError {
                bbox: *self,
                frame_width: width,
                frame_height: height,
            }
            .into())
        }
    }
}

impl TryFrom<[u32; 4]> for BoundingBox {
    type Error = anyhow::Error;

    fn try_from(corners: [u32; 4]) -> Result<Self> {
        let [x1, y1, x2, y2] = corners;
        Self::new(x1, y1, x2, y2)
    }
}

impl From<BoundingBox> for [u32; 4] {
    fn from(bbox: BoundingBox) -> Self {
        [bbox.x1, bbox.y1, bbox.x2, bbox.y2]
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})-({},{})", self.x1, self.y1, self.x2, self.y2)
    }
}

/// The ROI does not fit inside the frame it is applied to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionError {
    pub bbox: BoundingBox,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl std::fmt::Display for RegionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "region {} lies outside {}x{} frame",
            self.bbox, self.frame_width, self.frame_height
        )
    }
}
impl std::error::Error for RegionError {}

// ----------------------------------------------------------------------------
// Preprocessor
// ----------------------------------------------------------------------------

/// Convert to single-channel intensity and crop to the ROI.
///
/// Fails with `RegionError` when the box is not inside the frame. No clamping.
pub fn preprocess(frame: &RawFrame, roi: &BoundingBox) -> Result<GrayImage> {
    roi.check_within(frame.width(), frame.height())?;
    let gray = imageops::grayscale(frame.as_rgb());
    Ok(imageops::crop_imm(&gray, roi.x1, roi.y1, roi.width(), roi.height()).to_image())
}
