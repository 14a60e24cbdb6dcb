use anyhow::{bail, Context, Result};
use image::Rgb;

use crate::frame::RawFrame;

/// Capture layouts `V4l2Source` knows how to decode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    /// Packed 8-bit R, G, B (`RGB3`).
    Rgb24,
    /// Packed 4:2:2 Y0 U Y1 V (`YUYV`).
    Yuyv,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            _ => None,
        }
    }

    fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb24 => 3,
            Self::Yuyv => 2,
        }
    }
}

/// Decode one dequeued buffer into a `RawFrame`.
///
/// Drivers may hand back buffers longer than the image (page-rounded); only
/// the leading image bytes are read.
pub(crate) fn decode_frame(
    buf: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<RawFrame> {
    let needed = (width as usize)
        .checked_mul(height as usize)
        .and_then(|px| px.checked_mul(format.bytes_per_pixel()))
        .with_context(|| format!("{:?} frame {}x{} overflows", format, width, height))?;
    if buf.len() < needed {
        bail!(
            "short {:?} buffer for {}x{}: need {} bytes, got {}",
            format,
            width,
            height,
            needed,
            buf.len()
        );
    }
    let buf = &buf[..needed];

    match format {
        PixelFormat::Rgb24 => RawFrame::new(buf.to_vec(), width, height),
        PixelFormat::Yuyv => {
            if width % 2 != 0 {
                bail!("YUYV needs an even width, got {}", width);
            }
            let mut rgb = Vec::with_capacity(needed / 2 * 3);
            for quad in buf.chunks_exact(4) {
                for luma in [quad[0], quad[2]] {
                    rgb.extend_from_slice(&ycbcr_to_rgb(luma, quad[1], quad[3]).0);
                }
            }
            RawFrame::new(rgb, width, height)
        }
    }
}

/// BT.601 full-range conversion.
fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> Rgb<u8> {
    let y = f32::from(y);
    let cb = f32::from(cb) - 128.0;
    let cr = f32::from(cr) - 128.0;
    let channel = |value: f32| value.round().clamp(0.0, 255.0) as u8;
    Rgb([
        channel(y + 1.402 * cr),
        channel(y - 0.344_136 * cb - 0.714_136 * cr),
        channel(y + 1.772 * cb),
    ])
}
