//! Operator-facing frame rendering.
//!
//! Nothing here feeds back into detection; these images only travel to the
//! event sink for whoever displays them.

use image::{imageops, DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::capture::Resolution;
use crate::detect::MotionSample;
use crate::frame::BoundingBox;

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const ROI_OUTLINE_PX: u32 = 5;
const CENTROID_RADIUS_PX: i32 = 3;

/// Uniform scale that fits a `width` x `height` image inside `display`.
pub fn fit_scale(width: u32, height: u32, display: Resolution) -> f64 {
    let x = f64::from(display.width) / f64::from(width.max(1));
    let y = f64::from(display.height) / f64::from(height.max(1));
    x.min(y)
}

/// Motion pixels dark on white, scaled to the display, centroid in red.
pub fn render_motion_view(diff: &GrayImage, sample: &MotionSample, display: Resolution) -> RgbImage {
    let mut inverted = diff.clone();
    imageops::invert(&mut inverted);
    let rgb = DynamicImage::ImageLuma8(inverted).to_rgb8();

    let scale = fit_scale(rgb.width(), rgb.height(), display);
    let mut view = resize_by(&rgb, scale);

    if sample.has_centroid() {
        let center = (
            (sample.centroid_x * scale).round() as i32,
            (sample.centroid_y * scale).round() as i32,
        );
        draw_filled_circle_mut(&mut view, center, CENTROID_RADIUS_PX, RED);
    }
    view
}

/// Full camera frame with the ROI outlined.
pub fn render_roi_overlay(mut frame: RgbImage, roi: &BoundingBox) -> RgbImage {
    for inset in 0..ROI_OUTLINE_PX {
        let width = roi.width().saturating_sub(2 * inset);
        let height = roi.height().saturating_sub(2 * inset);
        if width == 0 || height == 0 {
            break;
        }
        let rect = Rect::at((roi.x1() + inset) as i32, (roi.y1() + inset) as i32)
            .of_size(width, height);
        draw_hollow_rect_mut(&mut frame, rect, GREEN);
    }
    frame
}

/// Scale `image` uniformly to fit inside `display`.
pub fn fit_to_display(image: &RgbImage, display: Resolution) -> RgbImage {
    let scale = fit_scale(image.width(), image.height(), display);
    resize_by(image, scale)
}

fn resize_by(image: &RgbImage, scale: f64) -> RgbImage {
    let width = scaled(image.width(), scale);
    let height = scaled(image.height(), scale);
    imageops::resize(image, width, height, imageops::FilterType::Nearest)
}

fn scaled(length: u32, scale: f64) -> u32 {
    ((f64::from(length) * scale).round() as u32).max(1)
}
