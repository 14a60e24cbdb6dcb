use image::GrayImage;

/// Per-tick motion measurement taken from a binarized difference frame.
#[derive(Clone, Copy, Debug)]
pub struct MotionSample {
    /// Zeroth moment: sum of all pixel values.
    pub intensity_sum: f64,
    /// NaN when `intensity_sum` is zero.
    pub centroid_x: f64,
    /// NaN when `intensity_sum` is zero.
    pub centroid_y: f64,
}

impl MotionSample {
    pub fn has_centroid(&self) -> bool {
        !self.centroid_x.is_nan() && !self.centroid_y.is_nan()
    }
}

/// Zeroth and first image moments of `diff`.
///
/// An empty difference frame yields a NaN centroid, never an error.
pub fn analyze_moments(diff: &GrayImage) -> MotionSample {
    let mut m00 = 0.0f64;
    let mut m10 = 0.0f64;
    let mut m01 = 0.0f64;
    for (x, y, pixel) in diff.enumerate_pixels() {
        let value = f64::from(pixel.0[0]);
        if value == 0.0 {
            continue;
        }
        m00 += value;
        m10 += f64::from(x) * value;
        m01 += f64::from(y) * value;
    }

    if m00 == 0.0 {
        return MotionSample {
            intensity_sum: 0.0,
            centroid_x: f64::NAN,
            centroid_y: f64::NAN,
        };
    }

    MotionSample {
        intensity_sum: m00,
        centroid_x: m10 / m00,
        centroid_y: m01 / m00,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn empty_frame_has_nan_centroid() {
        let sample = analyze_moments(&GrayImage::new(8, 8));
        assert_eq!(sample.intensity_sum, 0.0);
        assert!(sample.centroid_x.is_nan());
        assert!(sample.centroid_y.is_nan());
        assert!(!sample.has_centroid());
    }

    #[test]
    fn centroid_is_mean_of_motion_pixels() {
        let mut diff = GrayImage::new(10, 10);
        diff.put_pixel(2, 4, Luma([255]));
        diff.put_pixel(6, 8, Luma([255]));

        let sample = analyze_moments(&diff);
        assert_eq!(sample.intensity_sum, 510.0);
        assert!((sample.centroid_x - 4.0).abs() < 1e-9);
        assert!((sample.centroid_y - 6.0).abs() < 1e-9);
    }

    #[test]
    fn centroid_is_nan_exactly_when_sum_is_zero() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let density: f64 = rng.gen_range(0.0..0.05);
            let diff = GrayImage::from_fn(12, 9, |_, _| {
                if rng.gen_bool(density) {
                    Luma([255])
                } else {
                    Luma([0])
                }
            });
            let sample = analyze_moments(&diff);
            assert_eq!(sample.centroid_x.is_nan(), sample.intensity_sum == 0.0);
            assert_eq!(sample.centroid_y.is_nan(), sample.intensity_sum == 0.0);
        }
    }
}
