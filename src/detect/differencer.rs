use image::{GrayImage, Luma};

/// Binarized value for a changed pixel.
pub const MOTION_PIXEL: u8 = u8::MAX;

/// Frame differencing against the previous preprocessed frame.
///
/// Holds exactly one frame: the baseline for the next call.
#[derive(Default)]
pub struct Differencer {
    previous: Option<GrayImage>,
}

impl Differencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `current` against the stored baseline and binarize.
    ///
    /// Returns `None` when there is no baseline yet or the baseline has other
    /// dimensions (the ROI changed). In both cases, and on success, `current`
    /// becomes the new baseline.
    pub fn process(&mut self, current: &GrayImage, threshold: f64) -> Option<GrayImage> {
        let diff = match &self.previous {
            Some(previous) if previous.dimensions() == current.dimensions() => {
                Some(binarized_absdiff(current, previous, threshold))
            }
            Some(previous) => {
                log::debug!(
                    "baseline reset: {:?} -> {:?}",
                    previous.dimensions(),
                    current.dimensions()
                );
                None
            }
            None => None,
        };
        self.previous = Some(current.clone());
        diff
    }

    pub fn has_baseline(&self) -> bool {
        self.previous.is_some()
    }

    /// Drop the baseline; the next call bootstraps again.
    pub fn reset(&mut self) {
        self.previous = None;
    }
}

fn binarized_absdiff(current: &GrayImage, previous: &GrayImage, threshold: f64) -> GrayImage {
    let (width, height) = current.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let a = current.get_pixel(x, y).0[0];
        let b = previous.get_pixel(x, y).0[0];
        if f64::from(a.abs_diff(b)) >= threshold {
            Luma([MOTION_PIXEL])
        } else {
            Luma([0])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_only_sets_baseline() {
        let mut differ = Differencer::new();
        let frame = GrayImage::from_pixel(4, 4, Luma([10]));

        assert!(differ.process(&frame, 20.0).is_none());
        assert!(differ.has_baseline());
    }

    #[test]
    fn binarizes_against_threshold_inclusively() {
        let mut differ = Differencer::new();
        let baseline = GrayImage::from_pixel(3, 1, Luma([100]));
        differ.process(&baseline, 20.0);

        let mut current = baseline.clone();
        current.put_pixel(0, 0, Luma([119])); // diff 19
        current.put_pixel(1, 0, Luma([80])); // diff 20
        current.put_pixel(2, 0, Luma([200])); // diff 100

        let diff = differ.process(&current, 20.0).expect("sample");
        assert_eq!(diff.as_raw(), &vec![0, MOTION_PIXEL, MOTION_PIXEL]);
    }

    #[test]
    fn dimension_change_resets_baseline() {
        let mut differ = Differencer::new();
        differ.process(&GrayImage::new(4, 4), 10.0);

        let wider = GrayImage::from_pixel(6, 4, Luma([50]));
        assert!(differ.process(&wider, 10.0).is_none());

        // The wider frame is now the baseline.
        let diff = differ.process(&wider, 10.0).expect("sample");
        assert_eq!(diff.dimensions(), (6, 4));
        assert!(diff.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn baseline_follows_every_frame() {
        let mut differ = Differencer::new();
        differ.process(&GrayImage::from_pixel(2, 2, Luma([0])), 10.0);
        differ.process(&GrayImage::from_pixel(2, 2, Luma([90])), 10.0);

        // Compared against 90, not against the first frame.
        let diff = differ
            .process(&GrayImage::from_pixel(2, 2, Luma([95])), 10.0)
            .expect("sample");
        assert!(diff.pixels().all(|p| p.0[0] == 0));
    }
}
