use serde::{Deserialize, Serialize};

/// Direction of travel across the watched region.
///
/// East is increasing image x.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    East,
    West,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::East => "East",
            Direction::West => "West",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sum of per-pair displacement votes over consecutive centroid x samples.
///
/// Each adjacent pair votes +1 when x increased and -1 otherwise (no change
/// counts against). Pairs touching a NaN sample do not vote.
pub fn direction_votes(samples: &[f64]) -> i64 {
    samples
        .windows(2)
        .filter(|pair| !pair[0].is_nan() && !pair[1].is_nan())
        .map(|pair| if pair[1] > pair[0] { 1 } else { -1 })
        .sum()
}

/// Majority vote of frame-to-frame displacement signs.
///
/// A non-positive vote sum is `West`, which includes ties and sequences with
/// fewer than two usable samples.
pub fn classify_direction(samples: &[f64]) -> Direction {
    let votes = direction_votes(samples);
    if votes <= 0 {
        log::debug!(
            "direction votes={} over {} samples, defaulting to West",
            votes,
            samples.len()
        );
    }
    if votes > 0 {
        Direction::East
    } else {
        Direction::West
    }
}
