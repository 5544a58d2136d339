use serde::{Deserialize, Serialize};

use crate::haar::{NUM_CHANNELS, NUM_PIXELS};

/// Highest importance bucket; every coefficient far from the DC term lands here.
pub const MAX_BUCKET: usize = 5;

/// Which calibration of the weight table to score with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Scanned or photographic query images.
    #[default]
    Photographic,
    /// Hand-drawn sketches used as queries.
    Sketch,
}

/// Per bucket, per channel (Y, I, Q) weights. Row 0 weighs the averages.
type Table = [[f32; NUM_CHANNELS]; MAX_BUCKET + 1];

const PHOTOGRAPHIC: Table = [
    [5.00, 19.21, 34.37],
    [0.83, 1.26, 0.36],
    [1.01, 0.44, 0.45],
    [0.52, 0.53, 0.14],
    [0.47, 0.28, 0.18],
    [0.30, 0.14, 0.27],
];

const SKETCH: Table = [
    [4.04, 15.14, 22.62],
    [0.78, 0.92, 0.40],
    [0.46, 0.53, 0.63],
    [0.42, 0.26, 0.25],
    [0.41, 0.14, 0.15],
    [0.32, 0.07, 0.38],
];

impl Mode {
    const fn table(self) -> &'static Table {
        match self {
            Mode::Photographic => &PHOTOGRAPHIC,
            Mode::Sketch => &SKETCH,
        }
    }

    /// Weight of a coefficient in `bucket` of `channel`.
    pub const fn weight(self, channel: usize, bucket: usize) -> f32 {
        assert!(channel < NUM_CHANNELS, "Invalid channel");
        assert!(bucket <= MAX_BUCKET, "Invalid bucket");
        self.table()[bucket][channel]
    }

    pub const fn weight_for_average(self, channel: usize) -> f32 {
        self.weight(channel, 0)
    }

    /// Weight of a signed signature position in `channel`.
    pub const fn coefficient_weight(self, channel: usize, position: i16) -> f32 {
        self.weight(channel, position_bucket(position))
    }
}

/// Coarse importance class of a signed flattened position:
/// `min(5, max(row, col))`.
pub const fn position_bucket(position: i16) -> usize {
    let p = position.unsigned_abs() as usize;
    let row = p / NUM_PIXELS;
    let col = p % NUM_PIXELS;
    let bucket = if row > col { row } else { col };
    if bucket > MAX_BUCKET {
        MAX_BUCKET
    } else {
        bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets() {
        assert_eq!(position_bucket(0), 0);
        assert_eq!(position_bucket(1), 1);
        assert_eq!(position_bucket(-1), 1);
        assert_eq!(position_bucket(128), 1);
        assert_eq!(position_bucket(129), 1);
        assert_eq!(position_bucket(3 * 128 + 2), 3);
        assert_eq!(position_bucket(-(2 * 128 + 4)), 4);
        assert_eq!(position_bucket(5), 5);
        assert_eq!(position_bucket(127 * 128 + 127), 5);
    }

    #[test]
    fn detail_weights_are_small_next_to_averages() {
        for mode in [Mode::Photographic, Mode::Sketch] {
            for channel in 0..NUM_CHANNELS {
                let average = mode.weight_for_average(channel);
                for bucket in 1..=MAX_BUCKET {
                    assert!(mode.weight(channel, bucket) > 0.0);
                    assert!(mode.weight(channel, bucket) < average);
                }
            }
        }
    }

    #[test]
    fn modes_differ() {
        assert_ne!(
            Mode::Photographic.weight_for_average(0),
            Mode::Sketch.weight_for_average(0)
        );
        assert_eq!(Mode::default(), Mode::Photographic);
        assert_eq!(Mode::Sketch.coefficient_weight(2, -640), SKETCH[5][2]);
    }

    #[test]
    #[should_panic(expected = "Invalid bucket")]
    fn bucket_out_of_range() {
        Mode::Photographic.weight(0, 6);
    }
}
