use std::{cmp::Ordering, collections::BinaryHeap};

use image::DynamicImage;

use crate::{
    error::{Error, Result},
    sampler,
};

pub const NUM_PIXELS: usize = 128;
pub const NUM_PIXELS_SQUARED: usize = NUM_PIXELS * NUM_PIXELS;
pub const NUM_COEFS: usize = 40;
pub const NUM_CHANNELS: usize = 3;
/// Number of wavelet levels for a 128 sample line.
pub const NUM_LEVELS: u32 = NUM_PIXELS.ilog2();

/// Three 128x128 planes (Y, I, Q) ready for the wavelet transform.
///
/// Every plane always holds exactly [`NUM_PIXELS_SQUARED`] samples in row
/// major order. Constructors assert this.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageData {
    channels: [Vec<f64>; NUM_CHANNELS],
}

impl ImageData {
    pub fn new(y: Vec<f64>, i: Vec<f64>, q: Vec<f64>) -> Self {
        for plane in [&y, &i, &q] {
            assert_eq!(plane.len(), NUM_PIXELS_SQUARED, "Invalid plane size");
        }
        Self {
            channels: [y, i, q],
        }
    }

    /// Builds the planes from a closure over `(x, y)` returning one sample
    /// per channel.
    pub fn from_fn(mut f: impl FnMut(usize, usize) -> [f64; NUM_CHANNELS]) -> Self {
        let mut channels = [(); NUM_CHANNELS].map(|_| vec![0.0; NUM_PIXELS_SQUARED]);
        for y in 0..NUM_PIXELS {
            for x in 0..NUM_PIXELS {
                let index = x + y * NUM_PIXELS;
                for (plane, value) in channels.iter_mut().zip(f(x, y)) {
                    plane[index] = value;
                }
            }
        }
        Self { channels }
    }

    pub fn channel(&self, channel: usize) -> &[f64] {
        &self.channels[channel]
    }

    /// Transforms a copy of the planes; `self` stays usable.
    pub fn signature(&self) -> Signature {
        self.clone().into_signature()
    }

    /// Transforms the planes in place and consumes them, avoiding the copy
    /// made by [`ImageData::signature`].
    pub fn into_signature(mut self) -> Signature {
        let mut avgl = [0.0; NUM_CHANNELS];
        let mut sig = Vec::with_capacity(NUM_COEFS * NUM_CHANNELS);
        for (channel, plane) in self.channels.iter_mut().enumerate() {
            haar_2d(plane);
            avgl[channel] = plane[0] / 256.0;
            normalize(plane);
            let mut largest = largest_coefficients(plane);
            largest.sort_unstable();
            sig.extend(largest);
        }
        Signature {
            avgl: (avgl[0], avgl[1], avgl[2]),
            sig,
        }
    }
}

/// Durable output of the transform: the per channel DC term and the signed
/// positions of the [`NUM_COEFS`] strongest coefficients of each channel.
///
/// `sig` is laid out channel after channel; a negative entry marks a
/// negative coefficient at that position. Equality compares positions as
/// sets, the stored order carries no meaning.
#[derive(Clone, Debug)]
pub struct Signature {
    pub avgl: (f64, f64, f64),
    pub sig: Vec<i16>,
}

impl Signature {
    pub fn from_image(img: &DynamicImage) -> Result<Signature> {
        let data = sampler::sample(img)?;
        Ok(data.into_signature())
    }

    pub fn average(&self, channel: usize) -> f64 {
        match channel {
            0 => self.avgl.0,
            1 => self.avgl.1,
            2 => self.avgl.2,
            _ => panic!("Invalid channel: {channel}"),
        }
    }

    /// Coefficients of one channel.
    pub fn channel(&self, channel: usize) -> &[i16] {
        assert!(channel < NUM_CHANNELS, "Invalid channel: {channel}");
        &self.sig[channel * NUM_COEFS..(channel + 1) * NUM_COEFS]
    }

    /// Iterates `(channel, position)` over every stored coefficient.
    pub fn coefficients(&self) -> impl Iterator<Item = (usize, i16)> + '_ {
        self.sig
            .iter()
            .enumerate()
            .map(|(coef_i, &coef)| (coef_i / NUM_COEFS, coef))
    }

    /// Verifies the fixed shape: [`NUM_COEFS`] per channel, positions in
    /// range and never 0, no position twice within a channel.
    pub fn check(&self) -> Result<()> {
        let expected = NUM_CHANNELS * NUM_COEFS;
        if self.sig.len() != expected {
            return Err(Error::SignatureVersionMismatch {
                expected,
                found: self.sig.len(),
            });
        }
        for (channel, positions) in self.sorted_channels().into_iter().enumerate() {
            let mut positions: Vec<u16> = positions.iter().map(|p| p.unsigned_abs()).collect();
            positions.sort_unstable();
            if positions[0] == 0 || positions[NUM_COEFS - 1] as usize >= NUM_PIXELS_SQUARED {
                return Err(Error::CorruptSignature(format!(
                    "position out of range in channel {channel}"
                )));
            }
            if positions.windows(2).any(|w| w[0] == w[1]) {
                return Err(Error::CorruptSignature(format!(
                    "duplicate position in channel {channel}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn sorted_channels(&self) -> Vec<Vec<i16>> {
        self.sig
            .chunks(NUM_COEFS)
            .map(|chunk| {
                let mut chunk = chunk.to_vec();
                chunk.sort_unstable();
                chunk
            })
            .collect()
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.avgl == other.avgl
            && self.sig.len() == other.sig.len()
            && self.sorted_channels() == other.sorted_channels()
    }
}

/// One dimensional Haar decomposition of the line starting at `start` and
/// walking `stride` samples per step.
///
/// Each level stores `(a + b) / 2` in the front half and `(a - b) / 2` in the
/// back half. With integral inputs every intermediate value is a dyadic
/// rational, so the result is exact.
fn haar_line(a: &mut [f64], start: usize, stride: usize) {
    let mut temp = [0.0; NUM_PIXELS >> 1];

    let mut h = NUM_PIXELS;
    while h > 1 {
        let h1 = h >> 1;
        for (k, slot) in temp.iter_mut().enumerate().take(h1) {
            let j2 = start + 2 * k * stride;
            let j21 = j2 + stride;
            *slot = (a[j2] - a[j21]) / 2.0;
            a[start + k * stride] = (a[j2] + a[j21]) / 2.0;
        }
        for (k, &value) in temp.iter().enumerate().take(h1) {
            a[start + (h1 + k) * stride] = value;
        }
        h = h1;
    }
}

/// Standard 2D decomposition: every row fully, then every column.
fn haar_2d(a: &mut [f64]) {
    assert_eq!(a.len(), NUM_PIXELS_SQUARED, "Invalid plane size");
    for row in 0..NUM_PIXELS {
        haar_line(a, row * NUM_PIXELS, 1);
    }
    for col in 0..NUM_PIXELS {
        haar_line(a, col, NUM_PIXELS);
    }
}

/// Factor turning an averaged coefficient at 1D index `p` into its
/// orthonormal magnitude, `2^(j/2)` where `j` is the level that produced it.
fn level_scale(p: usize) -> f64 {
    let level = if p == 0 {
        NUM_LEVELS
    } else {
        NUM_LEVELS - p.ilog2()
    };
    let even = f64::from(1u32 << (level / 2));
    if level % 2 == 0 {
        even
    } else {
        even * std::f64::consts::SQRT_2
    }
}

/// Rescales detail coefficients so coarse and fine levels compete on an
/// orthonormal footing. Position 0 is left alone.
fn normalize(a: &mut [f64]) {
    let scales: [f64; NUM_PIXELS] = std::array::from_fn(level_scale);
    for (index, value) in a.iter_mut().enumerate().skip(1) {
        *value *= scales[index / NUM_PIXELS] * scales[index % NUM_PIXELS];
    }
}

#[derive(PartialEq)]
struct Candidate {
    magnitude: f64,
    position: usize,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    // Greater means weaker: smaller magnitude, then later position.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .magnitude
            .total_cmp(&self.magnitude)
            .then(self.position.cmp(&other.position))
    }
}

/// Bounded heap selection of the [`NUM_COEFS`] largest magnitudes, skipping
/// position 0. Equal magnitudes keep the lower position.
fn largest_coefficients(data: &[f64]) -> [i16; NUM_COEFS] {
    let mut heap = BinaryHeap::with_capacity(NUM_COEFS + 1);

    for (position, value) in data.iter().enumerate().skip(1) {
        let candidate = Candidate {
            magnitude: value.abs(),
            position,
        };
        if heap.len() < NUM_COEFS {
            heap.push(candidate);
            continue;
        }
        if let Some(weakest) = heap.peek() {
            if candidate < *weakest {
                heap.pop();
                heap.push(candidate);
            }
        }
    }

    let mut sig = [0; NUM_COEFS];
    for (slot, candidate) in sig.iter_mut().zip(heap.into_vec()) {
        let c = candidate.position as i16;
        *slot = if data[candidate.position] < 0.0 { -c } else { c };
    }
    sig
}
