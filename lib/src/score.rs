use crate::{
    error::{Error, Result},
    haar::{Signature, NUM_CHANNELS, NUM_COEFS, NUM_PIXELS_SQUARED},
    weights::Mode,
};

type Packed = u64;
const WORDS_PER_CHANNEL: usize = 2 * NUM_PIXELS_SQUARED / Packed::BITS as usize;

/// Constant time membership test over signed positions, one bitset per
/// channel covering `-(128² - 1)..=128² - 1`.
#[derive(Clone)]
pub struct SignatureMap {
    masks: [Vec<Packed>; NUM_CHANNELS],
}

impl SignatureMap {
    pub fn new(signature: &Signature) -> Self {
        let mut map = Self {
            masks: [(); NUM_CHANNELS].map(|_| vec![0; WORDS_PER_CHANNEL]),
        };
        for (channel, coef) in signature.coefficients() {
            let (Some(mask), Some((index, offset))) = (map.masks.get_mut(channel), Self::slot(coef))
            else {
                continue;
            };
            mask[index] |= 1 << offset;
        }
        map
    }

    /// `None` for positions outside the grid.
    fn slot(coef: i16) -> Option<(usize, u32)> {
        if coef.unsigned_abs() as usize >= NUM_PIXELS_SQUARED {
            return None;
        }
        let bit = (coef as i32 + NUM_PIXELS_SQUARED as i32) as usize;
        Some((bit / Packed::BITS as usize, bit as u32 % Packed::BITS))
    }

    pub fn contains(&self, channel: usize, coef: i16) -> bool {
        let Some((index, offset)) = Self::slot(coef) else {
            return false;
        };
        self.masks[channel][index] & (1 << offset) != 0
    }
}

fn check_shape(signature: &Signature) -> Result<()> {
    let expected = NUM_CHANNELS * NUM_COEFS;
    if signature.sig.len() != expected {
        return Err(Error::SignatureVersionMismatch {
            expected,
            found: signature.sig.len(),
        });
    }
    Ok(())
}

/// Scores many candidates against one query signature.
///
/// Lower is more similar. Averages add `weight * |Δ|` per channel and every
/// coefficient both signatures share (same position, same sign) subtracts
/// twice its weight. The value only ranks; it is not a normalized metric.
pub struct Scorer<'a> {
    query: &'a Signature,
    map: SignatureMap,
    mode: Mode,
    self_distance: f64,
}

impl<'a> Scorer<'a> {
    /// Fails unless `query` passes [`Signature::check`].
    pub fn new(query: &'a Signature, mode: Mode) -> Result<Self> {
        query.check()?;
        let self_distance = -2.0
            * query
                .coefficients()
                .map(|(channel, coef)| f64::from(mode.coefficient_weight(channel, coef)))
                .sum::<f64>();
        Ok(Self {
            query,
            map: SignatureMap::new(query),
            mode,
            self_distance,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn score(&self, candidate: &Signature) -> Result<f64> {
        check_shape(candidate)?;
        let mut distance = 0.0;
        for channel in 0..NUM_CHANNELS {
            let delta = (self.query.average(channel) - candidate.average(channel)).abs();
            distance += f64::from(self.mode.weight_for_average(channel)) * delta;
        }
        for (channel, coef) in candidate.coefficients() {
            if self.map.contains(channel, coef) {
                distance -= 2.0 * f64::from(self.mode.coefficient_weight(channel, coef));
            }
        }
        Ok(distance)
    }

    /// Number of `(channel, position)` pairs shared with `candidate`.
    pub fn shared(&self, candidate: &Signature) -> usize {
        candidate
            .coefficients()
            .filter(|&(channel, coef)| self.map.contains(channel, coef))
            .count()
    }

    /// Maps a distance onto a percentage where the query scored against
    /// itself is 100. Presentation only; ranking uses the raw distance.
    pub fn similarity(&self, distance: f64) -> f32 {
        if self.self_distance == 0.0 {
            return 0.0;
        }
        (100.0 * distance / self.self_distance) as f32
    }
}

/// Distance between two signatures under `mode`.
pub fn score(query: &Signature, candidate: &Signature, mode: Mode) -> Result<f64> {
    Scorer::new(query, mode)?.score(candidate)
}
