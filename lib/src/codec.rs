//! Binary blob layout persisted per image:
//!
//! ```text
//! u8   version                 = 1
//! u8   channel count           = 3
//! u8   coefficients per channel = 40
//! f64  average[3]              little endian
//! i32  coefficients[3][40]     little endian, signed positions
//! ```

use std::{fmt, str::FromStr};

use crate::{
    error::{Error, Result},
    haar::{Signature, NUM_CHANNELS, NUM_COEFS, NUM_PIXELS_SQUARED},
};

pub const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 3;
pub const ENCODED_LEN: usize = HEADER_LEN + NUM_CHANNELS * 8 + NUM_CHANNELS * NUM_COEFS * 4;
const HASH_PREFIX: &str = "hsig_";

fn corrupt(message: impl Into<String>) -> Error {
    Error::CorruptSignature(message.into())
}

impl Signature {
    pub fn encode(&self) -> Vec<u8> {
        assert_eq!(self.sig.len(), NUM_CHANNELS * NUM_COEFS, "Invalid signature");
        let mut bytes = Vec::with_capacity(ENCODED_LEN);
        bytes.extend([FORMAT_VERSION, NUM_CHANNELS as u8, NUM_COEFS as u8]);
        for avgl in [self.avgl.0, self.avgl.1, self.avgl.2] {
            bytes.extend(avgl.to_le_bytes());
        }
        for &coef in &self.sig {
            bytes.extend(i32::from(coef).to_le_bytes());
        }
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Signature> {
        if bytes.len() != ENCODED_LEN {
            return Err(corrupt(format!(
                "expected {ENCODED_LEN} bytes, found {}",
                bytes.len()
            )));
        }
        let (header, body) = bytes.split_at(HEADER_LEN);
        if header[0] != FORMAT_VERSION {
            return Err(corrupt(format!("unknown format version {}", header[0])));
        }
        if header[1] as usize != NUM_CHANNELS {
            return Err(corrupt(format!("unexpected channel count {}", header[1])));
        }
        if header[2] as usize != NUM_COEFS {
            return Err(corrupt(format!(
                "unexpected coefficient count {}",
                header[2]
            )));
        }

        let (averages, coefs) = body.split_at(NUM_CHANNELS * 8);
        let mut avgl = [0.0; NUM_CHANNELS];
        for (slot, chunk) in avgl.iter_mut().zip(averages.chunks_exact(8)) {
            let mut raw = [0; 8];
            raw.copy_from_slice(chunk);
            *slot = f64::from_le_bytes(raw);
            if !slot.is_finite() {
                return Err(corrupt("non-finite average"));
            }
        }

        let mut sig = Vec::with_capacity(NUM_CHANNELS * NUM_COEFS);
        for chunk in coefs.chunks_exact(4) {
            let coef = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            if coef == 0 || coef.unsigned_abs() as usize >= NUM_PIXELS_SQUARED {
                return Err(corrupt(format!("position {coef} out of range")));
            }
            sig.push(coef as i16);
        }

        let signature = Signature {
            avgl: (avgl[0], avgl[1], avgl[2]),
            sig,
        };
        signature.check()?;
        Ok(signature)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(HASH_PREFIX)?;
        for byte in self.encode() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for Signature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let hex = s
            .strip_prefix(HASH_PREFIX)
            .ok_or_else(|| corrupt("missing hash prefix"))?;
        if hex.len() % 2 != 0 || !hex.is_ascii() {
            return Err(corrupt("invalid hex length"));
        }
        let bytes = (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|e| corrupt(format!("invalid hex: {e}")))?;
        Signature::decode(&bytes)
    }
}
