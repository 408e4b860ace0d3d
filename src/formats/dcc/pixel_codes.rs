//! Pixel value presence map and the code table built from it

use serde::Serialize;

use super::{DccError, Stage};
use crate::bitstream::BitReader;

/// Number of bits in the pixel value presence map
pub const PRESENCE_MAP_BITS: usize = 256;

/// Maps the compact pixel codes of a direction back to the byte values they
/// stand for. Code `k` is the k-th value marked present, in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PixelCodeTable {
    values: Vec<u8>,
}

impl PixelCodeTable {
    pub fn read(bits: &mut BitReader) -> Result<Self, DccError> {
        let values = (0..PRESENCE_MAP_BITS)
            .filter(|_| bits.read_bool())
            .map(|value| value as u8)
            .collect();

        if !bits.good() {
            return Err(DccError::TruncatedStream {
                stage: Stage::PixelValueMap,
            });
        }
        Ok(PixelCodeTable { values })
    }

    /// Original pixel value for a code
    pub fn value(&self, code: u8) -> Option<u8> {
        self.values.get(code as usize).copied()
    }

    pub fn values(&self) -> &[u8] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
