//! Decoder for DCC sprite animations
//!
//! Parses the file header and direction offset table, the packed direction
//! and frame headers, the per-direction pixel code table, and reconstructs
//! the cell entry log every frame resolves to.

pub mod binary_utils;
pub mod bitstream;
pub mod formats;

#[cfg(test)]
mod testing;

pub use bitstream::{BitReader, BitWidth};
pub use formats::dcc::{Dcc, DccError, DecodeOptions, DecodedDirection, DirectionInfo};
