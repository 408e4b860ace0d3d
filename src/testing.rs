//! Test-only LSB-first bit writer mirroring [`crate::bitstream::BitReader`].

use crate::formats::dcc::{DCC_SIGNATURE, FIXED_HEADER_SIZE};

#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, value: u32, bits: u32) {
        for i in 0..bits {
            self.push_bit((value >> i) & 1 != 0);
        }
    }

    pub fn write_signed(&mut self, value: i32, bits: u32) {
        self.write(value as u32, bits);
    }

    pub fn write_bool(&mut self, bit: bool) {
        self.push_bit(bit);
    }

    pub fn align(&mut self) {
        while self.bit_len % 8 != 0 {
            self.push_bit(false);
        }
    }

    /// Append all bits written to `other`
    pub fn append(&mut self, other: BitWriter) {
        for i in 0..other.bit_len {
            self.push_bit(other.bytes[i / 8] & (1 << (i % 8)) != 0);
        }
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn push_bit(&mut self, bit: bool) {
        if self.bit_len % 8 == 0 {
            self.bytes.push(0);
        }
        if bit {
            let last = self.bytes.len() - 1;
            self.bytes[last] |= 1 << (self.bit_len % 8);
        }
        self.bit_len += 1;
    }
}

/// Selectors used by fixture directions: variable0 and coded bytes are
/// zero-width, sizes and offsets are 8 bits, optional byte counts 4 bits
pub const FIXTURE_SELECTORS: [u8; 7] = [0, 5, 5, 5, 5, 3, 0];

#[derive(Debug, Clone, Default)]
pub struct FrameSpec {
    pub width: u32,
    pub height: u32,
    pub x_offset: i32,
    pub y_offset: i32,
    pub bottom_up: bool,
    pub optional: Vec<u8>,
}

impl FrameSpec {
    pub fn new(x_offset: i32, y_offset: i32, width: u32, height: u32) -> Self {
        FrameSpec {
            width,
            height,
            x_offset,
            y_offset,
            bottom_up: true,
            optional: Vec::new(),
        }
    }
}

/// Everything needed to lay out one direction's bit-stream
#[derive(Debug, Default)]
pub struct DirectionSpec {
    pub outsize_coded: u32,
    pub has_raw_pixel_encoding: bool,
    pub compress_equal_cells: bool,
    pub frames: Vec<FrameSpec>,
    pub present_values: Vec<u8>,
    pub equal_cells: BitWriter,
    pub pixel_mask: BitWriter,
    pub raw_usage: BitWriter,
    pub raw_codes: BitWriter,
}

pub fn encode_direction(spec: DirectionSpec) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write(spec.outsize_coded, 32);
    w.write_bool(spec.has_raw_pixel_encoding);
    w.write_bool(spec.compress_equal_cells);
    for selector in FIXTURE_SELECTORS {
        w.write(selector as u32, 4);
    }

    for frame in &spec.frames {
        w.write(frame.width, 8);
        w.write(frame.height, 8);
        w.write_signed(frame.x_offset, 8);
        w.write_signed(frame.y_offset, 8);
        w.write(frame.optional.len() as u32, 4);
        w.write_bool(frame.bottom_up);
    }
    for frame in &spec.frames {
        if !frame.optional.is_empty() {
            w.align();
            for &byte in &frame.optional {
                w.write(byte as u32, 8);
            }
        }
    }

    if spec.compress_equal_cells {
        w.write(spec.equal_cells.bit_len() as u32, 20);
    }
    w.write(spec.pixel_mask.bit_len() as u32, 20);
    if spec.has_raw_pixel_encoding {
        w.write(spec.raw_usage.bit_len() as u32, 20);
        w.write(spec.raw_codes.bit_len() as u32, 20);
    }
    for value in 0..=255u8 {
        w.write_bool(spec.present_values.contains(&value));
    }

    w.append(spec.equal_cells);
    w.append(spec.pixel_mask);
    w.append(spec.raw_usage);
    w.append(spec.raw_codes);
    w.into_bytes()
}

/// File header, offset table and direction payloads
pub fn build_file(frames_per_direction: u8, directions: &[Vec<u8>]) -> Vec<u8> {
    let mut out = DCC_SIGNATURE.to_vec();
    out.extend_from_slice(&[6, directions.len() as u8, frames_per_direction, 0, 0, 0]);
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());

    let mut offset = (FIXED_HEADER_SIZE + 4 * directions.len()) as u32;
    for direction in directions {
        out.extend_from_slice(&offset.to_le_bytes());
        offset += direction.len() as u32;
    }
    for direction in directions {
        out.extend_from_slice(direction);
    }
    out
}
