//! Bit-addressable cursor over an immutable byte buffer.
//!
//! Bits are consumed LSB-first within each byte, and multi-bit values are
//! assembled with the first bit read as the least significant one. Reads
//! never fail loudly: running past the end sets a sticky error flag that the
//! caller checks with [`BitReader::good`] once a parsing stage is done.

use serde::Serialize;

/// One of the 16 packed field widths a 4-bit selector can choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BitWidth {
    Zero,
    One,
    Two,
    Four,
    Six,
    Eight,
    Ten,
    Twelve,
    Fourteen,
    Sixteen,
    Twenty,
    TwentyFour,
    TwentySix,
    TwentyEight,
    Thirty,
    ThirtyTwo,
}

/// Selector to width, indexed by the 4-bit code
const SELECTOR_TABLE: [BitWidth; 16] = [
    BitWidth::Zero,
    BitWidth::One,
    BitWidth::Two,
    BitWidth::Four,
    BitWidth::Six,
    BitWidth::Eight,
    BitWidth::Ten,
    BitWidth::Twelve,
    BitWidth::Fourteen,
    BitWidth::Sixteen,
    BitWidth::Twenty,
    BitWidth::TwentyFour,
    BitWidth::TwentySix,
    BitWidth::TwentyEight,
    BitWidth::Thirty,
    BitWidth::ThirtyTwo,
];

impl BitWidth {
    /// Map a 4-bit selector to its width. Only the low 4 bits are used.
    pub fn from_selector(selector: u8) -> Self {
        SELECTOR_TABLE[(selector & 0xF) as usize]
    }

    /// Number of bits a field of this width occupies
    pub fn bits(self) -> u32 {
        match self {
            BitWidth::Zero => 0,
            BitWidth::One => 1,
            BitWidth::Two => 2,
            BitWidth::Four => 4,
            BitWidth::Six => 6,
            BitWidth::Eight => 8,
            BitWidth::Ten => 10,
            BitWidth::Twelve => 12,
            BitWidth::Fourteen => 14,
            BitWidth::Sixteen => 16,
            BitWidth::Twenty => 20,
            BitWidth::TwentyFour => 24,
            BitWidth::TwentySix => 26,
            BitWidth::TwentyEight => 28,
            BitWidth::Thirty => 30,
            BitWidth::ThirtyTwo => 32,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BitReader<'a> {
    data: &'a [u8],
    /// Absolute bit offset where this cursor's range begins
    start: usize,
    /// Absolute bit offset of the next bit to read
    pos: usize,
    /// Absolute bit offset one past the last readable bit
    end: usize,
    error: bool,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            start: 0,
            pos: 0,
            end: data.len() * 8,
            error: false,
        }
    }

    /// False once any read, skip or align went past the end of the range
    pub fn good(&self) -> bool {
        !self.error
    }

    /// Size of the range this cursor covers, independent of the position
    pub fn size_in_bits(&self) -> usize {
        self.end - self.start
    }

    /// Bits consumed since the start of this cursor's range
    pub fn position(&self) -> usize {
        self.pos - self.start
    }

    pub fn bits_remaining(&self) -> usize {
        self.end - self.pos
    }

    /// Independent cursor starting here and running to the end of this range.
    pub fn slice(&self) -> BitReader<'a> {
        BitReader {
            data: self.data,
            start: self.pos,
            pos: self.pos,
            end: self.end,
            error: self.error,
        }
    }

    /// Independent cursor starting here and bounded to `len` bits.
    /// Flags the new cursor as failed if fewer than `len` bits remain.
    pub fn slice_bits(&self, len: usize) -> BitReader<'a> {
        let mut sub = self.slice();
        if len <= sub.bits_remaining() {
            sub.end = sub.pos + len;
        } else {
            sub.error = true;
        }
        sub
    }

    pub fn skip(&mut self, bits: usize) {
        if self.error || bits > self.bits_remaining() {
            self.fail();
            return;
        }
        self.pos += bits;
    }

    /// Move to the next byte boundary of the underlying buffer
    pub fn align_to_byte(&mut self) {
        let aligned = (self.pos + 7) & !7;
        if self.error || aligned > self.end {
            self.fail();
            return;
        }
        self.pos = aligned;
    }

    /// Zero-width read: always 0, never advances the cursor
    pub fn read_0_bits(&mut self) -> u32 {
        0
    }

    /// Single bit as 0 or 1
    pub fn read_bit(&mut self) -> u32 {
        self.read_bits(1)
    }

    pub fn read_bool(&mut self) -> bool {
        self.read_bits(1) != 0
    }

    pub fn read_unsigned(&mut self, width: u32) -> u32 {
        self.read_bits(width)
    }

    /// Read `width` bits and sign-extend from the top bit of the field
    pub fn read_signed(&mut self, width: u32) -> i32 {
        if width == 0 {
            return 0;
        }
        let raw = self.read_bits(width);
        let shift = 32 - width.min(32);
        ((raw << shift) as i32) >> shift
    }

    pub fn read_u8(&mut self) -> u8 {
        self.read_bits(8) as u8
    }

    /// Unsigned read with the width picked by a packed selector
    pub fn read_unsigned_coded(&mut self, width: BitWidth) -> u32 {
        match width {
            BitWidth::Zero => self.read_0_bits(),
            BitWidth::One => self.read_bit(),
            BitWidth::Two => self.read_bits(2),
            BitWidth::Four => self.read_bits(4),
            BitWidth::Six => self.read_bits(6),
            BitWidth::Eight => self.read_bits(8),
            BitWidth::Ten => self.read_bits(10),
            BitWidth::Twelve => self.read_bits(12),
            BitWidth::Fourteen => self.read_bits(14),
            BitWidth::Sixteen => self.read_bits(16),
            BitWidth::Twenty => self.read_bits(20),
            BitWidth::TwentyFour => self.read_bits(24),
            BitWidth::TwentySix => self.read_bits(26),
            BitWidth::TwentyEight => self.read_bits(28),
            BitWidth::Thirty => self.read_bits(30),
            BitWidth::ThirtyTwo => self.read_bits(32),
        }
    }

    /// Signed counterpart of [`BitReader::read_unsigned_coded`]
    pub fn read_signed_coded(&mut self, width: BitWidth) -> i32 {
        match width {
            BitWidth::Zero => 0,
            BitWidth::One => self.read_signed(1),
            BitWidth::Two => self.read_signed(2),
            BitWidth::Four => self.read_signed(4),
            BitWidth::Six => self.read_signed(6),
            BitWidth::Eight => self.read_signed(8),
            BitWidth::Ten => self.read_signed(10),
            BitWidth::Twelve => self.read_signed(12),
            BitWidth::Fourteen => self.read_signed(14),
            BitWidth::Sixteen => self.read_signed(16),
            BitWidth::Twenty => self.read_signed(20),
            BitWidth::TwentyFour => self.read_signed(24),
            BitWidth::TwentySix => self.read_signed(26),
            BitWidth::TwentyEight => self.read_signed(28),
            BitWidth::Thirty => self.read_signed(30),
            BitWidth::ThirtyTwo => self.read_signed(32),
        }
    }

    fn fail(&mut self) {
        self.error = true;
    }

    fn read_bits(&mut self, count: u32) -> u32 {
        if count == 0 {
            return 0;
        }
        let count = count.min(32);
        if self.error || (count as usize) > self.bits_remaining() {
            self.fail();
            return 0;
        }

        // Pull whole runs of bits out of each byte rather than one bit at a time
        let mut value: u64 = 0;
        let mut filled = 0u32;
        while filled < count {
            let byte = self.data[self.pos >> 3];
            let bit_in_byte = (self.pos & 7) as u32;
            let take = (8 - bit_in_byte).min(count - filled);
            let bits = ((byte >> bit_in_byte) as u64) & ((1u64 << take) - 1);
            value |= bits << filled;
            filled += take;
            self.pos += take as usize;
        }
        value as u32
    }
}
