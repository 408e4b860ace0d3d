//! Bit-level parsing of direction and frame headers
//!
//! A direction starts with its own header (two compression flags and the
//! width selectors for every frame field), followed by one packed header per
//! frame and the opaque optional data blocks. The sub-stream length prefixes
//! come right after.

use tracing::trace;

use super::model::{Direction, DirectionHeader, Extents, FieldWidths, FrameHeader, SubStreamSizes};
use super::{DccError, Stage};
use crate::bitstream::{BitReader, BitWidth};

/// Frames at least this wide or tall are treated as corrupt
pub const MAX_FRAME_DIMENSION: u32 = 0x70_0000;

/// Width of each sub-stream length prefix
const STREAM_SIZE_BITS: u32 = 20;

fn check(bits: &BitReader, stage: Stage) -> Result<(), DccError> {
    if bits.good() {
        Ok(())
    } else {
        Err(DccError::TruncatedStream { stage })
    }
}

pub fn read_direction_header(bits: &mut BitReader) -> Result<DirectionHeader, DccError> {
    let outsize_coded = bits.read_unsigned(32);
    let has_raw_pixel_encoding = bits.read_bool();
    let compress_equal_cells = bits.read_bool();

    let mut selector = || BitWidth::from_selector(bits.read_unsigned(4) as u8);
    let field_widths = FieldWidths {
        variable0: selector(),
        width: selector(),
        height: selector(),
        x_offset: selector(),
        y_offset: selector(),
        optional_bytes: selector(),
        coded_bytes: selector(),
    };

    check(bits, Stage::DirectionHeader)?;

    Ok(DirectionHeader {
        outsize_coded,
        has_raw_pixel_encoding,
        compress_equal_cells,
        field_widths,
    })
}

/// Pixel rectangle covered by a frame.
///
/// Bottom-up frames grow downwards from `y_offset`; top-down frames have
/// `y_offset` as their last row.
pub fn frame_extents(
    x_offset: i32,
    y_offset: i32,
    width: u32,
    height: u32,
    bottom_up: bool,
) -> Option<Extents> {
    let width = i32::try_from(width).ok()?;
    let height = i32::try_from(height).ok()?;

    let (y_lower, y_upper) = if bottom_up {
        (y_offset, y_offset.checked_add(height)?)
    } else {
        (
            y_offset.checked_sub(height)?.checked_add(1)?,
            y_offset.checked_add(1)?,
        )
    };

    Some(Extents {
        x_lower: x_offset,
        x_upper: x_offset.checked_add(width)?,
        y_lower,
        y_upper,
    })
}

pub fn read_frame_headers(
    frame_count: usize,
    header: &DirectionHeader,
    bits: &mut BitReader,
) -> Result<Vec<FrameHeader>, DccError> {
    let widths = &header.field_widths;
    let mut frames = Vec::with_capacity(frame_count);

    for frame in 0..frame_count {
        let variable0 = bits.read_unsigned_coded(widths.variable0);
        let width = bits.read_unsigned_coded(widths.width);
        let height = bits.read_unsigned_coded(widths.height);
        let x_offset = bits.read_signed_coded(widths.x_offset);
        let y_offset = bits.read_signed_coded(widths.y_offset);
        let optional_bytes = bits.read_unsigned_coded(widths.optional_bytes);
        let coded_bytes = bits.read_unsigned_coded(widths.coded_bytes);
        let bottom_up = bits.read_bool();

        check(bits, Stage::FrameHeaders)?;

        if width >= MAX_FRAME_DIMENSION || height >= MAX_FRAME_DIMENSION {
            return Err(DccError::InvalidFrameHeader {
                frame,
                reason: format!("size {}x{} is out of range", width, height),
            });
        }

        let extents = frame_extents(x_offset, y_offset, width, height, bottom_up).ok_or_else(|| {
            DccError::InvalidFrameHeader {
                frame,
                reason: format!(
                    "offset ({}, {}) with size {}x{} overflows",
                    x_offset, y_offset, width, height
                ),
            }
        })?;

        trace!(frame, width, height, x_offset, y_offset, bottom_up, "frame header");

        frames.push(FrameHeader {
            variable0,
            width,
            height,
            x_offset,
            y_offset,
            optional_bytes,
            coded_bytes,
            bottom_up,
            extents,
        });
    }

    // Optional data is stored after all headers, each block byte aligned
    for frame in &frames {
        if frame.optional_bytes != 0 {
            bits.align_to_byte();
            bits.skip(frame.optional_bytes as usize * 8);
        }
    }
    check(bits, Stage::OptionalFrameData)?;

    Ok(frames)
}

/// Union of all frame extents, or an empty rectangle for a frameless direction
pub fn direction_extents(frames: &[FrameHeader]) -> Extents {
    let mut iter = frames.iter().map(|frame| frame.extents);
    match iter.next() {
        Some(first) => iter.fold(first, |acc, extents| acc.union(&extents)),
        None => Extents::default(),
    }
}

pub fn read_direction(frame_count: usize, bits: &mut BitReader) -> Result<Direction, DccError> {
    let header = read_direction_header(bits)?;
    let frames = read_frame_headers(frame_count, &header, bits)?;
    let extents = direction_extents(&frames);

    Ok(Direction {
        header,
        frames,
        extents,
    })
}

pub fn read_stream_sizes(
    header: &DirectionHeader,
    bits: &mut BitReader,
) -> Result<SubStreamSizes, DccError> {
    let mut sizes = SubStreamSizes::default();

    if header.compress_equal_cells {
        sizes.equal_cells = bits.read_unsigned(STREAM_SIZE_BITS);
    }
    sizes.pixel_mask = bits.read_unsigned(STREAM_SIZE_BITS);
    if header.has_raw_pixel_encoding {
        sizes.raw_usage = bits.read_unsigned(STREAM_SIZE_BITS);
        sizes.raw_codes = bits.read_unsigned(STREAM_SIZE_BITS);
    }

    check(bits, Stage::StreamSizes)?;
    Ok(sizes)
}
