//! Byte-level file header and direction offset table

use std::io::Cursor;

use tracing::warn;

use super::{DccError, DecodeOptions, FileHeader, Stage};
use crate::binary_utils::{read_array, read_u32_le, read_u8};

/// Tag at the start of every DCC file
pub const DCC_SIGNATURE: [u8; 4] = [0x74, 0, 0, 0];

/// Header bytes before the direction offset table
pub const FIXED_HEADER_SIZE: usize = 18;

pub fn parse_file_header(data: &[u8], options: &DecodeOptions) -> Result<FileHeader, DccError> {
    let stream_size = u32::try_from(data.len()).map_err(|_| {
        DccError::MalformedHeader(format!(
            "stream of {} bytes is larger than the offset table can address",
            data.len()
        ))
    })?;

    let mut cursor = Cursor::new(data);
    let truncated = |_: std::io::Error| DccError::TruncatedStream {
        stage: Stage::FileHeader,
    };

    let signature = read_array::<4>(&mut cursor).map_err(truncated)?;
    if signature != DCC_SIGNATURE {
        return Err(DccError::MalformedHeader(format!(
            "bad signature {:02x?}, expected {:02x?}",
            signature, DCC_SIGNATURE
        )));
    }

    let version = read_u8(&mut cursor).map_err(truncated)?;
    let direction_count = read_u8(&mut cursor).map_err(truncated)?;
    let frames_per_direction = read_u8(&mut cursor).map_err(truncated)?;
    let reserved = read_array::<3>(&mut cursor).map_err(truncated)?;
    let tag = read_u32_le(&mut cursor).map_err(truncated)?;
    let final_decoded_size = read_u32_le(&mut cursor).map_err(truncated)?;

    if reserved != [0, 0, 0] {
        // The frame count is really a u32 whose upper bytes were never used
        if options.reject_reserved {
            return Err(DccError::MalformedHeader(format!(
                "reserved bytes {:02x?} are not zero",
                reserved
            )));
        }
        warn!(?reserved, "reserved header bytes are not zero, frame count may be wrong");
    }

    let mut direction_offsets = Vec::with_capacity(direction_count as usize + 1);
    for _ in 0..direction_count {
        let offset = read_u32_le(&mut cursor).map_err(|_| DccError::TruncatedStream {
            stage: Stage::OffsetTable,
        })?;
        direction_offsets.push(offset);
    }
    direction_offsets.push(stream_size);

    let header = FileHeader {
        signature,
        version,
        direction_count,
        frames_per_direction,
        reserved,
        tag,
        final_decoded_size,
        direction_offsets,
    };

    if options.validate_offsets {
        validate_offsets(&header)?;
    }

    Ok(header)
}

/// Offsets must start after the offset table and strictly increase up to the
/// stream size
pub fn validate_offsets(header: &FileHeader) -> Result<(), DccError> {
    let table_end = (FIXED_HEADER_SIZE + 4 * header.direction_count as usize) as u64;

    if let Some(&first) = header.direction_offsets.first() {
        if header.direction_count > 0 && (first as u64) < table_end {
            return Err(DccError::InvalidOffsetTable(format!(
                "direction 0 starts at {:#x}, inside the header (ends at {:#x})",
                first, table_end
            )));
        }
    }

    for (index, pair) in header.direction_offsets.windows(2).enumerate() {
        if pair[0] >= pair[1] {
            return Err(DccError::InvalidOffsetTable(format!(
                "direction {} spans [{:#x}, {:#x}), offsets must strictly increase",
                index, pair[0], pair[1]
            )));
        }
    }

    Ok(())
}

/// Bounds check for a single direction, done even when the table as a whole
/// was not validated
pub fn checked_direction_range(
    header: &FileHeader,
    index: usize,
    stream_size: usize,
) -> Result<(usize, usize), DccError> {
    let (start, end) = header
        .direction_range(index)
        .ok_or(DccError::DirectionOutOfRange {
            index,
            count: header.direction_count as usize,
        })?;

    let (start, end) = (start as usize, end as usize);
    if start >= end || end > stream_size {
        return Err(DccError::InvalidOffsetTable(format!(
            "direction {} spans [{:#x}, {:#x}) in a stream of {:#x} bytes",
            index, start, end, stream_size
        )));
    }
    Ok((start, end))
}
