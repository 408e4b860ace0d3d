//! Data structures for decoded DCC files
//!
//! Everything here is plain data produced by the parsers; none of it holds on
//! to the source buffer.

use serde::Serialize;

use super::cells::CellGrid;
use super::pixel_codes::PixelCodeTable;
use crate::bitstream::BitWidth;

/// Fixed byte-level header at the start of every DCC file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileHeader {
    pub signature: [u8; 4],
    pub version: u8,
    pub direction_count: u8,
    pub frames_per_direction: u8,

    /// Upper bytes of the frame count field, always zero in practice
    pub reserved: [u8; 3],

    pub tag: u32,

    /// Size of the equivalent uncompressed sprite file
    pub final_decoded_size: u32,

    /// One start offset per direction plus the stream length as the last entry
    pub direction_offsets: Vec<u32>,
}

impl FileHeader {
    /// Byte range `[start, end)` of a direction, if the index exists
    pub fn direction_range(&self, index: usize) -> Option<(u32, u32)> {
        let start = *self.direction_offsets.get(index)?;
        let end = *self.direction_offsets.get(index + 1)?;
        Some((start, end))
    }
}

/// Half-open pixel rectangle `[x_lower, x_upper) × [y_lower, y_upper)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Extents {
    pub x_lower: i32,
    pub x_upper: i32,
    pub y_lower: i32,
    pub y_upper: i32,
}

impl Extents {
    pub fn width(&self) -> u32 {
        (self.x_upper as i64 - self.x_lower as i64).clamp(0, u32::MAX as i64) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y_upper as i64 - self.y_lower as i64).clamp(0, u32::MAX as i64) as u32
    }

    pub fn union(&self, other: &Extents) -> Extents {
        Extents {
            x_lower: self.x_lower.min(other.x_lower),
            x_upper: self.x_upper.max(other.x_upper),
            y_lower: self.y_lower.min(other.y_lower),
            y_upper: self.y_upper.max(other.y_upper),
        }
    }
}

/// Widths chosen by the 7 selectors of a direction header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldWidths {
    pub variable0: BitWidth,
    pub width: BitWidth,
    pub height: BitWidth,
    pub x_offset: BitWidth,
    pub y_offset: BitWidth,
    pub optional_bytes: BitWidth,
    pub coded_bytes: BitWidth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DirectionHeader {
    pub outsize_coded: u32,
    pub has_raw_pixel_encoding: bool,
    pub compress_equal_cells: bool,
    pub field_widths: FieldWidths,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameHeader {
    pub variable0: u32,
    pub width: u32,
    pub height: u32,
    pub x_offset: i32,
    pub y_offset: i32,

    /// Bytes of opaque per-frame data stored after all frame headers
    pub optional_bytes: u32,
    pub coded_bytes: u32,

    pub bottom_up: bool,
    pub extents: Extents,
}

/// One facing of the animation: its header, frames and bounding box
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Direction {
    pub header: DirectionHeader,
    pub frames: Vec<FrameHeader>,

    /// Union of all frame extents
    pub extents: Extents,
}

/// Declared bit lengths of the compressed sub-streams
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubStreamSizes {
    pub equal_cells: u32,
    pub pixel_mask: u32,
    pub raw_usage: u32,
    pub raw_codes: u32,
}

/// Everything known about a direction before cell reconstruction
#[derive(Debug, Clone, Serialize)]
pub struct DirectionInfo {
    pub index: usize,
    pub direction: Direction,
    pub stream_sizes: SubStreamSizes,
    pub pixel_codes: PixelCodeTable,
}

/// Stable index into a direction's entry log
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EntryHandle(pub usize);

/// Four resolved pixel codes for one cell, plus where they came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelBufferEntry {
    pub codes: [u8; 4],
    pub frame: usize,

    /// Row-major index of the cell within the frame's own cell rectangle
    pub frame_cell_index: usize,
}

/// A grid cell touched by a frame and the entry it resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CellRef {
    pub cell_x: usize,
    pub cell_y: usize,
    pub entry: EntryHandle,

    /// Set when the equal-cell flag carried the previous entry over
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameCells {
    pub frame: usize,
    pub cells: Vec<CellRef>,
}

impl FrameCells {
    pub fn reused_count(&self) -> usize {
        self.cells.iter().filter(|cell| cell.reused).count()
    }
}

/// Fully reconstructed direction
#[derive(Debug, Clone, Serialize)]
pub struct DecodedDirection {
    pub index: usize,
    pub direction: Direction,
    pub pixel_codes: PixelCodeTable,
    pub grid: CellGrid,

    /// Append-only entry log, addressed by [`EntryHandle`]
    pub entries: Vec<PixelBufferEntry>,
    pub frames: Vec<FrameCells>,
}

impl DecodedDirection {
    pub fn entry(&self, handle: EntryHandle) -> Option<&PixelBufferEntry> {
        self.entries.get(handle.0)
    }
}
