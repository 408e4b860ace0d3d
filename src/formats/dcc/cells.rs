//! Cell-based pixel buffer reconstruction
//!
//! The bounding box of a direction is cut into 4×4 cells. Frames are walked
//! in order and each cell a frame covers either carries its previous entry
//! over (equal-cell flag), or gets a new entry whose pixel mask says which of
//! its 4 codes are freshly decoded and which are inherited from the cell's
//! last entry. Entries go into an append-only log so a frame can point at the
//! entry that was current when it was decoded.

use std::ops::Range;

use serde::Serialize;
use tracing::{debug, trace};

use super::model::{
    CellRef, Direction, DirectionHeader, EntryHandle, FrameCells, FrameHeader, PixelBufferEntry,
    SubStreamSizes,
};
use super::{DccError, Stage};
use crate::bitstream::BitReader;

/// Nominal cell edge in pixels
pub const CELL_SIZE: u32 = 4;

/// Upper bound on the cell grid of one direction (an 8192×8192 pixel box)
pub const MAX_GRID_CELLS: usize = 1 << 22;

/// Mask used for cells with nothing to inherit from
const FULL_MASK: u8 = 0x0F;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Cell {
    pub x: usize,
    pub y: usize,
    pub width: u8,
    pub height: u8,
}

/// Cell layout over a direction's bounding box. The last column and row are
/// clipped to whatever is left of the width and height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CellGrid {
    pub width: u32,
    pub height: u32,
    pub columns: usize,
    pub rows: usize,
}

impl CellGrid {
    pub fn new(width: u32, height: u32) -> Self {
        CellGrid {
            width,
            height,
            columns: width.div_ceil(CELL_SIZE) as usize,
            rows: height.div_ceil(CELL_SIZE) as usize,
        }
    }

    pub fn len(&self) -> usize {
        self.columns * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_width(&self, x: usize) -> u8 {
        clipped_span(x, self.columns, self.width)
    }

    pub fn row_height(&self, y: usize) -> u8 {
        clipped_span(y, self.rows, self.height)
    }

    pub fn cell(&self, x: usize, y: usize) -> Option<Cell> {
        if x >= self.columns || y >= self.rows {
            return None;
        }
        Some(Cell {
            x,
            y,
            width: self.column_width(x),
            height: self.row_height(y),
        })
    }

    /// Row-major slot of a cell
    pub fn index(&self, x: usize, y: usize) -> usize {
        x + y * self.columns
    }
}

fn clipped_span(index: usize, count: usize, total: u32) -> u8 {
    if index + 1 < count {
        CELL_SIZE as u8
    } else if index + 1 == count {
        (total - (count as u32 - 1) * CELL_SIZE) as u8
    } else {
        0
    }
}

/// Grid cells covered by `size` pixels starting `offset` pixels into the grid
pub fn covered_cells(offset: u32, size: u32) -> Range<usize> {
    if size == 0 {
        return 0..0;
    }
    let first = offset / CELL_SIZE;
    let last = (offset + size - 1) / CELL_SIZE;
    first as usize..last as usize + 1
}

#[derive(Debug, Clone, Copy)]
struct RawStreams<'a> {
    usage: BitReader<'a>,
    codes: BitReader<'a>,
}

/// The role-specific cursors carved out of the direction stream
#[derive(Debug, Clone, Copy)]
struct SubStreams<'a> {
    equal_cells: Option<BitReader<'a>>,
    pixel_mask: BitReader<'a>,
    raw: Option<RawStreams<'a>>,
    /// Remainder of the direction, holds the displacement-coded pixels
    incremental: BitReader<'a>,
}

impl<'a> SubStreams<'a> {
    fn carve(
        header: &DirectionHeader,
        sizes: &SubStreamSizes,
        bits: &mut BitReader<'a>,
    ) -> Result<Self, DccError> {
        let mut take = |len: u32| {
            let stream = bits.slice();
            bits.skip(len as usize);
            stream
        };

        let equal_cells = header
            .compress_equal_cells
            .then(|| take(sizes.equal_cells));
        let pixel_mask = take(sizes.pixel_mask);
        let raw = header.has_raw_pixel_encoding.then(|| RawStreams {
            usage: take(sizes.raw_usage),
            codes: take(sizes.raw_codes),
        });

        if !bits.good() {
            return Err(DccError::TruncatedStream {
                stage: Stage::SubStreamLayout,
            });
        }

        Ok(SubStreams {
            equal_cells,
            pixel_mask,
            raw,
            incremental: bits.slice(),
        })
    }
}

fn check(bits: &BitReader, stage: Stage) -> Result<(), DccError> {
    if bits.good() {
        Ok(())
    } else {
        Err(DccError::TruncatedStream { stage })
    }
}

/// Result of running the reconstructor over every frame of a direction
#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub grid: CellGrid,
    pub entries: Vec<PixelBufferEntry>,
    pub frames: Vec<FrameCells>,
}

pub struct CellReconstructor<'a, 'd> {
    direction: &'d Direction,
    grid: CellGrid,
    streams: SubStreams<'a>,
    /// Latest entry per grid cell, `None` until the cell is first decoded
    last_entry: Vec<Option<EntryHandle>>,
    entries: Vec<PixelBufferEntry>,
}

impl<'a, 'd> CellReconstructor<'a, 'd> {
    /// `bits` must be positioned right after the pixel value map
    pub fn new(
        direction: &'d Direction,
        sizes: &SubStreamSizes,
        bits: &mut BitReader<'a>,
    ) -> Result<Self, DccError> {
        let grid = CellGrid::new(direction.extents.width(), direction.extents.height());
        if grid.len() > MAX_GRID_CELLS {
            return Err(DccError::OversizedDirection {
                width: grid.width,
                height: grid.height,
            });
        }
        let streams = SubStreams::carve(&direction.header, sizes, bits)?;

        Ok(CellReconstructor {
            direction,
            grid,
            streams,
            last_entry: vec![None; grid.len()],
            entries: Vec::new(),
        })
    }

    pub fn run(mut self) -> Result<Reconstruction, DccError> {
        debug!(
            columns = self.grid.columns,
            rows = self.grid.rows,
            incremental_bits = self.streams.incremental.size_in_bits(),
            "reconstructing cells"
        );

        let direction = self.direction;
        let mut frames = Vec::with_capacity(direction.frames.len());
        for (index, frame) in direction.frames.iter().enumerate() {
            frames.push(self.decode_frame(index, frame)?);
        }

        Ok(Reconstruction {
            grid: self.grid,
            entries: self.entries,
            frames,
        })
    }

    fn decode_frame(&mut self, index: usize, frame: &FrameHeader) -> Result<FrameCells, DccError> {
        let origin = &self.direction.extents;
        // Frames always sit inside the direction box, so these are non-negative
        let offset_x = (frame.extents.x_lower as i64 - origin.x_lower as i64) as u32;
        let offset_y = (frame.extents.y_lower as i64 - origin.y_lower as i64) as u32;

        let columns = covered_cells(offset_x, frame.width);
        let rows = covered_cells(offset_y, frame.height);

        let mut cells = Vec::with_capacity(columns.len() * rows.len());
        for (row, cell_y) in rows.clone().enumerate() {
            for (column, cell_x) in columns.clone().enumerate() {
                let frame_cell_index = column + row * columns.len();
                cells.push(self.decode_cell(index, cell_x, cell_y, frame_cell_index)?);
            }
        }

        trace!(
            frame = index,
            cells = cells.len(),
            log_size = self.entries.len(),
            "frame cells decoded"
        );
        Ok(FrameCells {
            frame: index,
            cells,
        })
    }

    fn decode_cell(
        &mut self,
        frame: usize,
        cell_x: usize,
        cell_y: usize,
        frame_cell_index: usize,
    ) -> Result<CellRef, DccError> {
        let slot = self.grid.index(cell_x, cell_y);
        let previous = self.last_entry[slot];

        let mut mask = FULL_MASK;
        if let Some(handle) = previous {
            if let Some(equal_cells) = self.streams.equal_cells.as_mut() {
                let unchanged = equal_cells.read_bool();
                check(equal_cells, Stage::EqualCellFlags)?;
                if unchanged {
                    return Ok(CellRef {
                        cell_x,
                        cell_y,
                        entry: handle,
                        reused: true,
                    });
                }
            }
            mask = self.streams.pixel_mask.read_unsigned(4) as u8;
            check(&self.streams.pixel_mask, Stage::PixelMasks)?;
        }

        let wanted = mask.count_ones() as usize;
        let raw_codes = match self.streams.raw.as_mut() {
            Some(raw) => {
                let use_raw = raw.usage.read_bool();
                check(&raw.usage, Stage::RawPixelUsage)?;
                use_raw.then_some(&mut raw.codes)
            }
            None => None,
        };

        let mut stack = [0u8; 4];
        let mut decoded = 0;
        if wanted > 0 {
            let Some(raw_codes) = raw_codes else {
                return Err(DccError::IncrementalCodesUnsupported {
                    frame,
                    cell_x,
                    cell_y,
                });
            };

            let mut last_code = 0u8;
            for _ in 0..wanted {
                let code = raw_codes.read_u8();
                check(raw_codes, Stage::RawPixelCodes)?;
                // A repeated code ends the run and is itself dropped
                if code == last_code {
                    break;
                }
                stack[decoded] = code;
                last_code = code;
                decoded += 1;
            }
        }

        // Copied out of the log before it grows
        let inherited = previous.map_or([0u8; 4], |handle| self.entries[handle.0].codes);

        let mut codes = [0u8; 4];
        for (bit, code) in codes.iter_mut().enumerate() {
            *code = if mask & (1 << bit) != 0 {
                if decoded > 0 {
                    decoded -= 1;
                    stack[decoded]
                } else {
                    0
                }
            } else {
                inherited[bit]
            };
        }

        let handle = EntryHandle(self.entries.len());
        self.entries.push(PixelBufferEntry {
            codes,
            frame,
            frame_cell_index,
        });
        self.last_entry[slot] = Some(handle);

        Ok(CellRef {
            cell_x,
            cell_y,
            entry: handle,
            reused: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::BitWidth;
    use crate::formats::dcc::model::{Extents, FieldWidths};
    use crate::formats::dcc::parser::frame_extents;
    use crate::testing::BitWriter;

    fn header(compress_equal_cells: bool, has_raw_pixel_encoding: bool) -> DirectionHeader {
        let zero = BitWidth::Zero;
        DirectionHeader {
            outsize_coded: 0,
            has_raw_pixel_encoding,
            compress_equal_cells,
            field_widths: FieldWidths {
                variable0: zero,
                width: zero,
                height: zero,
                x_offset: zero,
                y_offset: zero,
                optional_bytes: zero,
                coded_bytes: zero,
            },
        }
    }

    fn frame(x_offset: i32, y_offset: i32, width: u32, height: u32) -> FrameHeader {
        FrameHeader {
            variable0: 0,
            width,
            height,
            x_offset,
            y_offset,
            optional_bytes: 0,
            coded_bytes: 0,
            bottom_up: true,
            extents: frame_extents(x_offset, y_offset, width, height, true).unwrap(),
        }
    }

    fn top_down_frame(x_offset: i32, y_offset: i32, width: u32, height: u32) -> FrameHeader {
        FrameHeader {
            bottom_up: false,
            extents: frame_extents(x_offset, y_offset, width, height, false).unwrap(),
            ..frame(x_offset, y_offset, width, height)
        }
    }

    fn direction(header: DirectionHeader, frames: Vec<FrameHeader>) -> Direction {
        let extents = crate::formats::dcc::parser::direction_extents(&frames);
        Direction {
            header,
            frames,
            extents,
        }
    }

    /// Concatenates the sub-streams and records their sizes
    #[derive(Default)]
    struct Streams {
        equal_cells: BitWriter,
        pixel_mask: BitWriter,
        raw_usage: BitWriter,
        raw_codes: BitWriter,
    }

    impl Streams {
        fn build(self) -> (SubStreamSizes, Vec<u8>) {
            let sizes = SubStreamSizes {
                equal_cells: self.equal_cells.bit_len() as u32,
                pixel_mask: self.pixel_mask.bit_len() as u32,
                raw_usage: self.raw_usage.bit_len() as u32,
                raw_codes: self.raw_codes.bit_len() as u32,
            };
            let mut out = BitWriter::new();
            for part in [self.equal_cells, self.pixel_mask, self.raw_usage, self.raw_codes] {
                out.append(part);
            }
            (sizes, out.into_bytes())
        }
    }

    fn write_codes(writer: &mut BitWriter, codes: &[u8]) {
        for &code in codes {
            writer.write(code as u32, 8);
        }
    }

    #[test]
    fn grid_clips_last_column_and_row() {
        let grid = CellGrid::new(10, 6);
        assert_eq!((grid.columns, grid.rows), (3, 2));
        let widths: Vec<u8> = (0..grid.columns).map(|x| grid.column_width(x)).collect();
        let heights: Vec<u8> = (0..grid.rows).map(|y| grid.row_height(y)).collect();
        assert_eq!(widths, [4, 4, 2]);
        assert_eq!(heights, [4, 2]);

        let even = CellGrid::new(8, 4);
        assert_eq!(even.column_width(1), 4);
        assert_eq!(even.row_height(0), 4);

        assert_eq!(grid.cell(2, 1), Some(Cell { x: 2, y: 1, width: 2, height: 2 }));
        assert_eq!(grid.cell(3, 0), None);
        assert!(CellGrid::new(0, 5).is_empty());
    }

    #[test]
    fn covered_cells_include_partial_edges() {
        assert_eq!(covered_cells(0, 4), 0..1);
        assert_eq!(covered_cells(0, 5), 0..2);
        assert_eq!(covered_cells(3, 2), 0..2);
        assert_eq!(covered_cells(4, 4), 1..2);
        assert_eq!(covered_cells(7, 0), 0..0);
    }

    #[test]
    fn first_decode_uses_full_mask_without_reading_one() {
        let dir = direction(header(false, true), vec![frame(0, 0, 4, 4)]);
        let mut streams = Streams::default();
        streams.raw_usage.write_bool(true);
        write_codes(&mut streams.raw_codes, &[5, 6, 7, 8]);
        let (sizes, bytes) = streams.build();

        let mut bits = BitReader::new(&bytes);
        let mut recon = CellReconstructor::new(&dir, &sizes, &mut bits).unwrap();
        let cell = recon.decode_cell(0, 0, 0, 0).unwrap();

        assert_eq!(cell.entry, EntryHandle(0));
        // Last decoded code fills the lowest mask bit
        assert_eq!(recon.entries[0].codes, [8, 7, 6, 5]);
        assert_eq!(recon.streams.pixel_mask.position(), 0);
        assert_eq!(recon.last_entry[0], Some(EntryHandle(0)));
    }

    #[test]
    fn equal_cell_reuses_entry_and_leaves_other_streams() {
        let dir = direction(
            header(true, true),
            vec![frame(0, 0, 4, 4), frame(0, 0, 4, 4)],
        );
        let mut streams = Streams::default();
        streams.equal_cells.write_bool(true);
        // Padding after the streams we expect to be used, must stay unread
        streams.pixel_mask.write(0xF, 4);
        streams.raw_usage.write_bool(true);
        streams.raw_usage.write_bool(true);
        write_codes(&mut streams.raw_codes, &[5, 6, 7, 8, 1, 2, 3, 4]);
        let (sizes, bytes) = streams.build();

        let mut bits = BitReader::new(&bytes);
        let mut recon = CellReconstructor::new(&dir, &sizes, &mut bits).unwrap();
        recon.decode_cell(0, 0, 0, 0).unwrap();
        let usage_after_first = recon.streams.raw.unwrap().usage.position();
        let codes_after_first = recon.streams.raw.unwrap().codes.position();

        let reused = recon.decode_cell(1, 0, 0, 0).unwrap();
        assert!(reused.reused);
        assert_eq!(reused.entry, EntryHandle(0));
        assert_eq!(recon.entries.len(), 1);
        assert_eq!(recon.last_entry[0], Some(EntryHandle(0)));

        let raw = recon.streams.raw.unwrap();
        assert_eq!(recon.streams.pixel_mask.position(), 0);
        assert_eq!(raw.usage.position(), usage_after_first);
        assert_eq!(raw.codes.position(), codes_after_first);
        assert_eq!(recon.streams.equal_cells.unwrap().position(), 1);
    }

    #[test]
    fn masked_update_inherits_clear_slots() {
        let dir = direction(
            header(false, true),
            vec![frame(0, 0, 4, 4), frame(0, 0, 4, 4)],
        );
        let mut streams = Streams::default();
        streams.pixel_mask.write(0b0101, 4);
        streams.raw_usage.write_bool(true);
        streams.raw_usage.write_bool(true);
        write_codes(&mut streams.raw_codes, &[8, 7, 6, 5, 1, 2]);
        let (sizes, bytes) = streams.build();

        let mut bits = BitReader::new(&bytes);
        let recon = CellReconstructor::new(&dir, &sizes, &mut bits).unwrap();
        let result = recon.run().unwrap();

        assert_eq!(result.entries.len(), 2);
        assert_eq!(result.entries[0].codes, [5, 6, 7, 8]);
        assert_eq!(result.entries[1].codes, [2, 6, 1, 8]);
        assert_eq!(result.entries[1].frame, 1);
        assert_eq!(result.frames[1].cells[0].entry, EntryHandle(1));
    }

    #[test]
    fn repeated_code_terminates_run() {
        let dir = direction(header(false, true), vec![frame(0, 0, 4, 4)]);
        let mut streams = Streams::default();
        streams.raw_usage.write_bool(true);
        write_codes(&mut streams.raw_codes, &[9, 9, 3, 4]);
        let (sizes, bytes) = streams.build();

        let mut bits = BitReader::new(&bytes);
        let mut recon = CellReconstructor::new(&dir, &sizes, &mut bits).unwrap();
        recon.decode_cell(0, 0, 0, 0).unwrap();

        assert_eq!(recon.entries[0].codes, [9, 0, 0, 0]);
        // Only the first code and the terminator were consumed
        assert_eq!(recon.streams.raw.unwrap().codes.position(), 16);
    }

    #[test]
    fn leading_zero_code_is_a_terminator() {
        let dir = direction(header(false, true), vec![frame(0, 0, 4, 4)]);
        let mut streams = Streams::default();
        streams.raw_usage.write_bool(true);
        write_codes(&mut streams.raw_codes, &[0, 4]);
        let (sizes, bytes) = streams.build();

        let mut bits = BitReader::new(&bytes);
        let mut recon = CellReconstructor::new(&dir, &sizes, &mut bits).unwrap();
        recon.decode_cell(0, 0, 0, 0).unwrap();
        assert_eq!(recon.entries[0].codes, [0, 0, 0, 0]);
        assert_eq!(recon.streams.raw.unwrap().codes.position(), 8);
    }

    #[test]
    fn incremental_cells_are_reported() {
        let dir = direction(header(false, false), vec![frame(0, 0, 4, 4)]);
        let (sizes, bytes) = Streams::default().build();
        let mut bits = BitReader::new(&bytes);
        let recon = CellReconstructor::new(&dir, &sizes, &mut bits).unwrap();
        let err = recon.run().unwrap_err();
        assert!(matches!(
            err,
            DccError::IncrementalCodesUnsupported {
                frame: 0,
                cell_x: 0,
                cell_y: 0
            }
        ));
    }

    #[test]
    fn exhausted_raw_codes_abort() {
        let dir = direction(header(false, true), vec![frame(0, 0, 4, 4)]);
        let mut streams = Streams::default();
        streams.raw_usage.write_bool(true);
        write_codes(&mut streams.raw_codes, &[1, 2]);
        let (sizes, bytes) = streams.build();

        let mut bits = BitReader::new(&bytes);
        let recon = CellReconstructor::new(&dir, &sizes, &mut bits).unwrap();
        let err = recon.run().unwrap_err();
        assert!(matches!(
            err,
            DccError::TruncatedStream {
                stage: Stage::RawPixelCodes
            }
        ));
    }

    #[test]
    fn oversized_stream_prefix_fails_layout() {
        let dir = direction(header(false, false), vec![frame(0, 0, 4, 4)]);
        let sizes = SubStreamSizes {
            pixel_mask: 64,
            ..SubStreamSizes::default()
        };
        let bytes = [0u8; 4];
        let mut bits = BitReader::new(&bytes);
        let err = CellReconstructor::new(&dir, &sizes, &mut bits).err().unwrap();
        assert!(matches!(
            err,
            DccError::TruncatedStream {
                stage: Stage::SubStreamLayout
            }
        ));
    }

    #[test]
    fn frames_map_to_offset_cells() {
        // Second frame sits one cell right and spans two cells
        let dir = direction(
            header(false, true),
            vec![frame(0, 0, 4, 4), frame(4, 0, 6, 3)],
        );
        assert_eq!(
            dir.extents,
            Extents {
                x_lower: 0,
                x_upper: 10,
                y_lower: 0,
                y_upper: 4
            }
        );

        let mut streams = Streams::default();
        for _ in 0..3 {
            streams.raw_usage.write_bool(true);
        }
        write_codes(&mut streams.raw_codes, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        let (sizes, bytes) = streams.build();

        let mut bits = BitReader::new(&bytes);
        let recon = CellReconstructor::new(&dir, &sizes, &mut bits).unwrap();
        let result = recon.run().unwrap();

        assert_eq!(result.grid.columns, 3);
        let second: Vec<(usize, usize)> = result.frames[1]
            .cells
            .iter()
            .map(|cell| (cell.cell_x, cell.cell_y))
            .collect();
        assert_eq!(second, [(1, 0), (2, 0)]);
        assert_eq!(result.entries[2].frame_cell_index, 1);
        assert_eq!(result.entries[2].codes, [12, 11, 10, 9]);
    }

    #[test]
    fn top_down_frame_maps_to_rows_above_its_offset() {
        // Bottom-up frame covers y 0..4, top-down frame ending at y 9 covers 4..10
        let dir = direction(
            header(false, true),
            vec![frame(0, 0, 4, 4), top_down_frame(0, 9, 4, 6)],
        );
        assert_eq!((dir.extents.y_lower, dir.extents.y_upper), (0, 10));

        let mut streams = Streams::default();
        for _ in 0..3 {
            streams.raw_usage.write_bool(true);
        }
        write_codes(&mut streams.raw_codes, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        let (sizes, bytes) = streams.build();

        let mut bits = BitReader::new(&bytes);
        let recon = CellReconstructor::new(&dir, &sizes, &mut bits).unwrap();
        let result = recon.run().unwrap();

        assert_eq!((result.grid.columns, result.grid.rows), (1, 3));
        let touched = |frame: usize| -> Vec<(usize, usize)> {
            result.frames[frame]
                .cells
                .iter()
                .map(|cell| (cell.cell_x, cell.cell_y))
                .collect()
        };
        assert_eq!(touched(0), [(0, 0)]);
        assert_eq!(touched(1), [(0, 1), (0, 2)]);
        assert_eq!(result.entries[1].codes, [8, 7, 6, 5]);
        assert_eq!(result.entries[2].frame_cell_index, 1);
    }
}
