//! DCC sprite format handling
//!
//! A DCC file holds one compressed bit-stream per direction of an animation.
//! This module parses the file header and offset table, the per-direction and
//! per-frame headers, the pixel code table, and rebuilds the cell entry log
//! each frame resolves to. Palette lookup and raster assembly are left to the
//! caller.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::thread;

use tracing::debug;

pub mod cells;
pub mod header;
pub mod model;
pub mod parser;
pub mod pixel_codes;


pub use cells::{Cell, CellGrid, CellReconstructor, Reconstruction, CELL_SIZE};
pub use header::{DCC_SIGNATURE, FIXED_HEADER_SIZE};
pub use model::*;
pub use pixel_codes::PixelCodeTable;

use crate::bitstream::BitReader;

/// Parsing step a truncated stream was detected in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FileHeader,
    OffsetTable,
    DirectionHeader,
    FrameHeaders,
    OptionalFrameData,
    StreamSizes,
    PixelValueMap,
    SubStreamLayout,
    EqualCellFlags,
    PixelMasks,
    RawPixelUsage,
    RawPixelCodes,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::FileHeader => "file header",
            Stage::OffsetTable => "direction offset table",
            Stage::DirectionHeader => "direction header",
            Stage::FrameHeaders => "frame headers",
            Stage::OptionalFrameData => "optional frame data",
            Stage::StreamSizes => "sub-stream sizes",
            Stage::PixelValueMap => "pixel value map",
            Stage::SubStreamLayout => "sub-stream layout",
            Stage::EqualCellFlags => "equal cell flags",
            Stage::PixelMasks => "pixel masks",
            Stage::RawPixelUsage => "raw pixel usage flags",
            Stage::RawPixelCodes => "raw pixel codes",
        };
        f.write_str(name)
    }
}

/// Error type for DCC operations
#[derive(Debug, thiserror::Error)]
pub enum DccError {
    #[error("cannot read DCC source: {0}")]
    SourceUnavailable(#[from] io::Error),

    #[error("malformed DCC header: {0}")]
    MalformedHeader(String),

    #[error("stream ended early while reading {stage}")]
    TruncatedStream { stage: Stage },

    #[error("invalid direction offset table: {0}")]
    InvalidOffsetTable(String),

    #[error("direction {index} does not exist, file has {count}")]
    DirectionOutOfRange { index: usize, count: usize },

    #[error("frame {frame} has an invalid header: {reason}")]
    InvalidFrameHeader { frame: usize, reason: String },

    #[error("direction bounding box of {width}x{height} pixels is too large")]
    OversizedDirection { width: u32, height: u32 },

    #[error("cell ({cell_x}, {cell_y}) of frame {frame} uses incremental pixel codes, which are not supported")]
    IncrementalCodesUnsupported {
        frame: usize,
        cell_x: usize,
        cell_y: usize,
    },
}

/// Header checks applied when opening a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Reject the whole file at open time if direction offsets are not
    /// strictly increasing inside the stream. When off, a bad range only
    /// fails the direction it belongs to.
    pub validate_offsets: bool,

    /// Treat non-zero reserved header bytes as an error instead of a warning
    pub reject_reserved: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            validate_offsets: true,
            reject_reserved: true,
        }
    }
}

impl DecodeOptions {
    /// Same checks as the reference decoder: the offset table is trusted and
    /// reserved bytes only produce a warning
    pub fn lenient() -> Self {
        DecodeOptions {
            validate_offsets: false,
            reject_reserved: false,
        }
    }
}

/// An opened DCC file: the raw bytes plus the parsed file header
#[derive(Debug, Clone)]
pub struct Dcc {
    data: Vec<u8>,
    header: FileHeader,
}

impl Dcc {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DccError> {
        Self::open_with(path, DecodeOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, options: DecodeOptions) -> Result<Self, DccError> {
        let data = fs::read(path.as_ref())?;
        debug!(path = %path.as_ref().display(), size = data.len(), "opened DCC file");
        Self::from_bytes_with(data, options)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, DccError> {
        Self::from_bytes_with(data, DecodeOptions::default())
    }

    pub fn from_bytes_with(data: Vec<u8>, options: DecodeOptions) -> Result<Self, DccError> {
        let header = header::parse_file_header(&data, &options)?;
        debug!(
            version = header.version,
            directions = header.direction_count,
            frames = header.frames_per_direction,
            "parsed DCC header"
        );
        Ok(Dcc { data, header })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn direction_count(&self) -> usize {
        self.header.direction_count as usize
    }

    pub fn frames_per_direction(&self) -> usize {
        self.header.frames_per_direction as usize
    }

    /// Encoded size in bytes of a direction
    pub fn direction_size(&self, index: usize) -> Result<usize, DccError> {
        let (start, end) = header::checked_direction_range(&self.header, index, self.data.len())?;
        Ok(end - start)
    }

    fn direction_bytes(&self, index: usize) -> Result<&[u8], DccError> {
        let (start, end) = header::checked_direction_range(&self.header, index, self.data.len())?;
        Ok(&self.data[start..end])
    }

    /// Parse everything up to and including the pixel value map, leaving the
    /// reader on the first sub-stream bit
    fn read_prelude<'a>(
        &self,
        index: usize,
        bytes: &'a [u8],
    ) -> Result<(DirectionInfo, BitReader<'a>), DccError> {
        let mut bits = BitReader::new(bytes);
        let direction = parser::read_direction(self.frames_per_direction(), &mut bits)?;
        let stream_sizes = parser::read_stream_sizes(&direction.header, &mut bits)?;
        let pixel_codes = PixelCodeTable::read(&mut bits)?;

        let info = DirectionInfo {
            index,
            direction,
            stream_sizes,
            pixel_codes,
        };
        Ok((info, bits))
    }

    /// Headers, extents and pixel code table of a direction, without
    /// touching the compressed cell data
    pub fn read_direction(&self, index: usize) -> Result<DirectionInfo, DccError> {
        let bytes = self.direction_bytes(index)?;
        let (info, _) = self.read_prelude(index, bytes)?;
        Ok(info)
    }

    pub fn pixel_code_table(&self, index: usize) -> Result<PixelCodeTable, DccError> {
        Ok(self.read_direction(index)?.pixel_codes)
    }

    pub fn decode_direction(&self, index: usize) -> Result<DecodedDirection, DccError> {
        let bytes = self.direction_bytes(index)?;
        debug!(direction = index, size = bytes.len(), "decoding direction");

        let (info, mut bits) = self.read_prelude(index, bytes)?;
        let reconstruction =
            CellReconstructor::new(&info.direction, &info.stream_sizes, &mut bits)?.run()?;

        debug!(
            direction = index,
            entries = reconstruction.entries.len(),
            "direction decoded"
        );

        Ok(DecodedDirection {
            index,
            direction: info.direction,
            pixel_codes: info.pixel_codes,
            grid: reconstruction.grid,
            entries: reconstruction.entries,
            frames: reconstruction.frames,
        })
    }

    /// Decode every direction on its own thread. Each direction succeeds or
    /// fails independently of the others.
    ///
    /// The direction count is a single header byte, so this spawns at most
    /// 255 threads.
    pub fn decode_all(&self) -> Vec<Result<DecodedDirection, DccError>> {
        thread::scope(|scope| {
            let handles: Vec<_> = (0..self.direction_count())
                .map(|index| scope.spawn(move || self.decode_direction(index)))
                .collect();

            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}
