//! CD-ROM disc abstraction: CUE sheets, raw sector images, track-index blobs, and
//! the audio decoding/resampling path for CD-DA playback.

pub mod audio;
pub mod cdtime;
pub mod cue;
pub mod reader;
pub mod resampler;
pub mod trackindex;

use crc::Crc;
use std::io;
use thiserror::Error;

pub use cdtime::CdTime;
pub use reader::{CdRom, DiscLayout};

/// Payload bytes in a MODE1/2048 sector.
pub const SECTOR_DATA_SIZE: usize = 2048;

/// Total bytes in a raw MODE1/2352 sector.
pub const SECTOR_RAW_SIZE: usize = 2352;

/// Sync pattern (12 bytes) plus MSF/mode header (4 bytes) at the start of a raw sector.
pub const SECTOR_HEADER_SIZE: usize = 16;

pub const SECTORS_PER_SECOND: u32 = 75;

pub const CD_SAMPLE_RATE: u32 = 44100;

/// 44100 Hz / 75 sectors per second.
pub const AUDIO_FRAMES_PER_SECTOR: u64 = (CD_SAMPLE_RATE / SECTORS_PER_SECOND) as u64;

/// Stereo signed 16-bit, so 4 bytes per audio frame.
pub const AUDIO_FRAME_SIZE: u64 = 4;

#[derive(Debug, Error)]
pub enum DiscError {
    #[error("error opening disc image '{path}': {source}")]
    DiscOpen {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("I/O error reading disc image: {0}")]
    DiscRead(#[from] io::Error),
    #[error("invalid FILE line in CUE sheet: '{0}'")]
    CueInvalidFileLine(String),
    #[error("invalid TRACK line in CUE sheet: '{0}'")]
    CueInvalidTrackLine(String),
    #[error("invalid INDEX line in CUE sheet: '{0}'")]
    CueInvalidIndexLine(String),
    #[error("error parsing CUE sheet: {0}")]
    CueParse(String),
    #[error("invalid track-index image: {0}")]
    TrackIndexParse(String),
}

pub type DiscResult<T> = Result<T, DiscError>;

const CD_ROM_EDC: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_CD_ROM_EDC);

/// Validate the error-detection code of a raw mode-1 sector. The EDC covers the sync
/// pattern, header, and data payload, and is stored little-endian right after the
/// payload.
#[must_use]
pub fn validate_sector_edc(sector: &[u8; SECTOR_RAW_SIZE]) -> bool {
    let edc_offset = SECTOR_HEADER_SIZE + SECTOR_DATA_SIZE;
    let stored = u32::from_le_bytes(sector[edc_offset..edc_offset + 4].try_into().unwrap());
    CD_ROM_EDC.checksum(&sector[..edc_offset]) == stored
}
