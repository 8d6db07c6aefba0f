//! The precompiled track-index image format: a small header describing the disc's
//! track layout, followed by all track data concatenated into one file.
//!
//! Layout (big-endian):
//! - 8-byte magic `"clowncd\0"`
//! - u16 version (must be 0)
//! - u16 total tracks N
//! - N entries of { u16 track type (0 = MODE1/2352, 1 = AUDIO), u32 starting sector,
//!   u32 sector count (0xFFFFFFFF = until end of file) }

use crate::cue::CueTrackType;
use crate::{DiscError, DiscResult};
use bincode::{Decode, Encode};
use std::io::Read;

pub const TRACK_INDEX_MAGIC: [u8; 8] = *b"clowncd\0";

const TRACK_ENTRY_SIZE: u64 = 10;
const HEADER_SIZE: u64 = 12;

/// True if the first bytes of a disc image identify it as a track-index image
/// (magic followed by version 0).
#[must_use]
pub fn matches_magic(prefix: &[u8]) -> bool {
    prefix.len() >= 10 && prefix[..8] == TRACK_INDEX_MAGIC && prefix[8..10] == [0, 0]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct TrackIndexEntry {
    pub track_type: CueTrackType,
    pub starting_sector: u32,
    pub sector_count: u32,
}

impl TrackIndexEntry {
    #[must_use]
    pub fn ending_sector(self) -> u32 {
        if self.sector_count == u32::MAX {
            u32::MAX
        } else {
            self.starting_sector + self.sector_count
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct TrackIndex {
    tracks: Vec<TrackIndexEntry>,
}

impl TrackIndex {
    /// Parse the header from the start of a track-index image.
    pub fn parse<R: Read>(reader: &mut R) -> DiscResult<Self> {
        let mut header = [0; HEADER_SIZE as usize];
        reader.read_exact(&mut header)?;

        if !matches_magic(&header) {
            return Err(DiscError::TrackIndexParse("bad magic or version".into()));
        }

        let total_tracks = u16::from_be_bytes([header[10], header[11]]);

        let mut tracks = Vec::with_capacity(total_tracks.into());
        for track in 1..=total_tracks {
            let mut entry = [0; TRACK_ENTRY_SIZE as usize];
            reader.read_exact(&mut entry)?;

            let track_type = match u16::from_be_bytes([entry[0], entry[1]]) {
                0 => CueTrackType::Mode1Raw,
                1 => CueTrackType::Audio,
                other => {
                    return Err(DiscError::TrackIndexParse(format!(
                        "track {track} has invalid type {other}"
                    )));
                }
            };
            let starting_sector = u32::from_be_bytes(entry[2..6].try_into().unwrap());
            let sector_count = u32::from_be_bytes(entry[6..10].try_into().unwrap());

            tracks.push(TrackIndexEntry { track_type, starting_sector, sector_count });
        }

        Ok(Self { tracks })
    }

    /// 1-based track lookup.
    #[must_use]
    pub fn track(&self, number: u8) -> Option<TrackIndexEntry> {
        if number == 0 {
            return None;
        }
        self.tracks.get(usize::from(number) - 1).copied()
    }

    #[must_use]
    pub fn track_count(&self) -> u8 {
        self.tracks.len() as u8
    }

    /// Byte offset of the first sector of data, immediately after the header.
    #[must_use]
    pub fn data_offset(&self) -> u64 {
        HEADER_SIZE + self.tracks.len() as u64 * TRACK_ENTRY_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_image(tracks: &[(u16, u32, u32)]) -> Vec<u8> {
        let mut image = Vec::new();
        image.extend_from_slice(&TRACK_INDEX_MAGIC);
        image.extend_from_slice(&0u16.to_be_bytes());
        image.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
        for &(track_type, start, count) in tracks {
            image.extend_from_slice(&track_type.to_be_bytes());
            image.extend_from_slice(&start.to_be_bytes());
            image.extend_from_slice(&count.to_be_bytes());
        }
        image
    }

    #[test]
    fn parses_two_track_image() {
        let image = build_image(&[(0, 0, 1000), (1, 1000, u32::MAX)]);
        let index = TrackIndex::parse(&mut image.as_slice()).unwrap();

        assert_eq!(index.track_count(), 2);
        assert_eq!(index.data_offset(), 12 + 2 * 10);

        let data = index.track(1).unwrap();
        assert_eq!(data.track_type, CueTrackType::Mode1Raw);
        assert_eq!(data.ending_sector(), 1000);

        let audio = index.track(2).unwrap();
        assert_eq!(audio.track_type, CueTrackType::Audio);
        assert_eq!(audio.starting_sector, 1000);
        assert_eq!(audio.ending_sector(), u32::MAX);

        assert!(index.track(0).is_none());
        assert!(index.track(3).is_none());
    }

    #[test]
    fn rejects_bad_version_and_type() {
        let mut image = build_image(&[(0, 0, 100)]);
        image[9] = 1;
        assert!(TrackIndex::parse(&mut image.as_slice()).is_err());

        let image = build_image(&[(2, 0, 100)]);
        assert!(TrackIndex::parse(&mut image.as_slice()).is_err());
    }
}
