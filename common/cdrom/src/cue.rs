//! Parsing and representing CUE sheets
//!
//! Only the commands that affect disc layout are interpreted (FILE, TRACK, INDEX);
//! informational commands (CATALOG, ISRC, PREGAP, POSTGAP, REM, ...) are skipped, which
//! matches common emulator practice if not the Red Book.

use crate::cdtime::CdTime;
use crate::{DiscError, DiscResult, SECTOR_DATA_SIZE, SECTOR_RAW_SIZE};
use bincode::{Decode, Encode};
use regex::Regex;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum CueFileType {
    Binary,
    Wave,
    Mp3,
}

impl CueFileType {
    #[must_use]
    pub fn is_compressed_audio(self) -> bool {
        matches!(self, Self::Wave | Self::Mp3)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Binary => "BINARY",
            Self::Wave => "WAVE",
            Self::Mp3 => "MP3",
        }
    }
}

impl FromStr for CueFileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BINARY" => Ok(Self::Binary),
            "WAVE" => Ok(Self::Wave),
            "MP3" => Ok(Self::Mp3),
            _ => Err(format!("unsupported CUE file type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum CueTrackType {
    Mode1Data,
    Mode1Raw,
    Audio,
}

impl CueTrackType {
    #[must_use]
    pub fn is_audio(self) -> bool {
        self == Self::Audio
    }

    /// Bytes per sector in the backing file for this track type.
    #[must_use]
    pub fn sector_size(self) -> u64 {
        match self {
            Self::Mode1Data => SECTOR_DATA_SIZE as u64,
            Self::Mode1Raw | Self::Audio => SECTOR_RAW_SIZE as u64,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Mode1Data => "MODE1/2048",
            Self::Mode1Raw => "MODE1/2352",
            Self::Audio => "AUDIO",
        }
    }
}

impl FromStr for CueTrackType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MODE1/2048" => Ok(Self::Mode1Data),
            "MODE1/2352" => Ok(Self::Mode1Raw),
            "AUDIO" => Ok(Self::Audio),
            _ => Err(format!("unsupported CUE track type: {s}")),
        }
    }
}

/// One (track, index) entry, i.e. one INDEX line together with the FILE/TRACK context
/// it appeared under.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct CueEntry {
    pub file_name: String,
    pub file_type: CueFileType,
    pub track: u8,
    pub track_type: CueTrackType,
    pub index: u8,
    pub start: CdTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct CueSheet {
    entries: Vec<CueEntry>,
}

impl CueSheet {
    /// Parse CUE text. Fails on the first line whose leading keyword is not recognized,
    /// which is also how disc-format sniffing rejects non-CUE files.
    pub fn parse(text: &str) -> DiscResult<Self> {
        let mut parser = CueParser::default();

        for line in text.lines() {
            parser.parse_line(line)?;
        }

        if parser.entries.is_empty() {
            return Err(DiscError::CueParse("CUE sheet contains no INDEX entries".into()));
        }

        Ok(Self { entries: parser.entries })
    }

    #[must_use]
    pub fn entries(&self) -> &[CueEntry] {
        &self.entries
    }

    #[must_use]
    pub fn find(&self, track: u8, index: u8) -> Option<&CueEntry> {
        self.entries.iter().find(|entry| entry.track == track && entry.index == index)
    }

    /// The sector at which the given entry ends: the smallest INDEX start in the same
    /// backing file that is past this entry's start. Open-ended entries (last in their
    /// file) end at `u32::MAX`, i.e. at end of file.
    #[must_use]
    pub fn ending_sector(&self, entry: &CueEntry) -> u32 {
        let starting_sector = entry.start.to_sector_number();

        self.entries
            .iter()
            .filter(|other| {
                other.file_name == entry.file_name
                    && (other.track, other.index) != (entry.track, entry.index)
            })
            .map(|other| other.start.to_sector_number())
            .filter(|&sector| sector > starting_sector)
            .min()
            .unwrap_or(u32::MAX)
    }
}

impl Display for CueSheet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut current_file: Option<&str> = None;
        let mut current_track: Option<u8> = None;

        for entry in &self.entries {
            if current_file != Some(entry.file_name.as_str()) {
                writeln!(f, "FILE \"{}\" {}", entry.file_name, entry.file_type.as_str())?;
                current_file = Some(entry.file_name.as_str());
                current_track = None;
            }

            if current_track != Some(entry.track) {
                writeln!(f, "  TRACK {:02} {}", entry.track, entry.track_type.as_str())?;
                current_track = Some(entry.track);
            }

            writeln!(f, "    INDEX {:02} {}", entry.index, entry.start)?;
        }

        Ok(())
    }
}

const IGNORED_COMMANDS: &[&str] = &[
    "CATALOG",
    "CDTEXTFILE",
    "FLAGS",
    "ISRC",
    "PERFORMER",
    "POSTGAP",
    "PREGAP",
    "REM",
    "SONGWRITER",
    "TITLE",
];

#[derive(Debug, Default)]
struct CueParser {
    entries: Vec<CueEntry>,
    current_file: Option<(String, CueFileType)>,
    current_track: Option<(u8, CueTrackType)>,
}

impl CueParser {
    fn parse_line(&mut self, line: &str) -> DiscResult<()> {
        let Some(command) = line.split_whitespace().next() else {
            // Blank line
            return Ok(());
        };

        match command {
            "FILE" => self.parse_file_line(line),
            "TRACK" => self.parse_track_line(line),
            "INDEX" => self.parse_index_line(line),
            _ if IGNORED_COMMANDS.contains(&command) => Ok(()),
            _ => Err(DiscError::CueParse(format!("unrecognized CUE command '{command}'"))),
        }
    }

    fn parse_file_line(&mut self, line: &str) -> DiscResult<()> {
        static RE: OnceLock<Regex> = OnceLock::new();

        let re = RE
            .get_or_init(|| Regex::new(r#"^\s*FILE\s+(?:"([^"]+)"|(\S+))\s+(\S+)\s*$"#).unwrap());
        let captures =
            re.captures(line).ok_or_else(|| DiscError::CueInvalidFileLine(line.into()))?;

        let file_name = captures.get(1).or_else(|| captures.get(2)).unwrap().as_str();
        let file_type = captures
            .get(3)
            .unwrap()
            .as_str()
            .parse::<CueFileType>()
            .map_err(|_| DiscError::CueInvalidFileLine(line.into()))?;

        self.current_file = Some((file_name.into(), file_type));
        self.current_track = None;

        Ok(())
    }

    fn parse_track_line(&mut self, line: &str) -> DiscResult<()> {
        static RE: OnceLock<Regex> = OnceLock::new();

        let re = RE.get_or_init(|| Regex::new(r"^\s*TRACK\s+(\d+)\s+(\S+)\s*$").unwrap());
        let captures =
            re.captures(line).ok_or_else(|| DiscError::CueInvalidTrackLine(line.into()))?;

        let track = captures
            .get(1)
            .unwrap()
            .as_str()
            .parse::<u8>()
            .map_err(|_| DiscError::CueInvalidTrackLine(line.into()))?;
        let track_type = captures
            .get(2)
            .unwrap()
            .as_str()
            .parse::<CueTrackType>()
            .map_err(|_| DiscError::CueInvalidTrackLine(line.into()))?;

        self.current_track = Some((track, track_type));

        Ok(())
    }

    fn parse_index_line(&mut self, line: &str) -> DiscResult<()> {
        static RE: OnceLock<Regex> = OnceLock::new();

        let re =
            RE.get_or_init(|| Regex::new(r"^\s*INDEX\s+(\d+)\s+(\d+:\d+:\d+)\s*$").unwrap());
        let captures =
            re.captures(line).ok_or_else(|| DiscError::CueInvalidIndexLine(line.into()))?;

        let index = captures
            .get(1)
            .unwrap()
            .as_str()
            .parse::<u8>()
            .map_err(|_| DiscError::CueInvalidIndexLine(line.into()))?;
        let start = captures
            .get(2)
            .unwrap()
            .as_str()
            .parse::<CdTime>()
            .map_err(|_| DiscError::CueInvalidIndexLine(line.into()))?;

        let Some((file_name, file_type)) = self.current_file.clone() else {
            return Err(DiscError::CueParse(format!("INDEX with no active FILE: '{line}'")));
        };
        let Some((track, track_type)) = self.current_track else {
            return Err(DiscError::CueParse(format!("INDEX with no active TRACK: '{line}'")));
        };

        self.entries.push(CueEntry { file_name, file_type, track, track_type, index, start });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_TRACK_CUE: &str = "FILE \"track.bin\" BINARY\n\
        TRACK 01 MODE1/2352\n\
        INDEX 01 00:00:00\n\
        TRACK 02 AUDIO\n\
        INDEX 01 03:14:59\n";

    #[test]
    fn two_track_sheet() {
        let sheet = CueSheet::parse(TWO_TRACK_CUE).unwrap();

        let track_1 = sheet.find(1, 1).unwrap();
        assert_eq!(track_1.track_type, CueTrackType::Mode1Raw);
        assert_eq!(track_1.start.to_sector_number(), 0);
        assert_eq!(sheet.ending_sector(track_1), (3 * 60 + 14) * 75 + 59);

        let track_2 = sheet.find(2, 1).unwrap();
        assert_eq!(track_2.track_type, CueTrackType::Audio);
        assert_eq!(track_2.start.to_sector_number(), (3 * 60 + 14) * 75 + 59);
        assert_eq!(sheet.ending_sector(track_2), u32::MAX);
    }

    #[test]
    fn emit_parse_round_trip() {
        let sheet = CueSheet::parse(TWO_TRACK_CUE).unwrap();
        assert_eq!(CueSheet::parse(&sheet.to_string()).unwrap(), sheet);

        // Multiple files, pause indexes, bareword filename
        let complex = "FILE \"data.bin\" BINARY\n\
            TRACK 01 MODE1/2048\n\
            INDEX 01 00:00:00\n\
            FILE music.wav WAVE\n\
            TRACK 02 AUDIO\n\
            INDEX 00 00:00:00\n\
            INDEX 01 00:02:00\n";
        let sheet = CueSheet::parse(complex).unwrap();
        assert_eq!(sheet.entries().len(), 3);
        assert_eq!(CueSheet::parse(&sheet.to_string()).unwrap(), sheet);
    }

    #[test]
    fn ignored_commands() {
        let cue = "REM COMMENT \"ripped by someone\"\n\
            CATALOG 1234567890123\n\
            FILE \"track.bin\" BINARY\n\
            TRACK 01 AUDIO\n\
            PREGAP 00:02:00\n\
            INDEX 01 00:00:00\n";
        let sheet = CueSheet::parse(cue).unwrap();
        assert_eq!(sheet.entries().len(), 1);
    }

    #[test]
    fn rejects_garbage() {
        assert!(CueSheet::parse("SEGADISCSYSTEM").is_err());
        assert!(CueSheet::parse("").is_err());
        assert!(CueSheet::parse("FILE \"a.bin\" BINARY\n").is_err());
        assert!(CueSheet::parse("FILE \"a.bin\" ELF\nTRACK 01 AUDIO\nINDEX 01 00:00:00\n").is_err());
    }

    #[test]
    fn index_requires_context() {
        assert!(CueSheet::parse("INDEX 01 00:00:00\n").is_err());
        assert!(CueSheet::parse("FILE \"a.bin\" BINARY\nINDEX 01 00:00:00\n").is_err());
    }
}
