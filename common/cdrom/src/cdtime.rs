//! MM:SS:FF timestamps as used in CUE sheets and CD headers

use crate::SECTORS_PER_SECOND;
use bincode::{Decode, Encode};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Encode, Decode)]
pub struct CdTime {
    pub minutes: u8,
    pub seconds: u8,
    pub frames: u8,
}

impl CdTime {
    pub const ZERO: Self = Self { minutes: 0, seconds: 0, frames: 0 };

    /// # Panics
    ///
    /// Panics if seconds or frames are out of range (`seconds < 60`, `frames < 75`).
    #[must_use]
    pub fn new(minutes: u8, seconds: u8, frames: u8) -> Self {
        assert!(seconds < 60, "invalid seconds value: {seconds}");
        assert!(frames < SECTORS_PER_SECOND as u8, "invalid frames value: {frames}");

        Self { minutes, seconds, frames }
    }

    #[must_use]
    pub fn to_sector_number(self) -> u32 {
        (u32::from(self.minutes) * 60 + u32::from(self.seconds)) * SECTORS_PER_SECOND
            + u32::from(self.frames)
    }

    #[must_use]
    pub fn from_sector_number(sector: u32) -> Self {
        let frames = (sector % SECTORS_PER_SECOND) as u8;
        let seconds = ((sector / SECTORS_PER_SECOND) % 60) as u8;
        let minutes = (sector / (SECTORS_PER_SECOND * 60)) as u8;

        Self { minutes, seconds, frames }
    }
}

impl Display for CdTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.minutes, self.seconds, self.frames)
    }
}

impl FromStr for CdTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.split(':');

        let mut next_field = |name: &str| {
            fields
                .next()
                .ok_or_else(|| format!("missing {name} in timestamp '{s}'"))?
                .parse::<u8>()
                .map_err(|_| format!("invalid {name} in timestamp '{s}'"))
        };

        let minutes = next_field("minutes")?;
        let seconds = next_field("seconds")?;
        let frames = next_field("frames")?;

        if seconds >= 60 || frames >= SECTORS_PER_SECOND as u8 {
            return Err(format!("timestamp field out of range: '{s}'"));
        }

        Ok(Self { minutes, seconds, frames })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_arithmetic() {
        assert_eq!(CdTime::ZERO.to_sector_number(), 0);
        assert_eq!(CdTime::new(0, 2, 0).to_sector_number(), 150);
        assert_eq!(CdTime::new(3, 14, 59).to_sector_number(), (3 * 60 + 14) * 75 + 59);

        for sector in [0, 1, 74, 75, 150, 12345, 359_999] {
            assert_eq!(CdTime::from_sector_number(sector).to_sector_number(), sector);
        }
    }

    #[test]
    fn parse_and_display() {
        let time: CdTime = "03:14:59".parse().unwrap();
        assert_eq!(time, CdTime::new(3, 14, 59));
        assert_eq!(time.to_string(), "03:14:59");

        assert!("03:60:00".parse::<CdTime>().is_err());
        assert!("03:00:75".parse::<CdTime>().is_err());
        assert!("03:00".parse::<CdTime>().is_err());
        assert!("aa:bb:cc".parse::<CdTime>().is_err());
    }
}
