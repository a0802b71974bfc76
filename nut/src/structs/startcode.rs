//! Packet startcodes.
//!
//! Every structural packet opens with one of five 64-bit startcodes. Each
//! begins with the marker byte `'N'` (0x4E), which is why frame code 0x4E is
//! never usable as a short-form frame code.

use std::fmt;

use anyhow::{Result, bail};

use crate::utils::errors::PacketError;

/// File identification string written before the first packet.
pub const FILE_ID: &[u8; 25] = b"nut/multimedia container\0";

pub const MAIN_STARTCODE: u64 = 0x4E4D_7A56_1F5F_04AD;
pub const STREAM_STARTCODE: u64 = 0x4E53_1140_5BF2_F9DB;
pub const SYNCPOINT_STARTCODE: u64 = 0x4E4B_E4AD_EECA_4569;
pub const INDEX_STARTCODE: u64 = 0x4E58_DD67_2F23_E64E;
pub const INFO_STARTCODE: u64 = 0x4E49_AB68_B596_BA78;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StartCode {
    Main,
    Stream,
    SyncPoint,
    Index,
    Info,
}

impl StartCode {
    pub const fn from_u64(value: u64) -> Option<Self> {
        match value {
            MAIN_STARTCODE => Some(Self::Main),
            STREAM_STARTCODE => Some(Self::Stream),
            SYNCPOINT_STARTCODE => Some(Self::SyncPoint),
            INDEX_STARTCODE => Some(Self::Index),
            INFO_STARTCODE => Some(Self::Info),
            _ => None,
        }
    }

    pub const fn value(self) -> u64 {
        match self {
            Self::Main => MAIN_STARTCODE,
            Self::Stream => STREAM_STARTCODE,
            Self::SyncPoint => SYNCPOINT_STARTCODE,
            Self::Index => INDEX_STARTCODE,
            Self::Info => INFO_STARTCODE,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Main => "Main",
            Self::Stream => "Stream",
            Self::SyncPoint => "SyncPoint",
            Self::Index => "Index",
            Self::Info => "Info",
        }
    }
}

impl fmt::Display for StartCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What opens the next packet: a structural startcode or a frame code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Packet(StartCode),
    Frame(u8),
}

impl Code {
    /// Classifies a value returned by
    /// [`DataReader::read_start_code`](crate::utils::data_reader::DataReader::read_start_code).
    pub fn classify(value: u64) -> Result<Self> {
        if let Ok(frame_code) = u8::try_from(value) {
            return Ok(Self::Frame(frame_code));
        }

        match StartCode::from_u64(value) {
            Some(startcode) => Ok(Self::Packet(startcode)),
            None => bail!(PacketError::UnknownStartCode(value)),
        }
    }
}

#[test]
fn test_classify() -> Result<()> {
    assert_eq!(Code::classify(0x00)?, Code::Frame(0x00));
    assert_eq!(Code::classify(0xFF)?, Code::Frame(0xFF));

    for startcode in [
        StartCode::Main,
        StartCode::Stream,
        StartCode::SyncPoint,
        StartCode::Index,
        StartCode::Info,
    ] {
        assert_eq!(Code::classify(startcode.value())?, Code::Packet(startcode));
    }

    Ok(())
}

#[test]
fn test_classify_unknown() {
    let err = Code::classify(0x4E00_0000_0000_0000).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<PacketError>(),
        Some(PacketError::UnknownStartCode(0x4E00_0000_0000_0000))
    ));
}
