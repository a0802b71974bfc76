//! Main header and frame code table.
//!
//! The main header carries the global parameters of a file: how many streams
//! it declares, the time bases those streams may use and the 256-entry frame
//! code table. Each frame starts with a single frame code byte that selects a
//! table entry, and the entry supplies defaults for every field the frame
//! header would otherwise have to code explicitly.
//!
//! ## Frame Code Table
//!
//! The table is coded as runs. Each run carries a field count that selects
//! how many of the following values are present:
//!
//! | # | Field              | When absent          |
//! |---|--------------------|----------------------|
//! | 0 | `pts_delta`        | previous run         |
//! | 1 | `size_mul`         | previous run         |
//! | 2 | `stream_id`        | previous run         |
//! | 3 | `size_lsb`         | 0                    |
//! | 4 | `reserved_count`   | 0                    |
//! | 5 | `count`            | `size_mul - size_lsb`|
//! | 6 | `match_time_delta` | previous run         |
//! | 7 | `header_idx`       | previous run         |
//!
//! Fields beyond the eighth are skipped. Slot 0x4E (`'N'`) is never assigned
//! and is always marked [`FrameFlags::INVALID`].

use std::io::Read;

use anyhow::{Result, bail};
use log::{debug, trace};

use crate::structs::frame::FrameFlags;
use crate::structs::packet::PacketHeader;
use crate::structs::rational::{Rational, gcd};
use crate::utils::data_reader::{DataReader, STARTCODE_MARKER};
use crate::utils::errors::MainHeaderError;

pub const MIN_VERSION: u64 = 2;
pub const MAX_VERSION: u64 = 4;

/// Exclusive upper bound of `stream_count`.
pub const MAX_STREAMS: u64 = 250;

pub const MAX_DISTANCE_LIMIT: u64 = 65536;

pub const FRAME_CODE_COUNT: usize = 256;

pub const MAX_ELISION_HEADERS: u64 = 128;
pub const ELISION_BUDGET: usize = 1024;

/// Frames larger than this never use an elided header.
pub const MAX_ELIDED_FRAME_SIZE: u64 = 4096;

pub const MAIN_FLAG_BROADCAST: u64 = 1 << 0;
pub const MAIN_FLAG_PIPE: u64 = 1 << 1;

/// Defaults for a frame, selected by the frame code byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCode {
    pub flags: FrameFlags,
    pub stream_id: u64,
    pub size_mul: u64,
    pub size_lsb: u64,
    pub pts_delta: i64,
    pub reserved_count: u64,
    pub match_time_delta: i64,
    pub header_idx: u64,
}

impl FrameCode {
    pub const INVALID: Self = Self {
        flags: FrameFlags::INVALID,
        stream_id: 0,
        size_mul: 1,
        size_lsb: 0,
        pts_delta: 0,
        reserved_count: 0,
        match_time_delta: 0,
        header_idx: 0,
    };

    pub fn is_valid(&self) -> bool {
        !self.flags.contains(FrameFlags::INVALID)
    }
}

#[derive(Debug, Clone)]
pub struct MainHeader {
    pub version: u64,
    pub minor_version: u64,
    pub stream_count: u64,
    pub max_distance: u64,
    pub time_bases: Vec<Rational>,
    pub frame_codes: Vec<FrameCode>,
    /// Elided header prefixes. Entry 0 is always empty.
    pub elision: Vec<Vec<u8>>,
    pub flags: u64,
}

impl MainHeader {
    pub fn read<R: Read>(reader: &mut DataReader<R>, packet: &PacketHeader) -> Result<Self> {
        let version = reader.read_var_u64()?;
        if !(MIN_VERSION..=MAX_VERSION).contains(&version) {
            bail!(MainHeaderError::UnsupportedVersion(version));
        }

        let minor_version = if version > 3 {
            reader.read_var_u64()?
        } else {
            0
        };

        let stream_count = reader.read_var_u64()?;
        if stream_count >= MAX_STREAMS {
            bail!(MainHeaderError::StreamCountTooLarge(stream_count));
        }

        let mut max_distance = reader.read_var_u64()?;
        if max_distance > MAX_DISTANCE_LIMIT {
            debug!("max_distance {max_distance} clamped to {MAX_DISTANCE_LIMIT}");
            max_distance = MAX_DISTANCE_LIMIT;
        }

        let time_bases = Self::read_time_bases(reader, packet)?;
        let frame_codes = read_frame_codes(reader, stream_count)?;

        let elision = if reader.offset() < packet.end {
            read_elision_headers(reader)?
        } else {
            vec![Vec::new()]
        };

        let flags = if version > 3 && reader.offset() < packet.end {
            reader.read_var_u64()?
        } else {
            0
        };

        debug!(
            "Main header: version {version}.{minor_version}, {stream_count} streams, max_distance {max_distance}, {} time bases, {} elision headers, flags {flags:#X}",
            time_bases.len(),
            elision.len() - 1,
        );

        Ok(Self {
            version,
            minor_version,
            stream_count,
            max_distance,
            time_bases,
            frame_codes,
            elision,
            flags,
        })
    }

    fn read_time_bases<R: Read>(
        reader: &mut DataReader<R>,
        packet: &PacketHeader,
    ) -> Result<Vec<Rational>> {
        let count = reader.read_var_u64()?;
        if count == 0 || count > packet.remaining(reader) / 2 {
            bail!(MainHeaderError::InvalidTimeBaseCount(count));
        }

        let mut time_bases = Vec::with_capacity(count as usize);
        for index in 0..count as usize {
            let num = reader.read_var_u64()?;
            let den = reader.read_var_u64()?;

            let in_range = |v: u64| v > 0 && v < 1 << 31;
            if !in_range(num) || !in_range(den) || gcd(num, den) != 1 {
                bail!(MainHeaderError::InvalidTimeBase { index, num, den });
            }

            time_bases.push(Rational::new(num as i64, den as i64));
        }

        Ok(time_bases)
    }

    pub fn frame_code(&self, code: u8) -> &FrameCode {
        &self.frame_codes[code as usize]
    }

    pub fn is_pipe(&self) -> bool {
        self.flags & MAIN_FLAG_PIPE != 0
    }

    pub fn is_broadcast(&self) -> bool {
        self.flags & MAIN_FLAG_BROADCAST != 0
    }
}

/// Decodes the run-length coded frame code table.
pub fn read_frame_codes<R: Read>(
    reader: &mut DataReader<R>,
    stream_count: u64,
) -> Result<Vec<FrameCode>> {
    let marker = STARTCODE_MARKER as usize;

    let mut frame_codes = Vec::with_capacity(FRAME_CODE_COUNT);

    let mut pts_delta = 0i64;
    let mut size_mul = 1u64;
    let mut stream_id = 0u64;
    let mut match_time_delta = 1 - (1i64 << 62);
    let mut header_idx = 0u64;

    while frame_codes.len() < FRAME_CODE_COUNT {
        let index = frame_codes.len();

        let flags = FrameFlags::from_bits_retain(reader.read_var_u64()?);
        let fields = reader.read_var_u64()?;

        if fields > 0 {
            pts_delta = reader.read_var_i64()?;
        }
        if fields > 1 {
            size_mul = reader.read_var_u64()?;
            if size_mul >= 16384 {
                bail!(MainHeaderError::SizeMultiplierTooLarge(size_mul));
            }
        }
        if fields > 2 {
            stream_id = reader.read_var_u64()?;
        }
        let size_lsb = if fields > 3 {
            reader.read_var_u64()?
        } else {
            0
        };
        let reserved_count = if fields > 4 {
            reader.read_var_u64()?
        } else {
            0
        };
        if reserved_count >= 256 {
            bail!(MainHeaderError::ReservedCountTooLarge(reserved_count));
        }
        let count = if fields > 5 {
            reader.read_var_u64()?
        } else {
            size_mul.saturating_sub(size_lsb)
        };
        if fields > 6 {
            match_time_delta = reader.read_var_i64()?;
        }
        if fields > 7 {
            header_idx = reader.read_var_u64()?;
            if header_idx >= MAX_ELISION_HEADERS {
                bail!(MainHeaderError::HeaderIndexTooLarge(header_idx));
            }
        }
        for _ in 8..fields {
            reader.read_var_u64()?;
        }

        if stream_id >= stream_count {
            bail!(MainHeaderError::StreamIdOutOfRange {
                index,
                stream_id,
                stream_count,
            });
        }

        let available = (FRAME_CODE_COUNT - index - usize::from(index <= marker)) as u64;
        if count == 0 || count > available {
            bail!(MainHeaderError::InvalidSlotCount { index, count });
        }

        trace!(
            "Frame codes {index}..: count {count}, flags {flags:?}, stream {stream_id}, mul {size_mul}, lsb {size_lsb}, pts_delta {pts_delta}"
        );

        let mut j = 0;
        while j < count {
            let index = frame_codes.len();

            if index == marker {
                frame_codes.push(FrameCode::INVALID);
                continue;
            }

            let lsb = size_lsb.saturating_add(j);
            if lsb >= 16384 {
                bail!(MainHeaderError::SizeLsbTooLarge {
                    index,
                    size_lsb: lsb,
                });
            }

            frame_codes.push(FrameCode {
                flags,
                stream_id,
                size_mul,
                size_lsb: lsb,
                pts_delta,
                reserved_count,
                match_time_delta,
                header_idx,
            });
            j += 1;
        }
    }

    Ok(frame_codes)
}

/// Reads the elided header table. The returned table always starts with the
/// empty entry 0.
pub fn read_elision_headers<R: Read>(reader: &mut DataReader<R>) -> Result<Vec<Vec<u8>>> {
    let count = reader.read_var_u64()?;
    if count >= MAX_ELISION_HEADERS {
        bail!(MainHeaderError::ElisionCountTooLarge(count));
    }

    let mut elision = Vec::with_capacity(count as usize + 1);
    elision.push(Vec::new());

    let mut remaining = ELISION_BUDGET;
    for index in 1..=count as usize {
        let length = reader.read_var_u64()?;
        if length == 0 || length >= 256 {
            bail!(MainHeaderError::ElisionLengthInvalid { index, length });
        }

        let length = length as usize;
        if length > remaining {
            bail!(MainHeaderError::ElisionBudgetExceeded {
                index,
                length,
                remaining,
            });
        }
        remaining -= length;

        elision.push(reader.read_bytes(length as u64)?);
    }

    Ok(elision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::startcode::{MAIN_STARTCODE, StartCode};
    use crate::utils::test_writer::{packet, put_s, put_v, put_vb};

    type Run = (FrameFlags, &'static [i64]);

    const KEY_RUN: Run = (FrameFlags::KEY, &[1, 1, 0, 4, 0, 1]);
    const CODED_RUN: Run = (
        FrameFlags::SIZE_MSB
            .union(FrameFlags::CODED_PTS)
            .union(FrameFlags::STREAM_ID),
        &[0, 64, 0, 0, 0, 254],
    );

    fn body(version: u64, max_distance: u64, runs: &[Run], tail: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        put_v(&mut body, version);
        if version > 3 {
            put_v(&mut body, 1);
        }
        put_v(&mut body, 2);
        put_v(&mut body, max_distance);
        put_v(&mut body, 1);
        put_v(&mut body, 1);
        put_v(&mut body, 25);

        for &(flags, fields) in runs {
            put_v(&mut body, flags.bits());
            put_v(&mut body, fields.len() as u64);
            for (i, &value) in fields.iter().enumerate() {
                if i == 0 || i == 6 {
                    put_s(&mut body, value);
                } else {
                    put_v(&mut body, value as u64);
                }
            }
        }

        body.extend_from_slice(tail);
        body
    }

    fn read(body: &[u8]) -> Result<MainHeader> {
        let data = packet(MAIN_STARTCODE, body);
        let mut reader = DataReader::new(&data[8..]);
        let header = PacketHeader::read(StartCode::Main, &mut reader)?;

        MainHeader::read(&mut reader, &header)
    }

    fn expect_error(body: &[u8]) -> MainHeaderError {
        match read(body).unwrap_err().downcast::<MainHeaderError>() {
            Ok(err) => err,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    #[test]
    fn test_frame_code_table() -> Result<()> {
        let main = read(&body(3, 32768, &[KEY_RUN, CODED_RUN], &[]))?;

        assert_eq!(main.version, 3);
        assert_eq!(main.stream_count, 2);
        assert_eq!(main.time_bases, [Rational::new(1, 25)]);
        assert_eq!(main.frame_codes.len(), FRAME_CODE_COUNT);
        assert_eq!(main.elision, [Vec::<u8>::new()]);
        assert!(!main.is_pipe());

        let invalid: Vec<usize> = (0..FRAME_CODE_COUNT)
            .filter(|&i| !main.frame_codes[i].is_valid())
            .collect();
        assert_eq!(invalid, [STARTCODE_MARKER as usize]);

        assert_eq!(
            *main.frame_code(0),
            FrameCode {
                flags: FrameFlags::KEY,
                stream_id: 0,
                size_mul: 1,
                size_lsb: 4,
                pts_delta: 1,
                reserved_count: 0,
                match_time_delta: 1 - (1 << 62),
                header_idx: 0,
            }
        );

        // Slot 0x4E is skipped without consuming a size_lsb value
        assert_eq!(main.frame_code(0x4D).size_lsb, 0x4C);
        assert_eq!(main.frame_code(0x4F).size_lsb, 0x4D);
        assert_eq!(main.frame_code(0xFF).size_lsb, 253);
        assert_eq!(main.frame_code(0xFF).size_mul, 64);

        Ok(())
    }

    #[test]
    fn test_implied_count_and_inherited_fields() -> Result<()> {
        let runs: [Run; 4] = [
            (FrameFlags::CODED_PTS, &[-1, 30, 1]),
            (FrameFlags::SIZE_MSB, &[2]),
            (FrameFlags::SIZE_MSB, &[2, 200, 1, 10]),
            (FrameFlags::INVALID, &[0, 1, 0, 0, 0, 5]),
        ];
        let main = read(&body(3, 32768, &runs, &[]))?;

        // Second run: size_mul and stream_id carried over, 30 codes implied
        let code = main.frame_code(45);
        assert_eq!(code.flags, FrameFlags::SIZE_MSB);
        assert_eq!((code.pts_delta, code.size_mul, code.stream_id), (2, 30, 1));
        assert_eq!(code.size_lsb, 15);

        // Third run: 200 - 10 codes from 60, with 0x4E skipped in between
        assert_eq!(main.frame_code(77).size_lsb, 10 + 17);
        assert_eq!(main.frame_code(100).size_lsb, 10 + 39);
        assert_eq!(main.frame_code(250).size_lsb, 10 + 189);
        assert!(!main.frame_code(251).is_valid());
        assert!(!main.frame_code(255).is_valid());

        Ok(())
    }

    #[test]
    fn test_invalid_slot_counts() {
        let zero: Run = (FrameFlags::KEY, &[0, 1, 0, 0, 0, 0]);
        assert!(matches!(
            expect_error(&body(3, 32768, &[zero], &[])),
            MainHeaderError::InvalidSlotCount { index: 0, count: 0 }
        ));

        let too_many: Run = (FrameFlags::KEY, &[0, 1, 0, 0, 0, 256]);
        assert!(matches!(
            expect_error(&body(3, 32768, &[too_many], &[])),
            MainHeaderError::InvalidSlotCount {
                index: 0,
                count: 256
            }
        ));

        let wrong_stream: Run = (FrameFlags::KEY, &[0, 1, 2, 0, 0, 255]);
        assert!(matches!(
            expect_error(&body(3, 32768, &[wrong_stream], &[])),
            MainHeaderError::StreamIdOutOfRange {
                index: 0,
                stream_id: 2,
                stream_count: 2
            }
        ));

        let big_lsb: Run = (FrameFlags::KEY, &[0, 1, 0, 16380, 0, 255]);
        assert!(matches!(
            expect_error(&body(3, 32768, &[big_lsb], &[])),
            MainHeaderError::SizeLsbTooLarge {
                size_lsb: 16384,
                ..
            }
        ));
    }

    #[test]
    fn test_elision_headers() -> Result<()> {
        let mut tail = Vec::new();
        put_v(&mut tail, 2);
        put_vb(&mut tail, b"abc");
        put_vb(&mut tail, b"xy");

        let main = read(&body(3, 32768, &[KEY_RUN, CODED_RUN], &tail))?;
        assert_eq!(main.elision, [b"".to_vec(), b"abc".to_vec(), b"xy".to_vec()]);

        Ok(())
    }

    #[test]
    fn test_elision_limits() {
        let mut tail = Vec::new();
        put_v(&mut tail, 5);
        for _ in 0..5 {
            put_vb(&mut tail, &[0xEE; 255]);
        }
        assert!(matches!(
            expect_error(&body(3, 32768, &[KEY_RUN, CODED_RUN], &tail)),
            MainHeaderError::ElisionBudgetExceeded {
                index: 5,
                length: 255,
                remaining: 4
            }
        ));

        let mut tail = Vec::new();
        put_v(&mut tail, 128);
        assert!(matches!(
            expect_error(&body(3, 32768, &[KEY_RUN, CODED_RUN], &tail)),
            MainHeaderError::ElisionCountTooLarge(128)
        ));

        let mut tail = Vec::new();
        put_v(&mut tail, 1);
        put_v(&mut tail, 0);
        assert!(matches!(
            expect_error(&body(3, 32768, &[KEY_RUN, CODED_RUN], &tail)),
            MainHeaderError::ElisionLengthInvalid {
                index: 1,
                length: 0
            }
        ));
    }

    #[test]
    fn test_version_4_fields() -> Result<()> {
        let mut tail = Vec::new();
        put_v(&mut tail, 0);
        put_v(&mut tail, MAIN_FLAG_PIPE);

        let main = read(&body(4, 100_000, &[KEY_RUN, CODED_RUN], &tail))?;
        assert_eq!(main.version, 4);
        assert_eq!(main.minor_version, 1);
        assert_eq!(main.max_distance, MAX_DISTANCE_LIMIT);
        assert!(main.is_pipe());
        assert!(!main.is_broadcast());

        Ok(())
    }

    #[test]
    fn test_unsupported_versions() {
        for version in [1, 5] {
            let err = expect_error(&body(version, 32768, &[KEY_RUN, CODED_RUN], &[]));
            assert!(matches!(err, MainHeaderError::UnsupportedVersion(v) if v == version));
        }
    }

    #[test]
    fn test_invalid_time_bases() {
        let mut data = Vec::new();
        [3, 1, 32768, 1, 2, 4].iter().for_each(|&v| put_v(&mut data, v));
        data.extend_from_slice(&[0; 16]);
        assert!(matches!(
            expect_error(&data),
            MainHeaderError::InvalidTimeBase {
                index: 0,
                num: 2,
                den: 4
            }
        ));

        let mut data = Vec::new();
        [3, 1, 32768, 0].iter().for_each(|&v| put_v(&mut data, v));
        data.extend_from_slice(&[0; 16]);
        assert!(matches!(
            expect_error(&data),
            MainHeaderError::InvalidTimeBaseCount(0)
        ));

        let mut data = Vec::new();
        [3, 250].iter().for_each(|&v| put_v(&mut data, v));
        assert!(matches!(
            expect_error(&data),
            MainHeaderError::StreamCountTooLarge(250)
        ));
    }
}
