//! Frame decoding.
//!
//! A frame is introduced by a single frame code byte. The selected
//! [`FrameCode`](crate::structs::main_header::FrameCode) supplies the frame's
//! flags and default field values; the flags then decide which fields are
//! coded explicitly:
//!
//! ```text
//! frame_code        u8
//! coded_flags       v     if CODED
//! stream_id         v     if STREAM_ID
//! coded_pts         v     if CODED_PTS
//! data_size_msb     v     if SIZE_MSB
//! match_time_delta  s     if MATCH_TIME
//! header_idx        v     if HEADER_IDX
//! reserved_count    v     if RESERVED
//! reserved          v     reserved_count times
//! checksum          u32   if CHECKSUM
//! side_data         map   if SM_DATA
//! meta_data         map   if SM_DATA
//! payload
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use bitflags::bitflags;
use log::Level::Warn;
use log::trace;

use crate::log_or_err;
use crate::process::demux::DemuxerState;
use crate::structs::main_header::{MAX_ELIDED_FRAME_SIZE, MainHeader};
use crate::structs::rational::Rational;
use crate::structs::stream_header::StreamHeader;
use crate::utils::data_reader::{DataReader, STARTCODE_MARKER};
use crate::utils::errors::{FrameError, StreamHeaderError};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FrameFlags: u64 {
        /// Keyframe.
        const KEY = 1 << 0;
        /// End of relevance.
        const EOR = 1 << 1;
        const CODED_PTS = 1 << 3;
        const STREAM_ID = 1 << 4;
        const SIZE_MSB = 1 << 5;
        const CHECKSUM = 1 << 6;
        const RESERVED = 1 << 7;
        const SM_DATA = 1 << 8;
        const HEADER_IDX = 1 << 10;
        const MATCH_TIME = 1 << 11;
        const CODED = 1 << 12;
        const INVALID = 1 << 13;
    }
}

/// A typed value from a side data or meta data map.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    String(String),
    Pair { key: String, value: String },
    Int(i64),
    Timestamp { value: u64, time_base: Rational },
    Rational(Rational),
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Pair { key, value } => write!(f, "{key}={value}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Timestamp { value, time_base } => write!(f, "{value} @ {time_base}"),
            Self::Rational(r) => write!(f, "{r}"),
        }
    }
}

pub type MetaMap = BTreeMap<String, MetaValue>;

#[derive(Debug, Clone)]
pub struct Frame {
    pub stream: Arc<StreamHeader>,
    pub time_base: Rational,
    pub code: u8,
    pub flags: FrameFlags,
    pub pts: i64,
    pub side_data: Option<MetaMap>,
    pub meta_data: Option<MetaMap>,
    pub data: Vec<u8>,
}

impl Frame {
    /// Decodes the frame introduced by `code`.
    ///
    /// The reader's checksum window must have been reset right before the
    /// frame code. The owning stream's `last_pts` is left untouched.
    pub fn read<R: Read>(state: &DemuxerState, reader: &mut DataReader<R>, code: u8) -> Result<Self> {
        if code == STARTCODE_MARKER {
            bail!(FrameError::ReservedFrameCode);
        }

        let Some(main) = &state.main_header else {
            bail!(StreamHeaderError::MissingMainHeader("Frame"));
        };

        let frame_code = main.frame_code(code);
        if !frame_code.is_valid() {
            bail!(FrameError::InvalidFrameCode(code));
        }

        let mut flags = frame_code.flags;
        if flags.contains(FrameFlags::CODED) {
            flags ^= FrameFlags::from_bits_retain(reader.read_var_u64()?);
        }

        let stream_id = if flags.contains(FrameFlags::STREAM_ID) {
            let stream_id = reader.read_var_u64()?;
            if stream_id >= main.stream_count {
                bail!(FrameError::StreamIdOutOfRange {
                    stream_id,
                    stream_count: main.stream_count,
                });
            }
            stream_id
        } else {
            frame_code.stream_id
        };

        let Some(stream) = state.stream(stream_id) else {
            bail!(FrameError::UndeclaredStream(stream_id));
        };

        let pts = if flags.contains(FrameFlags::CODED_PTS) {
            let coded = reader.read_var_u64()?;
            resolve_pts(stream.last_pts, coded, stream.header.msb_pts_shift)?
        } else {
            stream
                .last_pts
                .checked_add(frame_code.pts_delta)
                .ok_or(FrameError::PtsOverflow {
                    last_pts: stream.last_pts,
                    coded: frame_code.pts_delta as u64,
                })?
        };

        let mut size = frame_code.size_lsb;
        if flags.contains(FrameFlags::SIZE_MSB) {
            let size_msb = reader.read_var_u64()?;
            size = size_msb
                .saturating_mul(frame_code.size_mul)
                .saturating_add(size);
        }

        if flags.contains(FrameFlags::MATCH_TIME) {
            reader.read_var_i64()?;
        }

        let mut header_idx = frame_code.header_idx;
        if flags.contains(FrameFlags::HEADER_IDX) {
            header_idx = reader.read_var_u64()?;
        }

        let reserved_count = if flags.contains(FrameFlags::RESERVED) {
            reader.read_var_u64()?
        } else {
            frame_code.reserved_count
        };
        for _ in 0..reserved_count {
            reader.read_var_u64()?;
        }

        if header_idx >= main.elision.len() as u64 {
            bail!(FrameError::HeaderIndexOutOfRange {
                header_idx,
                count: main.elision.len(),
            });
        }

        if flags.contains(FrameFlags::CHECKSUM) {
            let calculated = reader.crc();
            let expected = reader.read_u32()?;
            if expected != calculated {
                log_or_err!(
                    state,
                    Warn,
                    anyhow!(FrameError::ChecksumMismatch {
                        expected,
                        calculated,
                    })
                );
            }
        } else if (size > 2 * main.max_distance && !main.is_pipe())
            || stream.last_pts.abs_diff(pts) > stream.header.max_pts_distance
        {
            log_or_err!(state, Warn, anyhow!(FrameError::MissingChecksum { size, pts }));
        }

        if size > MAX_ELIDED_FRAME_SIZE {
            header_idx = 0;
        }

        let elision = &main.elision[header_idx as usize];
        let Some(mut available) = size.checked_sub(elision.len() as u64) else {
            bail!(FrameError::SizeSmallerThanElision {
                size,
                elision: elision.len(),
            });
        };

        let (side_data, meta_data) = if flags.contains(FrameFlags::SM_DATA) {
            if main.version < 4 {
                bail!(FrameError::SideDataUnsupported(main.version));
            }

            let start = reader.offset();
            let side_data = read_meta_map(main, reader, available)?;
            let consumed = reader.offset() - start;
            let meta_data = read_meta_map(main, reader, available - consumed)?;
            let consumed = reader.offset() - start;

            available -= consumed;
            (Some(side_data), Some(meta_data))
        } else {
            (None, None)
        };

        let mut data = Vec::with_capacity(elision.len());
        data.extend_from_slice(elision);
        data.extend_from_slice(&reader.read_bytes(available)?);

        trace!(
            "Frame code {code:#04X}: stream {stream_id}, flags {flags:?}, pts {pts}, size {size}, header_idx {header_idx}"
        );

        Ok(Self {
            stream: Arc::clone(&stream.header),
            time_base: stream.time_base,
            code,
            flags,
            pts,
            side_data,
            meta_data,
            data,
        })
    }

    pub fn stream_id(&self) -> u64 {
        self.stream.id
    }

    pub fn is_keyframe(&self) -> bool {
        self.flags.contains(FrameFlags::KEY)
    }

    pub fn is_end_of_relevance(&self) -> bool {
        self.flags.contains(FrameFlags::EOR)
    }

    pub fn pts_seconds(&self) -> f64 {
        self.pts as f64 * self.time_base.to_f64()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame(id={}, pts={}, data=({} bytes))",
            self.stream.id,
            self.pts,
            self.data.len()
        )
    }
}

/// Reconstructs a pts from its coded value.
///
/// Values below `1 << msb_pts_shift` carry only the low bits of the pts and
/// are resolved to the value closest to `last_pts`. Larger values are the
/// full pts offset by `1 << msb_pts_shift`.
pub fn resolve_pts(last_pts: i64, coded: u64, msb_pts_shift: u32) -> Result<i64> {
    let overflow = || FrameError::PtsOverflow { last_pts, coded };

    let limit = 1u64 << msb_pts_shift;
    if coded >= limit {
        return Ok(i64::try_from(coded - limit).map_err(|_| overflow())?);
    }

    let mask = (limit - 1) as i64;
    let delta = last_pts.checked_sub(mask >> 1).ok_or_else(overflow)?;
    let low = (coded as i64).wrapping_sub(delta) & mask;

    Ok(low.checked_add(delta).ok_or_else(overflow)?)
}

/// Reads a side data or meta data map that may use at most `limit` bytes.
fn read_meta_map<R: Read>(
    main: &MainHeader,
    reader: &mut DataReader<R>,
    limit: u64,
) -> Result<MetaMap> {
    let start = reader.offset();
    let overrun = |consumed: u64| FrameError::MetadataOverrun {
        consumed,
        available: limit,
    };

    let mut map = MetaMap::new();
    let count = reader.read_var_u64()?;

    for _ in 0..count {
        let consumed = reader.offset() - start;
        if consumed >= limit {
            bail!(overrun(consumed));
        }
        let remaining = limit - consumed;

        let name = read_string(reader, remaining)?;
        let remaining = limit.saturating_sub(reader.offset() - start);

        let value = match reader.read_var_i64()? {
            -1 => MetaValue::String(read_string(reader, remaining)?),
            -2 => {
                let key = read_string(reader, remaining)?;
                let value = read_string(reader, remaining)?;
                MetaValue::Pair { key, value }
            }
            -3 => MetaValue::Int(reader.read_var_i64()?),
            -4 => {
                let coded = reader.read_var_u64()?;
                let count = main.time_bases.len() as u64;
                MetaValue::Timestamp {
                    value: coded / count,
                    time_base: main.time_bases[(coded % count) as usize],
                }
            }
            tag if tag < -4 => {
                let den = (tag.unsigned_abs() - 4) as i64;
                MetaValue::Rational(Rational::new(reader.read_var_i64()?, den))
            }
            tag => MetaValue::Int(tag),
        };

        trace!("Metadata {name:?} = {value}");
        map.insert(name, value);
    }

    let consumed = reader.offset() - start;
    if consumed > limit {
        bail!(overrun(consumed));
    }

    Ok(map)
}

fn read_string<R: Read>(reader: &mut DataReader<R>, limit: u64) -> Result<String> {
    let bytes = reader.read_var_bytes(limit)?;

    String::from_utf8(bytes).map_err(|e| {
        anyhow!(FrameError::InvalidMetadataString(
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        ))
    })
}

#[test]
fn test_resolve_pts_fixture() -> Result<()> {
    assert_eq!(resolve_pts(100, 5, 4)?, 101);

    Ok(())
}

#[test]
fn test_resolve_pts_wraparound() -> Result<()> {
    // Low bits closest to last_pts, in either direction
    assert_eq!(resolve_pts(100, 4, 4)?, 100);
    assert_eq!(resolve_pts(100, 0, 4)?, 96);
    assert_eq!(resolve_pts(100, 11, 4)?, 107);
    assert_eq!(resolve_pts(100, 12, 4)?, 108);
    assert_eq!(resolve_pts(100, 13, 4)?, 93);
    assert_eq!(resolve_pts(0, 127, 7)?, -1);
    assert_eq!(resolve_pts(250, 3, 7)?, 259);

    Ok(())
}

#[test]
fn test_resolve_pts_absolute() -> Result<()> {
    assert_eq!(resolve_pts(100, 16, 4)?, 0);
    assert_eq!(resolve_pts(100, 16 + 5000, 4)?, 5000);
    assert_eq!(resolve_pts(0, 1 + 42, 0)?, 42);

    Ok(())
}
