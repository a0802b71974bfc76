//! Packet framing.
//!
//! ```text
//! startcode       u64
//! forward_ptr     v
//! header_checksum u32   if forward_ptr > 4096
//! ...body...
//! checksum        u32
//! ```
//!
//! `forward_ptr` counts the body and the trailing checksum. The header
//! checksum covers the startcode and `forward_ptr`; the footer checksum
//! covers the body only.

use std::io::Read;

use anyhow::{Result, anyhow, bail};
use log::Level::Warn;
use log::trace;

use crate::log_or_err;
use crate::process::demux::DemuxerState;
use crate::structs::startcode::StartCode;
use crate::utils::data_reader::DataReader;
use crate::utils::errors::PacketError;

/// Packets longer than this carry a header checksum.
pub const MAX_UNCHECKED_FORWARD_PTR: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub startcode: StartCode,
    pub forward_ptr: u64,
    pub header_checksum: Option<u32>,
    /// Offset of the footer checksum, i.e. the end of the packet body.
    pub end: u64,
}

impl PacketHeader {
    /// Reads the packet header following `startcode`.
    ///
    /// The reader's checksum window must have been reset right before the
    /// startcode. It is reset again once the header is complete.
    pub fn read<R: Read>(startcode: StartCode, reader: &mut DataReader<R>) -> Result<Self> {
        let forward_ptr = reader.read_var_u64()?;
        if forward_ptr < 4 {
            bail!(PacketError::ForwardPointerTooSmall(forward_ptr));
        }

        let header_checksum = if forward_ptr > MAX_UNCHECKED_FORWARD_PTR {
            let offset = reader.offset();
            let calculated = reader.crc();
            let expected = reader.read_u32()?;

            if expected != calculated {
                bail!(PacketError::HeaderChecksumMismatch {
                    offset,
                    expected,
                    calculated,
                });
            }

            Some(expected)
        } else {
            None
        };

        reader.reset_crc();

        let end = reader.offset().saturating_add(forward_ptr - 4);

        trace!(
            "{startcode} packet at {}: forward_ptr {forward_ptr}, end {end}",
            reader.offset()
        );

        Ok(Self {
            startcode,
            forward_ptr,
            header_checksum,
            end,
        })
    }

    /// Body bytes left before the footer.
    pub fn remaining<R: Read>(&self, reader: &DataReader<R>) -> u64 {
        self.end.saturating_sub(reader.offset())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketFooter {
    pub checksum: u32,
}

impl PacketFooter {
    /// Skips whatever is left of the body and reads the footer checksum.
    ///
    /// A mismatch is tolerated unless the fail level is `Warn`.
    pub fn read<R: Read>(
        state: &DemuxerState,
        reader: &mut DataReader<R>,
        header: &PacketHeader,
    ) -> Result<Self> {
        reader.seek_forward(header.end)?;

        let calculated = reader.crc();
        let checksum = reader.read_u32()?;

        if checksum != calculated {
            log_or_err!(
                state,
                Warn,
                anyhow!(PacketError::FooterChecksumMismatch {
                    packet: header.startcode.name(),
                    expected: checksum,
                    calculated,
                })
            );
        }

        Ok(Self { checksum })
    }
}

/// Reads a packet whose body is not interpreted.
pub fn skip_packet<R: Read>(
    state: &DemuxerState,
    reader: &mut DataReader<R>,
    startcode: StartCode,
) -> Result<PacketHeader> {
    let header = PacketHeader::read(startcode, reader)?;
    PacketFooter::read(state, reader, &header)?;

    Ok(header)
}

#[cfg(test)]
fn read_packet(state: &DemuxerState, data: &[u8]) -> Result<(PacketHeader, u64)> {
    use crate::structs::startcode::Code;

    let mut reader = DataReader::new(data);
    let code = reader.read_start_code()?.unwrap_or_default();
    let Code::Packet(startcode) = Code::classify(code)? else {
        bail!("not a packet");
    };

    let header = skip_packet(state, &mut reader, startcode)?;
    Ok((header, reader.offset()))
}

#[test]
fn test_small_packet() -> Result<()> {
    use crate::structs::startcode::INFO_STARTCODE;
    use crate::utils::test_writer::packet;

    let data = packet(INFO_STARTCODE, &[1, 2, 3, 4, 5]);
    let (header, offset) = read_packet(&DemuxerState::default(), &data)?;

    assert_eq!(header.startcode, StartCode::Info);
    assert_eq!(header.forward_ptr, 9);
    assert_eq!(header.header_checksum, None);
    assert_eq!(header.end, 14);
    assert_eq!(offset, data.len() as u64);

    Ok(())
}

#[test]
fn test_large_packet_header_checksum() -> Result<()> {
    use crate::structs::startcode::INDEX_STARTCODE;
    use crate::utils::test_writer::packet;

    let body = vec![0xA5; 5000];
    let data = packet(INDEX_STARTCODE, &body);
    let (header, offset) = read_packet(&DemuxerState::default(), &data)?;

    assert_eq!(header.forward_ptr, 5004);
    assert!(header.header_checksum.is_some());
    assert_eq!(offset, data.len() as u64);

    Ok(())
}

#[test]
fn test_large_packet_header_checksum_mismatch() {
    use crate::structs::startcode::INDEX_STARTCODE;
    use crate::utils::test_writer::packet;

    let mut data = packet(INDEX_STARTCODE, &vec![0xA5; 5000]);
    // 8 byte startcode, 2 byte forward_ptr, then the header checksum
    data[10] ^= 0xFF;

    let err = read_packet(&DemuxerState::default(), &data).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PacketError>(),
        Some(PacketError::HeaderChecksumMismatch { offset: 10, .. })
    ));
}

#[test]
fn test_footer_checksum_mismatch_tolerated() -> Result<()> {
    use crate::structs::startcode::INFO_STARTCODE;
    use crate::utils::test_writer::packet_with_footer;

    let data = packet_with_footer(INFO_STARTCODE, &[1, 2, 3], 0xDEAD_BEEF);

    let (_, offset) = read_packet(&DemuxerState::default(), &data)?;
    assert_eq!(offset, data.len() as u64);

    let strict = DemuxerState {
        fail_level: log::Level::Warn,
        ..Default::default()
    };
    let err = read_packet(&strict, &data).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PacketError>(),
        Some(PacketError::FooterChecksumMismatch {
            expected: 0xDEAD_BEEF,
            ..
        })
    ));

    Ok(())
}

#[test]
fn test_forward_ptr_too_small() {
    use crate::structs::startcode::INFO_STARTCODE;

    let mut data = INFO_STARTCODE.to_be_bytes().to_vec();
    data.push(3);

    let err = read_packet(&DemuxerState::default(), &data).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PacketError>(),
        Some(PacketError::ForwardPointerTooSmall(3))
    ));
}
