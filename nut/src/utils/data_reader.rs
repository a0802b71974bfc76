//! Byte level reader for NUT files.
//!
//! [`DataReader`] wraps any [`Read`] implementation and keeps two pieces of
//! running state: the number of bytes consumed so far and a CRC-32 over every
//! byte read since the last [`DataReader::reset_crc`]. All higher level
//! parsers read through it, so checksums cover exactly what was parsed.
//!
//! ## Integer Coding
//!
//! - `v`: unsigned, 7 payload bits per byte, most significant group first,
//!   high bit set on every byte except the last
//! - `s`: signed, coded as `v` with the sign in the low bit of `v + 1`
//! - `vb`: a `v` length followed by that many raw bytes

use std::io::{self, Read};

use anyhow::{Result, bail};

use crate::utils::crc::NUT_CRC;
use crate::utils::errors::PacketError;

/// Marker byte shared by every startcode.
pub const STARTCODE_MARKER: u8 = b'N';

pub struct DataReader<R> {
    inner: R,
    offset: u64,
    crc: u32,
}

impl<R: Read> DataReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            crc: NUT_CRC.init,
        }
    }

    /// Number of bytes consumed from the underlying reader.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Starts a new checksum window.
    pub fn reset_crc(&mut self) {
        self.crc = NUT_CRC.init;
    }

    /// CRC-32 of all bytes read since the last [`reset_crc`](Self::reset_crc).
    pub fn crc(&self) -> u32 {
        self.crc
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Reads a big-endian 32-bit value, as used by every checksum field.
    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn read_var_u64(&mut self) -> Result<u64> {
        let mut value = 0u64;

        loop {
            let byte = self.read_u8()?;

            if value > u64::MAX >> 7 {
                bail!(PacketError::VarIntOverflow(64));
            }

            value = (value << 7) | (byte & 0x7F) as u64;

            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
    }

    pub fn read_var_u32(&mut self) -> Result<u32> {
        let value = self.read_var_u64()?;
        Ok(u32::try_from(value).map_err(|_| PacketError::VarIntOverflow(32))?)
    }

    pub fn read_var_i64(&mut self) -> Result<i64> {
        let t = self.read_var_u64()? as i128 + 1;
        let value = if t & 1 == 1 { -(t >> 1) } else { t >> 1 };

        Ok(i64::try_from(value).map_err(|_| PacketError::VarIntOverflow(64))?)
    }

    /// Reads a length-prefixed byte array of at most `limit` bytes.
    pub fn read_var_bytes(&mut self, limit: u64) -> Result<Vec<u8>> {
        let length = self.read_var_u64()?;

        if length > limit {
            bail!(PacketError::ByteArrayTooLong { length, limit });
        }

        self.read_bytes(length)
    }

    pub fn read_bytes(&mut self, length: u64) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.by_ref().take(length).read_to_end(&mut data)?;

        if (data.len() as u64) < length {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }

        Ok(data)
    }

    /// Discards `length` bytes. Skipped bytes still feed the checksum.
    pub fn skip(&mut self, length: u64) -> Result<()> {
        let skipped = io::copy(&mut self.by_ref().take(length), &mut io::sink())?;

        if skipped < length {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }

        Ok(())
    }

    /// Advances to the absolute offset `target`. Moving backwards is an error.
    pub fn seek_forward(&mut self, target: u64) -> Result<()> {
        if target < self.offset {
            bail!(PacketError::BackwardSeek {
                offset: self.offset,
                target,
            });
        }

        self.skip(target - self.offset)
    }

    /// Reads the code that opens the next packet.
    ///
    /// Returns the frame code zero-extended when the first byte is not the
    /// startcode marker, or the full 64-bit startcode otherwise. Returns
    /// `None` when the input ends cleanly before the first byte.
    pub fn read_start_code(&mut self) -> Result<Option<u64>> {
        let mut buf = [0u8; 8];

        loop {
            match self.read(&mut buf[..1]) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if buf[0] != STARTCODE_MARKER {
            return Ok(Some(buf[0] as u64));
        }

        self.read_exact(&mut buf[1..])?;
        Ok(Some(u64::from_be_bytes(buf)))
    }
}

impl<R: Read> Read for DataReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;

        self.crc = NUT_CRC.update(self.crc, &buf[..n]);
        self.offset += n as u64;

        Ok(n)
    }
}

#[cfg(test)]
fn reader(data: &[u8]) -> DataReader<&[u8]> {
    DataReader::new(data)
}

#[test]
fn test_var_u64() -> Result<()> {
    let mut r = reader(&[0x00, 0x7F, 0x81, 0x00, 0x82, 0x80, 0x00]);

    assert_eq!(r.read_var_u64()?, 0);
    assert_eq!(r.read_var_u64()?, 127);
    assert_eq!(r.read_var_u64()?, 128);
    assert_eq!(r.read_var_u64()?, 32768);
    assert_eq!(r.offset(), 7);

    Ok(())
}

#[test]
fn test_var_u64_large_values() -> Result<()> {
    use crate::utils::test_writer::put_v;

    let values = [u32::MAX as u64, 1 << 62, (1 << 63) - 1, u64::MAX];
    let mut buf = Vec::new();
    values.iter().for_each(|&v| put_v(&mut buf, v));

    let mut r = reader(&buf);
    for v in values {
        assert_eq!(r.read_var_u64()?, v);
    }

    Ok(())
}

#[test]
fn test_var_u64_overflow() {
    let data = [0xFF; 11];
    let err = reader(&data).read_var_u64().unwrap_err();

    assert!(matches!(
        err.downcast_ref::<PacketError>(),
        Some(PacketError::VarIntOverflow(64))
    ));
}

#[test]
fn test_var_u32_overflow() {
    let err = reader(&[0x90, 0x80, 0x80, 0x80, 0x00]).read_var_u32().unwrap_err();

    assert!(matches!(
        err.downcast_ref::<PacketError>(),
        Some(PacketError::VarIntOverflow(32))
    ));
}

#[test]
fn test_var_i64() -> Result<()> {
    use crate::utils::test_writer::put_s;

    let values = [0, 1, -1, 2, -2, 63, -64, i64::MAX, i64::MIN + 1];
    let mut buf = Vec::new();
    values.iter().for_each(|&v| put_s(&mut buf, v));

    let mut r = reader(&buf);
    for v in values {
        assert_eq!(r.read_var_i64()?, v);
    }

    // v = 0, 1, 2 decode to 0, -1, 1
    let mut r = reader(&[0, 1, 2]);
    assert_eq!(r.read_var_i64()?, 0);
    assert_eq!(r.read_var_i64()?, -1);
    assert_eq!(r.read_var_i64()?, 1);

    Ok(())
}

#[test]
fn test_var_bytes() -> Result<()> {
    let mut r = reader(&[0x04, b'U', b'L', b'A', b'W', 0x05, 0x00]);

    assert_eq!(r.read_var_bytes(16)?, b"ULAW");

    let err = r.read_var_bytes(4).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PacketError>(),
        Some(PacketError::ByteArrayTooLong { length: 5, limit: 4 })
    ));

    Ok(())
}

#[test]
fn test_var_bytes_truncated() {
    let err = reader(&[0x04, b'U', b'L']).read_var_bytes(16).unwrap_err();
    let io_err = err.downcast_ref::<io::Error>().unwrap();

    assert_eq!(io_err.kind(), io::ErrorKind::UnexpectedEof);
}

#[test]
fn test_crc_window() -> Result<()> {
    let mut r = reader(b"xx123456789");

    r.read_bytes(2)?;
    r.reset_crc();
    r.skip(9)?;

    assert_eq!(r.crc(), 0x89A1_897F);
    assert_eq!(r.offset(), 11);

    Ok(())
}

#[test]
fn test_seek_forward() -> Result<()> {
    let mut r = reader(&[0, 1, 2, 3, 4, 5]);

    r.seek_forward(4)?;
    assert_eq!(r.read_u8()?, 4);

    let err = r.seek_forward(2).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PacketError>(),
        Some(PacketError::BackwardSeek { offset: 5, target: 2 })
    ));

    Ok(())
}

#[test]
fn test_read_start_code() -> Result<()> {
    let mut data = vec![0x00, 0x42];
    data.extend_from_slice(&0x4E4D_7A56_1F5F_04ADu64.to_be_bytes());

    let mut r = reader(&data);
    assert_eq!(r.read_start_code()?, Some(0x00));
    assert_eq!(r.read_start_code()?, Some(0x42));
    assert_eq!(r.read_start_code()?, Some(0x4E4D_7A56_1F5F_04AD));
    assert_eq!(r.read_start_code()?, None);

    Ok(())
}

#[test]
fn test_read_start_code_truncated() {
    assert!(reader(&[b'N', 0x4D, 0x7A]).read_start_code().is_err());
}
