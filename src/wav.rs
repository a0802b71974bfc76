use std::io::{self, BufWriter, Seek, SeekFrom, Write};

use crate::byteorder::WriteBytesLe;
use nutd_macros::{ToBytes, riff_chunk};

pub const RIFF_ID: &[u8; 4] = b"RIFF";
pub const WAVE_ID: &[u8; 4] = b"WAVE";
pub const DATA_ID: &[u8; 4] = b"data";

pub const WAVE_FORMAT_IEEE_FLOAT: u16 = 3;

pub trait RiffChunk {
    fn chunk_id(&self) -> &[u8; 4];
    fn chunk_data(&self) -> Vec<u8>;

    fn write_all<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let data = self.chunk_data();

        writer.write_all(self.chunk_id())?;
        writer.write_all(&(data.len() as u32).to_le_bytes())?;
        writer.write_all(&data)?;

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, ToBytes)]
#[riff_chunk(b"fmt ")]
pub struct FormatChunk {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

impl FormatChunk {
    pub fn ieee_float(sample_rate: u32, channels: u16) -> Self {
        let block_align = channels.saturating_mul(4);

        Self {
            format_tag: WAVE_FORMAT_IEEE_FLOAT,
            channels,
            sample_rate,
            byte_rate: sample_rate.saturating_mul(u32::from(block_align)),
            block_align,
            bits_per_sample: 32,
        }
    }
}

/// RIFF/WAVE file writer for 32-bit float PCM audio
pub struct WAVWriter<W: Write + Seek> {
    writer: BufWriter<W>,
    format: FormatChunk,
    riff_size_position: u64,
    data_size_position: u64,
    data_written: u64,
}

impl<W: Write + Seek> WAVWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            format: FormatChunk::ieee_float(48000, 2),
            riff_size_position: 0,
            data_size_position: 0,
            data_written: 0,
        }
    }

    /// Configure audio format parameters
    pub fn configure_audio_format(&mut self, sample_rate: u32, channels: u16) -> io::Result<()> {
        if self.data_written > 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Cannot change format after writing data",
            ));
        }

        self.format = FormatChunk::ieee_float(sample_rate, channels);
        Ok(())
    }

    /// Write RIFF, fmt and data chunk headers
    pub fn write_header(&mut self) -> io::Result<()> {
        self.writer.write_all(RIFF_ID)?;
        self.riff_size_position = self.writer.stream_position()?;
        self.writer.write_all(&0u32.to_le_bytes())?; // Updated by finish()
        self.writer.write_all(WAVE_ID)?;

        self.format.write_all(&mut self.writer)?;

        self.writer.write_all(DATA_ID)?;
        self.data_size_position = self.writer.stream_position()?;
        self.writer.write_all(&0u32.to_le_bytes())?; // Updated by finish()

        Ok(())
    }

    /// Write interleaved samples
    pub fn write_f32_samples(&mut self, samples: &[f32]) -> io::Result<()> {
        for sample in samples {
            self.writer.write_all(&sample.to_le_bytes())?;
        }
        self.data_written += samples.len() as u64 * 4;
        Ok(())
    }

    /// Finish writing and update chunk sizes
    pub fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()?;

        let current_pos = self.writer.stream_position()?;
        let too_large = || io::Error::new(io::ErrorKind::InvalidData, "Audio data exceeds 4 GiB");

        let data_size = u32::try_from(self.data_written).map_err(|_| too_large())?;
        let riff_size = u32::try_from(current_pos - self.riff_size_position - 4)
            .map_err(|_| too_large())?;

        self.writer.seek(SeekFrom::Start(self.data_size_position))?;
        self.writer.write_all(&data_size.to_le_bytes())?;

        self.writer.seek(SeekFrom::Start(self.riff_size_position))?;
        self.writer.write_all(&riff_size.to_le_bytes())?;

        self.writer.seek(SeekFrom::Start(current_pos))?;
        self.writer.flush()?;

        Ok(())
    }

    /// Get the underlying writer
    #[cfg(test)]
    pub fn into_inner(self) -> io::Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error())
    }

    /// Get statistics about written data
    pub fn stats(&self) -> WAVStats {
        WAVStats {
            data_written: self.data_written,
            sample_rate: self.format.sample_rate,
            channels: self.format.channels,
        }
    }
}

/// Statistics about WAV file writing
#[derive(Debug, Clone)]
pub struct WAVStats {
    pub data_written: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_wav_header_write() -> io::Result<()> {
        let mut writer = WAVWriter::new(Cursor::new(Vec::new()));

        writer.configure_audio_format(8000, 1)?;
        writer.write_header()?;

        let buffer = writer.into_inner()?.into_inner();

        assert_eq!(buffer.len(), 44);
        assert_eq!(&buffer[0..4], RIFF_ID);
        assert_eq!(&buffer[8..12], WAVE_ID);
        assert_eq!(&buffer[12..16], b"fmt ");
        assert_eq!(&buffer[16..20], &16u32.to_le_bytes());
        assert_eq!(&buffer[20..22], &WAVE_FORMAT_IEEE_FLOAT.to_le_bytes());
        assert_eq!(&buffer[22..24], &1u16.to_le_bytes());
        assert_eq!(&buffer[24..28], &8000u32.to_le_bytes());
        assert_eq!(&buffer[28..32], &32000u32.to_le_bytes());
        assert_eq!(&buffer[32..34], &4u16.to_le_bytes());
        assert_eq!(&buffer[34..36], &32u16.to_le_bytes());
        assert_eq!(&buffer[36..40], DATA_ID);

        Ok(())
    }

    #[test]
    fn test_wav_sample_write() -> io::Result<()> {
        let mut writer = WAVWriter::new(Cursor::new(Vec::new()));

        writer.configure_audio_format(48000, 2)?;
        writer.write_header()?;
        writer.write_f32_samples(&[0.5, -0.5, 0.25, -0.25])?;

        assert_eq!(writer.stats().data_written, 16);
        assert!(writer.configure_audio_format(44100, 2).is_err());

        writer.finish()?;
        let buffer = writer.into_inner()?.into_inner();

        assert_eq!(buffer.len(), 44 + 16);
        assert_eq!(&buffer[4..8], &(36u32 + 16).to_le_bytes());
        assert_eq!(&buffer[40..44], &16u32.to_le_bytes());
        assert_eq!(&buffer[44..48], &0.5f32.to_le_bytes());

        Ok(())
    }
}
