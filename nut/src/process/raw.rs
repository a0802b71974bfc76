//! Interpretation of uncompressed payloads.
//!
//! Raw audio fourccs follow a small grammar:
//!
//! - `ALAW` / `ULAW`: 8-bit G.711
//! - `P[type][interleaving][bits]`: little-endian PCM
//! - `[bits][interleaving][type]P`: big-endian PCM
//!
//! where `type` is `S` (signed), `U` (unsigned) or `F` (float) and
//! `interleaving` is `D` (interleaved). Planar layouts are rejected.

use anyhow::{Result, bail};
use bitstream_io::{BigEndian, BitRead, BitReader, Endianness, LittleEndian};

use crate::structs::frame::Frame;
use crate::structs::stream_header::{StreamHeader, StreamType};
use crate::utils::errors::RawError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEncoding {
    ALaw,
    ULaw,
    Signed,
    Unsigned,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFormat {
    pub encoding: AudioEncoding,
    pub sample_rate: f32,
    pub sample_size_bits: u8,
    pub channels: u64,
    /// Bytes per sample frame, all channels included.
    pub frame_size: u64,
    pub frame_rate: f32,
    pub big_endian: bool,
}

fn expect_type(header: &StreamHeader, expected: StreamType) -> Result<()> {
    if header.stream_type != expected {
        bail!(RawError::WrongStreamType {
            id: header.id,
            expected: expected.name(),
            actual: header.stream_type.name(),
        });
    }

    Ok(())
}

/// Derives the sample format of a raw audio stream from its fourcc.
pub fn stream_to_audio_format(header: &StreamHeader) -> Result<AudioFormat> {
    expect_type(header, StreamType::Audio)?;

    let fourcc = header.fourcc.as_slice();
    let unsupported = || RawError::UnsupportedAudioFourcc(header.fourcc_str());

    let &[a, b, c, d] = fourcc else {
        bail!(unsupported());
    };

    let (encoding, bits, big_endian) = match fourcc {
        b"ALAW" => (AudioEncoding::ALaw, 8, false),
        b"ULAW" => (AudioEncoding::ULaw, 8, false),
        _ => {
            let (kind, interleaving, bits, big_endian) = if a == b'P' {
                (b, c, d, false)
            } else if d == b'P' {
                (c, b, a, true)
            } else {
                bail!(unsupported());
            };

            if interleaving != b'D' {
                bail!(RawError::PlanarAudio(header.fourcc_str()));
            }

            let encoding = match kind {
                b'S' => AudioEncoding::Signed,
                b'U' => AudioEncoding::Unsigned,
                b'F' => AudioEncoding::Float,
                _ => bail!(unsupported()),
            };

            let supported = match encoding {
                AudioEncoding::Float => matches!(bits, 32 | 64),
                _ => matches!(bits, 8 | 16 | 24 | 32 | 64),
            };
            if !supported {
                bail!(RawError::UnsupportedSampleSize(bits));
            }

            (encoding, bits, big_endian)
        }
    };

    let (sample_rate, channels) = header
        .audio
        .map(|audio| (audio.sample_rate.to_f64() as f32, audio.channels))
        .unwrap_or((0.0, 1));

    Ok(AudioFormat {
        encoding,
        sample_rate,
        sample_size_bits: bits,
        channels,
        frame_size: u64::from(bits).saturating_mul(channels) / 8,
        frame_rate: sample_rate,
        big_endian,
    })
}

/// Interleaved samples of one audio frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub format: AudioFormat,
    pub data: Vec<u8>,
    /// Whole sample frames in `data`.
    pub frames: u64,
}

impl AudioBuffer {
    /// Decodes every whole sample frame to `f32` in `[-1, 1)`.
    pub fn samples_f32(&self) -> Result<Vec<f32>> {
        let len = (self.frames * self.format.frame_size) as usize;
        let data = &self.data[..len];

        let pcm = match self.format.encoding {
            AudioEncoding::ALaw => return Ok(expand_g711(data, alaw_to_linear)),
            AudioEncoding::ULaw => return Ok(expand_g711(data, ulaw_to_linear)),
            AudioEncoding::Signed => Pcm::Signed,
            AudioEncoding::Unsigned => Pcm::Unsigned,
            AudioEncoding::Float => Pcm::Float,
        };

        let bits = u32::from(self.format.sample_size_bits);
        let count = len * 8 / bits as usize;

        if self.format.big_endian {
            read_pcm(BitReader::<_, BigEndian>::new(data), pcm, bits, count)
        } else {
            read_pcm(BitReader::<_, LittleEndian>::new(data), pcm, bits, count)
        }
    }
}

/// Linear PCM sample coding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pcm {
    Signed,
    Unsigned,
    Float,
}

fn read_pcm<R: std::io::Read, E: Endianness>(
    mut reader: BitReader<R, E>,
    pcm: Pcm,
    bits: u32,
    count: usize,
) -> Result<Vec<f32>> {
    let scale = (1u64 << (bits - 1)) as f64;

    let mut samples = Vec::with_capacity(count);
    for _ in 0..count {
        let sample = match pcm {
            Pcm::Signed => reader.read_signed_var::<i64>(bits)? as f64 / scale,
            Pcm::Unsigned => (reader.read_unsigned_var::<u64>(bits)? as f64 - scale) / scale,
            Pcm::Float if bits == 32 => {
                f64::from(f32::from_bits(reader.read_unsigned_var::<u32>(32)?))
            }
            Pcm::Float => f64::from_bits(reader.read_unsigned_var::<u64>(64)?),
        };
        samples.push(sample as f32);
    }

    Ok(samples)
}

fn expand_g711(data: &[u8], expand: fn(u8) -> i16) -> Vec<f32> {
    data.iter()
        .map(|&b| f32::from(expand(b)) / 32768.0)
        .collect()
}

/// G.711 A-law expansion to 16-bit linear.
fn alaw_to_linear(value: u8) -> i16 {
    let a = value ^ 0x55;
    let segment = (a & 0x70) >> 4;

    let mut t = i16::from(a & 0x0F) << 4;
    match segment {
        0 => t += 8,
        1 => t += 0x108,
        _ => t = (t + 0x108) << (segment - 1),
    }

    if a & 0x80 != 0 { t } else { -t }
}

/// G.711 mu-law expansion to 16-bit linear.
fn ulaw_to_linear(value: u8) -> i16 {
    let u = !value;

    let t = ((i16::from(u & 0x0F) << 3) + 0x84) << ((u & 0x70) >> 4);

    if u & 0x80 != 0 { 0x84 - t } else { t - 0x84 }
}

/// Wraps a raw audio frame for sample access.
pub fn to_audio_buffer(frame: Frame) -> Result<AudioBuffer> {
    let format = stream_to_audio_format(&frame.stream)?;
    let frames = frame.data.len() as u64 / format.frame_size;

    Ok(AudioBuffer {
        format,
        data: frame.data,
        frames,
    })
}

/// Raw pixel layouts, named by the byte order of one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Argb,
    Rgba,
    Bgra,
    Abgr,
    Rgb24,
    Bgr24,
    Gray8,
}

impl PixelLayout {
    pub fn from_fourcc(fourcc: &[u8]) -> Option<Self> {
        Some(match fourcc {
            b"ARGB" => Self::Argb,
            b"RGBA" => Self::Rgba,
            b"BGRA" => Self::Bgra,
            b"ABGR" => Self::Abgr,
            b"RGB\x18" => Self::Rgb24,
            b"BGR\x18" => Self::Bgr24,
            b"Y1\x00\x08" => Self::Gray8,
            _ => return None,
        })
    }

    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Argb | Self::Rgba | Self::Bgra | Self::Abgr => 4,
            Self::Rgb24 | Self::Bgr24 => 3,
            Self::Gray8 => 1,
        }
    }

    /// Packs one pixel as 0xAARRGGBB.
    fn to_argb(self, p: &[u8]) -> u32 {
        let (a, r, g, b) = match self {
            Self::Argb => (p[0], p[1], p[2], p[3]),
            Self::Rgba => (p[3], p[0], p[1], p[2]),
            Self::Bgra => (p[3], p[2], p[1], p[0]),
            Self::Abgr => (p[0], p[3], p[2], p[1]),
            Self::Rgb24 => (0xFF, p[0], p[1], p[2]),
            Self::Bgr24 => (0xFF, p[2], p[1], p[0]),
            Self::Gray8 => (0xFF, p[0], p[0], p[0]),
        };

        u32::from_be_bytes([a, r, g, b])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u64,
    pub height: u64,
    /// Row-major, packed 0xAARRGGBB.
    pub pixels: Vec<u32>,
}

impl Image {
    /// Pixels as R, G, B, A bytes.
    pub fn to_rgba_bytes(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|&argb| {
                let [a, r, g, b] = argb.to_be_bytes();
                [r, g, b, a]
            })
            .collect()
    }
}

/// Reinterprets a raw video frame as an image of the stream's dimensions.
pub fn to_image(frame: &Frame) -> Result<Image> {
    let header = &frame.stream;
    expect_type(header, StreamType::Video)?;

    let Some(layout) = PixelLayout::from_fourcc(&header.fourcc) else {
        bail!(RawError::UnsupportedPixelLayout(header.fourcc_str()));
    };

    let (width, height) = header
        .video
        .map(|video| (video.width, video.height))
        .unwrap_or_default();

    let bpp = layout.bytes_per_pixel();
    let expected = (width as usize)
        .saturating_mul(height as usize)
        .saturating_mul(bpp);

    if frame.data.len() < expected {
        bail!(RawError::ShortImageData {
            width,
            height,
            expected,
            actual: frame.data.len(),
        });
    }

    let pixels = frame.data[..expected]
        .chunks_exact(bpp)
        .map(|p| layout.to_argb(p))
        .collect();

    Ok(Image {
        width,
        height,
        pixels,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::structs::frame::FrameFlags;
    use crate::structs::rational::Rational;
    use crate::structs::stream_header::{AudioInfo, VideoInfo};

    fn audio_header(fourcc: &[u8], channels: u64) -> StreamHeader {
        StreamHeader {
            id: 0,
            stream_type: StreamType::Audio,
            fourcc: fourcc.to_vec(),
            time_base_id: 0,
            msb_pts_shift: 7,
            max_pts_distance: 48000,
            decode_delay: 0,
            flags: 0,
            codec_specific_data: Vec::new(),
            video: None,
            audio: Some(AudioInfo {
                sample_rate: Rational::new(48000, 1),
                channels,
            }),
        }
    }

    fn video_header(fourcc: &[u8], width: u64, height: u64) -> StreamHeader {
        StreamHeader {
            id: 1,
            stream_type: StreamType::Video,
            fourcc: fourcc.to_vec(),
            audio: None,
            video: Some(VideoInfo {
                width,
                height,
                sample_width: 0,
                sample_height: 0,
                colorspace_type: 0,
            }),
            ..audio_header(b"ULAW", 1)
        }
    }

    fn frame(header: StreamHeader, data: Vec<u8>) -> Frame {
        Frame {
            stream: Arc::new(header),
            time_base: Rational::new(1, 48000),
            code: 0,
            flags: FrameFlags::KEY,
            pts: 0,
            side_data: None,
            meta_data: None,
            data,
        }
    }

    fn format(fourcc: &[u8], channels: u64) -> Result<AudioFormat> {
        stream_to_audio_format(&audio_header(fourcc, channels))
    }

    #[test]
    fn test_stream_to_audio_format() -> Result<()> {
        let cases: [(&[u8], u64, AudioEncoding, u8, u64, bool); 5] = [
            (b"ALAW", 2, AudioEncoding::ALaw, 8, 2, false),
            (b"ULAW", 3, AudioEncoding::ULaw, 8, 3, false),
            (b"PSD\x08", 4, AudioEncoding::Signed, 8, 4, false),
            (b"\x10DUP", 6, AudioEncoding::Unsigned, 16, 12, true),
            (b"PFD ", 8, AudioEncoding::Float, 32, 32, false),
        ];

        for (fourcc, channels, encoding, bits, frame_size, big_endian) in cases {
            assert_eq!(
                format(fourcc, channels)?,
                AudioFormat {
                    encoding,
                    sample_rate: 48000.0,
                    sample_size_bits: bits,
                    channels,
                    frame_size,
                    frame_rate: 48000.0,
                    big_endian,
                }
            );
        }

        Ok(())
    }

    #[test]
    fn test_unsupported_audio_fourccs() {
        let err = format(b"PSP\x10", 2).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RawError>(),
            Some(RawError::PlanarAudio(_))
        ));

        let err = format(b"PSD\x0C", 2).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RawError>(),
            Some(RawError::UnsupportedSampleSize(12))
        ));

        let err = format(b"PFD\x10", 2).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RawError>(),
            Some(RawError::UnsupportedSampleSize(16))
        ));

        let fourccs: [&[u8]; 3] = [b"MP3 ", b"PXD\x10", b"vo"];
        for fourcc in fourccs {
            let err = format(fourcc, 2).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<RawError>(),
                Some(RawError::UnsupportedAudioFourcc(_))
            ));
        }

        let err = stream_to_audio_format(&video_header(b"RGBA", 1, 1)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RawError>(),
            Some(RawError::WrongStreamType {
                expected: "audio",
                actual: "video",
                ..
            })
        ));
    }

    #[test]
    fn test_g711_expansion() {
        assert_eq!(ulaw_to_linear(0x00), -32124);
        assert_eq!(ulaw_to_linear(0x80), 32124);
        assert_eq!(ulaw_to_linear(0xFF), 0);
        assert_eq!(ulaw_to_linear(0x7F), 0);

        assert_eq!(alaw_to_linear(0xD5), 8);
        assert_eq!(alaw_to_linear(0x55), -8);
        assert_eq!(alaw_to_linear(0xAA), 32256);
        assert_eq!(alaw_to_linear(0x2A), -32256);
    }

    #[test]
    fn test_pcm_samples() -> Result<()> {
        let buffer = to_audio_buffer(frame(audio_header(b"PSD\x10", 2), vec![0x00, 0x80, 0xFF, 0x7F, 0x01]))?;
        assert_eq!(buffer.frames, 1);
        assert_eq!(buffer.samples_f32()?, [-1.0, 32767.0 / 32768.0]);

        let buffer = to_audio_buffer(frame(audio_header(b"\x10DSP", 1), vec![0x80, 0x00, 0x40, 0x00]))?;
        assert_eq!(buffer.samples_f32()?, [-1.0, 0.5]);

        let buffer = to_audio_buffer(frame(audio_header(b"PUD\x08", 1), vec![0x00, 0x80, 0xC0]))?;
        assert_eq!(buffer.samples_f32()?, [-1.0, 0.0, 0.5]);

        let buffer = to_audio_buffer(frame(audio_header(b"PSD\x18", 1), vec![0x00, 0x00, 0xC0]))?;
        assert_eq!(buffer.samples_f32()?, [-0.5]);

        let mut data = 0.25f32.to_le_bytes().to_vec();
        data.extend_from_slice(&(-0.75f32).to_le_bytes());
        let buffer = to_audio_buffer(frame(audio_header(b"PFD ", 2), data))?;
        assert_eq!(buffer.samples_f32()?, [0.25, -0.75]);

        let buffer = to_audio_buffer(frame(audio_header(b"@DFP", 1), 0.125f64.to_be_bytes().to_vec()))?;
        assert_eq!(buffer.samples_f32()?, [0.125]);

        let buffer = to_audio_buffer(frame(audio_header(b"ULAW", 1), vec![0xFF, 0x80]))?;
        assert_eq!(buffer.samples_f32()?, [0.0, 32124.0 / 32768.0]);

        Ok(())
    }

    #[test]
    fn test_g711_ignores_byte_order() -> Result<()> {
        let mut alaw = format(b"ALAW", 1)?;
        alaw.big_endian = true;

        let buffer = AudioBuffer {
            format: alaw,
            data: vec![0xD5, 0xAA],
            frames: 2,
        };
        assert_eq!(buffer.samples_f32()?, [8.0 / 32768.0, 32256.0 / 32768.0]);

        Ok(())
    }

    #[test]
    fn test_to_image() -> Result<()> {
        let image = to_image(&frame(
            video_header(b"RGBA", 2, 1),
            vec![0x10, 0x20, 0x30, 0x40, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE],
        ))?;
        assert_eq!(image.pixels, [0x4010_2030, 0xDDAA_BBCC]);
        assert_eq!(
            image.to_rgba_bytes(),
            [0x10, 0x20, 0x30, 0x40, 0xAA, 0xBB, 0xCC, 0xDD]
        );

        let image = to_image(&frame(video_header(b"BGR\x18", 1, 2), vec![1, 2, 3, 4, 5, 6]))?;
        assert_eq!(image.pixels, [0xFF03_0201, 0xFF06_0504]);

        let image = to_image(&frame(video_header(b"Y1\x00\x08", 2, 1), vec![0x00, 0x7F]))?;
        assert_eq!(image.pixels, [0xFF00_0000, 0xFF7F_7F7F]);

        Ok(())
    }

    #[test]
    fn test_to_image_errors() {
        let err = to_image(&frame(video_header(b"ARGB", 2, 2), vec![0; 15])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RawError>(),
            Some(RawError::ShortImageData {
                expected: 16,
                actual: 15,
                ..
            })
        ));

        let err = to_image(&frame(video_header(b"H264", 2, 2), vec![0; 16])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RawError>(),
            Some(RawError::UnsupportedPixelLayout(_))
        ));

        let err = to_image(&frame(audio_header(b"ULAW", 1), vec![0; 16])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RawError>(),
            Some(RawError::WrongStreamType { .. })
        ));
    }
}
