//! Stream headers and per-stream decoding context.

use std::fmt;
use std::io::Read;
use std::sync::Arc;

use anyhow::{Result, bail};
use log::debug;

use crate::structs::main_header::MainHeader;
use crate::structs::packet::PacketHeader;
use crate::structs::rational::Rational;
use crate::utils::data_reader::DataReader;
use crate::utils::errors::StreamHeaderError;

pub const MAX_MSB_PTS_SHIFT: u64 = 16;

pub const STREAM_FLAG_FIXED_FPS: u64 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Video,
    Audio,
    Subtitle,
    UserData,
}

impl StreamType {
    pub fn from_class(class: u64) -> Result<Self> {
        Ok(match class {
            0 => Self::Video,
            1 => Self::Audio,
            2 => Self::Subtitle,
            3 => Self::UserData,
            class => bail!(StreamHeaderError::UnknownStreamClass(class)),
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Subtitle => "subtitle",
            Self::UserData => "user data",
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInfo {
    pub width: u64,
    pub height: u64,
    /// Sample aspect ratio numerator, 0 when unknown.
    pub sample_width: u64,
    /// Sample aspect ratio denominator, 0 when unknown.
    pub sample_height: u64,
    pub colorspace_type: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioInfo {
    pub sample_rate: Rational,
    pub channels: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    pub id: u64,
    pub stream_type: StreamType,
    pub fourcc: Vec<u8>,
    pub time_base_id: u64,
    pub msb_pts_shift: u32,
    pub max_pts_distance: u64,
    pub decode_delay: u64,
    pub flags: u64,
    pub codec_specific_data: Vec<u8>,
    pub video: Option<VideoInfo>,
    pub audio: Option<AudioInfo>,
}

impl StreamHeader {
    pub fn read<R: Read>(
        main: &MainHeader,
        reader: &mut DataReader<R>,
        packet: &PacketHeader,
    ) -> Result<Self> {
        let id = reader.read_var_u64()?;
        if id >= main.stream_count {
            bail!(StreamHeaderError::StreamIdOutOfRange {
                id,
                stream_count: main.stream_count,
            });
        }

        let stream_type = StreamType::from_class(reader.read_var_u64()?)?;

        let fourcc = reader.read_var_bytes(packet.remaining(reader))?;
        if fourcc.len() != 2 && fourcc.len() != 4 {
            bail!(StreamHeaderError::InvalidFourccLength(fourcc.len() as u64));
        }

        let time_base_id = reader.read_var_u64()?;

        let msb_pts_shift = reader.read_var_u64()?;
        if msb_pts_shift >= MAX_MSB_PTS_SHIFT {
            bail!(StreamHeaderError::MsbPtsShiftTooLarge(msb_pts_shift));
        }

        let max_pts_distance = reader.read_var_u64()?;
        let decode_delay = reader.read_var_u64()?;
        let flags = reader.read_var_u64()?;
        let codec_specific_data = reader.read_var_bytes(packet.remaining(reader))?;

        let video = match stream_type {
            StreamType::Video => Some(Self::read_video(reader)?),
            _ => None,
        };
        let audio = match stream_type {
            StreamType::Audio => Some(Self::read_audio(reader)?),
            _ => None,
        };

        Ok(Self {
            id,
            stream_type,
            fourcc,
            time_base_id,
            msb_pts_shift: msb_pts_shift as u32,
            max_pts_distance,
            decode_delay,
            flags,
            codec_specific_data,
            video,
            audio,
        })
    }

    fn read_video<R: Read>(reader: &mut DataReader<R>) -> Result<VideoInfo> {
        let width = reader.read_var_u64()?;
        let height = reader.read_var_u64()?;
        if width == 0 || height == 0 {
            bail!(StreamHeaderError::InvalidVideoDimensions { width, height });
        }

        let sample_width = reader.read_var_u64()?;
        let sample_height = reader.read_var_u64()?;
        if (sample_width == 0) != (sample_height == 0) {
            bail!(StreamHeaderError::InvalidSampleAspect {
                sample_width,
                sample_height,
            });
        }

        Ok(VideoInfo {
            width,
            height,
            sample_width,
            sample_height,
            colorspace_type: reader.read_var_u64()?,
        })
    }

    fn read_audio<R: Read>(reader: &mut DataReader<R>) -> Result<AudioInfo> {
        let num = reader.read_var_u64()?;
        let den = reader.read_var_u64()?;
        if num == 0 || den == 0 || num > i64::MAX as u64 || den > i64::MAX as u64 {
            bail!(StreamHeaderError::InvalidSampleRate { num, den });
        }

        let channels = reader.read_var_u64()?;
        if channels == 0 {
            bail!(StreamHeaderError::InvalidChannelCount(channels));
        }

        Ok(AudioInfo {
            sample_rate: Rational::new(num as i64, den as i64),
            channels,
        })
    }

    /// The fourcc as text, one character per byte.
    pub fn fourcc_str(&self) -> String {
        self.fourcc.iter().map(|&b| b as char).collect()
    }

    pub fn has_fixed_fps(&self) -> bool {
        self.flags & STREAM_FLAG_FIXED_FPS != 0
    }
}

/// A declared stream and the state needed to decode its frames.
#[derive(Debug, Clone)]
pub struct Stream {
    pub header: Arc<StreamHeader>,
    pub time_base: Rational,
    /// Pts of the most recent frame, the base for pts prediction.
    pub last_pts: i64,
}

impl Stream {
    pub fn new(header: StreamHeader, main: &MainHeader) -> Result<Self> {
        let Some(&time_base) = main.time_bases.get(header.time_base_id as usize) else {
            bail!(StreamHeaderError::TimeBaseIdOutOfRange {
                id: header.time_base_id,
                count: main.time_bases.len(),
            });
        };

        debug!(
            "Stream {}: {} {:?}, time base {time_base}, msb_pts_shift {}, max_pts_distance {}",
            header.id,
            header.stream_type,
            header.fourcc_str(),
            header.msb_pts_shift,
            header.max_pts_distance,
        );

        Ok(Self {
            header: Arc::new(header),
            time_base,
            last_pts: 0,
        })
    }

    pub fn id(&self) -> u64 {
        self.header.id
    }

    pub fn record_pts(&mut self, pts: i64) {
        self.last_pts = pts;
    }
}

#[cfg(test)]
fn test_main_header(stream_count: u64) -> MainHeader {
    use crate::structs::main_header::{FRAME_CODE_COUNT, FrameCode};

    MainHeader {
        version: 3,
        minor_version: 0,
        stream_count,
        max_distance: 32768,
        time_bases: vec![Rational::new(1, 8000), Rational::new(1001, 30000)],
        frame_codes: vec![FrameCode::INVALID; FRAME_CODE_COUNT],
        elision: vec![Vec::new()],
        flags: 0,
    }
}

#[cfg(test)]
fn read_stream_header(main: &MainHeader, body: &[u8]) -> Result<StreamHeader> {
    use crate::structs::startcode::{STREAM_STARTCODE, StartCode};
    use crate::utils::test_writer::packet;

    let data = packet(STREAM_STARTCODE, body);
    let mut reader = DataReader::new(&data[8..]);
    let header = PacketHeader::read(StartCode::Stream, &mut reader)?;

    StreamHeader::read(main, &mut reader, &header)
}

#[cfg(test)]
fn stream_body(id: u64, class: u64, fourcc: &[u8], extra: &[u64]) -> Vec<u8> {
    use crate::utils::test_writer::{put_v, put_vb};

    let mut body = Vec::new();
    put_v(&mut body, id);
    put_v(&mut body, class);
    put_vb(&mut body, fourcc);
    [1, 7, 8000, 0, 0].iter().for_each(|&v| put_v(&mut body, v));
    put_vb(&mut body, &[]);
    extra.iter().for_each(|&v| put_v(&mut body, v));
    body
}

#[test]
fn test_audio_stream_header() -> Result<()> {
    let main = test_main_header(2);
    let header = read_stream_header(&main, &stream_body(1, 1, b"ULAW", &[8000, 1, 2]))?;

    assert_eq!(header.id, 1);
    assert_eq!(header.stream_type, StreamType::Audio);
    assert_eq!(header.fourcc_str(), "ULAW");
    assert_eq!(header.msb_pts_shift, 7);
    assert_eq!(header.max_pts_distance, 8000);
    assert_eq!(
        header.audio,
        Some(AudioInfo {
            sample_rate: Rational::new(8000, 1),
            channels: 2,
        })
    );
    assert_eq!(header.video, None);

    let stream = Stream::new(header, &main)?;
    assert_eq!(stream.time_base, Rational::new(1001, 30000));
    assert_eq!(stream.last_pts, 0);

    Ok(())
}

#[test]
fn test_video_stream_header() -> Result<()> {
    let main = test_main_header(1);
    let header = read_stream_header(&main, &stream_body(0, 0, b"RGBA", &[320, 240, 1, 1, 0]))?;

    let video = header.video.unwrap();
    assert_eq!((video.width, video.height), (320, 240));
    assert_eq!((video.sample_width, video.sample_height), (1, 1));

    Ok(())
}

#[test]
fn test_stream_id_out_of_range() {
    let main = test_main_header(2);
    let err = read_stream_header(&main, &stream_body(2, 1, b"ULAW", &[8000, 1, 1])).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<StreamHeaderError>(),
        Some(StreamHeaderError::StreamIdOutOfRange {
            id: 2,
            stream_count: 2
        })
    ));
}

#[test]
fn test_invalid_stream_headers() {
    let main = test_main_header(1);

    let err = read_stream_header(&main, &stream_body(0, 4, b"ULAW", &[])).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StreamHeaderError>(),
        Some(StreamHeaderError::UnknownStreamClass(4))
    ));

    let err = read_stream_header(&main, &stream_body(0, 1, b"ULA", &[])).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StreamHeaderError>(),
        Some(StreamHeaderError::InvalidFourccLength(3))
    ));

    let err = read_stream_header(&main, &stream_body(0, 0, b"RGBA", &[320, 0, 0, 0, 0])).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StreamHeaderError>(),
        Some(StreamHeaderError::InvalidVideoDimensions { .. })
    ));

    let err = read_stream_header(&main, &stream_body(0, 0, b"RGBA", &[320, 240, 1, 0, 0])).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StreamHeaderError>(),
        Some(StreamHeaderError::InvalidSampleAspect { .. })
    ));

    let err = read_stream_header(&main, &stream_body(0, 1, b"ULAW", &[8000, 1, 0])).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StreamHeaderError>(),
        Some(StreamHeaderError::InvalidChannelCount(0))
    ));
}

#[test]
fn test_time_base_id_out_of_range() -> Result<()> {
    let main = test_main_header(1);
    let mut header = read_stream_header(&main, &stream_body(0, 1, b"ULAW", &[8000, 1, 1]))?;
    header.time_base_id = 2;

    let err = Stream::new(header, &main).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StreamHeaderError>(),
        Some(StreamHeaderError::TimeBaseIdOutOfRange { id: 2, count: 2 })
    ));

    Ok(())
}
