use std::io::Read;

use anyhow::{Result, bail};
use log::{debug, trace};

use crate::structs::frame::Frame;
use crate::structs::main_header::MainHeader;
use crate::structs::packet::{PacketFooter, PacketHeader, skip_packet};
use crate::structs::startcode::{Code, FILE_ID, StartCode};
use crate::structs::stream_header::{Stream, StreamHeader};
use crate::utils::data_reader::DataReader;
use crate::utils::errors::{PacketError, StreamHeaderError};

/// Mutable state of one demuxing session.
#[derive(Debug)]
pub struct DemuxerState {
    pub fail_level: log::Level,
    pub main_header: Option<MainHeader>,
    /// Declared streams, indexed by stream id.
    pub streams: Vec<Option<Stream>>,
}

impl Default for DemuxerState {
    fn default() -> Self {
        Self {
            fail_level: log::Level::Error,
            main_header: None,
            streams: Vec::new(),
        }
    }
}

impl DemuxerState {
    pub fn stream(&self, id: u64) -> Option<&Stream> {
        self.streams.get(id as usize)?.as_ref()
    }

    fn stream_mut(&mut self, id: u64) -> Option<&mut Stream> {
        self.streams.get_mut(id as usize)?.as_mut()
    }

    pub fn record_pts(&mut self, id: u64, pts: i64) {
        if let Some(stream) = self.stream_mut(id) {
            stream.record_pts(pts);
        }
    }
}

/// Something decoded from the input, in file order.
#[derive(Debug, Clone)]
pub enum Event {
    Stream(Stream),
    Frame(Frame),
    /// A syncpoint packet. Its body is skipped, only the framing is kept.
    SyncPoint(PacketHeader),
}

/// Receives demuxed streams and frames.
pub trait NutListener {
    /// Called once per stream, when its first header is read.
    fn stream(&mut self, stream: &Stream) -> Result<()>;

    fn frame(&mut self, frame: Frame) -> Result<()>;

    fn sync_point(&mut self, _header: &PacketHeader) -> Result<()> {
        Ok(())
    }
}

/// Demuxes a NUT file from any byte source.
///
/// # Example
///
/// ```rust,no_run
/// use nut::process::EXAMPLE_DATA;
/// use nut::process::demux::{Event, NutReader};
///
/// let mut reader = NutReader::new(EXAMPLE_DATA);
///
/// while let Some(event) = reader.next_event()? {
///     match event {
///         Event::Stream(stream) => println!("Stream {}: {}", stream.id(), stream.header.fourcc_str()),
///         Event::Frame(frame) => println!("{frame}"),
///         Event::SyncPoint(_) => {}
///     }
/// }
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct NutReader<R> {
    reader: DataReader<R>,
    state: DemuxerState,
    file_id_read: bool,
    finished: bool,
}

impl<R: Read> NutReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: DataReader::new(inner),
            state: DemuxerState::default(),
            file_id_read: false,
            finished: false,
        }
    }

    /// Sets the failure level for validation errors.
    ///
    /// - `log::Level::Error`: Only fail on Error level messages (default)
    /// - `log::Level::Warn`: Fail on Warning level and above (strict mode)
    pub fn set_fail_level(&mut self, level: log::Level) {
        self.state.fail_level = level;
    }

    pub fn main_header(&self) -> Option<&MainHeader> {
        self.state.main_header.as_ref()
    }

    /// Streams declared so far, in id order.
    pub fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.state.streams.iter().flatten()
    }

    /// Bytes consumed from the input.
    pub fn offset(&self) -> u64 {
        self.reader.offset()
    }

    /// Reads packets until the next stream, frame or syncpoint.
    ///
    /// Returns `None` once the input ends at a packet boundary.
    pub fn next_event(&mut self) -> Result<Option<Event>> {
        if !self.file_id_read {
            self.read_file_id()?;
            self.file_id_read = true;
        }

        loop {
            self.reader.reset_crc();

            let Some(value) = self.reader.read_start_code()? else {
                debug!("End of input at offset {}", self.reader.offset());
                return Ok(None);
            };

            match Code::classify(value)? {
                Code::Frame(code) => {
                    let frame = Frame::read(&self.state, &mut self.reader, code)?;
                    self.state.record_pts(frame.stream_id(), frame.pts);

                    return Ok(Some(Event::Frame(frame)));
                }
                Code::Packet(startcode) => {
                    if let Some(event) = self.read_packet(startcode)? {
                        return Ok(Some(event));
                    }
                }
            }
        }
    }

    /// Demuxes the whole input, handing every stream and frame to `listener`.
    pub fn read(&mut self, listener: &mut impl NutListener) -> Result<()> {
        while let Some(event) = self.next_event()? {
            match event {
                Event::Stream(stream) => listener.stream(&stream)?,
                Event::Frame(frame) => listener.frame(frame)?,
                Event::SyncPoint(header) => listener.sync_point(&header)?,
            }
        }

        Ok(())
    }

    fn read_file_id(&mut self) -> Result<()> {
        let file_id = self.reader.read_bytes(FILE_ID.len() as u64)?;
        if file_id != FILE_ID {
            bail!(PacketError::InvalidFileId(file_id));
        }

        Ok(())
    }

    fn read_packet(&mut self, startcode: StartCode) -> Result<Option<Event>> {
        match startcode {
            StartCode::Main => {
                self.read_main_header()?;
                Ok(None)
            }
            StartCode::Stream => self.read_stream_header(),
            StartCode::SyncPoint | StartCode::Index | StartCode::Info => {
                let header = skip_packet(&self.state, &mut self.reader, startcode)?;
                trace!("Skipped {startcode} packet of {} bytes", header.forward_ptr);

                Ok((startcode == StartCode::SyncPoint).then_some(Event::SyncPoint(header)))
            }
        }
    }

    fn read_main_header(&mut self) -> Result<()> {
        let header = PacketHeader::read(StartCode::Main, &mut self.reader)?;

        if self.state.main_header.is_some() {
            trace!("Skipping repeated main header");
        } else {
            let main = MainHeader::read(&mut self.reader, &header)?;
            self.state.streams = vec![None; main.stream_count as usize];
            self.state.main_header = Some(main);
        }

        PacketFooter::read(&self.state, &mut self.reader, &header)?;

        Ok(())
    }

    fn read_stream_header(&mut self) -> Result<Option<Event>> {
        let header = PacketHeader::read(StartCode::Stream, &mut self.reader)?;

        let Some(main) = &self.state.main_header else {
            bail!(StreamHeaderError::MissingMainHeader("Stream"));
        };

        let stream_header = StreamHeader::read(main, &mut self.reader, &header)?;
        let id = stream_header.id;

        let event = if self.state.stream(id).is_some() {
            trace!("Skipping repeated header of stream {id}");
            None
        } else {
            let stream = Stream::new(stream_header, main)?;
            self.state.streams[id as usize] = Some(stream.clone());
            Some(Event::Stream(stream))
        };

        PacketFooter::read(&self.state, &mut self.reader, &header)?;

        Ok(event)
    }
}

impl<R: Read> Iterator for NutReader<R> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.next_event() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::process::EXAMPLE_DATA;
    use crate::structs::frame::FrameFlags;
    use crate::structs::rational::Rational;
    use crate::structs::startcode::{
        INDEX_STARTCODE, INFO_STARTCODE, MAIN_STARTCODE, STREAM_STARTCODE, SYNCPOINT_STARTCODE,
    };
    use crate::structs::stream_header::StreamType;
    use crate::utils::errors::{FrameError, MainHeaderError};
    use crate::utils::test_writer::{packet, packet_with_footer, put_s, put_v, put_vb};

    /// Frame codes used by the synthetic files below:
    ///
    /// - 0: stream id, coded pts and size coded explicitly
    /// - 1: keyframe of stream 0, pts + 1, 4 bytes
    /// - 2..: invalid
    fn main_body(stream_count: u64) -> Vec<u8> {
        let mut body = Vec::new();
        put_v(&mut body, 3);
        put_v(&mut body, stream_count);
        put_v(&mut body, 32768);
        put_v(&mut body, 2);
        [1, 1000, 1, 8000].iter().for_each(|&v| put_v(&mut body, v));

        let flags = FrameFlags::STREAM_ID | FrameFlags::CODED_PTS | FrameFlags::SIZE_MSB;
        let runs: [(u64, i64, u64); 3] = [
            (flags.bits(), 0, 1),
            (FrameFlags::KEY.bits(), 1, 1),
            (FrameFlags::INVALID.bits(), 0, 253),
        ];

        for (flags, pts, count) in runs {
            put_v(&mut body, flags);
            put_v(&mut body, 6);
            put_s(&mut body, pts);
            put_v(&mut body, 1); // mul
            put_v(&mut body, 0); // stream
            put_v(&mut body, if count == 1 && pts == 1 { 4 } else { 0 }); // size
            put_v(&mut body, 0); // reserved
            put_v(&mut body, count);
        }

        body
    }

    fn stream_body(id: u64, time_base_id: u64) -> Vec<u8> {
        let mut body = Vec::new();
        put_v(&mut body, id);
        put_v(&mut body, 1);
        put_vb(&mut body, b"ULAW");
        [time_base_id, 7, 8000, 0, 0].iter().for_each(|&v| put_v(&mut body, v));
        put_vb(&mut body, &[]);
        [8000, 1, 1].iter().for_each(|&v| put_v(&mut body, v));
        body
    }

    fn coded_frame(stream_id: u64, pts: u64, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x00];
        put_v(&mut frame, stream_id);
        put_v(&mut frame, pts + (1 << 7));
        put_v(&mut frame, payload.len() as u64);
        frame.extend_from_slice(payload);
        frame
    }

    fn file(parts: &[Vec<u8>]) -> Vec<u8> {
        let mut data = FILE_ID.to_vec();
        parts.iter().for_each(|part| data.extend_from_slice(part));
        data
    }

    fn collect(data: &[u8]) -> Result<Vec<Event>> {
        NutReader::new(data).collect()
    }

    #[derive(Default)]
    struct Recorder {
        streams: Vec<u64>,
        frames: Vec<(u64, i64, Vec<u8>)>,
        sync_points: usize,
    }

    impl NutListener for Recorder {
        fn stream(&mut self, stream: &Stream) -> Result<()> {
            self.streams.push(stream.id());
            Ok(())
        }

        fn frame(&mut self, frame: Frame) -> Result<()> {
            self.frames.push((frame.stream_id(), frame.pts, frame.data));
            Ok(())
        }

        fn sync_point(&mut self, _header: &PacketHeader) -> Result<()> {
            self.sync_points += 1;
            Ok(())
        }
    }

    #[test]
    fn test_example_data() -> Result<()> {
        let events = collect(EXAMPLE_DATA)?;
        assert_eq!(events.len(), 2);

        let Event::Stream(stream) = &events[0] else {
            panic!("expected a stream, got {:?}", events[0]);
        };
        assert_eq!(stream.id(), 0);
        assert_eq!(stream.header.stream_type, StreamType::Audio);
        assert_eq!(stream.header.fourcc, b"ULAW");
        assert_eq!(stream.time_base, Rational::new(1, 8000));
        let audio = stream.header.audio.unwrap();
        assert_eq!(audio.sample_rate, Rational::new(8000, 1));
        assert_eq!(audio.channels, 1);

        let Event::Frame(frame) = &events[1] else {
            panic!("expected a frame, got {:?}", events[1]);
        };
        assert_eq!(frame.stream_id(), 0);
        assert_eq!(frame.pts, 1);
        assert!(frame.is_keyframe());
        assert_eq!(frame.data, (0..16).collect::<Vec<u8>>());

        Ok(())
    }

    #[test]
    fn test_example_data_main_header() -> Result<()> {
        let mut reader = NutReader::new(EXAMPLE_DATA);
        reader.next_event()?;

        let main = reader.main_header().unwrap();
        assert_eq!(main.version, 3);
        assert_eq!(main.stream_count, 1);
        assert_eq!(main.max_distance, 32768);
        assert_eq!(main.frame_codes.len(), 256);
        assert_eq!(main.elision, vec![Vec::<u8>::new()]);

        let invalid: Vec<usize> = (0..256)
            .filter(|&i| !main.frame_codes[i].is_valid())
            .collect();
        assert_eq!(invalid, [0x4E]);

        assert_eq!(main.frame_codes[0].size_lsb, 16);
        assert_eq!(main.frame_codes[1].size_mul, 254);
        assert_eq!(main.frame_codes[0x4D].size_lsb, 0x4C);
        assert_eq!(main.frame_codes[0x4F].size_lsb, 0x4D);
        assert_eq!(main.frame_codes[255].size_lsb, 253);

        Ok(())
    }

    #[test]
    fn test_listener() -> Result<()> {
        let data = file(&[
            packet(MAIN_STARTCODE, &main_body(2)),
            packet(STREAM_STARTCODE, &stream_body(0, 1)),
            packet(STREAM_STARTCODE, &stream_body(1, 0)),
            coded_frame(1, 40, &[1, 2]),
            vec![0x01, 9, 9, 9, 9],
            coded_frame(0, 130, &[3]),
            vec![0x01, 8, 8, 8, 8],
        ]);

        let mut recorder = Recorder::default();
        NutReader::new(&data[..]).read(&mut recorder)?;

        assert_eq!(recorder.streams, [0, 1]);
        assert_eq!(
            recorder.frames,
            [
                (1, 40, vec![1, 2]),
                (0, 1, vec![9, 9, 9, 9]),
                (0, 130, vec![3]),
                (0, 131, vec![8, 8, 8, 8]),
            ]
        );

        Ok(())
    }

    #[test]
    fn test_footer_mismatch_tolerated() -> Result<()> {
        let data = file(&[
            packet_with_footer(MAIN_STARTCODE, &main_body(1), 0),
            packet_with_footer(STREAM_STARTCODE, &stream_body(0, 0), 0),
            vec![0x01, 1, 2, 3, 4],
        ]);

        let events = collect(&data)?;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], Event::Frame(frame) if frame.data == [1, 2, 3, 4]));

        let mut reader = NutReader::new(&data[..]);
        reader.set_fail_level(log::Level::Warn);
        let err = reader.next_event().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PacketError>(),
            Some(PacketError::FooterChecksumMismatch { packet: "Main", .. })
        ));

        Ok(())
    }

    #[test]
    fn test_header_checksum_mismatch_aborts() {
        let mut large = packet(INFO_STARTCODE, &vec![0; 5000]);
        large[10] ^= 0x80;

        let data = file(&[
            packet(MAIN_STARTCODE, &main_body(1)),
            packet(STREAM_STARTCODE, &stream_body(0, 0)),
            large,
            vec![0x01, 1, 2, 3, 4],
        ]);

        let mut reader = NutReader::new(&data[..]);
        assert!(matches!(reader.next(), Some(Ok(Event::Stream(_)))));

        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PacketError>(),
            Some(PacketError::HeaderChecksumMismatch { .. })
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_stream_id_out_of_range() {
        let data = file(&[
            packet(MAIN_STARTCODE, &main_body(2)),
            packet(STREAM_STARTCODE, &stream_body(2, 0)),
        ]);

        let err = collect(&data).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StreamHeaderError>(),
            Some(StreamHeaderError::StreamIdOutOfRange {
                id: 2,
                stream_count: 2
            })
        ));
    }

    #[test]
    fn test_invalid_file_id() {
        let mut data = file(&[packet(MAIN_STARTCODE, &main_body(1))]);
        data[0] = b'M';

        let err = collect(&data).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PacketError>(),
            Some(PacketError::InvalidFileId(_))
        ));

        assert!(collect(b"nut/multi").is_err());
    }

    #[test]
    fn test_empty_file() -> Result<()> {
        assert!(collect(FILE_ID)?.is_empty());

        Ok(())
    }

    #[test]
    fn test_truncated_packet() {
        let data = file(&[packet(MAIN_STARTCODE, &main_body(1))]);
        let err = collect(&data[..data.len() - 2]).unwrap_err();

        let io_err = err.downcast_ref::<io::Error>().unwrap();
        assert_eq!(io_err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_truncated_frame() {
        let data = file(&[
            packet(MAIN_STARTCODE, &main_body(1)),
            packet(STREAM_STARTCODE, &stream_body(0, 0)),
            vec![0x01, 1, 2],
        ]);

        let mut reader = NutReader::new(&data[..]);
        assert!(matches!(reader.next(), Some(Ok(Event::Stream(_)))));
        assert!(matches!(reader.next(), Some(Err(_))));
    }

    #[test]
    fn test_headers_out_of_order() {
        let data = file(&[packet(STREAM_STARTCODE, &stream_body(0, 0))]);
        let err = collect(&data).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StreamHeaderError>(),
            Some(StreamHeaderError::MissingMainHeader("Stream"))
        ));

        let data = file(&[vec![0x01, 1, 2, 3, 4]]);
        let err = collect(&data).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StreamHeaderError>(),
            Some(StreamHeaderError::MissingMainHeader("Frame"))
        ));

        let data = file(&[
            packet(MAIN_STARTCODE, &main_body(2)),
            packet(STREAM_STARTCODE, &stream_body(0, 0)),
            coded_frame(1, 0, &[1]),
        ]);
        let err = collect(&data).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FrameError>(),
            Some(FrameError::UndeclaredStream(1))
        ));
    }

    #[test]
    fn test_unknown_startcode() {
        let data = file(&[
            packet(MAIN_STARTCODE, &main_body(1)),
            0x4E12_3456_789A_BCDEu64.to_be_bytes().to_vec(),
        ]);

        let err = collect(&data).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PacketError>(),
            Some(PacketError::UnknownStartCode(0x4E12_3456_789A_BCDE))
        ));
    }

    #[test]
    fn test_repeated_headers_and_opaque_packets() -> Result<()> {
        let data = file(&[
            packet(MAIN_STARTCODE, &main_body(1)),
            packet(STREAM_STARTCODE, &stream_body(0, 0)),
            packet(INFO_STARTCODE, b"opaque info"),
            vec![0x01, 1, 1, 1, 1],
            packet(MAIN_STARTCODE, &main_body(1)),
            packet(STREAM_STARTCODE, &stream_body(0, 0)),
            packet(INDEX_STARTCODE, &[0xFF; 32]),
            vec![0x01, 2, 2, 2, 2],
        ]);

        let events = collect(&data)?;
        let kinds: Vec<&str> = events
            .iter()
            .map(|event| match event {
                Event::Stream(_) => "stream",
                Event::Frame(_) => "frame",
                Event::SyncPoint(_) => "syncpoint",
            })
            .collect();
        assert_eq!(kinds, ["stream", "frame", "frame"]);

        // Repeated headers keep the pts prediction running
        let Event::Frame(frame) = &events[2] else {
            unreachable!()
        };
        assert_eq!(frame.pts, 2);

        Ok(())
    }

    #[test]
    fn test_sync_points_skipped() -> Result<()> {
        let mut body = Vec::new();
        put_v(&mut body, 500);
        put_v(&mut body, 0);

        let data = file(&[
            packet(MAIN_STARTCODE, &main_body(1)),
            packet(STREAM_STARTCODE, &stream_body(0, 0)),
            vec![0x01, 1, 1, 1, 1],
            packet(SYNCPOINT_STARTCODE, &body),
            vec![0x01, 2, 2, 2, 2],
            packet(SYNCPOINT_STARTCODE, &[]),
            vec![0x01, 3, 3, 3, 3],
        ]);

        let mut recorder = Recorder::default();
        let mut reader = NutReader::new(&data[..]);
        reader.read(&mut recorder)?;

        // Syncpoint bodies leave pts prediction alone
        assert_eq!(recorder.sync_points, 2);
        assert_eq!(
            recorder.frames,
            [
                (0, 1, vec![1, 1, 1, 1]),
                (0, 2, vec![2, 2, 2, 2]),
                (0, 3, vec![3, 3, 3, 3]),
            ]
        );

        let last_pts: Vec<i64> = reader.streams().map(|s| s.last_pts).collect();
        assert_eq!(last_pts, [3]);

        let events = collect(&data)?;
        let Event::SyncPoint(header) = &events[2] else {
            panic!("expected a syncpoint, got {:?}", events[2]);
        };
        assert_eq!(header.startcode, StartCode::SyncPoint);
        assert_eq!(header.forward_ptr, 4 + body.len() as u64);

        Ok(())
    }

    #[test]
    fn test_listener_error_stops_demuxing() {
        struct Failing;

        impl NutListener for Failing {
            fn stream(&mut self, _stream: &Stream) -> Result<()> {
                bail!("no streams wanted")
            }

            fn frame(&mut self, _frame: Frame) -> Result<()> {
                Ok(())
            }
        }

        let err = NutReader::new(EXAMPLE_DATA).read(&mut Failing).unwrap_err();
        assert_eq!(err.to_string(), "no streams wanted");
    }

    #[test]
    fn test_bad_main_header() {
        let mut body = main_body(1);
        body[0] = 5;

        let err = collect(&file(&[packet(MAIN_STARTCODE, &body)])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MainHeaderError>(),
            Some(MainHeaderError::UnsupportedVersion(5))
        ));
    }
}
