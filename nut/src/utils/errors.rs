#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err);
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

#[derive(thiserror::Error, Debug)]
pub enum PacketError {
    #[error("Invalid file id: read {0:02X?}")]
    InvalidFileId(Vec<u8>),

    #[error("Unknown startcode {0:#018X}")]
    UnknownStartCode(u64),

    #[error("forward_ptr must be at least 4 bytes. Read {0}")]
    ForwardPointerTooSmall(u64),

    #[error("Header checksum mismatch at offset {offset}: read {expected:#010X}, calculated {calculated:#010X}")]
    HeaderChecksumMismatch {
        offset: u64,
        expected: u32,
        calculated: u32,
    },

    #[error("{packet} footer checksum mismatch: read {expected:#010X}, calculated {calculated:#010X}")]
    FooterChecksumMismatch {
        packet: &'static str,
        expected: u32,
        calculated: u32,
    },

    #[error("Cannot seek backward from offset {offset} to {target}")]
    BackwardSeek { offset: u64, target: u64 },

    #[error("Variable length integer exceeds {0} bits")]
    VarIntOverflow(u32),

    #[error("Byte array length {length} exceeds the {limit} bytes left in the packet")]
    ByteArrayTooLong { length: u64, limit: u64 },
}

#[derive(thiserror::Error, Debug)]
pub enum MainHeaderError {
    #[error("Unsupported NUT version {0}, expected 2 to 4")]
    UnsupportedVersion(u64),

    #[error("stream_count must be less than 250. Read {0}")]
    StreamCountTooLarge(u64),

    #[error("time_base_count must be positive and fit in the header. Read {0}")]
    InvalidTimeBaseCount(u64),

    #[error("time_base[{index}] = {num}/{den} is invalid")]
    InvalidTimeBase { index: usize, num: u64, den: u64 },

    #[error("Frame code count {count} at slot {index} does not fit in the table")]
    InvalidSlotCount { index: usize, count: u64 },

    #[error("size_mul must be less than 16384. Read {0}")]
    SizeMultiplierTooLarge(u64),

    #[error("reserved_count must be less than 256. Read {0}")]
    ReservedCountTooLarge(u64),

    #[error("size_lsb of frame code {index} must be less than 16384. Computed {size_lsb}")]
    SizeLsbTooLarge { index: usize, size_lsb: u64 },

    #[error("header_idx must be less than 128. Read {0}")]
    HeaderIndexTooLarge(u64),

    #[error("stream_id {stream_id} of frame code {index} exceeds stream_count {stream_count}")]
    StreamIdOutOfRange {
        index: usize,
        stream_id: u64,
        stream_count: u64,
    },

    #[error("Elision header count must be less than 128. Read {0}")]
    ElisionCountTooLarge(u64),

    #[error("Elision header {index} length must be between 1 and 255. Read {length}")]
    ElisionLengthInvalid { index: usize, length: u64 },

    #[error("Elision header {index} of {length} bytes exceeds the remaining budget of {remaining} bytes")]
    ElisionBudgetExceeded {
        index: usize,
        length: usize,
        remaining: usize,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum StreamHeaderError {
    #[error("{0} header found before the main header")]
    MissingMainHeader(&'static str),

    #[error("stream_id {id} exceeds stream_count {stream_count}")]
    StreamIdOutOfRange { id: u64, stream_count: u64 },

    #[error("Unknown stream_class {0}")]
    UnknownStreamClass(u64),

    #[error("fourcc must be 2 or 4 bytes long. Read {0} bytes")]
    InvalidFourccLength(u64),

    #[error("time_base_id {id} exceeds time_base_count {count}")]
    TimeBaseIdOutOfRange { id: u64, count: usize },

    #[error("msb_pts_shift must be less than 16. Read {0}")]
    MsbPtsShiftTooLarge(u64),

    #[error("Video dimensions must be non-zero. Read {width}x{height}")]
    InvalidVideoDimensions { width: u64, height: u64 },

    #[error("sample_width and sample_height must both be zero or both non-zero. Read {sample_width}:{sample_height}")]
    InvalidSampleAspect { sample_width: u64, sample_height: u64 },

    #[error("samplerate must be positive. Read {num}/{den}")]
    InvalidSampleRate { num: u64, den: u64 },

    #[error("channel_count must be positive. Read {0}")]
    InvalidChannelCount(u64),
}

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("Frame code 0x4E ('N') is reserved for startcodes")]
    ReservedFrameCode,

    #[error("Frame code {0:#04X} is marked invalid")]
    InvalidFrameCode(u8),

    #[error("stream_id {stream_id} exceeds stream_count {stream_count}")]
    StreamIdOutOfRange { stream_id: u64, stream_count: u64 },

    #[error("Frame for undeclared stream {0}")]
    UndeclaredStream(u64),

    #[error("header_idx {header_idx} exceeds elision header count {count}")]
    HeaderIndexOutOfRange { header_idx: u64, count: usize },

    #[error("Frame checksum mismatch: read {expected:#010X}, calculated {calculated:#010X}")]
    ChecksumMismatch { expected: u32, calculated: u32 },

    #[error("Frame of {size} bytes at pts {pts} requires a checksum")]
    MissingChecksum { size: u64, pts: i64 },

    #[error("Timestamp overflow: last_pts = {last_pts}, coded = {coded}")]
    PtsOverflow { last_pts: i64, coded: u64 },

    #[error("Side and meta data require NUT version 4. Read version {0}")]
    SideDataUnsupported(u64),

    #[error("Frame size {size} is smaller than the {elision} elided header bytes")]
    SizeSmallerThanElision { size: u64, elision: usize },

    #[error("Side and meta data consumed {consumed} bytes but only {available} were available")]
    MetadataOverrun { consumed: u64, available: u64 },

    #[error("Metadata entry {0:?} is not valid UTF-8")]
    InvalidMetadataString(String),
}

#[derive(thiserror::Error, Debug)]
pub enum RawError {
    #[error("Stream {id} is {actual}, expected {expected}")]
    WrongStreamType {
        id: u64,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Unsupported raw audio fourcc {0:?}")]
    UnsupportedAudioFourcc(String),

    #[error("Planar audio fourcc {0:?} is not supported")]
    PlanarAudio(String),

    #[error("Unsupported audio sample size of {0} bits")]
    UnsupportedSampleSize(u8),

    #[error("Unsupported raw video fourcc {0:?}")]
    UnsupportedPixelLayout(String),

    #[error("Image of {width}x{height} needs {expected} bytes but frame has {actual}")]
    ShortImageData {
        width: u64,
        height: u64,
        expected: usize,
        actual: usize,
    },
}
