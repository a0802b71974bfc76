/// Packet and frame demultiplexing.
///
/// Provides the [`NutReader`](demux::NutReader) for walking a NUT file and
/// producing [`Event`](demux::Event) values, or driving a
/// [`NutListener`](demux::NutListener).
pub mod demux;

/// Raw audio and video payload interpretation.
///
/// Maps stream fourccs to [`AudioFormat`](raw::AudioFormat) and
/// [`PixelLayout`](raw::PixelLayout) descriptions and converts frame payloads
/// to samples and images.
pub mod raw;

/// A single-stream file: 8 kHz mono u-law audio with one 16 byte frame at
/// pts 1.
pub const EXAMPLE_DATA: &[u8] = &[
    0x6E, 0x75, 0x74, 0x2F, 0x6D, 0x75, 0x6C, 0x74, 0x69, 0x6D, 0x65, 0x64, 0x69, 0x61, 0x20, 0x63,
    0x6F, 0x6E, 0x74, 0x61, 0x69, 0x6E, 0x65, 0x72, 0x00, 0x4E, 0x4D, 0x7A, 0x56, 0x1F, 0x5F, 0x04,
    0xAD, 0x1C, 0x03, 0x01, 0x82, 0x80, 0x00, 0x01, 0x01, 0xBE, 0x40, 0x01, 0x06, 0x01, 0x01, 0x00,
    0x10, 0x00, 0x01, 0x28, 0x04, 0x00, 0x81, 0x7E, 0x00, 0x00, 0x8A, 0x6A, 0x8C, 0x5C, 0x4E, 0x53,
    0x11, 0x40, 0x5B, 0xF2, 0xF9, 0xDB, 0x16, 0x00, 0x01, 0x04, 0x55, 0x4C, 0x41, 0x57, 0x00, 0x07,
    0xBE, 0x40, 0x00, 0x00, 0x00, 0xBE, 0x40, 0x01, 0x01, 0x05, 0x86, 0xC8, 0x38, 0x00, 0x00, 0x01,
    0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F,
];
