#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! Demuxer for the NUT multimedia container.
//!
//! ### File Organization
//!
//! A file starts with the identification string `nut/multimedia container\0`,
//! followed by a sequence of packets and frames:
//!
//! - **Packets** open with a 64-bit startcode, carry a forward pointer to the
//!   next packet and end with a CRC-32 footer. Main and stream headers,
//!   syncpoints, index and info packets are all framed this way.
//! - **Frames** open with a single frame code byte that selects an entry of
//!   the main header's frame code table. Most frame header fields are implied
//!   by that entry.
//!
//! ### Timestamps
//!
//! Frame timestamps are usually coded as their low bits only and
//! reconstructed relative to the previous frame of the same stream.
//! Syncpoint, index and info packets are framed and checksummed, but their
//! bodies are skipped.
//!
//! ## Quick Start
//!
//! 1. Wrap any [`std::io::Read`] in a [`process::demux::NutReader`]
//! 2. Pull [`process::demux::Event`]s, or drive a [`process::demux::NutListener`]
//! 3. Convert raw payloads with [`process::raw`]
//!
//! ```rust,no_run
//! use nut::process::demux::{Event, NutReader};
//! use nut::process::raw::to_audio_buffer;
//! use nut::process::EXAMPLE_DATA;
//!
//! let reader = NutReader::new(EXAMPLE_DATA);
//!
//! for event in reader {
//!     match event? {
//!         Event::Stream(stream) => {
//!             println!("Stream {}: {} {}", stream.id(), stream.header.stream_type, stream.header.fourcc_str());
//!         }
//!         Event::Frame(frame) => {
//!             let audio = to_audio_buffer(frame)?;
//!             let samples = audio.samples_f32()?;
//!         }
//!         Event::SyncPoint(_) => {}
//!     }
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

/// Version of this library, as released.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Demultiplexing and payload conversion.
///
/// 1. **Demuxing** ([`process::demux`]): Walks packets and frames, keeping the
///    per-stream state needed for timestamp prediction.
///
/// 2. **Raw Payloads** ([`process::raw`]): Converts uncompressed audio and
///    video frames to samples and images.
pub mod process;

/// Data structures representing NUT format components.
///
/// - **Startcodes** ([`structs::startcode`]): Packet identification
/// - **Packets** ([`structs::packet`]): Forward pointers and checksums
/// - **Main Header** ([`structs::main_header`]): Time bases and frame code table
/// - **Stream Headers** ([`structs::stream_header`]): Codec and timing parameters
/// - **Frames** ([`structs::frame`]): Frame headers, metadata and payload
/// - **Rationals** ([`structs::rational`]): Time base arithmetic
pub mod structs;

/// Utility functions and supporting infrastructure.
///
/// - **Data Reader** ([`utils::data_reader`]): Variable length integers with running checksum
/// - **CRC Validation** ([`utils::crc`]): Error detection
/// - **Error Handling** ([`utils::errors`]): Error types
pub mod utils;
