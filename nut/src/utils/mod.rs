//! Utility functions and supporting infrastructure.
//!
//! Provides the checksumming byte reader, CRC validation and error handling
//! shared by every packet parser.

pub mod crc;
pub mod data_reader;
pub mod errors;

#[cfg(test)]
pub(crate) mod test_writer;
