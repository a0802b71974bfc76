//! Data structures representing NUT format components.
//!
//! Contains the packet framing, the headers that describe a file and its
//! streams, and the frames that carry stream data.

pub mod frame;
pub mod main_header;
pub mod packet;
pub mod rational;
pub mod startcode;
pub mod stream_header;
