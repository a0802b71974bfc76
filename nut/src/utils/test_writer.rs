//! Helpers for assembling NUT fixtures in tests.

use crate::utils::crc::NUT_CRC;

pub fn put_v(buf: &mut Vec<u8>, value: u64) {
    let mut groups = 1;
    while groups < 10 && value >> (7 * groups) != 0 {
        groups += 1;
    }

    for i in (0..groups).rev() {
        let byte = ((value >> (7 * i)) & 0x7F) as u8;
        buf.push(if i > 0 { byte | 0x80 } else { byte });
    }
}

pub fn put_s(buf: &mut Vec<u8>, value: i64) {
    let value = value as i128;
    let coded = if value > 0 { 2 * value - 1 } else { -2 * value };
    put_v(buf, coded as u64);
}

pub fn put_vb(buf: &mut Vec<u8>, data: &[u8]) {
    put_v(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// Wraps `body` in a packet with a valid footer (and header checksum when
/// the forward pointer exceeds 4096).
pub fn packet(startcode: u64, body: &[u8]) -> Vec<u8> {
    packet_with_footer(startcode, body, NUT_CRC.checksum(body))
}

pub fn packet_with_footer(startcode: u64, body: &[u8], footer: u32) -> Vec<u8> {
    let mut out = startcode.to_be_bytes().to_vec();
    let forward_ptr = body.len() as u64 + 4;
    put_v(&mut out, forward_ptr);

    if forward_ptr > 4096 {
        let header_checksum = NUT_CRC.checksum(&out);
        out.extend_from_slice(&header_checksum.to_be_bytes());
    }

    out.extend_from_slice(body);
    out.extend_from_slice(&footer.to_be_bytes());
    out
}
