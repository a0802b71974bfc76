//! CRC validation for NUT packets and frames.
//!
//! NUT protects packet headers, packet bodies and (optionally) frame headers
//! with a 32-bit CRC using the generator polynomial 0x04C11DB7. The checksum
//! is computed MSB first, starts from zero and has no final XOR, so it is
//! *not* the reflected zlib CRC-32.

/// CRC algorithm specification with polynomial and initial value.
pub struct Algorithm<T> {
    poly: T,
    init: T,
}

/// CRC-32 algorithm used by every NUT checksum field.
pub const CRC_NUT_ALG: Algorithm<u32> = Algorithm {
    poly: 0x04C1_1DB7,
    init: 0x0000_0000,
};

/// Computes the CRC-32 of a single byte using the specified polynomial.
#[inline(always)]
pub const fn crc32(poly: u32, value: u8) -> u32 {
    let mut crc = (value as u32) << 24;

    let mut i = 0;
    while i < 8 {
        crc = (crc << 1) ^ (((crc >> 31) & 1) * poly);
        i += 1;
    }

    crc
}

#[inline(always)]
const fn crc32_table(poly: u32) -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < table.len() {
        table[i] = crc32(poly, i as u8);
        i += 1;
    }

    table
}

#[derive(Debug)]
pub struct Crc32 {
    pub poly: u32,
    pub init: u32,
    table: [u32; 256],
}

impl Crc32 {
    pub const fn new(algorithm: &Algorithm<u32>) -> Self {
        Self {
            poly: algorithm.poly,
            init: algorithm.init,
            table: crc32_table(algorithm.poly),
        }
    }

    const fn table_entry(&self, index: u32) -> u32 {
        self.table[(index & 0xFF) as usize]
    }

    #[inline(always)]
    pub const fn update(&self, mut crc: u32, bytes: &[u8]) -> u32 {
        let mut i = 0;

        while i < bytes.len() {
            crc = (crc << 8) ^ self.table_entry((crc >> 24) ^ bytes[i] as u32);
            i += 1;
        }

        crc
    }

    pub const fn checksum(&self, bytes: &[u8]) -> u32 {
        self.update(self.init, bytes)
    }
}

/// Shared table for [`CRC_NUT_ALG`].
pub static NUT_CRC: Crc32 = Crc32::new(&CRC_NUT_ALG);

#[test]
fn test_crc32_check_value() {
    assert_eq!(NUT_CRC.checksum(b"123456789"), 0x89A1_897F);
}

#[test]
fn test_crc32_incremental() {
    let data = b"nut/multimedia container\0";
    let (head, tail) = data.split_at(11);

    let crc = NUT_CRC.update(NUT_CRC.init, head);
    assert_eq!(NUT_CRC.update(crc, tail), NUT_CRC.checksum(data));
}

#[test]
fn test_crc32_empty() {
    assert_eq!(NUT_CRC.checksum(&[]), 0);
}
