use std::io::{self, Write};

use nut::process::raw::Image;

/// Writes `image` as a Netpbm PAM file with the RGB_ALPHA tuple type.
pub fn write_pam<W: Write>(writer: &mut W, image: &Image) -> io::Result<()> {
    write!(
        writer,
        "P7\nWIDTH {}\nHEIGHT {}\nDEPTH 4\nMAXVAL 255\nTUPLTYPE RGB_ALPHA\nENDHDR\n",
        image.width, image.height
    )?;
    writer.write_all(&image.to_rgba_bytes())?;

    Ok(())
}

#[test]
fn test_write_pam() -> io::Result<()> {
    let image = Image {
        width: 2,
        height: 1,
        pixels: vec![0xFF10_2030, 0x8040_5060],
    };

    let mut buffer = Vec::new();
    write_pam(&mut buffer, &image)?;

    let header = b"P7\nWIDTH 2\nHEIGHT 1\nDEPTH 4\nMAXVAL 255\nTUPLTYPE RGB_ALPHA\nENDHDR\n";
    assert_eq!(&buffer[..header.len()], header);
    assert_eq!(
        &buffer[header.len()..],
        [0x10, 0x20, 0x30, 0xFF, 0x40, 0x50, 0x60, 0x80]
    );

    Ok(())
}
