use crate::rom::RomError;

const LZ77_MAGIC: u8 = 0x10;
pub const MAX_DECOMPRESSED_SIZE: usize = 0x10_0000;

/// Decompresses a BIOS-style LZ77 (type 0x10) stream starting at `offset`.
///
/// Header: magic byte then a 24-bit little-endian output size. Each flag
/// byte covers eight blocks MSB first; a set bit is a back-reference
/// (`length = (b1 >> 4) + 3`, `disp = ((b1 & 0xF) << 8 | b2) + 1`), a clear
/// bit a literal. Back-references copy byte by byte so overlapping runs
/// repeat correctly. Output stops exactly at the declared size.
pub fn decompress(data: &[u8], offset: usize) -> Result<Vec<u8>, RomError> {
    let header = data
        .get(offset..offset.saturating_add(4))
        .ok_or(RomError::OffsetOutOfRange {
            offset,
            len: 4,
            size: data.len(),
        })?;
    if header[0] != LZ77_MAGIC {
        return Err(RomError::BadCompressionHeader {
            offset,
            found: header[0],
        });
    }
    let size = header[1] as usize | (header[2] as usize) << 8 | (header[3] as usize) << 16;
    if size == 0 || size > MAX_DECOMPRESSED_SIZE {
        return Err(RomError::InvalidDecompressedSize { offset, size });
    }

    let mut out = Vec::with_capacity(size);
    let mut pos = offset + 4;

    let next = |pos: &mut usize, out: &Vec<u8>| -> Result<u8, RomError> {
        let b = *data.get(*pos).ok_or(RomError::TruncatedStream {
            offset,
            expected: size,
            got: out.len(),
        })?;
        *pos += 1;
        Ok(b)
    };

    while out.len() < size {
        let flags = next(&mut pos, &out)?;
        for bit in (0..8).rev() {
            if out.len() >= size {
                break;
            }
            if flags & (1 << bit) == 0 {
                let b = next(&mut pos, &out)?;
                out.push(b);
                continue;
            }

            let b1 = next(&mut pos, &out)?;
            let b2 = next(&mut pos, &out)?;
            let length = (b1 >> 4) as usize + 3;
            let disp = (((b1 & 0x0F) as usize) << 8 | b2 as usize) + 1;
            if disp > out.len() {
                return Err(RomError::InvalidDisplacement {
                    offset,
                    position: out.len(),
                    displacement: disp,
                });
            }
            for _ in 0..length {
                if out.len() >= size {
                    break;
                }
                let b = out[out.len() - disp];
                out.push(b);
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
pub(crate) fn literal_stream(payload: &[u8]) -> Vec<u8> {
    let n = payload.len();
    let mut out = vec![LZ77_MAGIC, n as u8, (n >> 8) as u8, (n >> 16) as u8];
    for chunk in payload.chunks(8) {
        out.push(0x00);
        out.extend_from_slice(chunk);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_literals() {
        let stream = literal_stream(b"HELLO, WORLD");
        assert_eq!(decompress(&stream, 0).unwrap(), b"HELLO, WORLD".to_vec());
    }

    #[test]
    fn overlapping_back_reference_repeats_run() {
        // 'A' then a 9-byte copy at distance 1.
        let stream = [0x10, 10, 0, 0, 0b0100_0000, b'A', 0x60, 0x00];
        assert_eq!(decompress(&stream, 0).unwrap(), vec![b'A'; 10]);
    }

    #[test]
    fn copy_is_cut_at_declared_size() {
        let stream = [0x10, 4, 0, 0, 0b0100_0000, b'x', 0xF0, 0x00];
        let out = decompress(&stream, 0).unwrap();
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn honours_offset() {
        let mut data = vec![0xEE; 5];
        data.extend(literal_stream(b"abc"));
        assert_eq!(decompress(&data, 5).unwrap(), b"abc".to_vec());
    }

    #[test]
    fn rejects_bad_header_and_sizes() {
        assert!(matches!(
            decompress(&[0x11, 1, 0, 0, 0, 0], 0),
            Err(RomError::BadCompressionHeader { found: 0x11, .. })
        ));
        assert!(matches!(
            decompress(&[0x10, 0, 0, 0], 0),
            Err(RomError::InvalidDecompressedSize { size: 0, .. })
        ));
        assert!(matches!(
            decompress(&[0x10, 1, 0, 0x11], 0),
            Err(RomError::InvalidDecompressedSize { .. })
        ));
        assert!(matches!(
            decompress(&[0x10, 1], 0),
            Err(RomError::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn rejects_reference_before_start_and_truncation() {
        let stream = [0x10, 4, 0, 0, 0b1000_0000, 0x00, 0x00];
        assert!(matches!(
            decompress(&stream, 0),
            Err(RomError::InvalidDisplacement { displacement: 1, .. })
        ));
        let stream = [0x10, 4, 0, 0, 0x00, b'a', b'b'];
        assert!(matches!(
            decompress(&stream, 0),
            Err(RomError::TruncatedStream { expected: 4, got: 2, .. })
        ));
    }
}
