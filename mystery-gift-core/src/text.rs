// Gen3 single-byte text encoding (international/English layout).
//
// '\0' marks an unmapped byte. 0x00 and 0xA0 are both used as space/padding
// by the games, and the control range 0xFA-0xFE is flattened to spaces when
// decoding for single-line display.
const GEN3_CHARSET: [char; 256] = [
    /* 00 */ ' ', 'À', 'Á', 'Â', 'Ç', 'È', 'É', 'Ê',
    /* 08 */ 'Ë', 'Ì', ' ', 'Î', 'Ï', 'Ò', 'Ó', 'Ô',
    /* 10 */ 'Œ', 'Ù', 'Ú', 'Û', 'Ñ', 'ß', 'à', 'á',
    /* 18 */ '\0', 'ç', 'è', 'é', 'ê', 'ë', 'ì', '\0',
    /* 20 */ 'î', 'ï', 'ò', 'ó', 'ô', 'œ', 'ù', 'ú',
    /* 28 */ 'û', 'ñ', 'º', 'ª', '\u{1D49}', '&', '+', '\0',
    /* 30 */ '\0', 'L', 'v', '=', ';', '\0', '\0', '\0',
    /* 38 */ '\0', '\0', '\0', '\0', '\0', '\0', '\0', '\0',
    /* 40 */ '\0', '¿', '¡', 'P', 'K', 'M', 'N', '\0',
    /* 48 */ '\0', '\0', '\0', 'Í', '%', '(', ')', '\0',
    /* 50 */ '\0', 'â', '\0', 'í', '\0', '\0', '\0', '\0',
    /* 58 */ '\0', '\0', '↑', '↓', '←', '→', '\0', '\0',
    /* 60 */ '*', '*', '*', '*', '\u{1D49}', '<', '>', '\0',
    /* 68 */ '\0', '\0', '\0', '\0', '\0', '\0', '\0', '\0',
    /* 70 */ '\0', '\0', '\0', '\0', '\0', '\0', '\0', '\0',
    /* 78 */ '\0', '↑', '↓', '←', '→', '*', '*', '*',
    /* 80 */ '*', '*', '*', '*', '\u{1D49}', '<', '>', '\0',
    /* 88 */ '\0', '\0', '\0', '\0', '\0', '\0', '\0', '\0',
    /* 90 */ '\0', '\0', '\0', '\0', '\0', '\0', '\0', '\0',
    /* 98 */ '\0', '\0', '\0', '\0', '\0', '\0', '\0', '\0',
    /* a0 */ '\0', '0', '1', '2', '3', '4', '5', '6',
    /* a8 */ '7', '8', '9', '!', '?', '.', '-', '・',
    /* b0 */ '‥', '“', '”', '‘', '’', '♂', '♀', ' ',
    /* b8 */ ',', '×', '/', 'A', 'B', 'C', 'D', 'E',
    /* c0 */ 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M',
    /* c8 */ 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U',
    /* d0 */ 'V', 'W', 'X', 'Y', 'Z', 'a', 'b', 'c',
    /* d8 */ 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k',
    /* e0 */ 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    /* e8 */ 't', 'u', 'v', 'w', 'x', 'y', 'z', '►',
    /* f0 */ ':', 'Ä', 'Ö', 'Ü', 'ä', 'ö', 'ü', '\0',
    /* f8 */ '\0', '\0', '\0', '\0', '\0', '\0', '\0', '\0',
];

/// String terminator byte.
pub const EOS: u8 = 0xFF;

/// Looks up the character for a single encoded byte, if it has one.
pub fn gen3_char(byte: u8) -> Option<char> {
    match GEN3_CHARSET[byte as usize] {
        '\0' => None,
        ch => Some(ch),
    }
}

/// Decodes at most `max_len` bytes of Gen3 text.
///
/// Decoding stops at `0xFF`. Padding and control bytes become spaces and
/// every other unmapped byte is skipped. Trailing padding is kept, so a
/// zero-filled field decodes to trailing spaces.
pub fn decode_text(bytes: &[u8], max_len: usize) -> String {
    let mut out = String::new();
    for &b in bytes.iter().take(max_len) {
        if b == EOS {
            break;
        }
        match gen3_char(b) {
            Some(ch) => out.push(ch),
            None => {
                if matches!(b, 0x00 | 0xA0 | 0xFA..=0xFE) {
                    out.push(' ');
                }
            }
        }
    }
    out
}

fn encode_char(ch: char) -> u8 {
    match ch {
        '0'..='9' => 0xA1 + (ch as u8 - b'0'),
        'A'..='Z' => 0xBB + (ch as u8 - b'A'),
        'a'..='z' => 0xD5 + (ch as u8 - b'a'),
        '!' => 0xAB,
        '?' => 0xAC,
        '.' => 0xAD,
        '-' => 0xAE,
        ',' => 0xB8,
        '/' => 0xBA,
        ':' => 0xF0,
        ' ' => 0x00,
        _ => GEN3_CHARSET
            .iter()
            .position(|&c| c == ch)
            .map(|i| i as u8)
            .unwrap_or(0x00),
    }
}

/// Encodes `text` into a zero-filled buffer of exactly `max_len` bytes.
///
/// Digits and ASCII letters are resolved arithmetically before falling back
/// to a reverse table scan, so 'P' encodes to 0xCA rather than the 0x43
/// "PKMN" glyph. Characters with no encoding become 0x00. No terminator is
/// appended; the zero padding acts as one.
pub fn encode_text(text: &str, max_len: usize) -> Vec<u8> {
    let mut out = vec![0u8; max_len];
    for (slot, ch) in out.iter_mut().zip(text.chars()) {
        *slot = encode_char(ch);
    }
    out
}

/// Writes `text` into a fixed-width field in place.
pub(crate) fn encode_text_into(dest: &mut [u8], text: &str) {
    let encoded = encode_text(text, dest.len());
    dest.copy_from_slice(&encoded);
}

// Reduced charset used for ROM name tables; anything else is dropped.
fn name_char(byte: u8) -> Option<char> {
    match byte {
        0x00 => Some(' '),
        0xA1..=0xAE | 0xBB..=0xEE => gen3_char(byte),
        0xB4 => Some('\''),
        0xB8 => Some(','),
        0xBA => Some('/'),
        0xF0 => Some(':'),
        _ => None,
    }
}

/// Decodes a ROM name-table entry: stops at 0xFF and trims the result.
pub fn decode_name(bytes: &[u8]) -> String {
    let mut out = String::new();
    for &b in bytes {
        if b == EOS {
            break;
        }
        if let Some(ch) = name_char(b) {
            out.push(ch);
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_ascii_ranges() {
        let bytes = [0xCE, 0xBF, 0xCD, 0xCE, 0x00, 0xA2, 0xA3, 0xAB, 0xFF, 0xBB];
        assert_eq!(decode_text(&bytes, bytes.len()), "TEST 12!");
    }

    #[test]
    fn control_bytes_become_spaces_and_unmapped_are_skipped() {
        let bytes = [0xBB, 0xFE, 0xBC, 0xFA, 0xBD, 0x18, 0xBE, 0xA0];
        assert_eq!(decode_text(&bytes, bytes.len()), "A B CD ");
    }

    #[test]
    fn decode_respects_max_len() {
        let bytes = [0xBB, 0xBC, 0xBD];
        assert_eq!(decode_text(&bytes, 2), "AB");
    }

    #[test]
    fn encode_prefers_alphabet_over_pkmn_glyphs() {
        let bytes = encode_text("PKMN", 4);
        assert_eq!(bytes, vec![0xCA, 0xC5, 0xC7, 0xC8]);
    }

    #[test]
    fn encode_zero_pads_and_truncates() {
        assert_eq!(encode_text("Hi!", 5), vec![0xC2, 0xDD, 0xAB, 0x00, 0x00]);
        assert_eq!(encode_text("ABCDEF", 3), vec![0xBB, 0xBC, 0xBD]);
    }

    #[test]
    fn encode_falls_back_to_table_scan() {
        assert_eq!(encode_text("é♂", 2), vec![0x1B, 0xB5]);
        assert_eq!(encode_text("~", 1), vec![0x00]);
    }

    #[test]
    fn decode_encode_is_stable_for_every_mapped_byte() {
        for b in 0u16..=0xFE {
            let b = b as u8;
            if gen3_char(b).is_none() {
                continue;
            }
            let first = decode_text(&[b], 1);
            let again = decode_text(&encode_text(&first, 1), 1);
            assert_eq!(first, again, "byte {b:#04x}");
        }
    }

    #[test]
    fn name_decoding_trims_and_drops_accents() {
        let bytes = [0x00, 0xCA, 0xE3, 0xDF, 0xD9, 0x1B, 0xAD, 0x00, 0xFF, 0xBB];
        assert_eq!(decode_name(&bytes), "Poke.");
    }
}
