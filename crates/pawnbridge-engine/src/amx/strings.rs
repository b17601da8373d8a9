//! Strings in native memory
//!
//! The server stores text in the Windows-1252 code page, one character per
//! cell ("unpacked") or four characters per cell ("packed"). Text coming
//! from the script side is UTF-8 and converted at this boundary only.

use encoding_rs::{EncoderResult, WINDOWS_1252};

use super::{Cell, Ucell, UNPACKED_MAX};

/// Substitute for characters the server code page cannot represent
const REPLACEMENT: u8 = b'?';

/// Converts UTF-8 text to the server code page.
pub fn to_ansi(text: &str) -> Vec<u8> {
    let mut encoder = WINDOWS_1252.new_encoder();
    let mut output = vec![0u8; text.len()];
    let mut written = 0;
    let mut remaining = text;

    loop {
        let (result, read, wrote) = encoder.encode_from_utf8_without_replacement(
            remaining,
            &mut output[written..],
            true,
        );
        written += wrote;
        remaining = &remaining[read..];

        match result {
            EncoderResult::InputEmpty => break,
            EncoderResult::Unmappable(_) => {
                output[written] = REPLACEMENT;
                written += 1;
            }
            // Every character takes at most as many bytes as it did in UTF-8.
            EncoderResult::OutputFull => break,
        }
    }

    output.truncate(written);
    output
}

/// Converts text in the server code page to UTF-8.
pub fn from_ansi(bytes: &[u8]) -> String {
    let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
    text.into_owned()
}

/// Writes `text` as an unpacked, zero-terminated string into `cells`,
/// truncating when it does not fit. Returns the number of cells written,
/// including the terminator.
pub fn encode_cells(text: &[u8], cells: &mut [Cell]) -> usize {
    if cells.is_empty() {
        return 0;
    }

    let length = text.len().min(cells.len() - 1);
    for (cell, byte) in cells.iter_mut().zip(&text[..length]) {
        *cell = *byte as Cell;
    }

    cells[length] = 0;
    length + 1
}

/// Whether the string starting with `first` is stored packed
pub fn is_packed(first: Cell) -> bool {
    (first as Ucell) > UNPACKED_MAX
}

/// Reads a zero-terminated string from `cells` in the server code page,
/// appending the bytes to `output`. Both packed and unpacked strings are
/// understood; reading stops at the end of `cells` when no terminator is
/// found.
pub fn decode_cells(cells: &[Cell], output: &mut Vec<u8>) {
    let Some(first) = cells.first() else {
        return;
    };

    if is_packed(*first) {
        for cell in cells {
            for shift in [24, 16, 8, 0] {
                let byte = ((*cell as Ucell) >> shift) as u8;
                if byte == 0 {
                    return;
                }
                output.push(byte);
            }
        }
    } else {
        for cell in cells {
            if *cell == 0 {
                return;
            }
            output.push(*cell as u8);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ansi_conversion() {
        assert_eq!(to_ansi("Hello"), b"Hello");
        assert_eq!(to_ansi("café"), vec![b'c', b'a', b'f', 0xE9]);
        assert_eq!(to_ansi("€5"), vec![0x80, b'5']);
        assert_eq!(to_ansi("a✓b"), b"a?b");

        assert_eq!(from_ansi(&[b'c', b'a', b'f', 0xE9]), "café");
        assert_eq!(from_ansi(&[0x80]), "€");
    }

    #[test]
    fn test_encode_cells_truncates() {
        let mut cells = [0x7f; 4];
        assert_eq!(encode_cells(b"Hello", &mut cells), 4);
        assert_eq!(cells, [b'H' as Cell, b'e' as Cell, b'l' as Cell, 0]);

        let mut empty: [Cell; 0] = [];
        assert_eq!(encode_cells(b"Hello", &mut empty), 0);
    }

    #[test]
    fn test_decode_unpacked() {
        let cells = [b'H' as Cell, b'i' as Cell, 0, b'x' as Cell];
        let mut output = Vec::new();
        decode_cells(&cells, &mut output);
        assert_eq!(output, b"Hi");
    }

    #[test]
    fn test_decode_packed() {
        let cells = [
            i32::from_be_bytes(*b"Hell"),
            i32::from_be_bytes([b'o', b'!', 0, 0]),
        ];
        let mut output = Vec::new();
        decode_cells(&cells, &mut output);
        assert_eq!(output, b"Hello!");
    }

    #[test]
    fn test_decode_without_terminator_stops_at_end() {
        let cells = [b'a' as Cell, b'b' as Cell];
        let mut output = Vec::new();
        decode_cells(&cells, &mut output);
        assert_eq!(output, b"ab");
    }
}
