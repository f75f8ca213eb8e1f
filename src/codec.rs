//! Ascii-hex payload encoding.
//!
//! Published payloads are sent as a quoted string of uppercase hex digits,
//! two per octet.  Delivered payloads and firmware chunks arrive the same
//! way, in either case.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use crate::{Error, Result};

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Two uppercase hex digits for `octet`.
pub fn hex_pair(octet: u8) -> [u8; 2] {
    [
        HEX_DIGITS[(octet >> 4) as usize],
        HEX_DIGITS[(octet & 0x0f) as usize],
    ]
}

/// Value of a single hex digit, either case.
pub fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

/// Octet for a pair of hex digits.
pub fn decode_pair(hi: u8, lo: u8) -> Option<u8> {
    Some((hex_value(hi)? << 4) | hex_value(lo)?)
}

/// Encode `data` into `out`, returning the number of digits written.
pub fn encode_hex(data: &[u8], out: &mut [u8]) -> Result<usize> {
    let len = data.len() * 2;
    if out.len() < len {
        return Err(Error::InvalidOperation);
    }
    for (octet, digits) in data.iter().zip(out.chunks_exact_mut(2)) {
        digits.copy_from_slice(&hex_pair(*octet));
    }
    Ok(len)
}

/// Decode the hex digits in `src` into `out`, returning the octet count.
pub fn decode_hex(src: &[u8], out: &mut [u8]) -> Result<usize> {
    if src.len() % 2 != 0 {
        return Err(Error::Decode);
    }
    let len = src.len() / 2;
    if out.len() < len {
        return Err(Error::InvalidOperation);
    }
    for (pair, octet) in src.chunks_exact(2).zip(out.iter_mut()) {
        *octet = decode_pair(pair[0], pair[1]).ok_or(Error::Decode)?;
    }
    Ok(len)
}

/// Decode the hex digits filling `buf` over the front of `buf` itself,
/// returning the octet count.
///
/// Each octet is written at or before the digits it came from, so no digit
/// is overwritten before it is read.
pub fn decode_hex_in_place(buf: &mut [u8]) -> Result<usize> {
    if buf.len() % 2 != 0 {
        return Err(Error::Decode);
    }
    let len = buf.len() / 2;
    for i in 0..len {
        buf[i] = decode_pair(buf[2 * i], buf[2 * i + 1]).ok_or(Error::Decode)?;
    }
    Ok(len)
}

/// Number of leading bytes of `src` that form complete hex pairs.
pub fn hex_run(src: &[u8]) -> usize {
    let digits = src.iter().take_while(|b| hex_value(**b).is_some()).count();
    digits & !1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;
    use std::vec::Vec;

    #[test]
    fn test_hex_pair() {
        assert_eq!(&hex_pair(0x00), b"00");
        assert_eq!(&hex_pair(0x7f), b"7F");
        assert_eq!(&hex_pair(0xa5), b"A5");
        assert_eq!(&hex_pair(0xff), b"FF");
    }

    #[test]
    fn test_round_trip_all_lengths() {
        for len in 0..=256usize {
            let data: Vec<u8> = (0..len).map(|i| (i * 37 + len) as u8).collect();
            let mut hex = vec![0u8; len * 2];
            assert_eq!(encode_hex(&data, &mut hex), Ok(len * 2));

            let mut decoded = vec![0u8; len];
            assert_eq!(decode_hex(&hex, &mut decoded), Ok(len));
            assert_eq!(decoded, data);

            assert_eq!(decode_hex_in_place(&mut hex), Ok(len));
            assert_eq!(&hex[..len], &data[..]);
        }
    }

    #[test]
    fn test_decode_either_case() {
        let mut out = [0u8; 4];
        assert_eq!(decode_hex(b"74657374", &mut out), Ok(4));
        assert_eq!(&out, b"test");
        assert_eq!(decode_hex(b"deADbeEF", &mut out), Ok(4));
        assert_eq!(out, [0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_decode_errors() {
        let mut out = [0u8; 4];
        assert_eq!(decode_hex(b"7G", &mut out), Err(Error::Decode));
        assert_eq!(decode_hex(b"746", &mut out), Err(Error::Decode));
        assert_eq!(decode_hex(b"0102030405", &mut out), Err(Error::InvalidOperation));

        let mut buf = *b"74\"5";
        assert_eq!(decode_hex_in_place(&mut buf), Err(Error::Decode));
    }

    #[test]
    fn test_hex_run() {
        assert_eq!(hex_run(b"0A0B\r\nOK"), 4);
        assert_eq!(hex_run(b"ABC\r\n"), 2);
        assert_eq!(hex_run(b"\r\n"), 0);
    }
}
