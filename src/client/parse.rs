//! Field parsing for notification and reply bodies.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

/// Parse a decimal integer, ignoring surrounding whitespace.
pub(super) fn int(field: &[u8]) -> Option<i32> {
    core::str::from_utf8(field.trim_ascii()).ok()?.parse().ok()
}

/// Parse `<a>,<b>`.
pub(super) fn pair(line: &[u8]) -> Option<(i32, i32)> {
    let mut fields = line.trim_ascii().splitn(2, |b| *b == b',');
    Some((int(fields.next()?)?, int(fields.next()?)?))
}

/// The bytes following the first occurrence of `tag`.
pub(super) fn after_tag<'a>(buf: &'a [u8], tag: &[u8]) -> Option<&'a [u8]> {
    buf.windows(tag.len())
        .position(|w| w == tag)
        .map(|pos| &buf[pos + tag.len()..])
}

/// The first line of `buf`, without its terminator.
pub(super) fn first_line(buf: &[u8]) -> &[u8] {
    let end = buf
        .iter()
        .position(|b| *b == b'\r' || *b == b'\n')
        .unwrap_or(buf.len());
    &buf[..end]
}

/// Best effort text for logging.
pub(super) fn text(bytes: &[u8]) -> &str {
    core::str::from_utf8(bytes.trim_ascii()).unwrap_or("<binary>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair() {
        assert_eq!(pair(b"3,0\r\n"), Some((3, 0)));
        assert_eq!(pair(b" 1,-2\r\n"), Some((1, -2)));
        assert_eq!(pair(b"1\r\n"), None);
        assert_eq!(pair(b"x,1\r\n"), None);
    }

    #[test]
    fn test_after_tag() {
        let reply = b"AT+ETMHFWREAD?\r\r\n+ETMHFWREAD:1024,1a2b\r\n\r\nOK\r\n";
        let body = after_tag(reply, b"+ETMHFWREAD:").unwrap();
        assert_eq!(first_line(body), b"1024,1a2b");
        assert_eq!(after_tag(b"OK\r\n", b"+ETMHFWREAD:"), None);
    }
}
