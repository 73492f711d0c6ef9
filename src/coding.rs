//! Little-endian fixed-width and varint encodings used by every on-disk format.
//!
//! Decoders take `&mut &[u8]` and advance the slice past what they consumed,
//! returning `None` when the input is truncated or malformed.

pub fn put_fixed32(dst: &mut Vec<u8>, value: u32) {
    dst.extend_from_slice(&value.to_le_bytes());
}

pub fn put_fixed64(dst: &mut Vec<u8>, value: u64) {
    dst.extend_from_slice(&value.to_le_bytes());
}

/// Read a fixed32 at the start of `src`. Caller guarantees `src.len() >= 4`.
pub fn decode_fixed32(src: &[u8]) -> u32 {
    u32::from_le_bytes([src[0], src[1], src[2], src[3]])
}

/// Read a fixed64 at the start of `src`. Caller guarantees `src.len() >= 8`.
pub fn decode_fixed64(src: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&src[..8]);
    u64::from_le_bytes(buf)
}

pub fn put_varint32(dst: &mut Vec<u8>, value: u32) {
    put_varint64(dst, value as u64);
}

pub fn put_varint64(dst: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        dst.push((value as u8) | 0x80);
        value >>= 7;
    }
    dst.push(value as u8);
}

pub fn varint_length(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

pub fn get_varint32(input: &mut &[u8]) -> Option<u32> {
    let mut result = 0u32;
    for (i, shift) in (0..=28).step_by(7).enumerate() {
        let byte = *input.get(i)?;
        if byte & 0x80 != 0 {
            result |= ((byte & 0x7f) as u32) << shift;
        } else {
            result |= (byte as u32) << shift;
            *input = &input[i + 1..];
            return Some(result);
        }
    }
    None
}

pub fn get_varint64(input: &mut &[u8]) -> Option<u64> {
    let mut result = 0u64;
    for (i, shift) in (0..=63).step_by(7).enumerate() {
        let byte = *input.get(i)?;
        if byte & 0x80 != 0 {
            result |= ((byte & 0x7f) as u64) << shift;
        } else {
            result |= (byte as u64) << shift;
            *input = &input[i + 1..];
            return Some(result);
        }
    }
    None
}

pub fn put_length_prefixed_slice(dst: &mut Vec<u8>, value: &[u8]) {
    put_varint32(dst, value.len() as u32);
    dst.extend_from_slice(value);
}

pub fn get_length_prefixed_slice<'a>(input: &mut &'a [u8]) -> Option<&'a [u8]> {
    let len = get_varint32(input)? as usize;
    if input.len() < len {
        return None;
    }
    let (value, rest) = input.split_at(len);
    *input = rest;
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint32_boundaries() {
        let values = [0u32, 1, 127, 128, 255, 300, 16383, 16384, u32::MAX];
        let mut buf = Vec::new();
        for v in values {
            put_varint32(&mut buf, v);
        }
        let mut input = buf.as_slice();
        for v in values {
            assert_eq!(get_varint32(&mut input), Some(v));
        }
        assert!(input.is_empty());
    }

    #[test]
    fn varint64_length_matches_encoding() {
        for shift in 0..64 {
            let v = 1u64 << shift;
            let mut buf = Vec::new();
            put_varint64(&mut buf, v);
            assert_eq!(buf.len(), varint_length(v));
            let mut input = buf.as_slice();
            assert_eq!(get_varint64(&mut input), Some(v));
        }
    }

    #[test]
    fn truncated_varint_is_rejected() {
        let mut buf = Vec::new();
        put_varint32(&mut buf, u32::MAX);
        buf.pop();
        let mut input = buf.as_slice();
        assert_eq!(get_varint32(&mut input), None);
    }

    #[test]
    fn length_prefixed_slice_truncated() {
        let mut buf = Vec::new();
        put_length_prefixed_slice(&mut buf, b"hello");
        let mut input = &buf[..buf.len() - 1];
        assert!(get_length_prefixed_slice(&mut input).is_none());

        let mut input = buf.as_slice();
        assert_eq!(get_length_prefixed_slice(&mut input), Some(&b"hello"[..]));
    }

    #[test]
    fn fixed_widths_are_little_endian() {
        let mut buf = Vec::new();
        put_fixed32(&mut buf, 0x0403_0201);
        put_fixed64(&mut buf, 0x0807_0605_0403_0201);
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);
        assert_eq!(decode_fixed32(&buf), 0x0403_0201);
        assert_eq!(decode_fixed64(&buf[4..]), 0x0807_0605_0403_0201);
    }
}
