//! The protocol's variable-length integers: seven data bits per byte, least
//! significant group first, high bit set on every byte except the last.

/// A u32 never needs more than five bytes.
pub const MAX_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VarIntError {
    /// The buffer ended before a byte without the continuation bit. More data
    /// may still complete it.
    #[error("buffer ends inside a varint")]
    Truncated,
    /// Five bytes weren't enough, so no amount of extra data will make this
    /// valid.
    #[error("varint does not fit in 32 bits")]
    TooLong,
}

pub fn write(buf: &mut Vec<u8>, mut value: u32) {
    loop {
        if value & !0x7F == 0 {
            buf.push(value as u8);
            return;
        }
        buf.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
}

pub fn encode(value: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_LEN);
    write(&mut buf, value);
    buf
}

/// Signed values (like the `-1` protocol version) go over the wire as their
/// two's complement bit pattern.
pub fn write_i32(buf: &mut Vec<u8>, value: i32) {
    write(buf, value as u32);
}

/// Reads the varint starting at `offset`, returning the value and how many
/// bytes it took up.
pub fn decode(buf: &[u8], offset: usize) -> Result<(u32, usize), VarIntError> {
    let mut value = 0u32;
    for i in 0..MAX_LEN {
        let Some(&byte) = buf.get(offset + i) else {
            return Err(VarIntError::Truncated);
        };
        // the fifth byte only has room for the top 4 bits
        if i == MAX_LEN - 1 && byte & 0xF0 != 0 {
            return Err(VarIntError::TooLong);
        }
        value |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(VarIntError::TooLong)
}

/// Like [`decode`] but only finds where the varint ends.
pub fn size_of(buf: &[u8], offset: usize) -> Result<usize, VarIntError> {
    for i in 0..MAX_LEN {
        let Some(&byte) = buf.get(offset + i) else {
            return Err(VarIntError::Truncated);
        };
        if i == MAX_LEN - 1 && byte & 0xF0 != 0 {
            return Err(VarIntError::TooLong);
        }
        if byte & 0x80 == 0 {
            return Ok(i + 1);
        }
    }
    Err(VarIntError::TooLong)
}

/// Length-prefixed UTF-8.
pub fn write_string(buf: &mut Vec<u8>, s: &str) {
    write(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}
