//! Little-endian primitives for the versioned measurement format.
//!
//! Every record in a measurement file starts with an `i32` version tag. The
//! helpers here read and write the fixed-width integers, the compressed
//! counters, and container length prefixes that those records are built from.
//!
//! ## Compressed counter layout
//!
//! ```text
//! +--------+---------------------------+
//! | code   | payload                   |
//! +--------+---------------------------+
//! | 0      | (none, value is 0)        |
//! | 1      | i8   (value < 2^7)        |
//! | 2      | i16  (value < 2^15)       |
//! | 3      | i32  (value < 2^31)       |
//! | 4      | i64                       |
//! | 21..24 | same widths, negative     |
//! +--------+---------------------------+
//! ```

use std::io::{self, Read, Write};

/// Errors raised while decoding or encoding measurement records.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    #[error("Unexpected end of data")]
    Truncated,

    #[error("Unsupported {record} version {version}")]
    UnsupportedVersion { record: &'static str, version: i32 },

    #[error("Corrupted compressed counter (code {0})")]
    CorruptVarint(i8),

    #[error("Invalid {what}: {value}")]
    Invalid { what: &'static str, value: i64 },
}

impl From<io::Error> for FormatError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            FormatError::Truncated
        } else {
            FormatError::Io(err)
        }
    }
}

fn read_array<const N: usize>(r: &mut impl Read) -> Result<[u8; N], FormatError> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_i8(r: &mut impl Read) -> Result<i8, FormatError> {
    Ok(i8::from_le_bytes(read_array(r)?))
}

pub fn read_u16(r: &mut impl Read) -> Result<u16, FormatError> {
    Ok(u16::from_le_bytes(read_array(r)?))
}

pub fn read_i16(r: &mut impl Read) -> Result<i16, FormatError> {
    Ok(i16::from_le_bytes(read_array(r)?))
}

pub fn read_u32(r: &mut impl Read) -> Result<u32, FormatError> {
    Ok(u32::from_le_bytes(read_array(r)?))
}

pub fn read_i32(r: &mut impl Read) -> Result<i32, FormatError> {
    Ok(i32::from_le_bytes(read_array(r)?))
}

pub fn read_u64(r: &mut impl Read) -> Result<u64, FormatError> {
    Ok(u64::from_le_bytes(read_array(r)?))
}

pub fn read_i64(r: &mut impl Read) -> Result<i64, FormatError> {
    Ok(i64::from_le_bytes(read_array(r)?))
}

pub fn write_i8(w: &mut impl Write, v: i8) -> Result<(), FormatError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_u16(w: &mut impl Write, v: u16) -> Result<(), FormatError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_i16(w: &mut impl Write, v: i16) -> Result<(), FormatError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_u32(w: &mut impl Write, v: u32) -> Result<(), FormatError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_i32(w: &mut impl Write, v: i32) -> Result<(), FormatError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_u64(w: &mut impl Write, v: u64) -> Result<(), FormatError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_i64(w: &mut impl Write, v: i64) -> Result<(), FormatError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Writes a non-negative counter in the compressed layout.
pub fn write_counter(w: &mut impl Write, value: u64) -> Result<(), FormatError> {
    if value == 0 {
        write_i8(w, 0)
    } else if value < (1 << 7) {
        write_i8(w, 1)?;
        write_i8(w, value as i8)
    } else if value < (1 << 15) {
        write_i8(w, 2)?;
        write_i16(w, value as i16)
    } else if value < (1 << 31) {
        write_i8(w, 3)?;
        write_i32(w, value as i32)
    } else {
        let v = i64::try_from(value).map_err(|_| FormatError::Invalid {
            what: "counter",
            value: i64::MAX,
        })?;
        write_i8(w, 4)?;
        write_i64(w, v)
    }
}

/// Reads a compressed counter. Negative encodings are rejected.
pub fn read_counter(r: &mut impl Read) -> Result<u64, FormatError> {
    let code = read_i8(r)?;
    let magnitude: i64 = match code {
        0 => return Ok(0),
        1 | 21 => read_i8(r)? as i64,
        2 | 22 => read_i16(r)? as i64,
        3 | 23 => read_i32(r)? as i64,
        4 | 24 => read_i64(r)?,
        other => return Err(FormatError::CorruptVarint(other)),
    };
    let value = if code > 20 { -magnitude } else { magnitude };
    u64::try_from(value).map_err(|_| FormatError::Invalid {
        what: "counter",
        value,
    })
}

/// Writes a container length prefix.
pub fn write_len(w: &mut impl Write, len: usize) -> Result<(), FormatError> {
    let len = u32::try_from(len).map_err(|_| FormatError::Invalid {
        what: "container length",
        value: len as i64,
    })?;
    write_u32(w, len)
}

pub fn read_len(r: &mut impl Read) -> Result<usize, FormatError> {
    Ok(read_u32(r)? as usize)
}

/// Writes a link or path index as `i32`.
pub fn write_index(w: &mut impl Write, index: usize) -> Result<(), FormatError> {
    let v = i32::try_from(index).map_err(|_| FormatError::Invalid {
        what: "index",
        value: index as i64,
    })?;
    write_i32(w, v)
}

/// Reads an `i32` index, rejecting negative values.
pub fn read_index(r: &mut impl Read, what: &'static str) -> Result<usize, FormatError> {
    let v = read_i32(r)?;
    usize::try_from(v).map_err(|_| FormatError::Invalid {
        what,
        value: v as i64,
    })
}
