use std::io::{self, Read, Write};

/// Write a u16 in little-endian format
pub fn write_u16_le<W: Write>(writer: &mut W, value: u16) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Read a u16 in little-endian format
pub fn read_u16_le<R: Read>(reader: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

/// Write a u32 in little-endian format
pub fn write_u32_le<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Read a u32 in little-endian format
pub fn read_u32_le<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Write an i32 in little-endian format
pub fn write_i32_le<W: Write>(writer: &mut W, value: i32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Read an i32 in little-endian format
pub fn read_i32_le<R: Read>(reader: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

/// Write a u64 in little-endian format
pub fn write_u64_le<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Read a u64 in little-endian format
pub fn read_u64_le<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Read a length-prefixed (i32) byte string.
///
/// Returns `Ok(None)` on a clean end of input before the prefix, so stream
/// readers can tell "no more records" apart from a truncated record.
pub fn read_prefixed<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated length prefix",
            ));
        }
        filled += n;
    }

    let len = i32::from_le_bytes(buf);
    if len < 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("negative length prefix {}", len),
        ));
    }

    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data)?;
    Ok(Some(data))
}

/// Write a length-prefixed (i32) byte string
pub fn write_prefixed<W: Write>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    let len = i32::try_from(data.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "record larger than 2GiB")
    })?;
    write_i32_le(writer, len)?;
    writer.write_all(data)
}

/// Copy a fixed-size little-endian field out of a slice at `pos`
#[inline]
pub fn le_bytes<const N: usize>(buf: &[u8], pos: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[pos..pos + N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_fixed_width_roundtrip() {
        let mut buf = Vec::new();
        write_u16_le(&mut buf, 513).unwrap();
        write_i32_le(&mut buf, -7).unwrap();
        write_u64_le(&mut buf, u64::MAX).unwrap();
        assert_eq!(buf.len(), 2 + 4 + 8);

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_u16_le(&mut cursor).unwrap(), 513);
        assert_eq!(read_i32_le(&mut cursor).unwrap(), -7);
        assert_eq!(read_u64_le(&mut cursor).unwrap(), u64::MAX);
    }

    #[test]
    fn test_prefixed_end_of_stream() {
        let mut buf = Vec::new();
        write_prefixed(&mut buf, b"donut").unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_prefixed(&mut cursor).unwrap().unwrap(), b"donut");
        assert!(read_prefixed(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_prefixed_truncated_record() {
        let mut buf = Vec::new();
        write_prefixed(&mut buf, b"glass").unwrap();
        buf.truncate(6);

        let mut cursor = Cursor::new(buf);
        assert!(read_prefixed(&mut cursor).is_err());
    }

    #[test]
    fn test_le_bytes() {
        let buf = [0u8, 1, 0, 0, 0, 9];
        assert_eq!(u32::from_le_bytes(le_bytes(&buf, 1)), 1);
    }
}
