// Wire serialization utilities
//
// Every message is a sequence of fixed-width little-endian integers,
// length-prefixed byte strings and varint-prefixed vectors.

use crate::core::Hash256;
use std::io::{self, Read, Write};

/// Trait for types with a canonical wire form.
pub trait Serializable {
    fn serialize(&self) -> Vec<u8>;
    fn deserialize(data: &[u8]) -> Result<Self, String>
    where
        Self: Sized;
}

/// Write a variable-length integer.
///
/// value < 0xfd: 1 byte; < 2^16: 0xfd + 2 LE bytes; < 2^32: 0xfe + 4 LE
/// bytes; otherwise 0xff + 8 LE bytes.
pub fn write_varint<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    match value {
        0..=0xfc => {
            writer.write_all(&[value as u8])?;
        }
        0xfd..=0xffff => {
            writer.write_all(&[0xfd])?;
            writer.write_all(&(value as u16).to_le_bytes())?;
        }
        0x10000..=0xffffffff => {
            writer.write_all(&[0xfe])?;
            writer.write_all(&(value as u32).to_le_bytes())?;
        }
        _ => {
            writer.write_all(&[0xff])?;
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Read a variable-length integer.
pub fn read_varint<R: Read + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let mut first_byte = [0u8; 1];
    reader.read_exact(&mut first_byte)?;

    match first_byte[0] {
        0..=0xfc => Ok(first_byte[0] as u64),
        0xfd => {
            let mut bytes = [0u8; 2];
            reader.read_exact(&mut bytes)?;
            Ok(u16::from_le_bytes(bytes) as u64)
        }
        0xfe => {
            let mut bytes = [0u8; 4];
            reader.read_exact(&mut bytes)?;
            Ok(u32::from_le_bytes(bytes) as u64)
        }
        0xff => {
            let mut bytes = [0u8; 8];
            reader.read_exact(&mut bytes)?;
            Ok(u64::from_le_bytes(bytes))
        }
    }
}

/// Write bytes with a varint length prefix.
pub fn write_var_bytes<W: Write>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    write_varint(writer, data.len() as u64)?;
    writer.write_all(data)?;
    Ok(())
}

/// Read bytes with a varint length prefix.
pub fn read_var_bytes<R: Read + ?Sized>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = read_varint(reader)? as usize;
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;
    Ok(data)
}

/// Write a varstring (varint length + UTF-8 bytes).
pub fn write_var_string<W: Write>(writer: &mut W, s: &str) -> io::Result<()> {
    write_var_bytes(writer, s.as_bytes())
}

/// Read a varstring.
pub fn read_var_string<R: Read + ?Sized>(reader: &mut R) -> io::Result<String> {
    let bytes = read_var_bytes(reader)?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub fn read_u32<R: Read + ?Sized>(reader: &mut R) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

pub fn read_u64<R: Read + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

/// Read a 32-byte hash in wire order.
pub fn read_hash<R: Read + ?Sized>(reader: &mut R) -> io::Result<Hash256> {
    let mut bytes = [0u8; 32];
    reader.read_exact(&mut bytes)?;
    Ok(Hash256::new(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(value: u64, expected_len: usize) {
        let mut buf = Vec::new();
        write_varint(&mut buf, value).unwrap();
        assert_eq!(buf.len(), expected_len);

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_varint(&mut cursor).unwrap(), value);
    }

    #[test]
    fn test_varint_widths() {
        round_trip(0, 1);
        round_trip(100, 1);
        round_trip(0xfc, 1);
        round_trip(0xfd, 3);
        round_trip(1000, 3);
        round_trip(0xffff, 3);
        round_trip(0x10000, 5);
        round_trip(100_000, 5);
        round_trip(0xffff_ffff, 5);
        round_trip(0x1_0000_0000, 9);
        round_trip(u64::MAX, 9);
    }

    #[test]
    fn test_var_bytes() {
        let data = b"hello world";
        let mut buf = Vec::new();
        write_var_bytes(&mut buf, data).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = read_var_bytes(&mut cursor).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_var_string() {
        let mut buf = Vec::new();
        write_var_string(&mut buf, "/spv:0.1.0/").unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_var_string(&mut cursor).unwrap(), "/spv:0.1.0/");
    }

    #[test]
    fn test_var_string_rejects_bad_utf8() {
        let mut buf = Vec::new();
        write_var_bytes(&mut buf, &[0xff, 0xfe]).unwrap();
        let mut cursor = Cursor::new(buf);
        assert!(read_var_string(&mut cursor).is_err());
    }

    #[test]
    fn test_truncated_varint() {
        let mut cursor = Cursor::new(vec![0xfdu8, 0x01]);
        assert!(read_varint(&mut cursor).is_err());
    }
}
