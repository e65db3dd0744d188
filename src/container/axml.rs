// SPDX-License-Identifier: PMPL-1.0-or-later

//! Minimal reader for compiled (binary XML) Android manifests
//!
//! Only the leading string pool is decoded. That is enough to recover
//! permission names, which live in the pool verbatim; element structure is
//! not reconstructed.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

const RES_XML_TYPE: u16 = 0x0003;
const RES_STRING_POOL_TYPE: u16 = 0x0001;
const UTF8_FLAG: u32 = 1 << 8;

/// True when the bytes start with a `RES_XML_TYPE` chunk header
pub fn is_binary_xml(bytes: &[u8]) -> bool {
    bytes.len() >= 8 && bytes[0..4] == [0x03, 0x00, 0x08, 0x00]
}

/// Decode the first string pool of a binary XML document.
///
/// Returns `None` if the layout is not recognised or any offset points
/// outside the buffer.
pub fn string_pool(bytes: &[u8]) -> Option<Vec<String>> {
    let mut cursor = Cursor::new(bytes);
    let doc_type = cursor.read_u16::<LittleEndian>().ok()?;
    let doc_header = cursor.read_u16::<LittleEndian>().ok()?;
    let _doc_size = cursor.read_u32::<LittleEndian>().ok()?;
    if doc_type != RES_XML_TYPE {
        return None;
    }

    let pool_start = doc_header as u64;
    cursor.set_position(pool_start);
    let chunk_type = cursor.read_u16::<LittleEndian>().ok()?;
    let _header_size = cursor.read_u16::<LittleEndian>().ok()?;
    let chunk_size = cursor.read_u32::<LittleEndian>().ok()?;
    if chunk_type != RES_STRING_POOL_TYPE || pool_start + chunk_size as u64 > bytes.len() as u64 {
        return None;
    }

    let string_count = cursor.read_u32::<LittleEndian>().ok()?;
    let _style_count = cursor.read_u32::<LittleEndian>().ok()?;
    let flags = cursor.read_u32::<LittleEndian>().ok()?;
    let strings_start = cursor.read_u32::<LittleEndian>().ok()?;
    let _styles_start = cursor.read_u32::<LittleEndian>().ok()?;

    if string_count as u64 * 4 > chunk_size as u64 {
        return None;
    }
    let mut offsets = Vec::with_capacity(string_count as usize);
    for _ in 0..string_count {
        offsets.push(cursor.read_u32::<LittleEndian>().ok()?);
    }

    let utf8 = flags & UTF8_FLAG != 0;
    let mut strings = Vec::with_capacity(offsets.len());
    for offset in offsets {
        let position = pool_start + strings_start as u64 + offset as u64;
        if position >= bytes.len() as u64 {
            return None;
        }
        cursor.set_position(position);
        let value = if utf8 {
            read_utf8(&mut cursor)?
        } else {
            read_utf16(&mut cursor)?
        };
        strings.push(value);
    }
    Some(strings)
}

fn read_utf8(cursor: &mut Cursor<&[u8]>) -> Option<String> {
    // utf-16 length first, then byte length; both may use two bytes
    let _chars = utf8_length(cursor)?;
    let len = utf8_length(cursor)?;
    let mut buffer = vec![0u8; len as usize];
    cursor.read_exact(&mut buffer).ok()?;
    Some(String::from_utf8_lossy(&buffer).into_owned())
}

fn utf8_length(cursor: &mut Cursor<&[u8]>) -> Option<u32> {
    let mut len = cursor.read_u8().ok()? as u32;
    if len & 0x80 != 0 {
        let low = cursor.read_u8().ok()? as u32;
        len = ((len & 0x7F) << 8) | low;
    }
    Some(len)
}

fn read_utf16(cursor: &mut Cursor<&[u8]>) -> Option<String> {
    let mut len = cursor.read_u16::<LittleEndian>().ok()? as u32;
    if len & 0x8000 != 0 {
        let low = cursor.read_u16::<LittleEndian>().ok()? as u32;
        len = ((len & 0x7FFF) << 16) | low;
    }
    let remaining = (cursor.get_ref().len() as u64).saturating_sub(cursor.position());
    if len as u64 > remaining / 2 {
        return None;
    }
    let mut units = Vec::with_capacity(len as usize);
    for _ in 0..len {
        units.push(cursor.read_u16::<LittleEndian>().ok()?);
    }
    Some(
        char::decode_utf16(units)
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect(),
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use byteorder::{LittleEndian, WriteBytesExt};

    /// Encode a binary XML document holding only a UTF-16 string pool
    pub fn binary_manifest(strings: &[&str]) -> Vec<u8> {
        let mut data = Vec::new();
        let mut offsets = Vec::new();
        for s in strings {
            offsets.push(data.len() as u32);
            let units: Vec<u16> = s.encode_utf16().collect();
            data.write_u16::<LittleEndian>(units.len() as u16).unwrap();
            for unit in units {
                data.write_u16::<LittleEndian>(unit).unwrap();
            }
            data.write_u16::<LittleEndian>(0).unwrap();
        }
        while data.len() % 4 != 0 {
            data.push(0);
        }

        let header_size = 28u32;
        let strings_start = header_size + 4 * strings.len() as u32;
        let pool_size = strings_start + data.len() as u32;

        let mut out = Vec::new();
        out.write_u16::<LittleEndian>(0x0003).unwrap();
        out.write_u16::<LittleEndian>(8).unwrap();
        out.write_u32::<LittleEndian>(8 + pool_size).unwrap();
        out.write_u16::<LittleEndian>(0x0001).unwrap();
        out.write_u16::<LittleEndian>(header_size as u16).unwrap();
        out.write_u32::<LittleEndian>(pool_size).unwrap();
        out.write_u32::<LittleEndian>(strings.len() as u32).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(strings_start).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        for offset in offsets {
            out.write_u32::<LittleEndian>(offset).unwrap();
        }
        out.extend_from_slice(&data);
        out
    }
}
