//! Decoding of the AXML string-pool chunk.
//!
//! The pool maps dense indices to strings stored in a single blob, with one
//! 32-bit blob offset per string. Strings are either UTF-8 or UTF-16 encoded
//! depending on the pool flags, each with a length prefix and a NUL
//! terminator in the encoding's unit width.

use std::io::{Cursor, Read, Seek, SeekFrom};

use anyhow::{bail, Context, Result};
use byteorder::{ReadBytesExt, LE};

use crate::chunks::{Chunk, COMMON_HEADER_LEN};
use crate::UTF8_FLAG;

/// Decoded header of the string-pool chunk. String contents stay in the
/// input buffer and are read on demand.
pub(crate) struct StringPool {
    pub chunk: Chunk,
    pub string_count: u32,
    pub style_count: u32,
    pub flags: u32,
    pub strings_start: u32,
    pub styles_start: u32,
    pub utf8: bool,
}

impl StringPool {
    pub fn decode(input: &mut Cursor<&[u8]>, chunk: Chunk) -> Result<Self> {
        input.seek(SeekFrom::Start(chunk.start_offset + COMMON_HEADER_LEN as u64))?;
        let string_count = input.read_u32::<LE>()?;
        let style_count = input.read_u32::<LE>()?;
        let flags = input.read_u32::<LE>()?;
        let strings_start = input.read_u32::<LE>()?;
        let styles_start = input.read_u32::<LE>()?;

        Ok(Self {
            chunk,
            string_count,
            style_count,
            flags,
            strings_start,
            styles_start,
            utf8: flags & UTF8_FLAG != 0,
        })
    }

    /// Reads the string at `index`, or `None` when the reference is
    /// `0xFFFFFFFF` (or otherwise out of range). The cursor position is
    /// preserved.
    pub fn read_string(&self, input: &mut Cursor<&[u8]>, index: u32) -> Result<Option<String>> {
        if index & 0x8000_0000 != 0 || index >= self.string_count {
            return Ok(None);
        }
        let saved = input.position();

        let offset_table = self.chunk.start_offset + self.chunk.header.header_size as u64;
        input.seek(SeekFrom::Start(offset_table + index as u64 * 4))?;
        let relative = input.read_u32::<LE>()?;

        input.seek(SeekFrom::Start(
            self.chunk.start_offset + self.strings_start as u64 + relative as u64,
        ))?;
        let text = if self.utf8 {
            decode_utf8(input)
        } else {
            decode_utf16(input)
        }
        .with_context(|| format!("Decoding string at pool index {index}"))?;

        input.set_position(saved);
        Ok(Some(text))
    }

    /// Finds the index of the pool entry whose content equals `literal`.
    pub fn find_index(&self, input: &mut Cursor<&[u8]>, literal: &str) -> Result<Option<u32>> {
        for index in 0..self.string_count {
            if self.read_string(input, index)?.as_deref() == Some(literal) {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }
}

fn decode_utf8(input: &mut Cursor<&[u8]>) -> Result<String> {
    // Two length prefixes: the UTF-16 unit count, then the byte count.
    let _utf16_units = read_utf8_len(input)?;
    let byte_len = read_utf8_len(input)? as usize;

    let mut buffer = vec![0u8; byte_len];
    input.read_exact(&mut buffer)?;
    if input.read_u8()? != 0 {
        bail!("Malformed string: missing NUL terminator");
    }

    Ok(std::str::from_utf8(&buffer)
        .context("Malformed string: invalid UTF-8")?
        .to_owned())
}

fn decode_utf16(input: &mut Cursor<&[u8]>) -> Result<String> {
    let unit_len = read_utf16_len(input)? as usize;

    let mut units = Vec::with_capacity(unit_len);
    for _ in 0..unit_len {
        units.push(input.read_u16::<LE>()?);
    }
    if input.read_u16::<LE>()? != 0 {
        bail!("Malformed string: missing NUL terminator");
    }

    String::from_utf16(&units).context("Malformed string: invalid UTF-16")
}

// Length prefixes are one unit, or two when the first unit's high bit is
// set, combined as `((first & ~highbit) << bits) | second`.

fn read_utf8_len(input: &mut impl Read) -> Result<u16> {
    let first = input.read_u8()? as u16;
    Ok(if first & 0x80 != 0 {
        ((first & 0x7F) << 8) | input.read_u8()? as u16
    } else {
        first
    })
}

fn read_utf16_len(input: &mut impl Read) -> Result<u32> {
    let first = input.read_u16::<LE>()? as u32;
    Ok(if first & 0x8000 != 0 {
        ((first & 0x7FFF) << 16) | input.read_u16::<LE>()? as u32
    } else {
        first
    })
}
