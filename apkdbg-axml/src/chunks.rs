//! Scanning of the top-level chunk sequence of an AXML stream.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use anyhow::{bail, Result};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use log::warn;

/// Length of the common header every chunk begins with.
pub(crate) const COMMON_HEADER_LEN: u32 = 8;

pub(crate) const CHUNK_STRING_POOL: u16 = 0x0001;
pub(crate) const CHUNK_XML: u16 = 0x0003;
pub(crate) const CHUNK_START_NAMESPACE: u16 = 0x0100;
pub(crate) const CHUNK_END_NAMESPACE: u16 = 0x0101;
pub(crate) const CHUNK_START_ELEMENT: u16 = 0x0102;
pub(crate) const CHUNK_END_ELEMENT: u16 = 0x0103;
pub(crate) const CHUNK_CDATA: u16 = 0x0104;
pub(crate) const CHUNK_LAST_XML: u16 = 0x017F;
pub(crate) const CHUNK_RESOURCE_MAP: u16 = 0x0180;

/// The common chunk header: 16-bit type, 16-bit header size and the total
/// chunk size including the header itself.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChunkHeader {
    pub type_: u16,
    pub header_size: u16,
    pub chunk_size: u32,
}

impl ChunkHeader {
    pub fn read(data: &mut impl Read) -> Result<Self> {
        Ok(Self {
            type_: data.read_u16::<LE>()?,
            header_size: data.read_u16::<LE>()?,
            chunk_size: data.read_u32::<LE>()?,
        })
    }

    pub fn write(&self, data: &mut impl Write) -> Result<()> {
        data.write_u16::<LE>(self.type_)?;
        data.write_u16::<LE>(self.header_size)?;
        data.write_u32::<LE>(self.chunk_size)?;
        Ok(())
    }
}

/// A top-level chunk located within the input buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Chunk {
    pub start_offset: u64,
    pub header: ChunkHeader,
}

impl Chunk {
    /// Offset of the first byte after the chunk-specific header fields.
    pub fn data_start(&self) -> u64 {
        self.start_offset + self.header.header_size as u64
    }

    /// Offset of the first byte after the chunk.
    pub fn end(&self) -> u64 {
        self.start_offset + self.header.chunk_size as u64
    }
}

/// Walks the chunk sequence from the current position to the end of the
/// buffer. A trailing fragment too short to hold a chunk header is dropped
/// with a warning, which some packers are known to produce.
pub(crate) fn scan_chunks(input: &mut Cursor<&[u8]>) -> Result<Vec<Chunk>> {
    let total_len = input.get_ref().len() as u64;
    let mut chunks = Vec::new();

    loop {
        let start_offset = input.position();
        let remaining = total_len - start_offset;
        if remaining == 0 {
            break;
        }
        if remaining < COMMON_HEADER_LEN as u64 {
            warn!("Skipping {remaining} trailing bytes after the last chunk");
            break;
        }

        let header = ChunkHeader::read(input)?;
        if header.chunk_size < header.header_size as u32
            || header.chunk_size < COMMON_HEADER_LEN
        {
            bail!(
                "Malformed chunk at offset {start_offset}: size {} is smaller than its header",
                header.chunk_size
            );
        }
        let end = start_offset + header.chunk_size as u64;
        if end > total_len {
            bail!("Malformed chunk at offset {start_offset}: chunk runs past the end of the stream");
        }

        input.seek(SeekFrom::Start(end))?;
        chunks.push(Chunk {
            start_offset,
            header,
        });
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_bytes(type_: u16, header_size: u16, chunk_size: u32, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        ChunkHeader {
            type_,
            header_size,
            chunk_size,
        }
        .write(&mut out)
        .unwrap();
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn scans_consecutive_chunks() -> Result<()> {
        let mut data = chunk_bytes(CHUNK_STRING_POOL, 8, 12, &[0; 4]);
        data.extend(chunk_bytes(CHUNK_RESOURCE_MAP, 8, 16, &[0; 8]));

        let chunks = scan_chunks(&mut Cursor::new(data.as_slice()))?;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].header.type_, CHUNK_STRING_POOL);
        assert_eq!(chunks[1].start_offset, 12);
        assert_eq!(chunks[1].end(), 28);
        Ok(())
    }

    #[test]
    fn drops_trailing_fragment() -> Result<()> {
        let mut data = chunk_bytes(CHUNK_STRING_POOL, 8, 12, &[0; 4]);
        data.extend_from_slice(&[1, 2, 3]);

        let chunks = scan_chunks(&mut Cursor::new(data.as_slice()))?;
        assert_eq!(chunks.len(), 1);
        Ok(())
    }

    #[test]
    fn rejects_chunk_running_past_the_end() {
        let data = chunk_bytes(CHUNK_STRING_POOL, 8, 64, &[0; 4]);
        assert!(scan_chunks(&mut Cursor::new(data.as_slice())).is_err());
    }

    #[test]
    fn rejects_chunk_smaller_than_its_header() {
        let data = chunk_bytes(CHUNK_STRING_POOL, 16, 8, &[0; 8]);
        assert!(scan_chunks(&mut Cursor::new(data.as_slice())).is_err());
    }
}
