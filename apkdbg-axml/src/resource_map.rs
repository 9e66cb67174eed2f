//! The XML resource-map chunk: one 32-bit resource ID per leading
//! string-pool entry. Manifests without the chunk behave as if the map were
//! empty.

use std::io::{Cursor, Seek, SeekFrom};

use anyhow::Result;
use byteorder::{ReadBytesExt, LE};

use crate::chunks::Chunk;

pub(crate) struct ResourceMap {
    pub chunk: Option<Chunk>,
    pub len: u32,
}

impl ResourceMap {
    pub fn from_chunk(chunk: Option<Chunk>) -> Self {
        match chunk {
            Some(chunk) => Self {
                len: (chunk.header.chunk_size - chunk.header.header_size as u32) / 4,
                chunk: Some(chunk),
            },
            None => Self {
                chunk: None,
                len: 0,
            },
        }
    }

    /// The resource ID bound to string-pool index `index`, or `None` past the
    /// end of the map. The cursor position is preserved.
    pub fn read_id(&self, input: &mut Cursor<&[u8]>, index: u32) -> Result<Option<u32>> {
        let chunk = match &self.chunk {
            Some(chunk) => chunk,
            None => return Ok(None),
        };
        if index >= self.len {
            return Ok(None);
        }

        let saved = input.position();
        input.seek(SeekFrom::Start(chunk.data_start() + index as u64 * 4))?;
        let id = input.read_u32::<LE>()?;
        input.set_position(saved);

        Ok(Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::scan_chunks;
    use crate::fixtures;

    #[test]
    fn reads_ids_in_range() -> Result<()> {
        let data = fixtures::resource_map_chunk(&[0x01010001, 0x0101000F]);
        let mut input = Cursor::new(data.as_slice());
        let chunks = scan_chunks(&mut input)?;
        let map = ResourceMap::from_chunk(Some(chunks[0]));

        assert_eq!(map.len, 2);
        assert_eq!(map.read_id(&mut input, 0)?, Some(0x01010001));
        assert_eq!(map.read_id(&mut input, 1)?, Some(0x0101000F));
        assert_eq!(map.read_id(&mut input, 2)?, None);
        Ok(())
    }

    #[test]
    fn absent_chunk_acts_as_empty_map() -> Result<()> {
        let map = ResourceMap::from_chunk(None);
        let data = [0u8; 0];
        let mut input = Cursor::new(&data[..]);

        assert_eq!(map.len, 0);
        assert_eq!(map.read_id(&mut input, 0)?, None);
        Ok(())
    }
}
