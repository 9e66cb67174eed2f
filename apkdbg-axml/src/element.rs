//! Locating the `<application>` start element and decoding its attributes.

use std::io::{Cursor, Seek, SeekFrom};

use anyhow::{anyhow, bail, Result};
use byteorder::{ReadBytesExt, LE};

use crate::chunks::{Chunk, CHUNK_START_ELEMENT};
use crate::resource_map::ResourceMap;
use crate::string_pool::StringPool;
use crate::{APPLICATION_STRING, DEBUGGABLE_RES_ID, DEBUGGABLE_STRING};

/// Size of one attribute record within a start element.
pub(crate) const ATTRIBUTE_LEN: u32 = 20;

/// One decoded 20-byte attribute record, together with its absolute offset
/// in the input buffer.
pub(crate) struct AttributeRecord {
    pub start_offset: u64,
    pub ns: u32,
    pub name: u32,
    pub raw_value: u32,
    pub size: u16,
    pub data_type: u8,
    pub data: u32,
}

/// Finds the index into `chunks` of the unique `<application>` start
/// element.
pub(crate) fn find_application(
    input: &mut Cursor<&[u8]>,
    chunks: &[Chunk],
    pool: &StringPool,
) -> Result<usize> {
    let mut found = None;
    for (index, chunk) in chunks.iter().enumerate() {
        if chunk.header.type_ != CHUNK_START_ELEMENT {
            continue;
        }

        // The element name follows the 4-byte namespace reference.
        input.seek(SeekFrom::Start(chunk.data_start() + 4))?;
        let name = input.read_u32::<LE>()?;
        if pool.read_string(input, name)?.as_deref() != Some(APPLICATION_STRING) {
            continue;
        }

        if found.is_some() {
            bail!("Multiple application elements in manifest");
        }
        found = Some(index);
    }

    found.ok_or_else(|| anyhow!("No application element in manifest"))
}

/// Decodes the attribute block of a start element.
pub(crate) fn decode_attributes(
    input: &mut Cursor<&[u8]>,
    element: &Chunk,
) -> Result<Vec<AttributeRecord>> {
    let data_start = element.data_start();

    // Skip the ns and name references to reach the attribute block header.
    input.seek(SeekFrom::Start(data_start + 8))?;
    let attribute_start = input.read_u16::<LE>()?;
    let attribute_size = input.read_u16::<LE>()?;
    let attribute_count = input.read_u16::<LE>()?;
    if attribute_size as u32 != ATTRIBUTE_LEN {
        bail!("Unexpected attribute size {attribute_size}, expected {ATTRIBUTE_LEN}");
    }

    input.seek(SeekFrom::Start(data_start + attribute_start as u64))?;
    let mut attributes = Vec::with_capacity(attribute_count as usize);
    for _ in 0..attribute_count {
        let start_offset = input.position();
        let ns = input.read_u32::<LE>()?;
        let name = input.read_u32::<LE>()?;
        let raw_value = input.read_u32::<LE>()?;
        let size = input.read_u16::<LE>()?;
        let _res0 = input.read_u8()?;
        let data_type = input.read_u8()?;
        let data = input.read_u32::<LE>()?;

        attributes.push(AttributeRecord {
            start_offset,
            ns,
            name,
            raw_value,
            size,
            data_type,
            data,
        });
    }

    Ok(attributes)
}

/// Finds the attribute whose name is the `debuggable` string AND whose name
/// index carries the debuggable resource ID. Matching by string alone is not
/// enough: Android ignores the attribute unless the resource ID agrees.
pub(crate) fn find_debuggable_attribute(
    input: &mut Cursor<&[u8]>,
    attributes: &[AttributeRecord],
    pool: &StringPool,
    map: &ResourceMap,
) -> Result<Option<usize>> {
    for (index, attribute) in attributes.iter().enumerate() {
        let name = pool.read_string(input, attribute.name)?;
        let resource_id = map.read_id(input, attribute.name)?;
        if name.as_deref() == Some(DEBUGGABLE_STRING) && resource_id == Some(DEBUGGABLE_RES_ID) {
            return Ok(Some(index));
        }
    }
    Ok(None)
}
