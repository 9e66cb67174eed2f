//! The two patching strategies over a scanned manifest.
//!
//! When the `<application>` element already carries a debuggable attribute,
//! only its 4-byte data word changes and the file is otherwise copied
//! verbatim. Otherwise the whole file is rebuilt: the `debuggable` string is
//! inserted into the pool, its resource ID is appended to the resource map
//! (synthesising the chunk when the manifest has none), a new attribute is
//! inserted into the element in resource-ID order, and every string
//! reference at or past the insertion index moves up by one.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use log::{debug, info};

use crate::chunks::{
    scan_chunks, Chunk, ChunkHeader, CHUNK_CDATA, CHUNK_END_ELEMENT, CHUNK_END_NAMESPACE,
    CHUNK_LAST_XML, CHUNK_RESOURCE_MAP, CHUNK_START_ELEMENT, CHUNK_START_NAMESPACE,
    CHUNK_STRING_POOL, CHUNK_XML, COMMON_HEADER_LEN,
};
use crate::element::{
    decode_attributes, find_application, find_debuggable_attribute, AttributeRecord, ATTRIBUTE_LEN,
};
use crate::resource_map::ResourceMap;
use crate::string_pool::StringPool;
use crate::{ANDROID_NS_URI, DEBUGGABLE_RES_ID, NO_STRING, TRUE_DATA, TYPE_BOOLEAN, TYPE_STRING};

// The encoded forms of the inserted "debuggable" pool entry.
const DEBUGGABLE_UTF8: [u8; 12] = [
    10, b'd', b'e', b'b', b'u', b'g', b'g', b'a', b'b', b'l', b'e', 0,
];
const DEBUGGABLE_UTF16: [u8; 24] = [
    10, 0, b'd', 0, b'e', 0, b'b', 0, b'u', 0, b'g', 0, b'g', 0, b'a', 0, b'b', 0, b'l', 0, b'e',
    0, 0, 0,
];

/// Reads an AXML manifest from `input` and writes the patched manifest to
/// `output`. Streaming sources are buffered: patching needs two passes plus
/// random seeks.
pub fn patch_manifest(mut input: impl Read, mut output: impl Write) -> Result<()> {
    let mut data = Vec::new();
    input
        .read_to_end(&mut data)
        .context("Reading manifest into memory")?;

    let patched = patch_manifest_bytes(&data)?;
    output
        .write_all(&patched)
        .context("Writing patched manifest")?;
    Ok(())
}

/// File-backed convenience around [`patch_manifest`].
pub fn patch_manifest_file(path_in: impl AsRef<Path>, path_out: impl AsRef<Path>) -> Result<()> {
    let data = std::fs::read(path_in.as_ref()).context("Reading manifest file")?;
    let patched = patch_manifest_bytes(&data)?;
    std::fs::write(path_out.as_ref(), patched).context("Writing patched manifest file")?;
    Ok(())
}

/// Patches an in-memory manifest, returning the new file contents. The input
/// buffer is never modified.
pub fn patch_manifest_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut input = Cursor::new(data);

    let file_header = ChunkHeader::read(&mut input).context("Reading file header")?;
    if file_header.header_size as u32 != COMMON_HEADER_LEN {
        bail!(
            "Malformed file header: header size {} is not {COMMON_HEADER_LEN}",
            file_header.header_size
        );
    }
    if file_header.type_ != CHUNK_XML {
        bail!(
            "Malformed file header: type {:#06x} is not an XML chunk",
            file_header.type_
        );
    }

    let chunks = scan_chunks(&mut input)?;

    let mut string_pool_idx = None;
    let mut resource_map_idx = None;
    for (index, chunk) in chunks.iter().enumerate() {
        match chunk.header.type_ {
            CHUNK_STRING_POOL => {
                if string_pool_idx.is_some() {
                    bail!("More than one string pool chunk");
                }
                string_pool_idx = Some(index);
            }
            CHUNK_RESOURCE_MAP => {
                if resource_map_idx.is_some() {
                    bail!("More than one resource map chunk");
                }
                resource_map_idx = Some(index);
            }
            _ => {}
        }
    }
    let string_pool_idx = string_pool_idx.ok_or_else(|| anyhow!("No string pool chunk"))?;

    let pool = StringPool::decode(&mut input, chunks[string_pool_idx])
        .context("Decoding string pool header")?;
    let map = ResourceMap::from_chunk(resource_map_idx.map(|index| chunks[index]));

    let application_idx = find_application(&mut input, &chunks, &pool)?;
    debug!(
        "Found application element at offset {}",
        chunks[application_idx].start_offset
    );
    let attributes = decode_attributes(&mut input, &chunks[application_idx])
        .context("Decoding application attributes")?;

    let mut output = Vec::with_capacity(data.len() + 48);
    match find_debuggable_attribute(&mut input, &attributes, &pool, &map)? {
        Some(index) => {
            info!("Application already declares debuggable, overwriting its value");
            patch_in_place(data, &attributes[index], &mut output);
        }
        None => {
            info!("No debuggable attribute present, rebuilding the manifest");
            rebuild(
                data,
                &file_header,
                &chunks,
                &pool,
                &map,
                string_pool_idx,
                resource_map_idx,
                application_idx,
                &mut output,
            )?;
        }
    }
    Ok(output)
}

/// Fast path: the file is copied unchanged apart from the existing
/// attribute's data word. No size or offset moves.
fn patch_in_place(data: &[u8], attribute: &AttributeRecord, output: &mut Vec<u8>) {
    let value_offset = attribute.start_offset as usize + 16;
    output.extend_from_slice(&data[..value_offset]);
    output.extend_from_slice(&TRUE_DATA.to_le_bytes());
    output.extend_from_slice(&data[value_offset + 4..]);
}

/// Slow path: every chunk is re-emitted in order, growing the pool, the
/// resource map and the application element.
#[allow(clippy::too_many_arguments)]
fn rebuild(
    data: &[u8],
    file_header: &ChunkHeader,
    chunks: &[Chunk],
    pool: &StringPool,
    map: &ResourceMap,
    string_pool_idx: usize,
    resource_map_idx: Option<usize>,
    application_idx: usize,
    out: &mut Vec<u8>,
) -> Result<()> {
    let mut input = Cursor::new(data);

    let android_ns = pool
        .find_index(&mut input, ANDROID_NS_URI)?
        .ok_or_else(|| anyhow!("Android namespace URI not found in string pool"))?;

    // The new string lands immediately after the last resource-mapped pool
    // entry, so its resource ID appends cleanly to the map.
    let insert_index = map.len;
    let android_ns = shift_ref(android_ns, insert_index);
    debug!("Inserting the debuggable string at pool index {insert_index}");

    let encoded: &[u8] = if pool.utf8 {
        &DEBUGGABLE_UTF8
    } else {
        &DEBUGGABLE_UTF16
    };
    let mut total_growth = encoded.len() as u32 + 4 + 4 + ATTRIBUTE_LEN;
    if map.chunk.is_none() {
        total_growth += COMMON_HEADER_LEN;
    }

    ChunkHeader {
        chunk_size: file_header.chunk_size + total_growth,
        ..*file_header
    }
    .write(out)?;

    for (index, chunk) in chunks.iter().enumerate() {
        if index == string_pool_idx {
            rewrite_string_pool(&mut input, pool, insert_index, encoded, out)?;
            if resource_map_idx.is_none() {
                inject_resource_map(out)?;
            }
        } else if Some(index) == resource_map_idx {
            rewrite_resource_map(&mut input, chunk, out)?;
        } else if index == application_idx {
            rewrite_application(&mut input, chunk, map, android_ns, insert_index, out)?;
        } else {
            rewrite_chunk(&mut input, chunk, insert_index, out)?;
        }
    }
    Ok(())
}

/// The single shift rule: references at or past the insertion index move up
/// by one, the no-string sentinel never moves.
fn shift_ref(reference: u32, insert_index: u32) -> u32 {
    if reference != NO_STRING && reference >= insert_index {
        reference + 1
    } else {
        reference
    }
}

fn rewrite_string_ref(
    input: &mut Cursor<&[u8]>,
    out: &mut Vec<u8>,
    insert_index: u32,
) -> Result<()> {
    let reference = input.read_u32::<LE>()?;
    out.write_u32::<LE>(shift_ref(reference, insert_index))?;
    Ok(())
}

/// Copies `len` bytes from the current position of `input` to `out`.
fn copy_bytes(input: &mut Cursor<&[u8]>, out: &mut Vec<u8>, len: u64) -> Result<()> {
    let start = input.position() as usize;
    let end = start
        .checked_add(len as usize)
        .filter(|end| *end <= input.get_ref().len())
        .ok_or_else(|| anyhow!("Malformed chunk: copy of {len} bytes runs past the end"))?;
    out.extend_from_slice(&input.get_ref()[start..end]);
    input.set_position(end as u64);
    Ok(())
}

/// Copies from the current position up to the absolute offset `end`.
fn copy_to(input: &mut Cursor<&[u8]>, out: &mut Vec<u8>, end: u64) -> Result<()> {
    let len = end.checked_sub(input.position()).ok_or_else(|| {
        anyhow!(
            "Malformed chunk: offset {end:#x} lies before current position {:#x}",
            input.position()
        )
    })?;
    copy_bytes(input, out, len)
}

/// Line number is copied, the comment reference shifts.
fn rewrite_node_header(
    input: &mut Cursor<&[u8]>,
    out: &mut Vec<u8>,
    insert_index: u32,
) -> Result<()> {
    copy_bytes(input, out, 4)?;
    rewrite_string_ref(input, out, insert_index)
}

fn rewrite_string_pool(
    input: &mut Cursor<&[u8]>,
    pool: &StringPool,
    insert_index: u32,
    encoded: &[u8],
    out: &mut Vec<u8>,
) -> Result<()> {
    let chunk = &pool.chunk;
    let growth = encoded.len() as u32;

    ChunkHeader {
        chunk_size: chunk.header.chunk_size + growth + 4,
        ..chunk.header
    }
    .write(out)?;
    out.write_u32::<LE>(pool.string_count + 1)?;
    out.write_u32::<LE>(pool.style_count)?;
    out.write_u32::<LE>(pool.flags)?;
    out.write_u32::<LE>(pool.strings_start + 4)?;
    out.write_u32::<LE>(if pool.style_count > 0 {
        pool.styles_start + 4 + growth
    } else {
        0
    })?;

    // Offset table: entries before the insertion point are unchanged, the
    // new entry takes over the offset it displaces, everything after moves
    // up by the encoded length.
    input.seek(SeekFrom::Start(
        chunk.start_offset + chunk.header.header_size as u64,
    ))?;
    copy_bytes(input, out, insert_index as u64 * 4)?;
    let insert_offset = if insert_index < pool.string_count {
        let displaced = input.read_u32::<LE>()?;
        out.write_u32::<LE>(displaced)?;
        out.write_u32::<LE>(displaced + growth)?;
        for _ in insert_index + 1..pool.string_count {
            let offset = input.read_u32::<LE>()?;
            out.write_u32::<LE>(offset + growth)?;
        }
        displaced
    } else {
        // Every pool entry is resource-mapped: append at the end of the blob.
        let blob_end = if pool.style_count > 0 {
            pool.styles_start
        } else {
            chunk.header.chunk_size
        };
        let offset = blob_end - pool.strings_start;
        out.write_u32::<LE>(offset)?;
        offset
    };

    // The style offset table is unaffected by the string insertion.
    copy_bytes(input, out, pool.style_count as u64 * 4)?;

    // Padding between the offset tables and the string blob, if any.
    copy_to(input, out, chunk.start_offset + pool.strings_start as u64)?;

    // Blob up to the insertion point, the new entry, then the rest.
    copy_bytes(input, out, insert_offset as u64)?;
    out.extend_from_slice(encoded);

    if pool.style_count > 0 {
        copy_to(input, out, chunk.start_offset + pool.styles_start as u64)?;
        // Each 12-byte style record leads with a string reference.
        for _ in 0..pool.style_count {
            rewrite_string_ref(input, out, insert_index)?;
            copy_bytes(input, out, 8)?;
        }
    }
    copy_to(input, out, chunk.end())
}

fn rewrite_resource_map(input: &mut Cursor<&[u8]>, chunk: &Chunk, out: &mut Vec<u8>) -> Result<()> {
    ChunkHeader {
        chunk_size: chunk.header.chunk_size + 4,
        ..chunk.header
    }
    .write(out)?;
    input.seek(SeekFrom::Start(chunk.start_offset + COMMON_HEADER_LEN as u64))?;
    copy_to(input, out, chunk.end())?;
    out.write_u32::<LE>(DEBUGGABLE_RES_ID)?;
    Ok(())
}

/// A fresh single-entry resource map, emitted right after the string pool of
/// manifests that had none.
fn inject_resource_map(out: &mut Vec<u8>) -> Result<()> {
    ChunkHeader {
        type_: CHUNK_RESOURCE_MAP,
        header_size: COMMON_HEADER_LEN as u16,
        chunk_size: COMMON_HEADER_LEN + 4,
    }
    .write(out)?;
    out.write_u32::<LE>(DEBUGGABLE_RES_ID)?;
    Ok(())
}

fn write_debuggable_attribute(out: &mut Vec<u8>, android_ns: u32, name: u32) -> Result<()> {
    out.write_u32::<LE>(android_ns)?;
    out.write_u32::<LE>(name)?;
    out.write_u32::<LE>(NO_STRING)?; // no raw value
    out.write_u16::<LE>(8)?; // typed value size
    out.write_u8(0)?; // res0
    out.write_u8(TYPE_BOOLEAN)?;
    out.write_u32::<LE>(TRUE_DATA)?;
    Ok(())
}

/// Rewrites one attribute record, shifting its ns, name, rawValue and (for
/// string typed values) data references.
fn rewrite_attribute(
    input: &mut Cursor<&[u8]>,
    out: &mut Vec<u8>,
    insert_index: u32,
) -> Result<()> {
    rewrite_string_ref(input, out, insert_index)?; // ns
    rewrite_string_ref(input, out, insert_index)?; // name
    rewrite_string_ref(input, out, insert_index)?; // raw value

    let size = input.read_u16::<LE>()?;
    let res0 = input.read_u8()?;
    let data_type = input.read_u8()?;
    out.write_u16::<LE>(size)?;
    out.write_u8(res0)?;
    out.write_u8(data_type)?;

    if data_type == TYPE_STRING {
        rewrite_string_ref(input, out, insert_index)?;
    } else {
        copy_bytes(input, out, 4)?;
    }
    Ok(())
}

/// Rewrites the application element, inserting the new attribute at its
/// sorted position. Attributes within an element are ordered by the
/// resource ID of their name; names without one sort after all that have
/// one.
fn rewrite_application(
    input: &mut Cursor<&[u8]>,
    chunk: &Chunk,
    map: &ResourceMap,
    android_ns: u32,
    insert_index: u32,
    out: &mut Vec<u8>,
) -> Result<()> {
    input.seek(SeekFrom::Start(chunk.start_offset + COMMON_HEADER_LEN as u64))?;
    ChunkHeader {
        chunk_size: chunk.header.chunk_size + ATTRIBUTE_LEN,
        ..chunk.header
    }
    .write(out)?;

    rewrite_node_header(input, out, insert_index)?;
    rewrite_string_ref(input, out, insert_index)?; // ns
    rewrite_string_ref(input, out, insert_index)?; // name

    let attribute_start = input.read_u16::<LE>()?;
    let attribute_size = input.read_u16::<LE>()?;
    let attribute_count = input.read_u16::<LE>()?;
    out.write_u16::<LE>(attribute_start)?;
    out.write_u16::<LE>(attribute_size)?;
    out.write_u16::<LE>(attribute_count + 1)?;

    // The id/class/style attribute indices are 1-based positions of
    // attributes that always sort before debuggable, so they do not move.
    copy_bytes(input, out, 6)?;
    copy_to(input, out, chunk.data_start() + attribute_start as u64)?;

    let mut inserted = false;
    for _ in 0..attribute_count {
        let saved = input.position();
        input.seek(SeekFrom::Current(4))?; // ns
        let name = input.read_u32::<LE>()?;
        input.set_position(saved);

        if !inserted && sorts_after_debuggable(map.read_id(input, name)?) {
            write_debuggable_attribute(out, android_ns, insert_index)?;
            inserted = true;
        }
        rewrite_attribute(input, out, insert_index)?;
    }
    if !inserted {
        write_debuggable_attribute(out, android_ns, insert_index)?;
    }

    copy_to(input, out, chunk.end())
}

/// Names with no resource ID sort after every name that has one.
fn sorts_after_debuggable(resource_id: Option<u32>) -> bool {
    match resource_id {
        Some(id) => id > DEBUGGABLE_RES_ID,
        None => true,
    }
}

/// Rewrites the body of a start element other than `<application>`: the
/// attribute array keeps its shape, only string references shift.
fn rewrite_element_body(
    input: &mut Cursor<&[u8]>,
    chunk: &Chunk,
    insert_index: u32,
    out: &mut Vec<u8>,
) -> Result<()> {
    rewrite_string_ref(input, out, insert_index)?; // ns
    rewrite_string_ref(input, out, insert_index)?; // name

    let attribute_start = input.read_u16::<LE>()?;
    let attribute_size = input.read_u16::<LE>()?;
    let attribute_count = input.read_u16::<LE>()?;
    out.write_u16::<LE>(attribute_start)?;
    out.write_u16::<LE>(attribute_size)?;
    out.write_u16::<LE>(attribute_count)?;
    copy_bytes(input, out, 6)?; // id, class and style indices

    copy_to(input, out, chunk.data_start() + attribute_start as u64)?;
    for _ in 0..attribute_count {
        rewrite_attribute(input, out, insert_index)?;
    }
    Ok(())
}

/// Rewrites any chunk other than the pool, the resource map and the
/// application element. XML node chunks have their string references
/// shifted; everything else is copied verbatim.
fn rewrite_chunk(
    input: &mut Cursor<&[u8]>,
    chunk: &Chunk,
    insert_index: u32,
    out: &mut Vec<u8>,
) -> Result<()> {
    input.seek(SeekFrom::Start(chunk.start_offset))?;

    if !(CHUNK_START_NAMESPACE..=CHUNK_LAST_XML).contains(&chunk.header.type_) {
        return copy_to(input, out, chunk.end());
    }

    copy_bytes(input, out, COMMON_HEADER_LEN as u64)?;
    rewrite_node_header(input, out, insert_index)?;
    match chunk.header.type_ {
        CHUNK_START_NAMESPACE | CHUNK_END_NAMESPACE => {
            rewrite_string_ref(input, out, insert_index)?; // prefix
            rewrite_string_ref(input, out, insert_index)?; // uri
        }
        CHUNK_START_ELEMENT => rewrite_element_body(input, chunk, insert_index, out)?,
        CHUNK_END_ELEMENT => {
            rewrite_string_ref(input, out, insert_index)?; // ns
            rewrite_string_ref(input, out, insert_index)?; // name
        }
        CHUNK_CDATA => {
            // The data reference shifts, the 8-byte typed value does not.
            rewrite_string_ref(input, out, insert_index)?;
        }
        _ => {}
    }
    copy_to(input, out, chunk.end())
}
