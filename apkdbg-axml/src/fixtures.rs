//! In-memory AXML fixtures for the test suites.

use byteorder::{WriteBytesExt, LE};

use crate::chunks::{
    ChunkHeader, CHUNK_CDATA, CHUNK_END_ELEMENT, CHUNK_END_NAMESPACE, CHUNK_RESOURCE_MAP,
    CHUNK_START_ELEMENT, CHUNK_START_NAMESPACE, CHUNK_STRING_POOL, CHUNK_XML,
};
use crate::{NO_STRING, UTF8_FLAG};

pub(crate) struct Attr {
    pub ns: u32,
    pub name: u32,
    pub raw_value: u32,
    pub data_type: u8,
    pub data: u32,
}

impl Attr {
    pub fn boolean(ns: u32, name: u32, value: bool) -> Self {
        Self {
            ns,
            name,
            raw_value: NO_STRING,
            data_type: 0x12,
            data: if value { 0xFFFFFFFF } else { 0 },
        }
    }

    pub fn string(ns: u32, name: u32, value: u32) -> Self {
        Self {
            ns,
            name,
            raw_value: value,
            data_type: 0x03,
            data: value,
        }
    }
}

/// Encodes one pool entry: length prefix(es), content, NUL terminator.
pub(crate) fn encode_string(utf8: bool, s: &str) -> Vec<u8> {
    let mut out = Vec::new();
    if utf8 {
        push_utf8_len(&mut out, s.encode_utf16().count());
        push_utf8_len(&mut out, s.len());
        out.extend_from_slice(s.as_bytes());
        out.push(0);
    } else {
        let units: Vec<u16> = s.encode_utf16().collect();
        push_utf16_len(&mut out, units.len());
        for unit in units {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out.extend_from_slice(&[0, 0]);
    }
    out
}

fn push_utf8_len(out: &mut Vec<u8>, len: usize) {
    assert!(len < 0x8000);
    if len >= 0x80 {
        out.push(0x80 | (len >> 8) as u8);
    }
    out.push((len & 0xFF) as u8);
}

fn push_utf16_len(out: &mut Vec<u8>, len: usize) {
    assert!(len < 0x8000_0000);
    if len >= 0x8000 {
        let first = 0x8000 | (len >> 16) as u16;
        out.extend_from_slice(&first.to_le_bytes());
    }
    out.extend_from_slice(&((len & 0xFFFF) as u16).to_le_bytes());
}

pub(crate) fn string_pool_chunk(utf8: bool, strings: &[&str]) -> Vec<u8> {
    let mut offsets = Vec::with_capacity(strings.len());
    let mut blob = Vec::new();
    for s in strings {
        offsets.push(blob.len() as u32);
        blob.extend_from_slice(&encode_string(utf8, s));
    }
    while blob.len() % 4 != 0 {
        blob.push(0);
    }

    let strings_start = 28 + 4 * strings.len() as u32;
    let mut out = Vec::new();
    ChunkHeader {
        type_: CHUNK_STRING_POOL,
        header_size: 28,
        chunk_size: strings_start + blob.len() as u32,
    }
    .write(&mut out)
    .unwrap();
    out.write_u32::<LE>(strings.len() as u32).unwrap();
    out.write_u32::<LE>(0).unwrap(); // style count
    out.write_u32::<LE>(if utf8 { UTF8_FLAG } else { 0 }).unwrap();
    out.write_u32::<LE>(strings_start).unwrap();
    out.write_u32::<LE>(0).unwrap(); // styles start
    for offset in offsets {
        out.write_u32::<LE>(offset).unwrap();
    }
    out.extend_from_slice(&blob);
    out
}

pub(crate) fn resource_map_chunk(ids: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    ChunkHeader {
        type_: CHUNK_RESOURCE_MAP,
        header_size: 8,
        chunk_size: 8 + 4 * ids.len() as u32,
    }
    .write(&mut out)
    .unwrap();
    for id in ids {
        out.write_u32::<LE>(*id).unwrap();
    }
    out
}

fn node_chunk(type_: u16, refs: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    ChunkHeader {
        type_,
        header_size: 16,
        chunk_size: 16 + 4 * refs.len() as u32,
    }
    .write(&mut out)
    .unwrap();
    out.write_u32::<LE>(1).unwrap(); // line number
    out.write_u32::<LE>(NO_STRING).unwrap(); // comment
    for reference in refs {
        out.write_u32::<LE>(*reference).unwrap();
    }
    out
}

pub(crate) fn start_namespace_chunk(prefix: u32, uri: u32) -> Vec<u8> {
    node_chunk(CHUNK_START_NAMESPACE, &[prefix, uri])
}

pub(crate) fn end_namespace_chunk(prefix: u32, uri: u32) -> Vec<u8> {
    node_chunk(CHUNK_END_NAMESPACE, &[prefix, uri])
}

pub(crate) fn end_element_chunk(ns: u32, name: u32) -> Vec<u8> {
    node_chunk(CHUNK_END_ELEMENT, &[ns, name])
}

pub(crate) fn start_element_chunk(ns: u32, name: u32, attrs: &[Attr]) -> Vec<u8> {
    let mut out = Vec::new();
    ChunkHeader {
        type_: CHUNK_START_ELEMENT,
        header_size: 16,
        chunk_size: 36 + 20 * attrs.len() as u32,
    }
    .write(&mut out)
    .unwrap();
    out.write_u32::<LE>(1).unwrap(); // line number
    out.write_u32::<LE>(NO_STRING).unwrap(); // comment
    out.write_u32::<LE>(ns).unwrap();
    out.write_u32::<LE>(name).unwrap();
    out.write_u16::<LE>(20).unwrap(); // attribute start
    out.write_u16::<LE>(20).unwrap(); // attribute size
    out.write_u16::<LE>(attrs.len() as u16).unwrap();
    out.write_u16::<LE>(0).unwrap(); // id index
    out.write_u16::<LE>(0).unwrap(); // class index
    out.write_u16::<LE>(0).unwrap(); // style index
    for attr in attrs {
        out.write_u32::<LE>(attr.ns).unwrap();
        out.write_u32::<LE>(attr.name).unwrap();
        out.write_u32::<LE>(attr.raw_value).unwrap();
        out.write_u16::<LE>(8).unwrap(); // size
        out.write_u8(0).unwrap(); // res0
        out.write_u8(attr.data_type).unwrap();
        out.write_u32::<LE>(attr.data).unwrap();
    }
    out
}

pub(crate) fn cdata_chunk(data_ref: u32) -> Vec<u8> {
    let mut out = Vec::new();
    ChunkHeader {
        type_: CHUNK_CDATA,
        header_size: 16,
        chunk_size: 28,
    }
    .write(&mut out)
    .unwrap();
    out.write_u32::<LE>(1).unwrap(); // line number
    out.write_u32::<LE>(NO_STRING).unwrap(); // comment
    out.write_u32::<LE>(data_ref).unwrap();
    out.write_u16::<LE>(8).unwrap(); // typed value size
    out.write_u8(0).unwrap(); // res0
    out.write_u8(0x03).unwrap(); // string typed value
    out.write_u32::<LE>(data_ref).unwrap();
    out
}

/// Wraps body chunks in the outer XML file chunk.
pub(crate) fn manifest(chunks: &[Vec<u8>]) -> Vec<u8> {
    let body_len: usize = chunks.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(8 + body_len);
    ChunkHeader {
        type_: CHUNK_XML,
        header_size: 8,
        chunk_size: (8 + body_len) as u32,
    }
    .write(&mut out)
    .unwrap();
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out
}
