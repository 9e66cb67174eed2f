//! Minimal ZIP (APK) plumbing for manifest replacement.
//!
//! The archive is never modified in place: [`ZipArchive::write_replacing`]
//! emits a complete new archive in which exactly one entry is re-encoded
//! from fresh contents and every other entry's compressed data is carried
//! over untouched. Alignment and signing are left to external tooling.

use std::io::{BufReader, Read, Seek, SeekFrom, Write};

use anyhow::{anyhow, bail, Context, Result};
use byteorder::{ReadBytesExt, LE};
use crc::{Algorithm, Crc};
use libflate::deflate;
use log::debug;

use self::data::{CentDirHeader, EndOfCentDir, LocalFileHeader};

mod data;

/// The CRC-32 algorithm used by the ZIP file format.
pub const ZIP_CRC: Crc<u32> = Crc::<u32>::new(&Algorithm {
    width: 32,
    poly: 0x04c11db7,
    init: 0xffffffff,
    refin: true,
    refout: true,
    xorout: 0xffffffff,
    check: 0xcbf43926,
    residue: 0xdebb20e3,
});

/// Calculates the ZIP CRC-32 hash of a slice.
pub fn crc_bytes(bytes: &[u8]) -> u32 {
    let mut digest = ZIP_CRC.digest();
    digest.update(bytes);
    digest.finalize()
}

// Entries with data descriptors declare their sizes after the data; the
// rewriter always writes sizes up front, so the flag is cleared on output.
const DATA_DESCRIPTOR_FLAG: u16 = 0x0008;

/// The compression method of an entry, which may be an unsupported method.
#[derive(Copy, Clone, PartialEq, Eq)]
pub enum EntryCompression {
    Deflate,
    Store,
    Unsupported(u16),
}

impl From<u16> for EntryCompression {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::Store,
            8 => Self::Deflate,
            other => Self::Unsupported(other),
        }
    }
}

impl From<EntryCompression> for u16 {
    fn from(value: EntryCompression) -> u16 {
        match value {
            EntryCompression::Store => 0,
            EntryCompression::Deflate => 8,
            EntryCompression::Unsupported(other) => other,
        }
    }
}

/// A read-only view of a ZIP archive, with entries kept in the order their
/// local headers appear in the file.
pub struct ZipArchive<T: Read + Seek> {
    file: T,
    entries: Vec<CentDirHeader>,
    comment: Vec<u8>,
}

impl<T: Read + Seek> ZipArchive<T> {
    /// Opens a ZIP archive from a readable stream by locating the
    /// end-of-central-directory record and reading the central directory.
    pub fn open(mut file: T) -> Result<Self> {
        let (entries, comment) = {
            let mut reader = BufReader::new(&mut file);

            let archive_size = reader.seek(SeekFrom::End(0))?;
            if archive_size < EndOfCentDir::MIN_SIZE {
                bail!("File too small to be a valid ZIP archive");
            }

            // The EOCD ends with a variable-length comment, so scan
            // backwards over every possible comment length until the
            // signature and the contained length agree.
            let empty_comment_pos = archive_size - EndOfCentDir::MIN_SIZE;
            let max_comment_len = std::cmp::min(empty_comment_pos, u16::MAX as u64);

            let mut found_eocd_pos = None;
            for comment_len in 0..=max_comment_len {
                let eocd_pos = empty_comment_pos - comment_len;
                reader.seek(SeekFrom::Start(eocd_pos))?;
                if reader.read_u32::<LE>()? != EndOfCentDir::SIGNATURE {
                    continue;
                }

                reader.seek(SeekFrom::Start(
                    eocd_pos + EndOfCentDir::COMMENT_LENGTH_FIELD_OFFSET,
                ))?;
                if reader.read_u16::<LE>()? as u64 == comment_len {
                    found_eocd_pos = Some(eocd_pos);
                    break;
                }
            }
            let eocd_pos = found_eocd_pos.ok_or_else(|| anyhow!("No EOCD found in archive"))?;

            reader.seek(SeekFrom::Start(eocd_pos))?;
            let eocd = EndOfCentDir::read(&mut reader).context("Invalid EOCD")?;

            reader.seek(SeekFrom::Start(eocd.cent_dir_offset as u64))?;
            let mut entries = Vec::with_capacity(eocd.cent_dir_records as usize);
            for _ in 0..eocd.cent_dir_records {
                entries.push(CentDirHeader::read(&mut reader).context("Invalid CD file header")?);
            }

            // Central directory order need not match file order; the
            // rewriter preserves the physical layout.
            entries.sort_by_key(|record| record.local_header_offset);

            (entries, eocd.comment)
        };

        Ok(Self {
            file,
            entries,
            comment,
        })
    }

    /// Returns an iterator over the entry names within the archive.
    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|record| record.file_name.as_str())
    }

    /// Returns true if and only if an entry exists with name `name`.
    pub fn contains_entry(&self, name: &str) -> bool {
        self.entries.iter().any(|record| record.file_name == name)
    }

    fn entry(&self, name: &str) -> Result<&CentDirHeader> {
        self.entries
            .iter()
            .find(|record| record.file_name == name)
            .ok_or_else(|| anyhow!("No entry named {name} in archive"))
    }

    /// Reads and decompresses the contents of the entry named `name`.
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>> {
        let record = self.entry(name)?.clone();

        let mut reader = BufReader::new(&mut self.file);
        reader.seek(SeekFrom::Start(record.local_header_offset as u64))?;
        LocalFileHeader::read(&mut reader).context("Invalid local file header")?;

        // Sizes come from the central directory: local headers of entries
        // with data descriptors have them zeroed.
        let mut compressed = (&mut reader).take(record.compressed_len as u64);
        let mut contents = Vec::with_capacity(record.uncompressed_len as usize);
        match record.compression_method {
            EntryCompression::Deflate => {
                let mut decoder = deflate::Decoder::new(&mut compressed);
                decoder
                    .read_to_end(&mut contents)
                    .context("Decompressing entry")?;
            }
            EntryCompression::Store => {
                compressed.read_to_end(&mut contents)?;
            }
            EntryCompression::Unsupported(method) => {
                bail!("Compression method `{method}` not supported for reading")
            }
        }

        Ok(contents)
    }

    /// Writes a complete archive to `output` in which the entry named
    /// `replace_name` is re-encoded from `contents` and every other entry is
    /// carried over with its compressed data untouched.
    pub fn write_replacing(
        &mut self,
        output: &mut impl Write,
        replace_name: &str,
        contents: &[u8],
    ) -> Result<()> {
        self.entry(replace_name)?;

        let mut offset: u64 = 0;
        let mut written = Vec::with_capacity(self.entries.len());

        for index in 0..self.entries.len() {
            let mut record = self.entries[index].clone();

            let (header, data) = if record.file_name == replace_name {
                debug!("Replacing entry {replace_name}");
                let compressed = deflate_bytes(contents)?;
                record.crc32 = crc_bytes(contents);
                record.compressed_len = compressed
                    .len()
                    .try_into()
                    .context("Compressed entry too large")?;
                record.uncompressed_len =
                    contents.len().try_into().context("Entry too large")?;
                record.compression_method = EntryCompression::Deflate;
                record.flags &= !DATA_DESCRIPTOR_FLAG;

                (LocalFileHeader::from_cent_dir(&record, Vec::new()), compressed)
            } else {
                let mut reader = BufReader::new(&mut self.file);
                reader.seek(SeekFrom::Start(record.local_header_offset as u64))?;
                let original = LocalFileHeader::read(&mut reader).context("Invalid local file header")?;

                let mut data = vec![0u8; record.compressed_len as usize];
                reader.read_exact(&mut data).context("Reading entry data")?;

                record.flags &= !DATA_DESCRIPTOR_FLAG;
                (
                    LocalFileHeader::from_cent_dir(&record, original.extra_field),
                    data,
                )
            };

            record.local_header_offset = offset
                .try_into()
                .context("Archive too large for 32-bit offsets")?;
            header.write(output)?;
            output.write_all(&data)?;
            offset += header.byte_len() + data.len() as u64;

            written.push(record);
        }

        let cent_dir_offset: u32 = offset
            .try_into()
            .context("Archive too large for 32-bit offsets")?;
        let mut cent_dir_size: u64 = 0;
        for record in &written {
            record.write(output)?;
            cent_dir_size += record.byte_len();
        }

        EndOfCentDir {
            cent_dir_records: written
                .len()
                .try_into()
                .context("Too many entries in archive")?,
            cent_dir_size: cent_dir_size
                .try_into()
                .context("Central directory too large")?,
            cent_dir_offset,
            comment: self.comment.clone(),
        }
        .write(output)?;

        Ok(())
    }
}

fn deflate_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = deflate::Encoder::new(Vec::new());
    encoder.write_all(data)?;
    Ok(encoder.finish().into_result()?)
}
