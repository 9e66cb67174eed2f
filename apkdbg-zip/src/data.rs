//! The three ZIP records the archive rewriter needs: local file headers,
//! central directory headers and the end-of-central-directory record.

use std::io::{Read, Write};

use anyhow::{anyhow, Context, Result};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use super::EntryCompression;

// ZIP end of central directory record
#[derive(Clone)]
pub struct EndOfCentDir {
    pub cent_dir_records: u16,
    pub cent_dir_size: u32,
    pub cent_dir_offset: u32,
    pub comment: Vec<u8>,
}

// ZIP central directory record
#[derive(Clone)]
pub struct CentDirHeader {
    pub os_version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: EntryCompression,
    pub last_modified: u32,
    pub crc32: u32,
    pub compressed_len: u32,
    pub uncompressed_len: u32,

    pub internal_attrs: u16,
    pub external_attrs: u32,
    pub local_header_offset: u32,

    pub file_name: String,
    pub extra_field: Vec<u8>,
    pub comment: String,
}

// ZIP local file header record
#[derive(Clone)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: EntryCompression,
    pub last_modified: u32,
    pub crc32: u32,
    pub compressed_len: u32,
    pub uncompressed_len: u32,

    pub file_name: String,
    pub extra_field: Vec<u8>,
}

fn read_field(data: &mut impl Read, len: usize) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; len];
    data.read_exact(&mut buffer)?;
    Ok(buffer)
}

impl EndOfCentDir {
    pub const SIGNATURE: u32 = 0x06054b50;
    /// Record length with an empty comment.
    pub const MIN_SIZE: u64 = 22;
    pub const COMMENT_LENGTH_FIELD_OFFSET: u64 = 20;

    pub fn read(data: &mut impl Read) -> Result<Self> {
        if data.read_u32::<LE>()? != Self::SIGNATURE {
            return Err(anyhow!("Invalid EOCD signature"));
        }

        let disk_num = data.read_u16::<LE>()?;
        let start_of_cd_disk = data.read_u16::<LE>()?;
        let cd_records_on_disk = data.read_u16::<LE>()?;
        let cent_dir_records = data.read_u16::<LE>()?;
        let cent_dir_size = data.read_u32::<LE>()?;
        let cent_dir_offset = data.read_u32::<LE>()?;
        let comment_len = data.read_u16::<LE>()?;

        if cent_dir_records != cd_records_on_disk || start_of_cd_disk != 0 || disk_num != 0 {
            return Err(anyhow!("Multi-disk archives are not supported"));
        }

        Ok(Self {
            cent_dir_records,
            cent_dir_size,
            cent_dir_offset,
            comment: read_field(data, comment_len as usize)?,
        })
    }

    pub fn write(&self, data: &mut impl Write) -> Result<()> {
        data.write_u32::<LE>(Self::SIGNATURE)?;
        data.write_u16::<LE>(0)?; // disk number
        data.write_u16::<LE>(0)?; // disk holding the central directory
        data.write_u16::<LE>(self.cent_dir_records)?;
        data.write_u16::<LE>(self.cent_dir_records)?;
        data.write_u32::<LE>(self.cent_dir_size)?;
        data.write_u32::<LE>(self.cent_dir_offset)?;
        data.write_u16::<LE>(
            self.comment
                .len()
                .try_into()
                .context("Archive comment longer than max length")?,
        )?;
        data.write_all(&self.comment)?;
        Ok(())
    }
}

impl CentDirHeader {
    pub const SIGNATURE: u32 = 0x02014b50;

    pub fn read(data: &mut impl Read) -> Result<Self> {
        if data.read_u32::<LE>()? != Self::SIGNATURE {
            return Err(anyhow!("Invalid CD header signature"));
        }

        let os_version_made_by = data.read_u16::<LE>()?;
        let version_needed = data.read_u16::<LE>()?;
        let flags = data.read_u16::<LE>()?;
        let compression_method = EntryCompression::from(data.read_u16::<LE>()?);
        let last_modified = data.read_u32::<LE>()?;
        let crc32 = data.read_u32::<LE>()?;
        let compressed_len = data.read_u32::<LE>()?;
        let uncompressed_len = data.read_u32::<LE>()?;

        let file_name_len = data.read_u16::<LE>()? as usize;
        let extra_field_len = data.read_u16::<LE>()? as usize;
        let comment_len = data.read_u16::<LE>()? as usize;

        if data.read_u16::<LE>()? != 0 {
            return Err(anyhow!("Multi-disk archives are not supported"));
        }

        let internal_attrs = data.read_u16::<LE>()?;
        let external_attrs = data.read_u32::<LE>()?;
        let local_header_offset = data.read_u32::<LE>()?;

        Ok(Self {
            os_version_made_by,
            version_needed,
            flags,
            compression_method,
            last_modified,
            crc32,
            compressed_len,
            uncompressed_len,
            internal_attrs,
            external_attrs,
            local_header_offset,
            // Entry names in APKs are UTF-8 in practice, whatever the
            // general-purpose flags claim.
            file_name: String::from_utf8(read_field(data, file_name_len)?)
                .context("Entry name was not valid UTF-8")?,
            extra_field: read_field(data, extra_field_len)?,
            comment: String::from_utf8(read_field(data, comment_len)?)
                .context("Entry comment was not valid UTF-8")?,
        })
    }

    pub fn write(&self, data: &mut impl Write) -> Result<()> {
        data.write_u32::<LE>(Self::SIGNATURE)?;
        data.write_u16::<LE>(self.os_version_made_by)?;
        data.write_u16::<LE>(self.version_needed)?;
        data.write_u16::<LE>(self.flags)?;
        data.write_u16::<LE>(self.compression_method.into())?;
        data.write_u32::<LE>(self.last_modified)?;
        data.write_u32::<LE>(self.crc32)?;
        data.write_u32::<LE>(self.compressed_len)?;
        data.write_u32::<LE>(self.uncompressed_len)?;

        data.write_u16::<LE>(
            self.file_name
                .len()
                .try_into()
                .context("Entry name longer than max length")?,
        )?;
        data.write_u16::<LE>(
            self.extra_field
                .len()
                .try_into()
                .context("Extra field longer than max length")?,
        )?;
        data.write_u16::<LE>(
            self.comment
                .len()
                .try_into()
                .context("Entry comment longer than max length")?,
        )?;

        data.write_u16::<LE>(0)?; // disk number
        data.write_u16::<LE>(self.internal_attrs)?;
        data.write_u32::<LE>(self.external_attrs)?;
        data.write_u32::<LE>(self.local_header_offset)?;

        data.write_all(self.file_name.as_bytes())?;
        data.write_all(&self.extra_field)?;
        data.write_all(self.comment.as_bytes())?;
        Ok(())
    }

    /// Length of this record as written.
    pub fn byte_len(&self) -> u64 {
        46 + self.file_name.len() as u64 + self.extra_field.len() as u64 + self.comment.len() as u64
    }
}

impl LocalFileHeader {
    pub const SIGNATURE: u32 = 0x04034b50;

    /// A local header carrying the central directory's metadata for the
    /// entry, with `extra_field` taken from the existing local header.
    pub fn from_cent_dir(record: &CentDirHeader, extra_field: Vec<u8>) -> Self {
        Self {
            version_needed: record.version_needed,
            flags: record.flags,
            compression_method: record.compression_method,
            last_modified: record.last_modified,
            crc32: record.crc32,
            compressed_len: record.compressed_len,
            uncompressed_len: record.uncompressed_len,
            file_name: record.file_name.clone(),
            extra_field,
        }
    }

    pub fn read(data: &mut impl Read) -> Result<Self> {
        if data.read_u32::<LE>()? != Self::SIGNATURE {
            return Err(anyhow!("Invalid local file header signature"));
        }

        let version_needed = data.read_u16::<LE>()?;
        let flags = data.read_u16::<LE>()?;
        let compression_method = EntryCompression::from(data.read_u16::<LE>()?);
        let last_modified = data.read_u32::<LE>()?;
        let crc32 = data.read_u32::<LE>()?;
        let compressed_len = data.read_u32::<LE>()?;
        let uncompressed_len = data.read_u32::<LE>()?;

        let file_name_len = data.read_u16::<LE>()? as usize;
        let extra_field_len = data.read_u16::<LE>()? as usize;

        Ok(Self {
            version_needed,
            flags,
            compression_method,
            last_modified,
            crc32,
            compressed_len,
            uncompressed_len,
            file_name: String::from_utf8(read_field(data, file_name_len)?)
                .context("Entry name was not valid UTF-8")?,
            extra_field: read_field(data, extra_field_len)?,
        })
    }

    pub fn write(&self, data: &mut impl Write) -> Result<()> {
        data.write_u32::<LE>(Self::SIGNATURE)?;
        data.write_u16::<LE>(self.version_needed)?;
        data.write_u16::<LE>(self.flags)?;
        data.write_u16::<LE>(self.compression_method.into())?;
        data.write_u32::<LE>(self.last_modified)?;
        data.write_u32::<LE>(self.crc32)?;
        data.write_u32::<LE>(self.compressed_len)?;
        data.write_u32::<LE>(self.uncompressed_len)?;

        data.write_u16::<LE>(
            self.file_name
                .len()
                .try_into()
                .context("Entry name longer than max length")?,
        )?;
        data.write_u16::<LE>(
            self.extra_field
                .len()
                .try_into()
                .context("Extra field longer than max length")?,
        )?;

        data.write_all(self.file_name.as_bytes())?;
        data.write_all(&self.extra_field)?;
        Ok(())
    }

    /// Length of this record as written.
    pub fn byte_len(&self) -> u64 {
        30 + self.file_name.len() as u64 + self.extra_field.len() as u64
    }
}
