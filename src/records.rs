//! Byte layouts of the ZIP records the packer reads and writes.
//!
//! Every multi-byte field is little-endian. Records are assembled in memory
//! with [`RecordBuf`] so that a sink can treat each one as a single unit.

use crate::errors::{Error, ErrorKind};
use crate::time::DosDateTime;
use crate::utils::{le_u16, le_u32, le_u64, RecordBuf};

pub(crate) const LOCAL_HEADER_SIGNATURE: u32 = 0x04034b50;
pub(crate) const CENTRAL_HEADER_SIGNATURE: u32 = 0x02014b50;
pub(crate) const END_OF_CENTRAL_DIR_SIGNATURE: u32 = 0x06054b50;
pub(crate) const END_OF_CENTRAL_DIR_SIGNATURE64: u32 = 0x06064b50;
pub(crate) const END_OF_CENTRAL_DIR_LOCATOR_SIGNATURE: u32 = 0x07064b50;
pub(crate) const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;

/// Written at the very start of the first volume of a spanned archive.
pub(crate) const SPANNING_MARKER: u32 = DATA_DESCRIPTOR_SIGNATURE;

pub(crate) const LOCAL_HEADER_SIZE: usize = 30;
pub(crate) const CENTRAL_HEADER_SIZE: usize = 46;
pub(crate) const END_OF_CENTRAL_DIR_SIZE: usize = 22;
pub(crate) const ZIP64_END_OF_CENTRAL_DIR_SIZE: usize = 56;
pub(crate) const ZIP64_LOCATOR_SIZE: usize = 20;

pub(crate) const ZIP64_EXTRA_FIELD_ID: u16 = 0x0001;
pub(crate) const AES_EXTRA_FIELD_ID: u16 = 0x9901;
const AES_EXTRA_FIELD_DATA_SIZE: u16 = 7;
const AES_VENDOR_ID: u16 = 0x4541; // "AE"
const AES_VENDOR_VERSION: u16 = 1; // AE-1: CRC is stored

// General purpose bit flags
pub(crate) const FLAG_ENCRYPTED: u16 = 0x01;
pub(crate) const FLAG_DEFLATE_MAX: u16 = 0x02;
pub(crate) const FLAG_DEFLATE_FAST: u16 = 0x04;
pub(crate) const FLAG_DATA_DESCRIPTOR: u16 = 0x08;
pub(crate) const FLAG_UTF8: u16 = 0x800;
pub(crate) const FLAG_DEFLATE_MASK: u16 = FLAG_DEFLATE_MAX | FLAG_DEFLATE_FAST;

const VERSION_STORED: u16 = 10;
const VERSION_DEFLATED: u16 = 20;
const VERSION_ZIP64: u16 = 45;
const VERSION_AES: u16 = 51;
/// Version made by: specification 4.5, MS-DOS host.
pub(crate) const VERSION_MADE_BY: u16 = VERSION_ZIP64;

/// Host system code (upper byte of "version made by") for Unix.
pub(crate) const HOST_UNIX: u8 = 3;

pub(crate) const ZIP64_THRESHOLD: u64 = u32::MAX as u64;
pub(crate) const ZIP64_DISK_THRESHOLD: u32 = u16::MAX as u32;
pub(crate) const ZIP64_ENTRIES_THRESHOLD: u64 = u16::MAX as u64;

/// MS-DOS attribute bits kept in the external attributes.
pub const ATTRIBUTE_DIRECTORY: u32 = 0x10;
pub const ATTRIBUTE_ARCHIVE: u32 = 0x20;
pub(crate) const FILE_ATTRIBUTE_MASK: u32 = 0x37;

/// How an entry's data is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    Stored,
    Deflated,
    /// WinZip AES encryption; the real method lives in the AES extra field.
    Aes,
    Other(u16),
}

impl CompressionMethod {
    pub const fn as_u16(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflated => 8,
            CompressionMethod::Aes => 99,
            CompressionMethod::Other(id) => id,
        }
    }

    pub const fn from_u16(id: u16) -> Self {
        match id {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflated,
            99 => CompressionMethod::Aes,
            _ => CompressionMethod::Other(id),
        }
    }
}

/// Contents of the WinZip AES extra field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesExtra {
    pub vendor_version: u16,
    /// 1 = AES-128, 2 = AES-192, 3 = AES-256
    pub strength: u8,
    /// The method applied before encryption.
    pub method: CompressionMethod,
}

impl AesExtra {
    pub(crate) fn new(strength: u8, method: CompressionMethod) -> Self {
        AesExtra {
            vendor_version: AES_VENDOR_VERSION,
            strength,
            method,
        }
    }

    const ENCODED_LEN: usize = 4 + AES_EXTRA_FIELD_DATA_SIZE as usize;

    fn write(&self, buf: &mut RecordBuf) {
        buf.u16(AES_EXTRA_FIELD_ID)
            .u16(AES_EXTRA_FIELD_DATA_SIZE)
            .u16(self.vendor_version)
            .u16(AES_VENDOR_ID)
            .u8(self.strength)
            .u16(self.method.as_u16());
    }

    fn parse(data: &[u8]) -> Option<AesExtra> {
        if data.len() < AES_EXTRA_FIELD_DATA_SIZE as usize || le_u16(&data[2..4]) != AES_VENDOR_ID
        {
            return None;
        }

        Some(AesExtra {
            vendor_version: le_u16(&data[0..2]),
            strength: data[4],
            method: CompressionMethod::from_u16(le_u16(&data[5..7])),
        })
    }
}

/// One archive entry as described by its central directory header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Entry name with `/` separators; directories end with `/`.
    pub name: String,
    pub size: u64,
    pub compressed_size: u64,
    pub crc: u32,
    pub modified: DosDateTime,
    pub local_header_offset: u64,
    pub start_disk: u32,
    /// Method recorded in the headers (`Aes` for AES encrypted entries).
    pub method: CompressionMethod,
    pub flags: u16,
    pub version_made_by: u16,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    pub aes: Option<AesExtra>,
    pub comment: Vec<u8>,
}

/// Which fields of a record overflow their native width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Zip64Fields {
    pub(crate) size: bool,
    pub(crate) compressed_size: bool,
    pub(crate) offset: bool,
    pub(crate) disk: bool,
}

impl Zip64Fields {
    pub(crate) fn any(&self) -> bool {
        self.size || self.compressed_size || self.offset || self.disk
    }

    fn data_len(&self) -> u16 {
        let mut len = 0;
        if self.size {
            len += 8;
        }
        if self.compressed_size {
            len += 8;
        }
        if self.offset {
            len += 8;
        }
        if self.disk {
            len += 4;
        }
        len
    }
}

impl FileRecord {
    /// Creates a record for a new entry with nothing written yet.
    pub fn new(name: impl Into<String>, modified: DosDateTime) -> Self {
        FileRecord {
            name: name.into(),
            size: 0,
            compressed_size: 0,
            crc: 0,
            modified,
            local_header_offset: 0,
            start_disk: 0,
            method: CompressionMethod::Stored,
            flags: 0,
            version_made_by: VERSION_MADE_BY,
            internal_attributes: 0,
            external_attributes: 0,
            aes: None,
            comment: Vec::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/') || self.external_attributes & ATTRIBUTE_DIRECTORY != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    /// The method applied to the plaintext, looking through AES wrapping.
    pub fn actual_method(&self) -> CompressionMethod {
        match self.aes {
            Some(aes) if self.method == CompressionMethod::Aes => aes.method,
            _ => self.method,
        }
    }

    /// True when the archive was produced on a Unix host, whose file names
    /// are case sensitive.
    pub fn is_unix_made(&self) -> bool {
        (self.version_made_by >> 8) as u8 == HOST_UNIX
    }

    pub(crate) fn zip64_fields(&self) -> Zip64Fields {
        Zip64Fields {
            size: self.size >= ZIP64_THRESHOLD,
            compressed_size: self.compressed_size >= ZIP64_THRESHOLD,
            offset: self.local_header_offset >= ZIP64_THRESHOLD,
            disk: self.start_disk >= ZIP64_DISK_THRESHOLD,
        }
    }

    pub fn needs_zip64(&self) -> bool {
        self.zip64_fields().any()
    }

    pub(crate) fn version_needed(&self, zip64: bool) -> u16 {
        if self.aes.is_some() {
            VERSION_AES
        } else if zip64 {
            VERSION_ZIP64
        } else if self.method == CompressionMethod::Deflated || self.is_dir() {
            VERSION_DEFLATED
        } else {
            VERSION_STORED
        }
    }

    fn central_extra_len(&self) -> usize {
        let fields = self.zip64_fields();
        let zip64 = if fields.any() {
            4 + fields.data_len() as usize
        } else {
            0
        };
        zip64 + self.aes.map_or(0, |_| AesExtra::ENCODED_LEN)
    }

    /// Number of bytes the central header for this record occupies.
    pub(crate) fn central_len(&self) -> usize {
        CENTRAL_HEADER_SIZE + self.name.len() + self.central_extra_len() + self.comment.len()
    }

    /// Serializes the central directory header. Only the fields that
    /// overflow are moved into the Zip64 extra field, in the order size,
    /// compressed size, offset, disk.
    pub(crate) fn write_central(&self, buf: &mut RecordBuf) -> Result<(), Error> {
        if self.name.len() > u16::MAX as usize {
            return Err(Error::invalid_input("file name too long"));
        }

        if self.comment.len() > u16::MAX as usize {
            return Err(Error::invalid_input("file comment too long"));
        }

        let fields = self.zip64_fields();
        let (time, date) = self.modified.into_parts();

        buf.u32(CENTRAL_HEADER_SIGNATURE)
            .u16(self.version_made_by)
            .u16(self.version_needed(fields.any()))
            .u16(self.flags)
            .u16(self.method.as_u16())
            .u16(time)
            .u16(date)
            .u32(self.crc)
            .u32(self.compressed_size.min(ZIP64_THRESHOLD) as u32)
            .u32(self.size.min(ZIP64_THRESHOLD) as u32)
            .u16(self.name.len() as u16)
            .u16(self.central_extra_len() as u16)
            .u16(self.comment.len() as u16)
            .u16(self.start_disk.min(ZIP64_DISK_THRESHOLD) as u16)
            .u16(self.internal_attributes)
            .u32(self.external_attributes)
            .u32(self.local_header_offset.min(ZIP64_THRESHOLD) as u32)
            .bytes(self.name.as_bytes());

        if fields.any() {
            buf.u16(ZIP64_EXTRA_FIELD_ID).u16(fields.data_len());
            if fields.size {
                buf.u64(self.size);
            }
            if fields.compressed_size {
                buf.u64(self.compressed_size);
            }
            if fields.offset {
                buf.u64(self.local_header_offset);
            }
            if fields.disk {
                buf.u32(self.start_disk);
            }
        }

        if let Some(aes) = &self.aes {
            aes.write(buf);
        }

        buf.bytes(&self.comment);
        Ok(())
    }

    /// Serializes the local header.
    ///
    /// `zip64_slot` reserves a Zip64 extra field holding both sizes so the
    /// header can later be rewritten in place with 64-bit values. When the
    /// data descriptor flag is set, CRC and sizes are written as zero.
    pub(crate) fn local_header(&self, zip64_slot: bool) -> RecordBuf {
        let extra_len = if zip64_slot { 4 + 16 } else { 0 }
            + self.aes.map_or(0, |_| AesExtra::ENCODED_LEN);
        let mut buf = RecordBuf::with_capacity(LOCAL_HEADER_SIZE + self.name.len() + extra_len);
        let (time, date) = self.modified.into_parts();

        let descriptor = self.has_data_descriptor();
        let (crc, size, compressed_size) = if descriptor {
            (0, 0, 0)
        } else {
            (self.crc, self.size, self.compressed_size)
        };

        let (fixed_size, fixed_compressed) = if zip64_slot {
            (u32::MAX, u32::MAX)
        } else {
            (size as u32, compressed_size as u32)
        };

        buf.u32(LOCAL_HEADER_SIGNATURE)
            .u16(self.version_needed(zip64_slot))
            .u16(self.flags)
            .u16(self.method.as_u16())
            .u16(time)
            .u16(date)
            .u32(crc)
            .u32(fixed_compressed)
            .u32(fixed_size)
            .u16(self.name.len() as u16)
            .u16(extra_len as u16)
            .bytes(self.name.as_bytes());

        if zip64_slot {
            buf.u16(ZIP64_EXTRA_FIELD_ID)
                .u16(16)
                .u64(size)
                .u64(compressed_size);
        }

        if let Some(aes) = &self.aes {
            aes.write(&mut buf);
        }

        buf
    }

    /// Serializes the data descriptor that trails the entry's data.
    pub(crate) fn data_descriptor(&self, zip64: bool) -> RecordBuf {
        let mut buf = RecordBuf::with_capacity(24);
        buf.u32(DATA_DESCRIPTOR_SIGNATURE).u32(self.crc);
        if zip64 {
            buf.u64(self.compressed_size).u64(self.size);
        } else {
            buf.u32(self.compressed_size as u32)
                .u32(self.size as u32);
        }
        buf
    }

    /// Parses a central directory header at the start of `data`, returning
    /// the record and the number of bytes it occupies.
    pub(crate) fn parse_central(data: &[u8]) -> Result<(FileRecord, usize), Error> {
        let header = CentralHeaderFixed::parse(data)?;
        let total = CENTRAL_HEADER_SIZE + header.variable_length();
        if data.len() < total {
            return Err(Error::from(ErrorKind::Eof));
        }

        let rest = &data[CENTRAL_HEADER_SIZE..total];
        let (name, rest) = rest.split_at(header.file_name_len as usize);
        let (extra, comment) = rest.split_at(header.extra_field_len as usize);

        let name = if header.flags & FLAG_UTF8 != 0 {
            String::from_utf8_lossy(name).into_owned()
        } else {
            match std::str::from_utf8(name) {
                Ok(s) => s.to_owned(),
                Err(_) => name.iter().map(|&b| b as char).collect(),
            }
        };

        let mut record = FileRecord {
            name,
            size: u64::from(header.uncompressed_size),
            compressed_size: u64::from(header.compressed_size),
            crc: header.crc32,
            modified: DosDateTime::new(header.last_mod_time, header.last_mod_date),
            local_header_offset: u64::from(header.local_header_offset),
            start_disk: u32::from(header.disk_number_start),
            method: CompressionMethod::from_u16(header.compression_method),
            flags: header.flags,
            version_made_by: header.version_made_by,
            internal_attributes: header.internal_file_attrs,
            external_attributes: header.external_file_attrs,
            aes: None,
            comment: comment.to_vec(),
        };

        for (id, field) in ExtraFields::new(extra) {
            match id {
                ZIP64_EXTRA_FIELD_ID => record.apply_zip64_extra(field),
                AES_EXTRA_FIELD_ID => record.aes = AesExtra::parse(field),
                _ => {}
            }
        }

        Ok((record, total))
    }

    fn apply_zip64_extra(&mut self, mut field: &[u8]) {
        if self.size == ZIP64_THRESHOLD && field.len() >= 8 {
            self.size = le_u64(field);
            field = &field[8..];
        }
        if self.compressed_size == ZIP64_THRESHOLD && field.len() >= 8 {
            self.compressed_size = le_u64(field);
            field = &field[8..];
        }
        if self.local_header_offset == ZIP64_THRESHOLD && field.len() >= 8 {
            self.local_header_offset = le_u64(field);
            field = &field[8..];
        }
        if self.start_disk == ZIP64_DISK_THRESHOLD && field.len() >= 4 {
            self.start_disk = le_u32(field);
        }
    }
}

/// Iterates `(id, data)` pairs of an extra field block, stopping at the
/// first truncated entry.
pub(crate) struct ExtraFields<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ExtraFields<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        ExtraFields { data, position: 0 }
    }
}

impl<'a> Iterator for ExtraFields<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.data[self.position..];
        let id = rest.get(0..2).map(le_u16)?;
        let len = rest.get(2..4).map(le_u16)? as usize;
        let payload = rest.get(4..4 + len)?;
        self.position += 4 + len;
        Some((id, payload))
    }
}

/// The fixed 46 byte portion of a central directory header.
#[derive(Debug, Clone)]
pub(crate) struct CentralHeaderFixed {
    pub(crate) version_made_by: u16,
    pub(crate) flags: u16,
    pub(crate) compression_method: u16,
    pub(crate) last_mod_time: u16,
    pub(crate) last_mod_date: u16,
    pub(crate) crc32: u32,
    pub(crate) compressed_size: u32,
    pub(crate) uncompressed_size: u32,
    pub(crate) file_name_len: u16,
    pub(crate) extra_field_len: u16,
    pub(crate) file_comment_len: u16,
    pub(crate) disk_number_start: u16,
    pub(crate) internal_file_attrs: u16,
    pub(crate) external_file_attrs: u32,
    pub(crate) local_header_offset: u32,
}

impl CentralHeaderFixed {
    pub(crate) const OFFSET_FIELD: usize = 42;

    pub(crate) fn variable_length(&self) -> usize {
        self.file_name_len as usize + self.extra_field_len as usize + self.file_comment_len as usize
    }

    pub(crate) fn parse(data: &[u8]) -> Result<CentralHeaderFixed, Error> {
        if data.len() < CENTRAL_HEADER_SIZE {
            return Err(Error::from(ErrorKind::Eof));
        }

        let signature = le_u32(&data[0..4]);
        if signature != CENTRAL_HEADER_SIGNATURE {
            return Err(Error::from(ErrorKind::InvalidSignature {
                expected: CENTRAL_HEADER_SIGNATURE,
                actual: signature,
            }));
        }

        Ok(CentralHeaderFixed {
            version_made_by: le_u16(&data[4..6]),
            flags: le_u16(&data[8..10]),
            compression_method: le_u16(&data[10..12]),
            last_mod_time: le_u16(&data[12..14]),
            last_mod_date: le_u16(&data[14..16]),
            crc32: le_u32(&data[16..20]),
            compressed_size: le_u32(&data[20..24]),
            uncompressed_size: le_u32(&data[24..28]),
            file_name_len: le_u16(&data[28..30]),
            extra_field_len: le_u16(&data[30..32]),
            file_comment_len: le_u16(&data[32..34]),
            disk_number_start: le_u16(&data[34..36]),
            internal_file_attrs: le_u16(&data[36..38]),
            external_file_attrs: le_u32(&data[38..42]),
            local_header_offset: le_u32(&data[42..46]),
        })
    }
}

/// The fixed 30 byte portion of a local file header.
#[derive(Debug, Clone)]
pub(crate) struct LocalHeaderFixed {
    pub(crate) flags: u16,
    pub(crate) compression_method: u16,
    pub(crate) file_name_len: u16,
    pub(crate) extra_field_len: u16,
}

impl LocalHeaderFixed {
    pub(crate) fn parse(data: &[u8]) -> Result<LocalHeaderFixed, Error> {
        if data.len() < LOCAL_HEADER_SIZE {
            return Err(Error::from(ErrorKind::Eof));
        }

        let signature = le_u32(&data[0..4]);
        if signature != LOCAL_HEADER_SIGNATURE {
            return Err(Error::from(ErrorKind::InvalidSignature {
                expected: LOCAL_HEADER_SIGNATURE,
                actual: signature,
            }));
        }

        Ok(LocalHeaderFixed {
            flags: le_u16(&data[6..8]),
            compression_method: le_u16(&data[8..10]),
            file_name_len: le_u16(&data[26..28]),
            extra_field_len: le_u16(&data[28..30]),
        })
    }

    /// Bytes from the header start to the first data byte.
    pub(crate) fn total_len(&self) -> u64 {
        LOCAL_HEADER_SIZE as u64 + u64::from(self.file_name_len) + u64::from(self.extra_field_len)
    }
}

/// Values that go into the end of central directory record group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CentralDirectoryEnd {
    /// Number of the disk holding this record.
    pub disk: u32,
    /// Number of the disk where the central directory starts.
    pub cd_start_disk: u32,
    pub entries_on_disk: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
    pub comment: Vec<u8>,
}

impl CentralDirectoryEnd {
    pub fn needs_zip64(&self) -> bool {
        self.cd_size >= ZIP64_THRESHOLD
            || self.cd_offset >= ZIP64_THRESHOLD
            || self.total_entries >= ZIP64_ENTRIES_THRESHOLD
            || self.entries_on_disk >= ZIP64_ENTRIES_THRESHOLD
            || self.disk >= ZIP64_DISK_THRESHOLD
            || self.cd_start_disk >= ZIP64_DISK_THRESHOLD
    }

    pub(crate) fn encoded_len(&self) -> usize {
        let zip64 = if self.needs_zip64() {
            ZIP64_END_OF_CENTRAL_DIR_SIZE + ZIP64_LOCATOR_SIZE
        } else {
            0
        };
        zip64 + END_OF_CENTRAL_DIR_SIZE + self.comment.len()
    }

    /// Serializes the Zip64 record and locator (when needed) followed by the
    /// classic end record. `position` is where the group will be written on
    /// the current disk.
    pub(crate) fn encode(&self, position: u64) -> Result<RecordBuf, Error> {
        if self.comment.len() > u16::MAX as usize {
            return Err(Error::invalid_input("archive comment too long"));
        }

        let mut buf = RecordBuf::with_capacity(self.encoded_len());
        if self.needs_zip64() {
            buf.u32(END_OF_CENTRAL_DIR_SIGNATURE64)
                .u64((ZIP64_END_OF_CENTRAL_DIR_SIZE - 12) as u64)
                .u16(VERSION_MADE_BY)
                .u16(VERSION_ZIP64)
                .u32(self.disk)
                .u32(self.cd_start_disk)
                .u64(self.entries_on_disk)
                .u64(self.total_entries)
                .u64(self.cd_size)
                .u64(self.cd_offset);

            buf.u32(END_OF_CENTRAL_DIR_LOCATOR_SIGNATURE)
                .u32(self.disk)
                .u64(position)
                .u32(self.disk + 1);
        }

        buf.u32(END_OF_CENTRAL_DIR_SIGNATURE)
            .u16(self.disk.min(ZIP64_DISK_THRESHOLD) as u16)
            .u16(self.cd_start_disk.min(ZIP64_DISK_THRESHOLD) as u16)
            .u16(self.entries_on_disk.min(ZIP64_ENTRIES_THRESHOLD) as u16)
            .u16(self.total_entries.min(ZIP64_ENTRIES_THRESHOLD) as u16)
            .u32(self.cd_size.min(ZIP64_THRESHOLD) as u32)
            .u32(self.cd_offset.min(ZIP64_THRESHOLD) as u32)
            .u16(self.comment.len() as u16)
            .bytes(&self.comment);

        Ok(buf)
    }
}
