use crate::errors::{Error, ErrorKind};
use crate::reader_at::{ReaderAt, ReaderAtExt};
use crate::records::{
    END_OF_CENTRAL_DIR_LOCATOR_SIGNATURE, END_OF_CENTRAL_DIR_SIGNATURE,
    END_OF_CENTRAL_DIR_SIGNATURE64, END_OF_CENTRAL_DIR_SIZE, ZIP64_END_OF_CENTRAL_DIR_SIZE,
    ZIP64_LOCATOR_SIZE,
};
use crate::utils::{le_u16, le_u32, le_u64};
use std::io::Seek;

pub(crate) const END_OF_CENTRAL_DIR_SIGNATURE_BYTES: [u8; 4] =
    END_OF_CENTRAL_DIR_SIGNATURE.to_le_bytes();

// The end record sits at most a maximum length comment away from the end
const END_OF_CENTRAL_DIR_MAX_OFFSET: u64 = (END_OF_CENTRAL_DIR_SIZE as u64) + u16::MAX as u64;

/// Everything the updater needs to know about an existing archive's tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTail {
    /// Absolute position of the first record of the end group (the Zip64 end
    /// record when present, otherwise the classic end record).
    pub end_group_position: u64,
    pub disk: u32,
    pub cd_start_disk: u32,
    pub entries_on_disk: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    /// Offset of the central directory relative to `base_offset`.
    pub cd_offset: u64,
    /// Number of bytes preceding the archive payload (a self-extractor stub,
    /// for instance). Every stored offset is relative to this position.
    pub base_offset: u64,
    pub comment: Vec<u8>,
    pub is_zip64: bool,
}

impl ArchiveTail {
    /// Absolute position of the first central directory header.
    pub fn cd_position(&self) -> u64 {
        self.base_offset + self.cd_offset
    }

    pub fn is_multi_disk(&self) -> bool {
        self.disk != 0 || self.cd_start_disk != 0
    }
}

/// Finds the end of central directory group of an archive.
#[derive(Debug)]
pub struct ZipLocator {
    max_search_space: u64,
}

impl Default for ZipLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ZipLocator {
    pub fn new() -> Self {
        ZipLocator {
            max_search_space: END_OF_CENTRAL_DIR_MAX_OFFSET,
        }
    }

    /// The maximum number of bytes to search for the end of central directory signature
    pub fn max_search_space(mut self, max_search_space: u64) -> Self {
        self.max_search_space = max_search_space;
        self
    }

    pub fn locate_in_reader<R>(&self, mut reader: R, buffer: &mut [u8]) -> Result<ArchiveTail, Error>
    where
        R: ReaderAt + Seek,
    {
        let (stream_pos, buffer_pos) =
            find_end_of_central_dir_with_seek(&mut reader, buffer, self.max_search_space)?
                .ok_or(ErrorKind::MissingEndOfCentralDirectory)?;

        let eocd = match EndOfCentralDirectoryRecordFixed::parse(&buffer[buffer_pos..]) {
            Ok(record) => record,
            Err(e) if e.is_eof() => {
                // the record crossed over read boundaries
                let mut fixed = [0u8; END_OF_CENTRAL_DIR_SIZE];
                reader.read_exact_at(&mut fixed, stream_pos)?;
                EndOfCentralDirectoryRecordFixed::parse(&fixed)?
            }
            Err(e) => return Err(e),
        };

        let mut comment = vec![0u8; eocd.comment_len as usize];
        let read = reader.read_at_most_at(
            &mut comment,
            stream_pos + END_OF_CENTRAL_DIR_SIZE as u64,
        )?;
        comment.truncate(read);

        let mut tail = ArchiveTail {
            end_group_position: stream_pos,
            disk: u32::from(eocd.disk_number),
            cd_start_disk: u32::from(eocd.eocd_disk),
            entries_on_disk: u64::from(eocd.num_entries),
            total_entries: u64::from(eocd.total_entries),
            cd_size: u64::from(eocd.central_dir_size),
            cd_offset: u64::from(eocd.central_dir_offset),
            base_offset: 0,
            comment,
            is_zip64: false,
        };

        if eocd.is_zip64() {
            read_zip64_tail(&reader, stream_pos, &mut tail)?;
        }

        // Whatever precedes the directory but is not accounted for by the
        // stored offset is a prefix such as a self-extractor stub.
        let cd_end = tail.end_group_position;
        let cd_position = cd_end
            .checked_sub(tail.cd_size)
            .ok_or(ErrorKind::CorruptRecord { position: cd_end })?;
        tail.base_offset = cd_position
            .checked_sub(tail.cd_offset)
            .ok_or(ErrorKind::CorruptRecord {
                position: cd_position,
            })?;

        Ok(tail)
    }
}

fn read_zip64_tail<R: ReaderAt>(reader: &R, eocd_pos: u64, tail: &mut ArchiveTail) -> Result<(), Error> {
    let locator_pos = eocd_pos
        .checked_sub(ZIP64_LOCATOR_SIZE as u64)
        .ok_or(ErrorKind::MissingZip64EndOfCentralDirectory)?;

    let mut locator = [0u8; ZIP64_LOCATOR_SIZE];
    reader.read_exact_at(&mut locator, locator_pos)?;
    let locator = match Zip64EndOfCentralDirectoryLocatorRecord::parse(&locator) {
        Ok(locator) => locator,
        // An archive with exactly 0xFFFF entries and no Zip64 records
        Err(_) if tail.total_entries == u64::from(u16::MAX) && tail.cd_offset != 0xFFFF_FFFF => {
            return Ok(())
        }
        Err(e) => return Err(e),
    };

    // Prefer the record directly in front of the locator, which is where it
    // sits even when the archive has leading bytes. Fall back to the stored
    // offset for archives with an extensible data sector.
    let mut record = [0u8; ZIP64_END_OF_CENTRAL_DIR_SIZE];
    let adjacent = locator_pos.checked_sub(ZIP64_END_OF_CENTRAL_DIR_SIZE as u64);
    let mut parsed = None;
    if let Some(pos) = adjacent {
        reader.read_exact_at(&mut record, pos)?;
        if let Ok(r) = Zip64EndOfCentralDirectoryRecord::parse(&record) {
            parsed = Some((pos, r));
        }
    }

    let (position, record) = match parsed {
        Some(found) => found,
        None => {
            reader
                .read_exact_at(&mut record, locator.directory_offset)
                .map_err(|_| Error::from(ErrorKind::MissingZip64EndOfCentralDirectory))?;
            let r = Zip64EndOfCentralDirectoryRecord::parse(&record)?;
            (locator.directory_offset, r)
        }
    };

    tail.end_group_position = position;
    tail.disk = record.disk_number;
    tail.cd_start_disk = record.cd_disk;
    tail.entries_on_disk = record.num_entries;
    tail.total_entries = record.total_entries;
    tail.cd_size = record.central_dir_size;
    tail.cd_offset = record.central_dir_offset;
    tail.is_zip64 = true;
    Ok(())
}

#[derive(Debug, Clone)]
pub(crate) struct EndOfCentralDirectoryRecordFixed {
    pub(crate) disk_number: u16,
    pub(crate) eocd_disk: u16,
    pub(crate) num_entries: u16,
    pub(crate) total_entries: u16,
    pub(crate) central_dir_size: u32,
    pub(crate) central_dir_offset: u32,
    pub(crate) comment_len: u16,
}

impl EndOfCentralDirectoryRecordFixed {
    pub fn parse(data: &[u8]) -> Result<EndOfCentralDirectoryRecordFixed, Error> {
        if data.len() < END_OF_CENTRAL_DIR_SIZE {
            return Err(Error::from(ErrorKind::Eof));
        }

        let signature = le_u32(&data[0..4]);
        if signature != END_OF_CENTRAL_DIR_SIGNATURE {
            return Err(Error::from(ErrorKind::InvalidSignature {
                expected: END_OF_CENTRAL_DIR_SIGNATURE,
                actual: signature,
            }));
        }

        Ok(EndOfCentralDirectoryRecordFixed {
            disk_number: le_u16(&data[4..6]),
            eocd_disk: le_u16(&data[6..8]),
            num_entries: le_u16(&data[8..10]),
            total_entries: le_u16(&data[10..12]),
            central_dir_size: le_u32(&data[12..16]),
            central_dir_offset: le_u32(&data[16..20]),
            comment_len: le_u16(&data[20..22]),
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.num_entries == u16::MAX
            || self.total_entries == u16::MAX
            || self.disk_number == u16::MAX
            || self.central_dir_size == u32::MAX
            || self.central_dir_offset == u32::MAX
    }
}

/// 4.3.15
#[derive(Debug)]
struct Zip64EndOfCentralDirectoryLocatorRecord {
    /// relative offset of the zip64 end of central directory record
    directory_offset: u64,
}

impl Zip64EndOfCentralDirectoryLocatorRecord {
    fn parse(data: &[u8]) -> Result<Zip64EndOfCentralDirectoryLocatorRecord, Error> {
        if data.len() < ZIP64_LOCATOR_SIZE {
            return Err(Error::from(ErrorKind::Eof));
        }

        let signature = le_u32(&data[0..4]);
        if signature != END_OF_CENTRAL_DIR_LOCATOR_SIGNATURE {
            return Err(Error::from(ErrorKind::InvalidSignature {
                expected: END_OF_CENTRAL_DIR_LOCATOR_SIGNATURE,
                actual: signature,
            }));
        }

        Ok(Zip64EndOfCentralDirectoryLocatorRecord {
            directory_offset: le_u64(&data[8..16]),
        })
    }
}

/// 4.3.14
#[derive(Debug)]
struct Zip64EndOfCentralDirectoryRecord {
    disk_number: u32,
    cd_disk: u32,
    num_entries: u64,
    total_entries: u64,
    central_dir_size: u64,
    central_dir_offset: u64,
}

impl Zip64EndOfCentralDirectoryRecord {
    fn parse(data: &[u8]) -> Result<Zip64EndOfCentralDirectoryRecord, Error> {
        if data.len() < ZIP64_END_OF_CENTRAL_DIR_SIZE {
            return Err(Error::from(ErrorKind::Eof));
        }

        let signature = le_u32(&data[0..4]);
        if signature != END_OF_CENTRAL_DIR_SIGNATURE64 {
            return Err(Error::from(ErrorKind::InvalidSignature {
                expected: END_OF_CENTRAL_DIR_SIGNATURE64,
                actual: signature,
            }));
        }

        Ok(Zip64EndOfCentralDirectoryRecord {
            disk_number: le_u32(&data[16..20]),
            cd_disk: le_u32(&data[20..24]),
            num_entries: le_u64(&data[24..32]),
            total_entries: le_u64(&data[32..40]),
            central_dir_size: le_u64(&data[40..48]),
            central_dir_offset: le_u64(&data[48..56]),
        })
    }
}

#[cfg(test)]
pub(crate) fn find_end_of_central_dir_signature(
    data: &[u8],
    max_search_space: usize,
) -> Option<usize> {
    let start_search = data.len().saturating_sub(max_search_space);
    backwards_find(&data[start_search..], &END_OF_CENTRAL_DIR_SIGNATURE_BYTES)
        .map(|pos| pos + start_search)
}

pub(crate) fn find_end_of_central_dir_with_seek<T>(
    mut reader: T,
    buffer: &mut [u8],
    max_search_space: u64,
) -> std::io::Result<Option<(u64, usize)>>
where
    T: ReaderAt + Seek,
{
    if buffer.len() < END_OF_CENTRAL_DIR_SIGNATURE_BYTES.len() {
        debug_assert!(false, "buffer not big enough to hold signature");
        return Ok(None);
    }

    let len = reader.seek(std::io::SeekFrom::End(0))?;
    let max_back = len.saturating_sub(max_search_space);
    let mut offset = len;

    // The amount of data the remains in the stream
    let mut remaining = len - max_back;

    // The number of bytes that were translated from the front to the back
    let mut carry_over = 0;
    loop {
        // We either want to read into the entire buffer (sans the bytes that
        // were carried over from the last read). Or we want to read the remainder
        let read_size = (buffer.len() - carry_over).min(remaining as usize);

        offset -= read_size as u64;

        reader.read_exact_at(&mut buffer[..read_size], offset)?;
        remaining -= read_size as u64;

        let haystack = &buffer[..read_size + carry_over];
        if let Some(i) = backwards_find(haystack, &END_OF_CENTRAL_DIR_SIGNATURE_BYTES) {
            let stream_pos = (max_back + remaining) + (i as u64);
            return Ok(Some((stream_pos, i)));
        }

        if remaining == 0 {
            return Ok(None);
        }

        // Since the signature may be across read boundaries, match how much the
        // end of the signature matches the start of the buffer
        carry_over = match buffer {
            [b0, b1, b2, ..] if [*b0, *b1, *b2] == END_OF_CENTRAL_DIR_SIGNATURE_BYTES[1..4] => 3,
            [b0, b1, ..] if [*b0, *b1] == END_OF_CENTRAL_DIR_SIGNATURE_BYTES[2..4] => 2,
            [b0, ..] if *b0 == END_OF_CENTRAL_DIR_SIGNATURE_BYTES[3] => 1,
            _ => 0,
        };

        if carry_over > 0 {
            // place the carry over bytes at the end of the buffer for the next read
            let dest = (buffer.len() - carry_over).min(remaining as usize);
            buffer.copy_within(..carry_over, dest);
        }
    }
}

fn backwards_find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .rposition(|window| window == needle)
}
