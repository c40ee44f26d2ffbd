//! The in-memory central directory.
//!
//! Records are kept serialized back to back in one owned buffer so that the
//! directory can be written out verbatim. Every structural edit goes through
//! a cursor that recomputes record boundaries from the length fields, and
//! [`CentralDirectoryStore::validate`] proves the walk still lands exactly on
//! the end of the buffer after the advertised number of records.

use crate::errors::{Error, ErrorKind};
use crate::locator::ArchiveTail;
use crate::reader_at::{ReaderAt, ReaderAtExt};
use crate::records::{
    CentralHeaderFixed, CentralDirectoryEnd, ExtraFields, FileRecord, CENTRAL_HEADER_SIZE,
    ZIP64_EXTRA_FIELD_ID, ZIP64_THRESHOLD,
};
use crate::time::DosDateTime;
#[cfg(test)]
use crate::utils::le_u32;
use crate::utils::{put_le_u32, put_le_u64, RecordBuf};

#[derive(Debug, Clone, Default)]
pub struct CentralDirectoryStore {
    buffer: Vec<u8>,
    entries: u64,
}

impl CentralDirectoryStore {
    /// An empty directory for a brand new archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of serialized central directory bytes, verifying that
    /// they hold exactly `expected_entries` well formed records.
    pub fn from_bytes(buffer: Vec<u8>, expected_entries: u64) -> Result<Self, Error> {
        let store = CentralDirectoryStore {
            buffer,
            entries: expected_entries,
        };
        store.validate()?;
        Ok(store)
    }

    /// Copies an archive's on-disk central directory into memory.
    pub fn load<R: ReaderAt>(reader: &R, tail: &ArchiveTail) -> Result<Self, Error> {
        let buffer = reader.read_vec_at(tail.cd_size, tail.cd_position())?;
        log::debug!(
            "loaded central directory: {} entries, {} bytes",
            tail.total_entries,
            tail.cd_size
        );
        Self::from_bytes(buffer, tail.total_entries)
    }

    /// Number of records in the directory.
    pub fn len(&self) -> u64 {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Serialized size of the directory in bytes.
    pub fn size(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Walks the buffer by computed record lengths.
    pub fn validate(&self) -> Result<(), Error> {
        let mut count = 0u64;
        for span in self.spans() {
            span?;
            count += 1;
        }

        if count != self.entries {
            return Err(Error::from(ErrorKind::EntryCountMismatch {
                expected: self.entries,
                actual: count,
            }));
        }

        Ok(())
    }

    fn spans(&self) -> Spans<'_> {
        Spans {
            buffer: &self.buffer,
            position: 0,
            failed: false,
        }
    }

    /// Iterates the parsed records in directory order.
    pub fn records(&self) -> impl Iterator<Item = Result<FileRecord, Error>> + '_ {
        self.spans().map(move |span| {
            let span = span?;
            FileRecord::parse_central(&self.buffer[span.start..span.end]).map(|(record, _)| record)
        })
    }

    /// Collects every record, failing on the first corrupt one.
    pub fn to_vec(&self) -> Result<Vec<FileRecord>, Error> {
        let mut records = Vec::new();
        records.try_reserve(self.entries as usize)?;
        for record in self.records() {
            records.push(record?);
        }
        Ok(records)
    }

    /// Finds a record by name. Directory names match with or without their
    /// trailing slash.
    pub fn find(&self, name: &str, case_sensitive: bool) -> Result<Option<FileRecord>, Error> {
        for record in self.records() {
            let record = record?;
            if names_match(&record.name, name, case_sensitive) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// The latest modification time of any entry.
    pub fn newest_time(&self) -> Result<Option<DosDateTime>, Error> {
        let mut newest = None;
        for record in self.records() {
            let modified = record?.modified;
            newest = newest.max(Some(modified));
        }
        Ok(newest)
    }

    /// Removes the record whose local header lives at `offset`.
    pub fn remove_record(&mut self, offset: u64) -> Result<FileRecord, Error> {
        let mut found = None;
        for span in self.spans() {
            let span = span?;
            let (record, _) = FileRecord::parse_central(&self.buffer[span.start..span.end])?;
            if record.local_header_offset == offset {
                found = Some((span, record));
                break;
            }
        }

        let (span, record) = found.ok_or_else(|| {
            Error::invalid_input(format!("no central directory record at offset {}", offset))
        })?;

        self.buffer.drain(span.start..span.end);
        self.entries -= 1;
        Ok(record)
    }

    /// Subtracts `delta` from the local header offset of every record whose
    /// offset lies strictly between `deleted_offset` and `next_boundary`.
    ///
    /// The field is edited where it is stored: a record carrying its offset
    /// in the Zip64 extra field keeps it there even if the new value fits in
    /// 32 bits.
    pub fn rebase_offsets(
        &mut self,
        deleted_offset: u64,
        next_boundary: u64,
        delta: u64,
    ) -> Result<usize, Error> {
        let mut edits = Vec::new();
        for span in self.spans() {
            let span = span?;
            let record = &self.buffer[span.start..span.end];
            let (parsed, _) = FileRecord::parse_central(record)?;
            let offset = parsed.local_header_offset;
            if offset <= deleted_offset || offset >= next_boundary {
                continue;
            }

            let new_offset = offset.checked_sub(delta).ok_or(ErrorKind::CorruptRecord {
                position: span.start as u64,
            })?;
            let field = offset_field(record).ok_or(ErrorKind::CorruptRecord {
                position: span.start as u64,
            })?;
            edits.push((span.start, field, new_offset));
        }

        for (start, field, new_offset) in &edits {
            match *field {
                OffsetField::Narrow(at) => {
                    let value = u32::try_from(*new_offset).unwrap_or(u32::MAX);
                    put_le_u32(&mut self.buffer[start + at..], value)
                }
                OffsetField::Wide(at) => put_le_u64(&mut self.buffer[start + at..], *new_offset),
            }
        }

        Ok(edits.len())
    }

    /// Serializes a new record onto the end of the directory.
    pub fn append_record(&mut self, record: &FileRecord) -> Result<(), Error> {
        let mut buf = RecordBuf::with_capacity(record.central_len());
        record.write_central(&mut buf)?;
        let data = buf.into_inner();
        self.buffer.try_reserve(data.len())?;
        self.buffer.extend_from_slice(&data);
        self.entries += 1;
        Ok(())
    }

    /// Iterates raw serialized records, for writers that place each central
    /// header as its own unit.
    pub(crate) fn raw_records(&self) -> impl Iterator<Item = Result<&[u8], Error>> + '_ {
        self.spans()
            .map(move |span| span.map(|span| &self.buffer[span.start..span.end]))
    }

    /// The end record describing this directory on a single disk archive.
    pub fn end_record(&self, cd_offset: u64, comment: Vec<u8>) -> CentralDirectoryEnd {
        CentralDirectoryEnd {
            disk: 0,
            cd_start_disk: 0,
            entries_on_disk: self.entries,
            total_entries: self.entries,
            cd_size: self.size(),
            cd_offset,
            comment,
        }
    }
}

pub(crate) fn names_match(stored: &str, candidate: &str, case_sensitive: bool) -> bool {
    let stored = stored.trim_end_matches('/');
    let candidate = candidate.trim_end_matches('/');
    if case_sensitive {
        stored == candidate
    } else {
        stored.len() == candidate.len() && stored.to_lowercase() == candidate.to_lowercase()
    }
}

#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
}

struct Spans<'a> {
    buffer: &'a [u8],
    position: usize,
    failed: bool,
}

impl Iterator for Spans<'_> {
    type Item = Result<Span, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.position >= self.buffer.len() {
            return None;
        }

        let start = self.position;
        let rest = &self.buffer[start..];
        let corrupt = || {
            Error::from(ErrorKind::CorruptRecord {
                position: start as u64,
            })
        };

        let header = match CentralHeaderFixed::parse(rest) {
            Ok(header) => header,
            Err(e) => {
                self.failed = true;
                return Some(Err(if e.is_eof() { corrupt() } else { e }));
            }
        };

        let end = start + CENTRAL_HEADER_SIZE + header.variable_length();
        if end > self.buffer.len() {
            self.failed = true;
            return Some(Err(corrupt()));
        }

        self.position = end;
        Some(Ok(Span { start, end }))
    }
}

/// Where a record's local header offset is stored, relative to the start of
/// the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OffsetField {
    Narrow(usize),
    Wide(usize),
}

fn offset_field(record: &[u8]) -> Option<OffsetField> {
    let header = CentralHeaderFixed::parse(record).ok()?;
    if u64::from(header.local_header_offset) != ZIP64_THRESHOLD {
        return Some(OffsetField::Narrow(CentralHeaderFixed::OFFSET_FIELD));
    }

    let extra_start = CENTRAL_HEADER_SIZE + header.file_name_len as usize;
    let extra = record.get(extra_start..extra_start + header.extra_field_len as usize)?;

    // Locate the Zip64 payload within the extra block
    let mut cursor = 0;
    for (id, payload) in ExtraFields::new(extra) {
        cursor += 4;
        if id == ZIP64_EXTRA_FIELD_ID {
            let mut skip = 0;
            if u64::from(header.uncompressed_size) == ZIP64_THRESHOLD {
                skip += 8;
            }
            if u64::from(header.compressed_size) == ZIP64_THRESHOLD {
                skip += 8;
            }
            if payload.len() < skip + 8 {
                return None;
            }
            return Some(OffsetField::Wide(extra_start + cursor + skip));
        }
        cursor += payload.len();
    }

    None
}

#[cfg(test)]
fn narrow_offset(record: &[u8]) -> u32 {
    le_u32(&record[CentralHeaderFixed::OFFSET_FIELD..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use rstest::rstest;

    fn record(name: &str, offset: u64, size: u64) -> FileRecord {
        let mut record = FileRecord::new(name, DosDateTime::MIN);
        record.local_header_offset = offset;
        record.size = size;
        record.compressed_size = size;
        record
    }

    fn store(records: &[FileRecord]) -> CentralDirectoryStore {
        let mut store = CentralDirectoryStore::new();
        for r in records {
            store.append_record(r).unwrap();
        }
        store
    }

    #[test]
    fn test_append_then_load_round_trip() {
        let records = vec![record("a.txt", 0, 10), record("dir/", 100, 0)];
        let built = store(&records);
        let loaded = CentralDirectoryStore::from_bytes(built.as_bytes().to_vec(), 2).unwrap();
        assert_eq!(loaded.to_vec().unwrap(), records);
        assert!(loaded.find("DIR", false).unwrap().is_some());
        assert!(loaded.find("A.TXT", true).unwrap().is_none());
    }

    #[test]
    fn test_truncated_record_is_corrupt() {
        let built = store(&[record("a.txt", 0, 10), record("b.txt", 50, 10)]);
        let mut bytes = built.as_bytes().to_vec();
        bytes.truncate(bytes.len() - 2);
        let err = CentralDirectoryStore::from_bytes(bytes, 2).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::CorruptRecord { position } if *position > 0));
    }

    #[test]
    fn test_count_mismatch() {
        let built = store(&[record("a.txt", 0, 10)]);
        let err = CentralDirectoryStore::from_bytes(built.as_bytes().to_vec(), 3).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::EntryCountMismatch {
                expected: 3,
                actual: 1
            }
        ));
    }

    #[rstest]
    #[case(ZIP64_THRESHOLD + 500, 0)]
    #[case(ZIP64_THRESHOLD + 50, 0)]
    #[case(ZIP64_THRESHOLD + 500, ZIP64_THRESHOLD)]
    #[case(200, 0)]
    fn test_rebase_keeps_field_width(#[case] offset: u64, #[case] size: u64) {
        let mut s = store(&[record("a", 10, 0), record("b", offset, size)]);
        let wide_before = s.to_vec().unwrap()[1].needs_zip64();
        let size_before = s.size();

        assert_eq!(s.rebase_offsets(10, u64::MAX, 100).unwrap(), 1);
        let records = s.to_vec().unwrap();
        assert_eq!(records[0].local_header_offset, 10);
        assert_eq!(records[1].local_header_offset, offset - 100);
        assert_eq!(s.size(), size_before);

        // width is never re-evaluated, even when the offset now fits
        let bytes = s.as_bytes();
        let second = &bytes[records[0].central_len()..];
        assert_eq!(narrow_offset(second) == u32::MAX, wide_before && offset >= ZIP64_THRESHOLD);
    }

    #[test]
    fn test_rebase_respects_bounds() {
        let mut s = store(&[
            record("a", 0, 0),
            record("b", 100, 0),
            record("c", 200, 0),
            record("d", 300, 0),
        ]);
        assert_eq!(s.rebase_offsets(0, 300, 50).unwrap(), 2);
        let offsets: Vec<u64> = s
            .to_vec()
            .unwrap()
            .iter()
            .map(|r| r.local_header_offset)
            .collect();
        assert_eq!(offsets, vec![0, 50, 150, 300]);
    }

    #[test]
    fn test_remove_missing_offset() {
        let mut s = store(&[record("a", 0, 0)]);
        assert!(s.remove_record(42).is_err());
        assert_eq!(s.len(), 1);
    }

    #[quickcheck]
    fn test_removal_keeps_walk_consistent(sizes: Vec<(u8, bool)>, removals: Vec<u8>) -> bool {
        let mut offset = 0u64;
        let mut records = Vec::new();
        for (i, (len, big)) in sizes.iter().enumerate() {
            let size = if *big { ZIP64_THRESHOLD + u64::from(*len) } else { u64::from(*len) };
            records.push(record(&format!("f{}", i), offset, size));
            offset += 30 + size;
        }

        let mut s = store(&records);
        let mut alive = records.clone();
        for r in removals {
            if alive.is_empty() {
                break;
            }
            let victim = alive.remove(r as usize % alive.len());
            let removed = s.remove_record(victim.local_header_offset).unwrap();
            if removed != victim {
                return false;
            }
        }

        let expected_size: usize = alive.iter().map(|r| r.central_len()).sum();
        s.validate().is_ok()
            && s.len() == alive.len() as u64
            && s.size() == expected_size as u64
            && s.to_vec().unwrap() == alive
    }
}
