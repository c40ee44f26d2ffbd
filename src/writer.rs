use crate::central_dir::CentralDirectoryStore;
use crate::cipher::{check_value, Encryption, EncryptionContext};
use crate::codec::{level_flags, method_for_level, Compressor};
use crate::crc::Crc32;
use crate::errors::Error;
use crate::host::{Host, IoErrorDecision, StickyAnswers};
use crate::reader_at::ReaderAt;
use crate::records::{
    AesExtra, CentralDirectoryEnd, CompressionMethod, FileRecord, FLAG_DATA_DESCRIPTOR,
    FLAG_ENCRYPTED, FLAG_UTF8, ZIP64_ENTRIES_THRESHOLD, ZIP64_THRESHOLD,
};
use crate::source::SourceItem;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

// Sources at least this large get a Zip64 slot in their local header, since
// deflate may expand incompressible input slightly.
const ZIP64_RESERVE_THRESHOLD: u64 = ZIP64_THRESHOLD - ZIP64_THRESHOLD / 64;

/// Random access storage an archive can be updated in.
pub trait Storage: ReaderAt + Write + Seek {
    /// Truncates or extends the underlying storage.
    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

impl Storage for std::fs::File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        std::fs::File::set_len(self, len)
    }
}

impl Storage for Cursor<Vec<u8>> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len).map_err(|_| io::Error::from(io::ErrorKind::OutOfMemory))?;
        self.get_mut().resize(len, 0);
        Ok(())
    }
}

impl<S: Storage + ?Sized> Storage for &mut S {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        (**self).set_len(len)
    }
}

/// Where the archive writer puts its bytes.
///
/// Positions are relative to the start of the archive payload on the current
/// disk. A unit is a record that must land on a single disk; data may be
/// split anywhere.
pub trait ArchiveSink {
    fn disk(&self) -> u32;

    fn position(&self) -> u64;

    /// Guarantees that `len` bytes fit on the current disk, moving to the
    /// next one if needed.
    fn reserve(&mut self, len: u64) -> Result<(), Error>;

    /// Writes bytes that may be split across disks.
    fn write_data(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Writes a record as a whole, returning the disk and position it
    /// starts at.
    fn write_unit(&mut self, unit: &[u8]) -> Result<(u32, u64), Error> {
        self.reserve(unit.len() as u64)?;
        let start = (self.disk(), self.position());
        self.write_data(unit)?;
        Ok(start)
    }

    /// True when the output spans volumes and cannot be rewound.
    fn is_spanned(&self) -> bool;

    /// Overwrites bytes already written at `position` on the current disk.
    fn rewrite(&mut self, _position: u64, _data: &[u8]) -> Result<(), Error> {
        Err(Error::unsupported("cannot rewrite spanned output"))
    }

    /// Discards everything from `position` on and continues writing there.
    fn truncate(&mut self, _position: u64) -> Result<(), Error> {
        Err(Error::unsupported("cannot truncate spanned output"))
    }
}

impl<K: ArchiveSink + ?Sized> ArchiveSink for &mut K {
    fn disk(&self) -> u32 {
        (**self).disk()
    }

    fn position(&self) -> u64 {
        (**self).position()
    }

    fn reserve(&mut self, len: u64) -> Result<(), Error> {
        (**self).reserve(len)
    }

    fn write_data(&mut self, data: &[u8]) -> Result<(), Error> {
        (**self).write_data(data)
    }

    fn write_unit(&mut self, unit: &[u8]) -> Result<(u32, u64), Error> {
        (**self).write_unit(unit)
    }

    fn is_spanned(&self) -> bool {
        (**self).is_spanned()
    }

    fn rewrite(&mut self, position: u64, data: &[u8]) -> Result<(), Error> {
        (**self).rewrite(position, data)
    }

    fn truncate(&mut self, position: u64) -> Result<(), Error> {
        (**self).truncate(position)
    }
}

/// A single-file sink over seekable storage. Archive positions are offset
/// by `base`, the size of any prefix such as a self-extractor stub.
#[derive(Debug)]
pub struct SeekableSink<S> {
    storage: S,
    base: u64,
    position: u64,
}

impl<S: Storage> SeekableSink<S> {
    /// Starts writing at archive position `position`.
    pub fn new(mut storage: S, base: u64, position: u64) -> Result<Self, Error> {
        storage.seek(SeekFrom::Start(base + position))?;
        Ok(SeekableSink {
            storage,
            base,
            position,
        })
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_inner(self) -> S {
        self.storage
    }

    /// Cuts the storage off at the current position.
    pub fn set_end(&mut self) -> Result<(), Error> {
        self.storage.flush()?;
        self.storage.set_len(self.base + self.position)?;
        Ok(())
    }
}

impl<S: Storage> ArchiveSink for SeekableSink<S> {
    fn disk(&self) -> u32 {
        0
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn reserve(&mut self, _len: u64) -> Result<(), Error> {
        Ok(())
    }

    fn write_data(&mut self, data: &[u8]) -> Result<(), Error> {
        self.storage.write_all(data)?;
        self.position += data.len() as u64;
        Ok(())
    }

    fn is_spanned(&self) -> bool {
        false
    }

    fn rewrite(&mut self, position: u64, data: &[u8]) -> Result<(), Error> {
        self.storage.seek(SeekFrom::Start(self.base + position))?;
        self.storage.write_all(data)?;
        self.storage.seek(SeekFrom::Start(self.base + self.position))?;
        Ok(())
    }

    fn truncate(&mut self, position: u64) -> Result<(), Error> {
        self.storage.set_len(self.base + position)?;
        self.storage.seek(SeekFrom::Start(self.base + position))?;
        self.position = position;
        Ok(())
    }
}

#[derive(Debug)]
struct CountWriter<W> {
    writer: W,
    count: u64,
}

impl<W> CountWriter<W> {
    fn new(writer: W) -> Self {
        CountWriter { writer, count: 0 }
    }

    fn count(&self) -> u64 {
        self.count
    }
}

impl<W: Write> Write for CountWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let bytes_written = self.writer.write(buf)?;
        self.count += bytes_written as u64;
        Ok(bytes_written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Encrypts compressed bytes and hands them to the sink.
struct CipherWriter<'a, K: ?Sized> {
    sink: &'a mut K,
    cipher: Option<EncryptionContext>,
    scratch: Vec<u8>,
}

impl<K: ArchiveSink + ?Sized> Write for CipherWriter<'_, K> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let data = match &mut self.cipher {
            Some(cipher) => {
                self.scratch.clear();
                self.scratch.extend_from_slice(buf);
                cipher.encrypt(&mut self.scratch);
                &self.scratch[..]
            }
            None => buf,
        };
        self.sink.write_data(data).map_err(Error::into_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Why the archive is being finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeReason {
    Normal,
    /// The archive is the payload of a self-extractor, whose stub cannot
    /// read Zip64 structures.
    SelfExtractor,
}

/// Whether [`ArchiveWriter::pack_one`] stored the item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackOutcome {
    Written(FileRecord),
    /// The source could not be read and the host chose to skip it.
    Skipped,
}

/// Streams entries into an [`ArchiveSink`] and finishes the archive with
/// its central directory.
pub struct ArchiveWriter<'h, K> {
    sink: K,
    host: &'h dyn Host,
    level: u32,
    encryption: Option<(Encryption, Vec<u8>)>,
    sticky: StickyAnswers,
    processed: u64,
    buffer: Vec<u8>,
}

impl<'h, K: ArchiveSink> ArchiveWriter<'h, K> {
    pub fn new(sink: K, host: &'h dyn Host) -> Self {
        ArchiveWriter {
            sink,
            host,
            level: 6,
            encryption: None,
            sticky: StickyAnswers::default(),
            processed: 0,
            buffer: Vec::new(),
        }
    }

    /// Compression level 0 (store) through 9.
    pub fn level(mut self, level: u32) -> Self {
        self.level = level.min(9);
        self
    }

    pub fn encryption(mut self, encryption: Option<(Encryption, Vec<u8>)>) -> Self {
        self.encryption = encryption;
        self
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }

    pub fn into_sink(self) -> K {
        self.sink
    }

    /// Writes one entry: local header, encryption header, data and either a
    /// data descriptor or a rewritten local header.
    pub fn pack_one(&mut self, name: &str, item: &SourceItem) -> Result<PackOutcome, Error> {
        if !self.host.progress(self.processed) {
            return Err(Error::cancelled());
        }

        if item.is_dir {
            return self.pack_directory(name, item).map(PackOutcome::Written);
        }

        let method = if item.size == 0 {
            CompressionMethod::Stored
        } else {
            method_for_level(self.level)
        };
        match self.pack_file(name, item, method)? {
            Some(record) => Ok(PackOutcome::Written(record)),
            None => Ok(PackOutcome::Skipped),
        }
    }

    fn base_record(&self, name: String, item: &SourceItem) -> FileRecord {
        let mut record = FileRecord::new(name, item.modified);
        record.external_attributes = item.attributes;
        if !record.name.is_ascii() {
            record.flags |= FLAG_UTF8;
        }
        record
    }

    fn pack_directory(&mut self, name: &str, item: &SourceItem) -> Result<FileRecord, Error> {
        let mut record = self.base_record(format!("{}/", name.trim_end_matches('/')), item);
        let header = record.local_header(false);
        let (disk, offset) = self.sink.write_unit(&header.into_inner())?;
        record.start_disk = disk;
        record.local_header_offset = offset;
        log::trace!("stored directory {}", record.name);
        Ok(record)
    }

    fn open_source<'a>(&mut self, item: &'a SourceItem) -> Result<Option<Box<dyn Read + 'a>>, Error> {
        loop {
            match item.open() {
                Ok(reader) => return Ok(Some(reader)),
                Err(e) => match triage(self.host, &mut self.sticky, item, e)? {
                    true => continue,
                    false => return Ok(None),
                },
            }
        }
    }

    fn pack_file(
        &mut self,
        name: &str,
        item: &SourceItem,
        method: CompressionMethod,
    ) -> Result<Option<FileRecord>, Error> {
        let Some(source) = self.open_source(item)? else {
            return Ok(None);
        };

        let mut record = self.base_record(name.to_string(), item);
        record.method = method;
        record.flags |= level_flags(method, self.level);

        let encryption = self.encryption.clone();
        if let Some((kind, _)) = &encryption {
            record.flags |= FLAG_ENCRYPTED;
            if let Some(strength) = kind.aes_strength() {
                record.aes = Some(AesExtra::new(strength.code(), method));
                record.method = CompressionMethod::Aes;
            }
        }

        // ZipCrypto entries always trail a descriptor so the check byte can
        // come from the time. AES entries only need one on spanned output,
        // where the header cannot be patched.
        let descriptor = match &encryption {
            Some((Encryption::ZipCrypto, _)) => true,
            Some(_) => self.sink.is_spanned(),
            None => self.sink.is_spanned() && item.size > 0,
        };
        if descriptor {
            record.flags |= FLAG_DATA_DESCRIPTOR;
        }

        let zip64_slot = item.size >= ZIP64_RESERVE_THRESHOLD;
        let header = record.local_header(zip64_slot).into_inner();
        let (disk, offset) = self.sink.write_unit(&header)?;
        record.start_disk = disk;
        record.local_header_offset = offset;

        let mut cipher = None;
        let mut overhead = 0u64;
        if let Some((kind, password)) = &encryption {
            let (time, _) = record.modified.into_parts();
            let check = check_value(0, time, record.has_data_descriptor());
            let (context, header) = EncryptionContext::start(*kind, password, check)?;
            self.sink.write_unit(&header)?;
            overhead += header.len() as u64;
            cipher = Some(context);
        }

        let Some(streamed) = self.stream(item, source, method, cipher)? else {
            self.abandon(offset)?;
            return Ok(None);
        };

        // Fall back to storing when deflate did not pay off and the output
        // can be rewound.
        if method == CompressionMethod::Deflated
            && streamed.payload >= streamed.size
            && !self.sink.is_spanned()
        {
            log::debug!("{} does not compress, storing", name);
            self.sink.truncate(offset)?;
            return self.pack_file(name, item, CompressionMethod::Stored);
        }

        if let Some(cipher) = streamed.cipher {
            let trailer = cipher.finish();
            self.sink.write_data(&trailer)?;
            overhead += trailer.len() as u64;
        }

        record.crc = streamed.crc;
        record.size = streamed.size;
        record.compressed_size = streamed.payload + overhead;
        let overflow = record.size >= ZIP64_THRESHOLD || record.compressed_size >= ZIP64_THRESHOLD;

        if record.has_data_descriptor() {
            let descriptor = record.data_descriptor(zip64_slot || overflow);
            self.sink.write_unit(&descriptor.into_inner())?;
        } else if !self.sink.is_spanned() {
            if overflow && !zip64_slot {
                return Err(Error::unsupported(format!(
                    "{} grew past 4 GiB while being packed",
                    name
                )));
            }
            let header = record.local_header(zip64_slot).into_inner();
            self.sink.rewrite(offset, &header)?;
        }

        log::trace!(
            "packed {}: {} -> {} bytes, crc {:08x}",
            record.name,
            record.size,
            record.compressed_size,
            record.crc
        );
        Ok(Some(record))
    }

    /// Pumps the source through the compressor and cipher into the sink.
    /// Returns `None` when the host skips the item after a read error.
    fn stream(
        &mut self,
        item: &SourceItem,
        mut source: Box<dyn Read + '_>,
        method: CompressionMethod,
        cipher: Option<EncryptionContext>,
    ) -> Result<Option<Streamed>, Error> {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.resize(COPY_BUFFER_SIZE, 0);

        let cipher_writer = CipherWriter {
            sink: &mut self.sink,
            cipher,
            scratch: Vec::new(),
        };
        let mut compressor = Compressor::new(method, self.level, CountWriter::new(cipher_writer))?;
        let mut crc = Crc32::new();
        let mut size = 0u64;

        loop {
            let read = match source.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // the reader keeps its position, so a retry resumes the stream
                    if triage(self.host, &mut self.sticky, item, e)? {
                        continue;
                    }
                    self.buffer = buffer;
                    return Ok(None);
                }
            };

            crc.update(&buffer[..read]);
            size += read as u64;
            compressor.write_all(&buffer[..read])?;

            self.processed += read as u64;
            if !self.host.progress(self.processed) {
                self.buffer = buffer;
                return Err(Error::cancelled());
            }
        }

        let counted = compressor.finish()?;
        self.buffer = buffer;
        Ok(Some(Streamed {
            crc: crc.value(),
            size,
            payload: counted.count(),
            cipher: counted.writer.cipher,
        }))
    }

    /// Drops a partially written entry. Spanned output keeps the orphaned
    /// bytes; no central record will point at them.
    fn abandon(&mut self, offset: u64) -> Result<(), Error> {
        if self.sink.is_spanned() {
            return Ok(());
        }
        self.sink.truncate(offset)
    }

    /// Writes the central directory followed by the end of central directory
    /// group, with the Zip64 records whenever a field overflows.
    pub fn finalize_archive(
        &mut self,
        store: &CentralDirectoryStore,
        comment: &[u8],
        reason: FinalizeReason,
    ) -> Result<CentralDirectoryEnd, Error> {
        if reason == FinalizeReason::SelfExtractor {
            let end_offset = self.sink.position() + store.size();
            if end_offset >= ZIP64_THRESHOLD || store.len() >= ZIP64_ENTRIES_THRESHOLD {
                return Err(Error::unsupported("self-extractors cannot hold Zip64 archives"));
            }
            for record in store.records() {
                if record?.needs_zip64() {
                    return Err(Error::unsupported("self-extractors cannot hold Zip64 entries"));
                }
            }
        }

        let mut start = None;
        let mut entries_on_disk = 0u64;

        if self.sink.is_spanned() {
            let mut current_disk = None;
            for record in store.raw_records() {
                let (disk, position) = self.sink.write_unit(record?)?;
                start.get_or_insert((disk, position));
                if current_disk == Some(disk) {
                    entries_on_disk += 1;
                } else {
                    current_disk = Some(disk);
                    entries_on_disk = 1;
                }
            }
        } else {
            start = Some((self.sink.disk(), self.sink.position()));
            self.sink.write_data(store.as_bytes())?;
            entries_on_disk = store.len();
        }

        let (cd_start_disk, cd_offset) = start.unwrap_or((self.sink.disk(), self.sink.position()));

        let mut end = CentralDirectoryEnd {
            disk: self.sink.disk(),
            cd_start_disk,
            entries_on_disk,
            total_entries: store.len(),
            cd_size: store.size(),
            cd_offset,
            comment: comment.to_vec(),
        };

        if reason == FinalizeReason::SelfExtractor && end.needs_zip64() {
            return Err(Error::unsupported("self-extractors cannot hold Zip64 archives"));
        }

        // The end group must land on one disk, and when it moves to a fresh
        // disk that disk holds none of the directory.
        self.sink.reserve(end.encoded_len() as u64)?;
        if self.sink.disk() != end.disk {
            end.disk = self.sink.disk();
            end.entries_on_disk = 0;
        }

        let group = end.encode(self.sink.position())?;
        self.sink.write_data(&group.into_inner())?;
        log::debug!(
            "wrote central directory: {} entries, {} bytes at {}:{}{}",
            end.total_entries,
            end.cd_size,
            end.cd_start_disk,
            end.cd_offset,
            if end.needs_zip64() { " (zip64)" } else { "" }
        );
        Ok(end)
    }
}

struct Streamed {
    crc: u32,
    size: u64,
    payload: u64,
    cipher: Option<EncryptionContext>,
}

/// Asks the host what to do about a source error. Returns true to retry and
/// false to skip.
fn triage(
    host: &dyn Host,
    sticky: &mut StickyAnswers,
    item: &SourceItem,
    error: io::Error,
) -> Result<bool, Error> {
    if sticky.skip_all_io_errors {
        log::warn!("skipping {}: {}", item.name, error);
        return Ok(false);
    }

    match host.io_error(&item.display_path(), &error) {
        IoErrorDecision::Retry => Ok(true),
        IoErrorDecision::Skip => {
            log::warn!("skipping {}: {}", item.name, error);
            Ok(false)
        }
        IoErrorDecision::SkipAll => {
            sticky.skip_all_io_errors = true;
            Ok(false)
        }
        IoErrorDecision::Cancel => Err(Error::io(error)),
    }
}
