//! Adding to, deleting from and commenting archives on disk.
//!
//! Every operation follows the same shape: open the archive as an
//! [`ArchiveSession`], change its data and central directory, then write a
//! fresh directory and end record after the last committed entry. With
//! backups enabled the session runs on a temporary copy that replaces the
//! archive only once everything succeeded.

use crate::central_dir::CentralDirectoryStore;
use crate::cipher::Encryption;
use crate::errors::{Error, ErrorKind};
use crate::host::Host;
use crate::locator::ZipLocator;
use crate::matcher::{select_for_delete, Matcher, PendingAction};
use crate::options::PackOptions;
use crate::reader_at::ReaderAt;
use crate::records::{CentralDirectoryEnd, END_OF_CENTRAL_DIR_SIZE};
use crate::sfx::SelfExtractorBuilder;
use crate::source::{Enumerator, SourceItem};
use crate::time::DosDateTime;
use crate::volume::{FileVolumes, VolumeManager, VolumeOptions};
use crate::writer::{ArchiveSink, ArchiveWriter, FinalizeReason, PackOutcome, SeekableSink, Storage};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const MOVE_CHUNK: usize = 64 * 1024;

/// What a pack operation did.
#[derive(Debug, Default, Clone)]
pub struct PackSummary {
    pub added: u64,
    pub replaced: u64,
    /// Candidates left alone because the archive already holds them.
    pub unchanged: u64,
    /// Candidates dropped after a source error the host chose to skip.
    pub skipped: Vec<String>,
    pub total_entries: u64,
    packed: Vec<SourceItem>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeleteSummary {
    pub deleted: u64,
    pub total_entries: u64,
}

/// An archive opened for modification.
///
/// Offsets inside the session are archive positions: they exclude any
/// prefix in front of the payload, such as a self-extractor stub.
#[derive(Debug)]
pub struct ArchiveSession<S> {
    storage: S,
    base: u64,
    store: CentralDirectoryStore,
    data_end: u64,
    comment: Vec<u8>,
    is_new: bool,
}

impl<S: Storage> ArchiveSession<S> {
    /// Opens an existing archive, or starts a new one when the storage is
    /// empty.
    pub fn open(mut storage: S) -> Result<Self, Error> {
        let len = storage.seek(SeekFrom::End(0))?;
        if len == 0 {
            return Ok(Self::create(storage, 0));
        }

        let mut buffer = vec![0u8; 64 * 1024];
        let tail = ZipLocator::new().locate_in_reader(&mut storage, &mut buffer)?;
        if tail.is_multi_disk() {
            return Err(Error::unsupported("multi-disk archives cannot be updated"));
        }
        let store = CentralDirectoryStore::load(&storage, &tail)?;
        log::debug!(
            "opened archive: {} entries, data ends at {}, base offset {}",
            store.len(),
            tail.cd_offset,
            tail.base_offset
        );

        Ok(ArchiveSession {
            storage,
            base: tail.base_offset,
            store,
            data_end: tail.cd_offset,
            comment: tail.comment,
            is_new: false,
        })
    }

    /// Starts an empty archive whose payload begins `base` bytes into the
    /// storage.
    pub fn create(storage: S, base: u64) -> Self {
        ArchiveSession {
            storage,
            base,
            store: CentralDirectoryStore::new(),
            data_end: 0,
            comment: Vec::new(),
            is_new: true,
        }
    }

    pub fn store(&self) -> &CentralDirectoryStore {
        &self.store
    }

    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// End of the last committed entry.
    pub fn data_end(&self) -> u64 {
        self.data_end
    }

    pub fn set_comment(&mut self, comment: Vec<u8>) -> Result<(), Error> {
        if comment.len() > u16::MAX as usize {
            return Err(Error::invalid_input(format!(
                "archive comments are limited to {} bytes, got {}",
                u16::MAX,
                comment.len()
            )));
        }
        self.comment = comment;
        Ok(())
    }

    /// Physically removes the entries whose local headers start at
    /// `offsets`, shifting later data down and rebasing their records.
    pub fn remove_entries(&mut self, offsets: &[u64], host: &dyn Host) -> Result<u64, Error> {
        let doomed: BTreeSet<u64> = offsets.iter().copied().collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        let mut starts = Vec::new();
        for record in self.store.records() {
            starts.push(record?.local_header_offset);
        }
        starts.sort_unstable();
        starts.dedup();

        // Runs of adjacent doomed entries as (first start, end of last).
        let mut runs: Vec<(u64, u64)> = Vec::new();
        for (i, &start) in starts.iter().enumerate() {
            if !doomed.contains(&start) {
                continue;
            }
            let end = starts.get(i + 1).copied().unwrap_or(self.data_end);
            match runs.last_mut() {
                Some(run) if run.1 == start => run.1 = end,
                _ => runs.push((start, end)),
            }
        }

        let mut removed = 0;
        for &(start, end) in runs.iter().rev() {
            if !host.progress(0) {
                return Err(Error::cancelled());
            }

            let delta = end - start;
            let mut moved = 0;
            let result = self.move_down(end, start, self.data_end - end, &mut moved);

            // The run's own data is overwritten either way.
            for &offset in doomed.range(start..end) {
                self.store.remove_record(offset)?;
                removed += 1;
            }

            if let Err(e) = result {
                self.salvage_partial_move(start, end, moved)?;
                return Err(e);
            }
            self.store.rebase_offsets(start, self.data_end, delta)?;
            self.data_end -= delta;
            log::debug!("removed {} bytes at {}", delta, start);
        }
        Ok(removed)
    }

    /// Copies `len` bytes from `from` down to `to`, counting in `moved` the
    /// bytes that reached their destination.
    fn move_down(&mut self, from: u64, to: u64, len: u64, moved: &mut u64) -> Result<(), Error> {
        let mut buffer = vec![0u8; MOVE_CHUNK];
        while *moved < len {
            let chunk = (len - *moved).min(MOVE_CHUNK as u64) as usize;
            self.storage
                .read_exact_at(&mut buffer[..chunk], self.base + from + *moved)?;
            self.storage.seek(SeekFrom::Start(self.base + to + *moved))?;
            self.storage.write_all(&buffer[..chunk])?;
            *moved += chunk as u64;
        }
        Ok(())
    }

    /// Brings the directory in line with the data after the move of the
    /// entries behind `end` down to `start` stopped after `moved` bytes.
    ///
    /// Entries that were copied whole now live `end - start` bytes lower.
    /// Entries beyond the reach of the failed write are still intact where
    /// they were. Anything in between is lost and leaves the directory.
    fn salvage_partial_move(&mut self, start: u64, end: u64, moved: u64) -> Result<(), Error> {
        let written_to = start + moved + MOVE_CHUNK as u64;
        let mut starts = Vec::new();
        for record in self.store.records() {
            starts.push(record?.local_header_offset);
        }
        starts.sort_unstable();
        starts.dedup();

        let mut moved_end = end;
        let mut lost = Vec::new();
        for (i, &offset) in starts.iter().enumerate() {
            if offset < end {
                continue;
            }
            let next = starts.get(i + 1).copied().unwrap_or(self.data_end);
            if next <= end + moved {
                moved_end = next;
            } else if offset < written_to {
                lost.push(offset);
            }
        }

        for offset in lost {
            let record = self.store.remove_record(offset)?;
            log::warn!("dropping {}: its data was overwritten by a failed move", record.name);
        }
        self.store.rebase_offsets(start, moved_end, end - start)?;
        Ok(())
    }

    /// Drops replaced entries and stores every candidate of the plan after
    /// the committed data.
    pub fn apply(
        &mut self,
        plan: &[PendingAction],
        options: &PackOptions,
        host: &dyn Host,
        summary: &mut PackSummary,
    ) -> Result<(), Error> {
        let replaced: Vec<u64> = plan
            .iter()
            .filter_map(|action| action.removes().map(|r| r.local_header_offset))
            .collect();
        self.remove_entries(&replaced, host)?;

        let sink = SeekableSink::new(&mut self.storage, self.base, self.data_end)?;
        let mut writer = ArchiveWriter::new(sink, host)
            .level(options.level)
            .encryption(options.encryption.clone());

        for action in plan {
            let (name, item) = match action.stores() {
                Some(stored) => stored,
                None => {
                    if let PendingAction::NoAdd { item } = action {
                        summary.unchanged += 1;
                        // Directories whose files were packed leave with them.
                        if item.is_dir && !item.is_empty_dir {
                            summary.packed.push(item.clone());
                        }
                    }
                    continue;
                }
            };

            match writer.pack_one(name, item)? {
                PackOutcome::Written(record) => {
                    self.store.append_record(&record)?;
                    self.data_end = writer.sink().position();
                    match action {
                        PendingAction::Overwrite { .. } => summary.replaced += 1,
                        _ => summary.added += 1,
                    }
                    summary.packed.push(item.clone());
                }
                PackOutcome::Skipped => summary.skipped.push(name.to_string()),
            }
        }
        Ok(())
    }

    /// Stores one item after the committed data.
    pub fn append_item(&mut self, name: &str, item: &SourceItem, host: &dyn Host) -> Result<bool, Error> {
        let sink = SeekableSink::new(&mut self.storage, self.base, self.data_end)?;
        let mut writer = ArchiveWriter::new(sink, host);
        match writer.pack_one(name, item)? {
            PackOutcome::Written(record) => {
                self.store.append_record(&record)?;
                self.data_end = writer.sink().position();
                Ok(true)
            }
            PackOutcome::Skipped => Ok(false),
        }
    }

    /// Writes the central directory and end record after the committed data
    /// and cuts off anything beyond them.
    pub fn write_directory(&mut self, host: &dyn Host, reason: FinalizeReason) -> Result<CentralDirectoryEnd, Error> {
        let mut sink = SeekableSink::new(&mut self.storage, self.base, self.data_end)?;
        sink.set_end()?;
        let mut writer = ArchiveWriter::new(sink, host);
        let end = writer.finalize_archive(&self.store, &self.comment, reason)?;
        let mut sink = writer.into_sink();
        sink.set_end()?;
        self.storage.flush()?;
        Ok(end)
    }

    pub fn into_storage(self) -> S {
        self.storage
    }
}

/// Runs pack, delete and comment operations against an archive file.
pub struct ArchiveUpdater<'h> {
    path: PathBuf,
    options: PackOptions,
    host: &'h dyn Host,
}

impl<'h> ArchiveUpdater<'h> {
    pub fn new(path: impl Into<PathBuf>, options: PackOptions, host: &'h dyn Host) -> Self {
        ArchiveUpdater {
            path: path.into(),
            options,
            host,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &PackOptions {
        &self.options
    }

    /// Adds the enumerated candidates, creating the archive if needed.
    pub fn pack(&self, enumerator: &mut dyn Enumerator) -> Result<PackSummary, Error> {
        if let Some(volumes) = self.options.volumes {
            return self.pack_spanned(enumerator, volumes);
        }

        let (summary, newest) = self.modify(|session| {
            let plan = Matcher::new(session.store(), &self.options, self.host)?.plan(enumerator)?;
            if session.is_new() {
                session.set_comment(self.options.comment.clone())?;
            }
            let mut summary = PackSummary::default();
            session.apply(&plan, &self.options, self.host, &mut summary)?;
            summary.total_entries = session.store().len();
            Ok(summary)
        })?;

        log::info!(
            "{}: {} added, {} replaced, {} unchanged, {} skipped",
            self.path.display(),
            summary.added,
            summary.replaced,
            summary.unchanged,
            summary.skipped.len()
        );
        self.touch(&self.path, newest)?;
        self.remove_sources(&summary.packed);
        Ok(summary)
    }

    /// Deletes entries by name. A directory name takes everything beneath
    /// it along.
    pub fn delete<S: AsRef<str>>(&self, names: &[S]) -> Result<DeleteSummary, Error> {
        if !self.path.exists() {
            return Err(Error::io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", self.path.display()),
            )));
        }

        let (summary, newest) = self.modify(|session| {
            let selected = select_for_delete(session.store(), names, self.options.case_sensitive)?;
            let offsets: Vec<u64> = selected
                .iter()
                .filter_map(|action| action.removes().map(|r| r.local_header_offset))
                .collect();
            let deleted = session.remove_entries(&offsets, self.host)?;
            self.restore_root(session)?;
            Ok(DeleteSummary {
                deleted,
                total_entries: session.store().len(),
            })
        })?;

        log::info!("{}: deleted {} entries", self.path.display(), summary.deleted);
        self.touch(&self.path, newest)?;
        Ok(summary)
    }

    /// Replaces the archive comment.
    pub fn set_comment(&self, comment: impl Into<Vec<u8>>) -> Result<(), Error> {
        let comment = comment.into();
        if comment.len() > u16::MAX as usize {
            return Err(Error::invalid_input(format!(
                "archive comments are limited to {} bytes",
                u16::MAX
            )));
        }
        self.modify(move |session| session.set_comment(comment))?;
        Ok(())
    }

    /// Packs the candidates into a new self-extracting archive at the
    /// updater's path.
    pub fn pack_self_extractor(
        &self,
        enumerator: &mut dyn Enumerator,
        builder: &SelfExtractorBuilder,
    ) -> Result<PackSummary, Error> {
        if self.options.volumes.is_some() {
            return Err(Error::unsupported("self-extractors cannot span volumes"));
        }
        if matches!(self.options.encryption, Some((Encryption::Aes128 | Encryption::Aes256, _))) {
            return Err(Error::unsupported("self-extractors only support ZipCrypto encryption"));
        }

        let empty = CentralDirectoryStore::new();
        let plan = Matcher::new(&empty, &self.options, self.host)?.plan(enumerator)?;
        if !plan.iter().any(|action| action.stores().is_some()) {
            return Err(Error::from(ErrorKind::EmptyArchive));
        }

        let mut temp = self.temp_file()?;
        let base = builder.archive_data_offset();
        temp.as_file_mut().write_all(&builder.prefix(0, 0)?)?;

        let mut session = ArchiveSession::create(temp.as_file_mut(), base);
        session.set_comment(self.options.comment.clone())?;
        let mut summary = PackSummary::default();
        session.apply(&plan, &self.options, self.host, &mut summary)?;
        if session.store().is_empty() {
            return Err(Error::from(ErrorKind::EmptyArchive));
        }
        summary.total_entries = session.store().len();

        let end = session.write_directory(self.host, FinalizeReason::SelfExtractor)?;
        let newest = session.store().newest_time()?;
        let eocd_offset = end.cd_offset + end.cd_size;
        let archive_size = eocd_offset + (END_OF_CENTRAL_DIR_SIZE + end.comment.len()) as u64;
        let file = session.into_storage();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&builder.prefix(eocd_offset, archive_size)?)?;
        file.sync_all()?;

        temp.persist(&self.path).map_err(|e| Error::io(e.error))?;
        log::info!(
            "{}: self-extractor with {} entries, payload of {} bytes",
            self.path.display(),
            summary.total_entries,
            archive_size
        );
        self.touch(&self.path, newest)?;
        self.remove_sources(&summary.packed);
        Ok(summary)
    }

    fn pack_spanned(&self, enumerator: &mut dyn Enumerator, volumes: VolumeOptions) -> Result<PackSummary, Error> {
        if std::fs::metadata(&self.path).map(|m| m.len() > 0).unwrap_or(false) {
            return Err(Error::unsupported(
                "spanned output can only create new archives",
            ));
        }

        let mut store = CentralDirectoryStore::new();
        let plan = Matcher::new(&store, &self.options, self.host)?.plan(enumerator)?;

        let target = FileVolumes::new(&self.path, volumes.naming);
        let mut manager = VolumeManager::new(target, volumes, self.host);
        let mut summary = PackSummary::default();

        let result = (|| {
            manager.start()?;
            let mut writer = ArchiveWriter::new(&mut manager, self.host)
                .level(self.options.level)
                .encryption(self.options.encryption.clone());
            for action in &plan {
                let Some((name, item)) = action.stores() else {
                    summary.unchanged += 1;
                    continue;
                };
                match writer.pack_one(name, item)? {
                    PackOutcome::Written(record) => {
                        store.append_record(&record)?;
                        summary.added += 1;
                        summary.packed.push(item.clone());
                    }
                    PackOutcome::Skipped => summary.skipped.push(name.to_string()),
                }
            }
            writer.finalize_archive(&store, &self.options.comment, FinalizeReason::Normal)
        })();

        match result {
            Ok(end) => {
                manager.finish()?;
                summary.total_entries = store.len();
                log::info!(
                    "{}: {} entries over {} volume(s)",
                    self.path.display(),
                    summary.total_entries,
                    end.disk + 1
                );
                self.remove_sources(&summary.packed);
                Ok(summary)
            }
            Err(e) => {
                manager.abort();
                Err(e)
            }
        }
    }

    /// Runs `change` against the archive and commits the result.
    fn modify<T, F>(&self, change: F) -> Result<(T, Option<DosDateTime>), Error>
    where
        F: FnOnce(&mut ArchiveSession<&mut File>) -> Result<T, Error>,
    {
        if self.options.backup {
            let mut temp = self.temp_file()?;
            let existing = match File::open(&self.path) {
                Ok(mut original) => {
                    std::io::copy(&mut original, temp.as_file_mut())?;
                    Some(original.metadata()?.permissions())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(Error::io(e)),
            };
            log::debug!("working on copy {}", temp.path().display());

            let mut session = ArchiveSession::open(temp.as_file_mut())?;
            let value = change(&mut session)?;
            session.write_directory(self.host, FinalizeReason::Normal)?;
            let newest = session.store().newest_time()?;
            let file = session.into_storage();
            file.sync_all()?;
            if let Some(permissions) = existing {
                file.set_permissions(permissions)?;
            }
            temp.persist(&self.path).map_err(|e| Error::io(e.error))?;
            return Ok((value, newest));
        }

        let existed = self.path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        let outcome = ArchiveSession::open(&mut file).and_then(|mut session| {
            let result = change(&mut session)
                .and_then(|value| session.write_directory(self.host, FinalizeReason::Normal).map(|_| value));
            match result {
                Ok(value) => Ok((value, session.store().newest_time()?)),
                Err(e) if existed => {
                    log::warn!("{}: restoring directory after error: {}", self.path.display(), e);
                    if let Err(recovery) = session.write_directory(self.host, FinalizeReason::Normal) {
                        log::error!("{}: archive left inconsistent: {}", self.path.display(), recovery);
                    }
                    Err(e)
                }
                Err(e) => Err(e),
            }
        });

        if outcome.is_err() && !existed {
            drop(file);
            if let Err(e) = std::fs::remove_file(&self.path) {
                log::warn!("could not remove {}: {}", self.path.display(), e);
            }
        }
        outcome
    }

    fn temp_file(&self) -> Result<tempfile::NamedTempFile, Error> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        Ok(tempfile::Builder::new().prefix(".zippack").tempfile_in(dir)?)
    }

    /// Re-creates the archive root directory entry once nothing beneath it
    /// is left.
    fn restore_root(&self, session: &mut ArchiveSession<&mut File>) -> Result<(), Error> {
        let root = self.options.get_archive_root();
        if root.is_empty() || !self.options.store_empty_dirs {
            return Ok(());
        }

        let prefix = format!("{}/", root);
        let case_sensitive = self.options.case_sensitive;
        for record in session.store().records() {
            let name = record?.name;
            let occupied = if case_sensitive {
                name.starts_with(&prefix)
            } else {
                name.to_lowercase().starts_with(&prefix.to_lowercase())
            };
            if occupied {
                return Ok(());
            }
        }

        log::debug!("re-creating empty archive root {}", root);
        let item = SourceItem::directory(root, DosDateTime::now(), true);
        session.append_item(root, &item, self.host)?;
        Ok(())
    }

    fn touch(&self, path: &Path, newest: Option<DosDateTime>) -> Result<(), Error> {
        if !self.options.time_to_newest {
            return Ok(());
        }
        if let Some(newest) = newest {
            let time = filetime::FileTime::from_system_time(newest.to_system_time());
            filetime::set_file_mtime(path, time)?;
        }
        Ok(())
    }

    /// Deletes the sources of packed candidates: files first, then
    /// directories from the deepest up. Failures are only logged.
    fn remove_sources(&self, packed: &[SourceItem]) {
        if !self.options.move_files {
            return;
        }

        let mut dirs = Vec::new();
        for item in packed {
            let Some(path) = item.path() else { continue };
            if item.is_dir {
                dirs.push(path);
            } else if let Err(e) = std::fs::remove_file(path) {
                log::warn!("could not remove {}: {}", path.display(), e);
            }
        }

        dirs.sort_by_key(|path| std::cmp::Reverse(path.components().count()));
        for dir in dirs {
            if let Err(e) = std::fs::remove_dir(dir) {
                log::warn!("could not remove {}: {}", dir.display(), e);
            }
        }
    }
}
