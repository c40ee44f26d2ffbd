//! Splitting an archive across volumes.
//!
//! The [`VolumeManager`] is an [`ArchiveSink`] that tracks how much room is
//! left on the current volume and opens the next one when a record would
//! not fit. Headers and central records are written as units and never
//! straddle two volumes; file data is split wherever the volume ends.

use crate::errors::{Error, ErrorKind};
use crate::host::{DiskChangeDecision, Host, LowSpaceDecision};
use crate::records::SPANNING_MARKER;
use crate::writer::ArchiveSink;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// No volume may be smaller than this.
pub const MIN_VOLUME_SIZE: u64 = 1024;

/// How large each volume may grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeCapacity {
    Fixed(u64),
    /// Use whatever free space the target reports for each volume.
    Auto,
}

/// How volume files are named relative to the archive path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VolumeNaming {
    /// Every volume carries the archive's own name. Only useful with
    /// removable media.
    SameName,
    /// `name01.zip`, `name02.zip`, ...; `name_01.zip` when the stem ends in
    /// a digit.
    #[default]
    Sequential,
    /// `name.z01`, `name.z02`, ... with the last volume renamed to the
    /// archive name.
    WinZip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeOptions {
    pub capacity: VolumeCapacity,
    pub naming: VolumeNaming,
    /// Ask the host to change the medium before each new volume.
    pub removable: bool,
}

impl VolumeOptions {
    pub fn fixed(capacity: u64) -> Self {
        VolumeOptions {
            capacity: VolumeCapacity::Fixed(capacity),
            naming: VolumeNaming::Sequential,
            removable: false,
        }
    }
}

/// Where volumes are created.
pub trait VolumeTarget {
    type Volume: Write;

    /// Creates volume `disk`, replacing whatever is there.
    fn create(&mut self, disk: u32) -> Result<Self::Volume, Error>;

    /// Free bytes available for volume `disk`, when the target can tell.
    fn free_space(&self, _disk: u32) -> Result<Option<u64>, Error> {
        Ok(None)
    }

    /// Takes back a volume once it is complete.
    fn close(&mut self, volume: Self::Volume) -> Result<(), Error>;

    /// A displayable location for prompts.
    fn location(&self, disk: u32) -> PathBuf;

    /// Called once every volume is written. `last_disk` is the index of the
    /// final volume.
    fn finish(&mut self, _last_disk: u32) -> Result<(), Error> {
        Ok(())
    }

    /// Called when writing is abandoned.
    fn abort(&mut self, _last_disk: u32) {}
}

/// Volumes as files next to the archive path.
#[derive(Debug, Clone)]
pub struct FileVolumes {
    archive: PathBuf,
    naming: VolumeNaming,
}

impl FileVolumes {
    pub fn new(archive: impl Into<PathBuf>, naming: VolumeNaming) -> Self {
        FileVolumes {
            archive: archive.into(),
            naming,
        }
    }

    /// The file name volume `disk` is written to.
    pub fn volume_path(&self, disk: u32) -> PathBuf {
        volume_path(&self.archive, self.naming, disk)
    }
}

/// Volumes are numbered from one on disk.
pub fn volume_path(archive: &Path, naming: VolumeNaming, disk: u32) -> PathBuf {
    let number = disk + 1;
    let stem = archive
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = archive
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let name = match naming {
        VolumeNaming::SameName => return archive.to_path_buf(),
        VolumeNaming::WinZip => format!("{stem}.z{number:02}"),
        VolumeNaming::Sequential if stem.ends_with(|c: char| c.is_ascii_digit()) => {
            format!("{stem}_{number:02}{extension}")
        }
        VolumeNaming::Sequential => format!("{stem}{number:02}{extension}"),
    };
    archive.with_file_name(name)
}

impl VolumeTarget for FileVolumes {
    type Volume = io::BufWriter<File>;

    fn create(&mut self, disk: u32) -> Result<Self::Volume, Error> {
        let path = self.volume_path(disk);
        if path.exists() {
            log::debug!("replacing existing volume {}", path.display());
        }
        Ok(io::BufWriter::new(File::create(path)?))
    }

    fn close(&mut self, mut volume: Self::Volume) -> Result<(), Error> {
        volume.flush()?;
        volume.get_ref().sync_all()?;
        Ok(())
    }

    fn location(&self, disk: u32) -> PathBuf {
        self.volume_path(disk)
    }

    fn finish(&mut self, last_disk: u32) -> Result<(), Error> {
        if self.naming == VolumeNaming::WinZip {
            std::fs::rename(self.volume_path(last_disk), &self.archive)?;
        }
        Ok(())
    }

    fn abort(&mut self, last_disk: u32) {
        if self.naming == VolumeNaming::SameName {
            return;
        }
        for disk in 0..=last_disk {
            let path = self.volume_path(disk);
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("could not remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Volumes kept in memory, with optional per-volume free space.
#[derive(Debug, Clone, Default)]
pub struct MemoryVolumes {
    volumes: BTreeMap<u32, Vec<u8>>,
    free: Vec<u64>,
}

impl MemoryVolumes {
    pub fn new() -> Self {
        MemoryVolumes::default()
    }

    /// Reports `free[disk]` as the free space of each volume; volumes past
    /// the end of the list report the last value.
    pub fn with_free_space(free: Vec<u64>) -> Self {
        MemoryVolumes {
            volumes: BTreeMap::new(),
            free,
        }
    }

    pub fn volumes(&self) -> Vec<&[u8]> {
        self.volumes.values().map(Vec::as_slice).collect()
    }

    /// All volumes back to back.
    pub fn concatenated(&self) -> Vec<u8> {
        self.volumes.values().flatten().copied().collect()
    }
}

impl VolumeTarget for MemoryVolumes {
    type Volume = VolumeBuffer;

    fn create(&mut self, disk: u32) -> Result<Self::Volume, Error> {
        self.volumes.insert(disk, Vec::new());
        Ok(VolumeBuffer {
            disk,
            data: Vec::new(),
        })
    }

    fn free_space(&self, disk: u32) -> Result<Option<u64>, Error> {
        let free = self
            .free
            .get(disk as usize)
            .or_else(|| self.free.last())
            .copied();
        Ok(free)
    }

    fn close(&mut self, volume: Self::Volume) -> Result<(), Error> {
        self.volumes.insert(volume.disk, volume.data);
        Ok(())
    }

    fn location(&self, disk: u32) -> PathBuf {
        PathBuf::from(format!("memory:{disk}"))
    }
}

/// Bytes of one in-memory volume, handed back to [`MemoryVolumes`] when the
/// volume is closed.
#[derive(Debug)]
pub struct VolumeBuffer {
    disk: u32,
    data: Vec<u8>,
}

impl Write for VolumeBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeState {
    Idle,
    Writing { disk: u32 },
    /// The previous volume is closed and the next one is not open yet.
    SwitchPending { from: u32 },
    Aborted,
}

/// Writes a spanned archive through a [`VolumeTarget`].
pub struct VolumeManager<'h, T: VolumeTarget> {
    target: T,
    host: &'h dyn Host,
    options: VolumeOptions,
    state: VolumeState,
    volume: Option<T::Volume>,
    disk: u32,
    capacity: u64,
    written: u64,
    ignore_low_space: bool,
}

impl<'h, T: VolumeTarget> VolumeManager<'h, T> {
    pub fn new(target: T, options: VolumeOptions, host: &'h dyn Host) -> Self {
        VolumeManager {
            target,
            host,
            options,
            state: VolumeState::Idle,
            volume: None,
            disk: 0,
            capacity: 0,
            written: 0,
            ignore_low_space: false,
        }
    }

    pub fn state(&self) -> VolumeState {
        self.state
    }

    /// Opens the first volume and writes the spanning marker.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.state != VolumeState::Idle {
            return Err(Error::invalid_input("volume writing already started"));
        }
        self.open_volume(0)?;
        self.write_raw(&SPANNING_MARKER.to_le_bytes())
    }

    /// Whether `len` more bytes would overflow the current volume.
    pub fn would_overflow(&self, len: u64) -> bool {
        self.written + len > self.capacity
    }

    /// Room left on the current volume.
    pub fn remaining(&self) -> u64 {
        self.capacity.saturating_sub(self.written)
    }

    /// Closes the current volume and opens the next one.
    pub fn next_disk(&mut self) -> Result<(), Error> {
        let from = self.disk;
        self.close_current()?;
        self.state = VolumeState::SwitchPending { from };

        let disk = from + 1;
        if self.options.removable {
            let location = self.target.location(disk);
            if self.host.change_disk(disk, &location) == DiskChangeDecision::Cancel {
                self.state = VolumeState::Aborted;
                return Err(Error::cancelled());
            }
        }

        self.open_volume(disk)
    }

    /// Closes the last volume and returns the target.
    pub fn finish(mut self) -> Result<T, Error> {
        self.close_current()?;
        self.target.finish(self.disk)?;
        log::debug!("wrote {} volume(s)", self.disk + 1);
        Ok(self.target)
    }

    /// Gives up, letting the target clean up what was written.
    pub fn abort(mut self) -> T {
        self.volume = None;
        self.state = VolumeState::Aborted;
        self.target.abort(self.disk);
        self.target
    }

    fn close_current(&mut self) -> Result<(), Error> {
        if let Some(volume) = self.volume.take() {
            self.target.close(volume)?;
        }
        Ok(())
    }

    fn capacity_for(&mut self, disk: u32) -> Result<u64, Error> {
        loop {
            let free = self.target.free_space(disk)?;
            let capacity = match (self.options.capacity, free) {
                (VolumeCapacity::Fixed(capacity), _) => capacity,
                (VolumeCapacity::Auto, Some(free)) => free.min(u64::from(u32::MAX)),
                (VolumeCapacity::Auto, None) => {
                    return Err(Error::unsupported(
                        "cannot determine free space for automatic volume size",
                    ))
                }
            };

            let Some(free) = free else {
                return Ok(capacity);
            };

            if free < MIN_VOLUME_SIZE {
                // too little to use at all, only retrying makes sense
                match self.host.low_space(disk, free, MIN_VOLUME_SIZE) {
                    LowSpaceDecision::Retry => continue,
                    LowSpaceDecision::Cancel => return Err(Error::cancelled()),
                    _ => {
                        return Err(Error::from(ErrorKind::Capacity {
                            available: free,
                            required: MIN_VOLUME_SIZE,
                        }))
                    }
                }
            }

            if free >= capacity {
                return Ok(capacity);
            }
            if !self.ignore_low_space {
                match self.host.low_space(disk, free, capacity) {
                    LowSpaceDecision::Ignore => {}
                    LowSpaceDecision::IgnoreAll => self.ignore_low_space = true,
                    LowSpaceDecision::Retry => continue,
                    LowSpaceDecision::Cancel => return Err(Error::cancelled()),
                }
            }
            return Ok(free);
        }
    }

    fn open_volume(&mut self, disk: u32) -> Result<(), Error> {
        let capacity = match self.capacity_for(disk) {
            Ok(capacity) => capacity,
            Err(e) => {
                self.state = VolumeState::Aborted;
                return Err(e);
            }
        };
        if capacity < MIN_VOLUME_SIZE {
            self.state = VolumeState::Aborted;
            return Err(Error::from(ErrorKind::Capacity {
                available: capacity,
                required: MIN_VOLUME_SIZE,
            }));
        }

        self.volume = Some(self.target.create(disk)?);
        self.disk = disk;
        self.capacity = capacity;
        self.written = 0;
        self.state = VolumeState::Writing { disk };
        log::debug!("opened volume {} with room for {} bytes", disk, capacity);
        Ok(())
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<(), Error> {
        let Some(volume) = self.volume.as_mut() else {
            return Err(Error::invalid_input("no volume is open"));
        };
        volume.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }
}

impl<T: VolumeTarget> ArchiveSink for VolumeManager<'_, T> {
    fn disk(&self) -> u32 {
        self.disk
    }

    fn position(&self) -> u64 {
        self.written
    }

    fn reserve(&mut self, len: u64) -> Result<(), Error> {
        if len > self.capacity {
            return Err(Error::from(ErrorKind::Capacity {
                available: self.capacity,
                required: len,
            }));
        }
        if self.would_overflow(len) {
            self.next_disk()?;
        }
        Ok(())
    }

    fn write_data(&mut self, mut data: &[u8]) -> Result<(), Error> {
        while !data.is_empty() {
            if self.remaining() == 0 {
                self.next_disk()?;
            }
            let take = data.len().min(usize::try_from(self.remaining()).unwrap_or(usize::MAX));
            self.write_raw(&data[..take])?;
            data = &data[take..];
        }
        Ok(())
    }

    fn is_spanned(&self) -> bool {
        true
    }
}
