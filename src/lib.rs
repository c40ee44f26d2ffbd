#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]
#![forbid(unsafe_code)]

mod central_dir;
mod cipher;
mod codec;
mod crc;
mod errors;
mod host;
mod locator;
mod matcher;
mod options;
mod reader;
mod reader_at;
mod records;
pub mod sfx;
mod source;
mod time;
mod update;
mod utils;
pub mod volume;
mod writer;

pub use central_dir::CentralDirectoryStore;
pub use cipher::{AesStrength, Encryption};
pub use crc::{crc32, crc32_chunk};
pub use errors::{Error, ErrorCategory, ErrorKind};
pub use host::{
    DiskChangeDecision, Host, IoErrorDecision, LowSpaceDecision, OverwriteDecision, OverwritePrompt,
    PasswordDecision, Unattended,
};
pub use locator::{ArchiveTail, ZipLocator};
pub use matcher::{select_for_delete, Matcher, PendingAction};
pub use options::PackOptions;
pub use reader::{ArchiveReader, VerifyReport};
pub use reader_at::ReaderAt;
pub use records::{AesExtra, CentralDirectoryEnd, CompressionMethod, FileRecord};
pub use sfx::{SelfExtractorBuilder, SfxSettings};
pub use source::{Enumerator, FsEnumerator, ItemList, SourceItem};
pub use time::DosDateTime;
pub use update::{ArchiveSession, ArchiveUpdater, DeleteSummary, PackSummary};
pub use volume::{VolumeCapacity, VolumeNaming, VolumeOptions};
pub use writer::{ArchiveSink, ArchiveWriter, FinalizeReason, PackOutcome, SeekableSink, Storage};
