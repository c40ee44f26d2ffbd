//! Self-extracting archives.
//!
//! A self-extractor is laid out as
//!
//! ```text
//! [stub][header][string table][ZIP payload]
//! ```
//!
//! The header records where the payload's end of central directory record
//! sits and how large the payload is, both relative to the payload start.
//! The ZIP payload keeps its own offsets relative to its start too, so
//! stripping everything before it leaves an ordinary archive.

use crate::crc::crc32;
use crate::errors::{Error, ErrorKind};
use crate::locator::{ArchiveTail, ZipLocator};
use crate::reader_at::{ReaderAt, ReaderAtExt};
use crate::records::{CompressionMethod, ZIP64_ENTRIES_THRESHOLD};
use crate::central_dir::CentralDirectoryStore;
use crate::utils::{le_u32, RecordBuf};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Seek, SeekFrom, Write};

/// Signature opening the self-extractor header.
pub const SELF_EXTRACTOR_SIGNATURE: u32 = 0x5846_5350;

/// Fixed part of the header: five words, thirteen string offsets and the
/// message box style.
pub const SELF_EXTRACTOR_HEADER_SIZE: usize = 5 * 4 + 13 * 4 + 4;

pub const SFX_FLAG_SHOW_SUMMARY: u32 = 0x0001;
pub const SFX_FLAG_AUTO: u32 = 0x0002;
pub const SFX_FLAG_HIDE_MAIN_DIALOG: u32 = 0x0004;
pub const SFX_FLAG_OVERWRITE_ALL: u32 = 0x0008;
/// Delete the extracted files once the command and `wait_for` exit.
pub const SFX_FLAG_REMOVE_AFTER: u32 = 0x0010;
pub const SFX_FLAG_REQUIRES_ADMIN: u32 = 0x0020;
pub const SFX_FLAG_MULTI_VOLUME: u32 = 0x0040;
pub const SFX_FLAG_SEQUENTIAL_NAMES: u32 = 0x0080;

const SFX_TARGET_CURRENT: u32 = 0x0100;
const SFX_TARGET_TEMP: u32 = 0x0200;
const SFX_TARGET_TEMP_EX: u32 = 0x0400;
const SFX_TARGET_WINDIR: u32 = 0x0800;
const SFX_TARGET_SYSDIR: u32 = 0x1000;
const SFX_TARGET_ENV: u32 = 0x2000;
const SFX_TARGET_REGVALUE: u32 = 0x4000;

const PROGRAM_FILES_KEY: &str = "SOFTWARE\\Microsoft\\Windows\\CurrentVersion";
const PROGRAM_FILES_VALUE: &str = "ProgramFilesDir";

/// Predefined registry roots by their numeric ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryRoot {
    ClassesRoot,
    CurrentConfig,
    CurrentUser,
    LocalMachine,
    Users,
    PerformanceData,
    DynData,
}

impl RegistryRoot {
    const ALL: [RegistryRoot; 7] = [
        RegistryRoot::ClassesRoot,
        RegistryRoot::CurrentConfig,
        RegistryRoot::CurrentUser,
        RegistryRoot::LocalMachine,
        RegistryRoot::Users,
        RegistryRoot::PerformanceData,
        RegistryRoot::DynData,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RegistryRoot::ClassesRoot => "HKEY_CLASSES_ROOT",
            RegistryRoot::CurrentConfig => "HKEY_CURRENT_CONFIG",
            RegistryRoot::CurrentUser => "HKEY_CURRENT_USER",
            RegistryRoot::LocalMachine => "HKEY_LOCAL_MACHINE",
            RegistryRoot::Users => "HKEY_USERS",
            RegistryRoot::PerformanceData => "HKEY_PERFORMANCE_DATA",
            RegistryRoot::DynData => "HKEY_DYN_DATA",
        }
    }

    pub fn id(self) -> u32 {
        match self {
            RegistryRoot::ClassesRoot => 0x8000_0000,
            RegistryRoot::CurrentUser => 0x8000_0001,
            RegistryRoot::LocalMachine => 0x8000_0002,
            RegistryRoot::Users => 0x8000_0003,
            RegistryRoot::PerformanceData => 0x8000_0004,
            RegistryRoot::CurrentConfig => 0x8000_0005,
            RegistryRoot::DynData => 0x8000_0006,
        }
    }
}

/// Where the self-extractor unpacks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetDir {
    /// The directory the extractor is started from.
    Current,
    /// A fresh temporary directory, removable after the command runs.
    Temp,
    WindowsDir,
    SystemDir,
    /// The value of an environment variable.
    Environment(String),
    /// A path stored in the registry.
    Registry {
        root: RegistryRoot,
        subkey: String,
        value: String,
    },
}

impl TargetDir {
    fn flag(&self) -> u32 {
        match self {
            TargetDir::Current => SFX_TARGET_CURRENT,
            TargetDir::Temp => SFX_TARGET_TEMP_EX | SFX_TARGET_TEMP,
            TargetDir::WindowsDir => SFX_TARGET_WINDIR,
            TargetDir::SystemDir => SFX_TARGET_SYSDIR,
            TargetDir::Environment(_) => SFX_TARGET_ENV,
            TargetDir::Registry { .. } => SFX_TARGET_REGVALUE,
        }
    }

    /// The target spec as stored in the string table.
    fn encode(&self, buf: &mut RecordBuf) {
        match self {
            TargetDir::Environment(name) => {
                buf.bytes(name.as_bytes()).u8(0);
            }
            TargetDir::Registry { root, subkey, value } => {
                buf.u32(root.id())
                    .bytes(subkey.as_bytes())
                    .u8(0)
                    .bytes(value.as_bytes())
                    .u8(0);
            }
            _ => {
                buf.u8(0);
            }
        }
    }
}

/// A parsed target directory specification with the path beneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTargetDir {
    pub target: TargetDir,
    pub sub_dir: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetDirErrorKind {
    /// Text follows `$(Temp)`.
    TextAfterTemp = 1,
    MissingBracket = 2,
    /// Empty or unknown `$(...)` keyword.
    UnknownKeyword = 3,
    UnknownRegistryRoot = 4,
}

/// A syntax error in a target directory specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetDirError {
    pub kind: TargetDirErrorKind,
    /// Byte index of the offending character.
    pub position: usize,
}

impl TargetDirError {
    /// Error code in the low word and position in the high word.
    pub fn code(&self) -> u32 {
        self.kind as u32 | ((self.position as u32) << 16)
    }
}

impl std::fmt::Display for TargetDirError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let what = match self.kind {
            TargetDirErrorKind::TextAfterTemp => "nothing may follow $(Temp)",
            TargetDirErrorKind::MissingBracket => "missing closing bracket",
            TargetDirErrorKind::UnknownKeyword => "unknown keyword",
            TargetDirErrorKind::UnknownRegistryRoot => "unknown registry root key",
        };
        write!(f, "invalid target directory at {}: {}", self.position, what)
    }
}

impl std::error::Error for TargetDirError {}

impl From<TargetDirError> for Error {
    fn from(err: TargetDirError) -> Self {
        Error::invalid_input(err.to_string())
    }
}

/// Parses a target directory such as `$(ProgFiles)\Vendor\App`,
/// `$[APPDATA]\App`, `$<HKEY_CURRENT_USER\Software\App\Path>` or a plain
/// relative path.
pub fn parse_target_dir(spec: &str) -> Result<ParsedTargetDir, TargetDirError> {
    let bytes = spec.as_bytes();
    let plain = ParsedTargetDir {
        target: TargetDir::Current,
        sub_dir: spec.to_string(),
    };
    if bytes.first() != Some(&b'$') || bytes.len() < 2 {
        return Ok(plain);
    }

    let open = bytes[1];
    let close = match open {
        b'(' => b')',
        b'[' => b']',
        b'<' => b'>',
        _ => return Ok(plain),
    };

    let mut depth = 1;
    let mut end = 2;
    while end < bytes.len() {
        if bytes[end] == close {
            depth -= 1;
            if depth == 0 {
                break;
            }
        } else if bytes[end] == open {
            depth += 1;
        }
        end += 1;
    }
    if depth != 0 {
        return Err(TargetDirError {
            kind: TargetDirErrorKind::MissingBracket,
            position: end,
        });
    }

    let inner = &spec[2..end];
    let rest = &spec[end + 1..];
    let target = match open {
        b'(' => match inner.to_ascii_lowercase().as_str() {
            "temp" => {
                if !rest.is_empty() {
                    return Err(TargetDirError {
                        kind: TargetDirErrorKind::TextAfterTemp,
                        position: end + 1,
                    });
                }
                TargetDir::Temp
            }
            "progfiles" => TargetDir::Registry {
                root: RegistryRoot::LocalMachine,
                subkey: PROGRAM_FILES_KEY.to_string(),
                value: PROGRAM_FILES_VALUE.to_string(),
            },
            "windir" => TargetDir::WindowsDir,
            "sysdir" => TargetDir::SystemDir,
            _ => {
                return Err(TargetDirError {
                    kind: TargetDirErrorKind::UnknownKeyword,
                    position: 2,
                })
            }
        },
        b'[' => TargetDir::Environment(inner.to_string()),
        _ => parse_registry(inner)?,
    };

    Ok(ParsedTargetDir {
        target,
        sub_dir: rest.strip_prefix('\\').unwrap_or(rest).to_string(),
    })
}

fn parse_registry(inner: &str) -> Result<TargetDir, TargetDirError> {
    let root = RegistryRoot::ALL.into_iter().find(|root| {
        let name = root.name();
        inner.len() >= name.len()
            && inner.as_bytes()[..name.len()].eq_ignore_ascii_case(name.as_bytes())
            && matches!(inner.as_bytes().get(name.len()), None | Some(b'\\'))
    });
    let Some(root) = root else {
        return Err(TargetDirError {
            kind: TargetDirErrorKind::UnknownRegistryRoot,
            position: 2,
        });
    };

    let path = &inner[root.name().len()..];
    let path = path.strip_prefix('\\').unwrap_or(path);
    let (subkey, value) = match path.rfind('\\') {
        Some(split) => (&path[..split], &path[split + 1..]),
        None => ("", path),
    };
    Ok(TargetDir::Registry {
        root,
        subkey: subkey.to_string(),
        value: value.to_string(),
    })
}

/// Texts and behavior of the extractor.
#[derive(Debug, Clone)]
pub struct SfxSettings {
    pub flags: u32,
    /// Command run after extraction.
    pub command: String,
    pub text: String,
    pub title: String,
    pub target_dir: String,
    pub about: String,
    pub extract_button_text: String,
    pub vendor: String,
    pub www: String,
    /// Name of the first volume for spanned archives.
    pub archive_name: String,
    /// Message box shown before extraction.
    pub mbox_style: u32,
    pub mbox_title: String,
    pub mbox_text: String,
    /// Process to wait for before removing the extracted files.
    pub wait_for: String,
}

impl Default for SfxSettings {
    fn default() -> Self {
        SfxSettings {
            flags: SFX_FLAG_SHOW_SUMMARY,
            command: String::new(),
            text: String::new(),
            title: String::new(),
            target_dir: String::new(),
            about: String::new(),
            extract_button_text: "&Extract".to_string(),
            vendor: String::new(),
            www: String::new(),
            archive_name: String::new(),
            mbox_style: 0,
            mbox_title: String::new(),
            mbox_text: String::new(),
            wait_for: String::new(),
        }
    }
}

impl SfxSettings {
    fn has_message_box(&self) -> bool {
        !self.mbox_title.is_empty() || !self.mbox_text.is_empty()
    }
}

/// Which stub of an [`SfxPackage`] to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubVariant {
    Small,
    /// Understands encryption, volumes and removal after a command.
    Big,
}

impl StubVariant {
    pub fn for_archive(encrypted: bool, settings: &SfxSettings) -> Self {
        let remove_after = settings.flags & SFX_FLAG_REMOVE_AFTER != 0 && !settings.wait_for.is_empty();
        if encrypted || settings.flags & SFX_FLAG_MULTI_VOLUME != 0 || remove_after {
            StubVariant::Big
        } else {
            StubVariant::Small
        }
    }
}

const SFX_PACKAGE_SIGNATURE: u32 = 0x4B50_5853;
const SFX_PACKAGE_VERSION: u32 = 5;
const SFX_PACKAGE_HEADER_SIZE: usize = 9 * 4;

/// A container holding the deflated small and big extractor stubs.
///
/// Layout: signature, version, then offset, size and CRC of each stub,
/// then the CRC of the preceding header bytes, then the stubs.
#[derive(Debug, Clone)]
pub struct SfxPackage {
    data: Vec<u8>,
    small: (u32, u32, u32),
    big: (u32, u32, u32),
}

impl SfxPackage {
    pub fn build(small: &[u8], big: &[u8]) -> Result<Vec<u8>, Error> {
        let deflate = |data: &[u8]| -> Result<Vec<u8>, Error> {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        };
        let small_packed = deflate(small)?;
        let big_packed = deflate(big)?;

        let small_offset = SFX_PACKAGE_HEADER_SIZE as u32;
        let big_offset = small_offset + small_packed.len() as u32;
        let mut header = RecordBuf::with_capacity(SFX_PACKAGE_HEADER_SIZE);
        header
            .u32(SFX_PACKAGE_SIGNATURE)
            .u32(SFX_PACKAGE_VERSION)
            .u32(small_offset)
            .u32(small_packed.len() as u32)
            .u32(crc32(small))
            .u32(big_offset)
            .u32(big_packed.len() as u32)
            .u32(crc32(big));
        let mut data = header.into_inner();
        let crc = crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        data.extend_from_slice(&small_packed);
        data.extend_from_slice(&big_packed);
        Ok(data)
    }

    pub fn parse(data: Vec<u8>) -> Result<Self, Error> {
        if data.len() < SFX_PACKAGE_HEADER_SIZE {
            return Err(Error::from(ErrorKind::Eof));
        }
        let word = |i: usize| le_u32(&data[i * 4..i * 4 + 4]);
        if word(0) != SFX_PACKAGE_SIGNATURE {
            return Err(Error::from(ErrorKind::InvalidSignature {
                expected: SFX_PACKAGE_SIGNATURE,
                actual: word(0),
            }));
        }
        if word(1) != SFX_PACKAGE_VERSION {
            return Err(Error::unsupported(format!("extractor package version {}", word(1))));
        }
        let crc = crc32(&data[..SFX_PACKAGE_HEADER_SIZE - 4]);
        if crc != word(8) {
            return Err(Error::from(ErrorKind::InvalidChecksum {
                expected: word(8),
                actual: crc,
            }));
        }

        let small = (word(2), word(3), word(4));
        let big = (word(5), word(6), word(7));
        for (offset, size, _) in [small, big] {
            if u64::from(offset) + u64::from(size) > data.len() as u64 {
                return Err(Error::from(ErrorKind::Eof));
            }
        }
        Ok(SfxPackage { data, small, big })
    }

    /// Inflates one stub and checks its CRC.
    pub fn stub(&self, variant: StubVariant) -> Result<Vec<u8>, Error> {
        let (offset, size, expected) = match variant {
            StubVariant::Small => self.small,
            StubVariant::Big => self.big,
        };
        let packed = &self.data[offset as usize..(offset + size) as usize];
        let mut stub = Vec::new();
        DeflateDecoder::new(packed).read_to_end(&mut stub)?;
        let actual = crc32(&stub);
        if actual != expected {
            return Err(Error::from(ErrorKind::InvalidChecksum { expected, actual }));
        }
        Ok(stub)
    }
}

/// Strings following the fixed header, with each slot's offset from the
/// header start. Unused slots stay 0.
#[derive(Default)]
struct StringTable {
    strings: RecordBuf,
    offsets: [u32; 13],
}

impl StringTable {
    fn mark(&mut self, slot: usize) -> &mut RecordBuf {
        self.offsets[slot] = (SELF_EXTRACTOR_HEADER_SIZE + self.strings.len()) as u32;
        &mut self.strings
    }

    fn text(&mut self, slot: usize, value: &str) {
        self.mark(slot).bytes(value.as_bytes()).u8(0);
    }
}

/// What [`SelfExtractorBuilder::build`] produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SfxLayout {
    /// Absolute position of the header.
    pub header_offset: u64,
    /// Absolute position of the ZIP payload.
    pub archive_data_offset: u64,
    pub archive_size: u64,
    /// End record position relative to the payload.
    pub eocd_offset: u64,
}

/// Writes `[stub][header][strings][payload]`.
#[derive(Debug, Clone)]
pub struct SelfExtractorBuilder {
    stub: Vec<u8>,
    settings: SfxSettings,
    target: ParsedTargetDir,
}

impl SelfExtractorBuilder {
    pub fn new(stub: Vec<u8>, settings: SfxSettings) -> Result<Self, Error> {
        let target = parse_target_dir(settings.target_dir.trim_end_matches(' '))?;
        let strings = [
            &settings.command,
            &settings.text,
            &settings.title,
            &settings.about,
            &settings.extract_button_text,
            &settings.vendor,
            &settings.www,
            &settings.archive_name,
            &settings.mbox_title,
            &settings.mbox_text,
            &settings.wait_for,
            &settings.target_dir,
        ];
        if strings.iter().any(|s| s.contains('\0')) {
            return Err(Error::invalid_input("extractor texts may not contain NUL"));
        }

        let mut settings = settings;
        if target.target != TargetDir::Temp {
            settings.flags &= !SFX_FLAG_REMOVE_AFTER;
        }
        if settings.flags & SFX_FLAG_AUTO == 0 {
            settings.flags &= !SFX_FLAG_HIDE_MAIN_DIALOG;
        }
        Ok(SelfExtractorBuilder { stub, settings, target })
    }

    pub fn settings(&self) -> &SfxSettings {
        &self.settings
    }

    pub fn stub_len(&self) -> u64 {
        self.stub.len() as u64
    }

    /// Bytes from the end of the stub to the start of the payload.
    pub fn header_len(&self) -> u64 {
        self.encode_header(0, 0).into_inner().len() as u64
    }

    /// Absolute position the payload starts at.
    pub fn archive_data_offset(&self) -> u64 {
        self.stub_len() + self.header_len()
    }

    fn encode_header(&self, eocd_offset: u32, archive_size: u32) -> RecordBuf {
        let s = &self.settings;
        let remove_after = s.flags & SFX_FLAG_REMOVE_AFTER != 0;

        let mut table = StringTable::default();
        if !s.command.is_empty() {
            table.text(0, &s.command);
        }
        table.text(1, &s.text);
        table.text(2, &s.title);
        table.text(3, &self.target.sub_dir);
        table.text(4, &s.about);
        table.text(5, &s.extract_button_text);
        table.text(6, &s.vendor);
        table.text(7, &s.www);
        table.text(8, &s.archive_name);
        self.target.target.encode(table.mark(9));
        table.text(10, &s.mbox_title);
        table.text(11, &s.mbox_text);
        table.text(12, if remove_after { s.wait_for.as_str() } else { "" });

        let StringTable { strings, offsets } = table;
        let total = SELF_EXTRACTOR_HEADER_SIZE + strings.len();
        let mbox_style = if s.has_message_box() { s.mbox_style } else { u32::MAX };

        let mut header = RecordBuf::with_capacity(total);
        header
            .u32(SELF_EXTRACTOR_SIGNATURE)
            .u32(total as u32)
            .u32(s.flags | self.target.target.flag())
            .u32(eocd_offset)
            .u32(archive_size);
        for offset in offsets {
            header.u32(offset);
        }
        header.u32(mbox_style).bytes(&strings.into_inner());
        header
    }

    /// The stub followed by the header for a payload of `archive_size`
    /// bytes whose end record sits at `eocd_offset`.
    pub fn prefix(&self, eocd_offset: u64, archive_size: u64) -> Result<Vec<u8>, Error> {
        let eocd_offset = u32::try_from(eocd_offset)
            .map_err(|_| Error::unsupported("self-extractor payload exceeds 4 GiB"))?;
        let archive_size = u32::try_from(archive_size)
            .map_err(|_| Error::unsupported("self-extractor payload exceeds 4 GiB"))?;
        let mut out = Vec::new();
        out.try_reserve(self.stub.len() + self.header_len() as usize)?;
        out.extend_from_slice(&self.stub);
        out.extend_from_slice(&self.encode_header(eocd_offset, archive_size).into_inner());
        Ok(out)
    }

    /// Wraps an existing archive. Fails with
    /// [`ErrorKind::EmptyArchive`] before writing anything when the archive
    /// has no entries.
    pub fn build<R, W>(&self, mut archive: R, mut out: W) -> Result<SfxLayout, Error>
    where
        R: ReaderAt + Seek,
        W: Write,
    {
        let len = archive.seek(SeekFrom::End(0))?;
        if len == 0 {
            return Err(Error::from(ErrorKind::EmptyArchive));
        }

        let mut buffer = vec![0u8; 64 * 1024];
        let tail = ZipLocator::new().locate_in_reader(&mut archive, &mut buffer)?;
        if tail.total_entries == 0 {
            return Err(Error::from(ErrorKind::EmptyArchive));
        }
        check_compatibility(&archive, &tail)?;

        let archive_size = len - tail.base_offset;
        let eocd_offset = tail.end_group_position - tail.base_offset;
        out.write_all(&self.prefix(eocd_offset, archive_size)?)?;

        let mut position = tail.base_offset;
        while position < len {
            let read = archive.read_at(&mut buffer, position)?;
            if read == 0 {
                return Err(Error::from(ErrorKind::Eof));
            }
            let read = read.min((len - position) as usize);
            out.write_all(&buffer[..read])?;
            position += read as u64;
        }
        out.flush()?;

        let layout = SfxLayout {
            header_offset: self.stub_len(),
            archive_data_offset: self.archive_data_offset(),
            archive_size,
            eocd_offset,
        };
        log::debug!(
            "wrote self-extractor: payload of {} bytes at {}",
            layout.archive_size,
            layout.archive_data_offset
        );
        Ok(layout)
    }
}

/// Extractor stubs only understand stored and deflated entries in
/// archives without Zip64 structures.
pub fn check_compatibility<R: ReaderAt>(archive: &R, tail: &ArchiveTail) -> Result<(), Error> {
    if tail.is_zip64 || tail.total_entries >= ZIP64_ENTRIES_THRESHOLD {
        return Err(Error::unsupported("self-extractors cannot hold Zip64 archives"));
    }
    if tail.is_multi_disk() {
        return Err(Error::unsupported("self-extractors cannot wrap spanned archives"));
    }

    let store = CentralDirectoryStore::load(archive, tail)?;
    for record in store.records() {
        let record = record?;
        if record.needs_zip64() {
            return Err(Error::unsupported(format!("{} needs Zip64", record.name)));
        }
        if !matches!(record.method, CompressionMethod::Stored | CompressionMethod::Deflated) {
            return Err(Error::unsupported(format!(
                "{} uses a method the extractor cannot unpack",
                record.name
            )));
        }
    }
    Ok(())
}

/// Reads the header of a self-extractor back, for inspection.
pub fn read_header<R: ReaderAt>(reader: &R, header_offset: u64) -> Result<SfxHeaderInfo, Error> {
    let fixed = reader.read_vec_at(SELF_EXTRACTOR_HEADER_SIZE as u64, header_offset)?;
    let word = |i: usize| le_u32(&fixed[i * 4..i * 4 + 4]);
    if word(0) != SELF_EXTRACTOR_SIGNATURE {
        return Err(Error::from(ErrorKind::InvalidSignature {
            expected: SELF_EXTRACTOR_SIGNATURE,
            actual: word(0),
        }));
    }
    Ok(SfxHeaderInfo {
        header_size: word(1),
        flags: word(2),
        eocd_offset: word(3),
        archive_size: word(4),
        mbox_style: word(18),
    })
}

/// The fixed fields of a self-extractor header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SfxHeaderInfo {
    pub header_size: u32,
    pub flags: u32,
    pub eocd_offset: u32,
    pub archive_size: u32,
    pub mbox_style: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("App", TargetDir::Current, "App")]
    #[case("$(Temp)", TargetDir::Temp, "")]
    #[case("$(windir)\\Fonts", TargetDir::WindowsDir, "Fonts")]
    #[case("$(SysDir)", TargetDir::SystemDir, "")]
    #[case("$[APPDATA]\\Vendor", TargetDir::Environment("APPDATA".into()), "Vendor")]
    #[case(
        "$(ProgFiles)\\Vendor\\App",
        TargetDir::Registry {
            root: RegistryRoot::LocalMachine,
            subkey: PROGRAM_FILES_KEY.into(),
            value: PROGRAM_FILES_VALUE.into(),
        },
        "Vendor\\App"
    )]
    #[case(
        "$<HKEY_CURRENT_USER\\Software\\App\\Path>\\sub",
        TargetDir::Registry {
            root: RegistryRoot::CurrentUser,
            subkey: "Software\\App".into(),
            value: "Path".into(),
        },
        "sub"
    )]
    fn test_parse_target_dir(#[case] spec: &str, #[case] target: TargetDir, #[case] sub_dir: &str) {
        let parsed = parse_target_dir(spec).unwrap();
        assert_eq!(parsed.target, target);
        assert_eq!(parsed.sub_dir, sub_dir);
    }

    #[rstest]
    #[case("$(Temp)\\x", TargetDirErrorKind::TextAfterTemp, 7)]
    #[case("$(Temp", TargetDirErrorKind::MissingBracket, 6)]
    #[case("$[a[b]", TargetDirErrorKind::MissingBracket, 6)]
    #[case("$(Nowhere)", TargetDirErrorKind::UnknownKeyword, 2)]
    #[case("$()", TargetDirErrorKind::UnknownKeyword, 2)]
    #[case("$<HKEY_NOPE\\x>", TargetDirErrorKind::UnknownRegistryRoot, 2)]
    fn test_parse_target_dir_errors(
        #[case] spec: &str,
        #[case] kind: TargetDirErrorKind,
        #[case] position: usize,
    ) {
        let err = parse_target_dir(spec).unwrap_err();
        assert_eq!(err.kind, kind);
        assert_eq!(err.position, position);
        assert_eq!(err.code(), kind as u32 | (position as u32) << 16);
    }

    #[test]
    fn test_package_round_trip() {
        let small = b"small stub".repeat(10);
        let big = b"big stub".repeat(100);
        let package = SfxPackage::parse(SfxPackage::build(&small, &big).unwrap()).unwrap();
        assert_eq!(package.stub(StubVariant::Small).unwrap(), small);
        assert_eq!(package.stub(StubVariant::Big).unwrap(), big);
    }

    #[test]
    fn test_package_rejects_corrupt_header() {
        let mut data = SfxPackage::build(b"a", b"b").unwrap();
        data[8] ^= 1;
        let err = SfxPackage::parse(data).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidChecksum { .. }));
    }

    #[test]
    fn test_header_string_table() {
        let settings = SfxSettings {
            command: "setup.exe".into(),
            title: "T".into(),
            target_dir: "$<HKEY_LOCAL_MACHINE\\Soft\\Dir>\\sub".into(),
            wait_for: "ignored".into(),
            ..SfxSettings::default()
        };
        let builder = SelfExtractorBuilder::new(b"MZ".to_vec(), settings).unwrap();
        let prefix = builder.prefix(100, 200).unwrap();
        let header = &prefix[2..];
        let word = |i: usize| le_u32(&header[i * 4..i * 4 + 4]);

        assert_eq!(word(0), SELF_EXTRACTOR_SIGNATURE);
        assert_eq!(word(1) as usize, header.len());
        assert_eq!(word(2) & SFX_TARGET_REGVALUE, SFX_TARGET_REGVALUE);
        assert_eq!((word(3), word(4)), (100, 200));
        // no message box
        assert_eq!(word(18), u32::MAX);

        let string = |slot: usize| {
            let start = word(5 + slot) as usize;
            let end = start + header[start..].iter().position(|&b| b == 0).unwrap();
            std::str::from_utf8(&header[start..end]).unwrap()
        };
        assert_eq!(string(0), "setup.exe");
        assert_eq!(string(2), "T");
        assert_eq!(string(3), "sub");
        assert_eq!(string(5), "&Extract");
        assert_eq!(string(12), "");

        let spec = word(5 + 9) as usize;
        assert_eq!(le_u32(&header[spec..spec + 4]), RegistryRoot::LocalMachine.id());
        assert_eq!(&header[spec + 4..spec + 4 + 9], b"Soft\0Dir\0");
    }

    #[test]
    fn test_empty_command_has_no_offset() {
        let builder = SelfExtractorBuilder::new(Vec::new(), SfxSettings::default()).unwrap();
        let prefix = builder.prefix(0, 0).unwrap();
        assert_eq!(le_u32(&prefix[20..24]), 0);
        assert_eq!(le_u32(&prefix[24..28]) as usize, SELF_EXTRACTOR_HEADER_SIZE);
    }
}
