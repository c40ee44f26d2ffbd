//! Candidates to pack and the enumerators that produce them.

use crate::errors::Error;
use crate::records::{ATTRIBUTE_ARCHIVE, ATTRIBUTE_DIRECTORY};
use crate::time::DosDateTime;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const ATTRIBUTE_READONLY: u32 = 0x01;

#[derive(Debug, Clone)]
enum SourceData {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
    None,
}

/// One file or directory to pack.
#[derive(Debug, Clone)]
pub struct SourceItem {
    /// Path relative to the enumeration root with `/` separators, without a
    /// trailing slash.
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: DosDateTime,
    /// MS-DOS attribute bits.
    pub attributes: u32,
    /// Only meaningful for directories: nothing lives beneath it.
    pub is_empty_dir: bool,
    data: SourceData,
}

impl SourceItem {
    /// A file whose content lives in memory.
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Arc<[u8]>>, modified: DosDateTime) -> Self {
        let data = data.into();
        SourceItem {
            name: normalize_name(&name.into()),
            is_dir: false,
            size: data.len() as u64,
            modified,
            attributes: ATTRIBUTE_ARCHIVE,
            is_empty_dir: false,
            data: SourceData::Bytes(data),
        }
    }

    pub fn directory(name: impl Into<String>, modified: DosDateTime, is_empty: bool) -> Self {
        SourceItem {
            name: normalize_name(&name.into()),
            is_dir: true,
            size: 0,
            modified,
            attributes: ATTRIBUTE_DIRECTORY,
            is_empty_dir: is_empty,
            data: SourceData::None,
        }
    }

    /// Describes a file or directory on disk, stored under `name`.
    pub fn from_path(name: impl Into<String>, path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let metadata = std::fs::metadata(&path)?;
        let modified = metadata
            .modified()
            .map(DosDateTime::from_system_time)
            .unwrap_or_else(|_| DosDateTime::now());

        let mut attributes = if metadata.is_dir() {
            ATTRIBUTE_DIRECTORY
        } else {
            ATTRIBUTE_ARCHIVE
        };
        if metadata.permissions().readonly() {
            attributes |= ATTRIBUTE_READONLY;
        }

        let is_empty_dir = metadata.is_dir() && std::fs::read_dir(&path)?.next().is_none();
        Ok(SourceItem {
            name: normalize_name(&name.into()),
            is_dir: metadata.is_dir(),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified,
            attributes,
            is_empty_dir,
            data: SourceData::Path(path),
        })
    }

    /// The file on disk backing this item, if any.
    pub fn path(&self) -> Option<&Path> {
        match &self.data {
            SourceData::Path(path) => Some(path),
            _ => None,
        }
    }

    /// Opens the item's content. Each call starts from the beginning.
    pub fn open(&self) -> io::Result<Box<dyn Read + '_>> {
        match &self.data {
            SourceData::Path(path) => Ok(Box::new(File::open(path)?)),
            SourceData::Bytes(data) => Ok(Box::new(&data[..])),
            SourceData::None => Ok(Box::new(io::empty())),
        }
    }

    /// Where an error about this item should point.
    pub(crate) fn display_path(&self) -> PathBuf {
        self.path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(&self.name))
    }
}

fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for part in name.split(|c: char| c == '/' || c == '\\') {
        if part.is_empty() || part == "." {
            continue;
        }
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(part);
    }
    out
}

/// Produces the candidates of a pack operation, one at a time.
pub trait Enumerator {
    /// Returns the next candidate or `None` at the end. A host that wants to
    /// stop returns [`ErrorKind::UserCancel`](crate::ErrorKind::UserCancel).
    fn next_item(&mut self) -> Result<Option<SourceItem>, Error>;
}

/// Enumerates a fixed list of items.
#[derive(Debug, Default)]
pub struct ItemList {
    items: VecDeque<SourceItem>,
}

impl ItemList {
    pub fn new(items: impl IntoIterator<Item = SourceItem>) -> Self {
        ItemList {
            items: items.into_iter().collect(),
        }
    }
}

impl Enumerator for ItemList {
    fn next_item(&mut self) -> Result<Option<SourceItem>, Error> {
        Ok(self.items.pop_front())
    }
}

/// Walks files and directory trees on disk. Each root is stored under its own
/// file name, directories recursively.
pub struct FsEnumerator {
    roots: VecDeque<PathBuf>,
    current: Option<(PathBuf, walkdir::IntoIter)>,
}

impl FsEnumerator {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        FsEnumerator {
            roots: roots.into_iter().map(Into::into).collect(),
            current: None,
        }
    }
}

impl Enumerator for FsEnumerator {
    fn next_item(&mut self) -> Result<Option<SourceItem>, Error> {
        loop {
            if let Some((base, walker)) = self.current.as_mut() {
                match walker.next() {
                    Some(Ok(entry)) => {
                        if entry.file_type().is_symlink() {
                            log::warn!("skipping symbolic link {}", entry.path().display());
                            continue;
                        }
                        let relative = entry.path().strip_prefix(&*base).unwrap_or(entry.path());
                        let name = relative.to_string_lossy();
                        return Ok(Some(SourceItem::from_path(name, entry.path())?));
                    }
                    Some(Err(e)) => return Err(Error::from(io::Error::from(e))),
                    None => {}
                }
                self.current = None;
            }

            let Some(root) = self.roots.pop_front() else {
                return Ok(None);
            };

            let base = root.parent().map(Path::to_path_buf).unwrap_or_default();
            let walker = walkdir::WalkDir::new(&root).sort_by_file_name().into_iter();
            self.current = Some((base, walker));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a/b.txt", "a/b.txt")]
    #[case("a\\b\\c", "a/b/c")]
    #[case("./a//b/", "a/b")]
    #[case("/abs/path", "abs/path")]
    fn test_normalize_name(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_name(input), expected);
    }

    #[test]
    fn test_fs_enumerator_walks_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir_all(root.join("empty")).unwrap();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("sub/file.txt"), b"hello").unwrap();

        let mut enumerator = FsEnumerator::new([&root]);
        let mut seen = Vec::new();
        while let Some(item) = enumerator.next_item().unwrap() {
            seen.push((item.name.clone(), item.is_dir, item.is_empty_dir, item.size));
        }

        assert_eq!(
            seen,
            vec![
                ("root".to_string(), true, false, 0),
                ("root/empty".to_string(), true, true, 0),
                ("root/sub".to_string(), true, false, 0),
                ("root/sub/file.txt".to_string(), false, false, 5),
            ]
        );
    }

    #[test]
    fn test_bytes_source_reopens() {
        let item = SourceItem::from_bytes("x", b"data".to_vec(), DosDateTime::MIN);
        for _ in 0..2 {
            let mut buf = String::new();
            item.open().unwrap().read_to_string(&mut buf).unwrap();
            assert_eq!(buf, "data");
        }
    }
}
