use crate::cipher::Encryption;
use crate::volume::VolumeOptions;

/// How an [`ArchiveUpdater`](crate::ArchiveUpdater) packs new entries.
///
/// ```
/// use zippack::{Encryption, PackOptions};
///
/// let options = PackOptions::new()
///     .level(9)
///     .encryption(Encryption::Aes256, "secret")
///     .archive_root("backup/today");
/// assert_eq!(options.get_level(), 9);
/// ```
#[derive(Debug, Clone)]
pub struct PackOptions {
    pub(crate) level: u32,
    pub(crate) encryption: Option<(Encryption, Vec<u8>)>,
    pub(crate) store_empty_dirs: bool,
    pub(crate) overwrite_all: bool,
    pub(crate) backup: bool,
    pub(crate) time_to_newest: bool,
    pub(crate) move_files: bool,
    pub(crate) archive_root: String,
    pub(crate) volumes: Option<VolumeOptions>,
    pub(crate) comment: Vec<u8>,
    pub(crate) case_sensitive: bool,
}

impl Default for PackOptions {
    fn default() -> Self {
        PackOptions {
            level: 6,
            encryption: None,
            store_empty_dirs: true,
            overwrite_all: false,
            backup: true,
            time_to_newest: false,
            move_files: false,
            archive_root: String::new(),
            volumes: None,
            comment: Vec::new(),
            case_sensitive: false,
        }
    }
}

impl PackOptions {
    pub fn new() -> Self {
        PackOptions::default()
    }

    /// Deflate level from 0 (store) to 9. Values above 9 are clamped.
    pub fn level(mut self, level: u32) -> Self {
        self.level = level.min(9);
        self
    }

    pub fn get_level(&self) -> u32 {
        self.level
    }

    /// Encrypts every new entry with `password`.
    pub fn encryption(mut self, encryption: Encryption, password: impl AsRef<[u8]>) -> Self {
        self.encryption = Some((encryption, password.as_ref().to_vec()));
        self
    }

    pub fn no_encryption(mut self) -> Self {
        self.encryption = None;
        self
    }

    /// Stores directories with nothing beneath them. Defaults to true.
    pub fn store_empty_dirs(mut self, store: bool) -> Self {
        self.store_empty_dirs = store;
        self
    }

    /// Replaces existing entries without asking the host.
    pub fn overwrite_all(mut self, overwrite: bool) -> Self {
        self.overwrite_all = overwrite;
        self
    }

    /// Works on a copy of the archive and only replaces the original once
    /// the update succeeds. Defaults to true.
    pub fn backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    /// Sets the archive's modification time to that of its newest entry.
    pub fn time_to_newest(mut self, enabled: bool) -> Self {
        self.time_to_newest = enabled;
        self
    }

    /// Deletes source files once they are safely packed.
    pub fn move_files(mut self, enabled: bool) -> Self {
        self.move_files = enabled;
        self
    }

    /// Stores every candidate beneath `root` inside the archive.
    pub fn archive_root(mut self, root: impl AsRef<str>) -> Self {
        self.archive_root = root
            .as_ref()
            .split(|c: char| c == '/' || c == '\\')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        self
    }

    pub fn get_archive_root(&self) -> &str {
        &self.archive_root
    }

    /// Spans a new archive over volumes.
    pub fn volumes(mut self, volumes: VolumeOptions) -> Self {
        self.volumes = Some(volumes);
        self
    }

    /// Comment written into newly created archives.
    pub fn comment(mut self, comment: impl Into<Vec<u8>>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Compares names case-sensitively when matching existing entries.
    pub fn case_sensitive(mut self, enabled: bool) -> Self {
        self.case_sensitive = enabled;
        self
    }

    /// The archive name a candidate is stored under.
    pub(crate) fn archive_name(&self, name: &str) -> String {
        match (self.archive_root.is_empty(), name.is_empty()) {
            (true, _) => name.to_string(),
            (false, true) => self.archive_root.clone(),
            (false, false) => format!("{}/{}", self.archive_root, name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", "a/b.txt", "a/b.txt")]
    #[case("root", "a.txt", "root/a.txt")]
    #[case("\\x\\y\\", "a.txt", "x/y/a.txt")]
    #[case("x/", "", "x")]
    fn test_archive_name(#[case] root: &str, #[case] name: &str, #[case] expected: &str) {
        let options = PackOptions::new().archive_root(root);
        assert_eq!(options.archive_name(name), expected);
    }

    #[test]
    fn test_level_is_clamped() {
        assert_eq!(PackOptions::new().level(42).get_level(), 9);
        assert_eq!(PackOptions::default().get_level(), 6);
    }
}
