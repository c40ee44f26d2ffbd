//! Decisions the packer delegates to whoever is driving it.
//!
//! Every call blocks until the host answers. The defaults describe an
//! unattended run: never overwrite silently, never guess a password, and
//! stop on the first error.

use crate::time::DosDateTime;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteDecision {
    Yes,
    /// Overwrite this and every later conflict without asking again.
    All,
    Skip,
    /// Skip this and every later conflict without asking again.
    SkipAll,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordDecision {
    Ok(Vec<u8>),
    /// Use this password for the remaining entries too.
    All(Vec<u8>),
    Skip,
    SkipAll,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskChangeDecision {
    Ok,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowSpaceDecision {
    Ignore,
    IgnoreAll,
    Retry,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoErrorDecision {
    Retry,
    Skip,
    SkipAll,
    Cancel,
}

/// The entry an overwrite prompt is about.
#[derive(Debug, Clone)]
pub struct OverwritePrompt<'a> {
    pub name: &'a str,
    pub existing_size: u64,
    pub existing_modified: DosDateTime,
    pub new_size: u64,
    pub new_modified: DosDateTime,
}

pub trait Host {
    /// Reports the bytes processed so far. Returning false cancels the
    /// operation at the next unit boundary.
    fn progress(&self, _bytes: u64) -> bool {
        true
    }

    fn confirm_overwrite(&self, _prompt: &OverwritePrompt<'_>) -> OverwriteDecision {
        OverwriteDecision::Skip
    }

    /// Asks for the password of an encrypted entry.
    fn password(&self, _name: &str) -> PasswordDecision {
        PasswordDecision::Cancel
    }

    /// Asks for the medium holding volume `disk` to be inserted.
    fn change_disk(&self, _disk: u32, _path: &Path) -> DiskChangeDecision {
        DiskChangeDecision::Ok
    }

    /// Reports that volume `disk` can hold fewer bytes than requested.
    fn low_space(&self, _disk: u32, _available: u64, _required: u64) -> LowSpaceDecision {
        LowSpaceDecision::Ignore
    }

    /// Reports a failure reading a source file.
    fn io_error(&self, _path: &Path, _error: &io::Error) -> IoErrorDecision {
        IoErrorDecision::Cancel
    }
}

/// A host that accepts every default.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unattended;

impl Host for Unattended {}

/// Sticky "for all" answers, one per prompt category.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StickyAnswers {
    pub(crate) overwrite_all: bool,
    pub(crate) skip_all_overwrites: bool,
    pub(crate) skip_all_io_errors: bool,
}
