//! Reconciling pack candidates with what the archive already holds.

use crate::central_dir::{names_match, CentralDirectoryStore};
use crate::errors::Error;
use crate::host::{Host, OverwriteDecision, OverwritePrompt, StickyAnswers};
use crate::options::PackOptions;
use crate::records::FileRecord;
use crate::source::{Enumerator, SourceItem};
use std::collections::HashMap;

/// What to do with one candidate or existing entry.
#[derive(Debug, Clone)]
pub enum PendingAction {
    /// Store the item under `name`.
    Add { name: String, item: SourceItem },
    /// Store the item under `name` and drop the entry it replaces.
    Overwrite {
        name: String,
        item: SourceItem,
        existing: FileRecord,
    },
    /// Remove an existing entry.
    Delete { existing: FileRecord },
    /// Leave the archive alone for this candidate.
    NoAdd { item: SourceItem },
}

impl PendingAction {
    /// The existing entry this action removes, if any.
    pub fn removes(&self) -> Option<&FileRecord> {
        match self {
            PendingAction::Overwrite { existing, .. } | PendingAction::Delete { existing } => Some(existing),
            _ => None,
        }
    }

    /// The candidate this action stores, with its archive name.
    pub fn stores(&self) -> Option<(&str, &SourceItem)> {
        match self {
            PendingAction::Add { name, item } | PendingAction::Overwrite { name, item, .. } => {
                Some((name, item))
            }
            _ => None,
        }
    }
}

fn lookup_key(name: &str, case_sensitive: bool) -> String {
    let name = name.trim_end_matches('/');
    if case_sensitive {
        name.to_string()
    } else {
        name.to_lowercase()
    }
}

/// Builds the plan of a pack operation.
pub struct Matcher<'a> {
    options: &'a PackOptions,
    host: &'a dyn Host,
    existing: HashMap<String, FileRecord>,
    sticky: StickyAnswers,
}

impl<'a> Matcher<'a> {
    pub fn new(store: &CentralDirectoryStore, options: &'a PackOptions, host: &'a dyn Host) -> Result<Self, Error> {
        let mut existing = HashMap::new();
        existing.try_reserve(store.len() as usize)?;
        for record in store.records() {
            let record = record?;
            existing
                .entry(lookup_key(&record.name, options.case_sensitive))
                .or_insert(record);
        }

        Ok(Matcher {
            options,
            host,
            existing,
            sticky: StickyAnswers::default(),
        })
    }

    /// Drains the enumerator into a plan.
    pub fn plan(&mut self, enumerator: &mut dyn Enumerator) -> Result<Vec<PendingAction>, Error> {
        let mut plan = Vec::new();
        while let Some(item) = enumerator.next_item()? {
            plan.try_reserve(1)?;
            plan.push(self.classify(item)?);
        }

        log::debug!(
            "planned {} candidate(s): {} to store, {} replacing existing entries",
            plan.len(),
            plan.iter().filter(|a| a.stores().is_some()).count(),
            plan.iter().filter(|a| a.removes().is_some()).count()
        );
        Ok(plan)
    }

    /// Decides what happens to one candidate.
    pub fn classify(&mut self, item: SourceItem) -> Result<PendingAction, Error> {
        if item.is_dir && item.is_empty_dir && !self.options.store_empty_dirs {
            return Ok(PendingAction::NoAdd { item });
        }

        let name = self.options.archive_name(&item.name);
        let existing = match self.existing.get(&lookup_key(&name, self.options.case_sensitive)) {
            Some(existing) if existing.is_dir() == item.is_dir => existing,
            _ => return Ok(PendingAction::Add { name, item }),
        };

        if item.is_dir {
            return Ok(PendingAction::NoAdd { item });
        }

        let overwrite = if self.options.overwrite_all || self.sticky.overwrite_all {
            true
        } else if self.sticky.skip_all_overwrites {
            false
        } else {
            let prompt = OverwritePrompt {
                name: &name,
                existing_size: existing.size,
                existing_modified: existing.modified,
                new_size: item.size,
                new_modified: item.modified,
            };
            match self.host.confirm_overwrite(&prompt) {
                OverwriteDecision::Yes => true,
                OverwriteDecision::All => {
                    self.sticky.overwrite_all = true;
                    true
                }
                OverwriteDecision::Skip => false,
                OverwriteDecision::SkipAll => {
                    self.sticky.skip_all_overwrites = true;
                    false
                }
                OverwriteDecision::Cancel => return Err(Error::cancelled()),
            }
        };

        if overwrite {
            let existing = existing.clone();
            Ok(PendingAction::Overwrite { name, item, existing })
        } else {
            Ok(PendingAction::NoAdd { item })
        }
    }
}

/// Selects the entries to delete for the given archive names. A directory
/// name selects the directory entry and everything beneath it.
pub fn select_for_delete<S: AsRef<str>>(
    store: &CentralDirectoryStore,
    names: &[S],
    case_sensitive: bool,
) -> Result<Vec<PendingAction>, Error> {
    let names: Vec<String> = names
        .iter()
        .map(|name| name.as_ref().replace('\\', "/").trim_matches('/').to_string())
        .collect();
    let prefixes: Vec<String> = names
        .iter()
        .map(|name| format!("{}/", lookup_key(name, case_sensitive)))
        .collect();

    let mut selected = Vec::new();
    for record in store.records() {
        let record = record?;
        let key = if case_sensitive {
            record.name.clone()
        } else {
            record.name.to_lowercase()
        };
        let hit = names.iter().any(|name| names_match(&record.name, name, case_sensitive))
            || prefixes.iter().any(|prefix| key.starts_with(prefix.as_str()));
        if hit {
            selected.try_reserve(1)?;
            selected.push(PendingAction::Delete { existing: record });
        }
    }
    Ok(selected)
}
