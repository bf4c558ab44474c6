//! Merge modes shared by the file-to-store and store-to-file sync handlers.

use crate::models::subtask::Subtask;
use crate::store::FieldMap;

/// How incoming rows combine with existing rows of the same key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Incoming rows replace existing rows wholesale; unmatched incoming rows
    /// are inserted only when `insert` is set
    Replace { insert: bool },
    /// Non-empty incoming fields overwrite; unmatched rows are inserted
    MergeInsert,
    /// Non-empty incoming fields overwrite; unmatched rows are skipped
    MergeOnly,
}

impl MergeMode {
    pub fn from_flags(replace: bool, insert: bool) -> Self {
        match (replace, insert) {
            (true, insert) => MergeMode::Replace { insert },
            (false, true) => MergeMode::MergeInsert,
            (false, false) => MergeMode::MergeOnly,
        }
    }

    /// Read the `replace` and `insert` flags of a subtask
    pub fn from_subtask(subtask: &Subtask) -> Self {
        Self::from_flags(subtask.bool_param("replace"), subtask.bool_param("insert"))
    }

    pub fn inserts(&self) -> bool {
        match self {
            MergeMode::Replace { insert } => *insert,
            MergeMode::MergeInsert => true,
            MergeMode::MergeOnly => false,
        }
    }
}

/// Outcome of merging one incoming row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeAction {
    Insert(FieldMap),
    Update(FieldMap),
    Unchanged,
    Skip,
}

/// Decide what happens to `incoming` given the existing row with its key
pub fn plan(existing: Option<&FieldMap>, incoming: &FieldMap, mode: MergeMode) -> MergeAction {
    match existing {
        None if mode.inserts() => MergeAction::Insert(incoming.clone()),
        None => MergeAction::Skip,
        Some(existing) => {
            let merged = match mode {
                MergeMode::Replace { .. } => incoming.clone(),
                MergeMode::MergeInsert | MergeMode::MergeOnly => overlay(existing, incoming),
            };
            if &merged == existing {
                MergeAction::Unchanged
            } else {
                MergeAction::Update(merged)
            }
        }
    }
}

/// `existing` with every non-empty incoming field written over it
pub fn overlay(existing: &FieldMap, incoming: &FieldMap) -> FieldMap {
    let mut merged = existing.clone();
    for (field, value) in incoming {
        if !value.trim().is_empty() {
            merged.insert(field.clone(), value.clone());
        }
    }
    merged
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub skipped: u64,
}

impl MergeStats {
    pub fn record(&mut self, action: &MergeAction) {
        match action {
            MergeAction::Insert(_) => self.inserted += 1,
            MergeAction::Update(_) => self.updated += 1,
            MergeAction::Unchanged => self.unchanged += 1,
            MergeAction::Skip => self.skipped += 1,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} inserted, {} updated, {} unchanged, {} skipped",
            self.inserted, self.updated, self.unchanged, self.skipped
        )
    }
}
