//! Folder selection for folder-capable accounts

use std::collections::HashSet;

use crate::config::{FolderMode, FolderPolicy};

impl FolderPolicy {
    /// Whether resolving this policy needs the live folder listing
    pub fn needs_listing(&self) -> bool {
        self.mode != FolderMode::Include
    }
}

/// Resolve the folders to scan, in scan order
///
/// Include mode returns the configured list verbatim without checking that
/// the folders exist; exclude mode keeps the live order minus exact-name
/// matches.
pub fn resolve_folders(policy: &FolderPolicy, live: &[String]) -> Vec<String> {
    match policy.mode {
        FolderMode::All => live.to_vec(),
        FolderMode::Include => policy.include.clone(),
        FolderMode::Exclude => {
            let excluded: HashSet<&str> = policy.exclude.iter().map(String::as_str).collect();
            live.iter()
                .filter(|folder| !excluded.contains(folder.as_str()))
                .cloned()
                .collect()
        }
    }
}
