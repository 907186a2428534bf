use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::table::sanitize_component;

/// How many files a lookup shows.
pub const RECENT_FILES_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl LocalFile {
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.modified).unwrap_or_default()
    }

    pub fn age_label(&self, now: SystemTime) -> String {
        let hours = self.age(now).as_secs() / 3600;
        if hours == 1 {
            "1 hour old".to_string()
        } else {
            format!("{hours} hours old")
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found { user: String, files: Vec<LocalFile> },
    NotFound,
    Ambiguous(Vec<String>),
}

/// Names of every user directory under `root`, sorted. The tree may change
/// underneath us; entries that vanish mid-read are skipped.
pub fn user_folders(root: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    let mut users: Vec<String> = entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    users.sort_by_key(|u| u.to_lowercase());
    users
}

/// User folders whose name contains `query`, ignoring case. The query is
/// sanitized the same way folder names are, so "Ada Lovelace" finds
/// `Ada_Lovelace`. A query with nothing left after sanitizing matches no one.
pub fn find_users(root: &Path, query: &str) -> Vec<String> {
    let needle = sanitize_component(query).to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    user_folders(root)
        .into_iter()
        .filter(|user| user.to_lowercase().contains(&needle))
        .collect()
}

/// Newest files directly inside `user_dir`, at most `limit`.
pub fn recent_files(user_dir: &Path, limit: usize) -> Vec<LocalFile> {
    let Ok(entries) = fs::read_dir(user_dir) else {
        return Vec::new();
    };
    let mut files: Vec<LocalFile> = entries
        .flatten()
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            Some(LocalFile {
                path: entry.path(),
                modified: meta.modified().ok()?,
            })
        })
        .collect();
    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
    files.truncate(limit);
    files
}

/// Exactly one matching user yields their recent files.
pub fn lookup(root: &Path, query: &str) -> Lookup {
    let mut matches = find_users(root, query);
    match matches.len() {
        0 => Lookup::NotFound,
        1 => {
            let user = matches.remove(0);
            let files = recent_files(&root.join(&user), RECENT_FILES_LIMIT);
            Lookup::Found { user, files }
        }
        _ => Lookup::Ambiguous(matches),
    }
}
