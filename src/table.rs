use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::error::{Ez3dError, Result};

/// Submission timestamps as written by the form: `M/d/Y H:m:s`, one or two
/// digits for every field except the year.
pub const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Email,
    FirstName,
    LastName,
    Files,
    Timestamp,
    PrintId,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Email,
        Field::FirstName,
        Field::LastName,
        Field::Files,
        Field::Timestamp,
        Field::PrintId,
    ];

    pub fn is_required(self) -> bool {
        !matches!(self, Field::PrintId)
    }

    /// Name of the properties key that overrides this column's label.
    pub fn config_key(self) -> &'static str {
        match self {
            Field::Email => "EMAIL_COLUMN_LABEL",
            Field::FirstName => "FIRST_NAME_COLUMN_LABEL",
            Field::LastName => "LAST_NAME_COLUMN_LABEL",
            Field::Files => "DRIVE_LINKS_COLUMN_LABEL",
            Field::Timestamp => "TIMESTAMP_COLUMN_LABEL",
            Field::PrintId => "PRINT_ID_COLUMN_LABEL",
        }
    }
}

/// Header labels the sheet uses for each field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLabels {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub files: String,
    pub timestamp: String,
    pub print_id: String,
}

impl ColumnLabels {
    pub fn label(&self, field: Field) -> &str {
        match field {
            Field::Email => &self.email,
            Field::FirstName => &self.first_name,
            Field::LastName => &self.last_name,
            Field::Files => &self.files,
            Field::Timestamp => &self.timestamp,
            Field::PrintId => &self.print_id,
        }
    }

    pub fn check_required(&self) -> Result<()> {
        for field in Field::ALL.into_iter().filter(|f| f.is_required()) {
            if self.label(field).trim().is_empty() {
                return Err(Ez3dError::Config(format!(
                    "{} is empty; fill in the column label section of the config file",
                    field.config_key()
                )));
            }
        }
        Ok(())
    }
}

impl Default for ColumnLabels {
    fn default() -> Self {
        Self {
            email: "Email".into(),
            first_name: "First Name".into(),
            last_name: "Last Name".into(),
            files: "Files".into(),
            timestamp: "Timestamp".into(),
            print_id: "Print ID".into(),
        }
    }
}

/// How the per-user directory is named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFolder {
    FullName,
    Email,
}

/// Column-oriented sheet data. Every column holds exactly `len()` cells; short
/// or absent columns are padded with empty strings.
#[derive(Debug, Clone, Default)]
pub struct SubmissionTable {
    columns: HashMap<Field, Vec<String>>,
    len: usize,
}

impl SubmissionTable {
    pub fn from_columns(columns: impl IntoIterator<Item = (Field, Vec<String>)>) -> Self {
        let mut columns: HashMap<Field, Vec<String>> = columns.into_iter().collect();
        let len = columns.values().map(Vec::len).max().unwrap_or(0);

        for field in Field::ALL {
            let column = columns.entry(field).or_default();
            column.resize(len, String::new());
        }
        Self { columns, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn row(&self, index: usize) -> Option<SubmissionRow<'_>> {
        if index >= self.len {
            return None;
        }
        let cell = |field: Field| self.columns[&field][index].trim();
        Some(SubmissionRow {
            index,
            email: cell(Field::Email),
            first_name: cell(Field::FirstName),
            last_name: cell(Field::LastName),
            files: cell(Field::Files),
            timestamp: cell(Field::Timestamp),
            print_id: cell(Field::PrintId),
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = SubmissionRow<'_>> {
        (0..self.len).filter_map(move |i| self.row(i))
    }
}

/// One submission, borrowed from a [`SubmissionTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionRow<'a> {
    pub index: usize,
    pub email: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub files: &'a str,
    pub timestamp: &'a str,
    pub print_id: &'a str,
}

impl<'a> SubmissionRow<'a> {
    /// First required field that is empty, if any.
    pub fn missing_field(&self) -> Option<Field> {
        [
            (Field::Email, self.email),
            (Field::FirstName, self.first_name),
            (Field::LastName, self.last_name),
            (Field::Files, self.files),
            (Field::Timestamp, self.timestamp),
        ]
        .into_iter()
        .find(|(_, value)| value.is_empty())
        .map(|(field, _)| field)
    }

    pub fn submitted_at(&self) -> Option<NaiveDateTime> {
        parse_timestamp(self.timestamp)
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn initial(&self) -> Option<char> {
        self.first_name.chars().next()
    }

    /// Print id when the sheet has one for this row, otherwise the raw timestamp.
    pub fn job_key(&self) -> &'a str {
        if self.print_id.is_empty() {
            self.timestamp
        } else {
            self.print_id
        }
    }

    pub fn user_folder(&self, mode: UserFolder) -> String {
        match mode {
            UserFolder::FullName => sanitize_component(&self.full_name()),
            UserFolder::Email => sanitize_component(self.email),
        }
    }

    /// `<root>/<user folder>/<initial>_<key>_<n>.stl`, `n` starting at 1.
    pub fn target_path(&self, root: &Path, mode: UserFolder, n: usize) -> Option<PathBuf> {
        let initial = self.initial()?;
        let folder = self.user_folder(mode);
        let key = sanitize_component(self.job_key());
        if folder.is_empty() || key.is_empty() {
            return None;
        }
        let file_name = sanitize_component(&format!("{initial}_{key}_{n}.stl"));
        Some(root.join(folder).join(file_name))
    }
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT).ok()
}

/// Make `raw` safe as a single path component: drops path separators and other
/// characters Windows or Unix reject, turns spaces into underscores and trims
/// leading/trailing dots.
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') && !c.is_control())
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    cleaned.trim_matches('.').to_string()
}
