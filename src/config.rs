use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::drive::BlobIdPattern;
use crate::error::{Ez3dError, Result};
use crate::table::{ColumnLabels, UserFolder};

pub const CONFIG_FILE_NAME: &str = "EZ3D.properties";
pub const CONFIG_ENV_VAR: &str = "EZ3D_CONFIG";

pub const DEFAULT_SHEET_NAME: &str = "Desktop 3D";
pub const DEFAULT_RETENTION_DAYS: f64 = 7.0;
pub const DEFAULT_REFRESH_MINUTES: f64 = 5.0;
pub const DEFAULT_FILES_DIR: &str = "files";
pub const DEFAULT_BLOB_ID_MIN_LENGTH: usize = 25;
pub const DEFAULT_DOCUMENTATION_URL: &str = "https://github.com/GilliamJonathan/EZ3D/wiki";

/// Raw key/value settings read from a Java-style properties file.
#[derive(Debug, Clone, Default)]
pub struct Config {
    values: HashMap<String, String>,
    /// Directory the config file lives in; relative credential paths resolve against it.
    base_dir: PathBuf,
}

impl Config {
    /// Load the properties file at `path`. A missing file yields an empty config
    /// so every setting falls back to its default.
    pub fn load(path: &Path) -> Result<Self> {
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self {
                values: HashMap::new(),
                base_dir,
            });
        }

        let text = fs::read_to_string(path).map_err(|e| Ez3dError::io(path, e))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(Self::parse(&text, base_dir))
    }

    pub fn parse(text: &str, base_dir: PathBuf) -> Self {
        Self {
            values: parse_properties(text),
            base_dir,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn flag(&self, key: &str) -> bool {
        self.get_or(key, "true").trim().eq_ignore_ascii_case("true")
    }

    fn number(&self, key: &str, default: f64) -> Result<f64> {
        let Some(raw) = self.get(key) else {
            return Ok(default);
        };
        let value: f64 = raw
            .trim()
            .parse()
            .map_err(|_| Ez3dError::Config(format!("{key} must be a number, got '{raw}'")))?;
        if !value.is_finite() || value < 0.0 {
            return Err(Ez3dError::Config(format!(
                "{key} must be a non-negative number, got '{raw}'"
            )));
        }
        Ok(value)
    }

    fn path(&self, key: &str, default: &str) -> PathBuf {
        let raw = PathBuf::from(self.get_or(key, default).trim());
        if raw.is_absolute() {
            raw
        } else {
            self.base_dir.join(raw)
        }
    }
}

/// Parse `key=value`, `key: value` and `key value` lines. `#` and `!` start
/// comments and a trailing backslash continues the value on the next line.
fn parse_properties(text: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    let mut pending = String::new();

    for raw_line in text.lines() {
        let line = raw_line.trim_start();
        if pending.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
            continue;
        }

        if let Some(stripped) = line.strip_suffix('\\') {
            pending.push_str(stripped);
            continue;
        }
        pending.push_str(line);

        let logical = std::mem::take(&mut pending);
        if let Some((key, value)) = split_property(&logical) {
            values.insert(key, value);
        }
    }

    if let Some((key, value)) = split_property(&pending) {
        values.insert(key, value);
    }
    values
}

fn split_property(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let split_at = line.find(|c: char| c == '=' || c == ':' || c.is_whitespace());
    let (key, rest) = match split_at {
        Some(idx) => (&line[..idx], &line[idx..]),
        None => (line, ""),
    };
    let rest = rest.trim_start();
    let value = rest
        .strip_prefix('=')
        .or_else(|| rest.strip_prefix(':'))
        .unwrap_or(rest)
        .trim();
    Some((key.to_string(), value.to_string()))
}

/// Typed, validated view of [`Config`]. Built once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub spreadsheet_id: Option<String>,
    pub sheet_name: String,
    pub labels: ColumnLabels,
    pub retention_days: f64,
    pub refresh_interval: Duration,
    pub stl_search: bool,
    pub remove_old_files: bool,
    pub files_dir: PathBuf,
    pub user_folder: UserFolder,
    pub blob_ids: BlobIdPattern,
    pub client_secret: PathBuf,
    pub token_cache: PathBuf,
    pub documentation_url: String,
}

impl Settings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let stl_search = config.flag("ENABLE_STL_SEARCH");
        let spreadsheet_id = config
            .get("SPREADSHEET_ID")
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        if stl_search && spreadsheet_id.is_none() {
            return Err(Ez3dError::Config(
                "SPREADSHEET_ID is required while ENABLE_STL_SEARCH is true".into(),
            ));
        }

        let labels = ColumnLabels {
            email: config.get_or("EMAIL_COLUMN_LABEL", "Email").to_string(),
            first_name: config.get_or("FIRST_NAME_COLUMN_LABEL", "First Name").to_string(),
            last_name: config.get_or("LAST_NAME_COLUMN_LABEL", "Last Name").to_string(),
            files: config.get_or("DRIVE_LINKS_COLUMN_LABEL", "Files").to_string(),
            timestamp: config.get_or("TIMESTAMP_COLUMN_LABEL", "Timestamp").to_string(),
            print_id: config.get_or("PRINT_ID_COLUMN_LABEL", "Print ID").to_string(),
        };
        if stl_search {
            labels.check_required()?;
        }

        let refresh_minutes = config.number("FILE_REFRESH_RATE", DEFAULT_REFRESH_MINUTES)?;
        if refresh_minutes == 0.0 {
            return Err(Ez3dError::Config("FILE_REFRESH_RATE must be greater than zero".into()));
        }
        let refresh_interval = Duration::try_from_secs_f64(refresh_minutes * 60.0).map_err(|e| {
            Ez3dError::Config(format!("FILE_REFRESH_RATE {refresh_minutes} is out of range: {e}"))
        })?;

        let user_folder = match config.get_or("USER_FOLDER", "name").trim() {
            s if s.eq_ignore_ascii_case("name") => UserFolder::FullName,
            s if s.eq_ignore_ascii_case("email") => UserFolder::Email,
            other => {
                return Err(Ez3dError::Config(format!(
                    "USER_FOLDER must be 'name' or 'email', got '{other}'"
                )))
            }
        };

        let blob_ids = match config.get("DRIVE_ID_PATTERN").filter(|p| !p.trim().is_empty()) {
            Some(pattern) => BlobIdPattern::new(pattern.trim())?,
            None => {
                let min_length = config.number("DRIVE_ID_MIN_LENGTH", DEFAULT_BLOB_ID_MIN_LENGTH as f64)?;
                BlobIdPattern::with_min_length(min_length as usize)?
            }
        };

        Ok(Self {
            spreadsheet_id,
            sheet_name: config.get_or("SHEET_NAME", DEFAULT_SHEET_NAME).to_string(),
            labels,
            retention_days: config.number("FILE_RETENTION_PERIOD", DEFAULT_RETENTION_DAYS)?,
            refresh_interval,
            stl_search,
            remove_old_files: config.flag("REMOVE_OLD_FILES"),
            files_dir: PathBuf::from(config.get_or("FILES_DIR", DEFAULT_FILES_DIR).trim()),
            user_folder,
            blob_ids,
            client_secret: config.path("CLIENT_SECRET", "client_secret.json"),
            token_cache: config.path("TOKEN_CACHE", "tokens.json"),
            documentation_url: config
                .get_or("DOCUMENTATION_URL", DEFAULT_DOCUMENTATION_URL)
                .to_string(),
        })
    }

    pub fn spreadsheet_id(&self) -> Result<&str> {
        self.spreadsheet_id
            .as_deref()
            .ok_or_else(|| Ez3dError::Config("SPREADSHEET_ID is not set".into()))
    }

    pub fn retention_millis(&self) -> f64 {
        self.retention_days * 24.0 * 60.0 * 60.0 * 1000.0
    }
}

/// Resolve the config file: explicit flag, then `$EZ3D_CONFIG`, then
/// `./EZ3D.properties`, then `<home>/EZ3D/EZ3D.properties`.
pub fn resolve_config_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }

    match dirs::home_dir() {
        Some(home) => {
            let candidate = home.join("EZ3D").join(CONFIG_FILE_NAME);
            if candidate.exists() {
                candidate
            } else {
                local
            }
        }
        None => local,
    }
}
