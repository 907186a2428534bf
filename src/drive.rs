use regex::Regex;

use crate::error::{Ez3dError, Result};
use crate::BoxFuture;

/// Download side of the remote drive: resolves a blob identifier to its bytes.
pub trait BlobStore: Send + Sync {
    fn download<'a>(&'a self, file_id: &'a str) -> BoxFuture<'a, Result<Vec<u8>>>;
}

/// Heuristic for spotting Drive file ids inside free text.
///
/// The default matches any run of at least 25 ASCII letters, digits, `_` or
/// `-` (`[-_0-9A-Za-z]{25,}`), which is what a Drive id looks like but also
/// what a long hyphenated phrase looks like. Non-ASCII word characters never
/// appear in Drive ids and are not matched. When the pattern has a capture group, the first group is the id.
#[derive(Debug, Clone)]
pub struct BlobIdPattern {
    regex: Regex,
}

impl BlobIdPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| Ez3dError::Config(format!("invalid DRIVE_ID_PATTERN '{pattern}': {e}")))?;
        Ok(Self { regex })
    }

    pub fn with_min_length(min_length: usize) -> Result<Self> {
        if min_length == 0 {
            return Err(Ez3dError::Config(
                "DRIVE_ID_MIN_LENGTH must be at least 1".into(),
            ));
        }
        Self::new(&format!("[-_0-9A-Za-z]{{{min_length},}}"))
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Ids in order of appearance. Repeated ids are kept once.
    pub fn find_ids<'t>(&self, text: &'t str) -> Vec<&'t str> {
        let mut ids: Vec<&str> = Vec::new();
        for caps in self.regex.captures_iter(text) {
            let Some(m) = caps.get(1).or_else(|| caps.get(0)) else {
                continue;
            };
            if !m.as_str().is_empty() && !ids.contains(&m.as_str()) {
                ids.push(m.as_str());
            }
        }
        ids
    }
}

impl Default for BlobIdPattern {
    fn default() -> Self {
        Self {
            regex: Regex::new("[-_0-9A-Za-z]{25,}").expect("default blob id pattern is valid"),
        }
    }
}
