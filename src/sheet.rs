use crate::error::{Ez3dError, Result};
use crate::BoxFuture;

/// Range-read side of the remote spreadsheet.
pub trait SheetService: Send + Sync {
    /// Rows of `range` in A1 notation. Trailing empty cells may be omitted, so
    /// rows can be shorter than the range or empty.
    fn values<'a>(
        &'a self,
        spreadsheet_id: &'a str,
        range: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Vec<String>>>>;
}

/// Reads whole columns out of one sheet by header label.
pub struct TableReader<'a> {
    service: &'a dyn SheetService,
    spreadsheet_id: &'a str,
    sheet: &'a str,
}

impl<'a> TableReader<'a> {
    pub fn new(service: &'a dyn SheetService, spreadsheet_id: &'a str, sheet: &'a str) -> Self {
        Self {
            service,
            spreadsheet_id,
            sheet,
        }
    }

    pub async fn header(&self) -> Result<Vec<String>> {
        let range = format!("{}!A1:1", quote_sheet(self.sheet));
        let rows = self.service.values(self.spreadsheet_id, &range).await?;
        Ok(rows.into_iter().next().unwrap_or_default())
    }

    /// Cells beneath `label`, one per data row, empty cells as `""`.
    ///
    /// Returns an empty list when `label` is not in `header`; an empty label is
    /// a configuration error.
    pub async fn column(&self, header: &[String], label: &str) -> Result<Vec<String>> {
        let label = label.trim();
        if label.is_empty() {
            return Err(Ez3dError::Config(
                "column label is empty; fill in the column label section of the config file".into(),
            ));
        }

        let Some(index) = header_index(header, label) else {
            tracing::debug!(label, sheet = self.sheet, "label not found in header row");
            return Ok(Vec::new());
        };

        let letter = column_letter(index);
        let range = format!("{}!{letter}2:{letter}", quote_sheet(self.sheet));
        let rows = self.service.values(self.spreadsheet_id, &range).await?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().next().unwrap_or_default())
            .collect())
    }
}

pub fn header_index(header: &[String], label: &str) -> Option<usize> {
    let label = label.trim();
    header.iter().position(|h| h.trim() == label)
}

/// Zero-based column index to A1 letters: 0 → `A`, 25 → `Z`, 26 → `AA`.
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

fn quote_sheet(sheet: &str) -> String {
    format!("'{}'", sheet.replace('\'', "''"))
}
