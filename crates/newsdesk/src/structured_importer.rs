//! Parses CSV/XLSX uploads into pending documents. Required columns:
//! `title`, `content`. Optional: `author`, `published_date`, `category`,
//! `source_url`, `tags` (comma-separated within a cell). Unknown columns
//! are ignored; per-row failures are collected rather than aborting the
//! whole import.

use std::collections::HashMap;
use std::io::Cursor;

use calamine::{open_workbook_from_rs, Reader, Xlsx};
use chrono::NaiveDate;

#[derive(Debug, Clone)]
pub struct ImportedRow {
    pub row: usize,
    pub title: String,
    pub content: String,
    pub author: Option<String>,
    pub published_at: Option<i64>,
    pub category: Option<String>,
    pub source_url: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum RowOutcome {
    Ok(ImportedRow),
    Error { row: usize, reason: String },
}

/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD`, and RFC 3339. Unparsable dates are
/// null rather than a row failure.
fn parse_date(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp());
        }
    }
    None
}

fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

fn row_from_fields(row_number: usize, fields: &HashMap<String, String>) -> RowOutcome {
    let title = fields.get("title").map(|s| s.trim().to_string()).unwrap_or_default();
    let content = fields.get("content").map(|s| s.trim().to_string()).unwrap_or_default();

    if title.is_empty() {
        return RowOutcome::Error { row: row_number, reason: "missing title".to_string() };
    }
    if content.is_empty() {
        return RowOutcome::Error { row: row_number, reason: "missing content".to_string() };
    }

    RowOutcome::Ok(ImportedRow {
        row: row_number,
        title,
        content,
        author: fields.get("author").map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        published_at: fields.get("published_date").and_then(|s| parse_date(s)),
        category: fields.get("category").map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        source_url: fields.get("source_url").map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        tags: fields.get("tags").map(|s| parse_tags(s)).unwrap_or_default(),
    })
}

pub fn parse_csv(bytes: &[u8]) -> Vec<RowOutcome> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes);
    let headers: Vec<String> = match reader.headers() {
        Ok(h) => h.iter().map(|s| s.trim().to_lowercase()).collect(),
        Err(_) => return vec![RowOutcome::Error { row: 0, reason: "could not read header row".to_string() }],
    };

    let mut outcomes = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let row_number = i + 1;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                outcomes.push(RowOutcome::Error { row: row_number, reason: e.to_string() });
                continue;
            }
        };
        let fields: HashMap<String, String> = headers
            .iter()
            .cloned()
            .zip(record.iter().map(|s| s.to_string()))
            .collect();
        outcomes.push(row_from_fields(row_number, &fields));
    }
    outcomes
}

pub fn parse_xlsx(bytes: &[u8]) -> Vec<RowOutcome> {
    let cursor = Cursor::new(bytes.to_vec());
    let mut workbook: Xlsx<_> = match open_workbook_from_rs(cursor) {
        Ok(wb) => wb,
        Err(e) => return vec![RowOutcome::Error { row: 0, reason: format!("opening workbook: {e}") }],
    };

    let sheet_name = match workbook.sheet_names().first().cloned() {
        Some(name) => name,
        None => return vec![RowOutcome::Error { row: 0, reason: "workbook has no sheets".to_string() }],
    };

    let range = match workbook.worksheet_range(&sheet_name) {
        Ok(r) => r,
        Err(e) => return vec![RowOutcome::Error { row: 0, reason: format!("reading sheet: {e}") }],
    };

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row.iter().map(|c| c.to_string().trim().to_lowercase()).collect(),
        None => return vec![RowOutcome::Error { row: 0, reason: "sheet has no header row".to_string() }],
    };

    let mut outcomes = Vec::new();
    for (i, row) in rows.enumerate() {
        let row_number = i + 1;
        let fields: HashMap<String, String> =
            headers.iter().cloned().zip(row.iter().map(|c| c.to_string())).collect();
        outcomes.push(row_from_fields(row_number, &fields));
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_content_is_a_row_error_not_an_abort() {
        let csv = "title,content\nA,Body one\nB,\nC,Body three\n";
        let outcomes = parse_csv(csv.as_bytes());
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], RowOutcome::Ok(_)));
        assert!(matches!(outcomes[1], RowOutcome::Error { row: 2, .. }));
        assert!(matches!(outcomes[2], RowOutcome::Ok(_)));
    }

    #[test]
    fn parses_tags_and_dates() {
        let csv = "title,content,tags,published_date\nA,Body,\"x, y\",2024-01-15\n";
        let outcomes = parse_csv(csv.as_bytes());
        let RowOutcome::Ok(row) = &outcomes[0] else { panic!("expected Ok") };
        assert_eq!(row.tags, vec!["x", "y"]);
        assert!(row.published_at.is_some());
    }

    #[test]
    fn unparsable_date_is_null_not_an_error() {
        let csv = "title,content,published_date\nA,Body,not-a-date\n";
        let outcomes = parse_csv(csv.as_bytes());
        let RowOutcome::Ok(row) = &outcomes[0] else { panic!("expected Ok") };
        assert!(row.published_at.is_none());
    }
}
