//! OOXML spreadsheet workbooks (`.xlsx`).
//!
//! Every sheet is rendered in workbook order as tab-separated rows. Sheets
//! are separated by a blank line. Cells keep their column position, so an
//! empty `B1` between `A1` and `C1` still produces an empty field.

use std::collections::HashMap;

use crate::error::ExtractionError;
use crate::extract::word::read_part;
use crate::extract::xml::{self, Token};

const WORKBOOK: &str = "xl/workbook.xml";
const WORKBOOK_RELS: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS: &str = "xl/sharedStrings.xml";

/// Columns in a worksheet, `A` through `XFD`.
const MAX_COLUMNS: usize = 16_384;

pub fn extract_workbook(bytes: &[u8]) -> Result<String, ExtractionError> {
    let workbook = read_part(bytes, WORKBOOK)?.ok_or_else(|| ExtractionError::MissingPart {
        part: WORKBOOK.into(),
    })?;
    let rels = read_part(bytes, WORKBOOK_RELS)?
        .map(|xml| relationships(&xml))
        .unwrap_or_default();
    let shared = read_part(bytes, SHARED_STRINGS)?
        .map(|xml| shared_strings(&xml))
        .unwrap_or_default();

    let mut rendered = Vec::new();
    for (index, sheet) in sheet_order(&workbook).into_iter().enumerate() {
        let path = sheet
            .rel_id
            .as_deref()
            .and_then(|id| rels.get(id))
            .map(|target| part_path(target))
            .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", index + 1));

        let Some(xml) = read_part(bytes, &path)? else {
            tracing::warn!(sheet = %sheet.name, part = %path, "Worksheet part missing, skipping");
            continue;
        };
        let text = sheet_text(&xml, &shared)?;
        if !text.is_empty() {
            rendered.push(text);
        }
    }

    Ok(rendered.join("\n\n"))
}

struct SheetRef {
    name: String,
    rel_id: Option<String>,
}

/// Sheets as declared in `<sheets>`, which is the order the user sees.
fn sheet_order(workbook: &str) -> Vec<SheetRef> {
    xml::tokens(workbook)
        .filter_map(|token| match token {
            Token::Start { attrs, .. } if token.local_name() == Some("sheet") => Some(SheetRef {
                name: xml::attr(attrs, "name").unwrap_or_default(),
                rel_id: xml::attr(attrs, "r:id"),
            }),
            _ => None,
        })
        .collect()
}

/// Relationship id → target path.
fn relationships(rels: &str) -> HashMap<String, String> {
    xml::tokens(rels)
        .filter_map(|token| match token {
            Token::Start { attrs, .. } if token.local_name() == Some("Relationship") => {
                Some((xml::attr(attrs, "Id")?, xml::attr(attrs, "Target")?))
            }
            _ => None,
        })
        .collect()
}

/// Relationship targets are relative to `xl/` unless absolute.
fn part_path(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{target}"),
    }
}

/// Shared string table. Rich-text runs inside one `<si>` are concatenated;
/// phonetic hints (`<rPh>`) are not visible text and are dropped.
fn shared_strings(xml: &str) -> Vec<String> {
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut in_phonetic = false;

    for token in xml::tokens(xml) {
        match (&token, token.local_name()) {
            (Token::Start { self_closing: false, .. }, Some("si")) => current.clear(),
            (Token::End { .. }, Some("si")) => strings.push(std::mem::take(&mut current)),
            (Token::Start { self_closing: false, .. }, Some("rPh")) => in_phonetic = true,
            (Token::End { .. }, Some("rPh")) => in_phonetic = false,
            (Token::Start { self_closing, .. }, Some("t")) => in_text = !*self_closing,
            (Token::End { .. }, Some("t")) => in_text = false,
            (Token::Text(text), None) if in_text && !in_phonetic => current.push_str(text),
            _ => {}
        }
    }
    strings
}

/// Zero-based column index from a cell reference (`C7` → 2). `Ok(None)`
/// when the reference has no column letters.
fn column_index(reference: &str) -> Result<Option<usize>, ExtractionError> {
    let letters = reference
        .bytes()
        .take_while(u8::is_ascii_alphabetic)
        .map(|b| usize::from(b.to_ascii_uppercase() - b'A') + 1);

    let mut n = 0usize;
    let mut seen = false;
    for digit in letters {
        seen = true;
        n = n
            .checked_mul(26)
            .and_then(|n| n.checked_add(digit))
            .filter(|&n| n <= MAX_COLUMNS)
            .ok_or_else(|| ExtractionError::Format {
                format: "xlsx".into(),
                reason: format!("cell reference {reference:?} is past column XFD"),
            })?;
    }
    Ok(seen.then(|| n - 1))
}

#[derive(Default)]
struct Cell {
    column: Option<usize>,
    kind: Option<String>,
    value: String,
}

impl Cell {
    fn display(&self, shared: &[String]) -> String {
        match self.kind.as_deref() {
            Some("s") => self
                .value
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| shared.get(i))
                .cloned()
                .unwrap_or_default(),
            Some("b") => match self.value.trim() {
                "1" => "TRUE".into(),
                "0" => "FALSE".into(),
                other => other.into(),
            },
            _ => self.value.clone(),
        }
    }
}

fn sheet_text(xml: &str, shared: &[String]) -> Result<String, ExtractionError> {
    let mut lines = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell: Option<Cell> = None;
    let mut capture = false;

    for token in xml::tokens(xml) {
        match (&token, token.local_name()) {
            (Token::Start { self_closing: false, .. }, Some("row")) => row.clear(),
            (Token::End { .. }, Some("row")) => {
                while row.last().is_some_and(String::is_empty) {
                    row.pop();
                }
                if !row.is_empty() {
                    lines.push(row.join("\t"));
                }
                row.clear();
            }
            (Token::Start { attrs, self_closing, .. }, Some("c")) => {
                let column = match xml::attr(attrs, "r") {
                    Some(reference) => column_index(&reference)?,
                    None => None,
                };
                let started = Cell {
                    column,
                    kind: xml::attr(attrs, "t"),
                    value: String::new(),
                };
                if *self_closing {
                    place(&mut row, started.column, String::new());
                } else {
                    cell = Some(started);
                }
            }
            (Token::End { .. }, Some("c")) => {
                if let Some(done) = cell.take() {
                    let text = done.display(shared);
                    place(&mut row, done.column, text);
                }
            }
            // <v> holds the stored value, <t> holds inline string text.
            (Token::Start { self_closing: false, .. }, Some("v" | "t")) => capture = cell.is_some(),
            (Token::End { .. }, Some("v" | "t")) => capture = false,
            (Token::Text(text), None) if capture => {
                if let Some(current) = cell.as_mut() {
                    current.value.push_str(text);
                }
            }
            _ => {}
        }
    }

    Ok(lines.join("\n"))
}

/// Put `text` at `column`, padding skipped columns with empty fields.
/// Cells without a reference follow the last one; a row never grows past
/// `MAX_COLUMNS`.
fn place(row: &mut Vec<String>, column: Option<usize>, text: String) {
    match column {
        Some(col) if col >= row.len() => {
            row.resize(col, String::new());
            row.push(text);
        }
        Some(col) => row[col] = text,
        None if row.len() < MAX_COLUMNS => row.push(text),
        None => {}
    }
}
