//! Word-processor documents: OOXML `.docx` and legacy OLE2 `.doc`.

use std::io::{Cursor, Read};

use crate::error::ExtractionError;
use crate::extract::ole::{self, CompoundFile, u16_at, u32_at};
use crate::extract::xml::{self, Token};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// `wIdent` of a Word 97+ file information block.
const FIB_IDENT: u16 = 0xA5EC;
const FIB_FLAG_ENCRYPTED: u16 = 0x0100;
const FIB_FLAG_TABLE_1: u16 = 0x0200;
const FIB_CCP_TEXT: usize = 0x004C;
const FIB_FC_CLX: usize = 0x01A2;
const FIB_LCB_CLX: usize = 0x01A6;

/// Piece descriptor flag: the piece is stored as 8-bit text.
const PIECE_COMPRESSED: u32 = 0x4000_0000;

/// Windows-1252 code points for bytes 0x80..=0x9F; undefined slots map to
/// C1 controls, which are dropped later.
const CP1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{81}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{8D}', '\u{017D}', '\u{8F}',
    '\u{90}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{9D}', '\u{017E}', '\u{0178}',
];

/// Read a named part out of an OOXML zip package.
pub(crate) fn read_part(bytes: &[u8], part: &str) -> Result<Option<String>, ExtractionError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractionError::Archive(e.to_string()))?;

    let mut file = match archive.by_name(part) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(ExtractionError::Archive(e.to_string())),
    };

    let mut xml = String::new();
    file.read_to_string(&mut xml)
        .map_err(|e| ExtractionError::Archive(format!("{part}: {e}")))?;
    Ok(Some(xml))
}

/// Extract the body text of a `.docx`: one line per paragraph, tabs and
/// line breaks preserved.
pub fn extract_docx(bytes: &[u8]) -> Result<String, ExtractionError> {
    let xml = read_part(bytes, "word/document.xml")?.ok_or_else(|| {
        ExtractionError::MissingPart {
            part: "word/document.xml".into(),
        }
    })?;
    Ok(document_text(&xml))
}

fn document_text(xml: &str) -> String {
    let mut out = String::new();
    let mut in_text = false;

    for token in xml::tokens(xml) {
        match (&token, token.local_name()) {
            (Token::Start { self_closing, .. }, Some("t")) => in_text = !*self_closing,
            (Token::End { .. }, Some("t")) => in_text = false,
            (Token::Start { .. }, Some("tab")) => out.push('\t'),
            (Token::Start { .. }, Some("br" | "cr")) => out.push('\n'),
            (Token::End { .. }, Some("p")) => out.push('\n'),
            (Token::Text(text), None) if in_text => out.push_str(text),
            _ => {}
        }
    }

    out.trim_end().to_string()
}

/// Extract text from a document declared as `application/msword`.
///
/// Mislabelled `.docx` packages are read as OOXML. Genuine Word 97+ files
/// are read through the piece table, which maps the main document text
/// onto 8-bit and UTF-16 runs in the `WordDocument` stream.
pub fn extract_legacy_doc(bytes: &[u8]) -> Result<String, ExtractionError> {
    if bytes.starts_with(ZIP_MAGIC) {
        return extract_docx(bytes);
    }
    if !bytes.starts_with(ole::MAGIC) {
        return Err(doc_error("not an OLE2 compound document"));
    }

    let file = CompoundFile::parse(bytes)?;
    let word = file
        .stream("WordDocument")?
        .ok_or_else(|| ExtractionError::MissingPart {
            part: "WordDocument".into(),
        })?;

    let header = |offset| u32_at(&word, offset).ok_or_else(|| doc_error("truncated FIB"));
    if word.get(..2) != Some(&FIB_IDENT.to_le_bytes()[..]) {
        return Err(doc_error("not a Word 97 or later document"));
    }
    let flags = u16_at(&word, 0x0A).ok_or_else(|| doc_error("truncated FIB"))?;
    if flags & FIB_FLAG_ENCRYPTED != 0 {
        return Err(doc_error("document is encrypted"));
    }
    let text_len = header(FIB_CCP_TEXT)?;
    let clx_at = header(FIB_FC_CLX)? as usize;
    let clx_len = header(FIB_LCB_CLX)? as usize;

    let table_name = if flags & FIB_FLAG_TABLE_1 != 0 {
        "1Table"
    } else {
        "0Table"
    };
    let table = file
        .stream(table_name)?
        .ok_or_else(|| ExtractionError::MissingPart {
            part: table_name.into(),
        })?;
    let clx = table
        .get(clx_at..clx_at.saturating_add(clx_len))
        .ok_or_else(|| doc_error("piece table outside table stream"))?;

    let mut raw = String::new();
    for piece in pieces(clx)? {
        if piece.cp_start >= text_len {
            break;
        }
        let chars = (piece.cp_end.min(text_len) - piece.cp_start) as usize;
        decode_piece(&word, &piece, chars, &mut raw)?;
    }
    Ok(clean_doc_text(&raw))
}

fn doc_error(reason: &str) -> ExtractionError {
    ExtractionError::Format {
        format: "msword".into(),
        reason: reason.into(),
    }
}

struct Piece {
    cp_start: u32,
    cp_end: u32,
    fc: u32,
}

/// Parse the CLX: optional property runs, then the piece table.
fn pieces(clx: &[u8]) -> Result<Vec<Piece>, ExtractionError> {
    let mut at = 0;
    let plc = loop {
        match clx.get(at) {
            Some(0x01) => {
                let len = clx
                    .get(at + 1..at + 3)
                    .map(|b| usize::from(u16::from_le_bytes([b[0], b[1]])))
                    .ok_or_else(|| doc_error("truncated property run"))?;
                at += 3 + len;
            }
            Some(0x02) => {
                let len = u32_at(clx, at + 1).ok_or_else(|| doc_error("truncated piece table"))?;
                break clx
                    .get(at + 5..(at + 5).saturating_add(len as usize))
                    .ok_or_else(|| doc_error("truncated piece table"))?;
            }
            _ => return Err(doc_error("piece table not found")),
        }
    };

    if plc.len() < 4 || (plc.len() - 4) % 12 != 0 {
        return Err(doc_error("malformed piece table"));
    }
    let count = (plc.len() - 4) / 12;
    let descriptors = 4 * (count + 1);
    (0..count)
        .map(|i| {
            let cp_start = u32_at(plc, 4 * i);
            let cp_end = u32_at(plc, 4 * (i + 1));
            let fc = u32_at(plc, descriptors + 8 * i + 2);
            match (cp_start, cp_end, fc) {
                (Some(cp_start), Some(cp_end), Some(fc)) if cp_start <= cp_end => Ok(Piece {
                    cp_start,
                    cp_end,
                    fc,
                }),
                _ => Err(doc_error("malformed piece descriptor")),
            }
        })
        .collect()
}

fn decode_piece(
    word: &[u8],
    piece: &Piece,
    chars: usize,
    out: &mut String,
) -> Result<(), ExtractionError> {
    if piece.fc & PIECE_COMPRESSED != 0 {
        let start = ((piece.fc & !PIECE_COMPRESSED) / 2) as usize;
        let bytes = word
            .get(start..start.saturating_add(chars))
            .ok_or_else(|| doc_error("text piece outside document stream"))?;
        out.extend(bytes.iter().map(|&b| match b {
            0x80..=0x9F => CP1252_HIGH[usize::from(b - 0x80)],
            _ => char::from(b),
        }));
    } else {
        let start = piece.fc as usize;
        let bytes = word
            .get(start..start.saturating_add(chars.saturating_mul(2)))
            .ok_or_else(|| doc_error("text piece outside document stream"))?;
        let units = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]));
        out.extend(char::decode_utf16(units).map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER)));
    }
    Ok(())
}

/// Map Word's in-band control characters to plain text. Field codes
/// (between 0x13 and 0x14) are dropped and field results kept.
fn clean_doc_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    // One entry per open field; true while inside its code part.
    let mut fields: Vec<bool> = Vec::new();

    for c in raw.chars() {
        match c {
            '\u{13}' => fields.push(true),
            '\u{14}' => {
                if let Some(code) = fields.last_mut() {
                    *code = false;
                }
            }
            '\u{15}' => {
                fields.pop();
            }
            _ if fields.iter().any(|&code| code) => {}
            '\r' | '\u{0B}' | '\u{0C}' => out.push('\n'),
            '\u{07}' => out.push('\t'),
            '\u{1E}' => out.push('-'),
            '\t' | '\n' => out.push(c),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }

    out.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
