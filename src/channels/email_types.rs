//! Email-specific types: raw mailbox messages, parsed messages, attachments.

use mail_parser::decoders::base64::base64_decode;
use mail_parser::decoders::quoted_printable::quoted_printable_decode;
use mail_parser::{Encoding, MessageParser, MessagePart, MimeHeaders, PartType};

use crate::channels::email::strip_html;
use crate::error::ParseError;

/// One message exactly as the mailbox returned it.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: u32,
    pub bytes: Vec<u8>,
}

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Declared MIME type, `type/subtype` without parameters.
    pub content_type: String,
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

/// A message reduced to what the response pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    /// Sender address from the `From` header.
    pub sender: String,
    pub subject: String,
    /// Plain-text body; HTML-only messages are reduced to their visible text.
    pub body_text: String,
    pub attachments: Vec<Attachment>,
}

/// Parse an RFC 5322 message.
pub fn parse_message(raw: &[u8]) -> Result<ParsedMessage, ParseError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(ParseError::Empty);
    }

    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or(ParseError::Malformed)?;

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(ParseError::MissingSender)?;

    let subject = parsed.subject().unwrap_or_default().to_string();

    let body_text = match parsed.body_text(0) {
        Some(text) => text.into_owned(),
        None => parsed
            .body_html(0)
            .map(|html| strip_html(html.as_ref()))
            .unwrap_or_default(),
    };

    let attachments = parsed
        .attachments()
        .map(|part| {
            let content_type = MimeHeaders::content_type(part)
                .map(|ct| match ct.subtype() {
                    Some(sub) => format!("{}/{}", ct.ctype(), sub),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".to_string())
                .to_ascii_lowercase();
            Attachment {
                content_type,
                filename: MimeHeaders::attachment_name(part).map(str::to_string),
                bytes: attachment_bytes(parsed.raw_message(), part),
            }
        })
        .collect();

    Ok(ParsedMessage {
        sender,
        subject,
        body_text,
        attachments,
    })
}

/// Attachment body with only the transfer encoding undone.
///
/// Binary parts come out of the parser as-is. Text parts have already been
/// converted to UTF-8 from their declared charset, so their bytes are taken
/// from the raw message instead.
fn attachment_bytes(raw: &[u8], part: &MessagePart<'_>) -> Vec<u8> {
    if !matches!(part.body, PartType::Text(_) | PartType::Html(_)) {
        return part.contents().to_vec();
    }

    let body = raw.get(part.raw_body_offset() as usize..part.raw_end_offset() as usize);
    let decoded = body.and_then(|body| match part.encoding {
        Encoding::Base64 => base64_decode(body),
        Encoding::QuotedPrintable => quoted_printable_decode(body),
        Encoding::None => Some(body.to_vec()),
    });
    decoded.unwrap_or_else(|| part.contents().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTIPART: &str = "From: Alice Example <alice@example.com>\r\n\
To: assistant@example.com\r\n\
Subject: Q1 sales\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Please summarize the attached report.\r\n\
--XYZ\r\n\
Content-Type: application/pdf; name=\"report.pdf\"\r\n\
Content-Disposition: attachment; filename=\"report.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQK\r\n\
--XYZ--\r\n";

    #[test]
    fn parses_sender_subject_body_and_attachment() {
        let msg = parse_message(MULTIPART.as_bytes()).unwrap();
        assert_eq!(msg.sender, "alice@example.com");
        assert_eq!(msg.subject, "Q1 sales");
        assert!(msg.body_text.contains("Please summarize"));
        assert_eq!(msg.attachments.len(), 1);

        let pdf = &msg.attachments[0];
        assert_eq!(pdf.content_type, "application/pdf");
        assert_eq!(pdf.filename.as_deref(), Some("report.pdf"));
        assert_eq!(pdf.bytes, b"%PDF-1.4\n");
    }

    #[test]
    fn text_attachment_keeps_its_charset_bytes() {
        // "café;1\r\n" in ISO-8859-1, base64 encoded.
        let raw = "From: alice@example.com\r\n\
Subject: data\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
See attached.\r\n\
--XYZ\r\n\
Content-Type: text/csv; charset=iso-8859-1; name=\"prices.csv\"\r\n\
Content-Disposition: attachment; filename=\"prices.csv\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
Y2Fm6TsxDQo=\r\n\
--XYZ--\r\n";

        let msg = parse_message(raw.as_bytes()).unwrap();
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].content_type, "text/csv");
        assert_eq!(msg.attachments[0].bytes, b"caf\xe9;1\r\n");
    }

    #[test]
    fn html_only_body_is_reduced_to_text() {
        let raw = "From: bob@example.com\r\n\
Subject: hi\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>Hello <b>there</b></p>\r\n";
        let msg = parse_message(raw.as_bytes()).unwrap();
        assert!(msg.body_text.contains("Hello"));
        assert!(msg.body_text.contains("there"));
        assert!(!msg.body_text.contains("<b>"));
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn missing_subject_is_empty() {
        let raw = "From: bob@example.com\r\n\r\nbody\r\n";
        let msg = parse_message(raw.as_bytes()).unwrap();
        assert_eq!(msg.subject, "");
        assert_eq!(msg.body_text.trim(), "body");
    }

    #[test]
    fn empty_input() {
        assert!(matches!(parse_message(b""), Err(ParseError::Empty)));
        assert!(matches!(parse_message(b"\r\n  "), Err(ParseError::Empty)));
    }

    #[test]
    fn no_sender() {
        let raw = "Subject: orphan\r\n\r\nbody\r\n";
        assert!(matches!(
            parse_message(raw.as_bytes()),
            Err(ParseError::MissingSender)
        ));
    }
}
