//! Minimal XML tokenizer for OOXML parts.
//!
//! OOXML parts are machine-written and well-formed, so a flat token stream
//! (start tag, end tag, text) is enough to pull visible text out of them.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)<!--.*?-->|<\?.*?\?>|<!\[CDATA\[(?P<cdata>.*?)\]\]>|<!DOCTYPE[^>]*>|<(?P<close>/?)(?P<name>[^\s/>]+)(?P<attrs>[^>]*?)(?P<selfclose>/?)>|(?P<text>[^<]+)",
    )
    .expect("token regex is valid")
});

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<key>[^\s=]+)\s*=\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')"#)
        .expect("attribute regex is valid")
});

/// One lexical XML token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    Start {
        name: &'a str,
        attrs: &'a str,
        self_closing: bool,
    },
    End {
        name: &'a str,
    },
    Text(Cow<'a, str>),
}

impl Token<'_> {
    /// Local part of a tag name (`w:t` → `t`).
    pub fn local_name(&self) -> Option<&str> {
        match self {
            Token::Start { name, .. } | Token::End { name } => {
                Some(name.rsplit(':').next().unwrap_or(name))
            }
            Token::Text(_) => None,
        }
    }
}

/// Tokenize an XML document. Comments, processing instructions and
/// doctype declarations are dropped; text is entity-decoded.
pub fn tokens(xml: &str) -> impl Iterator<Item = Token<'_>> {
    TOKEN_RE.captures_iter(xml).filter_map(|caps| {
        if let Some(text) = caps.name("text") {
            return Some(Token::Text(decode_entities(text.as_str())));
        }
        if let Some(cdata) = caps.name("cdata") {
            return Some(Token::Text(Cow::Borrowed(cdata.as_str())));
        }
        let name = caps.name("name")?.as_str();
        if caps.name("close").is_some_and(|m| !m.as_str().is_empty()) {
            return Some(Token::End { name });
        }
        Some(Token::Start {
            name,
            attrs: caps.name("attrs").map_or("", |m| m.as_str()),
            self_closing: caps.name("selfclose").is_some_and(|m| !m.as_str().is_empty()),
        })
    })
}

/// Look up an attribute value in a start tag's attribute string.
pub fn attr(attrs: &str, key: &str) -> Option<String> {
    ATTR_RE.captures_iter(attrs).find_map(|caps| {
        if &caps["key"] != key {
            return None;
        }
        let raw = caps
            .name("dq")
            .or_else(|| caps.name("sq"))
            .map_or("", |m| m.as_str());
        Some(decode_entities(raw).into_owned())
    })
}

/// Decode the five predefined entities and numeric character references.
pub fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';') else {
            out.push_str(tail);
            return Cow::Owned(out);
        };
        let entity = &tail[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}
