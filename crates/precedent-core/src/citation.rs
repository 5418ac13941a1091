//! Citation extraction: link a generated answer back to the passages it names.
//!
//! Matching is purely textual. A passage is cited when its case name appears
//! verbatim in the answer; each case name is cited at most once, in passage
//! order.

use std::collections::HashSet;

use crate::types::{Citation, Passage};

/// Maximum excerpt length in characters before truncation.
pub const EXCERPT_CHARS: usize = 200;

const ELLIPSIS: &str = "...";
const LOOKUP_BASE: &str = "https://www.courtlistener.com/?q=";

/// Build citations for every retrieved case the answer mentions.
pub fn extract_citations(answer: &str, passages: &[Passage]) -> Vec<Citation> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut citations = Vec::new();

    for passage in passages {
        let name = passage.case_name.as_str();
        if name.is_empty() || !answer.contains(name) || !seen.insert(name) {
            continue;
        }
        citations.push(Citation {
            case_name: passage.case_name.clone(),
            court: passage.court.clone(),
            date: passage.date.clone(),
            citation: passage.citation.clone(),
            excerpt: excerpt(&passage.text),
            url: lookup_url(&passage.citation),
        });
    }

    citations
}

/// First 200 characters of `text`, suffixed with "..." when cut.
pub fn excerpt(text: &str) -> String {
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}{ELLIPSIS}", &text[..cut]),
        None => text.to_string(),
    }
}

/// Best-effort CourtListener search link for a citation string.
pub fn lookup_url(citation: &str) -> Option<String> {
    let citation = citation.trim();
    if citation.is_empty() {
        return None;
    }
    Some(format!("{LOOKUP_BASE}{}", encode_query(citation)))
}

/// Form-encode a query value: spaces become `+`, reserved bytes are escaped.
fn encode_query(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b' ' => out.push('+'),
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'-' | b'_' | b'~' | b',' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
