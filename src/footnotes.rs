//! Footnote definition extraction and reference rewriting.
//!
//! The tokenizer runs without footnote support. Definitions are cut out of the
//! source before tokenizing and references become links to an internal href,
//! which the inline parser turns back into `footnote-ref` spans.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::boundary::FenceTracker;

const FOOTNOTE_HREF_PREFIX: &str = "#footnote-";

fn definition_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^ {0,3}\[\^([^\]\s<>]+)\]:[ \t]*(.*)$").expect("Invalid footnote definition regex")
    })
}

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\^([^\]\s<>]+)\]").expect("Invalid footnote reference regex"))
}

/// Source text with footnotes handled, plus the definitions found in it
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PreparedText {
    pub text: String,
    pub definitions: BTreeMap<String, String>,
}

/// Strip definitions and rewrite references in one pass over `text`.
pub fn prepare(text: &str) -> PreparedText {
    let (stripped, definitions) = extract_definitions(text);
    PreparedText {
        text: rewrite_references(&stripped),
        definitions,
    }
}

/// Footnote id encoded in an internal reference href
pub fn footnote_id_from_href(href: &str) -> Option<&str> {
    href.strip_prefix(FOOTNOTE_HREF_PREFIX).filter(|id| !id.is_empty())
}

/// Remove `[^id]: text` definitions (and their indented continuation lines)
/// that sit outside code fences. The first definition of an id wins.
///
/// Blank lines stay inside a definition when the next non-blank line is
/// indented; the continuation is kept as a separate paragraph.
pub fn extract_definitions(text: &str) -> (String, BTreeMap<String, String>) {
    let mut out = String::with_capacity(text.len());
    let mut definitions = BTreeMap::new();
    let mut fences = FenceTracker::default();
    let mut current: Option<(String, String)> = None;
    let mut paragraph_break = false;
    let lines: Vec<&str> = text.split_inclusive('\n').collect();

    for (i, line) in lines.iter().enumerate() {
        let body = line.trim_end_matches(['\n', '\r']);

        if let Some((_, def_text)) = current.as_mut() {
            if body.trim().is_empty() && next_content_is_indented(&lines[i + 1..]) {
                paragraph_break = true;
                continue;
            }
            if !body.trim().is_empty() && body.starts_with([' ', '\t']) {
                if !def_text.is_empty() {
                    def_text.push_str(if paragraph_break { "\n\n" } else { " " });
                }
                def_text.push_str(body.trim());
                paragraph_break = false;
                continue;
            }
            paragraph_break = false;
            finish_definition(&mut current, &mut definitions);
        }

        if !fences.is_open() {
            if let Some(caps) = definition_regex().captures(body) {
                let id = caps[1].to_string();
                let def_text = caps[2].trim().to_string();
                current = Some((id, def_text));
                continue;
            }
        }

        fences.feed(body);
        out.push_str(line);
    }
    finish_definition(&mut current, &mut definitions);

    (out, definitions)
}

fn next_content_is_indented(lines: &[&str]) -> bool {
    lines
        .iter()
        .find(|line| !line.trim().is_empty())
        .is_some_and(|line| line.starts_with([' ', '\t']))
}

fn finish_definition(
    current: &mut Option<(String, String)>,
    definitions: &mut BTreeMap<String, String>,
) {
    if let Some((id, text)) = current.take() {
        definitions.entry(id).or_insert(text);
    }
}

/// Rewrite `[^id]` references outside fences and code spans into links to
/// the internal footnote href.
pub fn rewrite_references(text: &str) -> String {
    if !text.contains("[^") {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len() + 32);
    let mut fences = FenceTracker::default();

    for line in text.split_inclusive('\n') {
        let body = line.trim_end_matches(['\n', '\r']);
        let in_fence = fences.feed(body);
        if in_fence || !line.contains("[^") {
            out.push_str(line);
            continue;
        }
        rewrite_line(line, &mut out);
    }
    out
}

fn rewrite_line(line: &str, out: &mut String) {
    let bytes = line.as_bytes();
    let mut plain_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'`' {
            i += 1;
            continue;
        }
        let run = bytes[i..].iter().take_while(|b| **b == b'`').count();
        match find_closing_run(bytes, i + run, run) {
            Some(close) => {
                rewrite_plain(&line[plain_start..i], out);
                out.push_str(&line[i..close + run]);
                i = close + run;
                plain_start = i;
            }
            None => i += run,
        }
    }
    rewrite_plain(&line[plain_start..], out);
}

fn find_closing_run(bytes: &[u8], from: usize, len: usize) -> Option<usize> {
    let mut j = from;
    while j < bytes.len() {
        if bytes[j] == b'`' {
            let run = bytes[j..].iter().take_while(|b| **b == b'`').count();
            if run == len {
                return Some(j);
            }
            j += run;
        } else {
            j += 1;
        }
    }
    None
}

fn rewrite_plain(segment: &str, out: &mut String) {
    let mut last = 0;
    for caps in reference_regex().captures_iter(segment) {
        let Some(m) = caps.get(0) else { continue };
        // `[^x](...)` is already a link written by the author.
        if segment[m.end()..].starts_with('(') {
            continue;
        }
        out.push_str(&segment[last..m.start()]);
        out.push_str(&format!("[^{id}](<{FOOTNOTE_HREF_PREFIX}{id}>)", id = &caps[1]));
        last = m.end();
    }
    out.push_str(&segment[last..]);
}
