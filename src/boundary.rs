//! Fence tracking and stable-boundary detection on raw text.

use std::sync::OnceLock;

use regex::Regex;

fn list_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:[-*+]|\d{1,9}[.)])(?:\s|$)").expect("Invalid list marker regex"))
}

fn bare_heading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s{0,3}#{1,6}\s*$").expect("Invalid heading regex"))
}

fn bare_list_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:[-*+]|\d{1,9}[.)])\s*$").expect("Invalid list marker regex"))
}

fn bare_quote_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:>\s*)+$").expect("Invalid blockquote regex"))
}

/// An open code fence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenFence {
    pub marker: char,
    pub len: usize,
    /// Blockquote markers and indentation in front of the opening fence
    pub prefix: String,
}

impl OpenFence {
    /// The line that would close this fence
    pub fn closing_line(&self) -> String {
        let mut line = self.prefix.clone();
        line.extend(std::iter::repeat_n(self.marker, self.len));
        line
    }
}

/// Line-by-line code fence state.
#[derive(Debug, Default, Clone)]
pub struct FenceTracker {
    open: Option<OpenFence>,
}

impl FenceTracker {
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Feed one line (without its newline). Returns true if the line opens,
    /// closes or sits inside a fence.
    pub fn feed(&mut self, line: &str) -> bool {
        let (prefix, body) = split_container_prefix(line);
        match &self.open {
            None => {
                let Some((marker, len, rest)) = fence_run(body) else {
                    return false;
                };
                if marker == '`' && rest.contains('`') {
                    // Inline code like ```a``` on one line, not a fence.
                    return false;
                }
                self.open = Some(OpenFence {
                    marker,
                    len,
                    prefix: prefix.to_string(),
                });
                true
            }
            Some(open) => {
                if quote_depth(prefix) < quote_depth(&open.prefix) {
                    // Leaving the blockquote ends the fence with it.
                    self.open = None;
                    return self.feed(line);
                }
                if let Some((marker, len, rest)) = fence_run(body) {
                    if marker == open.marker && len >= open.len && rest.trim().is_empty() {
                        self.open = None;
                    }
                }
                true
            }
        }
    }
}

/// HTML elements whose block runs until the closing tag, blank lines included
const RAW_HTML_TAGS: [&str; 4] = ["pre", "script", "style", "textarea"];

/// Line-by-line state for `<pre>`, `<script>`, `<style>` and `<textarea>`
/// blocks, which blank lines do not end.
#[derive(Debug, Default, Clone)]
pub struct RawHtmlTracker {
    open: bool,
}

impl RawHtmlTracker {
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Feed one line (without its newline). Returns true if the line opens,
    /// closes or sits inside a raw HTML block.
    pub fn feed(&mut self, line: &str) -> bool {
        let lower = line.to_ascii_lowercase();
        if self.open {
            if closes_raw_html(&lower) {
                self.open = false;
            }
            return true;
        }
        let (_, body) = split_container_prefix(&lower);
        if !opens_raw_html(body) {
            return false;
        }
        self.open = !closes_raw_html(body);
        true
    }
}

fn opens_raw_html(body: &str) -> bool {
    let Some(rest) = body.strip_prefix('<') else {
        return false;
    };
    RAW_HTML_TAGS.iter().any(|tag| {
        rest.strip_prefix(tag)
            .is_some_and(|after| after.is_empty() || after.starts_with([' ', '\t', '>']))
    })
}

fn closes_raw_html(lower: &str) -> bool {
    RAW_HTML_TAGS
        .iter()
        .any(|tag| lower.contains(&format!("</{tag}>")))
}

/// Split leading indentation and `>` blockquote markers from the line.
fn split_container_prefix(line: &str) -> (&str, &str) {
    let mut rest = line;
    loop {
        let trimmed = rest.trim_start_matches([' ', '\t']);
        match trimmed.strip_prefix('>') {
            Some(after) => rest = after,
            None => {
                rest = trimmed;
                break;
            }
        }
    }
    let prefix_len = line.len() - rest.len();
    (&line[..prefix_len], rest)
}

fn quote_depth(prefix: &str) -> usize {
    prefix.matches('>').count()
}

fn fence_run(body: &str) -> Option<(char, usize, &str)> {
    let marker = body.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = body.chars().take_while(|c| *c == marker).count();
    if len < 3 {
        return None;
    }
    // Fence characters are ASCII, so `len` is also a byte offset.
    Some((marker, len, &body[len..]))
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Lines that make a following blank line part of the same container:
/// list items and their indented continuations.
fn is_list_context(line: &str) -> bool {
    line.starts_with([' ', '\t']) || list_marker_regex().is_match(line)
}

/// Would `next` continue the container `prev` belongs to across a blank line?
fn continues_container(prev: Option<&str>, next: &str) -> bool {
    if next.starts_with([' ', '\t']) {
        return true;
    }
    list_marker_regex().is_match(next) && prev.is_some_and(is_list_context)
}

/// Offset just past the last blank line outside any open fence or raw HTML
/// block, after which appending text cannot change how the preceding text
/// parses.
///
/// A blank line only counts when the next non-blank line could not continue
/// the container before it (indented continuation, further list items). When
/// the text ends in blank lines the boundary moves past them unless the last
/// content was list context.
pub fn stable_boundary(text: &str) -> usize {
    let mut fences = FenceTracker::default();
    let mut raw_html = RawHtmlTracker::default();
    let mut boundary = 0;
    let mut line_start = 0;
    let mut pending_blank_end: Option<usize> = None;
    let mut prev_content: Option<&str> = None;

    for (i, c) in text.char_indices() {
        if c != '\n' {
            continue;
        }
        let line = &text[line_start..i];
        let next_start = i + 1;
        line_start = next_start;

        if fences.is_open() && fences.feed(line) {
            prev_content = Some(line);
            continue;
        }
        if raw_html.is_open() {
            raw_html.feed(line);
            prev_content = Some(line);
            continue;
        }
        if is_blank(line) {
            pending_blank_end = Some(next_start);
            continue;
        }
        if let Some(end) = pending_blank_end.take() {
            if !continues_container(prev_content, line) {
                boundary = end;
            }
        }
        if !fences.is_open() && !fences.feed(line) {
            raw_html.feed(line);
        }
        prev_content = Some(line);
    }

    let tail = &text[line_start..];
    if let Some(end) = pending_blank_end {
        let next_known = !tail.trim().is_empty();
        let blocked = if next_known {
            continues_container(prev_content, tail)
        } else {
            prev_content.is_some_and(is_list_context)
        };
        if !blocked {
            boundary = end;
        }
    }
    boundary
}

/// Whether the end of `text` is markup still being typed: an open fence, or a
/// last non-blank line that is only a heading marker, list marker or
/// blockquote marker.
pub fn has_incomplete_tail(text: &str) -> bool {
    let mut fences = FenceTracker::default();
    let mut last_content: Option<&str> = None;
    for line in text.lines() {
        fences.feed(line);
        if !is_blank(line) {
            last_content = Some(line);
        }
    }
    if fences.is_open() {
        return true;
    }

    let Some(line) = last_content else {
        return false;
    };
    if bare_quote_regex().is_match(line) {
        return true;
    }
    let (_, body) = split_container_prefix(line);
    bare_heading_regex().is_match(body) || bare_list_marker_regex().is_match(body)
}

/// The fence left open at the end of `text`, if any
pub fn open_fence_at_end(text: &str) -> Option<OpenFence> {
    let mut fences = FenceTracker::default();
    for line in text.lines() {
        fences.feed(line);
    }
    fences.open
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", 0)]
    #[case("no blank line", 0)]
    #[case("a\n\nb", 3)]
    #[case("a\n\nb\n\nc", 6)]
    #[case("a\n\n", 3)]
    #[case("```\na\n\nb", 0)]
    #[case("```\na\n\nb\n```\n\nc", 14)]
    #[case("~~~~\n```\n\n~~~~\n\nafter", 16)]
    #[case("> ```\n> x\n> \n> y", 0)]
    #[case("> ```\n> x\n\n> y", 11)]
    #[case("- a\n\n- b", 0)]
    #[case("- a\n\n  more", 0)]
    #[case("- a\n\n", 0)]
    #[case("para\n\n- a\n\n- b", 6)]
    #[case("    code\n\n    more", 0)]
    #[case("<pre>\nline1\n\nline2\n</pre>\n\nafter", 27)]
    #[case("<pre>\nline1\n\nline2", 0)]
    #[case("<SCRIPT type=\"x\">\n\n</script>\n\nz", 30)]
    #[case("<pre>x</pre>\n\ny", 14)]
    #[case("<prefix>\n\nz", 10)]
    fn test_stable_boundary(#[case] text: &str, #[case] expected: usize) {
        assert_eq!(stable_boundary(text), expected, "text: {text:?}");
    }

    #[test]
    fn test_closing_fence_must_be_long_enough() {
        let mut tracker = FenceTracker::default();
        tracker.feed("````");
        tracker.feed("```");
        assert!(tracker.is_open());
        tracker.feed("`````");
        assert!(!tracker.is_open());
    }

    #[test]
    fn test_raw_html_block_spans_blank_lines() {
        let mut tracker = RawHtmlTracker::default();
        assert!(tracker.feed("> <textarea rows=3>"));
        assert!(tracker.feed(""));
        assert!(tracker.is_open());
        assert!(tracker.feed("> </TEXTAREA>"));
        assert!(!tracker.is_open());
        assert!(!tracker.feed("<div>"));
    }

    #[test]
    fn test_tilde_does_not_close_backtick() {
        let mut tracker = FenceTracker::default();
        tracker.feed("```js");
        tracker.feed("~~~");
        assert!(tracker.is_open());
    }

    #[test]
    fn test_inline_triple_backticks_are_not_a_fence() {
        let mut tracker = FenceTracker::default();
        assert!(!tracker.feed("```code``` here"));
        assert!(!tracker.is_open());
    }

    #[rstest]
    #[case("```ts\n", true)]
    #[case("```ts\nconst x=1\n```\n", false)]
    #[case("# Title\n##", true)]
    #[case("# Title\n## Sub", false)]
    #[case("text\n- ", true)]
    #[case("text\n12.", true)]
    #[case("text\n>", true)]
    #[case("> > ", true)]
    #[case("> #", true)]
    #[case("plain\n\n", false)]
    #[case("", false)]
    fn test_incomplete_tail(#[case] text: &str, #[case] expected: bool) {
        assert_eq!(has_incomplete_tail(text), expected, "text: {text:?}");
    }

    #[test]
    fn test_open_fence_keeps_quote_prefix() {
        let fence = open_fence_at_end("> ~~~~py\n> x = 1\n").unwrap();
        assert_eq!(fence.closing_line(), "> ~~~~");
    }
}
