//! Link reference definitions collected over the whole document.
//!
//! Text is tokenized in segments, so a `[label]: url` line in one segment is
//! invisible to references in another. The parser gathers every definition up
//! front and lets the tokenizer resolve otherwise broken references from it.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::boundary::FenceTracker;

fn definition_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^ {0,3}\[([^\]\^\\][^\]\\]*)\]:[ \t]*<?([^\s<>]+)>?(?:[ \t]+(?:"([^"]*)"|'([^']*)'|\(([^)]*)\)))?[ \t]*$"#,
        )
        .expect("Invalid link definition regex")
    })
}

/// Destination and title of one `[label]: url "title"` definition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkTarget {
    pub url: String,
    pub title: String,
}

/// Definitions keyed by normalized label
pub type LinkDefinitions = BTreeMap<String, LinkTarget>;

/// Labels match case-insensitively with inner whitespace collapsed.
pub fn normalize_label(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Every single-line link reference definition outside code fences. The
/// first definition of a label wins.
pub fn collect(text: &str) -> LinkDefinitions {
    let mut definitions = LinkDefinitions::new();
    if !text.contains("]:") {
        return definitions;
    }

    let mut fences = FenceTracker::default();
    for line in text.lines() {
        if fences.is_open() {
            fences.feed(line);
            continue;
        }
        if let Some(caps) = definition_regex().captures(line) {
            let label = normalize_label(&caps[1]);
            if label.is_empty() {
                continue;
            }
            let title = caps
                .get(3)
                .or_else(|| caps.get(4))
                .or_else(|| caps.get(5))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            definitions.entry(label).or_insert(LinkTarget {
                url: caps[2].to_string(),
                title,
            });
            continue;
        }
        fences.feed(line);
    }
    definitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_collects_url_and_title() {
        let defs = collect("See [docs][d]\n\n[d]: https://x.dev \"Docs\"\n[Other  Label]: <./a>\n");
        assert_eq!(
            defs["d"],
            LinkTarget {
                url: "https://x.dev".into(),
                title: "Docs".into(),
            }
        );
        assert!(defs.contains_key("other label"));
    }

    #[test]
    fn test_footnotes_and_fenced_lines_are_skipped() {
        let defs = collect("[^n]: a note\n\n```\n[x]: https://in.code\n```\n");
        assert!(defs.is_empty());
    }

    #[test]
    fn test_first_definition_wins() {
        let defs = collect("[a]: /one\n[A]: /two\n");
        assert_eq!(defs["a"].url, "/one");
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("  Foo\tBar  "), "foo bar");
    }
}
