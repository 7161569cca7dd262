//! Inline token to [`Inline`] tree conversion.

use crate::block::{Inline, InlineKind, non_empty};
use crate::footnotes;
use crate::math;
use crate::plugin::PluginRuntime;
use crate::token::{Token, TokenKind};

/// Converts inline tokens into inline spans, recursively.
#[derive(Clone, Copy)]
pub struct InlineParser<'a> {
    runtime: Option<&'a PluginRuntime>,
    math: bool,
}

impl Default for InlineParser<'_> {
    fn default() -> Self {
        Self {
            runtime: None,
            math: true,
        }
    }
}

impl<'a> InlineParser<'a> {
    pub fn new(runtime: Option<&'a PluginRuntime>, math: bool) -> Self {
        Self { runtime, math }
    }

    pub fn parse(&self, tokens: &[Token]) -> Vec<Inline> {
        let mut spans = Vec::new();
        let mut i = 0;

        while i < tokens.len() {
            let token = &tokens[i];

            if let Some(runtime) = self.runtime {
                if let Some(span) = runtime.dispatch_inline(token) {
                    spans.push(span);
                    i += 1;
                    continue;
                }
            }

            match &token.kind {
                TokenKind::Text | TokenKind::SoftBreak => {
                    // Math may span soft breaks, so scan the whole run at once.
                    let end = text_run_end(tokens, i);
                    spans.extend(self.text_run(&tokens[i..end]));
                    i = end;
                    continue;
                }
                TokenKind::Code => spans.push(Inline::code(token.text.clone())),
                TokenKind::HardBreak => spans.push(Inline::hard_break()),
                TokenKind::Emphasis => {
                    spans.push(Inline::nested(InlineKind::Italic, self.parse(&token.children)));
                }
                TokenKind::Strong => {
                    spans.push(Inline::nested(InlineKind::Bold, self.parse(&token.children)));
                }
                TokenKind::Strikethrough => spans.push(Inline::nested(
                    InlineKind::Strikethrough,
                    self.parse(&token.children),
                )),
                TokenKind::Link { href, title } => {
                    match footnotes::footnote_id_from_href(href) {
                        Some(id) => spans.push(Inline::footnote_ref(id)),
                        None => spans.push(Inline::nested(
                            InlineKind::Link {
                                href: href.clone(),
                                title: title.clone(),
                            },
                            self.parse(&token.children),
                        )),
                    }
                }
                TokenKind::Image { src, title } => {
                    let alt = token.plain_text();
                    spans.push(Inline::new(
                        InlineKind::Image {
                            src: src.clone(),
                            alt: alt.clone(),
                            title: title.clone(),
                        },
                        alt,
                    ));
                }
                TokenKind::InlineHtml => {
                    if let Some((kind, close)) = sup_sub_span(tokens, i) {
                        spans.push(Inline::nested(kind, self.parse(&tokens[i + 1..close])));
                        i = close + 1;
                        continue;
                    }
                    // Raw HTML is never passed through as markup.
                    spans.push(Inline::text(token.text.clone()));
                }
                TokenKind::TaskMarker { .. } => {}
                TokenKind::Paragraph => spans.extend(self.parse(&token.children)),
                _ => spans.push(Inline::text(token.plain_text())),
            }
            i += 1;
        }

        sanitize_inlines(spans)
    }

    fn text_run(&self, run: &[Token]) -> Vec<Inline> {
        let mut text = String::new();
        for token in run {
            match token.kind {
                TokenKind::SoftBreak => text.push('\n'),
                _ => text.push_str(&token.text),
            }
        }

        let spans = if self.math && math::has_delimiter(&text) {
            math::split_math(&text)
        } else {
            vec![Inline::text(text.replace("\\$", "$"))]
        };

        spans
            .into_iter()
            .map(|mut span| {
                if span.kind == InlineKind::Text {
                    span.content = span.content.replace('\n', " ");
                }
                span
            })
            .collect()
    }
}

/// Parse inline tokens with default options and no plugins
pub fn parse_inline_tokens(tokens: &[Token]) -> Vec<Inline> {
    InlineParser::default().parse(tokens)
}

fn text_run_end(tokens: &[Token], start: usize) -> usize {
    tokens[start..]
        .iter()
        .position(|t| !matches!(t.kind, TokenKind::Text | TokenKind::SoftBreak))
        .map_or(tokens.len(), |offset| start + offset)
}

fn html_tag_name(html: &str) -> Option<(&str, bool)> {
    let inner = html.trim().strip_prefix('<')?.strip_suffix('>')?.trim();
    match inner.strip_prefix('/') {
        Some(name) => Some((name.trim(), true)),
        None => Some((inner, false)),
    }
}

/// For an opening `<sup>`/`<sub>` at `open`, the kind and index of its closing tag.
fn sup_sub_span(tokens: &[Token], open: usize) -> Option<(InlineKind, usize)> {
    let (name, closing) = html_tag_name(&tokens[open].text)?;
    if closing {
        return None;
    }
    let name = name.to_ascii_lowercase();
    let kind = match name.as_str() {
        "sup" => InlineKind::Sup,
        "sub" => InlineKind::Sub,
        _ => return None,
    };

    let mut depth = 0usize;
    for (j, token) in tokens.iter().enumerate().skip(open + 1) {
        if token.kind != TokenKind::InlineHtml {
            continue;
        }
        match html_tag_name(&token.text) {
            Some((n, false)) if n.eq_ignore_ascii_case(&name) => depth += 1,
            Some((n, true)) if n.eq_ignore_ascii_case(&name) => {
                if depth == 0 {
                    return Some((kind, j));
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

/// Return a copy of `spans` with empty text removed, adjacent text merged and
/// empty children arrays pruned, at every depth.
pub fn sanitize_inlines(spans: Vec<Inline>) -> Vec<Inline> {
    let mut out: Vec<Inline> = Vec::with_capacity(spans.len());
    for mut span in spans {
        span.children = span
            .children
            .take()
            .and_then(|children| non_empty(sanitize_inlines(children)));

        if span.kind == InlineKind::Text {
            if span.content.is_empty() {
                continue;
            }
            if let Some(last) = out.last_mut() {
                if last.kind == InlineKind::Text && last.children.is_none() {
                    last.content.push_str(&span.content);
                    continue;
                }
            }
        }
        out.push(span);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::tokenize;
    use pretty_assertions::assert_eq;

    fn inlines(markdown: &str) -> Vec<Inline> {
        let tokens = tokenize(markdown);
        parse_inline_tokens(&tokens[0].children)
    }

    #[test]
    fn test_nested_emphasis() {
        let spans = inlines("a **bold *both*** end");
        assert_eq!(spans[0], Inline::text("a "));
        assert_eq!(spans[1].kind, InlineKind::Bold);
        assert_eq!(spans[1].content, "bold both");
        let children = spans[1].children.as_ref().unwrap();
        assert_eq!(children[1].kind, InlineKind::Italic);
        assert_eq!(spans[2], Inline::text(" end"));
    }

    #[test]
    fn test_inline_math_in_paragraph() {
        let spans = inlines("Price: $5 and $x+1$ done");
        assert_eq!(
            spans,
            vec![
                Inline::text("Price: $5 and "),
                Inline::math("x+1", false),
                Inline::text(" done"),
            ]
        );
    }

    #[test]
    fn test_display_math_across_soft_breaks() {
        let spans = inlines("$$\na + b\n$$");
        assert_eq!(spans, vec![Inline::math("a + b", true)]);
    }

    #[test]
    fn test_soft_break_becomes_space() {
        assert_eq!(inlines("one\ntwo"), vec![Inline::text("one two")]);
    }

    #[test]
    fn test_sup_and_sub() {
        let spans = inlines("x<sup>2</sup> and H<sub>2</sub>O");
        assert_eq!(spans[1].kind, InlineKind::Sup);
        assert_eq!(spans[1].content, "2");
        assert_eq!(spans[3].kind, InlineKind::Sub);
        assert_eq!(spans[4], Inline::text("O"));
    }

    #[test]
    fn test_other_html_is_text() {
        let spans = inlines("click <script>alert(1)</script> here");
        assert!(spans.iter().all(|s| s.kind == InlineKind::Text));
        assert!(spans[0].content.contains("<script>"));
    }

    #[test]
    fn test_link_and_image() {
        let spans = inlines("[site](https://x.dev \"T\") ![logo](l.png)");
        assert_eq!(
            spans[0].kind,
            InlineKind::Link {
                href: "https://x.dev".into(),
                title: Some("T".into())
            }
        );
        assert_eq!(spans[0].content, "site");
        assert_eq!(
            spans[2].kind,
            InlineKind::Image {
                src: "l.png".into(),
                alt: "logo".into(),
                title: None
            }
        );
    }

    #[test]
    fn test_sanitize_prunes_and_merges() {
        let spans = vec![
            Inline::text("a"),
            Inline::text(""),
            Inline::text("b"),
            Inline {
                kind: InlineKind::Bold,
                content: String::new(),
                children: Some(vec![Inline::text("")]),
            },
        ];
        let clean = sanitize_inlines(spans);
        assert_eq!(clean[0], Inline::text("ab"));
        assert_eq!(clean[1].children, None);
    }

    #[test]
    fn test_code_span_is_not_math() {
        let spans = inlines("`$x$` and text");
        assert_eq!(spans[0], Inline::code("$x$"));
    }
}
