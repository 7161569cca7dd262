//! Hand-rolled `$` / `$$` delimiter scanner.
//!
//! Rules for inline `$...$`: the opening `$` must be followed by a character
//! that is neither whitespace nor a digit and must not directly follow an
//! alphanumeric; the closing `$` must not follow whitespace or precede a digit.
//! `$$...$$` only becomes display math once it is closed. `\$` is always a
//! literal dollar. Anything unmatched stays text.

use crate::block::Inline;

/// Split `text` into text and math spans.
pub fn split_math(text: &str) -> Vec<Inline> {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut i = 0;

    while i < n {
        let c = chars[i];

        if c == '\\' && chars.get(i + 1) == Some(&'$') {
            buf.push('$');
            i += 2;
            continue;
        }

        if c != '$' {
            buf.push(c);
            i += 1;
            continue;
        }

        if chars.get(i + 1) == Some(&'$') {
            if let Some(end) = find_display_close(&chars, i + 2) {
                let content: String = chars[i + 2..end].iter().collect();
                let content = content.trim();
                if !content.is_empty() {
                    flush(&mut buf, &mut out);
                    out.push(Inline::math(content, true));
                    i = end + 2;
                    continue;
                }
            }
            buf.push_str("$$");
            i += 2;
            continue;
        }

        if opens_inline(&chars, i) {
            if let Some(end) = find_inline_close(&chars, i + 1) {
                let content: String = chars[i + 1..end].iter().collect();
                flush(&mut buf, &mut out);
                out.push(Inline::math(content, false));
                i = end + 1;
                continue;
            }
        }

        buf.push('$');
        i += 1;
    }

    flush(&mut buf, &mut out);
    out
}

/// True if `text` contains a `$` that is not escaped
pub fn has_delimiter(text: &str) -> bool {
    let mut escaped = false;
    for c in text.chars() {
        match c {
            '\\' if !escaped => escaped = true,
            '$' if !escaped => return true,
            _ => escaped = false,
        }
    }
    false
}

fn flush(buf: &mut String, out: &mut Vec<Inline>) {
    if !buf.is_empty() {
        out.push(Inline::text(std::mem::take(buf)));
    }
}

fn opens_inline(chars: &[char], i: usize) -> bool {
    let Some(&next) = chars.get(i + 1) else {
        return false;
    };
    if next.is_whitespace() || next.is_ascii_digit() || next == '$' {
        return false;
    }
    !(i > 0 && chars[i - 1].is_alphanumeric())
}

fn find_inline_close(chars: &[char], from: usize) -> Option<usize> {
    let mut j = from;
    while j < chars.len() {
        match chars[j] {
            '\\' if chars.get(j + 1) == Some(&'$') => j += 2,
            '$' => {
                let after_space = chars[j - 1].is_whitespace();
                let before_digit = chars.get(j + 1).is_some_and(char::is_ascii_digit);
                if !after_space && !before_digit && j > from {
                    return Some(j);
                }
                j += 1;
            }
            _ => j += 1,
        }
    }
    None
}

fn find_display_close(chars: &[char], from: usize) -> Option<usize> {
    let mut j = from;
    while j + 1 < chars.len() {
        match chars[j] {
            '\\' if chars[j + 1] == '$' => j += 2,
            '$' if chars[j + 1] == '$' => return Some(j),
            _ => j += 1,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::InlineKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_price_is_not_math() {
        let spans = split_math("Price: $5 and $x+1$ done");
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
    fn test_display_math() {
        let spans = split_math("before $$ a^2 + b^2 $$ after");
        assert_eq!(spans[1], Inline::math("a^2 + b^2", true));
        assert_eq!(spans.len(), 3);
    }

    #[test]
    fn test_unclosed_display_is_literal() {
        assert_eq!(split_math("$$ x + y"), vec![Inline::text("$$ x + y")]);
    }

    #[test]
    fn test_escaped_dollar_is_literal() {
        assert_eq!(split_math(r"costs \$3 or \$4"), vec![Inline::text("costs $3 or $4")]);
        assert_eq!(split_math(r"\$x$"), vec![Inline::text("$x$")]);
    }

    #[test]
    fn test_alphanumeric_before_opening() {
        assert_eq!(split_math("a$b$"), vec![Inline::text("a$b$")]);
    }

    #[test]
    fn test_space_after_opening_or_before_closing() {
        assert_eq!(split_math("$ x$"), vec![Inline::text("$ x$")]);
        assert_eq!(split_math("$x $"), vec![Inline::text("$x $")]);
    }

    #[test]
    fn test_multiline_display_math() {
        let spans = split_math("$$\nx^2\n$$");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].kind, InlineKind::Math { display_mode: true });
        assert_eq!(spans[0].content, "x^2");
    }

    #[test]
    fn test_has_delimiter() {
        assert!(has_delimiter("a $b"));
        assert!(!has_delimiter(r"a \$b"));
        assert!(!has_delimiter("plain"));
    }
}
