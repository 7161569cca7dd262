//! Code-fence language normalization.

use std::collections::HashMap;

const ALIASES: &[(&str, &str)] = &[
    ("js", "javascript"),
    ("mjs", "javascript"),
    ("cjs", "javascript"),
    ("ts", "typescript"),
    ("py", "python"),
    ("py3", "python"),
    ("sh", "bash"),
    ("zsh", "bash"),
    ("shell", "bash"),
    ("rb", "ruby"),
    ("rs", "rust"),
    ("yml", "yaml"),
    ("md", "markdown"),
    ("c++", "cpp"),
    ("cs", "csharp"),
    ("c#", "csharp"),
    ("kt", "kotlin"),
    ("golang", "go"),
];

fn is_allowed(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '#' | '.' | '_' | '-')
}

/// True when `language` could have come out of [`normalize_language`].
pub fn is_normalized(language: &str) -> bool {
    !language.is_empty() && language.chars().all(is_allowed)
}

/// Normalize a fence info string to a lowercase language token.
///
/// Takes the first whitespace, `|` or `,` delimited token, drops characters
/// outside `[a-z0-9+#._-]` and resolves aliases (`extra` first, then builtin).
pub fn normalize_language(info: &str, extra: &HashMap<String, String>) -> Option<String> {
    let first = info
        .split(|c: char| c.is_whitespace() || c == '|' || c == ',')
        .find(|s| !s.is_empty())?;
    let token: String = first
        .to_lowercase()
        .chars()
        .filter(|c| is_allowed(*c))
        .collect();
    if token.is_empty() {
        return None;
    }

    if let Some(alias) = extra.get(&token) {
        let alias: String = alias.to_lowercase().chars().filter(|c| is_allowed(*c)).collect();
        return (!alias.is_empty()).then_some(alias);
    }
    let resolved = ALIASES
        .iter()
        .find(|(from, _)| *from == token)
        .map(|(_, to)| (*to).to_string())
        .unwrap_or(token);
    Some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ts", Some("typescript"))]
    #[case("JS", Some("javascript"))]
    #[case("zsh", Some("bash"))]
    #[case("python title=\"x.py\"", Some("python"))]
    #[case("rust,ignore", Some("rust"))]
    #[case("{r}", Some("r"))]
    #[case("c++", Some("cpp"))]
    #[case("<script>alert(1)</script>", Some("scriptalert1script"))]
    #[case("   ", None)]
    #[case("!!!", None)]
    fn test_normalize(#[case] info: &str, #[case] expected: Option<&str>) {
        assert_eq!(
            normalize_language(info, &HashMap::new()).as_deref(),
            expected
        );
    }

    #[test]
    fn test_extra_aliases_take_precedence() {
        let mut extra = HashMap::new();
        extra.insert("ts".to_string(), "TSX".to_string());
        assert_eq!(normalize_language("ts", &extra).as_deref(), Some("tsx"));
    }

    #[test]
    fn test_is_normalized() {
        assert!(is_normalized("c++"));
        assert!(!is_normalized("Rust"));
        assert!(!is_normalized(""));
    }
}
