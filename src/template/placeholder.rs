//! Implementation of `{name}` placeholders.
//!
//! A placeholder is an identifier enclosed in braces. A doubled brace (`{{`
//! or `}}`) is an escape for a literal brace; any other brace is literal
//! text.

use std::sync::LazyLock;

use regex::Regex;

/// A regex that matches escaped braces and placeholders.
static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // SAFETY: this is checked statically with tests to always unwrap.
    Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_\-]*)\}").unwrap()
});

/// A piece of scanned text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Piece<'a> {
    /// Literal text.
    Text(&'a str),
    /// An escaped brace; holds the raw two-character escape.
    Escape(&'a str),
    /// A placeholder; holds the referenced name.
    Placeholder(&'a str),
}

/// Scans the given text into pieces.
fn scan(s: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut last = 0;
    for captures in PLACEHOLDER_REGEX.captures_iter(s) {
        // SAFETY: capture group 0 is always present
        let whole = captures.get(0).unwrap();
        if whole.start() > last {
            pieces.push(Piece::Text(&s[last..whole.start()]));
        }

        match captures.get(1) {
            Some(name) => pieces.push(Piece::Placeholder(name.as_str())),
            None => pieces.push(Piece::Escape(whole.as_str())),
        }

        last = whole.end();
    }

    if last < s.len() {
        pieces.push(Piece::Text(&s[last..]));
    }

    pieces
}

/// Gets the names referenced by placeholders in the given text.
pub fn placeholders(s: &str) -> impl Iterator<Item = &str> {
    scan(s).into_iter().filter_map(|p| match p {
        Piece::Placeholder(name) => Some(name),
        _ => None,
    })
}

/// Determines if the given text contains at least one placeholder.
pub fn has_placeholders(s: &str) -> bool {
    placeholders(s).next().is_some()
}

/// Substitutes the placeholders the lookup can resolve.
///
/// Placeholders the lookup returns `None` for are left untouched, as are
/// escaped braces.
pub fn interpolate(s: &str, mut lookup: impl FnMut(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(s.len());
    for piece in scan(s) {
        match piece {
            Piece::Text(text) | Piece::Escape(text) => result.push_str(text),
            Piece::Placeholder(name) => match lookup(name) {
                Some(value) => result.push_str(&value),
                None => {
                    result.push('{');
                    result.push_str(name);
                    result.push('}');
                }
            },
        }
    }

    result
}

/// Renders text by substituting every placeholder and unescaping braces.
///
/// Returns the name of the first placeholder the lookup cannot resolve as
/// the error.
pub fn render<'a>(
    s: &'a str,
    mut lookup: impl FnMut(&str) -> Option<String>,
) -> Result<String, &'a str> {
    let mut result = String::with_capacity(s.len());
    for piece in scan(s) {
        match piece {
            Piece::Text(text) => result.push_str(text),
            Piece::Escape(escape) => result.push_str(&escape[..1]),
            Piece::Placeholder(name) => result.push_str(&lookup(name).ok_or(name)?),
        }
    }

    Ok(result)
}

/// Replaces escaped braces with literal braces, leaving placeholders as-is.
pub fn unescape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for piece in scan(s) {
        match piece {
            Piece::Text(text) => result.push_str(text),
            Piece::Escape(escape) => result.push_str(&escape[..1]),
            Piece::Placeholder(name) => {
                result.push('{');
                result.push_str(name);
                result.push('}');
            }
        }
    }

    result
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn regex() {
        assert!(PLACEHOLDER_REGEX.is_match("{a}"));
    }

    #[test]
    fn finds_placeholders() {
        let names = placeholders("{a}/{b_c}-{{d}} { e } {} {f-g}").collect::<Vec<_>>();
        assert_eq!(names, ["a", "b_c", "f-g"]);
        assert!(!has_placeholders("${{HOME}} and {not a placeholder}"));
    }

    #[test]
    fn partial_interpolation() {
        let result = interpolate("{a}-{b}-{{a}}", |name| {
            (name == "a").then(|| "x".to_string())
        });
        assert_eq!(result, "x-{b}-{{a}}");
    }

    #[test]
    fn render_unescapes() {
        let result = render("#!/bin/bash\necho ${{HOME}} {name}", |name| {
            (name == "name").then(|| "job".to_string())
        });
        assert_eq!(result.unwrap(), "#!/bin/bash\necho ${HOME} job");
    }

    #[test]
    fn render_reports_missing() {
        assert_eq!(render("{a} {b}", |_| None), Err("a"));
    }

    #[test]
    fn unescape_keeps_placeholders() {
        assert_eq!(unescape("{{x}} {y}"), "{x} {y}");
    }
}
