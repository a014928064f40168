// preprocessor.rs - DEFINE expansion, run on raw script text before lexing

use tracing::debug;

/// A `DEFINE name value` directive.
#[derive(Debug, Clone, PartialEq)]
pub struct Define {
    pub name: String,
    pub value: String,
}

/// Expand every `DEFINE` in `source`.
///
/// Directive lines are replaced by empty lines so line numbers in later
/// diagnostics still match the original file. Substitution is literal,
/// case-sensitive and whole-word, applied in definition order; a define's
/// value is itself expanded with the defines that precede it.
pub fn preprocess(source: &str) -> String {
    let mut defines: Vec<Define> = Vec::new();
    let mut body = String::with_capacity(source.len() + 1);

    for line in source.lines() {
        match parse_define(line) {
            Some(mut define) => {
                for earlier in &defines {
                    define.value = substitute(&define.value, &earlier.name, &earlier.value);
                }
                debug!(name = %define.name, value = %define.value, "define");
                defines.push(define);
            }
            None => body.push_str(line),
        }
        body.push('\n');
    }

    for define in &defines {
        body = substitute(&body, &define.name, &define.value);
    }

    body
}

/// Recognize `DEFINE name value` (leading whitespace allowed). Names are
/// identifiers, optionally prefixed with `#`.
fn parse_define(line: &str) -> Option<Define> {
    let rest = line.trim_start().strip_prefix("DEFINE")?;
    if !rest.starts_with(|c: char| c == ' ' || c == '\t') {
        return None;
    }
    let rest = rest.trim_start();

    let name_len = rest
        .char_indices()
        .find(|&(i, c)| !(is_word_char(c) || (i == 0 && c == '#')))
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    let name = &rest[..name_len];
    if name.is_empty() || name == "#" {
        return None;
    }

    let after = &rest[name_len..];
    if !after.starts_with(|c: char| c == ' ' || c == '\t') {
        return None;
    }
    let value = after.trim_start().trim_end();
    if value.is_empty() {
        return None;
    }

    Some(Define {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Replace whole-word occurrences of `name` in `text`.
fn substitute(text: &str, name: &str, value: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut prev: Option<char> = None;

    while let Some(found) = rest.find(name) {
        let before = rest[..found].chars().last().or(prev);
        let after = rest[found + name.len()..].chars().next();
        let bounded = !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char);

        let end = found + name.len();
        out.push_str(&rest[..found]);
        if bounded {
            out.push_str(value);
        } else {
            out.push_str(name);
        }
        prev = rest[..end].chars().last();
        rest = &rest[end..];
    }

    out.push_str(rest);
    out
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '#'
}
