//! Source code normalization.
//!
//! Code fingerprints ignore comments and formatting: the source is lexed
//! into identifiers, numbers, string literals and single punctuation
//! characters, with comments dropped. Case is preserved. String literals
//! are kept verbatim as one token each, so comment markers inside them are
//! not mistaken for comments.

use std::path::Path;

/// Comment and quoting rules for one language family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeNormalizer {
    line_comments: &'static [&'static str],
    block_comments: &'static [(&'static str, &'static str)],
    quotes: &'static [char],
    rust_char_literals: bool,
}

const C_LINE: &[&str] = &["//"];
const C_BLOCK: &[(&str, &str)] = &[("/*", "*/")];
const HASH_LINE: &[&str] = &["#"];
const MARKUP_BLOCK: &[(&str, &str)] = &[("<!--", "-->")];
const VUE_BLOCK: &[(&str, &str)] = &[("<!--", "-->"), ("/*", "*/")];

impl CodeNormalizer {
    /// Pick the rules for a file by extension. Unknown extensions get a
    /// comment-free tokenizer.
    #[must_use]
    pub fn for_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase())
            .unwrap_or_default();
        Self::for_extension(&extension)
    }

    /// Pick the rules for a lowercase extension.
    #[must_use]
    pub fn for_extension(extension: &str) -> Self {
        match extension {
            "rs" => Self {
                line_comments: C_LINE,
                block_comments: C_BLOCK,
                quotes: &['"'],
                rust_char_literals: true,
            },
            "c" | "h" | "cpp" | "cc" | "hpp" | "java" => Self {
                line_comments: C_LINE,
                block_comments: C_BLOCK,
                quotes: &['"', '\''],
                rust_char_literals: false,
            },
            "js" | "jsx" | "ts" | "tsx" | "go" => Self {
                line_comments: C_LINE,
                block_comments: C_BLOCK,
                quotes: &['"', '\'', '`'],
                rust_char_literals: false,
            },
            "css" => Self {
                line_comments: &[],
                block_comments: C_BLOCK,
                quotes: &['"', '\''],
                rust_char_literals: false,
            },
            "py" | "sh" | "ex" | "exs" => Self {
                line_comments: HASH_LINE,
                block_comments: &[],
                quotes: &['"', '\''],
                rust_char_literals: false,
            },
            "html" => Self {
                line_comments: &[],
                block_comments: MARKUP_BLOCK,
                quotes: &[],
                rust_char_literals: false,
            },
            "vue" => Self {
                line_comments: &[],
                block_comments: VUE_BLOCK,
                quotes: &['"'],
                rust_char_literals: false,
            },
            _ => Self {
                line_comments: &[],
                block_comments: &[],
                quotes: &['"'],
                rust_char_literals: false,
            },
        }
    }

    /// Lex `source` into comment-free tokens.
    #[must_use]
    pub fn tokens(&self, source: &str) -> Vec<String> {
        let chars: Vec<char> = source.chars().collect();
        let mut tokens = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];

            if c.is_whitespace() {
                i += 1;
                continue;
            }

            if let Some(marker) = self.line_comments.iter().find(|m| starts_with(&chars, i, m)) {
                i += marker.chars().count();
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }

            if let Some((open, close)) = self
                .block_comments
                .iter()
                .find(|(open, _)| starts_with(&chars, i, open))
            {
                i += open.chars().count();
                while i < chars.len() && !starts_with(&chars, i, close) {
                    i += 1;
                }
                i = (i + close.chars().count()).min(chars.len());
                continue;
            }

            if self.rust_char_literals && c == '\'' {
                let end = rust_char_literal_end(&chars, i);
                tokens.push(chars[i..end].iter().collect());
                i = end;
                continue;
            }

            if self.quotes.contains(&c) {
                let end = string_literal_end(&chars, i);
                tokens.push(chars[i..end].iter().collect());
                i = end;
                continue;
            }

            if c.is_alphabetic() || c == '_' {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(chars[start..i].iter().collect());
                continue;
            }

            if c.is_ascii_digit() {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(chars[start..i].iter().collect());
                continue;
            }

            tokens.push(c.to_string());
            i += 1;
        }

        tokens
    }
}

fn starts_with(chars: &[char], at: usize, pattern: &str) -> bool {
    let mut idx = at;
    for p in pattern.chars() {
        if chars.get(idx) != Some(&p) {
            return false;
        }
        idx += 1;
    }
    true
}

/// End (exclusive) of the string literal opening at `start`. Unterminated
/// literals run to the end of input.
fn string_literal_end(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

/// A `'` in Rust opens either a char literal or a lifetime.
fn rust_char_literal_end(chars: &[char], start: usize) -> usize {
    match (chars.get(start + 1), chars.get(start + 2)) {
        (Some('\\'), _) => {
            let mut i = start + 2;
            while i < chars.len() && i < start + 12 {
                if chars[i] == '\'' {
                    return i + 1;
                }
                i += 1;
            }
            start + 1
        }
        (Some(_), Some('\'')) => start + 3,
        _ => start + 1,
    }
}
