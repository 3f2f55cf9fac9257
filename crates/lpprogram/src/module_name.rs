//! Module names derived from notebook titles.
//!
//! The name is spliced into generated program text as a bare identifier,
//! so it has to follow `lcase idchar*` with no escaping available.

use std::fmt;

use crate::error::CompileError;

/// Prefix emitted when a title does not start with an ASCII letter.
pub const FALLBACK_PREFIX: &str = "x_";

/// Punctuation allowed after the first character of an identifier.
const IDCHAR_PUNCTUATION: &[char] = &[
    '+', '-', '*', '/', '^', '<', '>', '=', '`', '?', '@', '#', '$', '&', '!', '_', '~',
];

/// Whether `c` may appear after the first character of a module name.
pub fn is_idchar(c: char) -> bool {
    c.is_ascii_alphanumeric() || IDCHAR_PUNCTUATION.contains(&c)
}

/// Map an arbitrary title to an identifier-safe name.
///
/// Only the first character is case folded. A first character that is not an
/// ASCII letter is dropped and replaced by [`FALLBACK_PREFIX`]. Every later
/// character outside the identifier set becomes `_`.
pub fn sanitize(title: &str) -> String {
    let mut chars = title.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };

    let mut output = String::with_capacity(title.len() + 1);
    match first {
        'a'..='z' => output.push(first),
        'A'..='Z' => output.push(first.to_ascii_lowercase()),
        _ => output.push_str(FALLBACK_PREFIX),
    }

    output.extend(chars.map(|c| if is_idchar(c) { c } else { '_' }));
    output
}

/// A sanitized, non-empty module name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleName(String);

impl ModuleName {
    /// Derive a module name from a notebook title.
    ///
    /// An empty title has no usable name and would produce a degenerate
    /// program (`".\nend"`), so it is rejected.
    pub fn from_title(title: &str) -> Result<Self, CompileError> {
        let name = sanitize(title);
        if name.is_empty() {
            return Err(CompileError::EmptyTitle);
        }
        Ok(ModuleName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ModuleName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
