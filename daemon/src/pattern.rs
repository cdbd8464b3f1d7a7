/// Compiles EmulationStation launch-command templates into matchers over a
/// process's NUL-delimited argument vector.
///
/// A template such as `retroarch -L core.so %ROM%` is matched against exactly
/// one argument (RetroPie runs commands through `bash -c`, so the whole
/// command line lands in a single argument). The text occupying the first
/// placeholder is extracted as the launched rom.
///
/// Matching runs over raw bytes so that stray non-UTF-8 arguments do not
/// disturb it; only the extracted rom is converted to text.
use regex::bytes::Regex;

use crate::error::{Result, WatchError};

/// Separator between arguments in `/proc/<pid>/cmdline`, as a regex escape.
const ARG_SEPARATOR: &str = r"\x00";

/// Any byte but a newline, one or more times, shortest first.
const WILDCARD: &str = "(?-u:.)+?";

/// The template tokens a command may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// Shell-escaped full path to the rom.
    Rom,
    /// File name of the rom without directory or extension.
    Basename,
    /// Unescaped full path to the rom.
    RomRaw,
}

impl Placeholder {
    pub const ALL: [Placeholder; 3] = [Placeholder::Rom, Placeholder::Basename, Placeholder::RomRaw];

    pub fn token(self) -> &'static str {
        match self {
            Placeholder::Rom => "%ROM%",
            Placeholder::Basename => "%BASENAME%",
            Placeholder::RomRaw => "%ROM_RAW%",
        }
    }
}

/// A compiled command template.
#[derive(Debug, Clone)]
pub struct CommandMatcher {
    /// `None` for inert matchers.
    regex: Option<Regex>,
    placeholder: Option<Placeholder>,
}

impl CommandMatcher {
    /// Compiles `template`.
    ///
    /// A template that is nothing but a single placeholder yields an inert
    /// matcher: it would match any argument at all, so it never matches.
    pub fn compile(template: &str) -> Result<Self> {
        if Placeholder::ALL.iter().any(|p| p.token() == template) {
            return Ok(Self::inert());
        }

        let mut pattern = String::with_capacity(template.len() * 2);
        let mut placeholder = None;
        let mut rest = template;

        pattern.push_str(ARG_SEPARATOR);
        while let Some((at, kind)) = next_placeholder(rest) {
            pattern.push_str(&regex::escape(&rest[..at]));
            if placeholder.is_none() {
                placeholder = Some(kind);
                pattern.push('(');
                pattern.push_str(WILDCARD);
                pattern.push(')');
            } else {
                pattern.push_str(WILDCARD);
            }
            rest = &rest[at + kind.token().len()..];
        }
        pattern.push_str(&regex::escape(rest));
        pattern.push_str(ARG_SEPARATOR);

        let regex = Regex::new(&pattern).map_err(|source| WatchError::Pattern {
            template: template.to_string(),
            source,
        })?;
        Ok(Self {
            regex: Some(regex),
            placeholder,
        })
    }

    /// A matcher that never matches.
    pub fn inert() -> Self {
        Self {
            regex: None,
            placeholder: None,
        }
    }

    #[cfg(test)]
    pub fn is_inert(&self) -> bool {
        self.regex.is_none()
    }

    /// The placeholder kind captured by this matcher, if any.
    pub fn placeholder(&self) -> Option<Placeholder> {
        self.placeholder
    }

    /// Extracts the rom from a NUL-joined argument vector.
    ///
    /// `%ROM%` captures are shell-escaped by the launcher, so escaping
    /// backslashes are removed from them. A capture that ends up empty is
    /// not a match.
    pub fn extract(&self, cmdline: &[u8]) -> Option<String> {
        let regex = self.regex.as_ref()?;
        let placeholder = self.placeholder?;
        let captured = regex.captures(cmdline)?.get(1)?.as_bytes();
        let rom = match placeholder {
            Placeholder::Rom => String::from_utf8_lossy(&unescape_backslashes(captured)).into_owned(),
            Placeholder::Basename | Placeholder::RomRaw => String::from_utf8_lossy(captured).into_owned(),
        };
        Some(rom).filter(|rom| !rom.is_empty())
    }
}

/// Finds the earliest placeholder token in `s`.
fn next_placeholder(s: &str) -> Option<(usize, Placeholder)> {
    Placeholder::ALL
        .iter()
        .filter_map(|&p| s.find(p.token()).map(|at| (at, p)))
        .min_by_key(|&(at, _)| at)
}

/// Drops every backslash that is not itself escaped by a preceding
/// backslash. All other bytes are kept as is.
pub fn unescape_backslashes(s: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    let mut escaped = false;
    for &c in s {
        if c == b'\\' && !escaped {
            escaped = true;
            continue;
        }
        escaped = false;
        out.push(c);
    }
    out
}
