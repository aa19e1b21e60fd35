//! `#!` directive preprocessing
//!
//! Directives are lines like `#!include(monsters.csv) as mobs`. They are
//! parsed before any row data and build the per-table [`Namespace`] that
//! reference expressions look aliases up in. A bad directive is skipped
//! with a diagnostic; it never stops a table from loading.

use crate::diagnostic::{Diagnostic, DiagnosticSink};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Comment marker for table files
pub const COMMENT: &str = "#";
/// Directive marker for table files
pub const DIRECTIVE: &str = "#!";

const ALIAS_KEYWORD: &str = "as";

/// Known directive names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    Include,
}

impl DirectiveKind {
    fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("include") {
            Some(DirectiveKind::Include)
        } else {
            None
        }
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectiveKind::Include => f.write_str("include"),
        }
    }
}

/// Why a directive was skipped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveParseError {
    #[error("unknown directive '{0}'")]
    Unknown(String),

    #[error("{0}: missing args")]
    MissingArgs(DirectiveKind),

    #[error("{0}: too many args, accepts exactly one")]
    TooManyArgs(DirectiveKind),

    #[error("{0}: unclosed args, missing ')'")]
    UnclosedArgs(DirectiveKind),

    #[error("{kind}: '{arg}' is not a valid file")]
    InvalidPath { kind: DirectiveKind, arg: String },

    #[error("{kind}: expected 'as' or end of directive, found '{found}'")]
    UnexpectedText { kind: DirectiveKind, found: String },

    #[error("{kind}: invalid alias '{alias}'")]
    InvalidAlias { kind: DirectiveKind, alias: String },

    #[error("alias '{0}' has already been included")]
    AliasCollision(String),
}

/// A parsed directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Include { path: PathBuf, alias: String },
}

/// Aliases visible to the expressions of one table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Namespace {
    aliases: BTreeMap<String, PathBuf>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `alias`. The first registration of an alias wins.
    pub fn register(&mut self, alias: String, path: PathBuf) -> Result<(), DirectiveParseError> {
        if self.aliases.contains_key(&alias) {
            return Err(DirectiveParseError::AliasCollision(alias));
        }
        self.aliases.insert(alias, path);
        Ok(())
    }

    pub fn get(&self, alias: &str) -> Option<&Path> {
        self.aliases.get(alias).map(PathBuf::as_path)
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.aliases.contains_key(alias)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.aliases.iter().map(|(a, p)| (a.as_str(), p.as_path()))
    }
}

/// Does this raw source line hold a directive?
pub fn is_directive_line(line: &str) -> bool {
    line.trim_start().trim_start_matches('"').starts_with(DIRECTIVE)
}

/// Is this raw source line a plain comment (not a directive)?
pub fn is_comment_line(line: &str) -> bool {
    line.trim_start().starts_with(COMMENT) && !is_directive_line(line)
}

/// Strip CSV quoting, trailing commas, and the directive marker from a line.
pub fn directive_text(line: &str) -> &str {
    let text = line
        .trim()
        .trim_end_matches(',')
        .trim()
        .trim_matches('"')
        .trim();
    text.strip_prefix(DIRECTIVE).unwrap_or(text).trim()
}

/// Aliases must start with a letter or underscore and can't contain
/// characters that mean something inside `${...}`.
fn is_valid_alias(alias: &str) -> bool {
    let mut chars = alias.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_');
    starts_ok && alias.chars().all(|c| !c.is_whitespace() && !"[]{}$~".contains(c))
}

/// Parse one directive. `text` may still carry the `#!` marker.
pub fn parse_directive(text: &str, dir: &Path) -> Result<Directive, DirectiveParseError> {
    let text = text.strip_prefix(DIRECTIVE).unwrap_or(text).trim();

    let (name, args) = match text.find('(') {
        Some(idx) => (text[..idx].trim(), Some(&text[idx + 1..])),
        None => (text.split_whitespace().next().unwrap_or(""), None),
    };

    let kind = DirectiveKind::from_name(name)
        .ok_or_else(|| DirectiveParseError::Unknown(name.to_string()))?;

    match kind {
        DirectiveKind::Include => {
            let args = args.ok_or(DirectiveParseError::MissingArgs(kind))?;
            parse_include(args, dir)
        }
    }
}

fn parse_include(args: &str, dir: &Path) -> Result<Directive, DirectiveParseError> {
    let kind = DirectiveKind::Include;

    let close = args.find(')');
    let comma = args.find(',');
    let close = match (close, comma) {
        (_, Some(c)) if close.map_or(true, |p| c < p) => {
            return Err(DirectiveParseError::TooManyArgs(kind))
        }
        (Some(p), _) => p,
        (None, _) => return Err(DirectiveParseError::UnclosedArgs(kind)),
    };

    let arg = args[..close].trim();
    let joined = dir.join(arg);
    if arg.is_empty() || !joined.is_file() {
        return Err(DirectiveParseError::InvalidPath {
            kind,
            arg: arg.to_string(),
        });
    }
    let path = joined
        .canonicalize()
        .map_err(|_| DirectiveParseError::InvalidPath {
            kind,
            arg: arg.to_string(),
        })?;

    let rest = args[close + 1..].trim();
    let alias = if rest.is_empty() {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string()
    } else {
        match rest.strip_prefix(ALIAS_KEYWORD) {
            Some(alias) if alias.is_empty() || alias.starts_with(char::is_whitespace) => {
                alias.trim().to_string()
            }
            _ => {
                return Err(DirectiveParseError::UnexpectedText {
                    kind,
                    found: rest.to_string(),
                })
            }
        }
    };

    if !is_valid_alias(&alias) {
        return Err(DirectiveParseError::InvalidAlias { kind, alias });
    }

    Ok(Directive::Include { path, alias })
}

/// Build the namespace for the table at `table_path`.
///
/// `lines` are `(1-based line number, raw line)` pairs for every directive
/// line in the file. Skipped directives are reported to `sink`.
pub fn build_namespace(
    lines: &[(usize, &str)],
    table_path: &Path,
    sink: &dyn DiagnosticSink,
) -> Namespace {
    let dir = table_path.parent().unwrap_or_else(|| Path::new("."));
    let mut namespace = Namespace::new();

    for &(line, raw) in lines {
        let text = directive_text(raw);
        let registered = parse_directive(text, dir).and_then(|directive| match directive {
            Directive::Include { path, alias } => namespace.register(alias, path),
        });
        if let Err(e) = registered {
            sink.emit(Diagnostic::directive(table_path, line, text, e));
        }
    }

    namespace
}
