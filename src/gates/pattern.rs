//! File-name pattern compiler and tree walker.
//!
//! Grammar, applied per `/`-separated segment:
//!
//! ```text
//! pattern  := alt ( '/' alt )*          after brace expansion
//! segment  := '**'                      zero or more whole segments
//!           | ( literal | '*' )+        '*' never crosses '/'
//! braces   := '{' member ( ',' member )* '}'   members may nest, hold '*' or '/'
//! ```
//!
//! Braces are expanded first into plain alternatives; every alternative is then
//! matched anchored against the whole candidate path.

use crate::core::error::PhaseGateError;
use crate::core::store::CounterKind;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Star,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Recursive,
    Glob(Vec<Token>),
}

impl Segment {
    fn literal(&self) -> Option<&str> {
        match self {
            Segment::Glob(tokens) => match tokens.as_slice() {
                [Token::Literal(lit)] => Some(lit.as_str()),
                _ => None,
            },
            Segment::Recursive => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Lexical,
    /// By sequential identifier number (`TASK-0002` before `TASK-0010`).
    Numeric,
}

/// A compiled pattern: one segment list per brace alternative.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    alternatives: Vec<Vec<Segment>>,
}

impl Pattern {
    pub fn compile(source: &str) -> Result<Self, PhaseGateError> {
        let normalized = source.replace('\\', "/");
        let expanded = expand_braces(&normalized)
            .map_err(|why| PhaseGateError::PatternError(format!("{}: {}", source, why)))?;
        let alternatives = expanded
            .iter()
            .map(|alt| compile_segments(alt))
            .collect();
        Ok(Self {
            source: source.to_string(),
            alternatives,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Anchored match of a root-relative, `/`-separated path.
    pub fn matches(&self, candidate: &str) -> bool {
        let normalized = candidate.replace('\\', "/");
        let parts = split_path(&normalized);
        self.alternatives
            .iter()
            .any(|segments| match_segments(segments, &parts))
    }

    /// Literal directory prefix of each alternative, deduplicated.
    fn base_dirs(&self) -> BTreeSet<String> {
        self.alternatives
            .iter()
            .map(|segments| {
                // The last segment names files, never a directory to descend from.
                let dirs = &segments[..segments.len().saturating_sub(1)];
                dirs.iter()
                    .map_while(Segment::literal)
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .collect()
    }

    /// Collect matching files under `root`. A missing base directory is an
    /// empty result.
    pub fn walk(&self, root: &Path, skip_dirs: &[String], order: SortOrder) -> Vec<String> {
        let mut found = BTreeSet::new();
        for base in self.base_dirs() {
            let dir = if base.is_empty() {
                root.to_path_buf()
            } else {
                root.join(&base)
            };
            if dir.is_dir() {
                self.collect(&dir, &base, skip_dirs, &mut found);
            }
        }
        let mut matches: Vec<String> = found.into_iter().collect();
        if order == SortOrder::Numeric {
            sort_numeric(&mut matches);
        }
        matches
    }

    fn collect(&self, dir: &Path, rel: &str, skip_dirs: &[String], found: &mut BTreeSet<String>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("skipping unreadable directory {}: {}", dir.display(), e);
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let rel_path = if rel.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", rel, name)
            };
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                if !skip_dirs.iter().any(|s| s == &name) {
                    self.collect(&entry.path(), &rel_path, skip_dirs, found);
                }
            } else if (file_type.is_file() || entry.path().is_file()) && self.matches(&rel_path) {
                found.insert(rel_path);
            }
        }
    }
}

/// Compile and walk in one call.
pub fn walk(
    root: &Path,
    pattern: &str,
    skip_dirs: &[String],
    order: SortOrder,
) -> Result<Vec<String>, PhaseGateError> {
    Ok(Pattern::compile(pattern)?.walk(root, skip_dirs, order))
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|p| !p.is_empty() && *p != ".").collect()
}

fn expand_braces(pattern: &str) -> Result<Vec<String>, &'static str> {
    let Some(open) = pattern.find('{') else {
        if pattern.contains('}') {
            return Err("unbalanced '}'");
        }
        return Ok(vec![pattern.to_string()]);
    };

    let mut depth = 0usize;
    let mut close = None;
    let mut splits = Vec::new();
    for (i, c) in pattern[open..].char_indices() {
        let at = open + i;
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(at);
                    break;
                }
            }
            ',' if depth == 1 => splits.push(at),
            _ => {}
        }
    }
    let close = close.ok_or("unbalanced '{'")?;

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    let mut bounds = vec![open];
    bounds.extend(splits);
    bounds.push(close);

    let mut out = Vec::new();
    for pair in bounds.windows(2) {
        let member = &pattern[pair[0] + 1..pair[1]];
        for expanded in expand_braces(&format!("{}{}{}", prefix, member, suffix))? {
            if !out.contains(&expanded) {
                out.push(expanded);
            }
        }
    }
    Ok(out)
}

fn compile_segments(pattern: &str) -> Vec<Segment> {
    split_path(pattern)
        .into_iter()
        .map(|seg| {
            if seg == "**" {
                return Segment::Recursive;
            }
            let mut tokens = Vec::new();
            let mut literal = String::new();
            for c in seg.chars() {
                if c == '*' {
                    if !literal.is_empty() {
                        tokens.push(Token::Literal(std::mem::take(&mut literal)));
                    }
                    if tokens.last() != Some(&Token::Star) {
                        tokens.push(Token::Star);
                    }
                } else {
                    literal.push(c);
                }
            }
            if !literal.is_empty() {
                tokens.push(Token::Literal(literal));
            }
            Segment::Glob(tokens)
        })
        .collect()
}

fn match_segments(segments: &[Segment], parts: &[&str]) -> bool {
    match segments.split_first() {
        None => parts.is_empty(),
        Some((Segment::Recursive, rest)) => {
            (0..=parts.len()).any(|skip| match_segments(rest, &parts[skip..]))
        }
        Some((Segment::Glob(tokens), rest)) => match parts.split_first() {
            Some((part, remaining)) => {
                match_tokens(tokens, part) && match_segments(rest, remaining)
            }
            None => false,
        },
    }
}

fn match_tokens(tokens: &[Token], s: &str) -> bool {
    match tokens.split_first() {
        None => s.is_empty(),
        Some((Token::Literal(lit), rest)) => s
            .strip_prefix(lit.as_str())
            .is_some_and(|remaining| match_tokens(rest, remaining)),
        Some((Token::Star, rest)) => s
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(s.len()))
            .any(|i| match_tokens(rest, &s[i..])),
    }
}

fn leading_digits(s: &str) -> Option<u64> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Sort key: digits after the earliest identifier prefix in the file name,
/// else the first digit run anywhere in it, else zero.
pub fn sequence_number(path: &str) -> u64 {
    let name = path.rsplit('/').next().unwrap_or(path);
    let prefixed = CounterKind::ALL
        .iter()
        .filter_map(|kind| name.find(kind.prefix()).map(|pos| (pos, kind.prefix().len())))
        .min_by_key(|(pos, _)| *pos)
        .and_then(|(pos, len)| leading_digits(&name[pos + len..]));
    if let Some(n) = prefixed {
        return n;
    }
    name.find(|c: char| c.is_ascii_digit())
        .and_then(|start| leading_digits(&name[start..]))
        .unwrap_or(0)
}

pub fn sort_numeric(paths: &mut [String]) {
    paths.sort_by(|a, b| match sequence_number(a).cmp(&sequence_number(b)) {
        Ordering::Equal => a.cmp(b),
        other => other,
    });
}
