//! The line-oriented OWNERS format:
//!
//! ```text
//! # comment
//! set noparent
//! include other-project:refs/heads/main:/OWNERS
//! file: /build/OWNERS
//! alice@example.com
//! bob@example.com #{LAST_RESORT_SUGGESTION}
//! *
//! per-file *.md,docs/**=carol@example.com,dave@example.com
//! per-file BUILD=set noparent
//! per-file BUILD=file: /build/OWNERS
//! ```
//!
//! Top-level emails form a single owner set that applies to the whole folder.
//! `per-file` lines with the same path expressions form one owner set.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Backend, FormatError, InvalidConfigError, ParseError, Span};
use crate::{
    owner_config::{
        ConfigKey, ConfigReference, ImportMode, OwnerConfig, OwnerReference, OwnerSet, Revision,
    },
    path_expressions::PathExpressions,
};

const ID: &str = "find-owners";
const FILE_NAME: &str = "OWNERS";

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A[^@\s,=#]+@[^@\s,=#]+\z").expect("valid email regex"));
static ANNOTATION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\A[A-Za-z0-9_-]+\z").expect("valid annotation regex"));

pub struct FindOwnersBackend;

impl Backend for FindOwnersBackend {
    fn id(&self) -> &'static str {
        ID
    }

    fn file_name(&self) -> &'static str {
        FILE_NAME
    }

    fn default_path_expressions(&self) -> PathExpressions {
        PathExpressions::FindOwnersGlob
    }

    fn parse(
        &self,
        key: &ConfigKey,
        revision: &Revision,
        source: &str,
    ) -> Result<OwnerConfig, InvalidConfigError> {
        Parser::new(source).parse(key, revision)
    }

    fn format(&self, config: &OwnerConfig) -> Result<String, FormatError> {
        let unsupported = |feature| FormatError::UnsupportedFeature {
            backend: ID,
            feature,
            key: config.key.clone(),
        };

        let mut out = String::new();
        if config.ignore_parent_owners {
            out.push_str("set noparent\n");
        }
        for reference in &config.imports {
            let target = format_reference(reference).ok_or_else(|| {
                unsupported("an import of another branch without naming the project")
            })?;
            match reference.mode {
                ImportMode::All => out.push_str(&format!("include {}\n", target)),
                ImportMode::GlobalCodeOwnerSetsOnly => {
                    out.push_str(&format!("file: {}\n", target))
                }
            }
        }

        for owner_set in config.owner_sets.iter().filter(|s| s.is_global()) {
            if owner_set.ignore_global_and_parent {
                return Err(unsupported(
                    "'ignore global and parent' on an owner set without path expressions",
                ));
            }
            if !owner_set.imports.is_empty() {
                return Err(unsupported(
                    "imports on an owner set without path expressions",
                ));
            }
            for owner in &owner_set.owners {
                out.push_str(&owner.to_string());
                push_annotations(&mut out, owner_set.annotations.get(owner));
                out.push('\n');
            }
        }

        for owner_set in config.owner_sets.iter().filter(|s| !s.is_global()) {
            if let Some(expression) = owner_set
                .path_expressions
                .iter()
                .find(|e| e.contains([',', '=', '\n']))
            {
                return Err(FormatError::Encoding {
                    key: config.key.clone(),
                    message: format!(
                        "path expression '{}' cannot be written in a per-file line",
                        expression
                    ),
                });
            }
            let expressions = owner_set.path_expressions.join(",");
            if owner_set.ignore_global_and_parent {
                out.push_str(&format!("per-file {}=set noparent\n", expressions));
            }

            // Owners sharing the same annotations go on one line
            let mut by_annotations: BTreeMap<Option<&BTreeSet<String>>, Vec<String>> =
                BTreeMap::new();
            for owner in &owner_set.owners {
                let annotations = owner_set.annotations.get(owner).filter(|a| !a.is_empty());
                by_annotations
                    .entry(annotations)
                    .or_default()
                    .push(owner.to_string());
            }
            for (annotations, owners) in by_annotations {
                out.push_str(&format!("per-file {}={}", expressions, owners.join(",")));
                push_annotations(&mut out, annotations);
                out.push('\n');
            }

            for reference in &owner_set.imports {
                if reference.mode == ImportMode::All {
                    return Err(unsupported("a per-file import of all owner sets"));
                }
                let target = format_reference(reference).ok_or_else(|| {
                    unsupported("an import of another branch without naming the project")
                })?;
                out.push_str(&format!("per-file {}=file: {}\n", expressions, target));
            }
        }

        Ok(out)
    }
}

fn format_reference(reference: &ConfigReference) -> Option<String> {
    match (&reference.project, &reference.branch) {
        (None, Some(_)) => None,
        _ => Some(reference.to_string()),
    }
}

fn push_annotations(out: &mut String, annotations: Option<&BTreeSet<String>>) {
    for annotation in annotations.into_iter().flatten() {
        out.push_str(&format!(" #{{{}}}", annotation));
    }
}

struct Parser<'a> {
    source: &'a str,
    errors: Vec<ParseError>,
    ignore_parent_owners: bool,
    imports: Vec<ConfigReference>,
    global_owners: OwnerSet,
    per_file_owners: Vec<OwnerSet>,
}

/// A line of the source: its 1-based number, byte offset and trimmed text.
#[derive(Clone, Copy)]
struct Line<'a> {
    number: usize,
    offset: usize,
    text: &'a str,
}

impl<'a> Line<'a> {
    fn span(&self) -> Span {
        Span(self.offset, self.offset + self.text.len())
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.number, self.span())
    }
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            errors: Vec::new(),
            ignore_parent_owners: false,
            imports: Vec::new(),
            global_owners: OwnerSet::new(),
            per_file_owners: Vec::new(),
        }
    }

    fn parse(
        mut self,
        key: &ConfigKey,
        revision: &Revision,
    ) -> Result<OwnerConfig, InvalidConfigError> {
        for line in self.lines() {
            self.parse_line(line);
        }

        if !self.errors.is_empty() {
            return Err(InvalidConfigError {
                file: key.file_path(FILE_NAME),
                errors: self.errors,
            });
        }

        let mut config = OwnerConfig::new(key.clone(), revision.clone());
        config.ignore_parent_owners = self.ignore_parent_owners;
        config.imports = self.imports;
        if !self.global_owners.owners.is_empty() {
            config.owner_sets.push(self.global_owners);
        }
        config.owner_sets.extend(self.per_file_owners);
        Ok(config)
    }

    fn lines(&self) -> Vec<Line<'a>> {
        let source = self.source;
        let mut lines = Vec::new();
        let mut start = 0;
        let line_ends =
            memchr::memchr_iter(b'\n', source.as_bytes()).chain(std::iter::once(source.len()));
        for (idx, end) in line_ends.enumerate() {
            if start > source.len() {
                break;
            }
            let raw = &source[start..end];
            let leading_whitespace = raw.len() - raw.trim_start().len();
            lines.push(Line {
                number: idx + 1,
                offset: start + leading_whitespace,
                text: raw.trim(),
            });
            start = end + 1;
        }
        lines
    }

    fn parse_line(&mut self, line: Line<'a>) {
        let text = line.text;
        if text.is_empty() || (text.starts_with('#') && !text.starts_with("#{")) {
            return;
        }

        if text == "set noparent" {
            self.ignore_parent_owners = true;
        } else if let Some(target) = strip_keyword(text, "include") {
            if let Some(reference) = self.parse_import(line, ImportMode::All, target) {
                push_unique(&mut self.imports, reference);
            }
        } else if let Some(target) = text.strip_prefix("file:") {
            if let Some(reference) =
                self.parse_import(line, ImportMode::GlobalCodeOwnerSetsOnly, target)
            {
                push_unique(&mut self.imports, reference);
            }
        } else if let Some(rule) = strip_keyword(text, "per-file") {
            self.parse_per_file(line, rule);
        } else {
            let Some((owners, annotations)) = self.split_annotations(line, text) else {
                return;
            };
            if owners.contains(char::is_whitespace) {
                self.errors.push(line.error(format!("invalid line: {}", text)));
                return;
            }
            if let Some(owner) = self.parse_owner(line, owners) {
                if !annotations.is_empty() {
                    self.global_owners
                        .annotations
                        .entry(owner.clone())
                        .or_default()
                        .extend(annotations);
                }
                self.global_owners.owners.insert(owner);
            }
        }
    }

    fn parse_per_file(&mut self, line: Line<'a>, rule: &'a str) {
        let Some((expressions, directive)) = rule.split_once('=') else {
            self.errors
                .push(line.error(format!("invalid per-file line, missing '=': {}", line.text)));
            return;
        };

        let expressions: Vec<&str> = expressions
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .collect();
        if expressions.is_empty() {
            self.errors
                .push(line.error(format!("per-file line without path expressions: {}", line.text)));
            return;
        }

        let mut owner_set = OwnerSet::new();
        for expression in expressions {
            owner_set = owner_set.add_path_expression(expression);
        }

        let directive = directive.trim();
        if directive == "set noparent" {
            owner_set.ignore_global_and_parent = true;
        } else if let Some(target) = directive.strip_prefix("file:") {
            match self.parse_import(line, ImportMode::GlobalCodeOwnerSetsOnly, target) {
                Some(reference) => owner_set = owner_set.add_import(reference),
                None => return,
            }
        } else if strip_keyword(directive, "include").is_some() {
            self.errors
                .push(line.error("'include' is not allowed in per-file lines, use 'file:'"));
            return;
        } else {
            let Some((owners, annotations)) = self.split_annotations(line, directive) else {
                return;
            };
            for owner in owners.split(',').map(str::trim) {
                let Some(owner) = self.parse_owner(line, owner) else {
                    continue;
                };
                for annotation in &annotations {
                    owner_set = owner_set.add_annotation(owner.clone(), annotation);
                }
                owner_set.owners.insert(owner);
            }
        }

        self.merge_per_file(owner_set);
    }

    // Per-file lines with the same path expressions describe one owner set.
    fn merge_per_file(&mut self, owner_set: OwnerSet) {
        let existing = self
            .per_file_owners
            .iter_mut()
            .find(|s| s.path_expressions == owner_set.path_expressions);
        match existing {
            Some(existing) => {
                existing.owners.extend(owner_set.owners);
                for (owner, annotations) in owner_set.annotations {
                    existing.annotations.entry(owner).or_default().extend(annotations);
                }
                for reference in owner_set.imports {
                    push_unique(&mut existing.imports, reference);
                }
                existing.ignore_global_and_parent |= owner_set.ignore_global_and_parent;
            }
            None => self.per_file_owners.push(owner_set),
        }
    }

    fn parse_owner(&mut self, line: Line<'a>, owner: &str) -> Option<OwnerReference> {
        if owner == OwnerReference::ALL_USERS_WILDCARD {
            Some(OwnerReference::AllUsers)
        } else if EMAIL.is_match(owner) {
            Some(OwnerReference::email(owner))
        } else {
            self.errors.push(line.error(format!("invalid owner: {}", owner)));
            None
        }
    }

    /// Split `text` into the owner part and the `#{ANNOTATION}` names that
    /// follow it. Anything after the annotations is a comment.
    fn split_annotations(
        &mut self,
        line: Line<'a>,
        text: &'a str,
    ) -> Option<(&'a str, Vec<String>)> {
        let Some(idx) = memchr::memchr(b'#', text.as_bytes()) else {
            return Some((text.trim(), Vec::new()));
        };

        let owners = text[..idx].trim();
        let mut annotations = Vec::new();
        let mut rest = &text[idx..];
        while let Some(after) = rest.strip_prefix("#{") {
            let Some((name, remainder)) = after.split_once('}') else {
                self.errors
                    .push(line.error(format!("invalid annotation: {}", rest)));
                return None;
            };
            if !ANNOTATION_NAME.is_match(name) {
                self.errors
                    .push(line.error(format!("invalid annotation name: {}", name)));
                return None;
            }
            annotations.push(name.to_owned());
            rest = remainder.trim_start();
        }
        Some((owners, annotations))
    }

    fn parse_import(
        &mut self,
        line: Line<'a>,
        mode: ImportMode,
        target: &str,
    ) -> Option<ConfigReference> {
        let target = target.trim();
        let parts: Vec<&str> = target.split(':').map(str::trim).collect();
        let reference = match parts.as_slice() {
            [path] => Some(ConfigReference::new(mode, *path)),
            [project, path] if !project.is_empty() => {
                Some(ConfigReference::new(mode, *path).with_project(*project))
            }
            [project, branch, path] if !project.is_empty() && !branch.is_empty() => Some(
                ConfigReference::new(mode, *path)
                    .with_project(*project)
                    .with_branch(branch),
            ),
            _ => None,
        };

        match reference {
            Some(reference)
                if !reference.file_path.is_empty() && !reference.file_path.ends_with('/') =>
            {
                Some(reference)
            }
            _ => {
                self.errors
                    .push(line.error(format!("invalid import: {}", target)));
                None
            }
        }
    }
}

/// Strip a keyword that must be followed by whitespace.
fn strip_keyword<'t>(text: &'t str, keyword: &str) -> Option<&'t str> {
    let rest = text.strip_prefix(keyword)?;
    if rest.starts_with(char::is_whitespace) {
        Some(rest.trim_start())
    } else {
        None
    }
}

fn push_unique(references: &mut Vec<ConfigReference>, reference: ConfigReference) {
    if !references.contains(&reference) {
        references.push(reference);
    }
}
