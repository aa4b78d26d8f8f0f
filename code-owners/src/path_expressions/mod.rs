//! Path expression dialects. Each dialect decides whether an expression from
//! an owner set matches a path relative to the folder of the declaring config.
//! Paths use `/` separators and are matched case-sensitively.

mod find_owners_glob;
mod glob;
mod segment;
mod simple;

use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{Arc, RwLock},
};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::find_owners_glob::FindOwnersGlobMatcher;
pub use self::glob::GlobMatcher;
pub use self::simple::SimplePathExpressionMatcher;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid path expression '{expression}': {reason}")]
pub struct InvalidPathExpression {
    pub expression: String,
    pub reason: String,
}

impl InvalidPathExpression {
    pub(crate) fn new(expression: &str, reason: impl Into<String>) -> Self {
        Self {
            expression: expression.to_owned(),
            reason: reason.into(),
        }
    }
}

pub trait PathExpressionMatcher: Send + Sync {
    /// Whether `expression` matches `relative_path`. Malformed expressions
    /// never match.
    fn matches(&self, expression: &str, relative_path: &str) -> bool;

    /// Check that `expression` is well-formed in this dialect.
    fn check(&self, expression: &str) -> Result<(), InvalidPathExpression>;
}

/// The supported dialects, addressable by identifier in settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathExpressions {
    Glob,
    FindOwnersGlob,
    Simple,
}

static GLOB: Lazy<GlobMatcher> = Lazy::new(GlobMatcher::new);
static FIND_OWNERS_GLOB: Lazy<FindOwnersGlobMatcher> = Lazy::new(FindOwnersGlobMatcher::new);
static SIMPLE: Lazy<SimplePathExpressionMatcher> = Lazy::new(SimplePathExpressionMatcher::new);

impl PathExpressions {
    pub const ALL: [PathExpressions; 3] = [
        PathExpressions::Glob,
        PathExpressions::FindOwnersGlob,
        PathExpressions::Simple,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Self::Glob => "glob",
            Self::FindOwnersGlob => "find-owners-glob",
            Self::Simple => "simple",
        }
    }

    pub fn matcher(self) -> &'static dyn PathExpressionMatcher {
        match self {
            Self::Glob => &*GLOB,
            Self::FindOwnersGlob => &*FIND_OWNERS_GLOB,
            Self::Simple => &*SIMPLE,
        }
    }
}

impl fmt::Display for PathExpressions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for PathExpressions {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|dialect| dialect.id().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown path expression dialect: {}", s))
    }
}

// Compiled expressions are a pure function of the expression text, so the
// cache is shared by all lookups. Once full, new expressions are compiled on
// every call instead of being cached.
const MAX_CACHED_EXPRESSIONS: usize = 4096;

type CompileResult<T> = Result<Arc<T>, InvalidPathExpression>;

pub(crate) struct ExpressionCache<T> {
    compiled: Arc<RwLock<HashMap<String, CompileResult<T>>>>,
}

impl<T> ExpressionCache<T> {
    pub(crate) fn new() -> Self {
        Self {
            compiled: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub(crate) fn get_or_compile(
        &self,
        expression: &str,
        compile: impl FnOnce(&str) -> Result<T, InvalidPathExpression>,
    ) -> CompileResult<T> {
        if let Some(compiled) = self.compiled.read().expect("valid lock").get(expression) {
            return compiled.clone();
        }

        let compiled = compile(expression).map(Arc::new);
        let mut cache = self.compiled.write().expect("valid lock");
        if cache.len() < MAX_CACHED_EXPRESSIONS {
            cache.insert(expression.to_owned(), compiled.clone());
        }
        compiled
    }
}

/// Expand `{a,b}` alternations into separate expressions. Braces may not be
/// nested.
pub(crate) fn expand_braces(expression: &str) -> Result<Vec<String>, InvalidPathExpression> {
    let Some(open) = expression.find('{') else {
        if expression.contains('}') {
            return Err(InvalidPathExpression::new(expression, "unbalanced '}'"));
        }
        return Ok(vec![expression.to_owned()]);
    };
    let close = expression[open..]
        .find('}')
        .map(|idx| open + idx)
        .ok_or_else(|| InvalidPathExpression::new(expression, "unclosed '{'"))?;
    let alternatives = &expression[open + 1..close];
    if alternatives.contains('{') {
        return Err(InvalidPathExpression::new(
            expression,
            "nested '{' is not supported",
        ));
    }

    let prefix = &expression[..open];
    let mut expanded = Vec::new();
    for rest in expand_braces(&expression[close + 1..])? {
        for alternative in alternatives.split(',') {
            expanded.push(format!("{}{}{}", prefix, alternative, rest));
        }
    }
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_ids_round_trip() {
        for dialect in PathExpressions::ALL {
            assert_eq!(dialect.id().parse::<PathExpressions>(), Ok(dialect));
        }
        assert!("regex".parse::<PathExpressions>().is_err());
    }

    #[test]
    fn test_expand_braces() {
        assert_eq!(expand_braces("*.md").unwrap(), vec!["*.md"]);
        assert_eq!(
            expand_braces("*.{md,txt}").unwrap(),
            vec!["*.md", "*.txt"]
        );
        assert_eq!(
            expand_braces("{a,b}/{c,d}").unwrap(),
            vec!["a/c", "b/c", "a/d", "b/d"]
        );
        assert!(expand_braces("*.{md").is_err());
        assert!(expand_braces("*.md}").is_err());
        assert!(expand_braces("{a,{b,c}}").is_err());
    }

    #[test]
    fn test_malformed_expressions_fail_closed() {
        // `[` has no special meaning in simple path expressions.
        for dialect in [PathExpressions::Glob, PathExpressions::FindOwnersGlob] {
            let matcher = dialect.matcher();
            assert!(!matcher.matches("[abc", "[abc"), "{} matched malformed", dialect);
            assert!(matcher.check("[abc").is_err());
        }
    }
}
