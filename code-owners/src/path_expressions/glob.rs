use super::{ExpressionCache, InvalidPathExpression, PathExpressionMatcher};

/// Plain globs: `*` and `?` don't match `/`, `**` matches across folders,
/// `[...]` character classes and `{a,b}` alternations are supported.
pub struct GlobMatcher {
    cache: ExpressionCache<globset::GlobMatcher>,
}

impl GlobMatcher {
    pub fn new() -> Self {
        Self {
            cache: ExpressionCache::new(),
        }
    }

    fn compile(expression: &str) -> Result<globset::GlobMatcher, InvalidPathExpression> {
        let glob = expression.strip_prefix('/').unwrap_or(expression);
        globset::GlobBuilder::new(glob)
            .literal_separator(true)
            .backslash_escape(true)
            .build()
            .map(|glob| glob.compile_matcher())
            .map_err(|err| InvalidPathExpression::new(expression, err.kind().to_string()))
    }
}

impl Default for GlobMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl PathExpressionMatcher for GlobMatcher {
    fn matches(&self, expression: &str, relative_path: &str) -> bool {
        match self.cache.get_or_compile(expression, Self::compile) {
            Ok(matcher) => matcher.is_match(relative_path),
            Err(_) => false,
        }
    }

    fn check(&self, expression: &str) -> Result<(), InvalidPathExpression> {
        self.cache.get_or_compile(expression, Self::compile).map(|_| ())
    }
}
