use super::{
    expand_braces, segment::SegmentGlob, ExpressionCache, InvalidPathExpression,
    PathExpressionMatcher,
};

/// Globs as written in `per-file` lines of find-owners OWNERS files. Same as
/// [`super::GlobMatcher`] globs, except that an expression starting with a
/// single `*` also matches files in sub-folders, so `*.md` matches both
/// `README.md` and `docs/intro.md`.
pub struct FindOwnersGlobMatcher {
    cache: ExpressionCache<Vec<SegmentGlob>>,
}

impl FindOwnersGlobMatcher {
    pub fn new() -> Self {
        Self {
            cache: ExpressionCache::new(),
        }
    }

    fn compile(expression: &str) -> Result<Vec<SegmentGlob>, InvalidPathExpression> {
        let mut globs = Vec::new();
        for alternative in expand_braces(expression)? {
            if alternative.starts_with('*') && !alternative.starts_with("**") {
                globs.push(SegmentGlob::compile(&format!("**/{}", alternative))?);
            } else {
                globs.push(SegmentGlob::compile(&alternative)?);
            }
        }
        Ok(globs)
    }
}

impl Default for FindOwnersGlobMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl PathExpressionMatcher for FindOwnersGlobMatcher {
    fn matches(&self, expression: &str, relative_path: &str) -> bool {
        match self.cache.get_or_compile(expression, Self::compile) {
            Ok(globs) => globs.iter().any(|glob| glob.is_match(relative_path)),
            Err(_) => false,
        }
    }

    fn check(&self, expression: &str) -> Result<(), InvalidPathExpression> {
        self.cache.get_or_compile(expression, Self::compile).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_star_matches_in_sub_folders() {
        let matcher = FindOwnersGlobMatcher::new();
        assert!(matcher.matches("*.md", "README.md"));
        assert!(matcher.matches("*.md", "docs/intro.md"));
        assert!(!matcher.matches("*.md", "docs/intro.txt"));
    }

    #[test]
    fn test_other_expressions_behave_like_globs() {
        let matcher = FindOwnersGlobMatcher::new();
        assert!(matcher.matches("BUILD", "BUILD"));
        assert!(!matcher.matches("BUILD", "sub/BUILD"));
        assert!(matcher.matches("docs/*.md", "docs/a.md"));
        assert!(!matcher.matches("docs/*.md", "docs/x/a.md"));
        assert!(matcher.matches("docs/**", "docs/x/a.md"));
        assert!(matcher.matches("{BUILD,*.bzl}", "tools/defs.bzl"));
    }

    #[test]
    fn test_malformed_expressions_never_match() {
        let matcher = FindOwnersGlobMatcher::new();
        assert!(!matcher.matches("*.{md", "a.{md"));
        assert!(matcher.check("*.{md").is_err());
        assert!(matcher.check("*.{md,txt}").is_ok());
    }
}
