use super::{ExpressionCache, InvalidPathExpression, PathExpressionMatcher};

/// Simple path expressions: `*` matches any characters within a single
/// folder, `...` matches any characters including `/`. Everything else is
/// literal. `*.md` only matches files directly in the folder, `....md`
/// matches them in every sub-folder too, `docs/...` matches everything below
/// `docs`.
pub struct SimplePathExpressionMatcher {
    cache: ExpressionCache<regex::Regex>,
}

impl SimplePathExpressionMatcher {
    pub fn new() -> Self {
        Self {
            cache: ExpressionCache::new(),
        }
    }

    fn compile(expression: &str) -> Result<regex::Regex, InvalidPathExpression> {
        if expression.is_empty() {
            return Err(InvalidPathExpression::new(expression, "empty expression"));
        }

        let expression_without_slash = expression.strip_prefix('/').unwrap_or(expression);
        let mut regex = String::with_capacity(expression.len() + 8);
        regex.push_str(r#"\A"#);
        let mut rest = expression_without_slash;
        while let Some(c) = rest.chars().next() {
            if let Some(after) = rest.strip_prefix("...") {
                regex.push_str(".*");
                rest = after;
                continue;
            }
            match c {
                '*' => regex.push_str(r#"[^/]*"#),
                _ => {
                    if regex_syntax::is_meta_character(c) {
                        regex.push('\\');
                    }
                    regex.push(c);
                }
            }
            rest = &rest[c.len_utf8()..];
        }
        regex.push_str(r#"\z"#);
        regex::Regex::new(&regex)
            .map_err(|err| InvalidPathExpression::new(expression, err.to_string()))
    }
}

impl Default for SimplePathExpressionMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl PathExpressionMatcher for SimplePathExpressionMatcher {
    fn matches(&self, expression: &str, relative_path: &str) -> bool {
        match self.cache.get_or_compile(expression, Self::compile) {
            Ok(regex) => regex.is_match(relative_path),
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
    fn test_simple_path_expressions() {
        let matcher = SimplePathExpressionMatcher::new();
        let examples = [
            ("*.md", "README.md", true),
            ("*.md", "docs/README.md", false),
            ("....md", "docs/README.md", true),
            ("....md", "README.md", true),
            ("docs/...", "docs/a/b.txt", true),
            ("docs/...", "src/a.txt", false),
            ("foo.txt", "foo.txt", true),
            ("foo.txt", "fooXtxt", false),
            ("[abc].txt", "[abc].txt", true),
            ("/BUILD", "BUILD", true),
        ];
        for (expression, path, expected) in examples {
            assert_eq!(
                matcher.matches(expression, path),
                expected,
                "{} vs {}",
                expression,
                path
            );
        }
    }

    #[test]
    fn test_empty_expression_is_invalid() {
        let matcher = SimplePathExpressionMatcher::new();
        assert!(matcher.check("").is_err());
        assert!(!matcher.matches("", ""));
    }
}
