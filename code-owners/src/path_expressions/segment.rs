use super::InvalidPathExpression;

/// A glob compiled into a sequence of path segment matchers. A `**` segment
/// matches zero or more whole path components; every other segment matches
/// exactly one component.
#[derive(Debug, Clone)]
pub(crate) struct SegmentGlob {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
enum Segment {
    AnyDepth,
    Component(SegmentCondition),
}

impl SegmentGlob {
    pub(crate) fn compile(glob: &str) -> Result<Self, InvalidPathExpression> {
        if glob.is_empty() {
            return Err(InvalidPathExpression::new(glob, "empty expression"));
        }
        let glob_without_slash = glob.strip_prefix('/').unwrap_or(glob);
        let mut segments: Vec<Segment> = Vec::new();
        for segment in glob_without_slash.split('/') {
            match segment {
                // Consecutive double stars coalesce into one
                "**" => {
                    if !matches!(segments.last(), Some(Segment::AnyDepth)) {
                        segments.push(Segment::AnyDepth);
                    }
                }
                _ => segments.push(Segment::Component(
                    SegmentCondition::new(segment)
                        .map_err(|reason| InvalidPathExpression::new(glob, reason))?,
                )),
            }
        }
        Ok(Self { segments })
    }

    /// Step through the path components, tracking the set of segment
    /// positions we could be at. Position `i` means segments `..i` have been
    /// matched; the path matches if we end at the final position.
    pub(crate) fn is_match(&self, path: &str) -> bool {
        let mut states = vec![false; self.segments.len() + 1];
        states[0] = true;
        self.follow_epsilon_transitions(&mut states);

        for component in path.split('/') {
            let mut next_states = vec![false; states.len()];
            for (idx, segment) in self.segments.iter().enumerate() {
                if !states[idx] {
                    continue;
                }
                match segment {
                    Segment::AnyDepth => next_states[idx] = true,
                    Segment::Component(condition) => {
                        if condition.is_match(component) {
                            next_states[idx + 1] = true;
                        }
                    }
                }
            }
            self.follow_epsilon_transitions(&mut next_states);
            if !next_states.iter().any(|&active| active) {
                return false;
            }
            states = next_states;
        }
        states[self.segments.len()]
    }

    // A double star can match zero components, so being before it also means
    // being after it.
    fn follow_epsilon_transitions(&self, states: &mut [bool]) {
        for (idx, segment) in self.segments.iter().enumerate() {
            if states[idx] && matches!(segment, Segment::AnyDepth) {
                states[idx + 1] = true;
            }
        }
    }
}

/// How a single path component is matched. Most segments are literals or
/// have a single leading/trailing star, which don't need a regex.
#[derive(Debug, Clone)]
enum SegmentCondition {
    Unconditional,
    Literal(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
    Regex(regex::Regex),
}

impl SegmentCondition {
    fn new(glob: &str) -> Result<Self, String> {
        if glob == "*" || glob == "**" {
            return Ok(Self::Unconditional);
        }

        let mut chars = glob.chars();
        let leading_star = chars.next().map(|c| c == '*').unwrap_or(false);
        let trailing_star = chars.next_back().map(|c| c == '*').unwrap_or(false);
        let internal_wildcards = has_wildcard(chars);

        match (leading_star, trailing_star, internal_wildcards) {
            (false, false, false) if !has_wildcard(glob.chars()) => {
                Ok(Self::Literal(glob.to_owned()))
            }
            (false, true, false) if !has_wildcard(glob.chars().take(1)) => {
                Ok(Self::Prefix(glob.trim_end_matches('*').to_owned()))
            }
            (true, false, false) if !has_wildcard(glob.chars().rev().take(1)) => {
                Ok(Self::Suffix(glob.trim_start_matches('*').to_owned()))
            }
            (true, true, false) => Ok(Self::Contains(glob.trim_matches('*').to_owned())),
            _ => pattern_to_regex(glob).map(Self::Regex),
        }
    }

    fn is_match(&self, candidate: &str) -> bool {
        match self {
            Self::Unconditional => true,
            Self::Literal(literal) => literal == candidate,
            Self::Prefix(prefix) => candidate.starts_with(prefix.as_str()),
            Self::Suffix(suffix) => candidate.ends_with(suffix.as_str()),
            Self::Contains(needle) => {
                memchr::memmem::find(candidate.as_bytes(), needle.as_bytes()).is_some()
            }
            Self::Regex(re) => re.is_match(candidate),
        }
    }
}

fn pattern_to_regex(pattern: &str) -> Result<regex::Regex, String> {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push_str(r#"\A"#);
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => regex.push_str(r#"[^/]*"#),
            '?' => regex.push_str(r#"[^/]"#),
            '[' => {
                regex.push('[');
                let mut class_len = 0;
                loop {
                    match chars.next() {
                        Some(']') if class_len > 0 => break,
                        Some('!') if class_len == 0 => regex.push('^'),
                        Some(c) => {
                            if c == '\\' || c == '[' || c == '&' || c == '~' {
                                regex.push('\\');
                            }
                            regex.push(c);
                        }
                        None => return Err("unclosed character class".to_owned()),
                    }
                    class_len += 1;
                }
                regex.push(']');
            }
            _ => {
                if regex_syntax::is_meta_character(c) {
                    regex.push('\\');
                }
                regex.push(c);
            }
        }
    }
    regex.push_str(r#"\z"#);
    regex::Regex::new(&regex).map_err(|err| err.to_string())
}

fn has_wildcard(mut char_iter: impl Iterator<Item = char>) -> bool {
    char_iter.any(|c| c == '*' || c == '?' || c == '[')
}
