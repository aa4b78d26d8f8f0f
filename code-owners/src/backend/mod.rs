//! Encodings of owner configs. A backend parses the text of an OWNERS file
//! into an [`OwnerConfig`] and formats it back. Backends are looked up by
//! their identifier, which is what settings refer to.

mod find_owners;
mod structured;

use std::{collections::HashMap, fmt, sync::Arc};

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::{
    owner_config::{ConfigKey, OwnerConfig, Revision},
    path_expressions::PathExpressions,
};

pub use self::find_owners::FindOwnersBackend;
pub use self::structured::StructuredBackend;

/// A span of text in an OWNERS file: start and end byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span(pub usize, pub usize);

impl From<(usize, usize)> for Span {
    fn from((start, end): (usize, usize)) -> Self {
        Span(start, end)
    }
}

/// A problem found while parsing an OWNERS file. `line` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub span: Span,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>, line: usize, span: impl Into<Span>) -> Self {
        Self {
            message: message.into(),
            line,
            span: span.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// An OWNERS file that couldn't be parsed. Carries every error found, not
/// just the first one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid code owner config file '{file}': {}", join_errors(.errors))]
pub struct InvalidConfigError {
    pub file: String,
    pub errors: Vec<ParseError>,
}

fn join_errors(errors: &[ParseError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("backend '{backend}' cannot store {feature} (in {key})")]
    UnsupportedFeature {
        backend: &'static str,
        feature: &'static str,
        key: ConfigKey,
    },
    #[error("cannot format code owner config {key}: {message}")]
    Encoding { key: ConfigKey, message: String },
}

pub trait Backend: Send + Sync {
    /// Identifier used to select the backend in settings.
    fn id(&self) -> &'static str;

    /// Name of the file that holds a folder's config.
    fn file_name(&self) -> &'static str;

    /// Path expression dialect used when settings don't name one.
    fn default_path_expressions(&self) -> PathExpressions;

    fn parse(
        &self,
        key: &ConfigKey,
        revision: &Revision,
        source: &str,
    ) -> Result<OwnerConfig, InvalidConfigError>;

    /// Format a config. Features the encoding can't express are rejected,
    /// never dropped.
    fn format(&self, config: &OwnerConfig) -> Result<String, FormatError>;
}

/// Backends by identifier.
#[derive(Clone)]
pub struct BackendRegistry {
    backends: HashMap<&'static str, Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// A registry with the built-in backends.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(FindOwnersBackend));
        registry.register(Arc::new(StructuredBackend));
        registry
    }

    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        self.backends.insert(backend.id(), backend);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Backend>> {
        self.backends.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<_> = self.backends.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

static DEFAULT_REGISTRY: Lazy<BackendRegistry> = Lazy::new(BackendRegistry::with_defaults);

/// The registry holding the built-in backends.
pub fn registry() -> &'static BackendRegistry {
    &DEFAULT_REGISTRY
}
