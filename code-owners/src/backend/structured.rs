//! A structured encoding of owner configs as a JSON document. It has no way
//! to express imports on individual owner sets or owner sets that ignore
//! global and parent owners.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{Backend, FormatError, InvalidConfigError, ParseError, Span};
use crate::{
    owner_config::{
        ConfigKey, ConfigReference, ImportMode, OwnerConfig, OwnerReference, OwnerSet, Revision,
    },
    path_expressions::PathExpressions,
};

const ID: &str = "structured";
const FILE_NAME: &str = "OWNERS_METADATA";

pub struct StructuredBackend;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Document {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    ignore_parent_owners: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    imports: Vec<DocumentImport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    owner_sets: Vec<DocumentOwnerSet>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct DocumentImport {
    mode: ImportMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    branch: Option<String>,
    path: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DocumentOwnerSet {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    path_expressions: Vec<String>,
    owners: Vec<OwnerReference>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    annotations: BTreeMap<OwnerReference, BTreeSet<String>>,
}

impl Backend for StructuredBackend {
    fn id(&self) -> &'static str {
        ID
    }

    fn file_name(&self) -> &'static str {
        FILE_NAME
    }

    fn default_path_expressions(&self) -> PathExpressions {
        PathExpressions::Simple
    }

    fn parse(
        &self,
        key: &ConfigKey,
        revision: &Revision,
        source: &str,
    ) -> Result<OwnerConfig, InvalidConfigError> {
        let document: Document = serde_json::from_str(source).map_err(|err| {
            let offset = byte_offset(source, err.line(), err.column());
            InvalidConfigError {
                file: key.file_path(FILE_NAME),
                errors: vec![ParseError::new(
                    err.to_string(),
                    err.line(),
                    Span(offset, offset),
                )],
            }
        })?;

        let mut config = OwnerConfig::new(key.clone(), revision.clone());
        config.ignore_parent_owners = document.ignore_parent_owners;
        for import in document.imports {
            let mut reference = ConfigReference::new(import.mode, import.path);
            if let Some(project) = import.project {
                reference = reference.with_project(project);
            }
            if let Some(branch) = import.branch {
                reference = reference.with_branch(&branch);
            }
            config = config.add_import(reference);
        }
        for document_set in document.owner_sets {
            let mut owner_set = OwnerSet::with_owners(document_set.owners);
            for expression in document_set.path_expressions {
                owner_set = owner_set.add_path_expression(expression);
            }
            owner_set.annotations = document_set.annotations;
            config = config.add_owner_set(owner_set);
        }
        Ok(config)
    }

    fn format(&self, config: &OwnerConfig) -> Result<String, FormatError> {
        let unsupported = |feature| FormatError::UnsupportedFeature {
            backend: ID,
            feature,
            key: config.key.clone(),
        };

        let mut document = Document {
            ignore_parent_owners: config.ignore_parent_owners,
            ..Document::default()
        };
        for reference in &config.imports {
            document.imports.push(DocumentImport {
                mode: reference.mode,
                project: reference.project.clone(),
                branch: reference.branch.clone(),
                path: reference.file_path.clone(),
            });
        }
        for owner_set in &config.owner_sets {
            if owner_set.ignore_global_and_parent {
                return Err(unsupported("'ignore global and parent' on an owner set"));
            }
            if !owner_set.imports.is_empty() {
                return Err(unsupported("imports on an owner set"));
            }
            document.owner_sets.push(DocumentOwnerSet {
                path_expressions: owner_set.path_expressions.clone(),
                owners: owner_set.owners.iter().cloned().collect(),
                annotations: owner_set.annotations.clone(),
            });
        }

        let mut out = serde_json::to_string_pretty(&document).map_err(|err| {
            FormatError::Encoding {
                key: config.key.clone(),
                message: err.to_string(),
            }
        })?;
        out.push('\n');
        Ok(out)
    }
}

// serde_json reports 1-based lines and columns.
fn byte_offset(source: &str, line: usize, column: usize) -> usize {
    let line_start: usize = source
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    (line_start + column.saturating_sub(1)).min(source.len())
}
