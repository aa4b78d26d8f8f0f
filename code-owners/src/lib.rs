//! Code owner resolution for code review.
//!
//! Owner configs (`OWNERS` files) declare who owns the files of a folder and
//! its sub-folders. For any path, [`CodeOwnerResolver`] collects the code
//! owners from the configs of the folders containing it, following imports
//! between configs. [`StatusComputation`] combines the code owners of every
//! file of a change with the change's approvals into a per-file status.

pub mod accounts;
pub mod backend;
mod cache;
pub mod imports;
pub mod loader;
pub mod messages;
pub mod owner_config;
pub mod path_expressions;
pub mod paths;
pub mod resolver;
pub mod settings;
pub mod status;
pub mod validation;

pub use accounts::{AccountId, AccountResolver, InMemoryAccounts};
pub use backend::{Backend, FindOwnersBackend, StructuredBackend};
pub use cache::RequestCache;
pub use imports::{ImportResolver, ResolvedOwnerConfig, UnresolvedImport, UnresolvedReason};
pub use loader::{BackendConfigLoader, ConfigLoader, InMemoryRepo, ProjectAccess, RepoStore};
pub use messages::{DebugMessage, OptionalResultWithMessages};
pub use owner_config::{
    ConfigKey, ConfigReference, ImportMode, OwnerConfig, OwnerReference, OwnerSet, Revision,
};
pub use path_expressions::{PathExpressionMatcher, PathExpressions};
pub use resolver::{CodeOwnerResolver, ResolveError, ResolvedOwners};
pub use settings::{CodeOwnersSettings, EffectiveSettings, LabelDefinition, RequiredApproval};
pub use status::{
    ChangeDiff, ChangeOwnerStatusReport, ChangeState, ChangedFile, CodeOwnerStatus,
    FileCodeOwnerStatus, PathCodeOwnerStatus, StatusComputation, StatusError,
};
pub use validation::{ConfigValidator, Severity, ValidationIssue, ValidationReport};
