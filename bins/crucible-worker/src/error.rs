//! Engine error taxonomy.
//!
//! Only prerequisites of a run are errors. Stage crashes, timeouts and
//! validator failures are folded into the case verdict instead.

use crucible_common::toolchain::ToolchainError;
use crucible_common::types::Role;
use std::path::PathBuf;
use thiserror::Error;

use crate::snapshot::SnapshotError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("role resolution failed: missing required role(s): {}", join_roles(.missing))]
    RoleResolution { missing: Vec<Role> },

    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    #[error("compilation failed for {role}:\n{diagnostic}")]
    Compilation { role: Role, diagnostic: String },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("no source bytes available for {role} ({path})")]
    MissingSource { role: Role, path: String },

    #[error("workspace io error at {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_roles(roles: &[Role]) -> String {
    roles
        .iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_resolution_message_names_roles() {
        let err = EngineError::RoleResolution {
            missing: vec![Role::Reference, Role::Solution],
        };
        assert_eq!(
            err.to_string(),
            "role resolution failed: missing required role(s): reference, solution"
        );
    }

    #[test]
    fn test_compilation_error_keeps_diagnostic_verbatim() {
        let err = EngineError::Compilation {
            role: Role::Solution,
            diagnostic: "main.cpp:3:5: error: expected ';'".to_string(),
        };
        assert!(err.to_string().ends_with("main.cpp:3:5: error: expected ';'"));
    }
}
