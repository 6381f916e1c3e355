/// Role Resolver
///
/// Maps workspace files onto the roles a test type needs, at most one file
/// per role. Resolution is a pure function of the file list: files are
/// ordered by path before matching, so the caller's order (or whatever the
/// filesystem enumerated) never changes the outcome.
///
/// **Matching rules:**
/// - Base name = file name up to the first `.`, lowercased
/// - Roles are tried in the test type's priority order, required roles first
/// - A role matches when one of its keywords is a substring of the base name
/// - The first unfilled matching role takes the file
/// - Files matching no unfilled role are excluded, not rejected

use crucible_common::types::{Role, Snapshot, TestType, WorkspaceFile};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub test_type: TestType,
    pub bindings: BTreeMap<Role, WorkspaceFile>,
    /// Paths that did not take a role, in resolution order
    pub excluded: Vec<String>,
}

impl Resolution {
    pub fn missing_roles(&self) -> Vec<Role> {
        self.test_type
            .required_roles()
            .iter()
            .filter(|r| !self.bindings.contains_key(r))
            .copied()
            .collect()
    }

    pub fn into_snapshot(self) -> Snapshot {
        Snapshot::new(self.test_type, self.bindings)
    }
}

/// First unfilled role in priority order whose keywords hit `base_name`.
fn match_role(base_name: &str, priority: &[Role], filled: &BTreeMap<Role, WorkspaceFile>) -> Option<Role> {
    priority.iter().copied().find(|role| {
        !filled.contains_key(role) && role.keywords().iter().any(|kw| base_name.contains(kw))
    })
}

/// Bind files to roles without checking that required roles are present.
/// Used by snapshot diffing, where a partially populated workspace is valid.
pub fn resolve_lenient(files: &[WorkspaceFile], test_type: TestType) -> Resolution {
    let mut ordered: Vec<&WorkspaceFile> = files.iter().collect();
    ordered.sort_by(|a, b| a.path.cmp(&b.path));

    let priority = test_type.priority();
    let mut bindings = BTreeMap::new();
    let mut excluded = Vec::new();

    for file in ordered {
        let base_name = file.base_name();
        match match_role(&base_name, &priority, &bindings) {
            Some(role) => {
                debug!(path = %file.path, role = %role, "Bound file to role");
                bindings.insert(role, file.clone());
            }
            None => {
                debug!(path = %file.path, "File matches no open role, excluded");
                excluded.push(file.path.clone());
            }
        }
    }

    Resolution {
        test_type,
        bindings,
        excluded,
    }
}

/// Bind files to roles; fails if any required role stays empty.
pub fn resolve(files: &[WorkspaceFile], test_type: TestType) -> EngineResult<Resolution> {
    let resolution = resolve_lenient(files, test_type);
    if !resolution.excluded.is_empty() {
        debug!(excluded = ?resolution.excluded, "Files not bound to any role");
    }
    let missing = resolution.missing_roles();
    if !missing.is_empty() {
        return Err(EngineError::RoleResolution { missing });
    }
    Ok(resolution)
}
